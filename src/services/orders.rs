use crate::{
    config::AppConfig,
    db::DbPool,
    entities::{
        order::{
            self, ActiveModel as OrderActiveModel, Entity as OrderEntity, FulfillmentStatus,
            Model as OrderModel, PaymentMethod, PaymentStatus,
        },
        order_item::{
            self, ActiveModel as OrderItemActiveModel, Entity as OrderItemEntity,
            Model as OrderItemModel,
        },
        product::Entity as ProductEntity,
    },
    errors::ServiceError,
    events::{Event, EventSender},
    services::{
        carts::{CartOwner, CartService},
        catalog::{ensure_stock, page_window, ProductService},
        shipping::{ShippingQuote, ShippingService},
    },
};
use chrono::Utc;
use rand::Rng;
use rust_decimal::Decimal;
use sea_orm::{
    sea_query::Expr, ActiveModelTrait, ColumnTrait, ConnectionTrait, EntityTrait, PaginatorTrait,
    QueryFilter, QueryOrder, QuerySelect, Set, TransactionTrait,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;
use utoipa::{IntoParams, ToSchema};
use validator::Validate;

const ORDER_NUMBER_CHARSET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";
const ORDER_NUMBER_SUFFIX_LEN: usize = 5;

/// How order placement treats stock.
///
/// Cart checkout is `Strict`: every decrement happens inside the order
/// transaction and any shortfall aborts the whole order. Direct orders are
/// `BestEffort`: the order is persisted first and decrements that fail
/// afterwards are logged for back-office follow-up instead of rolled back.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StockStrategy {
    Strict,
    BestEffort,
}

/// Who is asking for an order. Admins see everything, everyone else only
/// their own records.
#[derive(Debug, Clone)]
pub enum OrderViewer {
    Admin,
    User(Uuid),
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate, ToSchema)]
pub struct ShippingAddress {
    #[validate(length(min = 1, message = "Street address is required"))]
    pub address: String,
    #[serde(default)]
    pub city: Option<String>,
    #[validate(length(min = 1, message = "Shipping region is required"))]
    pub region: String,
    #[serde(default)]
    pub postal_code: Option<String>,
    #[serde(default)]
    pub country: Option<String>,
}

/// Contact snapshot for orders placed without an account.
#[derive(Debug, Clone, Serialize, Deserialize, Validate, ToSchema)]
pub struct GuestContact {
    #[validate(length(min = 1, message = "Name is required"))]
    pub name: String,
    #[validate(email(message = "A valid email is required"))]
    pub email: String,
    #[serde(default)]
    pub phone: Option<String>,
}

fn default_payment_method() -> PaymentMethod {
    PaymentMethod::Paystack
}

#[derive(Debug, Serialize, Deserialize, Validate, ToSchema)]
pub struct CheckoutRequest {
    #[validate]
    pub shipping_address: ShippingAddress,
    #[serde(default = "default_payment_method")]
    pub payment_method: PaymentMethod,
    #[validate]
    #[serde(default)]
    pub guest_contact: Option<GuestContact>,
    #[serde(default)]
    pub notes: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, Validate, ToSchema)]
pub struct DirectOrderItem {
    pub product_id: Uuid,
    #[validate(range(min = 1, max = 1000, message = "Quantity must be between 1 and 1000"))]
    pub quantity: i32,
}

#[derive(Debug, Serialize, Deserialize, Validate, ToSchema)]
pub struct DirectOrderRequest {
    #[validate]
    pub items: Vec<DirectOrderItem>,
    #[validate]
    pub shipping_address: ShippingAddress,
    #[serde(default = "default_payment_method")]
    pub payment_method: PaymentMethod,
    #[validate]
    #[serde(default)]
    pub guest_contact: Option<GuestContact>,
    #[serde(default)]
    pub notes: Option<String>,
}

/// Order with its line snapshots, the shape every order endpoint returns.
#[derive(Debug, Serialize, ToSchema)]
pub struct OrderView {
    #[serde(flatten)]
    pub order: OrderModel,
    pub items: Vec<OrderItemModel>,
}

#[derive(Debug, Default, Deserialize, IntoParams)]
pub struct OrderListQuery {
    pub status: Option<FulfillmentStatus>,
    pub payment_status: Option<PaymentStatus>,
    pub page: Option<u64>,
    pub per_page: Option<u64>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct OrderPage {
    pub items: Vec<OrderView>,
    pub total: u64,
    pub page: u64,
    pub per_page: u64,
    pub total_pages: u64,
}

/// A cart line or direct item resolved against the live product row.
struct ResolvedLine {
    product_id: Uuid,
    name: String,
    quantity: i32,
    unit_price: Decimal,
    image_url: Option<String>,
}

struct OrderDraft<'a> {
    caller: &'a CartOwner,
    contact: Option<GuestContact>,
    address: &'a ShippingAddress,
    payment_method: PaymentMethod,
    notes: Option<String>,
    lines: &'a [ResolvedLine],
    quote: &'a ShippingQuote,
}

fn generate_order_number() -> String {
    let mut rng = rand::thread_rng();
    let suffix: String = (0..ORDER_NUMBER_SUFFIX_LEN)
        .map(|_| ORDER_NUMBER_CHARSET[rng.gen_range(0..ORDER_NUMBER_CHARSET.len())] as char)
        .collect();
    format!("ORD-{}-{}", Utc::now().timestamp_millis(), suffix)
}

fn order_totals(lines: &[ResolvedLine], shipping_fee: Decimal) -> (Decimal, Decimal) {
    let subtotal: Decimal = lines
        .iter()
        .map(|line| line.unit_price * Decimal::from(line.quantity))
        .sum();
    (subtotal, subtotal + shipping_fee)
}

fn viewer_owns(order: &OrderModel, viewer: &OrderViewer) -> bool {
    match viewer {
        OrderViewer::Admin => true,
        OrderViewer::User(user_id) => order.user_id == Some(*user_id),
    }
}

/// Service for order placement and lifecycle.
///
/// Status changes all route through the transition graph on
/// [`FulfillmentStatus`]; there is no privileged path around it.
#[derive(Clone)]
pub struct OrderService {
    db_pool: Arc<DbPool>,
    config: Arc<AppConfig>,
    event_sender: Arc<EventSender>,
    product_service: Arc<ProductService>,
    cart_service: Arc<CartService>,
    shipping_service: Arc<ShippingService>,
}

impl OrderService {
    pub fn new(
        db_pool: Arc<DbPool>,
        config: Arc<AppConfig>,
        event_sender: Arc<EventSender>,
        product_service: Arc<ProductService>,
        cart_service: Arc<CartService>,
        shipping_service: Arc<ShippingService>,
    ) -> Self {
        Self {
            db_pool,
            config,
            event_sender,
            product_service,
            cart_service,
            shipping_service,
        }
    }

    /// Turns the caller's cart into an order with [`StockStrategy::Strict`]
    /// semantics: line verification, stock decrements, order insertion and
    /// cart emptying all commit or roll back together.
    #[instrument(skip(self, request))]
    pub async fn checkout_cart(
        &self,
        caller: &CartOwner,
        request: CheckoutRequest,
    ) -> Result<OrderView, ServiceError> {
        request.validate()?;
        let contact = resolve_contact(caller, request.guest_contact.as_ref())?;

        let txn = self.db_pool.begin().await?;

        let (cart, items) = self
            .cart_service
            .find_cart_with_items(&txn, caller)
            .await?
            .filter(|(_, items)| !items.is_empty())
            .ok_or_else(|| {
                ServiceError::InvalidOperation(
                    "Cart is empty. Cannot proceed with checkout".to_string(),
                )
            })?;

        let mut lines = Vec::with_capacity(items.len());
        for item in &items {
            let product = ProductEntity::find_by_id(item.product_id)
                .one(&txn)
                .await?
                .ok_or_else(|| {
                    ServiceError::InvalidOperation(
                        "A product in your cart is no longer available".to_string(),
                    )
                })?;
            if !product.is_available {
                return Err(ServiceError::InvalidOperation(format!(
                    "{} is not available",
                    product.name
                )));
            }
            if product.stock_quantity < item.quantity {
                return Err(ServiceError::InsufficientStock(format!(
                    "{}: Only {} items available",
                    product.name, product.stock_quantity
                )));
            }
            lines.push(ResolvedLine {
                product_id: product.id,
                name: product.name,
                quantity: item.quantity,
                // the price the shopper saw when the line went in
                unit_price: item.price_snapshot,
                image_url: product.image_url,
            });
        }

        let item_count: i32 = lines.iter().map(|line| line.quantity).sum();
        let quote = self
            .shipping_service
            .quote(&request.shipping_address.region, item_count)
            .await?;

        let order = self
            .insert_order(
                &txn,
                OrderDraft {
                    caller,
                    contact,
                    address: &request.shipping_address,
                    payment_method: request.payment_method,
                    notes: request.notes,
                    lines: &lines,
                    quote: &quote,
                },
            )
            .await?;

        for line in &lines {
            let decremented = self
                .product_service
                .decrement_stock(&txn, line.product_id, line.quantity)
                .await?;
            if !decremented {
                return Err(ServiceError::InsufficientStock(format!(
                    "Insufficient stock for {}",
                    line.name
                )));
            }
        }

        self.cart_service.empty_cart(&txn, cart.id).await?;
        txn.commit().await?;

        info!(
            order_id = %order.id,
            order_number = %order.order_number,
            total = %order.total_amount,
            "Order placed from cart"
        );
        self.publish(Event::OrderCreated(order.id)).await;
        self.view(order).await
    }

    /// Places an order from an explicit item list with
    /// [`StockStrategy::BestEffort`] semantics. The order lands even when a
    /// decrement loses a race; shortfalls are logged, not rolled back.
    #[instrument(skip(self, request))]
    pub async fn place_direct_order(
        &self,
        caller: &CartOwner,
        request: DirectOrderRequest,
    ) -> Result<OrderView, ServiceError> {
        request.validate()?;
        if request.items.is_empty() {
            return Err(ServiceError::ValidationError(
                "Order must contain at least one item".to_string(),
            ));
        }
        let contact = resolve_contact(caller, request.guest_contact.as_ref())?;

        let db = &*self.db_pool;
        let mut lines = Vec::with_capacity(request.items.len());
        for item in &request.items {
            let product = ProductEntity::find_by_id(item.product_id)
                .one(db)
                .await?
                .ok_or_else(|| ServiceError::NotFound("Product not found".to_string()))?;
            ensure_stock(&product, item.quantity)?;
            lines.push(ResolvedLine {
                product_id: product.id,
                name: product.name,
                quantity: item.quantity,
                unit_price: product.price,
                image_url: product.image_url,
            });
        }

        let item_count: i32 = lines.iter().map(|line| line.quantity).sum();
        let quote = self
            .shipping_service
            .quote(&request.shipping_address.region, item_count)
            .await?;

        let txn = self.db_pool.begin().await?;
        let order = self
            .insert_order(
                &txn,
                OrderDraft {
                    caller,
                    contact,
                    address: &request.shipping_address,
                    payment_method: request.payment_method,
                    notes: request.notes,
                    lines: &lines,
                    quote: &quote,
                },
            )
            .await?;
        txn.commit().await?;

        for line in &lines {
            match self
                .product_service
                .decrement_stock(db, line.product_id, line.quantity)
                .await
            {
                Ok(true) => {}
                Ok(false) => warn!(
                    order_id = %order.id,
                    product_id = %line.product_id,
                    quantity = line.quantity,
                    "Stock ran out between check and decrement"
                ),
                Err(e) => error!(
                    order_id = %order.id,
                    product_id = %line.product_id,
                    error = %e,
                    "Failed to decrement stock"
                ),
            }
        }

        // A server-side cart under the same guest token holds what was just
        // bought; clear it so the shopper does not buy twice.
        if matches!(caller, CartOwner::Guest(_)) {
            if let Err(e) = self.cart_service.clear_cart(caller).await {
                warn!(order_id = %order.id, error = %e, "Failed to clear guest cart after order");
            }
        }

        info!(
            order_id = %order.id,
            order_number = %order.order_number,
            total = %order.total_amount,
            "Direct order placed"
        );
        self.publish(Event::OrderCreated(order.id)).await;
        self.view(order).await
    }

    #[instrument(skip(self))]
    pub async fn get_order(
        &self,
        order_id: Uuid,
        viewer: &OrderViewer,
    ) -> Result<OrderView, ServiceError> {
        let order = self.load_owned(order_id, viewer).await?;
        self.view(order).await
    }

    /// The caller's orders, newest first.
    #[instrument(skip(self))]
    pub async fn list_for_user(&self, user_id: Uuid) -> Result<Vec<OrderView>, ServiceError> {
        let orders = OrderEntity::find()
            .filter(order::Column::UserId.eq(user_id))
            .order_by_desc(order::Column::CreatedAt)
            .order_by_asc(order::Column::Id)
            .all(&*self.db_pool)
            .await?;
        self.views(orders).await
    }

    /// Back-office listing across all orders with status filters and
    /// pagination.
    #[instrument(skip(self))]
    pub async fn list_all(&self, query: OrderListQuery) -> Result<OrderPage, ServiceError> {
        let db = &*self.db_pool;

        let mut find = OrderEntity::find();
        if let Some(status) = query.status {
            find = find.filter(order::Column::Status.eq(status));
        }
        if let Some(payment_status) = query.payment_status {
            find = find.filter(order::Column::PaymentStatus.eq(payment_status));
        }

        let total = find.clone().count(db).await?;
        let (page, per_page) = page_window(
            query.page,
            query.per_page,
            self.config.api_default_page_size as u64,
            self.config.api_max_page_size as u64,
        );

        let orders = find
            .order_by_desc(order::Column::CreatedAt)
            .order_by_asc(order::Column::Id)
            .limit(per_page)
            .offset((page - 1) * per_page)
            .all(db)
            .await?;

        let total_pages = if total == 0 {
            0
        } else {
            (total + per_page - 1) / per_page
        };

        Ok(OrderPage {
            items: self.views(orders).await?,
            total,
            page,
            per_page,
            total_pages,
        })
    }

    /// Moves an order along the fulfillment graph. Asking for the state the
    /// order is already in is an accepted no-op with no side effects; an edge
    /// the graph does not have is rejected.
    #[instrument(skip(self))]
    pub async fn update_status(
        &self,
        order_id: Uuid,
        next: FulfillmentStatus,
    ) -> Result<OrderView, ServiceError> {
        let order = self.load(order_id).await?;

        if order.status == next {
            return self.view(order).await;
        }
        if !order.status.can_transition_to(next) {
            return Err(ServiceError::InvalidOperation(format!(
                "Cannot transition order from {} to {}",
                order.status, next
            )));
        }

        let updated = self.apply_transition(order, next).await?;
        self.view(updated).await
    }

    /// Customer-facing cancellation, allowed only while the order is still
    /// pending or processing. Admins use [`OrderService::update_status`] for
    /// the later cancellation edges.
    #[instrument(skip(self))]
    pub async fn cancel_order(
        &self,
        order_id: Uuid,
        viewer: &OrderViewer,
    ) -> Result<OrderView, ServiceError> {
        let order = self.load_owned(order_id, viewer).await?;

        if order.status == FulfillmentStatus::Cancelled {
            return Err(ServiceError::InvalidOperation(
                "Order is already cancelled".to_string(),
            ));
        }
        if !order.status.user_cancellable() {
            return Err(ServiceError::InvalidOperation(
                "Order can no longer be cancelled".to_string(),
            ));
        }

        let updated = self
            .apply_transition(order, FulfillmentStatus::Cancelled)
            .await?;
        self.view(updated).await
    }

    /// Re-keys every order placed under a guest token to the given user.
    /// Returns how many orders moved.
    #[instrument(skip(self, guest_token), fields(user_id = %user_id))]
    pub async fn attach_guest_orders(
        &self,
        user_id: Uuid,
        guest_token: &str,
    ) -> Result<u64, ServiceError> {
        let result = OrderEntity::update_many()
            .col_expr(order::Column::UserId, Expr::value(Some(user_id)))
            .col_expr(order::Column::GuestToken, Expr::value(Option::<String>::None))
            .col_expr(order::Column::UpdatedAt, Expr::value(Utc::now()))
            .filter(order::Column::GuestToken.eq(guest_token))
            .exec(&*self.db_pool)
            .await?;

        if result.rows_affected > 0 {
            info!(
                user_id = %user_id,
                count = result.rows_affected,
                "Guest orders attached to user"
            );
        }
        Ok(result.rows_affected)
    }

    pub async fn find_by_reference(&self, reference: &str) -> Result<OrderModel, ServiceError> {
        OrderEntity::find()
            .filter(order::Column::PaymentReference.eq(reference))
            .one(&*self.db_pool)
            .await?
            .ok_or_else(|| {
                ServiceError::NotFound(format!("No order found for payment reference {}", reference))
            })
    }

    /// Stores the gateway reference handed out when a payment session is
    /// initialized, so the later verify and webhook paths can find the order.
    pub async fn set_payment_reference(
        &self,
        order_id: Uuid,
        reference: &str,
    ) -> Result<OrderModel, ServiceError> {
        let order = self.load(order_id).await?;

        let mut active: OrderActiveModel = order.into();
        active.payment_reference = Set(Some(reference.to_string()));
        active.updated_at = Set(Utc::now());
        Ok(active.update(&*self.db_pool).await?)
    }

    /// Marks the order paid. Replays are harmless: an order already paid is
    /// returned unchanged and no second confirmation event goes out.
    #[instrument(skip(self))]
    pub async fn record_payment_success(
        &self,
        reference: &str,
        transaction_id: Option<&str>,
    ) -> Result<OrderModel, ServiceError> {
        let order = self.find_by_reference(reference).await?;
        if order.payment_status == PaymentStatus::Paid {
            info!(order_id = %order.id, reference, "Payment already recorded");
            return Ok(order);
        }

        let now = Utc::now();
        let result = OrderEntity::update_many()
            .col_expr(order::Column::PaymentStatus, Expr::value(PaymentStatus::Paid))
            .col_expr(order::Column::PaidAt, Expr::value(Some(now)))
            .col_expr(
                order::Column::TransactionId,
                Expr::value(transaction_id.map(|t| t.to_string())),
            )
            .col_expr(order::Column::UpdatedAt, Expr::value(now))
            .col_expr(
                order::Column::Version,
                Expr::col(order::Column::Version).add(1),
            )
            .filter(order::Column::Id.eq(order.id))
            .filter(order::Column::PaymentStatus.ne(PaymentStatus::Paid))
            .exec(&*self.db_pool)
            .await?;

        let updated = self.load(order.id).await?;
        if result.rows_affected > 0 {
            info!(order_id = %order.id, reference, "Payment recorded");
            self.publish(Event::PaymentConfirmed {
                order_id: order.id,
                reference: reference.to_string(),
            })
            .await;
        }
        Ok(updated)
    }

    /// Marks a failed payment attempt. Only a pending payment flips to
    /// failed; paid and refunded orders are left alone.
    #[instrument(skip(self))]
    pub async fn record_payment_failure(
        &self,
        reference: &str,
    ) -> Result<OrderModel, ServiceError> {
        let order = self.find_by_reference(reference).await?;
        if order.payment_status != PaymentStatus::Pending {
            return Ok(order);
        }

        let result = OrderEntity::update_many()
            .col_expr(
                order::Column::PaymentStatus,
                Expr::value(PaymentStatus::Failed),
            )
            .col_expr(order::Column::UpdatedAt, Expr::value(Utc::now()))
            .col_expr(
                order::Column::Version,
                Expr::col(order::Column::Version).add(1),
            )
            .filter(order::Column::Id.eq(order.id))
            .filter(order::Column::PaymentStatus.eq(PaymentStatus::Pending))
            .exec(&*self.db_pool)
            .await?;

        let updated = self.load(order.id).await?;
        if result.rows_affected > 0 {
            info!(order_id = %order.id, reference, "Payment failure recorded");
            self.publish(Event::PaymentFailed {
                order_id: order.id,
                reference: reference.to_string(),
            })
            .await;
        }
        Ok(updated)
    }

    pub(crate) async fn load_owned(
        &self,
        order_id: Uuid,
        viewer: &OrderViewer,
    ) -> Result<OrderModel, ServiceError> {
        let order = self.load(order_id).await?;
        if !viewer_owns(&order, viewer) {
            // same answer as a missing order, so ids cannot be probed
            return Err(ServiceError::NotFound("Order not found".to_string()));
        }
        Ok(order)
    }

    pub(crate) async fn load(&self, order_id: Uuid) -> Result<OrderModel, ServiceError> {
        OrderEntity::find_by_id(order_id)
            .one(&*self.db_pool)
            .await?
            .ok_or_else(|| ServiceError::NotFound("Order not found".to_string()))
    }

    /// Writes the status change with an optimistic version check, restocking
    /// items when the order enters cancellation. Self-transitions never reach
    /// this point, so entering `Cancelled` here always means the stock was
    /// not yet returned.
    async fn apply_transition(
        &self,
        order: OrderModel,
        next: FulfillmentStatus,
    ) -> Result<OrderModel, ServiceError> {
        let previous = order.status;
        let txn = self.db_pool.begin().await?;
        let now = Utc::now();

        let mut update = OrderEntity::update_many()
            .col_expr(order::Column::Status, Expr::value(next))
            .col_expr(order::Column::UpdatedAt, Expr::value(now))
            .col_expr(
                order::Column::Version,
                Expr::col(order::Column::Version).add(1),
            )
            .filter(order::Column::Id.eq(order.id))
            .filter(order::Column::Version.eq(order.version));

        // Entering cancellation or refund settles a captured payment as
        // refunded; unpaid orders keep their payment status.
        if matches!(
            next,
            FulfillmentStatus::Cancelled | FulfillmentStatus::Refunded
        ) && order.payment_status == PaymentStatus::Paid
        {
            update = update.col_expr(
                order::Column::PaymentStatus,
                Expr::value(PaymentStatus::Refunded),
            );
        }

        let result = update.exec(&txn).await?;
        if result.rows_affected == 0 {
            return Err(ServiceError::Conflict(
                "Order was modified concurrently".to_string(),
            ));
        }

        if next == FulfillmentStatus::Cancelled {
            let items = OrderItemEntity::find()
                .filter(order_item::Column::OrderId.eq(order.id))
                .all(&txn)
                .await?;
            for item in &items {
                self.product_service
                    .restock(&txn, item.product_id, item.quantity)
                    .await?;
            }
        }

        txn.commit().await?;

        info!(order_id = %order.id, from = %previous, to = %next, "Order status changed");
        self.publish(Event::OrderStatusChanged {
            order_id: order.id,
            old_status: previous,
            new_status: next,
        })
        .await;
        if next == FulfillmentStatus::Cancelled {
            self.publish(Event::OrderCancelled(order.id)).await;
        }

        self.load(order.id).await
    }

    async fn insert_order<C: ConnectionTrait>(
        &self,
        conn: &C,
        draft: OrderDraft<'_>,
    ) -> Result<OrderModel, ServiceError> {
        let (_, total_amount) = order_totals(draft.lines, draft.quote.final_fee);
        let (user_id, guest_token) = match draft.caller {
            CartOwner::User(id) => (Some(*id), None),
            CartOwner::Guest(token) => (None, Some(token.clone())),
        };
        let address_json = serde_json::to_value(draft.address).map_err(|e| {
            ServiceError::InternalError(format!("Failed to serialize shipping address: {}", e))
        })?;
        let now = Utc::now();

        let order = OrderActiveModel {
            id: Set(Uuid::new_v4()),
            order_number: Set(generate_order_number()),
            user_id: Set(user_id),
            guest_token: Set(guest_token),
            guest_name: Set(draft.contact.as_ref().map(|c| c.name.clone())),
            guest_email: Set(draft.contact.as_ref().map(|c| c.email.clone())),
            guest_phone: Set(draft.contact.as_ref().and_then(|c| c.phone.clone())),
            status: Set(FulfillmentStatus::Pending),
            payment_status: Set(PaymentStatus::Pending),
            payment_method: Set(draft.payment_method),
            total_amount: Set(total_amount),
            currency: Set(self.config.default_currency.clone()),
            shipping_region: Set(draft.quote.region.clone()),
            shipping_address: Set(Some(address_json)),
            shipping_fee: Set(draft.quote.final_fee),
            shipping_fee_before_discount: Set(draft.quote.fee_before_discount),
            shipping_discount_applied: Set(draft.quote.discount_applied),
            shipping_discount_percentage: Set(draft.quote.discount_percentage),
            shipping_discount_amount: Set(draft.quote.discount_amount),
            payment_reference: Set(None),
            transaction_id: Set(None),
            paid_at: Set(None),
            notes: Set(draft.notes),
            created_at: Set(now),
            updated_at: Set(now),
            version: Set(1),
        };
        let order = order
            .insert(conn)
            .await
            .map_err(|e| ServiceError::from_insert_err(e, "Order number"))?;

        for line in draft.lines {
            let item = OrderItemActiveModel {
                id: Set(Uuid::new_v4()),
                order_id: Set(order.id),
                product_id: Set(line.product_id),
                name: Set(line.name.clone()),
                quantity: Set(line.quantity),
                unit_price: Set(line.unit_price),
                line_total: Set(line.unit_price * Decimal::from(line.quantity)),
                image_url: Set(line.image_url.clone()),
                created_at: Set(now),
            };
            item.insert(conn).await?;
        }

        Ok(order)
    }

    async fn view(&self, order: OrderModel) -> Result<OrderView, ServiceError> {
        let items = OrderItemEntity::find()
            .filter(order_item::Column::OrderId.eq(order.id))
            .order_by_asc(order_item::Column::CreatedAt)
            .order_by_asc(order_item::Column::Id)
            .all(&*self.db_pool)
            .await?;
        Ok(OrderView { order, items })
    }

    async fn views(&self, orders: Vec<OrderModel>) -> Result<Vec<OrderView>, ServiceError> {
        if orders.is_empty() {
            return Ok(Vec::new());
        }

        let ids: Vec<Uuid> = orders.iter().map(|o| o.id).collect();
        let mut grouped: HashMap<Uuid, Vec<OrderItemModel>> = HashMap::new();
        let items = OrderItemEntity::find()
            .filter(order_item::Column::OrderId.is_in(ids))
            .order_by_asc(order_item::Column::CreatedAt)
            .order_by_asc(order_item::Column::Id)
            .all(&*self.db_pool)
            .await?;
        for item in items {
            grouped.entry(item.order_id).or_default().push(item);
        }

        Ok(orders
            .into_iter()
            .map(|order| {
                let items = grouped.remove(&order.id).unwrap_or_default();
                OrderView { order, items }
            })
            .collect())
    }

    async fn publish(&self, event: Event) {
        if let Err(e) = self.event_sender.send(event).await {
            error!(error = %e, "Failed to publish event");
        }
    }
}

fn resolve_contact(
    caller: &CartOwner,
    contact: Option<&GuestContact>,
) -> Result<Option<GuestContact>, ServiceError> {
    match caller {
        // account holders are contacted through their profile
        CartOwner::User(_) => Ok(None),
        CartOwner::Guest(_) => match contact {
            Some(contact) => Ok(Some(contact.clone())),
            None => Err(ServiceError::ValidationError(
                "Guest checkout requires contact details".to_string(),
            )),
        },
    }
}
