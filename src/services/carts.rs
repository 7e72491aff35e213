use crate::{
    auth::Identity,
    db::DbPool,
    entities::{
        cart::{self, ActiveModel as CartActiveModel, Entity as CartEntity, Model as CartModel},
        cart_item::{
            self, ActiveModel as CartItemActiveModel, Entity as CartItemEntity,
            Model as CartItemModel,
        },
        product::{self, Entity as ProductEntity, Model as ProductModel},
    },
    errors::ServiceError,
    services::catalog::ensure_stock,
};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, EntityTrait, QueryFilter, QueryOrder, Set,
    TransactionTrait,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{info, instrument};
use uuid::Uuid;
use utoipa::ToSchema;
use validator::Validate;

/// Hard ceiling on a single line's quantity, shared with direct orders.
pub const MAX_LINE_QUANTITY: i32 = 1000;

/// Which key a cart hangs off. Exactly one of the two cart columns is set.
#[derive(Debug, Clone)]
pub enum CartOwner {
    User(Uuid),
    Guest(String),
}

impl CartOwner {
    pub fn from_identity(identity: &Identity) -> Self {
        match identity {
            Identity::User(user) => CartOwner::User(user.id),
            Identity::Guest(token) => CartOwner::Guest(token.as_str().to_string()),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Validate, ToSchema)]
pub struct AddItemRequest {
    pub product_id: Uuid,
    #[validate(range(min = 1, max = 1000, message = "Quantity must be between 1 and 1000"))]
    pub quantity: i32,
}

#[derive(Debug, Serialize, Deserialize, Validate, ToSchema)]
pub struct UpdateItemRequest {
    #[validate(range(min = 1, max = 1000, message = "Quantity must be between 1 and 1000"))]
    pub quantity: i32,
}

/// Trimmed product fields attached to each cart line for display.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct ProductSummary {
    pub name: String,
    pub slug: String,
    pub price: Decimal,
    pub category: Option<String>,
    pub image_url: Option<String>,
    pub is_available: bool,
}

impl From<&ProductModel> for ProductSummary {
    fn from(product: &ProductModel) -> Self {
        Self {
            name: product.name.clone(),
            slug: product.slug.clone(),
            price: product.price,
            category: product.category.clone(),
            image_url: product.image_url.clone(),
            is_available: product.is_available,
        }
    }
}

#[derive(Debug, Serialize, ToSchema)]
pub struct CartLineView {
    pub id: Uuid,
    pub product_id: Uuid,
    pub quantity: i32,
    pub price_snapshot: Decimal,
    pub added_at: DateTime<Utc>,
    /// None when the product was deleted after the line was added.
    pub product: Option<ProductSummary>,
}

/// What the API returns for a cart. A caller without any cart gets the empty
/// shape rather than a 404.
#[derive(Debug, Serialize, ToSchema)]
pub struct CartView {
    pub id: Option<Uuid>,
    pub items: Vec<CartLineView>,
    pub total_price: Decimal,
    pub total_items: i32,
}

impl CartView {
    pub fn empty() -> Self {
        Self {
            id: None,
            items: Vec::new(),
            total_price: Decimal::ZERO,
            total_items: 0,
        }
    }
}

fn merged_quantity(a: i32, b: i32) -> i32 {
    (a + b).min(MAX_LINE_QUANTITY)
}

fn compute_totals(items: &[CartItemModel]) -> (Decimal, i32) {
    let total_price = items
        .iter()
        .map(|item| item.price_snapshot * Decimal::from(item.quantity))
        .sum();
    let total_items = items.iter().map(|item| item.quantity).sum();
    (total_price, total_items)
}

/// Service for cart state. Every mutation recomputes the cart's derived
/// totals inside the same transaction, so a stored cart row is never out of
/// step with its lines.
#[derive(Clone)]
pub struct CartService {
    db_pool: Arc<DbPool>,
}

impl CartService {
    pub fn new(db_pool: Arc<DbPool>) -> Self {
        Self { db_pool }
    }

    /// Fetches the caller's cart. No identity or no cart both yield the
    /// empty view.
    #[instrument(skip(self))]
    pub async fn get_cart(&self, owner: Option<&CartOwner>) -> Result<CartView, ServiceError> {
        let owner = match owner {
            Some(owner) => owner,
            None => return Ok(CartView::empty()),
        };

        let db = &*self.db_pool;
        match self.find_cart(db, owner).await? {
            Some(cart) => self.view(cart).await,
            None => Ok(CartView::empty()),
        }
    }

    /// Adds a product to the cart, merging quantities when the product is
    /// already a line. The combined quantity is re-checked against live stock
    /// and the per-line ceiling.
    #[instrument(skip(self, request), fields(product_id = %request.product_id, quantity = request.quantity))]
    pub async fn add_item(
        &self,
        owner: &CartOwner,
        request: AddItemRequest,
    ) -> Result<CartView, ServiceError> {
        request.validate()?;

        let txn = self.db_pool.begin().await?;

        let product = ProductEntity::find_by_id(request.product_id)
            .one(&txn)
            .await?
            .ok_or_else(|| ServiceError::NotFound("Product not found".to_string()))?;
        ensure_stock(&product, request.quantity)?;

        let cart = self.get_or_create_cart(&txn, owner).await?;

        let existing = CartItemEntity::find()
            .filter(cart_item::Column::CartId.eq(cart.id))
            .filter(cart_item::Column::ProductId.eq(request.product_id))
            .one(&txn)
            .await?;

        match existing {
            Some(item) => {
                let combined = item.quantity + request.quantity;
                if combined > product.stock_quantity {
                    return Err(ServiceError::InsufficientStock(format!(
                        "Only {} items available in stock",
                        product.stock_quantity
                    )));
                }
                if combined > MAX_LINE_QUANTITY {
                    return Err(ServiceError::ValidationError(
                        "Quantity cannot exceed 1000".to_string(),
                    ));
                }

                let mut active: CartItemActiveModel = item.into();
                active.quantity = Set(combined);
                active.updated_at = Set(Utc::now());
                active.update(&txn).await?;
            }
            None => {
                let now = Utc::now();
                let line = CartItemActiveModel {
                    id: Set(Uuid::new_v4()),
                    cart_id: Set(cart.id),
                    product_id: Set(request.product_id),
                    quantity: Set(request.quantity),
                    price_snapshot: Set(product.price),
                    added_at: Set(now),
                    updated_at: Set(now),
                };
                line.insert(&txn)
                    .await
                    .map_err(|e| ServiceError::from_insert_err(e, "Cart line for this product"))?;
            }
        }

        self.recompute_totals(&txn, cart.id).await?;
        txn.commit().await?;

        info!(cart_id = %cart.id, product_id = %request.product_id, "Item added to cart");
        self.view_by_id(cart.id).await
    }

    /// Sets a line's quantity, re-validated against live stock when the
    /// product still exists.
    #[instrument(skip(self, request), fields(item_id = %item_id, quantity = request.quantity))]
    pub async fn update_item(
        &self,
        owner: &CartOwner,
        item_id: Uuid,
        request: UpdateItemRequest,
    ) -> Result<CartView, ServiceError> {
        request.validate()?;

        let txn = self.db_pool.begin().await?;

        let cart = self
            .find_cart(&txn, owner)
            .await?
            .ok_or_else(|| ServiceError::NotFound("Cart not found".to_string()))?;

        let item = CartItemEntity::find_by_id(item_id)
            .filter(cart_item::Column::CartId.eq(cart.id))
            .one(&txn)
            .await?
            .ok_or_else(|| ServiceError::NotFound("Item not found in cart".to_string()))?;

        if let Some(product) = ProductEntity::find_by_id(item.product_id).one(&txn).await? {
            if product.stock_quantity < request.quantity {
                return Err(ServiceError::InsufficientStock(format!(
                    "Only {} items available in stock",
                    product.stock_quantity
                )));
            }
        }

        let mut active: CartItemActiveModel = item.into();
        active.quantity = Set(request.quantity);
        active.updated_at = Set(Utc::now());
        active.update(&txn).await?;

        self.recompute_totals(&txn, cart.id).await?;
        txn.commit().await?;

        info!(cart_id = %cart.id, item_id = %item_id, "Cart item updated");
        self.view_by_id(cart.id).await
    }

    /// Removes a line. Removing something already gone is a quiet success.
    #[instrument(skip(self), fields(item_id = %item_id))]
    pub async fn remove_item(
        &self,
        owner: &CartOwner,
        item_id: Uuid,
    ) -> Result<CartView, ServiceError> {
        let txn = self.db_pool.begin().await?;

        let cart = match self.find_cart(&txn, owner).await? {
            Some(cart) => cart,
            None => return Ok(CartView::empty()),
        };

        CartItemEntity::delete_many()
            .filter(cart_item::Column::Id.eq(item_id))
            .filter(cart_item::Column::CartId.eq(cart.id))
            .exec(&txn)
            .await?;

        self.recompute_totals(&txn, cart.id).await?;
        txn.commit().await?;

        info!(cart_id = %cart.id, item_id = %item_id, "Cart item removed");
        self.view_by_id(cart.id).await
    }

    /// Empties the cart but keeps the row, so the owner key stays claimed.
    #[instrument(skip(self))]
    pub async fn clear_cart(&self, owner: &CartOwner) -> Result<CartView, ServiceError> {
        let txn = self.db_pool.begin().await?;

        let cart = match self.find_cart(&txn, owner).await? {
            Some(cart) => cart,
            None => return Ok(CartView::empty()),
        };

        self.empty_cart(&txn, cart.id).await?;
        txn.commit().await?;

        info!(cart_id = %cart.id, "Cart cleared");
        self.view_by_id(cart.id).await
    }

    /// Folds a guest cart into the user's cart after login or signup.
    ///
    /// With no user cart yet the guest cart is simply re-keyed to the user.
    /// Otherwise quantities merge per product, capped at the line ceiling,
    /// keeping the user's original price snapshot on collisions, and the
    /// guest cart is deleted. An empty guest cart is left untouched.
    #[instrument(skip(self, guest_token), fields(user_id = %user_id))]
    pub async fn merge_guest_cart(
        &self,
        guest_token: &str,
        user_id: Uuid,
    ) -> Result<(), ServiceError> {
        let txn = self.db_pool.begin().await?;

        let guest_cart = match CartEntity::find()
            .filter(cart::Column::GuestToken.eq(guest_token))
            .one(&txn)
            .await?
        {
            Some(cart) => cart,
            None => return Ok(()),
        };

        let guest_items = CartItemEntity::find()
            .filter(cart_item::Column::CartId.eq(guest_cart.id))
            .order_by_asc(cart_item::Column::AddedAt)
            .all(&txn)
            .await?;

        if guest_items.is_empty() {
            return Ok(());
        }

        let user_cart = CartEntity::find()
            .filter(cart::Column::UserId.eq(user_id))
            .one(&txn)
            .await?;

        match user_cart {
            None => {
                let guest_cart_id = guest_cart.id;
                let mut active: CartActiveModel = guest_cart.into();
                active.user_id = Set(Some(user_id));
                active.guest_token = Set(None);
                active.updated_at = Set(Utc::now());
                active.update(&txn).await?;

                txn.commit().await?;
                info!(cart_id = %guest_cart_id, "Guest cart adopted by user");
            }
            Some(user_cart) => {
                let user_items = CartItemEntity::find()
                    .filter(cart_item::Column::CartId.eq(user_cart.id))
                    .all(&txn)
                    .await?;
                let mut by_product: HashMap<Uuid, CartItemModel> = user_items
                    .into_iter()
                    .map(|item| (item.product_id, item))
                    .collect();

                for guest_item in guest_items {
                    match by_product.remove(&guest_item.product_id) {
                        Some(user_item) => {
                            let combined =
                                merged_quantity(user_item.quantity, guest_item.quantity);
                            let mut active: CartItemActiveModel = user_item.into();
                            active.quantity = Set(combined);
                            active.updated_at = Set(Utc::now());
                            active.update(&txn).await?;

                            CartItemEntity::delete_by_id(guest_item.id).exec(&txn).await?;
                        }
                        None => {
                            let mut active: CartItemActiveModel = guest_item.into();
                            active.cart_id = Set(user_cart.id);
                            active.updated_at = Set(Utc::now());
                            active.update(&txn).await?;
                        }
                    }
                }

                CartEntity::delete_by_id(guest_cart.id).exec(&txn).await?;
                self.recompute_totals(&txn, user_cart.id).await?;

                txn.commit().await?;
                info!(cart_id = %user_cart.id, "Guest cart merged into user cart");
            }
        }

        Ok(())
    }

    /// Cart plus lines for the given owner, on whatever connection the
    /// caller is running. Checkout uses this inside its own transaction.
    pub async fn find_cart_with_items<C: ConnectionTrait>(
        &self,
        conn: &C,
        owner: &CartOwner,
    ) -> Result<Option<(CartModel, Vec<CartItemModel>)>, ServiceError> {
        let cart = match self.find_cart(conn, owner).await? {
            Some(cart) => cart,
            None => return Ok(None),
        };

        let items = CartItemEntity::find()
            .filter(cart_item::Column::CartId.eq(cart.id))
            .order_by_asc(cart_item::Column::AddedAt)
            .all(conn)
            .await?;

        Ok(Some((cart, items)))
    }

    /// Deletes every line and zeroes the derived totals.
    pub async fn empty_cart<C: ConnectionTrait>(
        &self,
        conn: &C,
        cart_id: Uuid,
    ) -> Result<(), ServiceError> {
        CartItemEntity::delete_many()
            .filter(cart_item::Column::CartId.eq(cart_id))
            .exec(conn)
            .await?;

        let mut cart: CartActiveModel = CartEntity::find_by_id(cart_id)
            .one(conn)
            .await?
            .ok_or_else(|| ServiceError::NotFound("Cart not found".to_string()))?
            .into();
        cart.total_price = Set(Decimal::ZERO);
        cart.total_items = Set(0);
        cart.updated_at = Set(Utc::now());
        cart.update(conn).await?;

        Ok(())
    }

    async fn find_cart<C: ConnectionTrait>(
        &self,
        conn: &C,
        owner: &CartOwner,
    ) -> Result<Option<CartModel>, ServiceError> {
        let query = match owner {
            CartOwner::User(user_id) => {
                CartEntity::find().filter(cart::Column::UserId.eq(*user_id))
            }
            CartOwner::Guest(token) => {
                CartEntity::find().filter(cart::Column::GuestToken.eq(token.as_str()))
            }
        };

        Ok(query.one(conn).await?)
    }

    async fn get_or_create_cart<C: ConnectionTrait>(
        &self,
        conn: &C,
        owner: &CartOwner,
    ) -> Result<CartModel, ServiceError> {
        if let Some(cart) = self.find_cart(conn, owner).await? {
            return Ok(cart);
        }

        let (user_id, guest_token) = match owner {
            CartOwner::User(id) => (Some(*id), None),
            CartOwner::Guest(token) => (None, Some(token.clone())),
        };

        let now = Utc::now();
        let cart = CartActiveModel {
            id: Set(Uuid::new_v4()),
            user_id: Set(user_id),
            guest_token: Set(guest_token),
            total_price: Set(Decimal::ZERO),
            total_items: Set(0),
            created_at: Set(now),
            updated_at: Set(now),
        };

        cart.insert(conn)
            .await
            .map_err(|e| ServiceError::from_insert_err(e, "Cart"))
    }

    async fn recompute_totals<C: ConnectionTrait>(
        &self,
        conn: &C,
        cart_id: Uuid,
    ) -> Result<CartModel, ServiceError> {
        let items = CartItemEntity::find()
            .filter(cart_item::Column::CartId.eq(cart_id))
            .all(conn)
            .await?;

        let (total_price, total_items) = compute_totals(&items);

        let mut cart: CartActiveModel = CartEntity::find_by_id(cart_id)
            .one(conn)
            .await?
            .ok_or_else(|| ServiceError::NotFound("Cart not found".to_string()))?
            .into();
        cart.total_price = Set(total_price);
        cart.total_items = Set(total_items);
        cart.updated_at = Set(Utc::now());

        Ok(cart.update(conn).await?)
    }

    async fn view_by_id(&self, cart_id: Uuid) -> Result<CartView, ServiceError> {
        let db = &*self.db_pool;
        let cart = CartEntity::find_by_id(cart_id)
            .one(db)
            .await?
            .ok_or_else(|| ServiceError::NotFound("Cart not found".to_string()))?;
        self.view(cart).await
    }

    async fn view(&self, cart: CartModel) -> Result<CartView, ServiceError> {
        let db = &*self.db_pool;

        let items = CartItemEntity::find()
            .filter(cart_item::Column::CartId.eq(cart.id))
            .order_by_asc(cart_item::Column::AddedAt)
            .all(db)
            .await?;

        let product_ids: Vec<Uuid> = items.iter().map(|item| item.product_id).collect();
        let products = if product_ids.is_empty() {
            Vec::new()
        } else {
            ProductEntity::find()
                .filter(product::Column::Id.is_in(product_ids))
                .all(db)
                .await?
        };
        let by_id: HashMap<Uuid, ProductModel> =
            products.into_iter().map(|p| (p.id, p)).collect();

        let lines = items
            .into_iter()
            .map(|item| CartLineView {
                id: item.id,
                product_id: item.product_id,
                quantity: item.quantity,
                price_snapshot: item.price_snapshot,
                added_at: item.added_at,
                product: by_id.get(&item.product_id).map(ProductSummary::from),
            })
            .collect();

        Ok(CartView {
            id: Some(cart.id),
            items: lines,
            total_price: cart.total_price,
            total_items: cart.total_items,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::{AuthUser, GuestToken, Role};
    use rust_decimal_macros::dec;

    fn line(quantity: i32, price: Decimal) -> CartItemModel {
        CartItemModel {
            id: Uuid::new_v4(),
            cart_id: Uuid::new_v4(),
            product_id: Uuid::new_v4(),
            quantity,
            price_snapshot: price,
            added_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn add_request_bounds() {
        let ok = AddItemRequest {
            product_id: Uuid::new_v4(),
            quantity: 1,
        };
        assert!(ok.validate().is_ok());

        let max = AddItemRequest {
            product_id: Uuid::new_v4(),
            quantity: 1000,
        };
        assert!(max.validate().is_ok());

        let zero = AddItemRequest {
            product_id: Uuid::new_v4(),
            quantity: 0,
        };
        assert!(zero.validate().is_err());

        let over = AddItemRequest {
            product_id: Uuid::new_v4(),
            quantity: 1001,
        };
        assert!(over.validate().is_err());
    }

    #[test]
    fn merged_quantity_caps_at_ceiling() {
        assert_eq!(merged_quantity(2, 3), 5);
        assert_eq!(merged_quantity(900, 400), MAX_LINE_QUANTITY);
        assert_eq!(merged_quantity(1000, 1), MAX_LINE_QUANTITY);
    }

    #[test]
    fn totals_of_empty_cart_are_zero() {
        let (price, count) = compute_totals(&[]);
        assert_eq!(price, Decimal::ZERO);
        assert_eq!(count, 0);
    }

    #[test]
    fn totals_sum_lines() {
        let items = vec![line(2, dec!(4500)), line(3, dec!(1200.50))];
        let (price, count) = compute_totals(&items);
        assert_eq!(price, dec!(12601.50));
        assert_eq!(count, 5);
    }

    #[test]
    fn owner_from_user_identity() {
        let user = AuthUser {
            id: Uuid::new_v4(),
            email: "shopper@example.com".into(),
            role: Role::User,
        };
        let owner = CartOwner::from_identity(&Identity::User(user.clone()));
        match owner {
            CartOwner::User(id) => assert_eq!(id, user.id),
            CartOwner::Guest(_) => panic!("expected user owner"),
        }
    }

    #[test]
    fn owner_from_guest_identity() {
        let token = GuestToken::mint();
        let owner = CartOwner::from_identity(&Identity::Guest(token.clone()));
        match owner {
            CartOwner::Guest(value) => assert_eq!(value, token.as_str()),
            CartOwner::User(_) => panic!("expected guest owner"),
        }
    }

    #[test]
    fn empty_view_shape() {
        let view = CartView::empty();
        assert!(view.id.is_none());
        assert!(view.items.is_empty());
        assert_eq!(view.total_price, Decimal::ZERO);
        assert_eq!(view.total_items, 0);
    }
}
