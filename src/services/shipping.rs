use crate::{
    db::DbPool,
    entities::shipping_option::{
        self, ActiveModel as ShippingOptionActiveModel, Entity as ShippingOptionEntity,
        Model as ShippingOptionModel,
    },
    errors::ServiceError,
    services::validators::{validate_decimal_min_zero, validate_percentage},
};
use chrono::Utc;
use rust_decimal::Decimal;
use sea_orm::{
    sea_query::{Expr, Func},
    ActiveModelTrait, ColumnTrait, EntityTrait, QueryFilter, QueryOrder, Set,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{error, info, instrument};
use uuid::Uuid;
use utoipa::ToSchema;
use validator::Validate;

#[derive(Debug, Serialize, Deserialize, Validate, ToSchema)]
pub struct CreateShippingOptionRequest {
    #[validate(length(min = 1, message = "Name is required"))]
    pub name: String,
    #[validate(length(min = 1, message = "Region is required"))]
    pub region: String,
    #[validate(custom = "validate_decimal_min_zero")]
    pub base_price: Decimal,
    #[serde(default)]
    #[validate(custom = "validate_decimal_min_zero")]
    pub price_per_item: Decimal,
    #[serde(default = "default_max_items_for_base")]
    #[validate(range(min = 1, message = "max_items_for_base must be at least 1"))]
    pub max_items_for_base: i32,
    #[serde(default)]
    #[validate(custom = "validate_percentage")]
    pub discount_percentage: Decimal,
    #[serde(default)]
    pub discount_active: bool,
    #[serde(default = "default_true")]
    pub is_active: bool,
}

fn default_max_items_for_base() -> i32 {
    1
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Default, Serialize, Deserialize, Validate, ToSchema)]
pub struct UpdateShippingOptionRequest {
    #[validate(length(min = 1, message = "Name cannot be empty"))]
    pub name: Option<String>,
    #[validate(length(min = 1, message = "Region cannot be empty"))]
    pub region: Option<String>,
    #[validate(custom = "validate_decimal_min_zero")]
    pub base_price: Option<Decimal>,
    #[validate(custom = "validate_decimal_min_zero")]
    pub price_per_item: Option<Decimal>,
    #[validate(range(min = 1, message = "max_items_for_base must be at least 1"))]
    pub max_items_for_base: Option<i32>,
    #[validate(custom = "validate_percentage")]
    pub discount_percentage: Option<Decimal>,
    pub discount_active: Option<bool>,
    pub is_active: Option<bool>,
}

/// Full breakdown of how a shipping fee was computed. Frozen onto orders at
/// checkout so later rule edits never change what a shopper was charged.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ShippingQuote {
    pub option_id: Uuid,
    pub option_name: String,
    pub region: String,
    pub item_count: i32,
    pub base_price: Decimal,
    pub price_per_item: Decimal,
    pub max_items_for_base: i32,
    pub extra_items: i32,
    pub fee_before_discount: Decimal,
    pub discount_applied: bool,
    pub discount_percentage: Decimal,
    pub discount_amount: Decimal,
    pub final_fee: Decimal,
}

impl ShippingQuote {
    /// Applies the fee rule: the base price covers up to `max_items_for_base`
    /// items, every item past that adds `price_per_item`, then the discount
    /// (when active) comes off the whole amount.
    pub fn compute(option: &ShippingOptionModel, item_count: i32) -> Self {
        let extra_items = (item_count - option.max_items_for_base).max(0);
        let fee_before_discount =
            option.base_price + option.price_per_item * Decimal::from(extra_items);

        let discount_applied =
            option.discount_active && option.discount_percentage > Decimal::ZERO;
        let discount_amount = if discount_applied {
            (fee_before_discount * option.discount_percentage / Decimal::from(100)).round_dp(2)
        } else {
            Decimal::ZERO
        };
        let final_fee = (fee_before_discount - discount_amount).round_dp(2);

        Self {
            option_id: option.id,
            option_name: option.name.clone(),
            region: option.region.clone(),
            item_count,
            base_price: option.base_price,
            price_per_item: option.price_per_item,
            max_items_for_base: option.max_items_for_base,
            extra_items,
            fee_before_discount,
            discount_applied,
            discount_percentage: option.discount_percentage,
            discount_amount,
            final_fee,
        }
    }
}

/// Picks the winning rule when several active options cover one region:
/// cheapest computed fee, then the most recently created, then the smallest
/// id. Same inputs, same winner, every time.
fn pick_cheapest(options: &[ShippingOptionModel], item_count: i32) -> Option<ShippingQuote> {
    options
        .iter()
        .map(|option| (option, ShippingQuote::compute(option, item_count)))
        .min_by(|(a, qa), (b, qb)| {
            qa.final_fee
                .cmp(&qb.final_fee)
                .then_with(|| b.created_at.cmp(&a.created_at))
                .then_with(|| a.id.cmp(&b.id))
        })
        .map(|(_, quote)| quote)
}

/// Service for shipping fee rules and quote computation
#[derive(Clone)]
pub struct ShippingService {
    db_pool: Arc<DbPool>,
}

impl ShippingService {
    pub fn new(db_pool: Arc<DbPool>) -> Self {
        Self { db_pool }
    }

    /// Lists shipping options, active only unless `include_inactive`.
    #[instrument(skip(self))]
    pub async fn list_options(
        &self,
        include_inactive: bool,
    ) -> Result<Vec<ShippingOptionModel>, ServiceError> {
        let db = &*self.db_pool;

        let mut query = ShippingOptionEntity::find().order_by_asc(shipping_option::Column::Region);
        if !include_inactive {
            query = query.filter(shipping_option::Column::IsActive.eq(true));
        }

        query.all(db).await.map_err(|e| {
            error!(error = %e, "Failed to list shipping options");
            ServiceError::DatabaseError(e)
        })
    }

    #[instrument(skip(self))]
    pub async fn get_option(&self, id: Uuid) -> Result<ShippingOptionModel, ServiceError> {
        let db = &*self.db_pool;

        ShippingOptionEntity::find_by_id(id)
            .one(db)
            .await
            .map_err(|e| {
                error!(error = %e, option_id = %id, "Failed to fetch shipping option");
                ServiceError::DatabaseError(e)
            })?
            .ok_or_else(|| ServiceError::NotFound(format!("Shipping option {} not found", id)))
    }

    /// Creates a shipping option; duplicate (name, region) pairs are rejected.
    #[instrument(skip(self, request), fields(name = %request.name, region = %request.region))]
    pub async fn create_option(
        &self,
        request: CreateShippingOptionRequest,
    ) -> Result<ShippingOptionModel, ServiceError> {
        request
            .validate()
            .map_err(|e| ServiceError::ValidationError(e.to_string()))?;

        let db = &*self.db_pool;
        let now = Utc::now();

        let option = ShippingOptionActiveModel {
            id: Set(Uuid::new_v4()),
            name: Set(request.name.trim().to_string()),
            region: Set(request.region.trim().to_string()),
            base_price: Set(request.base_price),
            price_per_item: Set(request.price_per_item),
            max_items_for_base: Set(request.max_items_for_base),
            discount_percentage: Set(request.discount_percentage),
            discount_active: Set(request.discount_active),
            is_active: Set(request.is_active),
            created_at: Set(now),
            updated_at: Set(now),
        };

        let model = option
            .insert(db)
            .await
            .map_err(|e| ServiceError::from_insert_err(e, "Shipping option for this region"))?;

        info!(option_id = %model.id, region = %model.region, "Shipping option created");
        Ok(model)
    }

    #[instrument(skip(self, request), fields(option_id = %id))]
    pub async fn update_option(
        &self,
        id: Uuid,
        request: UpdateShippingOptionRequest,
    ) -> Result<ShippingOptionModel, ServiceError> {
        request
            .validate()
            .map_err(|e| ServiceError::ValidationError(e.to_string()))?;

        let existing = self.get_option(id).await?;
        let mut active: ShippingOptionActiveModel = existing.into();

        if let Some(name) = request.name {
            active.name = Set(name.trim().to_string());
        }
        if let Some(region) = request.region {
            active.region = Set(region.trim().to_string());
        }
        if let Some(base_price) = request.base_price {
            active.base_price = Set(base_price);
        }
        if let Some(price_per_item) = request.price_per_item {
            active.price_per_item = Set(price_per_item);
        }
        if let Some(max_items) = request.max_items_for_base {
            active.max_items_for_base = Set(max_items);
        }
        if let Some(pct) = request.discount_percentage {
            active.discount_percentage = Set(pct);
        }
        if let Some(discount_active) = request.discount_active {
            active.discount_active = Set(discount_active);
        }
        if let Some(is_active) = request.is_active {
            active.is_active = Set(is_active);
        }
        active.updated_at = Set(Utc::now());

        let db = &*self.db_pool;
        let model = active
            .update(db)
            .await
            .map_err(|e| ServiceError::from_insert_err(e, "Shipping option for this region"))?;

        info!(option_id = %model.id, "Shipping option updated");
        Ok(model)
    }

    /// Soft-deletes an option so existing order traces keep a valid referent.
    #[instrument(skip(self), fields(option_id = %id))]
    pub async fn delete_option(&self, id: Uuid) -> Result<(), ServiceError> {
        let existing = self.get_option(id).await?;
        let mut active: ShippingOptionActiveModel = existing.into();
        active.is_active = Set(false);
        active.updated_at = Set(Utc::now());

        let db = &*self.db_pool;
        active.update(db).await.map_err(|e| {
            error!(error = %e, option_id = %id, "Failed to deactivate shipping option");
            ServiceError::DatabaseError(e)
        })?;

        info!(option_id = %id, "Shipping option deactivated");
        Ok(())
    }

    /// Quotes the shipping fee for a region and item count.
    ///
    /// Region matching is case-insensitive. With several active rules for
    /// the region, the deterministic tie-break in `pick_cheapest` applies.
    #[instrument(skip(self))]
    pub async fn quote(&self, region: &str, item_count: i32) -> Result<ShippingQuote, ServiceError> {
        let region = region.trim();
        if region.is_empty() {
            return Err(ServiceError::ValidationError(
                "Shipping region is required".to_string(),
            ));
        }
        if item_count < 1 {
            return Err(ServiceError::ValidationError(
                "Item count must be at least 1".to_string(),
            ));
        }

        let db = &*self.db_pool;
        let candidates = ShippingOptionEntity::find()
            .filter(shipping_option::Column::IsActive.eq(true))
            .filter(
                Expr::expr(Func::lower(Expr::col(shipping_option::Column::Region)))
                    .eq(region.to_lowercase()),
            )
            .all(db)
            .await
            .map_err(|e| {
                error!(error = %e, region = %region, "Failed to query shipping options");
                ServiceError::DatabaseError(e)
            })?;

        pick_cheapest(&candidates, item_count).ok_or_else(|| {
            ServiceError::NotFound(format!(
                "No active shipping option configured for region '{}'",
                region
            ))
        })
    }
}
