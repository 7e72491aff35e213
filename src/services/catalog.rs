use crate::{
    config::AppConfig,
    db::DbPool,
    entities::product::{
        self, ActiveModel as ProductActiveModel, Entity as ProductEntity, Model as ProductModel,
    },
    errors::ServiceError,
    services::validators::validate_decimal_min_zero,
};
use chrono::Utc;
use once_cell::sync::Lazy;
use regex::Regex;
use rust_decimal::Decimal;
use sea_orm::{
    sea_query::{Expr, Func},
    ActiveModelTrait, ColumnTrait, Condition, ConnectionTrait, EntityTrait, PaginatorTrait,
    QueryFilter, QueryOrder, QuerySelect, Set,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;
use utoipa::{IntoParams, ToSchema};
use validator::Validate;

static SLUG_SEPARATOR: Lazy<Regex> = Lazy::new(|| Regex::new(r"[^a-z0-9]+").unwrap());

/// Lowercases a display name and collapses every non-alphanumeric run into a
/// single hyphen. `"Classic White Tee"` becomes `"classic-white-tee"`.
pub fn slugify(name: &str) -> String {
    let lower = name.to_lowercase();
    SLUG_SEPARATOR
        .replace_all(&lower, "-")
        .trim_matches('-')
        .to_string()
}

/// Availability and stock gate used by every path that reserves units.
pub fn ensure_stock(product: &ProductModel, requested: i32) -> Result<(), ServiceError> {
    if !product.is_available {
        return Err(ServiceError::InvalidOperation(
            "Product is not available".to_string(),
        ));
    }
    if product.stock_quantity < requested {
        return Err(ServiceError::InsufficientStock(format!(
            "Only {} items available in stock",
            product.stock_quantity
        )));
    }
    Ok(())
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Serialize, Deserialize, Validate, ToSchema)]
pub struct CreateProductRequest {
    #[validate(length(min = 3, max = 100, message = "Product name must be 3 to 100 characters"))]
    pub name: String,
    #[validate(length(min = 1, max = 64, message = "SKU is required"))]
    pub sku: String,
    #[validate(length(max = 1000, message = "Description cannot exceed 1000 characters"))]
    pub description: Option<String>,
    #[serde(default)]
    #[validate(custom = "validate_decimal_min_zero")]
    pub price: Decimal,
    #[serde(default)]
    #[validate(range(min = 0, message = "Stock quantity cannot be negative"))]
    pub stock_quantity: i32,
    #[serde(default = "default_true")]
    pub is_available: bool,
    #[validate(length(max = 50, message = "Category cannot exceed 50 characters"))]
    pub category: Option<String>,
    #[validate(url(message = "Image URL must be a valid URL"))]
    pub image_url: Option<String>,
    #[serde(default)]
    pub gallery: Vec<String>,
    #[serde(default)]
    pub sizes: Vec<String>,
    #[serde(default)]
    pub colors: Vec<String>,
}

#[derive(Debug, Default, Serialize, Deserialize, Validate, ToSchema)]
pub struct UpdateProductRequest {
    #[validate(length(min = 3, max = 100, message = "Product name must be 3 to 100 characters"))]
    pub name: Option<String>,
    #[validate(length(min = 1, max = 64, message = "SKU cannot be empty"))]
    pub sku: Option<String>,
    #[validate(length(max = 1000, message = "Description cannot exceed 1000 characters"))]
    pub description: Option<String>,
    #[validate(custom = "validate_decimal_min_zero")]
    pub price: Option<Decimal>,
    #[validate(range(min = 0, message = "Stock quantity cannot be negative"))]
    pub stock_quantity: Option<i32>,
    pub is_available: Option<bool>,
    #[validate(length(max = 50, message = "Category cannot exceed 50 characters"))]
    pub category: Option<String>,
    #[validate(url(message = "Image URL must be a valid URL"))]
    pub image_url: Option<String>,
    pub gallery: Option<Vec<String>>,
    pub sizes: Option<Vec<String>>,
    pub colors: Option<Vec<String>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum ProductSort {
    #[default]
    Newest,
    PriceAsc,
    PriceDesc,
    Name,
}

#[derive(Debug, Clone, Default, Deserialize, IntoParams)]
pub struct ProductListQuery {
    pub category: Option<String>,
    pub search: Option<String>,
    pub min_price: Option<Decimal>,
    pub max_price: Option<Decimal>,
    pub available: Option<bool>,
    pub sort: Option<ProductSort>,
    pub page: Option<u64>,
    pub per_page: Option<u64>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct ProductPage {
    pub items: Vec<ProductModel>,
    pub total: u64,
    pub page: u64,
    pub per_page: u64,
    pub total_pages: u64,
}

pub(crate) fn page_window(
    page: Option<u64>,
    per_page: Option<u64>,
    default_size: u64,
    max_size: u64,
) -> (u64, u64) {
    let max_size = max_size.max(1);
    let per_page = per_page.unwrap_or(default_size).clamp(1, max_size);
    let page = page.unwrap_or(1).max(1);
    (page, per_page)
}

/// Service for the sellable catalog. Stock moves only through the conditional
/// update helpers at the bottom so concurrent checkouts can never oversell.
#[derive(Clone)]
pub struct ProductService {
    db_pool: Arc<DbPool>,
    config: Arc<AppConfig>,
}

impl ProductService {
    pub fn new(db_pool: Arc<DbPool>, config: Arc<AppConfig>) -> Self {
        Self { db_pool, config }
    }

    /// Paginated listing with category, search, price range and availability
    /// filters. Sort defaults to newest first; a trailing id ordering keeps
    /// pages stable when the primary sort key ties.
    #[instrument(skip(self))]
    pub async fn list_products(&self, query: ProductListQuery) -> Result<ProductPage, ServiceError> {
        let db = &*self.db_pool;
        let mut find = ProductEntity::find();

        if let Some(category) = query
            .category
            .as_deref()
            .map(str::trim)
            .filter(|c| !c.is_empty())
        {
            find = find.filter(
                Expr::expr(Func::lower(Expr::col(product::Column::Category)))
                    .like(format!("%{}%", category.to_lowercase())),
            );
        }

        if let Some(term) = query
            .search
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
        {
            let pattern = format!("%{}%", term.to_lowercase());
            find = find.filter(
                Condition::any()
                    .add(
                        Expr::expr(Func::lower(Expr::col(product::Column::Name)))
                            .like(pattern.clone()),
                    )
                    .add(
                        Expr::expr(Func::lower(Expr::col(product::Column::Description)))
                            .like(pattern),
                    ),
            );
        }

        if let Some(min) = query.min_price {
            find = find.filter(product::Column::Price.gte(min));
        }
        if let Some(max) = query.max_price {
            find = find.filter(product::Column::Price.lte(max));
        }
        if let Some(available) = query.available {
            find = find.filter(product::Column::IsAvailable.eq(available));
        }

        let total = find.clone().count(db).await.map_err(|e| {
            error!(error = %e, "Failed to count products");
            ServiceError::DatabaseError(e)
        })?;

        find = match query.sort.unwrap_or_default() {
            ProductSort::Newest => find.order_by_desc(product::Column::CreatedAt),
            ProductSort::PriceAsc => find.order_by_asc(product::Column::Price),
            ProductSort::PriceDesc => find.order_by_desc(product::Column::Price),
            ProductSort::Name => find.order_by_asc(product::Column::Name),
        };
        find = find.order_by_asc(product::Column::Id);

        let (page, per_page) = page_window(
            query.page,
            query.per_page,
            self.config.api_default_page_size as u64,
            self.config.api_max_page_size as u64,
        );

        let items = find
            .limit(per_page)
            .offset((page - 1) * per_page)
            .all(db)
            .await
            .map_err(|e| {
                error!(error = %e, "Failed to list products");
                ServiceError::DatabaseError(e)
            })?;

        let total_pages = if total == 0 {
            0
        } else {
            (total + per_page - 1) / per_page
        };

        Ok(ProductPage {
            items,
            total,
            page,
            per_page,
            total_pages,
        })
    }

    #[instrument(skip(self))]
    pub async fn get_product(&self, id: Uuid) -> Result<ProductModel, ServiceError> {
        let db = &*self.db_pool;

        ProductEntity::find_by_id(id)
            .one(db)
            .await
            .map_err(|e| {
                error!(error = %e, product_id = %id, "Failed to fetch product");
                ServiceError::DatabaseError(e)
            })?
            .ok_or_else(|| ServiceError::NotFound("Product not found".to_string()))
    }

    #[instrument(skip(self))]
    pub async fn get_product_by_slug(&self, slug: &str) -> Result<ProductModel, ServiceError> {
        let db = &*self.db_pool;

        ProductEntity::find()
            .filter(product::Column::Slug.eq(slug.trim().to_lowercase()))
            .one(db)
            .await
            .map_err(|e| {
                error!(error = %e, slug, "Failed to fetch product by slug");
                ServiceError::DatabaseError(e)
            })?
            .ok_or_else(|| ServiceError::NotFound("Product not found".to_string()))
    }

    /// Creates a product. The slug is derived from the name; a clash on slug
    /// or SKU surfaces as a conflict rather than silently renaming.
    #[instrument(skip(self, request), fields(name = %request.name, sku = %request.sku))]
    pub async fn create_product(
        &self,
        request: CreateProductRequest,
    ) -> Result<ProductModel, ServiceError> {
        request
            .validate()
            .map_err(|e| ServiceError::ValidationError(e.to_string()))?;

        let name = request.name.trim().to_string();
        let slug = slugify(&name);
        if slug.is_empty() {
            return Err(ServiceError::ValidationError(
                "Product name must contain at least one letter or digit".to_string(),
            ));
        }

        let db = &*self.db_pool;
        let now = Utc::now();

        let model = ProductActiveModel {
            id: Set(Uuid::new_v4()),
            name: Set(name),
            slug: Set(slug),
            sku: Set(request.sku.trim().to_string()),
            description: Set(request
                .description
                .map(|d| d.trim().to_string())
                .filter(|d| !d.is_empty())),
            price: Set(request.price),
            stock_quantity: Set(request.stock_quantity),
            is_available: Set(request.is_available),
            category: Set(request
                .category
                .map(|c| c.trim().to_string())
                .filter(|c| !c.is_empty())),
            image_url: Set(request.image_url),
            gallery: Set(Some(json!(request.gallery))),
            sizes: Set(Some(json!(request.sizes))),
            colors: Set(Some(json!(request.colors))),
            created_at: Set(now),
            updated_at: Set(now),
        };

        let product = model
            .insert(db)
            .await
            .map_err(|e| ServiceError::from_insert_err(e, "A product with this slug or SKU"))?;

        info!(product_id = %product.id, slug = %product.slug, "Product created");
        Ok(product)
    }

    /// Applies a partial update. A new name re-derives the slug, exactly as
    /// on create.
    #[instrument(skip(self, request), fields(product_id = %id))]
    pub async fn update_product(
        &self,
        id: Uuid,
        request: UpdateProductRequest,
    ) -> Result<ProductModel, ServiceError> {
        request
            .validate()
            .map_err(|e| ServiceError::ValidationError(e.to_string()))?;

        let existing = self.get_product(id).await?;
        let mut active: ProductActiveModel = existing.into();

        if let Some(name) = request.name {
            let name = name.trim().to_string();
            let slug = slugify(&name);
            if slug.is_empty() {
                return Err(ServiceError::ValidationError(
                    "Product name must contain at least one letter or digit".to_string(),
                ));
            }
            active.name = Set(name);
            active.slug = Set(slug);
        }
        if let Some(sku) = request.sku {
            active.sku = Set(sku.trim().to_string());
        }
        if let Some(description) = request.description {
            active.description = Set(Some(description.trim().to_string()).filter(|d| !d.is_empty()));
        }
        if let Some(price) = request.price {
            active.price = Set(price);
        }
        if let Some(stock) = request.stock_quantity {
            active.stock_quantity = Set(stock);
        }
        if let Some(available) = request.is_available {
            active.is_available = Set(available);
        }
        if let Some(category) = request.category {
            active.category = Set(Some(category.trim().to_string()).filter(|c| !c.is_empty()));
        }
        if let Some(image_url) = request.image_url {
            active.image_url = Set(Some(image_url));
        }
        if let Some(gallery) = request.gallery {
            active.gallery = Set(Some(json!(gallery)));
        }
        if let Some(sizes) = request.sizes {
            active.sizes = Set(Some(json!(sizes)));
        }
        if let Some(colors) = request.colors {
            active.colors = Set(Some(json!(colors)));
        }
        active.updated_at = Set(Utc::now());

        let db = &*self.db_pool;
        let product = active
            .update(db)
            .await
            .map_err(|e| ServiceError::from_insert_err(e, "A product with this slug or SKU"))?;

        info!(product_id = %product.id, "Product updated");
        Ok(product)
    }

    /// Hard delete. Carts and orders keep only the product id plus their own
    /// snapshots, so nothing dangles in a way that breaks reads.
    #[instrument(skip(self), fields(product_id = %id))]
    pub async fn delete_product(&self, id: Uuid) -> Result<(), ServiceError> {
        let db = &*self.db_pool;

        let result = ProductEntity::delete_by_id(id).exec(db).await.map_err(|e| {
            error!(error = %e, product_id = %id, "Failed to delete product");
            ServiceError::DatabaseError(e)
        })?;

        if result.rows_affected == 0 {
            return Err(ServiceError::NotFound("Product not found".to_string()));
        }

        info!(product_id = %id, "Product deleted");
        Ok(())
    }

    /// Atomically takes `quantity` units off the shelf. Returns false when
    /// the guard (`stock_quantity >= quantity`) matched no row, i.e. the
    /// product vanished or someone else got the stock first.
    pub async fn decrement_stock<C: ConnectionTrait>(
        &self,
        conn: &C,
        product_id: Uuid,
        quantity: i32,
    ) -> Result<bool, ServiceError> {
        let result = ProductEntity::update_many()
            .col_expr(
                product::Column::StockQuantity,
                Expr::col(product::Column::StockQuantity).sub(quantity),
            )
            .col_expr(product::Column::UpdatedAt, Expr::value(Utc::now()))
            .filter(product::Column::Id.eq(product_id))
            .filter(product::Column::StockQuantity.gte(quantity))
            .exec(conn)
            .await
            .map_err(|e| {
                error!(error = %e, product_id = %product_id, "Failed to decrement stock");
                ServiceError::DatabaseError(e)
            })?;

        Ok(result.rows_affected > 0)
    }

    /// Returns units to the shelf after a cancellation. A product deleted in
    /// the meantime is logged and skipped so the cancellation still lands.
    pub async fn restock<C: ConnectionTrait>(
        &self,
        conn: &C,
        product_id: Uuid,
        quantity: i32,
    ) -> Result<(), ServiceError> {
        let result = ProductEntity::update_many()
            .col_expr(
                product::Column::StockQuantity,
                Expr::col(product::Column::StockQuantity).add(quantity),
            )
            .col_expr(product::Column::UpdatedAt, Expr::value(Utc::now()))
            .filter(product::Column::Id.eq(product_id))
            .exec(conn)
            .await
            .map_err(|e| {
                error!(error = %e, product_id = %product_id, "Failed to restock product");
                ServiceError::DatabaseError(e)
            })?;

        if result.rows_affected == 0 {
            warn!(product_id = %product_id, quantity, "Restock target no longer exists");
        }
        Ok(())
    }
}
