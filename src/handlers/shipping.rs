use axum::{
    extract::{Path, State},
    response::Response,
    routing::{get, post, put},
    Json, Router,
};
use serde::Deserialize;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::{
    auth::AdminUser,
    entities::shipping_option,
    errors::ServiceError,
    handlers::common::{created, no_content},
    services::shipping::{
        CreateShippingOptionRequest, ShippingQuote, UpdateShippingOptionRequest,
    },
    ApiResponse, ApiResult, AppState,
};

/// Shipping endpoints. The public pair serves storefront fee display and
/// preview; the `/admin` group manages the rule table.
pub fn shipping_routes() -> Router<AppState> {
    Router::new()
        .route("/shipping-prices", get(list_shipping_prices))
        .route("/admin/calculate-shipping", post(calculate_shipping))
        .route(
            "/admin/shipping-options",
            get(list_shipping_options).post(create_shipping_option),
        )
        .route(
            "/admin/shipping-options/:id",
            put(update_shipping_option).delete(delete_shipping_option),
        )
}

fn default_item_count() -> i32 {
    1
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct QuoteShippingRequest {
    pub region: String,
    #[serde(default = "default_item_count")]
    pub item_count: i32,
}

#[utoipa::path(
    get,
    path = "/api/shipping-prices",
    summary = "List active shipping options",
    responses(
        (status = 200, description = "Active options, ordered by region", body = ApiResponse<Vec<shipping_option::Model>>),
        (status = 500, description = "Internal server error", body = crate::errors::ErrorResponse),
    )
)]
pub async fn list_shipping_prices(
    State(state): State<AppState>,
) -> ApiResult<Vec<shipping_option::Model>> {
    let options = state.services.shipping.list_options(false).await?;
    Ok(Json(ApiResponse::success(options)))
}

#[utoipa::path(
    post,
    path = "/api/admin/calculate-shipping",
    summary = "Preview a shipping fee",
    description = "Quotes the fee for a destination region and item count without creating anything",
    request_body = QuoteShippingRequest,
    responses(
        (status = 200, description = "Fee computed", body = ApiResponse<ShippingQuote>),
        (status = 400, description = "Missing region or invalid item count", body = crate::errors::ErrorResponse),
        (status = 404, description = "No active option for the region", body = crate::errors::ErrorResponse),
    )
)]
pub async fn calculate_shipping(
    State(state): State<AppState>,
    Json(request): Json<QuoteShippingRequest>,
) -> ApiResult<ShippingQuote> {
    let quote = state
        .services
        .shipping
        .quote(&request.region, request.item_count)
        .await?;
    Ok(Json(ApiResponse::success(quote)))
}

#[utoipa::path(
    get,
    path = "/api/admin/shipping-options",
    summary = "List all shipping options",
    description = "Includes deactivated options, unlike the public listing",
    responses(
        (status = 200, description = "Options retrieved", body = ApiResponse<Vec<shipping_option::Model>>),
        (status = 401, description = "Unauthenticated", body = crate::errors::ErrorResponse),
        (status = 403, description = "Admin role required", body = crate::errors::ErrorResponse),
    ),
    security(("Bearer" = []))
)]
pub async fn list_shipping_options(
    State(state): State<AppState>,
    _admin: AdminUser,
) -> ApiResult<Vec<shipping_option::Model>> {
    let options = state.services.shipping.list_options(true).await?;
    Ok(Json(ApiResponse::success(options)))
}

#[utoipa::path(
    post,
    path = "/api/admin/shipping-options",
    summary = "Create a shipping option",
    request_body = CreateShippingOptionRequest,
    responses(
        (status = 201, description = "Option created", body = ApiResponse<shipping_option::Model>),
        (status = 400, description = "Validation failed", body = crate::errors::ErrorResponse),
        (status = 403, description = "Admin role required", body = crate::errors::ErrorResponse),
        (status = 409, description = "Duplicate name and region", body = crate::errors::ErrorResponse),
    ),
    security(("Bearer" = []))
)]
pub async fn create_shipping_option(
    State(state): State<AppState>,
    _admin: AdminUser,
    Json(request): Json<CreateShippingOptionRequest>,
) -> Result<Response, ServiceError> {
    let option = state.services.shipping.create_option(request).await?;
    Ok(created(option))
}

#[utoipa::path(
    put,
    path = "/api/admin/shipping-options/{id}",
    summary = "Update a shipping option",
    description = "Partial update; setting is_active to false is the soft delete",
    params(("id" = Uuid, Path, description = "Shipping option id")),
    request_body = UpdateShippingOptionRequest,
    responses(
        (status = 200, description = "Option updated", body = ApiResponse<shipping_option::Model>),
        (status = 400, description = "Validation failed", body = crate::errors::ErrorResponse),
        (status = 403, description = "Admin role required", body = crate::errors::ErrorResponse),
        (status = 404, description = "Option not found", body = crate::errors::ErrorResponse),
        (status = 409, description = "Duplicate name and region", body = crate::errors::ErrorResponse),
    ),
    security(("Bearer" = []))
)]
pub async fn update_shipping_option(
    State(state): State<AppState>,
    _admin: AdminUser,
    Path(id): Path<Uuid>,
    Json(request): Json<UpdateShippingOptionRequest>,
) -> ApiResult<shipping_option::Model> {
    let option = state.services.shipping.update_option(id, request).await?;
    Ok(Json(ApiResponse::success(option)))
}

#[utoipa::path(
    delete,
    path = "/api/admin/shipping-options/{id}",
    summary = "Deactivate a shipping option",
    description = "Soft delete; the row stays so order traces keep a valid referent",
    params(("id" = Uuid, Path, description = "Shipping option id")),
    responses(
        (status = 204, description = "Option deactivated"),
        (status = 403, description = "Admin role required", body = crate::errors::ErrorResponse),
        (status = 404, description = "Option not found", body = crate::errors::ErrorResponse),
    ),
    security(("Bearer" = []))
)]
pub async fn delete_shipping_option(
    State(state): State<AppState>,
    _admin: AdminUser,
    Path(id): Path<Uuid>,
) -> Result<Response, ServiceError> {
    state.services.shipping.delete_option(id).await?;
    Ok(no_content())
}
