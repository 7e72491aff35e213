use axum::{
    extract::{Path, Query, State},
    http::HeaderMap,
    response::Response,
    routing::{get, post, put},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::{
    auth::{
        clear_guest_cookie, guest_cookie, parse_cookies, AdminUser, AuthUser, GuestToken,
        MaybeIdentity, GUEST_COOKIE,
    },
    entities::order::FulfillmentStatus,
    errors::ServiceError,
    handlers::common::{created, with_cookie},
    services::{
        carts::CartOwner,
        orders::{DirectOrderRequest, OrderListQuery, OrderPage, OrderView, OrderViewer},
    },
    ApiResponse, ApiResult, AppState,
};

/// Order endpoints: direct placement, history, back-office listing and the
/// lifecycle transitions.
pub fn order_routes() -> Router<AppState> {
    Router::new()
        .route("/", post(create_order).get(list_my_orders))
        .route("/guest", post(create_guest_order))
        .route("/all", get(list_all_orders))
        .route("/attach-guest", post(attach_guest_orders))
        .route("/:id", get(get_order))
        .route("/:id/status", put(update_order_status))
        .route("/:id/cancel", post(cancel_order))
}

fn viewer_for(user: &AuthUser) -> OrderViewer {
    if user.is_admin() {
        OrderViewer::Admin
    } else {
        OrderViewer::User(user.id)
    }
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct UpdateOrderStatusRequest {
    pub status: FulfillmentStatus,
}

#[derive(Debug, Default, Deserialize, ToSchema)]
pub struct AttachGuestOrdersRequest {
    pub guest_token: Option<String>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct AttachGuestOrdersResponse {
    pub attached: u64,
}

#[utoipa::path(
    post,
    path = "/api/orders",
    summary = "Place a direct order",
    description = "Creates an order from an explicit item list with best-effort stock decrements",
    request_body = DirectOrderRequest,
    responses(
        (status = 201, description = "Order created", body = ApiResponse<OrderView>),
        (status = 400, description = "Validation failed or insufficient stock", body = crate::errors::ErrorResponse),
        (status = 401, description = "Unauthenticated", body = crate::errors::ErrorResponse),
        (status = 404, description = "Product not found", body = crate::errors::ErrorResponse),
    ),
    security(("Bearer" = []))
)]
pub async fn create_order(
    State(state): State<AppState>,
    user: AuthUser,
    Json(request): Json<DirectOrderRequest>,
) -> Result<Response, ServiceError> {
    let owner = CartOwner::User(user.id);
    let order = state
        .services
        .orders
        .place_direct_order(&owner, request)
        .await?;
    Ok(created(order))
}

#[utoipa::path(
    post,
    path = "/api/orders/guest",
    summary = "Place a guest order",
    description = "Direct order placement for callers without an account. A caller with no guest token gets one minted and set as a cookie",
    request_body = DirectOrderRequest,
    responses(
        (status = 201, description = "Order created", body = ApiResponse<OrderView>),
        (status = 400, description = "Validation failed, missing contact details or insufficient stock", body = crate::errors::ErrorResponse),
        (status = 404, description = "Product not found", body = crate::errors::ErrorResponse),
    )
)]
pub async fn create_guest_order(
    State(state): State<AppState>,
    identity: MaybeIdentity,
    Json(request): Json<DirectOrderRequest>,
) -> Result<Response, ServiceError> {
    let orders = &state.services.orders;
    match identity.0 {
        Some(identity) => {
            let owner = CartOwner::from_identity(&identity);
            let order = orders.place_direct_order(&owner, request).await?;
            Ok(created(order))
        }
        None => {
            let token = GuestToken::mint();
            let owner = CartOwner::Guest(token.as_str().to_string());
            let order = orders.place_direct_order(&owner, request).await?;
            let cookie = guest_cookie(&token, state.config.cookie_secure);
            Ok(with_cookie(created(order), &cookie))
        }
    }
}

#[utoipa::path(
    get,
    path = "/api/orders",
    summary = "List the caller's orders",
    responses(
        (status = 200, description = "Orders retrieved, newest first", body = ApiResponse<Vec<OrderView>>),
        (status = 401, description = "Unauthenticated", body = crate::errors::ErrorResponse),
    ),
    security(("Bearer" = []))
)]
pub async fn list_my_orders(
    State(state): State<AppState>,
    user: AuthUser,
) -> ApiResult<Vec<OrderView>> {
    let orders = state.services.orders.list_for_user(user.id).await?;
    Ok(Json(ApiResponse::success(orders)))
}

#[utoipa::path(
    get,
    path = "/api/orders/all",
    summary = "List all orders",
    description = "Back-office listing with fulfillment and payment status filters",
    params(OrderListQuery),
    responses(
        (status = 200, description = "Orders retrieved", body = ApiResponse<OrderPage>),
        (status = 401, description = "Unauthenticated", body = crate::errors::ErrorResponse),
        (status = 403, description = "Admin role required", body = crate::errors::ErrorResponse),
    ),
    security(("Bearer" = []))
)]
pub async fn list_all_orders(
    State(state): State<AppState>,
    _admin: AdminUser,
    Query(query): Query<OrderListQuery>,
) -> ApiResult<OrderPage> {
    let page = state.services.orders.list_all(query).await?;
    Ok(Json(ApiResponse::success(page)))
}

#[utoipa::path(
    get,
    path = "/api/orders/{id}",
    summary = "Get a single order",
    description = "Owners see their own orders; admins see any order",
    params(("id" = Uuid, Path, description = "Order id")),
    responses(
        (status = 200, description = "Order retrieved", body = ApiResponse<OrderView>),
        (status = 401, description = "Unauthenticated", body = crate::errors::ErrorResponse),
        (status = 404, description = "Order not found", body = crate::errors::ErrorResponse),
    ),
    security(("Bearer" = []))
)]
pub async fn get_order(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<Uuid>,
) -> ApiResult<OrderView> {
    let viewer = viewer_for(&user);
    let order = state.services.orders.get_order(id, &viewer).await?;
    Ok(Json(ApiResponse::success(order)))
}

#[utoipa::path(
    put,
    path = "/api/orders/{id}/status",
    summary = "Update an order's fulfillment status",
    description = "Applies one edge of the transition graph. Repeating the current status is a no-op",
    params(("id" = Uuid, Path, description = "Order id")),
    request_body = UpdateOrderStatusRequest,
    responses(
        (status = 200, description = "Status updated", body = ApiResponse<OrderView>),
        (status = 400, description = "Transition not allowed", body = crate::errors::ErrorResponse),
        (status = 403, description = "Admin role required", body = crate::errors::ErrorResponse),
        (status = 404, description = "Order not found", body = crate::errors::ErrorResponse),
        (status = 409, description = "Order modified concurrently", body = crate::errors::ErrorResponse),
    ),
    security(("Bearer" = []))
)]
pub async fn update_order_status(
    State(state): State<AppState>,
    _admin: AdminUser,
    Path(id): Path<Uuid>,
    Json(request): Json<UpdateOrderStatusRequest>,
) -> ApiResult<OrderView> {
    let order = state
        .services
        .orders
        .update_status(id, request.status)
        .await?;
    Ok(Json(ApiResponse::success(order)))
}

#[utoipa::path(
    post,
    path = "/api/orders/{id}/cancel",
    summary = "Cancel an order",
    description = "Allowed while the order is pending or processing. Admins can cancel any such order, owners only their own",
    params(("id" = Uuid, Path, description = "Order id")),
    responses(
        (status = 200, description = "Order cancelled", body = ApiResponse<OrderView>),
        (status = 400, description = "Order can no longer be cancelled", body = crate::errors::ErrorResponse),
        (status = 401, description = "Unauthenticated", body = crate::errors::ErrorResponse),
        (status = 404, description = "Order not found", body = crate::errors::ErrorResponse),
    ),
    security(("Bearer" = []))
)]
pub async fn cancel_order(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<Uuid>,
) -> ApiResult<OrderView> {
    let viewer = viewer_for(&user);
    let order = state.services.orders.cancel_order(id, &viewer).await?;
    Ok(Json(ApiResponse::success(order)))
}

#[utoipa::path(
    post,
    path = "/api/orders/attach-guest",
    summary = "Claim guest orders",
    description = "Re-keys orders placed under the caller's former guest token onto their account. The token comes from the request body or the guest cookie",
    request_body = AttachGuestOrdersRequest,
    responses(
        (status = 200, description = "Matching orders attached", body = ApiResponse<AttachGuestOrdersResponse>),
        (status = 400, description = "No guest token provided", body = crate::errors::ErrorResponse),
        (status = 401, description = "Unauthenticated", body = crate::errors::ErrorResponse),
    ),
    security(("Bearer" = []))
)]
pub async fn attach_guest_orders(
    State(state): State<AppState>,
    user: AuthUser,
    headers: HeaderMap,
    Json(request): Json<AttachGuestOrdersRequest>,
) -> Result<Response, ServiceError> {
    let token = request
        .guest_token
        .as_deref()
        .and_then(GuestToken::parse)
        .or_else(|| {
            parse_cookies(&headers)
                .get(GUEST_COOKIE)
                .and_then(|raw| GuestToken::parse(raw))
        })
        .ok_or_else(|| ServiceError::ValidationError("Guest token is required".to_string()))?;

    let attached = state
        .services
        .orders
        .attach_guest_orders(user.id, token.as_str())
        .await?;

    let response = crate::handlers::common::ok(AttachGuestOrdersResponse { attached });
    Ok(with_cookie(
        response,
        &clear_guest_cookie(state.config.cookie_secure),
    ))
}
