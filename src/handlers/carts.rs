use axum::{
    extract::{Path, State},
    response::Response,
    routing::{delete, get, post, put},
    Json, Router,
};
use uuid::Uuid;

use crate::{
    auth::{guest_cookie, AuthUser, GuestToken, MaybeIdentity},
    errors::ServiceError,
    handlers::common::{created, ok, with_cookie},
    services::{
        carts::{AddItemRequest, CartOwner, CartView, UpdateItemRequest},
        orders::{CheckoutRequest, OrderView},
    },
    ApiResponse, ApiResult, AppState,
};

/// Cart endpoints. Everything except checkout serves guests and signed-in
/// users alike; checkout is the strict, authenticated path.
pub fn cart_routes() -> Router<AppState> {
    Router::new()
        .route("/", get(get_cart).delete(clear_cart))
        .route("/add", post(add_to_cart))
        .route("/item/:item_id", put(update_cart_item))
        .route("/item/:item_id", delete(remove_cart_item))
        .route("/checkout", post(checkout))
}

fn cart_owner(identity: &MaybeIdentity) -> Option<CartOwner> {
    identity.0.as_ref().map(CartOwner::from_identity)
}

#[utoipa::path(
    get,
    path = "/api/cart",
    summary = "Fetch the caller's cart",
    description = "Resolves the cart by user id or guest token. Callers without any identity get the empty cart shape",
    responses(
        (status = 200, description = "Cart retrieved", body = ApiResponse<CartView>),
        (status = 500, description = "Internal server error", body = crate::errors::ErrorResponse),
    )
)]
pub async fn get_cart(
    State(state): State<AppState>,
    identity: MaybeIdentity,
) -> ApiResult<CartView> {
    let owner = cart_owner(&identity);
    let cart = state.services.carts.get_cart(owner.as_ref()).await?;
    Ok(Json(ApiResponse::success(cart)))
}

#[utoipa::path(
    post,
    path = "/api/cart/add",
    summary = "Add an item to the cart",
    description = "Adds or merges a line. A caller with no identity gets a guest token minted and set as a cookie",
    request_body = AddItemRequest,
    responses(
        (status = 200, description = "Item added", body = ApiResponse<CartView>),
        (status = 400, description = "Validation failed or insufficient stock", body = crate::errors::ErrorResponse),
        (status = 404, description = "Product not found", body = crate::errors::ErrorResponse),
    )
)]
pub async fn add_to_cart(
    State(state): State<AppState>,
    identity: MaybeIdentity,
    Json(request): Json<AddItemRequest>,
) -> Result<Response, ServiceError> {
    match cart_owner(&identity) {
        Some(owner) => {
            let cart = state.services.carts.add_item(&owner, request).await?;
            Ok(ok(cart))
        }
        None => {
            let token = GuestToken::mint();
            let owner = CartOwner::Guest(token.as_str().to_string());
            let cart = state.services.carts.add_item(&owner, request).await?;
            let cookie = guest_cookie(&token, state.config.cookie_secure);
            Ok(with_cookie(ok(cart), &cookie))
        }
    }
}

#[utoipa::path(
    put,
    path = "/api/cart/item/{item_id}",
    summary = "Update a cart line's quantity",
    params(("item_id" = Uuid, Path, description = "Cart item id")),
    request_body = UpdateItemRequest,
    responses(
        (status = 200, description = "Quantity updated", body = ApiResponse<CartView>),
        (status = 400, description = "Validation failed or insufficient stock", body = crate::errors::ErrorResponse),
        (status = 404, description = "Cart or item not found", body = crate::errors::ErrorResponse),
    )
)]
pub async fn update_cart_item(
    State(state): State<AppState>,
    identity: MaybeIdentity,
    Path(item_id): Path<Uuid>,
    Json(request): Json<UpdateItemRequest>,
) -> ApiResult<CartView> {
    let owner = cart_owner(&identity)
        .ok_or_else(|| ServiceError::NotFound("Cart not found".to_string()))?;
    let cart = state
        .services
        .carts
        .update_item(&owner, item_id, request)
        .await?;
    Ok(Json(ApiResponse::success(cart)))
}

#[utoipa::path(
    delete,
    path = "/api/cart/item/{item_id}",
    summary = "Remove a cart line",
    description = "Removing a line that is already gone is a quiet success",
    params(("item_id" = Uuid, Path, description = "Cart item id")),
    responses(
        (status = 200, description = "Line removed", body = ApiResponse<CartView>),
    )
)]
pub async fn remove_cart_item(
    State(state): State<AppState>,
    identity: MaybeIdentity,
    Path(item_id): Path<Uuid>,
) -> ApiResult<CartView> {
    let cart = match cart_owner(&identity) {
        Some(owner) => state.services.carts.remove_item(&owner, item_id).await?,
        None => CartView::empty(),
    };
    Ok(Json(ApiResponse::success(cart)))
}

#[utoipa::path(
    delete,
    path = "/api/cart",
    summary = "Clear the cart",
    responses(
        (status = 200, description = "Cart cleared", body = ApiResponse<CartView>),
    )
)]
pub async fn clear_cart(
    State(state): State<AppState>,
    identity: MaybeIdentity,
) -> ApiResult<CartView> {
    let cart = match cart_owner(&identity) {
        Some(owner) => state.services.carts.clear_cart(&owner).await?,
        None => CartView::empty(),
    };
    Ok(Json(ApiResponse::success(cart)))
}

#[utoipa::path(
    post,
    path = "/api/cart/checkout",
    summary = "Checkout the cart",
    description = "Turns the authenticated caller's cart into an order. Stock is re-verified and decremented, the order inserted and the cart emptied in one transaction",
    request_body = CheckoutRequest,
    responses(
        (status = 201, description = "Order created", body = ApiResponse<OrderView>),
        (status = 400, description = "Empty cart, validation failure or insufficient stock", body = crate::errors::ErrorResponse),
        (status = 401, description = "Unauthenticated", body = crate::errors::ErrorResponse),
    ),
    security(("Bearer" = []))
)]
pub async fn checkout(
    State(state): State<AppState>,
    user: AuthUser,
    Json(request): Json<CheckoutRequest>,
) -> Result<Response, ServiceError> {
    let owner = CartOwner::User(user.id);
    let order = state.services.orders.checkout_cart(&owner, request).await?;
    Ok(created(order))
}
