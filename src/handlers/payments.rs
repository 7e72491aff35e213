use axum::{
    extract::State,
    routing::post,
    Json, Router,
};
use serde::Deserialize;
use utoipa::ToSchema;

use crate::{
    services::payments::{InitPaymentRequest, PaymentSession, PaymentVerification},
    ApiResponse, ApiResult, AppState,
};

/// Payment endpoints. Deliberately unauthenticated: opening a session needs
/// only the order id, and the charged amount is taken from the stored order,
/// never from the caller.
pub fn payment_routes() -> Router<AppState> {
    Router::new()
        .route("/create-payment", post(create_payment))
        .route("/verify-payment", post(verify_payment))
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct VerifyPaymentRequest {
    pub reference: String,
}

#[utoipa::path(
    post,
    path = "/api/create-payment",
    summary = "Initialize a payment session",
    description = "Opens a hosted payment page for an order and persists the processor's reference",
    request_body = InitPaymentRequest,
    responses(
        (status = 200, description = "Session opened", body = ApiResponse<PaymentSession>),
        (status = 400, description = "Order already paid or gateway not configured", body = crate::errors::ErrorResponse),
        (status = 404, description = "Order not found", body = crate::errors::ErrorResponse),
        (status = 500, description = "Payment gateway unreachable", body = crate::errors::ErrorResponse),
    )
)]
pub async fn create_payment(
    State(state): State<AppState>,
    Json(request): Json<InitPaymentRequest>,
) -> ApiResult<PaymentSession> {
    let session = state
        .services
        .payments
        .init_payment(request.order_id)
        .await?;
    Ok(Json(ApiResponse::success(session)))
}

#[utoipa::path(
    post,
    path = "/api/verify-payment",
    summary = "Verify a payment",
    description = "Asks the processor for the transaction's final status and settles the order accordingly",
    request_body = VerifyPaymentRequest,
    responses(
        (status = 200, description = "Verification result with the updated order", body = ApiResponse<PaymentVerification>),
        (status = 400, description = "Missing reference or gateway not configured", body = crate::errors::ErrorResponse),
        (status = 404, description = "No order for the payment reference", body = crate::errors::ErrorResponse),
        (status = 500, description = "Payment gateway unreachable", body = crate::errors::ErrorResponse),
    )
)]
pub async fn verify_payment(
    State(state): State<AppState>,
    Json(request): Json<VerifyPaymentRequest>,
) -> ApiResult<PaymentVerification> {
    let verification = state
        .services
        .payments
        .verify_payment(&request.reference)
        .await?;
    Ok(Json(ApiResponse::success(verification)))
}
