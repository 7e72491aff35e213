use axum::{
    body::Bytes,
    extract::State,
    http::HeaderMap,
    response::Response,
    routing::post,
    Router,
};
use serde_json::json;

use crate::{errors::ServiceError, handlers::common::ok, AppState};

/// Header carrying the processor's HMAC-SHA512 body signature.
pub const SIGNATURE_HEADER: &str = "x-paystack-signature";

pub fn webhook_routes() -> Router<AppState> {
    Router::new().route("/webhook", post(payment_webhook))
}

/// Processor callback. The body must stay raw bytes: the signature covers the
/// exact payload, so any re-serialization would break verification.
#[utoipa::path(
    post,
    path = "/api/webhook",
    summary = "Payment processor webhook",
    description = "Signature-verified callback. Verified events are acknowledged with 200 even when they cannot be applied, so the processor does not retry forever",
    request_body(content = Vec<u8>, content_type = "application/octet-stream"),
    responses(
        (status = 200, description = "Event acknowledged"),
        (status = 400, description = "Gateway not configured", body = crate::errors::ErrorResponse),
        (status = 401, description = "Missing or invalid signature", body = crate::errors::ErrorResponse),
    )
)]
pub async fn payment_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, ServiceError> {
    let signature = headers
        .get(SIGNATURE_HEADER)
        .and_then(|value| value.to_str().ok());

    state
        .services
        .payments
        .handle_webhook(signature, &body)
        .await?;

    Ok(ok(json!({ "received": true })))
}
