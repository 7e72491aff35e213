use crate::{
    config::AppConfig,
    db::DbPool,
    entities::{
        order::{Model as OrderModel, PaymentStatus},
        payment_event::ActiveModel as PaymentEventActiveModel,
        user::Entity as UserEntity,
    },
    errors::ServiceError,
    services::orders::OrderService,
};
use async_trait::async_trait;
use chrono::Utc;
use hmac::{Hmac, Mac};
use rust_decimal::{prelude::ToPrimitive, Decimal};
use sea_orm::{ActiveModelTrait, EntityTrait, Set};
use serde::{Deserialize, Serialize};
use serde_json::json;
use sha2::Sha512;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;
use utoipa::ToSchema;

type HmacSha512 = Hmac<Sha512>;

const GATEWAY_TIMEOUT: Duration = Duration::from_secs(10);
const WEBHOOK_DEDUP_TTL_SECS: u64 = 24 * 3600;

/// Hosted payment session handed back to the shopper's client.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct PaymentSession {
    pub authorization_url: String,
    pub access_code: Option<String>,
    pub reference: String,
}

/// What the processor reports for a reference on verification.
#[derive(Debug, Clone)]
pub struct VerifiedPayment {
    pub status: String,
    pub reference: String,
    pub amount_minor: Option<i64>,
    pub transaction_id: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct InitPaymentRequest {
    pub order_id: Uuid,
}

/// Outcome of a verify call, order included so the storefront can render the
/// receipt without a second fetch.
#[derive(Debug, Serialize, ToSchema)]
pub struct PaymentVerification {
    pub verified: bool,
    pub status: String,
    pub order: OrderModel,
}

/// Payment processor seam. The production implementation speaks Paystack's
/// HTTP API; tests substitute a mock.
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    async fn initialize_session(
        &self,
        amount_minor: i64,
        email: &str,
        order_number: &str,
    ) -> Result<PaymentSession, ServiceError>;

    async fn verify_reference(&self, reference: &str) -> Result<VerifiedPayment, ServiceError>;
}

#[derive(Debug, Deserialize)]
struct GatewayEnvelope<T> {
    status: bool,
    message: Option<String>,
    data: Option<T>,
}

#[derive(Debug, Deserialize)]
struct SessionData {
    authorization_url: String,
    access_code: Option<String>,
    reference: String,
}

#[derive(Debug, Deserialize)]
struct VerifyData {
    id: Option<serde_json::Value>,
    status: String,
    reference: String,
    amount: Option<i64>,
}

/// The processor sends transaction ids as numbers; keep them as strings on
/// our side.
fn json_id_to_string(id: &serde_json::Value) -> String {
    match id {
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Converts a major-unit amount to the processor's minor unit (kobo, cents).
fn to_minor_units(amount: Decimal) -> Result<i64, ServiceError> {
    (amount * Decimal::from(100)).round().to_i64().ok_or_else(|| {
        ServiceError::InvalidOperation(
            "Order total cannot be represented in minor units".to_string(),
        )
    })
}

/// Paystack-shaped gateway client: bearer-authenticated JSON over HTTP, with
/// the hosted-session and verify endpoints.
#[derive(Clone)]
pub struct PaystackGateway {
    client: reqwest::Client,
    base_url: String,
    secret_key: String,
    callback_url: Option<String>,
}

impl PaystackGateway {
    pub fn new(base_url: String, secret_key: String, callback_url: Option<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url,
            secret_key,
            callback_url,
        }
    }

    /// None without a secret key, which the caller treats as "payments
    /// disabled".
    pub fn from_config(config: &AppConfig) -> Option<Self> {
        let secret_key = config.payment_secret_key.clone()?;
        Some(Self::new(
            config.payment_base_url.clone(),
            secret_key,
            config.payment_callback_url.clone(),
        ))
    }
}

#[async_trait]
impl PaymentGateway for PaystackGateway {
    async fn initialize_session(
        &self,
        amount_minor: i64,
        email: &str,
        order_number: &str,
    ) -> Result<PaymentSession, ServiceError> {
        let mut body = json!({
            "amount": amount_minor,
            "email": email,
            "metadata": { "order_number": order_number },
        });
        if let Some(callback_url) = &self.callback_url {
            body["callback_url"] = json!(callback_url);
        }

        let response = self
            .client
            .post(format!("{}/transaction/initialize", self.base_url))
            .timeout(GATEWAY_TIMEOUT)
            .bearer_auth(&self.secret_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                ServiceError::ExternalService(format!("Payment gateway unreachable: {}", e))
            })?;

        let status = response.status();
        let envelope: GatewayEnvelope<SessionData> = response.json().await.map_err(|e| {
            ServiceError::ExternalService(format!(
                "Payment gateway returned an invalid response: {}",
                e
            ))
        })?;

        if !status.is_success() || !envelope.status {
            return Err(ServiceError::ExternalService(format!(
                "Payment initialization failed: {}",
                envelope.message.unwrap_or_else(|| status.to_string())
            )));
        }
        let data = envelope.data.ok_or_else(|| {
            ServiceError::ExternalService(
                "Payment gateway response missing session data".to_string(),
            )
        })?;

        Ok(PaymentSession {
            authorization_url: data.authorization_url,
            access_code: data.access_code,
            reference: data.reference,
        })
    }

    async fn verify_reference(&self, reference: &str) -> Result<VerifiedPayment, ServiceError> {
        let response = self
            .client
            .get(format!("{}/transaction/verify/{}", self.base_url, reference))
            .timeout(GATEWAY_TIMEOUT)
            .bearer_auth(&self.secret_key)
            .send()
            .await
            .map_err(|e| {
                ServiceError::ExternalService(format!("Payment gateway unreachable: {}", e))
            })?;

        let status = response.status();
        let envelope: GatewayEnvelope<VerifyData> = response.json().await.map_err(|e| {
            ServiceError::ExternalService(format!(
                "Payment gateway returned an invalid response: {}",
                e
            ))
        })?;

        if !status.is_success() || !envelope.status {
            return Err(ServiceError::ExternalService(format!(
                "Payment verification failed: {}",
                envelope.message.unwrap_or_else(|| status.to_string())
            )));
        }
        let data = envelope.data.ok_or_else(|| {
            ServiceError::ExternalService(
                "Payment gateway response missing transaction data".to_string(),
            )
        })?;

        Ok(VerifiedPayment {
            status: data.status,
            reference: data.reference,
            amount_minor: data.amount,
            transaction_id: data.id.as_ref().map(json_id_to_string),
        })
    }
}

/// Inbound webhook event, the fields this service acts on.
#[derive(Debug, Deserialize)]
pub struct WebhookEvent {
    pub event: String,
    #[serde(default)]
    pub data: WebhookData,
}

#[derive(Debug, Default, Deserialize)]
pub struct WebhookData {
    pub id: Option<serde_json::Value>,
    pub reference: Option<String>,
    pub status: Option<String>,
}

/// Processor statuses for a charge the customer has not finished yet.
fn is_in_flight(status: &str) -> bool {
    matches!(status, "pending" | "ongoing" | "processing" | "queued")
}

/// Identity used for webhook deduplication: the processor's event id when
/// present, otherwise event type plus reference.
fn event_identity(event: &WebhookEvent) -> String {
    match &event.data.id {
        Some(id) => json_id_to_string(id),
        None => format!(
            "{}:{}",
            event.event,
            event.data.reference.as_deref().unwrap_or("unknown")
        ),
    }
}

/// HMAC-SHA512 of the raw body with the gateway secret, hex-encoded, matched
/// against the signature header byte for byte.
pub fn verify_signature(secret: &str, payload: &[u8], signature: &str) -> bool {
    let mut mac = match HmacSha512::new_from_slice(secret.as_bytes()) {
        Ok(mac) => mac,
        Err(_) => return false,
    };
    mac.update(payload);
    let expected = hex::encode(mac.finalize().into_bytes());
    constant_time_eq(&expected, signature)
}

fn constant_time_eq(a: &str, b: &str) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut diff = 0u8;
    for (x, y) in a.as_bytes().iter().zip(b.as_bytes()) {
        diff |= x ^ y;
    }
    diff == 0
}

/// Service in front of the payment processor: hosted session initialization,
/// verification, and the signed webhook that settles orders asynchronously.
#[derive(Clone)]
pub struct PaymentService {
    db_pool: Arc<DbPool>,
    config: Arc<AppConfig>,
    redis: Arc<redis::Client>,
    gateway: Option<Arc<dyn PaymentGateway>>,
    order_service: Arc<OrderService>,
}

impl PaymentService {
    pub fn new(
        db_pool: Arc<DbPool>,
        config: Arc<AppConfig>,
        redis: Arc<redis::Client>,
        gateway: Option<Arc<dyn PaymentGateway>>,
        order_service: Arc<OrderService>,
    ) -> Self {
        Self {
            db_pool,
            config,
            redis,
            gateway,
            order_service,
        }
    }

    fn gateway(&self) -> Result<&Arc<dyn PaymentGateway>, ServiceError> {
        self.gateway.as_ref().ok_or_else(|| {
            ServiceError::InvalidOperation("Payment gateway is not configured".to_string())
        })
    }

    /// Opens a hosted payment session for an order. The amount always comes
    /// from the stored order, never from the client, and the reference the
    /// processor hands back is persisted for the verify and webhook paths.
    #[instrument(skip(self))]
    pub async fn init_payment(&self, order_id: Uuid) -> Result<PaymentSession, ServiceError> {
        let gateway = self.gateway()?;

        let order = self.order_service.load(order_id).await?;
        if order.payment_status == PaymentStatus::Paid {
            return Err(ServiceError::InvalidOperation(
                "Order has already been paid".to_string(),
            ));
        }

        let email = self.payer_email(&order).await?;
        let amount_minor = to_minor_units(order.total_amount)?;

        let session = gateway
            .initialize_session(amount_minor, &email, &order.order_number)
            .await?;
        self.order_service
            .set_payment_reference(order.id, &session.reference)
            .await?;

        info!(
            order_id = %order.id,
            reference = %session.reference,
            "Payment session initialized"
        );
        Ok(session)
    }

    /// Asks the processor about a reference and settles the order
    /// accordingly. A non-success processor status is a normal answer here,
    /// not an error.
    #[instrument(skip(self))]
    pub async fn verify_payment(
        &self,
        reference: &str,
    ) -> Result<PaymentVerification, ServiceError> {
        let reference = reference.trim();
        if reference.is_empty() {
            return Err(ServiceError::ValidationError(
                "Payment reference is required".to_string(),
            ));
        }

        let gateway = self.gateway()?;
        let verified = gateway.verify_reference(reference).await?;

        if verified.status == "success" {
            let order = self
                .order_service
                .record_payment_success(reference, verified.transaction_id.as_deref())
                .await?;
            return Ok(PaymentVerification {
                verified: true,
                status: verified.status,
                order,
            });
        }

        // In-flight processor states keep the order pending; only a settled
        // non-success answer marks the payment failed.
        let order = if is_in_flight(&verified.status) {
            self.order_service.find_by_reference(reference).await?
        } else {
            self.order_service.record_payment_failure(reference).await?
        };
        Ok(PaymentVerification {
            verified: false,
            status: verified.status,
            order,
        })
    }

    /// Processes a signed gateway webhook.
    ///
    /// A bad signature is rejected; everything past that point is
    /// acknowledged so the processor does not retry forever. Events are
    /// deduplicated through Redis first (failing open when it is down) and
    /// the `payment_events` unique index as the durable record.
    #[instrument(skip(self, signature, body))]
    pub async fn handle_webhook(
        &self,
        signature: Option<&str>,
        body: &[u8],
    ) -> Result<(), ServiceError> {
        let secret = self.config.payment_secret_key.as_deref().ok_or_else(|| {
            ServiceError::InvalidOperation("Payment gateway is not configured".to_string())
        })?;
        let signature = signature.ok_or_else(|| {
            ServiceError::Unauthorized("Missing webhook signature".to_string())
        })?;
        if !verify_signature(secret, body, signature) {
            warn!("Webhook signature verification failed");
            return Err(ServiceError::Unauthorized(
                "Invalid webhook signature".to_string(),
            ));
        }

        let event: WebhookEvent = match serde_json::from_slice(body) {
            Ok(event) => event,
            Err(e) => {
                warn!(error = %e, "Discarding unparseable webhook payload");
                return Ok(());
            }
        };

        let identity = event_identity(&event);
        if self.already_processed(&identity, &event).await? {
            info!(event_id = %identity, "Webhook event already processed");
            return Ok(());
        }

        match event.event.as_str() {
            "charge.success" => {
                let reference = match event.data.reference.as_deref() {
                    Some(reference) => reference,
                    None => {
                        warn!(event_id = %identity, "charge.success without a reference");
                        return Ok(());
                    }
                };
                let transaction_id = event.data.id.as_ref().map(json_id_to_string);
                match self
                    .order_service
                    .record_payment_success(reference, transaction_id.as_deref())
                    .await
                {
                    Ok(order) => {
                        info!(order_id = %order.id, reference, "Webhook settled payment")
                    }
                    Err(ServiceError::NotFound(_)) => {
                        warn!(reference, "Webhook references an unknown order")
                    }
                    Err(e) => error!(reference, error = %e, "Webhook settlement failed"),
                }
            }
            other => {
                info!(event = other, "Unhandled webhook event type");
            }
        }

        Ok(())
    }

    async fn payer_email(&self, order: &OrderModel) -> Result<String, ServiceError> {
        if let Some(user_id) = order.user_id {
            let user = UserEntity::find_by_id(user_id)
                .one(&*self.db_pool)
                .await?
                .ok_or_else(|| {
                    ServiceError::InvalidOperation(
                        "No email address associated with this order".to_string(),
                    )
                })?;
            return Ok(user.email);
        }
        order.guest_email.clone().ok_or_else(|| {
            ServiceError::InvalidOperation(
                "No email address associated with this order".to_string(),
            )
        })
    }

    /// Two-tier dedup: Redis `SET NX EX` as the fast path, the unique
    /// `payment_events` insert as the record that survives restarts.
    async fn already_processed(
        &self,
        event_id: &str,
        event: &WebhookEvent,
    ) -> Result<bool, ServiceError> {
        let key = format!("wh:{}", event_id);
        match self.redis.get_async_connection().await {
            Ok(mut conn) => {
                let fresh: Result<bool, redis::RedisError> = redis::cmd("SET")
                    .arg(&key)
                    .arg("1")
                    .arg("NX")
                    .arg("EX")
                    .arg(WEBHOOK_DEDUP_TTL_SECS)
                    .query_async(&mut conn)
                    .await;
                match fresh {
                    Ok(true) => {}
                    Ok(false) => return Ok(true),
                    Err(e) => warn!(error = %e, "Redis dedup unavailable, relying on database"),
                }
            }
            Err(e) => warn!(error = %e, "Redis dedup unavailable, relying on database"),
        }

        let row = PaymentEventActiveModel {
            id: Set(Uuid::new_v4()),
            event_id: Set(event_id.to_string()),
            event_type: Set(event.event.clone()),
            payment_reference: Set(event.data.reference.clone()),
            received_at: Set(Utc::now()),
        };
        match row.insert(&*self.db_pool).await {
            Ok(_) => Ok(false),
            Err(e) => match ServiceError::from_insert_err(e, "Webhook event") {
                ServiceError::Conflict(_) => Ok(true),
                other => Err(other),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use serde_json::json;

    fn sign(secret: &str, payload: &[u8]) -> String {
        let mut mac = HmacSha512::new_from_slice(secret.as_bytes()).unwrap();
        mac.update(payload);
        hex::encode(mac.finalize().into_bytes())
    }

    #[test]
    fn signature_round_trip() {
        let secret = "sk_test_abc";
        let body = br#"{"event":"charge.success","data":{"id":1,"reference":"ref_1"}}"#;

        let signature = sign(secret, body);
        assert!(verify_signature(secret, body, &signature));
    }

    #[test]
    fn tampered_body_fails_verification() {
        let secret = "sk_test_abc";
        let body = br#"{"event":"charge.success","data":{"reference":"ref_1"}}"#;
        let signature = sign(secret, body);

        let tampered = br#"{"event":"charge.success","data":{"reference":"ref_2"}}"#;
        assert!(!verify_signature(secret, tampered, &signature));
    }

    #[test]
    fn wrong_secret_fails_verification() {
        let body = b"payload";
        let signature = sign("sk_test_abc", body);
        assert!(!verify_signature("sk_test_other", body, &signature));
    }

    #[test]
    fn truncated_signature_fails_verification() {
        let secret = "sk_test_abc";
        let body = b"payload";
        let mut signature = sign(secret, body);
        signature.truncate(signature.len() - 2);

        assert!(!verify_signature(secret, body, &signature));
    }

    #[test]
    fn constant_time_eq_basics() {
        assert!(constant_time_eq("abc123", "abc123"));
        assert!(!constant_time_eq("abc123", "abc124"));
        assert!(!constant_time_eq("abc", "abcd"));
    }

    #[test]
    fn minor_unit_conversion() {
        assert_eq!(to_minor_units(dec!(3600)).unwrap(), 360_000);
        assert_eq!(to_minor_units(dec!(125.50)).unwrap(), 12_550);
        assert_eq!(to_minor_units(dec!(0.01)).unwrap(), 1);
        assert_eq!(to_minor_units(Decimal::ZERO).unwrap(), 0);
    }

    #[test]
    fn in_flight_statuses_are_not_failures() {
        for status in ["pending", "ongoing", "processing", "queued"] {
            assert!(is_in_flight(status), "{status} should stay pending");
        }
        assert!(!is_in_flight("failed"));
        assert!(!is_in_flight("abandoned"));
        assert!(!is_in_flight("reversed"));
    }

    #[test]
    fn transaction_ids_normalize_to_strings() {
        assert_eq!(json_id_to_string(&json!(4099260516u64)), "4099260516");
        assert_eq!(json_id_to_string(&json!("txn_abc")), "txn_abc");
    }

    #[test]
    fn webhook_event_parses_processor_payload() {
        let event: WebhookEvent = serde_json::from_value(json!({
            "event": "charge.success",
            "data": {
                "id": 4099260516u64,
                "status": "success",
                "reference": "ref_9xk2",
                "amount": 360000
            }
        }))
        .unwrap();

        assert_eq!(event.event, "charge.success");
        assert_eq!(event.data.reference.as_deref(), Some("ref_9xk2"));
        assert_eq!(event_identity(&event), "4099260516");
    }

    #[test]
    fn event_identity_falls_back_to_event_and_reference() {
        let event: WebhookEvent = serde_json::from_value(json!({
            "event": "charge.success",
            "data": { "reference": "ref_9xk2" }
        }))
        .unwrap();
        assert_eq!(event_identity(&event), "charge.success:ref_9xk2");

        let bare: WebhookEvent =
            serde_json::from_value(json!({ "event": "transfer.success" })).unwrap();
        assert_eq!(event_identity(&bare), "transfer.success:unknown");
    }
}
