use crate::{
    config::AppConfig,
    db::DbPool,
    entities::{
        order::{Entity as OrderEntity, FulfillmentStatus, Model as OrderModel},
        order_item::{self, Entity as OrderItemEntity, Model as OrderItemModel},
        user::Entity as UserEntity,
    },
    errors::ServiceError,
};
use async_trait::async_trait;
use sea_orm::{ColumnTrait, EntityTrait, QueryFilter};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, instrument, warn};
use uuid::Uuid;

const SEND_TIMEOUT: Duration = Duration::from_secs(10);

/// Outbound transactional mail. The production implementation talks to
/// Brevo's SMTP API; tests substitute a mock.
#[async_trait]
pub trait EmailSender: Send + Sync {
    async fn send(&self, to: &str, subject: &str, html_body: &str) -> Result<(), ServiceError>;
}

/// Brevo-shaped HTTP sender: API key header, JSON body with sender, to,
/// subject and htmlContent.
#[derive(Clone)]
pub struct HttpEmailSender {
    client: reqwest::Client,
    api_url: String,
    api_key: String,
    from_name: String,
    from_address: String,
}

impl HttpEmailSender {
    pub fn new(api_url: String, api_key: String, from_name: String, from_address: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_url,
            api_key,
            from_name,
            from_address,
        }
    }

    /// None when email is disabled or no API key is configured, which the
    /// caller treats as "run without mail".
    pub fn from_config(config: &AppConfig) -> Option<Self> {
        if !config.email_enabled {
            return None;
        }
        let api_key = config.email_api_key.clone()?;
        Some(Self::new(
            config.email_api_url.clone(),
            api_key,
            config.email_from_name.clone(),
            config.email_from_address.clone(),
        ))
    }
}

#[async_trait]
impl EmailSender for HttpEmailSender {
    async fn send(&self, to: &str, subject: &str, html_body: &str) -> Result<(), ServiceError> {
        let payload = json!({
            "sender": { "name": self.from_name, "email": self.from_address },
            "to": [{ "email": to }],
            "subject": subject,
            "htmlContent": html_body,
        });

        let response = self
            .client
            .post(&self.api_url)
            .timeout(SEND_TIMEOUT)
            .header("api-key", &self.api_key)
            .header(reqwest::header::ACCEPT, "application/json")
            .json(&payload)
            .send()
            .await
            .map_err(|e| {
                ServiceError::ExternalService(format!("Email provider unreachable: {}", e))
            })?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(ServiceError::ExternalService(format!(
                "Email provider returned {}: {}",
                status, body
            )));
        }

        Ok(())
    }
}

struct StatusCopy {
    title: &'static str,
    message: &'static str,
}

/// Shoppers only hear about the three states that mean movement. Pending,
/// cancellation and refunds stay silent.
fn status_copy(status: FulfillmentStatus) -> Option<StatusCopy> {
    match status {
        FulfillmentStatus::Processing => Some(StatusCopy {
            title: "Order Processing Started",
            message: "We have started processing your order. Our team is preparing your items for shipment.",
        }),
        FulfillmentStatus::Shipped => Some(StatusCopy {
            title: "Order Shipped",
            message: "Your order has been shipped and is on its way to you.",
        }),
        FulfillmentStatus::Delivered => Some(StatusCopy {
            title: "Order Delivered",
            message: "Your order has been successfully delivered. Thank you for shopping with us!",
        }),
        FulfillmentStatus::Pending
        | FulfillmentStatus::Cancelled
        | FulfillmentStatus::Refunded => None,
    }
}

fn money(currency: &str, amount: rust_decimal::Decimal) -> String {
    format!("{} {:.2}", currency, amount)
}

fn render_status_email(
    order: &OrderModel,
    status: FulfillmentStatus,
    recipient_name: &str,
    copy: &StatusCopy,
) -> (String, String) {
    let subject = format!("Order Update: {}", copy.title);
    let html = format!(
        r#"<div style="font-family: Arial, sans-serif; max-width: 600px; margin: 0 auto;">
  <h2 style="color: #007bff;">{title}</h2>
  <p>Dear {name},</p>
  <p>{message}</p>
  <div style="background: #f8f9fa; padding: 20px; margin: 20px 0; border-radius: 5px;">
    <h3>Order #{order_number}</h3>
    <p><strong>Status:</strong> {status}</p>
    <p><strong>Total Amount:</strong> {total}</p>
  </div>
  <p>If you have any questions, please contact our support team.</p>
</div>"#,
        title = copy.title,
        name = recipient_name,
        message = copy.message,
        order_number = order.order_number,
        status = status,
        total = money(&order.currency, order.total_amount),
    );
    (subject, html)
}

fn render_payment_email(
    order: &OrderModel,
    items: &[OrderItemModel],
    recipient_name: &str,
) -> (String, String) {
    let subject = "Payment Successful - Order Confirmation".to_string();

    let item_rows: String = items
        .iter()
        .map(|item| {
            format!(
                "    <li>{} - Quantity: {} - {}</li>\n",
                item.name,
                item.quantity,
                money(&order.currency, item.line_total)
            )
        })
        .collect();

    let html = format!(
        r#"<div style="font-family: Arial, sans-serif; max-width: 600px; margin: 0 auto;">
  <h2 style="color: #28a745;">Payment Successful!</h2>
  <p>Dear {name},</p>
  <p>Your payment has been successfully processed. Here are your order details:</p>
  <div style="background: #f8f9fa; padding: 20px; margin: 20px 0; border-radius: 5px;">
    <h3>Order #{order_number}</h3>
    <p><strong>Total Amount:</strong> {total}</p>
    <p><strong>Payment Method:</strong> {method}</p>
  </div>
  <h4>Items Ordered:</h4>
  <ul>
{items}  </ul>
  <p><strong>Shipping Region:</strong> {region}</p>
  <p>Thank you for shopping with us! We'll send you another email when your order ships.</p>
</div>"#,
        name = recipient_name,
        order_number = order.order_number,
        total = money(&order.currency, order.total_amount),
        method = order.payment_method,
        items = item_rows,
        region = order.shipping_region,
    );
    (subject, html)
}

struct Recipient {
    name: String,
    email: String,
}

/// Composes and sends order emails. Failures are surfaced to the caller,
/// which for the event loop means a log line, never a failed order.
pub struct OrderNotifier {
    db_pool: Arc<DbPool>,
    sender: Arc<dyn EmailSender>,
}

impl OrderNotifier {
    pub fn new(db_pool: Arc<DbPool>, sender: Arc<dyn EmailSender>) -> Self {
        Self { db_pool, sender }
    }

    /// Mails the customer about a fulfillment change. Statuses without copy
    /// are skipped before any database access.
    #[instrument(skip(self), fields(order_id = %order_id, status = %status))]
    pub async fn order_status_changed(
        &self,
        order_id: Uuid,
        status: FulfillmentStatus,
    ) -> Result<(), ServiceError> {
        let copy = match status_copy(status) {
            Some(copy) => copy,
            None => return Ok(()),
        };

        let (order, recipient) = self.load_order_contact(order_id).await?;
        let recipient = match recipient {
            Some(recipient) => recipient,
            None => {
                warn!(order_id = %order_id, "Order has no reachable email address");
                return Ok(());
            }
        };

        let (subject, html) = render_status_email(&order, status, &recipient.name, &copy);
        self.sender.send(&recipient.email, &subject, &html).await?;

        info!(order_id = %order_id, status = %status, "Status email sent");
        Ok(())
    }

    /// Mails the payment confirmation with the full item list.
    #[instrument(skip(self), fields(order_id = %order_id))]
    pub async fn payment_confirmed(&self, order_id: Uuid) -> Result<(), ServiceError> {
        let (order, recipient) = self.load_order_contact(order_id).await?;
        let recipient = match recipient {
            Some(recipient) => recipient,
            None => {
                warn!(order_id = %order_id, "Order has no reachable email address");
                return Ok(());
            }
        };

        let items = OrderItemEntity::find()
            .filter(order_item::Column::OrderId.eq(order_id))
            .all(&*self.db_pool)
            .await?;

        let (subject, html) = render_payment_email(&order, &items, &recipient.name);
        self.sender.send(&recipient.email, &subject, &html).await?;

        info!(order_id = %order_id, "Payment confirmation email sent");
        Ok(())
    }

    async fn load_order_contact(
        &self,
        order_id: Uuid,
    ) -> Result<(OrderModel, Option<Recipient>), ServiceError> {
        let db = &*self.db_pool;

        let order = OrderEntity::find_by_id(order_id)
            .one(db)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Order {} not found", order_id)))?;

        let recipient = if let Some(user_id) = order.user_id {
            UserEntity::find_by_id(user_id)
                .one(db)
                .await?
                .map(|user| Recipient {
                    name: user.name,
                    email: user.email,
                })
        } else {
            order.guest_email.clone().map(|email| Recipient {
                name: order
                    .guest_name
                    .clone()
                    .unwrap_or_else(|| "Customer".to_string()),
                email,
            })
        };

        Ok((order, recipient))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entities::order::{PaymentMethod, PaymentStatus};
    use chrono::Utc;
    use mockall::mock;
    use rust_decimal_macros::dec;
    use sea_orm::DatabaseConnection;

    mock! {
        pub Sender {}

        #[async_trait]
        impl EmailSender for Sender {
            async fn send(
                &self,
                to: &str,
                subject: &str,
                html_body: &str,
            ) -> Result<(), ServiceError>;
        }
    }

    fn order() -> OrderModel {
        OrderModel {
            id: Uuid::new_v4(),
            order_number: "ORD-1700000000000-A1B2C".into(),
            user_id: None,
            guest_token: Some("guest_AAAAAAAAAAAAAAAAAAAAAA".into()),
            guest_name: Some("Ada".into()),
            guest_email: Some("ada@example.com".into()),
            guest_phone: None,
            status: FulfillmentStatus::Processing,
            payment_status: PaymentStatus::Paid,
            payment_method: PaymentMethod::Paystack,
            total_amount: dec!(3600),
            currency: "NGN".into(),
            shipping_region: "Lagos".into(),
            shipping_address: None,
            shipping_fee: dec!(3600),
            shipping_fee_before_discount: dec!(4000),
            shipping_discount_applied: true,
            shipping_discount_percentage: dec!(10),
            shipping_discount_amount: dec!(400),
            payment_reference: Some("ref_123".into()),
            transaction_id: None,
            paid_at: None,
            notes: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
            version: 1,
        }
    }

    #[test]
    fn copy_exists_only_for_movement_states() {
        assert!(status_copy(FulfillmentStatus::Processing).is_some());
        assert!(status_copy(FulfillmentStatus::Shipped).is_some());
        assert!(status_copy(FulfillmentStatus::Delivered).is_some());
        assert!(status_copy(FulfillmentStatus::Pending).is_none());
        assert!(status_copy(FulfillmentStatus::Cancelled).is_none());
        assert!(status_copy(FulfillmentStatus::Refunded).is_none());
    }

    #[test]
    fn status_email_subject_and_body() {
        let order = order();
        let copy = status_copy(FulfillmentStatus::Shipped).unwrap();
        let (subject, html) =
            render_status_email(&order, FulfillmentStatus::Shipped, "Ada", &copy);

        assert_eq!(subject, "Order Update: Order Shipped");
        assert!(html.contains("Dear Ada,"));
        assert!(html.contains("ORD-1700000000000-A1B2C"));
        assert!(html.contains("NGN 3600.00"));
    }

    #[test]
    fn payment_email_lists_items() {
        let order = order();
        let items = vec![OrderItemModel {
            id: Uuid::new_v4(),
            order_id: order.id,
            product_id: Uuid::new_v4(),
            name: "Classic White Tee".into(),
            quantity: 2,
            unit_price: dec!(4500),
            line_total: dec!(9000),
            image_url: None,
            created_at: Utc::now(),
        }];

        let (subject, html) = render_payment_email(&order, &items, "Ada");

        assert_eq!(subject, "Payment Successful - Order Confirmation");
        assert!(html.contains("Classic White Tee - Quantity: 2 - NGN 9000.00"));
        assert!(html.contains("paystack"));
        assert!(html.contains("Lagos"));
    }

    #[tokio::test]
    async fn silent_statuses_never_touch_sender_or_database() {
        let mut sender = MockSender::new();
        sender.expect_send().never();

        // Disconnected pool: any query would error, proving none runs.
        let notifier = Arc::new(OrderNotifier::new(
            Arc::new(DatabaseConnection::default()),
            Arc::new(sender),
        ));

        let result = notifier
            .order_status_changed(Uuid::new_v4(), FulfillmentStatus::Cancelled)
            .await;
        assert!(result.is_ok());
    }
}
