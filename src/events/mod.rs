use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, error, info};
use uuid::Uuid;

use crate::entities::order::FulfillmentStatus;
use crate::services::notifications::OrderNotifier;

/// Events emitted by the services after state changes commit.
///
/// Handlers run off the request path; a lost event never fails the request
/// that produced it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Event {
    OrderCreated(Uuid),
    OrderStatusChanged {
        order_id: Uuid,
        old_status: FulfillmentStatus,
        new_status: FulfillmentStatus,
    },
    OrderCancelled(Uuid),
    PaymentConfirmed {
        order_id: Uuid,
        reference: String,
    },
    PaymentFailed {
        order_id: Uuid,
        reference: String,
    },
}

#[derive(Debug, Clone)]
pub struct EventSender {
    sender: mpsc::Sender<Event>,
}

impl EventSender {
    /// Creates a new EventSender
    pub fn new(sender: mpsc::Sender<Event>) -> Self {
        Self { sender }
    }

    /// Sends an event asynchronously
    pub async fn send(&self, event: Event) -> Result<(), String> {
        self.sender
            .send(event)
            .await
            .map_err(|e| format!("Failed to send event: {}", e))
    }
}

/// Processes incoming events until the channel closes.
///
/// Notification failures are logged and swallowed; the loop never dies
/// because a provider was down.
pub async fn process_events(mut rx: mpsc::Receiver<Event>, notifier: Option<Arc<OrderNotifier>>) {
    info!("Starting event processing loop");

    while let Some(event) = rx.recv().await {
        debug!("Received event: {:?}", event);

        match event {
            Event::OrderStatusChanged {
                order_id,
                old_status,
                new_status,
            } => {
                debug!(
                    "Order {} moved {} -> {}",
                    order_id, old_status, new_status
                );
                if let Some(notifier) = &notifier {
                    if let Err(e) = notifier.order_status_changed(order_id, new_status).await {
                        error!(
                            "Failed to handle status notification: order_id={}, error={}",
                            order_id, e
                        );
                    }
                }
            }
            Event::PaymentConfirmed {
                order_id,
                ref reference,
            } => {
                info!(
                    "Payment confirmed for order {} (reference {})",
                    order_id, reference
                );
                if let Some(notifier) = &notifier {
                    if let Err(e) = notifier.payment_confirmed(order_id).await {
                        error!(
                            "Failed to handle payment notification: order_id={}, error={}",
                            order_id, e
                        );
                    }
                }
            }
            Event::PaymentFailed {
                order_id,
                ref reference,
            } => {
                info!(
                    "Payment failed for order {} (reference {})",
                    order_id, reference
                );
            }
            Event::OrderCreated(order_id) => {
                debug!("Order created: {}", order_id);
            }
            Event::OrderCancelled(order_id) => {
                debug!("Order cancelled: {}", order_id);
            }
        }
    }

    info!("Event processing loop stopped");
}
