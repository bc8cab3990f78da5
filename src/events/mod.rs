use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{info, warn};
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct EventSender {
    sender: mpsc::Sender<Event>,
}

impl EventSender {
    /// Creates a new EventSender
    pub fn new(sender: mpsc::Sender<Event>) -> Self {
        Self { sender }
    }

    /// Sends an event asynchronously. Delivery is best-effort: a full or
    /// closed channel is logged, never propagated to the business flow.
    pub async fn send(&self, event: Event) {
        if let Err(e) = self.sender.send(event).await {
            warn!("failed to publish event: {}", e);
        }
    }
}

/// Events emitted by the checkout and payment flows.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Event {
    CheckoutStarted {
        session_id: String,
        user_id: Uuid,
        final_total: Decimal,
    },
    GatewayCheckoutCreated {
        transaction_id: String,
        session_id: String,
        amount: Decimal,
    },
    PaymentCompleted {
        transaction_id: String,
        order_id: Uuid,
        amount: Decimal,
    },
    PaymentFailed {
        transaction_id: String,
        error_code: Option<String>,
    },
    PaymentRefunded {
        transaction_id: String,
    },
    OrderCreated(Uuid),
    CouponRedeemed {
        code: String,
        user_id: Uuid,
        order_id: Uuid,
    },
}

/// Consumes the event stream. The current consumer only logs; downstream
/// integrations (seller payouts, notifications) subscribe here.
pub async fn process_events(mut receiver: mpsc::Receiver<Event>) {
    while let Some(event) = receiver.recv().await {
        match &event {
            Event::PaymentCompleted {
                transaction_id,
                order_id,
                amount,
            } => {
                info!(%transaction_id, %order_id, %amount, "payment completed");
            }
            Event::PaymentFailed {
                transaction_id,
                error_code,
            } => {
                warn!(%transaction_id, ?error_code, "payment failed");
            }
            other => {
                info!(event = ?other, "event processed");
            }
        }
    }
    info!("event channel closed, consumer exiting");
}
