use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{info, warn};
use uuid::Uuid;

use crate::entities::PaymentStatus;

#[derive(Debug, Clone)]
pub struct EventSender {
    sender: mpsc::Sender<Event>,
}

impl EventSender {
    /// Creates a new EventSender
    pub fn new(sender: mpsc::Sender<Event>) -> Self {
        Self { sender }
    }

    /// Sends an event, waiting for channel capacity
    pub async fn send(&self, event: Event) -> Result<(), String> {
        self.sender
            .send(event)
            .await
            .map_err(|e| format!("Failed to send event: {}", e))
    }

    /// Publishes without waiting; a full or closed channel drops the event with a warning.
    pub fn send_or_log(&self, event: Event) {
        if let Err(e) = self.sender.try_send(event) {
            warn!(error = %e, "Dropping domain event");
        }
    }
}

/// Domain events emitted by the checkout flow.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Event {
    CheckoutStarted {
        user_id: Uuid,
        payment_record_id: Uuid,
        order_ref: String,
        amount: Decimal,
    },
    PaymentSettled {
        user_id: Uuid,
        order_ref: String,
        status: PaymentStatus,
    },
    OrderCreated {
        order_id: Uuid,
        order_ref: String,
        user_id: Uuid,
        amount: Decimal,
    },
}

/// Drains the event channel until every sender is dropped.
pub async fn process_events(mut rx: mpsc::Receiver<Event>) {
    info!("Starting event processing loop");

    while let Some(event) = rx.recv().await {
        match event {
            Event::CheckoutStarted {
                user_id,
                payment_record_id,
                order_ref,
                amount,
            } => {
                info!(%user_id, %payment_record_id, %order_ref, %amount, "checkout started");
            }
            Event::PaymentSettled {
                user_id,
                order_ref,
                status,
            } => {
                info!(%user_id, %order_ref, %status, "payment settled");
            }
            Event::OrderCreated {
                order_id,
                order_ref,
                user_id,
                amount,
            } => {
                info!(%order_id, %order_ref, %user_id, %amount, "order created");
            }
        }
    }

    info!("Event processing loop stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[tokio::test]
    async fn send_or_log_never_blocks_on_a_full_channel() {
        let (tx, mut rx) = mpsc::channel(1);
        let sender = EventSender::new(tx);
        let event = Event::PaymentSettled {
            user_id: Uuid::new_v4(),
            order_ref: "ref".to_string(),
            status: PaymentStatus::Failed,
        };

        sender.send_or_log(event.clone());
        sender.send_or_log(event.clone());

        assert_eq!(rx.recv().await, Some(event));
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn processor_exits_when_senders_drop() {
        let (tx, rx) = mpsc::channel(4);
        let sender = EventSender::new(tx);
        sender
            .send(Event::OrderCreated {
                order_id: Uuid::new_v4(),
                order_ref: "ref".to_string(),
                user_id: Uuid::new_v4(),
                amount: dec!(25.00),
            })
            .await
            .unwrap();
        drop(sender);

        tokio::time::timeout(std::time::Duration::from_secs(1), process_events(rx))
            .await
            .unwrap();
    }
}
