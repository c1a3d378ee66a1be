use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::entities::order::OrderStatus;

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

    /// Fire-and-forget send. A full or closed channel is logged and the
    /// event dropped; callers never fail because of it.
    pub fn send_or_log(&self, event: Event) {
        if let Err(err) = self.sender.try_send(event) {
            warn!("Dropping domain event: {}", err);
        }
    }
}

/// Domain events emitted by the cart and checkout services.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Event {
    // Cart events
    CartCreated(Uuid),
    CartItemAdded {
        cart_id: Uuid,
        product_id: Uuid,
        quantity: i32,
    },
    CartItemUpdated {
        cart_id: Uuid,
        item_id: Uuid,
        quantity: i32,
    },
    CartItemRemoved {
        cart_id: Uuid,
        item_id: Uuid,
    },
    CartMerged {
        guest_cart_id: Uuid,
        user_cart_id: Uuid,
        lines_merged: usize,
    },

    // Checkout events
    PaymentOrderCreated {
        cart_id: Uuid,
        gateway_order_id: String,
        amount_minor: i64,
    },
    OrderMaterialized {
        order_id: Uuid,
        gateway_payment_id: String,
        total: Decimal,
    },
    PaymentConfirmationDuplicate {
        order_id: Uuid,
        gateway_payment_id: String,
    },
    PaymentSignatureRejected {
        source: String,
    },

    // Order lifecycle
    OrderStatusChanged {
        order_id: Uuid,
        old_status: OrderStatus,
        new_status: OrderStatus,
    },
}

/// Drains the event channel and logs each event. Returns when every sender
/// has been dropped.
pub async fn process_events(mut rx: mpsc::Receiver<Event>) {
    info!("Starting event processing loop");

    while let Some(event) = rx.recv().await {
        match &event {
            Event::OrderMaterialized {
                order_id,
                gateway_payment_id,
                total,
            } => {
                info!(
                    "Order {} materialized for payment {} (total {})",
                    order_id, gateway_payment_id, total
                );
            }
            Event::PaymentConfirmationDuplicate {
                order_id,
                gateway_payment_id,
            } => {
                info!(
                    "Duplicate confirmation for payment {} absorbed by order {}",
                    gateway_payment_id, order_id
                );
            }
            Event::PaymentSignatureRejected { source } => {
                error!("Rejected payment confirmation signature from {}", source);
            }
            Event::OrderStatusChanged {
                order_id,
                old_status,
                new_status,
            } => {
                info!(
                    "Order {} moved from {} to {}",
                    order_id, old_status, new_status
                );
            }
            _ => {
                info!("Received event: {:?}", event);
            }
        }
    }

    warn!("Event processing loop has ended");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn send_or_log_delivers_when_capacity_allows() {
        let (tx, mut rx) = mpsc::channel(1);
        let sender = EventSender::new(tx);
        let cart_id = Uuid::new_v4();

        sender.send_or_log(Event::CartCreated(cart_id));

        match rx.recv().await {
            Some(Event::CartCreated(id)) => assert_eq!(id, cart_id),
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[tokio::test]
    async fn send_or_log_drops_silently_when_full_or_closed() {
        let (tx, rx) = mpsc::channel(1);
        let sender = EventSender::new(tx);

        sender.send_or_log(Event::CartCreated(Uuid::new_v4()));
        // Channel full; must not block or panic.
        sender.send_or_log(Event::CartCreated(Uuid::new_v4()));

        drop(rx);
        sender.send_or_log(Event::CartCreated(Uuid::new_v4()));
        assert!(sender.send(Event::CartCreated(Uuid::new_v4())).await.is_err());
    }

    #[tokio::test]
    async fn process_events_exits_when_senders_drop() {
        let (tx, rx) = mpsc::channel(4);
        let sender = EventSender::new(tx);
        sender.send_or_log(Event::PaymentSignatureRejected {
            source: "webhook".into(),
        });
        drop(sender);

        process_events(rx).await;
    }
}
