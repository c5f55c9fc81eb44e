use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{info, warn};
use uuid::Uuid;

/// Domain events emitted by the settlement core.
///
/// Events are best-effort: they are sent after the owning transaction commits
/// and a send failure is logged, never propagated into the commit path.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Event {
    OrderPlaced {
        order_id: Uuid,
        customer_id: Uuid,
        total_amount: Decimal,
    },
    PaymentCaptured {
        order_id: Uuid,
        amount: Decimal,
    },
    PaymentFailed {
        order_id: Uuid,
    },
    OrderCancelled {
        order_id: Uuid,
        full: bool,
        refunded_amount: Decimal,
    },
    StockRestored {
        variant_id: Uuid,
        quantity: i32,
    },
    ReturnRequested {
        return_id: Uuid,
        order_id: Uuid,
        refund_amount: Decimal,
    },
    ReturnStatusChanged {
        return_id: Uuid,
        old_status: String,
        new_status: String,
    },
    ReturnCompleted {
        return_id: Uuid,
        refund_amount: Decimal,
    },
    WalletCredited {
        wallet_id: Uuid,
        amount: Decimal,
    },
    WalletDebited {
        wallet_id: Uuid,
        amount: Decimal,
    },
}

#[derive(Debug, Clone)]
pub struct EventSender {
    sender: mpsc::Sender<Event>,
}

impl EventSender {
    pub fn new(sender: mpsc::Sender<Event>) -> Self {
        Self { sender }
    }

    /// Sends an event asynchronously.
    pub async fn send(&self, event: Event) -> Result<(), String> {
        self.sender
            .send(event)
            .await
            .map_err(|e| format!("Failed to send event: {e}"))
    }

    /// Fire-and-forget send used after commit; logs instead of failing.
    pub async fn send_logged(&self, event: Event) {
        if let Err(e) = self.send(event).await {
            warn!(error = %e, "Dropping domain event");
        }
    }
}

/// Creates a connected sender/receiver pair with a bounded buffer.
pub fn channel(buffer: usize) -> (EventSender, mpsc::Receiver<Event>) {
    let (tx, rx) = mpsc::channel(buffer);
    (EventSender::new(tx), rx)
}

/// Background task draining the event channel. The in-process consumer only
/// logs; external delivery (webhooks, queues) sits outside this core.
pub async fn process_events(mut rx: mpsc::Receiver<Event>) {
    while let Some(event) = rx.recv().await {
        info!(?event, "domain event");
    }
}
