use crate::{db::DbPool, errors::ServiceError, events::EventSender};
use async_trait::async_trait;
use std::sync::Arc;

/// A self-contained write against the settlement core.
///
/// Each command owns one multi-step mutation (cancel an order, open a
/// return) and runs it inside its own transaction. Domain events are
/// emitted through `event_sender` only after the transaction commits,
/// so a rolled-back command leaves no trace downstream.
#[async_trait]
pub trait Command: Send + Sync {
    /// Value handed back to the caller on success.
    type Result;

    async fn execute(
        &self,
        db_pool: Arc<DbPool>,
        event_sender: Arc<EventSender>,
    ) -> Result<Self::Result, ServiceError>;
}

pub mod orders;
pub mod returns;
