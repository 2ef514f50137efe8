//! Port interfaces for sync operations

use async_trait::async_trait;
use circlepay_domain::{PendingAction, Result};

/// Sends a persisted pending action to the backend
///
/// Implementations map each [`circlepay_domain::ActionKind`] to its business
/// endpoint and must not queue the call again: the coordinator owns retries
/// for replayed actions.
#[async_trait]
pub trait ActionDispatcher: Send + Sync {
    async fn dispatch(&self, action: &PendingAction) -> Result<()>;
}
