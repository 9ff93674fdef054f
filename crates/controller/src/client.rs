//! Queue Client seam.
//!
//! The controller talks to the remote matching service only through
//! [`QueueClient`]. Failures are returned, never retried here.

use async_trait::async_trait;
use pairup_session::{Difficulty, QueueError, Ticket};

/// Details of a successful match, as reported by the service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JoinAccepted {
    pub match_id: String,
    pub partner_id: String,
}

/// Acknowledgment of a cancel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CancelAck;

/// Asynchronous join/cancel against the remote matching service.
///
/// `join` files an entry under `ticket` and resolves once the service found a
/// partner (or failed). `cancel` removes only the entry filed under `ticket`.
#[async_trait]
pub trait QueueClient: Send + Sync {
    async fn join(&self, ticket: Ticket, difficulty: Difficulty)
    -> Result<JoinAccepted, QueueError>;

    async fn cancel(&self, ticket: Ticket) -> Result<CancelAck, QueueError>;
}
