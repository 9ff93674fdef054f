//! Protobuf-speaking [`QueueClient`] over a pluggable transport.
//!
//! Requests and responses are `pairup-wire` messages. The transport only
//! moves bytes; it knows nothing about queues.

use async_trait::async_trait;
use pairup_session::{Difficulty, QueueError, Ticket};
use pairup_wire::{CancelQueueRequest, CancelQueueResponse, JoinQueueRequest, JoinQueueResponse};
use prost::Message;
use tracing::debug;

use crate::client::{CancelAck, JoinAccepted, QueueClient};

/// Remote procedure on the matching service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueMethod {
    Join,
    Cancel,
}

impl QueueMethod {
    pub fn path(&self) -> &'static str {
        match self {
            Self::Join => "/queue/join",
            Self::Cancel => "/queue/cancel",
        }
    }
}

/// Failure below the protocol layer.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    #[error("connection failed: {0}")]
    Connect(String),
    #[error("request timed out")]
    Timeout,
}

impl From<TransportError> for QueueError {
    fn from(error: TransportError) -> Self {
        match error {
            TransportError::Connect(reason) => Self::Network(reason),
            TransportError::Timeout => Self::Timeout,
        }
    }
}

/// Moves one encoded request to the service and returns the encoded reply.
#[async_trait]
pub trait QueueTransport: Send + Sync {
    async fn call(&self, method: QueueMethod, body: Vec<u8>) -> Result<Vec<u8>, TransportError>;
}

/// [`QueueClient`] that encodes requests with prost.
pub struct RemoteQueueClient<T> {
    transport: T,
}

impl<T: QueueTransport> RemoteQueueClient<T> {
    pub fn new(transport: T) -> Self {
        Self { transport }
    }

    async fn round_trip<M: Message + Default>(
        &self,
        method: QueueMethod,
        body: Vec<u8>,
    ) -> Result<M, QueueError> {
        debug!(path = method.path(), bytes = body.len(), "queue request");
        let reply = self.transport.call(method, body).await?;
        M::decode(reply.as_slice()).map_err(|e| QueueError::Protocol(e.to_string()))
    }
}

#[async_trait]
impl<T: QueueTransport> QueueClient for RemoteQueueClient<T> {
    async fn join(
        &self,
        ticket: Ticket,
        difficulty: Difficulty,
    ) -> Result<JoinAccepted, QueueError> {
        let request = JoinQueueRequest::new(ticket, difficulty);
        let response: JoinQueueResponse = self
            .round_trip(QueueMethod::Join, request.encode_to_vec())
            .await?;

        if let Some(error) = response.error {
            return Err(error.into());
        }
        if response.match_id.is_empty() {
            return Err(QueueError::Protocol("join response without match id".to_string()));
        }
        Ok(JoinAccepted {
            match_id: response.match_id,
            partner_id: response.partner_id,
        })
    }

    async fn cancel(&self, ticket: Ticket) -> Result<CancelAck, QueueError> {
        let request = CancelQueueRequest::new(ticket);
        let response: CancelQueueResponse = self
            .round_trip(QueueMethod::Cancel, request.encode_to_vec())
            .await?;

        match (response.error, response.acknowledged) {
            (Some(error), _) => Err(error.into()),
            (None, true) => Ok(CancelAck),
            (None, false) => Err(QueueError::Rejected("cancel not acknowledged".to_string())),
        }
    }
}
