//! Pairup Wire Protocol Types
//!
//! This crate defines the Protobuf message types exchanged with the remote
//! matching service, plus the persisted session journal format.
//!
//! # Message Categories
//!
//! - **Queue Channel** (request/response): join and cancel against the
//!   matching service. Failures travel in-band as [`QueueErrorProto`].
//! - **Journal**: the ordered record of events a controller applied, used to
//!   verify that a session can be reproduced exactly.

#![deny(unsafe_code)]

use pairup_session::{Difficulty, QueueError, Ticket};
use prost::{Enumeration, Message};

// ============================================================================
// Enumerations
// ============================================================================

/// Difficulty tier on the wire.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Enumeration)]
#[repr(i32)]
pub enum DifficultyProto {
    Unspecified = 0,
    Easy = 1,
    Medium = 2,
    Hard = 3,
}

impl From<Difficulty> for DifficultyProto {
    fn from(difficulty: Difficulty) -> Self {
        match difficulty {
            Difficulty::Easy => Self::Easy,
            Difficulty::Medium => Self::Medium,
            Difficulty::Hard => Self::Hard,
        }
    }
}

impl TryFrom<DifficultyProto> for Difficulty {
    type Error = &'static str;

    fn try_from(proto: DifficultyProto) -> Result<Self, Self::Error> {
        match proto {
            DifficultyProto::Easy => Ok(Self::Easy),
            DifficultyProto::Medium => Ok(Self::Medium),
            DifficultyProto::Hard => Ok(Self::Hard),
            DifficultyProto::Unspecified => Err("difficulty must be specified"),
        }
    }
}

/// Kind of a journaled event.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Enumeration)]
#[repr(i32)]
pub enum EventKindProto {
    Unspecified = 0,
    StartSearch = 1,
    Minimize = 2,
    Maximize = 3,
    Cancel = 4,
    JoinSucceeded = 5,
    JoinFailed = 6,
    CancelFailed = 7,
    Tick = 8,
    DismissSuccess = 9,
    Reset = 10,
}

// ============================================================================
// Queue Channel Messages
// ============================================================================

/// Error code for an unreachable service.
pub const ERROR_CODE_NETWORK: u32 = 1;

/// Error code for a request the service refused.
pub const ERROR_CODE_REJECTED: u32 = 2;

/// Error code for a request that timed out.
pub const ERROR_CODE_TIMEOUT: u32 = 3;

/// Error code for a response that could not be decoded.
pub const ERROR_CODE_PROTOCOL: u32 = 4;

/// In-band failure returned by the matching service.
#[derive(Clone, PartialEq, Message)]
pub struct QueueErrorProto {
    #[prost(uint32, tag = "1")]
    pub code: u32,

    #[prost(string, tag = "2")]
    pub message: String,
}

impl From<&QueueError> for QueueErrorProto {
    fn from(error: &QueueError) -> Self {
        match error {
            QueueError::Network(message) => Self {
                code: ERROR_CODE_NETWORK,
                message: message.clone(),
            },
            QueueError::Rejected(message) => Self {
                code: ERROR_CODE_REJECTED,
                message: message.clone(),
            },
            QueueError::Timeout => Self {
                code: ERROR_CODE_TIMEOUT,
                message: String::new(),
            },
            QueueError::Protocol(message) => Self {
                code: ERROR_CODE_PROTOCOL,
                message: message.clone(),
            },
        }
    }
}

impl From<QueueErrorProto> for QueueError {
    /// Unknown codes are treated as a rejection.
    fn from(proto: QueueErrorProto) -> Self {
        match proto.code {
            ERROR_CODE_NETWORK => Self::Network(proto.message),
            ERROR_CODE_TIMEOUT => Self::Timeout,
            ERROR_CODE_PROTOCOL => Self::Protocol(proto.message),
            _ => Self::Rejected(proto.message),
        }
    }
}

/// Ask the service to place the caller in the queue for a tier.
#[derive(Clone, PartialEq, Message)]
pub struct JoinQueueRequest {
    #[prost(enumeration = "DifficultyProto", tag = "1")]
    pub difficulty: i32,

    /// Ticket generation the queued entry is filed under.
    #[prost(uint64, tag = "2")]
    pub ticket: u64,
}

impl JoinQueueRequest {
    pub fn new(ticket: Ticket, difficulty: Difficulty) -> Self {
        Self {
            difficulty: DifficultyProto::from(difficulty).into(),
            ticket: ticket.generation(),
        }
    }
}

/// Answer to a join, sent once a partner was found or the join failed.
#[derive(Clone, PartialEq, Message)]
pub struct JoinQueueResponse {
    /// Identifier of the collaborative session the pair was placed in.
    #[prost(string, tag = "1")]
    pub match_id: String,

    /// Identifier of the partner.
    #[prost(string, tag = "2")]
    pub partner_id: String,

    /// Set when the join failed; other fields are then meaningless.
    #[prost(message, optional, tag = "3")]
    pub error: Option<QueueErrorProto>,
}

/// Leave the queue.
///
/// Only the entry filed under `ticket` is removed, so a delayed cancel for an
/// abandoned search cannot pull a newer search out of the queue.
#[derive(Clone, PartialEq, Message)]
pub struct CancelQueueRequest {
    #[prost(uint64, tag = "1")]
    pub ticket: u64,
}

impl CancelQueueRequest {
    pub fn new(ticket: Ticket) -> Self {
        Self {
            ticket: ticket.generation(),
        }
    }
}

/// Answer to a cancel.
#[derive(Clone, PartialEq, Message)]
pub struct CancelQueueResponse {
    #[prost(bool, tag = "1")]
    pub acknowledged: bool,

    #[prost(message, optional, tag = "2")]
    pub error: Option<QueueErrorProto>,
}

// ============================================================================
// Journal Types
// ============================================================================

/// One applied event.
#[derive(Clone, PartialEq, Message)]
pub struct JournalEntryProto {
    /// Position in the journal, starting at 0 with no gaps.
    #[prost(uint64, tag = "1")]
    pub seq: u64,

    #[prost(enumeration = "EventKindProto", tag = "2")]
    pub kind: i32,

    /// Only meaningful for StartSearch.
    #[prost(enumeration = "DifficultyProto", tag = "3")]
    pub difficulty: i32,

    /// Ticket generation for async events; 0 otherwise.
    #[prost(uint64, tag = "4")]
    pub ticket: u64,

    /// Only meaningful for JoinFailed and CancelFailed.
    #[prost(message, optional, tag = "5")]
    pub error: Option<QueueErrorProto>,

    /// Session StateDigest after the event was applied.
    #[prost(uint64, tag = "6")]
    pub digest_after: u64,

    /// True if the session ignored the event as stale.
    #[prost(bool, tag = "7")]
    pub ignored: bool,
}

/// Complete journal of one controller's lifetime.
#[derive(Clone, PartialEq, Message)]
pub struct SessionJournal {
    /// Schema version (starts at 1).
    #[prost(uint32, tag = "1")]
    pub journal_format_version: u32,

    /// StateDigest algorithm identifier.
    #[prost(string, tag = "2")]
    pub state_digest_algo_id: String,

    #[prost(message, repeated, tag = "3")]
    pub entries: Vec<JournalEntryProto>,

    #[prost(uint64, tag = "4")]
    pub final_digest: u64,

    /// Phase name after the last entry.
    #[prost(string, tag = "5")]
    pub final_phase: String,
}

// ============================================================================
// Tests
// ============================================================================
