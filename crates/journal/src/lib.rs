//! Pairup Session Journal
//!
//! This crate records the events a controller applied to its session and
//! verifies that a recorded journal reproduces the same states.
//!
//! # Architecture
//!
//! - `JournalRecorder`: collects applied events with the post-event digest
//! - `verify_journal`: re-applies a journal to a fresh `MatchmakingSession`
//! - `write_journal` / `read_journal`: prost-encoded files
//!
//! Events the session rejected as invalid transitions are not recorded:
//! they never change state. Stale async events are recorded with their
//! `ignored` flag so verification also checks that they stay stale.

#![deny(unsafe_code)]

use std::fs;
use std::io::{self, Write};
use std::path::Path;

use pairup_session::{
    Applied, Difficulty, Event, MatchmakingSession, Phase, QueueError, STATE_DIGEST_ALGO_ID,
    Ticket,
};
use pairup_wire::{
    DifficultyProto, EventKindProto, JournalEntryProto, QueueErrorProto, SessionJournal,
};
use prost::Message;
use sha2::{Digest, Sha256};

/// Current journal schema version.
pub const JOURNAL_FORMAT_VERSION: u32 = 1;

// ============================================================================
// Event Encoding
// ============================================================================

/// Encode an applied event as a journal entry.
pub fn encode_event(seq: u64, event: &Event, ignored: bool, digest_after: u64) -> JournalEntryProto {
    let (kind, difficulty, error) = match event {
        Event::StartSearch(d) => (EventKindProto::StartSearch, Some(*d), None),
        Event::Minimize => (EventKindProto::Minimize, None, None),
        Event::Maximize => (EventKindProto::Maximize, None, None),
        Event::Cancel => (EventKindProto::Cancel, None, None),
        Event::JoinSucceeded(_) => (EventKindProto::JoinSucceeded, None, None),
        Event::JoinFailed(_, e) => (EventKindProto::JoinFailed, None, Some(e)),
        Event::CancelFailed(_, e) => (EventKindProto::CancelFailed, None, Some(e)),
        Event::Tick(_) => (EventKindProto::Tick, None, None),
        Event::DismissSuccess => (EventKindProto::DismissSuccess, None, None),
        Event::Reset => (EventKindProto::Reset, None, None),
    };

    JournalEntryProto {
        seq,
        kind: kind.into(),
        difficulty: difficulty
            .map_or(DifficultyProto::Unspecified, DifficultyProto::from)
            .into(),
        ticket: event.ticket().map_or(0, |t| t.generation()),
        error: error.map(QueueErrorProto::from),
        digest_after,
        ignored,
    }
}

/// Decode a journal entry back into the event it recorded.
pub fn decode_event(entry: &JournalEntryProto) -> Result<Event, VerifyError> {
    let invalid = |reason: &str| VerifyError::InvalidEntry {
        seq: entry.seq,
        reason: reason.to_string(),
    };
    let kind = EventKindProto::try_from(entry.kind).map_err(|_| invalid("unknown event kind"))?;
    let ticket = || {
        if entry.ticket == 0 {
            Err(invalid("missing ticket"))
        } else {
            Ok(Ticket::from_generation(entry.ticket))
        }
    };
    let error = || {
        entry
            .error
            .clone()
            .map(QueueError::from)
            .ok_or_else(|| invalid("missing error"))
    };

    let event = match kind {
        EventKindProto::Unspecified => return Err(invalid("unspecified event kind")),
        EventKindProto::StartSearch => {
            let difficulty = DifficultyProto::try_from(entry.difficulty)
                .map_err(|_| invalid("unknown difficulty"))
                .and_then(|d| Difficulty::try_from(d).map_err(&invalid))?;
            Event::StartSearch(difficulty)
        }
        EventKindProto::Minimize => Event::Minimize,
        EventKindProto::Maximize => Event::Maximize,
        EventKindProto::Cancel => Event::Cancel,
        EventKindProto::JoinSucceeded => Event::JoinSucceeded(ticket()?),
        EventKindProto::JoinFailed => Event::JoinFailed(ticket()?, error()?),
        EventKindProto::CancelFailed => Event::CancelFailed(ticket()?, error()?),
        EventKindProto::Tick => Event::Tick(ticket()?),
        EventKindProto::DismissSuccess => Event::DismissSuccess,
        EventKindProto::Reset => Event::Reset,
    };
    Ok(event)
}

// ============================================================================
// Journal Recorder
// ============================================================================

/// Records applied events for journal generation.
#[derive(Debug, Default)]
pub struct JournalRecorder {
    entries: Vec<JournalEntryProto>,
}

impl JournalRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an event the session accepted (changed or ignored).
    pub fn record(&mut self, event: &Event, applied: &Applied, digest_after: u64) {
        let seq = self.entries.len() as u64;
        self.entries
            .push(encode_event(seq, event, applied.is_ignored(), digest_after));
    }

    /// Snapshot the journal so far without consuming the recorder.
    pub fn to_journal(&self, session: &MatchmakingSession) -> SessionJournal {
        SessionJournal {
            journal_format_version: JOURNAL_FORMAT_VERSION,
            state_digest_algo_id: STATE_DIGEST_ALGO_ID.to_string(),
            entries: self.entries.clone(),
            final_digest: session.state_digest(),
            final_phase: session.phase().as_str().to_string(),
        }
    }

    /// Finalize the journal against the session it was recorded from.
    pub fn finalize(self, session: &MatchmakingSession) -> SessionJournal {
        SessionJournal {
            journal_format_version: JOURNAL_FORMAT_VERSION,
            state_digest_algo_id: STATE_DIGEST_ALGO_ID.to_string(),
            entries: self.entries,
            final_digest: session.state_digest(),
            final_phase: session.phase().as_str().to_string(),
        }
    }
}

// ============================================================================
// Journal Verification
// ============================================================================

/// Journal verification error.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum VerifyError {
    #[error("unsupported journal format version {0}")]
    UnsupportedVersion(u32),
    #[error("digest algorithm mismatch: expected {expected}, got {actual}")]
    DigestAlgorithmMismatch { expected: String, actual: String },
    #[error("entry out of sequence: expected {expected}, got {actual}")]
    SequenceGap { expected: u64, actual: u64 },
    #[error("invalid entry {seq}: {reason}")]
    InvalidEntry { seq: u64, reason: String },
    #[error("entry {seq} was rejected on replay: {reason}")]
    RejectedOnReplay { seq: u64, reason: String },
    #[error("entry {seq} ignored flag mismatch: recorded {recorded}, replayed {replayed}")]
    IgnoredMismatch {
        seq: u64,
        recorded: bool,
        replayed: bool,
    },
    #[error("entry {seq} digest mismatch: expected {expected:#x}, got {actual:#x}")]
    DigestMismatch { seq: u64, expected: u64, actual: u64 },
    #[error("final digest mismatch: expected {expected:#x}, got {actual:#x}")]
    FinalDigestMismatch { expected: u64, actual: u64 },
    #[error("final phase mismatch: expected {expected}, got {actual}")]
    FinalPhaseMismatch { expected: String, actual: Phase },
}

/// Verify a journal reproduces its recorded states.
///
/// # Verification Steps
/// 1. Check format version and digest algorithm
/// 2. For each entry in order: check `seq`, decode, apply to a fresh session
/// 3. Compare the ignored flag and the post-event digest
/// 4. Compare the final digest and final phase
///
/// Returns the replayed session on success.
pub fn verify_journal(journal: &SessionJournal) -> Result<MatchmakingSession, VerifyError> {
    if journal.journal_format_version != JOURNAL_FORMAT_VERSION {
        return Err(VerifyError::UnsupportedVersion(
            journal.journal_format_version,
        ));
    }
    if journal.state_digest_algo_id != STATE_DIGEST_ALGO_ID {
        return Err(VerifyError::DigestAlgorithmMismatch {
            expected: STATE_DIGEST_ALGO_ID.to_string(),
            actual: journal.state_digest_algo_id.clone(),
        });
    }

    let mut session = MatchmakingSession::new();
    for (expected_seq, entry) in (0u64..).zip(&journal.entries) {
        if entry.seq != expected_seq {
            return Err(VerifyError::SequenceGap {
                expected: expected_seq,
                actual: entry.seq,
            });
        }

        let event = decode_event(entry)?;
        let applied = session
            .apply(event)
            .map_err(|e| VerifyError::RejectedOnReplay {
                seq: entry.seq,
                reason: e.to_string(),
            })?;

        if applied.is_ignored() != entry.ignored {
            return Err(VerifyError::IgnoredMismatch {
                seq: entry.seq,
                recorded: entry.ignored,
                replayed: applied.is_ignored(),
            });
        }

        let actual = session.state_digest();
        if actual != entry.digest_after {
            return Err(VerifyError::DigestMismatch {
                seq: entry.seq,
                expected: entry.digest_after,
                actual,
            });
        }
    }

    let final_digest = session.state_digest();
    if final_digest != journal.final_digest {
        return Err(VerifyError::FinalDigestMismatch {
            expected: journal.final_digest,
            actual: final_digest,
        });
    }
    if session.phase().as_str() != journal.final_phase {
        return Err(VerifyError::FinalPhaseMismatch {
            expected: journal.final_phase.clone(),
            actual: session.phase(),
        });
    }

    Ok(session)
}

/// Hex SHA-256 of the encoded journal.
pub fn journal_sha256(journal: &SessionJournal) -> String {
    let mut hasher = Sha256::new();
    hasher.update(journal.encode_to_vec());
    format!("{:x}", hasher.finalize())
}

// ============================================================================
// Journal I/O
// ============================================================================

/// Write a journal to a new file.
///
/// Fails with `AlreadyExists` if `path` exists; the check and the create are
/// one operation.
pub fn write_journal(journal: &SessionJournal, path: &Path) -> io::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }

    fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(path)?
        .write_all(&journal.encode_to_vec())
}

/// Read a journal written by [`write_journal`].
pub fn read_journal(path: &Path) -> io::Result<SessionJournal> {
    let data = fs::read(path)?;
    SessionJournal::decode(data.as_slice())
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
}

// ============================================================================
// Tests
// ============================================================================
