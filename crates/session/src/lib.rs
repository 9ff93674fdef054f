//! Pairup Session Core
//!
//! This crate contains the deterministic matchmaking session state machine.
//! It is the single source of truth for what the matchmaking UI shows.
//!
//! # Architecture Constraints
//!
//! The Session Core MUST NOT:
//! - Perform I/O operations (network, timers, files)
//! - Read wall-clock time
//! - Spawn tasks or hold handles to running work
//!
//! Every asynchronous source (user input, queue client resolutions, timer
//! ticks) is delivered to [`MatchmakingSession::apply`] as an [`Event`] by the
//! controller. The session answers with the [`Effect`]s the controller must
//! perform. Applying the same event sequence to a fresh session always
//! produces the same states and the same [`MatchmakingSession::state_digest`].
//!
//! # Ticket identity
//!
//! Each search is stamped with a fresh [`Ticket`]. Join resolutions and timer
//! ticks carry the ticket they were issued for; anything that arrives for a
//! ticket other than the pending one is stale and is ignored.

#![deny(unsafe_code)]

use std::fmt;
use std::str::FromStr;

// ============================================================================
// Type Aliases
// ============================================================================

/// Monotonic stamp carried by a [`Ticket`].
pub type Generation = u64;

/// Whole seconds spent searching.
pub type ElapsedSeconds = u64;

// ============================================================================
// Difficulty
// ============================================================================

/// Difficulty tier of the practice question the pair will attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Difficulty {
    #[default]
    Easy,
    Medium,
    Hard,
}

impl Difficulty {
    /// All tiers in ascending order.
    pub const ALL: [Difficulty; 3] = [Self::Easy, Self::Medium, Self::Hard];

    pub fn label(&self) -> &'static str {
        match self {
            Self::Easy => "Easy",
            Self::Medium => "Medium",
            Self::Hard => "Hard",
        }
    }

    /// Number of rating glyphs shown next to the tier.
    pub fn stars(&self) -> u8 {
        match self {
            Self::Easy => 1,
            Self::Medium => 2,
            Self::Hard => 3,
        }
    }

    fn digest_code(self) -> u8 {
        self.stars()
    }
}

impl fmt::Display for Difficulty {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Returned when a difficulty label is not one of Easy, Medium or Hard.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown difficulty `{0}`")]
pub struct ParseDifficultyError(pub String);

impl FromStr for Difficulty {
    type Err = ParseDifficultyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|d| d.label().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| ParseDifficultyError(s.to_string()))
    }
}

// ============================================================================
// Phase & Presentation
// ============================================================================

/// Discrete state of a matchmaking session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Phase {
    #[default]
    Idle,
    Searching,
    Minimized,
    Matched,
    Cancelled,
}

impl Phase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Searching => "searching",
            Self::Minimized => "minimized",
            Self::Matched => "matched",
            Self::Cancelled => "cancelled",
        }
    }

    /// A search is outstanding: the join is in flight and the timer runs.
    pub fn is_searching(&self) -> bool {
        matches!(self, Self::Searching | Self::Minimized)
    }

    /// Phases in which the session holds a ticket.
    pub fn holds_ticket(&self) -> bool {
        matches!(self, Self::Searching | Self::Minimized | Self::Matched)
    }

    /// Phases from which a new search may start.
    pub fn is_at_rest(&self) -> bool {
        matches!(self, Self::Idle | Self::Cancelled)
    }

    fn digest_code(self) -> u8 {
        match self {
            Self::Idle => 0,
            Self::Searching => 1,
            Self::Minimized => 2,
            Self::Matched => 3,
            Self::Cancelled => 4,
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What the renderer shows. Exactly one mode is active at any instant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PresentationMode {
    Hidden,
    FullScreen,
    MinimizedBar,
    SuccessOverlay,
}

/// Derive the presentation mode from the phase alone.
pub fn presentation_mode(phase: Phase) -> PresentationMode {
    match phase {
        Phase::Idle | Phase::Cancelled => PresentationMode::Hidden,
        Phase::Searching => PresentationMode::FullScreen,
        Phase::Minimized => PresentationMode::MinimizedBar,
        Phase::Matched => PresentationMode::SuccessOverlay,
    }
}

/// Format elapsed seconds as `mm:ss` for the searching screen and status bar.
///
/// Minutes are not wrapped into hours: 3725 seconds renders as `62:05`.
pub fn format_elapsed(seconds: ElapsedSeconds) -> String {
    format!("{:02}:{:02}", seconds / 60, seconds % 60)
}

// ============================================================================
// Tickets
// ============================================================================

/// Opaque handle identifying one join request.
///
/// Tickets are generation-stamped: a session never hands out the same ticket
/// twice, so a resolution for an abandoned search can be recognized by
/// comparing tickets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Ticket(Generation);

impl Ticket {
    /// Rebuild a ticket from its raw generation (journal decoding).
    pub fn from_generation(generation: Generation) -> Self {
        Self(generation)
    }

    pub fn generation(&self) -> Generation {
        self.0
    }
}

impl fmt::Display for Ticket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Hands out tickets with strictly increasing generations, starting at 1.
#[derive(Debug, Clone)]
pub struct TicketAllocator {
    next: Generation,
}

impl TicketAllocator {
    pub fn new() -> Self {
        Self { next: 1 }
    }

    pub fn allocate(&mut self) -> Ticket {
        let ticket = Ticket(self.next);
        self.next += 1;
        ticket
    }

    /// Generation the next allocated ticket will carry.
    pub fn peek_next(&self) -> Generation {
        self.next
    }
}

impl Default for TicketAllocator {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// Errors
// ============================================================================

/// Failure reported by the remote matching service or the path to it.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum QueueError {
    /// The service could not be reached.
    #[error("matching service unreachable: {0}")]
    Network(String),
    /// The service answered and refused the request.
    #[error("matching service rejected the request: {0}")]
    Rejected(String),
    /// The service did not answer in time.
    #[error("matching service timed out")]
    Timeout,
    /// The service answered with something that could not be understood.
    #[error("malformed response from matching service: {0}")]
    Protocol(String),
}

/// Which remote operation a reported [`QueueError`] came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QueueOperation {
    Join,
    Cancel,
}

impl QueueOperation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Join => "join",
            Self::Cancel => "cancel",
        }
    }
}

/// An operation was invoked from a phase that does not permit it.
///
/// This is a contract violation by the caller, not a runtime condition. The
/// session is left untouched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("cannot {operation} while {phase}")]
pub struct InvalidTransition {
    pub operation: &'static str,
    pub phase: Phase,
}

// ============================================================================
// Events & Effects
// ============================================================================

/// Input to the state machine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    StartSearch(Difficulty),
    Minimize,
    Maximize,
    Cancel,
    JoinSucceeded(Ticket),
    JoinFailed(Ticket, QueueError),
    CancelFailed(Ticket, QueueError),
    Tick(Ticket),
    DismissSuccess,
    /// Unmount or explicit restart.
    Reset,
}

impl Event {
    pub fn name(&self) -> &'static str {
        match self {
            Self::StartSearch(_) => "start_search",
            Self::Minimize => "minimize",
            Self::Maximize => "maximize",
            Self::Cancel => "cancel",
            Self::JoinSucceeded(_) => "join_succeeded",
            Self::JoinFailed(..) => "join_failed",
            Self::CancelFailed(..) => "cancel_failed",
            Self::Tick(_) => "tick",
            Self::DismissSuccess => "dismiss_success",
            Self::Reset => "reset",
        }
    }

    /// Ticket the event refers to, for events produced by async sources.
    pub fn ticket(&self) -> Option<Ticket> {
        match self {
            Self::JoinSucceeded(t)
            | Self::JoinFailed(t, _)
            | Self::CancelFailed(t, _)
            | Self::Tick(t) => Some(*t),
            _ => None,
        }
    }
}

/// Work the controller must perform after an event was applied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Effect {
    IssueJoin { ticket: Ticket, difficulty: Difficulty },
    IssueCancel { ticket: Ticket },
    StartTimer { ticket: Ticket },
    StopTimer,
    Report { operation: QueueOperation, error: QueueError },
}

/// Result of an event the session acted on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Outcome {
    pub from: Phase,
    pub to: Phase,
    pub effects: Vec<Effect>,
}

impl Outcome {
    fn new(from: Phase, to: Phase) -> Self {
        Self {
            from,
            to,
            effects: Vec::new(),
        }
    }

    fn with(mut self, effect: Effect) -> Self {
        self.effects.push(effect);
        self
    }

    /// Whether the phase changed.
    pub fn is_transition(&self) -> bool {
        self.from != self.to
    }
}

/// Why an async event had no effect.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IgnoreReason {
    /// The event belongs to a ticket that is no longer pending.
    StaleTicket { ticket: Ticket },
    /// The ticket is current but no search is outstanding (e.g. already matched).
    NotSearching { phase: Phase },
}

/// How the session handled an event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Applied {
    Changed(Outcome),
    Ignored(IgnoreReason),
}

impl Applied {
    pub fn effects(&self) -> &[Effect] {
        match self {
            Self::Changed(outcome) => &outcome.effects,
            Self::Ignored(_) => &[],
        }
    }

    pub fn is_ignored(&self) -> bool {
        matches!(self, Self::Ignored(_))
    }
}

// ============================================================================
// StateDigest
// ============================================================================

/// StateDigest algorithm identifier, recorded in journals.
pub const STATE_DIGEST_ALGO_ID: &str = "sessiondigest-v1-fnv1a64-le";

const FNV1A_OFFSET_BASIS: u64 = 0xcbf29ce484222325;
const FNV1A_PRIME: u64 = 0x100000001b3;

/// Folds session fields into an FNV-1a 64 hash, integers little-endian.
#[derive(Debug, Clone, Copy)]
struct DigestWriter(u64);

impl DigestWriter {
    fn new() -> Self {
        Self(FNV1A_OFFSET_BASIS)
    }

    fn byte(self, byte: u8) -> Self {
        Self((self.0 ^ u64::from(byte)).wrapping_mul(FNV1A_PRIME))
    }

    fn word(self, value: u64) -> Self {
        value.to_le_bytes().into_iter().fold(self, Self::byte)
    }
}

// ============================================================================
// Session
// ============================================================================

/// Read-only copy of the session for the presentation layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionSnapshot {
    pub phase: Phase,
    pub difficulty: Difficulty,
    pub elapsed_seconds: ElapsedSeconds,
    pub presentation: PresentationMode,
    pub pending_ticket: Option<Ticket>,
    /// Set when the last join failed; cleared by the next search or reset.
    pub last_error: Option<QueueError>,
}

/// The sole stateful matchmaking entity.
///
/// Invariant: `pending_ticket.is_some() == phase.holds_ticket()`.
#[derive(Debug, Clone, Default)]
pub struct MatchmakingSession {
    phase: Phase,
    difficulty: Difficulty,
    elapsed_seconds: ElapsedSeconds,
    pending_ticket: Option<Ticket>,
    last_error: Option<QueueError>,
    tickets: TicketAllocator,
}

impl MatchmakingSession {
    /// Create a session in `Idle`.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn difficulty(&self) -> Difficulty {
        self.difficulty
    }

    pub fn elapsed_seconds(&self) -> ElapsedSeconds {
        self.elapsed_seconds
    }

    pub fn pending_ticket(&self) -> Option<Ticket> {
        self.pending_ticket
    }

    pub fn last_error(&self) -> Option<&QueueError> {
        self.last_error.as_ref()
    }

    pub fn presentation(&self) -> PresentationMode {
        presentation_mode(self.phase)
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            phase: self.phase,
            difficulty: self.difficulty,
            elapsed_seconds: self.elapsed_seconds,
            presentation: self.presentation(),
            pending_ticket: self.pending_ticket,
            last_error: self.last_error.clone(),
        }
    }

    /// Whether the ticket/phase invariant holds.
    pub fn is_consistent(&self) -> bool {
        self.pending_ticket.is_some() == self.phase.holds_ticket()
    }

    /// Apply one event.
    ///
    /// Returns `Err` only for user operations invoked from a phase that does
    /// not permit them; the session is unchanged in that case. Async events
    /// (join/cancel resolutions, ticks) never fail: late or foreign ones come
    /// back as [`Applied::Ignored`].
    pub fn apply(&mut self, event: Event) -> Result<Applied, InvalidTransition> {
        match event {
            Event::StartSearch(difficulty) => self.start_search(difficulty).map(Applied::Changed),
            Event::Minimize => self.minimize().map(Applied::Changed),
            Event::Maximize => self.maximize().map(Applied::Changed),
            Event::Cancel => self.cancel().map(Applied::Changed),
            Event::DismissSuccess => self.dismiss_success().map(Applied::Changed),
            Event::Reset => Ok(Applied::Changed(self.reset())),
            Event::JoinSucceeded(ticket) => Ok(self.join_succeeded(ticket)),
            Event::JoinFailed(ticket, error) => Ok(self.join_failed(ticket, error)),
            Event::CancelFailed(ticket, error) => Ok(self.cancel_failed(ticket, error)),
            Event::Tick(ticket) => Ok(self.tick(ticket)),
        }
    }

    /// `Idle | Cancelled → Searching`.
    pub fn start_search(&mut self, difficulty: Difficulty) -> Result<Outcome, InvalidTransition> {
        let from = self.require("start a search", Phase::is_at_rest)?;

        let ticket = self.tickets.allocate();
        self.phase = Phase::Searching;
        self.difficulty = difficulty;
        self.elapsed_seconds = 0;
        self.pending_ticket = Some(ticket);
        self.last_error = None;

        Ok(Outcome::new(from, self.phase)
            .with(Effect::IssueJoin { ticket, difficulty })
            .with(Effect::StartTimer { ticket }))
    }

    /// `Searching → Minimized`. View change only.
    pub fn minimize(&mut self) -> Result<Outcome, InvalidTransition> {
        let from = self.require("minimize", |p| *p == Phase::Searching)?;
        self.phase = Phase::Minimized;
        Ok(Outcome::new(from, self.phase))
    }

    /// `Minimized → Searching`. View change only.
    pub fn maximize(&mut self) -> Result<Outcome, InvalidTransition> {
        let from = self.require("maximize", |p| *p == Phase::Minimized)?;
        self.phase = Phase::Searching;
        Ok(Outcome::new(from, self.phase))
    }

    /// `Searching | Minimized → Cancelled`.
    ///
    /// Local state is cleared immediately; the remote cancel is an effect.
    /// A second cancel finds the session at rest and fails without effects,
    /// so at most one remote cancel is issued per ticket.
    pub fn cancel(&mut self) -> Result<Outcome, InvalidTransition> {
        let from = self.require("cancel", Phase::is_searching)?;
        let ticket = self.clear(Phase::Cancelled);
        let mut outcome = Outcome::new(from, self.phase).with(Effect::StopTimer);
        if let Some(ticket) = ticket {
            outcome = outcome.with(Effect::IssueCancel { ticket });
        }
        Ok(outcome)
    }

    /// `Matched → Idle`.
    pub fn dismiss_success(&mut self) -> Result<Outcome, InvalidTransition> {
        let from = self.require("dismiss the match", |p| *p == Phase::Matched)?;
        self.clear(Phase::Idle);
        Ok(Outcome::new(from, self.phase))
    }

    /// `* → Idle`. An outstanding search is cancelled remotely.
    pub fn reset(&mut self) -> Outcome {
        let from = self.phase;
        let ticket = self.clear(Phase::Idle);
        self.last_error = None;

        let mut outcome = Outcome::new(from, self.phase);
        if from.is_searching() {
            outcome = outcome.with(Effect::StopTimer);
            if let Some(ticket) = ticket {
                outcome = outcome.with(Effect::IssueCancel { ticket });
            }
        }
        outcome
    }

    /// The join for `ticket` resolved successfully.
    pub fn join_succeeded(&mut self, ticket: Ticket) -> Applied {
        let from = match self.check_current(ticket) {
            Ok(from) => from,
            Err(reason) => return Applied::Ignored(reason),
        };
        self.phase = Phase::Matched;
        Applied::Changed(Outcome::new(from, self.phase).with(Effect::StopTimer))
    }

    /// The join for `ticket` failed: back to `Idle` with the error kept.
    pub fn join_failed(&mut self, ticket: Ticket, error: QueueError) -> Applied {
        let from = match self.check_current(ticket) {
            Ok(from) => from,
            Err(reason) => return Applied::Ignored(reason),
        };
        self.clear(Phase::Idle);
        self.last_error = Some(error.clone());
        Applied::Changed(
            Outcome::new(from, self.phase)
                .with(Effect::StopTimer)
                .with(Effect::Report {
                    operation: QueueOperation::Join,
                    error,
                }),
        )
    }

    /// A remote cancel failed. Reported only: the local cancel stands.
    pub fn cancel_failed(&self, _ticket: Ticket, error: QueueError) -> Applied {
        Applied::Changed(Outcome::new(self.phase, self.phase).with(Effect::Report {
            operation: QueueOperation::Cancel,
            error,
        }))
    }

    /// One timer period elapsed for `ticket`.
    pub fn tick(&mut self, ticket: Ticket) -> Applied {
        let phase = match self.check_current(ticket) {
            Ok(phase) => phase,
            Err(reason) => return Applied::Ignored(reason),
        };
        self.elapsed_seconds += 1;
        Applied::Changed(Outcome::new(phase, phase))
    }

    /// Compute the StateDigest for the current session state.
    ///
    /// Covers phase, difficulty, elapsed seconds, pending ticket, presence of
    /// an error and the next ticket generation, all little-endian.
    pub fn state_digest(&self) -> u64 {
        DigestWriter::new()
            .byte(self.phase.digest_code())
            .byte(self.difficulty.digest_code())
            .word(self.elapsed_seconds)
            .word(self.pending_ticket.map_or(0, |t| t.generation()))
            .byte(u8::from(self.last_error.is_some()))
            .word(self.tickets.peek_next())
            .0
    }

    // ========================================================================
    // Internal Methods
    // ========================================================================

    fn require(
        &self,
        operation: &'static str,
        allowed: impl Fn(&Phase) -> bool,
    ) -> Result<Phase, InvalidTransition> {
        if allowed(&self.phase) {
            Ok(self.phase)
        } else {
            Err(InvalidTransition {
                operation,
                phase: self.phase,
            })
        }
    }

    /// Ok(phase) if `ticket` is pending and a search is outstanding.
    fn check_current(&self, ticket: Ticket) -> Result<Phase, IgnoreReason> {
        if self.pending_ticket != Some(ticket) {
            return Err(IgnoreReason::StaleTicket { ticket });
        }
        if !self.phase.is_searching() {
            return Err(IgnoreReason::NotSearching { phase: self.phase });
        }
        Ok(self.phase)
    }

    /// Clear all session fields and move to a resting phase.
    /// Returns the ticket that was pending.
    fn clear(&mut self, phase: Phase) -> Option<Ticket> {
        debug_assert!(phase.is_at_rest());
        self.phase = phase;
        self.difficulty = Difficulty::default();
        self.elapsed_seconds = 0;
        self.pending_ticket.take()
    }
}

// ============================================================================
// Tests
// ============================================================================
