//! Pairup Matchmaking Controller
//!
//! The controller mediates between the presentation layer, the remote
//! matching service and the elapsed-time ticker. It owns:
//! - The `MatchmakingSession` (the only copy; nothing else mutates it)
//! - The Queue Client and every join/cancel future issued through it
//! - The Elapsed Timer
//! - The session journal
//!
//! # Scheduling
//!
//! Three sources feed the controller: user callbacks, queue client
//! resolutions and timer ticks. Callbacks are applied as they are invoked.
//! Resolutions and ticks are posted by background tasks into one unbounded
//! queue and applied one at a time, in arrival order, by
//! [`Controller::next_event`] or [`Controller::drain`]. Nothing is applied
//! concurrently.
//!
//! Because a resolution may sit in the queue while the user cancels, every
//! async event carries the `Ticket` it was issued for. The session drops
//! events whose ticket is no longer pending, so a cancel the controller has
//! observed always beats a join resolution it has not yet applied.
//!
//! Join and cancel requests run as tokio tasks. Outside a runtime they are
//! not issued; they resolve immediately as `QueueError::Network` instead, so
//! callbacks never panic.
//!
//! Dropping the controller unmounts it: an outstanding search is cancelled
//! remotely.

#![deny(unsafe_code)]

pub mod client;
pub mod remote;
pub mod timer;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use pairup_journal::JournalRecorder;
use pairup_session::{
    Applied, Difficulty, Effect, Event, MatchmakingSession, QueueError, QueueOperation,
    SessionSnapshot, Ticket,
};
use pairup_wire::SessionJournal;
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use client::{CancelAck, JoinAccepted, QueueClient};
use timer::ElapsedTimer;

// ============================================================================
// Parameters
// ============================================================================

/// Elapsed-time cadence.
pub const TICK_PERIOD: Duration = Duration::from_secs(1);

/// Capacity of the notice channel handed to the presentation layer.
pub const NOTICE_CHANNEL_CAPACITY: usize = 64;

/// Whether controllers journal applied events by default.
///
/// Every tick is an entry, so a journal grows for as long as a search runs.
/// Enable it for diagnostics and tests.
pub const JOURNAL_ENABLED: bool = false;

/// Controller configuration.
#[derive(Debug, Clone)]
pub struct ControllerConfig {
    pub tick_period: Duration,
    pub notice_channel_capacity: usize,
    pub journal_enabled: bool,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            tick_period: TICK_PERIOD,
            notice_channel_capacity: NOTICE_CHANNEL_CAPACITY,
            journal_enabled: JOURNAL_ENABLED,
        }
    }
}

// ============================================================================
// Events & Notices
// ============================================================================

/// Event posted by a background task into the controller queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControllerEvent {
    JoinResolved {
        ticket: Ticket,
        result: Result<JoinAccepted, QueueError>,
    },
    CancelResolved {
        ticket: Ticket,
        result: Result<CancelAck, QueueError>,
    },
    Tick {
        ticket: Ticket,
    },
}

/// Transient notification for the presentation layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notice {
    /// A partner was found.
    Matched(JoinAccepted),
    /// The join failed; the session is back at rest.
    JoinFailed(QueueError),
    /// The remote cancel failed; the local cancel stands.
    CancelFailed(QueueError),
}

struct InFlight {
    ticket: Ticket,
    handle: JoinHandle<()>,
}

// ============================================================================
// Controller
// ============================================================================

/// Matchmaking session controller.
pub struct Controller {
    session: MatchmakingSession,
    client: Arc<dyn QueueClient>,
    timer: ElapsedTimer,
    events_tx: mpsc::UnboundedSender<ControllerEvent>,
    events_rx: mpsc::UnboundedReceiver<ControllerEvent>,
    notices: mpsc::Sender<Notice>,
    /// The one outstanding join, if any.
    join: Option<InFlight>,
    /// Remote cancels awaiting acknowledgment, by ticket.
    cancels: HashMap<Ticket, JoinHandle<()>>,
    /// Details of the current match while the success overlay is shown.
    matched: Option<JoinAccepted>,
    recorder: Option<JournalRecorder>,
}

impl Controller {
    /// Create a controller with an `Idle` session.
    ///
    /// Returns the controller and the receiving end of its notice channel.
    pub fn new(
        client: Arc<dyn QueueClient>,
        config: ControllerConfig,
    ) -> (Self, mpsc::Receiver<Notice>) {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (notices, notices_rx) = mpsc::channel(config.notice_channel_capacity.max(1));

        let controller = Self {
            session: MatchmakingSession::new(),
            client,
            timer: ElapsedTimer::new(config.tick_period),
            events_tx,
            events_rx,
            notices,
            join: None,
            cancels: HashMap::new(),
            matched: None,
            recorder: config.journal_enabled.then(JournalRecorder::new),
        };
        (controller, notices_rx)
    }

    // ========================================================================
    // Presentation-facing surface
    // ========================================================================

    pub fn on_start_search(&mut self, difficulty: Difficulty) {
        self.dispatch(Event::StartSearch(difficulty));
    }

    pub fn on_cancel(&mut self) {
        self.dispatch(Event::Cancel);
    }

    pub fn on_minimize(&mut self) {
        self.dispatch(Event::Minimize);
    }

    pub fn on_maximize(&mut self) {
        self.dispatch(Event::Maximize);
    }

    pub fn on_dismiss_success(&mut self) {
        if self.dispatch(Event::DismissSuccess).is_some() {
            self.matched = None;
        }
    }

    /// Tear down: reset the session, cancel an outstanding search remotely
    /// and abandon the pending join.
    pub fn unmount(&mut self) {
        self.dispatch(Event::Reset);
        self.matched = None;
        if let Some(join) = self.join.take() {
            join.handle.abort();
        }
    }

    /// Read-only view of the session.
    pub fn snapshot(&self) -> SessionSnapshot {
        self.session.snapshot()
    }

    /// Details of the current match, while in `Matched`.
    pub fn matched(&self) -> Option<&JoinAccepted> {
        self.matched.as_ref()
    }

    /// Ticket of the outstanding join future, if one is running.
    pub fn join_in_flight(&self) -> Option<Ticket> {
        self.join.as_ref().map(|j| j.ticket)
    }

    /// Number of remote cancels awaiting acknowledgment.
    pub fn pending_cancels(&self) -> usize {
        self.cancels.len()
    }

    /// Number of async events waiting to be applied.
    pub fn queued_events(&self) -> usize {
        self.events_rx.len()
    }

    pub fn timer_running(&self) -> bool {
        self.timer.is_running()
    }

    /// Journal of everything applied so far, if journaling is enabled.
    pub fn journal(&self) -> Option<SessionJournal> {
        self.recorder
            .as_ref()
            .map(|recorder| recorder.to_journal(&self.session))
    }

    // ========================================================================
    // Event loop
    // ========================================================================

    /// Wait for the next queued async event and apply it.
    pub async fn next_event(&mut self) {
        if let Some(event) = self.events_rx.recv().await {
            self.handle(event);
        }
    }

    /// Apply every event already queued, without waiting. Returns how many.
    pub fn drain(&mut self) -> usize {
        let mut applied = 0;
        while let Ok(event) = self.events_rx.try_recv() {
            self.handle(event);
            applied += 1;
        }
        applied
    }

    /// Apply queued events until `done` holds for the session snapshot.
    pub async fn run_until(&mut self, done: impl Fn(&SessionSnapshot) -> bool) {
        while !done(&self.session.snapshot()) {
            self.next_event().await;
        }
    }

    /// Apply one async event.
    pub fn handle(&mut self, event: ControllerEvent) {
        match event {
            ControllerEvent::JoinResolved { ticket, result } => {
                if self.join.as_ref().is_some_and(|j| j.ticket == ticket) {
                    self.join = None;
                }
                match result {
                    Ok(accepted) => {
                        let matched = self
                            .dispatch(Event::JoinSucceeded(ticket))
                            .is_some_and(|applied| !applied.is_ignored());
                        if matched {
                            info!(%ticket, match_id = %accepted.match_id, "match found");
                            self.matched = Some(accepted.clone());
                            self.notify(Notice::Matched(accepted));
                        }
                    }
                    Err(error) => {
                        self.dispatch(Event::JoinFailed(ticket, error));
                    }
                }
            }
            ControllerEvent::CancelResolved { ticket, result } => {
                self.cancels.remove(&ticket);
                match result {
                    Ok(CancelAck) => debug!(%ticket, "cancel acknowledged"),
                    Err(error) => {
                        self.dispatch(Event::CancelFailed(ticket, error));
                    }
                }
            }
            ControllerEvent::Tick { ticket } => {
                self.dispatch(Event::Tick(ticket));
            }
        }
    }

    // ========================================================================
    // Internal Methods
    // ========================================================================

    /// Apply an event to the session and perform its effects.
    ///
    /// Invalid transitions are logged and dropped: duplicate clicks are
    /// expected and must not take the UI down.
    fn dispatch(&mut self, event: Event) -> Option<Applied> {
        let name = event.name();
        let applied = match self.session.apply(event.clone()) {
            Ok(applied) => applied,
            Err(error) => {
                debug!(event = name, %error, "invalid transition ignored");
                return None;
            }
        };

        if let Some(recorder) = self.recorder.as_mut() {
            recorder.record(&event, &applied, self.session.state_digest());
        }

        match &applied {
            Applied::Changed(outcome) => {
                if outcome.is_transition() {
                    info!(event = name, from = %outcome.from, to = %outcome.to, "phase transition");
                }
                for effect in outcome.effects.clone() {
                    self.perform(effect);
                }
            }
            Applied::Ignored(reason) => {
                debug!(event = name, ?reason, "stale event ignored");
            }
        }
        Some(applied)
    }

    fn perform(&mut self, effect: Effect) {
        match effect {
            Effect::IssueJoin { ticket, difficulty } => self.issue_join(ticket, difficulty),
            Effect::IssueCancel { ticket } => self.issue_cancel(ticket),
            Effect::StartTimer { ticket } => self.timer.start(ticket, self.events_tx.clone()),
            Effect::StopTimer => {
                self.timer.stop();
            }
            Effect::Report { operation, error } => {
                warn!(operation = operation.as_str(), %error, "queue operation failed");
                self.notify(match operation {
                    QueueOperation::Join => Notice::JoinFailed(error),
                    QueueOperation::Cancel => Notice::CancelFailed(error),
                });
            }
        }
    }

    fn issue_join(&mut self, ticket: Ticket, difficulty: Difficulty) {
        if let Some(previous) = self.join.take() {
            debug!(ticket = %previous.ticket, "abandoning superseded join");
            previous.handle.abort();
        }

        let Ok(runtime) = Handle::try_current() else {
            self.resolve_without_runtime(ControllerEvent::JoinResolved {
                ticket,
                result: Err(no_runtime()),
            });
            return;
        };

        let client = Arc::clone(&self.client);
        let events = self.events_tx.clone();
        let handle = runtime.spawn(async move {
            let result = client.join(ticket, difficulty).await;
            let _ = events.send(ControllerEvent::JoinResolved { ticket, result });
        });

        debug!(%ticket, %difficulty, "join issued");
        self.join = Some(InFlight { ticket, handle });
    }

    fn issue_cancel(&mut self, ticket: Ticket) {
        if self.cancels.contains_key(&ticket) {
            debug!(%ticket, "cancel already in flight");
            return;
        }

        let Ok(runtime) = Handle::try_current() else {
            self.resolve_without_runtime(ControllerEvent::CancelResolved {
                ticket,
                result: Err(no_runtime()),
            });
            return;
        };

        let client = Arc::clone(&self.client);
        let events = self.events_tx.clone();
        let handle = runtime.spawn(async move {
            let result = client.cancel(ticket).await;
            let _ = events.send(ControllerEvent::CancelResolved { ticket, result });
        });

        debug!(%ticket, "cancel issued");
        self.cancels.insert(ticket, handle);
    }

    /// Queue the failed resolution of a request that could not be issued.
    fn resolve_without_runtime(&self, event: ControllerEvent) {
        warn!(?event, "no tokio runtime, request not issued");
        let _ = self.events_tx.send(event);
    }

    fn notify(&self, notice: Notice) {
        if let Err(error) = self.notices.try_send(notice) {
            warn!(%error, "notice dropped");
        }
    }
}

fn no_runtime() -> QueueError {
    QueueError::Network("no async runtime".to_string())
}

impl Drop for Controller {
    fn drop(&mut self) {
        if self.session.phase().is_searching() {
            self.unmount();
        } else if let Some(join) = self.join.take() {
            join.handle.abort();
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use pairup_journal::verify_journal;
    use pairup_session::{Phase, PresentationMode};
    use tokio::task::yield_now;

    use super::*;
    use crate::client::scripted::{ScriptedQueueClient, accepted};

    fn setup() -> (Controller, mpsc::Receiver<Notice>, Arc<ScriptedQueueClient>) {
        setup_with(ControllerConfig::default())
    }

    fn setup_journaled() -> (Controller, mpsc::Receiver<Notice>, Arc<ScriptedQueueClient>) {
        setup_with(ControllerConfig {
            journal_enabled: true,
            ..Default::default()
        })
    }

    fn setup_with(
        config: ControllerConfig,
    ) -> (Controller, mpsc::Receiver<Notice>, Arc<ScriptedQueueClient>) {
        let client = Arc::new(ScriptedQueueClient::new());
        let (controller, notices) = Controller::new(client.clone(), config);
        (controller, notices, client)
    }

    /// Let background tasks run until `count` events are queued.
    async fn wait_queued(controller: &Controller, count: usize) {
        while controller.queued_events() < count {
            yield_now().await;
        }
    }

    /// Let background tasks run until the client saw `count` joins.
    async fn wait_joins(client: &ScriptedQueueClient, count: usize) {
        while client.join_calls().len() < count {
            yield_now().await;
        }
    }

    /// Scenario A.
    #[tokio::test(start_paused = true)]
    async fn test_start_search_shows_full_screen() {
        let (mut controller, _notices, client) = setup();

        controller.on_start_search(Difficulty::Medium);
        let snapshot = controller.snapshot();
        assert_eq!(snapshot.presentation, PresentationMode::FullScreen);
        assert_eq!(snapshot.difficulty, Difficulty::Medium);
        assert_eq!(snapshot.elapsed_seconds, 0);
        assert!(controller.timer_running());

        wait_joins(&client, 1).await;
        assert_eq!(client.join_calls(), vec![Difficulty::Medium]);
        assert_eq!(controller.join_in_flight(), snapshot.pending_ticket);
    }

    /// Scenario B.
    #[tokio::test(start_paused = true)]
    async fn test_ticks_then_minimize_keeps_elapsed() {
        let (mut controller, _notices, _client) = setup();
        controller.on_start_search(Difficulty::Easy);

        for _ in 0..3 {
            controller.next_event().await;
        }
        assert_eq!(controller.snapshot().elapsed_seconds, 3);

        controller.on_minimize();
        let snapshot = controller.snapshot();
        assert_eq!(snapshot.presentation, PresentationMode::MinimizedBar);
        assert_eq!(snapshot.elapsed_seconds, 3);
        assert!(controller.timer_running());

        controller.next_event().await;
        assert_eq!(controller.snapshot().elapsed_seconds, 4);
    }

    /// Scenario C.
    #[tokio::test(start_paused = true)]
    async fn test_cancel_from_minimized() {
        let (mut controller, _notices, client) = setup();
        controller.on_start_search(Difficulty::Hard);
        controller.on_minimize();

        controller.on_cancel();
        let snapshot = controller.snapshot();
        assert_eq!(snapshot.presentation, PresentationMode::Hidden);
        assert!(snapshot.pending_ticket.is_none());
        assert!(!controller.timer_running());

        wait_queued(&controller, 1).await;
        controller.drain();
        assert_eq!(client.cancel_calls(), 1);
        assert_eq!(controller.pending_cancels(), 0);
    }

    /// Scenario D.
    #[tokio::test(start_paused = true)]
    async fn test_match_then_dismiss() {
        let (mut controller, mut notices, client) = setup();
        controller.on_start_search(Difficulty::Medium);
        wait_joins(&client, 1).await;

        assert!(client.resolve_join(0, Ok(accepted("m-1"))));
        controller
            .run_until(|s| s.phase == Phase::Matched)
            .await;
        assert_eq!(controller.snapshot().presentation, PresentationMode::SuccessOverlay);
        assert_eq!(controller.matched().map(|m| m.match_id.as_str()), Some("m-1"));
        assert!(!controller.timer_running());
        assert_eq!(notices.try_recv(), Ok(Notice::Matched(accepted("m-1"))));

        controller.on_dismiss_success();
        assert_eq!(controller.snapshot().phase, Phase::Idle);
        assert!(controller.matched().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_double_cancel_issues_one_remote_cancel() {
        let (mut controller, _notices, client) = setup();
        controller.on_start_search(Difficulty::Easy);

        controller.on_cancel();
        controller.on_cancel();
        assert_eq!(controller.snapshot().phase, Phase::Cancelled);

        wait_queued(&controller, 1).await;
        for _ in 0..4 {
            yield_now().await;
        }
        controller.drain();
        assert_eq!(client.cancel_calls(), 1);
    }

    /// Race: the join resolved and sits in the queue when the user cancels.
    #[tokio::test(start_paused = true)]
    async fn test_cancel_beats_unapplied_join_resolution() {
        let (mut controller, mut notices, client) = setup();
        controller.on_start_search(Difficulty::Easy);
        wait_joins(&client, 1).await;

        assert!(client.resolve_join(0, Ok(accepted("m-late"))));
        wait_queued(&controller, 1).await;

        controller.on_cancel();
        wait_queued(&controller, 2).await;
        controller.drain();

        assert_eq!(controller.snapshot().phase, Phase::Cancelled);
        assert!(controller.matched().is_none());
        assert!(notices.try_recv().is_err());
        assert_eq!(client.cancel_calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_restart_ignores_stale_join() {
        let (mut controller, _notices, client) = setup();
        controller.on_start_search(Difficulty::Easy);
        wait_joins(&client, 1).await;
        let first = controller.snapshot().pending_ticket.unwrap();

        // First join resolves but is not applied before the restart.
        assert!(client.resolve_join(0, Ok(accepted("m-stale"))));
        wait_queued(&controller, 1).await;
        controller.on_cancel();
        controller.on_start_search(Difficulty::Hard);
        wait_joins(&client, 2).await;

        let second = controller.snapshot().pending_ticket.unwrap();
        assert_ne!(first, second);
        assert_eq!(controller.join_in_flight(), Some(second));

        controller.drain();
        let snapshot = controller.snapshot();
        assert_eq!(snapshot.phase, Phase::Searching);
        assert_eq!(snapshot.pending_ticket, Some(second));
        assert_eq!(snapshot.difficulty, Difficulty::Hard);
        assert_eq!(controller.join_in_flight(), Some(second));
        assert_eq!(client.join_calls(), vec![Difficulty::Easy, Difficulty::Hard]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_second_join_while_searching() {
        let (mut controller, _notices, client) = setup();
        controller.on_start_search(Difficulty::Easy);
        controller.on_start_search(Difficulty::Hard);
        wait_joins(&client, 1).await;
        for _ in 0..4 {
            yield_now().await;
        }

        assert_eq!(client.join_calls(), vec![Difficulty::Easy]);
        assert_eq!(controller.snapshot().difficulty, Difficulty::Easy);
    }

    #[tokio::test(start_paused = true)]
    async fn test_join_failure_returns_to_idle_with_notice() {
        let (mut controller, mut notices, client) = setup();
        controller.on_start_search(Difficulty::Easy);
        wait_joins(&client, 1).await;

        let error = QueueError::Network("unreachable".to_string());
        assert!(client.resolve_join(0, Err(error.clone())));
        controller.run_until(|s| s.phase == Phase::Idle).await;

        let snapshot = controller.snapshot();
        assert_eq!(snapshot.presentation, PresentationMode::Hidden);
        assert_eq!(snapshot.last_error, Some(error.clone()));
        assert!(!controller.timer_running());
        assert_eq!(notices.try_recv(), Ok(Notice::JoinFailed(error)));
        assert_eq!(client.join_calls().len(), 1, "no automatic retry");
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_failure_is_reported_not_rolled_back() {
        let (mut controller, mut notices, client) = setup();
        client.fail_cancels_with(QueueError::Timeout);
        controller.on_start_search(Difficulty::Easy);
        controller.on_cancel();

        wait_queued(&controller, 1).await;
        controller.drain();

        assert_eq!(controller.snapshot().phase, Phase::Cancelled);
        assert_eq!(notices.try_recv(), Ok(Notice::CancelFailed(QueueError::Timeout)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_late_tick_after_match_is_discarded() {
        let (mut controller, _notices, client) = setup();
        controller.on_start_search(Difficulty::Easy);
        wait_joins(&client, 1).await;

        assert!(client.resolve_join(0, Ok(accepted("m-2"))));
        wait_queued(&controller, 1).await;
        tokio::time::sleep(TICK_PERIOD).await;
        wait_queued(&controller, 2).await;

        controller.drain();
        let snapshot = controller.snapshot();
        assert_eq!(snapshot.phase, Phase::Matched);
        assert_eq!(snapshot.elapsed_seconds, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_invalid_callbacks_are_noops() {
        let (mut controller, _notices, client) = setup_journaled();
        controller.on_minimize();
        controller.on_maximize();
        controller.on_cancel();
        controller.on_dismiss_success();
        yield_now().await;

        assert_eq!(controller.snapshot().phase, Phase::Idle);
        assert_eq!(client.cancel_calls(), 0);
        assert_eq!(controller.journal().unwrap().entries.len(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unmount_while_searching_cancels_remotely() {
        let (mut controller, _notices, client) = setup();
        controller.on_start_search(Difficulty::Medium);
        wait_joins(&client, 1).await;

        controller.unmount();
        assert_eq!(controller.snapshot().phase, Phase::Idle);
        assert!(controller.join_in_flight().is_none());
        assert!(!controller.timer_running());

        wait_queued(&controller, 1).await;
        controller.drain();
        assert_eq!(client.cancel_calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_drop_while_searching_cancels_remotely() {
        let (mut controller, _notices, client) = setup();
        controller.on_start_search(Difficulty::Easy);
        wait_joins(&client, 1).await;
        let ticket = controller.snapshot().pending_ticket.unwrap();

        drop(controller);
        for _ in 0..8 {
            yield_now().await;
        }
        assert_eq!(client.cancel_tickets(), vec![ticket]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_drop_at_rest_issues_nothing() {
        let (mut controller, _notices, client) = setup();
        controller.on_start_search(Difficulty::Easy);
        controller.on_cancel();
        wait_queued(&controller, 1).await;
        controller.drain();

        drop(controller);
        for _ in 0..8 {
            yield_now().await;
        }
        assert_eq!(client.cancel_calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_names_the_abandoned_ticket() {
        let (mut controller, _notices, client) = setup();
        controller.on_start_search(Difficulty::Easy);
        let first = controller.snapshot().pending_ticket.unwrap();
        controller.on_cancel();
        controller.on_start_search(Difficulty::Hard);
        let second = controller.snapshot().pending_ticket.unwrap();

        wait_queued(&controller, 1).await;
        controller.drain();
        assert_eq!(client.cancel_tickets(), vec![first]);
        assert_eq!(controller.snapshot().pending_ticket, Some(second));
    }

    #[test]
    fn test_callbacks_outside_runtime_fail_the_join() {
        let (mut controller, mut notices, client) = setup();
        controller.on_start_search(Difficulty::Medium);
        assert!(controller.join_in_flight().is_none());
        assert!(!controller.timer_running());

        assert_eq!(controller.drain(), 1);
        let snapshot = controller.snapshot();
        assert_eq!(snapshot.phase, Phase::Idle);
        assert_eq!(snapshot.last_error, Some(no_runtime()));
        assert_eq!(notices.try_recv(), Ok(Notice::JoinFailed(no_runtime())));
        assert!(client.join_calls().is_empty());
    }

    #[test]
    fn test_drop_outside_runtime_does_not_panic() {
        let (mut controller, _notices, client) = setup();
        controller.on_start_search(Difficulty::Easy);
        drop(controller);
        assert_eq!(client.cancel_calls(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_journal_is_opt_in() {
        let (mut controller, _notices, _client) = setup();
        controller.on_start_search(Difficulty::Easy);
        for _ in 0..5 {
            controller.next_event().await;
        }
        assert_eq!(controller.snapshot().elapsed_seconds, 5);
        assert!(controller.journal().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_notice_overflow_drops_without_panic() {
        let client = Arc::new(ScriptedQueueClient::new());
        client.fail_cancels_with(QueueError::Timeout);
        let config = ControllerConfig {
            notice_channel_capacity: 1,
            ..Default::default()
        };
        let (mut controller, mut notices) = Controller::new(client, config);

        for _ in 0..3 {
            controller.on_start_search(Difficulty::Easy);
            controller.on_cancel();
        }
        wait_queued(&controller, 3).await;
        controller.drain();

        assert_eq!(notices.try_recv(), Ok(Notice::CancelFailed(QueueError::Timeout)));
        assert!(notices.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_journal_reproduces_controller_session() {
        let (mut controller, _notices, client) = setup_journaled();
        controller.on_start_search(Difficulty::Medium);
        controller.next_event().await;
        controller.on_minimize();
        controller.next_event().await;
        controller.on_maximize();
        wait_joins(&client, 1).await;
        assert!(client.resolve_join(0, Ok(accepted("m-3"))));
        controller.run_until(|s| s.phase == Phase::Matched).await;
        controller.on_dismiss_success();

        let journal = controller.journal().unwrap();
        let replayed = verify_journal(&journal).unwrap();
        assert_eq!(replayed.snapshot(), controller.snapshot());
    }

    /// Ticket/phase invariant under random interleavings of user actions,
    /// join resolutions and timer ticks.
    #[tokio::test(start_paused = true)]
    async fn test_random_interleavings_keep_invariants() {
        for seed in 0..25 {
            let mut rng = fastrand::Rng::with_seed(seed);
            let (mut controller, _notices, client) = setup_journaled();
            let mut resolved = 0;

            for _ in 0..40 {
                match rng.u8(..8) {
                    0 => controller.on_start_search(Difficulty::ALL[rng.usize(..3)]),
                    1 => controller.on_minimize(),
                    2 => controller.on_maximize(),
                    3 => controller.on_cancel(),
                    4 => controller.on_dismiss_success(),
                    5 => {
                        yield_now().await;
                        let joins = client.join_calls().len();
                        if resolved < joins {
                            let reply = if rng.bool() {
                                Ok(accepted("m"))
                            } else {
                                Err(QueueError::Timeout)
                            };
                            client.resolve_join(resolved, reply);
                            resolved += 1;
                        }
                    }
                    6 => tokio::time::advance(TICK_PERIOD).await,
                    _ => {
                        yield_now().await;
                        controller.drain();
                    }
                }

                let snapshot = controller.snapshot();
                assert_eq!(
                    snapshot.pending_ticket.is_some(),
                    snapshot.phase.holds_ticket(),
                    "seed {seed}: {snapshot:?}"
                );
                assert_eq!(
                    controller.timer_running(),
                    snapshot.phase.is_searching(),
                    "seed {seed}: timer out of step with {:?}",
                    snapshot.phase
                );
            }

            verify_journal(&controller.journal().unwrap()).unwrap();
        }
    }
}
