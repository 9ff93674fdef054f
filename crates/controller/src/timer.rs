//! Restartable elapsed-time ticker.
//!
//! One tokio task per running timer. Every period it posts a
//! [`ControllerEvent::Tick`] stamped with the ticket it was started for, so
//! ticks that were already queued when the timer stopped are recognized as
//! stale by the session and discarded.

use std::time::Duration;

use pairup_session::Ticket;
use tokio::runtime::Handle;
use tokio::sync::mpsc::UnboundedSender;
use tokio::task::JoinHandle;
use tokio::time::{self, Instant};
use tracing::{debug, warn};

use crate::ControllerEvent;

struct Running {
    ticket: Ticket,
    handle: JoinHandle<()>,
}

/// At most one tick stream exists per timer.
pub struct ElapsedTimer {
    period: Duration,
    running: Option<Running>,
}

impl ElapsedTimer {
    pub fn new(period: Duration) -> Self {
        Self {
            period,
            running: None,
        }
    }

    /// Start ticking for `ticket`, replacing any existing stream.
    ///
    /// The first tick arrives one full period after the call. Outside a
    /// tokio runtime the timer stays stopped.
    pub fn start(&mut self, ticket: Ticket, events: UnboundedSender<ControllerEvent>) {
        self.stop();

        let Ok(runtime) = Handle::try_current() else {
            warn!(%ticket, "no tokio runtime, timer not started");
            return;
        };

        let period = self.period;
        let handle = runtime.spawn(async move {
            let mut interval = time::interval_at(Instant::now() + period, period);
            loop {
                interval.tick().await;
                if events.send(ControllerEvent::Tick { ticket }).is_err() {
                    break;
                }
            }
        });

        debug!(%ticket, ?period, "timer started");
        self.running = Some(Running { ticket, handle });
    }

    /// Stop ticking. Returns false if the timer was not running.
    pub fn stop(&mut self) -> bool {
        match self.running.take() {
            Some(running) => {
                running.handle.abort();
                debug!(ticket = %running.ticket, "timer stopped");
                true
            }
            None => false,
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.is_some()
    }

    /// Ticket the current stream is stamped with.
    pub fn ticket(&self) -> Option<Ticket> {
        self.running.as_ref().map(|r| r.ticket)
    }
}

impl Drop for ElapsedTimer {
    fn drop(&mut self) {
        self.stop();
    }
}
