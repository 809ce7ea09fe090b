//! Self-termination after a period without accepted jobs.
//!
//! The runner is billed while it is alive, so it exits on its own once no job
//! request has been accepted for `idle_timeout`. Activity is recorded when a job
//! is accepted, not when it finishes: a job that runs longer than the timeout can
//! be cut off if nothing else arrives. Termination is immediate and does not
//! drain in-flight jobs.

use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Mutex, PoisonError,
    },
    time::Duration,
};

use tokio::{
    task::JoinHandle,
    time::{Instant, MissedTickBehavior},
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Invoked once with the observed idle duration when the timeout is reached.
pub type Terminator = Arc<dyn Fn(Duration) + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdleState {
    Disabled,
    Active { remaining: Duration },
    Idle { idle_for: Duration },
}

pub struct IdleGuard {
    idle_timeout: Option<Duration>,
    check_interval: Duration,
    last_activity: Mutex<Instant>,
    running: AtomicBool,
    cancel: CancellationToken,
    terminator: Terminator,
}

impl std::fmt::Debug for IdleGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IdleGuard")
            .field("idle_timeout", &self.idle_timeout)
            .field("check_interval", &self.check_interval)
            .field("running", &self.is_running())
            .finish_non_exhaustive()
    }
}

impl IdleGuard {
    /// `idle_timeout` of `None` disables the guard; it will never start.
    pub fn new(idle_timeout: Option<Duration>, check_interval: Duration) -> Self {
        Self {
            idle_timeout: idle_timeout.filter(|timeout| !timeout.is_zero()),
            check_interval,
            last_activity: Mutex::new(Instant::now()),
            running: AtomicBool::new(false),
            cancel: CancellationToken::new(),
            terminator: Arc::new(|_| std::process::exit(0)),
        }
    }

    /// Replace the process exit with a custom action.
    #[must_use]
    pub fn with_terminator(mut self, terminator: Terminator) -> Self {
        self.terminator = terminator;
        self
    }

    pub fn idle_timeout(&self) -> Option<Duration> {
        self.idle_timeout
    }

    pub fn is_enabled(&self) -> bool {
        self.idle_timeout.is_some()
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Reset the idle window. Called once per accepted job request.
    pub fn record_activity(&self) {
        let now = Instant::now();
        let mut last = self
            .last_activity
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if now > *last {
            *last = now;
        }
        debug!("idle window reset");
    }

    pub fn idle_for(&self) -> Duration {
        let last = *self
            .last_activity
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        Instant::now().saturating_duration_since(last)
    }

    pub fn state(&self) -> IdleState {
        let Some(timeout) = self.idle_timeout else {
            return IdleState::Disabled;
        };

        let idle_for = self.idle_for();
        if idle_for >= timeout {
            IdleState::Idle { idle_for }
        } else {
            IdleState::Active {
                remaining: timeout.saturating_sub(idle_for),
            }
        }
    }

    /// Spawn the periodic monitor. Returns `None` when the guard is disabled or
    /// already running.
    pub fn start(self: &Arc<Self>) -> Option<JoinHandle<()>> {
        let Some(timeout) = self.idle_timeout else {
            info!("idle guard disabled; runner will not self-terminate");
            return None;
        };

        if self.running.swap(true, Ordering::SeqCst) {
            return None;
        }

        info!(
            idle_timeout_secs = timeout.as_secs(),
            check_interval_secs = self.check_interval.as_secs(),
            "idle monitoring started"
        );

        let guard = Arc::clone(self);
        Some(tokio::spawn(async move { guard.monitor().await }))
    }

    /// Ask the monitor to exit at its next await point.
    pub fn stop(&self) {
        self.cancel.cancel();
    }

    async fn monitor(self: Arc<Self>) {
        let mut ticker = tokio::time::interval(self.check_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                () = self.cancel.cancelled() => {
                    info!("idle monitoring stopped");
                    break;
                }
                _ = ticker.tick() => match self.state() {
                    IdleState::Idle { idle_for } => {
                        warn!(
                            idle_secs = idle_for.as_secs(),
                            "idle timeout reached; terminating runner without draining in-flight jobs"
                        );
                        (self.terminator)(idle_for);
                        break;
                    }
                    IdleState::Active { remaining } => {
                        debug!(remaining_secs = remaining.as_secs(), "idle check");
                    }
                    IdleState::Disabled => break,
                },
            }
        }

        self.running.store(false, Ordering::SeqCst);
    }
}
