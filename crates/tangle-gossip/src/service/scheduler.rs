//! Fixed-delay periodic tasks.
//!
//! A tick runs immediately, then again `delay` after the previous tick
//! finished (or earlier when the optional wakeup fires). Errors and panics
//! inside a tick are logged and never end the schedule.
//!
//! Tick bodies are synchronous store work. They run on tokio's blocking
//! pool so a long solidity walk never holds up a runtime worker that is
//! serving sockets.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{watch, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

use crate::events::GossipError;

/// Handle to a spawned background task.
pub struct ScheduledTask {
    name: &'static str,
    handle: JoinHandle<()>,
}

impl ScheduledTask {
    /// Wraps an already spawned task.
    pub fn from_handle(name: &'static str, handle: JoinHandle<()>) -> Self {
        Self { name, handle }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Waits up to `grace` for the task to stop, then aborts it.
    ///
    /// The shutdown signal must have been sent already.
    pub async fn join(self, grace: Duration) {
        let abort = self.handle.abort_handle();
        match tokio::time::timeout(grace, self.handle).await {
            Ok(Ok(())) => debug!(task = self.name, "stopped"),
            Ok(Err(e)) => error!(task = self.name, error = %e, "task ended abnormally"),
            Err(_) => {
                warn!(task = self.name, "did not stop within grace period, aborting");
                abort.abort();
            }
        }
    }
}

/// Resolves once shutdown is signalled or the sender is gone.
pub async fn shutdown_signalled(shutdown: &mut watch::Receiver<bool>) {
    while !*shutdown.borrow_and_update() {
        if shutdown.changed().await.is_err() {
            return;
        }
    }
}

/// Spawns `tick` on a fixed-delay schedule.
pub fn spawn_periodic<F>(
    name: &'static str,
    delay: Duration,
    wakeup: Option<Arc<Notify>>,
    mut shutdown: watch::Receiver<bool>,
    tick: F,
) -> ScheduledTask
where
    F: Fn() -> Result<(), GossipError> + Send + Sync + 'static,
{
    let tick = Arc::new(tick);
    let handle = tokio::spawn(async move {
        debug!(task = name, ?delay, "started");
        loop {
            if *shutdown.borrow() {
                break;
            }

            let body = tick.clone();
            match tokio::task::spawn_blocking(move || body()).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => error!(task = name, error = %e, "tick failed"),
                Err(e) if e.is_panic() => error!(task = name, "tick panicked"),
                Err(e) => error!(task = name, error = %e, "tick cancelled"),
            }

            tokio::select! {
                _ = shutdown_signalled(&mut shutdown) => break,
                _ = tokio::time::sleep(delay) => {}
                _ = notified(wakeup.as_deref()) => {}
            }
        }
        debug!(task = name, "shutting down");
    });
    ScheduledTask { name, handle }
}

async fn notified(wakeup: Option<&Notify>) {
    match wakeup {
        Some(notify) => notify.notified().await,
        None => std::future::pending().await,
    }
}
