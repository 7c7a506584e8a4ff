//! Periodic task scheduler
//!
//! Each task runs on its own tokio task with a fixed interval. `stop()`
//! cancels the shared token and waits for every loop to exit; a tick that
//! has already started runs to completion first.

use async_trait::async_trait;
use credits_core::{AppError, AppResult};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Unit of periodic work
#[async_trait]
pub trait PeriodicTask: Send + Sync {
    /// Task name for logs
    fn name(&self) -> &'static str;

    /// One pass over the task's work
    async fn tick(&self) -> AppResult<()>;
}

/// Owner of the periodic sweeps
pub struct Scheduler {
    cancel: CancellationToken,
    handles: Mutex<Vec<(&'static str, JoinHandle<()>)>>,
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl Scheduler {
    pub fn new() -> Self {
        Self {
            cancel: CancellationToken::new(),
            handles: Mutex::new(Vec::new()),
        }
    }

    /// Run `task` every `period` until the scheduler is stopped
    ///
    /// The first tick fires immediately. Missed ticks are skipped rather
    /// than bursted.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` for a zero `period`; nothing is spawned.
    pub fn spawn(&self, task: Arc<dyn PeriodicTask>, period: Duration) -> AppResult<()> {
        let name = task.name();
        if period.is_zero() {
            return Err(AppError::Config(format!(
                "{} interval must be greater than zero",
                name
            )));
        }
        let cancel = self.cancel.child_token();

        let handle = tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
            info!("{} loop started (every {:?})", name, period);

            loop {
                tokio::select! {
                    _ = cancel.cancelled() => {
                        info!("{} loop shutting down", name);
                        break;
                    }
                    _ = interval.tick() => {
                        debug!("{} tick", name);
                        if let Err(e) = task.tick().await {
                            if e.is_retryable() {
                                warn!("{} tick failed, retrying next tick: {}", name, e);
                            } else {
                                error!("{} tick failed: {}", name, e);
                            }
                        }
                    }
                }
            }
        });

        self.handles.lock().push((name, handle));
        Ok(())
    }

    /// Cancel every loop and wait for them to finish
    pub async fn stop(&self) {
        self.cancel.cancel();
        let handles: Vec<_> = self.handles.lock().drain(..).collect();
        for (name, handle) in handles {
            if let Err(e) = handle.await {
                error!("{} loop ended abnormally: {}", name, e);
            }
        }
        info!("Scheduler stopped");
    }

    pub fn is_stopped(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Number of loops still owned by the scheduler
    pub fn task_count(&self) -> usize {
        self.handles.lock().len()
    }
}
