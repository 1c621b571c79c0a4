use std::future::Future;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use thiserror::Error;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerState {
    Idle,
    Running,
    Stopping,
    Stopped,
}

#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("scheduler cannot start from state {0:?}")]
    NotIdle(SchedulerState),
}

/// Runs a refresh pass on a fixed interval in a background task.
///
/// [`Scheduler::stop`] returns only once the task has exited, so nothing a
/// pass does can still be in progress afterwards.
pub struct Scheduler {
    cancel: CancellationToken,
    state: watch::Sender<SchedulerState>,
    paused: watch::Sender<bool>,
    task: Mutex<Option<JoinHandle<()>>>,
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
            state: watch::channel(SchedulerState::Idle).0,
            paused: watch::channel(false).0,
            task: Mutex::new(None),
        }
    }

    pub fn state(&self) -> SchedulerState {
        *self.state.borrow()
    }

    pub fn is_paused(&self) -> bool {
        *self.paused.borrow()
    }

    /// Spawns the refresh loop. The first pass runs immediately; each later
    /// pass waits `interval` after the previous one finished.
    pub fn start<F, Fut>(&self, interval: Duration, pass: F) -> Result<(), SchedulerError>
    where
        F: Fn(CancellationToken) -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let mut task = self.task.lock().unwrap_or_else(PoisonError::into_inner);
        let mut current = SchedulerState::Idle;
        let started = self.state.send_if_modified(|state| {
            current = *state;
            if *state == SchedulerState::Idle {
                *state = SchedulerState::Running;
                true
            } else {
                false
            }
        });
        if !started {
            return Err(SchedulerError::NotIdle(current));
        }

        let cancel = self.cancel.clone();
        let mut paused = self.paused.subscribe();
        *task = Some(tokio::spawn(async move {
            info!(interval_secs = interval.as_secs(), "refresh loop started");
            loop {
                if *paused.borrow_and_update() {
                    debug!("refresh paused, skipping pass");
                } else {
                    pass(cancel.clone()).await;
                }
                if cancel.is_cancelled() {
                    break;
                }
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = tokio::time::sleep(interval) => {}
                    _ = wait_for_resume(&mut paused) => debug!("refresh resumed"),
                }
            }
            info!("refresh loop exited");
        }));
        Ok(())
    }

    /// Suspends or resumes new passes. A pass already running is not interrupted.
    pub fn pause(&self, paused: bool) {
        self.paused.send_replace(paused);
    }

    /// Signals the running pass to cancel and waits for the loop to exit.
    pub async fn stop(&self) {
        let mut previous = SchedulerState::Idle;
        self.state.send_modify(|state| {
            previous = *state;
            *state = match *state {
                SchedulerState::Idle => SchedulerState::Stopped,
                SchedulerState::Running => SchedulerState::Stopping,
                other => other,
            };
        });
        self.cancel.cancel();

        match previous {
            SchedulerState::Idle | SchedulerState::Stopped => return,
            SchedulerState::Stopping => {
                let mut state = self.state.subscribe();
                let _ = state
                    .wait_for(|state| *state == SchedulerState::Stopped)
                    .await;
                return;
            }
            SchedulerState::Running => {}
        }

        info!("stopping refresh loop");
        let handle = self
            .task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = handle
            && let Err(err) = handle.await
        {
            warn!("refresh loop ended abnormally: {err}");
        }
        self.state.send_replace(SchedulerState::Stopped);
        info!("refresh loop stopped");
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// Completes when the pause flag flips back to false.
async fn wait_for_resume(paused: &mut watch::Receiver<bool>) {
    loop {
        if paused.changed().await.is_err() {
            std::future::pending::<()>().await;
        }
        if !*paused.borrow_and_update() {
            return;
        }
    }
}
