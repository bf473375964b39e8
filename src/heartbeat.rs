//! Background keep-alive against the store.
//!
//! The heartbeat runs in its own tokio task for as long as a command holds the
//! store. Processing suspends it for the duration of a run and schedules it to
//! resume after a delay; there is no shared flag, only the task handle owned by
//! the supervisor.

use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time;

use crate::store::AttendanceStore;

pub struct HeartbeatSupervisor {
    store: Arc<dyn AttendanceStore>,
    interval: Duration,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl HeartbeatSupervisor {
    pub fn new(store: Arc<dyn AttendanceStore>, interval: Duration) -> Self {
        Self {
            store,
            interval,
            task: Mutex::new(None),
        }
    }

    pub fn start(&self) {
        self.resume_heartbeat(Duration::ZERO);
    }

    pub fn is_running(&self) -> bool {
        self.task
            .lock()
            .map(|task| task.as_ref().is_some_and(|handle| !handle.is_finished()))
            .unwrap_or(false)
    }

    /// Cancels the heartbeat task, including one still waiting to resume.
    pub fn suspend_heartbeat(&self) {
        if let Ok(mut task) = self.task.lock() {
            if let Some(handle) = task.take() {
                handle.abort();
                tracing::debug!("heartbeat suspended");
            }
        }
    }

    /// Replaces any current task with one that starts beating after `after`.
    pub fn resume_heartbeat(&self, after: Duration) {
        let store = Arc::clone(&self.store);
        let interval = self.interval;
        let handle = tokio::spawn(async move {
            time::sleep(after).await;
            let mut ticker = time::interval(interval);
            loop {
                ticker.tick().await;
                if let Err(err) = store.ping().await {
                    tracing::warn!("heartbeat ping failed: {err}");
                }
            }
        });

        if let Ok(mut task) = self.task.lock() {
            if let Some(previous) = task.replace(handle) {
                previous.abort();
            }
        }
    }

    /// Beats for as long as `work` runs, then stops.
    pub async fn run_alongside<F: Future>(&self, work: F) -> F::Output {
        if !self.is_running() {
            self.start();
        }
        let output = work.await;
        self.suspend_heartbeat();
        output
    }

    /// Holds the heartbeat off while `work` runs; it resumes `resume_after`
    /// once `work` completes.
    pub async fn while_paused<F: Future>(&self, resume_after: Duration, work: F) -> F::Output {
        let _pause = self.pause(resume_after);
        work.await
    }

    /// Suspends the heartbeat until the returned guard drops.
    pub fn pause(&self, resume_after: Duration) -> HeartbeatPause<'_> {
        self.suspend_heartbeat();
        HeartbeatPause {
            supervisor: self,
            resume_after,
        }
    }
}

impl Drop for HeartbeatSupervisor {
    fn drop(&mut self) {
        self.suspend_heartbeat();
    }
}

pub struct HeartbeatPause<'a> {
    supervisor: &'a HeartbeatSupervisor,
    resume_after: Duration,
}

impl Drop for HeartbeatPause<'_> {
    fn drop(&mut self) {
        self.supervisor.resume_heartbeat(self.resume_after);
    }
}
