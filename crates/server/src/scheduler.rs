// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Periodic check-in timers: per-session prompts fired on an interval.
//!
//! Jobs are in-memory only; callers reinstall them after a server restart.
//! Fires are delivered over a channel and sent through the reliable message
//! path by the supervisor loop, keeping the scheduler free of delivery
//! concerns.

use std::collections::HashMap;
use std::time::Duration;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use uuid::Uuid;

/// A due check-in, ready to be delivered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScheduledFire {
    pub job_id: Uuid,
    pub session_name: String,
    pub message: String,
}

/// A registered check-in job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckinJob {
    pub id: Uuid,
    #[serde(rename = "sessionName")]
    pub session_name: String,
    pub message: String,
    #[serde(rename = "intervalMinutes")]
    pub interval_minutes: u64,
    #[serde(rename = "isRecurring")]
    pub is_recurring: bool,
    #[serde(rename = "isActive")]
    pub is_active: bool,
}

struct JobHandle {
    job: CheckinJob,
    cancel: CancellationToken,
}

/// Check-in scheduler. One tokio task per active job.
pub struct Scheduler {
    jobs: Mutex<HashMap<Uuid, JobHandle>>,
    fire_tx: mpsc::UnboundedSender<ScheduledFire>,
    shutdown: CancellationToken,
}

impl Scheduler {
    pub fn new(fire_tx: mpsc::UnboundedSender<ScheduledFire>, shutdown: CancellationToken) -> Self {
        Self {
            jobs: Mutex::new(HashMap::new()),
            fire_tx,
            shutdown,
        }
    }

    /// Register a job and start its timer task.
    pub fn schedule(
        &self,
        session_name: &str,
        message: &str,
        interval_minutes: u64,
        is_recurring: bool,
    ) -> Uuid {
        let interval = Duration::from_secs(interval_minutes.max(1) * 60);
        self.schedule_every(session_name, message, interval_minutes, interval, is_recurring)
    }

    /// Register a job with an explicit tick interval.
    pub(crate) fn schedule_every(
        &self,
        session_name: &str,
        message: &str,
        interval_minutes: u64,
        interval: Duration,
        is_recurring: bool,
    ) -> Uuid {
        let id = Uuid::new_v4();
        let job = CheckinJob {
            id,
            session_name: session_name.to_owned(),
            message: message.to_owned(),
            interval_minutes,
            is_recurring,
            is_active: true,
        };
        let cancel = CancellationToken::new();
        self.jobs.lock().insert(id, JobHandle { job: job.clone(), cancel: cancel.clone() });

        let fire_tx = self.fire_tx.clone();
        let shutdown = self.shutdown.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = tokio::time::sleep(interval) => {}
                    _ = cancel.cancelled() => break,
                    _ = shutdown.cancelled() => break,
                }
                let fire = ScheduledFire {
                    job_id: job.id,
                    session_name: job.session_name.clone(),
                    message: job.message.clone(),
                };
                if fire_tx.send(fire).is_err() {
                    break;
                }
                if !job.is_recurring {
                    break;
                }
            }
        });
        debug!(session = session_name, %id, interval_minutes, "check-in scheduled");
        id
    }

    /// Cancel one job.
    pub fn cancel(&self, job_id: Uuid) -> bool {
        match self.jobs.lock().remove(&job_id) {
            Some(handle) => {
                handle.cancel.cancel();
                true
            }
            None => false,
        }
    }

    /// Cancel every job owned by a session (on terminate).
    pub fn cancel_for_session(&self, session_name: &str) {
        let mut jobs = self.jobs.lock();
        jobs.retain(|_, handle| {
            if handle.job.session_name == session_name {
                handle.cancel.cancel();
                false
            } else {
                true
            }
        });
    }

    pub fn jobs_for_session(&self, session_name: &str) -> Vec<CheckinJob> {
        self.jobs
            .lock()
            .values()
            .filter(|h| h.job.session_name == session_name)
            .map(|h| h.job.clone())
            .collect()
    }

    pub fn list(&self) -> Vec<CheckinJob> {
        self.jobs.lock().values().map(|h| h.job.clone()).collect()
    }

    /// Remove bookkeeping for a one-shot job that has fired.
    pub fn mark_fired(&self, job_id: Uuid) {
        let mut jobs = self.jobs.lock();
        if let Some(handle) = jobs.get(&job_id) {
            if !handle.job.is_recurring {
                jobs.remove(&job_id);
            }
        }
    }
}

#[cfg(test)]
#[path = "scheduler_tests.rs"]
mod tests;
