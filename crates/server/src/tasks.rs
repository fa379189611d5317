// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Task tracking boundary: which assignments are in flight for a member.
//! The exit handler uses this to decide between restarting an agent and
//! letting it go inactive.

use std::sync::Arc;

use crate::store::{StateStore, TaskItem};

pub trait TaskTracker: Send + Sync {
    /// In-progress tasks assigned to the member owning `session_name`.
    fn in_progress_tasks(&self, session_name: &str) -> Vec<TaskItem>;
}

/// Default tracker reading assignments straight from the team store.
pub struct StoreTaskTracker {
    store: Arc<StateStore>,
}

impl StoreTaskTracker {
    pub fn new(store: Arc<StateStore>) -> Self {
        Self { store }
    }
}

impl TaskTracker for StoreTaskTracker {
    fn in_progress_tasks(&self, session_name: &str) -> Vec<TaskItem> {
        match self.store.find_member_by_session_name(session_name) {
            Some((_, member)) => member
                .current_tasks
                .into_iter()
                .filter(TaskItem::is_in_progress)
                .collect(),
            None => Vec::new(),
        }
    }
}

#[cfg(test)]
#[path = "tasks_tests.rs"]
mod tests;
