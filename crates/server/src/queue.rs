// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Per-session FIFO queue for messages addressed to agents that are not
//! yet ready to receive them.

use std::collections::{HashMap, VecDeque};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::store::now_epoch_ms;

/// Per-session queue depth bound; overflow drops the oldest entry.
pub const QUEUE_MAX: usize = 64;

/// How a payload is delivered to the PTY.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum MessageMode {
    /// Written with a trailing Enter in one shot.
    Command,
    /// Two-stage paste-safe write with echo verification.
    #[default]
    Message,
}

/// A message held for a not-yet-active agent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueuedMessage {
    pub payload: String,
    pub mode: MessageMode,
    #[serde(rename = "enqueuedAt")]
    pub enqueued_at: u64,
}

impl QueuedMessage {
    pub fn new(payload: impl Into<String>, mode: MessageMode) -> Self {
        Self {
            payload: payload.into(),
            mode,
            enqueued_at: now_epoch_ms(),
        }
    }
}

/// In-memory message queues, keyed by session name. Nothing here is
/// persisted; a server restart drops held messages.
#[derive(Default)]
pub struct MessageQueue {
    queues: Mutex<HashMap<String, VecDeque<QueuedMessage>>>,
}

impl MessageQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a message. Always succeeds; beyond [`QUEUE_MAX`] the oldest
    /// entry is dropped with a warning.
    pub fn enqueue(&self, session_name: &str, message: QueuedMessage) {
        let mut queues = self.queues.lock();
        let queue = queues.entry(session_name.to_owned()).or_default();
        if queue.len() >= QUEUE_MAX {
            queue.pop_front();
            warn!(session = session_name, "message queue full, dropping oldest entry");
        }
        queue.push_back(message);
    }

    /// Atomically take every held message, oldest first.
    pub fn take_all(&self, session_name: &str) -> Vec<QueuedMessage> {
        let mut queues = self.queues.lock();
        match queues.remove(session_name) {
            Some(queue) => queue.into(),
            None => Vec::new(),
        }
    }

    /// Drop held messages (on terminate).
    pub fn clear(&self, session_name: &str) {
        self.queues.lock().remove(session_name);
    }

    pub fn len(&self, session_name: &str) -> usize {
        self.queues.lock().get(session_name).map(VecDeque::len).unwrap_or(0)
    }

    pub fn is_empty(&self, session_name: &str) -> bool {
        self.len(session_name) == 0
    }
}

#[cfg(test)]
#[path = "queue_tests.rs"]
mod tests;
