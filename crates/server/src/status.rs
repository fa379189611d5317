// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Effective-status derivation: what an external observer should see for a
//! tracked agent, reconciling stored status with live PTY and child state.

use std::sync::Arc;

use crate::backend::SessionBackend;
use crate::store::{AgentStatus, StateStore};

/// Derived status plus an optional human-facing message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EffectiveStatus {
    pub status: AgentStatus,
    pub message: Option<String>,
}

impl EffectiveStatus {
    fn plain(status: AgentStatus) -> Self {
        Self { status, message: None }
    }
}

/// Single source of truth for status endpoints.
pub struct StatusEvaluator {
    backend: Arc<SessionBackend>,
    store: Arc<StateStore>,
}

impl StatusEvaluator {
    pub fn new(backend: Arc<SessionBackend>, store: Arc<StateStore>) -> Self {
        Self { backend, store }
    }

    /// Evaluate the effective status for a tracked member session.
    ///
    /// Self-heal writes are best-effort compare-and-sets: a concurrent
    /// registration write always wins over the evaluator.
    pub fn evaluate(&self, session_name: &str) -> EffectiveStatus {
        let stored = self.store.agent_status(session_name).unwrap_or_default();
        let pty_exists = self.backend.session_exists(session_name);
        let child_alive = pty_exists && self.backend.is_child_process_alive(session_name);

        // 1. Stored active but the PTY is gone: the agent died behind our back.
        if stored == AgentStatus::Active && !pty_exists {
            let _ = self.store.update_agent_status_if(
                session_name,
                AgentStatus::Active,
                AgentStatus::Inactive,
            );
            return EffectiveStatus::plain(AgentStatus::Inactive);
        }

        // 2. Stored inactive but a live PTY with a live child exists: self-heal.
        if stored == AgentStatus::Inactive && child_alive {
            let _ = self.store.update_agent_status_if(
                session_name,
                AgentStatus::Inactive,
                AgentStatus::Active,
            );
            return EffectiveStatus::plain(AgentStatus::Active);
        }

        // 3. Started with a live PTY reads as active.
        if stored == AgentStatus::Started && pty_exists {
            return EffectiveStatus::plain(AgentStatus::Active);
        }

        // 4. Transient states without a PTY: still starting up.
        if stored.is_transient() && !pty_exists {
            return EffectiveStatus {
                status: stored,
                message: Some("agent is starting up".to_owned()),
            };
        }

        // 5. Everything else reads as stored.
        EffectiveStatus::plain(stored)
    }
}

#[cfg(test)]
#[path = "status_tests.rs"]
mod tests;
