// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::store::AgentStatus;

/// Events emitted by the supervisor core, fanned out to WebSocket clients.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data")]
pub enum ServerEvent {
    /// A chunk of PTY output. The chunk is decoded lossily for transport;
    /// frontends wanting raw bytes use the capture endpoint.
    #[serde(rename = "terminal_output")]
    TerminalOutput {
        #[serde(rename = "sessionName")]
        session_name: String,
        chunk: String,
    },
    #[serde(rename = "team_member_status")]
    TeamMemberStatus {
        #[serde(rename = "sessionName")]
        session_name: String,
        #[serde(rename = "memberId", skip_serializing_if = "Option::is_none")]
        member_id: Option<String>,
        #[serde(rename = "agentStatus")]
        agent_status: AgentStatus,
        #[serde(rename = "workingStatus", skip_serializing_if = "Option::is_none")]
        working_status: Option<String>,
        reason: String,
    },
    #[serde(rename = "orchestrator_status")]
    OrchestratorStatus {
        #[serde(rename = "agentStatus")]
        agent_status: AgentStatus,
        reason: String,
    },
    #[serde(rename = "orchestrator:restarted")]
    OrchestratorRestarted {
        #[serde(rename = "agentStatus")]
        agent_status: AgentStatus,
        #[serde(rename = "totalRestarts")]
        total_restarts: u64,
    },
}

/// Broadcast hub for server events.
///
/// Slow or absent subscribers never block emitters; lagging receivers drop
/// the oldest events (tokio broadcast semantics).
#[derive(Clone)]
pub struct EventHub {
    tx: broadcast::Sender<ServerEvent>,
}

impl EventHub {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn emit(&self, event: ServerEvent) {
        let _ = self.tx.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ServerEvent> {
        self.tx.subscribe()
    }

    pub fn member_status(
        &self,
        session_name: &str,
        member_id: Option<&str>,
        status: AgentStatus,
        reason: &str,
    ) {
        self.emit(ServerEvent::TeamMemberStatus {
            session_name: session_name.to_owned(),
            member_id: member_id.map(str::to_owned),
            agent_status: status,
            working_status: None,
            reason: reason.to_owned(),
        });
    }

    pub fn orchestrator_status(&self, status: AgentStatus, reason: &str) {
        self.emit(ServerEvent::OrchestratorStatus {
            agent_status: status,
            reason: reason.to_owned(),
        });
    }
}

impl Default for EventHub {
    fn default() -> Self {
        Self::new(256)
    }
}

#[cfg(test)]
#[path = "events_tests.rs"]
mod tests;
