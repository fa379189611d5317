// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Orchestrator lifecycle handlers.

use std::path::PathBuf;

use axum::extract::State;
use axum::response::Response;
use axum::Json;
use serde::{Deserialize, Serialize};

use crate::error::ErrorCode;
use crate::queue::MessageMode;
use crate::registration::{CreateAgentSession, ORCHESTRATOR_ROLE};
use crate::restart::ORCHESTRATOR_SESSION;
use crate::runtime::RuntimeType;
use crate::store::AgentStatus;

use super::{ok, ApiError, AppState};

#[derive(Debug, Deserialize)]
pub struct SetupRequest {
    #[serde(rename = "runtimeType")]
    pub runtime_type: Option<String>,
    #[serde(rename = "projectPath")]
    pub project_path: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct SetupData {
    #[serde(rename = "sessionName")]
    pub session_name: String,
    pub reused: bool,
}

/// `POST /api/orchestrator/setup`
pub async fn setup(
    State(state): State<AppState>,
    Json(request): Json<SetupRequest>,
) -> Result<Response, ApiError> {
    state.ensure_initialized()?;
    let runtime_type = match request.runtime_type.as_deref() {
        Some(raw) => RuntimeType::parse(raw).ok_or_else(|| {
            ApiError::with_message(ErrorCode::InvalidInput, format!("unknown runtime: {raw}"))
        })?,
        None => state.store.orchestrator_runtime().unwrap_or(RuntimeType::Claude),
    };
    state.store.update_orchestrator_runtime(runtime_type);

    let project_path = request
        .project_path
        .map(PathBuf::from)
        .unwrap_or_else(|| std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")));

    let created = state
        .registration
        .create_agent_session(CreateAgentSession {
            session_name: ORCHESTRATOR_SESSION.to_owned(),
            role: ORCHESTRATOR_ROLE.to_owned(),
            project_path,
            runtime_type,
            team_id: None,
            member_id: None,
            flags: vec![],
        })
        .await?;

    // Fresh periodic prompts for the new orchestrator session.
    state.scheduler.cancel_for_session(ORCHESTRATOR_SESSION);
    if state.check_interval_minutes > 0 {
        state.scheduler.schedule(
            ORCHESTRATOR_SESSION,
            "Periodic check-in: review team progress and reassign stalled work.",
            state.check_interval_minutes,
            true,
        );
    }
    if state.auto_commit_interval_minutes > 0 {
        state.scheduler.schedule(
            ORCHESTRATOR_SESSION,
            "Reminder: ask active agents to commit their work in progress.",
            state.auto_commit_interval_minutes,
            true,
        );
    }

    Ok(ok(SetupData {
        session_name: created.session_name,
        reused: created.reused,
    }))
}

/// `POST /api/orchestrator/stop`
pub async fn stop(State(state): State<AppState>) -> Result<Response, ApiError> {
    state.ensure_initialized()?;
    state
        .registration
        .terminate_agent_session(ORCHESTRATOR_SESSION, ORCHESTRATOR_ROLE)
        .await;
    Ok(ok(serde_json::json!({ "stopped": ORCHESTRATOR_SESSION })))
}

#[derive(Debug, Serialize)]
pub struct OrchestratorStatusData {
    pub status: AgentStatus,
    #[serde(rename = "runtimeType", skip_serializing_if = "Option::is_none")]
    pub runtime_type: Option<RuntimeType>,
    #[serde(rename = "sessionExists")]
    pub session_exists: bool,
    #[serde(rename = "childAlive")]
    pub child_alive: bool,
}

/// `GET /api/orchestrator/status`
pub async fn status(State(state): State<AppState>) -> Result<Response, ApiError> {
    state.ensure_initialized()?;
    let stored = state.store.orchestrator_status();
    let session_exists = state.backend.session_exists(ORCHESTRATOR_SESSION);
    let child_alive = session_exists && state.backend.is_child_process_alive(ORCHESTRATOR_SESSION);

    // The same reconciliation rules as members, applied to the
    // orchestrator document.
    let effective = if stored == AgentStatus::Active && !session_exists {
        state.store.update_orchestrator_status(AgentStatus::Inactive);
        AgentStatus::Inactive
    } else if stored == AgentStatus::Inactive && child_alive {
        state.store.update_orchestrator_status(AgentStatus::Active);
        AgentStatus::Active
    } else if stored == AgentStatus::Started && session_exists {
        AgentStatus::Active
    } else {
        stored
    };

    Ok(ok(OrchestratorStatusData {
        status: effective,
        runtime_type: state.store.orchestrator_runtime(),
        session_exists,
        child_alive,
    }))
}

#[derive(Debug, Deserialize)]
pub struct CommandRequest {
    pub command: String,
}

/// `POST /api/orchestrator/commands`
pub async fn command(
    State(state): State<AppState>,
    Json(request): Json<CommandRequest>,
) -> Result<Response, ApiError> {
    state.ensure_initialized()?;
    if request.command.is_empty() {
        return Err(ApiError::with_message(ErrorCode::InvalidInput, "command must not be empty"));
    }
    state
        .registration
        .send_message_to_agent(ORCHESTRATOR_SESSION, &request.command, MessageMode::Command)
        .await?;
    Ok(ok(serde_json::json!({ "sent": true })))
}
