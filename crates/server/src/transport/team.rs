// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Team lifecycle handlers: start/stop whole teams or single members, the
//! activity poll, and the member self-registration endpoint.

use std::path::PathBuf;

use axum::extract::{Path, State};
use axum::response::Response;
use serde::Serialize;
use tracing::warn;

use crate::error::{validate_session_name, ErrorCode};
use crate::registration::CreateAgentSession;
use crate::store::{AgentStatus, Team, TeamMember};

use super::{ok, ApiError, AppState};

fn find_team(state: &AppState, team_id: &str) -> Result<Team, ApiError> {
    state
        .store
        .teams()
        .into_iter()
        .find(|t| t.id == team_id)
        .ok_or_else(|| ApiError::with_message(ErrorCode::SessionNotFound, "unknown team"))
}

fn member_params(team: &Team, member: &TeamMember) -> CreateAgentSession {
    CreateAgentSession {
        session_name: member.session_name.clone(),
        role: member.role.clone(),
        project_path: PathBuf::from(team.project_path.clone().unwrap_or_else(|| ".".to_owned())),
        runtime_type: member.runtime_type.unwrap_or_default(),
        team_id: Some(team.id.clone()),
        member_id: Some(member.id.clone()),
        flags: vec![],
    }
}

#[derive(Debug, Serialize)]
pub struct MemberOutcome {
    #[serde(rename = "sessionName")]
    pub session_name: String,
    pub started: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// `POST /api/teams/{team_id}/start` — bring up every member session.
pub async fn start_team(
    State(state): State<AppState>,
    Path(team_id): Path<String>,
) -> Result<Response, ApiError> {
    state.ensure_initialized()?;
    let team = find_team(&state, &team_id)?;

    let mut outcomes = Vec::with_capacity(team.members.len());
    for member in &team.members {
        let result = state.registration.create_agent_session(member_params(&team, member)).await;
        match result {
            Ok(_) => outcomes.push(MemberOutcome {
                session_name: member.session_name.clone(),
                started: true,
                error: None,
            }),
            Err(code) => {
                warn!(session = %member.session_name, "member start failed: {code}");
                outcomes.push(MemberOutcome {
                    session_name: member.session_name.clone(),
                    started: false,
                    error: Some(code.as_str().to_owned()),
                });
            }
        }
    }
    Ok(ok(outcomes))
}

/// `POST /api/teams/{team_id}/stop`
pub async fn stop_team(
    State(state): State<AppState>,
    Path(team_id): Path<String>,
) -> Result<Response, ApiError> {
    state.ensure_initialized()?;
    let team = find_team(&state, &team_id)?;
    for member in &team.members {
        state
            .registration
            .terminate_agent_session(&member.session_name, &member.role)
            .await;
    }
    Ok(ok(serde_json::json!({ "stopped": team.members.len() })))
}

fn find_member(state: &AppState, name: &str) -> Result<(Team, TeamMember), ApiError> {
    state
        .store
        .find_member_by_session_name(name)
        .ok_or_else(|| ApiError::with_message(ErrorCode::SessionNotFound, "unknown member"))
}

/// `POST /api/teams/members/{name}/start`
pub async fn start_member(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<Response, ApiError> {
    state.ensure_initialized()?;
    validate_session_name(&name)?;
    let (team, member) = find_member(&state, &name)?;
    let created = state.registration.create_agent_session(member_params(&team, &member)).await?;
    Ok(ok(created_data(created.session_name, created.reused)))
}

/// `POST /api/teams/members/{name}/stop`
pub async fn stop_member(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<Response, ApiError> {
    state.ensure_initialized()?;
    validate_session_name(&name)?;
    let (_, member) = find_member(&state, &name)?;
    state.registration.terminate_agent_session(&name, &member.role).await;
    Ok(ok(serde_json::json!({ "stopped": name })))
}

/// `POST /api/teams/members/{name}/register` — the out-of-band
/// self-registration that moves `activating → active` and flushes the
/// member's queue.
pub async fn register_member(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<Response, ApiError> {
    state.ensure_initialized()?;
    validate_session_name(&name)?;
    let _ = find_member(&state, &name)?;
    state.registration.activate_agent(&name).await;
    Ok(ok(serde_json::json!({ "registered": name })))
}

/// `POST /api/teams/members/{name}/suspend` — explicit `active →
/// suspended`; messages queue up until a rehydrate completes.
pub async fn suspend_member(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<Response, ApiError> {
    state.ensure_initialized()?;
    validate_session_name(&name)?;
    let _ = find_member(&state, &name)?;
    state.registration.suspend_agent(&name).await.map_err(|code| match code {
        ErrorCode::InvalidInput => {
            ApiError::with_message(code, "only active agents can be suspended")
        }
        other => ApiError::from(other),
    })?;
    Ok(ok(serde_json::json!({ "suspended": name })))
}

fn created_data(session_name: String, reused: bool) -> serde_json::Value {
    serde_json::json!({ "sessionName": session_name, "reused": reused })
}

#[derive(Debug, Serialize)]
pub struct MemberActivity {
    #[serde(rename = "sessionName")]
    pub session_name: String,
    #[serde(rename = "memberId")]
    pub member_id: String,
    pub role: String,
    #[serde(rename = "agentStatus")]
    pub agent_status: AgentStatus,
    #[serde(rename = "workingStatus", skip_serializing_if = "Option::is_none")]
    pub working_status: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(rename = "sessionExists")]
    pub session_exists: bool,
    #[serde(rename = "childAlive")]
    pub child_alive: bool,
    #[serde(rename = "lastActivityAt", skip_serializing_if = "Option::is_none")]
    pub last_activity_at: Option<u64>,
}

/// `GET /api/teams/activity` — effective status for every tracked member.
pub async fn activity(State(state): State<AppState>) -> Result<Response, ApiError> {
    state.ensure_initialized()?;
    let mut entries = Vec::new();
    for team in state.store.teams() {
        for member in team.members {
            let effective = state.evaluator.evaluate(&member.session_name);
            let session_exists = state.backend.session_exists(&member.session_name);
            entries.push(MemberActivity {
                child_alive: session_exists
                    && state.backend.is_child_process_alive(&member.session_name),
                last_activity_at: state
                    .backend
                    .get_session(&member.session_name)
                    .map(|s| s.last_activity_at()),
                session_exists,
                session_name: member.session_name,
                member_id: member.id,
                role: member.role,
                agent_status: effective.status,
                working_status: member.working_status,
                message: effective.message,
            });
        }
    }
    Ok(ok(entries))
}
