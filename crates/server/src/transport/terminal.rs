// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Terminal control handlers: list, capture, write, key, kill, deliver.

use axum::extract::{Path, Query, State};
use axum::response::Response;
use axum::Json;
use serde::{Deserialize, Serialize};

use crate::error::{validate_session_name, ErrorCode};
use crate::queue::MessageMode;
use crate::registration::DeliveryOutcome;

use super::{accepted, ok, ApiError, AppState};

/// Default `?lines=` for capture requests.
const DEFAULT_CAPTURE_LINES: usize = 50;

fn checked_name(state: &AppState, name: &str) -> Result<(), ApiError> {
    state.ensure_initialized()?;
    validate_session_name(name).map_err(ApiError::from)
}

#[derive(Debug, Serialize)]
pub struct SessionInfo {
    #[serde(rename = "sessionName")]
    pub session_name: String,
    #[serde(rename = "childPid")]
    pub child_pid: u32,
    #[serde(rename = "createdAt")]
    pub created_at: u64,
    #[serde(rename = "lastActivityAt")]
    pub last_activity_at: u64,
    pub alive: bool,
}

/// `GET /api/terminal/sessions`
pub async fn list_sessions(State(state): State<AppState>) -> Result<Response, ApiError> {
    state.ensure_initialized()?;
    let sessions: Vec<SessionInfo> = state
        .backend
        .list_sessions()
        .into_iter()
        .filter_map(|name| {
            let session = state.backend.get_session(&name)?;
            Some(SessionInfo {
                alive: state.backend.is_child_process_alive(&name),
                session_name: name,
                child_pid: session.child_pid(),
                created_at: session.created_at(),
                last_activity_at: session.last_activity_at(),
            })
        })
        .collect();
    Ok(ok(sessions))
}

#[derive(Debug, Serialize)]
pub struct ExistsData {
    pub exists: bool,
}

/// `GET /api/terminal/sessions/{name}/exists`
pub async fn session_exists(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<Response, ApiError> {
    checked_name(&state, &name)?;
    Ok(ok(ExistsData {
        exists: state.backend.session_exists(&name),
    }))
}

#[derive(Debug, Deserialize)]
pub struct CaptureQuery {
    pub lines: Option<usize>,
}

#[derive(Debug, Serialize)]
pub struct CaptureData {
    pub output: String,
}

/// `GET /api/terminal/sessions/{name}/capture?lines=N`
pub async fn capture(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Query(query): Query<CaptureQuery>,
) -> Result<Response, ApiError> {
    checked_name(&state, &name)?;
    let lines = query.lines.unwrap_or(DEFAULT_CAPTURE_LINES);
    let output = state.backend.capture_output(&name, lines)?;
    Ok(ok(CaptureData { output }))
}

#[derive(Debug, Deserialize)]
pub struct InputRequest {
    pub data: String,
    #[serde(default)]
    pub mode: Option<MessageMode>,
}

/// `POST /api/terminal/sessions/{name}/input` — raw write; command mode
/// appends Enter.
pub async fn input(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Json(request): Json<InputRequest>,
) -> Result<Response, ApiError> {
    checked_name(&state, &name)?;
    if request.data.is_empty() {
        return Err(ApiError::with_message(ErrorCode::InvalidInput, "data must not be empty"));
    }
    let mut bytes = request.data.into_bytes();
    if request.mode == Some(MessageMode::Command) {
        bytes.push(b'\r');
    }
    state.backend.write(&name, &bytes).await?;
    Ok(ok(serde_json::json!({ "written": bytes.len() })))
}

#[derive(Debug, Deserialize)]
pub struct KeyRequest {
    pub key: String,
}

/// `POST /api/terminal/sessions/{name}/key`
pub async fn send_key(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Json(request): Json<KeyRequest>,
) -> Result<Response, ApiError> {
    checked_name(&state, &name)?;
    state
        .registration
        .send_key_to_agent(&name, &request.key)
        .await
        .map_err(|code| match code {
            ErrorCode::InvalidInput => {
                ApiError::with_message(code, format!("unsupported key: {}", request.key))
            }
            other => ApiError::from(other),
        })?;
    Ok(ok(serde_json::json!({ "sent": request.key })))
}

#[derive(Debug, Deserialize)]
pub struct MessageRequest {
    pub message: String,
    #[serde(default)]
    pub mode: Option<MessageMode>,
}

#[derive(Debug, Serialize)]
pub struct DeliveryData {
    pub outcome: &'static str,
}

/// `POST /api/terminal/sessions/{name}/message` — the reliable path, gated
/// by member status. Queued deliveries answer 202.
pub async fn deliver_message(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Json(request): Json<MessageRequest>,
) -> Result<Response, ApiError> {
    checked_name(&state, &name)?;
    if request.message.is_empty() {
        return Err(ApiError::with_message(ErrorCode::InvalidInput, "message must not be empty"));
    }
    let mode = request.mode.unwrap_or(MessageMode::Message);
    let outcome = state.registration.deliver_message(&name, &request.message, mode).await?;
    match outcome {
        DeliveryOutcome::Sent => Ok(ok(DeliveryData { outcome: "sent" })),
        DeliveryOutcome::Queued => Ok(accepted(
            DeliveryData { outcome: "queued" },
            "target is not active; message queued",
        )),
    }
}

/// `DELETE /api/terminal/sessions/{name}`
pub async fn kill_session(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<Response, ApiError> {
    checked_name(&state, &name)?;
    state.backend.kill_session(&name).await?;
    Ok(ok(serde_json::json!({ "killed": name })))
}
