// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Check-in schedule handlers. Jobs are volatile; callers reinstall them
//! after a server restart.

use axum::extract::{Path, State};
use axum::response::Response;
use axum::Json;
use serde::Deserialize;
use uuid::Uuid;

use crate::error::{validate_session_name, ErrorCode};

use super::{ok, ApiError, AppState};

#[derive(Debug, Deserialize)]
pub struct ScheduleRequest {
    #[serde(rename = "sessionName")]
    pub session_name: String,
    pub message: String,
    #[serde(rename = "intervalMinutes")]
    pub interval_minutes: u64,
    #[serde(rename = "isRecurring", default = "default_recurring")]
    pub is_recurring: bool,
}

fn default_recurring() -> bool {
    true
}

/// `POST /api/schedules`
pub async fn create(
    State(state): State<AppState>,
    Json(request): Json<ScheduleRequest>,
) -> Result<Response, ApiError> {
    state.ensure_initialized()?;
    validate_session_name(&request.session_name)?;
    if request.message.is_empty() {
        return Err(ApiError::with_message(ErrorCode::InvalidInput, "message must not be empty"));
    }
    if request.interval_minutes == 0 {
        return Err(ApiError::with_message(
            ErrorCode::InvalidInput,
            "intervalMinutes must be at least 1",
        ));
    }
    let id = state.scheduler.schedule(
        &request.session_name,
        &request.message,
        request.interval_minutes,
        request.is_recurring,
    );
    Ok(ok(serde_json::json!({ "id": id })))
}

/// `GET /api/schedules`
pub async fn list(State(state): State<AppState>) -> Result<Response, ApiError> {
    state.ensure_initialized()?;
    Ok(ok(state.scheduler.list()))
}

/// `DELETE /api/schedules/{id}`
pub async fn cancel(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Response, ApiError> {
    state.ensure_initialized()?;
    let id: Uuid = id
        .parse()
        .map_err(|_| ApiError::with_message(ErrorCode::InvalidInput, "invalid job id"))?;
    if state.scheduler.cancel(id) {
        Ok(ok(serde_json::json!({ "cancelled": id })))
    } else {
        Err(ApiError::with_message(ErrorCode::SessionNotFound, "unknown job id"))
    }
}
