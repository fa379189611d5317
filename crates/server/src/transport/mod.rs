// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! HTTP and WebSocket surface: uniform response envelope, route table, and
//! the shared handler state.

pub mod orchestrator;
pub mod schedule;
pub mod team;
pub mod terminal;
pub mod ws;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use axum::extract::DefaultBodyLimit;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::backend::SessionBackend;
use crate::error::ErrorCode;
use crate::events::EventHub;
use crate::queue::MessageQueue;
use crate::registration::AgentRegistration;
use crate::restart::RestartController;
use crate::scheduler::Scheduler;
use crate::status::StatusEvaluator;
use crate::store::StateStore;

/// Request bodies above this are rejected with 413.
const BODY_LIMIT: usize = 256 * 1024;

/// Shared state behind every handler.
#[derive(Clone)]
pub struct AppState {
    pub backend: Arc<SessionBackend>,
    pub store: Arc<StateStore>,
    pub registration: Arc<AgentRegistration>,
    pub restart: Arc<RestartController>,
    pub evaluator: Arc<StatusEvaluator>,
    pub scheduler: Arc<Scheduler>,
    pub queue: Arc<MessageQueue>,
    pub events: EventHub,
    pub shutdown: CancellationToken,
    /// Cleared until the composition root finishes wiring; dependent
    /// endpoints answer 503 while false.
    pub initialized: Arc<AtomicBool>,
    /// Default check-in cadence installed for new orchestrator sessions.
    pub check_interval_minutes: u64,
    /// Git auto-commit reminder cadence for the orchestrator.
    pub auto_commit_interval_minutes: u64,
}

impl AppState {
    pub fn ensure_initialized(&self) -> Result<(), ApiError> {
        if self.initialized.load(Ordering::Acquire) {
            Ok(())
        } else {
            Err(ApiError::from(ErrorCode::BackendNotInitialized))
        }
    }
}

/// Uniform `{success, data|error, message?}` envelope.
#[derive(Debug, Serialize)]
pub struct Envelope<T: Serialize> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// 200 envelope with data.
pub fn ok<T: Serialize>(data: T) -> Response {
    Json(Envelope {
        success: true,
        data: Some(data),
        error: None,
        message: None,
    })
    .into_response()
}

/// Non-200 success envelope (e.g. 202 for queued deliveries).
pub fn accepted<T: Serialize>(data: T, message: &str) -> Response {
    (
        StatusCode::ACCEPTED,
        Json(Envelope {
            success: true,
            data: Some(data),
            error: None,
            message: Some(message.to_owned()),
        }),
    )
        .into_response()
}

/// Error carrying an [`ErrorCode`] and optional human-facing message.
#[derive(Debug)]
pub struct ApiError {
    pub code: ErrorCode,
    pub message: Option<String>,
}

impl ApiError {
    pub fn with_message(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: Some(message.into()),
        }
    }
}

impl From<ErrorCode> for ApiError {
    fn from(code: ErrorCode) -> Self {
        Self { code, message: None }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = StatusCode::from_u16(self.code.http_status())
            .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        let body = Envelope::<()> {
            success: false,
            data: None,
            error: Some(self.code.as_str().to_owned()),
            message: self.message,
        };
        (status, Json(body)).into_response()
    }
}

/// Build the full route table.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/api/health", get(health))
        // Terminal control
        .route("/api/terminal/sessions", get(terminal::list_sessions))
        .route("/api/terminal/sessions/{name}/exists", get(terminal::session_exists))
        .route("/api/terminal/sessions/{name}/capture", get(terminal::capture))
        .route("/api/terminal/sessions/{name}/input", post(terminal::input))
        .route("/api/terminal/sessions/{name}/key", post(terminal::send_key))
        .route("/api/terminal/sessions/{name}/message", post(terminal::deliver_message))
        .route("/api/terminal/sessions/{name}", delete(terminal::kill_session))
        // Orchestrator
        .route("/api/orchestrator/setup", post(orchestrator::setup))
        .route("/api/orchestrator/stop", post(orchestrator::stop))
        .route("/api/orchestrator/status", get(orchestrator::status))
        .route("/api/orchestrator/commands", post(orchestrator::command))
        // Teams
        .route("/api/teams/activity", get(team::activity))
        .route("/api/teams/{team_id}/start", post(team::start_team))
        .route("/api/teams/{team_id}/stop", post(team::stop_team))
        .route("/api/teams/members/{name}/start", post(team::start_member))
        .route("/api/teams/members/{name}/stop", post(team::stop_member))
        .route("/api/teams/members/{name}/register", post(team::register_member))
        .route("/api/teams/members/{name}/suspend", post(team::suspend_member))
        // Check-in schedules
        .route("/api/schedules", post(schedule::create).get(schedule::list))
        .route("/api/schedules/{id}", delete(schedule::cancel))
        // Events
        .route("/ws", get(ws::upgrade))
        .layer(DefaultBodyLimit::max(BODY_LIMIT))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[derive(Debug, Serialize)]
struct HealthData {
    status: &'static str,
    initialized: bool,
    sessions: usize,
}

/// `GET /api/health` — liveness plus backend readiness.
async fn health(axum::extract::State(state): axum::extract::State<AppState>) -> Response {
    let initialized = state.initialized.load(Ordering::Acquire);
    ok(HealthData {
        status: "ok",
        initialized,
        sessions: state.backend.list_sessions().len(),
    })
}

#[cfg(test)]
#[path = "transport_tests.rs"]
mod tests;
