// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use serde::{Deserialize, Serialize};
use std::fmt;

/// Unified error kinds shared across HTTP and WebSocket surfaces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorCode {
    InvalidSessionName,
    InvalidInput,
    SessionNotFound,
    DuplicateSession,
    SpawnError,
    SessionDead,
    NotReady,
    StuckAgent,
    BackendNotInitialized,
    RateLimited,
    RestartInProgress,
    StorageError,
    Timeout,
    PermissionError,
    ProtocolError,
}

impl ErrorCode {
    pub fn http_status(&self) -> u16 {
        match self {
            Self::InvalidSessionName => 400,
            Self::InvalidInput => 400,
            Self::SessionNotFound => 404,
            Self::DuplicateSession => 409,
            Self::SpawnError => 500,
            Self::SessionDead => 410,
            Self::NotReady => 408,
            Self::StuckAgent => 409,
            Self::BackendNotInitialized => 503,
            Self::RateLimited => 429,
            Self::RestartInProgress => 409,
            Self::StorageError => 500,
            Self::Timeout => 408,
            Self::PermissionError => 403,
            Self::ProtocolError => 422,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::InvalidSessionName => "INVALID_SESSION_NAME",
            Self::InvalidInput => "INVALID_INPUT",
            Self::SessionNotFound => "SESSION_NOT_FOUND",
            Self::DuplicateSession => "DUPLICATE_SESSION",
            Self::SpawnError => "SPAWN_ERROR",
            Self::SessionDead => "SESSION_DEAD",
            Self::NotReady => "NOT_READY",
            Self::StuckAgent => "STUCK_AGENT",
            Self::BackendNotInitialized => "BACKEND_NOT_INITIALIZED",
            Self::RateLimited => "RATE_LIMITED",
            Self::RestartInProgress => "RESTART_IN_PROGRESS",
            Self::StorageError => "STORAGE_ERROR",
            Self::Timeout => "TIMEOUT",
            Self::PermissionError => "PERMISSION_ERROR",
            Self::ProtocolError => "PROTOCOL_ERROR",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::error::Error for ErrorCode {}

/// Validate a session name: 1–64 chars of `[A-Za-z0-9_-]`.
///
/// This is the single gate for names arriving from the wire and from
/// internal callers; everything past it may assume the name is path- and
/// shell-safe.
pub fn validate_session_name(name: &str) -> Result<(), ErrorCode> {
    if name.is_empty() || name.len() > 64 {
        return Err(ErrorCode::InvalidSessionName);
    }
    if !name.bytes().all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_') {
        return Err(ErrorCode::InvalidSessionName);
    }
    Ok(())
}

#[cfg(test)]
#[path = "error_tests.rs"]
mod tests;
