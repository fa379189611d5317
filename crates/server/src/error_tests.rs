// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use yare::parameterized;

#[parameterized(
    invalid_name = { ErrorCode::InvalidSessionName, 400 },
    invalid_input = { ErrorCode::InvalidInput, 400 },
    not_found = { ErrorCode::SessionNotFound, 404 },
    duplicate = { ErrorCode::DuplicateSession, 409 },
    spawn = { ErrorCode::SpawnError, 500 },
    dead = { ErrorCode::SessionDead, 410 },
    not_ready = { ErrorCode::NotReady, 408 },
    stuck = { ErrorCode::StuckAgent, 409 },
    uninitialized = { ErrorCode::BackendNotInitialized, 503 },
    rate_limited = { ErrorCode::RateLimited, 429 },
    restarting = { ErrorCode::RestartInProgress, 409 },
    storage = { ErrorCode::StorageError, 500 },
    timeout = { ErrorCode::Timeout, 408 },
    permission = { ErrorCode::PermissionError, 403 },
    protocol = { ErrorCode::ProtocolError, 422 },
)]
fn http_status_mapping(code: ErrorCode, expected: u16) {
    assert_eq!(code.http_status(), expected);
}

#[test]
fn wire_strings_are_screaming_snake() {
    assert_eq!(ErrorCode::SessionNotFound.as_str(), "SESSION_NOT_FOUND");
    assert_eq!(ErrorCode::RateLimited.to_string(), "RATE_LIMITED");
}

#[test]
fn valid_session_names() {
    for name in ["dev-alice", "orc_1", "a", "A-Z_09", &"x".repeat(64)] {
        assert!(validate_session_name(name).is_ok(), "{name}");
    }
}

#[test]
fn invalid_session_names() {
    for name in ["", "has space", "slash/y", "dot.name", &"x".repeat(65), "émigré"] {
        assert_eq!(
            validate_session_name(name),
            Err(ErrorCode::InvalidSessionName),
            "{name}"
        );
    }
}
