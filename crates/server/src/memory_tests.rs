// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;

#[tokio::test]
async fn initialize_writes_context_file() {
    let dir = match tempfile::tempdir() {
        Ok(d) => d,
        Err(e) => unreachable!("tempdir: {e}"),
    };
    let memory = FileMemory::new(dir.path());
    if let Err(e) = memory.initialize_for_session("dev-a", "developer", "/tmp/proj").await {
        unreachable!("init: {e:#}");
    }

    let raw = match std::fs::read(dir.path().join("memory/dev-a/context.json")) {
        Ok(r) => r,
        Err(e) => unreachable!("read: {e}"),
    };
    let context: serde_json::Value = match serde_json::from_slice(&raw) {
        Ok(v) => v,
        Err(e) => unreachable!("parse: {e}"),
    };
    assert_eq!(context["role"], "developer");
    assert_eq!(context["projectPath"], "/tmp/proj");
}

#[tokio::test]
async fn session_end_snapshots_output_tail() {
    let dir = match tempfile::tempdir() {
        Ok(d) => d,
        Err(e) => unreachable!("tempdir: {e}"),
    };
    let memory = FileMemory::new(dir.path());
    let big = "x".repeat(SNAPSHOT_BYTES + 100) + "TAIL_MARKER";
    if let Err(e) = memory.on_session_end("dev-b", "reviewer", &big).await {
        unreachable!("end: {e:#}");
    }

    let raw = match std::fs::read(dir.path().join("memory/dev-b/last-session.json")) {
        Ok(r) => r,
        Err(e) => unreachable!("read: {e}"),
    };
    let snapshot: serde_json::Value = match serde_json::from_slice(&raw) {
        Ok(v) => v,
        Err(e) => unreachable!("parse: {e}"),
    };
    let output = snapshot["lastOutput"].as_str().unwrap_or("");
    assert!(output.ends_with("TAIL_MARKER"));
    assert!(output.len() <= SNAPSHOT_BYTES);
}

#[tokio::test]
async fn noop_memory_accepts_everything() {
    let memory = NoopMemory;
    assert!(memory.initialize_for_session("a", "b", "c").await.is_ok());
    assert!(memory.on_session_end("a", "b", "c").await.is_ok());
}
