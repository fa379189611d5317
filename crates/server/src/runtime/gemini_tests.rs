// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use crate::runtime::RuntimeAdapter;

#[test]
fn exposes_gemini_type_and_patterns() {
    let runtime = GeminiRuntime::new();
    assert_eq!(runtime.runtime_type(), RuntimeType::Gemini);
    assert!(runtime.ready_patterns().contains(&"Type your message"));
    assert!(!runtime.failure_retry_patterns().is_empty());
}

#[test]
fn failure_retry_patterns_are_a_subset_of_exit_patterns() {
    let runtime = GeminiRuntime::new();
    let exit: Vec<&str> = runtime.exit_patterns().iter().map(|r| r.as_str()).collect();
    for retry in runtime.failure_retry_patterns() {
        assert!(exit.contains(&retry.as_str()), "{} missing from exit set", retry.as_str());
    }
}

#[test]
fn transient_failures_match_retry_set() {
    let runtime = GeminiRuntime::new();
    let retries = |text: &str| {
        runtime.failure_retry_patterns().iter().any(|re| re.is_match(text))
    };
    assert!(retries("RESOURCE_EXHAUSTED: quota exceeded for model"));
    assert!(retries("Connection error. Retrying..."));
    assert!(retries("Request cancelled by upstream"));
    assert!(!retries("Agent powering down"));
}

#[test]
fn update_banner_is_force_exit() {
    let runtime = GeminiRuntime::new();
    let forced = |text: &str| runtime.force_exit_patterns().iter().any(|re| re.is_match(text));
    assert!(forced("A new version of Gemini CLI is available!"));
    assert!(forced("Update available, the CLI will restart"));
    assert!(!forced("RESOURCE_EXHAUSTED"));
}

#[test]
fn startup_grace_covers_the_banner() {
    assert_eq!(GeminiRuntime::new().startup_grace(), Duration::from_secs(3));
}

#[test]
fn mcp_config_created_when_missing() {
    let dir = match tempfile::tempdir() {
        Ok(d) => d,
        Err(e) => unreachable!("tempdir: {e}"),
    };
    if let Err(e) = ensure_mcp_config(dir.path(), 8789) {
        unreachable!("ensure: {e:#}");
    }

    let raw = match std::fs::read(dir.path().join(".gemini/settings.json")) {
        Ok(r) => r,
        Err(e) => unreachable!("read: {e}"),
    };
    let settings: serde_json::Value = match serde_json::from_slice(&raw) {
        Ok(v) => v,
        Err(e) => unreachable!("parse: {e}"),
    };
    assert_eq!(
        settings["mcpServers"]["agentmux"]["httpUrl"],
        "http://localhost:8789/mcp"
    );
}

#[test]
fn mcp_config_merges_with_existing_servers() {
    let dir = match tempfile::tempdir() {
        Ok(d) => d,
        Err(e) => unreachable!("tempdir: {e}"),
    };
    let gemini_dir = dir.path().join(".gemini");
    std::fs::create_dir_all(&gemini_dir).ok();
    std::fs::write(
        gemini_dir.join("settings.json"),
        r#"{ "theme": "dark", "mcpServers": { "custom": { "command": "my-server" } } }"#,
    )
    .ok();

    if let Err(e) = ensure_mcp_config(dir.path(), 8789) {
        unreachable!("ensure: {e:#}");
    }

    let raw = match std::fs::read(gemini_dir.join("settings.json")) {
        Ok(r) => r,
        Err(e) => unreachable!("read: {e}"),
    };
    let settings: serde_json::Value = match serde_json::from_slice(&raw) {
        Ok(v) => v,
        Err(e) => unreachable!("parse: {e}"),
    };
    // User config survives; ours is added next to it.
    assert_eq!(settings["theme"], "dark");
    assert_eq!(settings["mcpServers"]["custom"]["command"], "my-server");
    assert!(settings["mcpServers"]["agentmux"].is_object());
}

#[test]
fn mcp_config_does_not_overwrite_existing_agentmux_entry() {
    let dir = match tempfile::tempdir() {
        Ok(d) => d,
        Err(e) => unreachable!("tempdir: {e}"),
    };
    let gemini_dir = dir.path().join(".gemini");
    std::fs::create_dir_all(&gemini_dir).ok();
    std::fs::write(
        gemini_dir.join("settings.json"),
        r#"{ "mcpServers": { "agentmux": { "httpUrl": "http://localhost:9999/mcp" } } }"#,
    )
    .ok();

    if let Err(e) = ensure_mcp_config(dir.path(), 8789) {
        unreachable!("ensure: {e:#}");
    }

    let raw = match std::fs::read(gemini_dir.join("settings.json")) {
        Ok(r) => r,
        Err(e) => unreachable!("read: {e}"),
    };
    let settings: serde_json::Value = match serde_json::from_slice(&raw) {
        Ok(v) => v,
        Err(e) => unreachable!("parse: {e}"),
    };
    assert_eq!(
        settings["mcpServers"]["agentmux"]["httpUrl"],
        "http://localhost:9999/mcp"
    );
}
