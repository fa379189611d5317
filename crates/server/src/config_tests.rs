// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use clap::Parser;
use serial_test::serial;

fn parse(args: &[&str]) -> Config {
    let mut argv = vec!["agentmux"];
    argv.extend_from_slice(args);
    match Config::try_parse_from(argv) {
        Ok(c) => c,
        Err(e) => unreachable!("parse failed: {e}"),
    }
}

#[test]
#[serial]
fn defaults_without_env() {
    std::env::remove_var("WEB_PORT");
    std::env::remove_var("AGENTMUX_MCP_PORT");
    std::env::remove_var("DEFAULT_CHECK_INTERVAL");
    let config = parse(&[]);
    assert_eq!(config.web_port(), 8787);
    assert_eq!(config.mcp_port(), 8789);
    assert_eq!(config.check_interval_minutes(), 30);
    assert_eq!(config.auto_commit_interval_minutes(), 30);
}

#[test]
#[serial]
fn env_overrides_defaults() {
    std::env::set_var("WEB_PORT", "9000");
    std::env::set_var("DEFAULT_CHECK_INTERVAL", "5");
    let config = parse(&[]);
    assert_eq!(config.web_port(), 9000);
    assert_eq!(config.check_interval_minutes(), 5);
    std::env::remove_var("WEB_PORT");
    std::env::remove_var("DEFAULT_CHECK_INTERVAL");
}

#[test]
#[serial]
fn flag_beats_env() {
    std::env::set_var("WEB_PORT", "9000");
    let config = parse(&["--port", "8000"]);
    assert_eq!(config.web_port(), 8000);
    std::env::remove_var("WEB_PORT");
}

#[test]
#[serial]
fn invalid_numeric_env_falls_back() {
    std::env::set_var("WEB_PORT", "not-a-port");
    std::env::set_var("AUTO_COMMIT_INTERVAL", "-3");
    let config = parse(&[]);
    assert_eq!(config.web_port(), 8787);
    assert_eq!(config.auto_commit_interval_minutes(), 30);
    std::env::remove_var("WEB_PORT");
    std::env::remove_var("AUTO_COMMIT_INTERVAL");
}

#[test]
#[serial]
fn home_expands_tilde() {
    std::env::set_var("HOME", "/home/muxer");
    std::env::remove_var("AGENTMUX_HOME");
    let config = parse(&[]);
    assert_eq!(config.home_dir(), PathBuf::from("/home/muxer/.agentmux"));

    let config = parse(&["--home", "~/elsewhere"]);
    assert_eq!(config.home_dir(), PathBuf::from("/home/muxer/elsewhere"));
}

#[test]
#[serial]
fn slack_allowed_users_splits_csv() {
    std::env::set_var("SLACK_ALLOWED_USERS", "u1, u2 ,,u3");
    std::env::remove_var("SLACK_BOT_TOKEN");
    let slack = parse(&[]).slack();
    assert_eq!(slack.allowed_users, vec!["u1", "u2", "u3"]);
    assert!(slack.bot_token.is_none());
    std::env::remove_var("SLACK_ALLOWED_USERS");
}

#[test]
fn log_format_validation() {
    assert!(parse(&["--log-format", "json"]).validate().is_ok());
    assert!(parse(&["--log-format", "yaml"]).validate().is_err());
}
