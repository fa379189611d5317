// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::path::PathBuf;

use clap::Parser;
use tracing::warn;

/// Multi-agent orchestration server for AI coding CLIs.
#[derive(Debug, Parser)]
#[command(name = "agentmux", version, about)]
pub struct Config {
    /// HTTP port to listen on (overrides WEB_PORT).
    #[arg(long)]
    pub port: Option<u16>,

    /// Host address to bind to.
    #[arg(long, env = "AGENTMUX_HOST", default_value = "0.0.0.0")]
    pub host: String,

    /// MCP port advertised to runtimes (overrides AGENTMUX_MCP_PORT).
    #[arg(long)]
    pub mcp_port: Option<u16>,

    /// AgentMux home directory (state files, memory snapshots).
    #[arg(long, env = "AGENTMUX_HOME")]
    pub home: Option<PathBuf>,

    /// Default check-in interval in minutes (overrides DEFAULT_CHECK_INTERVAL).
    #[arg(long)]
    pub check_interval: Option<u64>,

    /// Auto-commit reminder interval in minutes (overrides AUTO_COMMIT_INTERVAL).
    #[arg(long)]
    pub auto_commit_interval: Option<u64>,

    /// Log format (json or text).
    #[arg(long, env = "AGENTMUX_LOG_FORMAT", default_value = "json")]
    pub log_format: String,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, env = "AGENTMUX_LOG_LEVEL", default_value = "info")]
    pub log_level: String,
}

/// Slack credentials picked up from the environment. All optional; the
/// notifier degrades to a no-op when the bot token is absent.
#[derive(Debug, Clone, Default)]
pub struct SlackConfig {
    pub bot_token: Option<String>,
    pub app_token: Option<String>,
    pub signing_secret: Option<String>,
    pub default_channel: Option<String>,
    pub allowed_users: Vec<String>,
}

impl Config {
    /// HTTP port: flag, then `WEB_PORT`, then 8787.
    pub fn web_port(&self) -> u16 {
        self.port.unwrap_or_else(|| env_u16("WEB_PORT", 8787))
    }

    /// MCP port: flag, then `AGENTMUX_MCP_PORT`, then 8789.
    pub fn mcp_port(&self) -> u16 {
        self.mcp_port.unwrap_or_else(|| env_u16("AGENTMUX_MCP_PORT", 8789))
    }

    /// Check-in interval in minutes: flag, then `DEFAULT_CHECK_INTERVAL`, then 30.
    pub fn check_interval_minutes(&self) -> u64 {
        self.check_interval.unwrap_or_else(|| env_u64("DEFAULT_CHECK_INTERVAL", 30))
    }

    /// Auto-commit interval in minutes: flag, then `AUTO_COMMIT_INTERVAL`, then 30.
    pub fn auto_commit_interval_minutes(&self) -> u64 {
        self.auto_commit_interval.unwrap_or_else(|| env_u64("AUTO_COMMIT_INTERVAL", 30))
    }

    /// AgentMux home directory: flag/env, then `~/.agentmux` with `~` expanded.
    pub fn home_dir(&self) -> PathBuf {
        match &self.home {
            Some(p) => expand_tilde(p),
            None => default_home(),
        }
    }

    /// Slack settings from the environment.
    pub fn slack(&self) -> SlackConfig {
        SlackConfig {
            bot_token: env_nonempty("SLACK_BOT_TOKEN"),
            app_token: env_nonempty("SLACK_APP_TOKEN"),
            signing_secret: env_nonempty("SLACK_SIGNING_SECRET"),
            default_channel: env_nonempty("SLACK_DEFAULT_CHANNEL"),
            allowed_users: env_nonempty("SLACK_ALLOWED_USERS")
                .map(|v| v.split(',').map(|s| s.trim().to_owned()).filter(|s| !s.is_empty()).collect())
                .unwrap_or_default(),
        }
    }

    /// Validate the configuration after parsing.
    pub fn validate(&self) -> anyhow::Result<()> {
        match self.log_format.as_str() {
            "json" | "text" => {}
            other => anyhow::bail!("invalid log format: {other}"),
        }
        Ok(())
    }
}

/// Resolve a numeric env var as a decimal `u64`, warning and falling back
/// to `default` on anything unparseable.
pub fn env_u64(name: &str, default: u64) -> u64 {
    match std::env::var(name) {
        Ok(raw) => match raw.trim().parse::<u64>() {
            Ok(v) => v,
            Err(_) => {
                warn!(var = name, value = %raw, default, "invalid numeric env var, using default");
                default
            }
        },
        Err(_) => default,
    }
}

/// Resolve a numeric env var as a decimal `u16`, warning and falling back
/// to `default` on anything unparseable or out of range.
pub fn env_u16(name: &str, default: u16) -> u16 {
    match std::env::var(name) {
        Ok(raw) => match raw.trim().parse::<u16>() {
            Ok(v) => v,
            Err(_) => {
                warn!(var = name, value = %raw, default, "invalid numeric env var, using default");
                default
            }
        },
        Err(_) => default,
    }
}

fn env_nonempty(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

fn default_home() -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_owned());
    PathBuf::from(home).join(".agentmux")
}

fn expand_tilde(path: &std::path::Path) -> PathBuf {
    let Some(s) = path.to_str() else {
        return path.to_path_buf();
    };
    if s == "~" {
        let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_owned());
        return PathBuf::from(home);
    }
    if let Some(rest) = s.strip_prefix("~/") {
        let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_owned());
        return PathBuf::from(home).join(rest);
    }
    path.to_path_buf()
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;
