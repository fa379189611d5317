// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Gemini CLI runtime adapter.
//!
//! Gemini's TUI needs the most care of the three runtimes: its command
//! palette doubles as the liveness probe, transient API failures must not
//! be mistaken for exits, and workspace directories have to be allowlisted
//! with `/directory add` after startup.

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use regex::Regex;
use tracing::{debug, warn};

use crate::backend::SessionBackend;
use crate::error::ErrorCode;

use super::{
    compile_patterns, palette_probe, PostInitContext, RuntimeAdapter, RuntimeType, SCAN_LINES,
};

const READY_PATTERNS: &[&str] = &[
    "Type your message",
    "Type your message or @path/to/file",
];

const ERROR_PATTERNS: &[&str] = &[
    "command not found: gemini",
    "gemini: command not found",
    "FatalAuthenticationError",
];

/// Transient API failures: the TUI usually survives these, so they get
/// retry-with-backoff semantics before counting as an exit.
const FAILURE_RETRY_PATTERNS: &[&str] = &[
    "RESOURCE_EXHAUSTED",
    "Connection error",
    "Request cancelled",
    r"(?i)rate limit",
    "ECONNRESET",
];

const EXIT_PATTERNS: &[&str] = &[
    "RESOURCE_EXHAUSTED",
    "Connection error",
    "Request cancelled",
    r"(?i)rate limit",
    "ECONNRESET",
    r"(?i)agent powering down",
    r"(?i)quota exceeded",
    r"gemini: command not found",
    r"command not found: gemini",
];

/// Auto-update banners: the CLI restarts itself, which we treat as an exit
/// without requiring shell-prompt evidence.
const FORCE_EXIT_PATTERNS: &[&str] = &[
    r"(?i)a new version of gemini cli is available",
    r"(?i)update available.*restart",
];

/// Settle time for the auto-update banner before post-init writes.
const POST_INIT_SETTLE: Duration = Duration::from_secs(3);

/// Attempts per `/directory add` path.
const DIRECTORY_ADD_ATTEMPTS: u32 = 3;

/// Wait after each `/directory add` before verifying via capture delta.
const DIRECTORY_ADD_WAIT: Duration = Duration::from_secs(2);

/// Probe growth threshold: opening the palette repaints at least this much.
const PALETTE_MIN_GROWTH: usize = 6;

pub struct GeminiRuntime {
    exit: Vec<Regex>,
    force_exit: Vec<Regex>,
    failure_retry: Vec<Regex>,
}

impl GeminiRuntime {
    pub fn new() -> Self {
        Self {
            exit: compile_patterns(EXIT_PATTERNS),
            force_exit: compile_patterns(FORCE_EXIT_PATTERNS),
            failure_retry: compile_patterns(FAILURE_RETRY_PATTERNS),
        }
    }
}

impl Default for GeminiRuntime {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RuntimeAdapter for GeminiRuntime {
    fn runtime_type(&self) -> RuntimeType {
        RuntimeType::Gemini
    }

    fn ready_patterns(&self) -> &[&'static str] {
        READY_PATTERNS
    }

    fn error_patterns(&self) -> &[&'static str] {
        ERROR_PATTERNS
    }

    fn exit_patterns(&self) -> &[Regex] {
        &self.exit
    }

    fn force_exit_patterns(&self) -> &[Regex] {
        &self.force_exit
    }

    fn failure_retry_patterns(&self) -> &[Regex] {
        &self.failure_retry
    }

    fn init_script(&self) -> &'static str {
        "# Bring up the Gemini CLI in auto-accept mode.\n\
         gemini --yolo\n"
    }

    fn ready_timeout(&self) -> Duration {
        Duration::from_secs(90)
    }

    fn startup_grace(&self) -> Duration {
        // The banner prints immediately and mentions phrases that overlap
        // the exit set.
        Duration::from_secs(3)
    }

    /// `/` opens the command palette when Gemini is active; a bare shell
    /// just echoes one byte. Undone with Backspace — never Ctrl+C (quits
    /// the TUI) or Escape (defocuses the input permanently).
    async fn probe(
        &self,
        backend: &SessionBackend,
        session_name: &str,
    ) -> Result<bool, ErrorCode> {
        palette_probe(backend, session_name, b"/", PALETTE_MIN_GROWTH).await
    }

    /// Allowlist the workspace directories and make sure an MCP config
    /// exists for the project.
    async fn post_initialize(
        &self,
        backend: &SessionBackend,
        session_name: &str,
        ctx: &PostInitContext,
    ) -> Result<(), ErrorCode> {
        // Let the auto-update banner settle before typing into the TUI.
        tokio::time::sleep(POST_INIT_SETTLE).await;

        for dir in [&ctx.home, &ctx.runtime_root, &ctx.project_path] {
            add_directory(backend, session_name, &dir.display().to_string()).await?;
        }

        if let Err(e) = ensure_mcp_config(&ctx.project_path, ctx.mcp_port) {
            // Config trouble shouldn't block the agent from coming up.
            warn!(session = session_name, "gemini mcp config: {e:#}");
        }
        Ok(())
    }
}

/// Issue `/directory add <path> ` (trailing space keeps the palette from
/// autocompleting) and verify via output-length delta, retrying a few
/// times.
async fn add_directory(
    backend: &SessionBackend,
    session_name: &str,
    path: &str,
) -> Result<(), ErrorCode> {
    for attempt in 1..=DIRECTORY_ADD_ATTEMPTS {
        let before = backend.capture_output(session_name, SCAN_LINES)?;
        let command = format!("/directory add {path} ");
        backend.write(session_name, command.as_bytes()).await?;
        backend.write(session_name, b"\r").await?;
        tokio::time::sleep(DIRECTORY_ADD_WAIT).await;
        let after = backend.capture_output(session_name, SCAN_LINES)?;
        if after.len() > before.len() {
            debug!(session = session_name, path, attempt, "directory allowlisted");
            return Ok(());
        }
        warn!(session = session_name, path, attempt, "directory add produced no output, retrying");
    }
    // Give up without failing the whole post-init; the agent may still work
    // inside its own project directory.
    warn!(session = session_name, path, "directory add exhausted retries");
    Ok(())
}

/// Ensure `<project>/.gemini/settings.json` registers the agentmux MCP
/// server, merging with (never clobbering) user-configured servers.
fn ensure_mcp_config(project_path: &Path, mcp_port: u16) -> anyhow::Result<()> {
    let dir = project_path.join(".gemini");
    std::fs::create_dir_all(&dir)?;
    let path = dir.join("settings.json");

    let mut settings: serde_json::Value = match std::fs::read(&path) {
        Ok(bytes) => serde_json::from_slice(&bytes)?,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => serde_json::json!({}),
        Err(e) => return Err(e.into()),
    };

    let Some(root) = settings.as_object_mut() else {
        anyhow::bail!("settings.json is not a JSON object");
    };
    let servers = root
        .entry("mcpServers")
        .or_insert_with(|| serde_json::json!({}));
    let Some(servers) = servers.as_object_mut() else {
        anyhow::bail!("mcpServers is not a JSON object");
    };
    if servers.contains_key("agentmux") {
        return Ok(());
    }
    servers.insert(
        "agentmux".to_owned(),
        serde_json::json!({ "httpUrl": format!("http://localhost:{mcp_port}/mcp") }),
    );

    let contents = serde_json::to_string_pretty(&settings)?;
    std::fs::write(&path, contents)?;
    Ok(())
}

#[cfg(test)]
#[path = "gemini_tests.rs"]
mod tests;
