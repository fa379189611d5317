// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Claude Code runtime adapter.

use std::time::Duration;

use async_trait::async_trait;
use regex::Regex;

use crate::backend::SessionBackend;
use crate::error::ErrorCode;

use super::{compile_patterns, RuntimeAdapter, RuntimeType, SCAN_LINES};

/// Claude Code renders `❯` (U+276F) at the start of its input line.
const PROMPT_MARKER: &str = "\u{276f}";

const READY_PATTERNS: &[&str] = &[
    PROMPT_MARKER,
    "? for shortcuts",
    "Bypassing Permissions",
    "Welcome to Claude Code",
];

const ERROR_PATTERNS: &[&str] = &[
    "command not found: claude",
    "claude: command not found",
    "Invalid API key",
    "authentication_error",
];

/// Narrow termination banners; Claude mostly just drops back to the shell.
const EXIT_PATTERNS: &[&str] = &[
    r"(?i)claude code (session|process) (ended|exited)",
    r"claude: command not found",
    r"command not found: claude",
];

pub struct ClaudeRuntime {
    exit: Vec<Regex>,
    force_exit: Vec<Regex>,
}

impl ClaudeRuntime {
    pub fn new() -> Self {
        Self {
            exit: compile_patterns(EXIT_PATTERNS),
            force_exit: Vec::new(),
        }
    }
}

impl Default for ClaudeRuntime {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RuntimeAdapter for ClaudeRuntime {
    fn runtime_type(&self) -> RuntimeType {
        RuntimeType::Claude
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

    fn init_script(&self) -> &'static str {
        "# Bring up Claude Code with permission prompts disabled.\n\
         claude --dangerously-skip-permissions\n"
    }

    fn ready_timeout(&self) -> Duration {
        Duration::from_secs(60)
    }

    /// Escape is a no-op at Claude's idle prompt (it cancels pending input
    /// only), so it works as the probe nudge: dismiss any transient overlay
    /// and look for the distinctive prompt.
    async fn probe(
        &self,
        backend: &SessionBackend,
        session_name: &str,
    ) -> Result<bool, ErrorCode> {
        backend.write(session_name, b"\x1b").await?;
        tokio::time::sleep(Duration::from_millis(400)).await;
        let capture = backend.capture_output(session_name, SCAN_LINES)?;
        Ok(capture.contains(PROMPT_MARKER)
            || capture.contains("? for shortcuts")
            || capture.contains("Bypassing Permissions"))
    }
}

#[cfg(test)]
#[path = "claude_tests.rs"]
mod tests;
