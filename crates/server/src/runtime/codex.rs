// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Codex CLI runtime adapter.

use std::time::Duration;

use async_trait::async_trait;
use regex::Regex;

use crate::backend::SessionBackend;
use crate::error::ErrorCode;

use super::{compile_patterns, palette_probe, RuntimeAdapter, RuntimeType};

const READY_PATTERNS: &[&str] = &[
    "Ask Codex",
    "codex>",
    "OpenAI Codex",
];

const ERROR_PATTERNS: &[&str] = &[
    "command not found: codex",
    "codex: command not found",
    "Not logged in",
];

const EXIT_PATTERNS: &[&str] = &[
    r"(?i)conversation interrupted",
    r"(?i)codex (session|process) (ended|exited)",
    r"codex: command not found",
    r"command not found: codex",
];

/// "Conversation interrupted" means the TUI already gave up; no
/// shell-prompt confirmation needed.
const FORCE_EXIT_PATTERNS: &[&str] = &[r"(?i)conversation interrupted"];

/// Codex repaints less than Gemini when its palette opens.
const PALETTE_MIN_GROWTH: usize = 4;

pub struct CodexRuntime {
    exit: Vec<Regex>,
    force_exit: Vec<Regex>,
}

impl CodexRuntime {
    pub fn new() -> Self {
        Self {
            exit: compile_patterns(EXIT_PATTERNS),
            force_exit: compile_patterns(FORCE_EXIT_PATTERNS),
        }
    }
}

impl Default for CodexRuntime {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RuntimeAdapter for CodexRuntime {
    fn runtime_type(&self) -> RuntimeType {
        RuntimeType::Codex
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
        "# Bring up the Codex CLI with sandbox prompts disabled.\n\
         codex --dangerously-skip-permissions\n"
    }

    fn ready_timeout(&self) -> Duration {
        Duration::from_secs(60)
    }

    /// Same palette trick as Gemini, with Codex's smaller repaint.
    async fn probe(
        &self,
        backend: &SessionBackend,
        session_name: &str,
    ) -> Result<bool, ErrorCode> {
        palette_probe(backend, session_name, b"/", PALETTE_MIN_GROWTH).await
    }
}

#[cfg(test)]
#[path = "codex_tests.rs"]
mod tests;
