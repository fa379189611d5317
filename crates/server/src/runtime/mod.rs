// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Runtime-specific behavior behind a narrow capability trait.
//!
//! Everything that differs per CLI — init script, readiness and failure
//! patterns, the probe that distinguishes a running TUI from a bare shell,
//! post-init hooks — lives in one flat adapter per runtime. Shared
//! machinery (script execution, readiness polling, the detection cache)
//! lives here.

pub mod claude;
pub mod codex;
pub mod gemini;

use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::backend::SessionBackend;
use crate::error::ErrorCode;

/// Delay between init-script lines.
pub const INIT_LINE_DELAY: Duration = Duration::from_millis(500);

/// Default readiness polling interval.
pub const READY_POLL_INTERVAL: Duration = Duration::from_secs(2);

/// How long a detection probe result stays fresh.
pub const DETECT_CACHE_TTL: Duration = Duration::from_secs(30);

/// Lines captured when scanning for readiness or probe deltas.
pub const SCAN_LINES: usize = 60;

/// Flag-injection marker: injected flags are placed before this argument.
pub const SKIP_PERMISSIONS_FLAG: &str = "--dangerously-skip-permissions";

/// Known AI CLI runtimes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum RuntimeType {
    #[default]
    Claude,
    Gemini,
    Codex,
}

impl RuntimeType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Claude => "claude",
            Self::Gemini => "gemini",
            Self::Codex => "codex",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "claude" => Some(Self::Claude),
            "gemini" => Some(Self::Gemini),
            "codex" => Some(Self::Codex),
            _ => None,
        }
    }
}

impl fmt::Display for RuntimeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Paths handed to `post_initialize`.
#[derive(Debug, Clone)]
pub struct PostInitContext {
    /// AgentMux home directory.
    pub home: PathBuf,
    /// Root of the runtime's own project (the server's working directory).
    pub runtime_root: PathBuf,
    /// The agent's target project.
    pub project_path: PathBuf,
    /// MCP port advertised in generated config files.
    pub mcp_port: u16,
}

/// Per-runtime capability record.
///
/// Object-safe; each runtime is a flat struct implementing these few
/// operations — no inheritance, no shared state.
#[async_trait]
pub trait RuntimeAdapter: Send + Sync {
    fn runtime_type(&self) -> RuntimeType;

    /// Substrings whose appearance in a capture means the CLI accepts input.
    fn ready_patterns(&self) -> &[&'static str];

    /// Substrings that turn a readiness wait into an immediate failure.
    fn error_patterns(&self) -> &[&'static str];

    /// Regexes whose match is evidence of termination or fatal failure.
    fn exit_patterns(&self) -> &[Regex];

    /// Exit patterns that skip the shell-prompt confirmation entirely.
    fn force_exit_patterns(&self) -> &[Regex];

    /// Exit patterns that get retry-with-backoff semantics instead of an
    /// immediate exit (Gemini's transient API failures).
    fn failure_retry_patterns(&self) -> &[Regex] {
        &[]
    }

    /// Shell lines that bring the CLI up inside a fresh session.
    fn init_script(&self) -> &'static str;

    fn ready_timeout(&self) -> Duration {
        Duration::from_secs(60)
    }

    /// Window after session creation during which exit-pattern matches are
    /// suppressed.
    fn startup_grace(&self) -> Duration {
        Duration::ZERO
    }

    /// Probe whether this runtime's TUI (not a bare shell) owns the session.
    async fn probe(&self, backend: &SessionBackend, session_name: &str)
        -> Result<bool, ErrorCode>;

    /// One-shot hook after readiness. Default: nothing to do.
    async fn post_initialize(
        &self,
        _backend: &SessionBackend,
        _session_name: &str,
        _ctx: &PostInitContext,
    ) -> Result<(), ErrorCode> {
        Ok(())
    }
}

/// All adapters, constructed once at startup.
pub struct RuntimeRegistry {
    claude: Arc<dyn RuntimeAdapter>,
    gemini: Arc<dyn RuntimeAdapter>,
    codex: Arc<dyn RuntimeAdapter>,
}

impl RuntimeRegistry {
    pub fn new() -> Self {
        Self {
            claude: Arc::new(claude::ClaudeRuntime::new()),
            gemini: Arc::new(gemini::GeminiRuntime::new()),
            codex: Arc::new(codex::CodexRuntime::new()),
        }
    }

    /// Registry with explicit adapters. Tests substitute stub runtimes.
    pub fn with_adapters(
        claude: Arc<dyn RuntimeAdapter>,
        gemini: Arc<dyn RuntimeAdapter>,
        codex: Arc<dyn RuntimeAdapter>,
    ) -> Self {
        Self { claude, gemini, codex }
    }

    pub fn get(&self, runtime: RuntimeType) -> Arc<dyn RuntimeAdapter> {
        match runtime {
            RuntimeType::Claude => Arc::clone(&self.claude),
            RuntimeType::Gemini => Arc::clone(&self.gemini),
            RuntimeType::Codex => Arc::clone(&self.codex),
        }
    }
}

impl Default for RuntimeRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Rewrite one script command so `flags` land before the
/// skip-permissions marker; commands without the marker get the flags
/// appended.
pub fn inject_flags(command: &str, flags: &[String]) -> String {
    if flags.is_empty() {
        return command.to_owned();
    }
    let joined = flags.join(" ");
    match command.find(SKIP_PERMISSIONS_FLAG) {
        Some(pos) => {
            let (head, tail) = command.split_at(pos);
            format!("{head}{joined} {tail}")
        }
        None => format!("{command} {joined}"),
    }
}

/// Run the runtime's init script inside a session: `cd` to the target,
/// then each meaningful script line, Enter after each, paced so the shell
/// keeps up.
pub async fn execute_init_script(
    backend: &SessionBackend,
    session_name: &str,
    adapter: &dyn RuntimeAdapter,
    target_path: &str,
    flags: &[String],
) -> Result<(), ErrorCode> {
    let cd = format!("cd \"{target_path}\"\r");
    backend.write(session_name, cd.as_bytes()).await?;
    tokio::time::sleep(INIT_LINE_DELAY).await;

    for line in adapter.init_script().lines() {
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }
        let command = inject_flags(trimmed, flags);
        debug!(session = session_name, %command, "init script line");
        backend.write(session_name, command.as_bytes()).await?;
        backend.write(session_name, b"\r").await?;
        tokio::time::sleep(INIT_LINE_DELAY).await;
    }
    Ok(())
}

/// Poll the session capture until a ready pattern appears.
///
/// Returns `Ok(false)` on timeout; an error pattern in the capture turns
/// the wait into an immediate `Ok(false)`.
pub async fn wait_for_ready(
    backend: &SessionBackend,
    session_name: &str,
    adapter: &dyn RuntimeAdapter,
    timeout: Duration,
    interval: Duration,
) -> Result<bool, ErrorCode> {
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        let capture = backend.capture_output(session_name, SCAN_LINES)?;
        if adapter.error_patterns().iter().any(|p| capture.contains(p)) {
            warn!(session = session_name, runtime = %adapter.runtime_type(), "error pattern during readiness wait");
            return Ok(false);
        }
        if adapter.ready_patterns().iter().any(|p| capture.contains(p)) {
            return Ok(true);
        }
        if tokio::time::Instant::now() >= deadline {
            return Ok(false);
        }
        tokio::time::sleep(interval).await;
    }
}

type DetectKey = (String, RuntimeType);

/// Cached, single-flight runtime detection.
///
/// One probe per (session, runtime) key at a time; concurrent callers wait
/// on the in-flight probe and share its result. Results stay fresh for
/// [`DETECT_CACHE_TTL`].
pub struct DetectionCache {
    entries: parking_lot::Mutex<HashMap<DetectKey, Arc<Mutex<Option<(bool, Instant)>>>>>,
}

impl DetectionCache {
    pub fn new() -> Self {
        Self {
            entries: parking_lot::Mutex::new(HashMap::new()),
        }
    }

    /// Detect whether the runtime's TUI owns the session.
    pub async fn detect(
        &self,
        backend: &SessionBackend,
        adapter: &dyn RuntimeAdapter,
        session_name: &str,
        force_refresh: bool,
    ) -> Result<bool, ErrorCode> {
        let key = (session_name.to_owned(), adapter.runtime_type());
        let slot = {
            let mut entries = self.entries.lock();
            Arc::clone(entries.entry(key).or_default())
        };

        // The per-key lock collapses concurrent probes into one.
        let mut cached = slot.lock().await;
        if !force_refresh {
            if let Some((result, at)) = *cached {
                if at.elapsed() < DETECT_CACHE_TTL {
                    return Ok(result);
                }
            }
        }
        let result = adapter.probe(backend, session_name).await?;
        *cached = Some((result, Instant::now()));
        Ok(result)
    }

    /// Forget cached results for a session (on terminate or restart).
    pub fn invalidate(&self, session_name: &str) {
        self.entries.lock().retain(|(name, _), _| name != session_name);
    }
}

impl Default for DetectionCache {
    fn default() -> Self {
        Self::new()
    }
}

/// Compile a list of pattern strings; invalid patterns are dropped with a
/// warning rather than taking the registry down.
pub(crate) fn compile_patterns(patterns: &[&str]) -> Vec<Regex> {
    patterns
        .iter()
        .filter_map(|p| match Regex::new(p) {
            Ok(re) => Some(re),
            Err(e) => {
                warn!(pattern = %p, "invalid runtime pattern dropped: {e}");
                None
            }
        })
        .collect()
}

/// Length-delta probe shared by TUI runtimes with a command palette:
/// capture, send `trigger`, capture again, undo with Backspace. The TUI is
/// considered running when the capture grew by at least `min_growth` bytes.
pub(crate) async fn palette_probe(
    backend: &SessionBackend,
    session_name: &str,
    trigger: &[u8],
    min_growth: usize,
) -> Result<bool, ErrorCode> {
    let before = backend.capture_output(session_name, SCAN_LINES)?;
    backend.write(session_name, trigger).await?;
    tokio::time::sleep(Duration::from_millis(400)).await;
    let after = backend.capture_output(session_name, SCAN_LINES)?;
    // Backspace only: Ctrl+C would quit the TUI and Escape can defocus the
    // input permanently.
    backend.write(session_name, b"\x7f").await?;
    Ok(after.len() >= before.len() + min_growth)
}

#[cfg(test)]
#[path = "runtime_tests.rs"]
mod tests;
