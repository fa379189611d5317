// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Exit monitor: decides that an agent exited, crashed, or got stuck, and
//! hands the evidence to the restart path.
//!
//! Two independent evidences are combined per session: pattern matches on
//! the output stream (debounced, confirmed against a shell prompt) and
//! child-process liveness polling. Confirmed exits are emitted as
//! [`ExitEvent`]s on a channel; the supervisor loop owns the reaction, so
//! the monitor never calls back into restart machinery.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use regex::Regex;
use tokio::sync::{broadcast, mpsc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::ansi;
use crate::backend::SessionBackend;
use crate::ring::RingBuffer;
use crate::runtime::{RuntimeAdapter, RuntimeRegistry, RuntimeType, SCAN_LINES};

/// Rolling per-session evidence window.
pub const ROLLING_CAPACITY: usize = 64 * 1024;

/// Pattern matches are confirmed only after this debounce.
pub const CONFIRM_DEBOUNCE: Duration = Duration::from_millis(500);

/// Child liveness polling cadence.
pub const PROCESS_POLL_INTERVAL: Duration = Duration::from_secs(5);

/// Liveness results are ignored for this long after session creation.
pub const PROCESS_POLL_GRACE: Duration = Duration::from_secs(30);

/// Bound on Gemini failure-retry cycles before a real exit is declared.
pub const MAX_FAILURE_RETRIES: u32 = 5;

const RETRY_INITIAL_BACKOFF: Duration = Duration::from_secs(1);
const RETRY_MAX_BACKOFF: Duration = Duration::from_secs(30);

/// Stripped tail of the rolling ring scanned per chunk.
const SCAN_TAIL_BYTES: usize = 8 * 1024;

/// Why the monitor declared an exit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExitReason {
    /// An exit pattern matched and survived confirmation.
    PatternMatch { pattern: String },
    /// The child process disappeared.
    ChildDead,
}

impl ExitReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::PatternMatch { .. } => "pattern_match",
            Self::ChildDead => "child_dead",
        }
    }
}

/// A confirmed exit, ready for the restart path.
#[derive(Debug, Clone)]
pub struct ExitEvent {
    pub session_name: String,
    pub runtime_type: RuntimeType,
    pub reason: ExitReason,
    /// Stripped tail of the rolling buffer at exit time, for the memory
    /// snapshot.
    pub last_output: String,
}

struct WatchHandle {
    cancel: CancellationToken,
    exit_detected: Arc<AtomicBool>,
}

/// The exit monitor. One watch task per monitored session.
pub struct ExitMonitor {
    backend: Arc<SessionBackend>,
    registry: Arc<RuntimeRegistry>,
    exit_tx: mpsc::UnboundedSender<ExitEvent>,
    watches: Mutex<HashMap<String, WatchHandle>>,
    shutdown: CancellationToken,
    poll_interval: Duration,
    poll_grace: Duration,
    retry_initial_backoff: Duration,
}

impl ExitMonitor {
    pub fn new(
        backend: Arc<SessionBackend>,
        registry: Arc<RuntimeRegistry>,
        exit_tx: mpsc::UnboundedSender<ExitEvent>,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            backend,
            registry,
            exit_tx,
            watches: Mutex::new(HashMap::new()),
            shutdown,
            poll_interval: PROCESS_POLL_INTERVAL,
            poll_grace: PROCESS_POLL_GRACE,
            retry_initial_backoff: RETRY_INITIAL_BACKOFF,
        }
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn with_poll_grace(mut self, grace: Duration) -> Self {
        self.poll_grace = grace;
        self
    }

    pub fn with_retry_backoff(mut self, initial: Duration) -> Self {
        self.retry_initial_backoff = initial;
        self
    }

    /// Start monitoring a session. Replaces any existing watch for the name.
    pub fn watch(&self, session_name: &str, runtime_type: RuntimeType) {
        self.unwatch(session_name);

        let Ok(data_rx) = self.backend.subscribe(session_name) else {
            warn!(session = session_name, "watch requested for unknown session");
            return;
        };
        let cancel = CancellationToken::new();
        let exit_detected = Arc::new(AtomicBool::new(false));
        self.watches.lock().insert(
            session_name.to_owned(),
            WatchHandle {
                cancel: cancel.clone(),
                exit_detected: Arc::clone(&exit_detected),
            },
        );

        let task = WatchTask {
            session_name: session_name.to_owned(),
            runtime_type,
            adapter: self.registry.get(runtime_type),
            backend: Arc::clone(&self.backend),
            exit_tx: self.exit_tx.clone(),
            exit_detected,
            cancel,
            shutdown: self.shutdown.clone(),
            poll_interval: self.poll_interval,
            poll_grace: self.poll_grace,
            retry_initial_backoff: self.retry_initial_backoff,
        };
        tokio::spawn(task.run(data_rx));
        debug!(session = session_name, runtime = %runtime_type, "exit monitoring started");
    }

    /// Stop monitoring and drop the rolling tracker.
    pub fn unwatch(&self, session_name: &str) {
        if let Some(handle) = self.watches.lock().remove(session_name) {
            handle.cancel.cancel();
        }
    }

    pub fn is_watched(&self, session_name: &str) -> bool {
        self.watches.lock().contains_key(session_name)
    }

    /// Whether an exit has already been detected for the session.
    pub fn exit_detected(&self, session_name: &str) -> bool {
        self.watches
            .lock()
            .get(session_name)
            .map(|h| h.exit_detected.load(Ordering::Acquire))
            .unwrap_or(false)
    }
}

/// A pattern match pending debounce confirmation.
struct PendingMatch {
    deadline: tokio::time::Instant,
    pattern: String,
    is_force: bool,
    is_retry: bool,
}

struct WatchTask {
    session_name: String,
    runtime_type: RuntimeType,
    adapter: Arc<dyn RuntimeAdapter>,
    backend: Arc<SessionBackend>,
    exit_tx: mpsc::UnboundedSender<ExitEvent>,
    exit_detected: Arc<AtomicBool>,
    cancel: CancellationToken,
    shutdown: CancellationToken,
    poll_interval: Duration,
    poll_grace: Duration,
    retry_initial_backoff: Duration,
}

impl WatchTask {
    async fn run(self, mut data_rx: broadcast::Receiver<bytes::Bytes>) {
        let mut rolling = RingBuffer::new(ROLLING_CAPACITY);
        let started = tokio::time::Instant::now();
        let mut poll = tokio::time::interval(self.poll_interval);
        poll.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        let mut pending: Option<PendingMatch> = None;
        let mut failure_retries: u32 = 0;
        let mut stream_open = true;

        loop {
            let debounce_deadline =
                pending.as_ref().map(|p| p.deadline).unwrap_or_else(far_future);

            tokio::select! {
                chunk = data_rx.recv(), if stream_open => {
                    match chunk {
                        Ok(bytes) => {
                            rolling.write(&bytes);
                            if started.elapsed() < self.adapter.startup_grace() {
                                continue;
                            }
                            let tail = ansi::strip(&rolling.tail(SCAN_TAIL_BYTES));
                            if let Some(found) = classify_exit_match(self.adapter.as_ref(), &tail) {
                                // Start or refresh the confirmation debounce.
                                pending = Some(PendingMatch {
                                    deadline: tokio::time::Instant::now() + CONFIRM_DEBOUNCE,
                                    pattern: found.pattern,
                                    is_force: found.is_force,
                                    is_retry: found.is_retry,
                                });
                            }
                        }
                        Err(broadcast::error::RecvError::Lagged(skipped)) => {
                            debug!(session = %self.session_name, skipped, "monitor lagged behind output");
                        }
                        Err(broadcast::error::RecvError::Closed) => {
                            // Output stream gone; liveness polling decides.
                            stream_open = false;
                        }
                    }
                }

                _ = tokio::time::sleep_until(debounce_deadline), if pending.is_some() => {
                    let Some(matched) = pending.take() else { continue };
                    match self.confirm_and_react(&matched, &rolling, &mut failure_retries).await {
                        Reaction::Exit => {
                            self.fire(ExitReason::PatternMatch { pattern: matched.pattern }, &rolling);
                            break;
                        }
                        Reaction::Ignore => {}
                    }
                }

                _ = poll.tick() => {
                    if started.elapsed() < self.poll_grace {
                        continue;
                    }
                    if !self.backend.is_child_process_alive(&self.session_name) {
                        self.fire(ExitReason::ChildDead, &rolling);
                        break;
                    }
                }

                _ = self.cancel.cancelled() => break,
                _ = self.shutdown.cancelled() => break,
            }
        }
    }

    /// Post-debounce confirmation, including Gemini failure-retry handling.
    async fn confirm_and_react(
        &self,
        matched: &PendingMatch,
        rolling: &RingBuffer,
        failure_retries: &mut u32,
    ) -> Reaction {
        if matched.is_retry {
            return self.failure_retry_cycle(failure_retries).await;
        }

        if matched.is_force {
            info!(session = %self.session_name, pattern = %matched.pattern, "forced exit pattern confirmed");
            return Reaction::Exit;
        }

        // A shell prompt in the evidence window means the TUI is really
        // gone; the runtime legitimately printing the phrase mid-conversation
        // does not count.
        let tail = ansi::strip(&rolling.tail(SCAN_TAIL_BYTES));
        if has_shell_prompt(&tail) {
            info!(session = %self.session_name, pattern = %matched.pattern, "exit pattern confirmed at shell prompt");
            Reaction::Exit
        } else {
            debug!(session = %self.session_name, pattern = %matched.pattern, "exit pattern without shell prompt, ignoring");
            Reaction::Ignore
        }
    }

    /// Transient-failure handling: back off, re-capture, and only declare
    /// exit once the retry budget is exhausted without a recovery.
    async fn failure_retry_cycle(&self, failure_retries: &mut u32) -> Reaction {
        let backoff = retry_backoff(self.retry_initial_backoff, *failure_retries);
        debug!(
            session = %self.session_name,
            retries = *failure_retries,
            ?backoff,
            "transient failure pattern, backing off"
        );
        tokio::time::sleep(backoff).await;

        let capture = self
            .backend
            .capture_output(&self.session_name, SCAN_LINES)
            .unwrap_or_default();
        if self.adapter.ready_patterns().iter().any(|p| capture.contains(p)) {
            debug!(session = %self.session_name, "runtime recovered, resetting failure retries");
            *failure_retries = 0;
            return Reaction::Ignore;
        }

        *failure_retries += 1;
        if *failure_retries >= MAX_FAILURE_RETRIES {
            warn!(session = %self.session_name, "failure retries exhausted");
            Reaction::Exit
        } else {
            Reaction::Ignore
        }
    }

    /// Idempotent exit emission.
    fn fire(&self, reason: ExitReason, rolling: &RingBuffer) {
        if self.exit_detected.swap(true, Ordering::AcqRel) {
            return;
        }
        info!(session = %self.session_name, reason = reason.as_str(), "exit detected");
        let event = ExitEvent {
            session_name: self.session_name.clone(),
            runtime_type: self.runtime_type,
            reason,
            last_output: ansi::strip(&rolling.snapshot()),
        };
        let _ = self.exit_tx.send(event);
    }
}

enum Reaction {
    Exit,
    Ignore,
}

struct ExitMatch {
    pattern: String,
    is_force: bool,
    is_retry: bool,
}

/// Scan text against the runtime's exit patterns, classifying the first
/// match. Retry classification wins over force (a transient failure is
/// never forced).
fn classify_exit_match(adapter: &dyn RuntimeAdapter, text: &str) -> Option<ExitMatch> {
    let matched = adapter.exit_patterns().iter().find(|re| re.is_match(text))?;
    let pattern = matched.as_str().to_owned();
    let in_set = |set: &[Regex]| set.iter().any(|re| re.as_str() == pattern);
    let is_retry = in_set(adapter.failure_retry_patterns());
    let is_force = in_set(adapter.force_exit_patterns());
    Some(ExitMatch { pattern, is_force, is_retry })
}

/// Shell prompt evidence: `$`, `#`, or a `user@host:` fragment.
fn has_shell_prompt(text: &str) -> bool {
    if text.contains('$') || text.contains('#') {
        return true;
    }
    static USER_HOST: std::sync::OnceLock<Regex> = std::sync::OnceLock::new();
    let re = USER_HOST.get_or_init(|| {
        #[allow(clippy::unwrap_used)]
        Regex::new(r"[A-Za-z0-9_][A-Za-z0-9_.-]*@[A-Za-z0-9.-]+:").unwrap()
    });
    re.is_match(text)
}

/// Exponential backoff: `initial × 2^n`, capped at [`RETRY_MAX_BACKOFF`].
fn retry_backoff(initial: Duration, n: u32) -> Duration {
    initial.saturating_mul(2u32.saturating_pow(n)).min(RETRY_MAX_BACKOFF)
}

fn far_future() -> tokio::time::Instant {
    tokio::time::Instant::now() + Duration::from_secs(86400)
}

#[cfg(test)]
#[path = "monitor_tests.rs"]
mod tests;
