// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Agent registration: the composed lifecycle API over the session backend
//! and runtime service — create, terminate, verify, and the reliable
//! message send path.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::Mutex as AsyncMutex;
use tracing::{debug, info, warn};

use crate::backend::{SessionBackend, SessionSpec};
use crate::error::{validate_session_name, ErrorCode};
use crate::events::EventHub;
use crate::memory::MemoryService;
use crate::monitor::ExitMonitor;
use crate::queue::{MessageMode, MessageQueue, QueuedMessage};
use crate::runtime::{
    execute_init_script, wait_for_ready, DetectionCache, PostInitContext, RuntimeRegistry,
    RuntimeType, READY_POLL_INTERVAL,
};
use crate::scheduler::Scheduler;
use crate::store::{now_epoch_ms, AgentStatus, SessionMeta, StateStore};

/// Total deadline for `create_agent_session`.
pub const CREATE_TIMEOUT: Duration = Duration::from_secs(120);

/// Reliable-send attempt budget.
pub const SEND_ATTEMPTS: u32 = 3;

/// First-retry backoff; doubles per attempt (1 s, 2 s, 4 s).
const SEND_BACKOFF: Duration = Duration::from_secs(1);

/// Pause between submitting the payload Enter and the backup Enter.
const BACKUP_ENTER_DELAY: Duration = Duration::from_millis(500);

/// Echo verification looks for this many leading payload characters.
const ECHO_VERIFY_CHARS: usize = 64;

/// Lines captured when verifying a delivery.
const VERIFY_CAPTURE_LINES: usize = 50;

/// Spacing between messages while draining a queue.
const DRAIN_SPACING: Duration = Duration::from_millis(500);

/// The orchestrator's fixed role string.
pub const ORCHESTRATOR_ROLE: &str = "orchestrator";

/// Parameters for creating (or reusing) an agent session.
#[derive(Debug, Clone)]
pub struct CreateAgentSession {
    pub session_name: String,
    pub role: String,
    pub project_path: PathBuf,
    pub runtime_type: RuntimeType,
    pub team_id: Option<String>,
    pub member_id: Option<String>,
    /// Extra CLI flags injected into the runtime's init script.
    pub flags: Vec<String>,
}

/// Outcome of a create call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreatedSession {
    pub session_name: String,
    /// True when a healthy live session was adopted instead of respawned.
    pub reused: bool,
}

/// Outcome of a gated delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryOutcome {
    /// Delivered to the PTY via the reliable path.
    Sent,
    /// Held in the sub-agent queue until the target goes active.
    Queued,
}

/// Composed lifecycle service.
pub struct AgentRegistration {
    backend: Arc<SessionBackend>,
    store: Arc<StateStore>,
    registry: Arc<RuntimeRegistry>,
    detection: Arc<DetectionCache>,
    queue: Arc<MessageQueue>,
    scheduler: Arc<Scheduler>,
    monitor: Arc<ExitMonitor>,
    memory: Arc<dyn MemoryService>,
    events: EventHub,
    home: PathBuf,
    runtime_root: PathBuf,
    mcp_port: u16,
    /// Serializes queue drains per session.
    drain_locks: Mutex<HashMap<String, Arc<AsyncMutex<()>>>>,
    /// Single-flight guard for background rehydrates of suspended agents.
    rehydrating: Mutex<std::collections::HashSet<String>>,
}

impl AgentRegistration {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        backend: Arc<SessionBackend>,
        store: Arc<StateStore>,
        registry: Arc<RuntimeRegistry>,
        detection: Arc<DetectionCache>,
        queue: Arc<MessageQueue>,
        scheduler: Arc<Scheduler>,
        monitor: Arc<ExitMonitor>,
        memory: Arc<dyn MemoryService>,
        events: EventHub,
        home: PathBuf,
        runtime_root: PathBuf,
        mcp_port: u16,
    ) -> Self {
        Self {
            backend,
            store,
            registry,
            detection,
            queue,
            scheduler,
            monitor,
            memory,
            events,
            home,
            runtime_root,
            mcp_port,
            drain_locks: Mutex::new(HashMap::new()),
            rehydrating: Mutex::new(std::collections::HashSet::new()),
        }
    }

    pub fn backend(&self) -> &Arc<SessionBackend> {
        &self.backend
    }

    /// Create an agent session end to end: spawn shell, run the runtime's
    /// init script, wait for readiness, post-initialize, and move stored
    /// status `starting → started`.
    ///
    /// The whole sequence runs under [`CREATE_TIMEOUT`]; on expiry the
    /// session is torn down and status falls back to `inactive`.
    pub async fn create_agent_session(
        &self,
        params: CreateAgentSession,
    ) -> Result<CreatedSession, ErrorCode> {
        validate_session_name(&params.session_name)?;

        match tokio::time::timeout(CREATE_TIMEOUT, self.create_inner(&params)).await {
            Ok(result) => result,
            Err(_) => {
                warn!(session = %params.session_name, "create timed out, tearing down");
                let _ = self.backend.kill_session(&params.session_name).await;
                self.set_status(&params, AgentStatus::Inactive, "create_timeout");
                Err(ErrorCode::Timeout)
            }
        }
    }

    async fn create_inner(&self, params: &CreateAgentSession) -> Result<CreatedSession, ErrorCode> {
        let name = &params.session_name;
        let adapter = self.registry.get(params.runtime_type);

        // Reuse a live session when the right runtime already owns it;
        // otherwise kill the leftover and start fresh.
        if self.backend.session_exists(name) && self.backend.is_child_process_alive(name) {
            let detected = self
                .detection
                .detect(&self.backend, adapter.as_ref(), name, true)
                .await
                .unwrap_or(false);
            if detected {
                info!(session = %name, runtime = %params.runtime_type, "reusing live session");
                self.set_status(params, AgentStatus::Started, "reused");
                return Ok(CreatedSession { session_name: name.clone(), reused: true });
            }
            info!(session = %name, "stale session without runtime, recreating");
            let _ = self.backend.kill_session(name).await;
        }

        self.set_status(params, AgentStatus::Starting, "create");

        let spec = SessionSpec::shell(name, params.project_path.clone());
        self.backend.create_session(spec).map_err(|e| {
            self.set_status(params, AgentStatus::Inactive, "spawn_failed");
            e
        })?;

        self.store.upsert_session_meta(SessionMeta {
            session_name: name.clone(),
            role: params.role.clone(),
            runtime_type: params.runtime_type,
            project_path: params.project_path.display().to_string(),
            created_at: now_epoch_ms(),
        });
        self.monitor.watch(name, params.runtime_type);

        execute_init_script(
            &self.backend,
            name,
            adapter.as_ref(),
            &params.project_path.display().to_string(),
            &params.flags,
        )
        .await?;

        let ready = wait_for_ready(
            &self.backend,
            name,
            adapter.as_ref(),
            adapter.ready_timeout(),
            READY_POLL_INTERVAL,
        )
        .await?;
        if !ready {
            warn!(session = %name, runtime = %params.runtime_type, "runtime never became ready");
            self.set_status(params, AgentStatus::Inactive, "not_ready");
            return Err(ErrorCode::NotReady);
        }

        let ctx = PostInitContext {
            home: self.home.clone(),
            runtime_root: self.runtime_root.clone(),
            project_path: params.project_path.clone(),
            mcp_port: self.mcp_port,
        };
        adapter.post_initialize(&self.backend, name, &ctx).await?;

        if let Err(e) = self
            .memory
            .initialize_for_session(name, &params.role, &params.project_path.display().to_string())
            .await
        {
            warn!(session = %name, "memory init failed: {e:#}");
        }

        // `activating → active` happens out-of-band when the agent
        // self-registers.
        self.set_status(params, AgentStatus::Started, "ready");
        info!(session = %name, runtime = %params.runtime_type, "agent session created");
        Ok(CreatedSession { session_name: name.clone(), reused: false })
    }

    /// Tear down an agent session: snapshot memory, cancel check-ins, stop
    /// monitoring, kill the PTY, drop queued messages, set `inactive`.
    pub async fn terminate_agent_session(&self, session_name: &str, role: &str) {
        let last_capture = self
            .backend
            .capture_output(session_name, VERIFY_CAPTURE_LINES)
            .unwrap_or_default();
        if let Err(e) = self.memory.on_session_end(session_name, role, &last_capture).await {
            warn!(session = session_name, "memory snapshot failed: {e:#}");
        }

        self.scheduler.cancel_for_session(session_name);
        self.monitor.unwatch(session_name);
        self.detection.invalidate(session_name);
        if let Err(e) = self.backend.kill_session(session_name).await {
            debug!(session = session_name, "kill during terminate: {e}");
        }
        self.queue.clear(session_name);
        self.store.remove_session_meta(session_name);

        if role == ORCHESTRATOR_ROLE {
            self.store.update_orchestrator_status(AgentStatus::Inactive);
            self.events.orchestrator_status(AgentStatus::Inactive, "terminated");
        } else {
            self.store.update_agent_status(session_name, AgentStatus::Inactive);
            self.events.member_status(session_name, None, AgentStatus::Inactive, "terminated");
        }
        info!(session = session_name, "agent session terminated");
    }

    /// Gated delivery: message-mode sends to a tracked, non-orchestrator
    /// member that is not `active` are queued instead of delivered.
    pub async fn deliver_message(
        self: &Arc<Self>,
        session_name: &str,
        payload: &str,
        mode: MessageMode,
    ) -> Result<DeliveryOutcome, ErrorCode> {
        if mode == MessageMode::Message {
            if let Some((_, member)) = self.store.find_member_by_session_name(session_name) {
                if member.role != ORCHESTRATOR_ROLE && member.agent_status != AgentStatus::Active {
                    self.queue.enqueue(session_name, QueuedMessage::new(payload, mode));
                    debug!(
                        session = session_name,
                        status = %member.agent_status,
                        "message queued for inactive member"
                    );
                    if member.agent_status == AgentStatus::Suspended {
                        self.spawn_rehydrate(&member.session_name, &member.role);
                    }
                    return Ok(DeliveryOutcome::Queued);
                }
            }
        }
        self.send_message_to_agent(session_name, payload, mode).await?;
        Ok(DeliveryOutcome::Sent)
    }

    /// The reliable send path.
    ///
    /// Commands are a single write with a trailing Enter. Messages use the
    /// two-stage paste-safe write — payload, scaled delay, Enter, short
    /// delay, backup Enter — then verify the payload echo and retry with
    /// exponential backoff before giving up as [`ErrorCode::StuckAgent`].
    pub async fn send_message_to_agent(
        &self,
        session_name: &str,
        payload: &str,
        mode: MessageMode,
    ) -> Result<(), ErrorCode> {
        match mode {
            MessageMode::Command => {
                let mut bytes = payload.as_bytes().to_vec();
                bytes.push(b'\r');
                self.backend.write(session_name, &bytes).await
            }
            MessageMode::Message => self.send_reliable(session_name, payload).await,
        }
    }

    async fn send_reliable(&self, session_name: &str, payload: &str) -> Result<(), ErrorCode> {
        let needle = echo_needle(payload);
        for attempt in 0..SEND_ATTEMPTS {
            self.backend.write(session_name, payload.as_bytes()).await?;
            tokio::time::sleep(paste_submit_delay(payload.len())).await;
            self.backend.write(session_name, b"\r").await?;
            // TUI paste mode can swallow the inline Enter; the backup one
            // lands after the paste buffer settles.
            tokio::time::sleep(BACKUP_ENTER_DELAY).await;
            self.backend.write(session_name, b"\r").await?;

            let capture = self
                .backend
                .capture_output(session_name, VERIFY_CAPTURE_LINES)
                .unwrap_or_default();
            if needle.is_empty() || capture.contains(&needle) {
                return Ok(());
            }

            let backoff = SEND_BACKOFF.saturating_mul(2u32.saturating_pow(attempt));
            debug!(
                session = session_name,
                attempt, ?backoff, "payload echo missing, retrying send"
            );
            tokio::time::sleep(backoff).await;
        }
        warn!(session = session_name, "reliable send gave up; agent looks stuck");
        Err(ErrorCode::StuckAgent)
    }

    /// Map a symbolic key to its VT sequence and write it. Anything outside
    /// the allowlist is rejected.
    pub async fn send_key_to_agent(&self, session_name: &str, key: &str) -> Result<(), ErrorCode> {
        let bytes = encode_key(key).ok_or(ErrorCode::InvalidInput)?;
        self.backend.write(session_name, &bytes).await
    }

    /// Delegate readiness polling to the runtime service.
    pub async fn wait_for_agent_ready(
        &self,
        session_name: &str,
        timeout: Duration,
        runtime_type: RuntimeType,
    ) -> Result<bool, ErrorCode> {
        let adapter = self.registry.get(runtime_type);
        wait_for_ready(&self.backend, session_name, adapter.as_ref(), timeout, READY_POLL_INTERVAL)
            .await
    }

    /// External self-registration: move the member to `active` and flush
    /// its queue FIFO through the reliable path.
    pub async fn activate_agent(&self, session_name: &str) {
        self.store.update_agent_status(session_name, AgentStatus::Active);
        self.events.member_status(session_name, None, AgentStatus::Active, "registered");
        self.drain_queue(session_name).await;
    }

    /// Drain held messages, serialized per session.
    pub async fn drain_queue(&self, session_name: &str) {
        let lock = {
            let mut locks = self.drain_locks.lock();
            Arc::clone(locks.entry(session_name.to_owned()).or_default())
        };
        let _guard = lock.lock().await;

        let held = self.queue.take_all(session_name);
        if held.is_empty() {
            return;
        }
        info!(session = session_name, count = held.len(), "draining message queue");
        for message in held {
            if let Err(e) = self
                .send_message_to_agent(session_name, &message.payload, message.mode)
                .await
            {
                warn!(session = session_name, "queued delivery failed: {e}");
            }
            tokio::time::sleep(DRAIN_SPACING).await;
        }
    }

    /// Explicit suspend: `active → suspended`, PTY torn down, session
    /// metadata and queued messages kept so a later rehydrate can resume.
    pub async fn suspend_agent(&self, session_name: &str) -> Result<(), ErrorCode> {
        if !self.store.update_agent_status_if(
            session_name,
            AgentStatus::Active,
            AgentStatus::Suspended,
        ) {
            return Err(ErrorCode::InvalidInput);
        }
        self.scheduler.cancel_for_session(session_name);
        self.monitor.unwatch(session_name);
        self.detection.invalidate(session_name);
        if let Err(e) = self.backend.kill_session(session_name).await {
            debug!(session = session_name, "kill during suspend: {e}");
        }
        self.events.member_status(session_name, None, AgentStatus::Suspended, "suspended");
        info!(session = session_name, "agent suspended");
        Ok(())
    }

    /// Fire-and-forget rehydrate of a suspended member, single-flight per
    /// session.
    fn spawn_rehydrate(self: &Arc<Self>, session_name: &str, role: &str) {
        {
            let mut rehydrating = self.rehydrating.lock();
            if !rehydrating.insert(session_name.to_owned()) {
                return;
            }
        }
        info!(session = session_name, role, "rehydrating suspended agent in background");
        // The re-create needs the full identity, resolved from session
        // metadata.
        let meta = self
            .store
            .session_meta()
            .into_iter()
            .find(|m| m.session_name == session_name);
        let Some(meta) = meta else {
            warn!(session = session_name, "no session metadata, cannot rehydrate");
            self.rehydrating.lock().remove(session_name);
            return;
        };
        let this = Arc::clone(self);
        tokio::spawn(async move {
            let params = CreateAgentSession {
                session_name: meta.session_name.clone(),
                role: meta.role.clone(),
                project_path: PathBuf::from(&meta.project_path),
                runtime_type: meta.runtime_type,
                team_id: None,
                member_id: None,
                flags: vec![],
            };
            if let Err(e) = this.create_agent_session(params).await {
                warn!(session = %meta.session_name, "rehydrate failed: {e}");
            }
            this.rehydrating.lock().remove(&meta.session_name);
        });
    }

    /// Status write with role dispatch and event emission. Registration is
    /// the only blind status writer in the system.
    fn set_status(&self, params: &CreateAgentSession, status: AgentStatus, reason: &str) {
        if params.role == ORCHESTRATOR_ROLE {
            self.store.update_orchestrator_status(status);
            self.events.orchestrator_status(status, reason);
        } else {
            self.store.update_agent_status(&params.session_name, status);
            self.events.member_status(
                &params.session_name,
                params.member_id.as_deref(),
                status,
                reason,
            );
        }
    }
}

/// Scaled submit delay for the two-stage write:
/// `min(1000 + ceil(len / 10), 5000)` milliseconds.
pub fn paste_submit_delay(payload_len: usize) -> Duration {
    let ms = 1000 + payload_len.div_ceil(10) as u64;
    Duration::from_millis(ms.min(5000))
}

/// First line of the payload's leading characters, used for echo
/// verification.
fn echo_needle(payload: &str) -> String {
    let first_line = payload.lines().next().unwrap_or("");
    first_line.chars().take(ECHO_VERIFY_CHARS).collect()
}

/// Symbolic key → VT escape sequence. The allowlist is deliberate: only
/// keys the orchestration layer has a reason to send.
pub fn encode_key(name: &str) -> Option<Vec<u8>> {
    let bytes: &[u8] = match name.to_lowercase().as_str() {
        "enter" | "return" => b"\r",
        "escape" => b"\x1b",
        "tab" => b"\t",
        "backspace" => b"\x7f",
        "delete" => b"\x1b[3~",
        "up" => b"\x1b[A",
        "down" => b"\x1b[B",
        "right" => b"\x1b[C",
        "left" => b"\x1b[D",
        "home" => b"\x1b[H",
        "end" => b"\x1b[F",
        "pageup" => b"\x1b[5~",
        "pagedown" => b"\x1b[6~",
        "c-c" => b"\x03",
        "c-d" => b"\x04",
        "c-z" => b"\x1a",
        "c-l" => b"\x0c",
        _ => return None,
    };
    Some(bytes.to_vec())
}

#[cfg(test)]
#[path = "registration_tests.rs"]
mod tests;
