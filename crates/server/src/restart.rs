// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Restart controller: bounded-rate recovery for exited agents and the
//! orchestrator.
//!
//! Consumes [`ExitEvent`]s from the exit monitor (via the supervisor loop)
//! and decides between re-creating the session and letting it rest as
//! `inactive`. Restarts are non-reentrant per session and rate limited by
//! a sliding cooldown window.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tracing::{info, warn};

use crate::error::ErrorCode;
use crate::events::{EventHub, ServerEvent};
use crate::memory::MemoryService;
use crate::monitor::ExitEvent;
use crate::queue::MessageMode;
use crate::registration::{
    AgentRegistration, CreateAgentSession, CreatedSession, ORCHESTRATOR_ROLE,
};
use crate::runtime::RuntimeType;
use crate::scheduler::Scheduler;
use crate::slack::SlackNotifier;
use crate::store::{AgentStatus, StateStore, TeamMember};
use crate::tasks::TaskTracker;

/// Sliding window over which successful restarts are counted.
pub const COOLDOWN_WINDOW: Duration = Duration::from_secs(60 * 60);

/// Maximum successful restarts per session within the window.
pub const MAX_RESTARTS_PER_WINDOW: usize = 3;

/// Drain pause between killing a residual PTY and re-creating.
pub const RESTART_DELAY: Duration = Duration::from_millis(500);

/// The orchestrator's well-known session name.
pub const ORCHESTRATOR_SESSION: &str = "agentmux-orc";

/// Per-session restart accounting.
#[derive(Debug, Default)]
struct RestartWindow {
    /// Completion times of successful restarts inside the window.
    timestamps: Vec<Instant>,
    total_restarts: u64,
    last_restart_at: Option<Instant>,
    is_restarting: bool,
}

impl RestartWindow {
    fn prune(&mut self, window: Duration) {
        self.timestamps.retain(|t| t.elapsed() < window);
    }
}

pub struct RestartController {
    registration: Arc<AgentRegistration>,
    store: Arc<StateStore>,
    tasks: Arc<dyn TaskTracker>,
    memory: Arc<dyn MemoryService>,
    slack: Arc<SlackNotifier>,
    scheduler: Arc<Scheduler>,
    events: EventHub,
    windows: Mutex<HashMap<String, RestartWindow>>,
    /// Working directory for a re-created orchestrator.
    runtime_root: PathBuf,
    /// Default check-in interval reinstalled after an agent restart.
    check_interval_minutes: u64,
    cooldown_window: Duration,
    max_restarts: usize,
}

impl RestartController {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        registration: Arc<AgentRegistration>,
        store: Arc<StateStore>,
        tasks: Arc<dyn TaskTracker>,
        memory: Arc<dyn MemoryService>,
        slack: Arc<SlackNotifier>,
        scheduler: Arc<Scheduler>,
        events: EventHub,
        runtime_root: PathBuf,
        check_interval_minutes: u64,
    ) -> Self {
        Self {
            registration,
            store,
            tasks,
            memory,
            slack,
            scheduler,
            events,
            windows: Mutex::new(HashMap::new()),
            runtime_root,
            check_interval_minutes,
            cooldown_window: COOLDOWN_WINDOW,
            max_restarts: MAX_RESTARTS_PER_WINDOW,
        }
    }

    pub fn with_cooldown(mut self, window: Duration, max_restarts: usize) -> Self {
        self.cooldown_window = window;
        self.max_restarts = max_restarts;
        self
    }

    /// Successful restarts currently inside the window.
    pub fn restarts_in_window(&self, session_name: &str) -> usize {
        let mut windows = self.windows.lock();
        match windows.get_mut(session_name) {
            Some(window) => {
                window.prune(self.cooldown_window);
                window.timestamps.len()
            }
            None => 0,
        }
    }

    pub fn total_restarts(&self, session_name: &str) -> u64 {
        self.windows.lock().get(session_name).map(|w| w.total_restarts).unwrap_or(0)
    }

    /// React to a confirmed exit: snapshot memory, resolve the role, then
    /// either restart or settle to `inactive`.
    pub async fn handle_exit(&self, event: ExitEvent) {
        info!(
            session = %event.session_name,
            reason = event.reason.as_str(),
            "handling agent exit"
        );

        let member = self.store.find_member_by_session_name(&event.session_name);
        let role = member
            .as_ref()
            .map(|(_, m)| m.role.clone())
            .unwrap_or_else(|| self.role_from_meta(&event.session_name));

        if let Err(e) = self
            .memory
            .on_session_end(&event.session_name, &role, &event.last_output)
            .await
        {
            warn!(session = %event.session_name, "memory snapshot failed: {e:#}");
        }

        if role == ORCHESTRATOR_ROLE || event.session_name == ORCHESTRATOR_SESSION {
            match self.restart_orchestrator(&event).await {
                Ok(_) => {
                    self.events.orchestrator_status(AgentStatus::Started, "restarted");
                }
                Err(e) => {
                    warn!(session = %event.session_name, "orchestrator restart failed: {e}");
                    self.store.update_orchestrator_status(AgentStatus::Inactive);
                    self.events.orchestrator_status(AgentStatus::Inactive, "restart_failed");
                }
            }
            return;
        }

        let Some((_, member)) = member else {
            info!(session = %event.session_name, "exit for untracked session, dropping");
            return;
        };

        let in_progress = self.tasks.in_progress_tasks(&event.session_name);
        if in_progress.is_empty() {
            info!(session = %event.session_name, "no in-progress tasks, settling to inactive");
            self.settle_inactive(&event.session_name, member.agent_status, Some(&member.id));
            return;
        }

        let task_titles: Vec<String> = in_progress.iter().map(|t| t.title.clone()).collect();
        if let Err(e) = self.restart_agent(&event, &member, &task_titles).await {
            warn!(session = %event.session_name, "agent restart failed: {e}");
            self.settle_inactive(&event.session_name, member.agent_status, Some(&member.id));
        }
    }

    /// Agent restart path: rate-limit check, pre-transition to `inactive`,
    /// residual kill + drain, re-create with the same identity, re-send the
    /// task description.
    pub async fn restart_agent(
        &self,
        event: &ExitEvent,
        member: &TeamMember,
        task_titles: &[String],
    ) -> Result<CreatedSession, ErrorCode> {
        let name = &event.session_name;
        self.try_begin(name)?;

        // `inactive` first so the message queue never delivers into the
        // half-initialized replacement session.
        self.store.update_agent_status_if(name, member.agent_status, AgentStatus::Inactive);

        let result = self.restart_agent_inner(event, member, task_titles).await;
        match &result {
            Ok(_) => {
                self.finish(name, true);
                self.events.member_status(name, Some(&member.id), AgentStatus::Started, "restarted");
            }
            Err(_) => {
                // Failed attempts do not count toward the window, so later
                // exits may retry.
                self.finish(name, false);
            }
        }
        result
    }

    async fn restart_agent_inner(
        &self,
        event: &ExitEvent,
        member: &TeamMember,
        task_titles: &[String],
    ) -> Result<CreatedSession, ErrorCode> {
        let name = &event.session_name;
        let project_path = self.project_path_for(name);

        if self.registration.backend().session_exists(name) {
            let _ = self.registration.backend().kill_session(name).await;
        }
        tokio::time::sleep(RESTART_DELAY).await;

        let created = self
            .registration
            .create_agent_session(CreateAgentSession {
                session_name: name.clone(),
                role: member.role.clone(),
                project_path,
                runtime_type: member.runtime_type.unwrap_or(event.runtime_type),
                team_id: None,
                member_id: Some(member.id.clone()),
                flags: vec![],
            })
            .await?;

        // Put the agent back on its task.
        let reminder = format!(
            "Your session was restarted after an unexpected exit. Resume your in-progress work: {}",
            task_titles.join("; ")
        );
        if let Err(e) = self
            .registration
            .send_message_to_agent(name, &reminder, MessageMode::Message)
            .await
        {
            warn!(session = %name, "task reminder delivery failed: {e}");
        }

        if self.check_interval_minutes > 0 {
            self.scheduler.schedule(
                name,
                "Periodic check-in: report progress and blockers.",
                self.check_interval_minutes,
                true,
            );
        }

        Ok(created)
    }

    /// Orchestrator restart path.
    pub async fn restart_orchestrator(&self, event: &ExitEvent) -> Result<CreatedSession, ErrorCode> {
        let name = &event.session_name;
        self.try_begin(name)?;

        let result = self.restart_orchestrator_inner(name).await;
        match &result {
            Ok(_) => {
                self.finish(name, true);
                let total = self.total_restarts(name);
                self.slack
                    .notify(&format!(
                        "Orchestrator `{name}` restarted (total restarts: {total})."
                    ))
                    .await;
                self.events.emit(ServerEvent::OrchestratorRestarted {
                    agent_status: AgentStatus::Started,
                    total_restarts: total,
                });
            }
            Err(_) => self.finish(name, false),
        }
        result
    }

    async fn restart_orchestrator_inner(&self, name: &str) -> Result<CreatedSession, ErrorCode> {
        tokio::time::sleep(RESTART_DELAY).await;
        if self.registration.backend().session_exists(name) {
            let _ = self.registration.backend().kill_session(name).await;
        }

        let runtime = self.store.orchestrator_runtime().unwrap_or(RuntimeType::Claude);
        self.registration
            .create_agent_session(CreateAgentSession {
                session_name: name.to_owned(),
                role: ORCHESTRATOR_ROLE.to_owned(),
                project_path: self.runtime_root.clone(),
                runtime_type: runtime,
                team_id: None,
                member_id: None,
                flags: vec![],
            })
            .await
    }

    /// Non-reentrancy and rate-limit gate.
    fn try_begin(&self, session_name: &str) -> Result<(), ErrorCode> {
        let mut windows = self.windows.lock();
        let window = windows.entry(session_name.to_owned()).or_default();
        if window.is_restarting {
            return Err(ErrorCode::RestartInProgress);
        }
        window.prune(self.cooldown_window);
        if window.timestamps.len() >= self.max_restarts {
            warn!(session = session_name, "restart denied: window exhausted");
            return Err(ErrorCode::RateLimited);
        }
        window.is_restarting = true;
        Ok(())
    }

    fn finish(&self, session_name: &str, success: bool) {
        let mut windows = self.windows.lock();
        let window = windows.entry(session_name.to_owned()).or_default();
        window.is_restarting = false;
        if success {
            let now = Instant::now();
            window.timestamps.push(now);
            window.total_restarts += 1;
            window.last_restart_at = Some(now);
        }
    }

    /// Compare-and-set transition to `inactive` plus broadcast; used on the
    /// no-restart path (registration stays the only blind writer).
    fn settle_inactive(&self, session_name: &str, prev: AgentStatus, member_id: Option<&str>) {
        self.store.update_agent_status_if(session_name, prev, AgentStatus::Inactive);
        self.events.member_status(session_name, member_id, AgentStatus::Inactive, "exited");
    }

    fn role_from_meta(&self, session_name: &str) -> String {
        self.store
            .session_meta()
            .into_iter()
            .find(|m| m.session_name == session_name)
            .map(|m| m.role)
            .unwrap_or_else(|| "unknown".to_owned())
    }

    fn project_path_for(&self, session_name: &str) -> PathBuf {
        self.store
            .session_meta()
            .into_iter()
            .find(|m| m.session_name == session_name)
            .map(|m| PathBuf::from(m.project_path))
            .unwrap_or_else(|| self.runtime_root.clone())
    }
}

#[cfg(test)]
#[path = "restart_tests.rs"]
mod tests;
