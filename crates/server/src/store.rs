// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Persistent session state: teams, orchestrator status, restorable
//! session metadata.
//!
//! Each document is a JSON file under the AgentMux home directory, written
//! atomically (temp file + rename). Mutations mark the document dirty and
//! are flushed by a coalescing task so bursts of status churn produce one
//! write. Readers of a missing file see an empty state.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use anyhow::Context;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::runtime::RuntimeType;

/// Coalescing window for persisted writes.
pub const FLUSH_WINDOW: Duration = Duration::from_millis(200);

/// Stored lifecycle status of an agent.
///
/// Happy path: `inactive → starting → started → activating → active`.
/// Any state may fall back to `inactive`; `active` may move to `suspended`
/// on explicit suspend. The *effective* status an observer sees is derived
/// by [`crate::status`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum AgentStatus {
    #[default]
    Inactive,
    Starting,
    Started,
    Activating,
    Active,
    Suspended,
}

impl AgentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Inactive => "inactive",
            Self::Starting => "starting",
            Self::Started => "started",
            Self::Activating => "activating",
            Self::Active => "active",
            Self::Suspended => "suspended",
        }
    }

    /// States between creation and full activation.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Starting | Self::Started | Self::Activating)
    }
}

impl std::fmt::Display for AgentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A task assigned to a team member, as tracked in `teams.json`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskItem {
    pub id: String,
    pub title: String,
    /// `open`, `in_progress`, or `done`.
    pub status: String,
}

impl TaskItem {
    pub fn is_in_progress(&self) -> bool {
        self.status == "in_progress"
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TeamMember {
    pub id: String,
    pub name: String,
    pub role: String,
    #[serde(rename = "sessionName")]
    pub session_name: String,
    #[serde(rename = "agentStatus", default)]
    pub agent_status: AgentStatus,
    #[serde(rename = "workingStatus", default, skip_serializing_if = "Option::is_none")]
    pub working_status: Option<String>,
    #[serde(rename = "runtimeType", default, skip_serializing_if = "Option::is_none")]
    pub runtime_type: Option<RuntimeType>,
    #[serde(rename = "currentTasks", default, skip_serializing_if = "Vec::is_empty")]
    pub current_tasks: Vec<TaskItem>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Team {
    pub id: String,
    pub name: String,
    #[serde(rename = "projectPath", default, skip_serializing_if = "Option::is_none")]
    pub project_path: Option<String>,
    #[serde(default)]
    pub members: Vec<TeamMember>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Project {
    pub name: String,
    pub path: String,
}

/// Orchestrator status document (`orchestrator.json`).
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct OrchestratorState {
    #[serde(default)]
    pub status: AgentStatus,
    #[serde(rename = "runtimeType", default, skip_serializing_if = "Option::is_none")]
    pub runtime_type: Option<RuntimeType>,
    #[serde(rename = "updatedAt", default)]
    pub updated_at: u64,
}

/// Restorable session metadata (`sessions.json`). PTYs themselves are never
/// restored; re-creation goes through Agent Registration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionMeta {
    #[serde(rename = "sessionName")]
    pub session_name: String,
    pub role: String,
    #[serde(rename = "runtimeType")]
    pub runtime_type: RuntimeType,
    #[serde(rename = "projectPath")]
    pub project_path: String,
    #[serde(rename = "createdAt", default)]
    pub created_at: u64,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct TeamsDoc {
    #[serde(default)]
    teams: Vec<Team>,
    #[serde(default)]
    projects: Vec<Project>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct SessionsDoc {
    #[serde(default)]
    sessions: Vec<SessionMeta>,
}

/// Dirty-document bitmask guarded by the state lock.
#[derive(Debug, Default, Clone, Copy)]
struct Dirty {
    teams: bool,
    orchestrator: bool,
    sessions: bool,
}

impl Dirty {
    fn any(&self) -> bool {
        self.teams || self.orchestrator || self.sessions
    }
}

struct StoreState {
    teams: TeamsDoc,
    orchestrator: OrchestratorState,
    sessions: SessionsDoc,
    dirty: Dirty,
}

/// The session state store.
pub struct StateStore {
    home: PathBuf,
    state: RwLock<StoreState>,
    flush_notify: Notify,
}

pub fn now_epoch_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

impl StateStore {
    /// Load existing documents from `home`, creating the directory if needed.
    pub fn load(home: &Path) -> anyhow::Result<Self> {
        std::fs::create_dir_all(home)
            .with_context(|| format!("create state dir {}", home.display()))?;
        let teams = read_doc(&home.join("teams.json"))?;
        let orchestrator = read_doc(&home.join("orchestrator.json"))?;
        let sessions = read_doc(&home.join("sessions.json"))?;
        Ok(Self {
            home: home.to_path_buf(),
            state: RwLock::new(StoreState {
                teams,
                orchestrator,
                sessions,
                dirty: Dirty::default(),
            }),
            flush_notify: Notify::new(),
        })
    }

    pub fn home(&self) -> &Path {
        &self.home
    }

    /// Spawn the coalescing flusher. Stops (after a final flush) when
    /// `shutdown` fires.
    pub fn spawn_flusher(self: &Arc<Self>, shutdown: CancellationToken) {
        let store = Arc::clone(self);
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = store.flush_notify.notified() => {
                        tokio::time::sleep(FLUSH_WINDOW).await;
                        if let Err(e) = store.persist_now() {
                            warn!("state flush failed: {e:#}");
                        }
                    }
                    _ = shutdown.cancelled() => {
                        if let Err(e) = store.persist_now() {
                            warn!("final state flush failed: {e:#}");
                        }
                        break;
                    }
                }
            }
        });
    }

    /// Write all dirty documents immediately.
    pub fn persist_now(&self) -> anyhow::Result<()> {
        // Serialize under the read lock, write files outside it.
        let (teams, orchestrator, sessions) = {
            let mut state = self.state.write();
            let dirty = state.dirty;
            state.dirty = Dirty::default();
            (
                dirty.teams.then(|| serde_json::to_vec_pretty(&state.teams)).transpose()?,
                dirty
                    .orchestrator
                    .then(|| serde_json::to_vec_pretty(&state.orchestrator))
                    .transpose()?,
                dirty.sessions.then(|| serde_json::to_vec_pretty(&state.sessions)).transpose()?,
            )
        };
        if let Some(bytes) = teams {
            write_atomic(&self.home.join("teams.json"), &bytes)?;
        }
        if let Some(bytes) = orchestrator {
            write_atomic(&self.home.join("orchestrator.json"), &bytes)?;
        }
        if let Some(bytes) = sessions {
            write_atomic(&self.home.join("sessions.json"), &bytes)?;
        }
        Ok(())
    }

    fn mark<F: FnOnce(&mut Dirty)>(&self, state: &mut StoreState, f: F) {
        f(&mut state.dirty);
        self.flush_notify.notify_one();
    }

    // -- Orchestrator ---------------------------------------------------------

    pub fn orchestrator_status(&self) -> AgentStatus {
        self.state.read().orchestrator.status
    }

    pub fn orchestrator_runtime(&self) -> Option<RuntimeType> {
        self.state.read().orchestrator.runtime_type
    }

    pub fn update_orchestrator_status(&self, status: AgentStatus) {
        let mut state = self.state.write();
        state.orchestrator.status = status;
        state.orchestrator.updated_at = now_epoch_ms();
        self.mark(&mut state, |d| d.orchestrator = true);
    }

    pub fn update_orchestrator_runtime(&self, runtime: RuntimeType) {
        let mut state = self.state.write();
        state.orchestrator.runtime_type = Some(runtime);
        state.orchestrator.updated_at = now_epoch_ms();
        self.mark(&mut state, |d| d.orchestrator = true);
    }

    // -- Teams ----------------------------------------------------------------

    pub fn teams(&self) -> Vec<Team> {
        self.state.read().teams.teams.clone()
    }

    pub fn projects(&self) -> Vec<Project> {
        self.state.read().teams.projects.clone()
    }

    pub fn save_team(&self, team: Team) {
        let mut state = self.state.write();
        match state.teams.teams.iter_mut().find(|t| t.id == team.id) {
            Some(existing) => *existing = team,
            None => state.teams.teams.push(team),
        }
        self.mark(&mut state, |d| d.teams = true);
    }

    /// Find the team and member owning `session_name`.
    pub fn find_member_by_session_name(&self, session_name: &str) -> Option<(Team, TeamMember)> {
        let state = self.state.read();
        for team in &state.teams.teams {
            if let Some(member) = team.members.iter().find(|m| m.session_name == session_name) {
                return Some((team.clone(), member.clone()));
            }
        }
        None
    }

    /// Stored status for a tracked member, if any.
    pub fn agent_status(&self, session_name: &str) -> Option<AgentStatus> {
        let state = self.state.read();
        state
            .teams
            .teams
            .iter()
            .flat_map(|t| &t.members)
            .find(|m| m.session_name == session_name)
            .map(|m| m.agent_status)
    }

    /// Blind status write. Reserved for the Agent Registration Service;
    /// everyone else goes through [`update_agent_status_if`].
    ///
    /// Returns `false` when no tracked member owns the session name.
    pub fn update_agent_status(&self, session_name: &str, status: AgentStatus) -> bool {
        let mut state = self.state.write();
        let mut found = false;
        for team in &mut state.teams.teams {
            for member in &mut team.members {
                if member.session_name == session_name {
                    member.agent_status = status;
                    found = true;
                }
            }
        }
        if found {
            self.mark(&mut state, |d| d.teams = true);
        } else {
            debug!(session = session_name, "status write for untracked session ignored");
        }
        found
    }

    /// Compare-and-set status write: applies `next` only when the stored
    /// status still equals `prev`. Returns whether the write happened.
    pub fn update_agent_status_if(
        &self,
        session_name: &str,
        prev: AgentStatus,
        next: AgentStatus,
    ) -> bool {
        let mut state = self.state.write();
        let mut swapped = false;
        for team in &mut state.teams.teams {
            for member in &mut team.members {
                if member.session_name == session_name && member.agent_status == prev {
                    member.agent_status = next;
                    swapped = true;
                }
            }
        }
        if swapped {
            self.mark(&mut state, |d| d.teams = true);
        }
        swapped
    }

    pub fn update_working_status(&self, session_name: &str, working: Option<String>) {
        let mut state = self.state.write();
        let mut found = false;
        for team in &mut state.teams.teams {
            for member in &mut team.members {
                if member.session_name == session_name {
                    member.working_status = working.clone();
                    found = true;
                }
            }
        }
        if found {
            self.mark(&mut state, |d| d.teams = true);
        }
    }

    // -- Sessions -------------------------------------------------------------

    pub fn session_meta(&self) -> Vec<SessionMeta> {
        self.state.read().sessions.sessions.clone()
    }

    pub fn upsert_session_meta(&self, meta: SessionMeta) {
        let mut state = self.state.write();
        match state
            .sessions
            .sessions
            .iter_mut()
            .find(|s| s.session_name == meta.session_name)
        {
            Some(existing) => *existing = meta,
            None => state.sessions.sessions.push(meta),
        }
        self.mark(&mut state, |d| d.sessions = true);
    }

    pub fn remove_session_meta(&self, session_name: &str) {
        let mut state = self.state.write();
        let before = state.sessions.sessions.len();
        state.sessions.sessions.retain(|s| s.session_name != session_name);
        if state.sessions.sessions.len() != before {
            self.mark(&mut state, |d| d.sessions = true);
        }
    }

    /// Statuses of every tracked member, keyed by session name. Used by the
    /// activity poll endpoint.
    pub fn all_member_statuses(&self) -> HashMap<String, AgentStatus> {
        let state = self.state.read();
        state
            .teams
            .teams
            .iter()
            .flat_map(|t| &t.members)
            .map(|m| (m.session_name.clone(), m.agent_status))
            .collect()
    }

    #[cfg(test)]
    pub(crate) fn is_dirty(&self) -> bool {
        self.state.read().dirty.any()
    }
}

fn read_doc<T: Default + serde::de::DeserializeOwned>(path: &Path) -> anyhow::Result<T> {
    match std::fs::read(path) {
        Ok(bytes) => {
            serde_json::from_slice(&bytes).with_context(|| format!("parse {}", path.display()))
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(T::default()),
        Err(e) => Err(e).with_context(|| format!("read {}", path.display())),
    }
}

/// Atomic write: temp file in the same directory, then rename. A crash
/// mid-write leaves the previous document intact.
fn write_atomic(path: &Path, bytes: &[u8]) -> anyhow::Result<()> {
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    let mut tmp = tempfile::NamedTempFile::new_in(dir)
        .with_context(|| format!("create temp file in {}", dir.display()))?;
    std::io::Write::write_all(&mut tmp, bytes)?;
    tmp.as_file().sync_all()?;
    tmp.persist(path).with_context(|| format!("rename into {}", path.display()))?;
    Ok(())
}

#[cfg(test)]
#[path = "store_tests.rs"]
mod tests;
