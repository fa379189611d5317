// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use crate::backend::SessionBackend;
use crate::events::ServerEvent;
use crate::memory::NoopMemory;
use crate::monitor::{ExitMonitor, ExitReason};
use crate::queue::MessageQueue;
use crate::runtime::{DetectionCache, RuntimeAdapter, RuntimeRegistry};
use crate::store::{TaskItem, Team};
use crate::tasks::StoreTaskTracker;
use async_trait::async_trait;
use regex::Regex;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

struct FakeRuntime;

#[async_trait]
impl RuntimeAdapter for FakeRuntime {
    fn runtime_type(&self) -> RuntimeType {
        RuntimeType::Claude
    }
    fn ready_patterns(&self) -> &[&'static str] {
        &["AGENT_READY_MARK"]
    }
    fn error_patterns(&self) -> &[&'static str] {
        &["AGENT_FATAL_MARK"]
    }
    fn exit_patterns(&self) -> &[Regex] {
        &[]
    }
    fn force_exit_patterns(&self) -> &[Regex] {
        &[]
    }
    fn init_script(&self) -> &'static str {
        "echo AGENT_READY_MARK\n"
    }
    fn ready_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_secs(30)
    }
    async fn probe(
        &self,
        _backend: &SessionBackend,
        _session_name: &str,
    ) -> Result<bool, ErrorCode> {
        Ok(false)
    }
}

struct Fixture {
    controller: RestartController,
    store: Arc<StateStore>,
    backend: Arc<SessionBackend>,
    events_rx: tokio::sync::broadcast::Receiver<ServerEvent>,
    _home: tempfile::TempDir,
}

fn fixture() -> Fixture {
    let home = match tempfile::tempdir() {
        Ok(d) => d,
        Err(e) => unreachable!("tempdir: {e}"),
    };
    let shutdown = CancellationToken::new();
    let events = EventHub::new(512);
    let events_rx = events.subscribe();
    let backend = Arc::new(SessionBackend::new(events.clone(), shutdown.clone()));
    let store = match StateStore::load(home.path()) {
        Ok(s) => Arc::new(s),
        Err(e) => unreachable!("load: {e:#}"),
    };
    let fake: Arc<dyn RuntimeAdapter> = Arc::new(FakeRuntime);
    let registry = Arc::new(RuntimeRegistry::with_adapters(
        Arc::clone(&fake),
        Arc::clone(&fake),
        Arc::clone(&fake),
    ));
    let (exit_tx, _exit_rx) = mpsc::unbounded_channel();
    let monitor = Arc::new(ExitMonitor::new(
        Arc::clone(&backend),
        Arc::clone(&registry),
        exit_tx,
        shutdown.clone(),
    ));
    let (fire_tx, _fire_rx) = mpsc::unbounded_channel();
    let scheduler = Arc::new(Scheduler::new(fire_tx, shutdown.clone()));
    let registration = Arc::new(AgentRegistration::new(
        Arc::clone(&backend),
        Arc::clone(&store),
        registry,
        Arc::new(DetectionCache::new()),
        Arc::new(MessageQueue::new()),
        Arc::clone(&scheduler),
        monitor,
        Arc::new(NoopMemory),
        events.clone(),
        home.path().to_path_buf(),
        PathBuf::from("/tmp"),
        8789,
    ));
    let controller = RestartController::new(
        registration,
        Arc::clone(&store),
        Arc::new(StoreTaskTracker::new(Arc::clone(&store))),
        Arc::new(NoopMemory),
        Arc::new(SlackNotifier::disabled()),
        scheduler,
        events,
        PathBuf::from("/tmp"),
        0,
    );
    Fixture { controller, store, backend, events_rx, _home: home }
}

fn exit_event(name: &str) -> ExitEvent {
    ExitEvent {
        session_name: name.to_owned(),
        runtime_type: RuntimeType::Claude,
        reason: ExitReason::ChildDead,
        last_output: "tail".to_owned(),
    }
}

fn member(session: &str, status: AgentStatus, tasks: Vec<TaskItem>) -> TeamMember {
    TeamMember {
        id: "m1".to_owned(),
        name: session.to_owned(),
        role: "developer".to_owned(),
        session_name: session.to_owned(),
        agent_status: status,
        working_status: None,
        runtime_type: Some(RuntimeType::Claude),
        current_tasks: tasks,
    }
}

fn track(store: &StateStore, m: TeamMember) {
    store.save_team(Team {
        id: "t".to_owned(),
        name: "team".to_owned(),
        project_path: Some("/tmp".to_owned()),
        members: vec![m],
    });
}

#[test]
fn begin_is_non_reentrant() {
    let fx = fixture();
    assert!(fx.controller.try_begin("s").is_ok());
    assert_eq!(fx.controller.try_begin("s"), Err(ErrorCode::RestartInProgress));
    fx.controller.finish("s", false);
    assert!(fx.controller.try_begin("s").is_ok());
}

#[test]
fn window_caps_successful_restarts() {
    let fx = fixture();
    let controller = fx.controller.with_cooldown(Duration::from_secs(60), 3);
    for _ in 0..3 {
        assert!(controller.try_begin("s").is_ok());
        controller.finish("s", true);
    }
    assert_eq!(controller.try_begin("s"), Err(ErrorCode::RateLimited));
    assert_eq!(controller.restarts_in_window("s"), 3);
    assert_eq!(controller.total_restarts("s"), 3);
}

#[test]
fn failed_attempts_do_not_count() {
    let fx = fixture();
    let controller = fx.controller.with_cooldown(Duration::from_secs(60), 1);
    assert!(controller.try_begin("s").is_ok());
    controller.finish("s", false);
    assert_eq!(controller.restarts_in_window("s"), 0);
    assert!(controller.try_begin("s").is_ok());
}

#[test]
fn window_slides() {
    let fx = fixture();
    let controller = fx.controller.with_cooldown(Duration::from_millis(150), 1);
    assert!(controller.try_begin("s").is_ok());
    controller.finish("s", true);
    assert_eq!(controller.try_begin("s"), Err(ErrorCode::RateLimited));
    std::thread::sleep(Duration::from_millis(200));
    assert!(controller.try_begin("s").is_ok(), "window should have slid past the old restart");
}

#[tokio::test]
async fn exit_without_tasks_settles_inactive() {
    let fx = fixture();
    track(&fx.store, member("dev-idle", AgentStatus::Active, vec![]));

    fx.controller.handle_exit(exit_event("dev-idle")).await;

    assert_eq!(fx.store.agent_status("dev-idle"), Some(AgentStatus::Inactive));
    assert!(!fx.backend.session_exists("dev-idle"));
    assert_eq!(fx.controller.total_restarts("dev-idle"), 0);
}

#[tokio::test]
async fn exit_with_in_progress_task_restarts_and_resends() {
    let fx = fixture();
    track(
        &fx.store,
        member(
            "dev-busy",
            AgentStatus::Active,
            vec![TaskItem {
                id: "task-9".to_owned(),
                title: "implement the flux capacitor".to_owned(),
                status: "in_progress".to_owned(),
            }],
        ),
    );

    fx.controller.handle_exit(exit_event("dev-busy")).await;

    assert!(fx.backend.session_exists("dev-busy"), "restart should create a fresh session");
    assert_eq!(fx.controller.total_restarts("dev-busy"), 1);
    let capture = fx.backend.capture_output("dev-busy", 80).unwrap_or_default();
    assert!(
        capture.contains("implement the flux capacitor"),
        "task reminder missing: {capture:?}"
    );
    let _ = fx.backend.kill_session("dev-busy").await;
}

#[tokio::test]
async fn orchestrator_restart_emits_event_with_count() {
    let mut fx = fixture();
    fx.store.update_orchestrator_runtime(RuntimeType::Claude);

    fx.controller.handle_exit(exit_event(ORCHESTRATOR_SESSION)).await;

    assert!(fx.backend.session_exists(ORCHESTRATOR_SESSION));
    let mut restarted = None;
    while let Ok(event) = fx.events_rx.try_recv() {
        if let ServerEvent::OrchestratorRestarted { total_restarts, .. } = event {
            restarted = Some(total_restarts);
        }
    }
    assert_eq!(restarted, Some(1));
    let _ = fx.backend.kill_session(ORCHESTRATOR_SESSION).await;
}

#[tokio::test]
async fn fourth_orchestrator_restart_is_denied() {
    let fx = fixture();
    let controller = fx.controller.with_cooldown(Duration::from_secs(3600), 3);
    fx.store.update_orchestrator_runtime(RuntimeType::Claude);

    for i in 0..3 {
        let result = controller.restart_orchestrator(&exit_event(ORCHESTRATOR_SESSION)).await;
        assert!(result.is_ok(), "restart {i} failed: {result:?}");
        // Kill between rounds so each restart exercises the full path.
        let _ = fx.backend.kill_session(ORCHESTRATOR_SESSION).await;
    }

    let denied = controller.restart_orchestrator(&exit_event(ORCHESTRATOR_SESSION)).await;
    assert_eq!(denied.map(|_| ()), Err(ErrorCode::RateLimited));
    assert!(!fx.backend.session_exists(ORCHESTRATOR_SESSION), "denied restart created a PTY");
    assert_eq!(controller.restarts_in_window(ORCHESTRATOR_SESSION), 3);
}
