// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Composition root — shared by `main` and the end-to-end tests.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use crate::backend::SessionBackend;
use crate::config::Config;
use crate::events::EventHub;
use crate::memory::{FileMemory, MemoryService};
use crate::monitor::{ExitEvent, ExitMonitor};
use crate::queue::{MessageMode, MessageQueue};
use crate::registration::AgentRegistration;
use crate::restart::RestartController;
use crate::runtime::{DetectionCache, RuntimeRegistry};
use crate::scheduler::{ScheduledFire, Scheduler};
use crate::slack::SlackNotifier;
use crate::status::StatusEvaluator;
use crate::store::StateStore;
use crate::tasks::StoreTaskTracker;
use crate::transport::{build_router, AppState};

/// A fully wired server, ready to serve.
pub struct BuiltServer {
    pub state: AppState,
    pub shutdown: CancellationToken,
}

/// Initialize the tracing subscriber from config. Safe to call twice (the
/// second call is a no-op), which keeps tests simple.
pub fn init_tracing(config: &Config) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.log_level.clone()));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    // try_init fails when a subscriber is already installed; that's fine.
    let _ = if config.log_format == "json" {
        builder.json().try_init()
    } else {
        builder.try_init()
    };
}

/// Wire every subsystem together.
pub fn build(config: &Config) -> anyhow::Result<BuiltServer> {
    let shutdown = CancellationToken::new();
    let events = EventHub::new(1024);
    let home = config.home_dir();

    let store = Arc::new(StateStore::load(&home)?);
    store.spawn_flusher(shutdown.clone());

    let backend = Arc::new(SessionBackend::new(events.clone(), shutdown.clone()));
    let registry = Arc::new(RuntimeRegistry::new());
    let detection = Arc::new(DetectionCache::new());
    let queue = Arc::new(MessageQueue::new());

    let (fire_tx, fire_rx) = mpsc::unbounded_channel();
    let scheduler = Arc::new(Scheduler::new(fire_tx, shutdown.clone()));

    let (exit_tx, exit_rx) = mpsc::unbounded_channel();
    let monitor = Arc::new(ExitMonitor::new(
        Arc::clone(&backend),
        Arc::clone(&registry),
        exit_tx,
        shutdown.clone(),
    ));

    let memory: Arc<dyn MemoryService> = Arc::new(FileMemory::new(&home));
    let runtime_root = std::env::current_dir()?;

    let registration = Arc::new(AgentRegistration::new(
        Arc::clone(&backend),
        Arc::clone(&store),
        Arc::clone(&registry),
        detection,
        Arc::clone(&queue),
        Arc::clone(&scheduler),
        Arc::clone(&monitor),
        Arc::clone(&memory),
        events.clone(),
        home.clone(),
        runtime_root.clone(),
        config.mcp_port(),
    ));

    let restart = Arc::new(RestartController::new(
        Arc::clone(&registration),
        Arc::clone(&store),
        Arc::new(StoreTaskTracker::new(Arc::clone(&store))),
        memory,
        Arc::new(SlackNotifier::new(&config.slack())),
        Arc::clone(&scheduler),
        events.clone(),
        runtime_root,
        config.check_interval_minutes(),
    ));

    let evaluator = Arc::new(StatusEvaluator::new(Arc::clone(&backend), Arc::clone(&store)));

    // Restorable sessions are surfaced, not resurrected: re-creation goes
    // through Agent Registration on demand.
    let restorable = store.session_meta();
    if !restorable.is_empty() {
        info!(count = restorable.len(), "restorable sessions found in state store");
    }

    tokio::spawn(supervisor_loop(
        exit_rx,
        fire_rx,
        Arc::clone(&restart),
        Arc::clone(&registration),
        Arc::clone(&scheduler),
        shutdown.clone(),
    ));

    let state = AppState {
        backend,
        store,
        registration,
        restart,
        evaluator,
        scheduler,
        queue,
        events,
        shutdown: shutdown.clone(),
        initialized: Arc::new(AtomicBool::new(false)),
        check_interval_minutes: config.check_interval_minutes(),
        auto_commit_interval_minutes: config.auto_commit_interval_minutes(),
    };

    Ok(BuiltServer { state, shutdown })
}

/// React to exit events and scheduler fires. Restart handling is
/// serialized here, which also serializes status transitions per exit.
async fn supervisor_loop(
    mut exit_rx: mpsc::UnboundedReceiver<ExitEvent>,
    mut fire_rx: mpsc::UnboundedReceiver<ScheduledFire>,
    restart: Arc<RestartController>,
    registration: Arc<AgentRegistration>,
    scheduler: Arc<Scheduler>,
    shutdown: CancellationToken,
) {
    loop {
        tokio::select! {
            event = exit_rx.recv() => {
                match event {
                    Some(event) => restart.handle_exit(event).await,
                    None => break,
                }
            }
            fire = fire_rx.recv() => {
                match fire {
                    Some(fire) => {
                        if let Err(e) = registration
                            .send_message_to_agent(&fire.session_name, &fire.message, MessageMode::Message)
                            .await
                        {
                            warn!(session = %fire.session_name, "check-in delivery failed: {e}");
                        }
                        scheduler.mark_fired(fire.job_id);
                    }
                    None => break,
                }
            }
            _ = shutdown.cancelled() => break,
        }
    }
}

/// Run the server until a shutdown signal arrives.
pub async fn run(config: Config) -> anyhow::Result<()> {
    init_tracing(&config);
    let built = build(&config)?;
    let state = built.state.clone();
    let shutdown = built.shutdown.clone();

    let listener = TcpListener::bind((config.host.as_str(), config.web_port())).await?;
    let addr = listener.local_addr()?;
    info!(%addr, home = %config.home_dir().display(), "agentmux listening");

    state.initialized.store(true, Ordering::Release);

    // Signal handling: first signal drains gracefully.
    let signal_shutdown = shutdown.clone();
    tokio::spawn(async move {
        let mut sigterm = match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(s) => s,
            Err(e) => {
                warn!("sigterm handler unavailable: {e}");
                return;
            }
        };
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {}
            _ = sigterm.recv() => {}
        }
        info!("shutdown signal received");
        signal_shutdown.cancel();
    });

    let app = build_router(state.clone());
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown.clone().cancelled_owned())
        .await?;

    // Teardown: stop accepting, kill children, flush state.
    state.initialized.store(false, Ordering::Release);
    state.backend.kill_all().await;
    if let Err(e) = state.store.persist_now() {
        warn!("final state flush failed: {e:#}");
    }
    info!("agentmux stopped");
    Ok(())
}
