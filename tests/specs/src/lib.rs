// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Test harness for end-to-end smoke tests.
//!
//! Builds the real server wiring in-process with an isolated state home,
//! serves it on a loopback port, and exposes the composed [`AppState`] so
//! tests can seed sessions and teams directly.

use std::sync::atomic::Ordering;
use std::time::Duration;

use clap::Parser;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use agentmux::backend::SessionSpec;
use agentmux::config::Config;
use agentmux::run::build;
use agentmux::transport::{build_router, AppState};

/// A running in-process agentmux server, shut down on drop.
pub struct AgentmuxServer {
    pub state: AppState,
    pub port: u16,
    shutdown: CancellationToken,
    _serve: JoinHandle<()>,
    _home: tempfile::TempDir,
}

impl AgentmuxServer {
    /// Build and serve on an ephemeral loopback port.
    pub async fn start() -> anyhow::Result<Self> {
        let home = tempfile::tempdir()?;
        let home_arg = home.path().display().to_string();
        let config = Config::try_parse_from([
            "agentmux",
            "--home",
            &home_arg,
            "--log-format",
            "text",
            "--log-level",
            "warn",
        ])?;

        let built = build(&config)?;
        let state = built.state.clone();
        let shutdown = built.shutdown.clone();

        let listener = TcpListener::bind(("127.0.0.1", 0)).await?;
        let port = listener.local_addr()?.port();
        state.initialized.store(true, Ordering::Release);

        let app = build_router(state.clone());
        let serve_shutdown = shutdown.clone();
        let serve = tokio::spawn(async move {
            let _ = axum::serve(listener, app)
                .with_graceful_shutdown(serve_shutdown.cancelled_owned())
                .await;
        });

        Ok(Self {
            state,
            port,
            shutdown,
            _serve: serve,
            _home: home,
        })
    }

    pub fn base_url(&self) -> String {
        format!("http://127.0.0.1:{}", self.port)
    }

    pub fn ws_url(&self) -> String {
        format!("ws://127.0.0.1:{}/ws", self.port)
    }

    /// Spawn a plain `cat` PTY session directly through the backend, as a
    /// stand-in for a real AI CLI.
    pub fn spawn_cat(&self, name: &str) -> anyhow::Result<()> {
        let spec = SessionSpec {
            session_name: name.to_owned(),
            command: vec!["cat".to_owned()],
            cwd: std::env::temp_dir(),
            env: vec![],
            cols: 120,
            rows: 40,
        };
        self.state
            .backend
            .create_session(spec)
            .map(|_| ())
            .map_err(|e| anyhow::anyhow!("spawn failed: {e}"))
    }

    /// Poll the session capture until it contains `needle` or `timeout`
    /// elapses.
    pub async fn wait_for_capture(
        &self,
        session: &str,
        needle: &str,
        timeout: Duration,
    ) -> bool {
        let deadline = tokio::time::Instant::now() + timeout;
        while tokio::time::Instant::now() < deadline {
            if let Ok(capture) = self.state.backend.capture_output(session, 50) {
                if capture.contains(needle) {
                    return true;
                }
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        false
    }
}

impl Drop for AgentmuxServer {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}
