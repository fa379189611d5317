// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! PTY session backend: spawn, feed, observe, and kill CLI child processes.
//!
//! One PTY per named session. A read-loop task per session appends output
//! to the session's [`TerminalBuffer`], fans chunks out to subscribers, and
//! emits `terminal_output` events. Writes travel through an input channel
//! into the same loop so callers never touch the master fd directly.

pub mod pty;

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use indexmap::IndexMap;
use nix::sys::signal::Signal;
use parking_lot::{Mutex, RwLock};
use tokio::sync::{broadcast, mpsc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::buffer::{TerminalBuffer, DEFAULT_CAPACITY, DEFAULT_CAPTURE_BYTES};
use crate::error::{validate_session_name, ErrorCode};
use crate::events::{EventHub, ServerEvent};
use crate::store::now_epoch_ms;

use pty::PtyProcess;

/// Writes larger than this are split before entering the input channel.
const WRITE_CHUNK: usize = 4096;

/// How long `kill_session` waits after SIGTERM before escalating.
const KILL_GRACE: Duration = Duration::from_secs(3);

/// Everything needed to spawn one PTY-hosted child.
#[derive(Debug, Clone)]
pub struct SessionSpec {
    pub session_name: String,
    pub command: Vec<String>,
    pub cwd: PathBuf,
    pub env: Vec<(String, String)>,
    pub cols: u16,
    pub rows: u16,
}

impl SessionSpec {
    /// A login shell session at `cwd` with the default window size.
    pub fn shell(session_name: &str, cwd: PathBuf) -> Self {
        Self {
            session_name: session_name.to_owned(),
            command: vec!["bash".to_owned(), "--login".to_owned()],
            cwd,
            env: vec![],
            cols: 200,
            rows: 50,
        }
    }
}

/// A live PTY session.
pub struct Session {
    name: String,
    child_pid: u32,
    created_at: u64,
    updated_at: AtomicU64,
    last_activity_at: AtomicU64,
    buffer: Mutex<TerminalBuffer>,
    input_tx: mpsc::Sender<Bytes>,
    data_tx: broadcast::Sender<Bytes>,
    dead: AtomicBool,
}

impl Session {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn child_pid(&self) -> u32 {
        self.child_pid
    }

    pub fn created_at(&self) -> u64 {
        self.created_at
    }

    pub fn updated_at(&self) -> u64 {
        self.updated_at.load(Ordering::Relaxed)
    }

    pub fn last_activity_at(&self) -> u64 {
        self.last_activity_at.load(Ordering::Relaxed)
    }

    /// Whether the read loop has observed the child going away.
    pub fn is_dead(&self) -> bool {
        self.dead.load(Ordering::Acquire)
    }

    fn touch(&self) {
        let now = now_epoch_ms();
        self.updated_at.store(now, Ordering::Relaxed);
        self.last_activity_at.store(now, Ordering::Relaxed);
    }
}

/// The multi-session PTY backend.
pub struct SessionBackend {
    sessions: RwLock<IndexMap<String, Arc<Session>>>,
    events: EventHub,
    buffer_capacity: usize,
    shutdown: CancellationToken,
}

impl SessionBackend {
    pub fn new(events: EventHub, shutdown: CancellationToken) -> Self {
        Self {
            sessions: RwLock::new(IndexMap::new()),
            events,
            buffer_capacity: DEFAULT_CAPACITY,
            shutdown,
        }
    }

    pub fn with_buffer_capacity(mut self, capacity: usize) -> Self {
        self.buffer_capacity = capacity;
        self
    }

    /// Spawn a new PTY session.
    ///
    /// Fails with `DuplicateSession` when a live session already owns the
    /// name; a dead entry left behind by a crashed child is replaced.
    pub fn create_session(&self, spec: SessionSpec) -> Result<Arc<Session>, ErrorCode> {
        validate_session_name(&spec.session_name)?;

        {
            let mut sessions = self.sessions.write();
            if let Some(existing) = sessions.get(&spec.session_name) {
                if !existing.is_dead() {
                    return Err(ErrorCode::DuplicateSession);
                }
                sessions.shift_remove(&spec.session_name);
            }
        }

        let process = PtyProcess::spawn(&spec.command, &spec.cwd, &spec.env, spec.cols, spec.rows)
            .map_err(|e| {
                warn!(session = %spec.session_name, "pty spawn failed: {e:#}");
                ErrorCode::SpawnError
            })?;
        let child_pid = process.child_pid();

        let (input_tx, input_rx) = mpsc::channel::<Bytes>(256);
        let (data_tx, _) = broadcast::channel::<Bytes>(256);
        let now = now_epoch_ms();
        let session = Arc::new(Session {
            name: spec.session_name.clone(),
            child_pid,
            created_at: now,
            updated_at: AtomicU64::new(now),
            last_activity_at: AtomicU64::new(now),
            buffer: Mutex::new(TerminalBuffer::new(self.buffer_capacity)),
            input_tx,
            data_tx: data_tx.clone(),
            dead: AtomicBool::new(false),
        });

        self.sessions.write().insert(spec.session_name.clone(), Arc::clone(&session));
        info!(session = %spec.session_name, pid = child_pid, "session created");

        let events = self.events.clone();
        let shutdown = self.shutdown.clone();
        let loop_session = Arc::clone(&session);
        tokio::spawn(async move {
            read_loop(process, loop_session, input_rx, data_tx, events, shutdown).await;
        });

        Ok(session)
    }

    pub fn list_sessions(&self) -> Vec<String> {
        self.sessions.read().keys().cloned().collect()
    }

    pub fn session_exists(&self, name: &str) -> bool {
        self.sessions.read().contains_key(name)
    }

    pub fn get_session(&self, name: &str) -> Option<Arc<Session>> {
        self.sessions.read().get(name).cloned()
    }

    /// Write bytes to the session's PTY, chunked to keep the input channel
    /// responsive. Fails with `SessionDead` when the child is gone.
    pub async fn write(&self, name: &str, data: &[u8]) -> Result<(), ErrorCode> {
        let session = self.get_session(name).ok_or(ErrorCode::SessionNotFound)?;
        if session.is_dead() {
            return Err(ErrorCode::SessionDead);
        }
        for chunk in data.chunks(WRITE_CHUNK) {
            if session.input_tx.send(Bytes::copy_from_slice(chunk)).await.is_err() {
                return Err(ErrorCode::SessionDead);
            }
        }
        Ok(())
    }

    /// ANSI-stripped capture of at most `lines` trailing lines, capped at
    /// 16 KiB.
    pub fn capture_output(&self, name: &str, lines: usize) -> Result<String, ErrorCode> {
        let session = self.get_session(name).ok_or(ErrorCode::SessionNotFound)?;
        let text = session.buffer.lock().capture(lines, DEFAULT_CAPTURE_BYTES);
        Ok(text)
    }

    /// `kill(pid, 0)` on the session's child.
    pub fn is_child_process_alive(&self, name: &str) -> bool {
        match self.get_session(name) {
            Some(session) => !session.is_dead() && pty::is_pid_alive(session.child_pid()),
            None => false,
        }
    }

    /// Subscribe to the session's output chunks. Dropping the receiver
    /// unsubscribes, which is always safe — including from inside a
    /// handler consuming the same receiver.
    pub fn subscribe(&self, name: &str) -> Result<broadcast::Receiver<Bytes>, ErrorCode> {
        let session = self.get_session(name).ok_or(ErrorCode::SessionNotFound)?;
        Ok(session.data_tx.subscribe())
    }

    /// Terminate a session: SIGTERM, bounded wait, SIGKILL. The session is
    /// removed from the live set even when the child was already dead.
    pub async fn kill_session(&self, name: &str) -> Result<(), ErrorCode> {
        let session = {
            let mut sessions = self.sessions.write();
            sessions.shift_remove(name).ok_or(ErrorCode::SessionNotFound)?
        };
        let pid = session.child_pid();
        if session.is_dead() || !pty::is_pid_alive(pid) {
            debug!(session = name, "kill: child already dead");
            return Ok(());
        }

        pty::signal_pid(pid, Signal::SIGTERM);
        let deadline = tokio::time::Instant::now() + KILL_GRACE;
        while tokio::time::Instant::now() < deadline {
            if !pty::is_pid_alive(pid) {
                return Ok(());
            }
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
        warn!(session = name, pid, "kill: SIGTERM timeout, escalating to SIGKILL");
        pty::signal_pid(pid, Signal::SIGKILL);
        pty::reap_nonblocking(pid);
        Ok(())
    }

    /// Kill every live session. Used at shutdown.
    pub async fn kill_all(&self) {
        for name in self.list_sessions() {
            let _ = self.kill_session(&name).await;
        }
    }
}

/// Per-session loop: pump PTY output into the buffer and subscribers,
/// drain the input channel into the PTY, and mark the session dead when
/// the child exits.
async fn read_loop(
    process: PtyProcess,
    session: Arc<Session>,
    mut input_rx: mpsc::Receiver<Bytes>,
    data_tx: broadcast::Sender<Bytes>,
    events: EventHub,
    shutdown: CancellationToken,
) {
    let mut buf = vec![0u8; 8192];
    loop {
        tokio::select! {
            result = pty::read_chunk(&process.master, &mut buf) => {
                match result {
                    Ok(0) => break,
                    Ok(n) => {
                        let chunk = Bytes::copy_from_slice(&buf[..n]);
                        session.buffer.lock().write(&chunk);
                        session.touch();
                        let _ = data_tx.send(chunk.clone());
                        events.emit(ServerEvent::TerminalOutput {
                            session_name: session.name().to_owned(),
                            chunk: String::from_utf8_lossy(&chunk).into_owned(),
                        });
                    }
                    // EIO: slave side closed, the child is gone.
                    Err(e) if e.raw_os_error() == Some(nix::libc::EIO) => break,
                    Err(e) => {
                        warn!(session = %session.name(), "pty read error: {e}");
                        break;
                    }
                }
            }
            input = input_rx.recv() => {
                match input {
                    Some(data) => {
                        if let Err(e) = pty::write_all(&process.master, &data).await {
                            warn!(session = %session.name(), "pty write error: {e}");
                            break;
                        }
                        session.touch();
                    }
                    None => break,
                }
            }
            _ = shutdown.cancelled() => break,
        }
    }

    session.dead.store(true, Ordering::Release);
    debug!(session = %session.name(), "read loop ended");

    // Reap on a blocking thread so a slow exit never stalls the runtime.
    let pid = session.child_pid();
    let _ = tokio::task::spawn_blocking(move || pty::reap_blocking(pid)).await;
}

#[cfg(test)]
#[path = "backend_tests.rs"]
mod tests;
