// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Memory boundary: session context snapshots handed to an external memory
//! service. Everything here is best-effort — failures are logged by the
//! caller and never block lifecycle progression.

use std::path::PathBuf;

use async_trait::async_trait;
use serde::Serialize;

use crate::store::now_epoch_ms;

/// Bytes of trailing stripped output snapshotted on session end.
pub const SNAPSHOT_BYTES: usize = 32 * 1024;

#[async_trait]
pub trait MemoryService: Send + Sync {
    async fn initialize_for_session(
        &self,
        session_name: &str,
        role: &str,
        project_path: &str,
    ) -> anyhow::Result<()>;

    /// Called with the last captured output before a session is destroyed.
    async fn on_session_end(
        &self,
        session_name: &str,
        role: &str,
        last_capture: &str,
    ) -> anyhow::Result<()>;
}

#[derive(Serialize)]
struct SessionSnapshot<'a> {
    #[serde(rename = "sessionName")]
    session_name: &'a str,
    role: &'a str,
    #[serde(rename = "capturedAt")]
    captured_at: u64,
    #[serde(rename = "lastOutput")]
    last_output: &'a str,
}

/// File-backed memory under `<home>/memory/<session>/`.
pub struct FileMemory {
    root: PathBuf,
}

impl FileMemory {
    pub fn new(home: &std::path::Path) -> Self {
        Self {
            root: home.join("memory"),
        }
    }

    fn session_dir(&self, session_name: &str) -> PathBuf {
        self.root.join(session_name)
    }
}

#[async_trait]
impl MemoryService for FileMemory {
    async fn initialize_for_session(
        &self,
        session_name: &str,
        role: &str,
        project_path: &str,
    ) -> anyhow::Result<()> {
        let dir = self.session_dir(session_name);
        tokio::fs::create_dir_all(&dir).await?;
        let context = serde_json::json!({
            "sessionName": session_name,
            "role": role,
            "projectPath": project_path,
            "initializedAt": now_epoch_ms(),
        });
        let contents = serde_json::to_string_pretty(&context)?;
        tokio::fs::write(dir.join("context.json"), contents).await?;
        Ok(())
    }

    async fn on_session_end(
        &self,
        session_name: &str,
        role: &str,
        last_capture: &str,
    ) -> anyhow::Result<()> {
        let dir = self.session_dir(session_name);
        tokio::fs::create_dir_all(&dir).await?;

        // Keep only the snapshot tail, on a char boundary.
        let mut start = last_capture.len().saturating_sub(SNAPSHOT_BYTES);
        while start < last_capture.len() && !last_capture.is_char_boundary(start) {
            start += 1;
        }
        let snapshot = SessionSnapshot {
            session_name,
            role,
            captured_at: now_epoch_ms(),
            last_output: &last_capture[start..],
        };
        let contents = serde_json::to_string_pretty(&snapshot)?;
        tokio::fs::write(dir.join("last-session.json"), contents).await?;
        Ok(())
    }
}

/// No-op memory service for tests and minimal deployments.
pub struct NoopMemory;

#[async_trait]
impl MemoryService for NoopMemory {
    async fn initialize_for_session(&self, _: &str, _: &str, _: &str) -> anyhow::Result<()> {
        Ok(())
    }

    async fn on_session_end(&self, _: &str, _: &str, _: &str) -> anyhow::Result<()> {
        Ok(())
    }
}

#[cfg(test)]
#[path = "memory_tests.rs"]
mod tests;
