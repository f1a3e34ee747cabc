// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Mock remote for testing.
//!
//! Commands are answered from scripted rules; uploads and downloads go to an
//! in-memory file table. Everything the engine does is recorded so tests can
//! assert on it.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;

use super::{ExecOutput, RemoteConnector, RemoteError, RemoteSession, Result};

#[derive(Default)]
struct MockState {
    /// (substring of the joined command lines, response)
    rules: Vec<(String, ExecOutput)>,
    /// Remote files, written by uploads or seeded by tests.
    files: HashMap<String, String>,
    /// (path substring, content) served for downloads of unknown paths.
    download_rules: Vec<(String, String)>,
    executed: Vec<Vec<String>>,
    connects: usize,
    closes: usize,
    fail_connect: bool,
}

/// Scripted in-memory remote host.
#[derive(Clone, Default)]
pub struct MockRemote {
    state: Arc<Mutex<MockState>>,
}

impl MockRemote {
    /// Create a mock where every command succeeds with empty output.
    pub fn new() -> Self {
        Self::default()
    }

    /// Answer any command sequence containing `pattern` with `output`.
    ///
    /// Rules are checked in insertion order; the first match wins.
    pub async fn respond(&self, pattern: impl Into<String>, output: ExecOutput) {
        self.state.lock().await.rules.push((pattern.into(), output));
    }

    /// Serve `content` for downloads whose remote path contains `pattern`.
    pub async fn serve_download(&self, pattern: impl Into<String>, content: impl Into<String>) {
        self.state
            .lock()
            .await
            .download_rules
            .push((pattern.into(), content.into()));
    }

    /// Make `connect()` fail.
    pub async fn fail_connect(&self) {
        self.state.lock().await.fail_connect = true;
    }

    /// All executed command sequences, in order.
    pub async fn executed(&self) -> Vec<Vec<String>> {
        self.state.lock().await.executed.clone()
    }

    /// Content of a remote file, if uploaded.
    pub async fn file(&self, remote_path: &str) -> Option<String> {
        self.state.lock().await.files.get(remote_path).cloned()
    }

    /// Remote paths that have been written.
    pub async fn uploaded_paths(&self) -> Vec<String> {
        let mut paths: Vec<String> = self.state.lock().await.files.keys().cloned().collect();
        paths.sort();
        paths
    }

    /// Number of sessions opened and closed.
    pub async fn session_counts(&self) -> (usize, usize) {
        let state = self.state.lock().await;
        (state.connects, state.closes)
    }
}

#[async_trait]
impl RemoteConnector for MockRemote {
    fn host(&self) -> &str {
        "mock"
    }

    async fn connect(&self) -> Result<Box<dyn RemoteSession>> {
        let mut state = self.state.lock().await;
        if state.fail_connect {
            return Err(RemoteError::Connect {
                host: "mock".to_string(),
                reason: "Mock connection failure".to_string(),
            });
        }
        state.connects += 1;
        Ok(Box::new(MockSession {
            state: self.state.clone(),
        }))
    }
}

struct MockSession {
    state: Arc<Mutex<MockState>>,
}

#[async_trait]
impl RemoteSession for MockSession {
    async fn execute(&self, commands: &[String]) -> Result<ExecOutput> {
        let mut state = self.state.lock().await;
        state.executed.push(commands.to_vec());

        let joined = commands.join("\n");
        Ok(state
            .rules
            .iter()
            .find(|(pattern, _)| joined.contains(pattern.as_str()))
            .map(|(_, output)| output.clone())
            .unwrap_or_default())
    }

    async fn upload_file(&self, local_path: &Path, remote_path: &str) -> Result<()> {
        let content = tokio::fs::read_to_string(local_path).await?;
        self.upload_content(&content, remote_path).await
    }

    async fn upload_content(&self, content: &str, remote_path: &str) -> Result<()> {
        self.state
            .lock()
            .await
            .files
            .insert(remote_path.to_string(), content.to_string());
        Ok(())
    }

    async fn download_file(&self, remote_path: &str, local_path: &Path) -> Result<()> {
        let content = {
            let state = self.state.lock().await;
            state.files.get(remote_path).cloned().or_else(|| {
                state
                    .download_rules
                    .iter()
                    .find(|(pattern, _)| remote_path.contains(pattern.as_str()))
                    .map(|(_, content)| content.clone())
            })
        };

        match content {
            Some(content) => Ok(tokio::fs::write(local_path, content).await?),
            None => Err(RemoteError::Transfer {
                operation: "download",
                path: remote_path.to_string(),
                stderr: "No such file or directory".to_string(),
            }),
        }
    }

    async fn close(self: Box<Self>) -> Result<()> {
        self.state.lock().await.closes += 1;
        Ok(())
    }
}
