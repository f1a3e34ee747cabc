// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Remote execution adapter.
//!
//! Configuration generation, config upload and batch expansion all run as
//! shell command sequences on a remote build host. The engine only needs:
//! run an ordered list of lines and get `(stdout, stderr, exit code)` back,
//! and move files in both directions.
//!
//! A [`RemoteConnector`] opens a [`RemoteSession`]; callers must `close()` the
//! session on every path. Non-zero exit codes of executed commands are NOT
//! errors at this level; they are returned in [`ExecOutput`] and interpreted
//! by the caller. Transport problems are [`RemoteError`]s.

pub mod mock;
pub mod ssh;

pub use mock::MockRemote;
pub use ssh::SshConnector;

use std::path::Path;

use async_trait::async_trait;
use thiserror::Error;

/// Errors from remote operations.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum RemoteError {
    /// Could not open a session with the host.
    #[error("Could not connect to {host}: {reason}")]
    Connect {
        /// Remote host.
        host: String,
        /// Failure detail.
        reason: String,
    },

    /// File transfer failed.
    #[error("{operation} of {path} failed: {stderr}")]
    Transfer {
        /// `upload` or `download`.
        operation: &'static str,
        /// Path being transferred.
        path: String,
        /// Captured standard error.
        stderr: String,
    },

    /// SSH protocol error on an open session.
    #[error("SSH error: {0}")]
    Ssh(#[from] ssh2::Error),

    /// Local or channel I/O failed.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Other error.
    #[error("Other: {0}")]
    Other(String),
}

/// Result type for remote operations.
pub type Result<T> = std::result::Result<T, RemoteError>;

/// Output of one remote command sequence.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExecOutput {
    /// Captured standard output.
    pub stdout: String,
    /// Captured standard error.
    pub stderr: String,
    /// Exit status of the sequence (-1 if killed by a signal).
    pub exit_code: i32,
}

impl ExecOutput {
    /// Successful output with the given stdout.
    pub fn ok(stdout: impl Into<String>) -> Self {
        Self {
            stdout: stdout.into(),
            stderr: String::new(),
            exit_code: 0,
        }
    }

    /// Failed output with the given exit code and stderr.
    pub fn failed(exit_code: i32, stderr: impl Into<String>) -> Self {
        Self {
            stdout: String::new(),
            stderr: stderr.into(),
            exit_code,
        }
    }

    /// Whether the sequence exited with status 0.
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

/// Opens sessions with a remote host.
#[async_trait]
pub trait RemoteConnector: Send + Sync {
    /// Host name, for logging.
    fn host(&self) -> &str;

    /// Open a new session.
    async fn connect(&self) -> Result<Box<dyn RemoteSession>>;
}

/// An open connection to the remote host.
#[async_trait]
pub trait RemoteSession: Send + Sync {
    /// Run command lines in order in one shell, stopping nowhere on its own.
    async fn execute(&self, commands: &[String]) -> Result<ExecOutput>;

    /// Copy a local file to a path on the remote host.
    async fn upload_file(&self, local_path: &Path, remote_path: &str) -> Result<()>;

    /// Write text to a path on the remote host.
    async fn upload_content(&self, content: &str, remote_path: &str) -> Result<()>;

    /// Copy a remote file to a local path.
    async fn download_file(&self, remote_path: &str, local_path: &Path) -> Result<()>;

    /// Close the session.
    async fn close(self: Box<Self>) -> Result<()>;
}

/// Quote a string for a POSIX shell.
pub(crate) fn shell_quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', r"'\''"))
}
