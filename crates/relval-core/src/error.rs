// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Error types for relval-core.

use thiserror::Error;

use crate::reconcile::ConfigHash;

/// Engine errors.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// Configuration loading failed.
    #[error("Configuration error: {0}")]
    Config(#[from] crate::config::ConfigError),

    /// Document store operation failed.
    #[error("Store error: {0}")]
    Store(#[from] crate::store::StoreError),

    /// Remote execution adapter failed (transport, not exit status).
    #[error("Remote error: {0}")]
    Remote(#[from] crate::remote::RemoteError),

    /// Workflow management service rejected or failed a request.
    #[error("Workflow service error: {0}")]
    WorkflowService(#[from] crate::workflow_service::WorkflowServiceError),

    /// I/O operation failed.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization failed.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Document was not found.
    #[error("Object \"{id}\" could not be found in {collection}")]
    NotFound {
        /// Collection that was searched.
        collection: &'static str,
        /// Missing document id.
        id: String,
    },

    /// Document with the same id already exists.
    #[error("Object \"{id}\" already exists in {collection}")]
    AlreadyExists {
        /// Target collection.
        collection: &'static str,
        /// Conflicting document id.
        id: String,
    },

    /// Entity is in the wrong status for the requested operation.
    #[error("Cannot {action} {prepid} with status {status}")]
    InvalidStatus {
        /// Entity id.
        prepid: String,
        /// Status found in the store.
        status: String,
        /// Operation that was attempted.
        action: &'static str,
    },

    /// Batch request still owns runs and cannot be deleted.
    #[error(
        "It is not allowed to delete tickets that have relvals created. {prepid} has {count} relvals"
    )]
    DeleteForbidden {
        /// Batch request id.
        prepid: String,
        /// Number of child runs.
        count: usize,
    },

    /// Remote workspace could not be prepared.
    #[error("Error code {exit_code} preparing workspace: {stderr}")]
    WorkspacePreparation {
        /// Remote exit status.
        exit_code: i32,
        /// Captured standard error.
        stderr: String,
    },

    /// Remote generation (manifest or configs) failed.
    #[error("Error code {exit_code} generating {target}: {stderr}")]
    Generation {
        /// What was being generated.
        target: String,
        /// Remote exit status.
        exit_code: i32,
        /// Captured standard error.
        stderr: String,
    },

    /// Remote config upload failed.
    #[error("Error code {exit_code} uploading configs for {prepid}: {stderr}")]
    Upload {
        /// Run id.
        prepid: String,
        /// Remote exit status.
        exit_code: i32,
        /// Captured standard error.
        stderr: String,
    },

    /// Generation manifest could not be parsed.
    #[error("Malformed manifest {file}: {reason}")]
    Manifest {
        /// Manifest file name.
        file: String,
        /// Parse failure.
        reason: String,
    },

    /// A step that needs a configuration got no hash.
    #[error("Could not find hash for {step}")]
    MissingHash {
        /// Step name.
        step: String,
    },

    /// Upload produced hashes that no step claimed.
    #[error("Unused hashes: {}", format_hashes(.0))]
    UnusedHashes(Vec<ConfigHash>),

    /// Worker queue no longer accepts tasks.
    #[error("Worker queue {0} is closed")]
    QueueClosed(String),

    /// Other error.
    #[error("{0}")]
    Other(String),
}

fn format_hashes(hashes: &[ConfigHash]) -> String {
    hashes
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

/// Result type using the engine Error.
pub type Result<T> = std::result::Result<T, Error>;
