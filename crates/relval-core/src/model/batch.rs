// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Batch requests (tickets), releases and id sequences.

use std::fmt;

use serde::{Deserialize, Serialize};

use super::history::{HistoryEntry, history_users};

/// Parameters a batch request hands down to every run it creates.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineParameters {
    /// Processing label.
    pub processing_string: String,
    /// Extension counter.
    pub extension_number: u32,
    /// Sample tag.
    pub sample_tag: String,
    /// Number of events (0 keeps the generator default).
    pub events: u64,
    /// Run-set label passed to the generation tool.
    pub relval_set: String,
    /// Conditions tag override.
    pub conditions_globaltag: String,
    /// Reuse GEN-SIM from an earlier production.
    pub reuse_gensim: bool,
}

/// Batch request status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BatchStatus {
    /// Not expanded yet.
    #[default]
    New,
    /// Runs were created.
    Done,
}

impl fmt::Display for BatchStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::New => f.write_str("new"),
            Self::Done => f.write_str("done"),
        }
    }
}

/// A user-issued request that expands into many runs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchRequest {
    /// Unique identifier, assigned on creation.
    #[serde(default)]
    pub prepid: String,
    /// Release/profile this batch is built against.
    pub release: String,
    /// Work-item ids to generate.
    #[serde(default)]
    pub workflow_ids: Vec<f64>,
    /// Shared pipeline parameters.
    #[serde(flatten)]
    pub parameters: PipelineParameters,
    /// Expansion status.
    #[serde(default)]
    pub status: BatchStatus,
    /// Runs created by expansion.
    #[serde(default)]
    pub created_relvals: Vec<String>,
    /// Free-text notes.
    #[serde(default)]
    pub notes: String,
    /// Change log.
    #[serde(default)]
    pub history: Vec<HistoryEntry>,
}

impl BatchRequest {
    /// Append a history entry.
    pub fn add_history(&mut self, action: &str, value: impl Into<serde_json::Value>, user: &str) {
        self.history.push(HistoryEntry::new(action, value, user));
    }

    /// Users that own this batch.
    pub fn owners(&self) -> Vec<String> {
        history_users(&self.history)
    }
}

/// Release/profile referenced by batch requests. Read-only for the engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Release {
    /// Unique identifier.
    pub prepid: String,
    /// Release version, e.g. `CMSSW_13_0_0`.
    pub cmssw_release: String,
    /// Batch name label.
    pub batch_name: String,
}

impl Release {
    /// Prefix used for ids of batch requests built against this release.
    pub fn id_prefix(&self) -> String {
        format!("{}__{}", self.cmssw_release, self.batch_name)
    }
}

/// Monotonic counter for one id prefix.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Sequence {
    /// The prefix this counter belongs to.
    pub prepid: String,
    /// Last value handed out.
    pub value: u64,
}
