// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Runs (RelVals).

use std::fmt;

use serde::{Deserialize, Serialize};

use super::batch::PipelineParameters;
use super::history::{HistoryEntry, history_users};
use super::step::Step;

/// Submission status of a run.
///
/// ```text
/// new ──► submitting ──► submitted ──► done
///  ▲           │                  └──► failed
///  └───────────┘ (any submission failure)
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    /// Created, not yet submitted.
    #[default]
    New,
    /// Queued for submission.
    Submitting,
    /// Accepted by the workflow management service.
    Submitted,
    /// Finished in computing.
    Done,
    /// Failed in computing.
    Failed,
}

impl RunStatus {
    /// Returns the string representation of the status.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::New => "new",
            Self::Submitting => "submitting",
            Self::Submitted => "submitted",
            Self::Done => "done",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A workflow created for a run by the workflow management service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkflowDescriptor {
    /// Request name assigned by the service.
    pub name: String,
}

/// One executable validation job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Run {
    /// Unique identifier.
    pub prepid: String,
    /// Work-item id this run was generated from.
    pub workflow_id: f64,
    /// Release the run is built with.
    pub cmssw_release: String,
    /// Batch name of the release/profile.
    #[serde(default)]
    pub batch_name: String,
    /// Parameters shared with the batch request.
    #[serde(flatten)]
    pub parameters: PipelineParameters,
    /// Ordered pipeline.
    #[serde(default)]
    pub steps: Vec<Step>,
    /// Submission status.
    #[serde(default)]
    pub status: RunStatus,
    /// Workflows submitted for this run.
    #[serde(default)]
    pub workflows: Vec<WorkflowDescriptor>,
    /// Campaign/generation timestamp; zero until submitted.
    #[serde(default)]
    pub campaign_timestamp: i64,
    /// Free-text notes.
    #[serde(default)]
    pub notes: String,
    /// Change log.
    #[serde(default)]
    pub history: Vec<HistoryEntry>,
}

impl Run {
    /// Append a history entry.
    pub fn add_history(&mut self, action: &str, value: impl Into<serde_json::Value>, user: &str) {
        self.history.push(HistoryEntry::new(action, value, user));
    }

    /// Users that own this run and should hear about it.
    pub fn owners(&self) -> Vec<String> {
        history_users(&self.history)
    }

    /// Name of the most recently submitted workflow.
    pub fn last_workflow(&self) -> Option<&str> {
        self.workflows.last().map(|w| w.name.as_str())
    }

    /// Return the run to `new` after a failed submission attempt.
    ///
    /// Clears everything the attempt resolved so a retry starts clean.
    pub fn reset_submission(&mut self) {
        self.status = RunStatus::New;
        self.campaign_timestamp = 0;
        for step in &mut self.steps {
            step.clear_resolution();
        }
    }

    /// Conditions tag of the first step that requests one.
    pub fn conditions(&self) -> &str {
        self.steps
            .iter()
            .map(Step::conditions)
            .find(|c| !c.is_empty())
            .unwrap_or(&self.parameters.conditions_globaltag)
    }
}
