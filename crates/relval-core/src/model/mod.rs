// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Persisted entities.
//!
//! Every entity is a JSON document keyed by its prepid. Collections:
//!
//! | Type | Collection |
//! |------|------------|
//! | [`BatchRequest`] | `tickets` |
//! | [`Run`] | `relvals` |
//! | [`Release`] | `releases` |
//! | [`Sequence`] | `settings` |

mod batch;
mod history;
mod run;
mod step;

pub use batch::{BatchRequest, BatchStatus, PipelineParameters, Release, Sequence};
pub use history::{AUTOMATIC_USER, HistoryEntry};
pub use run::{Run, RunStatus, WorkflowDescriptor};
pub use step::{Step, StepType, normalize_arguments};

/// Render a work-item id the way the generation tool prints it (`11634.0`).
pub fn format_workflow_id(id: f64) -> String {
    if id.fract() == 0.0 {
        format!("{:.1}", id)
    } else {
        id.to_string()
    }
}
