// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Run steps.
//!
//! Steps are owned by their [`Run`](super::Run) and are only meaningful at a
//! position in it; anything that needs the position (file chaining) takes the
//! whole step slice and an index.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

/// Whether a step reads externally supplied files or produces its own.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepType {
    /// Step lists existing input files (non-empty `input`).
    InputFile,
    /// Step is built with a generated configuration.
    Generated,
}

/// One stage of a run's pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Step {
    /// Step name, also used for the generated config file name.
    pub name: String,
    /// Build arguments. Leading dashes are stripped from keys.
    #[serde(default, deserialize_with = "deserialize_arguments")]
    pub arguments: Map<String, Value>,
    /// Input file provenance (dataset, lumisections, label).
    #[serde(default)]
    pub input: Map<String, Value>,
    /// Configuration cache id assigned after upload.
    #[serde(default)]
    pub config_id: String,
    /// Conditions tag resolved at submission time.
    #[serde(default)]
    pub resolved_globaltag: String,
}

impl Step {
    /// Create a step, normalizing argument names.
    pub fn new(name: impl Into<String>, arguments: Map<String, Value>, input: Map<String, Value>) -> Self {
        Self {
            name: name.into(),
            arguments: normalize_arguments(arguments),
            input,
            config_id: String::new(),
            resolved_globaltag: String::new(),
        }
    }

    /// Classify the step.
    pub fn step_type(&self) -> StepType {
        if self.input.is_empty() {
            StepType::Generated
        } else {
            StepType::InputFile
        }
    }

    /// Name of the configuration file this step produces, if any.
    pub fn config_file_name(&self) -> Option<String> {
        match self.step_type() {
            StepType::InputFile => None,
            StepType::Generated => Some(format!("{}.py", self.name)),
        }
    }

    /// Value of the `step` argument (the stage list, e.g. `HARVESTING:dqmHarvesting`).
    pub fn stage(&self) -> &str {
        self.arguments
            .get("step")
            .and_then(Value::as_str)
            .unwrap_or_default()
    }

    /// Conditions tag requested by the step's arguments.
    pub fn conditions(&self) -> &str {
        self.arguments
            .get("conditions")
            .and_then(Value::as_str)
            .unwrap_or_default()
    }

    /// Forget submission-time resolution.
    pub fn clear_resolution(&mut self) {
        self.config_id.clear();
        self.resolved_globaltag.clear();
    }
}

/// Strip leading dashes from argument names (`--conditions` -> `conditions`).
pub fn normalize_arguments(arguments: Map<String, Value>) -> Map<String, Value> {
    arguments
        .into_iter()
        .map(|(key, value)| (key.trim_start_matches('-').to_string(), value))
        .collect()
}

fn deserialize_arguments<'de, D>(deserializer: D) -> Result<Map<String, Value>, D::Error>
where
    D: Deserializer<'de>,
{
    let arguments = Option::<Map<String, Value>>::deserialize(deserializer)?;
    Ok(normalize_arguments(arguments.unwrap_or_default()))
}
