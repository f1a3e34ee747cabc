// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Step configuration builder.
//!
//! Renders a run's steps into the shell scripts executed on the build host:
//!
//! - `config_generate.sh`: one `cmsDriver.py ... --no_exec` per generated step
//!   (and an input listing per input-file step), chained through files named
//!   after the step index:
//!
//! ```text
//! step1 (input-file)  ──► step1_files.txt + step1_lumi_ranges.txt
//! step2 (generated)   ──► step2.root        (filein filelist:step1_files.txt)
//! step3 (generated)   ──► step3.root        (filein file:step2.root)
//! step4 (HARVESTING)                        (filein file:step3_inDQM.root)
//! ```
//!
//! - `config_upload.sh`: pushes every generated config file to the config
//!   cache; the uploader prints one `DocID <file> <hash>` line per file.
//!
//! Rendering is deterministic: argument keys are emitted in sorted order, so
//! equal argument maps always produce byte-identical scripts.

use serde_json::{Map, Value};

use crate::model::{Run, StepType};

/// Argument keys that are bookkeeping, never passed to cmsDriver.
pub const RESERVED_KEYS: [&str; 2] = ["config_id", "harvesting_config_id"];

/// Free-form argument appended verbatim at the end of the command.
pub const EXTRA_KEY: &str = "extra";

/// Name of the generated configuration script on the remote host.
pub const GENERATE_SCRIPT: &str = "config_generate.sh";

/// Name of the upload script on the remote host.
pub const UPLOAD_SCRIPT: &str = "config_upload.sh";

/// Name of the uploader helper next to the upload script.
pub const UPLOADER_HELPER: &str = "config_uploader.py";

/// One rendered step: an audit comment block and the command itself.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepCommand {
    /// `#`-prefixed argument listing.
    pub comment: String,
    /// Command line(s), ending with the exit-on-error guard.
    pub command: String,
}

impl std::fmt::Display for StepCommand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}\n{}", self.comment, self.command)
    }
}

/// Python truthiness for argument values.
fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(a) => !a.is_empty(),
        Value::Object(o) => !o.is_empty(),
    }
}

fn scalar(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Bool(true) => String::new(),
        Value::Array(items) => items.iter().map(scalar).collect::<Vec<_>>().join(","),
        other => other.to_string(),
    }
}

/// Arguments for the step at `index`, with file chaining applied.
///
/// Takes the whole run because chaining depends on the previous step.
pub fn step_arguments(run: &Run, index: usize) -> Map<String, Value> {
    let step = &run.steps[index];
    let mut arguments = step.arguments.clone();
    for key in RESERVED_KEYS {
        arguments.remove(key);
    }

    if step.step_type() == StepType::InputFile {
        return arguments;
    }

    if index > 0 {
        let previous = &run.steps[index - 1];
        if previous.step_type() == StepType::InputFile {
            arguments.insert(
                "filein".to_string(),
                Value::from(format!("\"filelist:step{}_files.txt\"", index)),
            );
            arguments.insert(
                "lumiToProcess".to_string(),
                Value::from(format!("\"step{}_lumi_ranges.txt\"", index)),
            );
        } else if step.stage().contains("HARVESTING") {
            arguments.insert(
                "filein".to_string(),
                Value::from(format!("\"file:step{}_inDQM.root\"", index)),
            );
        } else {
            arguments.insert(
                "filein".to_string(),
                Value::from(format!("\"file:step{}.root\"", index)),
            );
        }
    } else if run.parameters.events > 0 {
        arguments.insert("n".to_string(), Value::from(run.parameters.events));
    }

    arguments.insert(
        "fileout".to_string(),
        Value::from(format!("\"file:step{}.root\"", index + 1)),
    );
    arguments.insert(
        "python_filename".to_string(),
        Value::from(format!("{}.py", step.name)),
    );
    arguments.insert("no_exec".to_string(), Value::Bool(true));

    if !run.parameters.conditions_globaltag.is_empty() && arguments.contains_key("conditions") {
        arguments.insert(
            "conditions".to_string(),
            Value::from(run.parameters.conditions_globaltag.clone()),
        );
    }

    arguments
}

/// Render a cmsDriver command labelled `label` from `arguments`.
pub fn render_cmsdriver(label: &str, arguments: &Map<String, Value>) -> StepCommand {
    let mut command = format!("# Command for {}:\ncmsDriver.py {}", label, label);
    let mut comment = format!("# Arguments for {}:\n", label);

    let mut keys: Vec<&String> = arguments.keys().collect();
    keys.sort();

    for key in keys {
        let value = &arguments[key.as_str()];
        if key == EXTRA_KEY || !is_truthy(value) {
            continue;
        }

        let token = format!(" --{} {}", key, scalar(value));
        command.push_str(token.trim_end());
        comment.push_str(&format!("#{}\n", token.trim_end()));
    }

    if let Some(extra) = arguments.get(EXTRA_KEY).filter(|v| is_truthy(v)) {
        let extra = scalar(extra);
        command.push_str(&format!(" {}", extra));
        comment.push_str(&format!("# <extra> {}\n", extra));
    }

    command.push_str(" || exit $?");

    StepCommand { comment, command }
}

/// Render the input listing for an input-file step at `index`.
fn render_input_listing(run: &Run, index: usize) -> StepCommand {
    let step = &run.steps[index];
    let label = format!("step{}", index + 1);
    let files = format!("step{}_files.txt", index + 1);
    let lumis = format!("step{}_lumi_ranges.txt", index + 1);

    let dataset = step
        .input
        .get("dataset")
        .and_then(Value::as_str)
        .unwrap_or_default();
    let lumisection = step
        .input
        .get("lumisection")
        .cloned()
        .unwrap_or_else(|| Value::Object(Map::new()));

    let mut runs: Vec<String> = match step.input.get("run") {
        Some(Value::Array(items)) if !items.is_empty() => items.iter().map(scalar).collect(),
        _ => lumisection
            .as_object()
            .map(|o| o.keys().cloned().collect())
            .unwrap_or_default(),
    };
    runs.sort();
    runs.dedup();

    let mut comment = format!("# Input files for {}:\n# dataset {}\n", label, dataset);
    if !runs.is_empty() {
        comment.push_str(&format!("# runs {}\n", runs.join(",")));
    }

    let mut command = format!("# Command for {}:\n", label);
    command.push_str(&format!("echo \"\" > {}\n", files));
    if runs.is_empty() {
        command.push_str(&format!(
            "dasgoclient --limit 0 --query \"file dataset={}\" >> {} || exit $?\n",
            dataset, files
        ));
    } else {
        command.push_str(&format!(
            "for run in {}; do dasgoclient --limit 0 --query \"file dataset={} run=$run\" >> {} || exit $?; done\n",
            runs.join(" "),
            dataset,
            files
        ));
    }
    command.push_str(&format!("echo '{}' > {}", lumisection, lumis));

    StepCommand { comment, command }
}

/// Render the step at `index` of `run`.
pub fn render_step(run: &Run, index: usize) -> StepCommand {
    match run.steps[index].step_type() {
        StepType::InputFile => render_input_listing(run, index),
        StepType::Generated => {
            render_cmsdriver(&format!("step{}", index + 1), &step_arguments(run, index))
        }
    }
}

pub(crate) fn environment_setup(cmssw_release: &str) -> Vec<String> {
    vec![
        "source /cvmfs/cms.cern.ch/cmsset_default.sh".to_string(),
        format!(
            "if [ -r {0}/src ] ; then echo {0} already exist",
            cmssw_release
        ),
        format!("else scram p CMSSW {}", cmssw_release),
        "fi".to_string(),
        format!("cd {}/src", cmssw_release),
        "eval `scram runtime -sh`".to_string(),
        "cd ../..".to_string(),
    ]
}

/// Full `config_generate.sh` for a run.
pub fn generate_script(run: &Run) -> String {
    let mut script = vec!["#!/bin/bash".to_string(), String::new()];
    script.push(format!("# Configs for {}", run.prepid));
    script.extend(environment_setup(&run.cmssw_release));

    for index in 0..run.steps.len() {
        script.push(String::new());
        script.push(render_step(run, index).to_string());
    }

    script.push(String::new());
    script.join("\n")
}

/// Full `config_upload.sh` for a run.
///
/// Uploads every generated config to the config cache at `cmsweb_url`.
pub fn upload_script(run: &Run, cmsweb_url: &str) -> String {
    let mut script = vec!["#!/bin/bash".to_string(), String::new()];
    script.push(format!("# Config upload for {}", run.prepid));
    script.extend(environment_setup(&run.cmssw_release));
    script.push(String::new());

    let database = format!("{}/couchdb", cmsweb_url.trim_end_matches('/'));
    for step in &run.steps {
        let Some(file_name) = step.config_file_name() else {
            continue;
        };
        script.push(format!(
            "python {} --file {} --label {} --group ppd --user $(echo $USER) --db {} || exit $?",
            UPLOADER_HELPER, file_name, step.name, database
        ));
    }

    script.push(String::new());
    script.join("\n")
}
