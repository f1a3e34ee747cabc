// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Job descriptor for the workflow management service.
//!
//! A run becomes one ReqMgr2 `TaskChain` request. Every generated step is a
//! task that references its uploaded config by hash. Input-file steps are not
//! tasks; they become the input dataset of the following task. A trailing
//! harvesting step is folded into the request as `DQMConfigCacheID`.

use serde_json::{Map, Value, json};

use crate::model::{Run, Step, StepType};

/// Group the requests are filed under.
pub const REQUEST_GROUP: &str = "PPD";

/// Requestor account.
pub const REQUESTOR: &str = "pdmvserv";

/// Default request priority.
pub const REQUEST_PRIORITY: u64 = 500_000;

fn is_harvesting(step: &Step) -> bool {
    step.stage().contains("HARVESTING")
}

/// Conditions tag a step will run with: batch override first, then the step's own.
pub fn resolve_globaltag(run: &Run, step: &Step) -> String {
    if !run.parameters.conditions_globaltag.is_empty() && !step.conditions().is_empty() {
        run.parameters.conditions_globaltag.clone()
    } else {
        step.conditions().to_string()
    }
}

/// Record the resolved conditions tag on every generated step.
pub fn resolve_globaltags(run: &mut Run) {
    let resolved: Vec<String> = run
        .steps
        .iter()
        .map(|step| match step.step_type() {
            StepType::Generated => resolve_globaltag(run, step),
            StepType::InputFile => String::new(),
        })
        .collect();

    for (step, tag) in run.steps.iter_mut().zip(resolved) {
        step.resolved_globaltag = tag;
    }
}

fn output_module(step: &Step) -> String {
    let content = step
        .arguments
        .get("eventcontent")
        .and_then(Value::as_str)
        .unwrap_or_default();
    let first = content.split(',').next().unwrap_or_default();
    format!("{}output", first)
}

fn number_argument(step: &Step, key: &str) -> Option<u64> {
    match step.arguments.get(key)? {
        Value::Number(n) => n.as_u64(),
        Value::String(s) => s.parse().ok(),
        _ => None,
    }
}

fn processing_string(run: &Run) -> String {
    let mut parts = Vec::new();
    if !run.parameters.processing_string.is_empty() {
        parts.push(run.parameters.processing_string.clone());
    }
    if !run.parameters.sample_tag.is_empty() {
        parts.push(run.parameters.sample_tag.clone());
    }
    parts.join("_")
}

/// Build the `TaskChain` request for a run whose configs have been uploaded.
pub fn build_job_dict(run: &Run) -> Value {
    let mut job = Map::new();
    job.insert("RequestType".into(), json!("TaskChain"));
    job.insert("SubRequestType".into(), json!("RelVal"));
    job.insert("Group".into(), json!(REQUEST_GROUP));
    job.insert("Requestor".into(), json!(REQUESTOR));
    job.insert("RequestPriority".into(), json!(REQUEST_PRIORITY));
    job.insert("PrepID".into(), json!(run.prepid));
    job.insert("RequestString".into(), json!(run.prepid));
    job.insert("CMSSWVersion".into(), json!(run.cmssw_release));
    job.insert(
        "Campaign".into(),
        json!(format!("{}__{}", run.cmssw_release, run.batch_name)),
    );
    job.insert("ProcessingString".into(), json!(processing_string(run)));
    job.insert(
        "ProcessingVersion".into(),
        json!(run.parameters.extension_number + 1),
    );
    job.insert("GlobalTag".into(), json!(run.conditions()));
    job.insert("EnableHarvesting".into(), json!(false));

    let mut tasks: Vec<Value> = Vec::new();
    let mut input: Option<&Step> = None;
    let mut previous: Option<&Step> = None;

    for step in &run.steps {
        match step.step_type() {
            StepType::InputFile => {
                input = Some(step);
                continue;
            }
            StepType::Generated if is_harvesting(step) => {
                job.insert("EnableHarvesting".into(), json!(true));
                job.insert("DQMConfigCacheID".into(), json!(step.config_id));
                continue;
            }
            StepType::Generated => {}
        }

        let mut task = Map::new();
        task.insert("TaskName".into(), json!(step.name));
        task.insert("ConfigCacheID".into(), json!(step.config_id));
        task.insert("GlobalTag".into(), json!(resolve_globaltag(run, step)));
        task.insert("KeepOutput".into(), json!(true));
        if let Some(threads) = number_argument(step, "nThreads") {
            task.insert("Multicore".into(), json!(threads));
        }

        if let Some(source) = input.take() {
            let dataset = source.input.get("dataset").cloned().unwrap_or(Value::Null);
            task.insert("InputDataset".into(), dataset);
            if let Some(Value::Object(lumis)) = source.input.get("lumisection")
                && !lumis.is_empty()
            {
                task.insert("LumiList".into(), Value::Object(lumis.clone()));
            }
        } else if let Some(parent) = previous {
            task.insert("InputTask".into(), json!(parent.name));
            task.insert("InputFromOutputModule".into(), json!(output_module(parent)));
        } else {
            let events = match run.parameters.events {
                0 => number_argument(step, "n").unwrap_or_default(),
                events => events,
            };
            task.insert("RequestNumEvents".into(), json!(events));
            task.insert("Seeding".into(), json!("AutomaticSeeding"));
        }

        previous = Some(step);
        tasks.push(Value::Object(task));
    }

    job.insert("TaskChain".into(), json!(tasks.len()));
    for (index, task) in tasks.into_iter().enumerate() {
        job.insert(format!("Task{}", index + 1), task);
    }

    Value::Object(job)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run(steps: Value) -> Run {
        let mut run: Run = serde_json::from_value(json!({
            "prepid": "CMSSW_13_0_0__fullsim-00001_11634_0",
            "workflow_id": 11634.0,
            "cmssw_release": "CMSSW_13_0_0",
            "batch_name": "fullsim",
            "processing_string": "PU",
            "events": 9000,
            "steps": steps,
        }))
        .unwrap();
        for (index, step) in run.steps.iter_mut().enumerate() {
            if step.step_type() == StepType::Generated {
                step.config_id = format!("hash{}", index);
            }
        }
        run
    }

    #[test]
    fn test_generated_chain() {
        let run = run(json!([
            {"name": "GenSim", "arguments": {"step": "GEN,SIM", "eventcontent": "RAWSIM", "conditions": "auto:mc", "nThreads": 4}},
            {"name": "Digi", "arguments": {"step": "DIGI,L1,DIGI2RAW", "eventcontent": "FEVTDEBUGHLT"}},
            {"name": "Harvest", "arguments": {"step": "HARVESTING:dqmHarvesting"}}
        ]));

        let job = build_job_dict(&run);

        assert_eq!(job["RequestType"], "TaskChain");
        assert_eq!(job["Campaign"], "CMSSW_13_0_0__fullsim");
        assert_eq!(job["ProcessingVersion"], 1);
        assert_eq!(job["TaskChain"], 2);
        assert_eq!(job["Task1"]["TaskName"], "GenSim");
        assert_eq!(job["Task1"]["ConfigCacheID"], "hash0");
        assert_eq!(job["Task1"]["RequestNumEvents"], 9000);
        assert_eq!(job["Task1"]["Multicore"], 4);
        assert_eq!(job["Task2"]["InputTask"], "GenSim");
        assert_eq!(job["Task2"]["InputFromOutputModule"], "RAWSIMoutput");
        assert_eq!(job["EnableHarvesting"], true);
        assert_eq!(job["DQMConfigCacheID"], "hash2");
        assert!(job.get("Task3").is_none());
    }

    #[test]
    fn test_input_file_becomes_input_dataset() {
        let run = run(json!([
            {"name": "Input", "input": {"dataset": "/JetHT/Run2022C-v1/RAW", "lumisection": {"356381": [[1, 100]]}}},
            {"name": "Reco", "arguments": {"step": "RAW2DIGI,RECO", "conditions": "auto:run3_data"}}
        ]));

        let job = build_job_dict(&run);

        assert_eq!(job["TaskChain"], 1);
        assert_eq!(job["Task1"]["InputDataset"], "/JetHT/Run2022C-v1/RAW");
        assert_eq!(job["Task1"]["LumiList"], json!({"356381": [[1, 100]]}));
        assert!(job["Task1"].get("RequestNumEvents").is_none());
    }

    #[test]
    fn test_resolve_globaltags_prefers_override() {
        let mut run = run(json!([
            {"name": "Input", "input": {"dataset": "/A/B/RAW"}},
            {"name": "Reco", "arguments": {"conditions": "auto:run3_data"}},
            {"name": "NoConditions", "arguments": {}}
        ]));
        run.parameters.conditions_globaltag = "130X_dataRun3_v2".to_string();

        resolve_globaltags(&mut run);

        assert_eq!(run.steps[0].resolved_globaltag, "");
        assert_eq!(run.steps[1].resolved_globaltag, "130X_dataRun3_v2");
        assert_eq!(run.steps[2].resolved_globaltag, "");
    }
}
