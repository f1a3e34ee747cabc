// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Common test infrastructure for relval-core integration tests.
//!
//! Provides a TestContext with an in-memory store that can be told to fail,
//! a scripted remote host, a mock workflow service and recording
//! notifier/tracker.

#![allow(dead_code)]

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Value, json};
use tokio::sync::Mutex;

use relval_core::config::Config;
use relval_core::controller::{BatchController, RunController};
use relval_core::expansion::BatchExpander;
use relval_core::locker::Locker;
use relval_core::model::{BatchRequest, Release, Run, RunStatus};
use relval_core::notifier::RecordingNotifier;
use relval_core::remote::MockRemote;
use relval_core::store::{DocumentStore, MemoryStore, Store, StoreError};
use relval_core::submitter::Submitter;
use relval_core::workflow_service::{WorkflowService, WorkflowServiceError, WorkflowTracker};

pub const RELEASE_ID: &str = "CMSSW_13_0_0__fullsim";
pub const BATCH_ID: &str = "CMSSW_13_0_0__fullsim-00001";

/// Memory store that can fail the n-th save into one collection.
#[derive(Default)]
pub struct FailingStore {
    inner: MemoryStore,
    fail_collection: Mutex<Option<(String, usize)>>,
    saves: Mutex<Vec<(String, String)>>,
    deletes: Mutex<Vec<(String, String)>>,
}

impl FailingStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the `nth` (1-based) save into `collection`.
    pub async fn fail_save(&self, collection: &str, nth: usize) {
        *self.fail_collection.lock().await = Some((collection.to_string(), nth));
    }

    pub async fn deleted(&self, collection: &str) -> Vec<String> {
        self.deletes
            .lock()
            .await
            .iter()
            .filter(|(c, _)| c == collection)
            .map(|(_, id)| id.clone())
            .collect()
    }

    pub async fn count(&self, collection: &str) -> usize {
        self.inner.count(collection).await
    }
}

#[async_trait]
impl DocumentStore for FailingStore {
    async fn get(&self, collection: &str, id: &str) -> relval_core::store::Result<Option<Value>> {
        self.inner.get(collection, id).await
    }

    async fn save(
        &self,
        collection: &str,
        id: &str,
        document: &Value,
    ) -> relval_core::store::Result<()> {
        let attempt = {
            let mut saves = self.saves.lock().await;
            saves.push((collection.to_string(), id.to_string()));
            saves.iter().filter(|(c, _)| c == collection).count()
        };

        let failing = self.fail_collection.lock().await.clone();
        if let Some((fail_collection, nth)) = failing
            && fail_collection == collection
            && nth == attempt
        {
            return Err(StoreError::Other(format!("Injected failure saving {}", id)));
        }

        self.inner.save(collection, id, document).await
    }

    async fn delete(&self, collection: &str, id: &str) -> relval_core::store::Result<bool> {
        self.deletes
            .lock()
            .await
            .push((collection.to_string(), id.to_string()));
        self.inner.delete(collection, id).await
    }
}

/// Workflow service that hands out sequential workflow names.
#[derive(Default)]
pub struct MockWorkflowService {
    pub submitted: Mutex<Vec<Value>>,
    pub approved: Mutex<Vec<String>>,
    pub fail_submit: AtomicBool,
    pub fail_approve: AtomicBool,
    counter: AtomicUsize,
}

impl MockWorkflowService {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl WorkflowService for MockWorkflowService {
    async fn submit(&self, job: &Value) -> Result<String, WorkflowServiceError> {
        if self.fail_submit.load(Ordering::SeqCst) {
            return Err(WorkflowServiceError::Rejected {
                operation: "submit",
                status: 400,
                body: "Invalid ConfigCacheID".to_string(),
            });
        }

        self.submitted.lock().await.push(job.clone());
        let n = self.counter.fetch_add(1, Ordering::SeqCst) + 1;
        let prepid = job["PrepID"].as_str().unwrap_or_default();
        Ok(format!("pdmvserv_RV{}_{}", prepid, n))
    }

    async fn approve(&self, workflow_name: &str) -> Result<(), WorkflowServiceError> {
        if self.fail_approve.load(Ordering::SeqCst) {
            return Err(WorkflowServiceError::Rejected {
                operation: "approve",
                status: 500,
                body: "ReqMgr2 unavailable".to_string(),
            });
        }

        self.approved.lock().await.push(workflow_name.to_string());
        Ok(())
    }
}

/// Tracker that records what it was asked to do.
#[derive(Default)]
pub struct RecordingTracker {
    pub refreshed: Mutex<Vec<String>>,
    pub updated: Mutex<Vec<String>>,
}

#[async_trait]
impl WorkflowTracker for RecordingTracker {
    async fn refresh_stats(&self, workflow_names: &[String]) -> Result<(), WorkflowServiceError> {
        self.refreshed.lock().await.extend(workflow_names.iter().cloned());
        Ok(())
    }

    async fn update_workflows(&self, run: &Run) -> Result<(), WorkflowServiceError> {
        self.updated.lock().await.push(run.prepid.clone());
        Ok(())
    }
}

/// Everything an engine test needs, wired to mocks.
pub struct TestContext {
    pub config: Arc<Config>,
    pub backend: Arc<FailingStore>,
    pub store: Store,
    pub locker: Locker,
    pub remote: MockRemote,
    pub service: Arc<MockWorkflowService>,
    pub tracker: Arc<RecordingTracker>,
    pub notifier: RecordingNotifier,
    pub scratch_dir: PathBuf,
    _temp_dir: tempfile::TempDir,
}

impl TestContext {
    pub async fn new() -> Self {
        Self::with_development(false).await
    }

    pub async fn with_development(development: bool) -> Self {
        let temp_dir = tempfile::TempDir::new().unwrap();
        let scripts = temp_dir.path().join("scripts");
        let scratch_dir = temp_dir.path().join("scratch");
        std::fs::create_dir_all(&scripts).unwrap();
        std::fs::create_dir_all(&scratch_dir).unwrap();
        std::fs::write(scripts.join("runTheMatrixPdmV.py"), "# generation tool\n").unwrap();
        std::fs::write(scripts.join("config_uploader.py"), "# uploader\n").unwrap();

        let config = Config {
            database_url: "sqlite::memory:".to_string(),
            service_url: "https://cms-pdmv.cern.ch/relval".to_string(),
            cmsweb_url: "https://cmsweb.cern.ch".to_string(),
            stats_url: None,
            grid_user_cert: PathBuf::from("/dev/null"),
            grid_user_key: PathBuf::from("/dev/null"),
            remote_host: "mock".to_string(),
            ssh_credentials: None,
            remote_path: "relval_submission".to_string(),
            work_path: "relval_work".to_string(),
            matrix_script: scripts.join("runTheMatrixPdmV.py"),
            uploader_script: scripts.join("config_uploader.py"),
            workers: 2,
            queue_capacity: 16,
            development,
            notify_cc: vec!["pdmv-serv@cern.ch".to_string()],
        };

        let backend = Arc::new(FailingStore::new());
        let store = Store::new(backend.clone());
        store
            .save(&Release {
                prepid: RELEASE_ID.to_string(),
                cmssw_release: "CMSSW_13_0_0".to_string(),
                batch_name: "fullsim".to_string(),
            })
            .await
            .unwrap();

        Self {
            config: Arc::new(config),
            backend,
            store,
            locker: Locker::new(),
            remote: MockRemote::new(),
            service: Arc::new(MockWorkflowService::new()),
            tracker: Arc::new(RecordingTracker::default()),
            notifier: RecordingNotifier::new(),
            scratch_dir,
            _temp_dir: temp_dir,
        }
    }

    pub fn batches(&self) -> BatchController {
        BatchController::new(self.store.clone(), self.locker.clone())
    }

    pub fn runs(&self) -> RunController {
        RunController::new(self.store.clone(), self.locker.clone())
    }

    pub fn expander(&self) -> BatchExpander {
        BatchExpander::new(
            self.config.clone(),
            self.store.clone(),
            self.locker.clone(),
            Arc::new(self.remote.clone()),
        )
        .with_scratch_dir(&self.scratch_dir)
    }

    pub fn submitter(&self) -> Submitter {
        Submitter::new(
            self.config.clone(),
            self.store.clone(),
            self.locker.clone(),
            Arc::new(self.remote.clone()),
            self.service.clone(),
            self.tracker.clone(),
            Arc::new(self.notifier.clone()),
        )
        .with_approval_pause(Duration::from_millis(1))
    }

    /// Create the default batch request (ids 1.0, 11634.0 and 12434.0).
    pub async fn create_batch(&self) -> BatchRequest {
        let batch: BatchRequest = serde_json::from_value(json!({
            "release": RELEASE_ID,
            "workflow_ids": [1.0, 11634.0, 12434.0],
            "relval_set": "standard",
            "processing_string": "PU",
            "events": 9000,
        }))
        .unwrap();
        self.batches().create(batch, "jdoe").await.unwrap()
    }

    /// Create a three-step run (GenSim, Digi, Harvest) in `status`.
    pub async fn create_run(&self, prepid: &str, status: RunStatus) -> Run {
        let run: Run = serde_json::from_value(json!({
            "prepid": prepid,
            "workflow_id": 11634.0,
            "cmssw_release": "CMSSW_13_0_0",
            "batch_name": "fullsim",
            "events": 9000,
            "steps": [
                {"name": "GenSim", "arguments": {"step": "GEN,SIM", "eventcontent": "RAWSIM", "conditions": "auto:phase1_2022_realistic"}},
                {"name": "Digi", "arguments": {"step": "DIGI,L1,DIGI2RAW,HLT", "conditions": "auto:phase1_2022_realistic"}},
                {"name": "Harvest", "arguments": {"step": "HARVESTING:dqmHarvesting", "conditions": "auto:phase1_2022_realistic"}}
            ]
        }))
        .unwrap();

        let mut run = self.runs().create(run, "jdoe").await.unwrap();
        if status != RunStatus::New {
            run.status = status;
            self.store.save(&run).await.unwrap();
        }
        run
    }

    pub async fn run(&self, prepid: &str) -> Run {
        self.store.get::<Run>(prepid).await.unwrap().unwrap()
    }

    pub async fn batch(&self, prepid: &str) -> BatchRequest {
        self.store.get::<BatchRequest>(prepid).await.unwrap().unwrap()
    }
}

/// Upload output naming every config of the three-step run.
pub fn upload_stdout() -> String {
    [
        "Uploading GenSim.py",
        "DocID GenSim.py 0a1b2c3d",
        "DocID Digi.py 4e5f6a7b",
        "DocID Harvest.py 8c9d0e1f",
    ]
    .join("\n")
}

/// Manifest produced by the generation tool for the default batch.
pub fn manifest() -> String {
    json!({
        "1.0": {"steps": [
            {"name": "GenSim", "arguments": {"--step": "GEN,SIM", "--conditions": "auto:phase1_2022_realistic"}},
            {"name": "Digi", "arguments": {"--step": "DIGI"}}
        ]},
        "11634.0": {"steps": [
            {"name": "Input", "input": {"dataset": "/RelValTTbar/CMSSW_13_0_0-v1/GEN-SIM"}},
            {"name": "Reco", "arguments": {"--step": "RAW2DIGI,RECO"}}
        ]},
        "12434.0": {"steps": [
            {"name": "GenSim", "arguments": {"--step": "GEN,SIM"}}
        ]}
    })
    .to_string()
}
