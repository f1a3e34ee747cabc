// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Embeddable runtime for relval-core.
//!
//! [`RelvalRuntime`] wires the document store, lock registry, remote
//! connector, workflow service and notifier together and runs the submission
//! worker pool.
//!
//! # Example
//!
//! ```rust,ignore
//! use relval_core::config::Config;
//! use relval_core::runtime::RelvalRuntime;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::from_env()?;
//!
//!     let runtime = RelvalRuntime::builder()
//!         .from_config(config)
//!         .await?
//!         .build()?
//!         .start()
//!         .await?;
//!
//!     runtime.submit_run("CMSSW_13_0_0__fullsim-00001_11634_0", "jdoe").await?;
//!
//!     runtime.shutdown().await;
//!     Ok(())
//! }
//! ```

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tracing::{info, warn};

use crate::config::Config;
use crate::controller::{BatchController, RunController};
use crate::expansion::BatchExpander;
use crate::locker::Locker;
use crate::model::{BatchRequest, Run};
use crate::notifier::{LogNotifier, Notifier};
use crate::remote::{RemoteConnector, SshConnector};
use crate::store::{SqliteStore, Store};
use crate::submitter::Submitter;
use crate::worker_queue::WorkerQueue;
use crate::workflow_service::{
    NoopTracker, ReqMgrClient, StatsTracker, WorkflowService, WorkflowTracker,
};

/// Builder for creating a [`RelvalRuntime`].
#[derive(Default)]
pub struct RelvalRuntimeBuilder {
    config: Option<Config>,
    store: Option<Store>,
    locker: Option<Locker>,
    connector: Option<Arc<dyn RemoteConnector>>,
    service: Option<Arc<dyn WorkflowService>>,
    tracker: Option<Arc<dyn WorkflowTracker>>,
    notifier: Option<Arc<dyn Notifier>>,
    approval_pause: Option<Duration>,
}

impl RelvalRuntimeBuilder {
    /// Create a new builder with default settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Fill in production collaborators from `config`.
    ///
    /// Opens the SQLite store, the SSH connector, the ReqMgr2 client and, if
    /// a stats URL is configured, the stats tracker.
    pub async fn from_config(mut self, config: Config) -> Result<Self> {
        let store = SqliteStore::connect(&config.database_url).await?;
        self.store = Some(Store::new(Arc::new(store)));

        self.connector = Some(Arc::new(SshConnector::new(
            config.remote_host.clone(),
            config.ssh_credentials.clone(),
        )));

        self.service = Some(Arc::new(ReqMgrClient::new(
            config.cmsweb_url.clone(),
            &config.grid_user_cert,
            &config.grid_user_key,
        )?));

        let tracker: Arc<dyn WorkflowTracker> = match &config.stats_url {
            Some(url) => Arc::new(StatsTracker::new(url.clone())?),
            None => Arc::new(NoopTracker),
        };
        self.tracker = Some(tracker);

        self.config = Some(config);
        Ok(self)
    }

    /// Set the configuration (required).
    pub fn config(mut self, config: Config) -> Self {
        self.config = Some(config);
        self
    }

    /// Set the document store (required).
    pub fn store(mut self, store: Store) -> Self {
        self.store = Some(store);
        self
    }

    /// Share an existing lock registry.
    ///
    /// Default: a fresh registry
    pub fn locker(mut self, locker: Locker) -> Self {
        self.locker = Some(locker);
        self
    }

    /// Set the remote connector (required).
    pub fn connector(mut self, connector: Arc<dyn RemoteConnector>) -> Self {
        self.connector = Some(connector);
        self
    }

    /// Set the workflow management service (required).
    pub fn workflow_service(mut self, service: Arc<dyn WorkflowService>) -> Self {
        self.service = Some(service);
        self
    }

    /// Set the workflow tracker.
    ///
    /// Default: [`NoopTracker`]
    pub fn tracker(mut self, tracker: Arc<dyn WorkflowTracker>) -> Self {
        self.tracker = Some(tracker);
        self
    }

    /// Set the notifier.
    ///
    /// Default: [`LogNotifier`]
    pub fn notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = Some(notifier);
        self
    }

    /// Set the pause between workflow submission and approval.
    ///
    /// Default: 3 seconds
    pub fn approval_pause(mut self, pause: Duration) -> Self {
        self.approval_pause = Some(pause);
        self
    }

    /// Build the runtime configuration.
    ///
    /// Returns an error if required fields are missing.
    pub fn build(self) -> Result<RelvalRuntimeConfig> {
        let config = self
            .config
            .ok_or_else(|| anyhow::anyhow!("config is required"))?;
        let store = self
            .store
            .ok_or_else(|| anyhow::anyhow!("store is required"))?;
        let connector = self
            .connector
            .ok_or_else(|| anyhow::anyhow!("connector is required"))?;
        let service = self
            .service
            .ok_or_else(|| anyhow::anyhow!("workflow_service is required"))?;

        Ok(RelvalRuntimeConfig {
            config: Arc::new(config),
            store,
            locker: self.locker.unwrap_or_default(),
            connector,
            service,
            tracker: self.tracker.unwrap_or_else(|| Arc::new(NoopTracker)),
            notifier: self.notifier.unwrap_or_else(|| Arc::new(LogNotifier)),
            approval_pause: self.approval_pause.unwrap_or(Duration::from_secs(3)),
        })
    }
}

/// Configuration for a [`RelvalRuntime`].
pub struct RelvalRuntimeConfig {
    config: Arc<Config>,
    store: Store,
    locker: Locker,
    connector: Arc<dyn RemoteConnector>,
    service: Arc<dyn WorkflowService>,
    tracker: Arc<dyn WorkflowTracker>,
    notifier: Arc<dyn Notifier>,
    approval_pause: Duration,
}

impl RelvalRuntimeConfig {
    /// Start the runtime, spawning the submission workers.
    pub async fn start(self) -> Result<RelvalRuntime> {
        let submitter = Submitter::new(
            self.config.clone(),
            self.store.clone(),
            self.locker.clone(),
            self.connector.clone(),
            self.service,
            self.tracker,
            self.notifier,
        )
        .with_approval_pause(self.approval_pause);

        let submissions = WorkerQueue::start(
            "submission",
            self.config.workers,
            self.config.queue_capacity,
            Arc::new(submitter),
        );

        let expander = BatchExpander::new(
            self.config.clone(),
            self.store.clone(),
            self.locker.clone(),
            self.connector,
        );

        info!(
            workers = self.config.workers,
            development = self.config.development,
            "RelvalRuntime started"
        );

        Ok(RelvalRuntime {
            batches: BatchController::new(self.store.clone(), self.locker.clone()),
            runs: RunController::new(self.store.clone(), self.locker.clone()),
            expander,
            submissions,
            store: self.store,
            config: self.config,
        })
    }
}

/// A running engine instance.
///
/// Call [`shutdown`](Self::shutdown) to let queued submissions finish.
pub struct RelvalRuntime {
    config: Arc<Config>,
    store: Store,
    batches: BatchController,
    runs: RunController,
    expander: BatchExpander,
    submissions: WorkerQueue<String>,
}

impl RelvalRuntime {
    /// Create a new runtime builder.
    pub fn builder() -> RelvalRuntimeBuilder {
        RelvalRuntimeBuilder::new()
    }

    /// Configuration the runtime was started with.
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Shared document store.
    pub fn store(&self) -> &Store {
        &self.store
    }

    /// Batch request controller.
    pub fn batches(&self) -> &BatchController {
        &self.batches
    }

    /// Run controller.
    pub fn runs(&self) -> &RunController {
        &self.runs
    }

    /// Create a batch request.
    pub async fn create_batch(&self, batch: BatchRequest, user: &str) -> crate::Result<BatchRequest> {
        self.batches.create(batch, user).await
    }

    /// Expand a batch request into runs.
    pub async fn expand_batch(&self, prepid: &str, user: &str) -> crate::Result<Vec<String>> {
        self.expander.expand(prepid, user).await
    }

    /// Delete a batch request without runs.
    pub async fn delete_batch(&self, prepid: &str) -> crate::Result<()> {
        self.batches.delete(prepid).await
    }

    /// Mark a run `submitting` and queue it for the workers.
    pub async fn submit_run(&self, prepid: &str, user: &str) -> crate::Result<Run> {
        let run = self.runs.prepare_submission(prepid, user).await?;
        if let Err(e) = self.submissions.enqueue(prepid.to_string()).await {
            warn!(prepid, error = %e, "Could not queue run, reverting");
            self.runs.revert_submission(prepid).await?;
            return Err(e);
        }
        Ok(run)
    }

    /// Number of runs waiting for a worker.
    pub fn pending_submissions(&self) -> usize {
        self.submissions.pending()
    }

    /// Stop accepting submissions and wait for queued ones to finish.
    pub async fn shutdown(&self) {
        info!("Shutting down RelvalRuntime");
        self.submissions.shutdown().await;
        info!("RelvalRuntime shutdown complete");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::remote::MockRemote;
    use async_trait::async_trait;
    use serde_json::Value;
    use std::path::PathBuf;

    struct StubService;

    #[async_trait]
    impl WorkflowService for StubService {
        async fn submit(&self, _job: &Value) -> crate::workflow_service::Result<String> {
            Ok("pdmvserv_RVstub".to_string())
        }

        async fn approve(&self, _workflow_name: &str) -> crate::workflow_service::Result<()> {
            Ok(())
        }
    }

    fn config() -> Config {
        Config {
            database_url: "sqlite::memory:".to_string(),
            service_url: String::new(),
            cmsweb_url: String::new(),
            stats_url: None,
            grid_user_cert: PathBuf::new(),
            grid_user_key: PathBuf::new(),
            remote_host: "mock".to_string(),
            ssh_credentials: None,
            remote_path: "relval_submission".to_string(),
            work_path: "relval_work".to_string(),
            matrix_script: PathBuf::new(),
            uploader_script: PathBuf::new(),
            workers: 1,
            queue_capacity: 4,
            development: true,
            notify_cc: Vec::new(),
        }
    }

    fn complete_builder() -> RelvalRuntimeBuilder {
        RelvalRuntime::builder()
            .config(config())
            .store(Store::memory())
            .connector(Arc::new(MockRemote::new()))
            .workflow_service(Arc::new(StubService))
    }

    fn build_error(builder: RelvalRuntimeBuilder) -> String {
        match builder.build() {
            Ok(_) => panic!("build succeeded with a missing collaborator"),
            Err(err) => err.to_string(),
        }
    }

    #[test]
    fn test_builder_build_fails_without_config() {
        let mut builder = complete_builder();
        builder.config = None;

        assert!(build_error(builder).contains("config is required"));
    }

    #[test]
    fn test_builder_build_fails_without_store() {
        let mut builder = complete_builder();
        builder.store = None;

        assert!(build_error(builder).contains("store is required"));
    }

    #[test]
    fn test_builder_build_fails_without_connector() {
        let mut builder = complete_builder();
        builder.connector = None;

        assert!(build_error(builder).contains("connector is required"));
    }

    #[test]
    fn test_builder_build_fails_without_workflow_service() {
        let mut builder = complete_builder();
        builder.service = None;

        assert!(build_error(builder).contains("workflow_service is required"));
    }

    #[test]
    fn test_empty_builder_reports_config_first() {
        assert!(build_error(RelvalRuntimeBuilder::new()).contains("config is required"));
    }

    #[test]
    fn test_builder_defaults() {
        let runtime_config = complete_builder().build().unwrap();

        assert_eq!(runtime_config.approval_pause, Duration::from_secs(3));
        assert_eq!(runtime_config.config.workers, 1);
    }

    #[test]
    fn test_builder_approval_pause_overrides_default() {
        let runtime_config = complete_builder()
            .approval_pause(Duration::from_millis(10))
            .build()
            .unwrap();

        assert_eq!(runtime_config.approval_pause, Duration::from_millis(10));
    }

    #[tokio::test]
    async fn test_complete_builder_starts_and_shuts_down() {
        let runtime = complete_builder().build().unwrap().start().await.unwrap();

        assert_eq!(runtime.config().remote_host, "mock");
        assert_eq!(runtime.pending_submissions(), 0);

        runtime.shutdown().await;
    }
}
