// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Workflow management service client.
//!
//! Runs end up as workflows in the request manager (ReqMgr2). The engine
//! submits a job descriptor, gets a workflow name back and approves it. After
//! submission the stats service is asked to start tracking the workflow.

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Value, json};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::model::Run;

/// Errors from the workflow management service.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum WorkflowServiceError {
    /// Client identity could not be loaded.
    #[error("Invalid credentials: {0}")]
    Credentials(String),

    /// Request could not be sent or the response could not be read.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Service answered with a non-success status.
    #[error("{operation} rejected with status {status}: {body}")]
    Rejected {
        /// `submit`, `approve` or `refresh`.
        operation: &'static str,
        /// HTTP status code.
        status: u16,
        /// Response body.
        body: String,
    },

    /// Response did not have the expected shape.
    #[error("Unexpected response: {0}")]
    UnexpectedResponse(String),
}

/// Result type for workflow service operations.
pub type Result<T> = std::result::Result<T, WorkflowServiceError>;

/// Submission side of the workflow management service.
#[async_trait]
pub trait WorkflowService: Send + Sync {
    /// Submit a job descriptor, returning the assigned workflow name.
    async fn submit(&self, job: &Value) -> Result<String>;

    /// Approve a submitted workflow so it can be assigned.
    async fn approve(&self, workflow_name: &str) -> Result<()>;
}

/// Status tracking collaborators notified after submission.
#[async_trait]
pub trait WorkflowTracker: Send + Sync {
    /// Ask the stats service to refresh these workflows.
    async fn refresh_stats(&self, workflow_names: &[String]) -> Result<()>;

    /// Register the run's workflows for status tracking.
    async fn update_workflows(&self, run: &Run) -> Result<()>;
}

fn build_client(identity: Option<reqwest::Identity>) -> Result<reqwest::Client> {
    let mut builder = reqwest::Client::builder()
        .timeout(Duration::from_secs(120))
        .user_agent(concat!("relval-core/", env!("CARGO_PKG_VERSION")));
    if let Some(identity) = identity {
        builder = builder.identity(identity);
    }
    Ok(builder.build()?)
}

async fn check_status(
    operation: &'static str,
    response: reqwest::Response,
) -> Result<reqwest::Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    Err(WorkflowServiceError::Rejected {
        operation,
        status: status.as_u16(),
        body,
    })
}

/// ReqMgr2 client authenticated with a grid certificate and key.
pub struct ReqMgrClient {
    client: reqwest::Client,
    base_url: String,
}

impl ReqMgrClient {
    /// Create a client for `base_url` using PEM certificate and key files.
    pub fn new(base_url: impl Into<String>, cert_file: &Path, key_file: &Path) -> Result<Self> {
        let mut pem = std::fs::read(cert_file).map_err(|e| {
            WorkflowServiceError::Credentials(format!("{}: {}", cert_file.display(), e))
        })?;
        pem.push(b'\n');
        pem.extend(std::fs::read(key_file).map_err(|e| {
            WorkflowServiceError::Credentials(format!("{}: {}", key_file.display(), e))
        })?);

        let identity = reqwest::Identity::from_pem(&pem)
            .map_err(|e| WorkflowServiceError::Credentials(e.to_string()))?;

        Ok(Self {
            client: build_client(Some(identity))?,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    fn request_url(&self) -> String {
        format!("{}/reqmgr2/data/request", self.base_url)
    }
}

/// Pull the workflow name out of a ReqMgr2 submission response.
///
/// ReqMgr2 answers `{"result": [{"request": "<name>"}]}`.
pub fn workflow_name_from_response(body: &Value) -> Result<String> {
    body.get("result")
        .and_then(Value::as_array)
        .and_then(|results| results.first())
        .and_then(|first| first.get("request"))
        .and_then(Value::as_str)
        .filter(|name| !name.is_empty())
        .map(String::from)
        .ok_or_else(|| WorkflowServiceError::UnexpectedResponse(body.to_string()))
}

#[async_trait]
impl WorkflowService for ReqMgrClient {
    async fn submit(&self, job: &Value) -> Result<String> {
        debug!(url = %self.request_url(), "Submitting job descriptor");
        let response = self
            .client
            .post(self.request_url())
            .header("Accept", "application/json")
            .json(job)
            .send()
            .await?;

        let body: Value = check_status("submit", response).await?.json().await?;
        let name = workflow_name_from_response(&body)?;
        info!(workflow = %name, "Workflow submitted");
        Ok(name)
    }

    async fn approve(&self, workflow_name: &str) -> Result<()> {
        let response = self
            .client
            .put(format!("{}/{}", self.request_url(), workflow_name))
            .header("Accept", "application/json")
            .json(&json!({"RequestStatus": "assignment-approved"}))
            .send()
            .await?;

        check_status("approve", response).await?;
        info!(workflow = %workflow_name, "Workflow approved");
        Ok(())
    }
}

/// Tracker backed by the stats service.
pub struct StatsTracker {
    client: reqwest::Client,
    stats_url: String,
}

impl StatsTracker {
    /// Create a tracker for the stats service at `stats_url`.
    pub fn new(stats_url: impl Into<String>) -> Result<Self> {
        Ok(Self {
            client: build_client(None)?,
            stats_url: stats_url.into().trim_end_matches('/').to_string(),
        })
    }
}

#[async_trait]
impl WorkflowTracker for StatsTracker {
    async fn refresh_stats(&self, workflow_names: &[String]) -> Result<()> {
        for name in workflow_names {
            let response = self
                .client
                .get(format!("{}/update/{}", self.stats_url, name))
                .send()
                .await?;
            check_status("refresh", response).await?;
            debug!(workflow = %name, "Stats refresh requested");
        }
        Ok(())
    }

    async fn update_workflows(&self, run: &Run) -> Result<()> {
        let names: Vec<String> = run.workflows.iter().map(|w| w.name.clone()).collect();
        self.refresh_stats(&names).await
    }
}

/// Tracker used when no stats service is configured.
#[derive(Debug, Default)]
pub struct NoopTracker;

#[async_trait]
impl WorkflowTracker for NoopTracker {
    async fn refresh_stats(&self, workflow_names: &[String]) -> Result<()> {
        warn!(?workflow_names, "No stats service configured, skipping refresh");
        Ok(())
    }

    async fn update_workflows(&self, run: &Run) -> Result<()> {
        debug!(prepid = %run.prepid, "No stats service configured, skipping update");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_workflow_name_from_response() {
        let body = json!({"result": [{"request": "pdmvserv_RVCMSSW_13_0_0TTbar_14TeV__230101_120000_1234"}]});
        assert_eq!(
            workflow_name_from_response(&body).unwrap(),
            "pdmvserv_RVCMSSW_13_0_0TTbar_14TeV__230101_120000_1234"
        );
    }

    #[test]
    fn test_workflow_name_from_bad_response() {
        for body in [json!({}), json!({"result": []}), json!({"result": [{"request": ""}]})] {
            assert!(matches!(
                workflow_name_from_response(&body),
                Err(WorkflowServiceError::UnexpectedResponse(_))
            ));
        }
    }

    #[test]
    fn test_missing_credentials() {
        let dir = tempfile::tempdir().unwrap();
        let result = ReqMgrClient::new(
            "https://cmsweb.cern.ch",
            &dir.path().join("cert.pem"),
            &dir.path().join("key.pem"),
        );
        assert!(matches!(result, Err(WorkflowServiceError::Credentials(_))));
    }
}
