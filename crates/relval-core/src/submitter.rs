// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Run submission.
//!
//! One queued run id is processed by one worker, start to finish, under the
//! run's lock:
//!
//! ```text
//! submitting ─► workspace ─► generate configs ─► upload configs ─► hashes
//!     ─► job descriptor ─► submit ─► submitted (saved) ─► approve ─► stats refresh
//! ```
//!
//! Any failure up to and including approval resets the run to `new`, clears
//! what the attempt resolved and notifies the owners. Failures never leave
//! the worker; they are reported through the run history and notifications.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::error::{Error, Result};
use crate::job_dict::{build_job_dict, resolve_globaltags};
use crate::locker::Locker;
use crate::model::{AUTOMATIC_USER, Run, RunStatus, WorkflowDescriptor};
use crate::notifier::{MessageBuilder, Notifier};
use crate::reconcile::{ConfigHash, assign_config_hashes, parse_upload_output};
use crate::remote::{RemoteConnector, RemoteSession};
use crate::step_config::{
    GENERATE_SCRIPT, UPLOAD_SCRIPT, UPLOADER_HELPER, generate_script, upload_script,
};
use crate::store::{Document, Store};
use crate::worker_queue::TaskHandler;
use crate::workflow_service::{WorkflowService, WorkflowTracker};

/// Drives queued runs through submission.
pub struct Submitter {
    config: Arc<Config>,
    store: Store,
    locker: Locker,
    connector: Arc<dyn RemoteConnector>,
    service: Arc<dyn WorkflowService>,
    tracker: Arc<dyn WorkflowTracker>,
    notifier: Arc<dyn Notifier>,
    messages: MessageBuilder,
    approval_pause: Duration,
}

impl Submitter {
    /// Create a submitter from its collaborators.
    pub fn new(
        config: Arc<Config>,
        store: Store,
        locker: Locker,
        connector: Arc<dyn RemoteConnector>,
        service: Arc<dyn WorkflowService>,
        tracker: Arc<dyn WorkflowTracker>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self {
            messages: MessageBuilder::new(&config),
            config,
            store,
            locker,
            connector,
            service,
            tracker,
            notifier,
            approval_pause: Duration::from_secs(3),
        }
    }

    /// Pause between submitting a workflow and approving it.
    ///
    /// Default: 3 seconds
    pub fn with_approval_pause(mut self, pause: Duration) -> Self {
        self.approval_pause = pause;
        self
    }

    /// Submit a run that was marked `submitting`.
    ///
    /// Never fails: errors reset the run and notify its owners.
    pub async fn submit(&self, prepid: &str) {
        debug!(prepid, "Will try to acquire lock");
        let submitted = {
            let _guard = self.locker.acquire(prepid).await;
            info!(prepid, "Locked for submission");

            let mut run = match self.load_for_submission(prepid).await {
                Ok(run) => run,
                Err(e) => {
                    error!(prepid, error = %e, "Run cannot be submitted");
                    return;
                }
            };

            match self.process(&mut run).await {
                Ok(()) => {
                    self.handle_success(&run).await;
                    run
                }
                Err(e) => {
                    self.handle_error(&mut run, &e).await;
                    return;
                }
            }
        };

        if !self.config.development
            && let Err(e) = self.tracker.update_workflows(&submitted).await
        {
            warn!(prepid, error = %e, "Failed to update workflows");
        }

        info!(prepid, "Successfully finished submission");
    }

    /// Reload the run and check it is still ours to submit.
    async fn load_for_submission(&self, prepid: &str) -> Result<Run> {
        let run = self
            .store
            .get::<Run>(prepid)
            .await?
            .ok_or_else(|| Error::NotFound {
                collection: Run::COLLECTION,
                id: prepid.to_string(),
            })?;

        if run.status != RunStatus::Submitting {
            return Err(Error::InvalidStatus {
                prepid: run.prepid,
                status: run.status.to_string(),
                action: "submit",
            });
        }
        Ok(run)
    }

    async fn process(&self, run: &mut Run) -> Result<()> {
        let run_dir = self.config.run_dir(&run.prepid);

        let session = self.connector.connect().await?;
        let uploaded = self.build_configs(session.as_ref(), run, &run_dir).await;
        if uploaded.is_ok()
            && let Err(e) = session.execute(&[format!("rm -rf {}", run_dir)]).await
        {
            warn!(prepid = %run.prepid, error = %e, "Failed to remove remote directory");
        }
        if let Err(e) = session.close().await {
            warn!(prepid = %run.prepid, error = %e, "Failed to close remote session");
        }

        let hashes = uploaded?;
        debug!(prepid = %run.prepid, hashes = hashes.len(), "Configs uploaded");
        assign_config_hashes(&mut run.steps, hashes)?;

        resolve_globaltags(run);
        run.campaign_timestamp = Utc::now().timestamp();
        let job = build_job_dict(run);
        let workflow_name = self.service.submit(&job).await?;

        run.workflows = vec![WorkflowDescriptor {
            name: workflow_name.clone(),
        }];
        run.status = RunStatus::Submitted;
        run.add_history("submission", "succeeded", AUTOMATIC_USER);
        self.store.save(&*run).await?;

        tokio::time::sleep(self.approval_pause).await;
        self.service.approve(&workflow_name).await?;

        if !self.config.development
            && let Err(e) = self.tracker.refresh_stats(&[workflow_name]).await
        {
            warn!(prepid = %run.prepid, error = %e, "Failed to refresh stats");
        }

        Ok(())
    }

    /// Prepare the remote workspace, generate configs and upload them.
    async fn build_configs(
        &self,
        session: &dyn RemoteSession,
        run: &Run,
        run_dir: &str,
    ) -> Result<Vec<ConfigHash>> {
        let prepid = &run.prepid;
        info!(prepid = %prepid, "Preparing workspace");

        let output = session
            .execute(&[
                format!("rm -rf {}", run_dir),
                format!("mkdir -p {}", run_dir),
                format!("cd {}", run_dir),
                "voms-proxy-init -voms cms --valid 4:00 --out $(pwd)/proxy.txt".to_string(),
            ])
            .await?;
        if !output.success() {
            return Err(Error::WorkspacePreparation {
                exit_code: output.exit_code,
                stderr: output.stderr,
            });
        }

        session
            .upload_content(&generate_script(run), &format!("{}/{}", run_dir, GENERATE_SCRIPT))
            .await?;
        session
            .upload_content(
                &upload_script(run, &self.config.cmsweb_url),
                &format!("{}/{}", run_dir, UPLOAD_SCRIPT),
            )
            .await?;
        session
            .upload_file(
                &self.config.uploader_script,
                &format!("{}/{}", run_dir, UPLOADER_HELPER),
            )
            .await?;

        let output = session.execute(&run_script(run_dir, GENERATE_SCRIPT)).await?;
        debug!(prepid = %prepid, exit_code = output.exit_code, "Config generation finished");
        if !output.success() {
            return Err(Error::Generation {
                target: format!("configs for {}", prepid),
                exit_code: output.exit_code,
                stderr: output.stderr,
            });
        }

        let output = session.execute(&run_script(run_dir, UPLOAD_SCRIPT)).await?;
        debug!(prepid = %prepid, exit_code = output.exit_code, "Config upload finished");
        if !output.success() {
            return Err(Error::Upload {
                prepid: prepid.clone(),
                exit_code: output.exit_code,
                stderr: output.stderr,
            });
        }

        Ok(parse_upload_output(&output.stdout))
    }

    async fn handle_success(&self, run: &Run) {
        info!(prepid = %run.prepid, workflow = ?run.last_workflow(), "Submission succeeded");
        let message = self.messages.success(run);
        self.notifier
            .send(&message.subject, &message.body, &message.recipients)
            .await;
    }

    async fn handle_error(&self, run: &mut Run, error: &Error) {
        error!(prepid = %run.prepid, error = %error, "Submission failed");

        run.reset_submission();
        run.add_history("submission", "failed", AUTOMATIC_USER);
        if let Err(e) = self.store.save(&*run).await {
            error!(prepid = %run.prepid, error = %e, "Failed to save reset run");
        }

        let message = self.messages.failure(run, &error.to_string());
        self.notifier
            .send(&message.subject, &message.body, &message.recipients)
            .await;
    }
}

/// Commands that run one of the uploaded scripts inside the run directory.
fn run_script(run_dir: &str, script: &str) -> Vec<String> {
    vec![
        format!("cd {}", run_dir),
        format!("chmod +x {}", script),
        "export X509_USER_PROXY=$(pwd)/proxy.txt".to_string(),
        format!("./{}", script),
    ]
}

#[async_trait]
impl TaskHandler<String> for Submitter {
    async fn handle(&self, prepid: String) {
        self.submit(&prepid).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_script() {
        assert_eq!(
            run_script("relval_submission/R_1", GENERATE_SCRIPT),
            vec![
                "cd relval_submission/R_1",
                "chmod +x config_generate.sh",
                "export X509_USER_PROXY=$(pwd)/proxy.txt",
                "./config_generate.sh",
            ]
        );
    }
}
