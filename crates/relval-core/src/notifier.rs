// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Submission notifications.
//!
//! The engine only decides *when* to notify and what the message says;
//! delivery is behind the [`Notifier`] trait.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::info;

use crate::config::Config;
use crate::model::Run;

/// Delivers messages to users.
#[async_trait]
pub trait Notifier: Send + Sync {
    /// Send a message. Delivery failures are the notifier's concern.
    async fn send(&self, subject: &str, body: &str, recipients: &[String]);
}

/// A composed notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    /// Subject line.
    pub subject: String,
    /// Plain-text body.
    pub body: String,
    /// Addressees.
    pub recipients: Vec<String>,
}

/// Builds submission messages from the service configuration.
#[derive(Debug, Clone)]
pub struct MessageBuilder {
    service_url: String,
    cmsweb_url: String,
    development: bool,
    cc: Vec<String>,
}

impl MessageBuilder {
    /// Create a builder using the links and recipients from `config`.
    pub fn new(config: &Config) -> Self {
        Self {
            service_url: config.service_url.trim_end_matches('/').to_string(),
            cmsweb_url: config.cmsweb_url.trim_end_matches('/').to_string(),
            development: config.development,
            cc: config.notify_cc.clone(),
        }
    }

    /// Run owners followed by the configured CC list, without duplicates.
    pub fn recipients(&self, run: &Run) -> Vec<String> {
        let mut recipients = run.owners();
        for cc in &self.cc {
            if !recipients.contains(cc) {
                recipients.push(cc.clone());
            }
        }
        recipients
    }

    fn run_link(&self, prepid: &str) -> String {
        format!(
            "You can find this relval at {}/relvals?prepid={}\n",
            self.service_url, prepid
        )
    }

    /// Message for a run that was submitted and approved.
    pub fn success(&self, run: &Run) -> Message {
        let prepid = &run.prepid;
        let mut body = format!("Hello,\n\nSubmission of {} succeeded.\n", prepid);
        body.push_str(&self.run_link(prepid));
        if let Some(workflow) = run.last_workflow() {
            body.push_str(&format!(
                "Workflow in ReqMgr2 {}/reqmgr2/fetch?rid={}",
                self.cmsweb_url, workflow
            ));
        }
        if self.development {
            body.push_str(
                "\nNOTE: This was submitted from a development instance of RelVal machine \
                 and this job will never start running in computing!\n",
            );
        }

        Message {
            subject: format!("RelVal {} submission succeeded", prepid),
            body,
            recipients: self.recipients(run),
        }
    }

    /// Message for a run whose submission failed with `error`.
    pub fn failure(&self, run: &Run, error: &str) -> Message {
        let prepid = &run.prepid;
        let mut body = format!(
            "Hello,\n\nUnfortunately submission of {} failed.\n",
            prepid
        );
        body.push_str(&self.run_link(prepid));
        body.push_str(&format!("Error message:\n\n{}", error));

        Message {
            subject: format!("RelVal {} submission failed", prepid),
            body,
            recipients: self.recipients(run),
        }
    }
}

/// Notifier that writes messages to the log.
#[derive(Debug, Default)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn send(&self, subject: &str, body: &str, recipients: &[String]) {
        info!(subject, ?recipients, body, "Notification");
    }
}

/// Notifier that keeps every message in memory.
#[derive(Debug, Clone, Default)]
pub struct RecordingNotifier {
    sent: Arc<Mutex<Vec<Message>>>,
}

impl RecordingNotifier {
    /// Create an empty recorder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Messages sent so far.
    pub async fn messages(&self) -> Vec<Message> {
        self.sent.lock().await.clone()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn send(&self, subject: &str, body: &str, recipients: &[String]) {
        self.sent.lock().await.push(Message {
            subject: subject.to_string(),
            body: body.to_string(),
            recipients: recipients.to_vec(),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{AUTOMATIC_USER, WorkflowDescriptor};
    use serde_json::json;
    use std::path::PathBuf;

    fn config(development: bool) -> Config {
        Config {
            database_url: String::new(),
            service_url: "https://cms-pdmv.cern.ch/relval/".to_string(),
            cmsweb_url: "https://cmsweb.cern.ch".to_string(),
            stats_url: None,
            grid_user_cert: PathBuf::new(),
            grid_user_key: PathBuf::new(),
            remote_host: String::new(),
            ssh_credentials: None,
            remote_path: String::new(),
            work_path: String::new(),
            matrix_script: PathBuf::new(),
            uploader_script: PathBuf::new(),
            workers: 1,
            queue_capacity: 1,
            development,
            notify_cc: vec!["pdmv@cern.ch".to_string(), "jdoe".to_string()],
        }
    }

    fn run() -> Run {
        let mut run: Run = serde_json::from_value(json!({
            "prepid": "CMSSW_13_0_0__fullsim-00001_1_0",
            "workflow_id": 1.0,
            "cmssw_release": "CMSSW_13_0_0",
        }))
        .unwrap();
        run.add_history("create", "", "jdoe");
        run.add_history("submission", "failed", AUTOMATIC_USER);
        run
    }

    #[test]
    fn test_recipients_merge_owners_and_cc() {
        let builder = MessageBuilder::new(&config(false));
        assert_eq!(builder.recipients(&run()), vec!["jdoe", "pdmv@cern.ch"]);
    }

    #[test]
    fn test_success_message() {
        let mut run = run();
        run.workflows.push(WorkflowDescriptor {
            name: "pdmvserv_RVCMSSW_13_0_0_1".to_string(),
        });

        let message = MessageBuilder::new(&config(false)).success(&run);

        assert_eq!(
            message.subject,
            "RelVal CMSSW_13_0_0__fullsim-00001_1_0 submission succeeded"
        );
        assert!(message.body.contains(
            "https://cms-pdmv.cern.ch/relval/relvals?prepid=CMSSW_13_0_0__fullsim-00001_1_0"
        ));
        assert!(message
            .body
            .contains("https://cmsweb.cern.ch/reqmgr2/fetch?rid=pdmvserv_RVCMSSW_13_0_0_1"));
        assert!(!message.body.contains("development instance"));
    }

    #[test]
    fn test_success_message_in_development() {
        let message = MessageBuilder::new(&config(true)).success(&run());
        assert!(message.body.contains("development instance"));
    }

    #[test]
    fn test_failure_message_carries_error() {
        let message = MessageBuilder::new(&config(false)).failure(&run(), "Could not find hash for Digi");
        assert_eq!(
            message.subject,
            "RelVal CMSSW_13_0_0__fullsim-00001_1_0 submission failed"
        );
        assert!(message.body.ends_with("Error message:\n\nCould not find hash for Digi"));
    }

    #[tokio::test]
    async fn test_recording_notifier() {
        let notifier = RecordingNotifier::new();
        notifier.send("s", "b", &["a".to_string()]).await;
        let messages = notifier.messages().await;
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].recipients, vec!["a"]);
    }
}
