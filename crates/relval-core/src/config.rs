// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Configuration for relval-core.

use std::path::PathBuf;

/// Engine configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// Document store connection string
    pub database_url: String,
    /// Public URL of the RelVal service (used in notification links)
    pub service_url: String,
    /// Base URL of the workflow management service (ReqMgr2)
    pub cmsweb_url: String,
    /// Stats service endpoint for workflow status refresh, if any
    pub stats_url: Option<String>,
    /// Grid user certificate (PEM)
    pub grid_user_cert: PathBuf,
    /// Grid user key (PEM)
    pub grid_user_key: PathBuf,
    /// Host used for remote command execution, as `[user@]host[:port]`
    pub remote_host: String,
    /// SSH private key file; the SSH agent is used when unset
    pub ssh_credentials: Option<PathBuf>,
    /// Remote workspace root for per-run submission directories
    pub remote_path: String,
    /// Remote workspace root for batch expansion
    pub work_path: String,
    /// Local copy of the workflow generation tool
    pub matrix_script: PathBuf,
    /// Local copy of the config uploader helper
    pub uploader_script: PathBuf,
    /// Number of submission workers
    pub workers: usize,
    /// Maximum number of queued submissions
    pub queue_capacity: usize,
    /// Development instance: suppress irreversible side effects
    pub development: bool,
    /// Extra notification recipients
    pub notify_cc: Vec<String>,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        let database_url = std::env::var("RELVAL_DATABASE_URL")
            .unwrap_or_else(|_| "sqlite:.data/relval.db?mode=rwc".to_string());

        let service_url = std::env::var("RELVAL_SERVICE_URL")
            .unwrap_or_else(|_| "http://localhost:8005".to_string());

        let cmsweb_url = std::env::var("RELVAL_CMSWEB_URL")
            .unwrap_or_else(|_| "https://cmsweb.cern.ch".to_string());

        let stats_url = std::env::var("RELVAL_STATS_URL").ok();

        let grid_user_cert = std::env::var("RELVAL_GRID_USER_CERT")
            .map(PathBuf::from)
            .map_err(|_| ConfigError::MissingEnvVar("RELVAL_GRID_USER_CERT"))?;

        let grid_user_key = std::env::var("RELVAL_GRID_USER_KEY")
            .map(PathBuf::from)
            .map_err(|_| ConfigError::MissingEnvVar("RELVAL_GRID_USER_KEY"))?;

        let remote_host =
            std::env::var("RELVAL_REMOTE_HOST").unwrap_or_else(|_| "lxplus.cern.ch".to_string());

        let ssh_credentials = std::env::var("RELVAL_SSH_CREDENTIALS").ok().map(PathBuf::from);

        let remote_path = std::env::var("RELVAL_REMOTE_PATH")
            .unwrap_or_else(|_| "relval_submission".to_string());

        let work_path =
            std::env::var("RELVAL_WORK_PATH").unwrap_or_else(|_| "relval_work".to_string());

        let matrix_script = std::env::var("RELVAL_MATRIX_SCRIPT")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("scripts/runTheMatrixPdmV.py"));

        let uploader_script = std::env::var("RELVAL_UPLOADER_SCRIPT")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("scripts/config_uploader.py"));

        let workers = parse_env_number("RELVAL_WORKERS", 3)?;
        if workers == 0 {
            return Err(ConfigError::InvalidValue {
                var: "RELVAL_WORKERS",
                reason: "must be at least 1".to_string(),
            });
        }

        let queue_capacity = parse_env_number("RELVAL_QUEUE_CAPACITY", 256)?;

        let development = std::env::var("RELVAL_DEVELOPMENT")
            .map(|v| v.to_lowercase() == "true" || v == "1")
            .unwrap_or(false);

        let notify_cc = std::env::var("RELVAL_NOTIFY_CC")
            .map(|v| parse_list(&v))
            .unwrap_or_default();

        Ok(Self {
            database_url,
            service_url,
            cmsweb_url,
            stats_url,
            grid_user_cert,
            grid_user_key,
            remote_host,
            ssh_credentials,
            remote_path,
            work_path,
            matrix_script,
            uploader_script,
            workers,
            queue_capacity,
            development,
            notify_cc,
        })
    }

    /// Remote directory used for a single run submission.
    pub fn run_dir(&self, prepid: &str) -> String {
        format!("{}/{}", self.remote_path.trim_end_matches('/'), prepid)
    }

    /// Remote directory used for expanding a batch request.
    pub fn batch_dir(&self, prepid: &str) -> String {
        format!("{}/{}", self.work_path.trim_end_matches('/'), prepid)
    }
}

fn parse_env_number(var: &'static str, default: usize) -> Result<usize, ConfigError> {
    match std::env::var(var) {
        Ok(value) => value.parse().map_err(|e| ConfigError::InvalidValue {
            var,
            reason: format!("{}", e),
        }),
        Err(_) => Ok(default),
    }
}

fn parse_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect()
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// A required environment variable is missing.
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(&'static str),
    /// An environment variable has an unusable value.
    #[error("Invalid value for {var}: {reason}")]
    InvalidValue {
        /// Variable name.
        var: &'static str,
        /// Why the value was rejected.
        reason: String,
    },
}
