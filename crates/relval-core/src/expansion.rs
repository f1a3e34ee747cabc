// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Batch expansion.
//!
//! A batch request names work-item ids; the generation tool on the build host
//! turns them into a manifest of step lists, and every manifest entry becomes
//! a run. Expansion is all-or-nothing:
//!
//! ```text
//! lock(batch) ─► prepare workspace ─► generate manifest ─► download + parse
//!                                                               │
//!       ┌───────────────────────────────────────────────────────┘
//!       ▼
//! create run 1..n ─► batch.created_relvals = [..], status done ─► save
//!       │ error
//!       ▼
//! delete created runs n..1, batch untouched, original error returned
//! ```

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use rand::Rng;
use serde::Deserialize;
use serde_json::{Map, Value};
use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::controller::{BatchController, RunController};
use crate::error::{Error, Result};
use crate::locker::Locker;
use crate::model::{
    BatchRequest, BatchStatus, Release, Run, RunStatus, Step, format_workflow_id,
};
use crate::remote::{RemoteConnector, RemoteSession};
use crate::step_config::environment_setup;
use crate::store::Store;

/// File name of the generation tool on the build host.
pub const MATRIX_SCRIPT: &str = "runTheMatrixPdmV.py";

/// One step as listed by the generation tool.
#[derive(Debug, Clone, Deserialize)]
pub struct ManifestStep {
    /// Step name.
    pub name: String,
    /// Build arguments.
    #[serde(default)]
    pub arguments: Map<String, Value>,
    /// Input file provenance.
    #[serde(default)]
    pub input: Map<String, Value>,
}

/// Steps generated for one work-item id.
#[derive(Debug, Clone, Deserialize)]
pub struct ManifestEntry {
    /// Ordered steps.
    pub steps: Vec<ManifestStep>,
}

/// Parse a generation manifest: `{"<workflow id>": {"steps": [...]}}`.
///
/// Entries come back ordered by numeric work-item id.
pub fn parse_manifest(file: &str, content: &str) -> Result<Vec<(String, f64, ManifestEntry)>> {
    let raw: BTreeMap<String, ManifestEntry> =
        serde_json::from_str(content).map_err(|e| Error::Manifest {
            file: file.to_string(),
            reason: e.to_string(),
        })?;

    let mut entries = raw
        .into_iter()
        .map(|(key, entry)| {
            let id = key.parse::<f64>().map_err(|_| Error::Manifest {
                file: file.to_string(),
                reason: format!("work-item id {:?} is not a number", key),
            })?;
            Ok((key, id, entry))
        })
        .collect::<Result<Vec<_>>>()?;

    entries.sort_by(|a, b| a.1.total_cmp(&b.1));
    Ok(entries)
}

/// Id of the run generated for `workflow_key` in batch `batch_prepid`.
pub fn run_prepid(batch_prepid: &str, workflow_key: &str) -> String {
    format!("{}_{}", batch_prepid, workflow_key).replace('.', "_")
}

/// Random manifest name so concurrent expansions never share a file.
pub fn manifest_name(batch_prepid: &str) -> String {
    let suffix: u32 = rand::rng().random_range(1000..=9999);
    format!("{}_{}.json", batch_prepid, suffix)
}

/// Expands batch requests into runs.
pub struct BatchExpander {
    config: Arc<Config>,
    locker: Locker,
    connector: Arc<dyn RemoteConnector>,
    store: Store,
    batches: BatchController,
    runs: RunController,
    scratch_dir: PathBuf,
}

impl BatchExpander {
    /// Create an expander.
    pub fn new(
        config: Arc<Config>,
        store: Store,
        locker: Locker,
        connector: Arc<dyn RemoteConnector>,
    ) -> Self {
        Self {
            config,
            batches: BatchController::new(store.clone(), locker.clone()),
            runs: RunController::new(store.clone(), locker.clone()),
            store,
            locker,
            connector,
            scratch_dir: std::env::temp_dir(),
        }
    }

    /// Directory manifests are downloaded to.
    ///
    /// Default: the system temp directory
    pub fn with_scratch_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.scratch_dir = dir.into();
        self
    }

    /// Create runs for a batch request and return their ids in creation order.
    pub async fn expand(&self, prepid: &str, user: &str) -> Result<Vec<String>> {
        let _guard = self.locker.acquire(prepid).await;
        let batch = self.batches.get(prepid).await?;
        if batch.status != BatchStatus::New {
            return Err(Error::InvalidStatus {
                prepid: batch.prepid,
                status: batch.status.to_string(),
                action: "create relvals for",
            });
        }
        let release = self.batches.release(&batch).await?;

        let ids = batch
            .workflow_ids
            .iter()
            .map(|id| format_workflow_id(*id))
            .collect::<Vec<_>>()
            .join(",");
        info!(prepid, workflow_ids = %ids, "Creating runs for batch request");

        let file_name = manifest_name(prepid);
        let local_path = self.scratch_dir.join(&file_name);

        let session = self.connector.connect().await?;
        let generated = self
            .generate_manifest(session.as_ref(), &batch, &release, &ids, &file_name, &local_path)
            .await;
        if let Err(e) = session.close().await {
            warn!(prepid, error = %e, "Failed to close remote session");
        }

        let manifest = generated.and_then(|content| parse_manifest(&file_name, &content));
        if let Err(e) = tokio::fs::remove_file(&local_path).await {
            debug!(path = %local_path.display(), error = %e, "Manifest not removed");
        }

        let mut created = Vec::new();
        match self
            .create_runs(batch, &release, manifest?, user, &mut created)
            .await
        {
            Ok(()) => {
                info!(prepid, count = created.len(), "Batch request expanded");
                Ok(created)
            }
            Err(e) => {
                error!(prepid, error = %e, created = created.len(), "Expansion failed, removing created runs");
                self.compensate(&created).await;
                Err(e)
            }
        }
    }

    /// Prepare the remote workspace, run the generation tool and fetch its manifest.
    async fn generate_manifest(
        &self,
        session: &dyn RemoteSession,
        batch: &BatchRequest,
        release: &Release,
        workflow_ids: &str,
        file_name: &str,
        local_path: &Path,
    ) -> Result<String> {
        let batch_dir = self.config.batch_dir(&batch.prepid);

        let output = session
            .execute(&[
                format!("rm -rf {}", batch_dir),
                format!("mkdir -p {}", batch_dir),
            ])
            .await?;
        if !output.success() {
            error!(
                prepid = %batch.prepid,
                exit_code = output.exit_code,
                stderr = %output.stderr,
                stdout = %output.stdout,
                "Preparing workspace failed"
            );
            return Err(Error::WorkspacePreparation {
                exit_code: output.exit_code,
                stderr: output.stderr,
            });
        }

        session
            .upload_file(
                &self.config.matrix_script,
                &format!("{}/{}", batch_dir, MATRIX_SCRIPT),
            )
            .await?;

        let mut commands = vec![format!("cd {}", self.config.work_path)];
        commands.extend(environment_setup(&release.cmssw_release));
        commands.push(format!("cd {}", batch.prepid));
        commands.push(format!(
            "python {} -l {} -w {} -o {}",
            MATRIX_SCRIPT, workflow_ids, batch.parameters.relval_set, file_name
        ));

        let output = session.execute(&commands).await?;
        if !output.success() {
            error!(
                prepid = %batch.prepid,
                exit_code = output.exit_code,
                stderr = %output.stderr,
                stdout = %output.stdout,
                "Generating runs failed"
            );
            return Err(Error::Generation {
                target: "RelVals".to_string(),
                exit_code: output.exit_code,
                stderr: output.stderr,
            });
        }

        session
            .download_file(&format!("{}/{}", batch_dir, file_name), local_path)
            .await?;
        Ok(tokio::fs::read_to_string(local_path).await?)
    }

    /// Create one run per manifest entry, then mark the batch done.
    ///
    /// Ids of created runs are pushed to `created` as they are saved so the
    /// caller can compensate after a failure.
    async fn create_runs(
        &self,
        mut batch: BatchRequest,
        release: &Release,
        manifest: Vec<(String, f64, ManifestEntry)>,
        user: &str,
        created: &mut Vec<String>,
    ) -> Result<()> {
        for (key, workflow_id, entry) in manifest {
            let run = Run {
                prepid: run_prepid(&batch.prepid, &key),
                workflow_id,
                cmssw_release: release.cmssw_release.clone(),
                batch_name: release.batch_name.clone(),
                parameters: batch.parameters.clone(),
                steps: entry
                    .steps
                    .into_iter()
                    .map(|s| Step::new(s.name, s.arguments, s.input))
                    .collect(),
                status: RunStatus::New,
                workflows: Vec::new(),
                campaign_timestamp: 0,
                notes: String::new(),
                history: Vec::new(),
            };

            let run = self.runs.create(run, user).await?;
            created.push(run.prepid);
        }

        batch.created_relvals = created.clone();
        batch.status = BatchStatus::Done;
        batch.add_history("created_relvals", created.clone(), user);
        self.store.save(&batch).await?;
        Ok(())
    }

    /// Delete runs in reverse creation order. Failures are logged, not returned.
    async fn compensate(&self, created: &[String]) {
        for prepid in created.iter().rev() {
            match self.runs.delete(prepid).await {
                Ok(()) => debug!(prepid = %prepid, "Compensated run"),
                Err(e) => error!(prepid = %prepid, error = %e, "Failed to delete run during compensation"),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_prepid_replaces_dots() {
        assert_eq!(
            run_prepid("CMSSW_13_0_0__fullsim-00001", "11634.911"),
            "CMSSW_13_0_0__fullsim-00001_11634_911"
        );
    }

    #[test]
    fn test_manifest_name_shape() {
        let name = manifest_name("T-00001");
        let suffix: u32 = name
            .trim_start_matches("T-00001_")
            .trim_end_matches(".json")
            .parse()
            .unwrap();
        assert!((1000..=9999).contains(&suffix));
    }

    #[test]
    fn test_parse_manifest_orders_numerically() {
        let content = r#"{
            "12434.0": {"steps": [{"name": "GenSim"}]},
            "1.0": {"steps": [{"name": "Input", "input": {"dataset": "/A/B/RAW"}}, {"name": "Reco", "arguments": {"--step": "RECO"}}]},
            "11634.0": {"steps": []}
        }"#;

        let entries = parse_manifest("m.json", content).unwrap();
        let keys: Vec<&str> = entries.iter().map(|(k, _, _)| k.as_str()).collect();
        assert_eq!(keys, vec!["1.0", "11634.0", "12434.0"]);
        assert_eq!(entries[0].2.steps.len(), 2);
        assert!(entries[0].2.steps[1].arguments.contains_key("--step"));
    }

    #[test]
    fn test_parse_manifest_errors() {
        assert!(matches!(
            parse_manifest("m.json", "not json"),
            Err(Error::Manifest { .. })
        ));
        assert!(matches!(
            parse_manifest("m.json", r#"{"abc": {"steps": []}}"#),
            Err(Error::Manifest { .. })
        ));
        assert!(matches!(
            parse_manifest("m.json", r#"{"1.0": {"no_steps": []}}"#),
            Err(Error::Manifest { .. })
        ));
    }
}
