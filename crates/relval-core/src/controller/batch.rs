// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Batch request creation and deletion.

use tracing::info;

use crate::error::{Error, Result};
use crate::locker::{GENERATE_ID_KEY, Locker};
use crate::model::{BatchRequest, BatchStatus, Release, Sequence};
use crate::store::{Document, Store};

/// Create and delete batch requests.
#[derive(Clone)]
pub struct BatchController {
    store: Store,
    locker: Locker,
}

impl BatchController {
    /// Create a controller over the shared store and lock registry.
    pub fn new(store: Store, locker: Locker) -> Self {
        Self { store, locker }
    }

    /// Load a batch request.
    pub async fn get(&self, prepid: &str) -> Result<BatchRequest> {
        self.store
            .get::<BatchRequest>(prepid)
            .await?
            .ok_or_else(|| Error::NotFound {
                collection: BatchRequest::COLLECTION,
                id: prepid.to_string(),
            })
    }

    /// Load the release/profile a batch request refers to.
    pub async fn release(&self, batch: &BatchRequest) -> Result<Release> {
        self.store
            .get::<Release>(&batch.release)
            .await?
            .ok_or_else(|| Error::NotFound {
                collection: Release::COLLECTION,
                id: batch.release.clone(),
            })
    }

    /// Assign the next free id for `prefix`.
    ///
    /// Ids look like `{prefix}-00001`. All prefixes share one lock.
    async fn next_prepid(&self, prefix: &str) -> Result<String> {
        let _guard = self.locker.acquire(GENERATE_ID_KEY).await;
        let mut sequence = self
            .store
            .get::<Sequence>(prefix)
            .await?
            .unwrap_or_else(|| Sequence {
                prepid: prefix.to_string(),
                value: 0,
            });

        // Skip ids taken by documents created outside the sequence
        let prepid = loop {
            sequence.value += 1;
            let candidate = format!("{}-{:05}", prefix, sequence.value);
            if !self.store.exists::<BatchRequest>(&candidate).await? {
                break candidate;
            }
        };

        self.store.save(&sequence).await?;
        Ok(prepid)
    }

    /// Create a batch request with a freshly assigned id.
    pub async fn create(&self, mut batch: BatchRequest, user: &str) -> Result<BatchRequest> {
        let release = self.release(&batch).await?;
        batch.prepid = self.next_prepid(&release.id_prefix()).await?;
        batch.status = BatchStatus::New;
        batch.created_relvals.clear();
        let mut seen = Vec::with_capacity(batch.workflow_ids.len());
        batch.workflow_ids.retain(|id| {
            if seen.contains(id) {
                false
            } else {
                seen.push(*id);
                true
            }
        });
        batch.add_history("create", batch.prepid.clone(), user);

        let _guard = self.locker.acquire(&batch.prepid).await;
        self.store.save(&batch).await?;
        info!(prepid = %batch.prepid, workflows = batch.workflow_ids.len(), "Created batch request");
        Ok(batch)
    }

    /// Delete a batch request that has not created runs.
    pub async fn delete(&self, prepid: &str) -> Result<()> {
        let _guard = self.locker.acquire(prepid).await;
        let batch = self.get(prepid).await?;
        if !batch.created_relvals.is_empty() {
            return Err(Error::DeleteForbidden {
                prepid: batch.prepid,
                count: batch.created_relvals.len(),
            });
        }

        self.store.delete::<BatchRequest>(prepid).await?;
        info!(prepid, "Deleted batch request");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    async fn controller() -> BatchController {
        let store = Store::memory();
        store
            .save(&Release {
                prepid: "CMSSW_13_0_0__fullsim".to_string(),
                cmssw_release: "CMSSW_13_0_0".to_string(),
                batch_name: "fullsim".to_string(),
            })
            .await
            .unwrap();
        BatchController::new(store, Locker::new())
    }

    fn batch() -> BatchRequest {
        serde_json::from_value(json!({
            "release": "CMSSW_13_0_0__fullsim",
            "workflow_ids": [11634.0, 11634.0, 12434.0],
            "relval_set": "standard",
        }))
        .unwrap()
    }

    #[tokio::test]
    async fn test_ids_are_sequential() {
        let controller = controller().await;

        let first = controller.create(batch(), "jdoe").await.unwrap();
        let second = controller.create(batch(), "jdoe").await.unwrap();

        assert_eq!(first.prepid, "CMSSW_13_0_0__fullsim-00001");
        assert_eq!(second.prepid, "CMSSW_13_0_0__fullsim-00002");
        assert_eq!(first.workflow_ids, vec![11634.0, 12434.0]);
    }

    #[tokio::test]
    async fn test_non_adjacent_duplicate_ids_are_dropped() {
        let controller = controller().await;
        let mut request = batch();
        request.workflow_ids = vec![1.0, 11634.0, 1.0, 12434.0, 11634.0];

        let created = controller.create(request, "jdoe").await.unwrap();

        assert_eq!(created.workflow_ids, vec![1.0, 11634.0, 12434.0]);
        let stored = controller.get(&created.prepid).await.unwrap();
        assert_eq!(stored.workflow_ids, vec![1.0, 11634.0, 12434.0]);
    }

    #[tokio::test]
    async fn test_concurrent_creates_get_distinct_ids() {
        let controller = controller().await;

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let controller = controller.clone();
                tokio::spawn(async move { controller.create(batch(), "jdoe").await.unwrap().prepid })
            })
            .collect();

        let mut ids = Vec::new();
        for handle in handles {
            ids.push(handle.await.unwrap());
        }
        ids.sort();
        ids.dedup();
        assert_eq!(ids.len(), 8);
    }

    #[tokio::test]
    async fn test_unknown_release() {
        let controller = controller().await;
        let mut batch = batch();
        batch.release = "CMSSW_1_0_0__none".to_string();

        assert!(matches!(
            controller.create(batch, "jdoe").await,
            Err(Error::NotFound { collection: "releases", .. })
        ));
    }

    #[tokio::test]
    async fn test_delete_guard() {
        let controller = controller().await;
        let mut created = controller.create(batch(), "jdoe").await.unwrap();

        created.created_relvals = vec!["A".to_string(), "B".to_string()];
        controller.store.save(&created).await.unwrap();

        let err = controller.delete(&created.prepid).await.unwrap_err();
        assert!(matches!(err, Error::DeleteForbidden { count: 2, .. }));
        assert!(
            err.to_string()
                .starts_with("It is not allowed to delete tickets that have relvals created")
        );

        created.created_relvals.clear();
        controller.store.save(&created).await.unwrap();
        controller.delete(&created.prepid).await.unwrap();
    }
}
