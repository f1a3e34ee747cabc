// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Run lifecycle operations outside of submission itself.

use tracing::{info, warn};

use crate::error::{Error, Result};
use crate::locker::Locker;
use crate::model::{Run, RunStatus};
use crate::store::{Document, Store};

/// Create, delete and queue runs.
///
/// Every mutation happens under the run's lock.
#[derive(Clone)]
pub struct RunController {
    store: Store,
    locker: Locker,
}

impl RunController {
    /// Create a controller over the shared store and lock registry.
    pub fn new(store: Store, locker: Locker) -> Self {
        Self { store, locker }
    }

    /// Load a run.
    pub async fn get(&self, prepid: &str) -> Result<Run> {
        self.store
            .get::<Run>(prepid)
            .await?
            .ok_or_else(|| Error::NotFound {
                collection: Run::COLLECTION,
                id: prepid.to_string(),
            })
    }

    /// Persist a new run. Fails if the id is taken.
    pub async fn create(&self, mut run: Run, user: &str) -> Result<Run> {
        let _guard = self.locker.acquire(&run.prepid).await;
        if self.store.exists::<Run>(&run.prepid).await? {
            return Err(Error::AlreadyExists {
                collection: Run::COLLECTION,
                id: run.prepid,
            });
        }

        run.status = RunStatus::New;
        run.add_history("create", run.prepid.clone(), user);
        self.store.save(&run).await?;
        info!(prepid = %run.prepid, "Created run");
        Ok(run)
    }

    /// Delete a run that has not been submitted.
    pub async fn delete(&self, prepid: &str) -> Result<()> {
        let _guard = self.locker.acquire(prepid).await;
        let run = self.get(prepid).await?;
        if run.status != RunStatus::New {
            return Err(Error::InvalidStatus {
                prepid: run.prepid,
                status: run.status.to_string(),
                action: "delete",
            });
        }

        self.store.delete::<Run>(prepid).await?;
        info!(prepid, "Deleted run");
        Ok(())
    }

    /// Move a run from `new` to `submitting` ahead of queueing it.
    pub async fn prepare_submission(&self, prepid: &str, user: &str) -> Result<Run> {
        let _guard = self.locker.acquire(prepid).await;
        let mut run = self.get(prepid).await?;
        if run.status != RunStatus::New {
            return Err(Error::InvalidStatus {
                prepid: run.prepid,
                status: run.status.to_string(),
                action: "submit",
            });
        }

        run.status = RunStatus::Submitting;
        run.add_history("status", RunStatus::Submitting.as_str(), user);
        self.store.save(&run).await?;
        info!(prepid, "Run marked for submission");
        Ok(run)
    }

    /// Undo [`prepare_submission`](Self::prepare_submission) when the run
    /// could not be queued.
    pub async fn revert_submission(&self, prepid: &str) -> Result<()> {
        let _guard = self.locker.acquire(prepid).await;
        let mut run = self.get(prepid).await?;
        if run.status != RunStatus::Submitting {
            warn!(prepid, status = %run.status, "Not reverting, run is not submitting");
            return Ok(());
        }

        run.status = RunStatus::New;
        run.add_history("status", RunStatus::New.as_str(), crate::model::AUTOMATIC_USER);
        self.store.save(&run).await?;
        Ok(())
    }
}
