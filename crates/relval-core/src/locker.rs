// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Keyed lock manager.
//!
//! Every entity mutation (batch expansion, run submission, id assignment)
//! happens while holding the lock for that entity's id. Locks are created on
//! first use and kept for the lifetime of the registry, which is fine for the
//! bounded set of long-lived prepids the engine deals with.
//!
//! Locks are not re-entrant: acquiring a key that the current task already
//! holds never completes.

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::debug;

/// Key used to serialize identifier assignment across all prefixes.
pub const GENERATE_ID_KEY: &str = "generate-id";

/// Process-wide registry of per-key mutexes.
///
/// Cloning is cheap and all clones share the same registry.
#[derive(Clone, Default)]
pub struct Locker {
    locks: Arc<DashMap<String, Arc<Mutex<()>>>>,
}

impl Locker {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Acquire the lock for `key`, waiting while another holder has it.
    ///
    /// The lock is released when the returned guard is dropped.
    pub async fn acquire(&self, key: &str) -> LockGuard {
        let mutex = self
            .locks
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();

        debug!(key, "Waiting for lock");
        let guard = mutex.lock_owned().await;
        debug!(key, "Lock acquired");

        LockGuard {
            key: key.to_string(),
            _guard: guard,
        }
    }

    /// Number of keys that have been locked at least once.
    pub fn len(&self) -> usize {
        self.locks.len()
    }

    /// Whether no key has been locked yet.
    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }
}

/// Scoped ownership of one key.
pub struct LockGuard {
    key: String,
    _guard: OwnedMutexGuard<()>,
}

impl LockGuard {
    /// Key this guard holds.
    pub fn key(&self) -> &str {
        &self.key
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        debug!(key = %self.key, "Lock released");
    }
}
