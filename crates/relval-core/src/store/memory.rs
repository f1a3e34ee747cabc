// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! In-memory document store.

use std::collections::HashMap;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::Mutex;

use super::{DocumentStore, Result};

/// Document store backed by a map. Contents are lost on drop.
#[derive(Default)]
pub struct MemoryStore {
    documents: Mutex<HashMap<(String, String), Value>>,
}

impl MemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of documents in a collection.
    pub async fn count(&self, collection: &str) -> usize {
        self.documents
            .lock()
            .await
            .keys()
            .filter(|(c, _)| c == collection)
            .count()
    }
}

#[async_trait]
impl DocumentStore for MemoryStore {
    async fn get(&self, collection: &str, id: &str) -> Result<Option<Value>> {
        let documents = self.documents.lock().await;
        Ok(documents
            .get(&(collection.to_string(), id.to_string()))
            .cloned())
    }

    async fn save(&self, collection: &str, id: &str, document: &Value) -> Result<()> {
        let mut documents = self.documents.lock().await;
        documents.insert((collection.to_string(), id.to_string()), document.clone());
        Ok(())
    }

    async fn delete(&self, collection: &str, id: &str) -> Result<bool> {
        let mut documents = self.documents.lock().await;
        Ok(documents
            .remove(&(collection.to_string(), id.to_string()))
            .is_some())
    }
}
