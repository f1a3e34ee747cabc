// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Document store.
//!
//! The engine needs nothing from persistence beyond get/save/delete of whole
//! JSON documents keyed by prepid. Backends implement [`DocumentStore`] on raw
//! JSON; [`Store`] adds typed access for the entity types.

pub mod memory;
pub mod sqlite;

pub use self::memory::MemoryStore;
pub use self::sqlite::SqliteStore;

use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use thiserror::Error;

use crate::model::{BatchRequest, Release, Run, Sequence};

/// Errors from store backends.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum StoreError {
    /// Backend query failed.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Migrations could not be applied.
    #[error("Migration error: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),

    /// Stored body is not valid for the requested type.
    #[error("Invalid document {collection}/{id}: {source}")]
    InvalidDocument {
        /// Collection name.
        collection: String,
        /// Document id.
        id: String,
        /// Decode failure.
        source: serde_json::Error,
    },

    /// Backend-specific failure.
    #[error("{0}")]
    Other(String),
}

/// Result type for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;

/// Raw document persistence, full-document overwrite semantics.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Fetch a document.
    async fn get(&self, collection: &str, id: &str) -> Result<Option<Value>>;

    /// Insert or overwrite a document.
    async fn save(&self, collection: &str, id: &str, document: &Value) -> Result<()>;

    /// Remove a document. Returns whether it existed.
    async fn delete(&self, collection: &str, id: &str) -> Result<bool>;
}

/// Entity types that live in a collection.
pub trait Document: Serialize + DeserializeOwned + Send + Sync {
    /// Collection name.
    const COLLECTION: &'static str;

    /// Document key.
    fn prepid(&self) -> &str;
}

impl Document for BatchRequest {
    const COLLECTION: &'static str = "tickets";

    fn prepid(&self) -> &str {
        &self.prepid
    }
}

impl Document for Run {
    const COLLECTION: &'static str = "relvals";

    fn prepid(&self) -> &str {
        &self.prepid
    }
}

impl Document for Release {
    const COLLECTION: &'static str = "releases";

    fn prepid(&self) -> &str {
        &self.prepid
    }
}

impl Document for Sequence {
    const COLLECTION: &'static str = "settings";

    fn prepid(&self) -> &str {
        &self.prepid
    }
}

/// Typed access to a shared [`DocumentStore`].
#[derive(Clone)]
pub struct Store {
    backend: Arc<dyn DocumentStore>,
}

impl Store {
    /// Wrap a backend.
    pub fn new(backend: Arc<dyn DocumentStore>) -> Self {
        Self { backend }
    }

    /// In-memory store, mostly for tests and dry runs.
    pub fn memory() -> Self {
        Self::new(Arc::new(MemoryStore::new()))
    }

    /// Fetch and decode a document.
    pub async fn get<T: Document>(&self, id: &str) -> Result<Option<T>> {
        match self.backend.get(T::COLLECTION, id).await? {
            Some(value) => serde_json::from_value(value)
                .map(Some)
                .map_err(|source| StoreError::InvalidDocument {
                    collection: T::COLLECTION.to_string(),
                    id: id.to_string(),
                    source,
                }),
            None => Ok(None),
        }
    }

    /// Whether a document exists.
    pub async fn exists<T: Document>(&self, id: &str) -> Result<bool> {
        Ok(self.backend.get(T::COLLECTION, id).await?.is_some())
    }

    /// Encode and save a document under its prepid.
    pub async fn save<T: Document>(&self, document: &T) -> Result<()> {
        let value =
            serde_json::to_value(document).map_err(|source| StoreError::InvalidDocument {
                collection: T::COLLECTION.to_string(),
                id: document.prepid().to_string(),
                source,
            })?;
        self.backend
            .save(T::COLLECTION, document.prepid(), &value)
            .await
    }

    /// Delete a document by id.
    pub async fn delete<T: Document>(&self, id: &str) -> Result<bool> {
        self.backend.delete(T::COLLECTION, id).await
    }
}
