// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! RelVal Core - Submission Orchestration Engine
//!
//! A batch request ("ticket") names a release and a list of work-item ids.
//! Expanding it runs the generation tool on a remote build host and creates
//! one run ("RelVal") per work item. Each run is then queued for submission:
//! its configs are generated and uploaded remotely, the resulting hashes are
//! attached to its steps and a job descriptor is sent to the workflow
//! management service.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────────┐
//! │                         relval-ctl / embedder                        │
//! └──────────────────────────────────────────────────────────────────────┘
//!                │ expand                          │ submit
//!                ▼                                 ▼
//! ┌──────────────────────────┐      ┌──────────────────────────────────┐
//! │      BatchExpander       │      │   WorkerQueue<String> ─► Submitter │
//! │ (under the batch lock)   │      │   (under the run lock)            │
//! └──────────────────────────┘      └──────────────────────────────────┘
//!        │            │                  │          │            │
//!        ▼            ▼                  ▼          ▼            ▼
//! ┌────────────┐ ┌──────────┐    ┌─────────────┐ ┌────────┐ ┌──────────┐
//! │   Remote   │ │  Store   │    │ step_config │ │ReqMgr2 │ │ Notifier │
//! │ (ssh2/sftp)│ │ (SQLite) │    │ + reconcile │ │ client │ │          │
//! └────────────┘ └──────────┘    └─────────────┘ └────────┘ └──────────┘
//! ```
//!
//! # Run Status
//!
//! | Status | Meaning |
//! |--------|---------|
//! | `new` | Created, or reset after a failed submission |
//! | `submitting` | Queued; only the submitter moves it on |
//! | `submitted` | Workflow created and approved |
//! | `done` / `failed` | Outcome reported by computing |
//!
//! # Locking
//!
//! Every mutation of an entity happens under the [`locker::Locker`] lock for
//! its prepid. Id assignment for new batch requests shares the single
//! [`locker::GENERATE_ID_KEY`] lock.

#![deny(missing_docs)]

/// Configuration loaded from environment variables.
pub mod config;

/// Entity controllers (batch requests, runs).
pub mod controller;

/// Error types for engine operations.
pub mod error;

/// Batch request expansion with compensation.
pub mod expansion;

/// Job descriptor built for the workflow management service.
pub mod job_dict;

/// Keyed async lock registry.
pub mod locker;

/// Persisted entities.
pub mod model;

/// Submission notifications.
pub mod notifier;

/// Configuration hash reconciliation.
pub mod reconcile;

/// Remote command execution and file transfer.
pub mod remote;

/// Embeddable runtime.
pub mod runtime;

/// Build and upload script rendering.
pub mod step_config;

/// Document persistence.
pub mod store;

/// Run submission state machine.
pub mod submitter;

/// Bounded task queue with a fixed worker pool.
pub mod worker_queue;

/// Workflow management service client.
pub mod workflow_service;

pub use error::{Error, Result};
pub use runtime::RelvalRuntime;
