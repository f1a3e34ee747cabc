// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Entity controllers: create, delete and status changes under entity locks.

mod batch;
mod run;

pub use batch::BatchController;
pub use run::RunController;
