// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Append-only history log shared by all entities.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// User name recorded for changes made by the engine itself.
pub const AUTOMATIC_USER: &str = "automatic";

/// One history record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
    /// What happened (`create`, `submission`, `created_relvals`, ...).
    pub action: String,
    /// Action payload.
    #[serde(default)]
    pub value: Value,
    /// Who did it.
    pub user: String,
    /// Unix timestamp in seconds.
    pub time: i64,
}

impl HistoryEntry {
    /// Create an entry stamped with the current time.
    pub fn new(action: impl Into<String>, value: impl Into<Value>, user: impl Into<String>) -> Self {
        Self {
            action: action.into(),
            value: value.into(),
            user: user.into(),
            time: Utc::now().timestamp(),
        }
    }
}

/// Distinct human users in a history, in first-seen order.
pub(crate) fn history_users(history: &[HistoryEntry]) -> Vec<String> {
    let mut users: Vec<String> = Vec::new();
    for entry in history {
        if entry.user.is_empty() || entry.user == AUTOMATIC_USER {
            continue;
        }
        if !users.contains(&entry.user) {
            users.push(entry.user.clone());
        }
    }
    users
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_history_users_skips_automatic_and_duplicates() {
        let history = vec![
            HistoryEntry::new("create", "", "jdoe"),
            HistoryEntry::new("submission", "failed", AUTOMATIC_USER),
            HistoryEntry::new("update", "", "asmith"),
            HistoryEntry::new("update", "", "jdoe"),
        ];

        assert_eq!(history_users(&history), vec!["jdoe", "asmith"]);
    }
}
