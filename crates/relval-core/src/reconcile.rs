// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Configuration hash reconciliation.
//!
//! The upload script reports one `(file name, hash)` pair per uploaded
//! config. Every step that produces a config must claim exactly one pair by
//! name, and every pair must be claimed: no duplicates, no leftovers.

use std::fmt;

use tracing::debug;

use crate::error::{Error, Result};
use crate::model::Step;

/// Marker on upload output lines that carry a config hash.
pub const DOC_ID_MARKER: &str = "DocID";

/// One uploaded configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigHash {
    /// Config file name.
    pub name: String,
    /// Config cache document id.
    pub hash: String,
}

impl fmt::Display for ConfigHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.name, self.hash)
    }
}

/// Extract `(name, hash)` pairs from upload script output.
///
/// Lines look like `DocID GenSim.py 0a1b2c...`; anything else is ignored.
pub fn parse_upload_output(stdout: &str) -> Vec<ConfigHash> {
    stdout
        .lines()
        .filter(|line| line.contains(DOC_ID_MARKER))
        .filter_map(|line| {
            let mut parts = line.split_whitespace().skip(1);
            match (parts.next(), parts.next()) {
                (Some(name), Some(hash)) => Some(ConfigHash {
                    name: name.to_string(),
                    hash: hash.to_string(),
                }),
                _ => None,
            }
        })
        .collect()
}

/// Assign uploaded hashes to steps by config file name.
///
/// Fails with [`Error::MissingHash`] for the first step without a match and
/// with [`Error::UnusedHashes`] if pairs are left over.
pub fn assign_config_hashes(steps: &mut [Step], mut hashes: Vec<ConfigHash>) -> Result<()> {
    for step in steps.iter_mut() {
        let Some(config_name) = step.config_file_name() else {
            continue;
        };

        let position = hashes
            .iter()
            .position(|pair| pair.name == config_name)
            .ok_or_else(|| Error::MissingHash {
                step: step.name.clone(),
            })?;

        let pair = hashes.remove(position);
        debug!(config = %pair.name, hash = %pair.hash, step = %step.name, "Assigned config hash");
        step.config_id = pair.hash;
    }

    if !hashes.is_empty() {
        return Err(Error::UnusedHashes(hashes));
    }

    if let Some(step) = steps
        .iter()
        .find(|s| s.config_file_name().is_some() && s.config_id.is_empty())
    {
        return Err(Error::MissingHash {
            step: step.name.clone(),
        });
    }

    Ok(())
}
