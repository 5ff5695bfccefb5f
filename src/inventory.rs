// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 Jonathan D. A. Jewell <hyperpolymath>

//! Inventory collaborator interface

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::path::Path;

use crate::Result;

/// Outcome recorded with an activity entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActivityStatus {
    Success,
    Error,
}

impl ActivityStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Error => "error",
        }
    }
}

impl fmt::Display for ActivityStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where organized files and activity are recorded.
///
/// Implementations serialize their own writes; they are called from the dispatcher's
/// worker thread and from the CLI.
pub trait Inventory: Send + Sync {
    /// Record a file at its final location; returns the inventory id
    fn record_file(
        &self,
        path: &Path,
        label: &str,
        tags: &BTreeSet<String>,
        mime_type: Option<&str>,
        metadata: &serde_json::Value,
    ) -> Result<String>;

    /// A tracked file moved from `old` to `new`
    fn update_location(&self, old: &Path, new: &Path) -> Result<()>;

    fn log_activity(
        &self,
        action: &str,
        path: &Path,
        details: serde_json::Value,
        status: ActivityStatus,
    ) -> Result<()>;
}
