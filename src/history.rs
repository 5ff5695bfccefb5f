// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 Jonathan D. A. Jewell <hyperpolymath>

//! Move journal for undo support

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use crate::inventory::Inventory;
use crate::Result;

/// A single organize move in history
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    pub source: PathBuf,
    pub destination: PathBuf,
    pub label: String,
    #[serde(default)]
    pub rule: Option<String>,
    #[serde(default)]
    pub undone: bool,
}

/// What happened when undoing one entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UndoStatus {
    Restored,
    /// Dry run: the entry could be restored
    WouldRestore,
    /// The organized file is gone
    Missing,
    /// Something new lives at the original path
    SourceOccupied,
    Failed(String),
}

#[derive(Debug, Clone)]
pub struct UndoOutcome {
    pub entry: HistoryEntry,
    pub status: UndoStatus,
}

/// History manager for tracking file moves
pub struct History {
    path: PathBuf,
}

impl History {
    /// Create a new history manager
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    /// Append an entry to the history
    pub fn append(&self, entry: &HistoryEntry) -> Result<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;

        let json = serde_json::to_string(entry)?;
        writeln!(file, "{}", json)?;

        Ok(())
    }

    /// Read all history entries
    pub fn read_all(&self) -> Result<Vec<HistoryEntry>> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }

        let file = File::open(&self.path)?;
        let reader = BufReader::new(file);

        let mut entries = Vec::new();
        for line in reader.lines() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str(&line) {
                Ok(entry) => entries.push(entry),
                Err(e) => {
                    warn!("Failed to parse history entry: {}", e);
                }
            }
        }

        Ok(entries)
    }

    /// Get the most recent N entries (newest first)
    pub fn get_recent(&self, count: usize) -> Result<Vec<HistoryEntry>> {
        let mut entries = self.read_all()?;
        entries.reverse();
        entries.truncate(count);
        Ok(entries)
    }

    /// Mark entries as undone
    pub fn mark_undone(&self, ids: &[&str]) -> Result<()> {
        let entries = self.read_all()?;

        // Rewrite the entire file with the updated entries
        let file = File::create(&self.path)?;
        let mut writer = std::io::BufWriter::new(file);

        for mut entry in entries {
            if ids.contains(&entry.id.as_str()) {
                entry.undone = true;
            }
            let json = serde_json::to_string(&entry)?;
            writeln!(writer, "{}", json)?;
        }
        writer.flush()?;

        Ok(())
    }

    /// Get entries that haven't been undone (oldest first)
    pub fn get_undoable(&self) -> Result<Vec<HistoryEntry>> {
        let entries = self.read_all()?;
        Ok(entries.into_iter().filter(|e| !e.undone).collect())
    }

    /// Move the newest `count` undoable files back where they came from.
    ///
    /// Never overwrites: entries whose original path is taken are skipped. When an
    /// inventory is given it follows the files back.
    pub fn undo(
        &self,
        count: usize,
        dry_run: bool,
        inventory: Option<&dyn Inventory>,
    ) -> Result<Vec<UndoOutcome>> {
        let candidates: Vec<HistoryEntry> = self.get_undoable()?.into_iter().rev().take(count).collect();

        let mut outcomes = Vec::with_capacity(candidates.len());
        let mut restored = Vec::new();
        for entry in candidates {
            let status = if !entry.destination.exists() {
                warn!("File not found (may have been moved/deleted): {:?}", entry.destination);
                UndoStatus::Missing
            } else if entry.source.exists() {
                warn!("Original path is occupied, skipping: {:?}", entry.source);
                UndoStatus::SourceOccupied
            } else if dry_run {
                UndoStatus::WouldRestore
            } else {
                match restore(&entry) {
                    Ok(()) => {
                        info!("Undone: {:?} -> {:?}", entry.destination, entry.source);
                        if let Some(inventory) = inventory {
                            if let Err(e) = inventory.update_location(&entry.destination, &entry.source) {
                                warn!("Failed to update inventory for {:?}: {}", entry.source, e);
                            }
                        }
                        restored.push(entry.id.clone());
                        UndoStatus::Restored
                    }
                    Err(e) => {
                        warn!("Failed to undo {:?}: {}", entry.destination, e);
                        UndoStatus::Failed(e.to_string())
                    }
                }
            };
            outcomes.push(UndoOutcome { entry, status });
        }

        if !restored.is_empty() {
            let ids: Vec<&str> = restored.iter().map(String::as_str).collect();
            self.mark_undone(&ids)?;
        }

        Ok(outcomes)
    }

    /// Clear all history
    pub fn clear(&self) -> Result<()> {
        if self.path.exists() {
            fs::remove_file(&self.path)?;
        }
        Ok(())
    }

    /// Get history file path
    pub fn path(&self) -> &Path {
        &self.path
    }
}

fn restore(entry: &HistoryEntry) -> std::io::Result<()> {
    if let Some(parent) = entry.source.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }
    fs::rename(&entry.destination, &entry.source)
}

/// Create a new history entry
pub fn create_entry(source: PathBuf, destination: PathBuf, label: String, rule: Option<String>) -> HistoryEntry {
    HistoryEntry {
        id: uuid::Uuid::new_v4().to_string(),
        timestamp: Utc::now(),
        source,
        destination,
        label,
        rule,
        undone: false,
    }
}
