// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 Jonathan D. A. Jewell <hyperpolymath>

//! Classify → organize → record, for one settled event at a time

use serde::Serialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use crate::classifier::{Classification, Classifier};
use crate::history::{create_entry, History};
use crate::inventory::{ActivityStatus, Inventory};
use crate::organizer::{DryRunResult, OrganizeResult, Organizer};
use crate::watcher::{EventHandler, FsEvent};

/// How long a file this pipeline just moved is shielded from being processed again
const PLACED_GRACE: Duration = Duration::from_secs(30);

/// Everything that happened to one new file
#[derive(Debug)]
pub struct ProcessOutcome {
    pub classification: Classification,
    pub organize: Option<OrganizeResult>,
    pub inventory_id: Option<String>,
}

impl ProcessOutcome {
    /// Where the file lives now
    pub fn final_path<'a>(&'a self, source: &'a Path) -> &'a Path {
        self.organize
            .as_ref()
            .map(|o| o.final_destination_path.as_path())
            .unwrap_or(source)
    }

    pub fn succeeded(&self) -> bool {
        !self.classification.is_failure() && self.organize.as_ref().is_some_and(|o| o.error.is_none())
    }
}

/// What organizing a file would do
#[derive(Debug, Clone, Serialize)]
pub struct Preview {
    pub classification: Classification,
    pub plan: DryRunResult,
}

pub struct Pipeline {
    classifier: Arc<Classifier>,
    organizer: Organizer,
    inventory: Arc<dyn Inventory>,
    history: Option<History>,
    /// Destinations of recent moves. Watch backends that cannot pair renames, and
    /// cross-device copies, report these as new files.
    placed: Mutex<HashMap<PathBuf, Instant>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl Pipeline {
    pub fn new(classifier: Arc<Classifier>, organizer: Organizer, inventory: Arc<dyn Inventory>) -> Self {
        Self {
            classifier,
            organizer,
            inventory,
            history: None,
            placed: Mutex::new(HashMap::new()),
        }
    }

    /// Journal successful moves so they can be undone
    pub fn with_history(mut self, history: History) -> Self {
        self.history = Some(history);
        self
    }

    pub fn classifier(&self) -> &Arc<Classifier> {
        &self.classifier
    }

    /// Process a newly created file. `None` when the file is gone by the time it settles,
    /// or when it is where this pipeline just put it.
    ///
    /// The file is recorded in the inventory even when classifying or moving it fails;
    /// it is then recorded where it is.
    pub fn process_created(&self, path: &Path) -> Option<ProcessOutcome> {
        if !path.is_file() {
            debug!("File no longer exists, dropping event: {:?}", path);
            return None;
        }
        if self.take_placed(path) {
            debug!("Skipping file placed by the organizer: {:?}", path);
            return None;
        }

        info!("Processing: {:?}", path);
        let classification = self.classifier.classify(path);

        let organize = match classification.error {
            Some(ref e) => {
                self.log(
                    "file_classify_failed",
                    path,
                    serde_json::json!({ "error": e }),
                    ActivityStatus::Error,
                );
                None
            }
            None => Some(self.organizer.organize(path, &classification)),
        };

        let final_path = organize
            .as_ref()
            .map(|o| o.final_destination_path.clone())
            .unwrap_or_else(|| path.to_path_buf());

        if let Some(ref result) = organize {
            match result.error {
                Some(ref e) => self.log(
                    "file_organize_failed",
                    path,
                    serde_json::json!({
                        "error": e.to_string(),
                        "label": classification.label,
                        "rule": classification.rule_matched,
                    }),
                    ActivityStatus::Error,
                ),
                None if result.moved => {
                    self.journal(path, &final_path, &classification);
                    self.remember_placed(&final_path);
                }
                None => {}
            }
        }

        let inventory_id = match self.inventory.record_file(
            &final_path,
            &classification.label,
            &classification.tags,
            classification.mime_type.as_deref(),
            &classification.metadata,
        ) {
            Ok(id) => Some(id),
            Err(e) => {
                warn!("Failed to record {:?} in inventory: {}", final_path, e);
                None
            }
        };

        if let Some(result) = organize.as_ref().filter(|o| o.error.is_none()) {
            self.log(
                "file_organized",
                &final_path,
                serde_json::json!({
                    "source": path,
                    "destination": final_path,
                    "moved": result.moved,
                    "label": classification.label,
                    "tags": classification.tags,
                    "rule": classification.rule_matched,
                    "confidence": classification.confidence,
                }),
                ActivityStatus::Success,
            );
        }

        Some(ProcessOutcome {
            classification,
            organize,
            inventory_id,
        })
    }

    /// A file moved between watched locations; only the inventory follows it
    pub fn process_moved(&self, from: &Path, to: &Path) {
        if let Err(e) = self.inventory.update_location(from, to) {
            warn!("Failed to update inventory location {:?} -> {:?}: {}", from, to, e);
        }
    }

    /// Classify and plan without touching the filesystem
    pub fn preview(&self, path: &Path) -> Preview {
        let classification = self.classifier.classify(path);
        let plan = self.organizer.dry_run(path, &classification);
        Preview { classification, plan }
    }

    fn remember_placed(&self, path: &Path) {
        let mut placed = lock(&self.placed);
        placed.retain(|_, at| at.elapsed() < PLACED_GRACE);
        placed.insert(path.to_path_buf(), Instant::now());
    }

    fn take_placed(&self, path: &Path) -> bool {
        lock(&self.placed)
            .remove(path)
            .is_some_and(|at| at.elapsed() < PLACED_GRACE)
    }

    fn journal(&self, source: &Path, destination: &Path, classification: &Classification) {
        let Some(ref history) = self.history else {
            return;
        };
        let entry = create_entry(
            source.to_path_buf(),
            destination.to_path_buf(),
            classification.label.clone(),
            classification.rule_matched.clone(),
        );
        if let Err(e) = history.append(&entry) {
            warn!("Failed to write history entry: {}", e);
        }
    }

    fn log(&self, action: &str, path: &Path, details: serde_json::Value, status: ActivityStatus) {
        if let Err(e) = self.inventory.log_activity(action, path, details, status) {
            warn!("Failed to log activity '{}' for {:?}: {}", action, path, e);
        }
    }
}

impl EventHandler for Pipeline {
    fn handle(&self, event: FsEvent) {
        match event {
            FsEvent::Created(path) => {
                self.process_created(&path);
            }
            FsEvent::Moved { from, to } => self.process_moved(&from, &to),
        }
    }
}
