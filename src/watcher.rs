// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 Jonathan D. A. Jewell <hyperpolymath>

//! File system watcher feeding the organize pipeline
//!
//! Raw notify events are filtered, translated into [`FsEvent`]s and debounced; settled
//! events are handed to an [`EventHandler`] on a dedicated worker thread.

use glob::{MatchOptions, Pattern};
use notify::event::{CreateKind, ModifyKind, RenameMode};
use notify::{Config, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::collections::VecDeque;
use std::panic::{self, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{channel, RecvTimeoutError};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, error, info, warn};

use crate::debounce::{self, DebounceGate, EventKey};
use crate::Result;

/// File name substrings (case-insensitive) of transient and OS metadata files
pub const DEFAULT_IGNORE_PATTERNS: &[&str] = &[
    ".tmp", ".temp", ".lock", ".crdownload", ".part", ".partial", ".download",
    "~$", "thumbs.db", "desktop.ini", ".ds_store", ".directory",
];

const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Rename halves remembered while waiting for their pair
const MAX_OPEN_RENAMES: usize = 64;

/// Decides which files never reach the pipeline
#[derive(Debug, Clone)]
pub struct IgnoreList {
    patterns: Vec<String>,
    globs: Vec<Pattern>,
}

impl Default for IgnoreList {
    fn default() -> Self {
        Self {
            patterns: DEFAULT_IGNORE_PATTERNS.iter().map(|p| p.to_string()).collect(),
            globs: Vec::new(),
        }
    }
}

impl IgnoreList {
    pub fn new(patterns: Vec<String>, globs: &[String]) -> Result<Self> {
        let globs = globs
            .iter()
            .map(|g| Pattern::new(g))
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(Self {
            patterns: patterns.into_iter().map(|p| p.to_lowercase()).collect(),
            globs,
        })
    }

    /// Hidden files, transient files and anything without a file name are ignored
    pub fn is_ignored(&self, path: &Path) -> bool {
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            return true;
        };

        if name.starts_with('.') {
            return true;
        }

        let lower = name.to_lowercase();
        if self.patterns.iter().any(|p| lower.contains(p.as_str())) {
            return true;
        }

        let options = MatchOptions {
            case_sensitive: false,
            ..MatchOptions::new()
        };
        self.globs.iter().any(|g| g.matches_with(name, options))
    }

    pub fn should_process(&self, path: &Path) -> bool {
        !self.is_ignored(path)
    }
}

/// A filesystem change the pipeline cares about
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FsEvent {
    /// A file appeared
    Created(PathBuf),
    /// A file moved within the watched roots
    Moved { from: PathBuf, to: PathBuf },
}

impl FsEvent {
    /// Debounce key: the event kind and the path the file now lives at
    pub fn key(&self) -> EventKey {
        match self {
            Self::Created(path) => EventKey::new(debounce::EventKind::Created, path.clone()),
            Self::Moved { to, .. } => EventKey::new(debounce::EventKind::Moved, to.clone()),
        }
    }
}

/// Tracks the first half of renames so the second half is not mistaken for a new file.
///
/// Backends that pair renames report `From`, then `To` with the same tracker, then `Both`.
#[derive(Debug, Default)]
pub struct RenamePairs {
    open: VecDeque<usize>,
}

impl RenamePairs {
    fn departed(&mut self, tracker: usize) {
        if self.open.len() == MAX_OPEN_RENAMES {
            self.open.pop_front();
        }
        self.open.push_back(tracker);
    }

    /// Whether `tracker` closes a rename whose source was seen
    fn arrived(&mut self, tracker: usize) -> bool {
        match self.open.iter().position(|t| *t == tracker) {
            Some(i) => {
                self.open.remove(i);
                true
            }
            None => false,
        }
    }
}

/// Translate a notify event, dropping directories and ignored files.
///
/// A rename away from an ignored name (a finished download, an editor's temp file) is
/// reported as the creation of the new name.
pub fn translate(event: &Event, ignore: &IgnoreList, renames: &mut RenamePairs) -> Vec<FsEvent> {
    let created = |paths: &[PathBuf]| -> Vec<FsEvent> {
        paths
            .iter()
            .filter(|p| ignore.should_process(p))
            .map(|p| FsEvent::Created(p.clone()))
            .collect()
    };

    match event.kind {
        EventKind::Create(CreateKind::Folder) => Vec::new(),
        EventKind::Create(_) => created(&event.paths),
        EventKind::Modify(ModifyKind::Name(RenameMode::From)) => {
            if let Some(tracker) = event.tracker() {
                renames.departed(tracker);
            }
            Vec::new()
        }
        EventKind::Modify(ModifyKind::Name(RenameMode::Both)) => {
            let [from, to, ..] = event.paths.as_slice() else {
                return Vec::new();
            };
            if ignore.is_ignored(to) {
                Vec::new()
            } else if ignore.is_ignored(from) {
                vec![FsEvent::Created(to.clone())]
            } else {
                vec![FsEvent::Moved {
                    from: from.clone(),
                    to: to.clone(),
                }]
            }
        }
        EventKind::Modify(ModifyKind::Name(RenameMode::To)) => {
            // Paired: the `Both` event that follows carries the move
            if event.tracker().is_some_and(|t| renames.arrived(t)) {
                return Vec::new();
            }
            // Moved in from outside the watched roots
            created(&event.paths)
        }
        // Backends that cannot pair renames report each side separately
        EventKind::Modify(ModifyKind::Name(RenameMode::Any)) => {
            let arrived: Vec<PathBuf> = event.paths.iter().filter(|p| p.is_file()).cloned().collect();
            created(&arrived)
        }
        _ => Vec::new(),
    }
}

/// Every non-ignored file below `roots`, for processing files that predate the watcher
pub fn existing_files(roots: &[PathBuf], ignore: &IgnoreList) -> Vec<PathBuf> {
    let mut files = Vec::new();
    for root in roots {
        walk(root, ignore, &mut files);
    }
    files
}

fn walk(dir: &Path, ignore: &IgnoreList, files: &mut Vec<PathBuf>) {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return;
    };
    for entry in entries.flatten() {
        let path = entry.path();
        let Ok(file_type) = entry.file_type() else {
            continue;
        };
        if file_type.is_dir() {
            if !path.file_name().and_then(|n| n.to_str()).is_some_and(|n| n.starts_with('.')) {
                walk(&path, ignore, files);
            }
        } else if file_type.is_file() && ignore.should_process(&path) {
            files.push(path);
        }
    }
}

/// Receives settled events
pub trait EventHandler: Send + Sync {
    fn handle(&self, event: FsEvent);
}

/// Lifecycle of a [`WatchDispatcher`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatcherState {
    Stopped,
    Starting,
    Running,
    Stopping,
}

struct Running {
    watcher: RecommendedWatcher,
    gate: Arc<DebounceGate<FsEvent>>,
    shutdown: Arc<AtomicBool>,
    pump: JoinHandle<()>,
    worker: JoinHandle<()>,
}

/// Watches roots recursively and dispatches debounced events to a handler
pub struct WatchDispatcher {
    roots: Vec<PathBuf>,
    ignore: Arc<IgnoreList>,
    delay: Duration,
    handler: Arc<dyn EventHandler>,
    state: Arc<Mutex<DispatcherState>>,
    running: Mutex<Option<Running>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl WatchDispatcher {
    pub fn new(roots: Vec<PathBuf>, ignore: IgnoreList, handler: Arc<dyn EventHandler>) -> Self {
        Self {
            roots,
            ignore: Arc::new(ignore),
            delay: debounce::DEFAULT_DEBOUNCE,
            handler,
            state: Arc::new(Mutex::new(DispatcherState::Stopped)),
            running: Mutex::new(None),
        }
    }

    /// Override the debounce window
    pub fn with_debounce(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn state(&self) -> DispatcherState {
        *lock(&self.state)
    }

    pub fn is_running(&self) -> bool {
        self.state() == DispatcherState::Running
    }

    pub fn roots(&self) -> &[PathBuf] {
        &self.roots
    }

    fn set_state(&self, state: DispatcherState) {
        *lock(&self.state) = state;
    }

    /// Subscribe to the roots and start dispatching. A no-op if already running.
    pub fn start(&self) -> Result<()> {
        let mut running = lock(&self.running);
        if running.is_some() {
            warn!("File watcher is already running");
            return Ok(());
        }

        self.set_state(DispatcherState::Starting);
        match self.spawn() {
            Ok(parts) => {
                *running = Some(parts);
                self.set_state(DispatcherState::Running);
                info!("File watcher started successfully");
                Ok(())
            }
            Err(e) => {
                self.set_state(DispatcherState::Stopped);
                error!("Error starting file watcher: {}", e);
                Err(e)
            }
        }
    }

    fn spawn(&self) -> Result<Running> {
        let (raw_tx, raw_rx) = channel::<notify::Result<Event>>();
        let mut watcher = RecommendedWatcher::new(raw_tx, Config::default())?;
        for root in &self.roots {
            if !root.exists() {
                warn!("Watch path does not exist: {:?}", root);
                continue;
            }
            match watcher.watch(root, RecursiveMode::Recursive) {
                Ok(()) => info!("Watching path: {:?}", root),
                Err(e) => warn!("Cannot watch {:?}: {}", root, e),
            }
        }

        let (work_tx, work_rx) = channel::<FsEvent>();
        let work_tx = Mutex::new(work_tx);
        let gate = Arc::new(DebounceGate::new(self.delay, move |_key, event| {
            let _ = lock(&work_tx).send(event);
        })?);

        let handler = Arc::clone(&self.handler);
        let worker = thread::Builder::new()
            .name("automata-worker".to_string())
            .spawn(move || {
                for event in work_rx {
                    let outcome = panic::catch_unwind(AssertUnwindSafe(|| handler.handle(event.clone())));
                    if outcome.is_err() {
                        error!("Event handler panicked while processing {:?}", event);
                    }
                }
            })?;

        let shutdown = Arc::new(AtomicBool::new(false));
        let pump = {
            let shutdown = Arc::clone(&shutdown);
            let gate = Arc::clone(&gate);
            let ignore = Arc::clone(&self.ignore);
            let state = Arc::clone(&self.state);
            thread::Builder::new()
                .name("automata-watch".to_string())
                .spawn(move || {
                    let mut renames = RenamePairs::default();
                    loop {
                        if shutdown.load(Ordering::SeqCst) {
                            break;
                        }
                        match raw_rx.recv_timeout(POLL_INTERVAL) {
                            Ok(Ok(event)) => {
                                if *lock(&state) != DispatcherState::Running {
                                    continue;
                                }
                                for fs_event in translate(&event, &ignore, &mut renames) {
                                    debug!("Queued {:?}", fs_event);
                                    gate.submit(fs_event.key(), fs_event);
                                }
                            }
                            Ok(Err(e)) => warn!("Watch error: {}", e),
                            Err(RecvTimeoutError::Timeout) => {}
                            Err(RecvTimeoutError::Disconnected) => break,
                        }
                    }
                })?
        };

        Ok(Running {
            watcher,
            gate,
            shutdown,
            pump,
            worker,
        })
    }

    /// Unsubscribe, discard pending events and wait for every thread to finish.
    /// A no-op if not running.
    pub fn stop(&self) {
        if !self.stop_inner() {
            warn!("File watcher is not running");
        }
    }

    fn stop_inner(&self) -> bool {
        let mut running = lock(&self.running);
        let Some(parts) = running.take() else {
            return false;
        };

        self.set_state(DispatcherState::Stopping);
        let Running {
            watcher,
            gate,
            shutdown,
            pump,
            worker,
        } = parts;

        drop(watcher);
        shutdown.store(true, Ordering::SeqCst);
        if pump.join().is_err() {
            error!("Watch thread panicked");
        }

        // Closing the gate drops the worker's sender once the last handle goes
        gate.shutdown();
        drop(gate);
        if worker.join().is_err() {
            error!("Worker thread panicked");
        }

        self.set_state(DispatcherState::Stopped);
        info!("File watcher stopped");
        true
    }
}

impl Drop for WatchDispatcher {
    fn drop(&mut self) {
        self.stop_inner();
    }
}
