// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 Jonathan D. A. Jewell <hyperpolymath>

//! Coalesces bursts of filesystem events
//!
//! Events are keyed by `(kind, path)`. Every event for a key restarts that key's timer and
//! replaces its payload, so a burst produces exactly one dispatch carrying the latest
//! payload. A single scheduler thread owns all timers; the pending map is guarded by one
//! mutex and dispatch happens outside the lock.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Quiet period used when none is configured
pub const DEFAULT_DEBOUNCE: Duration = Duration::from_secs(2);

/// Kind of event being debounced
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    Created,
    Moved,
}

/// Events with equal keys are coalesced
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct EventKey {
    pub kind: EventKind,
    pub path: PathBuf,
}

impl EventKey {
    pub fn new(kind: EventKind, path: impl Into<PathBuf>) -> Self {
        Self { kind, path: path.into() }
    }
}

/// A pending event waiting for its quiet period to end
#[derive(Debug)]
struct DebounceEntry<P> {
    deadline: Instant,
    payload: P,
}

struct GateState<P> {
    pending: HashMap<EventKey, DebounceEntry<P>>,
    closed: bool,
}

type Dispatch<P> = Box<dyn Fn(EventKey, P) + Send + Sync>;

struct Shared<P> {
    delay: Duration,
    state: Mutex<GateState<P>>,
    wake: Condvar,
    dispatch: Dispatch<P>,
}

impl<P> Shared<P> {
    fn lock(&self) -> MutexGuard<'_, GateState<P>> {
        // The map stays consistent even if a holder panicked
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Delays and coalesces events, then hands each settled event to a dispatch callback
pub struct DebounceGate<P: Send + 'static> {
    shared: Arc<Shared<P>>,
    timer: Mutex<Option<JoinHandle<()>>>,
}

impl<P: Send + 'static> DebounceGate<P> {
    /// Start a gate whose scheduler thread calls `dispatch` once per settled key
    pub fn new<F>(delay: Duration, dispatch: F) -> crate::Result<Self>
    where
        F: Fn(EventKey, P) + Send + Sync + 'static,
    {
        let shared = Arc::new(Shared {
            delay,
            state: Mutex::new(GateState {
                pending: HashMap::new(),
                closed: false,
            }),
            wake: Condvar::new(),
            dispatch: Box::new(dispatch),
        });

        let worker = Arc::clone(&shared);
        let timer = thread::Builder::new()
            .name("automata-debounce".to_string())
            .spawn(move || run_timer(worker))?;

        Ok(Self {
            shared,
            timer: Mutex::new(Some(timer)),
        })
    }

    pub fn delay(&self) -> Duration {
        self.shared.delay
    }

    /// Record an event, replacing any pending payload for the same key and restarting its timer
    pub fn submit(&self, key: EventKey, payload: P) {
        let mut state = self.shared.lock();
        if state.closed {
            debug!("Debounce gate closed, dropping event for {:?}", key.path);
            return;
        }

        let deadline = Instant::now() + self.shared.delay;
        if state.pending.insert(key, DebounceEntry { deadline, payload }).is_some() {
            debug!("Coalesced repeated event");
        }
        drop(state);
        self.shared.wake.notify_one();
    }

    /// Drop a pending event without dispatching it. Returns whether one was pending.
    pub fn cancel(&self, key: &EventKey) -> bool {
        let removed = self.shared.lock().pending.remove(key).is_some();
        if removed {
            self.shared.wake.notify_one();
        }
        removed
    }

    /// Number of keys waiting to settle
    pub fn pending(&self) -> usize {
        self.shared.lock().pending.len()
    }

    /// Discard every pending event and stop the scheduler thread. Idempotent.
    pub fn shutdown(&self) {
        let discarded = {
            let mut state = self.shared.lock();
            state.closed = true;
            let discarded = state.pending.len();
            state.pending.clear();
            discarded
        };
        self.shared.wake.notify_all();

        if discarded > 0 {
            debug!("Discarded {} pending events", discarded);
        }

        let handle = self
            .timer
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
        if let Some(handle) = handle {
            if handle.join().is_err() {
                warn!("Debounce scheduler thread panicked");
            }
        }
    }
}

impl<P: Send + 'static> Drop for DebounceGate<P> {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn run_timer<P>(shared: Arc<Shared<P>>) {
    let mut state = shared.lock();
    loop {
        if state.closed {
            return;
        }

        let now = Instant::now();
        let due: Vec<EventKey> = state
            .pending
            .iter()
            .filter(|(_, entry)| entry.deadline <= now)
            .map(|(key, _)| key.clone())
            .collect();

        if !due.is_empty() {
            let settled: Vec<(EventKey, P)> = due
                .into_iter()
                .filter_map(|key| state.pending.remove(&key).map(|entry| (key, entry.payload)))
                .collect();
            drop(state);

            for (key, payload) in settled {
                (shared.dispatch)(key, payload);
            }

            state = shared.lock();
            continue;
        }

        let next = state.pending.values().map(|entry| entry.deadline).min();
        state = match next {
            Some(deadline) => {
                let wait = deadline.saturating_duration_since(now);
                shared
                    .wake
                    .wait_timeout(state, wait)
                    .map(|(guard, _)| guard)
                    .unwrap_or_else(|poisoned| poisoned.into_inner().0)
            }
            None => shared
                .wake
                .wait(state)
                .unwrap_or_else(|poisoned| poisoned.into_inner()),
        };
    }
}
