// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 Jonathan D. A. Jewell <hyperpolymath>

//! Automata: local desktop automation hub
//!
//! Watches folders, classifies new files against user-defined rules, moves them into an
//! organized tree and records everything in a local inventory.

pub mod classifier;
pub mod config;
pub mod db;
pub mod debounce;
pub mod error;
pub mod history;
pub mod inventory;
pub mod logging;
pub mod mime;
pub mod organizer;
pub mod pipeline;
pub mod rules;
pub mod template;
pub mod watcher;

pub use config::AppConfig;
pub use error::{AutomataError, Result};
