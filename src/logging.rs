// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 Jonathan D. A. Jewell <hyperpolymath>

//! Tracing subscriber setup

use std::fs::{File, OpenOptions};
use std::path::Path;
use std::sync::Mutex;
use tracing::warn;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

use crate::{AutomataError, Result};

/// Pick the log level: `--trace` beats `-v` beats `-q` beats the configured level
pub fn level_for<'a>(trace: bool, verbose: bool, quiet: bool, configured: &'a str) -> &'a str {
    if trace {
        "trace"
    } else if verbose {
        "debug"
    } else if quiet {
        "warn"
    } else {
        configured
    }
}

/// Install the global subscriber. `RUST_LOG` overrides `level` when set.
///
/// Console output goes to stderr; with `file` set, the same events are appended there
/// without ANSI colours. A log file that cannot be opened leaves console logging only.
pub fn init(level: &str, file: Option<&Path>) -> Result<()> {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(level)
            .map_err(|e| AutomataError::Config(format!("Invalid log level '{}': {}", level, e)))?,
    };

    let (log_file, file_error) = match file.map(open_log_file) {
        Some(Ok(log_file)) => (Some(log_file), None),
        Some(Err(e)) => (None, Some(e)),
        None => (None, None),
    };
    let file_layer = log_file.map(|log_file| {
        fmt::layer()
            .with_ansi(false)
            .with_target(false)
            .with_writer(Mutex::new(log_file))
    });

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(false).with_writer(std::io::stderr))
        .with(file_layer)
        .try_init()
        .map_err(|e| AutomataError::Config(format!("Logging already initialized: {}", e)))?;

    if let (Some(path), Some(e)) = (file, file_error) {
        warn!("Cannot open log file {:?}, logging to console only: {}", path, e);
    }
    Ok(())
}

fn open_log_file(path: &Path) -> std::io::Result<File> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    OpenOptions::new().create(true).append(true).open(path)
}
