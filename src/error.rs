// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 Jonathan D. A. Jewell <hyperpolymath>

//! Error types for Automata

use thiserror::Error;

use crate::rules::InvalidRuleError;

/// Result type alias for Automata operations
pub type Result<T> = std::result::Result<T, AutomataError>;

/// Automata error types
#[derive(Error, Debug)]
pub enum AutomataError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("File system error: {0}")]
    FileSystem(#[from] std::io::Error),

    #[error("Watch error: {0}")]
    Watch(#[from] notify::Error),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid rule: {0}")]
    InvalidRule(#[from] InvalidRuleError),

    #[error("Invalid ignore pattern: {0}")]
    Pattern(#[from] glob::PatternError),

    #[error("Inventory error: {0}")]
    Inventory(String),
}
