// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 Jonathan D. A. Jewell <hyperpolymath>

//! Configuration management for Automata

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::rules::{default_rules, Rule, RuleSet};
use crate::template::home_dir;
use crate::watcher::{IgnoreList, DEFAULT_IGNORE_PATTERNS};
use crate::{AutomataError, Result};

/// Where the application keeps its own files
pub fn app_dir() -> PathBuf {
    home_dir().join(".automata")
}

/// Default location of the configuration file
pub fn default_config_path() -> PathBuf {
    app_dir().join("config.json")
}

/// Main application configuration
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct AppConfig {
    /// Directories to watch
    #[serde(default = "default_watch_paths")]
    pub watch_paths: Vec<String>,

    /// Root of the organized tree used by the default rules
    #[serde(default = "default_organize_base")]
    pub organize_base_path: String,

    /// Rules document (JSON array)
    #[serde(default = "default_rules_file")]
    pub rules_file: String,

    #[serde(default)]
    pub watcher: WatcherConfig,

    #[serde(default)]
    pub database: DatabaseConfig,

    #[serde(default)]
    pub history: HistoryConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct WatcherConfig {
    /// Quiet period before a burst of events for one path is processed
    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,
    /// Case-insensitive substrings of file names to ignore
    #[serde(default = "default_ignore_patterns")]
    pub ignore_patterns: Vec<String>,
    /// Glob patterns matched against file names
    #[serde(default)]
    pub ignore_globs: Vec<String>,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct DatabaseConfig {
    #[serde(default = "default_db_path")]
    pub path: String,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct HistoryConfig {
    #[serde(default = "default_history_path")]
    pub path: String,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file: Option<String>,
}

// Default value functions
fn in_app_dir(name: &str) -> String { app_dir().join(name).to_string_lossy().into_owned() }
fn default_watch_paths() -> Vec<String> { vec![home_dir().join("Downloads").to_string_lossy().into_owned()] }
fn default_organize_base() -> String { home_dir().join("AutomataOrganized").to_string_lossy().into_owned() }
fn default_rules_file() -> String { in_app_dir("rules.json") }
fn default_db_path() -> String { in_app_dir("automata.sqlite") }
fn default_history_path() -> String { in_app_dir("history.jsonl") }
fn default_debounce_ms() -> u64 { 2000 }
fn default_log_level() -> String { "info".to_string() }
fn default_ignore_patterns() -> Vec<String> {
    DEFAULT_IGNORE_PATTERNS.iter().map(|p| p.to_string()).collect()
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            watch_paths: default_watch_paths(),
            organize_base_path: default_organize_base(),
            rules_file: default_rules_file(),
            watcher: WatcherConfig::default(),
            database: DatabaseConfig::default(),
            history: HistoryConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl Default for WatcherConfig {
    fn default() -> Self {
        Self {
            debounce_ms: default_debounce_ms(),
            ignore_patterns: default_ignore_patterns(),
            ignore_globs: Vec::new(),
        }
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self { path: default_db_path() }
    }
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self { path: default_history_path() }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            file: None,
        }
    }
}

impl WatcherConfig {
    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }

    pub fn ignore_list(&self) -> Result<IgnoreList> {
        IgnoreList::new(self.ignore_patterns.clone(), &self.ignore_globs)
    }
}

impl AppConfig {
    /// Load configuration from a JSON file
    pub fn load(path: &Path) -> Result<Self> {
        if path.exists() {
            let content = std::fs::read_to_string(path)?;
            let config: Self = serde_json::from_str(&content)
                .map_err(|e| AutomataError::Config(format!("Failed to parse config: {}", e)))?;
            Ok(config)
        } else {
            tracing::info!("Config file not found at {:?}, using defaults", path);
            Ok(Self::default())
        }
    }

    /// Save configuration to a JSON file
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    pub fn watch_paths(&self) -> Vec<PathBuf> {
        self.watch_paths.iter().map(PathBuf::from).collect()
    }
}

/// Supplies rules and watch roots. Implementations re-read their backing store on each call.
pub trait ConfigSource: Send + Sync {
    fn get_rules(&self) -> Result<Vec<Rule>>;
    fn get_watch_paths(&self) -> Result<Vec<PathBuf>>;
}

/// File-backed configuration: `config.json` plus the rules document it points at
#[derive(Debug, Clone)]
pub struct ConfigManager {
    config_path: PathBuf,
}

impl ConfigManager {
    pub fn new(config_path: PathBuf) -> Self {
        Self { config_path }
    }

    pub fn config_path(&self) -> &Path {
        &self.config_path
    }

    /// Current configuration, read from disk
    pub fn config(&self) -> Result<AppConfig> {
        AppConfig::load(&self.config_path)
    }

    pub fn save_config(&self, config: &AppConfig) -> Result<()> {
        config.save(&self.config_path)
    }

    pub fn rules_path(&self) -> Result<PathBuf> {
        Ok(PathBuf::from(self.config()?.rules_file))
    }

    /// Write the default rules if no rules file exists yet
    pub fn ensure_rules(&self) -> Result<()> {
        let config = self.config()?;
        let path = PathBuf::from(&config.rules_file);
        if !path.exists() {
            self.save_rules(&default_rules(&config.organize_base_path))?;
            tracing::info!("Default rules created at {:?}", path);
        }
        Ok(())
    }

    /// Replace the rules document
    pub fn save_rules(&self, rules: &[Rule]) -> Result<()> {
        let path = self.rules_path()?;
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&path, serde_json::to_string_pretty(rules)?)?;
        tracing::info!("Rules saved to {:?}", path);
        Ok(())
    }

    pub fn add_rule(&self, rule: Rule) -> Result<()> {
        let mut rules = self.get_rules()?;
        rules.push(rule);
        RuleSet::load(rules.clone())?;
        self.save_rules(&rules)
    }

    /// Replace the rule at `index` (document order). Returns false if out of range.
    pub fn update_rule(&self, index: usize, rule: Rule) -> Result<bool> {
        let mut rules = self.get_rules()?;
        let Some(slot) = rules.get_mut(index) else {
            return Ok(false);
        };
        *slot = rule;
        RuleSet::load(rules.clone())?;
        self.save_rules(&rules)?;
        Ok(true)
    }

    /// Remove the rule at `index` (document order). Returns false if out of range.
    pub fn delete_rule(&self, index: usize) -> Result<bool> {
        let mut rules = self.get_rules()?;
        if index >= rules.len() {
            return Ok(false);
        }
        rules.remove(index);
        self.save_rules(&rules)?;
        Ok(true)
    }

    /// Replace all rules with a validated JSON document; returns the number imported
    pub fn import_rules(&self, json: &str) -> Result<usize> {
        let rules: Vec<Rule> = serde_json::from_str(json)?;
        RuleSet::load(rules.clone())?;
        self.save_rules(&rules)?;
        Ok(rules.len())
    }

    /// The rules document in document order
    pub fn export_rules(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(&self.get_rules()?)?)
    }
}

impl ConfigSource for ConfigManager {
    fn get_rules(&self) -> Result<Vec<Rule>> {
        let path = self.rules_path()?;
        if !path.exists() {
            return Ok(Vec::new());
        }
        let content = std::fs::read_to_string(&path)?;
        Ok(serde_json::from_str(&content)?)
    }

    fn get_watch_paths(&self) -> Result<Vec<PathBuf>> {
        Ok(self.config()?.watch_paths())
    }
}
