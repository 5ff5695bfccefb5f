// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 Jonathan D. A. Jewell <hyperpolymath>

//! Classification rules and validated rule sets
//!
//! A [`Rule`] is the persisted document authors write (see `rules.json`). A [`RuleSet`] is
//! the validated, priority-sorted form the classifier evaluates. Rule sets are immutable;
//! reconfiguration builds a new one.

use regex::{Regex, RegexBuilder};
use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

/// Priority assigned to rules that do not specify one
pub const DEFAULT_PRIORITY: i32 = 100;

/// Label used when a matched rule does not set one
pub const DEFAULT_LABEL: &str = "other";

/// Errors raised while loading a rule set
#[derive(Error, Debug)]
pub enum InvalidRuleError {
    #[error("rule #{index} has no name")]
    MissingName { index: usize },

    #[error("rule '{rule}': {field} does not compile: {source}")]
    BadRegex {
        rule: String,
        field: &'static str,
        #[source]
        source: regex::Error,
    },
}

/// A named, prioritized condition/action pair
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Rule {
    #[serde(default)]
    pub name: String,

    /// Lower values are evaluated first
    #[serde(default = "default_priority")]
    pub priority: i32,

    /// Inactive rules are skipped entirely
    #[serde(default = "default_true")]
    pub active: bool,

    #[serde(default)]
    pub when: Conditions,

    #[serde(default)]
    pub then: Actions,
}

/// Conditions of a rule. Every present condition must hold; an empty set matches every file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Conditions {
    /// Searched (not full-matched) against the base filename
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filename_regex: Option<String>,

    /// Searched against the full path
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path_regex: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mime_in: Option<Vec<String>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mime_startswith: Option<String>,

    /// Exclusive upper bound
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size_lt_bytes: Option<u64>,

    /// Exclusive lower bound
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size_gt_bytes: Option<u64>,
}

/// Actions applied when a rule matches
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Actions {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tags_add: Option<Vec<String>>,

    /// Destination directory template
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub move_to: Option<String>,

    /// Destination filename template (only used together with `move_to`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rename_to: Option<String>,
}

fn default_priority() -> i32 { DEFAULT_PRIORITY }
fn default_true() -> bool { true }

impl Conditions {
    /// Number of conditions present
    pub fn len(&self) -> usize {
        [
            self.filename_regex.is_some(),
            self.path_regex.is_some(),
            self.mime_in.is_some(),
            self.mime_startswith.is_some(),
            self.size_lt_bytes.is_some(),
            self.size_gt_bytes.is_some(),
        ]
        .iter()
        .filter(|present| **present)
        .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Facts about a file that rule conditions are evaluated against
#[derive(Debug, Clone, Copy)]
pub struct FileFacts<'a> {
    pub path: &'a Path,
    pub filename: &'a str,
    pub mime_type: Option<&'a str>,
    pub size: u64,
}

/// A rule with its regular expressions compiled
#[derive(Debug, Clone)]
pub struct CompiledRule {
    rule: Rule,
    filename_re: Option<Regex>,
    path_re: Option<Regex>,
}

impl CompiledRule {
    fn compile(index: usize, rule: Rule) -> Result<Self, InvalidRuleError> {
        if rule.name.trim().is_empty() {
            return Err(InvalidRuleError::MissingName { index });
        }

        let filename_re = compile_pattern(&rule.name, "filename_regex", rule.when.filename_regex.as_deref())?;
        let path_re = compile_pattern(&rule.name, "path_regex", rule.when.path_regex.as_deref())?;

        Ok(Self { rule, filename_re, path_re })
    }

    pub fn rule(&self) -> &Rule {
        &self.rule
    }

    pub fn name(&self) -> &str {
        &self.rule.name
    }

    pub fn is_active(&self) -> bool {
        self.rule.active
    }

    /// Check every present condition against the file
    pub fn matches(&self, facts: &FileFacts<'_>) -> bool {
        let when = &self.rule.when;

        if let Some(re) = &self.filename_re {
            if !re.is_match(facts.filename) {
                return false;
            }
        }

        if let Some(re) = &self.path_re {
            if !re.is_match(&facts.path.to_string_lossy()) {
                return false;
            }
        }

        if let Some(allowed) = &when.mime_in {
            let Some(mime) = facts.mime_type else {
                return false;
            };
            if !allowed.iter().any(|m| m.eq_ignore_ascii_case(mime)) {
                return false;
            }
        }

        if let Some(prefix) = &when.mime_startswith {
            let Some(mime) = facts.mime_type else {
                return false;
            };
            if !mime.to_ascii_lowercase().starts_with(&prefix.to_ascii_lowercase()) {
                return false;
            }
        }

        if let Some(bound) = when.size_lt_bytes {
            if facts.size >= bound {
                return false;
            }
        }

        if let Some(bound) = when.size_gt_bytes {
            if facts.size <= bound {
                return false;
            }
        }

        true
    }
}

fn compile_pattern(
    rule: &str,
    field: &'static str,
    pattern: Option<&str>,
) -> Result<Option<Regex>, InvalidRuleError> {
    pattern
        .map(|p| {
            RegexBuilder::new(p)
                .case_insensitive(true)
                .build()
                .map_err(|source| InvalidRuleError::BadRegex {
                    rule: rule.to_string(),
                    field,
                    source,
                })
        })
        .transpose()
}

/// Validated rules, sorted by ascending priority (stable for equal priorities)
#[derive(Debug, Clone, Default)]
pub struct RuleSet {
    rules: Vec<CompiledRule>,
}

impl RuleSet {
    /// Validate and sort a sequence of rules
    pub fn load(rules: Vec<Rule>) -> Result<Self, InvalidRuleError> {
        let mut compiled = rules
            .into_iter()
            .enumerate()
            .map(|(index, rule)| CompiledRule::compile(index, rule))
            .collect::<Result<Vec<_>, _>>()?;

        compiled.sort_by_key(|r| r.rule.priority);

        Ok(Self { rules: compiled })
    }

    pub fn empty() -> Self {
        Self::default()
    }

    /// Parse and validate a rule document (a JSON array of rules)
    pub fn from_json(json: &str) -> crate::Result<Self> {
        let rules: Vec<Rule> = serde_json::from_str(json)?;
        Ok(Self::load(rules)?)
    }

    /// Serialize the rules back into the document shape, in evaluation order
    pub fn to_json(&self) -> crate::Result<String> {
        Ok(serde_json::to_string_pretty(&self.to_rules())?)
    }

    /// First active rule whose conditions hold
    pub fn first_match(&self, facts: &FileFacts<'_>) -> Option<&CompiledRule> {
        self.rules
            .iter()
            .filter(|r| r.is_active())
            .find(|r| r.matches(facts))
    }

    pub fn iter(&self) -> impl Iterator<Item = &CompiledRule> {
        self.rules.iter()
    }

    pub fn to_rules(&self) -> Vec<Rule> {
        self.rules.iter().map(|r| r.rule.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}

/// Starter rules written to a fresh rules file, rooted at `base`
pub fn default_rules(base: &str) -> Vec<Rule> {
    let base = base.trim_end_matches('/');
    vec![
        Rule {
            name: "PDF Invoices to Finance".to_string(),
            priority: 10,
            active: true,
            when: Conditions {
                filename_regex: Some("invoice|bill|statement|receipt".to_string()),
                mime_in: Some(vec!["application/pdf".to_string()]),
                ..Default::default()
            },
            then: Actions {
                label: Some("finance".to_string()),
                tags_add: Some(vec!["invoice".to_string(), "pdf".to_string()]),
                move_to: Some(format!("{}/Finance/{{{{YYYY}}}}/{{{{MM}}}}", base)),
                rename_to: None,
            },
        },
        Rule {
            name: "Images to Media".to_string(),
            priority: 20,
            active: true,
            when: Conditions {
                mime_startswith: Some("image/".to_string()),
                ..Default::default()
            },
            then: Actions {
                label: Some("media".to_string()),
                tags_add: Some(vec!["image".to_string()]),
                move_to: Some(format!("{}/Media/Images/{{{{YYYY}}}}/{{{{MM}}}}", base)),
                rename_to: None,
            },
        },
        Rule {
            name: "PDF Documents".to_string(),
            priority: 30,
            active: true,
            when: Conditions {
                mime_in: Some(vec!["application/pdf".to_string()]),
                ..Default::default()
            },
            then: Actions {
                label: Some("documents".to_string()),
                tags_add: Some(vec!["pdf".to_string(), "document".to_string()]),
                move_to: Some(format!("{}/Documents/{{{{YYYY}}}}", base)),
                rename_to: None,
            },
        },
        Rule {
            name: "Code Files".to_string(),
            priority: 40,
            active: true,
            when: Conditions {
                filename_regex: Some(r"\.(py|js|html|css|java|cpp|c|h|php|rb|go|rs)$".to_string()),
                ..Default::default()
            },
            then: Actions {
                label: Some("code".to_string()),
                tags_add: Some(vec!["source-code".to_string()]),
                move_to: Some(format!("{}/Code/{{{{EXT}}}}", base)),
                rename_to: None,
            },
        },
    ]
}
