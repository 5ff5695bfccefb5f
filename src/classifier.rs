// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 Jonathan D. A. Jewell <hyperpolymath>

//! Rule-based file classifier with fallback heuristics

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::Path;
use std::sync::{Arc, RwLock};
use tracing::{debug, warn};

use crate::config::ConfigSource;
use crate::mime;
use crate::rules::{FileFacts, RuleSet, DEFAULT_LABEL};
use crate::Result;

/// Confidence reported when a rule matched
pub const RULE_CONFIDENCE: f64 = 0.9;
/// Confidence reported for fallback heuristics
pub const FALLBACK_CONFIDENCE: f64 = 0.5;
/// Confidence reported when the file could not be inspected
pub const FAILURE_CONFIDENCE: f64 = 0.0;

/// Tag added by every fallback heuristic except the last resort
pub const AUTO_TAG: &str = "auto-classified";

const FINANCE_KEYWORDS: &[&str] = &[
    "invoice", "bill", "statement", "receipt", "transaction",
    "bank", "credit", "debit", "payment", "expense",
];
const DOCUMENT_EXTENSIONS: &[&str] = &["pdf", "doc", "docx", "txt", "rtf"];
const CODE_EXTENSIONS: &[&str] = &[
    "py", "js", "html", "css", "java", "cpp", "c", "h",
    "php", "rb", "go", "rs", "swift", "kt",
];
const ARCHIVE_EXTENSIONS: &[&str] = &["zip", "rar", "tar", "gz", "7z"];

/// Outcome of classifying one file
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Classification {
    pub label: String,
    pub tags: BTreeSet<String>,
    pub mime_type: Option<String>,
    /// 0.9 for a rule match, 0.5 for fallback, 0.0 on failure
    pub confidence: f64,
    /// filename, extension and size of the file
    pub metadata: serde_json::Value,
    /// Name of the rule that matched; `None` for fallback
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rule_matched: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub move_to: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rename_to: Option<String>,
    /// Why the file could not be inspected
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Classification {
    pub fn is_failure(&self) -> bool {
        self.error.is_some()
    }

    pub fn is_fallback(&self) -> bool {
        self.rule_matched.is_none() && self.error.is_none()
    }
}

/// The parts of a file's stat the classifier looks at
#[derive(Debug, Clone, Copy)]
pub struct FileStat {
    pub size: u64,
}

impl FileStat {
    pub fn of(path: &Path) -> std::io::Result<Self> {
        let meta = std::fs::metadata(path)?;
        Ok(Self { size: meta.len() })
    }
}

/// Classifies files against the current rule set.
///
/// The rule set is swapped as a whole; classifications already in flight keep the set
/// they started with.
pub struct Classifier {
    rules: RwLock<Arc<RuleSet>>,
}

impl Classifier {
    pub fn new(rules: RuleSet) -> Self {
        Self {
            rules: RwLock::new(Arc::new(rules)),
        }
    }

    /// Snapshot of the active rule set
    pub fn rules(&self) -> Arc<RuleSet> {
        match self.rules.read() {
            Ok(guard) => Arc::clone(&guard),
            Err(poisoned) => Arc::clone(&poisoned.into_inner()),
        }
    }

    /// Swap in a new rule set
    pub fn replace_rules(&self, rules: RuleSet) {
        let rules = Arc::new(rules);
        match self.rules.write() {
            Ok(mut guard) => *guard = rules,
            Err(poisoned) => *poisoned.into_inner() = rules,
        }
    }

    /// Re-read rules from `source`. On an invalid rule the previous set stays active.
    pub fn reload(&self, source: &dyn ConfigSource) -> Result<usize> {
        let loaded = source.get_rules().and_then(|rules| Ok(RuleSet::load(rules)?));
        match loaded {
            Ok(set) => {
                let count = set.len();
                self.replace_rules(set);
                debug!("Loaded {} rules", count);
                Ok(count)
            }
            Err(e) => {
                warn!("Keeping previous rules, reload failed: {}", e);
                Err(e)
            }
        }
    }

    /// Classify a file on disk
    pub fn classify(&self, path: &Path) -> Classification {
        self.classify_stat(path, FileStat::of(path))
    }

    /// Classify a file given its stat (or the error obtaining it)
    pub fn classify_stat(&self, path: &Path, stat: std::io::Result<FileStat>) -> Classification {
        let mime_type = mime::resolve(path);

        let stat = match stat {
            Ok(stat) => stat,
            Err(e) => {
                warn!("Cannot classify {:?}: {}", path, e);
                return Classification {
                    label: DEFAULT_LABEL.to_string(),
                    tags: BTreeSet::new(),
                    mime_type: Some(mime_type),
                    confidence: FAILURE_CONFIDENCE,
                    metadata: serde_json::json!({}),
                    rule_matched: None,
                    move_to: None,
                    rename_to: None,
                    error: Some(e.to_string()),
                };
            }
        };

        let filename = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let extension = mime::extension_of(path);

        let metadata = serde_json::json!({
            "filename": filename,
            "extension": extension.as_ref().map(|e| format!(".{}", e)).unwrap_or_default(),
            "size_bytes": stat.size,
        });

        let rules = self.rules();
        let facts = FileFacts {
            path,
            filename: &filename,
            mime_type: Some(&mime_type),
            size: stat.size,
        };

        if let Some(rule) = rules.first_match(&facts) {
            debug!("Rule matched: {} for {:?}", rule.name(), path);
            let then = &rule.rule().then;
            return Classification {
                label: then.label.clone().unwrap_or_else(|| DEFAULT_LABEL.to_string()),
                tags: then.tags_add.iter().flatten().cloned().collect(),
                mime_type: Some(mime_type),
                confidence: RULE_CONFIDENCE,
                metadata,
                rule_matched: Some(rule.name().to_string()),
                move_to: then.move_to.clone(),
                rename_to: then.rename_to.clone(),
                error: None,
            };
        }

        let (label, tags) = fallback(&filename, Some(&mime_type), extension.as_deref());
        debug!("File classified by fallback: {:?} -> {}", path, label);

        Classification {
            label: label.to_string(),
            tags: tags.iter().map(|t| t.to_string()).collect(),
            mime_type: Some(mime_type),
            confidence: FALLBACK_CONFIDENCE,
            metadata,
            rule_matched: None,
            move_to: None,
            rename_to: None,
            error: None,
        }
    }
}

/// Heuristic label and tags for files no rule matched. First match wins.
pub fn fallback(
    filename: &str,
    mime_type: Option<&str>,
    extension: Option<&str>,
) -> (&'static str, &'static [&'static str]) {
    let name = filename.to_lowercase();
    if FINANCE_KEYWORDS.iter().any(|k| name.contains(k)) {
        return ("finance", &[AUTO_TAG]);
    }

    let mime = mime_type.unwrap_or("");
    if mime.starts_with("image/") {
        return ("media", &["image", AUTO_TAG]);
    }
    if mime.starts_with("video/") {
        return ("media", &["video", AUTO_TAG]);
    }
    if mime.starts_with("audio/") {
        return ("media", &["audio", AUTO_TAG]);
    }

    let ext = extension.map(str::to_ascii_lowercase).unwrap_or_default();
    if DOCUMENT_EXTENSIONS.contains(&ext.as_str()) {
        return ("documents", &["document", AUTO_TAG]);
    }
    if CODE_EXTENSIONS.contains(&ext.as_str()) {
        return ("code", &["source-code", AUTO_TAG]);
    }
    if ARCHIVE_EXTENSIONS.contains(&ext.as_str()) {
        return ("archives", &["archive", AUTO_TAG]);
    }

    (DEFAULT_LABEL, &["unclassified"])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rules::{Actions, Conditions, Rule};
    use std::io;
    use std::path::PathBuf;

    fn stat(size: u64) -> io::Result<FileStat> {
        Ok(FileStat { size })
    }

    fn invoice_rule(name: &str, priority: i32) -> Rule {
        Rule {
            name: name.to_string(),
            priority,
            active: true,
            when: Conditions {
                filename_regex: Some("invoice".to_string()),
                mime_in: Some(vec!["application/pdf".to_string()]),
                ..Default::default()
            },
            then: Actions {
                label: Some("finance".to_string()),
                tags_add: None,
                move_to: Some("{{HOME}}/Organized/Finance/{{YYYY}}".to_string()),
                rename_to: None,
            },
        }
    }

    #[test]
    fn test_rule_match_builds_classification() {
        let classifier = Classifier::new(RuleSet::load(vec![invoice_rule("PDF Invoices", 10)]).unwrap());
        let c = classifier.classify_stat(Path::new("/dl/invoice_jan.pdf"), stat(1024));

        assert_eq!(c.label, "finance");
        assert_eq!(c.confidence, RULE_CONFIDENCE);
        assert_eq!(c.rule_matched.as_deref(), Some("PDF Invoices"));
        assert_eq!(c.mime_type.as_deref(), Some("application/pdf"));
        assert_eq!(c.move_to.as_deref(), Some("{{HOME}}/Organized/Finance/{{YYYY}}"));
        assert!(c.tags.is_empty());
        assert_eq!(c.metadata["size_bytes"], 1024);
        assert_eq!(c.metadata["extension"], ".pdf");
    }

    #[test]
    fn test_lower_priority_value_wins() {
        let set = RuleSet::load(vec![invoice_rule("B", 50), invoice_rule("A", 5)]).unwrap();
        let c = Classifier::new(set).classify_stat(Path::new("/dl/invoice.pdf"), stat(1));
        assert_eq!(c.rule_matched.as_deref(), Some("A"));
    }

    #[test]
    fn test_label_defaults_to_other() {
        let mut rule = invoice_rule("no label", 1);
        rule.then = Actions::default();
        let c = Classifier::new(RuleSet::load(vec![rule]).unwrap())
            .classify_stat(Path::new("/dl/invoice.pdf"), stat(1));
        assert_eq!(c.label, "other");
        assert_eq!(c.confidence, RULE_CONFIDENCE);
    }

    #[test]
    fn test_fallback_image() {
        let c = Classifier::new(RuleSet::empty()).classify_stat(Path::new("/dl/photo.png"), stat(10));
        assert_eq!(c.label, "media");
        assert_eq!(c.confidence, FALLBACK_CONFIDENCE);
        assert!(c.rule_matched.is_none());
        let tags: Vec<_> = c.tags.iter().map(String::as_str).collect();
        assert_eq!(tags, ["auto-classified", "image"]);
    }

    #[test]
    fn test_fallback_order() {
        assert_eq!(fallback("bank_photo.png", Some("image/png"), Some("png")).0, "finance");
        assert_eq!(fallback("notes.txt", Some("text/plain"), Some("txt")).0, "documents");
        assert_eq!(fallback("main.rs", Some("text/x-rust"), Some("rs")).0, "code");
        assert_eq!(fallback("backup.7z", None, Some("7z")).0, "archives");
        assert_eq!(fallback("song.flac", Some("audio/flac"), Some("flac")).1, &["audio", AUTO_TAG]);

        let (label, tags) = fallback("blob.bin", Some("application/octet-stream"), Some("bin"));
        assert_eq!(label, "other");
        assert_eq!(tags, &["unclassified"]);
    }

    #[test]
    fn test_fallback_is_deterministic() {
        let first = fallback("Report.DOCX", Some("application/msword"), Some("docx"));
        for _ in 0..10 {
            assert_eq!(fallback("Report.DOCX", Some("application/msword"), Some("docx")), first);
        }
    }

    #[test]
    fn test_stat_failure_yields_zero_confidence() {
        let c = Classifier::new(RuleSet::empty()).classify_stat(
            Path::new("/gone/invoice.pdf"),
            Err(io::Error::new(io::ErrorKind::NotFound, "vanished")),
        );
        assert_eq!(c.label, "other");
        assert_eq!(c.confidence, FAILURE_CONFIDENCE);
        assert!(c.tags.is_empty());
        assert!(c.is_failure());
    }

    #[test]
    fn test_missing_file_on_disk_is_a_failure() {
        let c = Classifier::new(RuleSet::empty()).classify(&PathBuf::from("/definitely/not/here.pdf"));
        assert!(c.is_failure());
    }

    struct FixedSource(Vec<Rule>);

    impl ConfigSource for FixedSource {
        fn get_rules(&self) -> Result<Vec<Rule>> {
            Ok(self.0.clone())
        }

        fn get_watch_paths(&self) -> Result<Vec<PathBuf>> {
            Ok(Vec::new())
        }
    }

    #[test]
    fn test_reload_keeps_last_good_rules() {
        let classifier = Classifier::new(RuleSet::load(vec![invoice_rule("good", 1)]).unwrap());

        let mut broken = invoice_rule("broken", 1);
        broken.when.filename_regex = Some("(".to_string());
        assert!(classifier.reload(&FixedSource(vec![broken])).is_err());
        assert_eq!(classifier.rules().iter().next().unwrap().name(), "good");

        assert_eq!(classifier.reload(&FixedSource(Vec::new())).unwrap(), 0);
        assert!(classifier.rules().is_empty());
    }
}
