// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 Jonathan D. A. Jewell <hyperpolymath>

//! End-to-end behaviour of classification, organizing and debouncing

use chrono::{NaiveDate, NaiveDateTime};
use std::path::{Path, PathBuf};
use std::sync::mpsc::channel;
use std::sync::Mutex;
use std::thread;
use std::time::Duration;
use tempfile::TempDir;

use automata::classifier::Classifier;
use automata::debounce::{DebounceGate, EventKey, EventKind, DEFAULT_DEBOUNCE};
use automata::organizer::Organizer;
use automata::rules::RuleSet;
use automata::template;

const INVOICE_RULES: &str = r#"[
    {
        "name": "PDF Invoices",
        "priority": 10,
        "when": {"filename_regex": "invoice", "mime_in": ["application/pdf"]},
        "then": {"label": "finance", "move_to": "{{HOME}}/Organized/Finance/{{YYYY}}"}
    }
]"#;

fn jan_2024() -> NaiveDateTime {
    NaiveDate::from_ymd_opt(2024, 1, 15)
        .unwrap()
        .and_hms_opt(12, 0, 0)
        .unwrap()
}

fn invoice(dir: &TempDir) -> PathBuf {
    let inbox = dir.path().join("Downloads");
    std::fs::create_dir_all(&inbox).unwrap();
    let file = inbox.join("invoice_jan.pdf");
    std::fs::write(&file, vec![b'%'; 1024]).unwrap();
    file
}

#[test]
fn test_invoice_rule_files_pdf_by_year() {
    let dir = TempDir::new().unwrap();
    let file = invoice(&dir);
    let classifier = Classifier::new(RuleSet::from_json(INVOICE_RULES).unwrap());
    let organizer = Organizer::with_home(dir.path().to_path_buf());

    let classification = classifier.classify(&file);
    assert_eq!(classification.label, "finance");
    assert_eq!(classification.confidence, 0.9);
    assert_eq!(classification.rule_matched.as_deref(), Some("PDF Invoices"));
    assert_eq!(classification.metadata["size_bytes"], 1024);

    let result = organizer.organize_at(&file, &classification, jan_2024());
    let expected = dir.path().join("Organized/Finance/2024/invoice_jan.pdf");
    assert!(result.moved);
    assert_eq!(result.final_destination_path, expected);
    assert!(expected.is_file());
}

#[test]
fn test_occupied_destination_gets_first_free_suffix() {
    let dir = TempDir::new().unwrap();
    let file = invoice(&dir);
    let year_dir = dir.path().join("Organized/Finance/2024");
    std::fs::create_dir_all(&year_dir).unwrap();
    std::fs::write(year_dir.join("invoice_jan.pdf"), "already here").unwrap();

    let classifier = Classifier::new(RuleSet::from_json(INVOICE_RULES).unwrap());
    let organizer = Organizer::with_home(dir.path().to_path_buf());
    let classification = classifier.classify(&file);

    let result = organizer.organize_at(&file, &classification, jan_2024());
    assert_eq!(result.final_destination_path, year_dir.join("invoice_jan_1.pdf"));
    assert_eq!(
        std::fs::read_to_string(year_dir.join("invoice_jan.pdf")).unwrap(),
        "already here"
    );
}

#[test]
fn test_png_without_rules_falls_back_to_media() {
    let dir = TempDir::new().unwrap();
    let file = dir.path().join("photo.png");
    std::fs::write(&file, [0x89, b'P', b'N', b'G']).unwrap();

    let classification = Classifier::new(RuleSet::empty()).classify(&file);

    assert_eq!(classification.label, "media");
    assert_eq!(classification.mime_type.as_deref(), Some("image/png"));
    assert_eq!(classification.confidence, 0.5);
    assert_eq!(
        classification.tags.into_iter().collect::<Vec<_>>(),
        vec!["auto-classified".to_string(), "image".to_string()]
    );
    assert!(classification.rule_matched.is_none());
}

#[test]
fn test_rapid_created_events_settle_once_with_latest() {
    let (tx, rx) = channel();
    let tx = Mutex::new(tx);
    let gate = DebounceGate::new(DEFAULT_DEBOUNCE, move |key: EventKey, payload: (PathBuf, u32)| {
        let _ = tx.lock().unwrap().send((key, payload));
    })
    .unwrap();

    let path = PathBuf::from("/home/user/Downloads/report.pdf");
    let key = EventKey::new(EventKind::Created, path.clone());
    for seq in 1..=3 {
        gate.submit(key.clone(), (path.clone(), seq));
        thread::sleep(Duration::from_millis(150));
    }

    let (settled_key, (settled_path, seq)) = rx.recv_timeout(DEFAULT_DEBOUNCE * 3).unwrap();
    assert_eq!(settled_key, key);
    assert_eq!(settled_path, path);
    assert_eq!(seq, 3);
    assert!(rx.recv_timeout(Duration::from_millis(500)).is_err());
}

#[test]
fn test_ext_placeholder_is_last_suffix_only() {
    let expanded = template::expand_with_home(
        "{{HOME}}/X/{{EXT}}",
        Path::new("/inbox/archive.tar.gz"),
        jan_2024(),
        Path::new("/home/user"),
    );
    assert_eq!(expanded, "/home/user/X/.gz");
}

#[test]
fn test_dry_run_predicts_real_destination() {
    let dir = TempDir::new().unwrap();
    let file = invoice(&dir);
    let classifier = Classifier::new(RuleSet::from_json(INVOICE_RULES).unwrap());
    let organizer = Organizer::with_home(dir.path().to_path_buf());
    let classification = classifier.classify(&file);

    let plan = organizer.dry_run_at(&file, &classification, jan_2024());
    assert!(file.exists());

    let result = organizer.organize_at(&file, &classification, jan_2024());
    assert_eq!(plan.destination, Some(result.final_destination_path));
}
