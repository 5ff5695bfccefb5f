// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 Jonathan D. A. Jewell <hyperpolymath>

//! A real watcher feeding the pipeline into an in-memory inventory

use std::path::Path;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tempfile::TempDir;

use automata::classifier::Classifier;
use automata::db::Database;
use automata::history::History;
use automata::organizer::Organizer;
use automata::pipeline::Pipeline;
use automata::rules::RuleSet;
use automata::watcher::{DispatcherState, IgnoreList, WatchDispatcher};

const RULES: &str = r#"[
    {"name": "Notes", "priority": 5, "when": {"filename_regex": "\\.txt$"},
     "then": {"label": "documents", "tags_add": ["notes"], "move_to": "{{HOME}}/Organized/Notes"}}
]"#;

fn wait_for(path: &Path, timeout: Duration) -> bool {
    let start = Instant::now();
    while start.elapsed() < timeout {
        if path.exists() {
            return true;
        }
        thread::sleep(Duration::from_millis(50));
    }
    false
}

#[test]
fn test_watched_file_is_organized_and_recorded() {
    let dir = TempDir::new().unwrap();
    let inbox = dir.path().join("inbox");
    std::fs::create_dir_all(&inbox).unwrap();

    let db = Arc::new(Database::in_memory().unwrap().with_home(dir.path().to_path_buf()));
    let history = History::new(dir.path().join("history.jsonl"));
    let pipeline = Pipeline::new(
        Arc::new(Classifier::new(RuleSet::from_json(RULES).unwrap())),
        Organizer::with_home(dir.path().to_path_buf()),
        db.clone(),
    )
    .with_history(History::new(history.path().to_path_buf()));

    let dispatcher = WatchDispatcher::new(vec![inbox.clone()], IgnoreList::default(), Arc::new(pipeline))
        .with_debounce(Duration::from_millis(200));
    dispatcher.start().unwrap();
    assert_eq!(dispatcher.state(), DispatcherState::Running);

    std::fs::write(inbox.join("meeting.txt"), "agenda").unwrap();
    std::fs::write(inbox.join("download.txt.part"), "partial").unwrap();

    let destination = dir.path().join("Organized/Notes/meeting.txt");
    assert!(wait_for(&destination, Duration::from_secs(10)));
    // Recording happens right after the move
    thread::sleep(Duration::from_millis(300));
    dispatcher.stop();
    assert_eq!(dispatcher.state(), DispatcherState::Stopped);

    assert!(!inbox.join("meeting.txt").exists());
    assert!(inbox.join("download.txt.part").exists());

    let record = db.get_file(&destination).unwrap().unwrap();
    assert_eq!(record.label.as_deref(), Some("documents"));
    assert_eq!(record.tags, vec!["notes"]);

    let actions: Vec<String> = db.get_activity_log(10).unwrap().into_iter().map(|a| a.action).collect();
    assert!(actions.contains(&"file_organized".to_string()));
    assert!(actions.contains(&"file_added".to_string()));

    let journal = history.read_all().unwrap();
    assert_eq!(journal.len(), 1);
    assert_eq!(journal[0].destination, destination);

    let undone = history.undo(1, false, Some(db.as_ref())).unwrap();
    assert_eq!(undone.len(), 1);
    assert!(inbox.join("meeting.txt").exists());
    assert!(db.get_file(&inbox.join("meeting.txt")).unwrap().is_some());
}

#[test]
fn test_no_events_after_stop() {
    let dir = TempDir::new().unwrap();
    let db = Arc::new(Database::in_memory().unwrap());
    let pipeline = Pipeline::new(
        Arc::new(Classifier::new(RuleSet::from_json(RULES).unwrap())),
        Organizer::with_home(dir.path().to_path_buf()),
        db.clone(),
    );

    let dispatcher = WatchDispatcher::new(vec![dir.path().to_path_buf()], IgnoreList::default(), Arc::new(pipeline))
        .with_debounce(Duration::from_millis(100));
    dispatcher.start().unwrap();
    dispatcher.stop();

    std::fs::write(dir.path().join("late.txt"), "x").unwrap();
    thread::sleep(Duration::from_millis(500));

    assert!(dir.path().join("late.txt").exists());
    assert!(db.get_activity_log(10).unwrap().is_empty());
}

#[test]
fn test_organized_tree_inside_watch_root_is_not_reprocessed() {
    const RENAMING: &str = r#"[
        {"name": "Mark text", "priority": 1, "when": {"filename_regex": "\\.txt$"},
         "then": {"label": "documents", "move_to": "{{HOME}}/Org", "rename_to": "{{STEM}}_x{{EXT}}"}}
    ]"#;

    let dir = TempDir::new().unwrap();
    let inbox = dir.path().join("inbox");
    std::fs::create_dir_all(&inbox).unwrap();

    let db = Arc::new(Database::in_memory().unwrap());
    let history = History::new(dir.path().join("state/history.jsonl"));
    let pipeline = Pipeline::new(
        Arc::new(Classifier::new(RuleSet::from_json(RENAMING).unwrap())),
        Organizer::with_home(dir.path().to_path_buf()),
        db.clone(),
    )
    .with_history(History::new(history.path().to_path_buf()));

    let dispatcher = WatchDispatcher::new(vec![dir.path().to_path_buf()], IgnoreList::default(), Arc::new(pipeline))
        .with_debounce(Duration::from_millis(150));
    dispatcher.start().unwrap();

    std::fs::write(inbox.join("a.txt"), "x").unwrap();

    let destination = dir.path().join("Org/a_x.txt");
    assert!(wait_for(&destination, Duration::from_secs(10)));
    // Long enough for any follow-up events to settle several times over
    thread::sleep(Duration::from_millis(1500));
    dispatcher.stop();

    let mut organized: Vec<String> = std::fs::read_dir(dir.path().join("Org"))
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
        .collect();
    organized.sort();
    assert_eq!(organized, vec!["a_x.txt"]);
    assert_eq!(history.read_all().unwrap().len(), 1);
    assert!(db.get_file(&destination).unwrap().is_some());
}
