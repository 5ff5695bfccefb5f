// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 Jonathan D. A. Jewell <hyperpolymath>

//! Automata Undo Utility
//!
//! Moves organized files back to where they were found.

use anyhow::Context;
use clap::Parser;
use std::path::PathBuf;

use automata::config::{default_config_path, AppConfig};
use automata::db::Database;
use automata::history::{History, UndoStatus};

#[derive(Parser, Debug)]
#[command(name = "automata-undo")]
#[command(version)]
#[command(about = "Undo Automata file moves")]
struct Args {
    /// Path to configuration file (default: ~/.automata/config.json)
    #[arg(short = 'C', long)]
    config: Option<PathBuf>,

    /// Number of moves to undo (default: 1, use 0 for all)
    #[arg(short, long, default_value = "1")]
    count: usize,

    /// Dry run - show what would be undone without doing it
    #[arg(long)]
    dry_run: bool,

    /// List all entries in history
    #[arg(long)]
    list: bool,
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let config_path = args.config.unwrap_or_else(default_config_path);
    let config = AppConfig::load(&config_path)
        .with_context(|| format!("loading {}", config_path.display()))?;
    let history = History::new(PathBuf::from(&config.history.path));

    let entries = history.read_all().context("reading history")?;
    if entries.is_empty() {
        println!("No history entries found.");
        return Ok(());
    }

    if args.list {
        println!("Move History ({} entries):", entries.len());
        println!("{:-<80}", "");
        for (i, entry) in entries.iter().rev().enumerate() {
            println!(
                "{:3}. [{}] {} -> {}{}",
                i + 1,
                entry.timestamp.format("%Y-%m-%d %H:%M:%S"),
                entry.source.display(),
                entry.destination.display(),
                if entry.undone { " (undone)" } else { "" }
            );
            println!("     Label: {}  Rule: {}", entry.label, entry.rule.as_deref().unwrap_or("-"));
        }
        return Ok(());
    }

    let count = if args.count == 0 { entries.len() } else { args.count };
    let db = Database::open(&config.database.path)
        .with_context(|| format!("opening inventory {}", config.database.path))?;

    println!(
        "{}Undoing up to {} move(s)...",
        if args.dry_run { "[DRY RUN] " } else { "" },
        count
    );

    let outcomes = history.undo(count, args.dry_run, Some(&db))?;
    let mut undone = 0;
    let mut skipped = 0;

    for outcome in &outcomes {
        let entry = &outcome.entry;
        match outcome.status {
            UndoStatus::Restored => {
                println!("  Undone: {} -> {}", entry.destination.display(), entry.source.display());
                undone += 1;
            }
            UndoStatus::WouldRestore => {
                println!("  Would move: {} -> {}", entry.destination.display(), entry.source.display());
                undone += 1;
            }
            UndoStatus::Missing => {
                eprintln!("  Skip: {} (file not found, may have been moved/deleted)", entry.destination.display());
                skipped += 1;
            }
            UndoStatus::SourceOccupied => {
                eprintln!("  Skip: {} (original path already exists)", entry.source.display());
                skipped += 1;
            }
            UndoStatus::Failed(ref e) => {
                eprintln!("  Failed: {} ({})", entry.destination.display(), e);
                skipped += 1;
            }
        }
    }

    println!();
    if args.dry_run {
        println!("Dry run complete. {} move(s) would be undone.", undone);
    } else {
        println!("Done. {} undone, {} failed/skipped.", undone, skipped);
    }

    Ok(())
}
