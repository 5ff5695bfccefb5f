// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 Jonathan D. A. Jewell <hyperpolymath>

//! Automata: local desktop automation hub
//!
//! Watches folders, classifies new files against user rules and files them into an
//! organized tree, keeping an inventory and an undoable move journal.

use clap::{Parser, Subcommand};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::signal;
use tracing::{info, warn};

use automata::classifier::Classifier;
use automata::config::{default_config_path, AppConfig, ConfigManager, ConfigSource};
use automata::db::Database;
use automata::history::{History, UndoStatus};
use automata::organizer::{create_organized_structure, Organizer};
use automata::pipeline::Pipeline;
use automata::rules::{default_rules, Rule, RuleSet};
use automata::watcher::{existing_files, IgnoreList, WatchDispatcher};
use automata::{logging, template, AutomataError, Result};

/// Automata CLI - rule-based file organizer
#[derive(Parser, Debug)]
#[command(name = "automata")]
#[command(author = "Jonathan D. A. Jewell <hyperpolymath>")]
#[command(version)]
#[command(about = "Watches folders and files new documents away by rule", long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Path to configuration file (default: ~/.automata/config.json)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose logging (debug level)
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Enable trace logging (most verbose)
    #[arg(long, global = true)]
    trace: bool,

    /// Output format for results
    #[arg(long, global = true, default_value = "text", value_parser = ["text", "json"])]
    format: String,

    /// Suppress non-essential output (quiet mode)
    #[arg(short, long, global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Watch directories and organize new files as they settle
    Watch {
        /// Directories to watch (overrides config)
        #[arg(short, long)]
        dir: Vec<PathBuf>,

        /// Process existing files in the directories on startup
        #[arg(long)]
        process_existing: bool,
    },

    /// Show how a file would be classified
    Classify {
        path: PathBuf,
    },

    /// Organize a file or every file in a directory
    Organize {
        path: PathBuf,

        /// Show destinations without moving anything
        #[arg(long)]
        dry_run: bool,

        /// Descend into subdirectories
        #[arg(short, long)]
        recursive: bool,
    },

    /// Rule management
    Rules {
        #[command(subcommand)]
        action: RulesCommands,
    },

    /// Inventory queries
    Inventory {
        #[command(subcommand)]
        action: InventoryCommands,
    },

    /// History and undo operations
    History {
        #[command(subcommand)]
        action: HistoryCommands,
    },

    /// Configuration management
    Config {
        #[command(subcommand)]
        action: ConfigCommands,
    },

    /// Create configuration, default rules and the organized folder tree
    Init {
        /// Root of the organized tree
        #[arg(short, long)]
        base: Option<PathBuf>,

        /// Overwrite existing configuration and rules
        #[arg(long)]
        force: bool,
    },
}

#[derive(Subcommand, Debug)]
enum RulesCommands {
    /// List rules in evaluation order
    List,

    /// Check every rule compiles
    Validate,

    /// Write the rules document to a file ("-" for stdout)
    Export {
        output: PathBuf,
    },

    /// Replace all rules with a rules document
    Import {
        input: PathBuf,
    },

    /// Append a rule given as a JSON object
    Add {
        rule: String,
    },

    /// Replace the rule at INDEX (as shown by `rules list`) with a JSON object
    Update {
        index: usize,
        rule: String,
    },

    /// Delete the rule at INDEX (as shown by `rules list`)
    Remove {
        index: usize,
    },

    /// Show which rule matches a file and where it would go
    Test {
        path: PathBuf,
    },
}

#[derive(Subcommand, Debug)]
enum InventoryCommands {
    /// Show inventory statistics
    Stats,

    /// Most recently recorded files
    Recent {
        #[arg(short, long, default_value = "10")]
        limit: usize,
    },

    /// Search files by path or label
    Search {
        /// Search query (matches path or label)
        query: Option<String>,

        /// Exact label
        #[arg(long)]
        label: Option<String>,

        /// Tag the file must carry
        #[arg(long)]
        tag: Option<String>,

        #[arg(short, long, default_value = "50")]
        limit: usize,
    },

    /// Recent activity, newest first
    Activity {
        #[arg(short, long, default_value = "20")]
        limit: usize,
    },

    /// File count per label
    Categories,

    /// Vacuum database (reclaim space)
    Vacuum,
}

#[derive(Subcommand, Debug)]
enum HistoryCommands {
    /// List recent history entries
    List {
        /// Number of entries to show
        #[arg(long, default_value = "10")]
        count: usize,
    },

    /// Move recently organized files back
    Undo {
        /// Number of moves to undo
        #[arg(long, default_value = "1")]
        count: usize,

        /// Dry run (show what would be undone)
        #[arg(long)]
        dry_run: bool,
    },

    /// Clear all history
    Clear {
        /// Skip confirmation prompt
        #[arg(long)]
        force: bool,
    },
}

#[derive(Subcommand, Debug)]
enum ConfigCommands {
    /// Show current configuration
    Show,

    /// Generate default configuration file
    Generate {
        /// Output file path
        #[arg(short, long, default_value = "config.json")]
        output: PathBuf,
    },

    /// Validate configuration and rules
    Validate,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let manager = ConfigManager::new(cli.config.clone().unwrap_or_else(default_config_path));
    let config = manager.config()?;

    let level = logging::level_for(cli.trace, cli.verbose, cli.quiet, &config.logging.level);
    logging::init(level, config.logging.file.as_deref().map(Path::new))?;

    let json = cli.format == "json";

    match cli.command {
        Some(Commands::Watch { dir, process_existing }) => {
            run_watch(&manager, config, dir, process_existing).await
        }
        Some(Commands::Classify { path }) => run_classify(&manager, &path, json),
        Some(Commands::Organize { path, dry_run, recursive }) => {
            run_organize(&manager, config, &path, dry_run, recursive, json)
        }
        Some(Commands::Rules { action }) => run_rules_command(&manager, action, json),
        Some(Commands::Inventory { action }) => run_inventory_command(config, action, json),
        Some(Commands::History { action }) => run_history_command(config, action, json),
        Some(Commands::Config { action }) => run_config_command(&manager, config, action),
        Some(Commands::Init { base, force }) => run_init(&manager, base, force),
        None => run_watch(&manager, config, vec![], false).await,
    }
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Classifier with the configured rules, or no rules if they fail to load
fn load_classifier(manager: &ConfigManager) -> Classifier {
    let classifier = Classifier::new(RuleSet::empty());
    match classifier.reload(manager) {
        Ok(count) => info!("Loaded {} rules", count),
        Err(e) => warn!("Running without rules: {}", e),
    }
    classifier
}

fn build_pipeline(manager: &ConfigManager, config: &AppConfig) -> Result<Pipeline> {
    manager.ensure_rules()?;
    let classifier = Arc::new(load_classifier(manager));

    let db = Database::open(&config.database.path)?;
    info!("Database initialized: {}", config.database.path);

    Ok(Pipeline::new(classifier, Organizer::new(), Arc::new(db))
        .with_history(History::new(PathBuf::from(&config.history.path))))
}

/// Run the watch mode (main loop)
async fn run_watch(
    manager: &ConfigManager,
    config: AppConfig,
    dir_overrides: Vec<PathBuf>,
    process_existing: bool,
) -> Result<()> {
    let roots = if dir_overrides.is_empty() {
        manager.get_watch_paths()?
    } else {
        dir_overrides
    };
    info!("Watch directories: {:?}", roots);

    let pipeline = Arc::new(build_pipeline(manager, &config)?);
    let ignore = config.watcher.ignore_list()?;

    if process_existing {
        info!("Processing existing files...");
        for file in existing_files(&roots, &ignore) {
            pipeline.process_created(&file);
        }
    }

    let classifier = Arc::clone(pipeline.classifier());
    let dispatcher = WatchDispatcher::new(roots, ignore, pipeline)
        .with_debounce(config.watcher.debounce());
    dispatcher.start()?;

    info!("Watching. Press Ctrl+C to stop.");
    wait_for_shutdown(&classifier, manager).await;

    dispatcher.stop();
    info!("Automata stopped.");
    Ok(())
}

/// Block until Ctrl+C or SIGTERM; SIGHUP reloads the rules
async fn wait_for_shutdown(classifier: &Classifier, manager: &ConfigManager) {
    #[cfg(unix)]
    {
        use signal::unix::{signal as unix_signal, SignalKind};

        let (mut terminate, mut hangup) =
            match (unix_signal(SignalKind::terminate()), unix_signal(SignalKind::hangup())) {
                (Ok(terminate), Ok(hangup)) => (terminate, hangup),
                _ => {
                    warn!("Failed to install SIGTERM/SIGHUP handlers");
                    if let Err(e) = signal::ctrl_c().await {
                        warn!("Failed to wait for Ctrl+C: {}", e);
                    }
                    return;
                }
            };

        loop {
            tokio::select! {
                result = signal::ctrl_c() => {
                    if let Err(e) = result {
                        warn!("Failed to wait for Ctrl+C: {}", e);
                    }
                    info!("Received Ctrl+C, shutting down...");
                    break;
                }
                _ = terminate.recv() => {
                    info!("Received SIGTERM, shutting down...");
                    break;
                }
                _ = hangup.recv() => {
                    info!("Received SIGHUP, reloading rules");
                    let _ = classifier.reload(manager);
                }
            }
        }
    }

    #[cfg(not(unix))]
    {
        let _ = (classifier, manager);
        if let Err(e) = signal::ctrl_c().await {
            warn!("Failed to wait for Ctrl+C: {}", e);
        }
        info!("Received Ctrl+C, shutting down...");
    }
}

fn run_classify(manager: &ConfigManager, path: &Path, json: bool) -> Result<()> {
    let classification = load_classifier(manager).classify(path);

    if json {
        return print_json(&classification);
    }

    println!("{}", path.display());
    println!("  Label:      {}", classification.label);
    println!("  Tags:       {}", classification.tags.iter().cloned().collect::<Vec<_>>().join(", "));
    println!("  MIME type:  {}", classification.mime_type.as_deref().unwrap_or("-"));
    println!("  Confidence: {:.0}%", classification.confidence * 100.0);
    println!("  Rule:       {}", classification.rule_matched.as_deref().unwrap_or("(fallback)"));
    if let Some(ref e) = classification.error {
        println!("  Error:      {}", e);
    }
    Ok(())
}

/// Files to organize: `path` itself, or the non-ignored files inside it
fn collect_files(path: &Path, recursive: bool, ignore: &IgnoreList) -> Result<Vec<PathBuf>> {
    if !path.is_dir() {
        return Ok(vec![path.to_path_buf()]);
    }

    let mut files = if recursive {
        existing_files(&[path.to_path_buf()], ignore)
    } else {
        std::fs::read_dir(path)?
            .filter_map(|e| e.ok())
            .map(|e| e.path())
            .filter(|p| p.is_file() && ignore.should_process(p))
            .collect()
    };
    files.sort();
    Ok(files)
}

fn run_organize(
    manager: &ConfigManager,
    config: AppConfig,
    path: &Path,
    dry_run: bool,
    recursive: bool,
    json: bool,
) -> Result<()> {
    let files = collect_files(path, recursive, &config.watcher.ignore_list()?)?;
    let pipeline = build_pipeline(manager, &config)?;

    if dry_run {
        let previews: Vec<_> = files.iter().map(|f| pipeline.preview(f)).collect();
        if json {
            return print_json(&previews);
        }
        for preview in &previews {
            match preview.plan.destination {
                Some(ref dest) => println!(
                    "Would move: {} -> {}{}",
                    preview.plan.source.display(),
                    dest.display(),
                    if preview.plan.renamed_for_conflict { " (renamed)" } else { "" }
                ),
                None => println!("Would keep: {} [{}]", preview.plan.source.display(), preview.plan.label),
            }
        }
        return Ok(());
    }

    let mut results = Vec::new();
    let mut failed = 0;
    for file in &files {
        let Some(outcome) = pipeline.process_created(file) else {
            continue;
        };
        let error = outcome
            .classification
            .error
            .clone()
            .or_else(|| outcome.organize.as_ref().and_then(|o| o.error.as_ref()).map(|e| e.to_string()));
        if error.is_some() {
            failed += 1;
        }
        let moved = outcome.organize.as_ref().is_some_and(|o| o.moved);

        if !json {
            match error {
                Some(ref e) => eprintln!("Failed: {} ({})", file.display(), e),
                None if moved => println!("Moved: {} -> {}", file.display(), outcome.final_path(file).display()),
                None => println!("Kept: {} [{}]", file.display(), outcome.classification.label),
            }
        }

        results.push(serde_json::json!({
            "source": file,
            "destination": outcome.final_path(file),
            "moved": moved,
            "label": outcome.classification.label,
            "rule": outcome.classification.rule_matched,
            "error": error,
        }));
    }

    if json {
        print_json(&results)
    } else {
        println!("\nProcessed {} files, {} failed", results.len(), failed);
        Ok(())
    }
}

fn run_rules_command(manager: &ConfigManager, action: RulesCommands, json: bool) -> Result<()> {
    match action {
        RulesCommands::List => {
            let document = manager.get_rules()?;
            let rules = RuleSet::load(document.clone())?;
            if json {
                return print_json(&rules.to_rules());
            }
            // Evaluation order, labelled with each rule's position in the document
            let mut ordered: Vec<(usize, &Rule)> = document.iter().enumerate().collect();
            ordered.sort_by_key(|(_, rule)| rule.priority);
            println!("Rules ({}):", rules.len());
            for (index, rule) in ordered {
                println!(
                    "  [{}] {:>5}  {}{}  -> {}  {}",
                    index,
                    rule.priority,
                    rule.name,
                    if rule.active { "" } else { " [inactive]" },
                    rule.then.label.as_deref().unwrap_or("other"),
                    rule.then.move_to.as_deref().unwrap_or(""),
                );
            }
        }
        RulesCommands::Validate => {
            let rules = RuleSet::load(manager.get_rules()?)?;
            for compiled in rules.iter() {
                let then = &compiled.rule().then;
                for text in [then.move_to.as_deref(), then.rename_to.as_deref()].into_iter().flatten() {
                    for unknown in template::unknown_placeholders(text) {
                        warn!("Rule '{}' uses unknown placeholder {} (kept literally)", compiled.name(), unknown);
                    }
                }
            }
            println!("{} rules are valid", rules.len());
        }
        RulesCommands::Export { output } => {
            let document = manager.export_rules()?;
            if output == Path::new("-") {
                println!("{}", document);
            } else {
                std::fs::write(&output, document)?;
                println!("Exported rules to {:?}", output);
            }
        }
        RulesCommands::Import { input } => {
            let document = std::fs::read_to_string(&input)?;
            let count = manager.import_rules(&document)?;
            println!("Imported {} rules from {:?}", count, input);
        }
        RulesCommands::Add { rule } => {
            let rule: Rule = serde_json::from_str(&rule)?;
            let name = rule.name.clone();
            manager.add_rule(rule)?;
            println!("Added rule '{}'", name);
        }
        RulesCommands::Update { index, rule } => {
            let rule: Rule = serde_json::from_str(&rule)?;
            if !manager.update_rule(index, rule)? {
                return Err(AutomataError::Config(format!("No rule at index {}", index)));
            }
            println!("Updated rule {}", index);
        }
        RulesCommands::Remove { index } => {
            if !manager.delete_rule(index)? {
                return Err(AutomataError::Config(format!("No rule at index {}", index)));
            }
            println!("Removed rule {}", index);
        }
        RulesCommands::Test { path } => {
            let classifier = load_classifier(manager);
            let classification = classifier.classify(&path);
            let plan = Organizer::new().dry_run(&path, &classification);
            if json {
                return print_json(&plan);
            }
            println!("{}", path.display());
            println!("  Rule:        {}", classification.rule_matched.as_deref().unwrap_or("(none, fallback)"));
            println!("  Label:       {}", classification.label);
            match plan.destination {
                Some(dest) => println!("  Destination: {}", dest.display()),
                None => println!("  Destination: (stays in place)"),
            }
        }
    }

    Ok(())
}

/// Run inventory commands
fn run_inventory_command(config: AppConfig, action: InventoryCommands, json: bool) -> Result<()> {
    let db = Database::open(&config.database.path)?;

    match action {
        InventoryCommands::Stats => {
            let stats = db.get_stats()?;
            if json {
                return print_json(&stats);
            }
            println!("Inventory Statistics:");
            println!("  Files: {}", stats.total_files);
            println!("  Added today: {}", stats.files_today);
            println!("  Labels: {}", stats.unique_labels);
        }
        InventoryCommands::Recent { limit } => {
            let files = db.get_recent_files(limit)?;
            if json {
                return print_json(&files);
            }
            for file in files {
                println!("  {}  [{}]  {}", file.created_at, file.label.as_deref().unwrap_or("-"), file.path);
            }
        }
        InventoryCommands::Search { query, label, tag, limit } => {
            let files = db.search_files(query.as_deref(), label.as_deref(), tag.as_deref(), limit)?;
            if json {
                return print_json(&files);
            }
            println!("Search results ({}):", files.len());
            for file in files {
                println!("  [{}] {}  {}", file.label.as_deref().unwrap_or("-"), file.path, file.tags.join(", "));
            }
        }
        InventoryCommands::Activity { limit } => {
            let entries = db.get_activity_log(limit)?;
            if json {
                return print_json(&entries);
            }
            for entry in entries {
                println!("  {}  {:<22} {:<8} {}", entry.timestamp, entry.action, entry.status, entry.file_path);
            }
        }
        InventoryCommands::Categories => {
            let distribution = db.get_category_distribution()?;
            if json {
                let map: serde_json::Map<String, serde_json::Value> =
                    distribution.into_iter().map(|(label, count)| (label, count.into())).collect();
                return print_json(&map);
            }
            println!("Categories:");
            for (label, count) in distribution {
                println!("  {} ({} files)", label, count);
            }
        }
        InventoryCommands::Vacuum => {
            db.vacuum()?;
            println!("Database vacuumed successfully");
        }
    }

    Ok(())
}

/// Run history commands
fn run_history_command(config: AppConfig, action: HistoryCommands, json: bool) -> Result<()> {
    let history = History::new(PathBuf::from(&config.history.path));

    match action {
        HistoryCommands::List { count } => {
            let entries = history.get_recent(count)?;
            if json {
                return print_json(&entries);
            }
            println!("Recent history ({} entries):", entries.len());
            for entry in entries {
                let status = if entry.undone { "[UNDONE]" } else { "" };
                println!("  {} {} -> {} {}",
                    entry.timestamp.format("%Y-%m-%d %H:%M"),
                    entry.source.display(),
                    entry.destination.display(),
                    status
                );
            }
        }
        HistoryCommands::Undo { count, dry_run } => {
            let db = Database::open(&config.database.path)?;
            let outcomes = history.undo(count, dry_run, Some(&db))?;

            if outcomes.is_empty() {
                println!("No moves to undo");
                return Ok(());
            }

            for outcome in outcomes {
                let entry = &outcome.entry;
                match outcome.status {
                    UndoStatus::Restored => println!("Undone: {} -> {}", entry.destination.display(), entry.source.display()),
                    UndoStatus::WouldRestore => println!("Would undo: {} -> {}", entry.destination.display(), entry.source.display()),
                    UndoStatus::Missing => eprintln!("Skip: {} (file not found)", entry.destination.display()),
                    UndoStatus::SourceOccupied => eprintln!("Skip: {} (original path already exists)", entry.source.display()),
                    UndoStatus::Failed(e) => eprintln!("Failed: {} ({})", entry.destination.display(), e),
                }
            }
        }
        HistoryCommands::Clear { force } => {
            if !force {
                eprintln!("Use --force to confirm clearing history");
                return Ok(());
            }
            history.clear()?;
            println!("History cleared");
        }
    }

    Ok(())
}

/// Run config commands
fn run_config_command(manager: &ConfigManager, config: AppConfig, action: ConfigCommands) -> Result<()> {
    match action {
        ConfigCommands::Show => print_json(&config)?,
        ConfigCommands::Generate { output } => {
            AppConfig::default().save(&output)?;
            println!("Generated config at {:?}", output);
        }
        ConfigCommands::Validate => {
            config.watcher.ignore_list()?;
            let rules = RuleSet::load(manager.get_rules()?)?;

            println!("Configuration at {:?} is valid", manager.config_path());
            println!("  Rules: {} ({})", rules.len(), config.rules_file);
            for root in config.watch_paths() {
                let marker = if root.is_dir() { "ok" } else { "missing" };
                println!("  Watch path: {} ({})", root.display(), marker);
            }
            println!("  Database: {}", config.database.path);
        }
    }

    Ok(())
}

/// Initialize configuration, rules and the organized tree
fn run_init(manager: &ConfigManager, base: Option<PathBuf>, force: bool) -> Result<()> {
    if manager.config_path().exists() && !force {
        return Err(AutomataError::Config(format!(
            "{} already exists. Use --force to overwrite",
            manager.config_path().display()
        )));
    }

    let mut config = AppConfig::default();
    if let Some(base) = base {
        config.organize_base_path = base.to_string_lossy().into_owned();
    }
    manager.save_config(&config)?;
    manager.save_rules(&default_rules(&config.organize_base_path))?;
    let folders = create_organized_structure(Path::new(&config.organize_base_path))?;

    println!("Automata initialized");
    println!("\nCreated:");
    println!("  - {}", manager.config_path().display());
    println!("  - {}", config.rules_file);
    for folder in folders.values() {
        println!("  - {}", folder.display());
    }
    println!("\nNext steps:");
    println!("  1. Review rules: automata rules list");
    println!("  2. Start watching: automata watch");

    Ok(())
}
