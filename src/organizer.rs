// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 Jonathan D. A. Jewell <hyperpolymath>

//! Moves classified files into the organized tree

use chrono::{Local, NaiveDateTime};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::fs::{self, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::classifier::Classification;
use crate::template::{self, home_dir};

/// Numbered candidates tried before giving up on a free destination name
pub const MAX_CONFLICT_ATTEMPTS: u32 = 1000;

/// Times a move is retried when the chosen name is taken between resolving and moving
const MAX_RACE_RETRIES: u32 = 3;

/// Why a file could not be organized. The file stays at its original path.
#[derive(Error, Debug)]
pub enum OrganizeError {
    #[error("{path:?} has no file name")]
    NoFileName { path: PathBuf },

    #[error("cannot create {path:?}: {source}")]
    CreateDir {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("cannot move {from:?} to {to:?}: {source}")]
    Move {
        from: PathBuf,
        to: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("no free file name near {path:?} after {} attempts", MAX_CONFLICT_ATTEMPTS)]
    ConflictResolutionExhausted { path: PathBuf },
}

/// What happened to one file
#[derive(Debug)]
pub struct OrganizeResult {
    pub source_path: PathBuf,
    /// Where the file is now; equals `source_path` unless `moved`
    pub final_destination_path: PathBuf,
    pub moved: bool,
    pub error: Option<OrganizeError>,
}

impl OrganizeResult {
    fn stayed(source: &Path, error: Option<OrganizeError>) -> Self {
        Self {
            source_path: source.to_path_buf(),
            final_destination_path: source.to_path_buf(),
            moved: false,
            error,
        }
    }
}

/// What [`Organizer::organize_at`] would do, without touching the filesystem
#[derive(Debug, Clone, Serialize)]
pub struct DryRunResult {
    pub source: PathBuf,
    pub would_move: bool,
    pub destination: Option<PathBuf>,
    /// The templated destination was taken, so a numbered name was chosen
    pub renamed_for_conflict: bool,
    pub label: String,
    pub tags: BTreeSet<String>,
    pub rule_matched: Option<String>,
}

fn occupied(path: &Path) -> bool {
    fs::symlink_metadata(path).is_ok()
}

/// First free variant of `destination`: itself, then `stem_1.ext`, `stem_2.ext`, ...
///
/// Gives back `destination` unchanged after [`MAX_CONFLICT_ATTEMPTS`] taken candidates;
/// the move step then refuses to overwrite it.
pub fn resolve_conflict(destination: &Path) -> PathBuf {
    if !occupied(destination) {
        return destination.to_path_buf();
    }

    let parent = destination.parent().unwrap_or_else(|| Path::new(""));
    let stem = destination
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let suffix = destination
        .extension()
        .map(|e| format!(".{}", e.to_string_lossy()))
        .unwrap_or_default();

    for counter in 1..=MAX_CONFLICT_ATTEMPTS {
        let candidate = parent.join(format!("{}_{}{}", stem, counter, suffix));
        if !occupied(&candidate) {
            return candidate;
        }
    }

    warn!("Too many filename conflicts for {:?}", destination);
    destination.to_path_buf()
}

/// Expands rule templates and moves files
#[derive(Debug, Clone)]
pub struct Organizer {
    home: PathBuf,
}

impl Default for Organizer {
    fn default() -> Self {
        Self::new()
    }
}

impl Organizer {
    pub fn new() -> Self {
        Self { home: home_dir() }
    }

    /// Organizer expanding `{{HOME}}` to `home`
    pub fn with_home(home: PathBuf) -> Self {
        Self { home }
    }

    /// Templated destination before conflict resolution, or `None` when nothing moves.
    ///
    /// `move_to` names the directory; the file name is the expanded `rename_to`, or the
    /// source file name. Relative directories are taken relative to the source's folder.
    pub fn planned_destination(
        &self,
        source: &Path,
        classification: &Classification,
        now: NaiveDateTime,
    ) -> Option<Result<PathBuf, OrganizeError>> {
        let move_to = classification.move_to.as_deref()?;

        let dir = PathBuf::from(template::expand_with_home(move_to, source, now, &self.home));
        let dir = if dir.is_relative() {
            source.parent().unwrap_or_else(|| Path::new("")).join(dir)
        } else {
            dir
        };

        let name = classification
            .rename_to
            .as_deref()
            .map(|t| template::expand_with_home(t, source, now, &self.home))
            .filter(|n| !n.trim().is_empty())
            .map(PathBuf::from)
            .or_else(|| source.file_name().map(PathBuf::from));

        Some(match name {
            Some(name) => Ok(dir.join(name)),
            None => Err(OrganizeError::NoFileName { path: source.to_path_buf() }),
        })
    }

    /// Organize `source` now
    pub fn organize(&self, source: &Path, classification: &Classification) -> OrganizeResult {
        self.organize_at(source, classification, Local::now().naive_local())
    }

    /// Organize `source` as if the clock read `now`
    pub fn organize_at(
        &self,
        source: &Path,
        classification: &Classification,
        now: NaiveDateTime,
    ) -> OrganizeResult {
        let planned = match self.planned_destination(source, classification, now) {
            None => return OrganizeResult::stayed(source, None),
            Some(Err(e)) => return self.failed(source, e),
            Some(Ok(path)) => path,
        };

        if planned == source {
            debug!("File already in place: {:?}", source);
            return OrganizeResult::stayed(source, None);
        }

        if let Some(dir) = planned.parent() {
            if let Err(source_err) = fs::create_dir_all(dir) {
                return self.failed(source, OrganizeError::CreateDir {
                    path: dir.to_path_buf(),
                    source: source_err,
                });
            }
        }

        let mut destination = resolve_conflict(&planned);
        for _ in 0..=MAX_RACE_RETRIES {
            match move_no_clobber(source, &destination) {
                Ok(()) => {
                    info!("File organized: {:?} -> {:?}", source, destination);
                    return OrganizeResult {
                        source_path: source.to_path_buf(),
                        final_destination_path: destination,
                        moved: true,
                        error: None,
                    };
                }
                Err(MoveFailure::Io(e)) => {
                    return self.failed(source, OrganizeError::Move {
                        from: source.to_path_buf(),
                        to: destination,
                        source: e,
                    });
                }
                Err(MoveFailure::Taken) => {
                    // Resolution only hands back an occupied path once every candidate is taken
                    let next = resolve_conflict(&planned);
                    if occupied(&next) {
                        break;
                    }
                    debug!("Destination {:?} was taken, retrying with {:?}", destination, next);
                    destination = next;
                }
            }
        }

        self.failed(source, OrganizeError::ConflictResolutionExhausted { path: planned })
    }

    /// Same expansion and conflict resolution as [`Self::organize_at`], nothing written
    pub fn dry_run_at(
        &self,
        source: &Path,
        classification: &Classification,
        now: NaiveDateTime,
    ) -> DryRunResult {
        let planned = self
            .planned_destination(source, classification, now)
            .and_then(|p| p.ok())
            .filter(|p| p != source);
        let destination = planned.as_deref().map(resolve_conflict);

        DryRunResult {
            source: source.to_path_buf(),
            would_move: destination.is_some(),
            renamed_for_conflict: destination.is_some() && destination != planned,
            destination,
            label: classification.label.clone(),
            tags: classification.tags.clone(),
            rule_matched: classification.rule_matched.clone(),
        }
    }

    pub fn dry_run(&self, source: &Path, classification: &Classification) -> DryRunResult {
        self.dry_run_at(source, classification, Local::now().naive_local())
    }

    fn failed(&self, source: &Path, e: OrganizeError) -> OrganizeResult {
        error!("Error organizing file {:?}: {}", source, e);
        OrganizeResult::stayed(source, Some(e))
    }
}

enum MoveFailure {
    /// The destination exists; nothing was changed
    Taken,
    Io(io::Error),
}

impl From<io::Error> for MoveFailure {
    fn from(e: io::Error) -> Self {
        if e.kind() == io::ErrorKind::AlreadyExists {
            Self::Taken
        } else {
            Self::Io(e)
        }
    }
}

/// Move a file without ever replacing an existing destination.
///
/// A plain rename within a filesystem, so watchers see a move rather than a new file.
/// Across filesystems the file is copied with exclusive create and the source removed.
fn move_no_clobber(from: &Path, to: &Path) -> Result<(), MoveFailure> {
    if occupied(to) {
        return Err(MoveFailure::Taken);
    }

    match rename_no_replace(from, to) {
        Ok(()) => Ok(()),
        Err(e) if is_cross_device(&e) => {
            debug!("{:?} and {:?} are on different filesystems, copying", from, to);
            copy_then_remove(from, to)
        }
        Err(e) => Err(e.into()),
    }
}

#[cfg(all(target_os = "linux", target_env = "gnu"))]
fn rename_no_replace(from: &Path, to: &Path) -> io::Result<()> {
    use nix::errno::Errno;
    use nix::fcntl::{renameat2, RenameFlags};

    match renameat2(None, from, None, to, RenameFlags::RENAME_NOREPLACE) {
        Ok(()) => Ok(()),
        // Filesystem without RENAME_NOREPLACE; the occupied check above still applies
        Err(Errno::EINVAL) | Err(Errno::ENOSYS) => fs::rename(from, to),
        Err(errno) => Err(errno.into()),
    }
}

#[cfg(not(all(target_os = "linux", target_env = "gnu")))]
fn rename_no_replace(from: &Path, to: &Path) -> io::Result<()> {
    fs::rename(from, to)
}

#[cfg(unix)]
fn is_cross_device(e: &io::Error) -> bool {
    e.raw_os_error() == Some(nix::errno::Errno::EXDEV as i32)
}

#[cfg(windows)]
fn is_cross_device(e: &io::Error) -> bool {
    // ERROR_NOT_SAME_DEVICE
    e.raw_os_error() == Some(17)
}

#[cfg(not(any(unix, windows)))]
fn is_cross_device(_e: &io::Error) -> bool {
    false
}

fn copy_then_remove(from: &Path, to: &Path) -> Result<(), MoveFailure> {
    let mut input = fs::File::open(from).map_err(MoveFailure::Io)?;
    let permissions = input.metadata().map_err(MoveFailure::Io)?.permissions();
    let mut output = OpenOptions::new().write(true).create_new(true).open(to)?;

    let copied = io::copy(&mut input, &mut output)
        .and_then(|_| output.sync_all())
        .and_then(|_| fs::set_permissions(to, permissions));
    if let Err(e) = copied {
        drop(output);
        let _ = fs::remove_file(to);
        return Err(MoveFailure::Io(e));
    }

    if let Err(e) = fs::remove_file(from) {
        let _ = fs::remove_file(to);
        return Err(MoveFailure::Io(e));
    }
    Ok(())
}

/// Create the default category folders under `base`
pub fn create_organized_structure(base: &Path) -> crate::Result<BTreeMap<String, PathBuf>> {
    let folders = [
        ("finance", "Finance"),
        ("documents", "Documents"),
        ("media", "Media"),
        ("code", "Code"),
        ("archives", "Archives"),
        ("other", "Other"),
    ];

    let mut created = BTreeMap::new();
    for (label, name) in folders {
        let path = base.join(name);
        fs::create_dir_all(&path)?;
        info!("Created folder: {:?}", path);
        created.insert(label.to_string(), path);
    }
    Ok(created)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use tempfile::TempDir;

    fn jan_2024() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 1, 15).unwrap().and_hms_opt(9, 30, 0).unwrap()
    }

    fn classification(move_to: Option<&str>, rename_to: Option<&str>) -> Classification {
        Classification {
            label: "finance".to_string(),
            tags: BTreeSet::new(),
            mime_type: Some("application/pdf".to_string()),
            confidence: 0.9,
            metadata: serde_json::json!({}),
            rule_matched: Some("PDF Invoices".to_string()),
            move_to: move_to.map(String::from),
            rename_to: rename_to.map(String::from),
            error: None,
        }
    }

    fn setup() -> (TempDir, Organizer, PathBuf) {
        let dir = TempDir::new().unwrap();
        let home = dir.path().join("home");
        let inbox = dir.path().join("inbox");
        fs::create_dir_all(&inbox).unwrap();
        let file = inbox.join("invoice_jan.pdf");
        fs::write(&file, vec![0u8; 1024]).unwrap();
        (dir, Organizer::with_home(home), file)
    }

    #[test]
    fn test_resolve_conflict_free_path_is_unchanged() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("a.txt");
        assert_eq!(resolve_conflict(&path), path);
    }

    #[test]
    fn test_resolve_conflict_smallest_free_suffix() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("a.txt");
        fs::write(&path, "x").unwrap();
        fs::write(dir.path().join("a_1.txt"), "x").unwrap();
        fs::write(dir.path().join("a_3.txt"), "x").unwrap();

        assert_eq!(resolve_conflict(&path), dir.path().join("a_2.txt"));
    }

    #[test]
    fn test_resolve_conflict_without_extension() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("README");
        fs::write(&path, "x").unwrap();
        assert_eq!(resolve_conflict(&path), dir.path().join("README_1"));
    }

    #[test]
    fn test_resolve_conflict_gives_up_after_bound() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("f.log");
        fs::write(&path, "x").unwrap();
        for i in 1..=MAX_CONFLICT_ATTEMPTS {
            fs::write(dir.path().join(format!("f_{}.log", i)), "x").unwrap();
        }
        assert_eq!(resolve_conflict(&path), path);
    }

    #[test]
    fn test_no_move_to_leaves_file() {
        let (_dir, organizer, file) = setup();
        let result = organizer.organize_at(&file, &classification(None, None), jan_2024());
        assert!(!result.moved);
        assert!(result.error.is_none());
        assert_eq!(result.final_destination_path, file);
        assert!(file.exists());
    }

    #[test]
    fn test_moves_into_expanded_directory() {
        let (dir, organizer, file) = setup();
        let c = classification(Some("{{HOME}}/Organized/Finance/{{YYYY}}"), None);

        let result = organizer.organize_at(&file, &c, jan_2024());
        let expected = dir.path().join("home/Organized/Finance/2024/invoice_jan.pdf");

        assert!(result.moved, "{:?}", result.error);
        assert_eq!(result.final_destination_path, expected);
        assert!(expected.exists());
        assert!(!file.exists());
        assert_eq!(fs::read(&expected).unwrap().len(), 1024);
    }

    #[test]
    fn test_occupied_destination_gets_numbered() {
        let (dir, organizer, file) = setup();
        let target_dir = dir.path().join("home/Organized/Finance/2024");
        fs::create_dir_all(&target_dir).unwrap();
        fs::write(target_dir.join("invoice_jan.pdf"), "older").unwrap();

        let c = classification(Some("{{HOME}}/Organized/Finance/{{YYYY}}"), None);
        let result = organizer.organize_at(&file, &c, jan_2024());

        assert!(result.moved);
        assert_eq!(result.final_destination_path, target_dir.join("invoice_jan_1.pdf"));
        assert_eq!(fs::read_to_string(target_dir.join("invoice_jan.pdf")).unwrap(), "older");
    }

    #[test]
    fn test_rename_to_template() {
        let (dir, organizer, file) = setup();
        let c = classification(Some("{{HOME}}/F"), Some("{{YYYY}}-{{MM}}_{{STEM}}{{EXT}}"));

        let result = organizer.organize_at(&file, &c, jan_2024());
        assert_eq!(result.final_destination_path, dir.path().join("home/F/2024-01_invoice_jan.pdf"));
    }

    #[test]
    fn test_missing_source_stays_put() {
        let (dir, organizer, file) = setup();
        fs::remove_file(&file).unwrap();

        let result = organizer.organize_at(&file, &classification(Some("{{HOME}}/F"), None), jan_2024());
        assert!(!result.moved);
        assert!(matches!(result.error, Some(OrganizeError::Move { .. })));
        assert_eq!(result.final_destination_path, file);
        assert!(!dir.path().join("home/F/invoice_jan.pdf").exists());
    }

    #[test]
    fn test_uncreatable_directory_is_reported() {
        let (dir, organizer, file) = setup();
        fs::write(dir.path().join("blocker"), "file, not dir").unwrap();
        let template = format!("{}/blocker/sub", dir.path().display());

        let result = organizer.organize_at(&file, &classification(Some(&template), None), jan_2024());
        assert!(!result.moved);
        assert!(matches!(result.error, Some(OrganizeError::CreateDir { .. })));
        assert!(file.exists());
    }

    #[test]
    fn test_exhausted_conflicts_never_overwrite() {
        let (dir, organizer, file) = setup();
        let target_dir = dir.path().join("home/F");
        fs::create_dir_all(&target_dir).unwrap();
        fs::write(target_dir.join("invoice_jan.pdf"), "keep").unwrap();
        for i in 1..=MAX_CONFLICT_ATTEMPTS {
            fs::write(target_dir.join(format!("invoice_jan_{}.pdf", i)), "keep").unwrap();
        }

        let result = organizer.organize_at(&file, &classification(Some("{{HOME}}/F"), None), jan_2024());
        assert!(!result.moved);
        assert!(matches!(result.error, Some(OrganizeError::ConflictResolutionExhausted { .. })));
        assert_eq!(fs::read_to_string(target_dir.join("invoice_jan.pdf")).unwrap(), "keep");
        assert!(file.exists());
    }

    #[test]
    fn test_dry_run_matches_real_run() {
        let (dir, organizer, file) = setup();
        let target_dir = dir.path().join("home/F/2024/01");
        fs::create_dir_all(&target_dir).unwrap();
        fs::write(target_dir.join("invoice_jan.pdf"), "older").unwrap();
        let c = classification(Some("{{HOME}}/F/{{YYYY}}/{{MM}}"), None);

        let preview = organizer.dry_run_at(&file, &c, jan_2024());
        assert!(file.exists());
        assert!(preview.would_move);
        assert!(preview.renamed_for_conflict);

        let result = organizer.organize_at(&file, &c, jan_2024());
        assert_eq!(preview.destination, Some(result.final_destination_path));
    }

    #[test]
    fn test_dry_run_without_move_to() {
        let (_dir, organizer, file) = setup();
        let preview = organizer.dry_run_at(&file, &classification(None, None), jan_2024());
        assert!(!preview.would_move);
        assert!(preview.destination.is_none());
        assert_eq!(preview.rule_matched.as_deref(), Some("PDF Invoices"));
    }

    #[test]
    fn test_file_already_in_place_is_not_renumbered() {
        let (dir, organizer, file) = setup();
        let c = classification(Some("{{HOME}}/F"), None);
        let first = organizer.organize_at(&file, &c, jan_2024());
        assert!(first.moved);

        let second = organizer.organize_at(&first.final_destination_path, &c, jan_2024());
        assert!(!second.moved);
        assert!(second.error.is_none());
        assert_eq!(second.final_destination_path, dir.path().join("home/F/invoice_jan.pdf"));
        assert!(!organizer.dry_run_at(&second.final_destination_path, &c, jan_2024()).would_move);
    }

    #[test]
    fn test_move_keeps_the_same_inode() {
        let (dir, organizer, file) = setup();
        let before = fs::metadata(&file).unwrap();

        let result = organizer.organize_at(&file, &classification(Some("{{HOME}}/F"), None), jan_2024());
        assert!(result.moved, "{:?}", result.error);

        let after = fs::metadata(dir.path().join("home/F/invoice_jan.pdf")).unwrap();
        #[cfg(unix)]
        {
            use std::os::unix::fs::MetadataExt;
            assert_eq!(before.ino(), after.ino());
            assert_eq!(after.nlink(), 1);
        }
        assert_eq!(before.len(), after.len());
    }

    #[test]
    fn test_move_no_clobber_refuses_taken_name() {
        let dir = TempDir::new().unwrap();
        let from = dir.path().join("a.txt");
        let to = dir.path().join("b.txt");
        fs::write(&from, "new").unwrap();
        fs::write(&to, "old").unwrap();

        assert!(matches!(move_no_clobber(&from, &to), Err(MoveFailure::Taken)));
        assert_eq!(fs::read_to_string(&to).unwrap(), "old");
        assert!(from.exists());
    }

    #[test]
    fn test_create_organized_structure() {
        let dir = TempDir::new().unwrap();
        let created = create_organized_structure(dir.path()).unwrap();
        assert_eq!(created.len(), 6);
        assert!(dir.path().join("Finance").is_dir());
        assert_eq!(created["other"], dir.path().join("Other"));
    }
}
