// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 Jonathan D. A. Jewell <hyperpolymath>

//! Database module for the file inventory and activity log

use chrono::Local;
use rusqlite::{params, Connection, Row};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tracing::{error, info};

use crate::inventory::{ActivityStatus, Inventory};
use crate::template::home_dir;
use crate::{AutomataError, Result};

const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.3f";

/// Database manager for Automata (thread-safe wrapper)
#[derive(Clone)]
pub struct Database {
    conn: Arc<Mutex<Connection>>,
    home: PathBuf,
}

/// A file tracked in the inventory
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileRecord {
    pub id: String,
    pub path: String,
    pub relative_path: Option<String>,
    pub content_hash: Option<String>,
    pub size_bytes: i64,
    pub created_at: String,
    pub modified_at: Option<String>,
    pub mime_type: Option<String>,
    pub label: Option<String>,
    pub tags: Vec<String>,
    pub metadata: serde_json::Value,
}

/// One row of the activity log
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActivityEntry {
    pub timestamp: String,
    pub action: String,
    pub file_path: String,
    pub details: serde_json::Value,
    pub status: String,
}

/// Database statistics
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DbStats {
    pub total_files: i64,
    pub files_today: i64,
    pub unique_labels: i64,
}

fn now() -> String {
    Local::now().naive_local().format(TIMESTAMP_FORMAT).to_string()
}

fn absolute(path: &Path) -> Result<PathBuf> {
    if path.is_absolute() {
        Ok(path.to_path_buf())
    } else {
        Ok(std::env::current_dir()?.join(path))
    }
}

/// Inventory id: derived from the absolute path
pub fn file_id(path: &Path) -> String {
    blake3::hash(path.to_string_lossy().as_bytes()).to_hex().to_string()
}

/// blake3 digest of the file contents
pub fn content_hash(path: &Path) -> Result<String> {
    let mut file = File::open(path)?;
    let mut hasher = blake3::Hasher::new();
    std::io::copy(&mut file, &mut hasher)?;
    Ok(hasher.finalize().to_hex().to_string())
}

fn row_to_record(row: &Row<'_>) -> rusqlite::Result<FileRecord> {
    let tags: Option<String> = row.get(9)?;
    let metadata: Option<String> = row.get(10)?;
    Ok(FileRecord {
        id: row.get(0)?,
        path: row.get(1)?,
        relative_path: row.get(2)?,
        content_hash: row.get(3)?,
        size_bytes: row.get::<_, Option<i64>>(4)?.unwrap_or(0),
        created_at: row.get(5)?,
        modified_at: row.get(6)?,
        mime_type: row.get(7)?,
        label: row.get(8)?,
        tags: tags
            .and_then(|t| serde_json::from_str(&t).ok())
            .unwrap_or_default(),
        metadata: metadata
            .and_then(|m| serde_json::from_str(&m).ok())
            .unwrap_or_else(|| serde_json::json!({})),
    })
}

const RECORD_COLUMNS: &str = "id, abs_path, rel_path, content_hash, size_bytes, created_at, \
     modified_at, mime_type, label, tags, meta_json";

impl Database {
    /// Open or create the database
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        if let Some(parent) = path.as_ref().parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        Self::with_connection(Connection::open(path)?)
    }

    /// Open an in-memory database (for testing)
    pub fn in_memory() -> Result<Self> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> Result<Self> {
        let db = Self {
            conn: Arc::new(Mutex::new(conn)),
            home: home_dir(),
        };
        db.initialize()?;
        Ok(db)
    }

    /// Relative paths are recorded against `home`
    pub fn with_home(mut self, home: PathBuf) -> Self {
        self.home = home;
        self
    }

    fn lock_conn(&self) -> Result<std::sync::MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| AutomataError::Inventory("Database lock poisoned".to_string()))
    }

    /// Initialize database schema
    fn initialize(&self) -> Result<()> {
        let conn = self.lock_conn()?;
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS inventory (
                id TEXT PRIMARY KEY,
                abs_path TEXT NOT NULL UNIQUE,
                rel_path TEXT,
                content_hash TEXT,
                size_bytes INTEGER,
                created_at TEXT NOT NULL,
                modified_at TEXT,
                mime_type TEXT,
                label TEXT,
                tags TEXT DEFAULT '[]',
                meta_json TEXT DEFAULT '{}'
            );

            CREATE TABLE IF NOT EXISTS activity_log (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                timestamp TEXT NOT NULL,
                action TEXT NOT NULL,
                file_path TEXT,
                details TEXT DEFAULT '{}',
                status TEXT NOT NULL DEFAULT 'success'
            );

            CREATE INDEX IF NOT EXISTS idx_inventory_label ON inventory(label);
            CREATE INDEX IF NOT EXISTS idx_inventory_created ON inventory(created_at);
            CREATE INDEX IF NOT EXISTS idx_activity_timestamp ON activity_log(timestamp);
        "#,
        )?;
        Ok(())
    }

    fn relative(&self, path: &Path) -> Option<String> {
        path.strip_prefix(&self.home)
            .ok()
            .map(|p| p.to_string_lossy().into_owned())
    }

    fn insert_file(
        &self,
        path: &Path,
        label: &str,
        tags: &BTreeSet<String>,
        mime_type: Option<&str>,
        metadata: &serde_json::Value,
    ) -> Result<String> {
        let abs = absolute(path)?;
        let stat = std::fs::metadata(&abs)?;
        if !stat.is_file() {
            return Err(AutomataError::Inventory(format!("Not a file: {}", abs.display())));
        }

        let id = file_id(&abs);
        let hash = content_hash(&abs)?;
        let modified = stat
            .modified()
            .ok()
            .map(|m| chrono::DateTime::<Local>::from(m).naive_local().format(TIMESTAMP_FORMAT).to_string());

        let conn = self.lock_conn()?;
        conn.execute(
            r#"INSERT OR REPLACE INTO inventory
               (id, abs_path, rel_path, content_hash, size_bytes, created_at, modified_at, mime_type, label, tags, meta_json)
               VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)"#,
            params![
                id,
                abs.to_string_lossy(),
                self.relative(&abs),
                hash,
                stat.len() as i64,
                now(),
                modified,
                mime_type,
                label,
                serde_json::to_string(tags)?,
                serde_json::to_string(metadata)?,
            ],
        )?;
        Ok(id)
    }

    /// Look up a tracked file by path
    pub fn get_file(&self, path: &Path) -> Result<Option<FileRecord>> {
        let abs = absolute(path)?;
        let conn = self.lock_conn()?;
        let sql = format!("SELECT {} FROM inventory WHERE abs_path = ?1", RECORD_COLUMNS);
        match conn.query_row(&sql, params![abs.to_string_lossy()], row_to_record) {
            Ok(record) => Ok(Some(record)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Search files by path or label substring, exact label and tag
    pub fn search_files(
        &self,
        query: Option<&str>,
        label: Option<&str>,
        tag: Option<&str>,
        limit: usize,
    ) -> Result<Vec<FileRecord>> {
        let mut sql = format!("SELECT {} FROM inventory WHERE 1=1", RECORD_COLUMNS);
        let mut values: Vec<String> = Vec::new();

        if let Some(query) = query.filter(|q| !q.is_empty()) {
            values.push(format!("%{}%", query));
            sql.push_str(&format!(" AND (abs_path LIKE ?{0} OR label LIKE ?{0})", values.len()));
        }
        if let Some(label) = label {
            values.push(label.to_string());
            sql.push_str(&format!(" AND label = ?{}", values.len()));
        }
        if let Some(tag) = tag {
            values.push(format!("%{}%", serde_json::to_string(tag)?));
            sql.push_str(&format!(" AND tags LIKE ?{}", values.len()));
        }
        sql.push_str(&format!(" ORDER BY created_at DESC, rowid DESC LIMIT {}", limit));

        let conn = self.lock_conn()?;
        let mut stmt = conn.prepare(&sql)?;
        let files = stmt
            .query_map(rusqlite::params_from_iter(values.iter()), row_to_record)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(files)
    }

    /// Most recently recorded files
    pub fn get_recent_files(&self, limit: usize) -> Result<Vec<FileRecord>> {
        self.search_files(None, None, None, limit)
    }

    /// Get database statistics
    pub fn get_stats(&self) -> Result<DbStats> {
        let conn = self.lock_conn()?;
        let total_files: i64 = conn.query_row("SELECT COUNT(*) FROM inventory", [], |row| row.get(0))?;
        let today = Local::now().date_naive().format("%Y-%m-%d").to_string();
        let files_today: i64 = conn.query_row(
            "SELECT COUNT(*) FROM inventory WHERE DATE(created_at) = ?1",
            params![today],
            |row| row.get(0),
        )?;
        let unique_labels: i64 = conn.query_row(
            "SELECT COUNT(DISTINCT label) FROM inventory WHERE label IS NOT NULL",
            [],
            |row| row.get(0),
        )?;
        Ok(DbStats {
            total_files,
            files_today,
            unique_labels,
        })
    }

    /// File count per label, largest first
    pub fn get_category_distribution(&self) -> Result<Vec<(String, i64)>> {
        let conn = self.lock_conn()?;
        let mut stmt = conn.prepare(
            r#"SELECT COALESCE(label, 'other'), COUNT(*) AS cnt
               FROM inventory GROUP BY label ORDER BY cnt DESC, label"#,
        )?;
        let stats = stmt
            .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?)))?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(stats)
    }

    /// Newest activity first
    pub fn get_activity_log(&self, limit: usize) -> Result<Vec<ActivityEntry>> {
        let conn = self.lock_conn()?;
        let mut stmt = conn.prepare(
            r#"SELECT timestamp, action, file_path, details, status
               FROM activity_log ORDER BY id DESC LIMIT ?1"#,
        )?;
        let entries = stmt
            .query_map(params![limit as i64], |row| {
                let details: Option<String> = row.get(3)?;
                Ok(ActivityEntry {
                    timestamp: row.get(0)?,
                    action: row.get(1)?,
                    file_path: row.get::<_, Option<String>>(2)?.unwrap_or_default(),
                    details: details
                        .and_then(|d| serde_json::from_str(&d).ok())
                        .unwrap_or_else(|| serde_json::json!({})),
                    status: row.get(4)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(entries)
    }

    /// Vacuum database
    pub fn vacuum(&self) -> Result<()> {
        let conn = self.lock_conn()?;
        conn.execute("VACUUM", [])?;
        Ok(())
    }
}

impl Inventory for Database {
    fn record_file(
        &self,
        path: &Path,
        label: &str,
        tags: &BTreeSet<String>,
        mime_type: Option<&str>,
        metadata: &serde_json::Value,
    ) -> Result<String> {
        match self.insert_file(path, label, tags, mime_type, metadata) {
            Ok(id) => {
                let size = metadata.get("size_bytes").cloned().unwrap_or(serde_json::Value::Null);
                self.log_activity(
                    "file_added",
                    path,
                    serde_json::json!({ "label": label, "tags": tags, "size": size }),
                    ActivityStatus::Success,
                )?;
                info!("File added to inventory: {:?}", path);
                Ok(id)
            }
            Err(e) => {
                error!("Error adding file to inventory: {}", e);
                self.log_activity(
                    "file_add_failed",
                    path,
                    serde_json::json!({ "error": e.to_string() }),
                    ActivityStatus::Error,
                )?;
                Err(e)
            }
        }
    }

    fn update_location(&self, old: &Path, new: &Path) -> Result<()> {
        let old_abs = absolute(old)?;
        let new_abs = absolute(new)?;
        let updated = {
            let mut conn = self.lock_conn()?;
            let tx = conn.transaction()?;
            // A row already at the new path describes a file the move replaced
            if new_abs != old_abs {
                tx.execute(
                    "DELETE FROM inventory WHERE abs_path = ?1",
                    params![new_abs.to_string_lossy()],
                )?;
            }
            let updated = tx.execute(
                r#"UPDATE inventory SET id = ?1, abs_path = ?2, rel_path = ?3, modified_at = ?4
                   WHERE abs_path = ?5"#,
                params![
                    file_id(&new_abs),
                    new_abs.to_string_lossy(),
                    self.relative(&new_abs),
                    now(),
                    old_abs.to_string_lossy(),
                ],
            )?;
            tx.commit()?;
            updated
        };

        self.log_activity(
            "file_moved",
            old,
            serde_json::json!({ "new_path": new_abs, "tracked": updated > 0 }),
            ActivityStatus::Success,
        )?;
        info!("File location updated: {:?} -> {:?}", old, new);
        Ok(())
    }

    fn log_activity(
        &self,
        action: &str,
        path: &Path,
        details: serde_json::Value,
        status: ActivityStatus,
    ) -> Result<()> {
        let conn = self.lock_conn()?;
        conn.execute(
            r#"INSERT INTO activity_log (timestamp, action, file_path, details, status)
               VALUES (?1, ?2, ?3, ?4, ?5)"#,
            params![
                now(),
                action,
                path.to_string_lossy(),
                serde_json::to_string(&details)?,
                status.as_str(),
            ],
        )?;
        Ok(())
    }
}
