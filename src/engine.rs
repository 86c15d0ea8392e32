//! Thin adapter over the embedded engine: connection opening with tuning
//! pragmas, optional extension loading, catalog probes, and the delimited
//! staging-file bulk-load path.

use crate::{Result, TimeshardError};
use rusqlite::types::Value as SqlValue;
use rusqlite::{Connection, LoadExtensionGuard, params_from_iter};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tracing::{debug, warn};

/// Durability level applied on open.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Synchronous {
    Off,
    Normal,
    Full,
}

impl Synchronous {
    fn as_str(&self) -> &'static str {
        match self {
            Synchronous::Off => "OFF",
            Synchronous::Normal => "NORMAL",
            Synchronous::Full => "FULL",
        }
    }
}

/// Per-connection engine tuning, applied by [`open_database`].
#[derive(Debug, Clone)]
pub struct EngineTuning {
    pub cache_mb: u32,
    pub mmap_mb: u32,
    pub threads: u32,
    pub busy_timeout: Duration,
    pub synchronous: Synchronous,
    pub wal: bool,
}

impl Default for EngineTuning {
    fn default() -> Self {
        Self {
            cache_mb: 256,
            mmap_mb: 256,
            threads: 4,
            busy_timeout: Duration::from_secs(5),
            synchronous: Synchronous::Normal,
            wal: true,
        }
    }
}

impl EngineTuning {
    /// Ingest-heavy profile: large cache, relaxed durability.
    pub fn bulk_insert() -> Self {
        Self {
            cache_mb: 1024,
            threads: 8,
            synchronous: Synchronous::Off,
            ..Self::default()
        }
    }

    /// Sequential-read profile: modest cache, wide mmap window.
    pub fn streaming() -> Self {
        Self {
            cache_mb: 128,
            mmap_mb: 1024,
            ..Self::default()
        }
    }

    /// Point/range-query profile: large cache and mmap, more sort threads.
    pub fn query_optimized() -> Self {
        Self {
            cache_mb: 512,
            mmap_mb: 2048,
            threads: 8,
            ..Self::default()
        }
    }
}

/// Outcome of the best-effort interchange-extension load attempted on every
/// open. A failed load never fails the open.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExtensionLoad {
    Loaded,
    /// No extension configured.
    Skipped,
    Failed {
        reason: String,
    },
}

/// Opens (creating if absent) a database and applies the tuning pragmas.
pub fn open_database(path: &Path, tuning: &EngineTuning) -> rusqlite::Result<Connection> {
    let conn = Connection::open(path)?;
    conn.busy_timeout(tuning.busy_timeout)?;
    if tuning.wal {
        set_pragma(&conn, "journal_mode", "WAL")?;
    }
    set_pragma(&conn, "synchronous", tuning.synchronous.as_str())?;
    // Negative cache_size is a KiB budget rather than a page count.
    set_pragma(&conn, "cache_size", -(i64::from(tuning.cache_mb) * 1024))?;
    set_pragma(&conn, "mmap_size", i64::from(tuning.mmap_mb) * 1024 * 1024)?;
    set_pragma(&conn, "threads", i64::from(tuning.threads))?;
    debug!(path = %path.display(), "opened database");
    Ok(conn)
}

/// Sets one pragma, stepping through and discarding any rows some pragmas
/// report back (journal_mode, mmap_size, threads do).
fn set_pragma(
    conn: &Connection,
    pragma: &str,
    value: impl std::fmt::Display,
) -> rusqlite::Result<()> {
    let sql = format!("PRAGMA {pragma} = {value}");
    let mut stmt = conn.prepare(&sql)?;
    let mut rows = stmt.query([])?;
    while rows.next()?.is_some() {}
    Ok(())
}

/// Attempts to load the configured interchange extension into `conn`.
pub fn load_interchange_extension(conn: &Connection, path: Option<&Path>) -> ExtensionLoad {
    let Some(path) = path else {
        return ExtensionLoad::Skipped;
    };
    // Safety: extension loading is disabled again when the guard drops, and
    // the path comes from configuration, not from query input.
    let attempt = unsafe {
        LoadExtensionGuard::new(conn).and_then(|_guard| conn.load_extension(path, None))
    };
    match attempt {
        Ok(()) => ExtensionLoad::Loaded,
        Err(err) => {
            warn!(
                extension = %path.display(),
                error = %err,
                "interchange extension failed to load; continuing without it"
            );
            ExtensionLoad::Failed {
                reason: err.to_string(),
            }
        }
    }
}

/// True when `table` exists in the connected database.
pub fn table_exists(conn: &Connection, table: &str) -> rusqlite::Result<bool> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = ?",
        [table],
        |row| row.get(0),
    )?;
    Ok(count > 0)
}

/// One staged row; `None` marks SQL NULL.
pub type StagedRow = Vec<Option<String>>;

static STAGING_SEQ: AtomicU64 = AtomicU64::new(0);

/// A delimited staging file, removed from disk when dropped.
#[derive(Debug)]
pub struct StagingFile {
    path: PathBuf,
    rows: usize,
}

impl StagingFile {
    /// Writes `rows` as CSV (header first) under `dir`, creating the
    /// directory if needed. `tag` keeps concurrent staging files apart.
    pub fn create(dir: &Path, tag: &str, columns: &[&str], rows: &[StagedRow]) -> Result<Self> {
        fs::create_dir_all(dir).map_err(|source| TimeshardError::IoWithPath {
            path: dir.to_path_buf(),
            source,
        })?;
        let seq = STAGING_SEQ.fetch_add(1, Ordering::Relaxed);
        let path = dir.join(format!("stage_{tag}_{}_{seq}.csv", std::process::id()));
        let mut writer = csv::Writer::from_path(&path)?;
        writer.write_record(columns)?;
        for row in rows {
            // NULL is rendered as the empty field, mirrored by the loader.
            writer.write_record(row.iter().map(|v| v.as_deref().unwrap_or("")))?;
        }
        writer.flush().map_err(|source| TimeshardError::IoWithPath {
            path: path.clone(),
            source,
        })?;
        Ok(Self {
            path,
            rows: rows.len(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn rows(&self) -> usize {
        self.rows
    }
}

impl Drop for StagingFile {
    fn drop(&mut self) {
        let _ = fs::remove_file(&self.path);
    }
}

/// Bulk-loads a delimited staging file into `table` on `conn`, which is
/// expected to already hold the enclosing transaction. Empty fields load as
/// NULL. Returns the number of appended rows.
pub fn bulk_load_delimited(
    conn: &Connection,
    table: &str,
    file: &Path,
    column_count: usize,
) -> Result<usize> {
    let mut reader = csv::Reader::from_path(file)?;
    if reader.headers()?.len() != column_count {
        return Err(TimeshardError::Staging(format!(
            "staging file {} has {} columns, table '{table}' expects {column_count}",
            file.display(),
            reader.headers()?.len(),
        )));
    }
    let placeholders = vec!["?"; column_count].join(", ");
    let mut stmt = conn.prepare(&format!("INSERT INTO \"{table}\" VALUES ({placeholders})"))?;
    let mut appended = 0usize;
    for record in reader.records() {
        let record = record?;
        if record.len() != column_count {
            return Err(TimeshardError::Staging(format!(
                "staging row {} has {} fields, expected {column_count}",
                appended + 1,
                record.len(),
            )));
        }
        stmt.execute(params_from_iter(record.iter().map(|field| {
            if field.is_empty() {
                SqlValue::Null
            } else {
                SqlValue::Text(field.to_string())
            }
        })))?;
        appended += 1;
    }
    Ok(appended)
}
