//! Working-database helpers and on-disk file guards.
//!
//! Each phase opens its own connection through these helpers and drops it
//! when the phase returns; no handle is shared between phases.

use crate::config::EngineSettings;
use crate::error::{PipelineError, Result};
use rusqlite::Connection;
use std::path::{Path, PathBuf};

/// Open (creating if needed) a database tuned for one-shot bulk writes.
///
/// Journaling is off: a crashed write leaves garbage, which is acceptable
/// because every bulk-written file is either re-created on the next run or
/// thrown away with the run.
pub fn open_bulk_writer(path: &Path, settings: EngineSettings) -> Result<Connection> {
    let conn = Connection::open(path).map_err(|e| PipelineError::engine("open", e))?;
    tune_bulk_writer(&conn, settings).map_err(|e| PipelineError::engine("open", e))?;
    Ok(conn)
}

/// Private on-disk scratch database, deleted by SQLite when the connection closes.
pub fn open_scratch(settings: EngineSettings) -> Result<Connection> {
    let conn = Connection::open("").map_err(|e| PipelineError::engine("scratch", e))?;
    tune_bulk_writer(&conn, settings).map_err(|e| PipelineError::engine("scratch", e))?;
    Ok(conn)
}

fn tune_bulk_writer(conn: &Connection, settings: EngineSettings) -> rusqlite::Result<()> {
    conn.execute_batch(
        "PRAGMA journal_mode = OFF;
         PRAGMA synchronous = OFF;
         PRAGMA temp_store = FILE;",
    )?;
    apply_engine_settings(conn, settings)
}

/// Apply the memory ceiling and sorter thread count.
///
/// Half the ceiling goes to the page cache; the soft heap limit covers the rest.
pub fn apply_engine_settings(conn: &Connection, settings: EngineSettings) -> rusqlite::Result<()> {
    let ceiling_bytes = settings.memory_mb.saturating_mul(1024 * 1024);
    let cache_kib = (settings.memory_mb / 2).max(1).saturating_mul(1024);
    conn.execute_batch(&format!(
        "PRAGMA cache_size = -{};
         PRAGMA soft_heap_limit = {};
         PRAGMA threads = {};",
        cache_kib, ceiling_bytes, settings.threads
    ))
}

/// Chunk size as a SQL `LIMIT`. A negative LIMIT means "no limit" to
/// SQLite, so sizes that do not fit an `i64` are rejected.
pub fn chunk_limit(chunk_size: usize) -> Result<i64> {
    match i64::try_from(chunk_size) {
        Ok(limit) if limit > 0 => Ok(limit),
        _ => Err(PipelineError::Config(format!(
            "chunk size must be between 1 and {}, got {}",
            i64::MAX,
            chunk_size
        ))),
    }
}

/// Build a multi-value INSERT statement for `num_rows` rows.
///
/// `table` and `columns` are internal constants, never user input.
pub fn build_batch_sql(table: &str, columns: &[&str], num_rows: usize) -> String {
    if num_rows == 0 || columns.is_empty() {
        return String::new();
    }
    let row = format!("({})", vec!["?"; columns.len()].join(","));
    let mut sql = String::with_capacity(64 + num_rows * (row.len() + 1));
    sql.push_str("INSERT INTO ");
    sql.push_str(table);
    sql.push_str(" (");
    sql.push_str(&columns.join(", "));
    sql.push_str(") VALUES ");
    for i in 0..num_rows {
        if i > 0 {
            sql.push(',');
        }
        sql.push_str(&row);
    }
    sql
}

/// Remove a file if it exists.
pub fn remove_if_exists(path: &Path) -> Result<()> {
    match std::fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

/// Row count of a working table (internal table names only).
pub fn count_rows(conn: &Connection, table: &str) -> rusqlite::Result<u64> {
    let sql = format!("SELECT COUNT(*) FROM {}", table);
    let count: i64 = conn.query_row(&sql, [], |row| row.get(0))?;
    Ok(count.max(0) as u64)
}

fn remove_quietly(path: &Path, what: &str) {
    if let Err(e) = std::fs::remove_file(path) {
        if e.kind() != std::io::ErrorKind::NotFound {
            tracing::warn!(path = %path.display(), error = %e, "failed to remove {}", what);
        }
    }
}

// ============================================================================
// File Guards
// ============================================================================

/// `<output>.partial`
pub fn partial_path(output: &Path) -> PathBuf {
    let mut name = output
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_else(|| "output".into());
    name.push(".partial");
    output.with_file_name(name)
}

/// An output under construction at `<output>.partial`.
///
/// Dropping it without `commit` deletes the partial file, so an aborted
/// phase never leaves anything at `<output>` that looks complete.
pub struct PartialOutput {
    path: PathBuf,
    committed: bool,
}

impl PartialOutput {
    /// Claim `<output>.partial`, clearing a leftover from an earlier crash.
    pub fn new(output: &Path) -> Result<Self> {
        let path = partial_path(output);
        remove_if_exists(&path)?;
        Ok(Self {
            path,
            committed: false,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Move the finished partial file into place at `output`.
    pub fn commit(mut self, output: &Path) -> Result<()> {
        std::fs::rename(&self.path, output)?;
        self.committed = true;
        Ok(())
    }
}

impl Drop for PartialOutput {
    fn drop(&mut self) {
        if !self.committed {
            remove_quietly(&self.path, "partial output");
        }
    }
}

/// A file that lives only as long as the guard, unless asked to keep it.
pub struct ScratchFile {
    path: PathBuf,
    keep: bool,
}

impl ScratchFile {
    pub fn new(path: &Path, keep: bool) -> Self {
        Self {
            path: path.to_path_buf(),
            keep,
        }
    }
}

impl Drop for ScratchFile {
    fn drop(&mut self) {
        if !self.keep {
            remove_quietly(&self.path, "working database");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_chunk_limit() {
        assert_eq!(chunk_limit(10).unwrap(), 10);
        assert!(matches!(chunk_limit(0), Err(PipelineError::Config(_))));
    }

    #[cfg(target_pointer_width = "64")]
    #[test]
    fn test_chunk_limit_rejects_sizes_past_i64() {
        assert_eq!(chunk_limit(i64::MAX as usize).unwrap(), i64::MAX);
        assert!(matches!(chunk_limit(usize::MAX), Err(PipelineError::Config(_))));
        assert!(chunk_limit(i64::MAX as usize + 1).is_err());
    }

    #[test]
    fn test_build_batch_sql() {
        assert_eq!(
            build_batch_sql("feeds", &["feed_url", "feed_domain"], 2),
            "INSERT INTO feeds (feed_url, feed_domain) VALUES (?,?),(?,?)"
        );
        assert!(build_batch_sql("feeds", &["feed_url"], 0).is_empty());
    }

    #[test]
    fn test_remove_if_exists() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("x.sqlite3");
        remove_if_exists(&path).unwrap();
        std::fs::write(&path, b"x").unwrap();
        remove_if_exists(&path).unwrap();
        assert!(!path.exists());
    }

    #[test]
    fn test_partial_output_dropped_is_removed() {
        let dir = TempDir::new().unwrap();
        let output = dir.path().join("matches.jsonl");
        {
            let partial = PartialOutput::new(&output).unwrap();
            std::fs::write(partial.path(), b"half").unwrap();
        }
        assert!(!partial_path(&output).exists());
        assert!(!output.exists());
    }

    #[test]
    fn test_partial_output_commit_renames() {
        let dir = TempDir::new().unwrap();
        let output = dir.path().join("matches.jsonl");
        let partial = PartialOutput::new(&output).unwrap();
        std::fs::write(partial.path(), b"done").unwrap();
        partial.commit(&output).unwrap();
        assert_eq!(std::fs::read(&output).unwrap(), b"done");
        assert!(!partial_path(&output).exists());
    }

    #[test]
    fn test_scratch_file_keep() {
        let dir = TempDir::new().unwrap();
        let gone = dir.path().join("gone.sqlite3");
        let kept = dir.path().join("kept.sqlite3");
        std::fs::write(&gone, b"x").unwrap();
        std::fs::write(&kept, b"x").unwrap();
        drop(ScratchFile::new(&gone, false));
        drop(ScratchFile::new(&kept, true));
        assert!(!gone.exists());
        assert!(kept.exists());
    }

    #[test]
    fn test_scratch_connection_is_usable() {
        let conn = open_scratch(EngineSettings::default()).unwrap();
        conn.execute_batch("CREATE TABLE t (x); INSERT INTO t VALUES (1);").unwrap();
        assert_eq!(count_rows(&conn, "t").unwrap(), 1);
    }
}
