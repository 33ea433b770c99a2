//! Metadata table loader: copies the URL-metadata corpus into the working
//! database chunk by chunk, adding the `url_domain` key.
//!
//! ## Working schema
//!
//! ```sql
//! CREATE TABLE urls_meta (
//!     url         TEXT NOT NULL,
//!     url_domain  TEXT NOT NULL,
//!     title       TEXT,
//!     description TEXT
//! );
//! CREATE INDEX idx_url_domain ON urls_meta(url_domain);
//! ```
//!
//! The table is dropped and rebuilt on every call, so a retried run starts
//! from the same state as a fresh one.

use crate::columnar::{open_text_rows, row_text, TextRows};
use crate::domain::domain_key;
use crate::error::{PipelineError, Result};
use crate::models::{ChunkProgress, MetaRecord};
use crate::storage::build_batch_sql;
use rusqlite::Connection;
use std::path::Path;

/// Rows per multi-value INSERT (4 bound parameters each).
const INSERT_BATCH_SIZE: usize = 2_000;

const META_COLUMNS: [&str; 4] = ["url", "url_domain", "title", "description"];

/// Corpus columns read; anything else in the file is never decoded.
const CORPUS_COLUMNS: [&str; 3] = ["url", "title", "description"];

/// Totals of one metadata load.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct LoadSummary {
    pub total: u64,
    pub loaded: u64,
    pub skipped: u64,
    pub chunks: u64,
}

/// Build a MetaRecord, or `None` when the URL is missing or has no domain.
pub fn meta_record(url: Option<&str>, title: Option<String>, description: Option<String>) -> Option<MetaRecord> {
    let url = url?;
    let url_domain = domain_key(url)?;
    Some(MetaRecord {
        url: url.to_string(),
        url_domain,
        title,
        description,
    })
}

fn recreate_table(work: &Connection) -> Result<()> {
    work.execute_batch(
        "DROP TABLE IF EXISTS urls_meta;
         CREATE TABLE urls_meta (
            url         TEXT NOT NULL,
            url_domain  TEXT NOT NULL,
            title       TEXT,
            description TEXT
         );",
    )
    .map_err(|e| PipelineError::engine("metadata load", e))
}

/// Execute a batched INSERT of metadata rows.
fn insert_batch(conn: &Connection, batch: &[MetaRecord]) -> rusqlite::Result<()> {
    if batch.is_empty() {
        return Ok(());
    }
    let sql = build_batch_sql("urls_meta", &META_COLUMNS, batch.len());
    let mut stmt = conn.prepare_cached(&sql)?;
    let params: Vec<&dyn rusqlite::ToSql> = batch
        .iter()
        .flat_map(|row| {
            [
                &row.url as &dyn rusqlite::ToSql,
                &row.url_domain as &dyn rusqlite::ToSql,
                &row.title as &dyn rusqlite::ToSql,
                &row.description as &dyn rusqlite::ToSql,
            ]
        })
        .collect();
    stmt.execute(params.as_slice())?;
    Ok(())
}

fn write_chunk(work: &mut Connection, chunk: &[MetaRecord]) -> rusqlite::Result<()> {
    let tx = work.transaction()?;
    for batch in chunk.chunks(INSERT_BATCH_SIZE) {
        insert_batch(&tx, batch)?;
    }
    tx.commit()
}

/// Load the Parquet corpus at `source` into the working database.
///
/// Reads at most `chunk_size` source rows at a time and calls `on_chunk`
/// after each chunk is committed. An unreadable footer or a missing `url`
/// column aborts before anything is written.
pub fn load_metadata<F>(source: &Path, work: &mut Connection, chunk_size: usize, mut on_chunk: F) -> Result<LoadSummary>
where
    F: FnMut(&ChunkProgress),
{
    if chunk_size == 0 {
        return Err(PipelineError::Config("metadata chunk size must be > 0".into()));
    }
    let TextRows {
        total_rows: total,
        mut rows,
        ..
    } = open_text_rows(source, &CORPUS_COLUMNS, &["url"])?;

    recreate_table(work)?;

    let mut summary = LoadSummary {
        total,
        ..Default::default()
    };
    let mut chunk: Vec<MetaRecord> = Vec::with_capacity(chunk_size.min(INSERT_BATCH_SIZE * 8));

    loop {
        chunk.clear();
        let mut rows_read = 0usize;
        while rows_read < chunk_size {
            let Some(row) = rows.next() else { break };
            let row = row.map_err(|e| PipelineError::input(source, e))?;
            rows_read += 1;
            let url = row_text(&row, "url");
            let url = url.as_deref().map(str::trim).filter(|u| !u.is_empty());
            match meta_record(url, row_text(&row, "title"), row_text(&row, "description")) {
                Some(record) => chunk.push(record),
                None => summary.skipped += 1,
            }
        }

        if rows_read == 0 {
            break;
        }

        write_chunk(work, &chunk).map_err(|e| PipelineError::engine("metadata load", e))?;
        summary.loaded += chunk.len() as u64;
        summary.chunks += 1;

        on_chunk(&ChunkProgress {
            chunk: summary.chunks,
            processed: summary.loaded + summary.skipped,
            total,
            skipped: summary.skipped,
        });

        if rows_read < chunk_size {
            break;
        }
    }

    work.execute_batch("CREATE INDEX idx_url_domain ON urls_meta(url_domain);")
        .map_err(|e| PipelineError::engine("metadata load", e))?;

    tracing::info!(
        loaded = summary.loaded,
        skipped = summary.skipped,
        chunks = summary.chunks,
        "loaded metadata corpus"
    );
    Ok(summary)
}
