//! Domain join engine: pairs every working metadata row with each feed whose
//! domain occurs anywhere inside the row's domain, and persists the pairs.
//!
//! ## Output
//!
//! A ZSTD-compressed Parquet file with one row group per
//! [`DEFAULT_ROW_GROUP_ROWS`] joined rows:
//!
//! ```text
//! message joined {
//!     REQUIRED BINARY feed_url (UTF8);
//!     REQUIRED BINARY feed_domain (UTF8);
//!     REQUIRED BINARY url (UTF8);
//!     REQUIRED BINARY url_domain (UTF8);
//!     OPTIONAL BINARY title (UTF8);
//!     OPTIONAL BINARY description (UTF8);
//! }
//! ```
//!
//! The file is written to `<output>.partial` and renamed to `<output>` only
//! after its footer is written. A failed join leaves no file at `<output>`
//! that was produced by this run.
//!
//! Matching is unanchored and case-sensitive: `example.com` pairs with
//! `blog.example.com` and also with `notexample.com.evil.org`.

use crate::columnar::{column_names, TextColumn, TextTableWriter, DEFAULT_ROW_GROUP_ROWS};
use crate::error::{PipelineError, Result};
use crate::feeds::read_feeds;
use crate::models::{ChunkProgress, FeedRecord, JoinedRecord, MetaRecord};
use crate::storage::{chunk_limit, count_rows, PartialOutput};
use rusqlite::{params, Connection};
use rustc_hash::FxHashMap;
use std::path::Path;

/// Columns of the join artifact, in file order.
pub const JOINED_COLUMNS: [TextColumn; 6] = [
    TextColumn::required("feed_url"),
    TextColumn::required("feed_domain"),
    TextColumn::required("url"),
    TextColumn::required("url_domain"),
    TextColumn::nullable("title"),
    TextColumn::nullable("description"),
];

/// Names of [`JOINED_COLUMNS`].
pub fn joined_column_names() -> [&'static str; 6] {
    JOINED_COLUMNS.map(|c| c.name)
}

/// Whether `path` is a Parquet file with exactly the join artifact's columns.
pub fn is_join_artifact(path: &Path) -> bool {
    column_names(path).is_some_and(|names| names.iter().map(String::as_str).eq(joined_column_names()))
}

// ============================================================================
// Feed Domain Index
// ============================================================================

/// In-memory index of feed domains for substring lookups.
///
/// For a URL domain of length `n`, only substrings whose length equals some
/// feed-domain length are looked up, so a match costs
/// `O(n * distinct_lengths)` hash lookups instead of a scan over all feeds.
pub struct FeedDomainIndex {
    feeds: Vec<FeedRecord>,
    by_domain: FxHashMap<String, Vec<usize>>,
    lengths: Vec<usize>, // Distinct feed-domain byte lengths, ascending
}

impl FeedDomainIndex {
    pub fn new(feeds: Vec<FeedRecord>) -> Self {
        let feeds: Vec<FeedRecord> = feeds.into_iter().filter(|f| !f.feed_domain.is_empty()).collect();
        let mut by_domain: FxHashMap<String, Vec<usize>> = FxHashMap::default();
        for (idx, feed) in feeds.iter().enumerate() {
            by_domain.entry(feed.feed_domain.clone()).or_default().push(idx);
        }
        let mut lengths: Vec<usize> = by_domain.keys().map(|d| d.len()).collect();
        lengths.sort_unstable();
        lengths.dedup();
        Self {
            feeds,
            by_domain,
            lengths,
        }
    }

    pub fn len(&self) -> usize {
        self.feeds.len()
    }

    pub fn is_empty(&self) -> bool {
        self.feeds.is_empty()
    }

    /// Feeds whose domain is a substring of `url_domain`, in feed load order,
    /// each at most once.
    pub fn matches(&self, url_domain: &str) -> Vec<&FeedRecord> {
        let mut hits: Vec<usize> = Vec::new();
        for &len in &self.lengths {
            if len > url_domain.len() {
                break;
            }
            for start in 0..=(url_domain.len() - len) {
                // Skip slices that would split a multi-byte character
                let Some(window) = url_domain.get(start..start + len) else {
                    continue;
                };
                if let Some(idxs) = self.by_domain.get(window) {
                    hits.extend_from_slice(idxs);
                }
            }
        }
        hits.sort_unstable();
        hits.dedup();
        hits.into_iter().map(|i| &self.feeds[i]).collect()
    }
}

// ============================================================================
// Join
// ============================================================================

/// Totals of one join.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct JoinSummary {
    pub feeds: u64,
    pub scanned: u64,
    pub joined: u64,
}

fn read_meta(row: &rusqlite::Row<'_>) -> rusqlite::Result<MetaRecord> {
    Ok(MetaRecord {
        url: row.get(1)?,
        url_domain: row.get(2)?,
        title: row.get(3)?,
        description: row.get(4)?,
    })
}

fn joined_row(record: JoinedRecord) -> [Option<String>; 6] {
    [
        Some(record.feed_url),
        Some(record.feed_domain),
        Some(record.url),
        Some(record.url_domain),
        record.title,
        record.description,
    ]
}

/// Pair one chunk of metadata rows with the index and write the pairs.
fn write_chunk(out: &mut TextTableWriter, index: &FeedDomainIndex, chunk: &[MetaRecord]) -> Result<u64> {
    let mut written = 0u64;
    for meta in chunk {
        for feed in index.matches(&meta.url_domain) {
            out.push_row(joined_row(JoinedRecord {
                feed_url: feed.feed_url.clone(),
                feed_domain: feed.feed_domain.clone(),
                url: meta.url.clone(),
                url_domain: meta.url_domain.clone(),
                title: meta.title.clone(),
                description: meta.description.clone(),
            }))?;
            written += 1;
        }
    }
    Ok(written)
}

/// Join the working `feeds` and `urls_meta` tables into `output`.
///
/// Metadata rows are streamed `chunk_size` at a time; `on_chunk` is called
/// after each chunk has been handed to the writer.
pub fn join_domains<F>(work: &Connection, output: &Path, chunk_size: usize, mut on_chunk: F) -> Result<JoinSummary>
where
    F: FnMut(&ChunkProgress),
{
    let limit = chunk_limit(chunk_size)?;

    let index = FeedDomainIndex::new(read_feeds(work)?);
    let total = count_rows(work, "urls_meta").map_err(|e| PipelineError::engine("join", e))?;

    let partial = PartialOutput::new(output)?;
    let mut out = TextTableWriter::create(partial.path(), "joined", &JOINED_COLUMNS, DEFAULT_ROW_GROUP_ROWS)?;

    let mut summary = JoinSummary {
        feeds: index.len() as u64,
        ..Default::default()
    };

    if index.is_empty() {
        tracing::info!("feed list is empty; writing empty join output");
    } else {
        let mut stmt = work
            .prepare(
                "SELECT rowid, url, url_domain, title, description FROM urls_meta
                 WHERE rowid > ?1 ORDER BY rowid LIMIT ?2",
            )
            .map_err(|e| PipelineError::engine("join", e))?;

        let mut last_rowid = i64::MIN;
        let mut chunk_no = 0u64;
        loop {
            let mut chunk: Vec<MetaRecord> = Vec::new();
            let mut rows = stmt
                .query(params![last_rowid, limit])
                .map_err(|e| PipelineError::engine("join", e))?;
            while let Some(row) = rows.next().map_err(|e| PipelineError::engine("join", e))? {
                last_rowid = row.get(0).map_err(|e| PipelineError::engine("join", e))?;
                chunk.push(read_meta(row).map_err(|e| PipelineError::engine("join", e))?);
            }
            drop(rows);

            if chunk.is_empty() {
                break;
            }
            let rows_read = chunk.len();

            summary.joined += write_chunk(&mut out, &index, &chunk)?;
            summary.scanned += rows_read as u64;
            chunk_no += 1;

            on_chunk(&ChunkProgress {
                chunk: chunk_no,
                processed: summary.scanned,
                total,
                skipped: 0,
            });

            if rows_read < chunk_size {
                break;
            }
        }
    }

    let written = out.finish()?;
    debug_assert_eq!(written, summary.joined);
    partial.commit(output)?;

    tracing::info!(
        output = %output.display(),
        feeds = summary.feeds,
        scanned = summary.scanned,
        joined = summary.joined,
        "wrote domain join"
    );
    Ok(summary)
}
