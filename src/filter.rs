//! Streaming about-page filter over a persisted join.
//!
//! `AboutPageStream` is a lazy iterator: each call to `next` either hands out
//! a buffered match or reads the next chunk of joined rows from the Parquet
//! artifact. Nothing runs in the background, and dropping the stream early
//! closes the file and its scratch database.
//!
//! State machine:
//!
//! ```text
//! Idle -> Scanning(offset) -> Scanning(offset') ... -> Done
//!              \----------- read failure -----------> Failed
//! ```
//!
//! A read failure is yielded once as `Err` and the stream then ends in
//! `Failed`, so a truncated scan is never mistaken for a complete one.
//!
//! Matches already emitted are remembered in an on-disk scratch table, so
//! memory held by the stream is bounded by one chunk however many distinct
//! matches the scan produces.

use crate::columnar::{open_text_rows, row_text};
use crate::config::EngineSettings;
use crate::error::{PipelineError, Result};
use crate::join::joined_column_names;
use crate::models::{FilterStats, JoinedRecord, MatchRecord};
use crate::storage::open_scratch;
use parquet::errors::ParquetError;
use parquet::record::Row;
use rusqlite::{params, Connection};
use std::collections::VecDeque;
use std::path::Path;
use std::time::Instant;

// ============================================================================
// Pattern Set
// ============================================================================

/// Lower-cased about-page path fragments.
///
/// A URL matches when its lower-cased form contains any fragment anywhere,
/// so `/me` also matches `/meeting` and `/about` matches `/aboutish`.
#[derive(Clone, Debug)]
pub struct PatternSet {
    patterns: Vec<String>,
}

impl PatternSet {
    pub fn new<I, S>(patterns: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut lowered: Vec<String> = Vec::new();
        for pattern in patterns {
            let p = pattern.as_ref().trim().to_lowercase();
            if p.is_empty() {
                return Err(PipelineError::Config("about-page patterns must not be empty".into()));
            }
            if !lowered.contains(&p) {
                lowered.push(p);
            }
        }
        if lowered.is_empty() {
            return Err(PipelineError::Config("at least one about-page pattern is required".into()));
        }
        Ok(Self { patterns: lowered })
    }

    pub fn matches(&self, url: &str) -> bool {
        let lower = url.to_lowercase();
        self.patterns.iter().any(|p| lower.contains(p.as_str()))
    }

    pub fn patterns(&self) -> &[String] {
        &self.patterns
    }

    pub fn len(&self) -> usize {
        self.patterns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }
}

// ============================================================================
// Seen Set
// ============================================================================

/// NULL and '' must stay distinct, and UNIQUE treats NULLs as distinct, so
/// nullable fields are stored as text plus a presence flag.
const SEEN_SCHEMA: &str = "CREATE TABLE seen (
    feed_url        TEXT NOT NULL,
    feed_domain     TEXT NOT NULL,
    url             TEXT NOT NULL,
    url_domain      TEXT NOT NULL,
    title           TEXT NOT NULL,
    has_title       INTEGER NOT NULL,
    description     TEXT NOT NULL,
    has_description INTEGER NOT NULL,
    UNIQUE (feed_url, feed_domain, url, url_domain, title, has_title, description, has_description)
);";

const INSERT_SEEN: &str = "INSERT OR IGNORE INTO seen VALUES
    (?1, ?2, ?3, ?4, IFNULL(?5, ''), ?5 IS NOT NULL, IFNULL(?6, ''), ?6 IS NOT NULL)";

/// Matches emitted so far, kept in a scratch database.
struct SeenSet {
    conn: Connection,
}

impl SeenSet {
    fn open(settings: EngineSettings) -> Result<Self> {
        let conn = open_scratch(settings)?;
        conn.execute_batch(SEEN_SCHEMA)
            .map_err(|e| PipelineError::engine("dedup", e))?;
        Ok(Self { conn })
    }

    /// Record `records` and return those not seen before, in order, plus the
    /// number of duplicates dropped.
    fn retain_new(&self, records: Vec<JoinedRecord>) -> rusqlite::Result<(Vec<JoinedRecord>, u64)> {
        let tx = self.conn.unchecked_transaction()?;
        let mut fresh = Vec::with_capacity(records.len());
        let mut duplicates = 0u64;
        {
            let mut stmt = tx.prepare_cached(INSERT_SEEN)?;
            for r in records {
                let inserted = stmt.execute(params![
                    r.feed_url,
                    r.feed_domain,
                    r.url,
                    r.url_domain,
                    r.title,
                    r.description
                ])?;
                if inserted == 1 {
                    fresh.push(r);
                } else {
                    duplicates += 1;
                }
            }
        }
        tx.commit()?;
        Ok((fresh, duplicates))
    }

    #[cfg(test)]
    fn len(&self) -> u64 {
        crate::storage::count_rows(&self.conn, "seen").unwrap_or(0)
    }
}

// ============================================================================
// Stream
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanState {
    Idle,
    Scanning { offset: u64 },
    Done,
    Failed,
}

impl ScanState {
    pub fn is_terminal(self) -> bool {
        matches!(self, ScanState::Done | ScanState::Failed)
    }
}

type JoinedRows = Box<dyn Iterator<Item = std::result::Result<JoinedRecord, ParquetError>>>;

/// Open row source plus dedup state; both are released together.
struct Cursor {
    rows: JoinedRows,
    seen: SeenSet,
}

fn required_text(row: &Row, name: &str) -> std::result::Result<String, ParquetError> {
    row_text(row, name).ok_or_else(|| ParquetError::General(format!("column '{}' is null", name)))
}

fn joined_record(row: &Row) -> std::result::Result<JoinedRecord, ParquetError> {
    Ok(JoinedRecord {
        feed_url: required_text(row, "feed_url")?,
        feed_domain: required_text(row, "feed_domain")?,
        url: required_text(row, "url")?,
        url_domain: required_text(row, "url_domain")?,
        title: row_text(row, "title"),
        description: row_text(row, "description"),
    })
}

/// Lazy, forward-only sequence of distinct about-page matches.
pub struct AboutPageStream {
    cursor: Option<Cursor>, // Released as soon as the scan is terminal
    patterns: PatternSet,
    chunk_size: usize,
    total_rows: u64,
    state: ScanState,
    buffer: VecDeque<MatchRecord>,
    stats: FilterStats,
    started: Instant,
}

impl AboutPageStream {
    /// Open the join artifact at `path` for scanning.
    ///
    /// Fails up front if the file is not a join artifact; only the footer is
    /// read until the first `next`.
    pub fn open(path: &Path, patterns: PatternSet, chunk_size: usize, settings: EngineSettings) -> Result<Self> {
        if chunk_size == 0 {
            return Err(PipelineError::Config("filter chunk size must be > 0".into()));
        }
        let columns = joined_column_names();
        let text = open_text_rows(path, &columns, &columns)?;
        let rows = text.rows.map(|row| row.and_then(|r| joined_record(&r)));
        Self::from_rows(rows, patterns, chunk_size, text.total_rows, settings)
    }

    /// Scan an arbitrary sequence of joined rows.
    pub(crate) fn from_rows<I>(
        rows: I,
        patterns: PatternSet,
        chunk_size: usize,
        total_rows: u64,
        settings: EngineSettings,
    ) -> Result<Self>
    where
        I: Iterator<Item = std::result::Result<JoinedRecord, ParquetError>> + 'static,
    {
        if chunk_size == 0 {
            return Err(PipelineError::Config("filter chunk size must be > 0".into()));
        }
        Ok(Self {
            cursor: Some(Cursor {
                rows: Box::new(rows),
                seen: SeenSet::open(settings)?,
            }),
            patterns,
            chunk_size,
            total_rows,
            state: ScanState::Idle,
            buffer: VecDeque::new(),
            stats: FilterStats::default(),
            started: Instant::now(),
        })
    }

    pub fn state(&self) -> ScanState {
        self.state
    }

    pub fn stats(&self) -> &FilterStats {
        &self.stats
    }

    pub fn patterns(&self) -> &PatternSet {
        &self.patterns
    }

    /// Joined rows in the artifact when the stream was opened.
    pub fn total_rows(&self) -> u64 {
        self.total_rows
    }

    /// Matches read but not yet handed out; never more than one chunk.
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    fn finish(&mut self, state: ScanState) {
        self.state = state;
        self.cursor = None;
        self.stats.elapsed_seconds = self.started.elapsed().as_secs_f64();
    }

    /// Read one chunk starting `offset` rows in and buffer its new matches.
    fn advance(&mut self, offset: u64) -> Result<()> {
        let Some(cursor) = self.cursor.as_mut() else {
            self.finish(ScanState::Done);
            return Ok(());
        };

        let mut chunk: Vec<JoinedRecord> = Vec::with_capacity(self.chunk_size.min(16_384));
        let mut failure = None;
        while chunk.len() < self.chunk_size {
            match cursor.rows.next() {
                Some(Ok(record)) => chunk.push(record),
                Some(Err(e)) => {
                    failure = Some(e);
                    break;
                }
                None => break,
            }
        }
        if let Some(source) = failure {
            let offset = offset + chunk.len() as u64;
            self.finish(ScanState::Failed);
            return Err(PipelineError::Read { offset, source });
        }

        let rows_read = chunk.len();
        self.stats.chunks_read += 1;
        self.stats.rows_scanned += rows_read as u64;

        let matched: Vec<JoinedRecord> = chunk.into_iter().filter(|r| self.patterns.matches(&r.url)).collect();
        let (fresh, duplicates) = match cursor.seen.retain_new(matched) {
            Ok(kept) => kept,
            Err(e) => {
                self.finish(ScanState::Failed);
                return Err(PipelineError::engine("dedup", e));
            }
        };
        self.stats.duplicates_suppressed += duplicates;
        self.buffer.extend(fresh);

        tracing::debug!(offset, rows = rows_read, buffered = self.buffer.len(), "filter chunk scanned");

        if rows_read < self.chunk_size {
            self.finish(ScanState::Done);
        } else {
            self.state = ScanState::Scanning {
                offset: offset + rows_read as u64,
            };
        }
        Ok(())
    }
}

impl Iterator for AboutPageStream {
    type Item = Result<MatchRecord>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(record) = self.buffer.pop_front() {
                self.stats.matches_emitted += 1;
                return Some(Ok(record));
            }
            if self.state.is_terminal() {
                return None;
            }
            let offset = match self.state {
                ScanState::Scanning { offset } => offset,
                _ => 0,
            };
            if let Err(e) = self.advance(offset) {
                return Some(Err(e));
            }
        }
    }
}

/// Drain a stream into memory, failing if any chunk read failed.
pub fn collect_matches(mut stream: AboutPageStream) -> Result<(Vec<MatchRecord>, FilterStats)> {
    let mut matches = Vec::new();
    for item in stream.by_ref() {
        matches.push(item?);
    }
    Ok((matches, stream.stats().clone()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::columnar::{TextColumn, TextTableWriter};
    use crate::join::JOINED_COLUMNS;
    use tempfile::TempDir;

    fn joined(feed_domain: &str, url: &str) -> JoinedRecord {
        JoinedRecord {
            feed_url: format!("https://{feed_domain}/feed"),
            feed_domain: feed_domain.to_string(),
            url: url.to_string(),
            url_domain: crate::domain::extract_domain(url).to_string(),
            title: None,
            description: None,
        }
    }

    fn write_joined(path: &Path, rows: &[JoinedRecord]) {
        let mut writer = TextTableWriter::create(path, "joined", &JOINED_COLUMNS, 2).unwrap();
        for r in rows {
            writer
                .push_row([
                    Some(r.feed_url.clone()),
                    Some(r.feed_domain.clone()),
                    Some(r.url.clone()),
                    Some(r.url_domain.clone()),
                    r.title.clone(),
                    r.description.clone(),
                ])
                .unwrap();
        }
        writer.finish().unwrap();
    }

    fn open(path: &Path, patterns: &[&str], chunk: usize) -> AboutPageStream {
        let patterns = PatternSet::new(patterns.iter().copied()).unwrap();
        AboutPageStream::open(path, patterns, chunk, EngineSettings::default()).unwrap()
    }

    fn from_records(records: Vec<JoinedRecord>, patterns: &[&str], chunk: usize) -> AboutPageStream {
        let patterns = PatternSet::new(patterns.iter().copied()).unwrap();
        let total = records.len() as u64;
        AboutPageStream::from_rows(records.into_iter().map(Ok), patterns, chunk, total, EngineSettings::default())
            .unwrap()
    }

    #[test]
    fn test_pattern_set_unanchored_case_insensitive() {
        let set = PatternSet::new(["/about", "/bio"]).unwrap();
        assert!(set.matches("https://x.example/aboutish"));
        assert!(set.matches("https://x.example/ABOUT"));
        assert!(set.matches("https://x.example/en/biography"));
        assert!(!set.matches("https://x.example/contact"));
    }

    #[test]
    fn test_pattern_set_lowercases_patterns() {
        let set = PatternSet::new(["/Über-Mich", "/über-mich"]).unwrap();
        assert_eq!(set.len(), 1);
        assert!(set.matches("https://x.example/ÜBER-MICH"));
    }

    #[test]
    fn test_pattern_set_rejects_empty() {
        assert!(PatternSet::new(Vec::<String>::new()).is_err());
        assert!(PatternSet::new(["/about", "  "]).is_err());
    }

    #[test]
    fn test_stream_yields_matches_and_ends_done() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("joined.parquet");
        write_joined(
            &path,
            &[
                joined("a.example", "https://a.example/about"),
                joined("a.example", "https://a.example/blog/1"),
                joined("b.example", "https://b.example/me"),
            ],
        );

        let mut stream = open(&path, &["/about", "/me"], 2);
        assert_eq!(stream.state(), ScanState::Idle);
        assert_eq!(stream.total_rows(), 3);

        let first = stream.next().unwrap().unwrap();
        assert_eq!(first.url, "https://a.example/about");
        assert_eq!(stream.state(), ScanState::Scanning { offset: 2 });

        let second = stream.next().unwrap().unwrap();
        assert_eq!(second.url, "https://b.example/me");
        assert!(stream.next().is_none());
        assert_eq!(stream.state(), ScanState::Done);
        assert!(stream.state().is_terminal());
        assert_eq!(stream.stats().rows_scanned, 3);
        assert_eq!(stream.stats().matches_emitted, 2);
    }

    #[test]
    fn test_stream_dedups_across_chunks() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("joined.parquet");
        let row = joined("a.example", "https://a.example/about");
        write_joined(&path, &[row.clone(), joined("a.example", "https://a.example/x"), row.clone()]);

        let (matches, stats) = collect_matches(open(&path, &["/about"], 1)).unwrap();
        assert_eq!(matches, vec![row]);
        assert_eq!(stats.duplicates_suppressed, 1);
        assert_eq!(stats.chunks_read, 4);
    }

    #[test]
    fn test_dedup_keeps_null_and_empty_apart() {
        let base = joined("a.example", "https://a.example/about");
        let empty_title = JoinedRecord {
            title: Some(String::new()),
            ..base.clone()
        };
        let stream = from_records(vec![base.clone(), empty_title.clone(), base.clone()], &["/about"], 10);
        let (matches, stats) = collect_matches(stream).unwrap();
        assert_eq!(matches, vec![base, empty_title]);
        assert_eq!(stats.duplicates_suppressed, 1);
    }

    #[test]
    fn test_dedup_state_stays_off_heap() {
        let records: Vec<JoinedRecord> = (0..1000)
            .flat_map(|i| {
                let r = joined("a.example", &format!("https://a.example/{i}/about"));
                [r.clone(), r]
            })
            .collect();
        let mut stream = from_records(records, &["/about"], 10);

        let mut emitted = 0;
        while let Some(item) = stream.next() {
            item.unwrap();
            emitted += 1;
            assert!(stream.buffered() <= 10);
            if let Some(cursor) = &stream.cursor {
                assert!(cursor.seen.len() >= emitted);
            }
        }
        assert_eq!(emitted, 1000);
        assert_eq!(stream.stats().duplicates_suppressed, 1000);
        assert_eq!(stream.stats().rows_scanned, 2000);
    }

    #[test]
    fn test_stream_exact_multiple_of_chunk_size() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("joined.parquet");
        write_joined(
            &path,
            &[joined("a.example", "https://a.example/about"), joined("b.example", "https://b.example/bio")],
        );

        let (matches, stats) = collect_matches(open(&path, &["/about", "/bio"], 2)).unwrap();
        assert_eq!(matches.len(), 2);
        // Second, empty chunk confirms the end
        assert_eq!(stats.chunks_read, 2);
    }

    #[test]
    fn test_stream_empty_artifact() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("joined.parquet");
        write_joined(&path, &[]);

        let mut stream = open(&path, &["/about"], 10);
        assert!(stream.next().is_none());
        assert_eq!(stream.state(), ScanState::Done);
    }

    #[test]
    fn test_stream_read_failure_is_terminal() {
        let rows = vec![
            Ok(joined("a.example", "https://a.example/about")),
            Ok(joined("a.example", "https://a.example/x")),
            Err(ParquetError::General("truncated page".into())),
            Ok(joined("a.example", "https://a.example/bio")),
        ];
        let patterns = PatternSet::new(["/about", "/bio"]).unwrap();
        let mut stream =
            AboutPageStream::from_rows(rows.into_iter(), patterns, 2, 4, EngineSettings::default()).unwrap();

        assert_eq!(stream.next().unwrap().unwrap().url, "https://a.example/about");
        match stream.next() {
            Some(Err(PipelineError::Read { offset, .. })) => assert_eq!(offset, 2),
            other => panic!("expected read error, got {:?}", other.map(|r| r.is_ok())),
        }
        assert_eq!(stream.state(), ScanState::Failed);
        assert!(stream.next().is_none());
    }

    #[test]
    fn test_open_rejects_non_join_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("other.parquet");
        let mut writer = TextTableWriter::create(&path, "t", &[TextColumn::required("url")], 10).unwrap();
        writer.push_row([Some("https://a.example/about".to_string())]).unwrap();
        writer.finish().unwrap();

        let patterns = PatternSet::new(["/about"]).unwrap();
        let err = AboutPageStream::open(&path, patterns, 10, EngineSettings::default()).err().unwrap();
        assert!(matches!(err, PipelineError::InputFormat { .. }));

        let garbage = dir.path().join("garbage.parquet");
        std::fs::write(&garbage, b"not parquet at all").unwrap();
        let patterns = PatternSet::new(["/about"]).unwrap();
        let err = AboutPageStream::open(&garbage, patterns, 10, EngineSettings::default()).err().unwrap();
        assert!(matches!(err, PipelineError::InputFormat { .. }));
    }
}
