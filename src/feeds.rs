//! Domain table builder: reads the feed list and extracts one domain key
//! per feed.

use crate::config::FeedListFormat;
use crate::domain::domain_key;
use crate::error::{PipelineError, Result};
use crate::models::FeedRecord;
use flate2::read::GzDecoder;
use rusqlite::{params, Connection};
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;

/// Feeds loaded for one run, plus how many rows were unusable.
#[derive(Debug, Default, Clone)]
pub struct FeedTable {
    pub records: Vec<FeedRecord>,
    pub skipped: u64,
}

impl FeedTable {
    /// Build from raw URL cells; `None` stands for a row without the URL column.
    pub fn from_urls<I, S>(urls: I) -> Self
    where
        I: IntoIterator<Item = Option<S>>,
        S: AsRef<str>,
    {
        let mut table = FeedTable::default();
        for url in urls {
            table.push(url.as_ref().map(|u| u.as_ref()));
        }
        table
    }

    fn push(&mut self, url: Option<&str>) {
        let Some(url) = url.map(str::trim).filter(|u| !u.is_empty()) else {
            self.skipped += 1;
            return;
        };
        match domain_key(url) {
            Some(feed_domain) => self.records.push(FeedRecord {
                feed_url: url.to_string(),
                feed_domain,
            }),
            None => self.skipped += 1,
        }
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

fn open_feed_reader(path: &Path) -> Result<Box<dyn Read>> {
    let file = File::open(path).map_err(|e| PipelineError::InputFormat {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })?;
    let is_gzip = path
        .extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case("gz"));
    if is_gzip {
        Ok(Box::new(GzDecoder::new(BufReader::new(file))))
    } else {
        Ok(Box::new(BufReader::new(file)))
    }
}

/// Load the feed list at `path` (plain or `.gz` delimited text).
///
/// Rows that lack the URL column, hold non-UTF-8 bytes in it, or yield an
/// empty domain are skipped and counted. I/O and decompression failures
/// abort the load.
pub fn load_feed_list(path: &Path, format: &FeedListFormat) -> Result<FeedTable> {
    let reader = open_feed_reader(path)?;
    let mut rdr = csv::ReaderBuilder::new()
        .has_headers(format.has_header)
        .delimiter(format.delimiter)
        .flexible(true)
        .from_reader(reader);

    let mut table = FeedTable::default();
    for result in rdr.byte_records() {
        let record = match result {
            Ok(record) => record,
            Err(e) if e.is_io_error() => {
                return Err(PipelineError::InputFormat {
                    path: path.to_path_buf(),
                    reason: e.to_string(),
                })
            }
            Err(e) => {
                tracing::debug!(error = %e, "skipping malformed feed row");
                table.skipped += 1;
                continue;
            }
        };
        let url = record
            .get(format.url_column)
            .and_then(|field| std::str::from_utf8(field).ok());
        table.push(url);
    }

    tracing::info!(
        path = %path.display(),
        feeds = table.len(),
        skipped = table.skipped,
        "loaded feed list"
    );
    Ok(table)
}

/// (Re-)create the working `feeds` table and fill it.
pub fn write_feeds(conn: &mut Connection, feeds: &FeedTable) -> Result<()> {
    conn.execute_batch(
        "DROP TABLE IF EXISTS feeds;
         CREATE TABLE feeds (
            feed_url    TEXT NOT NULL,
            feed_domain TEXT NOT NULL
         );",
    )
    .map_err(|e| PipelineError::engine("feed table", e))?;

    let tx = conn
        .transaction()
        .map_err(|e| PipelineError::engine("feed table", e))?;
    {
        let mut stmt = tx
            .prepare_cached("INSERT INTO feeds (feed_url, feed_domain) VALUES (?1, ?2)")
            .map_err(|e| PipelineError::engine("feed table", e))?;
        for feed in &feeds.records {
            stmt.execute(params![feed.feed_url, feed.feed_domain])
                .map_err(|e| PipelineError::engine("feed table", e))?;
        }
    }
    tx.commit().map_err(|e| PipelineError::engine("feed table", e))?;

    conn.execute_batch("CREATE INDEX idx_feed_domain ON feeds(feed_domain);")
        .map_err(|e| PipelineError::engine("feed table", e))?;
    Ok(())
}

/// Read the working `feeds` table back, in load order.
pub fn read_feeds(conn: &Connection) -> Result<Vec<FeedRecord>> {
    let mut stmt = conn
        .prepare("SELECT feed_url, feed_domain FROM feeds ORDER BY rowid")
        .map_err(|e| PipelineError::engine("feed table", e))?;
    let rows = stmt
        .query_map([], |row| {
            Ok(FeedRecord {
                feed_url: row.get(0)?,
                feed_domain: row.get(1)?,
            })
        })
        .map_err(|e| PipelineError::engine("feed table", e))?;
    rows.collect::<rusqlite::Result<Vec<_>>>()
        .map_err(|e| PipelineError::engine("feed table", e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::write::GzEncoder;
    use flate2::Compression;
    use std::io::Write;
    use tempfile::TempDir;

    #[test]
    fn test_from_urls_extracts_domains() {
        let table = FeedTable::from_urls(vec![
            Some("https://blog.example/feed"),
            Some("news.example:8080/rss"),
        ]);
        assert_eq!(table.len(), 2);
        assert_eq!(table.records[0].feed_domain, "blog.example");
        assert_eq!(table.records[1].feed_domain, "news.example");
        assert_eq!(table.skipped, 0);
    }

    #[test]
    fn test_from_urls_skips_missing_and_empty() {
        let table = FeedTable::from_urls(vec![None, Some("   "), Some("https:///x"), Some("ok.example")]);
        assert_eq!(table.len(), 1);
        assert_eq!(table.skipped, 3);
    }

    #[test]
    fn test_load_feed_list_column_position() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("feeds.csv");
        std::fs::write(&path, "1,https://a.example/feed,x\n2\n3,b.example/rss,y\n").unwrap();

        let format = FeedListFormat { url_column: 1, ..Default::default() };
        let table = load_feed_list(&path, &format).unwrap();
        let domains: Vec<_> = table.records.iter().map(|f| f.feed_domain.as_str()).collect();
        assert_eq!(domains, vec!["a.example", "b.example"]);
        assert_eq!(table.skipped, 1);
    }

    #[test]
    fn test_load_feed_list_header() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("feeds.csv");
        std::fs::write(&path, "url\nhttps://a.example/feed\n").unwrap();

        let format = FeedListFormat { has_header: true, ..Default::default() };
        let table = load_feed_list(&path, &format).unwrap();
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn test_load_feed_list_gzip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("feeds.csv.gz");
        let mut encoder = GzEncoder::new(File::create(&path).unwrap(), Compression::default());
        encoder.write_all(b"https://a.example/feed\nhttps://b.example/feed\n").unwrap();
        encoder.finish().unwrap();

        let table = load_feed_list(&path, &FeedListFormat::default()).unwrap();
        assert_eq!(table.len(), 2);
    }

    #[test]
    fn test_load_feed_list_missing_file() {
        let dir = TempDir::new().unwrap();
        let err = load_feed_list(&dir.path().join("nope.csv"), &FeedListFormat::default()).unwrap_err();
        assert!(matches!(err, PipelineError::InputFormat { .. }));
    }

    #[test]
    fn test_load_feed_list_corrupt_gzip_is_fatal() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("feeds.csv.gz");
        std::fs::write(&path, b"definitely not gzip").unwrap();
        assert!(load_feed_list(&path, &FeedListFormat::default()).is_err());
    }

    #[test]
    fn test_write_and_read_feeds() {
        let mut conn = Connection::open_in_memory().unwrap();
        let table = FeedTable::from_urls(vec![Some("https://b.example/f"), Some("https://a.example/f")]);
        write_feeds(&mut conn, &table).unwrap();
        // Re-creating is idempotent
        write_feeds(&mut conn, &table).unwrap();
        assert_eq!(read_feeds(&conn).unwrap(), table.records);
    }
}
