//! Core data models for the about-page extraction pipeline.
//!
//! Records flow leaf-first: `FeedRecord` and `MetaRecord` are loaded once per
//! run, `JoinedRecord` lives in the persisted join artifact, and
//! `MatchRecord` is what downstream scraping/geocoding consumes.

use serde::Serialize;

// ============================================================================
// Input Records
// ============================================================================

/// Feed from the feed list, with its domain extracted once at load time.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FeedRecord {
    pub feed_url: String,
    pub feed_domain: String, // Never empty (empty-domain feeds are skipped)
}

/// Row of the URL-metadata corpus.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MetaRecord {
    pub url: String,
    pub url_domain: String,
    pub title: Option<String>,
    pub description: Option<String>,
}

// ============================================================================
// Join / Match Records
// ============================================================================

/// Metadata row paired with a feed whose domain occurs inside the row's domain.
///
/// Invariant: `url_domain.contains(&feed_domain)` and `feed_domain` is non-empty.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize)]
pub struct JoinedRecord {
    pub feed_url: String,
    pub feed_domain: String,
    pub url: String,
    pub url_domain: String,
    pub title: Option<String>,
    pub description: Option<String>,
}

/// Joined record whose URL contains an about-page pattern.
/// Serialized as one JSON object per line for external consumers.
pub type MatchRecord = JoinedRecord;

// ============================================================================
// Statistics (Instrumentation)
// ============================================================================

/// Progress of the metadata loader, reported after each chunk.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ChunkProgress {
    pub chunk: u64,
    pub processed: u64, // Source rows read so far (loaded + skipped)
    pub total: u64,     // Rows the phase will read
    pub skipped: u64,
}

impl ChunkProgress {
    pub fn percent(&self) -> f64 {
        if self.total == 0 {
            100.0
        } else {
            100.0 * self.processed as f64 / self.total as f64
        }
    }
}

/// Counts for the join phase (feed table, metadata load, join write).
#[derive(Default, Debug, Clone, Serialize)]
pub struct JoinStats {
    pub feeds_loaded: u64,
    pub feeds_skipped: u64,
    pub meta_rows_loaded: u64,
    pub meta_rows_skipped: u64,
    pub joined_rows: u64,
    pub elapsed_seconds: f64,
}

/// Counts for the streaming filter.
#[derive(Default, Debug, Clone, Serialize)]
pub struct FilterStats {
    pub chunks_read: u64,
    pub rows_scanned: u64,
    pub matches_emitted: u64,
    pub duplicates_suppressed: u64,
    pub elapsed_seconds: f64,
}

impl FilterStats {
    /// Share of scanned joined rows that produced a match, as a percentage
    pub fn match_rate(&self) -> f64 {
        if self.rows_scanned == 0 {
            0.0
        } else {
            100.0 * self.matches_emitted as f64 / self.rows_scanned as f64
        }
    }
}

/// Everything a full run reports; written by `--stats-json`.
#[derive(Default, Debug, Clone, Serialize)]
pub struct RunStats {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub join: Option<JoinStats>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub filter: Option<FilterStats>,
}

impl RunStats {
    /// Log stats at info level in JSON format
    pub fn log_phase(&self, phase: &str) {
        if let Ok(json) = serde_json::to_string(self) {
            tracing::info!(phase, stats = %json, "phase statistics");
        }
    }

    /// Write stats to a JSON file
    pub fn write_to_file(&self, path: &std::path::Path) -> anyhow::Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        Ok(())
    }
}
