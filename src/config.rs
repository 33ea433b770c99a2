//! Pipeline configuration: paths, chunk sizes, engine limits and the
//! about-page pattern list.

use crate::error::{PipelineError, Result};
use crate::storage::chunk_limit;
use once_cell::sync::Lazy;
use std::path::{Path, PathBuf};

/// Rows per chunk when loading the metadata corpus and writing the join.
pub const DEFAULT_JOIN_CHUNK_SIZE: usize = 1_000_000;

/// Joined rows per chunk when streaming the filter.
pub const DEFAULT_FILTER_CHUNK_SIZE: usize = 100_000;

pub const DEFAULT_MEMORY_MB: u64 = 4096;

pub const DEFAULT_THREADS: u32 = 4;

/// Multilingual about-page path fragments (English, Spanish, German, French).
pub static DEFAULT_ABOUT_PATTERNS: Lazy<Vec<&str>> = Lazy::new(|| {
    vec![
        // English
        "/about", "/about-me", "/bio", "/biography", "/me", "/who-am-i", "/about/me",
        "/hello", "/introduction", "/personal", "/profile", "/my-story", "/my-journey",
        "/about-the-author", "/meet-me",
        // Spanish
        "/sobre-mi", "/quien-soy", "/acerca-de-mi", "/mi-biografia", "/mi-historia",
        "/biografia", "/presentacion", "/perfil", "/conoceme", "/hola",
        // German
        "/ueber-mich", "/über-mich", "/ich", "/meine-geschichte", "/biografie",
        "/das-bin-ich", "/steckbrief", "/vorstellung", "/hallo", "/personliches",
        "/persönliches",
        // French
        "/a-propos", "/qui-suis-je", "/biographie", "/ma-bio", "/mon-parcours",
        "/me-connaitre", "/me-connaître", "/presentation", "/présentation", "/bonjour",
        "/mon-histoire",
    ]
});

pub fn default_patterns() -> Vec<String> {
    DEFAULT_ABOUT_PATTERNS.iter().map(|p| p.to_string()).collect()
}

/// Parse a comma-separated pattern list (`/about,/bio`).
pub fn parse_pattern_list(s: &str) -> Vec<String> {
    s.split(',')
        .map(|p| p.trim())
        .filter(|p| !p.is_empty())
        .map(|p| p.to_string())
        .collect()
}

/// Read a pattern file: one pattern per line, blank lines and `#` comments ignored.
pub fn load_pattern_file(path: &Path) -> Result<Vec<String>> {
    let content = std::fs::read_to_string(path)?;
    let patterns: Vec<String> = content
        .lines()
        .map(|l| l.trim())
        .filter(|l| !l.is_empty() && !l.starts_with('#'))
        .map(|l| l.to_string())
        .collect();
    if patterns.is_empty() {
        return Err(PipelineError::Config(format!(
            "pattern file '{}' contains no patterns",
            path.display()
        )));
    }
    Ok(patterns)
}

/// Limits handed to every engine connection a phase opens.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct EngineSettings {
    pub memory_mb: u64,
    pub threads: u32,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            memory_mb: DEFAULT_MEMORY_MB,
            threads: DEFAULT_THREADS,
        }
    }
}

/// How to read the feed list.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FeedListFormat {
    pub url_column: usize,
    pub has_header: bool,
    pub delimiter: u8,
}

impl Default for FeedListFormat {
    fn default() -> Self {
        Self {
            url_column: 0,
            has_header: false,
            delimiter: b',',
        }
    }
}

/// Full configuration of one pipeline run.
#[derive(Clone, Debug)]
pub struct PipelineConfig {
    pub feeds_path: PathBuf,
    pub feed_format: FeedListFormat,
    pub corpus_path: PathBuf,
    pub work_path: PathBuf,
    pub output_path: PathBuf,
    pub join_chunk_size: usize,
    pub filter_chunk_size: usize,
    pub engine: EngineSettings,
    pub patterns: Vec<String>,
    pub keep_work_db: bool,
}

impl PipelineConfig {
    /// Config with defaults for everything but the three paths.
    /// The working database sits next to the output (`<output>.work.sqlite3`).
    pub fn new(feeds_path: PathBuf, corpus_path: PathBuf, output_path: PathBuf) -> Self {
        let work_path = default_work_path(&output_path);
        Self {
            feeds_path,
            feed_format: FeedListFormat::default(),
            corpus_path,
            work_path,
            output_path,
            join_chunk_size: DEFAULT_JOIN_CHUNK_SIZE,
            filter_chunk_size: DEFAULT_FILTER_CHUNK_SIZE,
            engine: EngineSettings::default(),
            patterns: default_patterns(),
            keep_work_db: false,
        }
    }

    pub fn validate(&self) -> Result<()> {
        chunk_limit(self.join_chunk_size)?;
        if self.filter_chunk_size == 0 {
            return Err(PipelineError::Config("filter chunk size must be > 0".into()));
        }
        if self.engine.memory_mb == 0 {
            return Err(PipelineError::Config("memory ceiling must be > 0 MB".into()));
        }
        if self.patterns.is_empty() {
            return Err(PipelineError::Config("at least one about-page pattern is required".into()));
        }
        Ok(())
    }
}

/// `<output>.work.sqlite3`, alongside the join output.
pub fn default_work_path(output: &Path) -> PathBuf {
    let mut name = output
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_else(|| "joined".into());
    name.push(".work.sqlite3");
    output.with_file_name(name)
}
