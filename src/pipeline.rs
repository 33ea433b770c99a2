//! Phase orchestration: feed table → metadata load → domain join, and the
//! streaming filter over the join output.
//!
//! Every phase opens its own connections and closes them before returning.

use crate::config::{EngineSettings, PipelineConfig};
use crate::feeds::{load_feed_list, write_feeds};
use crate::filter::{AboutPageStream, PatternSet};
use crate::join::join_domains;
use crate::metadata::load_metadata;
use crate::models::{FilterStats, JoinStats, MatchRecord};
use crate::progress::{chunk_reporter, create_progress_bar, create_spinner, format_duration};
use crate::safety::{validate_join_paths, validate_match_output};
use crate::storage::{open_bulk_writer, PartialOutput, ScratchFile};
use anyhow::{Context, Result};
use indicatif::ProgressBar;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;
use std::time::Instant;

/// Build the join artifact at `config.output_path`.
pub fn run_join(config: &PipelineConfig) -> Result<JoinStats> {
    config.validate()?;
    validate_join_paths(
        &config.feeds_path,
        &config.corpus_path,
        &config.work_path,
        &config.output_path,
    )?;

    let start = Instant::now();
    let mut stats = JoinStats::default();

    // Phase 1: feed table
    let phase = Instant::now();
    let feeds = load_feed_list(&config.feeds_path, &config.feed_format)
        .with_context(|| format!("Failed to load feed list {:?}", config.feeds_path))?;
    stats.feeds_loaded = feeds.len() as u64;
    stats.feeds_skipped = feeds.skipped;

    // Declared before the connection so the file outlives it
    let _work_guard = ScratchFile::new(&config.work_path, config.keep_work_db);
    let mut work = open_bulk_writer(&config.work_path, config.engine)
        .with_context(|| format!("Failed to open working database {:?}", config.work_path))?;
    write_feeds(&mut work, &feeds)?;
    drop(feeds);
    tracing::info!(
        feeds = stats.feeds_loaded,
        skipped = stats.feeds_skipped,
        elapsed = %format_duration(phase.elapsed()),
        "Phase 1: feed table built"
    );

    // Phase 2: metadata working table
    let phase = Instant::now();
    let pb = create_progress_bar(0, "Phase 2: Loading metadata");
    let loaded = load_metadata(
        &config.corpus_path,
        &mut work,
        config.join_chunk_size,
        chunk_reporter("metadata", &pb),
    )
    .with_context(|| format!("Failed to load metadata corpus {:?}", config.corpus_path))?;
    pb.finish_with_message(format!("Phase 2: Loaded {} metadata rows", loaded.loaded));
    stats.meta_rows_loaded = loaded.loaded;
    stats.meta_rows_skipped = loaded.skipped;
    tracing::info!(
        loaded = loaded.loaded,
        skipped = loaded.skipped,
        elapsed = %format_duration(phase.elapsed()),
        "Phase 2: metadata loaded"
    );

    // Phase 3: join
    let phase = Instant::now();
    let pb = create_progress_bar(loaded.loaded, "Phase 3: Joining domains");
    let joined = join_domains(
        &work,
        &config.output_path,
        config.join_chunk_size,
        chunk_reporter("join", &pb),
    )
    .with_context(|| format!("Failed to write join output {:?}", config.output_path))?;
    pb.finish_with_message(format!("Phase 3: Wrote {} joined rows", joined.joined));
    stats.joined_rows = joined.joined;
    tracing::info!(
        joined = joined.joined,
        elapsed = %format_duration(phase.elapsed()),
        "Phase 3: domain join written"
    );

    stats.elapsed_seconds = start.elapsed().as_secs_f64();
    Ok(stats)
}

fn open_stream(joined: &Path, patterns: &[String], chunk_size: usize, engine: EngineSettings) -> Result<AboutPageStream> {
    let patterns = PatternSet::new(patterns)?;
    let stream = AboutPageStream::open(joined, patterns, chunk_size, engine)
        .with_context(|| format!("Failed to open join output {:?}", joined))?;
    tracing::info!(
        rows = stream.total_rows(),
        chunk_size,
        patterns = ?stream.patterns().patterns(),
        "Phase 4: filtering for about pages"
    );
    Ok(stream)
}

fn finish_filter(stream: &AboutPageStream, spinner: ProgressBar) -> FilterStats {
    let stats = stream.stats().clone();
    spinner.finish_with_message(format!("Phase 4: Found {} about pages", stats.matches_emitted));
    tracing::info!(
        matches = stats.matches_emitted,
        scanned = stats.rows_scanned,
        duplicates = stats.duplicates_suppressed,
        match_rate = %format!("{:.2}%", stats.match_rate()),
        elapsed = %format_duration(std::time::Duration::from_secs_f64(stats.elapsed_seconds)),
        "Phase 4: filtering complete"
    );
    stats
}

/// Stream distinct about-page matches out of the join artifact at `joined`.
///
/// `on_match` sees each match as soon as its chunk is scanned; an error from
/// it stops the scan. A failed chunk read fails the whole call.
pub fn run_filter<F>(
    joined: &Path,
    patterns: &[String],
    chunk_size: usize,
    engine: EngineSettings,
    mut on_match: F,
) -> Result<FilterStats>
where
    F: FnMut(&MatchRecord) -> Result<()>,
{
    let mut stream = open_stream(joined, patterns, chunk_size, engine)?;

    let spinner = create_spinner("Phase 4: Filtering about pages");
    for item in stream.by_ref() {
        let record = item.context("About-page scan aborted")?;
        on_match(&record)?;
        spinner.inc(1);
    }
    Ok(finish_filter(&stream, spinner))
}

/// Write `matches` to `out` as JSON lines, one object per match.
///
/// Lines go to `<out>.partial`, which is renamed to `out` only once every
/// match is written and synced. Any error leaves `out` as it was before the
/// call and removes the partial file.
pub fn write_match_lines<I, F>(matches: I, out: &Path, mut on_match: F) -> Result<u64>
where
    I: Iterator<Item = crate::Result<MatchRecord>>,
    F: FnMut(&MatchRecord),
{
    let partial = PartialOutput::new(out)?;
    let file = File::create(partial.path()).with_context(|| format!("Failed to create {:?}", partial.path()))?;
    let mut writer = BufWriter::new(file);

    let mut written = 0u64;
    for item in matches {
        let record = item.context("About-page scan aborted")?;
        serde_json::to_writer(&mut writer, &record)?;
        writer.write_all(b"\n")?;
        on_match(&record);
        written += 1;
    }
    writer.into_inner().map_err(|e| e.into_error())?.sync_all()?;
    partial.commit(out)?;
    Ok(written)
}

/// Filter `joined` into the JSON-lines file `out`, written atomically.
pub fn export_matches<F>(
    joined: &Path,
    patterns: &[String],
    chunk_size: usize,
    engine: EngineSettings,
    out: &Path,
    mut on_match: F,
) -> Result<FilterStats>
where
    F: FnMut(&MatchRecord),
{
    validate_match_output(out, joined)?;
    let mut stream = open_stream(joined, patterns, chunk_size, engine)?;

    let spinner = create_spinner("Phase 4: Filtering about pages");
    let written = write_match_lines(stream.by_ref(), out, |record| {
        on_match(record);
        spinner.inc(1);
    })
    .with_context(|| format!("Failed to write matches to {:?}", out))?;
    tracing::info!(path = %out.display(), written, "wrote about-page matches");
    Ok(finish_filter(&stream, spinner))
}
