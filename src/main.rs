use aboutpage_extract::config::{
    default_patterns, default_work_path, load_pattern_file, parse_pattern_list, EngineSettings,
    FeedListFormat, PipelineConfig, DEFAULT_FILTER_CHUNK_SIZE, DEFAULT_JOIN_CHUNK_SIZE,
    DEFAULT_MEMORY_MB, DEFAULT_THREADS,
};
use aboutpage_extract::models::{MatchRecord, RunStats};
use aboutpage_extract::pipeline::{export_matches, run_filter, run_join};
use aboutpage_extract::progress::{format_duration, set_log_only};
use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::time::Instant;

#[derive(Parser)]
#[command(name = "aboutpage-extract")]
#[command(about = "Find candidate about pages by joining URL metadata against feed domains")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    #[command(flatten)]
    common: CommonArgs,
}

#[derive(Subcommand)]
enum Commands {
    /// Load feeds and metadata, write the domain join
    Join(JoinArgs),
    /// Stream about-page matches out of an existing join
    Filter(FilterArgs),
    /// Join, then filter
    Run(RunArgs),
}

#[derive(Args)]
struct CommonArgs {
    /// Memory ceiling for the storage engine, in MB
    #[arg(long, global = true, default_value_t = DEFAULT_MEMORY_MB)]
    memory_mb: u64,

    /// Auxiliary sorter threads for the storage engine
    #[arg(long, global = true, default_value_t = DEFAULT_THREADS)]
    threads: u32,

    /// Hide progress bars, log progress lines instead
    #[arg(long, global = true)]
    log_only: bool,

    /// Write run statistics as JSON to this file
    #[arg(long, global = true)]
    stats_json: Option<PathBuf>,
}

#[derive(Args)]
struct JoinArgs {
    /// Feed list (CSV, optionally .gz)
    feeds: PathBuf,

    /// URL-metadata corpus (Parquet with url, title, description columns)
    corpus: PathBuf,

    /// Join output (ZSTD-compressed Parquet)
    output: PathBuf,

    /// Column position of the feed URL
    #[arg(long, default_value_t = 0)]
    feed_column: usize,

    /// Feed list has a header row
    #[arg(long)]
    feed_header: bool,

    /// Working database (default: <output>.work.sqlite3)
    #[arg(long)]
    work_db: Option<PathBuf>,

    /// Keep the working database after the join, even a failed one
    #[arg(long)]
    keep_work_db: bool,

    #[arg(long, default_value_t = DEFAULT_JOIN_CHUNK_SIZE)]
    join_chunk_size: usize,
}

#[derive(Args)]
struct PatternArgs {
    /// About-page patterns, comma-separated (default: built-in multilingual list)
    #[arg(long, conflicts_with = "patterns_file")]
    patterns: Option<String>,

    /// File with one about-page pattern per line
    #[arg(long)]
    patterns_file: Option<PathBuf>,

    #[arg(long, default_value_t = DEFAULT_FILTER_CHUNK_SIZE)]
    filter_chunk_size: usize,

    /// Write matches as JSON lines to this file instead of stdout (replaced only on success)
    #[arg(long)]
    out: Option<PathBuf>,

    /// Print the first N matches as a summary on stderr
    #[arg(long, default_value_t = 0)]
    preview: usize,
}

#[derive(Args)]
struct FilterArgs {
    /// Join output produced by `join`
    joined: PathBuf,

    #[command(flatten)]
    patterns: PatternArgs,
}

#[derive(Args)]
struct RunArgs {
    #[command(flatten)]
    join: JoinArgs,

    #[command(flatten)]
    patterns: PatternArgs,
}

impl PatternArgs {
    fn resolve(&self) -> Result<Vec<String>> {
        if let Some(path) = &self.patterns_file {
            return Ok(load_pattern_file(path)?);
        }
        match &self.patterns {
            Some(list) => Ok(parse_pattern_list(list)),
            None => Ok(default_patterns()),
        }
    }
}

fn join_config(args: &JoinArgs, engine: EngineSettings) -> PipelineConfig {
    let mut config = PipelineConfig::new(args.feeds.clone(), args.corpus.clone(), args.output.clone());
    config.feed_format = FeedListFormat {
        url_column: args.feed_column,
        has_header: args.feed_header,
        ..Default::default()
    };
    config.work_path = args
        .work_db
        .clone()
        .unwrap_or_else(|| default_work_path(&args.output));
    config.join_chunk_size = args.join_chunk_size;
    config.keep_work_db = args.keep_work_db;
    config.engine = engine;
    config
}

fn write_preview<W: Write>(out: &mut W, preview: &[MatchRecord]) -> std::io::Result<()> {
    writeln!(out, "\nFirst {} matching about pages:", preview.len())?;
    for record in preview {
        writeln!(out, "\nFeed URL: {}", record.feed_url)?;
        writeln!(out, "URL: {}", record.url)?;
        if let Some(title) = &record.title {
            writeln!(out, "Title: {}", title)?;
        }
        if let Some(description) = &record.description {
            writeln!(out, "Description: {}", description)?;
        }
    }
    out.flush()
}

fn filter_to_json_lines(joined: &Path, args: &PatternArgs, engine: EngineSettings, stats: &mut RunStats) -> Result<()> {
    let patterns = args.resolve()?;
    tracing::info!(patterns = patterns.len(), "using about-page patterns");

    let mut preview: Vec<MatchRecord> = Vec::with_capacity(args.preview);
    let mut keep_preview = |record: &MatchRecord| {
        if preview.len() < args.preview {
            preview.push(record.clone());
        }
    };

    let filter_stats = match &args.out {
        Some(out) => export_matches(joined, &patterns, args.filter_chunk_size, engine, out, keep_preview)?,
        None => {
            let mut writer = BufWriter::new(std::io::stdout().lock());
            let filter_stats = run_filter(joined, &patterns, args.filter_chunk_size, engine, |record| {
                serde_json::to_writer(&mut writer, record)?;
                writer.write_all(b"\n")?;
                keep_preview(record);
                Ok(())
            })?;
            writer.flush()?;
            filter_stats
        }
    };

    // Stdout carries nothing but JSON lines
    if !preview.is_empty() {
        write_preview(&mut std::io::stderr().lock(), &preview)?;
    }

    stats.filter = Some(filter_stats);
    stats.log_phase("filter");
    Ok(())
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .with_writer(std::io::stderr)
        .init();

    set_log_only(cli.common.log_only);
    let engine = EngineSettings {
        memory_mb: cli.common.memory_mb,
        threads: cli.common.threads,
    };

    let start = Instant::now();
    let mut stats = RunStats::default();

    match &cli.command {
        Commands::Join(args) => {
            let config = join_config(args, engine);
            stats.join = Some(run_join(&config)?);
            stats.log_phase("join");
        }
        Commands::Filter(args) => {
            filter_to_json_lines(&args.joined, &args.patterns, engine, &mut stats)?;
        }
        Commands::Run(args) => {
            let mut config = join_config(&args.join, engine);
            config.patterns = args.patterns.resolve()?;
            config.filter_chunk_size = args.patterns.filter_chunk_size;
            config.validate()?;

            stats.join = Some(run_join(&config)?);
            stats.log_phase("join");
            filter_to_json_lines(&config.output_path, &args.patterns, engine, &mut stats)?;
        }
    }

    if let Some(path) = &cli.common.stats_json {
        stats
            .write_to_file(path)
            .with_context(|| format!("Failed to write stats to {:?}", path))?;
    }

    tracing::info!(
        elapsed = %format_duration(start.elapsed()),
        "Total processing time"
    );
    Ok(())
}
