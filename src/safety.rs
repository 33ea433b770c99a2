//! Safety utilities to prevent accidental file deletion.
//!
//! The join replaces its output file and the loader rebuilds the working
//! database, so both paths are checked against the inputs before anything
//! is written.

use crate::join::is_join_artifact;
use anyhow::{bail, Result};
use rusqlite::{Connection, OpenFlags};
use std::path::Path;

fn same_file(a: &Path, b: &Path) -> bool {
    if a == b {
        return true;
    }
    match (a.canonicalize(), b.canonicalize()) {
        (Ok(a), Ok(b)) => a == b,
        _ => false,
    }
}

/// True when `path` is a database holding a `feeds` table.
fn is_work_db(path: &Path) -> bool {
    let Ok(conn) = Connection::open_with_flags(path, OpenFlags::SQLITE_OPEN_READ_ONLY) else {
        return false;
    };
    conn.query_row(
        "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = 'feeds'",
        [],
        |row| row.get::<_, i64>(0),
    )
    .map(|n| n > 0)
    .unwrap_or(false)
}

/// Validates that an output path is safe to overwrite.
///
/// Checks:
/// - Output cannot be the same file as any of the provided source paths
/// - An existing output must be empty or pass `is_ours` (a previous output
///   of the same kind), never some other file
///
/// # Arguments
/// * `output` - The output path that will be created/overwritten
/// * `kind` - What an earlier output of this kind is, for the error message
/// * `is_ours` - Recognizes an earlier output of this kind
/// * `source_paths` - Slice of source paths that must not match the output
pub fn validate_output_path<P>(output: &Path, kind: &str, is_ours: P, source_paths: &[&Path]) -> Result<()>
where
    P: Fn(&Path) -> bool,
{
    for source in source_paths {
        if same_file(output, source) {
            bail!(
                "Safety check failed: output '{}' cannot be the same as source '{}'",
                output.display(),
                source.display()
            );
        }
    }

    if output.exists() {
        let len = std::fs::metadata(output)?.len();
        if len > 0 && !is_ours(output) {
            bail!(
                "Safety check failed: refusing to overwrite '{}', it is not a {}",
                output.display(),
                kind
            );
        }
    }

    Ok(())
}

/// Check every path a join run writes against every path it reads.
pub fn validate_join_paths(feeds: &Path, corpus: &Path, work: &Path, output: &Path) -> Result<()> {
    if same_file(work, output) {
        bail!(
            "Safety check failed: working database and output are both '{}'",
            output.display()
        );
    }
    validate_output_path(output, "join artifact", is_join_artifact, &[feeds, corpus])?;
    validate_output_path(work, "working database", is_work_db, &[feeds, corpus])?;
    Ok(())
}

/// Check a match output path against the join artifact it is read from.
pub fn validate_match_output(output: &Path, joined: &Path) -> Result<()> {
    if same_file(output, joined) {
        bail!(
            "Safety check failed: output '{}' cannot be the same as source '{}'",
            output.display(),
            joined.display()
        );
    }
    Ok(())
}
