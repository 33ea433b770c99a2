//! Error taxonomy for the extraction pipeline.
//!
//! Every failure here is fatal for the phase that raised it. Row-level
//! anomalies (a feed or metadata row without a usable URL) are not errors;
//! they are counted in the phase statistics instead.

use parquet::errors::ParquetError;
use rusqlite::ErrorCode;
use std::path::PathBuf;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, PipelineError>;

/// `ENOSPC` on Linux and macOS.
const NO_SPACE_LEFT: i32 = 28;

#[derive(Error, Debug)]
pub enum PipelineError {
    /// Corrupt, unreadable or wrongly-shaped source file
    #[error("Input format error in {path}: {reason}")]
    InputFormat { path: PathBuf, reason: String },

    /// Disk full, out of memory or I/O failure inside the engine
    #[error("Resource exhausted during {phase}: {source}")]
    ResourceExhausted {
        phase: &'static str,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// A chunk read failed while streaming the joined artifact
    #[error("Read failed after {offset} rows: {source}")]
    Read {
        offset: u64,
        #[source]
        source: ParquetError,
    },

    /// Any other working-database failure
    #[error("Storage error during {phase}: {source}")]
    Storage {
        phase: &'static str,
        #[source]
        source: rusqlite::Error,
    },

    /// Any other failure writing a columnar file
    #[error("Columnar write error during {phase}: {source}")]
    Columnar {
        phase: &'static str,
        #[source]
        source: ParquetError,
    },

    /// Invalid settings (zero or oversized chunk size, empty pattern)
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl PipelineError {
    /// Classify a working-database error raised during `phase`.
    pub fn engine(phase: &'static str, source: rusqlite::Error) -> Self {
        if sqlite_exhaustion(&source) {
            PipelineError::ResourceExhausted {
                phase,
                source: Box::new(source),
            }
        } else {
            PipelineError::Storage { phase, source }
        }
    }

    /// Classify a columnar write error raised during `phase`.
    pub fn columnar(phase: &'static str, source: ParquetError) -> Self {
        if parquet_exhaustion(&source) {
            PipelineError::ResourceExhausted {
                phase,
                source: Box::new(source),
            }
        } else {
            PipelineError::Columnar { phase, source }
        }
    }

    /// Classify an error raised while opening or reading a source file.
    pub fn input(path: impl Into<PathBuf>, source: ParquetError) -> Self {
        if parquet_exhaustion(&source) {
            return PipelineError::ResourceExhausted {
                phase: "source read",
                source: Box::new(source),
            };
        }
        PipelineError::InputFormat {
            path: path.into(),
            reason: source.to_string(),
        }
    }

    pub fn is_resource_exhaustion(&self) -> bool {
        matches!(self, PipelineError::ResourceExhausted { .. })
    }
}

fn sqlite_exhaustion(err: &rusqlite::Error) -> bool {
    match err.sqlite_error_code() {
        Some(code) => matches!(
            code,
            ErrorCode::DiskFull | ErrorCode::OutOfMemory | ErrorCode::SystemIoFailure
        ),
        None => false,
    }
}

fn io_exhaustion(err: &std::io::Error) -> bool {
    err.kind() == std::io::ErrorKind::OutOfMemory || err.raw_os_error() == Some(NO_SPACE_LEFT)
}

fn parquet_exhaustion(err: &ParquetError) -> bool {
    match err {
        ParquetError::External(inner) => inner
            .downcast_ref::<std::io::Error>()
            .is_some_and(io_exhaustion),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sqlite_failure(code: std::os::raw::c_int) -> rusqlite::Error {
        rusqlite::Error::SqliteFailure(rusqlite::ffi::Error::new(code), None)
    }

    #[test]
    fn test_disk_full_is_resource_exhaustion() {
        let err = PipelineError::engine("join", sqlite_failure(rusqlite::ffi::SQLITE_FULL));
        assert!(err.is_resource_exhaustion());
    }

    #[test]
    fn test_constraint_is_storage() {
        let err = PipelineError::engine("join", sqlite_failure(rusqlite::ffi::SQLITE_CONSTRAINT));
        assert!(matches!(err, PipelineError::Storage { phase: "join", .. }));
    }

    #[test]
    fn test_columnar_disk_full_is_resource_exhaustion() {
        let io = std::io::Error::from_raw_os_error(NO_SPACE_LEFT);
        let err = PipelineError::columnar("join", ParquetError::External(Box::new(io)));
        assert!(err.is_resource_exhaustion());

        let err = PipelineError::columnar("join", ParquetError::General("bad page".into()));
        assert!(matches!(err, PipelineError::Columnar { phase: "join", .. }));
    }

    #[test]
    fn test_corrupt_source_is_input_format() {
        let err = PipelineError::input(
            "/data/urls-meta.parquet",
            ParquetError::General("Invalid Parquet file. Corrupt footer".into()),
        );
        match err {
            PipelineError::InputFormat { path, .. } => {
                assert_eq!(path, PathBuf::from("/data/urls-meta.parquet"))
            }
            other => panic!("unexpected error: {other}"),
        }
    }
}
