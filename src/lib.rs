//! About-page extraction library - shared modules for the pipeline binary.
//!
//! Joins a URL-metadata corpus against a feed list by domain substring and
//! streams out the joined rows whose URL looks like a personal "about" page.

pub mod columnar;
pub mod config;
pub mod domain;
pub mod error;
pub mod feeds;
pub mod filter;
pub mod join;
pub mod metadata;
pub mod models;
pub mod pipeline;
pub mod progress;
pub mod safety;
pub mod storage;

pub use error::{PipelineError, Result};
pub use filter::{AboutPageStream, PatternSet, ScanState};
pub use models::{FeedRecord, JoinedRecord, MatchRecord, MetaRecord};
