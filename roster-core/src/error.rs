//! Error taxonomy for the pipeline.
//!
//! Only fatal conditions are errors. Referential gaps and matching ambiguity are
//! recoverable and travel as [`crate::diagnostic::Diagnostic`] values instead.

use std::path::PathBuf;

/// Transport or protocol failure while walking a paginated endpoint.
#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    #[error("request to {url} failed: {message}")]
    Transport { url: String, message: String },

    #[error("{url} -> {status}: {body}")]
    Status { url: String, status: u16, body: String },

    #[error("malformed JSON from {url}: {message}")]
    Decode { url: String, message: String },

    #[error("response from {url} has no `{collection}` array")]
    MissingCollection { url: String, collection: String },

    #[error("page cursor from {url} did not advance (page {page}, next_page {next_page})")]
    PageCursor { url: String, page: u64, next_page: u64 },
}

/// Failure reading or writing a cache file.
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    #[error("cache io error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("cache file {path} is not a valid table: {source}")]
    Csv {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },
}

/// A cached row that cannot be parsed back into its typed record.
#[derive(Debug, thiserror::Error)]
#[error("{dataset}: column `{column}` has invalid value {value:?}")]
pub struct RowError {
    pub dataset: String,
    pub column: String,
    pub value: String,
}

/// Anything a source accessor can fail with.
#[derive(Debug, thiserror::Error)]
pub enum SourceError {
    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error(transparent)]
    Cache(#[from] CacheError),

    #[error(transparent)]
    Row(#[from] RowError),
}

/// Fatal failures of a pipeline run for one period.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error(transparent)]
    Source(#[from] SourceError),

    #[error("publishing `{sheet}` failed: {message}")]
    Publish { sheet: String, message: String },
}
