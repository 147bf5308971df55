//! Structured error types for the refresh pipeline.
//!
//! Designed to be displayable as a single line in the CLI. Cache
//! inconsistencies and stale entries are not errors: the cache reports
//! them as misses and the pipeline refetches.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("source unavailable: {0}")]
    SourceUnavailable(String),

    #[error("hard stop: data provider has blocked requests (circuit breaker tripped)")]
    CircuitBreakerTripped,

    #[error("parse failure: {0}")]
    Parse(String),

    #[error("cache error: {0}")]
    Cache(String),

    #[error("codec error: {0}")]
    Codec(String),

    #[error("config error: {0}")]
    Config(String),

    #[error("export failed: {0}")]
    Export(String),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

impl From<polars::prelude::PolarsError> for Error {
    fn from(e: polars::prelude::PolarsError) -> Self {
        Error::Codec(format!("parquet: {e}"))
    }
}

impl From<csv::Error> for Error {
    fn from(e: csv::Error) -> Self {
        Error::Codec(format!("csv: {e}"))
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Codec(format!("json: {e}"))
    }
}
