//! Shared blocking HTTP client.

use crate::config::HttpSettings;
use crate::error::{Error, Result};
use std::time::Duration;

pub fn build_client(settings: &HttpSettings) -> Result<reqwest::blocking::Client> {
    let mut builder = reqwest::blocking::Client::builder().user_agent(settings.user_agent.clone());
    if let Some(secs) = settings.timeout_secs {
        builder = builder.timeout(Duration::from_secs(secs));
    }
    builder
        .build()
        .map_err(|e| Error::Config(format!("failed to build HTTP client: {e}")))
}

/// Classify a transport-level failure.
pub(crate) fn transport_error(context: &str, e: reqwest::Error) -> Error {
    Error::SourceUnavailable(format!("{context}: {e}"))
}
