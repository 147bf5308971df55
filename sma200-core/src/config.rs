//! Pipeline settings, loaded from an optional TOML file.
//!
//! Every field has a default, so an empty file (or no file) yields the
//! stock configuration: Wikipedia constituents, Yahoo prices, a one-day
//! TTL and a 200-week window ending three days ago.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// One century, in hours.
const MAX_AGE_HOURS_LIMIT: i64 = 24 * 365 * 100;
const AS_OF_LAG_DAYS_LIMIT: i64 = 3650;
/// One century, in weeks.
const SMA_WEEKS_LIMIT: i64 = 5200;

pub const DEFAULT_CONSTITUENTS_URL: &str =
    "https://en.wikipedia.org/wiki/List_of_S%26P_500_companies";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Directory holding cache blobs.
    pub cache_dir: PathBuf,
    pub constituents_url: String,
    /// `id` attribute of the constituents table.
    pub constituents_table_id: String,
    /// Maximum age of every cache entry.
    pub max_age_hours: i64,
    /// Calendar days between today and the as-of date. A placeholder for
    /// "previous trading day", not a trading calendar.
    pub as_of_lag_days: i64,
    /// Moving-average window, in weeks.
    pub sma_weeks: i64,
    /// File name of the filtered CSV export.
    pub export_file_name: String,
    pub http: HttpSettings,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpSettings {
    pub user_agent: String,
    /// Unset keeps the HTTP client's own default.
    pub timeout_secs: Option<u64>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            cache_dir: PathBuf::from("data/cache"),
            constituents_url: DEFAULT_CONSTITUENTS_URL.to_string(),
            constituents_table_id: "constituents".to_string(),
            max_age_hours: 24,
            as_of_lag_days: 3,
            sma_weeks: 200,
            export_file_name: "sp500_filtered.csv".to_string(),
            http: HttpSettings::default(),
        }
    }
}

impl Default for HttpSettings {
    fn default() -> Self {
        Self {
            user_agent: "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36".to_string(),
            timeout_secs: None,
        }
    }
}

impl Settings {
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("read {}: {e}", path.display())))?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        let settings: Settings =
            toml::from_str(content).map_err(|e| Error::Config(format!("parse TOML: {e}")))?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<()> {
        if !(0..=MAX_AGE_HOURS_LIMIT).contains(&self.max_age_hours) {
            return Err(Error::Config(format!(
                "max_age_hours must be between 0 and {MAX_AGE_HOURS_LIMIT}"
            )));
        }
        if !(0..=AS_OF_LAG_DAYS_LIMIT).contains(&self.as_of_lag_days) {
            return Err(Error::Config(format!(
                "as_of_lag_days must be between 0 and {AS_OF_LAG_DAYS_LIMIT}"
            )));
        }
        if !(1..=SMA_WEEKS_LIMIT).contains(&self.sma_weeks) {
            return Err(Error::Config(format!(
                "sma_weeks must be between 1 and {SMA_WEEKS_LIMIT}"
            )));
        }
        if self.constituents_table_id.trim().is_empty() {
            return Err(Error::Config("constituents_table_id must not be empty".into()));
        }
        if self.export_file_name.contains(['/', '\\']) {
            return Err(Error::Config(
                "export_file_name must be a bare file name".into(),
            ));
        }
        Ok(())
    }

    pub fn max_age(&self) -> Result<chrono::Duration> {
        chrono::Duration::try_hours(self.max_age_hours).ok_or_else(|| {
            Error::Config(format!("max_age_hours {} is out of range", self.max_age_hours))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_toml_is_default() {
        assert_eq!(Settings::from_toml("").unwrap(), Settings::default());
    }

    #[test]
    fn partial_override() {
        let s = Settings::from_toml(
            r#"
cache_dir = "/tmp/sma"
as_of_lag_days = 1

[http]
timeout_secs = 10
"#,
        )
        .unwrap();
        assert_eq!(s.cache_dir, PathBuf::from("/tmp/sma"));
        assert_eq!(s.as_of_lag_days, 1);
        assert_eq!(s.sma_weeks, 200);
        assert_eq!(s.http.timeout_secs, Some(10));
        assert!(!s.http.user_agent.is_empty());
    }

    #[test]
    fn rejects_bad_values() {
        assert!(Settings::from_toml("sma_weeks = 0").is_err());
        assert!(Settings::from_toml("sma_weeks = 9000000000000000").is_err());
        assert!(Settings::from_toml("max_age_hours = 9223372036854775807").is_err());
        assert!(Settings::from_toml("max_age_hours = -1").is_err());
        assert!(Settings::from_toml("as_of_lag_days = 3651").is_err());
        assert!(Settings::from_toml("sma_weeks = 5200").is_ok());
        assert!(Settings::from_toml("export_file_name = \"a/b.csv\"").is_err());
        assert!(matches!(
            Settings::from_toml("max_age_hours = \"soon\""),
            Err(Error::Config(_))
        ));
    }

    #[test]
    fn max_age_is_one_day_by_default() {
        assert_eq!(Settings::default().max_age().unwrap(), chrono::Duration::days(1));
    }

    #[test]
    fn unvalidated_max_age_errors_instead_of_panicking() {
        let settings = Settings {
            max_age_hours: i64::MAX,
            ..Settings::default()
        };
        assert!(matches!(settings.max_age(), Err(Error::Config(_))));
    }
}
