//! sma200 core: S&P 500 distance from the 200-week moving average.
//!
//! - Expiring blob cache (Parquet payloads + JSON metadata sidecars)
//! - Constituent list scraped from a reference HTML page
//! - Daily and weekly closes from a market-data provider
//! - Per-symbol 200-week SMA and percent deviation
//! - Merge, screening and CSV export

pub mod cache;
pub mod clock;
pub mod config;
pub mod constituents;
pub mod data;
pub mod domain;
pub mod error;
pub mod merge;
pub mod moving_average;
pub mod pipeline;
pub mod prices;
pub mod screen;

pub use config::Settings;
pub use domain::{ConstituentRecord, MergedRecord, MovingAverageRecord, PriceRow};
pub use error::{Error, Result};
pub use pipeline::{Pipeline, RefreshReport};

#[cfg(test)]
mod tests {
    use super::*;

    /// Compile-time check: pipeline collaborators can cross threads.
    #[allow(dead_code)]
    fn assert_send_sync() {
        fn require_send<T: Send>() {}
        fn require_sync<T: Sync>() {}

        require_send::<ConstituentRecord>();
        require_sync::<ConstituentRecord>();
        require_send::<PriceRow>();
        require_sync::<PriceRow>();
        require_send::<MovingAverageRecord>();
        require_sync::<MovingAverageRecord>();
        require_send::<MergedRecord>();
        require_sync::<MergedRecord>();
        require_send::<cache::ExpiringCache>();
        require_sync::<cache::ExpiringCache>();
        require_send::<Pipeline>();
        require_sync::<Pipeline>();
    }
}
