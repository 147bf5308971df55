//! Refresh pipeline: constituents → daily closes → moving averages → merge.
//!
//! Stages run in sequence on the calling thread. Each stage is
//! cache-or-fetch on its own entry; any stage error aborts the refresh.

use crate::cache::key::MERGED_SNAPSHOT_KEY;
use crate::cache::{ExpiringCache, FsBlobStore};
use crate::clock::{Clock, SystemClock};
use crate::config::Settings;
use crate::constituents::{ConstituentLoader, HttpReferenceSource, ReferenceSource};
use crate::data::http::build_client;
use crate::data::{CircuitBreaker, FetchProgress, LogProgress, MarketDataProvider, YahooProvider};
use crate::domain::MergedRecord;
use crate::error::Result;
use crate::merge::merge_and_store;
use crate::moving_average::{MovingAverageFetcher, SmaWindow};
use crate::prices::{as_of_date, PriceFetcher};
use crate::screen::deviation_bounds;
use chrono::NaiveDate;
use std::sync::Arc;
use tracing::info;

/// Outcome of one refresh.
#[derive(Debug, Clone)]
pub struct RefreshReport {
    /// Number of constituents loaded.
    pub constituents: usize,
    /// Merged table, ascending by percent deviation.
    pub merged: Vec<MergedRecord>,
    /// Min and max percent deviation of `merged`.
    pub bounds: Option<(f64, f64)>,
    pub as_of: NaiveDate,
    pub window: SmaWindow,
}

pub struct Pipeline {
    settings: Settings,
    cache: ExpiringCache,
    reference: Box<dyn ReferenceSource>,
    provider: Box<dyn MarketDataProvider>,
    progress: Box<dyn FetchProgress>,
    clock: Arc<dyn Clock>,
}

impl Pipeline {
    pub fn new(
        settings: Settings,
        cache: ExpiringCache,
        reference: Box<dyn ReferenceSource>,
        provider: Box<dyn MarketDataProvider>,
        progress: Box<dyn FetchProgress>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            settings,
            cache,
            reference,
            provider,
            progress,
            clock,
        }
    }

    /// Production wiring: on-disk cache, system clock, Wikipedia reference
    /// page and Yahoo prices over one shared HTTP client.
    pub fn from_settings(settings: Settings) -> Result<Self> {
        settings.validate()?;
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        let cache = ExpiringCache::new(
            Arc::new(FsBlobStore::new(settings.cache_dir.clone())),
            clock.clone(),
        );
        let client = build_client(&settings.http)?;
        let reference =
            HttpReferenceSource::new(client.clone(), settings.constituents_url.clone());
        let provider = YahooProvider::new(client, Arc::new(CircuitBreaker::for_provider()));

        Ok(Self::new(
            settings,
            cache,
            Box::new(reference),
            Box::new(provider),
            Box::new(LogProgress::default()),
            clock,
        ))
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn cache(&self) -> &ExpiringCache {
        &self.cache
    }

    /// Run every stage. With `force`, cache reads are skipped but every
    /// stage still writes its result through.
    pub fn refresh(&self, force: bool) -> Result<RefreshReport> {
        self.settings.validate()?;
        let max_age = self.settings.max_age()?;
        let today = self.clock.today();

        let constituents = ConstituentLoader::new(
            &self.cache,
            self.reference.as_ref(),
            &self.settings.constituents_table_id,
            max_age,
        )
        .force(force)
        .load_constituents()?;
        info!("Number of S&P 500 companies: {}", constituents.len());

        let as_of = as_of_date(today, self.settings.as_of_lag_days)?;
        let prices = PriceFetcher::new(
            &self.cache,
            self.provider.as_ref(),
            self.progress.as_ref(),
            max_age,
        )
        .force(force)
        .fetch_recent_closes(&constituents, as_of)?;

        let ma_fetcher = MovingAverageFetcher::new(
            &self.cache,
            self.provider.as_ref(),
            self.progress.as_ref(),
            self.clock.as_ref(),
            self.settings.as_of_lag_days,
            self.settings.sma_weeks,
            max_age,
        )
        .force(force);
        let window = ma_fetcher.window()?;
        let averages = ma_fetcher.fetch_moving_average(&constituents)?;

        let merged = merge_and_store(&self.cache, &prices, &averages)?;
        let bounds = deviation_bounds(&merged);

        Ok(RefreshReport {
            constituents: constituents.len(),
            merged,
            bounds,
            as_of,
            window,
        })
    }

    /// The last merged CSV snapshot, without refreshing or checking age.
    pub fn latest_snapshot(&self) -> Result<Option<Vec<MergedRecord>>> {
        self.cache.get_table(MERGED_SNAPSHOT_KEY)
    }
}
