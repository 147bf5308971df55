//! Recent daily closes for every constituent.
//!
//! Requests daily bars from the as-of date through now, reshapes the wide
//! symbol-keyed table into `(date, symbol, close)` rows, left-joins the
//! constituent fields and sorts by `(symbol, date)`.

use crate::cache::key::{query_hash, DAILY_CLOSES_KEY};
use crate::cache::ExpiringCache;
use crate::data::{BarsRequest, FetchProgress, Interval, MarketDataProvider};
use crate::domain::{ConstituentRecord, PriceRow};
use crate::error::{Error, Result};
use chrono::{Duration, NaiveDate};
use serde::Serialize;
use std::collections::HashMap;
use tracing::info;

/// The as-of date: `lag_days` calendar days before `today`.
///
/// A fixed lag stands in for "previous trading day"; weekends and holidays
/// are not skipped.
pub fn as_of_date(today: NaiveDate, lag_days: i64) -> Result<NaiveDate> {
    Duration::try_days(lag_days)
        .and_then(|lag| today.checked_sub_signed(lag))
        .ok_or_else(|| Error::Config(format!("as-of lag of {lag_days} days is out of range")))
}

/// Parameters that determine the payload, hashed into the entry metadata.
#[derive(Serialize)]
struct DailyClosesQuery<'a> {
    symbols: Vec<&'a str>,
    start: NaiveDate,
    interval: Interval,
}

/// Left join of long-form closes with the constituent list, sorted by
/// `(symbol, date)`. Price rows are never dropped.
pub fn join_reference(
    closes: Vec<(NaiveDate, String, f64)>,
    reference: &[ConstituentRecord],
) -> Vec<PriceRow> {
    let by_symbol: HashMap<&str, &ConstituentRecord> =
        reference.iter().map(|r| (r.symbol.as_str(), r)).collect();

    let mut rows: Vec<PriceRow> = closes
        .into_iter()
        .map(|(date, symbol, close_price)| {
            let info = by_symbol.get(symbol.as_str());
            PriceRow {
                date,
                close_price,
                company_name: info.map(|r| r.company_name.clone()),
                sector: info.map(|r| r.sector.clone()),
                industry: info.map(|r| r.industry.clone()),
                symbol,
            }
        })
        .collect();

    rows.sort_by(|a, b| a.symbol.cmp(&b.symbol).then(a.date.cmp(&b.date)));
    rows
}

/// Cache-or-fetch for recent daily closes.
pub struct PriceFetcher<'a> {
    cache: &'a ExpiringCache,
    provider: &'a dyn MarketDataProvider,
    progress: &'a dyn FetchProgress,
    max_age: Duration,
    force: bool,
}

impl<'a> PriceFetcher<'a> {
    pub fn new(
        cache: &'a ExpiringCache,
        provider: &'a dyn MarketDataProvider,
        progress: &'a dyn FetchProgress,
        max_age: Duration,
    ) -> Self {
        Self {
            cache,
            provider,
            progress,
            max_age,
            force: false,
        }
    }

    /// Skip the cache read; the fresh result is still written through.
    pub fn force(mut self, force: bool) -> Self {
        self.force = force;
        self
    }

    pub fn fetch_recent_closes(
        &self,
        reference: &[ConstituentRecord],
        as_of: NaiveDate,
    ) -> Result<Vec<PriceRow>> {
        let query = DailyClosesQuery {
            symbols: reference.iter().map(|r| r.symbol.as_str()).collect(),
            start: as_of,
            interval: Interval::Daily,
        };
        let hash = query_hash(&query)?;

        if !self.force {
            if let Some(cached) =
                self.cache
                    .get_for_query::<PriceRow>(DAILY_CLOSES_KEY, &hash, self.max_age)?
            {
                info!(query = %hash, rows = cached.len(), "using cached daily closes");
                return Ok(cached);
            }
        }

        info!(
            provider = self.provider.name(),
            symbols = reference.len(),
            %as_of,
            "downloading daily closes"
        );
        let request = BarsRequest {
            symbols: query.symbols.iter().map(|s| s.to_string()).collect(),
            start: as_of,
            end: None,
            interval: Interval::Daily,
        };
        let matrix = self.provider.fetch_closes(&request, self.progress)?;
        let rows = join_reference(matrix.stack(), reference);

        self.cache.put_for_query(DAILY_CLOSES_KEY, &hash, &rows)?;
        info!(query = %hash, rows = rows.len(), "daily closes saved to cache");
        Ok(rows)
    }
}
