//! Market-data provider trait and the wide close-price table it returns.
//!
//! The MarketDataProvider trait abstracts over data sources so the fetchers
//! can be driven by a stub in tests. The cache sits above this trait;
//! providers don't know about it.

use crate::error::{Error, Result};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use tracing::{info, warn};

/// Bar spacing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Interval {
    Daily,
    Weekly,
}

/// A bulk historical-bars request. Closes are always unadjusted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BarsRequest {
    pub symbols: Vec<String>,
    pub start: NaiveDate,
    /// Exclusive. `None` means "through now".
    pub end: Option<NaiveDate>,
    pub interval: Interval,
}

/// Closing prices keyed by date and symbol.
///
/// `closes[d][s]` is the close of `symbols[s]` on `dates[d]`; dates are the
/// sorted union of every symbol's dates and missing cells are `None`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CloseMatrix {
    dates: Vec<NaiveDate>,
    symbols: Vec<String>,
    closes: Vec<Vec<Option<f64>>>,
}

impl CloseMatrix {
    /// Build from per-symbol series. Symbols keep the given order.
    pub fn from_series(series: Vec<(String, Vec<(NaiveDate, f64)>)>) -> Self {
        let dates: Vec<NaiveDate> = series
            .iter()
            .flat_map(|(_, points)| points.iter().map(|(d, _)| *d))
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
        let date_index: HashMap<NaiveDate, usize> =
            dates.iter().enumerate().map(|(i, d)| (*d, i)).collect();

        let mut closes = vec![vec![None; series.len()]; dates.len()];
        let mut symbols = Vec::with_capacity(series.len());
        for (s, (symbol, points)) in series.into_iter().enumerate() {
            for (date, close) in points {
                closes[date_index[&date]][s] = Some(close);
            }
            symbols.push(symbol);
        }

        Self {
            dates,
            symbols,
            closes,
        }
    }

    pub fn dates(&self) -> &[NaiveDate] {
        &self.dates
    }

    pub fn symbols(&self) -> &[String] {
        &self.symbols
    }

    pub fn is_empty(&self) -> bool {
        self.dates.is_empty() || self.symbols.is_empty()
    }

    /// Long form `(date, symbol, close)`, date-major, missing cells dropped.
    pub fn stack(&self) -> Vec<(NaiveDate, String, f64)> {
        let mut rows = Vec::new();
        for (d, date) in self.dates.iter().enumerate() {
            for (s, symbol) in self.symbols.iter().enumerate() {
                if let Some(close) = self.closes[d][s] {
                    rows.push((*date, symbol.clone(), close));
                }
            }
        }
        rows
    }

    /// One row per symbol across the date axis (the symbol × date grid).
    pub fn transpose(&self) -> Vec<(String, Vec<(NaiveDate, Option<f64>)>)> {
        self.symbols
            .iter()
            .enumerate()
            .map(|(s, symbol)| {
                let row = self
                    .dates
                    .iter()
                    .enumerate()
                    .map(|(d, date)| (*date, self.closes[d][s]))
                    .collect();
                (symbol.clone(), row)
            })
            .collect()
    }
}

/// Trait for market-data sources.
pub trait MarketDataProvider: Send + Sync {
    /// Human-readable name of this provider.
    fn name(&self) -> &str;

    /// Fetch closing prices for every requested symbol.
    ///
    /// Symbols the provider has no data for are simply absent from the
    /// result. Errors mean the source as a whole is unusable.
    fn fetch_closes(
        &self,
        request: &BarsRequest,
        progress: &dyn FetchProgress,
    ) -> Result<CloseMatrix>;
}

/// Progress callback for multi-symbol fetches. Advisory only.
pub trait FetchProgress: Send + Sync {
    fn on_start(&self, symbol: &str, index: usize, total: usize);

    /// `result` carries the number of bars received.
    fn on_complete(&self, symbol: &str, index: usize, total: usize, result: &Result<usize, Error>);

    fn on_batch_complete(&self, succeeded: usize, failed: usize, total: usize);
}

/// Reports progress through `tracing`, every `every` symbols.
pub struct LogProgress {
    every: usize,
}

impl LogProgress {
    pub fn new(every: usize) -> Self {
        Self {
            every: every.max(1),
        }
    }
}

impl Default for LogProgress {
    fn default() -> Self {
        Self::new(50)
    }
}

impl FetchProgress for LogProgress {
    fn on_start(&self, _symbol: &str, _index: usize, _total: usize) {}

    fn on_complete(&self, symbol: &str, index: usize, total: usize, result: &Result<usize, Error>) {
        if let Err(e) = result {
            warn!(symbol, error = %e, "no data");
        }
        let done = index + 1;
        if done % self.every == 0 || done == total {
            info!("Loading data: {done}/{total} stocks");
        }
    }

    fn on_batch_complete(&self, succeeded: usize, failed: usize, total: usize) {
        info!(succeeded, failed, total, "download complete");
    }
}

/// Discards progress.
pub struct SilentProgress;

impl FetchProgress for SilentProgress {
    fn on_start(&self, _: &str, _: usize, _: usize) {}
    fn on_complete(&self, _: &str, _: usize, _: usize, _: &Result<usize, Error>) {}
    fn on_batch_complete(&self, _: usize, _: usize, _: usize) {}
}
