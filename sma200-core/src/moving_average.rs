//! 200-week simple moving average and percent deviation per symbol.
//!
//! Weekly closes over a window of `weeks * 7 + 1` days ending at the as-of
//! date form a symbol × week grid. The average is the plain mean of every
//! week present for the symbol; the latest close is the most recent week
//! with an observation, chosen by date.

use crate::cache::key::{query_hash, MOVING_AVERAGE_KEY};
use crate::cache::ExpiringCache;
use crate::clock::Clock;
use crate::data::{BarsRequest, CloseMatrix, FetchProgress, Interval, MarketDataProvider};
use crate::domain::{round2, ConstituentRecord, MovingAverageRecord};
use crate::error::{Error, Result};
use crate::prices::as_of_date;
use chrono::{Duration, NaiveDate};
use serde::Serialize;
use tracing::{info, warn};

/// Start and end (exclusive) of the weekly window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SmaWindow {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl SmaWindow {
    /// `end = today - lag_days`, `start = end - (weeks * 7 + 1)` days.
    ///
    /// Fails with `Error::Config` when either date falls outside the
    /// representable calendar.
    pub fn ending_before(today: NaiveDate, lag_days: i64, weeks: i64) -> Result<Self> {
        let end = as_of_date(today, lag_days)?;
        let span = weeks
            .checked_mul(7)
            .and_then(|days| days.checked_add(1))
            .and_then(Duration::try_days)
            .ok_or_else(|| Error::Config(format!("sma window of {weeks} weeks is out of range")))?;
        let start = end.checked_sub_signed(span).ok_or_else(|| {
            Error::Config(format!("sma window of {weeks} weeks before {end} is out of range"))
        })?;
        Ok(Self { start, end })
    }
}

/// Compute one record per symbol with at least one weekly close, sorted by
/// percent deviation, largest first.
///
/// Grid values are rounded to 2 decimals before averaging; the mean and the
/// deviation are rounded again. No minimum sample size is enforced. A symbol
/// whose average rounds to zero has no defined deviation and is left out.
pub fn compute_moving_averages(grid: &CloseMatrix) -> Vec<MovingAverageRecord> {
    let mut records: Vec<MovingAverageRecord> = grid
        .transpose()
        .into_iter()
        .filter_map(|(symbol, row)| {
            let observed: Vec<(NaiveDate, f64)> = row
                .into_iter()
                .filter_map(|(week, close)| close.map(|c| (week, round2(c))))
                .collect();

            let (latest_week, latest_close) =
                observed.iter().copied().max_by_key(|(week, _)| *week)?;

            let mean = observed.iter().map(|(_, c)| c).sum::<f64>() / observed.len() as f64;
            let moving_average_200wk = round2(mean);
            if moving_average_200wk == 0.0 {
                warn!(%symbol, "moving average rounds to zero, skipping");
                return None;
            }
            let percent_deviation =
                round2((latest_close - moving_average_200wk) / moving_average_200wk * 100.0);

            Some(MovingAverageRecord {
                symbol,
                latest_week,
                latest_close,
                moving_average_200wk,
                percent_deviation,
                weeks_observed: observed.len() as u64,
            })
        })
        .collect();

    records.sort_by(|a, b| b.percent_deviation.total_cmp(&a.percent_deviation));
    records
}

#[derive(Serialize)]
struct MovingAverageQuery<'a> {
    symbols: Vec<&'a str>,
    window: SmaWindow,
    interval: Interval,
    weeks: i64,
}

/// Cache-or-fetch for the moving-average table.
pub struct MovingAverageFetcher<'a> {
    cache: &'a ExpiringCache,
    provider: &'a dyn MarketDataProvider,
    progress: &'a dyn FetchProgress,
    clock: &'a dyn Clock,
    lag_days: i64,
    weeks: i64,
    max_age: Duration,
    force: bool,
}

impl<'a> MovingAverageFetcher<'a> {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        cache: &'a ExpiringCache,
        provider: &'a dyn MarketDataProvider,
        progress: &'a dyn FetchProgress,
        clock: &'a dyn Clock,
        lag_days: i64,
        weeks: i64,
        max_age: Duration,
    ) -> Self {
        Self {
            cache,
            provider,
            progress,
            clock,
            lag_days,
            weeks,
            max_age,
            force: false,
        }
    }

    /// Skip the cache read; the fresh result is still written through.
    pub fn force(mut self, force: bool) -> Self {
        self.force = force;
        self
    }

    pub fn window(&self) -> Result<SmaWindow> {
        SmaWindow::ending_before(self.clock.today(), self.lag_days, self.weeks)
    }

    pub fn fetch_moving_average(
        &self,
        reference: &[ConstituentRecord],
    ) -> Result<Vec<MovingAverageRecord>> {
        let window = self.window()?;
        let query = MovingAverageQuery {
            symbols: reference.iter().map(|r| r.symbol.as_str()).collect(),
            window,
            interval: Interval::Weekly,
            weeks: self.weeks,
        };
        let hash = query_hash(&query)?;

        if !self.force {
            if let Some(cached) = self.cache.get_for_query::<MovingAverageRecord>(
                MOVING_AVERAGE_KEY,
                &hash,
                self.max_age,
            )? {
                info!(query = %hash, rows = cached.len(), "using cached moving averages");
                return Ok(cached);
            }
        }

        info!(
            provider = self.provider.name(),
            symbols = reference.len(),
            start = %window.start,
            end = %window.end,
            "downloading weekly closes"
        );
        let request = BarsRequest {
            symbols: query.symbols.iter().map(|s| s.to_string()).collect(),
            start: window.start,
            end: Some(window.end),
            interval: Interval::Weekly,
        };
        let grid = self.provider.fetch_closes(&request, self.progress)?;
        let records = compute_moving_averages(&grid);

        let expected = u64::try_from(self.weeks).unwrap_or(0);
        let short = records
            .iter()
            .filter(|r| r.weeks_observed < expected)
            .count();
        if short > 0 {
            warn!(short, expected, "symbols averaged over fewer weeks than the window");
        }

        self.cache.put_for_query(MOVING_AVERAGE_KEY, &hash, &records)?;
        info!(query = %hash, rows = records.len(), "moving averages saved to cache");
        Ok(records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn week(n: i64) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 1, 1).unwrap() + Duration::weeks(n)
    }

    fn grid(rows: Vec<(&str, Vec<f64>)>) -> CloseMatrix {
        CloseMatrix::from_series(
            rows.into_iter()
                .map(|(symbol, closes)| {
                    let points = closes
                        .into_iter()
                        .enumerate()
                        .map(|(i, c)| (week(i as i64), c))
                        .collect();
                    (symbol.to_string(), points)
                })
                .collect(),
        )
    }

    #[test]
    fn mean_and_zero_deviation() {
        let records = compute_moving_averages(&grid(vec![("X", vec![10.0, 30.0, 20.0])]));
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].moving_average_200wk, 20.0);
        assert_eq!(records[0].latest_close, 20.0);
        assert_eq!(records[0].percent_deviation, 0.0);
    }

    #[test]
    fn latest_close_is_chosen_by_date() {
        let records = compute_moving_averages(&grid(vec![("X", vec![10.0, 20.0, 30.0])]));
        assert_eq!(records[0].moving_average_200wk, 20.0);
        assert_eq!(records[0].latest_week, week(2));
        assert_eq!(records[0].latest_close, 30.0);
        assert_eq!(records[0].percent_deviation, 50.0);
    }

    #[test]
    fn short_history_averages_what_is_present() {
        let m = CloseMatrix::from_series(vec![
            ("OLD".into(), vec![(week(0), 10.0), (week(1), 10.0), (week(2), 10.0)]),
            ("NEW".into(), vec![(week(2), 40.0)]),
        ]);
        let records = compute_moving_averages(&m);
        let new = records.iter().find(|r| r.symbol == "NEW").unwrap();
        assert_eq!(new.weeks_observed, 1);
        assert_eq!(new.moving_average_200wk, 40.0);
        assert_eq!(new.percent_deviation, 0.0);
    }

    #[test]
    fn latest_skips_trailing_gap() {
        let m = CloseMatrix::from_series(vec![
            ("A".into(), vec![(week(0), 10.0), (week(1), 12.0)]),
            ("B".into(), vec![(week(0), 1.0), (week(1), 1.0), (week(2), 1.0)]),
        ]);
        let records = compute_moving_averages(&m);
        let a = records.iter().find(|r| r.symbol == "A").unwrap();
        assert_eq!(a.latest_week, week(1));
        assert_eq!(a.moving_average_200wk, 11.0);
        assert_eq!(a.percent_deviation, 9.09);
    }

    #[test]
    fn sorted_descending_by_deviation() {
        let records = compute_moving_averages(&grid(vec![
            ("DOWN", vec![20.0, 10.0]),
            ("UP", vec![10.0, 20.0]),
            ("FLAT", vec![5.0, 5.0]),
        ]));
        let symbols: Vec<&str> = records.iter().map(|r| r.symbol.as_str()).collect();
        assert_eq!(symbols, vec!["UP", "FLAT", "DOWN"]);
        assert_eq!(records[0].percent_deviation, 33.33);
        assert_eq!(records[2].percent_deviation, -33.33);
    }

    #[test]
    fn grid_values_are_rounded_before_averaging() {
        let records = compute_moving_averages(&grid(vec![("R", vec![10.004, 10.004, 10.004])]));
        assert_eq!(records[0].moving_average_200wk, 10.0);
        assert_eq!(records[0].latest_close, 10.0);
    }

    #[test]
    fn window_spans_weeks_plus_a_day() {
        let w = SmaWindow::ending_before(NaiveDate::from_ymd_opt(2024, 6, 10).unwrap(), 3, 200)
            .unwrap();
        assert_eq!(w.end, NaiveDate::from_ymd_opt(2024, 6, 7).unwrap());
        assert_eq!((w.end - w.start).num_days(), 1401);
    }

    #[test]
    fn oversized_window_is_a_config_error() {
        let today = NaiveDate::from_ymd_opt(2024, 6, 10).unwrap();
        let err = SmaWindow::ending_before(today, 3, 9_000_000_000_000_000).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
        let err = SmaWindow::ending_before(today, 3, 100_000_000).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
        let err = SmaWindow::ending_before(today, i64::MAX, 200).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn zero_average_is_skipped() {
        let records = compute_moving_averages(&grid(vec![
            ("PENNY", vec![0.004, 0.004]),
            ("X", vec![10.0, 10.0]),
        ]));
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].symbol, "X");
        assert!(records.iter().all(|r| r.percent_deviation.is_finite()));
    }
}
