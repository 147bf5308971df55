//! Join latest closes with the moving-average table.

use crate::cache::key::{MERGED_KEY, MERGED_SNAPSHOT_KEY};
use crate::cache::ExpiringCache;
use crate::domain::{MergedRecord, MovingAverageRecord, PriceRow};
use crate::error::Result;
use std::collections::BTreeMap;
use tracing::info;

/// Sort ascending by percent deviation. Stable, so equal deviations keep
/// their incoming order.
pub fn sort_by_deviation(rows: &mut [MergedRecord]) {
    rows.sort_by(|a, b| a.percent_deviation.total_cmp(&b.percent_deviation));
}

/// Inner join of the latest price per symbol with the averages.
///
/// The latest price is the row with the greatest date; its date is dropped.
/// Symbols present on only one side are dropped. Output is sorted
/// ascending by percent deviation.
pub fn merge(prices: &[PriceRow], averages: &[MovingAverageRecord]) -> Vec<MergedRecord> {
    let mut latest: BTreeMap<&str, &PriceRow> = BTreeMap::new();
    for row in prices {
        latest
            .entry(row.symbol.as_str())
            .and_modify(|current| {
                if row.date > current.date {
                    *current = row;
                }
            })
            .or_insert(row);
    }

    let mut merged: Vec<MergedRecord> = averages
        .iter()
        .filter_map(|avg| {
            let price = latest.get(avg.symbol.as_str())?;
            Some(MergedRecord {
                percent_deviation: avg.percent_deviation,
                symbol: avg.symbol.clone(),
                company: price.company_name.clone(),
                moving_average_200wk: avg.moving_average_200wk,
                close_price: price.close_price,
                sector: price.sector.clone(),
                industry: price.industry.clone(),
            })
        })
        .collect();

    sort_by_deviation(&mut merged);
    merged
}

/// Merge and persist: the Parquet entry under [`MERGED_KEY`] and a CSV
/// snapshot under [`MERGED_SNAPSHOT_KEY`].
pub fn merge_and_store(
    cache: &ExpiringCache,
    prices: &[PriceRow],
    averages: &[MovingAverageRecord],
) -> Result<Vec<MergedRecord>> {
    let merged = merge(prices, averages);
    info!(
        prices = prices.len(),
        averages = averages.len(),
        merged = merged.len(),
        "merged closes with moving averages"
    );
    cache.put(MERGED_KEY, &merged)?;
    cache.put_table(MERGED_SNAPSHOT_KEY, &merged)?;
    Ok(merged)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::MemoryBlobStore;
    use crate::clock::FixedClock;
    use chrono::{Duration, NaiveDate, TimeZone, Utc};
    use std::sync::Arc;

    fn d(day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 5, day).unwrap()
    }

    fn price(symbol: &str, day: u32, close: f64) -> PriceRow {
        PriceRow {
            date: d(day),
            symbol: symbol.into(),
            close_price: close,
            company_name: Some(format!("Co{symbol}")),
            sector: Some("Tech".into()),
            industry: Some("Software".into()),
        }
    }

    fn average(symbol: &str, sma: f64, deviation: f64) -> MovingAverageRecord {
        MovingAverageRecord {
            symbol: symbol.into(),
            latest_week: d(13),
            latest_close: sma,
            moving_average_200wk: sma,
            percent_deviation: deviation,
            weeks_observed: 200,
        }
    }

    #[test]
    fn inner_join_keeps_common_symbols() {
        let prices = vec![price("A", 17, 1.0), price("B", 17, 2.0), price("C", 17, 3.0)];
        let averages = vec![
            average("B", 2.0, 1.0),
            average("C", 3.0, -1.0),
            average("D", 4.0, 0.0),
        ];
        let merged = merge(&prices, &averages);
        let symbols: Vec<&str> = merged.iter().map(|r| r.symbol.as_str()).collect();
        assert_eq!(symbols, vec!["C", "B"]);
    }

    #[test]
    fn end_to_end_row() {
        let merged = merge(&[price("X", 17, 100.0)], &[average("X", 80.0, 25.0)]);
        assert_eq!(
            merged,
            vec![MergedRecord {
                percent_deviation: 25.0,
                symbol: "X".into(),
                company: Some("CoX".into()),
                moving_average_200wk: 80.0,
                close_price: 100.0,
                sector: Some("Tech".into()),
                industry: Some("Software".into()),
            }]
        );
    }

    #[test]
    fn latest_price_wins_regardless_of_input_order() {
        let prices = vec![price("X", 20, 105.0), price("X", 17, 100.0), price("X", 18, 101.0)];
        let merged = merge(&prices, &[average("X", 80.0, 25.0)]);
        assert_eq!(merged.len(), 1);
        assert_eq!(merged[0].close_price, 105.0);
    }

    #[test]
    fn unmatched_reference_fields_stay_empty() {
        let mut row = price("Q", 17, 10.0);
        row.company_name = None;
        row.sector = None;
        row.industry = None;
        let merged = merge(&[row], &[average("Q", 10.0, 0.0)]);
        assert!(merged[0].company.is_none());
        assert!(merged[0].industry.is_none());
    }

    #[test]
    fn resorting_is_a_no_op() {
        let prices: Vec<PriceRow> = ["A", "B", "C", "D"]
            .iter()
            .map(|s| price(s, 17, 1.0))
            .collect();
        let averages = vec![
            average("A", 1.0, 3.5),
            average("B", 1.0, -2.0),
            average("C", 1.0, 3.5),
            average("D", 1.0, 0.0),
        ];
        let merged = merge(&prices, &averages);
        let mut again = merged.clone();
        sort_by_deviation(&mut again);
        assert_eq!(merged, again);
    }

    #[test]
    fn stored_result_and_snapshot_match() {
        let cache = ExpiringCache::new(
            Arc::new(MemoryBlobStore::new()),
            Arc::new(FixedClock::new(Utc.with_ymd_and_hms(2024, 6, 3, 0, 0, 0).unwrap())),
        );
        let merged = merge_and_store(
            &cache,
            &[price("X", 17, 100.0), price("Y", 17, 50.0)],
            &[average("X", 80.0, 25.0), average("Y", 100.0, -50.0)],
        )
        .unwrap();

        let cached = cache
            .get::<MergedRecord>(MERGED_KEY, Duration::days(1))
            .unwrap()
            .unwrap();
        let snapshot = cache
            .get_table::<MergedRecord>(MERGED_SNAPSHOT_KEY)
            .unwrap()
            .unwrap();
        assert_eq!(cached, merged);
        assert_eq!(snapshot, merged);
    }
}
