//! Record shapes flowing through the refresh pipeline.
//!
//! Every table the pipeline produces is a `Vec` of one of these records.
//! They are the closed set of payloads the expiring cache knows how to
//! encode (see `cache::codec`).

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// One row of the index constituent list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConstituentRecord {
    pub symbol: String,
    pub company_name: String,
    pub sector: String,
    pub industry: String,
}

/// Ordered, symbol-unique constituent list in document order.
pub type ConstituentTable = Vec<ConstituentRecord>;

/// A daily close joined with its constituent fields.
///
/// The join is a left join from prices to constituents, so the reference
/// fields are empty when a price symbol has no constituent row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceRow {
    pub date: NaiveDate,
    pub symbol: String,
    pub close_price: f64,
    pub company_name: Option<String>,
    pub sector: Option<String>,
    pub industry: Option<String>,
}

/// Per-symbol long-window average and the latest close's distance from it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MovingAverageRecord {
    pub symbol: String,
    /// Most recent week (by date) with an observation for this symbol.
    pub latest_week: NaiveDate,
    pub latest_close: f64,
    pub moving_average_200wk: f64,
    /// `(latest_close - moving_average_200wk) / moving_average_200wk * 100`, 2 decimals.
    pub percent_deviation: f64,
    /// Weeks that contributed to the mean. Can be short of the window for
    /// recently listed symbols.
    pub weeks_observed: u64,
}

/// Analysis-ready row handed to the presentation layer.
///
/// Field order is the output column order; serde names are the display
/// labels used in CSV snapshots and exports.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MergedRecord {
    #[serde(rename = "% Deviation")]
    pub percent_deviation: f64,
    #[serde(rename = "Ticker")]
    pub symbol: String,
    #[serde(rename = "Company")]
    pub company: Option<String>,
    #[serde(rename = "200 Week SMA")]
    pub moving_average_200wk: f64,
    #[serde(rename = "Close")]
    pub close_price: f64,
    #[serde(rename = "Sector")]
    pub sector: Option<String>,
    #[serde(rename = "Industry")]
    pub industry: Option<String>,
}

impl MergedRecord {
    /// Column names in output order.
    pub const COLUMNS: [&'static str; 7] = [
        "percent_deviation",
        "symbol",
        "company",
        "moving_average_200wk",
        "close_price",
        "sector",
        "industry",
    ];

    /// Display labels in output order.
    pub const DISPLAY_COLUMNS: [&'static str; 7] = [
        "% Deviation",
        "Ticker",
        "Company",
        "200 Week SMA",
        "Close",
        "Sector",
        "Industry",
    ];
}

/// Round half away from zero to 2 decimal places.
pub fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}
