//! Payload encoding for cache data blobs.
//!
//! Each record shape converts to and from a Polars `DataFrame`, which is
//! serialized as Parquet. Only the shapes implementing `TableRecord` can be
//! cached; the `KIND` tag is written to the metadata blob and checked on
//! read so one shape is never decoded as another.

use crate::domain::{ConstituentRecord, MergedRecord, MovingAverageRecord, PriceRow};
use crate::error::{Error, Result};
use chrono::{Datelike, NaiveDate};
use polars::prelude::*;
use std::io::Cursor;

/// `NaiveDate::num_days_from_ce()` of 1970-01-01.
const EPOCH_DAYS_FROM_CE: i32 = 719_163;

/// A record shape the cache can persist.
pub trait TableRecord: Sized {
    /// Tag stored in the entry metadata.
    const KIND: &'static str;

    fn to_frame(rows: &[Self]) -> Result<DataFrame>;

    fn from_frame(df: &DataFrame) -> Result<Vec<Self>>;
}

/// Encode rows as Parquet bytes.
pub fn encode<T: TableRecord>(rows: &[T]) -> Result<Vec<u8>> {
    let mut df = T::to_frame(rows)?;
    let mut buf = Vec::new();
    ParquetWriter::new(&mut buf).finish(&mut df)?;
    Ok(buf)
}

/// Decode Parquet bytes back into rows.
pub fn decode<T: TableRecord>(bytes: Vec<u8>) -> Result<Vec<T>> {
    let df = ParquetReader::new(Cursor::new(bytes)).finish()?;
    T::from_frame(&df)
}

impl TableRecord for ConstituentRecord {
    const KIND: &'static str = "constituents";

    fn to_frame(rows: &[Self]) -> Result<DataFrame> {
        Ok(DataFrame::new(vec![
            Column::new("symbol".into(), strings(rows, |r| &r.symbol)),
            Column::new("company_name".into(), strings(rows, |r| &r.company_name)),
            Column::new("sector".into(), strings(rows, |r| &r.sector)),
            Column::new("industry".into(), strings(rows, |r| &r.industry)),
        ])?)
    }

    fn from_frame(df: &DataFrame) -> Result<Vec<Self>> {
        let symbol = df.column("symbol")?.str()?;
        let company = df.column("company_name")?.str()?;
        let sector = df.column("sector")?.str()?;
        let industry = df.column("industry")?.str()?;

        (0..df.height())
            .map(|i| {
                Ok(ConstituentRecord {
                    symbol: required(symbol.get(i), "symbol", i)?,
                    company_name: required(company.get(i), "company_name", i)?,
                    sector: required(sector.get(i), "sector", i)?,
                    industry: required(industry.get(i), "industry", i)?,
                })
            })
            .collect()
    }
}

impl TableRecord for PriceRow {
    const KIND: &'static str = "daily_closes";

    fn to_frame(rows: &[Self]) -> Result<DataFrame> {
        Ok(DataFrame::new(vec![
            date_column("date", rows.iter().map(|r| r.date))?,
            Column::new("symbol".into(), strings(rows, |r| &r.symbol)),
            Column::new(
                "close_price".into(),
                rows.iter().map(|r| r.close_price).collect::<Vec<f64>>(),
            ),
            Column::new("company_name".into(), optional_strings(rows, |r| &r.company_name)),
            Column::new("sector".into(), optional_strings(rows, |r| &r.sector)),
            Column::new("industry".into(), optional_strings(rows, |r| &r.industry)),
        ])?)
    }

    fn from_frame(df: &DataFrame) -> Result<Vec<Self>> {
        let dates = date_values(df, "date")?;
        let symbol = df.column("symbol")?.str()?;
        let close = df.column("close_price")?.f64()?;
        let company = df.column("company_name")?.str()?;
        let sector = df.column("sector")?.str()?;
        let industry = df.column("industry")?.str()?;

        dates
            .into_iter()
            .enumerate()
            .map(|(i, date)| {
                Ok(PriceRow {
                    date: date.ok_or_else(|| null_cell("date", i))?,
                    symbol: required(symbol.get(i), "symbol", i)?,
                    close_price: close.get(i).ok_or_else(|| null_cell("close_price", i))?,
                    company_name: company.get(i).map(str::to_string),
                    sector: sector.get(i).map(str::to_string),
                    industry: industry.get(i).map(str::to_string),
                })
            })
            .collect()
    }
}

impl TableRecord for MovingAverageRecord {
    const KIND: &'static str = "moving_averages";

    fn to_frame(rows: &[Self]) -> Result<DataFrame> {
        Ok(DataFrame::new(vec![
            Column::new("symbol".into(), strings(rows, |r| &r.symbol)),
            date_column("latest_week", rows.iter().map(|r| r.latest_week))?,
            Column::new(
                "latest_close".into(),
                rows.iter().map(|r| r.latest_close).collect::<Vec<f64>>(),
            ),
            Column::new(
                "moving_average_200wk".into(),
                rows.iter().map(|r| r.moving_average_200wk).collect::<Vec<f64>>(),
            ),
            Column::new(
                "percent_deviation".into(),
                rows.iter().map(|r| r.percent_deviation).collect::<Vec<f64>>(),
            ),
            Column::new(
                "weeks_observed".into(),
                rows.iter().map(|r| r.weeks_observed).collect::<Vec<u64>>(),
            ),
        ])?)
    }

    fn from_frame(df: &DataFrame) -> Result<Vec<Self>> {
        let symbol = df.column("symbol")?.str()?;
        let weeks = date_values(df, "latest_week")?;
        let latest = df.column("latest_close")?.f64()?;
        let sma = df.column("moving_average_200wk")?.f64()?;
        let deviation = df.column("percent_deviation")?.f64()?;
        let observed = df.column("weeks_observed")?.u64()?;

        weeks
            .into_iter()
            .enumerate()
            .map(|(i, week)| {
                Ok(MovingAverageRecord {
                    symbol: required(symbol.get(i), "symbol", i)?,
                    latest_week: week.ok_or_else(|| null_cell("latest_week", i))?,
                    latest_close: latest.get(i).unwrap_or(f64::NAN),
                    moving_average_200wk: sma.get(i).unwrap_or(f64::NAN),
                    percent_deviation: deviation.get(i).unwrap_or(f64::NAN),
                    weeks_observed: observed.get(i).unwrap_or(0),
                })
            })
            .collect()
    }
}

impl TableRecord for MergedRecord {
    const KIND: &'static str = "merged";

    fn to_frame(rows: &[Self]) -> Result<DataFrame> {
        let [deviation, symbol, company, sma, close, sector, industry] = MergedRecord::COLUMNS;
        Ok(DataFrame::new(vec![
            Column::new(
                deviation.into(),
                rows.iter().map(|r| r.percent_deviation).collect::<Vec<f64>>(),
            ),
            Column::new(symbol.into(), strings(rows, |r| &r.symbol)),
            Column::new(company.into(), optional_strings(rows, |r| &r.company)),
            Column::new(
                sma.into(),
                rows.iter().map(|r| r.moving_average_200wk).collect::<Vec<f64>>(),
            ),
            Column::new(
                close.into(),
                rows.iter().map(|r| r.close_price).collect::<Vec<f64>>(),
            ),
            Column::new(sector.into(), optional_strings(rows, |r| &r.sector)),
            Column::new(industry.into(), optional_strings(rows, |r| &r.industry)),
        ])?)
    }

    fn from_frame(df: &DataFrame) -> Result<Vec<Self>> {
        let [deviation, symbol, company, sma, close, sector, industry] = MergedRecord::COLUMNS;
        let deviation = df.column(deviation)?.f64()?;
        let symbol = df.column(symbol)?.str()?;
        let company = df.column(company)?.str()?;
        let sma = df.column(sma)?.f64()?;
        let close = df.column(close)?.f64()?;
        let sector = df.column(sector)?.str()?;
        let industry = df.column(industry)?.str()?;

        (0..df.height())
            .map(|i| {
                Ok(MergedRecord {
                    percent_deviation: deviation.get(i).unwrap_or(f64::NAN),
                    symbol: required(symbol.get(i), "symbol", i)?,
                    company: company.get(i).map(str::to_string),
                    moving_average_200wk: sma.get(i).unwrap_or(f64::NAN),
                    close_price: close.get(i).unwrap_or(f64::NAN),
                    sector: sector.get(i).map(str::to_string),
                    industry: industry.get(i).map(str::to_string),
                })
            })
            .collect()
    }
}

// ── Column helpers ──────────────────────────────────────────────────

fn strings<T>(rows: &[T], field: impl Fn(&T) -> &String) -> Vec<String> {
    rows.iter().map(|r| field(r).clone()).collect()
}

fn optional_strings<T>(rows: &[T], field: impl Fn(&T) -> &Option<String>) -> Vec<Option<String>> {
    rows.iter().map(|r| field(r).clone()).collect()
}

fn date_column(name: &str, dates: impl Iterator<Item = NaiveDate>) -> Result<Column> {
    let days: Vec<i32> = dates
        .map(|d| d.num_days_from_ce() - EPOCH_DAYS_FROM_CE)
        .collect();
    Ok(Column::new(name.into(), days).cast(&DataType::Date)?)
}

fn date_values(df: &DataFrame, name: &str) -> Result<Vec<Option<NaiveDate>>> {
    let days = df.column(name)?.cast(&DataType::Int32)?;
    let days = days.i32()?;
    Ok(days
        .into_iter()
        .map(|d| d.and_then(|d| NaiveDate::from_num_days_from_ce_opt(d + EPOCH_DAYS_FROM_CE)))
        .collect())
}

fn required(value: Option<&str>, column: &str, row: usize) -> Result<String> {
    value
        .map(str::to_string)
        .ok_or_else(|| null_cell(column, row))
}

fn null_cell(column: &str, row: usize) -> Error {
    Error::Codec(format!("null '{column}' at row {row}"))
}
