//! Yahoo Finance data provider.
//!
//! Fetches unadjusted closes from Yahoo's v8 chart API, one symbol at a
//! time, in request order. Nothing is retried: a symbol that fails is left
//! out of the result, and a ban, a tripped breaker, or an unreachable host
//! fails the whole request.

use super::circuit_breaker::CircuitBreaker;
use super::http::transport_error;
use super::provider::{BarsRequest, CloseMatrix, FetchProgress, Interval, MarketDataProvider};
use crate::error::{Error, Result};
use chrono::{NaiveDate, NaiveTime, Utc};
use serde::Deserialize;
use std::sync::Arc;
use tracing::debug;

const CHART_BASE_URL: &str = "https://query2.finance.yahoo.com/v8/finance/chart";

#[derive(Debug, Deserialize)]
struct ChartResponse {
    chart: ChartResult,
}

#[derive(Debug, Deserialize)]
struct ChartResult {
    result: Option<Vec<ChartData>>,
    error: Option<ChartError>,
}

#[derive(Debug, Deserialize)]
struct ChartError {
    code: String,
    description: String,
}

#[derive(Debug, Deserialize)]
struct ChartData {
    timestamp: Option<Vec<i64>>,
    indicators: Indicators,
}

#[derive(Debug, Deserialize)]
struct Indicators {
    quote: Vec<QuoteData>,
}

#[derive(Debug, Deserialize)]
struct QuoteData {
    close: Vec<Option<f64>>,
}

/// Why a single symbol produced no series.
#[derive(Debug)]
enum SymbolFailure {
    /// Skip this symbol and continue.
    Missing(Error),
    /// Abort the whole request.
    Fatal(Error),
}

pub struct YahooProvider {
    client: reqwest::blocking::Client,
    circuit_breaker: Arc<CircuitBreaker>,
}

impl YahooProvider {
    pub fn new(client: reqwest::blocking::Client, circuit_breaker: Arc<CircuitBreaker>) -> Self {
        Self {
            client,
            circuit_breaker,
        }
    }

    /// Yahoo spells share classes with a dash (`BRK-B`), the index lists
    /// them with a dot (`BRK.B`).
    fn yahoo_symbol(symbol: &str) -> String {
        symbol.replace('.', "-")
    }

    fn chart_url(symbol: &str, request: &BarsRequest) -> String {
        let start_ts = request.start.and_time(NaiveTime::MIN).and_utc().timestamp();
        let end_ts = request
            .end
            .map(|end| end.and_time(NaiveTime::MIN).and_utc().timestamp())
            .unwrap_or_else(|| Utc::now().timestamp());
        let interval = match request.interval {
            Interval::Daily => "1d",
            Interval::Weekly => "1wk",
        };
        format!(
            "{CHART_BASE_URL}/{}?period1={start_ts}&period2={end_ts}&interval={interval}\
             &includeAdjustedClose=false",
            Self::yahoo_symbol(symbol)
        )
    }

    /// Pull the close series out of a chart response. Bars without a close
    /// (holidays, halted sessions) are dropped.
    fn parse_response(
        symbol: &str,
        resp: ChartResponse,
    ) -> Result<Vec<(NaiveDate, f64)>, SymbolFailure> {
        let result = resp.chart.result.ok_or_else(|| {
            let reason = match resp.chart.error {
                Some(err) => format!("{symbol}: {}: {}", err.code, err.description),
                None => format!("{symbol}: empty result with no error"),
            };
            SymbolFailure::Missing(Error::Parse(reason))
        })?;

        let data = result.into_iter().next().ok_or_else(|| {
            SymbolFailure::Missing(Error::Parse(format!("{symbol}: result array is empty")))
        })?;

        let timestamps = data.timestamp.unwrap_or_default();
        let closes = data
            .indicators
            .quote
            .into_iter()
            .next()
            .map(|q| q.close)
            .unwrap_or_default();

        let mut points = Vec::with_capacity(timestamps.len());
        for (i, ts) in timestamps.into_iter().enumerate() {
            let Some(close) = closes.get(i).copied().flatten() else {
                continue;
            };
            let date = chrono::DateTime::from_timestamp(ts, 0)
                .map(|dt| dt.date_naive())
                .ok_or_else(|| {
                    SymbolFailure::Missing(Error::Parse(format!(
                        "{symbol}: invalid timestamp {ts}"
                    )))
                })?;
            points.push((date, close));
        }

        if points.is_empty() {
            return Err(SymbolFailure::Missing(Error::Parse(format!(
                "{symbol}: no closes in range"
            ))));
        }
        Ok(points)
    }

    fn fetch_symbol(
        &self,
        symbol: &str,
        request: &BarsRequest,
    ) -> Result<Vec<(NaiveDate, f64)>, SymbolFailure> {
        if !self.circuit_breaker.is_allowed() {
            return Err(SymbolFailure::Fatal(Error::CircuitBreakerTripped));
        }

        let url = Self::chart_url(symbol, request);
        debug!(%url, "requesting chart");
        let resp = self.client.get(&url).send().map_err(|e| {
            SymbolFailure::Fatal(transport_error(&format!("request for {symbol}"), e))
        })?;

        if let Some(failure) = classify(symbol, resp.status(), &self.circuit_breaker) {
            return Err(failure);
        }

        let chart: ChartResponse = resp.json().map_err(|e| {
            SymbolFailure::Missing(Error::Parse(format!(
                "failed to parse response for {symbol}: {e}"
            )))
        })?;
        let points = Self::parse_response(symbol, chart)?;
        self.circuit_breaker.record_success();
        Ok(points)
    }
}

/// Map a non-success HTTP status to a per-symbol failure and update the
/// breaker. `None` means the body should be parsed.
///
/// 403 trips the breaker and aborts. 401 aborts without touching it. 429
/// and 5xx count toward the breaker threshold and skip the symbol.
fn classify(
    symbol: &str,
    status: reqwest::StatusCode,
    breaker: &CircuitBreaker,
) -> Option<SymbolFailure> {
    use reqwest::StatusCode;

    if status.is_success() {
        return None;
    }
    let failure = match status {
        StatusCode::FORBIDDEN => {
            breaker.trip();
            SymbolFailure::Fatal(Error::CircuitBreakerTripped)
        }
        StatusCode::UNAUTHORIZED => SymbolFailure::Fatal(Error::SourceUnavailable(
            "Yahoo Finance requires authentication".into(),
        )),
        StatusCode::TOO_MANY_REQUESTS => {
            breaker.record_failure();
            SymbolFailure::Missing(Error::SourceUnavailable(format!(
                "HTTP {status} for {symbol}"
            )))
        }
        s if s.is_server_error() => {
            breaker.record_failure();
            SymbolFailure::Missing(Error::SourceUnavailable(format!(
                "HTTP {status} for {symbol}"
            )))
        }
        StatusCode::NOT_FOUND => {
            SymbolFailure::Missing(Error::Parse(format!("{symbol}: symbol not found")))
        }
        _ => SymbolFailure::Missing(Error::SourceUnavailable(format!(
            "HTTP {status} for {symbol}"
        ))),
    };
    Some(failure)
}

/// Walk `symbols` in order. Missing symbols are counted and skipped; the
/// first fatal failure ends the batch.
fn collect_series<F>(
    symbols: &[String],
    progress: &dyn FetchProgress,
    mut fetch: F,
) -> Result<CloseMatrix>
where
    F: FnMut(&str) -> Result<Vec<(NaiveDate, f64)>, SymbolFailure>,
{
    let total = symbols.len();
    let mut series = Vec::with_capacity(total);
    let mut failed = 0;

    for (i, symbol) in symbols.iter().enumerate() {
        progress.on_start(symbol, i, total);
        match fetch(symbol) {
            Ok(points) => {
                progress.on_complete(symbol, i, total, &Ok(points.len()));
                series.push((symbol.clone(), points));
            }
            Err(SymbolFailure::Missing(e)) => {
                failed += 1;
                progress.on_complete(symbol, i, total, &Err(e));
            }
            Err(SymbolFailure::Fatal(e)) => {
                progress.on_batch_complete(series.len(), total - series.len(), total);
                return Err(e);
            }
        }
    }

    progress.on_batch_complete(series.len(), failed, total);
    Ok(CloseMatrix::from_series(series))
}

impl MarketDataProvider for YahooProvider {
    fn name(&self) -> &str {
        "yahoo_finance"
    }

    fn fetch_closes(
        &self,
        request: &BarsRequest,
        progress: &dyn FetchProgress,
    ) -> Result<CloseMatrix> {
        collect_series(&request.symbols, progress, |symbol| {
            self.fetch_symbol(symbol, request)
        })
    }
}
