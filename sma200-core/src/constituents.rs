//! Reference data: the index constituent list.
//!
//! Scraped from the constituents table of a public HTML page and cached
//! for a day. Rows keep document order; the first four cells of each data
//! row are taken verbatim as symbol, company, sector and industry.

use crate::cache::key::CONSTITUENTS_KEY;
use crate::cache::ExpiringCache;
use crate::data::http::transport_error;
use crate::domain::{ConstituentRecord, ConstituentTable};
use crate::error::{Error, Result};
use chrono::Duration;
use scraper::{ElementRef, Html, Selector};
use tracing::{debug, info};

/// Where the reference document comes from.
pub trait ReferenceSource: Send + Sync {
    /// Short description for logs.
    fn describe(&self) -> &str;

    fn fetch_document(&self) -> Result<String>;
}

/// Fetches the reference page over HTTP.
pub struct HttpReferenceSource {
    client: reqwest::blocking::Client,
    url: String,
}

impl HttpReferenceSource {
    pub fn new(client: reqwest::blocking::Client, url: impl Into<String>) -> Self {
        Self {
            client,
            url: url.into(),
        }
    }
}

impl ReferenceSource for HttpReferenceSource {
    fn describe(&self) -> &str {
        &self.url
    }

    fn fetch_document(&self) -> Result<String> {
        let resp = self
            .client
            .get(&self.url)
            .send()
            .map_err(|e| transport_error("constituents page", e))?;
        let status = resp.status();
        if !status.is_success() {
            return Err(Error::SourceUnavailable(format!(
                "HTTP {status} for {}",
                self.url
            )));
        }
        resp.text()
            .map_err(|e| transport_error("constituents page body", e))
    }
}

/// A parsed constituents table.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedTable {
    /// Header cell texts. Informational only.
    pub headers: Vec<String>,
    pub records: ConstituentTable,
}

/// Parse the `<table id="{table_id}">` element out of an HTML document.
///
/// The first `<tr>` is the header row. Data rows with fewer than four
/// `<td>` cells are skipped.
pub fn parse_constituents(html: &str, table_id: &str) -> Result<ParsedTable> {
    let document = Html::parse_document(html);
    let table_sel = selector(&format!("table#{table_id}"))?;
    let th_sel = selector("th")?;
    let tr_sel = selector("tr")?;
    let td_sel = selector("td")?;

    let table = document
        .select(&table_sel)
        .next()
        .ok_or_else(|| Error::Parse(format!("no table with id '{table_id}' in document")))?;

    let headers = table.select(&th_sel).map(cell_text).collect();

    let records = table
        .select(&tr_sel)
        .skip(1)
        .filter_map(|row| {
            let cells: Vec<String> = row.select(&td_sel).map(cell_text).collect();
            if cells.len() < 4 {
                return None;
            }
            let mut cells = cells.into_iter();
            Some(ConstituentRecord {
                symbol: cells.next()?,
                company_name: cells.next()?,
                sector: cells.next()?,
                industry: cells.next()?,
            })
        })
        .collect();

    Ok(ParsedTable { headers, records })
}

fn selector(css: &str) -> Result<Selector> {
    Selector::parse(css).map_err(|e| Error::Parse(format!("invalid selector '{css}': {e:?}")))
}

fn cell_text(cell: ElementRef<'_>) -> String {
    cell.text().collect::<String>().trim().to_string()
}

/// Cache-or-fetch loader for the constituent list.
pub struct ConstituentLoader<'a> {
    cache: &'a ExpiringCache,
    source: &'a dyn ReferenceSource,
    table_id: &'a str,
    max_age: Duration,
    force: bool,
}

impl<'a> ConstituentLoader<'a> {
    pub fn new(
        cache: &'a ExpiringCache,
        source: &'a dyn ReferenceSource,
        table_id: &'a str,
        max_age: Duration,
    ) -> Self {
        Self {
            cache,
            source,
            table_id,
            max_age,
            force: false,
        }
    }

    /// Skip the cache read; the fresh result is still written through.
    pub fn force(mut self, force: bool) -> Self {
        self.force = force;
        self
    }

    pub fn load_constituents(&self) -> Result<ConstituentTable> {
        if !self.force {
            if let Some(cached) = self
                .cache
                .get::<ConstituentRecord>(CONSTITUENTS_KEY, self.max_age)?
            {
                info!(count = cached.len(), "using cached constituent list");
                return Ok(cached);
            }
        }

        info!(source = self.source.describe(), "downloading constituent list");
        let html = self.source.fetch_document()?;
        let parsed = parse_constituents(&html, self.table_id)?;
        debug!(headers = ?parsed.headers, "constituents table headers");

        self.cache.put(CONSTITUENTS_KEY, &parsed.records)?;
        info!(count = parsed.records.len(), "constituent list saved to cache");
        Ok(parsed.records)
    }
}
