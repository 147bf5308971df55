//! Screening and export over the merged table.
//!
//! Range filters are inclusive at both ends; the threshold screens are
//! strict. Exports carry the display header.

use crate::domain::MergedRecord;
use crate::error::{Error, Result};
use std::path::{Path, PathBuf};

pub const DEFAULT_ABOVE_THRESHOLD: f64 = 50.0;
pub const DEFAULT_BELOW_THRESHOLD: f64 = -30.0;

/// Minimum and maximum percent deviation, or `None` for an empty table.
pub fn deviation_bounds(rows: &[MergedRecord]) -> Option<(f64, f64)> {
    rows.iter().map(|r| r.percent_deviation).fold(None, |acc, v| match acc {
        None => Some((v, v)),
        Some((lo, hi)) => Some((lo.min(v), hi.max(v))),
    })
}

/// Rows with `lower <= percent_deviation <= upper`, in input order.
pub fn filter_by_deviation(rows: &[MergedRecord], lower: f64, upper: f64) -> Vec<MergedRecord> {
    rows.iter()
        .filter(|r| r.percent_deviation >= lower && r.percent_deviation <= upper)
        .cloned()
        .collect()
}

/// Rows with deviation strictly greater than `threshold`.
pub fn above_threshold(rows: &[MergedRecord], threshold: f64) -> Vec<MergedRecord> {
    rows.iter()
        .filter(|r| r.percent_deviation > threshold)
        .cloned()
        .collect()
}

/// Rows with deviation strictly less than `threshold`.
pub fn below_threshold(rows: &[MergedRecord], threshold: f64) -> Vec<MergedRecord> {
    rows.iter()
        .filter(|r| r.percent_deviation < threshold)
        .cloned()
        .collect()
}

// ─── CSV export ─────────────────────────────────────────────────────

/// Render rows as CSV with the display header. An empty table still gets
/// the header line.
pub fn export_csv(rows: &[MergedRecord]) -> Result<String> {
    let mut wtr = csv::WriterBuilder::new()
        .has_headers(false)
        .from_writer(vec![]);
    wtr.write_record(MergedRecord::DISPLAY_COLUMNS)?;
    for row in rows {
        wtr.serialize(row)?;
    }
    let bytes = wtr
        .into_inner()
        .map_err(|e| Error::Codec(format!("csv flush: {e}")))?;
    String::from_utf8(bytes).map_err(|e| Error::Codec(format!("csv utf-8: {e}")))
}

/// Write the export to `dir/file_name`, creating `dir` if needed.
pub fn write_export(dir: &Path, file_name: &str, rows: &[MergedRecord]) -> Result<PathBuf> {
    let content = export_csv(rows)?;
    std::fs::create_dir_all(dir)
        .map_err(|e| Error::Export(format!("create {}: {e}", dir.display())))?;
    let path = dir.join(file_name);
    std::fs::write(&path, content)
        .map_err(|e| Error::Export(format!("write {}: {e}", path.display())))?;
    Ok(path)
}
