//! Cache key naming.
//!
//! Every stage owns one fixed key. Entries whose payload depends on query
//! parameters also record a BLAKE3 hash of the canonical JSON of those
//! parameters in their metadata; a read with a different hash is a miss,
//! and the next write replaces the entry in place.

use crate::error::Result;
use serde::Serialize;

/// Constituent list snapshot. Has no query parameters.
pub const CONSTITUENTS_KEY: &str = "sp500_constituents";

/// Daily close snapshot.
pub const DAILY_CLOSES_KEY: &str = "daily_closes";

/// Moving-average snapshot.
pub const MOVING_AVERAGE_KEY: &str = "sma_weekly";

/// Terminal merged table.
pub const MERGED_KEY: &str = "final_merged";

/// CSV snapshot of the merged table for external inspection.
pub const MERGED_SNAPSHOT_KEY: &str = "final_merged.csv";

/// Suffix of the sibling blob that holds an entry's metadata.
pub const METADATA_SUFFIX: &str = "_metadata";

/// Hex chars of the query hash kept in the metadata.
const QUERY_HASH_LEN: usize = 16;

/// Short BLAKE3 hash of the serialized query.
pub fn query_hash<Q: Serialize>(query: &Q) -> Result<String> {
    let json = serde_json::to_vec(query)?;
    let hex = blake3::hash(&json).to_hex();
    Ok(hex.as_str()[..QUERY_HASH_LEN].to_string())
}

/// Key of the metadata blob paired with `key`.
pub fn metadata_key(key: &str) -> String {
    format!("{key}{METADATA_SUFFIX}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Serialize)]
    struct Query<'a> {
        symbols: &'a [&'a str],
        start: &'a str,
    }

    #[test]
    fn query_hash_is_deterministic() {
        let q = Query {
            symbols: &["AAA", "BBB"],
            start: "2024-01-02",
        };
        let a = query_hash(&q).unwrap();
        let b = query_hash(&q).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.len(), QUERY_HASH_LEN);
    }

    #[test]
    fn query_hash_changes_with_params() {
        let a = query_hash(&Query {
            symbols: &["AAA"],
            start: "2024-01-02",
        })
        .unwrap();
        let b = query_hash(&Query {
            symbols: &["AAA"],
            start: "2024-01-03",
        })
        .unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn metadata_key_is_sibling() {
        assert_eq!(metadata_key("final_merged"), "final_merged_metadata");
    }
}
