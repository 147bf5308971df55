//! Expiring blob cache.
//!
//! One logical entry is two blobs: the data blob under `key` (Parquet) and
//! a JSON metadata sidecar under `{key}_metadata`. The two are written one
//! after the other, not atomically together; a data blob without a readable
//! sidecar reads as a miss, so a crash between the writes only costs a
//! refetch.

use super::codec::{self, TableRecord};
use super::key::{metadata_key, METADATA_SUFFIX};
use super::store::BlobStore;
use crate::clock::Clock;
use crate::error::{Error, Result};
use chrono::{DateTime, Duration, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, warn};

/// Current payload encoding version. Entries written with another version
/// read as misses.
pub const SCHEMA_VERSION: u32 = 2;

/// Metadata sidecar for a cached entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntryMeta {
    pub schema_version: u32,
    pub kind: String,
    pub written_at: DateTime<Utc>,
    pub rows: usize,
    pub data_hash: String,
    /// Hash of the query the payload answers, for entries that depend on one.
    #[serde(default)]
    pub query_hash: Option<String>,
}

/// Status of one stored data blob, for reporting.
#[derive(Debug, Clone)]
pub struct EntryStatus {
    pub key: String,
    /// `None` for table snapshots and for data blobs whose sidecar is missing.
    pub meta: Option<EntryMeta>,
    pub age: Option<Duration>,
}

pub struct ExpiringCache {
    store: Arc<dyn BlobStore>,
    clock: Arc<dyn Clock>,
}

impl ExpiringCache {
    pub fn new(store: Arc<dyn BlobStore>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    pub fn clock(&self) -> &dyn Clock {
        self.clock.as_ref()
    }

    /// Fetch an entry if both blobs exist, the metadata matches this
    /// payload shape and version, and it is no older than `max_age`.
    pub fn get<T: TableRecord>(&self, key: &str, max_age: Duration) -> Result<Option<Vec<T>>> {
        self.lookup(key, None, max_age)
    }

    /// Like [`get`](Self::get), but the entry must also have been written
    /// for `query_hash`. An entry written for another query is a miss.
    pub fn get_for_query<T: TableRecord>(
        &self,
        key: &str,
        query_hash: &str,
        max_age: Duration,
    ) -> Result<Option<Vec<T>>> {
        self.lookup(key, Some(query_hash), max_age)
    }

    fn lookup<T: TableRecord>(
        &self,
        key: &str,
        query_hash: Option<&str>,
        max_age: Duration,
    ) -> Result<Option<Vec<T>>> {
        let meta_key = metadata_key(key);
        if !self.store.exists(key)? || !self.store.exists(&meta_key)? {
            debug!(key, "cache miss: entry not present");
            return Ok(None);
        }

        let meta = match self.read_meta(&meta_key)? {
            Some(meta) => meta,
            None => return Ok(None),
        };

        if meta.schema_version != SCHEMA_VERSION || meta.kind != T::KIND {
            warn!(
                key,
                kind = %meta.kind,
                version = meta.schema_version,
                "cache miss: entry was written for another payload shape"
            );
            return Ok(None);
        }

        if meta.query_hash.as_deref() != query_hash {
            debug!(
                key,
                stored = ?meta.query_hash,
                wanted = ?query_hash,
                "cache miss: entry was written for another query"
            );
            return Ok(None);
        }

        let age = self.clock.now() - meta.written_at;
        if age > max_age {
            debug!(key, age_secs = age.num_seconds(), "cache miss: entry expired");
            return Ok(None);
        }

        let bytes = self.store.read(key)?;
        if blake3::hash(&bytes).to_hex().as_str() != meta.data_hash {
            warn!(key, "cache miss: data blob does not match its metadata");
            return Ok(None);
        }

        match codec::decode::<T>(bytes) {
            Ok(rows) => Ok(Some(rows)),
            Err(e) => {
                warn!(key, error = %e, "cache miss: undecodable payload");
                Ok(None)
            }
        }
    }

    /// Write the data blob, then the metadata blob stamped with the current time.
    pub fn put<T: TableRecord>(&self, key: &str, rows: &[T]) -> Result<()> {
        self.store_entry(key, None, rows)
    }

    /// Write an entry tagged with `query_hash`, replacing whatever the key
    /// held before regardless of its query.
    pub fn put_for_query<T: TableRecord>(
        &self,
        key: &str,
        query_hash: &str,
        rows: &[T],
    ) -> Result<()> {
        self.store_entry(key, Some(query_hash), rows)
    }

    fn store_entry<T: TableRecord>(
        &self,
        key: &str,
        query_hash: Option<&str>,
        rows: &[T],
    ) -> Result<()> {
        let bytes = codec::encode(rows)?;
        let meta = EntryMeta {
            schema_version: SCHEMA_VERSION,
            kind: T::KIND.to_string(),
            written_at: self.clock.now(),
            rows: rows.len(),
            data_hash: blake3::hash(&bytes).to_hex().to_string(),
            query_hash: query_hash.map(str::to_string),
        };
        let meta_json = serde_json::to_vec_pretty(&meta)?;

        self.store.write(key, &bytes)?;
        self.store.write(&metadata_key(key), &meta_json)?;
        debug!(key, rows = rows.len(), "cache entry written");
        Ok(())
    }

    /// Remove both blobs of an entry. Missing blobs are ignored.
    pub fn delete(&self, key: &str) -> Result<()> {
        for blob in [key.to_string(), metadata_key(key)] {
            if self.store.exists(&blob)? {
                self.store.delete(&blob)?;
            }
        }
        Ok(())
    }

    /// Persist rows as a CSV snapshot for external inspection.
    ///
    /// Snapshots carry no metadata and never expire.
    pub fn put_table<T: Serialize>(&self, key: &str, rows: &[T]) -> Result<()> {
        let mut wtr = csv::Writer::from_writer(vec![]);
        for row in rows {
            wtr.serialize(row)?;
        }
        let bytes = wtr
            .into_inner()
            .map_err(|e| Error::Codec(format!("csv flush: {e}")))?;
        self.store.write(key, &bytes)
    }

    /// Read a CSV snapshot if it exists. Existence is the only check.
    pub fn get_table<T: DeserializeOwned>(&self, key: &str) -> Result<Option<Vec<T>>> {
        if !self.store.exists(key)? {
            return Ok(None);
        }
        let bytes = self.store.read(key)?;
        let mut rdr = csv::Reader::from_reader(bytes.as_slice());
        let rows = rdr.deserialize().collect::<Result<Vec<T>, csv::Error>>()?;
        Ok(Some(rows))
    }

    /// Metadata of an entry, if its sidecar exists and parses.
    pub fn meta(&self, key: &str) -> Result<Option<EntryMeta>> {
        let meta_key = metadata_key(key);
        if !self.store.exists(&meta_key)? {
            return Ok(None);
        }
        self.read_meta(&meta_key)
    }

    /// Every stored data blob with its metadata and age.
    pub fn status(&self) -> Result<Vec<EntryStatus>> {
        let now = self.clock.now();
        let mut entries = Vec::new();
        for key in self.store.list()? {
            if key.ends_with(METADATA_SUFFIX) {
                continue;
            }
            let meta = self.meta(&key)?;
            let age = meta.as_ref().map(|m| now - m.written_at);
            entries.push(EntryStatus { key, meta, age });
        }
        Ok(entries)
    }

    /// Delete every blob in the store. Returns the number removed.
    pub fn clear(&self) -> Result<usize> {
        let keys = self.store.list()?;
        for key in &keys {
            self.store.delete(key)?;
        }
        Ok(keys.len())
    }

    fn read_meta(&self, meta_key: &str) -> Result<Option<EntryMeta>> {
        let raw = self.store.read(meta_key)?;
        match serde_json::from_slice(&raw) {
            Ok(meta) => Ok(Some(meta)),
            Err(e) => {
                warn!(key = meta_key, error = %e, "unreadable cache metadata");
                Ok(None)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::store::MemoryBlobStore;
    use crate::clock::FixedClock;
    use crate::domain::{ConstituentRecord, MergedRecord, MovingAverageRecord};
    use chrono::TimeZone;

    fn setup() -> (ExpiringCache, Arc<MemoryBlobStore>, Arc<FixedClock>) {
        let store = Arc::new(MemoryBlobStore::new());
        let clock = Arc::new(FixedClock::new(
            Utc.with_ymd_and_hms(2024, 6, 3, 9, 30, 0).unwrap(),
        ));
        let cache = ExpiringCache::new(store.clone(), clock.clone());
        (cache, store, clock)
    }

    fn constituents() -> Vec<ConstituentRecord> {
        vec![ConstituentRecord {
            symbol: "MMM".into(),
            company_name: "3M".into(),
            sector: "Industrials".into(),
            industry: "Industrial Conglomerates".into(),
        }]
    }

    #[test]
    fn put_then_get_returns_payload() {
        let (cache, _, _) = setup();
        cache.put("k", &constituents()).unwrap();
        let hit: Option<Vec<ConstituentRecord>> = cache.get("k", Duration::zero()).unwrap();
        assert_eq!(hit, Some(constituents()));
    }

    #[test]
    fn expired_entry_is_a_miss() {
        let (cache, _, clock) = setup();
        cache.put("k", &constituents()).unwrap();

        clock.advance(Duration::hours(24));
        assert!(cache
            .get::<ConstituentRecord>("k", Duration::days(1))
            .unwrap()
            .is_some());

        clock.advance(Duration::seconds(1));
        assert!(cache
            .get::<ConstituentRecord>("k", Duration::days(1))
            .unwrap()
            .is_none());
    }

    #[test]
    fn never_written_key_is_a_miss_and_delete_is_noop() {
        let (cache, store, _) = setup();
        assert!(cache
            .get::<ConstituentRecord>("nope", Duration::days(1))
            .unwrap()
            .is_none());
        cache.delete("nope").unwrap();
        assert!(store.list().unwrap().is_empty());
    }

    #[test]
    fn data_without_metadata_is_a_miss() {
        let (cache, store, _) = setup();
        cache.put("k", &constituents()).unwrap();
        store.delete("k_metadata").unwrap();
        assert!(cache
            .get::<ConstituentRecord>("k", Duration::days(1))
            .unwrap()
            .is_none());
    }

    #[test]
    fn metadata_without_data_is_a_miss() {
        let (cache, store, _) = setup();
        cache.put("k", &constituents()).unwrap();
        store.delete("k").unwrap();
        assert!(cache
            .get::<ConstituentRecord>("k", Duration::days(1))
            .unwrap()
            .is_none());
    }

    #[test]
    fn tampered_data_blob_is_a_miss() {
        let (cache, store, _) = setup();
        cache.put("k", &constituents()).unwrap();
        store.write("k", b"overwritten out of band").unwrap();
        assert!(cache
            .get::<ConstituentRecord>("k", Duration::days(1))
            .unwrap()
            .is_none());
    }

    #[test]
    fn wrong_shape_is_a_miss() {
        let (cache, _, _) = setup();
        cache.put("k", &constituents()).unwrap();
        assert!(cache
            .get::<MovingAverageRecord>("k", Duration::days(1))
            .unwrap()
            .is_none());
    }

    #[test]
    fn query_mismatch_is_a_miss_and_put_replaces_in_place() {
        let (cache, store, _) = setup();
        cache.put_for_query("q", "aaaa", &constituents()).unwrap();
        assert!(cache
            .get_for_query::<ConstituentRecord>("q", "aaaa", Duration::days(1))
            .unwrap()
            .is_some());
        assert!(cache
            .get_for_query::<ConstituentRecord>("q", "bbbb", Duration::days(1))
            .unwrap()
            .is_none());
        assert!(cache
            .get::<ConstituentRecord>("q", Duration::days(1))
            .unwrap()
            .is_none());

        cache.put_for_query("q", "bbbb", &constituents()).unwrap();
        assert_eq!(store.list().unwrap().len(), 2);
        assert_eq!(
            cache.meta("q").unwrap().unwrap().query_hash.as_deref(),
            Some("bbbb")
        );
    }

    #[test]
    fn older_schema_version_is_a_miss() {
        let (cache, store, _) = setup();
        cache.put("k", &constituents()).unwrap();
        let mut meta = cache.meta("k").unwrap().unwrap();
        meta.schema_version = 1;
        store
            .write("k_metadata", &serde_json::to_vec(&meta).unwrap())
            .unwrap();
        assert!(cache
            .get::<ConstituentRecord>("k", Duration::days(1))
            .unwrap()
            .is_none());
    }

    #[test]
    fn delete_removes_both_blobs() {
        let (cache, store, _) = setup();
        cache.put("k", &constituents()).unwrap();
        assert_eq!(store.list().unwrap().len(), 2);
        cache.delete("k").unwrap();
        assert!(store.list().unwrap().is_empty());
    }

    #[test]
    fn table_snapshot_roundtrip_ignores_age() {
        let (cache, _, clock) = setup();
        let rows = vec![MergedRecord {
            percent_deviation: -12.5,
            symbol: "MMM".into(),
            company: Some("3M".into()),
            moving_average_200wk: 120.0,
            close_price: 105.0,
            sector: None,
            industry: Some("Industrial Conglomerates".into()),
        }];
        cache.put_table("snap.csv", &rows).unwrap();
        clock.advance(Duration::days(365));

        let loaded: Vec<MergedRecord> = cache.get_table("snap.csv").unwrap().unwrap();
        assert_eq!(loaded, rows);
        assert!(cache.get_table::<MergedRecord>("absent.csv").unwrap().is_none());
    }

    #[test]
    fn status_reports_entries_and_snapshots() {
        let (cache, _, clock) = setup();
        cache.put("k", &constituents()).unwrap();
        cache.put_table("snap.csv", &constituents()).unwrap();
        clock.advance(Duration::hours(2));

        let status = cache.status().unwrap();
        assert_eq!(status.len(), 2);
        let entry = status.iter().find(|s| s.key == "k").unwrap();
        assert_eq!(entry.meta.as_ref().unwrap().rows, 1);
        assert_eq!(entry.age, Some(Duration::hours(2)));
        let snap = status.iter().find(|s| s.key == "snap.csv").unwrap();
        assert!(snap.meta.is_none());

        assert_eq!(cache.clear().unwrap(), 3);
        assert!(cache.status().unwrap().is_empty());
    }
}
