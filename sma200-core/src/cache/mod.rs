//! Expiring blob cache: stores, key naming, payload codecs.

pub mod codec;
pub mod expiring;
pub mod key;
pub mod store;

pub use codec::TableRecord;
pub use expiring::{EntryMeta, EntryStatus, ExpiringCache, SCHEMA_VERSION};
pub use store::{BlobStore, FsBlobStore, MemoryBlobStore};
