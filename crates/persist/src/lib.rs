//! Persistence: version records, history queries, append-only version stores.
//!
//! # Invariants
//! - Versions are append-only; a stored version is never modified.
//! - Sequence ids increase monotonically in append order.
//! - Query results come back in canonical `(timestamp, id)` order.

mod memory;
mod query;
mod store;
mod version;

pub use memory::MemoryVersionStore;
pub use query::{Bounds, TimeRange, VersionQuery};
pub use store::{FileVersionStore, IntegrityManifest, ManifestEntry, StoreMeta, StoreOptions};
pub use version::{
    DEFAULT_TIMESTAMP_FIELD, NewVersion, OrderKey, RESERVED_COLUMNS, Version, VersionId,
};

use retrace_common::ItemKey;

pub fn crate_info() -> &'static str {
    concat!("retrace-persist v", env!("CARGO_PKG_VERSION"))
}

/// Errors from version persistence.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("CBOR serialization error: {0}")]
    CborEncode(String),
    #[error("CBOR deserialization error: {0}")]
    CborDecode(String),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("integrity check failed: expected {expected}, got {actual}")]
    IntegrityMismatch { expected: String, actual: String },
    #[error("schema version mismatch: file has v{file_version}, expected v{expected_version}")]
    SchemaMismatch {
        file_version: u32,
        expected_version: u32,
    },
    #[error("timestamp field mismatch: store uses {stored:?}, configured {configured:?}")]
    TimestampFieldMismatch { stored: String, configured: String },
    #[error("no version store at {}", .0.display())]
    NotAStore(std::path::PathBuf),
    #[error("malformed version row, column {column:?}: {reason}")]
    MalformedRow { column: String, reason: String },
}

/// The persistence collaborator: an append-only, ordered version history.
pub trait VersionStore {
    /// Append a version, assigning the next sequence id.
    fn append(&mut self, draft: NewVersion) -> Result<Version, StoreError>;

    fn get(&self, id: VersionId) -> Result<Option<Version>, StoreError>;

    /// All versions matching `query`, in canonical order.
    fn query(&self, query: &VersionQuery) -> Result<Vec<Version>, StoreError>;

    fn len(&self) -> usize;

    /// Whether appended versions keep their `object_changes` payload.
    fn stores_changes(&self) -> bool;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn first(&self, query: &VersionQuery) -> Result<Option<Version>, StoreError> {
        Ok(self.query(query)?.into_iter().next())
    }

    fn last(&self, query: &VersionQuery) -> Result<Option<Version>, StoreError> {
        Ok(self.query(query)?.pop())
    }

    /// Full history of one item, oldest first.
    fn history(&self, key: &ItemKey) -> Result<Vec<Version>, StoreError> {
        self.query(&VersionQuery::for_item(key.clone()))
    }

    /// The sibling immediately before `version` in its item's history.
    fn previous(&self, version: &Version) -> Result<Option<Version>, StoreError> {
        self.last(&VersionQuery::for_item(version.item_key()).before_key(version.order_key()))
    }

    /// The sibling immediately after `version` in its item's history.
    fn next(&self, version: &Version) -> Result<Option<Version>, StoreError> {
        self.first(&VersionQuery::for_item(version.item_key()).after_key(version.order_key()))
    }
}
