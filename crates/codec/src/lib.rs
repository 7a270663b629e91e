//! Snapshot codec: turns attribute maps and diff maps into durable strings.
//!
//! # Invariants
//! - Two layers: per-attribute coders run first, then the envelope serializer
//!   encodes the whole map.
//! - The coder that dumped an attribute is the one that loads it.
//! - A coder without a dump capability is replaced, in both directions, by the
//!   default YAML coder.

mod coder;
mod serializer;
mod snapshot;

pub use coder::{Coder, CoderRegistry, DumpFn, LoadFn};
pub use serializer::Serializer;
pub use snapshot::{AttributeCoders, SnapshotCodec};

pub fn crate_info() -> &'static str {
    concat!("retrace-codec v", env!("CARGO_PKG_VERSION"))
}

/// Errors from encoding or decoding snapshots.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("coder {coder:?} failed: {message}")]
    Coder { coder: String, message: String },
    #[error("attribute {attribute:?}: {source}")]
    Attribute {
        attribute: String,
        #[source]
        source: Box<CodecError>,
    },
    #[error("attribute {0:?} uses a coder but its stored value is not text")]
    NotText(String),
    #[error("unknown serializer {0:?}, expected yaml or json")]
    UnknownSerializer(String),
    #[error("unknown coder {0:?}")]
    UnknownCoder(String),
    #[error("coder {0:?} already registered")]
    DuplicateCoder(String),
}

impl CodecError {
    fn for_attribute(attribute: &str, source: CodecError) -> Self {
        Self::Attribute {
            attribute: attribute.to_owned(),
            source: Box::new(source),
        }
    }
}
