use crate::config::BoxError;
use retrace_codec::CodecError;
use retrace_common::ItemKey;
use retrace_persist::{StoreError, VersionId};

/// Registration-time configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("type {0:?} is already tracked")]
    DuplicateType(String),
    #[error("base type {0:?} is not tracked")]
    UnknownBaseType(String),
    #[error("version class {0:?} is not registered")]
    UnknownVersionClass(String),
    #[error("version class {0:?} is already registered")]
    DuplicateVersionClass(String),
    #[error("type {type_name:?}, attribute {attribute:?}: {source}")]
    Coder {
        type_name: String,
        attribute: String,
        #[source]
        source: CodecError,
    },
    #[error("coder registry: {0}")]
    Registry(#[source] CodecError),
    #[error("meta key {key:?} of type {type_name:?} collides with a version column")]
    ReservedMetaKey { type_name: String, key: String },
}

/// Errors from recording, querying and reifying versions.
#[derive(Debug, thiserror::Error)]
pub enum TrailError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("snapshot codec: {0}")]
    Codec(#[from] CodecError),
    #[error("version store: {0}")]
    Store(#[from] StoreError),
    #[error("type {0:?} is not tracked")]
    NotTracked(String),
    #[error("`{gate}` predicate of type {type_name:?} failed: {source}")]
    Gate {
        type_name: String,
        gate: &'static str,
        #[source]
        source: BoxError,
    },
    #[error("record of type {0:?} has no id")]
    MissingId(String),
    #[error("record {0} is not persisted")]
    NotPersisted(ItemKey),
    #[error("record {0} not found")]
    RecordNotFound(ItemKey),
    #[error("record {0} already exists")]
    RecordExists(ItemKey),
    #[error("record of type {type_name:?} carries tag {tag:?} in column {column:?}")]
    TypeTagMismatch {
        type_name: String,
        column: String,
        tag: String,
    },
    #[error("version {0} not found")]
    VersionNotFound(VersionId),
    #[error("version {version} of {item_type:?} names unknown subtype {tag}")]
    UnknownSubtype {
        version: VersionId,
        item_type: String,
        tag: String,
    },
}

/// Errors from loading declarative settings.
#[derive(Debug, thiserror::Error)]
pub enum SettingsError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("unknown settings format: {}", .0.display())]
    UnknownFormat(std::path::PathBuf),
}
