//! Trail kernel: records versions of tracked records and rebuilds past states.
//!
//! # Invariants
//! - A version's `object` is the record as it was immediately before the event.
//! - An update version is staged before its save and written with it; a failed
//!   recording leaves the row unchanged.
//! - Subtypes share one history keyed by their base type.
//! - Switches are owned by a [`Trail`]; a scoped disable always restores the
//!   prior value.

mod config;
mod context;
pub mod diff;
mod error;
mod meta;
mod record;
mod recorder;
mod reify;
mod repo;
pub mod settings;
mod switch;
mod trail;

pub use config::{BoxError, DEFAULT_VERSION_CLASS, GateFn, MetaRule, TrackingOptions, TrailConfig};
pub use context::Context;
pub use error::{ConfigError, SettingsError, TrailError};
pub use record::Record;
pub use recorder::StagedVersion;
pub use reify::RecordSource;
pub use repo::{CREATED_AT, RecordTable, Repository, UPDATED_AT};
pub use settings::{Settings, TypeDecl};
pub use trail::Trail;

pub fn crate_info() -> &'static str {
    concat!("retrace-kernel v", env!("CARGO_PKG_VERSION"))
}

/// Attribute under which a snapshot stores the record's identity.
pub const ID_ATTRIBUTE: &str = "id";
