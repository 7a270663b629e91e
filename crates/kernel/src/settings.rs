//! Declarative trail configuration loaded from YAML or JSON.
//!
//! ```yaml
//! trail:
//!   timestamp_field: created_at
//!   serializer: yaml
//! types:
//!   Article:
//!     ignore: [views]
//!     skip: [file_upload]
//!     meta:
//!       answer: { literal: 42 }
//!       title: { attribute: title }
//!   Animal:
//!     inheritance_column: species
//!     subtypes: [Dog, Cat]
//! ```
//!
//! Predicates and computed metadata have no declarative form; attach them to
//! the [`TrackingOptions`] returned by [`TypeDecl::to_options`].

use crate::config::{MetaRule, TrackingOptions, TrailConfig};
use crate::error::{ConfigError, SettingsError};
use crate::trail::Trail;
use retrace_common::{Event, Value};
use retrace_persist::VersionStore;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Settings {
    pub trail: TrailConfig,
    pub types: BTreeMap<String, TypeDecl>,
}

/// Declared tracking options of one type.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TypeDecl {
    /// Tracked events; all of them when absent.
    pub on: Option<Vec<Event>>,
    pub class_name: Option<String>,
    pub ignore: Vec<String>,
    pub only: Vec<String>,
    pub skip: Vec<String>,
    pub meta: BTreeMap<String, MetaDecl>,
    pub versions: Option<String>,
    pub version: Option<String>,
    /// Attribute name to registered coder name.
    pub coders: BTreeMap<String, String>,
    pub inheritance_column: Option<String>,
    pub subtypes: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MetaDecl {
    Literal(Scalar),
    Attribute(String),
}

/// A plain configuration scalar.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Scalar {
    Bool(bool),
    Integer(i64),
    Float(f64),
    Text(String),
}

impl From<Scalar> for Value {
    fn from(scalar: Scalar) -> Self {
        match scalar {
            Scalar::Bool(b) => Value::Bool(b),
            Scalar::Integer(i) => Value::Integer(i),
            Scalar::Float(x) => Value::Float(x),
            Scalar::Text(s) => Value::Text(s),
        }
    }
}

impl TypeDecl {
    pub fn to_options(&self) -> TrackingOptions {
        let mut options = TrackingOptions::new()
            .ignore(&self.ignore)
            .only(&self.only)
            .skip(&self.skip);
        if let Some(events) = &self.on {
            options = options.on(events.iter().copied());
        }
        if let Some(class_name) = &self.class_name {
            options = options.class_name(class_name);
        }
        if let Some(versions) = &self.versions {
            options = options.versions(versions);
        }
        if let Some(version) = &self.version {
            options = options.version(version);
        }
        if let Some(column) = &self.inheritance_column {
            options = options.inheritance_column(column);
        }
        for (attribute, coder) in &self.coders {
            options = options.coder(attribute, coder);
        }
        for (key, decl) in &self.meta {
            let rule = match decl {
                MetaDecl::Literal(scalar) => MetaRule::literal(scalar.clone()),
                MetaDecl::Attribute(name) => MetaRule::attribute(name),
            };
            options = options.meta(key, rule);
        }
        options
    }
}

impl Settings {
    pub fn from_yaml_str(text: &str) -> Result<Self, SettingsError> {
        Ok(serde_yaml::from_str(text)?)
    }

    pub fn from_json_str(text: &str) -> Result<Self, SettingsError> {
        Ok(serde_json::from_str(text)?)
    }

    /// Load by file extension: `.yaml`/`.yml` or `.json`.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, SettingsError> {
        let path = path.as_ref();
        let extension = path
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_ascii_lowercase);
        let settings = match extension.as_deref() {
            Some("yaml" | "yml") => Self::from_yaml_str(&std::fs::read_to_string(path)?)?,
            Some("json") => Self::from_json_str(&std::fs::read_to_string(path)?)?,
            _ => return Err(SettingsError::UnknownFormat(path.to_path_buf())),
        };
        tracing::debug!(path = %path.display(), types = settings.types.len(), "loaded settings");
        Ok(settings)
    }
}

impl<S: VersionStore> Trail<S> {
    /// A trail configured from `settings`, recording into `store` as the
    /// default version class.
    pub fn from_settings(settings: &Settings, store: S) -> Result<Self, ConfigError> {
        let mut trail = Self::new(settings.trail.clone(), store);
        trail.track_all(&settings.types)?;
        Ok(trail)
    }

    /// Track every declared type, then its subtypes. Register extra version
    /// classes and coders first.
    pub fn track_all(&mut self, types: &BTreeMap<String, TypeDecl>) -> Result<(), ConfigError> {
        for (name, decl) in types {
            self.track(name.clone(), decl.to_options())?;
        }
        for (name, decl) in types {
            for subtype in &decl.subtypes {
                self.track_subtype(subtype.clone(), name)?;
            }
        }
        Ok(())
    }
}
