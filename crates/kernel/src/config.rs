use crate::{Context, Record};
use retrace_codec::Serializer;
use retrace_common::{Event, Value};
use retrace_persist::{Bounds, DEFAULT_TIMESTAMP_FIELD};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::Arc;

/// Name of the version class every type records into unless told otherwise.
pub const DEFAULT_VERSION_CLASS: &str = "Version";

pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Recording gate evaluated against the record being saved.
pub type GateFn = Arc<dyn Fn(&Record) -> Result<bool, BoxError> + Send + Sync>;

/// Trail-wide settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TrailConfig {
    /// Process-wide switch. Nothing is recorded while false.
    pub enabled: bool,
    /// Column name standing in for the version timestamp.
    pub timestamp_field: String,
    /// Envelope format of `object` and `object_changes`.
    pub serializer: Serializer,
    /// Endpoint semantics of `between` queries.
    pub between: Bounds,
}

impl Default for TrailConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            timestamp_field: DEFAULT_TIMESTAMP_FIELD.to_owned(),
            serializer: Serializer::default(),
            between: Bounds::default(),
        }
    }
}

/// How one metadata column is filled when a version is recorded.
#[derive(Clone)]
pub enum MetaRule {
    Literal(Value),
    /// Copy an attribute of the record, using its pre-change value when it is
    /// changing.
    Attribute(String),
    Entity(Arc<dyn Fn(&Record) -> Value + Send + Sync>),
    Context(Arc<dyn Fn(&Context) -> Value + Send + Sync>),
}

impl MetaRule {
    pub fn literal(value: impl Into<Value>) -> Self {
        Self::Literal(value.into())
    }

    pub fn attribute(name: impl Into<String>) -> Self {
        Self::Attribute(name.into())
    }

    pub fn entity(f: impl Fn(&Record) -> Value + Send + Sync + 'static) -> Self {
        Self::Entity(Arc::new(f))
    }

    pub fn context(f: impl Fn(&Context) -> Value + Send + Sync + 'static) -> Self {
        Self::Context(Arc::new(f))
    }

    pub fn evaluate(&self, record: &Record, ctx: &Context) -> Value {
        match self {
            Self::Literal(value) => value.clone(),
            Self::Attribute(name) => record.attribute_was(name).cloned().unwrap_or_default(),
            Self::Entity(f) => f(record),
            Self::Context(f) => f(ctx),
        }
    }
}

impl fmt::Debug for MetaRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Literal(value) => f.debug_tuple("Literal").field(value).finish(),
            Self::Attribute(name) => f.debug_tuple("Attribute").field(name).finish(),
            Self::Entity(_) => f.write_str("Entity(..)"),
            Self::Context(_) => f.write_str("Context(..)"),
        }
    }
}

/// Per-type tracking options.
#[derive(Clone)]
pub struct TrackingOptions {
    pub(crate) on: BTreeSet<Event>,
    pub(crate) class_name: String,
    pub(crate) ignore: BTreeSet<String>,
    pub(crate) only: BTreeSet<String>,
    pub(crate) skip: BTreeSet<String>,
    pub(crate) if_gate: Option<GateFn>,
    pub(crate) unless_gate: Option<GateFn>,
    pub(crate) meta: BTreeMap<String, MetaRule>,
    pub(crate) versions_name: String,
    pub(crate) version_name: String,
    pub(crate) coders: BTreeMap<String, String>,
    pub(crate) inheritance_column: String,
}

impl TrackingOptions {
    pub fn new() -> Self {
        Self {
            on: Event::ALL.into_iter().collect(),
            class_name: DEFAULT_VERSION_CLASS.to_owned(),
            ignore: BTreeSet::new(),
            only: BTreeSet::new(),
            skip: BTreeSet::new(),
            if_gate: None,
            unless_gate: None,
            meta: BTreeMap::new(),
            versions_name: "versions".to_owned(),
            version_name: "version".to_owned(),
            coders: BTreeMap::new(),
            inheritance_column: "type".to_owned(),
        }
    }

    /// Track only these events.
    pub fn on(mut self, events: impl IntoIterator<Item = Event>) -> Self {
        self.on = events.into_iter().collect();
        self
    }

    /// Record into a named version class instead of the default one.
    pub fn class_name(mut self, name: impl Into<String>) -> Self {
        self.class_name = name.into();
        self
    }

    /// Changes to only these attributes do not create a version.
    pub fn ignore<I, T>(mut self, attributes: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<String>,
    {
        self.ignore.extend(attributes.into_iter().map(Into::into));
        self
    }

    /// A version is created only when one of these attributes changes.
    pub fn only<I, T>(mut self, attributes: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<String>,
    {
        self.only.extend(attributes.into_iter().map(Into::into));
        self
    }

    /// Like `ignore`, and also left out of every stored snapshot.
    pub fn skip<I, T>(mut self, attributes: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<String>,
    {
        self.skip.extend(attributes.into_iter().map(Into::into));
        self
    }

    /// Record only when `gate` returns true.
    pub fn when(
        mut self,
        gate: impl Fn(&Record) -> Result<bool, BoxError> + Send + Sync + 'static,
    ) -> Self {
        self.if_gate = Some(Arc::new(gate));
        self
    }

    /// Skip recording when `gate` returns true.
    pub fn unless(
        mut self,
        gate: impl Fn(&Record) -> Result<bool, BoxError> + Send + Sync + 'static,
    ) -> Self {
        self.unless_gate = Some(Arc::new(gate));
        self
    }

    pub fn meta(mut self, key: impl Into<String>, rule: MetaRule) -> Self {
        self.meta.insert(key.into(), rule);
        self
    }

    /// Label of the version collection of this type.
    pub fn versions(mut self, name: impl Into<String>) -> Self {
        self.versions_name = name.into();
        self
    }

    /// Label of the reference from a reified record to its version.
    pub fn version(mut self, name: impl Into<String>) -> Self {
        self.version_name = name.into();
        self
    }

    /// Encode `attribute` with the registered coder `coder`.
    pub fn coder(mut self, attribute: impl Into<String>, coder: impl Into<String>) -> Self {
        self.coders.insert(attribute.into(), coder.into());
        self
    }

    /// Attribute that holds the subtype tag of single-table subtypes.
    pub fn inheritance_column(mut self, column: impl Into<String>) -> Self {
        self.inheritance_column = column.into();
        self
    }

    pub fn tracks(&self, event: Event) -> bool {
        self.on.contains(&event)
    }

    pub fn versions_name(&self) -> &str {
        &self.versions_name
    }

    pub fn version_name(&self) -> &str {
        &self.version_name
    }

    pub fn class(&self) -> &str {
        &self.class_name
    }
}

impl Default for TrackingOptions {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for TrackingOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TrackingOptions")
            .field("on", &self.on)
            .field("class_name", &self.class_name)
            .field("ignore", &self.ignore)
            .field("only", &self.only)
            .field("skip", &self.skip)
            .field("if", &self.if_gate.is_some())
            .field("unless", &self.unless_gate.is_some())
            .field("meta", &self.meta)
            .field("versions", &self.versions_name)
            .field("version", &self.version_name)
            .field("coders", &self.coders)
            .field("inheritance_column", &self.inheritance_column)
            .finish()
    }
}
