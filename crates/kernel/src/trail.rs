use crate::config::{TrackingOptions, TrailConfig, DEFAULT_VERSION_CLASS};
use crate::error::{ConfigError, TrailError};
use crate::meta::is_reserved;
use crate::switch::{SwitchGuard, TypeSwitch};
use crate::Record;
use chrono::{DateTime, Utc};
use retrace_codec::{AttributeCoders, Coder, CoderRegistry, SnapshotCodec};
use retrace_common::{Clock, ItemKey, SystemClock};
use retrace_persist::{Version, VersionQuery, VersionStore};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Everything the trail knows about one tracked base type.
#[derive(Debug)]
pub(crate) struct TypeHandler {
    pub(crate) name: String,
    pub(crate) options: TrackingOptions,
    pub(crate) codec: SnapshotCodec,
    pub(crate) switch: TypeSwitch,
}

/// The versioning engine: tracked types, their options and switches, and the
/// version stores ("version classes") they record into.
///
/// One trail serves one unit of work at a time. Its switches are owned by the
/// trail, not shared process-wide.
pub struct Trail<S: VersionStore> {
    config: TrailConfig,
    clock: Arc<dyn Clock>,
    coders: CoderRegistry,
    classes: BTreeMap<String, S>,
    types: BTreeMap<String, TypeHandler>,
    /// Subtype name to base type name.
    subtypes: BTreeMap<String, String>,
}

impl<S: VersionStore> Trail<S> {
    /// A trail recording into `store` as the default version class.
    pub fn new(config: TrailConfig, store: S) -> Self {
        let mut classes = BTreeMap::new();
        classes.insert(DEFAULT_VERSION_CLASS.to_owned(), store);
        Self {
            config,
            clock: Arc::new(SystemClock),
            coders: CoderRegistry::new(),
            classes,
            types: BTreeMap::new(),
            subtypes: BTreeMap::new(),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn config(&self) -> &TrailConfig {
        &self.config
    }

    pub(crate) fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    /// Register another version store under `name`.
    pub fn add_version_class(&mut self, name: impl Into<String>, store: S) -> Result<(), ConfigError> {
        let name = name.into();
        if self.classes.contains_key(&name) {
            return Err(ConfigError::DuplicateVersionClass(name));
        }
        self.classes.insert(name, store);
        Ok(())
    }

    pub fn register_coder(&mut self, coder: Coder) -> Result<(), ConfigError> {
        self.coders.register(coder).map_err(ConfigError::Registry)
    }

    /// Start tracking `type_name`. Every option is validated here, so a bad
    /// configuration never surfaces at mutation time.
    pub fn track(
        &mut self,
        type_name: impl Into<String>,
        options: TrackingOptions,
    ) -> Result<(), ConfigError> {
        let name = type_name.into();
        if self.types.contains_key(&name) || self.subtypes.contains_key(&name) {
            return Err(ConfigError::DuplicateType(name));
        }
        if !self.classes.contains_key(&options.class_name) {
            return Err(ConfigError::UnknownVersionClass(options.class_name.clone()));
        }
        if let Some(key) = options
            .meta
            .keys()
            .find(|key| is_reserved(key, &self.config.timestamp_field))
        {
            return Err(ConfigError::ReservedMetaKey {
                type_name: name,
                key: key.clone(),
            });
        }
        let mut coders = AttributeCoders::new();
        for (attribute, coder_name) in &options.coders {
            let coder = self
                .coders
                .resolve(coder_name)
                .map_err(|source| ConfigError::Coder {
                    type_name: name.clone(),
                    attribute: attribute.clone(),
                    source,
                })?;
            coders.insert(attribute.clone(), coder);
        }

        tracing::debug!(type_name = %name, ?options, "tracking type");
        let handler = TypeHandler {
            name: name.clone(),
            codec: SnapshotCodec::new(self.config.serializer, coders),
            options,
            switch: TypeSwitch::new(),
        };
        self.types.insert(name, handler);
        Ok(())
    }

    /// Declare `subtype` as a single-table subtype of the tracked `base`.
    /// The subtype shares the base type's options, switch and history.
    pub fn track_subtype(
        &mut self,
        subtype: impl Into<String>,
        base: &str,
    ) -> Result<(), ConfigError> {
        let subtype = subtype.into();
        if self.types.contains_key(&subtype) || self.subtypes.contains_key(&subtype) {
            return Err(ConfigError::DuplicateType(subtype));
        }
        let base = self.base_type(base).to_owned();
        if !self.types.contains_key(&base) {
            return Err(ConfigError::UnknownBaseType(base));
        }
        self.subtypes.insert(subtype, base);
        Ok(())
    }

    pub fn is_tracked(&self, type_name: &str) -> bool {
        self.handler(type_name).is_some()
    }

    /// The base type whose history `type_name` records into. Untracked and
    /// base types map to themselves.
    pub fn base_type<'a>(&'a self, type_name: &'a str) -> &'a str {
        self.subtypes
            .get(type_name)
            .map_or(type_name, String::as_str)
    }

    /// Whether `subtype` is `base` or one of its declared subtypes.
    pub(crate) fn is_variant_of(&self, subtype: &str, base: &str) -> bool {
        subtype == base || self.subtypes.get(subtype).is_some_and(|b| b == base)
    }

    pub(crate) fn handler(&self, type_name: &str) -> Option<&TypeHandler> {
        self.types.get(self.base_type(type_name))
    }

    pub(crate) fn require_handler(&self, type_name: &str) -> Result<&TypeHandler, TrailError> {
        self.handler(type_name)
            .ok_or_else(|| TrailError::NotTracked(type_name.to_owned()))
    }

    pub fn options(&self, type_name: &str) -> Result<&TrackingOptions, TrailError> {
        Ok(&self.require_handler(type_name)?.options)
    }

    /// A version class store by name.
    pub fn store(&self, class_name: &str) -> Option<&S> {
        self.classes.get(class_name)
    }

    /// The store `type_name` records into.
    pub fn store_for(&self, type_name: &str) -> Result<&S, TrailError> {
        let class = &self.require_handler(type_name)?.options.class_name;
        self.classes
            .get(class)
            .ok_or_else(|| ConfigError::UnknownVersionClass(class.clone()).into())
    }

    pub(crate) fn store_for_mut(&mut self, type_name: &str) -> Result<&mut S, TrailError> {
        let class = self.require_handler(type_name)?.options.class_name.clone();
        self.classes
            .get_mut(&class)
            .ok_or_else(|| ConfigError::UnknownVersionClass(class).into())
    }

    /// The history key of `record`: base type plus id.
    pub fn item_key(&self, record: &Record) -> Result<ItemKey, TrailError> {
        let id = record
            .id()
            .ok_or_else(|| TrailError::MissingId(record.type_name().to_owned()))?;
        Ok(ItemKey::new(self.base_type(record.type_name()), id.clone()))
    }

    /// Every version of `record`, oldest first.
    pub fn versions_of(&self, record: &Record) -> Result<Vec<Version>, TrailError> {
        self.versions_for(&self.item_key(record)?)
    }

    /// Every version stored under `key`, oldest first. Subtype names resolve
    /// to their base type.
    pub fn versions_for(&self, key: &ItemKey) -> Result<Vec<Version>, TrailError> {
        let key = ItemKey::new(self.base_type(&key.item_type), key.item_id.clone());
        Ok(self.store_for(&key.item_type)?.history(&key)?)
    }

    /// Run a query against the store `type_name` records into.
    pub fn query(&self, type_name: &str, query: &VersionQuery) -> Result<Vec<Version>, TrailError> {
        Ok(self.store_for(type_name)?.query(query)?)
    }

    /// Versions of `record` stamped between `start` and `end`, with the
    /// configured endpoint semantics.
    pub fn versions_between(
        &self,
        record: &Record,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<Version>, TrailError> {
        let key = self.item_key(record)?;
        let query = VersionQuery::for_item(key).between(start, end, self.config.between);
        self.query(record.type_name(), &query)
    }

    /// Flip the trail-wide switch.
    pub fn set_enabled(&mut self, enabled: bool) {
        self.config.enabled = enabled;
    }

    pub fn is_enabled(&self) -> bool {
        self.config.enabled
    }

    /// Flip the switch of one tracked type (and all its subtypes).
    pub fn set_enabled_for(&self, type_name: &str, enabled: bool) -> Result<(), TrailError> {
        self.require_handler(type_name)?.switch.set(enabled);
        Ok(())
    }

    pub fn is_enabled_for(&self, type_name: &str) -> Result<bool, TrailError> {
        Ok(self.require_handler(type_name)?.switch.get())
    }

    pub(crate) fn switch_for(&self, type_name: &str) -> Result<TypeSwitch, TrailError> {
        Ok(self.require_handler(type_name)?.switch.clone())
    }

    /// Run `f` with tracking of `type_name` switched off, then restore the
    /// switch to its prior value however `f` exits.
    pub fn without_tracking<R>(
        &mut self,
        type_name: &str,
        f: impl FnOnce(&mut Self) -> R,
    ) -> Result<R, TrailError> {
        let switch = self.switch_for(type_name)?;
        let _guard = SwitchGuard::disable(&switch);
        Ok(f(self))
    }
}
