use crate::error::TrailError;
use crate::trail::Trail;
use crate::{ID_ATTRIBUTE, Record};
use chrono::{DateTime, Utc};
use retrace_common::{Changes, ItemId, ItemKey, Value};
use retrace_persist::{Version, VersionQuery, VersionStore};

/// Where live records are looked up when history runs out.
pub trait RecordSource {
    /// The live record stored under `key`. `Ok(None)` when it does not exist;
    /// errors are reserved for storage faults.
    fn find(&self, key: &ItemKey) -> Result<Option<Record>, TrailError>;
}

impl<S: VersionStore> Trail<S> {
    /// Rebuild the record as it was immediately before `version`.
    ///
    /// A create version has nothing before it and yields `None`. Otherwise the
    /// result is a detached record of the subtype named by the snapshot's
    /// inheritance column, tagged with `version` as its source.
    pub fn reify(&self, version: &Version) -> Result<Option<Record>, TrailError> {
        let Some(object) = &version.object else {
            return Ok(None);
        };
        let handler = self.require_handler(&version.item_type)?;
        let mut attributes = handler.codec.decode_object(object)?;

        let id = match attributes.remove(ID_ATTRIBUTE) {
            Some(Value::Text(id)) => ItemId::from(id),
            _ => version.item_id.clone(),
        };
        let type_name = match attributes.get(&handler.options.inheritance_column) {
            None | Some(Value::Null) => handler.name.clone(),
            Some(Value::Text(tag)) if tag.is_empty() => handler.name.clone(),
            Some(Value::Text(tag)) if self.is_variant_of(tag, &handler.name) => tag.clone(),
            Some(tag) => {
                return Err(TrailError::UnknownSubtype {
                    version: version.id,
                    item_type: version.item_type.clone(),
                    tag: tag.as_text().map_or_else(|| tag.to_string(), str::to_owned),
                });
            }
        };
        tracing::trace!(version = %version.id, %type_name, "reified version");
        Ok(Some(Record::reified(type_name, id, attributes, version.id)))
    }

    /// The state of `record` at `timestamp`: the before-image of the first
    /// version after it, or `record` itself when no later version exists.
    pub fn modification_at(
        &self,
        record: &Record,
        timestamp: DateTime<Utc>,
    ) -> Result<Option<Record>, TrailError> {
        let query = VersionQuery::for_item(self.item_key(record)?).following(timestamp);
        match self.store_for(record.type_name())?.first(&query)? {
            Some(version) => self.reify(&version),
            None => Ok(Some(record.clone())),
        }
    }

    /// The state of `record` at every version stamped between `start` and
    /// `end`, in history order.
    pub fn modifications_between(
        &self,
        record: &Record,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<Option<Record>>, TrailError> {
        self.versions_between(record, start, end)?
            .iter()
            .map(|version| self.modification_at(record, version.timestamp))
            .collect()
    }

    /// One step back in history: the predecessor of the source version, or
    /// the last version when `record` is live.
    pub fn previous_modification(&self, record: &Record) -> Result<Option<Record>, TrailError> {
        let store = self.store_for(record.type_name())?;
        let preceding = match self.version_at(record)? {
            Some(source) => store.previous(&source)?,
            None => store.last(&VersionQuery::for_item(self.item_key(record)?))?,
        };
        match preceding {
            Some(version) => self.reify(&version),
            None => Ok(None),
        }
    }

    /// One step forward in history. Past the last version this is the live
    /// record as found in `source`; a live `record` has no next state.
    ///
    /// A record that no longer exists yields `Ok(None)`. Storage and decode
    /// faults are returned as errors.
    pub fn next_modification(
        &self,
        record: &Record,
        source: &impl RecordSource,
    ) -> Result<Option<Record>, TrailError> {
        let Some(current) = self.version_at(record)? else {
            return Ok(None);
        };
        match self.store_for(record.type_name())?.next(&current)? {
            Some(version) => self.reify(&version),
            None => source.find(&current.item_key()),
        }
    }

    /// Who made the most recent change to the identity of `record`, whichever
    /// version the record itself was reified from.
    pub fn originator(&self, record: &Record) -> Result<Option<String>, TrailError> {
        let query = VersionQuery::for_item(self.item_key(record)?);
        Ok(self
            .store_for(record.type_name())?
            .last(&query)?
            .and_then(|version| version.whodunnit))
    }

    /// The version a reified `record` was built from; `None` for a live one.
    pub fn version_at(&self, record: &Record) -> Result<Option<Version>, TrailError> {
        let Some(id) = record.source_version() else {
            return Ok(None);
        };
        self.store_for(record.type_name())?
            .get(id)?
            .map(Some)
            .ok_or(TrailError::VersionNotFound(id))
    }

    /// The decoded `object_changes` of `version`, when it carries one.
    pub fn changeset(&self, version: &Version) -> Result<Option<Changes>, TrailError> {
        let Some(encoded) = &version.object_changes else {
            return Ok(None);
        };
        let handler = self.require_handler(&version.item_type)?;
        Ok(Some(handler.codec.decode_changes(encoded)?))
    }
}
