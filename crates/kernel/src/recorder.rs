use crate::config::BoxError;
use crate::diff::{changes_for_trail, notably_changed, without_skipped};
use crate::error::TrailError;
use crate::meta::merge_metadata;
use crate::trail::{Trail, TypeHandler};
use crate::{Context, ID_ATTRIBUTE, Record};
use retrace_common::{Attributes, Event, ItemId, ItemKey, Value};
use retrace_persist::{NewVersion, Version, VersionStore};

/// An update version captured before its triggering save and not yet
/// written. Commit it with [`Trail::commit`] together with the save.
#[derive(Debug, Clone, PartialEq)]
pub struct StagedVersion {
    draft: NewVersion,
}

impl StagedVersion {
    pub fn item_key(&self) -> ItemKey {
        self.draft.item_key()
    }

    /// The encoded before-image carried by this version.
    pub fn object(&self) -> Option<&str> {
        self.draft.object.as_deref()
    }
}

impl<S: VersionStore> Trail<S> {
    /// Record the creation of `record`. Call after the record's own insert
    /// succeeded but before its dirty state is cleared.
    pub fn record_create(
        &mut self,
        record: &Record,
        ctx: &Context,
    ) -> Result<Option<Version>, TrailError> {
        match self.draft(record, Event::Create, ctx)? {
            Some(draft) => self.append(draft).map(Some),
            None => Ok(None),
        }
    }

    /// Capture the update version of `record` before the update is written.
    /// `None` when nothing notable changed or recording is gated off.
    pub fn stage_update(
        &self,
        record: &Record,
        ctx: &Context,
    ) -> Result<Option<StagedVersion>, TrailError> {
        Ok(self
            .draft(record, Event::Update, ctx)?
            .map(|draft| StagedVersion { draft }))
    }

    /// Write a staged update version, stamped with the current time.
    pub fn commit(&mut self, staged: StagedVersion) -> Result<Version, TrailError> {
        let mut draft = staged.draft;
        draft.timestamp = self.now();
        self.append(draft)
    }

    /// Record the destruction of `record`. Never records for a record that
    /// was not persisted.
    pub fn record_destroy(
        &mut self,
        record: &Record,
        ctx: &Context,
    ) -> Result<Option<Version>, TrailError> {
        if !record.is_persisted() {
            skipped(record, Event::Destroy, "not persisted");
            return Ok(None);
        }
        match self.draft(record, Event::Destroy, ctx)? {
            Some(draft) => self.append(draft).map(Some),
            None => Ok(None),
        }
    }

    /// Write the subtype tag of `record` into its inheritance column when the
    /// column is blank. A tag naming another type is rejected.
    pub(crate) fn stamp_type_tag(&self, record: &mut Record) -> Result<(), TrailError> {
        let Some(handler) = self.handler(record.type_name()) else {
            return Ok(());
        };
        check_type_tag(handler, record)?;
        let column = &handler.options.inheritance_column;
        if record.type_name() != handler.name && !has_tag(record, column) {
            let tag = record.type_name().to_owned();
            record.set(column.clone(), tag);
        }
        Ok(())
    }

    fn append(&mut self, draft: NewVersion) -> Result<Version, TrailError> {
        let store = self.store_for_mut(&draft.item_type)?;
        let version = store.append(draft)?;
        tracing::debug!(
            item = %version.item_key(),
            event = %version.event,
            version = %version.id,
            "recorded version"
        );
        Ok(version)
    }

    /// Build the version payload for `event`, or `None` when no version is due.
    fn draft(
        &self,
        record: &Record,
        event: Event,
        ctx: &Context,
    ) -> Result<Option<NewVersion>, TrailError> {
        let Some(handler) = self.handler(record.type_name()) else {
            skipped(record, event, "type not tracked");
            return Ok(None);
        };
        check_type_tag(handler, record)?;
        if !handler.options.tracks(event) {
            skipped(record, event, "event not tracked");
            return Ok(None);
        }
        if !self.is_enabled() || !ctx.is_enabled() || !handler.switch.get() {
            skipped(record, event, "tracking disabled");
            return Ok(None);
        }
        if !passes_gates(handler, record)? {
            skipped(record, event, "gated off");
            return Ok(None);
        }

        let options = &handler.options;
        let notable = notably_changed(&record.changed(), &options.only, &options.ignore, &options.skip);
        if event == Event::Update && notable.is_empty() {
            skipped(record, event, "nothing notable changed");
            return Ok(None);
        }

        let key = self.item_key(record)?;
        let object = match event {
            Event::Create => None,
            Event::Update | Event::Destroy => Some(
                handler
                    .codec
                    .encode_object(&before_image(handler, record, &key.item_id))?,
            ),
        };
        let stores_changes = self.store_for(record.type_name())?.stores_changes();
        let object_changes = match event {
            Event::Create | Event::Update if stores_changes && !notable.is_empty() => Some(
                handler
                    .codec
                    .encode_changes(&changes_for_trail(&record.changes(), &notable))?,
            ),
            _ => None,
        };
        let meta = merge_metadata(&options.meta, record, ctx, &self.config().timestamp_field);

        Ok(Some(NewVersion {
            item_type: key.item_type,
            item_id: key.item_id,
            event,
            object,
            object_changes,
            whodunnit: ctx.whodunnit().map(str::to_owned),
            timestamp: self.now(),
            meta,
        }))
    }
}

/// The record as it looked immediately before the pending mutation: current
/// attributes with every changed one reset to its pre-change value, the real
/// id, no skipped attributes, and the subtype tag in the inheritance column.
fn before_image(handler: &TypeHandler, record: &Record, id: &ItemId) -> Attributes {
    let mut image = record.attributes().clone();
    for (name, was) in record.original_values() {
        image.insert(name.clone(), was.clone());
    }
    image.insert(ID_ATTRIBUTE.to_owned(), Value::Text(id.as_str().to_owned()));
    let mut image = without_skipped(image, &handler.options.skip);
    if record.type_name() != handler.name {
        image.insert(
            handler.options.inheritance_column.clone(),
            Value::Text(record.type_name().to_owned()),
        );
    }
    image
}

fn has_tag(record: &Record, column: &str) -> bool {
    match record.get(column) {
        None | Some(Value::Null) => false,
        Some(Value::Text(tag)) => !tag.is_empty(),
        Some(_) => true,
    }
}

/// A blank tag, or one naming the record's own type, is consistent.
fn check_type_tag(handler: &TypeHandler, record: &Record) -> Result<(), TrailError> {
    let column = &handler.options.inheritance_column;
    match record.get(column) {
        Some(Value::Text(tag)) if tag == record.type_name() => Ok(()),
        Some(tag) if has_tag(record, column) => Err(TrailError::TypeTagMismatch {
            type_name: record.type_name().to_owned(),
            column: column.clone(),
            tag: tag.as_text().map_or_else(|| tag.to_string(), str::to_owned),
        }),
        _ => Ok(()),
    }
}

fn passes_gates(handler: &TypeHandler, record: &Record) -> Result<bool, TrailError> {
    let gate_error = |gate: &'static str, source: BoxError| TrailError::Gate {
        type_name: handler.name.clone(),
        gate,
        source,
    };
    if let Some(gate) = &handler.options.if_gate {
        if !gate(record).map_err(|e| gate_error("if", e))? {
            return Ok(false);
        }
    }
    if let Some(gate) = &handler.options.unless_gate {
        if gate(record).map_err(|e| gate_error("unless", e))? {
            return Ok(false);
        }
    }
    Ok(true)
}

fn skipped(record: &Record, event: Event, reason: &'static str) {
    tracing::trace!(type_name = record.type_name(), %event, reason, "version not recorded");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{TrackingOptions, TrailConfig};
    use retrace_persist::MemoryVersionStore;

    fn loaded_widget() -> Record {
        let mut attrs = Attributes::new();
        attrs.insert("name".into(), "A".into());
        attrs.insert("color".into(), "red".into());
        attrs.insert("secret".into(), "s1".into());
        Record::loaded("Widget", ItemId::from(9u64), attrs)
    }

    fn trail(options: TrackingOptions) -> Trail<MemoryVersionStore> {
        let mut trail = Trail::new(TrailConfig::default(), MemoryVersionStore::with_changes());
        trail.track("Widget", options).unwrap();
        trail
    }

    #[test]
    fn before_image_resets_changed_attributes_and_sets_id() {
        let trail = trail(TrackingOptions::new().skip(["secret"]));
        let record = loaded_widget().with("name", "B").with("secret", "s2");
        let handler = trail.handler("Widget").unwrap();
        let image = before_image(handler, &record, &ItemId::from(9u64));
        assert_eq!(image["name"], Value::Text("A".into()));
        assert_eq!(image["color"], Value::Text("red".into()));
        assert_eq!(image[ID_ATTRIBUTE], Value::Text("9".into()));
        assert!(!image.contains_key("secret"));
        // The live record still exposes its post-change value.
        assert_eq!(record.get("name"), Some(&Value::Text("B".into())));
    }

    #[test]
    fn staged_update_carries_before_image_and_is_written_on_commit() {
        let mut trail = trail(TrackingOptions::new());
        let record = loaded_widget().with("name", "B");
        let staged = trail
            .stage_update(&record, &Context::new().with_whodunnit("bob"))
            .unwrap()
            .unwrap();
        assert_eq!(trail.store_for("Widget").unwrap().len(), 0);

        let version = trail.commit(staged).unwrap();
        assert_eq!(version.event, Event::Update);
        assert_eq!(version.whodunnit.as_deref(), Some("bob"));
        let changes = trail.changeset(&version).unwrap().unwrap();
        assert_eq!(
            changes["name"],
            (Value::Text("A".into()), Value::Text("B".into()))
        );
    }

    #[test]
    fn update_without_notable_change_is_not_staged() {
        let trail = trail(TrackingOptions::new().ignore(["color"]).skip(["secret"]));
        let record = loaded_widget().with("color", "blue").with("secret", "s2");
        assert!(trail.stage_update(&record, &Context::new()).unwrap().is_none());
        assert!(trail.stage_update(&loaded_widget(), &Context::new()).unwrap().is_none());
    }

    #[test]
    fn create_has_no_object_and_changes_only_when_stored() {
        let mut trail = trail(TrackingOptions::new());
        let record = Record::new("Widget").with_id(1u64).with("name", "A");
        let version = trail.record_create(&record, &Context::new()).unwrap().unwrap();
        assert!(version.object.is_none());
        assert!(version.object_changes.is_some());

        let mut plain = Trail::new(TrailConfig::default(), MemoryVersionStore::new());
        plain.track("Widget", TrackingOptions::new()).unwrap();
        let version = plain.record_create(&record, &Context::new()).unwrap().unwrap();
        assert!(version.object_changes.is_none());
    }

    #[test]
    fn destroy_of_unsaved_record_records_nothing() {
        let mut trail = trail(TrackingOptions::new());
        let record = Record::new("Widget").with_id(1u64);
        assert!(trail.record_destroy(&record, &Context::new()).unwrap().is_none());
    }

    #[test]
    fn untracked_type_records_nothing() {
        let mut trail = trail(TrackingOptions::new());
        let record = Record::new("Gadget").with_id(1u64).with("name", "A");
        assert!(trail.record_create(&record, &Context::new()).unwrap().is_none());
    }

    #[test]
    fn gate_error_propagates() {
        let mut trail = trail(TrackingOptions::new().when(|_| Err("broken gate".into())));
        let record = Record::new("Widget").with_id(1u64);
        let err = trail.record_create(&record, &Context::new()).unwrap_err();
        assert!(matches!(err, TrailError::Gate { gate: "if", .. }));
        assert!(trail.store_for("Widget").unwrap().is_empty());
    }

    #[test]
    fn disabled_context_or_trail_records_nothing() {
        let mut trail = trail(TrackingOptions::new());
        let record = Record::new("Widget").with_id(1u64);
        assert!(trail.record_create(&record, &Context::disabled()).unwrap().is_none());
        trail.set_enabled(false);
        assert!(trail.record_create(&record, &Context::new()).unwrap().is_none());
        trail.set_enabled(true);
        assert!(trail.record_create(&record, &Context::new()).unwrap().is_some());
    }

    fn animal_trail() -> Trail<MemoryVersionStore> {
        let mut trail = Trail::new(TrailConfig::default(), MemoryVersionStore::new());
        trail.track("Animal", TrackingOptions::new()).unwrap();
        trail.track_subtype("Dog", "Animal").unwrap();
        trail.track_subtype("Cat", "Animal").unwrap();
        trail
    }

    fn loaded(type_name: &str, attrs: &[(&str, &str)]) -> Record {
        let attrs = attrs
            .iter()
            .map(|(name, value)| ((*name).to_owned(), Value::from(*value)))
            .collect();
        Record::loaded(type_name, ItemId::from(3u64), attrs)
    }

    #[test]
    fn untagged_subtype_update_reifies_as_subtype() {
        let mut trail = animal_trail();
        let dog = loaded("Dog", &[("name", "Snoopy")]).with("name", "Rex");
        let staged = trail.stage_update(&dog, &Context::new()).unwrap().unwrap();
        let version = trail.commit(staged).unwrap();
        assert_eq!(version.item_type, "Animal");

        let reified = trail.reify(&version).unwrap().unwrap();
        assert_eq!(reified.type_name(), "Dog");
        assert_eq!(reified.get("name"), Some(&Value::Text("Snoopy".into())));
    }

    #[test]
    fn base_type_image_has_no_tag() {
        let trail = animal_trail();
        let animal = loaded("Animal", &[("name", "Generic")]);
        let image = before_image(trail.handler("Animal").unwrap(), &animal, &ItemId::from(3u64));
        assert!(!image.contains_key("type"));
    }

    #[test]
    fn contradicting_tag_is_rejected() {
        let mut trail = animal_trail();
        let dog = loaded("Dog", &[("name", "Snoopy"), ("type", "Cat")]).with("name", "Rex");
        let err = trail.stage_update(&dog, &Context::new()).unwrap_err();
        assert!(matches!(err, TrailError::TypeTagMismatch { tag, .. } if tag == "Cat"));

        let animal = loaded("Animal", &[("type", "Dog")]);
        assert!(matches!(
            trail.record_destroy(&animal, &Context::new()),
            Err(TrailError::TypeTagMismatch { .. })
        ));
        assert!(trail.store_for("Animal").unwrap().is_empty());
    }

    #[test]
    fn matching_tag_is_accepted() {
        let trail = animal_trail();
        let dog = loaded("Dog", &[("name", "Snoopy"), ("type", "Dog")]).with("name", "Rex");
        assert!(trail.stage_update(&dog, &Context::new()).unwrap().is_some());
    }

    #[test]
    fn stamping_fills_a_blank_subtype_tag() {
        let trail = animal_trail();
        let mut dog = Record::new("Dog").with("name", "Snoopy");
        trail.stamp_type_tag(&mut dog).unwrap();
        assert_eq!(dog.get("type"), Some(&Value::Text("Dog".into())));

        let mut animal = Record::new("Animal");
        trail.stamp_type_tag(&mut animal).unwrap();
        assert!(animal.get("type").is_none());

        let mut cat = Record::new("Cat").with("type", "Dog");
        assert!(trail.stamp_type_tag(&mut cat).is_err());
    }
}
