use retrace_common::{Attributes, Changes, ItemId, Value};
use retrace_persist::VersionId;
use std::collections::BTreeSet;

/// A tracked record: identity, logical type and attributes, with dirty tracking.
///
/// Every assignment since the last save remembers the attribute's pre-change
/// value. Assigning an attribute back to that value clears its dirty mark.
/// A record reified from a version carries that version's id; a live record
/// carries none.
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    type_name: String,
    id: Option<ItemId>,
    attributes: Attributes,
    /// Pre-change value of every attribute assigned since the last save.
    original: Attributes,
    persisted: bool,
    source_version: Option<VersionId>,
}

impl Record {
    /// A new, unsaved record of the given logical type.
    pub fn new(type_name: impl Into<String>) -> Self {
        Self {
            type_name: type_name.into(),
            id: None,
            attributes: Attributes::new(),
            original: Attributes::new(),
            persisted: false,
            source_version: None,
        }
    }

    /// Builder form of [`Record::set`].
    pub fn with(mut self, attribute: impl Into<String>, value: impl Into<Value>) -> Self {
        self.set(attribute, value);
        self
    }

    /// Pre-assign the identity used when the record is first saved.
    pub fn with_id(mut self, id: impl Into<ItemId>) -> Self {
        self.id = Some(id.into());
        self
    }

    /// A clean, persisted record as loaded from storage.
    pub fn loaded(type_name: impl Into<String>, id: ItemId, attributes: Attributes) -> Self {
        Self {
            type_name: type_name.into(),
            id: Some(id),
            attributes,
            original: Attributes::new(),
            persisted: true,
            source_version: None,
        }
    }

    /// A detached record rebuilt from a version snapshot.
    ///
    /// Attributes are assigned onto a fresh record, so saving it again writes
    /// them all.
    pub(crate) fn reified(
        type_name: impl Into<String>,
        id: ItemId,
        attributes: Attributes,
        source: VersionId,
    ) -> Self {
        let mut record = Self::new(type_name).with_id(id);
        for (name, value) in attributes {
            record.set(name, value);
        }
        record.source_version = Some(source);
        record
    }

    pub fn type_name(&self) -> &str {
        &self.type_name
    }

    pub fn id(&self) -> Option<&ItemId> {
        self.id.as_ref()
    }

    pub fn get(&self, attribute: &str) -> Option<&Value> {
        self.attributes.get(attribute)
    }

    pub fn attributes(&self) -> &Attributes {
        &self.attributes
    }

    /// Assign an attribute, remembering its pre-change value.
    pub fn set(&mut self, attribute: impl Into<String>, value: impl Into<Value>) {
        let attribute = attribute.into();
        let value = value.into();
        let current = self.attributes.get(&attribute).cloned().unwrap_or_default();
        match self.original.get(&attribute) {
            Some(was) if *was == value => {
                self.original.remove(&attribute);
            }
            Some(_) => {}
            None if current != value => {
                self.original.insert(attribute.clone(), current);
            }
            None => {}
        }
        self.attributes.insert(attribute, value);
    }

    /// Whether any attribute changed since the last save.
    pub fn is_changed(&self) -> bool {
        !self.original.is_empty()
    }

    /// Names of the attributes changed since the last save.
    pub fn changed(&self) -> BTreeSet<String> {
        self.original.keys().cloned().collect()
    }

    pub fn attribute_changed(&self, attribute: &str) -> bool {
        self.original.contains_key(attribute)
    }

    /// The pre-change value of `attribute` if it is changing, otherwise its
    /// current value.
    pub fn attribute_was(&self, attribute: &str) -> Option<&Value> {
        self.original
            .get(attribute)
            .or_else(|| self.attributes.get(attribute))
    }

    /// Pre-change values of the changed attributes.
    pub fn original_values(&self) -> &Attributes {
        &self.original
    }

    /// `{attribute: (old, new)}` for every changed attribute.
    pub fn changes(&self) -> Changes {
        self.original
            .iter()
            .map(|(name, was)| {
                let now = self.attributes.get(name).cloned().unwrap_or_default();
                (name.clone(), (was.clone(), now))
            })
            .collect()
    }

    pub fn is_persisted(&self) -> bool {
        self.persisted
    }

    /// A record not reified from any version represents current state.
    pub fn is_live(&self) -> bool {
        self.source_version.is_none()
    }

    /// The version this record was reified from.
    pub fn source_version(&self) -> Option<VersionId> {
        self.source_version
    }

    pub(crate) fn assign_id(&mut self, id: ItemId) {
        self.id = Some(id);
    }

    /// Forget dirty state after a successful save.
    pub(crate) fn mark_saved(&mut self) {
        self.persisted = true;
        self.original.clear();
    }

    pub(crate) fn mark_destroyed(&mut self) {
        self.persisted = false;
    }

    /// A clean, persisted copy for storage.
    pub(crate) fn stored_copy(&self) -> Self {
        let mut copy = self.clone();
        copy.mark_saved();
        copy.source_version = None;
        copy
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_record_tracks_assigned_attributes() {
        let record = Record::new("Widget").with("name", "A").with("size", Value::Null);
        assert!(record.is_changed());
        // Assigning null over a missing attribute is not a change.
        assert_eq!(record.changed(), BTreeSet::from(["name".to_owned()]));
        assert_eq!(
            record.changes()["name"],
            (Value::Null, Value::Text("A".into()))
        );
        assert!(!record.is_persisted());
        assert!(record.is_live());
    }

    #[test]
    fn reverting_an_attribute_clears_dirty_mark() {
        let mut attrs = Attributes::new();
        attrs.insert("name".into(), "A".into());
        let mut record = Record::loaded("Widget", ItemId::from(1u64), attrs);
        assert!(!record.is_changed());

        record.set("name", "B");
        record.set("name", "C");
        assert_eq!(record.attribute_was("name"), Some(&Value::Text("A".into())));
        assert_eq!(record.get("name"), Some(&Value::Text("C".into())));

        record.set("name", "A");
        assert!(!record.is_changed());
    }

    #[test]
    fn attribute_was_falls_back_to_current() {
        let record = Record::loaded("Widget", ItemId::from(1u64), Attributes::new()).with("n", 3);
        assert_eq!(record.attribute_was("n"), Some(&Value::Null));
        let mut saved = record.clone();
        saved.mark_saved();
        assert_eq!(saved.attribute_was("n"), Some(&Value::Integer(3)));
        assert_eq!(saved.attribute_was("missing"), None);
    }

    #[test]
    fn reified_record_is_detached_and_historical() {
        let mut attrs = Attributes::new();
        attrs.insert("name".into(), "old".into());
        let record = Record::reified("Dog", ItemId::from(4u64), attrs, VersionId(7));
        assert!(!record.is_live());
        assert!(!record.is_persisted());
        assert_eq!(record.source_version(), Some(VersionId(7)));
        assert_eq!(record.id(), Some(&ItemId::from(4u64)));
    }
}
