use crate::{Coder, CodecError, Serializer};
use retrace_common::{Attributes, Changes, Value};
use std::collections::BTreeMap;

/// Per-attribute coders declared by one tracked type.
#[derive(Debug, Clone, Default)]
pub struct AttributeCoders {
    by_attribute: BTreeMap<String, Coder>,
}

impl AttributeCoders {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, attribute: impl Into<String>, coder: Coder) {
        self.by_attribute.insert(attribute.into(), coder);
    }

    pub fn get(&self, attribute: &str) -> Option<&Coder> {
        self.by_attribute.get(attribute)
    }

    pub fn is_empty(&self) -> bool {
        self.by_attribute.is_empty()
    }
}

/// Encodes and decodes the `object` and `object_changes` payloads of a version.
#[derive(Debug, Clone)]
pub struct SnapshotCodec {
    serializer: Serializer,
    coders: AttributeCoders,
    fallback: Coder,
}

impl SnapshotCodec {
    pub fn new(serializer: Serializer, coders: AttributeCoders) -> Self {
        Self {
            serializer,
            coders,
            fallback: Coder::yaml(),
        }
    }

    pub fn serializer(&self) -> Serializer {
        self.serializer
    }

    /// The coder that handles `attribute`, if it declared one.
    fn coder_for(&self, attribute: &str) -> Option<&Coder> {
        self.coders.get(attribute).map(|coder| {
            if coder.can_dump() {
                coder
            } else {
                &self.fallback
            }
        })
    }

    fn dump_attribute(&self, attribute: &str, value: &Value) -> Result<Value, CodecError> {
        match self.coder_for(attribute) {
            Some(coder) => coder
                .dump(value)
                .map(Value::Text)
                .map_err(|e| CodecError::for_attribute(attribute, e)),
            None => Ok(value.clone()),
        }
    }

    fn load_attribute(&self, attribute: &str, stored: Value) -> Result<Value, CodecError> {
        let Some(coder) = self.coder_for(attribute) else {
            return Ok(stored);
        };
        let Value::Text(encoded) = stored else {
            return Err(CodecError::NotText(attribute.to_owned()));
        };
        coder
            .load(&encoded)
            .map_err(|e| CodecError::for_attribute(attribute, e))
    }

    /// Encode a full attribute snapshot.
    pub fn encode_object(&self, attributes: &Attributes) -> Result<String, CodecError> {
        let mut stored = Attributes::new();
        for (name, value) in attributes {
            stored.insert(name.clone(), self.dump_attribute(name, value)?);
        }
        self.serializer.dump(&stored)
    }

    pub fn decode_object(&self, encoded: &str) -> Result<Attributes, CodecError> {
        let stored: Attributes = self.serializer.load(encoded)?;
        stored
            .into_iter()
            .map(|(name, value)| {
                let value = self.load_attribute(&name, value)?;
                Ok((name, value))
            })
            .collect()
    }

    /// Encode a diff map. Both sides of each pair go through the attribute's coder.
    pub fn encode_changes(&self, changes: &Changes) -> Result<String, CodecError> {
        let mut stored = Changes::new();
        for (name, (old, new)) in changes {
            let pair = (
                self.dump_attribute(name, old)?,
                self.dump_attribute(name, new)?,
            );
            stored.insert(name.clone(), pair);
        }
        self.serializer.dump(&stored)
    }

    pub fn decode_changes(&self, encoded: &str) -> Result<Changes, CodecError> {
        let stored: Changes = self.serializer.load(encoded)?;
        stored
            .into_iter()
            .map(|(name, (old, new))| {
                let pair = (
                    self.load_attribute(&name, old)?,
                    self.load_attribute(&name, new)?,
                );
                Ok((name, pair))
            })
            .collect()
    }
}

impl Default for SnapshotCodec {
    fn default() -> Self {
        Self::new(Serializer::default(), AttributeCoders::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn every_kind_of_value() -> Attributes {
        let mut nested = BTreeMap::new();
        nested.insert("depth".to_owned(), Value::Integer(2));
        nested.insert("tags".to_owned(), Value::List(vec!["a".into(), "b".into()]));

        let mut attrs = Attributes::new();
        attrs.insert("id".into(), Value::Text("42".into()));
        attrs.insert("missing".into(), Value::Null);
        attrs.insert("flag".into(), Value::Bool(true));
        attrs.insert("count".into(), Value::Integer(-17));
        attrs.insert("ratio".into(), Value::Float(0.25));
        attrs.insert("name".into(), Value::Text("Animal: \"quoted\"\nline".into()));
        attrs.insert(
            "born".into(),
            Value::Timestamp(Utc.with_ymd_and_hms(2020, 2, 29, 12, 0, 0).unwrap()),
        );
        attrs.insert("numeric_text".into(), Value::Text("0012".into()));
        attrs.insert("settings".into(), Value::Map(nested));
        attrs
    }

    /// Stores a list of text values as one comma-separated string.
    fn csv_coder() -> Coder {
        Coder::new(
            "csv",
            |value| match value {
                Value::List(items) => Ok(items
                    .iter()
                    .map(|item| item.as_text().unwrap_or_default().to_owned())
                    .collect::<Vec<_>>()
                    .join(",")),
                other => Err(CodecError::Coder {
                    coder: "csv".into(),
                    message: format!("expected a list, got {other}"),
                }),
            },
            |encoded| {
                Ok(Value::List(
                    encoded
                        .split(',')
                        .filter(|part| !part.is_empty())
                        .map(Value::from)
                        .collect(),
                ))
            },
        )
    }

    #[test]
    fn object_roundtrip_every_value_kind() {
        let attrs = every_kind_of_value();
        for serializer in [Serializer::Yaml, Serializer::Json] {
            let codec = SnapshotCodec::new(serializer, AttributeCoders::new());
            let encoded = codec.encode_object(&attrs).unwrap();
            assert_eq!(codec.decode_object(&encoded).unwrap(), attrs, "{serializer}");
        }
    }

    #[test]
    fn custom_coder_stores_text_and_loads_value() {
        let mut coders = AttributeCoders::new();
        coders.insert("tags", csv_coder());
        let codec = SnapshotCodec::new(Serializer::Json, coders);

        let mut attrs = Attributes::new();
        attrs.insert("tags".into(), Value::List(vec!["red".into(), "blue".into()]));
        let encoded = codec.encode_object(&attrs).unwrap();
        assert!(encoded.contains("red,blue"));

        assert_eq!(codec.decode_object(&encoded).unwrap(), attrs);
    }

    #[test]
    fn coder_without_dump_falls_back_to_yaml_both_ways() {
        let mut coders = AttributeCoders::new();
        coders.insert(
            "settings",
            Coder::load_only("broken", |_| Ok(Value::Text("never used".into()))),
        );
        let codec = SnapshotCodec::new(Serializer::Json, coders);

        let attrs = every_kind_of_value();
        let encoded = codec.encode_object(&attrs).unwrap();
        let raw: Attributes = Serializer::Json.load(&encoded).unwrap();
        let stored = raw["settings"].as_text().unwrap();
        let yaml_value: Value = serde_yaml::from_str(stored).unwrap();
        assert_eq!(yaml_value, attrs["settings"]);

        assert_eq!(codec.decode_object(&encoded).unwrap(), attrs);
    }

    #[test]
    fn changes_roundtrip_through_coders() {
        let mut coders = AttributeCoders::new();
        coders.insert("tags", csv_coder());
        let codec = SnapshotCodec::new(Serializer::Yaml, coders);

        let mut changes = Changes::new();
        changes.insert(
            "tags".into(),
            (Value::List(vec!["a".into()]), Value::List(vec!["a".into(), "b".into()])),
        );
        changes.insert("name".into(), (Value::Null, Value::Text("Snoopy".into())));

        let encoded = codec.encode_changes(&changes).unwrap();
        assert_eq!(codec.decode_changes(&encoded).unwrap(), changes);
    }

    #[test]
    fn corrupt_snapshot_is_a_decode_error() {
        let codec = SnapshotCodec::default();
        assert!(codec.decode_object("- just\n- a list\n").is_err());
        assert!(codec.decode_changes("name: !Text only-one-side\n").is_err());
    }

    #[test]
    fn coded_attribute_stored_as_non_text_is_rejected() {
        let mut coders = AttributeCoders::new();
        coders.insert("tags", csv_coder());
        let codec = SnapshotCodec::new(Serializer::Json, coders);
        let err = codec.decode_object(r#"{"tags": {"Integer": 3}}"#).unwrap_err();
        assert!(matches!(err, CodecError::NotText(name) if name == "tags"));
    }

    #[test]
    fn coder_failure_names_the_attribute() {
        let mut coders = AttributeCoders::new();
        coders.insert("tags", csv_coder());
        let codec = SnapshotCodec::new(Serializer::Json, coders);
        let mut attrs = Attributes::new();
        attrs.insert("tags".into(), Value::Integer(1));
        let err = codec.encode_object(&attrs).unwrap_err();
        assert!(matches!(err, CodecError::Attribute { attribute, .. } if attribute == "tags"));
    }
}
