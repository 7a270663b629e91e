use crate::{CodecError, Serializer};
use retrace_common::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

/// Encodes one attribute value to its stored text form.
pub type DumpFn = Arc<dyn Fn(&Value) -> Result<String, CodecError> + Send + Sync>;
/// Decodes the stored text form of one attribute back into a value.
pub type LoadFn = Arc<dyn Fn(&str) -> Result<Value, CodecError> + Send + Sync>;

/// A named per-attribute coder.
///
/// `load` is mandatory. `dump` is optional: a coder that cannot dump is
/// treated as if no coder were declared and the default coder is used for
/// both directions.
#[derive(Clone)]
pub struct Coder {
    name: String,
    dump: Option<DumpFn>,
    load: LoadFn,
}

impl Coder {
    pub fn new<D, L>(name: impl Into<String>, dump: D, load: L) -> Self
    where
        D: Fn(&Value) -> Result<String, CodecError> + Send + Sync + 'static,
        L: Fn(&str) -> Result<Value, CodecError> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            dump: Some(Arc::new(dump)),
            load: Arc::new(load),
        }
    }

    /// A coder that only knows how to load.
    pub fn load_only<L>(name: impl Into<String>, load: L) -> Self
    where
        L: Fn(&str) -> Result<Value, CodecError> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            dump: None,
            load: Arc::new(load),
        }
    }

    /// A coder backed by one of the envelope serializers.
    pub fn structured(serializer: Serializer) -> Self {
        Self::new(
            serializer.name(),
            move |value| serializer.dump(value),
            move |encoded| serializer.load(encoded),
        )
    }

    /// The default structured-text coder.
    pub fn yaml() -> Self {
        Self::structured(Serializer::Yaml)
    }

    pub fn json() -> Self {
        Self::structured(Serializer::Json)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn can_dump(&self) -> bool {
        self.dump.is_some()
    }

    pub fn dump(&self, value: &Value) -> Result<String, CodecError> {
        match &self.dump {
            Some(dump) => dump(value),
            None => Err(CodecError::Coder {
                coder: self.name.clone(),
                message: "coder has no dump capability".into(),
            }),
        }
    }

    pub fn load(&self, encoded: &str) -> Result<Value, CodecError> {
        (self.load)(encoded)
    }
}

impl fmt::Debug for Coder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Coder")
            .field("name", &self.name)
            .field("can_dump", &self.can_dump())
            .finish()
    }
}

/// Named coders available to tracked types.
///
/// Starts with the `yaml` and `json` coders. Types refer to coders by name,
/// and an unknown name is rejected when the type is registered.
#[derive(Debug, Clone)]
pub struct CoderRegistry {
    coders: BTreeMap<String, Coder>,
}

impl CoderRegistry {
    pub fn new() -> Self {
        let mut coders = BTreeMap::new();
        for coder in [Coder::yaml(), Coder::json()] {
            coders.insert(coder.name().to_owned(), coder);
        }
        Self { coders }
    }

    pub fn register(&mut self, coder: Coder) -> Result<(), CodecError> {
        if self.coders.contains_key(coder.name()) {
            return Err(CodecError::DuplicateCoder(coder.name().to_owned()));
        }
        tracing::debug!(coder = coder.name(), dumps = coder.can_dump(), "registered coder");
        self.coders.insert(coder.name().to_owned(), coder);
        Ok(())
    }

    pub fn resolve(&self, name: &str) -> Result<Coder, CodecError> {
        self.coders
            .get(name)
            .cloned()
            .ok_or_else(|| CodecError::UnknownCoder(name.to_owned()))
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.coders.keys().map(String::as_str)
    }
}

impl Default for CoderRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registry_starts_with_structured_coders() {
        let registry = CoderRegistry::new();
        let names: Vec<&str> = registry.names().collect();
        assert_eq!(names, vec!["json", "yaml"]);
    }

    #[test]
    fn unknown_coder_is_an_error() {
        let registry = CoderRegistry::new();
        assert!(matches!(
            registry.resolve("msgpack"),
            Err(CodecError::UnknownCoder(name)) if name == "msgpack"
        ));
    }

    #[test]
    fn duplicate_registration_rejected() {
        let mut registry = CoderRegistry::new();
        assert!(matches!(
            registry.register(Coder::yaml()),
            Err(CodecError::DuplicateCoder(_))
        ));
    }

    #[test]
    fn load_only_coder_cannot_dump() {
        let coder = Coder::load_only("legacy", |s| Ok(Value::Text(s.to_owned())));
        assert!(!coder.can_dump());
        assert!(coder.dump(&Value::Null).is_err());
        assert_eq!(coder.load("x").unwrap(), Value::Text("x".into()));
    }
}
