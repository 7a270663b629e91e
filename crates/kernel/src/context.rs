use retrace_common::Value;
use std::collections::BTreeMap;

/// Per unit of work state supplied by the caller of a mutation: who is acting,
/// extra request metadata, and whether tracking is on for this unit of work.
///
/// Passed explicitly to every recording operation, so concurrent units of work
/// never observe each other's actor or enabled flag.
#[derive(Debug, Clone, PartialEq)]
pub struct Context {
    whodunnit: Option<String>,
    payload: BTreeMap<String, Value>,
    enabled: bool,
}

impl Context {
    pub fn new() -> Self {
        Self {
            whodunnit: None,
            payload: BTreeMap::new(),
            enabled: true,
        }
    }

    pub fn with_whodunnit(mut self, whodunnit: impl Into<String>) -> Self {
        self.whodunnit = Some(whodunnit.into());
        self
    }

    /// Add an entry to the metadata payload merged into every version.
    pub fn with_info(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.payload.insert(key.into(), value.into());
        self
    }

    /// A context for which tracking is switched off.
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Self::new()
        }
    }

    pub fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
    }

    pub fn whodunnit(&self) -> Option<&str> {
        self.whodunnit.as_deref()
    }

    pub fn payload(&self) -> &BTreeMap<String, Value> {
        &self.payload
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }
}

impl Default for Context {
    fn default() -> Self {
        Self::new()
    }
}
