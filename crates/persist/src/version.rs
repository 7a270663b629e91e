use crate::StoreError;
use chrono::{DateTime, Utc};
use retrace_common::{Event, ItemId, ItemKey, Value};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Column names every version row carries, besides the timestamp column whose
/// name is configurable.
pub const RESERVED_COLUMNS: [&str; 7] = [
    "id",
    "item_type",
    "item_id",
    "event",
    "object",
    "object_changes",
    "whodunnit",
];

/// Default name of the timestamp column.
pub const DEFAULT_TIMESTAMP_FIELD: &str = "created_at";

/// Monotonically increasing sequence id assigned by the store on append.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VersionId(pub u64);

impl fmt::Display for VersionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Canonical history order: timestamp first, sequence id as tie-break.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct OrderKey {
    pub timestamp: DateTime<Utc>,
    pub id: VersionId,
}

/// A version payload that has not been appended yet.
#[derive(Debug, Clone, PartialEq)]
pub struct NewVersion {
    pub item_type: String,
    pub item_id: ItemId,
    pub event: Event,
    pub object: Option<String>,
    pub object_changes: Option<String>,
    pub whodunnit: Option<String>,
    pub timestamp: DateTime<Utc>,
    pub meta: BTreeMap<String, Value>,
}

impl NewVersion {
    pub fn item_key(&self) -> ItemKey {
        ItemKey::new(self.item_type.clone(), self.item_id.clone())
    }
}

/// One immutable recorded event for a tracked record.
#[derive(Debug, Clone, PartialEq)]
pub struct Version {
    pub id: VersionId,
    pub item_type: String,
    pub item_id: ItemId,
    pub event: Event,
    /// Encoded attributes as they were immediately before `event`.
    pub object: Option<String>,
    /// Encoded `{attribute: [old, new]}` map.
    pub object_changes: Option<String>,
    pub whodunnit: Option<String>,
    pub timestamp: DateTime<Utc>,
    pub meta: BTreeMap<String, Value>,
}

impl Version {
    pub fn from_new(id: VersionId, draft: NewVersion) -> Self {
        Self {
            id,
            item_type: draft.item_type,
            item_id: draft.item_id,
            event: draft.event,
            object: draft.object,
            object_changes: draft.object_changes,
            whodunnit: draft.whodunnit,
            timestamp: draft.timestamp,
            meta: draft.meta,
        }
    }

    pub fn item_key(&self) -> ItemKey {
        ItemKey::new(self.item_type.clone(), self.item_id.clone())
    }

    pub fn order_key(&self) -> OrderKey {
        OrderKey {
            timestamp: self.timestamp,
            id: self.id,
        }
    }

    /// Flatten into a column map. Meta entries become extra columns.
    pub fn to_row(&self, timestamp_field: &str) -> Result<BTreeMap<String, Value>, StoreError> {
        let id = i64::try_from(self.id.0).map_err(|_| StoreError::MalformedRow {
            column: "id".into(),
            reason: format!("version id {} does not fit an integer column", self.id),
        })?;
        let mut row = self.meta.clone();
        row.insert("id".into(), Value::Integer(id));
        row.insert("item_type".into(), Value::Text(self.item_type.clone()));
        row.insert("item_id".into(), Value::Text(self.item_id.0.clone()));
        row.insert("event".into(), Value::Text(self.event.as_str().into()));
        row.insert("object".into(), self.object.clone().into());
        row.insert("object_changes".into(), self.object_changes.clone().into());
        row.insert("whodunnit".into(), self.whodunnit.clone().into());
        row.insert(timestamp_field.into(), Value::Timestamp(self.timestamp));
        Ok(row)
    }

    /// Rebuild a version from a column map written by [`Version::to_row`].
    pub fn from_row(
        mut row: BTreeMap<String, Value>,
        timestamp_field: &str,
    ) -> Result<Self, StoreError> {
        let id = match row.remove("id") {
            Some(Value::Integer(id)) if id >= 0 => VersionId(id as u64),
            other => return Err(malformed("id", other)),
        };
        let item_type = required_text(&mut row, "item_type")?;
        let item_id = ItemId(required_text(&mut row, "item_id")?);
        let event = required_text(&mut row, "event")?
            .parse::<Event>()
            .map_err(|e| StoreError::MalformedRow {
                column: "event".into(),
                reason: e.to_string(),
            })?;
        let object = optional_text(&mut row, "object")?;
        let object_changes = optional_text(&mut row, "object_changes")?;
        let whodunnit = optional_text(&mut row, "whodunnit")?;
        let timestamp = match row.remove(timestamp_field) {
            Some(Value::Timestamp(t)) => t,
            other => return Err(malformed(timestamp_field, other)),
        };
        Ok(Self {
            id,
            item_type,
            item_id,
            event,
            object,
            object_changes,
            whodunnit,
            timestamp,
            meta: row,
        })
    }
}

fn malformed(column: &str, found: Option<Value>) -> StoreError {
    StoreError::MalformedRow {
        column: column.to_owned(),
        reason: match found {
            Some(value) => format!("unexpected value {value}"),
            None => "missing".to_owned(),
        },
    }
}

fn required_text(row: &mut BTreeMap<String, Value>, column: &str) -> Result<String, StoreError> {
    match row.remove(column) {
        Some(Value::Text(s)) => Ok(s),
        other => Err(malformed(column, other)),
    }
}

fn optional_text(
    row: &mut BTreeMap<String, Value>,
    column: &str,
) -> Result<Option<String>, StoreError> {
    match row.remove(column) {
        Some(Value::Text(s)) => Ok(Some(s)),
        Some(Value::Null) | None => Ok(None),
        other => Err(malformed(column, other)),
    }
}
