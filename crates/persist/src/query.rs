use crate::version::{OrderKey, Version};
use chrono::{DateTime, Utc};
use retrace_common::{Event, ItemKey};
use serde::{Deserialize, Serialize};

/// Whether `between` includes versions stamped exactly at its endpoints.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Bounds {
    #[default]
    Exclusive,
    Inclusive,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeRange {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub bounds: Bounds,
}

impl TimeRange {
    pub fn contains(&self, t: DateTime<Utc>) -> bool {
        match self.bounds {
            Bounds::Exclusive => self.start < t && t < self.end,
            Bounds::Inclusive => self.start <= t && t <= self.end,
        }
    }
}

/// Filter over a version store. All set criteria must hold.
///
/// Stores return matches in canonical `(timestamp, id)` order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct VersionQuery {
    pub item: Option<ItemKey>,
    pub event: Option<Event>,
    /// Timestamp strictly after this instant.
    pub following: Option<DateTime<Utc>>,
    pub range: Option<TimeRange>,
    pub after_key: Option<OrderKey>,
    pub before_key: Option<OrderKey>,
}

impl VersionQuery {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn for_item(key: ItemKey) -> Self {
        Self {
            item: Some(key),
            ..Self::default()
        }
    }

    pub fn creates() -> Self {
        Self::all().event(Event::Create)
    }

    pub fn updates() -> Self {
        Self::all().event(Event::Update)
    }

    pub fn destroys() -> Self {
        Self::all().event(Event::Destroy)
    }

    pub fn event(mut self, event: Event) -> Self {
        self.event = Some(event);
        self
    }

    pub fn following(mut self, timestamp: DateTime<Utc>) -> Self {
        self.following = Some(timestamp);
        self
    }

    pub fn between(mut self, start: DateTime<Utc>, end: DateTime<Utc>, bounds: Bounds) -> Self {
        self.range = Some(TimeRange { start, end, bounds });
        self
    }

    pub fn after_key(mut self, key: OrderKey) -> Self {
        self.after_key = Some(key);
        self
    }

    pub fn before_key(mut self, key: OrderKey) -> Self {
        self.before_key = Some(key);
        self
    }

    pub fn matches(&self, version: &Version) -> bool {
        if let Some(item) = &self.item {
            if version.item_type != item.item_type || version.item_id != item.item_id {
                return false;
            }
        }
        if self.event.is_some_and(|event| event != version.event) {
            return false;
        }
        if self.following.is_some_and(|t| version.timestamp <= t) {
            return false;
        }
        if self.range.is_some_and(|range| !range.contains(version.timestamp)) {
            return false;
        }
        let key = version.order_key();
        if self.after_key.is_some_and(|after| key <= after) {
            return false;
        }
        if self.before_key.is_some_and(|before| key >= before) {
            return false;
        }
        true
    }
}
