//! Shared types for retrace: item identity, attribute values, lifecycle events
//! and the clock every recorded version is stamped with.

mod clock;
mod types;

pub use clock::{Clock, ManualClock, SystemClock};
pub use types::{Attributes, Changes, Event, ItemId, ItemKey, UnknownEvent, Value};
