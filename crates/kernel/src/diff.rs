//! Attribute filters deciding which changes are worth a version.

use retrace_common::{Attributes, Changes};
use std::collections::BTreeSet;

/// The changed attributes that survive the filters: `changed - ignore - skip`,
/// then intersected with `only` when `only` is non-empty.
pub fn notably_changed(
    changed: &BTreeSet<String>,
    only: &BTreeSet<String>,
    ignore: &BTreeSet<String>,
    skip: &BTreeSet<String>,
) -> BTreeSet<String> {
    changed
        .iter()
        .filter(|name| !ignore.contains(*name) && !skip.contains(*name))
        .filter(|name| only.is_empty() || only.contains(*name))
        .cloned()
        .collect()
}

/// Restrict a change map to the notably changed attributes.
pub fn changes_for_trail(changes: &Changes, notable: &BTreeSet<String>) -> Changes {
    changes
        .iter()
        .filter(|(name, _)| notable.contains(*name))
        .map(|(name, pair)| (name.clone(), pair.clone()))
        .collect()
}

/// Drop skipped attributes from a snapshot.
pub fn without_skipped(mut attributes: Attributes, skip: &BTreeSet<String>) -> Attributes {
    attributes.retain(|name, _| !skip.contains(name));
    attributes
}
