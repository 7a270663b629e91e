use crate::config::MetaRule;
use crate::{Context, Record};
use retrace_common::Value;
use retrace_persist::RESERVED_COLUMNS;
use std::collections::BTreeMap;

/// Whether `key` names one of the fixed version columns.
pub(crate) fn is_reserved(key: &str, timestamp_field: &str) -> bool {
    key == timestamp_field || RESERVED_COLUMNS.contains(&key)
}

/// Build the meta columns of a version: type rules first, then the context
/// payload, which wins on collision.
pub(crate) fn merge_metadata(
    rules: &BTreeMap<String, MetaRule>,
    record: &Record,
    ctx: &Context,
    timestamp_field: &str,
) -> BTreeMap<String, Value> {
    let mut meta: BTreeMap<String, Value> = rules
        .iter()
        .map(|(key, rule)| (key.clone(), rule.evaluate(record, ctx)))
        .collect();
    for (key, value) in ctx.payload() {
        if is_reserved(key, timestamp_field) {
            tracing::warn!(key = %key, "context payload key collides with a version column, dropped");
            continue;
        }
        meta.insert(key.clone(), value.clone());
    }
    meta
}

#[cfg(test)]
mod tests {
    use super::*;
    use retrace_common::{Attributes, ItemId};

    fn rules() -> BTreeMap<String, MetaRule> {
        let mut rules = BTreeMap::new();
        rules.insert("answer".to_owned(), MetaRule::literal(42));
        rules.insert("title".to_owned(), MetaRule::attribute("title"));
        rules.insert(
            "shout".to_owned(),
            MetaRule::entity(|r| match r.get("title") {
                Some(Value::Text(t)) => Value::Text(t.to_uppercase()),
                _ => Value::Null,
            }),
        );
        rules.insert(
            "actor".to_owned(),
            MetaRule::context(|ctx| ctx.whodunnit().map(str::to_owned).into()),
        );
        rules
    }

    fn article() -> Record {
        let mut attrs = Attributes::new();
        attrs.insert("title".into(), "before".into());
        Record::loaded("Article", ItemId::from(1u64), attrs).with("title", "after")
    }

    #[test]
    fn rules_evaluated_against_record_and_context() {
        let ctx = Context::new().with_whodunnit("ann");
        let meta = merge_metadata(&rules(), &article(), &ctx, "created_at");
        assert_eq!(meta["answer"], Value::Integer(42));
        assert_eq!(meta["title"], Value::Text("before".into()));
        assert_eq!(meta["shout"], Value::Text("AFTER".into()));
        assert_eq!(meta["actor"], Value::Text("ann".into()));
    }

    #[test]
    fn context_payload_wins_on_collision() {
        let ctx = Context::new().with_info("answer", 7).with_info("ip", "127.0.0.1");
        let meta = merge_metadata(&rules(), &article(), &ctx, "created_at");
        assert_eq!(meta["answer"], Value::Integer(7));
        assert_eq!(meta["ip"], Value::Text("127.0.0.1".into()));
    }

    #[test]
    fn payload_cannot_overwrite_version_columns() {
        let ctx = Context::new()
            .with_info("event", "forged")
            .with_info("recorded_at", 0);
        let meta = merge_metadata(&BTreeMap::new(), &article(), &ctx, "recorded_at");
        assert!(meta.is_empty());
    }
}
