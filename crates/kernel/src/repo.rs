use crate::error::TrailError;
use crate::reify::RecordSource;
use crate::switch::SwitchGuard;
use crate::trail::Trail;
use crate::{Context, Record};
use retrace_common::{ItemId, ItemKey, Value};
use retrace_persist::{Version, VersionStore};
use std::collections::BTreeMap;

/// Attribute stamped with the insert time of a record.
pub const CREATED_AT: &str = "created_at";
/// Attribute stamped with the time of every save.
pub const UPDATED_AT: &str = "updated_at";

/// In-memory table of live records keyed by base type and id.
#[derive(Debug, Default, Clone)]
pub struct RecordTable {
    rows: BTreeMap<ItemKey, Record>,
}

impl RecordTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn get(&self, key: &ItemKey) -> Option<&Record> {
        self.rows.get(key)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&ItemKey, &Record)> {
        self.rows.iter()
    }
}

impl RecordSource for RecordTable {
    fn find(&self, key: &ItemKey) -> Result<Option<Record>, TrailError> {
        Ok(self.rows.get(key).cloned())
    }
}

/// Hosts tracked records and drives the trail through their lifecycle.
///
/// Each mutation writes the row and its version together. When recording
/// fails the row change is undone and the error returned, so no update is
/// stored without its version.
pub struct Repository<S: VersionStore> {
    trail: Trail<S>,
    table: RecordTable,
}

impl<S: VersionStore> Repository<S> {
    pub fn new(trail: Trail<S>) -> Self {
        Self {
            trail,
            table: RecordTable::new(),
        }
    }

    pub fn trail(&self) -> &Trail<S> {
        &self.trail
    }

    pub fn trail_mut(&mut self) -> &mut Trail<S> {
        &mut self.trail
    }

    pub fn table(&self) -> &RecordTable {
        &self.table
    }

    pub fn into_trail(self) -> Trail<S> {
        self.trail
    }

    pub fn len(&self) -> usize {
        self.table.len()
    }

    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }

    /// The live record of `type_name` (or its base type) with `id`.
    pub fn find(&self, type_name: &str, id: &ItemId) -> Option<Record> {
        let key = ItemKey::new(self.trail.base_type(type_name), id.clone());
        self.table.get(&key).cloned()
    }

    fn key_of(&self, record: &Record) -> Result<ItemKey, TrailError> {
        self.trail.item_key(record)
    }

    /// Insert `record`, generating an id when it has none, and record the
    /// create version.
    pub fn create(&mut self, record: &mut Record, ctx: &Context) -> Result<Option<Version>, TrailError> {
        if record.id().is_none() {
            record.assign_id(ItemId::generate());
        }
        let key = self.key_of(record)?;
        if record.is_persisted() || self.table.rows.contains_key(&key) {
            return Err(TrailError::RecordExists(key));
        }
        self.trail.stamp_type_tag(record)?;
        let now = Value::Timestamp(self.trail.now());
        record.set(CREATED_AT, now.clone());
        record.set(UPDATED_AT, now);

        self.table.rows.insert(key.clone(), record.stored_copy());
        match self.trail.record_create(record, ctx) {
            Ok(version) => {
                record.mark_saved();
                Ok(version)
            }
            Err(err) => {
                self.table.rows.remove(&key);
                Err(err)
            }
        }
    }

    /// Save the pending changes of `record`. The update version is staged
    /// before `updated_at` is touched and committed with the row.
    pub fn update(&mut self, record: &mut Record, ctx: &Context) -> Result<Option<Version>, TrailError> {
        let key = self.key_of(record)?;
        if !record.is_persisted() {
            return Err(TrailError::NotPersisted(key));
        }
        let previous = self
            .table
            .get(&key)
            .cloned()
            .ok_or_else(|| TrailError::RecordNotFound(key.clone()))?;
        if !record.is_changed() {
            return Ok(None);
        }

        let staged = self.trail.stage_update(record, ctx)?;
        let touched_was = record.get(UPDATED_AT).cloned().unwrap_or_default();
        record.set(UPDATED_AT, Value::Timestamp(self.trail.now()));
        self.table.rows.insert(key.clone(), record.stored_copy());

        let version = match staged.map(|staged| self.trail.commit(staged)).transpose() {
            Ok(version) => version,
            Err(err) => {
                self.table.rows.insert(key, previous);
                record.set(UPDATED_AT, touched_was);
                return Err(err);
            }
        };
        record.mark_saved();
        Ok(version)
    }

    /// Remove `record` and record its destroy version. A record that was never
    /// saved is left alone.
    pub fn destroy(&mut self, record: &mut Record, ctx: &Context) -> Result<Option<Version>, TrailError> {
        if !record.is_persisted() {
            return self.trail.record_destroy(record, ctx);
        }
        let key = self.key_of(record)?;
        let previous = self
            .table
            .rows
            .remove(&key)
            .ok_or_else(|| TrailError::RecordNotFound(key.clone()))?;
        match self.trail.record_destroy(record, ctx) {
            Ok(version) => {
                record.mark_destroyed();
                Ok(version)
            }
            Err(err) => {
                self.table.rows.insert(key, previous);
                Err(err)
            }
        }
    }

    /// Run `f` with tracking of `type_name` switched off. The prior switch
    /// value is restored however `f` exits, unwinding included.
    pub fn without_tracking<R>(
        &mut self,
        type_name: &str,
        f: impl FnOnce(&mut Self) -> R,
    ) -> Result<R, TrailError> {
        let switch = self.trail.switch_for(type_name)?;
        let _guard = SwitchGuard::disable(&switch);
        Ok(f(self))
    }

    /// The next state of `record`, falling back to the live row.
    pub fn next_modification(&self, record: &Record) -> Result<Option<Record>, TrailError> {
        self.trail.next_modification(record, &self.table)
    }
}
