use crate::{NewVersion, StoreError, Version, VersionId, VersionQuery, VersionStore};

/// In-memory append-only version store.
///
/// Also serves as the query index behind [`crate::FileVersionStore`].
#[derive(Debug, Clone, Default)]
pub struct MemoryVersionStore {
    /// Kept in append order, so ids are ascending.
    versions: Vec<Version>,
    stores_changes: bool,
}

impl MemoryVersionStore {
    /// A store without an `object_changes` column.
    pub fn new() -> Self {
        Self::default()
    }

    /// A store that keeps `object_changes`.
    pub fn with_changes() -> Self {
        Self {
            versions: Vec::new(),
            stores_changes: true,
        }
    }

    /// Read-only access to all versions, in append order.
    pub fn versions(&self) -> &[Version] {
        &self.versions
    }

    fn next_id(&self) -> VersionId {
        VersionId(self.versions.last().map_or(1, |v| v.id.0 + 1))
    }

    /// Index a version that already carries its id.
    pub(crate) fn insert_existing(&mut self, version: Version) {
        debug_assert!(self.versions.last().is_none_or(|last| last.id < version.id));
        self.versions.push(version);
    }

    pub(crate) fn peek_next_id(&self) -> VersionId {
        self.next_id()
    }
}

impl VersionStore for MemoryVersionStore {
    fn append(&mut self, mut draft: NewVersion) -> Result<Version, StoreError> {
        if !self.stores_changes {
            draft.object_changes = None;
        }
        let version = Version::from_new(self.next_id(), draft);
        self.versions.push(version.clone());
        Ok(version)
    }

    fn get(&self, id: VersionId) -> Result<Option<Version>, StoreError> {
        Ok(self
            .versions
            .binary_search_by_key(&id, |v| v.id)
            .ok()
            .map(|idx| self.versions[idx].clone()))
    }

    fn query(&self, query: &VersionQuery) -> Result<Vec<Version>, StoreError> {
        let mut found: Vec<Version> = self
            .versions
            .iter()
            .filter(|v| query.matches(v))
            .cloned()
            .collect();
        found.sort_by_key(Version::order_key);
        Ok(found)
    }

    fn len(&self) -> usize {
        self.versions.len()
    }

    fn stores_changes(&self) -> bool {
        self.stores_changes
    }
}
