use crate::store::RecordStore;
use crate::store::error::StoreError;
use crate::types::{Record, Uid};
use std::collections::BTreeMap;
use std::time::SystemTime;

/// Volatile store for tests and embedders that persist records elsewhere.
#[derive(Debug, Clone)]
pub struct MemoryStore {
    records: BTreeMap<Uid, Record>,
    modified_at: SystemTime,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            records: BTreeMap::new(),
            modified_at: SystemTime::now(),
        }
    }

    pub fn from_records(records: impl IntoIterator<Item = Record>) -> Self {
        let mut store = Self::new();
        for record in records {
            store.records.insert(record.uid().clone(), record);
        }
        store
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

impl RecordStore for MemoryStore {
    fn get(&self, uid: &Uid) -> Result<Option<Record>, StoreError> {
        Ok(self.records.get(uid).cloned())
    }

    fn put(&mut self, record: Record) -> Result<Option<Record>, StoreError> {
        self.modified_at = SystemTime::now();
        Ok(self.records.insert(record.uid().clone(), record))
    }

    fn delete(&mut self, uid: &Uid) -> Result<Option<Record>, StoreError> {
        let removed = self.records.remove(uid);
        if removed.is_some() {
            self.modified_at = SystemTime::now();
        }
        Ok(removed)
    }

    fn uids(&self) -> Result<Vec<Uid>, StoreError> {
        Ok(self.records.keys().cloned().collect())
    }

    fn records(&self) -> Result<Vec<Record>, StoreError> {
        Ok(self.records.values().cloned().collect())
    }

    fn modified_at(&self) -> Result<SystemTime, StoreError> {
        Ok(self.modified_at)
    }

    fn contains(&self, uid: &Uid) -> Result<bool, StoreError> {
        Ok(self.records.contains_key(uid))
    }
}
