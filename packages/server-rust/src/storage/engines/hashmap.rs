//! In-memory [`StorageEngine`] implementation backed by [`DashMap`].
//!
//! Provides concurrent read/write access without external locking.

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use petstore_core::Record;

use crate::storage::engine::StorageEngine;

/// In-memory storage backed by [`DashMap`].
///
/// Readers never block each other; writers contend only within a shard.
pub struct HashMapStorage {
    entries: DashMap<u64, Record>,
}

impl HashMapStorage {
    /// Creates a new, empty `HashMapStorage`.
    #[must_use]
    pub fn new() -> Self {
        Self {
            entries: DashMap::new(),
        }
    }
}

impl Default for HashMapStorage {
    fn default() -> Self {
        Self::new()
    }
}

impl StorageEngine for HashMapStorage {
    fn put(&self, record: Record) -> Option<Record> {
        self.entries.insert(record.id, record)
    }

    fn insert_new(&self, record: Record) -> bool {
        match self.entries.entry(record.id) {
            Entry::Occupied(_) => false,
            Entry::Vacant(slot) => {
                slot.insert(record);
                true
            }
        }
    }

    fn get(&self, id: u64) -> Option<Record> {
        self.entries.get(&id).map(|r| r.clone())
    }

    fn remove(&self, id: u64) -> Option<Record> {
        self.entries.remove(&id).map(|(_, r)| r)
    }

    fn contains(&self, id: u64) -> bool {
        self.entries.contains_key(&id)
    }

    fn len(&self) -> usize {
        self.entries.len()
    }

    fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn clear(&self) {
        self.entries.clear();
    }

    fn snapshot(&self) -> Vec<Record> {
        let mut records: Vec<Record> = self
            .entries
            .iter()
            .map(|entry| entry.value().clone())
            .collect();
        records.sort_by_key(|r| r.id);
        records
    }
}
