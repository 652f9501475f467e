//! Low-level storage engine trait.
//!
//! Defines [`StorageEngine`], the innermost storage layer underneath a
//! [`DomainStore`](super::DomainStore). Implementations provide in-memory
//! id-keyed record storage; validation, locking and id allocation live one
//! layer up.

use petstore_core::Record;

/// Low-level id-keyed record storage.
///
/// All operations are synchronous and individually atomic. Wrapped in
/// `Box<dyn StorageEngine>` by the owning store.
pub trait StorageEngine: Send + Sync + 'static {
    /// Insert or replace a record by its id. Returns the previous record if any.
    fn put(&self, record: Record) -> Option<Record>;

    /// Insert a record only if its id is vacant. Returns `false` if occupied.
    fn insert_new(&self, record: Record) -> bool;

    /// Retrieve a record by id, or `None` if not present.
    fn get(&self, id: u64) -> Option<Record>;

    /// Remove a record by id, returning the removed record.
    fn remove(&self, id: u64) -> Option<Record>;

    /// Check if an id exists without cloning the record.
    fn contains(&self, id: u64) -> bool;

    /// Return the number of records.
    fn len(&self) -> usize;

    /// Check if the storage is empty.
    fn is_empty(&self) -> bool;

    /// Clear all records. Takes `&self` for `Box<dyn StorageEngine>` sharing.
    fn clear(&self);

    /// Return a point-in-time snapshot of all records, ordered by id.
    ///
    /// The snapshot is mutation-tolerant (concurrent writes do not fail it).
    fn snapshot(&self) -> Vec<Record>;
}
