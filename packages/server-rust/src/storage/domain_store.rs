//! Per-domain record store: the only mutation path for one entity type.
//!
//! A [`DomainStore`] wraps a [`StorageEngine`] with schema validation, id
//! allocation and a lock check. Every mutating method takes the caller's
//! [`LockSet`] and refuses to touch an id it does not cover.

use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;

use arc_swap::ArcSwapOption;
use parking_lot::Mutex;
use petstore_core::{Domain, EntitySchema, Fields, Record, ValidationMode, Value};

use crate::service::guard::LockSet;
use crate::storage::engine::StorageEngine;
use crate::storage::error::StoreError;

// ---------------------------------------------------------------------------
// Id allocation
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
struct IdAllocator {
    /// Highest id ever issued or inserted.
    high_water: u64,
    /// Ids handed out to in-flight creates that have not landed yet.
    reserved: BTreeSet<u64>,
}

impl IdAllocator {
    fn note(&mut self, id: u64) {
        self.high_water = self.high_water.max(id);
    }
}

/// An id claimed for a pending create.
///
/// While alive, no other create in the same store can claim the id. Dropping
/// the reservation without consuming it (failure, cancellation) frees it.
pub struct IdReservation {
    domain: Domain,
    id: u64,
    ids: Arc<Mutex<IdAllocator>>,
}

impl IdReservation {
    #[must_use]
    pub fn id(&self) -> u64 {
        self.id
    }

    #[must_use]
    pub fn domain(&self) -> Domain {
        self.domain
    }
}

impl Drop for IdReservation {
    fn drop(&mut self) {
        self.ids.lock().reserved.remove(&self.id);
    }
}

impl fmt::Debug for IdReservation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IdReservation")
            .field("domain", &self.domain)
            .field("id", &self.id)
            .finish()
    }
}

// ---------------------------------------------------------------------------
// DomainStore
// ---------------------------------------------------------------------------

/// Keyed record collection for exactly one [`Domain`].
pub struct DomainStore {
    domain: Domain,
    schema: &'static EntitySchema,
    engine: Box<dyn StorageEngine>,
    ids: Arc<Mutex<IdAllocator>>,
    fault: ArcSwapOption<String>,
}

impl DomainStore {
    #[must_use]
    pub fn new(domain: Domain, engine: Box<dyn StorageEngine>) -> Self {
        Self {
            domain,
            schema: EntitySchema::for_domain(domain),
            engine,
            ids: Arc::new(Mutex::new(IdAllocator::default())),
            fault: ArcSwapOption::empty(),
        }
    }

    #[must_use]
    pub fn domain(&self) -> Domain {
        self.domain
    }

    /// Claims an id for a create.
    ///
    /// With `requested = None` the next id above the highest ever issued is
    /// taken. An explicit id that is stored or already reserved fails with
    /// [`StoreError::DuplicateId`]; of two racing creates for the same id,
    /// exactly one gets the reservation.
    ///
    /// # Errors
    ///
    /// `DuplicateId` for a taken explicit id, `ValidationFailed` for id 0.
    pub fn reserve_id(&self, requested: Option<u64>) -> Result<IdReservation, StoreError> {
        let mut ids = self.ids.lock();
        let id = match requested {
            Some(0) => {
                return Err(self.invalid("id must be a positive integer".to_string()));
            }
            Some(id) => {
                if self.engine.contains(id) || ids.reserved.contains(&id) {
                    return Err(StoreError::DuplicateId {
                        domain: self.domain,
                        id,
                    });
                }
                id
            }
            None => {
                let mut next = ids.high_water.saturating_add(1);
                while self.engine.contains(next) || ids.reserved.contains(&next) {
                    next = next.saturating_add(1);
                }
                next
            }
        };
        ids.reserved.insert(id);
        ids.note(id);
        Ok(IdReservation {
            domain: self.domain,
            id,
            ids: Arc::clone(&self.ids),
        })
    }

    /// Inserts a new record under a reserved id.
    ///
    /// # Errors
    ///
    /// `LockNotHeld`, `WriteRejected`, `ValidationFailed`, or `DuplicateId`
    /// if the id was filled by a non-reserving write in the meantime.
    pub fn create(
        &self,
        locks: &LockSet,
        reservation: IdReservation,
        mut fields: Fields,
    ) -> Result<Record, StoreError> {
        let id = reservation.id();
        self.ensure_locked(locks, id)?;
        self.ensure_writable()?;
        self.schema.apply_defaults(&mut fields);
        self.validate(&fields, ValidationMode::Create)?;
        self.check_id_links(id, &fields)?;

        let record = Record::new(self.domain, id, fields);
        if !self.engine.insert_new(record.clone()) {
            return Err(StoreError::DuplicateId {
                domain: self.domain,
                id,
            });
        }
        drop(reservation);
        Ok(record)
    }

    /// Reads one record.
    ///
    /// # Errors
    ///
    /// `LockNotHeld` or `NotFound`.
    pub fn get(&self, locks: &LockSet, id: u64) -> Result<Record, StoreError> {
        self.ensure_locked(locks, id)?;
        self.engine.get(id).ok_or(StoreError::NotFound {
            domain: self.domain,
            id,
        })
    }

    /// Reads one record under its lock, `None` when absent.
    ///
    /// # Errors
    ///
    /// `LockNotHeld`.
    pub fn find(&self, locks: &LockSet, id: u64) -> Result<Option<Record>, StoreError> {
        self.ensure_locked(locks, id)?;
        Ok(self.engine.get(id))
    }

    /// Unlocked read, for planning only. The answer may be stale by the
    /// time any lock is taken.
    #[must_use]
    pub fn peek(&self, id: u64) -> Option<Record> {
        self.engine.get(id)
    }

    /// Unlocked point-in-time snapshot of the records whose fields equal
    /// every filter value, ordered by id. `null` filter values match anything.
    #[must_use]
    pub fn list(&self, filter: &Fields) -> Vec<Record> {
        self.engine
            .snapshot()
            .into_iter()
            .filter(|record| {
                filter
                    .iter()
                    .filter(|(_, wanted)| !wanted.is_null())
                    .all(|(name, wanted)| record.field(name) == Some(wanted))
            })
            .collect()
    }

    /// Merges `fields` into an existing record. Returns `(previous, updated)`.
    /// `null` values leave the stored field untouched.
    ///
    /// # Errors
    ///
    /// `LockNotHeld`, `WriteRejected`, `ValidationFailed`, or `NotFound`.
    pub fn update(
        &self,
        locks: &LockSet,
        id: u64,
        mut fields: Fields,
    ) -> Result<(Record, Record), StoreError> {
        self.ensure_locked(locks, id)?;
        self.ensure_writable()?;
        fields.retain(|_, value| !value.is_null());
        self.validate(&fields, ValidationMode::Patch)?;
        self.check_id_links(id, &fields)?;

        let previous = self.require(id)?;
        let mut updated = previous.clone();
        updated.fields.extend(fields);
        self.engine.put(updated.clone());
        Ok((previous, updated))
    }

    /// Inserts `insert` under `id` if absent, otherwise merges `merge` into
    /// the existing record. Returns `(previous, current)`.
    ///
    /// # Errors
    ///
    /// `LockNotHeld`, `WriteRejected`, or `ValidationFailed`.
    pub fn upsert(
        &self,
        locks: &LockSet,
        id: u64,
        insert: Fields,
        merge: Fields,
    ) -> Result<(Option<Record>, Record), StoreError> {
        self.ensure_locked(locks, id)?;
        self.ensure_writable()?;

        let previous = self.engine.get(id);
        let current = match &previous {
            Some(existing) => {
                self.validate(&merge, ValidationMode::Patch)?;
                self.check_id_links(id, &merge)?;
                let mut current = existing.clone();
                current.fields.extend(merge);
                current
            }
            None => {
                let mut fields = insert;
                self.schema.apply_defaults(&mut fields);
                self.validate(&fields, ValidationMode::Create)?;
                self.check_id_links(id, &fields)?;
                Record::new(self.domain, id, fields)
            }
        };
        self.engine.put(current.clone());
        self.ids.lock().note(id);
        Ok((previous, current))
    }

    /// Adds `delta` to an integer field, refusing to go below zero.
    /// Returns `(previous, updated)`.
    ///
    /// # Errors
    ///
    /// `LockNotHeld`, `WriteRejected`, `NotFound`, or `ValidationFailed`
    /// when the result would be negative.
    pub fn adjust(
        &self,
        locks: &LockSet,
        id: u64,
        field: &str,
        delta: i64,
    ) -> Result<(Record, Record), StoreError> {
        self.ensure_locked(locks, id)?;
        self.ensure_writable()?;

        let previous = self.require(id)?;
        let current = previous.field(field).and_then(Value::as_i64).unwrap_or(0);
        let adjusted = current.saturating_add(delta);
        if adjusted < 0 {
            return Err(self.invalid(format!(
                "insufficient {field} for {} {id}: have {current}, need {}",
                self.domain,
                delta.saturating_neg()
            )));
        }

        let mut updated = previous.clone();
        updated.fields.insert(field.to_string(), Value::Int(adjusted));
        self.engine.put(updated.clone());
        Ok((previous, updated))
    }

    /// Removes a record, returning it.
    ///
    /// # Errors
    ///
    /// `LockNotHeld`, `WriteRejected`, or `NotFound`.
    pub fn delete(&self, locks: &LockSet, id: u64) -> Result<Record, StoreError> {
        self.ensure_locked(locks, id)?;
        self.ensure_writable()?;
        self.engine.remove(id).ok_or(StoreError::NotFound {
            domain: self.domain,
            id,
        })
    }

    /// Puts a prior version of a record back. Compensation path: skips
    /// validation and the fault gate.
    ///
    /// # Errors
    ///
    /// `LockNotHeld`.
    pub fn restore(&self, locks: &LockSet, record: Record) -> Result<(), StoreError> {
        self.ensure_locked(locks, record.id)?;
        self.engine.put(record);
        Ok(())
    }

    /// Removes a record created earlier in the same saga. Compensation path:
    /// skips the fault gate. Removing an absent id is not an error.
    ///
    /// # Errors
    ///
    /// `LockNotHeld`.
    pub fn revert_insert(&self, locks: &LockSet, id: u64) -> Result<(), StoreError> {
        self.ensure_locked(locks, id)?;
        self.engine.remove(id);
        Ok(())
    }

    /// Existence check. Unlocked: the answer is only stable under the lock.
    #[must_use]
    pub fn contains(&self, id: u64) -> bool {
        self.engine.contains(id)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.engine.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.engine.is_empty()
    }

    /// While set, every non-compensating write fails with `WriteRejected`.
    pub fn inject_write_failure(&self, reason: Option<String>) {
        self.fault.store(reason.map(Arc::new));
    }

    fn ensure_locked(&self, locks: &LockSet, id: u64) -> Result<(), StoreError> {
        if locks.covers(self.domain, id) {
            Ok(())
        } else {
            Err(StoreError::LockNotHeld {
                domain: self.domain,
                id,
            })
        }
    }

    fn ensure_writable(&self) -> Result<(), StoreError> {
        match self.fault.load_full() {
            Some(reason) => Err(StoreError::WriteRejected {
                domain: self.domain,
                reason: reason.as_ref().clone(),
            }),
            None => Ok(()),
        }
    }

    fn validate(&self, fields: &Fields, mode: ValidationMode) -> Result<(), StoreError> {
        self.schema
            .validate(fields, mode)
            .into_result()
            .map_err(|errors| self.invalid(errors.join("; ")))
    }

    fn check_id_links(&self, id: u64, fields: &Fields) -> Result<(), StoreError> {
        self.schema
            .check_id_links(id, fields)
            .map_err(|errors| self.invalid(errors.join("; ")))
    }

    fn require(&self, id: u64) -> Result<Record, StoreError> {
        self.engine.get(id).ok_or(StoreError::NotFound {
            domain: self.domain,
            id,
        })
    }

    fn invalid(&self, message: String) -> StoreError {
        StoreError::ValidationFailed {
            domain: self.domain,
            message,
        }
    }
}

impl fmt::Debug for DomainStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DomainStore")
            .field("domain", &self.domain)
            .field("len", &self.engine.len())
            .finish_non_exhaustive()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
