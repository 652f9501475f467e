//! Per-record mutual exclusion shared by every domain store.
//!
//! One async mutex per `(domain, id)` pair, created on first use and pruned
//! once nobody holds or waits for it. A [`LockSet`] is the proof of
//! ownership the stores demand before mutating a record.

use std::fmt;
use std::sync::Arc;

use dashmap::DashMap;
use petstore_core::Domain;
use tokio::sync::{Mutex, OwnedMutexGuard};

/// Identity of one lockable record.
///
/// Ordering is `(domain rank, id)`, the global acquisition order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LockKey {
    pub domain: Domain,
    pub id: u64,
}

impl LockKey {
    #[must_use]
    pub fn new(domain: Domain, id: u64) -> Self {
        Self { domain, id }
    }
}

impl fmt::Display for LockKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.domain, self.id)
    }
}

type LockTable = DashMap<LockKey, Arc<Mutex<()>>>;

// ---------------------------------------------------------------------------
// ConcurrencyGuard
// ---------------------------------------------------------------------------

/// Lock table keyed by [`LockKey`]. Cheap to clone; clones share the table.
#[derive(Clone, Default)]
pub struct ConcurrencyGuard {
    table: Arc<LockTable>,
}

impl ConcurrencyGuard {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Acquires every key, waiting as needed, in `(domain, id)` order.
    ///
    /// Duplicate keys are collapsed. If the returned future is dropped part
    /// way through, the locks already taken are released with it.
    pub async fn acquire(&self, keys: impl IntoIterator<Item = LockKey>) -> LockSet {
        let keys = sorted_unique(keys);
        let mut set = LockSet {
            table: Arc::clone(&self.table),
            held: Vec::with_capacity(keys.len()),
        };
        for key in keys {
            let slot = self.slot(key);
            let guard = slot.lock_owned().await;
            set.held.push((key, guard));
        }
        set
    }

    /// Acquires every key without waiting, or none of them.
    #[must_use]
    pub fn try_acquire(&self, keys: impl IntoIterator<Item = LockKey>) -> Option<LockSet> {
        let keys = sorted_unique(keys);
        let mut set = LockSet {
            table: Arc::clone(&self.table),
            held: Vec::with_capacity(keys.len()),
        };
        for key in keys {
            let guard = self.slot(key).try_lock_owned().ok()?;
            set.held.push((key, guard));
        }
        Some(set)
    }

    /// True while some task holds the lock for `key`.
    #[must_use]
    pub fn is_locked(&self, key: LockKey) -> bool {
        self.table
            .get(&key)
            .is_some_and(|slot| slot.try_lock().is_err())
    }

    /// Number of lock slots currently allocated.
    #[must_use]
    pub fn tracked(&self) -> usize {
        self.table.len()
    }

    fn slot(&self, key: LockKey) -> Arc<Mutex<()>> {
        Arc::clone(
            self.table
                .entry(key)
                .or_insert_with(|| Arc::new(Mutex::new(())))
                .value(),
        )
    }
}

impl fmt::Debug for ConcurrencyGuard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConcurrencyGuard")
            .field("tracked", &self.tracked())
            .finish()
    }
}

fn sorted_unique(keys: impl IntoIterator<Item = LockKey>) -> Vec<LockKey> {
    let mut keys: Vec<LockKey> = keys.into_iter().collect();
    keys.sort_unstable();
    keys.dedup();
    keys
}

// ---------------------------------------------------------------------------
// LockSet
// ---------------------------------------------------------------------------

/// Locks held by one operation. Dropping the set releases all of them.
pub struct LockSet {
    table: Arc<LockTable>,
    held: Vec<(LockKey, OwnedMutexGuard<()>)>,
}

impl LockSet {
    /// True if this set holds the lock for `(domain, id)`.
    #[must_use]
    pub fn covers(&self, domain: Domain, id: u64) -> bool {
        self.held
            .iter()
            .any(|(key, _)| key.domain == domain && key.id == id)
    }

    /// Held keys in acquisition order.
    pub fn keys(&self) -> impl Iterator<Item = LockKey> + '_ {
        self.held.iter().map(|(key, _)| *key)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.held.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.held.is_empty()
    }
}

impl Drop for LockSet {
    fn drop(&mut self) {
        // Release in reverse acquisition order, then prune slots that no
        // other task references.
        while let Some((key, guard)) = self.held.pop() {
            drop(guard);
            self.table
                .remove_if(&key, |_, slot| Arc::strong_count(slot) == 1);
        }
    }
}

impl fmt::Debug for LockSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.keys()).finish()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[tokio::test]
    async fn acquire_sorts_and_dedups() {
        let guard = ConcurrencyGuard::new();
        let set = guard
            .acquire([
                LockKey::new(Domain::Inventory, 1),
                LockKey::new(Domain::Pet, 2),
                LockKey::new(Domain::Pet, 1),
                LockKey::new(Domain::Pet, 2),
            ])
            .await;

        let keys: Vec<LockKey> = set.keys().collect();
        assert_eq!(
            keys,
            vec![
                LockKey::new(Domain::Pet, 1),
                LockKey::new(Domain::Pet, 2),
                LockKey::new(Domain::Inventory, 1),
            ]
        );
        assert!(set.covers(Domain::Inventory, 1));
        assert!(!set.covers(Domain::Inventory, 2));
    }

    #[tokio::test]
    async fn same_key_serializes() {
        let guard = ConcurrencyGuard::new();
        let key = LockKey::new(Domain::Pet, 7);
        let held = guard.acquire([key]).await;
        assert!(guard.is_locked(key));

        let waiting = tokio::time::timeout(Duration::from_millis(50), guard.acquire([key])).await;
        assert!(waiting.is_err(), "second acquirer must wait");

        drop(held);
        let reacquired =
            tokio::time::timeout(Duration::from_millis(500), guard.acquire([key])).await;
        assert!(reacquired.is_ok());
    }

    #[tokio::test]
    async fn distinct_keys_do_not_block() {
        let guard = ConcurrencyGuard::new();
        let _first = guard.acquire([LockKey::new(Domain::Pet, 1)]).await;
        let second = tokio::time::timeout(
            Duration::from_millis(500),
            guard.acquire([LockKey::new(Domain::Pet, 2)]),
        )
        .await;
        assert!(second.is_ok());
    }

    #[tokio::test]
    async fn try_acquire_is_all_or_nothing() {
        let guard = ConcurrencyGuard::new();
        let _held = guard.acquire([LockKey::new(Domain::Inventory, 4)]).await;

        let attempt =
            guard.try_acquire([LockKey::new(Domain::Pet, 4), LockKey::new(Domain::Inventory, 4)]);
        assert!(attempt.is_none());
        assert!(!guard.is_locked(LockKey::new(Domain::Pet, 4)));
    }

    #[tokio::test]
    async fn dropped_sets_prune_their_slots() {
        let guard = ConcurrencyGuard::new();
        let set = guard
            .acquire([LockKey::new(Domain::Order, 1), LockKey::new(Domain::Order, 2)])
            .await;
        assert_eq!(guard.tracked(), 2);
        drop(set);
        assert_eq!(guard.tracked(), 0);
    }

    #[tokio::test]
    async fn cancelled_acquire_releases_taken_locks() {
        let guard = ConcurrencyGuard::new();
        let blocker = guard.acquire([LockKey::new(Domain::Inventory, 1)]).await;

        // Takes pet:1, then parks on inventory:1 until the timeout drops it.
        let cancelled = tokio::time::timeout(
            Duration::from_millis(50),
            guard.acquire([LockKey::new(Domain::Pet, 1), LockKey::new(Domain::Inventory, 1)]),
        )
        .await;
        assert!(cancelled.is_err());
        assert!(!guard.is_locked(LockKey::new(Domain::Pet, 1)));

        drop(blocker);
        assert!(guard.try_acquire([LockKey::new(Domain::Pet, 1)]).is_some());
    }
}
