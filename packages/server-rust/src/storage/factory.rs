//! Factory for the fully-wired set of domain stores.
//!
//! [`StoreFactory`] is the dependency injection point that pairs every
//! [`Domain`] with a fresh [`StorageEngine`](super::StorageEngine) and returns
//! them as one [`StoreSet`].

use std::collections::BTreeMap;
use std::sync::Arc;

use petstore_core::Domain;

use crate::storage::domain_store::DomainStore;
use crate::storage::engine::StorageEngine;
use crate::storage::engines::HashMapStorage;

type EngineBuilder = Box<dyn Fn(Domain) -> Box<dyn StorageEngine> + Send + Sync>;

/// Builds one [`DomainStore`] per domain.
pub struct StoreFactory {
    engine: EngineBuilder,
}

impl StoreFactory {
    /// Factory producing [`HashMapStorage`]-backed stores.
    #[must_use]
    pub fn new() -> Self {
        Self::with_engine(|_| Box::new(HashMapStorage::new()))
    }

    /// Factory using a custom engine per domain.
    #[must_use]
    pub fn with_engine<F>(engine: F) -> Self
    where
        F: Fn(Domain) -> Box<dyn StorageEngine> + Send + Sync + 'static,
    {
        Self {
            engine: Box::new(engine),
        }
    }

    /// Creates the store for a single domain.
    #[must_use]
    pub fn create(&self, domain: Domain) -> DomainStore {
        DomainStore::new(domain, (self.engine)(domain))
    }

    /// Creates one store per domain, shared behind an `Arc`.
    #[must_use]
    pub fn build(&self) -> Arc<StoreSet> {
        Arc::new(StoreSet {
            stores: Domain::ALL.map(|domain| self.create(domain)),
        })
    }
}

impl Default for StoreFactory {
    fn default() -> Self {
        Self::new()
    }
}

/// Every domain store of one process, indexed by [`Domain`].
#[derive(Debug)]
pub struct StoreSet {
    stores: [DomainStore; 8],
}

impl StoreSet {
    #[must_use]
    pub fn store(&self, domain: Domain) -> &DomainStore {
        &self.stores[domain as usize]
    }

    /// Record count per domain, keyed by domain name.
    #[must_use]
    pub fn counts(&self) -> BTreeMap<&'static str, usize> {
        self.stores
            .iter()
            .map(|store| (store.domain().as_str(), store.len()))
            .collect()
    }
}
