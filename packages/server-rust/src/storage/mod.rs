//! Storage for the petstore domains.
//!
//! Two layers:
//!
//! - **Engine** ([`StorageEngine`]): low-level id-keyed record storage
//! - **Store** ([`DomainStore`]): one per domain; validation, id
//!   allocation, lock checks and fault injection on top of an engine
//!
//! [`StoreFactory`] wires a [`StoreSet`] holding one store per domain.

pub mod domain_store;
pub mod engine;
pub mod engines;
pub mod error;
pub mod factory;

pub use domain_store::{DomainStore, IdReservation};
pub use engine::StorageEngine;
pub use engines::HashMapStorage;
pub use error::StoreError;
pub use factory::{StoreFactory, StoreSet};
