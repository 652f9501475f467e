//! Petstore server: domain stores, saga orchestration, resolver dispatch and
//! the HTTP transport in front of them.

pub mod app;
pub mod network;
pub mod service;
pub mod storage;
pub mod telemetry;

pub use app::{PetstoreApp, RequestService};
