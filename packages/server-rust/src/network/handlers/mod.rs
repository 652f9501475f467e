//! HTTP handlers and the state they share.

pub mod graphql;
pub mod health;

pub use graphql::graphql_handler;
pub use health::{health_handler, liveness_handler, readiness_handler};

use std::sync::Arc;
use std::time::Instant;

use super::{NetworkConfig, ShutdownController};
use crate::app::PetstoreApp;

/// State carried through axum's `State` extractor. Cloning is cheap.
#[derive(Clone)]
pub struct AppState {
    /// Stores, orchestrator and the layered request service.
    pub app: PetstoreApp,
    pub shutdown: Arc<ShutdownController>,
    pub config: Arc<NetworkConfig>,
    /// Used for the uptime reported by `/health`.
    pub start_time: Instant,
}
