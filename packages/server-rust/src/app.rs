//! Assembly of the request path.
//!
//! `PetstoreApp` owns the stores and the orchestrator and exposes the fully
//! layered request service: observability around the dispatcher, which
//! drives the per-field operation pipeline.

use std::collections::BTreeMap;
use std::sync::Arc;

use tower::{Layer, ServiceExt};

use crate::service::classify::OperationService;
use crate::service::config::ServerConfig;
use crate::service::dispatch::{DispatchResponse, Dispatcher};
use crate::service::events::EventSink;
use crate::service::guard::ConcurrencyGuard;
use crate::service::middleware::observability::InboundRequest;
use crate::service::middleware::{
    build_domain_router, build_operation_pipeline, ObservabilityLayer, ObservabilityService,
};
use crate::service::orchestrator::Orchestrator;
use crate::storage::{StoreFactory, StoreSet};

/// The complete request service handed to the transport.
pub type RequestService = ObservabilityService<Dispatcher>;

/// Shared process state: stores, orchestrator and the request service.
#[derive(Clone)]
pub struct PetstoreApp {
    stores: Arc<StoreSet>,
    orchestrator: Arc<Orchestrator>,
    service: RequestService,
}

impl PetstoreApp {
    /// Builds the app over empty hash-map stores.
    #[must_use]
    pub fn new(config: ServerConfig, sink: Arc<dyn EventSink>) -> Self {
        Self::with_factory(&StoreFactory::new(), config, sink)
    }

    /// Builds the app with stores produced by `factory`.
    #[must_use]
    pub fn with_factory(
        factory: &StoreFactory,
        config: ServerConfig,
        sink: Arc<dyn EventSink>,
    ) -> Self {
        let config = Arc::new(config);
        let stores = factory.build();
        let orchestrator = Arc::new(Orchestrator::new(
            Arc::clone(&stores),
            ConcurrencyGuard::new(),
        ));
        let pipeline = build_operation_pipeline(build_domain_router(&orchestrator), &config);
        let dispatcher = Dispatcher::new(Arc::new(OperationService::new(config)), pipeline);
        let service = ObservabilityLayer::new(sink).layer(dispatcher);

        Self {
            stores,
            orchestrator,
            service,
        }
    }

    /// A fresh handle on the request service.
    #[must_use]
    pub fn service(&self) -> RequestService {
        self.service.clone()
    }

    /// Runs one request to completion.
    pub async fn handle(&self, request: InboundRequest) -> DispatchResponse {
        match self.service.clone().oneshot(request).await {
            Ok(response) => response,
            Err(never) => match never {},
        }
    }

    #[must_use]
    pub fn stores(&self) -> &Arc<StoreSet> {
        &self.stores
    }

    #[must_use]
    pub fn orchestrator(&self) -> &Arc<Orchestrator> {
        &self.orchestrator
    }

    /// Record count per domain, keyed by domain name.
    #[must_use]
    pub fn record_counts(&self) -> BTreeMap<&'static str, usize> {
        self.stores.counts()
    }
}
