//! Resolver dispatch and saga orchestration.
//!
//! A request flows through these stages:
//!
//! 1. **Observability** (`middleware::observability`): correlation id, one event per request
//! 2. **Dispatch** (`dispatch`): per-field classification and envelope assembly
//! 3. **Classification** (`classify`): `FieldRequest` -> `Result<Operation, ClassifyError>`
//! 4. **Middleware** (`middleware`): Tower layers (load shedding, timeout, metrics)
//! 5. **Routing** (`router`): Dispatch to domain services by `service_name`
//! 6. **Domain services** (`domain`): reads, and mutations via the `orchestrator`
//! 7. **Sagas** (`saga`, `orchestrator`, `guard`): locked multi-domain writes with compensation

pub mod classify;
pub mod config;
pub mod dispatch;
pub mod domain;
pub mod events;
pub mod guard;
pub mod middleware;
pub mod operation;
pub mod orchestrator;
pub mod router;
pub mod saga;

// Re-export key types for convenient access.
pub use classify::OperationService;
pub use config::ServerConfig;
pub use dispatch::{DispatchOutcome, DispatchRequest, DispatchResponse, Dispatcher, RequestBody};
pub use domain::DomainService;
pub use events::{
    CompositeEventSink, EventKind, EventSink, JsonLinesEventSink, MemoryEventSink,
    ObservabilityEvent, TracingEventSink,
};
pub use guard::{ConcurrencyGuard, LockKey, LockSet};
pub use middleware::observability::{resolve_correlation, InboundRequest, ResolvedCorrelation};
pub use operation::{
    service_names, ClassifyError, Operation, OperationContext, OperationError, OperationResponse,
};
pub use orchestrator::{Orchestrator, SagaError, SagaOutcome};
pub use router::OperationRouter;
pub use saga::SagaPlan;
