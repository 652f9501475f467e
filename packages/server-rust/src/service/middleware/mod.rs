//! Tower middleware layers for the operation pipeline.
//!
//! - [`timeout`]: Per-field timeout enforcement
//! - [`metrics`]: Field timing and counting via `tracing` spans and `metrics`
//! - [`load_shed`]: Shared field budget; sheds once it is spent
//! - [`observability`]: Per-request correlation ids and structured events
//! - [`pipeline`]: Composes the per-field layers into a single service stack

pub mod load_shed;
pub mod metrics;
pub mod observability;
pub mod pipeline;
pub mod timeout;

pub use load_shed::{FieldBudget, LoadShedLayer};
pub use metrics::MetricsLayer;
pub use observability::{ObservabilityLayer, ObservabilityService};
pub use pipeline::{build_domain_router, build_operation_pipeline, OperationPipeline};
pub use timeout::TimeoutLayer;
