//! Pipeline composition: combines all middleware layers into a single service stack.

use std::sync::Arc;

use petstore_core::Domain;
use tower::ServiceBuilder;

use super::load_shed::{LoadShedLayer, LoadShedService};
use super::metrics::{MetricsLayer, MetricsService};
use super::timeout::{TimeoutLayer, TimeoutService};
use crate::service::config::ServerConfig;
use crate::service::domain::DomainService;
use crate::service::operation::service_names;
use crate::service::orchestrator::Orchestrator;
use crate::service::router::OperationRouter;

/// The per-field service stack, cloneable so that fields of one request
/// can run concurrently.
pub type OperationPipeline =
    LoadShedService<TimeoutService<MetricsService<OperationRouter<Arc<DomainService>>>>>;

/// Registers one [`DomainService`] per domain on a fresh router.
#[must_use]
pub fn build_domain_router(orchestrator: &Arc<Orchestrator>) -> OperationRouter<Arc<DomainService>> {
    let mut router = OperationRouter::new();
    for domain in Domain::ALL {
        router.register(
            service_names::for_domain(domain),
            Arc::new(DomainService::new(domain, Arc::clone(orchestrator))),
        );
    }
    router
}

/// Build the operation pipeline by wrapping the router with middleware layers.
///
/// Layer order (outermost to innermost):
/// 1. `LoadShedLayer` -- reject when overloaded (fail fast before doing any work)
/// 2. `TimeoutLayer` -- enforce per-field timeouts
/// 3. `MetricsLayer` -- record timing and outcome (closest to the actual handler)
#[must_use]
pub fn build_operation_pipeline(
    router: OperationRouter<Arc<DomainService>>,
    config: &ServerConfig,
) -> OperationPipeline {
    ServiceBuilder::new()
        .layer(LoadShedLayer::new(config.max_concurrent_operations))
        .layer(TimeoutLayer)
        .layer(MetricsLayer)
        .service(router)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use petstore_core::{Fields, Value};
    use tower::ServiceExt;

    use super::*;
    use crate::service::guard::ConcurrencyGuard;
    use crate::service::operation::{Operation, OperationContext, OperationResponse};
    use crate::storage::StoreFactory;

    #[tokio::test]
    async fn pipeline_routes_through_all_layers() {
        let orchestrator = Arc::new(Orchestrator::new(
            StoreFactory::new().build(),
            ConcurrencyGuard::new(),
        ));
        let config = ServerConfig {
            max_concurrent_operations: 100,
            ..ServerConfig::default()
        };
        let pipeline = build_operation_pipeline(build_domain_router(&orchestrator), &config);

        let mut fields = Fields::new();
        fields.insert("name".to_string(), "Spring Fair".into());
        fields.insert("date".to_string(), "2024-04-01".into());
        fields.insert("location".to_string(), Value::Int(12));
        let op = Operation::Create {
            ctx: OperationContext::new(7, Domain::Event, "createEvent", 5000),
            id: None,
            fields,
        };

        let resp = pipeline.clone().oneshot(op).await.unwrap();
        let OperationResponse::Record(record) = resp else {
            panic!("expected record");
        };
        assert_eq!(record.domain, Domain::Event);
        assert_eq!(orchestrator.stores().store(Domain::Event).len(), 1);
        assert_eq!(pipeline.budget().limit(), 100);
        assert_eq!(pipeline.budget().in_use(), 0);
    }
}
