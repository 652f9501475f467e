//! Domain services: one `tower::Service<Operation>` per entity type.
//!
//! Reads go straight to the owning [`DomainStore`](crate::storage::DomainStore)
//! (single-record reads under the record lock); every mutation runs as a saga
//! through the shared [`Orchestrator`].

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use petstore_core::Domain;
use tower::Service;

use crate::service::guard::LockKey;
use crate::service::operation::{Operation, OperationError, OperationResponse};
use crate::service::orchestrator::Orchestrator;

/// Resolver backend for one domain.
pub struct DomainService {
    domain: Domain,
    orchestrator: Arc<Orchestrator>,
}

impl DomainService {
    #[must_use]
    pub fn new(domain: Domain, orchestrator: Arc<Orchestrator>) -> Self {
        Self {
            domain,
            orchestrator,
        }
    }

    #[must_use]
    pub fn domain(&self) -> Domain {
        self.domain
    }

    async fn handle(&self, op: Operation) -> Result<OperationResponse, OperationError> {
        if op.domain() != self.domain {
            return Err(OperationError::WrongService);
        }
        let orchestrator = &self.orchestrator;
        let store = orchestrator.stores().store(self.domain);

        match op {
            Operation::Get { id, .. } => {
                let locks = orchestrator
                    .guard()
                    .acquire([LockKey::new(self.domain, id)])
                    .await;
                Ok(OperationResponse::Record(store.get(&locks, id)?))
            }
            Operation::List { filter, .. } => Ok(OperationResponse::Records(store.list(&filter))),
            Operation::Create { id, fields, .. } => {
                let outcome = orchestrator.create(self.domain, id, fields).await?;
                Ok(OperationResponse::Record(outcome.primary))
            }
            Operation::Update { id, fields, .. } => {
                let outcome = orchestrator.update(self.domain, id, fields).await?;
                Ok(OperationResponse::Record(outcome.primary))
            }
            Operation::Delete { id, .. } => {
                let outcome = orchestrator.delete(self.domain, id).await?;
                Ok(OperationResponse::Deleted {
                    id: outcome.primary.id,
                })
            }
        }
    }
}

impl Service<Operation> for Arc<DomainService> {
    type Response = OperationResponse;
    type Error = OperationError;
    type Future = Pin<Box<dyn Future<Output = Result<OperationResponse, OperationError>> + Send>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, op: Operation) -> Self::Future {
        let svc = Arc::clone(self);
        Box::pin(async move { svc.handle(op).await })
    }
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
    use crate::service::operation::OperationContext;
    use crate::storage::{StoreError, StoreFactory};

    fn setup() -> (Arc<Orchestrator>, Arc<DomainService>) {
        let orchestrator = Arc::new(Orchestrator::new(
            StoreFactory::new().build(),
            ConcurrencyGuard::new(),
        ));
        let svc = Arc::new(DomainService::new(Domain::Pet, Arc::clone(&orchestrator)));
        (orchestrator, svc)
    }

    fn ctx(field: &str) -> OperationContext {
        OperationContext::new(1, Domain::Pet, field, 5000)
    }

    fn rex() -> Fields {
        let mut fields = Fields::new();
        fields.insert("name".to_string(), "Rex".into());
        fields.insert("type".to_string(), "dog".into());
        fields
    }

    #[tokio::test]
    async fn create_get_list_delete() {
        let (orchestrator, svc) = setup();

        let created = svc
            .clone()
            .oneshot(Operation::Create { ctx: ctx("createPet"), id: None, fields: rex() })
            .await
            .unwrap();
        assert!(matches!(created, OperationResponse::Record(ref r) if r.id == 1));

        let fetched = svc
            .clone()
            .oneshot(Operation::Get { ctx: ctx("pet"), id: 1 })
            .await
            .unwrap();
        assert_eq!(fetched, created);

        let listed = svc
            .clone()
            .oneshot(Operation::List { ctx: ctx("pets"), filter: Fields::new() })
            .await
            .unwrap();
        assert!(matches!(listed, OperationResponse::Records(ref r) if r.len() == 1));

        let deleted = svc
            .clone()
            .oneshot(Operation::Delete { ctx: ctx("deletePet"), id: 1 })
            .await
            .unwrap();
        assert_eq!(deleted, OperationResponse::Deleted { id: 1 });
        assert!(orchestrator.stores().store(Domain::Inventory).is_empty());
        assert_eq!(orchestrator.attempts(), 2);
    }

    #[tokio::test]
    async fn get_missing_is_not_found() {
        let (_, svc) = setup();
        let err = svc
            .oneshot(Operation::Get { ctx: ctx("pet"), id: 42 })
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            OperationError::Store(StoreError::NotFound { id: 42, .. })
        ));
    }

    #[tokio::test]
    async fn update_returns_merged_record() {
        let (_, svc) = setup();
        svc.clone()
            .oneshot(Operation::Create { ctx: ctx("createPet"), id: Some(5), fields: rex() })
            .await
            .unwrap();

        let mut patch = Fields::new();
        patch.insert("order_id".to_string(), Value::Int(3));
        let updated = svc
            .oneshot(Operation::Update { ctx: ctx("updatePet"), id: 5, fields: patch })
            .await
            .unwrap();
        let OperationResponse::Record(record) = updated else {
            panic!("expected record");
        };
        assert_eq!(record.field("order_id"), Some(&Value::Int(3)));
        assert_eq!(record.field("name"), Some(&"Rex".into()));
    }

    #[tokio::test]
    async fn foreign_domain_is_wrong_service() {
        let (orchestrator, _) = setup();
        let vets = Arc::new(DomainService::new(Domain::Vet, orchestrator));
        let err = vets
            .oneshot(Operation::Get { ctx: ctx("pet"), id: 1 })
            .await
            .unwrap_err();
        assert!(matches!(err, OperationError::WrongService));
    }
}
