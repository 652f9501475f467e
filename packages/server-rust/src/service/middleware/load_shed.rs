//! Admission control for resolved fields.
//!
//! Every field of every request draws from one [`FieldBudget`] of
//! `max_concurrent_operations` slots. A field that finds the budget spent
//! fails at once with `OperationError::Overloaded` instead of queueing.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tower::{Layer, Service};
use tracing::warn;

use crate::service::operation::{Operation, OperationContext, OperationError, OperationResponse};

/// Shared pool of field slots.
#[derive(Debug, Clone)]
pub struct FieldBudget {
    slots: Arc<Semaphore>,
    limit: usize,
}

impl FieldBudget {
    /// A budget of `limit` slots; a limit of zero still admits one field.
    #[must_use]
    pub fn new(limit: u32) -> Self {
        let limit = usize::try_from(limit).unwrap_or(usize::MAX).max(1);
        Self {
            slots: Arc::new(Semaphore::new(limit)),
            limit,
        }
    }

    #[must_use]
    pub fn limit(&self) -> usize {
        self.limit
    }

    /// Slots held by fields still running.
    #[must_use]
    pub fn in_use(&self) -> usize {
        self.limit - self.slots.available_permits()
    }

    fn admit(&self, ctx: &OperationContext) -> Result<Admission, OperationError> {
        match Arc::clone(&self.slots).try_acquire_owned() {
            Ok(slot) => {
                ::metrics::gauge!("petstore_fields_in_flight").increment(1.0);
                Ok(Admission { _slot: slot })
            }
            Err(_) => {
                ::metrics::counter!(
                    "petstore_fields_shed_total",
                    "domain" => ctx.domain.as_str(),
                    "type" => ctx.operation_type.as_str()
                )
                .increment(1);
                warn!(
                    correlation_id = %ctx.correlation_id,
                    field = %ctx.field,
                    limit = self.limit,
                    "field budget spent, shedding"
                );
                Err(OperationError::Overloaded)
            }
        }
    }
}

/// One admitted field; frees its slot when the field ends or is dropped.
struct Admission {
    _slot: OwnedSemaphorePermit,
}

impl Drop for Admission {
    fn drop(&mut self) {
        ::metrics::gauge!("petstore_fields_in_flight").decrement(1.0);
    }
}

/// Wraps a service so each call must first be admitted by the budget.
#[derive(Debug, Clone)]
pub struct LoadShedLayer {
    budget: FieldBudget,
}

impl LoadShedLayer {
    #[must_use]
    pub fn new(max_concurrent: u32) -> Self {
        Self::with_budget(FieldBudget::new(max_concurrent))
    }

    /// Shares an existing budget, e.g. between several pipelines.
    #[must_use]
    pub fn with_budget(budget: FieldBudget) -> Self {
        Self { budget }
    }
}

impl<S> Layer<S> for LoadShedLayer {
    type Service = LoadShedService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        LoadShedService {
            inner,
            budget: self.budget.clone(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct LoadShedService<S> {
    inner: S,
    budget: FieldBudget,
}

impl<S> LoadShedService<S> {
    #[must_use]
    pub fn budget(&self) -> &FieldBudget {
        &self.budget
    }
}

impl<S> Service<Operation> for LoadShedService<S>
where
    S: Service<Operation, Response = OperationResponse, Error = OperationError> + Send,
    S::Future: Send + 'static,
{
    type Response = OperationResponse;
    type Error = OperationError;
    type Future = Pin<Box<dyn Future<Output = Result<OperationResponse, OperationError>> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, op: Operation) -> Self::Future {
        let admission = match self.budget.admit(op.ctx()) {
            Ok(admission) => admission,
            Err(err) => return Box::pin(std::future::ready(Err(err))),
        };
        let fut = self.inner.call(op);
        Box::pin(async move {
            let _admission = admission;
            fut.await
        })
    }
}
