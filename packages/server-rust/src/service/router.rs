//! Operation routing: dispatches `Operation` to domain services by `service_name`.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use tower::{Service, ServiceExt};

use super::operation::{Operation, OperationError, OperationResponse};

// ---------------------------------------------------------------------------
// OperationRouter
// ---------------------------------------------------------------------------

/// Routes `Operation` values to the correct domain service by `service_name`.
///
/// Each registered domain service is a cloneable `tower::Service<Operation>`
/// keyed by its service name (one per domain). Every call drives its own
/// clone, so concurrent fields never contend on a shared service handle.
/// Operations with an unregistered `service_name` return
/// `OperationError::UnknownService`.
#[derive(Clone)]
pub struct OperationRouter<S> {
    services: HashMap<&'static str, S>,
}

impl<S> OperationRouter<S> {
    /// Create a new empty router.
    #[must_use]
    pub fn new() -> Self {
        Self {
            services: HashMap::new(),
        }
    }

    /// Register a domain service for the given name.
    pub fn register(&mut self, name: &'static str, service: S) {
        self.services.insert(name, service);
    }

    /// Names of all registered services.
    pub fn service_names(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.services.keys().copied()
    }
}

impl<S> Default for OperationRouter<S> {
    fn default() -> Self {
        Self::new()
    }
}

impl<S> Service<Operation> for OperationRouter<S>
where
    S: Service<Operation, Response = OperationResponse, Error = OperationError>
        + Clone
        + Send
        + 'static,
    S::Future: Send + 'static,
{
    type Response = OperationResponse;
    type Error = OperationError;
    type Future = Pin<Box<dyn Future<Output = Result<OperationResponse, OperationError>> + Send>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        // Readiness is checked per call on the cloned target service.
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, op: Operation) -> Self::Future {
        let service_name = op.ctx().service_name;
        match self.services.get(service_name) {
            Some(svc) => Box::pin(svc.clone().oneshot(op)),
            None => Box::pin(async move {
                Err(OperationError::UnknownService {
                    name: service_name.to_string(),
                })
            }),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
