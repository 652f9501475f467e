//! Per-field deadlines.
//!
//! Each field gets `call_timeout_ms` from its context; zero means no
//! deadline. An overrun fails that field alone with
//! `OperationError::Timeout`. A mutation can only overrun while waiting for
//! its saga locks, so dropping it leaves no partial write behind.

use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;

use tower::{Layer, Service};
use tracing::warn;

use crate::service::operation::{Operation, OperationContext, OperationError, OperationResponse};

#[derive(Debug, Clone, Copy, Default)]
pub struct TimeoutLayer;

impl<S> Layer<S> for TimeoutLayer {
    type Service = TimeoutService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        TimeoutService { inner }
    }
}

#[derive(Debug, Clone)]
pub struct TimeoutService<S> {
    inner: S,
}

/// What to report if the field overruns.
struct Overrun {
    ctx: OperationContext,
    mutation: bool,
}

impl Overrun {
    fn report(self) -> OperationError {
        let timeout_ms = self.ctx.call_timeout_ms;
        ::metrics::counter!(
            "petstore_operation_timeouts_total",
            "domain" => self.ctx.domain.as_str()
        )
        .increment(1);
        if self.mutation {
            warn!(
                correlation_id = %self.ctx.correlation_id,
                field = %self.ctx.field,
                timeout_ms,
                "mutation abandoned before taking its locks"
            );
        } else {
            warn!(
                correlation_id = %self.ctx.correlation_id,
                field = %self.ctx.field,
                timeout_ms,
                "query timed out"
            );
        }
        OperationError::Timeout { timeout_ms }
    }
}

impl<S> Service<Operation> for TimeoutService<S>
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
        let timeout_ms = op.ctx().call_timeout_ms;
        if timeout_ms == 0 {
            return Box::pin(self.inner.call(op));
        }

        let overrun = Overrun {
            ctx: op.ctx().clone(),
            mutation: op.is_mutation(),
        };
        let fut = self.inner.call(op);
        Box::pin(async move {
            tokio::time::timeout(Duration::from_millis(timeout_ms), fut)
                .await
                .unwrap_or_else(|_elapsed| Err(overrun.report()))
        })
    }
}
