//! Request-level observability.
//!
//! Resolves the correlation id of each inbound request, builds its
//! [`CorrelationContext`], and emits exactly one [`ObservabilityEvent`] once
//! the envelope exists. A request dropped before that point (client gone,
//! HTTP timeout) still produces a `graphql_request_incomplete` event.

use std::convert::Infallible;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use http::{HeaderMap, HeaderName};
use petstore_core::CorrelationContext;
use tower::{Layer, Service};
use tracing::{debug, info_span, Instrument};

use crate::service::dispatch::{DispatchOutcome, DispatchRequest, DispatchResponse, RequestBody};
use crate::service::events::{EventKind, EventSink, ObservabilityEvent};

/// Preferred correlation header; also used for generated ids.
pub const REQUEST_ID_HEADER: HeaderName = HeaderName::from_static("x-request-id");
/// Fallback correlation header.
pub const CORRELATION_ID_HEADER: HeaderName = HeaderName::from_static("x-correlation-id");

/// Longest client-supplied correlation id that is accepted.
pub const MAX_CORRELATION_ID_LEN: usize = 128;

/// Correlation id chosen for a request and the header it travels under.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedCorrelation {
    pub id: String,
    pub header: HeaderName,
}

/// Picks the correlation id for a request.
///
/// `X-Request-Id` wins over `X-Correlation-Id`. Values that are empty,
/// longer than [`MAX_CORRELATION_ID_LEN`] bytes, or not visible ASCII are
/// ignored; when nothing usable remains a UUID v4 is generated under
/// `X-Request-Id`.
#[must_use]
pub fn resolve_correlation(headers: &HeaderMap) -> ResolvedCorrelation {
    for header in [REQUEST_ID_HEADER, CORRELATION_ID_HEADER] {
        let usable = headers
            .get(&header)
            .and_then(|value| value.to_str().ok())
            .map(str::trim)
            .filter(|id| is_usable_id(id));
        if let Some(id) = usable {
            return ResolvedCorrelation {
                id: id.to_string(),
                header,
            };
        }
    }
    ResolvedCorrelation {
        id: uuid::Uuid::new_v4().to_string(),
        header: REQUEST_ID_HEADER,
    }
}

fn is_usable_id(id: &str) -> bool {
    !id.is_empty() && id.len() <= MAX_CORRELATION_ID_LEN && id.bytes().all(|b| b.is_ascii_graphic())
}

/// Input of the observability service: a decoded body plus its correlation id.
#[derive(Debug, Clone)]
pub struct InboundRequest {
    pub correlation_id: String,
    pub body: RequestBody,
}

// ---------------------------------------------------------------------------
// ObservabilityLayer
// ---------------------------------------------------------------------------

/// Tower layer wrapping the dispatcher with correlation and event emission.
#[derive(Clone)]
pub struct ObservabilityLayer {
    sink: Arc<dyn EventSink>,
}

impl ObservabilityLayer {
    #[must_use]
    pub fn new(sink: Arc<dyn EventSink>) -> Self {
        Self { sink }
    }
}

impl<S> Layer<S> for ObservabilityLayer {
    type Service = ObservabilityService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        ObservabilityService {
            inner,
            sink: Arc::clone(&self.sink),
        }
    }
}

// ---------------------------------------------------------------------------
// ObservabilityService
// ---------------------------------------------------------------------------

#[derive(Clone)]
pub struct ObservabilityService<S> {
    inner: S,
    sink: Arc<dyn EventSink>,
}

/// Emits `graphql_request_incomplete` unless disarmed before drop.
struct IncompleteGuard {
    sink: Arc<dyn EventSink>,
    ctx: Option<CorrelationContext>,
    field_count: usize,
}

impl IncompleteGuard {
    fn disarm(&mut self) {
        self.ctx = None;
    }
}

impl Drop for IncompleteGuard {
    fn drop(&mut self) {
        if let Some(ctx) = self.ctx.take() {
            let event = ObservabilityEvent::new(
                EventKind::GraphqlRequestIncomplete,
                &ctx,
                ctx.elapsed_ms(),
                self.field_count,
                0,
            );
            self.sink.emit(&event);
            ::metrics::counter!(
                "petstore_requests_total",
                "event" => EventKind::GraphqlRequestIncomplete.as_str()
            )
            .increment(1);
        }
    }
}

fn event_kind(outcome: DispatchOutcome) -> EventKind {
    match outcome {
        DispatchOutcome::Success => EventKind::GraphqlRequest,
        DispatchOutcome::Failed => EventKind::GraphqlError,
        DispatchOutcome::Invalid => EventKind::GraphqlRequestInvalid,
    }
}

impl<S> Service<InboundRequest> for ObservabilityService<S>
where
    S: Service<DispatchRequest, Response = DispatchResponse, Error = Infallible> + Send,
    S::Future: Send + 'static,
{
    type Response = DispatchResponse;
    type Error = Infallible;
    type Future = Pin<Box<dyn Future<Output = Result<DispatchResponse, Infallible>> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, req: InboundRequest) -> Self::Future {
        let ctx = CorrelationContext::new(
            req.correlation_id,
            req.body.operation_name(),
            req.body.operation_type(),
        );
        let field_count = req.body.field_count();
        let span = info_span!(
            "request",
            correlation_id = %ctx.correlation_id,
            operation_name = %ctx.operation_name,
            operation_type = ctx.operation_type.as_str(),
        );

        let mut guard = IncompleteGuard {
            sink: Arc::clone(&self.sink),
            ctx: Some(ctx.clone()),
            field_count,
        };
        let sink = Arc::clone(&self.sink);
        let fut = self.inner.call(DispatchRequest {
            ctx: ctx.clone(),
            body: req.body,
        });

        Box::pin(
            async move {
                let response = match fut.await {
                    Ok(response) => response,
                    Err(never) => match never {},
                };
                let kind = event_kind(response.outcome);
                let event = ObservabilityEvent::new(
                    kind,
                    &ctx,
                    response.duration_ms,
                    response.field_count,
                    response.envelope.errors.len(),
                );
                guard.disarm();
                sink.emit(&event);
                ::metrics::counter!("petstore_requests_total", "event" => kind.as_str()).increment(1);
                debug!(
                    event = kind.as_str(),
                    duration_ms = response.duration_ms,
                    "request complete"
                );
                Ok(response)
            }
            .instrument(span),
        )
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
