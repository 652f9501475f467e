//! Resolver dispatch: one inbound request in, one envelope out.
//!
//! Each requested field is classified independently; accepted fields run
//! through the operation pipeline and rejected ones become `ValidationFailed`
//! entries without touching a store. Query fields resolve concurrently,
//! mutation fields run one after another in request order.

use std::collections::HashSet;
use std::convert::Infallible;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use futures_util::future::join_all;
use petstore_core::{
    CorrelationContext, Domain, Envelope, ErrorCode, ErrorEntry, OperationRequest, OperationType,
    Value,
};
use tower::{Service, ServiceExt};
use tracing::error;

use crate::service::classify::OperationService;
use crate::service::middleware::OperationPipeline;
use crate::service::operation::{ClassifyError, OperationError};

/// Message reported for every `Internal` failure.
pub const INTERNAL_ERROR_MESSAGE: &str = "internal error";

/// Body of an inbound request as the transport handed it over.
#[derive(Debug, Clone)]
pub enum RequestBody {
    Parsed(OperationRequest),
    /// The body could not be decoded; carries the decoder's reason.
    Malformed(String),
}

impl RequestBody {
    /// Name reported in events.
    #[must_use]
    pub fn operation_name(&self) -> String {
        match self {
            RequestBody::Parsed(request) => request.display_name(),
            RequestBody::Malformed(_) => "anonymous".to_string(),
        }
    }

    #[must_use]
    pub fn operation_type(&self) -> OperationType {
        match self {
            RequestBody::Parsed(request) => request.operation_type,
            RequestBody::Malformed(_) => OperationType::Query,
        }
    }

    #[must_use]
    pub fn field_count(&self) -> usize {
        match self {
            RequestBody::Parsed(request) => request.fields.len(),
            RequestBody::Malformed(_) => 0,
        }
    }
}

/// Input of the dispatcher.
#[derive(Debug, Clone)]
pub struct DispatchRequest {
    pub ctx: CorrelationContext,
    pub body: RequestBody,
}

/// Overall result class of a request, precedence `Failed > Invalid > Success`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    Success,
    Invalid,
    Failed,
}

/// Output of the dispatcher.
#[derive(Debug, Clone)]
pub struct DispatchResponse {
    pub correlation_id: String,
    pub envelope: Envelope,
    pub outcome: DispatchOutcome,
    pub field_count: usize,
    /// Milliseconds from dispatch entry to envelope construction.
    pub duration_ms: u64,
}

/// Result of one field.
enum FieldResult {
    Resolved(Value),
    Rejected(ClassifyError),
    Failed { domain: Domain, error: OperationError },
}

type FieldFuture = Pin<Box<dyn Future<Output = FieldResult> + Send>>;

// ---------------------------------------------------------------------------
// Dispatcher
// ---------------------------------------------------------------------------

/// Builds envelopes from inbound requests. Never fails: every failure mode is
/// expressed inside the envelope.
#[derive(Clone)]
pub struct Dispatcher {
    classifier: Arc<OperationService>,
    pipeline: OperationPipeline,
}

impl Dispatcher {
    #[must_use]
    pub fn new(classifier: Arc<OperationService>, pipeline: OperationPipeline) -> Self {
        Self {
            classifier,
            pipeline,
        }
    }

    async fn dispatch(self, req: DispatchRequest) -> DispatchResponse {
        let DispatchRequest { ctx, body } = req;
        let request = match body {
            RequestBody::Parsed(request) if !request.fields.is_empty() => request,
            RequestBody::Parsed(_) => {
                return malformed(&ctx, "request names no fields".to_string());
            }
            RequestBody::Malformed(reason) => return malformed(&ctx, reason),
        };

        let correlation_id: Arc<str> = Arc::from(ctx.correlation_id.as_str());
        let mut seen = HashSet::new();
        let mut keys = Vec::with_capacity(request.fields.len());
        let mut pending: Vec<FieldFuture> = Vec::with_capacity(request.fields.len());

        for field in &request.fields {
            let key = field.response_key().to_string();
            let fut: FieldFuture = if seen.insert(key.clone()) {
                match self
                    .classifier
                    .classify(field, request.operation_type, &correlation_id)
                {
                    Ok(op) => {
                        let domain = op.domain();
                        let call = self.pipeline.clone().oneshot(op);
                        Box::pin(async move {
                            match call.await {
                                Ok(response) => FieldResult::Resolved(response.into_value()),
                                Err(error) => FieldResult::Failed { domain, error },
                            }
                        })
                    }
                    Err(rejection) => Box::pin(std::future::ready(FieldResult::Rejected(rejection))),
                }
            } else {
                Box::pin(std::future::ready(FieldResult::Rejected(
                    ClassifyError::DuplicateResponseKey { key: key.clone() },
                )))
            };
            keys.push(key);
            pending.push(fut);
        }

        let results = match request.operation_type {
            OperationType::Query => join_all(pending).await,
            OperationType::Mutation => {
                let mut results = Vec::with_capacity(pending.len());
                for fut in pending {
                    results.push(fut.await);
                }
                results
            }
        };

        let mut envelope = Envelope::default();
        let mut outcome = DispatchOutcome::Success;
        for (key, result) in keys.into_iter().zip(results) {
            match result {
                FieldResult::Resolved(value) => envelope.resolve(key, value),
                FieldResult::Rejected(rejection) => {
                    outcome = outcome.max_with(DispatchOutcome::Invalid);
                    let entry = ErrorEntry::new(
                        ErrorCode::ValidationFailed,
                        rejection.domain_name(),
                        rejection.to_string(),
                        Some(&key),
                    );
                    if matches!(rejection, ClassifyError::DuplicateResponseKey { .. }) {
                        // The first field with this key keeps its data.
                        envelope.errors.push(entry);
                    } else {
                        envelope.fail(key, entry);
                    }
                }
                FieldResult::Failed { domain, error } => {
                    outcome = DispatchOutcome::Failed;
                    let entry = error_entry(&ctx, &key, domain, &error);
                    envelope.fail(key, entry);
                }
            }
        }

        DispatchResponse {
            correlation_id: ctx.correlation_id.clone(),
            envelope,
            outcome,
            field_count: request.fields.len(),
            duration_ms: ctx.elapsed_ms(),
        }
    }
}

impl DispatchOutcome {
    fn max_with(self, other: DispatchOutcome) -> DispatchOutcome {
        match (self, other) {
            (DispatchOutcome::Failed, _) | (_, DispatchOutcome::Failed) => DispatchOutcome::Failed,
            (DispatchOutcome::Invalid, _) | (_, DispatchOutcome::Invalid) => {
                DispatchOutcome::Invalid
            }
            _ => DispatchOutcome::Success,
        }
    }
}

fn malformed(ctx: &CorrelationContext, reason: String) -> DispatchResponse {
    let rejection = ClassifyError::MalformedRequest { reason };
    let mut envelope = Envelope::default();
    envelope.errors.push(ErrorEntry::new(
        ErrorCode::ValidationFailed,
        rejection.domain_name(),
        rejection.to_string(),
        None,
    ));
    DispatchResponse {
        correlation_id: ctx.correlation_id.clone(),
        envelope,
        outcome: DispatchOutcome::Invalid,
        field_count: 0,
        duration_ms: ctx.elapsed_ms(),
    }
}

/// Maps a pipeline failure to its envelope entry. `Internal` details are
/// logged here and replaced by a fixed message.
fn error_entry(
    ctx: &CorrelationContext,
    key: &str,
    domain: Domain,
    error: &OperationError,
) -> ErrorEntry {
    let code = error.code();
    let message = if code == ErrorCode::Internal {
        error!(
            correlation_id = %ctx.correlation_id,
            operation_name = %ctx.operation_name,
            field = key,
            domain = domain.as_str(),
            error = %error,
            "internal error while resolving field"
        );
        INTERNAL_ERROR_MESSAGE.to_string()
    } else {
        error.to_string()
    };
    ErrorEntry::new(code, error.domain(domain).as_str(), message, Some(key))
}

impl Service<DispatchRequest> for Dispatcher {
    type Response = DispatchResponse;
    type Error = Infallible;
    type Future = Pin<Box<dyn Future<Output = Result<DispatchResponse, Infallible>> + Send>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, req: DispatchRequest) -> Self::Future {
        let this = self.clone();
        Box::pin(async move { Ok(this.dispatch(req).await) })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
