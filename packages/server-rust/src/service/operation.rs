//! Operation types flowing through the per-field pipeline.
//!
//! Each resolved field of an inbound request becomes one [`Operation`],
//! carrying an [`OperationContext`]. Domain services answer with an
//! [`OperationResponse`] or an [`OperationError`].

use std::sync::Arc;

use petstore_core::{id_to_i64, Domain, ErrorCode, Fields, OperationType, Record, Value};

use crate::service::orchestrator::SagaError;
use crate::storage::StoreError;

/// Service names used for routing, one per domain.
pub mod service_names {
    use petstore_core::Domain;

    /// Routing key of the service owning `domain`.
    #[must_use]
    pub fn for_domain(domain: Domain) -> &'static str {
        domain.as_str()
    }
}

/// Metadata attached to every operation.
#[derive(Debug, Clone)]
pub struct OperationContext {
    /// Unique id of this field dispatch within the process.
    pub call_id: u64,
    pub domain: Domain,
    /// Routing key; see [`service_names`].
    pub service_name: &'static str,
    /// Resolver field name, e.g. `createPet`.
    pub field: String,
    /// Key under which the result lands in the envelope.
    pub response_key: String,
    pub correlation_id: Arc<str>,
    pub operation_type: OperationType,
    pub call_timeout_ms: u64,
}

impl OperationContext {
    #[must_use]
    pub fn new(call_id: u64, domain: Domain, field: impl Into<String>, call_timeout_ms: u64) -> Self {
        let field = field.into();
        Self {
            call_id,
            domain,
            service_name: service_names::for_domain(domain),
            response_key: field.clone(),
            field,
            correlation_id: Arc::from(""),
            operation_type: OperationType::Query,
            call_timeout_ms,
        }
    }
}

/// A classified, validated resolver call.
#[derive(Debug)]
pub enum Operation {
    Get { ctx: OperationContext, id: u64 },
    List { ctx: OperationContext, filter: Fields },
    Create { ctx: OperationContext, id: Option<u64>, fields: Fields },
    Update { ctx: OperationContext, id: u64, fields: Fields },
    Delete { ctx: OperationContext, id: u64 },
}

impl Operation {
    #[must_use]
    pub fn ctx(&self) -> &OperationContext {
        match self {
            Operation::Get { ctx, .. }
            | Operation::List { ctx, .. }
            | Operation::Create { ctx, .. }
            | Operation::Update { ctx, .. }
            | Operation::Delete { ctx, .. } => ctx,
        }
    }

    #[must_use]
    pub fn domain(&self) -> Domain {
        self.ctx().domain
    }

    #[must_use]
    pub fn is_mutation(&self) -> bool {
        matches!(
            self,
            Operation::Create { .. } | Operation::Update { .. } | Operation::Delete { .. }
        )
    }
}

/// Result of a successful operation.
#[derive(Debug, Clone, PartialEq)]
pub enum OperationResponse {
    Record(Record),
    Records(Vec<Record>),
    Deleted { id: u64 },
}

impl OperationResponse {
    /// Renders the response as envelope data.
    #[must_use]
    pub fn into_value(self) -> Value {
        match self {
            OperationResponse::Record(record) => record.to_value(),
            OperationResponse::Records(records) => {
                Value::Array(records.iter().map(Record::to_value).collect())
            }
            OperationResponse::Deleted { id } => {
                let mut map = Fields::new();
                map.insert("id".to_string(), Value::Int(id_to_i64(id)));
                map.insert("success".to_string(), Value::Bool(true));
                Value::Map(map)
            }
        }
    }
}

/// Failure of one operation.
#[derive(Debug, thiserror::Error)]
pub enum OperationError {
    #[error(transparent)]
    Store(StoreError),
    #[error("{domain} sync failed: {cause}")]
    SyncFailure { domain: Domain, cause: StoreError },
    #[error("operation timed out after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },
    #[error("server overloaded, try again later")]
    Overloaded,
    #[error("unknown service: {name}")]
    UnknownService { name: String },
    #[error("wrong service for operation")]
    WrongService,
    #[error("internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl OperationError {
    /// Envelope error code for this failure.
    #[must_use]
    pub fn code(&self) -> ErrorCode {
        match self {
            OperationError::Store(StoreError::NotFound { .. }) => ErrorCode::NotFound,
            OperationError::Store(StoreError::DuplicateId { .. }) => ErrorCode::DuplicateId,
            OperationError::Store(StoreError::ValidationFailed { .. }) => {
                ErrorCode::ValidationFailed
            }
            OperationError::SyncFailure { .. } => ErrorCode::SyncFailure,
            OperationError::Timeout { .. } => ErrorCode::Timeout,
            OperationError::Overloaded => ErrorCode::Overloaded,
            OperationError::Store(StoreError::WriteRejected { .. } | StoreError::LockNotHeld { .. })
            | OperationError::UnknownService { .. }
            | OperationError::WrongService
            | OperationError::Internal(_) => ErrorCode::Internal,
        }
    }

    /// Domain to report, falling back to the operation's own.
    #[must_use]
    pub fn domain(&self, fallback: Domain) -> Domain {
        match self {
            OperationError::Store(err) => err.domain(),
            OperationError::SyncFailure { domain, .. } => *domain,
            _ => fallback,
        }
    }
}

impl From<StoreError> for OperationError {
    fn from(err: StoreError) -> Self {
        OperationError::Store(err)
    }
}

impl From<SagaError> for OperationError {
    fn from(err: SagaError) -> Self {
        match err {
            SagaError::Primary(cause) => OperationError::Store(cause),
            SagaError::SyncFailure { domain, cause, .. } => {
                OperationError::SyncFailure { domain, cause }
            }
            internal @ (SagaError::RollbackIncomplete { .. } | SagaError::Stale { .. }) => {
                OperationError::Internal(anyhow::Error::new(internal))
            }
        }
    }
}

/// Validation failure detected before any store is touched.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ClassifyError {
    #[error("unknown field '{field}'")]
    UnknownField { field: String },
    #[error("'{field}' is a {expected} field, not a {actual}")]
    WrongOperationType {
        field: String,
        domain: Domain,
        expected: OperationType,
        actual: OperationType,
    },
    #[error("'{field}' requires argument 'id'")]
    MissingId { field: String, domain: Domain },
    #[error("'{field}': id must be a positive integer")]
    InvalidId { field: String, domain: Domain },
    #[error("'{field}': {message}")]
    InvalidArguments {
        field: String,
        domain: Domain,
        message: String,
    },
    #[error("duplicate response key '{key}'")]
    DuplicateResponseKey { key: String },
    #[error("malformed request: {reason}")]
    MalformedRequest { reason: String },
}

impl ClassifyError {
    /// Domain the failure is reported under; `request` when none applies.
    #[must_use]
    pub fn domain_name(&self) -> &'static str {
        match self {
            ClassifyError::WrongOperationType { domain, .. }
            | ClassifyError::MissingId { domain, .. }
            | ClassifyError::InvalidId { domain, .. }
            | ClassifyError::InvalidArguments { domain, .. } => domain.as_str(),
            ClassifyError::UnknownField { .. }
            | ClassifyError::DuplicateResponseKey { .. }
            | ClassifyError::MalformedRequest { .. } => "request",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_follow_taxonomy() {
        let not_found = OperationError::Store(StoreError::NotFound { domain: Domain::Pet, id: 1 });
        assert_eq!(not_found.code(), ErrorCode::NotFound);

        let sync = OperationError::from(SagaError::SyncFailure {
            saga: "createPet".to_string(),
            domain: Domain::Inventory,
            cause: StoreError::WriteRejected {
                domain: Domain::Inventory,
                reason: "offline".to_string(),
            },
        });
        assert_eq!(sync.code(), ErrorCode::SyncFailure);
        assert_eq!(sync.domain(Domain::Pet), Domain::Inventory);

        let lock = OperationError::Store(StoreError::LockNotHeld { domain: Domain::Pet, id: 1 });
        assert_eq!(lock.code(), ErrorCode::Internal);
        assert_eq!(OperationError::Overloaded.code(), ErrorCode::Overloaded);
    }

    #[test]
    fn rollback_failures_are_internal() {
        let err = OperationError::from(SagaError::RollbackIncomplete {
            saga: "createPet".to_string(),
            domain: Domain::Inventory,
            cause: StoreError::NotFound { domain: Domain::Inventory, id: 1 },
            compensation: StoreError::LockNotHeld { domain: Domain::Pet, id: 1 },
        });
        assert_eq!(err.code(), ErrorCode::Internal);
        assert_eq!(err.domain(Domain::Pet), Domain::Pet);
    }

    #[test]
    fn deleted_renders_success_flag() {
        let value = OperationResponse::Deleted { id: 3 }.into_value();
        let json = serde_json::to_value(value).unwrap();
        assert_eq!(json, serde_json::json!({"id": 3, "success": true}));
    }
}
