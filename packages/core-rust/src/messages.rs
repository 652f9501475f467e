//! Wire shapes exchanged with the transport layer.
//!
//! Inbound operations arrive already parsed into a field name and typed
//! arguments, either one at a time ([`OperationDescriptor`]) or as a batch
//! of named fields ([`OperationRequest`]). Every request is answered with
//! one [`Envelope`].

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::context::OperationType;
use crate::types::{Fields, Value};

/// One resolver invocation, the single-field request form.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OperationDescriptor {
    pub operation_type: OperationType,
    /// Resolver field to invoke, e.g. `createPet`.
    pub operation_name: String,
    #[serde(default)]
    pub arguments: Fields,
    /// Response key override; defaults to `operation_name`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alias: Option<String>,
}

/// One field of a batched request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldRequest {
    /// Resolver field to invoke.
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alias: Option<String>,
    #[serde(default)]
    pub arguments: Fields,
}

impl FieldRequest {
    #[must_use]
    pub fn new(name: impl Into<String>, arguments: Fields) -> Self {
        Self {
            name: name.into(),
            alias: None,
            arguments,
        }
    }

    #[must_use]
    pub fn with_alias(mut self, alias: impl Into<String>) -> Self {
        self.alias = Some(alias.into());
        self
    }

    /// Key under which this field's result appears in `Envelope::data`.
    #[must_use]
    pub fn response_key(&self) -> &str {
        self.alias.as_deref().unwrap_or(&self.name)
    }
}

/// A batched request: several independently resolved fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OperationRequest {
    pub operation_type: OperationType,
    /// Caller-chosen name for the whole request, used in events.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub operation_name: Option<String>,
    pub fields: Vec<FieldRequest>,
}

impl OperationRequest {
    #[must_use]
    pub fn new(operation_type: OperationType, fields: Vec<FieldRequest>) -> Self {
        Self {
            operation_type,
            operation_name: None,
            fields,
        }
    }

    #[must_use]
    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.operation_name = Some(name.into());
        self
    }

    /// Name reported in events: the explicit name, the single field's name,
    /// or `anonymous`.
    #[must_use]
    pub fn display_name(&self) -> String {
        match (&self.operation_name, self.fields.as_slice()) {
            (Some(name), _) => name.clone(),
            (None, [only]) => only.name.clone(),
            _ => "anonymous".to_string(),
        }
    }
}

/// Either accepted request form. The batched form is tried first.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum InboundOperation {
    Batch(OperationRequest),
    Single(OperationDescriptor),
}

impl InboundOperation {
    /// Normalizes both forms into a batch.
    #[must_use]
    pub fn into_request(self) -> OperationRequest {
        match self {
            InboundOperation::Batch(request) => request,
            InboundOperation::Single(op) => OperationRequest {
                operation_type: op.operation_type,
                operation_name: Some(op.operation_name.clone()),
                fields: vec![FieldRequest {
                    name: op.operation_name,
                    alias: op.alias,
                    arguments: op.arguments,
                }],
            },
        }
    }
}

impl From<OperationDescriptor> for OperationRequest {
    fn from(op: OperationDescriptor) -> Self {
        InboundOperation::Single(op).into_request()
    }
}

/// Machine-readable error class carried in every error entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorCode {
    ValidationFailed,
    NotFound,
    DuplicateId,
    SyncFailure,
    Internal,
    Timeout,
    Overloaded,
}

impl ErrorCode {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorCode::ValidationFailed => "ValidationFailed",
            ErrorCode::NotFound => "NotFound",
            ErrorCode::DuplicateId => "DuplicateId",
            ErrorCode::SyncFailure => "SyncFailure",
            ErrorCode::Internal => "Internal",
            ErrorCode::Timeout => "Timeout",
            ErrorCode::Overloaded => "Overloaded",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One failing field in an envelope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorEntry {
    pub message: String,
    /// Domain the failure originated in, or `request` for malformed input.
    pub domain: String,
    pub code: ErrorCode,
    /// Response key of the failing field; empty for request-level failures.
    #[serde(default)]
    pub path: Vec<String>,
}

impl ErrorEntry {
    #[must_use]
    pub fn new(
        code: ErrorCode,
        domain: impl Into<String>,
        message: impl Into<String>,
        field: Option<&str>,
    ) -> Self {
        Self {
            message: message.into(),
            domain: domain.into(),
            code,
            path: field.map(|f| vec![f.to_string()]).unwrap_or_default(),
        }
    }
}

/// Response to one request: per-field data plus the errors of failed fields.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Envelope {
    pub data: BTreeMap<String, Value>,
    pub errors: Vec<ErrorEntry>,
}

impl Envelope {
    /// Records a resolved field.
    pub fn resolve(&mut self, key: impl Into<String>, value: Value) {
        self.data.insert(key.into(), value);
    }

    /// Records a failed field: `null` data plus one error entry.
    pub fn fail(&mut self, key: impl Into<String>, error: ErrorEntry) {
        self.data.insert(key.into(), Value::Null);
        self.errors.push(error);
    }

    #[must_use]
    pub fn field(&self, key: &str) -> Option<&Value> {
        self.data.get(key)
    }

    /// True when no field resolved but at least one failed.
    #[must_use]
    pub fn is_total_failure(&self) -> bool {
        !self.errors.is_empty() && self.data.values().all(Value::is_null)
    }
}
