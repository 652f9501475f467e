//! Transport-free vocabulary of the petstore: values, domains and records,
//! entity schemas, correlation context, and request/envelope messages.

pub mod context;
pub mod messages;
pub mod schema;
pub mod types;

pub use context::{CorrelationContext, OperationType};
pub use messages::{
    Envelope, ErrorCode, ErrorEntry, FieldRequest, InboundOperation, OperationDescriptor,
    OperationRequest,
};
pub use schema::{EntitySchema, FieldDef, FieldKind, ValidationMode, ValidationResult};
pub use types::{id_to_i64, Domain, Fields, Record, UnknownDomain, Value};

