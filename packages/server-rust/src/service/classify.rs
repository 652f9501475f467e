//! Field classification: converts a requested field into a typed `Operation`.
//!
//! Every resolver field maps to one domain and one kind. Arguments are
//! checked against the domain's [`EntitySchema`] here, before any store is
//! touched, so a rejected field never reaches the orchestrator.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use petstore_core::{
    Domain, EntitySchema, FieldRequest, Fields, OperationType, ValidationMode, Value,
};

use super::config::ServerConfig;
use super::operation::{ClassifyError, Operation, OperationContext};

/// What a resolver field does.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolverKind {
    Get,
    List,
    Create,
    Update,
    Delete,
}

impl ResolverKind {
    #[must_use]
    pub fn operation_type(self) -> OperationType {
        match self {
            ResolverKind::Get | ResolverKind::List => OperationType::Query,
            ResolverKind::Create | ResolverKind::Update | ResolverKind::Delete => {
                OperationType::Mutation
            }
        }
    }
}

/// One entry of the resolver table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Resolver {
    pub domain: Domain,
    pub kind: ResolverKind,
}

// ---------------------------------------------------------------------------
// OperationService
// ---------------------------------------------------------------------------

/// Classifies requested fields into typed `Operation` variants.
///
/// Each call gets a unique call ID and the configured per-field timeout.
pub struct OperationService {
    resolvers: HashMap<String, Resolver>,
    config: Arc<ServerConfig>,
    call_id_counter: AtomicU64,
}

impl OperationService {
    /// Create a new `OperationService` with the full resolver table.
    #[must_use]
    pub fn new(config: Arc<ServerConfig>) -> Self {
        let mut resolvers = HashMap::new();
        for domain in Domain::ALL {
            let type_name = domain.type_name();
            let entries = [
                (domain.single_field().to_string(), ResolverKind::Get),
                (domain.list_field().to_string(), ResolverKind::List),
                (format!("create{type_name}"), ResolverKind::Create),
                (format!("update{type_name}"), ResolverKind::Update),
                (format!("delete{type_name}"), ResolverKind::Delete),
            ];
            for (name, kind) in entries {
                resolvers.insert(name, Resolver { domain, kind });
            }
        }
        Self {
            resolvers,
            config,
            call_id_counter: AtomicU64::new(1),
        }
    }

    /// Looks up a resolver field.
    #[must_use]
    pub fn resolver(&self, field: &str) -> Option<Resolver> {
        self.resolvers.get(field).copied()
    }

    /// Generate a unique call ID for each operation.
    fn next_call_id(&self) -> u64 {
        self.call_id_counter.fetch_add(1, Ordering::Relaxed)
    }

    fn make_ctx(
        &self,
        domain: Domain,
        field: &FieldRequest,
        operation_type: OperationType,
        correlation_id: &Arc<str>,
    ) -> OperationContext {
        let mut ctx = OperationContext::new(
            self.next_call_id(),
            domain,
            field.name.clone(),
            self.config.default_operation_timeout_ms,
        );
        ctx.response_key = field.response_key().to_string();
        ctx.correlation_id = Arc::clone(correlation_id);
        ctx.operation_type = operation_type;
        ctx
    }

    /// Classify one requested field into an `Operation`.
    ///
    /// # Errors
    ///
    /// Returns `ClassifyError` when the field is unknown, belongs to the other
    /// operation type, or its arguments fail the domain schema.
    pub fn classify(
        &self,
        field: &FieldRequest,
        operation_type: OperationType,
        correlation_id: &Arc<str>,
    ) -> Result<Operation, ClassifyError> {
        let Resolver { domain, kind } =
            self.resolver(&field.name)
                .ok_or_else(|| ClassifyError::UnknownField {
                    field: field.name.clone(),
                })?;

        if kind.operation_type() != operation_type {
            return Err(ClassifyError::WrongOperationType {
                field: field.name.clone(),
                domain,
                expected: kind.operation_type(),
                actual: operation_type,
            });
        }

        let schema = EntitySchema::for_domain(domain);
        let mut args = field.arguments.clone();
        let name = field.name.as_str();

        let op = match kind {
            ResolverKind::Get => {
                let id = require_id(&mut args, name, domain)?;
                reject_extra(&args, name, domain)?;
                let ctx = self.make_ctx(domain, field, operation_type, correlation_id);
                Operation::Get { ctx, id }
            }
            ResolverKind::List => {
                drop_nulls(&mut args);
                check(schema, &args, ValidationMode::Filter, name)?;
                let ctx = self.make_ctx(domain, field, operation_type, correlation_id);
                Operation::List { ctx, filter: args }
            }
            ResolverKind::Create => {
                let id = take_id(&mut args, name, domain)?;
                check(schema, &args, ValidationMode::Create, name)?;
                let ctx = self.make_ctx(domain, field, operation_type, correlation_id);
                Operation::Create {
                    ctx,
                    id,
                    fields: args,
                }
            }
            ResolverKind::Update => {
                let id = require_id(&mut args, name, domain)?;
                drop_nulls(&mut args);
                check(schema, &args, ValidationMode::Patch, name)?;
                let ctx = self.make_ctx(domain, field, operation_type, correlation_id);
                Operation::Update {
                    ctx,
                    id,
                    fields: args,
                }
            }
            ResolverKind::Delete => {
                let id = require_id(&mut args, name, domain)?;
                reject_extra(&args, name, domain)?;
                let ctx = self.make_ctx(domain, field, operation_type, correlation_id);
                Operation::Delete { ctx, id }
            }
        };
        Ok(op)
    }
}

/// Removes and checks an optional `id` argument.
fn take_id(args: &mut Fields, field: &str, domain: Domain) -> Result<Option<u64>, ClassifyError> {
    match args.remove("id") {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Int(id)) if id >= 1 => Ok(u64::try_from(id).ok()),
        Some(_) => Err(ClassifyError::InvalidId {
            field: field.to_string(),
            domain,
        }),
    }
}

fn require_id(args: &mut Fields, field: &str, domain: Domain) -> Result<u64, ClassifyError> {
    take_id(args, field, domain)?.ok_or_else(|| ClassifyError::MissingId {
        field: field.to_string(),
        domain,
    })
}

/// A `null` filter or patch argument means "not supplied".
fn drop_nulls(args: &mut Fields) {
    args.retain(|_, value| !value.is_null());
}

fn reject_extra(args: &Fields, field: &str, domain: Domain) -> Result<(), ClassifyError> {
    match args.keys().next() {
        None => Ok(()),
        Some(extra) => Err(ClassifyError::InvalidArguments {
            field: field.to_string(),
            domain,
            message: format!("unknown argument '{extra}'"),
        }),
    }
}

fn check(
    schema: &EntitySchema,
    args: &Fields,
    mode: ValidationMode,
    field: &str,
) -> Result<(), ClassifyError> {
    schema
        .validate(args, mode)
        .into_result()
        .map_err(|errors| ClassifyError::InvalidArguments {
            field: field.to_string(),
            domain: schema.domain,
            message: errors.join("; "),
        })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn make_service() -> OperationService {
        let config = Arc::new(ServerConfig {
            default_operation_timeout_ms: 5000,
            ..ServerConfig::default()
        });
        OperationService::new(config)
    }

    fn field(name: &str, pairs: &[(&str, Value)]) -> FieldRequest {
        let args = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), v.clone()))
            .collect();
        FieldRequest::new(name, args)
    }

    fn cid() -> Arc<str> {
        Arc::from("corr-1")
    }

    #[test]
    fn table_covers_every_domain() {
        let svc = make_service();
        for domain in Domain::ALL {
            let get = svc.resolver(domain.single_field()).unwrap();
            assert_eq!(get, Resolver { domain, kind: ResolverKind::Get });
            let list = svc.resolver(domain.list_field()).unwrap();
            assert_eq!(list.kind, ResolverKind::List);
            let delete = svc.resolver(&format!("delete{}", domain.type_name())).unwrap();
            assert_eq!(delete.kind, ResolverKind::Delete);
        }
        assert!(svc.resolver("createDragon").is_none());
    }

    #[test]
    fn classify_create_pet() {
        let svc = make_service();
        let request = field("createPet", &[("name", "Rex".into()), ("type", "dog".into())])
            .with_alias("pet");
        let op = svc
            .classify(&request, OperationType::Mutation, &cid())
            .unwrap();

        assert_eq!(op.ctx().service_name, "pet");
        assert_eq!(op.ctx().response_key, "pet");
        assert_eq!(op.ctx().field, "createPet");
        assert_eq!(&*op.ctx().correlation_id, "corr-1");
        assert_eq!(op.ctx().call_timeout_ms, 5000);
        let Operation::Create { id, fields, .. } = op else {
            panic!("expected create");
        };
        assert_eq!(id, None);
        assert_eq!(fields.len(), 2);
    }

    #[test]
    fn call_ids_are_unique() {
        let svc = make_service();
        let request = field("pets", &[]);
        let a = svc.classify(&request, OperationType::Query, &cid()).unwrap();
        let b = svc.classify(&request, OperationType::Query, &cid()).unwrap();
        assert_ne!(a.ctx().call_id, b.ctx().call_id);
    }

    #[test]
    fn create_takes_optional_explicit_id() {
        let svc = make_service();
        let request = field(
            "createVet",
            &[
                ("id", Value::Int(7)),
                ("name", "Dr. Who".into()),
                ("contact_form", "phone".into()),
                ("contact_info", Value::Int(5_551_234)),
            ],
        );
        let op = svc.classify(&request, OperationType::Mutation, &cid()).unwrap();
        assert!(matches!(op, Operation::Create { id: Some(7), .. }));
    }

    #[test]
    fn missing_required_argument_is_rejected() {
        let svc = make_service();
        let request = field("createPet", &[("type", "dog".into())]);
        let err = svc
            .classify(&request, OperationType::Mutation, &cid())
            .unwrap_err();
        assert!(matches!(
            err,
            ClassifyError::InvalidArguments { domain: Domain::Pet, .. }
        ));
        assert_eq!(err.domain_name(), "pet");
    }

    #[test]
    fn wrong_operation_type_is_rejected() {
        let svc = make_service();
        let err = svc
            .classify(&field("pets", &[]), OperationType::Mutation, &cid())
            .unwrap_err();
        assert!(matches!(err, ClassifyError::WrongOperationType { .. }));
    }

    #[test]
    fn unknown_field_reports_request_domain() {
        let svc = make_service();
        let err = svc
            .classify(&field("dragons", &[]), OperationType::Query, &cid())
            .unwrap_err();
        assert_eq!(err, ClassifyError::UnknownField { field: "dragons".to_string() });
        assert_eq!(err.domain_name(), "request");
    }

    #[test]
    fn ids_must_be_positive_integers() {
        let svc = make_service();
        for bad in [Value::Int(0), Value::Int(-3), Value::String("1".into())] {
            let err = svc
                .classify(&field("pet", &[("id", bad)]), OperationType::Query, &cid())
                .unwrap_err();
            assert!(matches!(err, ClassifyError::InvalidId { .. }));
        }
        let err = svc
            .classify(&field("deletePet", &[]), OperationType::Mutation, &cid())
            .unwrap_err();
        assert!(matches!(err, ClassifyError::MissingId { .. }));
    }

    #[test]
    fn get_rejects_extra_arguments() {
        let svc = make_service();
        let request = field("pet", &[("id", Value::Int(1)), ("name", "Rex".into())]);
        let err = svc.classify(&request, OperationType::Query, &cid()).unwrap_err();
        assert!(matches!(err, ClassifyError::InvalidArguments { .. }));
    }

    #[test]
    fn list_accepts_only_filter_fields() {
        let svc = make_service();
        let ok = field("pets", &[("status", "available".into())]);
        assert!(svc.classify(&ok, OperationType::Query, &cid()).is_ok());

        let bad = field("pets", &[("name", "Rex".into())]);
        assert!(svc.classify(&bad, OperationType::Query, &cid()).is_err());
    }

    #[test]
    fn null_arguments_are_not_supplied() {
        let svc = make_service();
        let request = field("pets", &[("status", Value::Null), ("type", "dog".into())]);
        let Operation::List { filter, .. } =
            svc.classify(&request, OperationType::Query, &cid()).unwrap()
        else {
            panic!("expected list");
        };
        assert_eq!(filter.len(), 1);
        assert_eq!(filter.get("type"), Some(&"dog".into()));

        // A required field set to null in a patch is simply left alone.
        let request = field(
            "updatePet",
            &[("id", Value::Int(1)), ("status", Value::Null), ("name", Value::Null)],
        );
        let Operation::Update { fields, .. } =
            svc.classify(&request, OperationType::Mutation, &cid()).unwrap()
        else {
            panic!("expected update");
        };
        assert!(fields.is_empty());
    }

    #[test]
    fn update_is_a_patch() {
        let svc = make_service();
        let request = field("updatePet", &[("id", Value::Int(1)), ("status", "sold".into())]);
        let op = svc.classify(&request, OperationType::Mutation, &cid()).unwrap();
        let Operation::Update { id, fields, .. } = op else {
            panic!("expected update");
        };
        assert_eq!(id, 1);
        assert_eq!(fields.get("status"), Some(&"sold".into()));
    }
}
