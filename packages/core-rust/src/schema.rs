//! Entity schemas and field validation.
//!
//! Every domain declares its fields once; resolver arguments and store
//! writes are both checked against the same declaration.

use std::sync::LazyLock;

use regex::Regex;

use crate::types::{Domain, Fields, Value};

static EMAIL_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").expect("email pattern compiles")
});

/// Value kind a field accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    Int,
    String,
    Bool,
    /// A string in `local@domain.tld` form.
    Email,
}

impl FieldKind {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            FieldKind::Int => "integer",
            FieldKind::String => "string",
            FieldKind::Bool => "boolean",
            FieldKind::Email => "email",
        }
    }
}

/// Single field definition within a schema.
#[derive(Debug, Clone, Copy)]
pub struct FieldDef {
    /// Name of the field.
    pub name: &'static str,
    pub kind: FieldKind,
    /// Whether the field must be supplied when a record is created.
    pub required: bool,
    /// Allowed string values. Empty means unrestricted.
    pub allowed: &'static [&'static str],
    /// Inclusive lower bound for integer fields.
    pub min: Option<i64>,
    /// Set at creation only; a patch may not change it.
    pub fixed: bool,
    /// Integer field that, when set, must equal the record's own id.
    pub mirrors_id: bool,
}

impl FieldDef {
    const fn new(name: &'static str, kind: FieldKind) -> Self {
        Self {
            name,
            kind,
            required: false,
            allowed: &[],
            min: None,
            fixed: false,
            mirrors_id: false,
        }
    }

    const fn required(mut self) -> Self {
        self.required = true;
        self
    }

    const fn one_of(mut self, allowed: &'static [&'static str]) -> Self {
        self.allowed = allowed;
        self
    }

    const fn at_least(mut self, min: i64) -> Self {
        self.min = Some(min);
        self
    }

    const fn fixed(mut self) -> Self {
        self.fixed = true;
        self
    }

    const fn mirrors_id(mut self) -> Self {
        self.mirrors_id = true;
        self
    }

    /// Checks one value against this definition, returning a message on failure.
    ///
    /// `null` is accepted for optional fields and rejected for required ones.
    pub fn check(&self, value: &Value) -> Result<(), String> {
        if value.is_null() {
            return if self.required {
                Err(format!("field '{}' must not be null", self.name))
            } else {
                Ok(())
            };
        }

        let type_ok = match self.kind {
            FieldKind::Int => matches!(value, Value::Int(_)),
            FieldKind::String | FieldKind::Email => matches!(value, Value::String(_)),
            FieldKind::Bool => matches!(value, Value::Bool(_)),
        };
        if !type_ok {
            return Err(format!(
                "field '{}' expects {}, got {}",
                self.name,
                self.kind.as_str(),
                value.kind_name()
            ));
        }

        if let (Some(min), Some(n)) = (self.min, value.as_i64()) {
            if n < min {
                return Err(format!("field '{}' must be at least {min}, got {n}", self.name));
            }
        }

        if let Some(s) = value.as_str() {
            if !self.allowed.is_empty() && !self.allowed.contains(&s) {
                return Err(format!(
                    "field '{}' must be one of [{}], got '{s}'",
                    self.name,
                    self.allowed.join(", ")
                ));
            }
            if self.kind == FieldKind::Email && !EMAIL_PATTERN.is_match(s) {
                return Err(format!("field '{}' is not a valid email address", self.name));
            }
        }

        Ok(())
    }
}

/// How a set of fields is being used, which decides the checks applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValidationMode {
    /// Creating a record: required fields must be present.
    Create,
    /// Partially updating a record: every field is optional, fixed fields
    /// are refused.
    Patch,
    /// Filtering a list: only the schema's filter fields are allowed.
    Filter,
}

/// Result of validating a value against a schema.
#[derive(Debug, Clone, PartialEq)]
pub enum ValidationResult {
    /// The value conforms to the schema.
    Valid,
    /// The value violates one or more schema constraints.
    Invalid {
        /// Human-readable descriptions of each validation failure.
        errors: Vec<String>,
    },
}

impl ValidationResult {
    #[must_use]
    pub fn is_valid(&self) -> bool {
        matches!(self, ValidationResult::Valid)
    }

    /// Converts into a `Result`, joining messages for `Invalid`.
    pub fn into_result(self) -> Result<(), Vec<String>> {
        match self {
            ValidationResult::Valid => Ok(()),
            ValidationResult::Invalid { errors } => Err(errors),
        }
    }
}

/// Field declaration for one domain.
#[derive(Debug)]
pub struct EntitySchema {
    pub domain: Domain,
    pub fields: &'static [FieldDef],
    /// Fields accepted as list filters.
    pub filters: &'static [&'static str],
}

const PET_TYPES: &[&str] = &["dog", "cat", "bird", "rabbit"];
const PET_STATUSES: &[&str] = &["available", "sold", "pending"];
const ORDER_STATUSES: &[&str] = &["placed", "available", "sold", "pending"];
const VET_CONTACT_FORMS: &[&str] = &["phone", "email", "website"];
const TRAINER_CONTACT_FORMS: &[&str] = &["phone", "email", "website", "text"];

static PET: EntitySchema = EntitySchema {
    domain: Domain::Pet,
    fields: &[
        FieldDef::new("name", FieldKind::String).required(),
        FieldDef::new("type", FieldKind::String).required().one_of(PET_TYPES),
        FieldDef::new("status", FieldKind::String).one_of(PET_STATUSES),
        FieldDef::new("order_id", FieldKind::Int).at_least(0),
    ],
    filters: &["status", "type"],
};

static ORDER: EntitySchema = EntitySchema {
    domain: Domain::Order,
    fields: &[
        FieldDef::new("inven_id", FieldKind::Int).required().at_least(1).fixed(),
        FieldDef::new("amount_purchase", FieldKind::Int)
            .required()
            .at_least(1)
            .fixed(),
        FieldDef::new("status", FieldKind::String).one_of(ORDER_STATUSES),
    ],
    filters: &["status"],
};

static INVENTORY: EntitySchema = EntitySchema {
    domain: Domain::Inventory,
    fields: &[
        FieldDef::new("inventory", FieldKind::Int).at_least(0),
        FieldDef::new("pet_id", FieldKind::Int).at_least(1).mirrors_id(),
    ],
    filters: &["pet_id"],
};

static CUSTOMER: EntitySchema = EntitySchema {
    domain: Domain::Customer,
    fields: &[
        FieldDef::new("name", FieldKind::String).required(),
        FieldDef::new("date", FieldKind::String).required(),
        FieldDef::new("purchase", FieldKind::Int).required(),
        FieldDef::new("email", FieldKind::Email).required(),
    ],
    filters: &[],
};

static VENDOR: EntitySchema = EntitySchema {
    domain: Domain::Vendor,
    fields: &[
        FieldDef::new("name", FieldKind::String).required(),
        FieldDef::new("contact_form", FieldKind::String)
            .required()
            .one_of(VET_CONTACT_FORMS),
        FieldDef::new("contact_info", FieldKind::String).required(),
        FieldDef::new("point_of_contact", FieldKind::String).required(),
        FieldDef::new("product", FieldKind::Int).required(),
    ],
    filters: &[],
};

static TRAINER: EntitySchema = EntitySchema {
    domain: Domain::Trainer,
    fields: &[
        FieldDef::new("name", FieldKind::String).required(),
        FieldDef::new("contact_form", FieldKind::String)
            .required()
            .one_of(TRAINER_CONTACT_FORMS),
        FieldDef::new("contact_info", FieldKind::Int).required(),
    ],
    filters: &[],
};

static VET: EntitySchema = EntitySchema {
    domain: Domain::Vet,
    fields: &[
        FieldDef::new("name", FieldKind::String).required(),
        FieldDef::new("contact_form", FieldKind::String)
            .required()
            .one_of(VET_CONTACT_FORMS),
        FieldDef::new("contact_info", FieldKind::Int).required(),
    ],
    filters: &[],
};

static EVENT: EntitySchema = EntitySchema {
    domain: Domain::Event,
    fields: &[
        FieldDef::new("name", FieldKind::String).required(),
        FieldDef::new("date", FieldKind::String).required(),
        FieldDef::new("location", FieldKind::Int).required(),
    ],
    filters: &[],
};

impl EntitySchema {
    /// Returns the schema registered for `domain`.
    #[must_use]
    pub fn for_domain(domain: Domain) -> &'static EntitySchema {
        match domain {
            Domain::Pet => &PET,
            Domain::Order => &ORDER,
            Domain::Inventory => &INVENTORY,
            Domain::Customer => &CUSTOMER,
            Domain::Vendor => &VENDOR,
            Domain::Trainer => &TRAINER,
            Domain::Vet => &VET,
            Domain::Event => &EVENT,
        }
    }

    #[must_use]
    pub fn field(&self, name: &str) -> Option<&FieldDef> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// Validates `fields` for the given mode, collecting every failure.
    #[must_use]
    pub fn validate(&self, fields: &Fields, mode: ValidationMode) -> ValidationResult {
        let mut errors = Vec::new();

        for (name, value) in fields {
            let allowed_here = mode != ValidationMode::Filter || self.filters.contains(&name.as_str());
            match self.field(name) {
                Some(def) if allowed_here => {
                    if mode == ValidationMode::Patch && def.fixed {
                        errors.push(format!("field '{name}' cannot be changed"));
                    } else if let Err(e) = def.check(value) {
                        errors.push(e);
                    }
                }
                _ => errors.push(format!(
                    "unknown field '{name}' for {}",
                    self.domain.as_str()
                )),
            }
        }

        if mode == ValidationMode::Create {
            for def in self.fields.iter().filter(|f| f.required) {
                if !fields.contains_key(def.name) {
                    errors.push(format!("missing required field '{}'", def.name));
                }
            }
        }

        if errors.is_empty() {
            ValidationResult::Valid
        } else {
            ValidationResult::Invalid { errors }
        }
    }

    /// Checks fields that must repeat the record's own id.
    ///
    /// # Errors
    ///
    /// One message per field whose value is set and differs from `id`.
    pub fn check_id_links(&self, id: u64, fields: &Fields) -> Result<(), Vec<String>> {
        let errors: Vec<String> = self
            .fields
            .iter()
            .filter(|def| def.mirrors_id)
            .filter_map(|def| {
                let value = fields.get(def.name).and_then(Value::as_i64)?;
                (u64::try_from(value).ok() != Some(id)).then(|| {
                    format!(
                        "field '{}' must equal the {} id {id}, got {value}",
                        def.name,
                        self.domain.as_str()
                    )
                })
            })
            .collect();
        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }

    /// Fills creation defaults for fields the caller left out or set to null.
    pub fn apply_defaults(&self, fields: &mut Fields) {
        for (name, value) in self.defaults() {
            let slot = fields.entry(name.to_string()).or_insert(Value::Null);
            if slot.is_null() {
                *slot = value;
            }
        }
    }

    fn defaults(&self) -> Vec<(&'static str, Value)> {
        match self.domain {
            Domain::Pet => vec![("status", Value::from("available")), ("order_id", Value::Int(0))],
            Domain::Order => vec![("status", Value::from("placed"))],
            _ => Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fields(pairs: &[(&str, Value)]) -> Fields {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn pet_create_requires_name_and_type() {
        let schema = EntitySchema::for_domain(Domain::Pet);
        let result = schema.validate(&fields(&[("name", "Rex".into())]), ValidationMode::Create);
        let errors = result.into_result().unwrap_err();
        assert_eq!(errors, vec!["missing required field 'type'".to_string()]);
    }

    #[test]
    fn pet_type_must_be_allowed() {
        let schema = EntitySchema::for_domain(Domain::Pet);
        let result = schema.validate(
            &fields(&[("name", "Rex".into()), ("type", "dragon".into())]),
            ValidationMode::Create,
        );
        assert!(!result.is_valid());
    }

    #[test]
    fn patch_accepts_partial_fields() {
        let schema = EntitySchema::for_domain(Domain::Pet);
        let result = schema.validate(&fields(&[("status", "sold".into())]), ValidationMode::Patch);
        assert!(result.is_valid());
    }

    #[test]
    fn wrong_type_is_reported() {
        let schema = EntitySchema::for_domain(Domain::Order);
        let result = schema.validate(
            &fields(&[("inven_id", "one".into()), ("amount_purchase", Value::Int(1))]),
            ValidationMode::Create,
        );
        let errors = result.into_result().unwrap_err();
        assert_eq!(errors, vec!["field 'inven_id' expects integer, got string".to_string()]);
    }

    #[test]
    fn minimum_is_enforced() {
        let schema = EntitySchema::for_domain(Domain::Order);
        let result = schema.validate(
            &fields(&[("inven_id", Value::Int(1)), ("amount_purchase", Value::Int(0))]),
            ValidationMode::Create,
        );
        assert!(!result.is_valid());
    }

    #[test]
    fn unknown_field_is_rejected() {
        let schema = EntitySchema::for_domain(Domain::Vet);
        let result = schema.validate(&fields(&[("wings", Value::Int(2))]), ValidationMode::Patch);
        assert!(!result.is_valid());
    }

    #[test]
    fn filter_mode_only_allows_filter_fields() {
        let schema = EntitySchema::for_domain(Domain::Pet);
        assert!(schema
            .validate(&fields(&[("status", "sold".into())]), ValidationMode::Filter)
            .is_valid());
        assert!(!schema
            .validate(&fields(&[("name", "Rex".into())]), ValidationMode::Filter)
            .is_valid());
    }

    #[test]
    fn email_format_is_checked() {
        let def = EntitySchema::for_domain(Domain::Customer).field("email").unwrap();
        assert!(def.check(&"ana@example.com".into()).is_ok());
        assert!(def.check(&"not-an-email".into()).is_err());
    }

    #[test]
    fn required_field_rejects_null() {
        let def = EntitySchema::for_domain(Domain::Pet).field("name").unwrap();
        assert!(def.check(&Value::Null).is_err());
        let optional = EntitySchema::for_domain(Domain::Pet).field("status").unwrap();
        assert!(optional.check(&Value::Null).is_ok());
    }

    #[test]
    fn fixed_fields_are_refused_in_patches() {
        let schema = EntitySchema::for_domain(Domain::Order);
        let errors = schema
            .validate(&fields(&[("inven_id", Value::Int(2))]), ValidationMode::Patch)
            .into_result()
            .unwrap_err();
        assert_eq!(errors, vec!["field 'inven_id' cannot be changed".to_string()]);
        assert!(schema
            .validate(&fields(&[("status", "sold".into())]), ValidationMode::Patch)
            .is_valid());
    }

    #[test]
    fn inventory_pet_id_mirrors_record_id() {
        let schema = EntitySchema::for_domain(Domain::Inventory);
        assert!(schema.check_id_links(3, &fields(&[("pet_id", Value::Int(3))])).is_ok());
        assert!(schema.check_id_links(3, &fields(&[("inventory", Value::Int(9))])).is_ok());
        let errors = schema
            .check_id_links(3, &fields(&[("pet_id", Value::Int(4))]))
            .unwrap_err();
        assert_eq!(errors, vec!["field 'pet_id' must equal the inventory id 3, got 4".to_string()]);
    }

    #[test]
    fn defaults_fill_missing_and_null_fields() {
        let schema = EntitySchema::for_domain(Domain::Pet);
        let mut f = fields(&[("name", "Rex".into()), ("status", Value::Null)]);
        schema.apply_defaults(&mut f);
        assert_eq!(f["status"], Value::from("available"));
        assert_eq!(f["order_id"], Value::Int(0));

        let mut order = Fields::new();
        EntitySchema::for_domain(Domain::Order).apply_defaults(&mut order);
        assert_eq!(order["status"], Value::from("placed"));
    }

    mod properties {
        use proptest::prelude::*;

        use super::*;

        fn pet_status() -> impl Strategy<Value = String> {
            prop_oneof![
                proptest::sample::select(PET_STATUSES).prop_map(str::to_string),
                "[a-z]{1,10}",
            ]
        }

        proptest! {
            #[test]
            fn pet_status_patch_valid_iff_allowed(status in pet_status()) {
                let schema = EntitySchema::for_domain(Domain::Pet);
                let result = schema.validate(
                    &fields(&[("status", Value::from(status.as_str()))]),
                    ValidationMode::Patch,
                );
                prop_assert_eq!(result.is_valid(), PET_STATUSES.contains(&status.as_str()));
            }

            #[test]
            fn create_reports_each_missing_required_field(
                keep in proptest::collection::vec(any::<bool>(), 3),
            ) {
                let schema = EntitySchema::for_domain(Domain::Event);
                let supplied = [
                    ("name", Value::from("Adoption day")),
                    ("date", Value::from("2024-05-01")),
                    ("location", Value::Int(12)),
                ];
                let present: Fields = supplied
                    .iter()
                    .zip(&keep)
                    .filter(|(_, keep)| **keep)
                    .map(|((k, v), _)| ((*k).to_string(), v.clone()))
                    .collect();
                let missing = keep.iter().filter(|k| !**k).count();

                match schema.validate(&present, ValidationMode::Create).into_result() {
                    Ok(()) => prop_assert_eq!(missing, 0),
                    Err(errors) => prop_assert_eq!(errors.len(), missing),
                }
            }

            #[test]
            fn minimum_bounds_integer_fields(amount in -5i64..5) {
                let schema = EntitySchema::for_domain(Domain::Order);
                let result = schema.validate(
                    &fields(&[("inven_id", Value::Int(1)), ("amount_purchase", Value::Int(amount))]),
                    ValidationMode::Create,
                );
                prop_assert_eq!(result.is_valid(), amount >= 1);
            }
        }
    }
}
