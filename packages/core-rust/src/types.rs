use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Named field values of a record or of a resolver's arguments.
///
/// `BTreeMap` keeps rendering and comparison deterministic.
pub type Fields = BTreeMap<String, Value>;

/// Generic runtime value type for record fields and resolver arguments.
///
/// Supports all JSON-compatible types. Serialized untagged so that it
/// round-trips plain JSON on the wire: `5` is an `Int`, `5.5` a `Float`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    /// JSON null.
    Null,
    /// JSON boolean.
    Bool(bool),
    /// JSON integer (signed 64-bit).
    Int(i64),
    /// JSON floating-point (64-bit IEEE 754).
    Float(f64),
    /// JSON string (UTF-8).
    String(String),
    /// JSON array (ordered sequence of values).
    Array(Vec<Value>),
    /// JSON object. Uses `BTreeMap` for deterministic serialization order.
    Map(BTreeMap<String, Value>),
}

impl Value {
    /// Short type name used in validation messages.
    #[must_use]
    pub fn kind_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "boolean",
            Value::Int(_) => "integer",
            Value::Float(_) => "float",
            Value::String(_) => "string",
            Value::Array(_) => "array",
            Value::Map(_) => "object",
        }
    }

    #[must_use]
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int(n) => Some(*n),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    #[must_use]
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Value::Int(n)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

impl From<Fields> for Value {
    fn from(map: Fields) -> Self {
        Value::Map(map)
    }
}

/// Entity types served by the petstore, one domain store each.
///
/// The declaration order is the global lock rank: multi-record operations
/// acquire per-record locks sorted by `(domain, id)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Domain {
    Pet,
    Order,
    Inventory,
    Customer,
    Vendor,
    Trainer,
    Vet,
    Event,
}

impl Domain {
    /// Every domain, in lock-rank order.
    pub const ALL: [Domain; 8] = [
        Domain::Pet,
        Domain::Order,
        Domain::Inventory,
        Domain::Customer,
        Domain::Vendor,
        Domain::Trainer,
        Domain::Vet,
        Domain::Event,
    ];

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Domain::Pet => "pet",
            Domain::Order => "order",
            Domain::Inventory => "inventory",
            Domain::Customer => "customer",
            Domain::Vendor => "vendor",
            Domain::Trainer => "trainer",
            Domain::Vet => "vet",
            Domain::Event => "event",
        }
    }

    /// Query field that fetches a single record by id.
    #[must_use]
    pub fn single_field(self) -> &'static str {
        match self {
            Domain::Inventory => "inventoryItem",
            other => other.as_str(),
        }
    }

    /// Query field that lists records, optionally filtered.
    #[must_use]
    pub fn list_field(self) -> &'static str {
        match self {
            Domain::Pet => "pets",
            Domain::Order => "orders",
            Domain::Inventory => "inventory",
            Domain::Customer => "customers",
            Domain::Vendor => "vendors",
            Domain::Trainer => "trainers",
            Domain::Vet => "vets",
            Domain::Event => "events",
        }
    }

    /// Type name used to build mutation field names (`createPet`, ...).
    #[must_use]
    pub fn type_name(self) -> &'static str {
        match self {
            Domain::Pet => "Pet",
            Domain::Order => "Order",
            Domain::Inventory => "Inventory",
            Domain::Customer => "Customer",
            Domain::Vendor => "Vendor",
            Domain::Trainer => "Trainer",
            Domain::Vet => "Vet",
            Domain::Event => "Event",
        }
    }
}

impl fmt::Display for Domain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Returned when a string names no known domain.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown domain: {0}")]
pub struct UnknownDomain(pub String);

impl FromStr for Domain {
    type Err = UnknownDomain;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Domain::ALL
            .into_iter()
            .find(|d| d.as_str() == s)
            .ok_or_else(|| UnknownDomain(s.to_string()))
    }
}

/// A single stored entity.
///
/// The id is unique within its domain and never changes after creation;
/// `fields` never contains an `id` key.
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    pub id: u64,
    pub domain: Domain,
    pub fields: Fields,
}

impl Record {
    #[must_use]
    pub fn new(domain: Domain, id: u64, fields: Fields) -> Self {
        Self { id, domain, fields }
    }

    #[must_use]
    pub fn field(&self, name: &str) -> Option<&Value> {
        self.fields.get(name)
    }

    /// Renders the record as the object returned to callers: `id` plus fields.
    #[must_use]
    pub fn to_value(&self) -> Value {
        let mut map = self.fields.clone();
        map.insert("id".to_string(), Value::Int(id_to_i64(self.id)));
        Value::Map(map)
    }
}

/// Converts a record id into the wire integer type, saturating at `i64::MAX`.
#[must_use]
pub fn id_to_i64(id: u64) -> i64 {
    i64::try_from(id).unwrap_or(i64::MAX)
}
