use std::fmt;
use std::time::Instant;

use serde::{Deserialize, Serialize};

/// Whether an inbound operation reads or mutates state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationType {
    #[default]
    Query,
    Mutation,
}

impl OperationType {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            OperationType::Query => "query",
            OperationType::Mutation => "mutation",
        }
    }
}

impl fmt::Display for OperationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-request tracing context, created when an operation arrives and
/// discarded once its response has been emitted.
#[derive(Debug, Clone)]
pub struct CorrelationContext {
    /// Opaque token echoed on the response and in every derived event.
    pub correlation_id: String,
    /// Operation name supplied by the caller, or `anonymous`.
    pub operation_name: String,
    pub operation_type: OperationType,
    /// Monotonic start of dispatch, used for elapsed-time reporting.
    pub started_at: Instant,
}

impl CorrelationContext {
    #[must_use]
    pub fn new(
        correlation_id: impl Into<String>,
        operation_name: impl Into<String>,
        operation_type: OperationType,
    ) -> Self {
        Self {
            correlation_id: correlation_id.into(),
            operation_name: operation_name.into(),
            operation_type,
            started_at: Instant::now(),
        }
    }

    /// Whole milliseconds since dispatch entry.
    #[must_use]
    pub fn elapsed_ms(&self) -> u64 {
        u64::try_from(self.started_at.elapsed().as_millis()).unwrap_or(u64::MAX)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn operation_type_serializes_lowercase() {
        assert_eq!(serde_json::to_string(&OperationType::Mutation).unwrap(), "\"mutation\"");
        let parsed: OperationType = serde_json::from_str("\"query\"").unwrap();
        assert_eq!(parsed, OperationType::Query);
    }

    #[test]
    fn elapsed_is_monotonic() {
        let ctx = CorrelationContext::new("abc", "GetPets", OperationType::Query);
        let first = ctx.elapsed_ms();
        let second = ctx.elapsed_ms();
        assert!(second >= first);
    }
}
