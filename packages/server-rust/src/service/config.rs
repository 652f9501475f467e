/// Server-level configuration for the operation pipeline.
///
/// Controls per-field timeouts and the concurrency limit.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Timeout applied to each resolved field, in milliseconds. 0 disables it.
    pub default_operation_timeout_ms: u64,
    /// Maximum number of concurrently executing fields before load shedding.
    pub max_concurrent_operations: u32,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            default_operation_timeout_ms: 30_000,
            max_concurrent_operations: 1000,
        }
    }
}
