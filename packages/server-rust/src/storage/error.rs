use petstore_core::Domain;

/// Failure of a single domain store operation.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    #[error("{domain} {id} not found")]
    NotFound { domain: Domain, id: u64 },
    #[error("{domain} {id} already exists")]
    DuplicateId { domain: Domain, id: u64 },
    #[error("invalid {domain}: {message}")]
    ValidationFailed { domain: Domain, message: String },
    /// The store refused the write (fault injection or a closed store).
    #[error("write to {domain} rejected: {reason}")]
    WriteRejected { domain: Domain, reason: String },
    /// A mutation was attempted without holding the guard lock for its id.
    #[error("lock for {domain} {id} not held")]
    LockNotHeld { domain: Domain, id: u64 },
}

impl StoreError {
    /// Domain the failure originated in.
    #[must_use]
    pub fn domain(&self) -> Domain {
        match self {
            StoreError::NotFound { domain, .. }
            | StoreError::DuplicateId { domain, .. }
            | StoreError::ValidationFailed { domain, .. }
            | StoreError::WriteRejected { domain, .. }
            | StoreError::LockNotHeld { domain, .. } => *domain,
        }
    }
}
