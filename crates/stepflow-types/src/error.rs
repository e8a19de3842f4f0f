//! Shared error types for persistence ports.

use thiserror::Error;

/// Errors surfaced by journal repository implementations.
#[derive(Debug, Error)]
pub enum RepositoryError {
    /// The backing store could not be reached or opened.
    #[error("store unavailable: {0}")]
    Unavailable(String),

    /// A query failed to execute.
    #[error("query failed: {0}")]
    Query(String),

    /// The requested row does not exist.
    #[error("entity not found")]
    NotFound,

    /// A uniqueness or state constraint was violated.
    #[error("conflict: {0}")]
    Conflict(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        assert_eq!(
            RepositoryError::Unavailable("no such file".to_string()).to_string(),
            "store unavailable: no such file"
        );
        assert_eq!(RepositoryError::NotFound.to_string(), "entity not found");
        assert_eq!(
            RepositoryError::Conflict("duplicate instance id".to_string()).to_string(),
            "conflict: duplicate instance id"
        );
    }
}
