//! Error types for the simulator daemon.

use thiserror::Error;

/// Simulator errors.
///
/// `NotFound`, `Conflict`, and `Validation` are returned synchronously to the
/// caller and never retried. `Persistence` failures are logged and implicitly
/// retried on the next save cycle without touching in-memory state.
#[derive(Error, Debug)]
pub enum SimError {
    /// Referenced switch, port, or VLAN does not exist
    #[error("not found: {0}")]
    NotFound(String),

    /// Duplicate identity on create
    #[error("conflict: {0}")]
    Conflict(String),

    /// Out-of-range id or invalid enum value
    #[error("validation error: {0}")]
    Validation(String),

    /// Durable write or read failure
    #[error("persistence error: {0}")]
    Persistence(String),

    /// Unexpected internal fault
    #[error("internal error: {0}")]
    Internal(String),
}

impl From<std::io::Error> for SimError {
    fn from(err: std::io::Error) -> Self {
        SimError::Persistence(err.to_string())
    }
}

impl From<serde_json::Error> for SimError {
    fn from(err: serde_json::Error) -> Self {
        SimError::Persistence(err.to_string())
    }
}

/// Result type for simulator operations.
pub type Result<T> = std::result::Result<T, SimError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = SimError::NotFound("switch SW009".to_string());
        assert_eq!(err.to_string(), "not found: switch SW009");

        let err = SimError::Conflict("switch SW001 already exists".to_string());
        assert_eq!(err.to_string(), "conflict: switch SW001 already exists");
    }

    #[test]
    fn test_io_error_maps_to_persistence() {
        let io = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied");
        let err: SimError = io.into();
        assert!(matches!(err, SimError::Persistence(_)));
    }
}
