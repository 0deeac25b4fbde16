//! # Core Error Types
//!
//! Domain errors for the pure sync logic. Everything here is a caller
//! mistake or malformed data; no variant is transient.

use thiserror::Error;

/// Result type alias for core operations.
pub type CoreResult<T> = Result<T, CoreError>;

/// Domain error type for the pure sync logic.
#[derive(Debug, Error)]
pub enum CoreError {
    /// An entity payload was not a JSON object.
    #[error("Entity payload must be a JSON object, got {0}")]
    NotAnObject(String),

    /// An entity payload could not be parsed as JSON.
    #[error("Invalid entity JSON: {0}")]
    InvalidJson(String),

    /// Unknown entity kind string.
    #[error("Unknown entity kind: '{0}'. Valid kinds: items, billings, clients, purchase_orders, layaways")]
    UnknownEntityKind(String),

    /// Unknown merge strategy string.
    #[error("Unknown merge strategy: '{0}'. Valid strategies: local, server, smart")]
    UnknownStrategy(String),

    /// Unknown operation string.
    #[error("Unknown operation: '{0}'. Valid operations: create, update")]
    UnknownOperation(String),

    /// A resolution session was addressed with an out-of-range conflict index.
    #[error("Conflict index {index} out of range (session has {len} conflicts)")]
    ConflictIndexOutOfRange { index: usize, len: usize },

    /// A manual resolution targeted a field that does not diverge.
    #[error("Field '{0}' does not differ between local and server versions")]
    FieldNotDivergent(String),
}

impl From<serde_json::Error> for CoreError {
    fn from(err: serde_json::Error) -> Self {
        CoreError::InvalidJson(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = CoreError::ConflictIndexOutOfRange { index: 5, len: 2 };
        assert!(err.to_string().contains('5'));
        assert!(err.to_string().contains('2'));
    }

    #[test]
    fn test_json_error_conversion() {
        let parse_err = serde_json::from_str::<serde_json::Value>("not json").unwrap_err();
        let err: CoreError = parse_err.into();
        assert!(matches!(err, CoreError::InvalidJson(_)));
    }
}
