//! # Sync Error Types
//!
//! Error taxonomy for the sync engine.
//!
//! ## Error Categories
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                       Sync Error Categories                             │
//! │                                                                         │
//! │  ┌─────────────────┐  ┌─────────────────┐  ┌─────────────────────────┐ │
//! │  │  Connectivity   │  │     Remote      │  │     Configuration       │ │
//! │  │                 │  │                 │  │                         │ │
//! │  │  ConnectionFail │  │  Validation 4xx │  │  InvalidConfig          │ │
//! │  │  Timeout        │  │  AuthRequired   │  │  InvalidUrl             │ │
//! │  │  Offline        │  │  ServerError 5xx│  │  ConfigLoad/SaveFailed  │ │
//! │  └─────────────────┘  └─────────────────┘  └─────────────────────────┘ │
//! │                                                                         │
//! │  Recovery policy (by category):                                        │
//! │  • connectivity  → fall back to cache / queue, retry next cycle        │
//! │  • validation    → surface to caller, never retried                    │
//! │  • auth          → external token-refresh flow owns it, never retried  │
//! │  • server 5xx    → retried up to the bound, then left queued           │
//! │                                                                         │
//! │  No failure here is fatal to the host application: everything          │
//! │  degrades to "stay queued / stay offline".                             │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use thiserror::Error;

use vela_core::CoreError;
use vela_store::StoreError;

/// Result type alias for sync operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Sync error type covering all sync-engine failures.
#[derive(Debug, Error)]
pub enum SyncError {
    // =========================================================================
    // Configuration Errors
    // =========================================================================
    /// Invalid sync configuration.
    #[error("Invalid sync configuration: {0}")]
    InvalidConfig(String),

    /// Invalid API or probe URL.
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    /// Failed to load config file.
    #[error("Failed to load config: {0}")]
    ConfigLoadFailed(String),

    /// Failed to save config file.
    #[error("Failed to save config: {0}")]
    ConfigSaveFailed(String),

    // =========================================================================
    // Connectivity Errors
    // =========================================================================
    /// Network-level failure reaching the backend.
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// Request timed out.
    #[error("Request timed out")]
    Timeout,

    /// Operation requires connectivity and the monitor reports offline.
    #[error("Network is offline")]
    Offline,

    // =========================================================================
    // Remote Errors
    // =========================================================================
    /// The server rejected the payload (4xx). Surfaced to the caller,
    /// never retried - the payload will not get better on its own.
    #[error("Request rejected by server (HTTP {status}): {message}")]
    Validation { status: u16, message: String },

    /// 401 from the server. The external token-refresh interceptor owns
    /// recovery; this layer must not retry past it.
    #[error("Authentication required")]
    AuthRequired,

    /// Transient server failure (5xx).
    #[error("Server error (HTTP {status})")]
    ServerError { status: u16 },

    /// The server answered with a success code the endpoint contract does
    /// not use (e.g. create acknowledged with something other than 201).
    #[error("Unexpected status: expected HTTP {expected}, got HTTP {actual}")]
    UnexpectedStatus { expected: u16, actual: u16 },

    // =========================================================================
    // Data Errors
    // =========================================================================
    /// Failed to serialize or deserialize a payload.
    #[error("Serialization failed: {0}")]
    Serialization(String),

    // =========================================================================
    // Passthrough
    // =========================================================================
    /// Local store failure.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// Domain-level failure from the merge logic.
    #[error(transparent)]
    Core(#[from] CoreError),

    // =========================================================================
    // Internal Errors
    // =========================================================================
    /// Internal invariant violation.
    #[error("Internal error: {0}")]
    Internal(String),

    /// The engine has been stopped and cannot serve this call.
    #[error("Sync engine is shut down")]
    ShuttingDown,
}

// =============================================================================
// Error Conversions
// =============================================================================

impl From<reqwest::Error> for SyncError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            SyncError::Timeout
        } else if err.is_decode() {
            SyncError::Serialization(err.to_string())
        } else {
            SyncError::ConnectionFailed(err.to_string())
        }
    }
}

impl From<serde_json::Error> for SyncError {
    fn from(err: serde_json::Error) -> Self {
        SyncError::Serialization(err.to_string())
    }
}

impl From<url::ParseError> for SyncError {
    fn from(err: url::ParseError) -> Self {
        SyncError::InvalidUrl(err.to_string())
    }
}

impl From<std::io::Error> for SyncError {
    fn from(err: std::io::Error) -> Self {
        SyncError::ConfigLoadFailed(err.to_string())
    }
}

impl From<toml::de::Error> for SyncError {
    fn from(err: toml::de::Error) -> Self {
        SyncError::ConfigLoadFailed(err.to_string())
    }
}

impl From<toml::ser::Error> for SyncError {
    fn from(err: toml::ser::Error) -> Self {
        SyncError::ConfigSaveFailed(err.to_string())
    }
}

// =============================================================================
// Error Categorization (drives the retry policy)
// =============================================================================

impl SyncError {
    /// True if retrying the same operation could succeed.
    ///
    /// Validation and auth failures are deterministic: the request will
    /// fail the same way until something outside this layer changes.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            SyncError::ConnectionFailed(_)
                | SyncError::Timeout
                | SyncError::Offline
                | SyncError::ServerError { .. }
                | SyncError::UnexpectedStatus { .. }
        )
    }

    /// True if this error indicates a configuration problem.
    pub fn is_config_error(&self) -> bool {
        matches!(
            self,
            SyncError::InvalidConfig(_)
                | SyncError::InvalidUrl(_)
                | SyncError::ConfigLoadFailed(_)
                | SyncError::ConfigSaveFailed(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_errors() {
        assert!(SyncError::ConnectionFailed("refused".into()).is_retryable());
        assert!(SyncError::Timeout.is_retryable());
        assert!(SyncError::ServerError { status: 503 }.is_retryable());
        assert!(SyncError::UnexpectedStatus { expected: 201, actual: 200 }.is_retryable());

        assert!(!SyncError::AuthRequired.is_retryable());
        assert!(!SyncError::Validation { status: 422, message: "bad".into() }.is_retryable());
        assert!(!SyncError::InvalidConfig("oops".into()).is_retryable());
    }

    #[test]
    fn test_config_errors() {
        assert!(SyncError::InvalidUrl("not a url".into()).is_config_error());
        assert!(!SyncError::Timeout.is_config_error());
    }

    #[test]
    fn test_validation_display_carries_status() {
        let err = SyncError::Validation { status: 400, message: "price required".into() };
        assert!(err.to_string().contains("400"));
        assert!(err.to_string().contains("price required"));
    }
}
