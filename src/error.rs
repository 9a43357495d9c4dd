//! Error types for the offline download core
//!
//! This module defines error types using thiserror for ergonomic error handling.
//! Errors are grouped by concern (coordinator, storage, filesystem, transfer)
//! so callers can decide between surfacing, retrying, or ignoring them.
//!
//! Network and content-validation failures of individual transfers never reach
//! callers of `download()` through this type. The coordinator absorbs them and
//! raises a `TrackFailed` event instead; see [`crate::download::events`].

use crate::download::agent::TransferError;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, OfflineError>;

#[derive(Error, Debug)]
pub enum OfflineError {
    // ===== Coordinator Errors =====

    /// The coordinator task has stopped and no longer accepts commands
    #[error("Download coordinator is not running")]
    CoordinatorStopped,

    /// The state store and the coordinator disagree about a track.
    /// This is a programming error, not a runtime condition.
    #[error("Invariant violation: {0}")]
    InvariantViolation(String),

    // ===== Storage Errors =====

    /// A persisted row could not be decoded
    #[error("Invalid data: {0}")]
    InvalidData(String),

    #[error("Database migration failed: {0}")]
    MigrationFailed(String),

    // ===== File System Errors =====

    #[error("File not found: {0}")]
    FileNotFound(String),

    #[error("File I/O error: {0}")]
    FileIoError(String),

    // ===== Transfer Errors =====

    /// Error reported by a transfer agent outside of the completion channel
    #[error("Transfer error: {0}")]
    Transfer(#[from] TransferError),

    // ===== Validation / Configuration Errors =====

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Configuration error: {0}")]
    ConfigurationError(String),

    // ===== External Library Errors =====
    // Automatic conversions from external error types

    /// HTTP client error from reqwest
    #[error("HTTP client error: {0}")]
    ReqwestError(#[from] reqwest::Error),

    /// JSON serialization/deserialization error
    #[error("JSON serialization error: {0}")]
    SerdeJsonError(#[from] serde_json::Error),

    /// Database driver error from sqlx
    #[error("Database error: {0}")]
    SqlxError(#[from] sqlx::Error),

    /// Standard I/O error
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),
}

impl From<uuid::Error> for OfflineError {
    fn from(err: uuid::Error) -> Self {
        OfflineError::InvalidData(format!("Failed to parse identifier: {}", err))
    }
}

impl From<url::ParseError> for OfflineError {
    fn from(err: url::ParseError) -> Self {
        OfflineError::InvalidInput(format!("Failed to parse URL: {}", err))
    }
}

impl From<chrono::ParseError> for OfflineError {
    fn from(err: chrono::ParseError) -> Self {
        OfflineError::InvalidData(format!("Failed to parse timestamp: {}", err))
    }
}

// Helper methods for creating common errors
impl OfflineError {
    /// Create an InvariantViolation error with a message
    pub fn invariant<S: Into<String>>(message: S) -> Self {
        OfflineError::InvariantViolation(message.into())
    }

    /// Check if error is retryable
    ///
    /// Returns `true` for transient conditions that might succeed on retry:
    /// - Transient network failures reported by a transfer agent
    /// - Busy/locked database errors
    pub fn is_retryable(&self) -> bool {
        match self {
            OfflineError::Transfer(err) => err.is_transient(),
            OfflineError::SqlxError(sqlx::Error::PoolTimedOut) => true,
            OfflineError::ReqwestError(err) => err.is_timeout() || err.is_connect(),
            _ => false,
        }
    }

    /// Check if error is related to file/disk operations
    pub fn is_file_error(&self) -> bool {
        matches!(
            self,
            OfflineError::FileNotFound(_)
                | OfflineError::FileIoError(_)
                | OfflineError::IoError(_)
        )
    }

    /// Get user-friendly error message suitable for display
    pub fn user_message(&self) -> String {
        match self {
            OfflineError::CoordinatorStopped => {
                "Offline downloads are not available right now. Please restart the app.".to_string()
            }
            OfflineError::FileNotFound(path) => {
                format!("The downloaded file could not be found: {}", path)
            }
            OfflineError::IoError(_) | OfflineError::FileIoError(_) => {
                "Could not access offline storage. Check available disk space.".to_string()
            }
            OfflineError::Transfer(err) if err.is_transient() => {
                "Network connection problem. Please try again.".to_string()
            }
            _ => self.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_transfer_is_retryable() {
        let err: OfflineError = TransferError::Network {
            message: "connection reset".to_string(),
            transient: true,
        }
        .into();
        assert!(err.is_retryable());

        let err: OfflineError = TransferError::Network {
            message: "404".to_string(),
            transient: false,
        }
        .into();
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_file_error_classification() {
        assert!(OfflineError::FileNotFound("a.mp3".into()).is_file_error());
        assert!(!OfflineError::CoordinatorStopped.is_file_error());
    }

    #[test]
    fn test_user_message() {
        assert_eq!(
            OfflineError::CoordinatorStopped.user_message(),
            "Offline downloads are not available right now. Please restart the app."
        );

        let err = OfflineError::invariant("track 1 is queued");
        assert!(matches!(err, OfflineError::InvariantViolation(_)));
        assert_eq!(err.user_message(), "Invariant violation: track 1 is queued");
    }

    #[test]
    fn test_uuid_parse_error_maps_to_invalid_data() {
        let err: OfflineError = uuid::Uuid::parse_str("not-a-uuid").unwrap_err().into();
        assert!(matches!(err, OfflineError::InvalidData(_)));
    }
}
