//! Unified error hierarchy for rehabrs
//!
//! The analytics calculators never fail on missing data; errors only come
//! from the store contracts, configuration and IO around them.

use thiserror::Error;

use crate::models::RecordId;

/// Top-level error type for all rehabrs operations
#[derive(Debug, Error)]
pub enum RehabError {
    /// Log Store errors
    #[error("Log store error: {0}")]
    Store(#[from] StoreError),

    /// Preference Store errors
    #[error("Preference store error: {0}")]
    Preferences(#[from] PreferenceError),

    /// Record validation errors
    #[error("Validation error: {0}")]
    Validation(String),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Generic internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Log Store errors
#[derive(Debug, Error)]
pub enum StoreError {
    /// No record with the given id
    #[error("Record not found: {id}")]
    NotFound { id: RecordId },

    /// Patch tried to change a field that is fixed at creation time
    #[error("Field '{field}' cannot be updated")]
    ImmutableField { field: String },

    /// Record failed validation on the way in
    #[error("Invalid record: {reason}")]
    InvalidRecord { reason: String },

    /// Payload (de)serialization failed
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// SQLite backend error
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// Store lock was poisoned by a panicking writer
    #[error("Store lock poisoned")]
    Poisoned,
}

/// Preference Store errors
#[derive(Debug, Error)]
pub enum PreferenceError {
    /// Backing file could not be read or written
    #[error("Preference IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Stored preferences could not be parsed
    #[error("Preference serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result type alias for rehabrs operations
pub type Result<T> = std::result::Result<T, RehabError>;

impl RehabError {
    /// Check if error is retryable
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            RehabError::Store(StoreError::Sqlite(_))
                | RehabError::Preferences(PreferenceError::Io(_))
                | RehabError::Io(_)
        )
    }

    /// Get error severity level
    pub fn severity(&self) -> ErrorSeverity {
        match self {
            RehabError::Store(StoreError::NotFound { .. }) => ErrorSeverity::Warning,
            RehabError::Store(StoreError::ImmutableField { .. }) => ErrorSeverity::Warning,
            RehabError::Store(StoreError::InvalidRecord { .. }) => ErrorSeverity::Warning,
            RehabError::Validation(_) => ErrorSeverity::Warning,
            RehabError::Preferences(_) => ErrorSeverity::Warning,
            RehabError::Store(_) => ErrorSeverity::Error,
            RehabError::Internal(_) => ErrorSeverity::Critical,
            _ => ErrorSeverity::Error,
        }
    }

    /// Get user-friendly error message
    pub fn user_message(&self) -> String {
        match self {
            RehabError::Store(StoreError::NotFound { id }) => {
                format!("No log entry with id {}", id)
            }
            RehabError::Store(StoreError::ImmutableField { field }) => {
                format!("The {} of a log entry cannot be changed once recorded", field)
            }
            RehabError::Store(StoreError::Sqlite(_)) => {
                "Unable to read the log database. Please check your configuration.".to_string()
            }
            RehabError::Preferences(_) => {
                "Your progress could not be saved; it is kept for this session only.".to_string()
            }
            _ => self.to_string(),
        }
    }
}

/// Error severity levels
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorSeverity {
    /// Critical system error requiring immediate attention
    Critical,
    /// Error that prevents operation but system can continue
    Error,
    /// Warning that doesn't prevent operation
    Warning,
    /// Informational message
    Info,
}

impl ErrorSeverity {
    /// Convert to tracing level
    pub fn to_tracing_level(&self) -> tracing::Level {
        match self {
            ErrorSeverity::Critical => tracing::Level::ERROR,
            ErrorSeverity::Error => tracing::Level::ERROR,
            ErrorSeverity::Warning => tracing::Level::WARN,
            ErrorSeverity::Info => tracing::Level::INFO,
        }
    }
}
