//! Error types for CHRONICLE operations

use thiserror::Error;

/// Cache store errors.
///
/// These are never masked by the cache: there is no secondary store to fall
/// back to, so a failing store fails the call that touched it.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StoreError {
    #[error("Store {store} unavailable: {reason}")]
    Unavailable { store: String, reason: String },

    #[error("Store {store} has been shut down")]
    ShutDown { store: String },
}

/// Errors raised by an underlying series source.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SourceError {
    #[error("Fetch failed: {reason}")]
    FetchFailed { reason: String },

    #[error("Operation not supported by source: {operation}")]
    Unsupported { operation: String },
}

/// Configuration errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Invalid value for {field}: {value} - {reason}")]
    InvalidValue {
        field: String,
        value: String,
        reason: String,
    },
}

/// Validation errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Required field missing: {field}")]
    RequiredFieldMissing { field: String },

    #[error("Invalid value for {field}: {reason}")]
    InvalidValue { field: String, reason: String },
}

/// Master error type for all CHRONICLE errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ChronicleError {
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Source error: {0}")]
    Source(#[from] SourceError),

    #[error("Config error: {0}")]
    Config(#[from] ConfigError),

    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),
}

/// Result type alias for CHRONICLE operations.
pub type ChronicleResult<T> = Result<T, ChronicleError>;

/// Result type alias for constructors that only validate their input.
pub type ValidationResult<T> = Result<T, ValidationError>;

// =============================================================================
// TESTS
// =============================================================================
