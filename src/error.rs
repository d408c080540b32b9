//! Error types for dialplan.

use std::time::Duration;

/// Top-level error type for the service.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),

    #[error("Synthesis error: {0}")]
    Synthesis(#[from] SynthesisError),

    #[error("Telephony error: {0}")]
    Telephony(#[from] TelephonyError),

    #[error("Webhook error: {0}")]
    Webhook(#[from] WebhookError),
}

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required configuration: {key}. {hint}")]
    MissingRequired { key: String, hint: String },

    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Database-related errors.
#[derive(Debug, thiserror::Error)]
pub enum DatabaseError {
    #[error("Connection error: {0}")]
    Pool(String),

    #[error("Query failed: {0}")]
    Query(String),

    #[error("Entity not found: {entity} with id {id}")]
    NotFound { entity: String, id: String },

    #[error("Migration failed: {0}")]
    Migration(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

/// Speech-synthesis provider errors.
#[derive(Debug, thiserror::Error)]
pub enum SynthesisError {
    #[error("Synthesis provider is not configured")]
    Disabled,

    #[error("Synthesis request failed: {reason}")]
    RequestFailed { reason: String },

    #[error("Synthesis timed out after {timeout:?}")]
    Timeout { timeout: Duration },

    #[error("Invalid response from synthesis provider: {reason}")]
    InvalidResponse { reason: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Telephony provider errors.
#[derive(Debug, thiserror::Error)]
pub enum TelephonyError {
    #[error("Telephony credentials are not configured")]
    NotConfigured,

    #[error("Call placement failed: {reason}")]
    RequestFailed { reason: String },

    #[error("Invalid response from telephony provider: {reason}")]
    InvalidResponse { reason: String },
}

/// Outbound webhook delivery errors.
#[derive(Debug, thiserror::Error)]
pub enum WebhookError {
    #[error("Delivery request failed: {reason}")]
    RequestFailed { reason: String },

    #[error("Receiver returned status {status}")]
    Status { status: u16 },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result type alias for the service.
pub type Result<T> = std::result::Result<T, Error>;
