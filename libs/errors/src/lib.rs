//! Unified error handling for the point server
//!
//! Every crate in the workspace reports failures through [`PointError`]. The
//! variants follow the taxonomy the polling engine acts on:
//!
//! - connection errors put the owning network at fault
//! - protocol errors put the owning device at fault
//! - validation errors are rejected at the data-model boundary
//! - sync errors are logged and dropped

use thiserror::Error;

// ============================================================================
// PointError - Main error type
// ============================================================================

/// Main error type for the point server
#[derive(Debug, Error)]
pub enum PointError {
    // ======================================
    // Configuration Errors
    // ======================================
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Invalid configuration: {field}: {reason}")]
    InvalidConfig { field: String, reason: String },

    // ======================================
    // Data Model Errors
    // ======================================
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Not found: {resource}")]
    NotFound { resource: String },

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Invalid expression: {expression}: {error}")]
    InvalidExpression { expression: String, error: String },

    // ======================================
    // Database Errors
    // ======================================
    #[error("Database error: {0}")]
    Database(String),

    #[error("SQLite error: {0}")]
    Sqlite(#[from] sqlx::Error),

    // ======================================
    // Protocol & Communication Errors
    // ======================================
    #[error("Connection failed: {endpoint}: {reason}")]
    Connection { endpoint: String, reason: String },

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Timeout waiting for response from {0}")]
    Timeout(String),

    // ======================================
    // Sync & Publish Errors
    // ======================================
    #[error("HTTP client error: {0}")]
    HttpClient(#[from] reqwest::Error),

    #[error("Gateway error: {path}: status {status}")]
    Gateway { path: String, status: u16 },

    #[error("MQTT error: {0}")]
    Mqtt(String),

    #[error("Sync error: {0}")]
    Sync(String),

    // ======================================
    // System Errors
    // ======================================
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type alias using PointError
pub type PointResult<T> = Result<T, PointError>;

impl PointError {
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }

    pub fn invalid_config(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidConfig {
            field: field.into(),
            reason: reason.into(),
        }
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn not_found(resource: impl Into<String>) -> Self {
        Self::NotFound {
            resource: resource.into(),
        }
    }

    pub fn conflict(msg: impl Into<String>) -> Self {
        Self::Conflict(msg.into())
    }

    pub fn connection(endpoint: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Connection {
            endpoint: endpoint.into(),
            reason: reason.into(),
        }
    }

    pub fn protocol(msg: impl Into<String>) -> Self {
        Self::Protocol(msg.into())
    }

    pub fn timeout(target: impl Into<String>) -> Self {
        Self::Timeout(target.into())
    }

    pub fn sync(msg: impl Into<String>) -> Self {
        Self::Sync(msg.into())
    }

    pub fn mqtt(msg: impl Into<String>) -> Self {
        Self::Mqtt(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// Transport is unreachable or broken; the owning network goes to fault.
    pub fn is_connection(&self) -> bool {
        matches!(self, Self::Connection { .. })
    }

    /// The device answered badly or not at all; the owning device goes to fault.
    pub fn is_protocol(&self) -> bool {
        matches!(self, Self::Protocol(_) | Self::Timeout(_))
    }

    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            Self::Validation(_) | Self::InvalidExpression { .. } | Self::Conflict(_)
        )
    }

    /// Check if this error is retryable
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Connection { .. }
                | Self::Timeout(_)
                | Self::HttpClient(_)
                | Self::Gateway { .. }
                | Self::Mqtt(_)
        )
    }

    /// Get the HTTP status code the resource layer should answer with
    pub fn status_code(&self) -> u16 {
        match self {
            Self::Validation(_) | Self::InvalidExpression { .. } => 400,
            Self::NotFound { .. } => 404,
            Self::Conflict(_) => 409,
            Self::Connection { .. }
            | Self::Protocol(_)
            | Self::HttpClient(_)
            | Self::Gateway { .. }
            | Self::Mqtt(_) => 502,
            Self::Timeout(_) => 504,
            _ => 500,
        }
    }
}

#[macro_export]
macro_rules! validation_error {
    ($msg:expr) => {
        $crate::PointError::Validation($msg.to_string())
    };
    ($fmt:expr, $($arg:tt)*) => {
        $crate::PointError::Validation(format!($fmt, $($arg)*))
    };
}
