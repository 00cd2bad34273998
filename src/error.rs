//! Error types for the routing control core.
//!

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ControlError {
    #[error("Validation error: {0}")]
    ValidationError(String),
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },
    #[error("Role '{role}' is not permitted to {operation}")]
    Unauthorized { role: String, operation: String },
    #[error("Routing policy violation: {0}")]
    PolicyViolation(String),
    #[error("Invalid state transition for {entity} {id}: {from} -> {to}")]
    InvalidStateTransition {
        entity: &'static str,
        id: String,
        from: String,
        to: String,
    },
    #[error("Database error: {0}")]
    DatabaseError(String),
    #[error("Remote call error: {0}")]
    RemoteCallError(String),
    #[error("Configuration error: {0}")]
    ConfigurationError(String),
    #[error("Serialization error: {0}")]
    SerializationError(String),
}

impl ControlError {
    pub fn not_found(entity: &'static str, id: impl ToString) -> Self {
        Self::NotFound {
            entity,
            id: id.to_string(),
        }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::ValidationError(message.into())
    }

    /// Short machine-readable code for structured error payloads
    pub fn code(&self) -> &'static str {
        match self {
            Self::ValidationError(_) => "validation_error",
            Self::NotFound { .. } => "not_found",
            Self::Unauthorized { .. } => "unauthorized",
            Self::PolicyViolation(_) => "policy_violation",
            Self::InvalidStateTransition { .. } => "invalid_state_transition",
            Self::DatabaseError(_) => "database_error",
            Self::RemoteCallError(_) => "remote_call_error",
            Self::ConfigurationError(_) => "configuration_error",
            Self::SerializationError(_) => "serialization_error",
        }
    }

    /// Structured payload for synchronous callers
    pub fn to_payload(&self) -> serde_json::Value {
        serde_json::json!({
            "error": self.code(),
            "message": self.to_string(),
        })
    }
}

impl From<serde_json::Error> for ControlError {
    fn from(error: serde_json::Error) -> Self {
        ControlError::SerializationError(error.to_string())
    }
}

impl From<sqlx::Error> for ControlError {
    fn from(err: sqlx::Error) -> Self {
        ControlError::DatabaseError(err.to_string())
    }
}

impl From<sqlx::migrate::MigrateError> for ControlError {
    fn from(err: sqlx::migrate::MigrateError) -> Self {
        ControlError::DatabaseError(format!("migration failed: {err}"))
    }
}

impl From<config::ConfigError> for ControlError {
    fn from(err: config::ConfigError) -> Self {
        ControlError::ConfigurationError(err.to_string())
    }
}

pub type ControlResult<T> = std::result::Result<T, ControlError>;

/// Failure of a single outbound IS-05 call
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RemoteCallError {
    #[error("invalid IS-05 url: {0}")]
    InvalidUrl(String),
    #[error("request failed: {0}")]
    Transport(String),
    #[error("request timed out after {0} ms")]
    Timeout(u64),
    #[error("IS-05 returned status {status}: {body}")]
    Status { status: u16, body: String },
}

impl RemoteCallError {
    /// HTTP status of the response, when one was received
    pub fn status_code(&self) -> Option<u16> {
        match self {
            Self::Status { status, .. } => Some(*status),
            _ => None,
        }
    }
}

impl From<RemoteCallError> for ControlError {
    fn from(err: RemoteCallError) -> Self {
        ControlError::RemoteCallError(err.to_string())
    }
}
