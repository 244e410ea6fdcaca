//! Global application error types.
//!
//! Every failure inside the service layer is translated into exactly one
//! `ServiceError` kind at the point where it happens. The HTTP layer maps
//! the kind onto a status code in `api::common`.

use thiserror::Error;

/// Generic service error that can be used across all entities
#[derive(Debug, Error)]
pub enum ServiceError {
    /// Malformed input or a body that could not be decoded.
    #[error("Bad request: {message}")]
    BadRequest { message: String },

    /// Missing, invalid or expired credential.
    #[error("Unauthorized: {message}")]
    Unauthorized { message: String },

    #[error("{entity} already exists: {identifier}")]
    Conflict { entity: String, identifier: String },

    /// Storage failures surface here; the source is logged, never returned.
    #[error("Database error: {source}")]
    Database {
        #[from]
        source: anyhow::Error,
    },

    #[error("Internal error: {message}")]
    Internal { message: String },
}

pub type ServiceResult<T> = Result<T, ServiceError>;

impl ServiceError {
    // Helper constructors for common patterns

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::BadRequest {
            message: message.into(),
        }
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::Unauthorized {
            message: message.into(),
        }
    }

    pub fn conflict(entity: impl Into<String>, identifier: impl Into<String>) -> Self {
        Self::Conflict {
            entity: entity.into(),
            identifier: identifier.into(),
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Collapses validator output into a single `BadRequest`.
    pub fn from_validation(errors: validator::ValidationErrors) -> Self {
        let mut messages: Vec<String> = errors
            .field_errors()
            .into_iter()
            .flat_map(|(field, errors)| {
                errors.iter().map(move |error| {
                    format!(
                        "{}: {}",
                        field,
                        error.message.as_ref().unwrap_or(&"Invalid value".into())
                    )
                })
            })
            .collect();
        messages.sort();
        Self::bad_request(messages.join(", "))
    }
}
