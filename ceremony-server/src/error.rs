//! API error handling module
//!
//! Provides a unified error type for all API endpoints with structured error
//! variants, and the mapping from core ceremony errors onto HTTP responses.
//! Ceremony-identity failures (unknown, expired, replayed) collapse to one
//! generic response so a caller cannot probe which sub-case occurred.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use ceremony_core::CeremonyError;
use thiserror::Error;

/// API error type with structured variants for different error categories
#[derive(Debug, Error)]
pub enum ApiError {
    /// Bad request - client provided invalid input
    #[error("Bad request: {0}")]
    BadRequest(String),

    /// Not found - requested resource does not exist
    #[error("Not found: {0}")]
    NotFound(String),

    /// Internal server error - unexpected server-side failure
    #[error("Internal error: {0}")]
    Internal(String),

    /// Ceremony error - error from the ceremony core
    #[error("Ceremony error: {0}")]
    Ceremony(#[from] CeremonyError),
}

impl ApiError {
    /// Create a bad request error
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::BadRequest(message.into())
    }

    /// Create a not found error
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::NotFound(message.into())
    }

    /// Create an internal server error
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    /// Get the HTTP status code for this error
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::Ceremony(ref e) => match e {
                // Identity sub-cases collapse to one 400
                CeremonyError::NotFound
                | CeremonyError::Expired
                | CeremonyError::AlreadyConsumed => StatusCode::BAD_REQUEST,

                // A newer attempt owns the slot
                CeremonyError::Superseded => StatusCode::CONFLICT,

                CeremonyError::VerificationFailed(_) => StatusCode::UNAUTHORIZED,

                CeremonyError::CapacityExceeded => StatusCode::SERVICE_UNAVAILABLE,

                CeremonyError::TransportTimeout(_) => StatusCode::SERVICE_UNAVAILABLE,
                CeremonyError::RetriesExhausted(_) => StatusCode::GATEWAY_TIMEOUT,

                CeremonyError::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
            },
        }
    }

    /// Get the error code for programmatic error handling
    fn error_code(&self) -> &'static str {
        match self {
            Self::BadRequest(_) => "INVALID_INPUT",
            Self::NotFound(_) => "NOT_FOUND",
            Self::Internal(_) => "INTERNAL_ERROR",
            Self::Ceremony(ref e) => match e {
                CeremonyError::NotFound
                | CeremonyError::Expired
                | CeremonyError::AlreadyConsumed => "INVALID_CEREMONY",
                CeremonyError::Superseded => "SUPERSEDED",
                CeremonyError::VerificationFailed(_) => "VERIFICATION_FAILED",
                CeremonyError::CapacityExceeded => "CAPACITY_EXCEEDED",
                CeremonyError::TransportTimeout(_) => "TRANSPORT_TIMEOUT",
                CeremonyError::RetriesExhausted(_) => "RETRIES_EXHAUSTED",
                CeremonyError::Storage(_) => "STORAGE_ERROR",
            },
        }
    }

    /// Get sanitized error message for client response
    fn client_message(&self) -> String {
        match self {
            // The three identity sub-cases must be indistinguishable
            Self::Ceremony(ref e) if e.is_invalid_ceremony() => {
                "Invalid or expired ceremony".to_string()
            }
            Self::Ceremony(ref e) => match e {
                CeremonyError::Superseded => {
                    "Ceremony superseded by a newer attempt".to_string()
                }
                CeremonyError::VerificationFailed(_) => {
                    "Credential verification failed".to_string()
                }
                CeremonyError::CapacityExceeded => {
                    "Too many pending ceremonies, try again shortly".to_string()
                }
                CeremonyError::TransportTimeout(_) => "Upstream timeout".to_string(),
                CeremonyError::RetriesExhausted(_) => {
                    "Operation failed after retries, try again".to_string()
                }
                CeremonyError::Storage(_) => "Storage error".to_string(),
                _ => "Invalid or expired ceremony".to_string(),
            },
            // For other errors, use the Display message
            _ => self.to_string(),
        }
    }

    /// Get the error category for logging
    fn error_category(&self) -> &'static str {
        match self {
            Self::BadRequest(_) => "bad_request",
            Self::NotFound(_) => "not_found",
            Self::Internal(_) => "internal",
            Self::Ceremony(_) => "ceremony",
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let category = self.error_category();
        let code = self.error_code();
        let internal_message = self.to_string();
        let client_message = self.client_message();

        // Log based on severity, always including internal details
        match &self {
            Self::BadRequest(_) | Self::NotFound(_) => {
                tracing::warn!(
                    status = %status,
                    category = category,
                    code = code,
                    error = %internal_message,
                    "Client error"
                );
            }
            Self::Ceremony(_) => {
                tracing::warn!(
                    status = %status,
                    category = category,
                    code = code,
                    error = %internal_message,
                    client_message = %client_message,
                    "Ceremony error (internal details logged)"
                );
            }
            Self::Internal(_) => {
                tracing::error!(
                    status = %status,
                    category = category,
                    code = code,
                    error = %internal_message,
                    "Server error"
                );
            }
        }

        // All error responses include a `code` field for programmatic error handling
        let body = serde_json::json!({
            "error": client_message,
            "code": code,
        });

        (status, Json(body)).into_response()
    }
}
