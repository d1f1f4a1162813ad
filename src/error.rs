// Error handling module
// Defines the normalized error shape every failed API call resolves to

use reqwest::{Response, StatusCode};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Message used when the server gives no usable error message
pub const FALLBACK_MESSAGE: &str = "An unexpected error occurred";

/// Code used when the server gives no error code
pub const UNKNOWN_ERROR: &str = "UNKNOWN_ERROR";

/// Code for a reauthentication flow that ended without a token
pub const REAUTH_FAILED: &str = "REAUTH_FAILED";

/// Code for a success body that could not be decoded into the caller's type
pub const INVALID_RESPONSE: &str = "INVALID_RESPONSE";

/// Code for a request that could not be built (bad path, bad header)
pub const INVALID_REQUEST: &str = "INVALID_REQUEST";

/// Normalized API error
///
/// Every failure that is not recovered inside the client reaches the caller
/// in this shape, whatever its origin (transport, HTTP status, reauthentication).
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[error("API error {status} ({code}): {message}")]
pub struct ApiError {
    pub status: u16,
    pub message: String,
    pub code: String,
}

/// Error payload the API returns on failure
#[derive(Debug, Default, Deserialize)]
struct ErrorBody {
    message: Option<String>,
    code: Option<String>,
}

impl ApiError {
    pub fn new(status: u16, message: impl Into<String>, code: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
            code: code.into(),
        }
    }

    /// Normalize an error status and its raw body
    pub fn from_status(status: StatusCode, body: &str) -> Self {
        let parsed: ErrorBody = serde_json::from_str(body).unwrap_or_default();

        Self {
            status: status.as_u16(),
            message: parsed
                .message
                .filter(|m| !m.is_empty())
                .unwrap_or_else(|| FALLBACK_MESSAGE.to_string()),
            code: parsed
                .code
                .filter(|c| !c.is_empty())
                .unwrap_or_else(|| UNKNOWN_ERROR.to_string()),
        }
    }

    /// Read the body of a failed response and normalize it
    pub async fn from_response(response: Response) -> Self {
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        Self::from_status(status, &body)
    }

    /// Network failure with no response: status defaults to 500
    pub fn transport(err: &reqwest::Error) -> Self {
        let status = err.status().map(|s| s.as_u16()).unwrap_or(500);
        Self::new(status, FALLBACK_MESSAGE, UNKNOWN_ERROR)
    }

    pub fn reauth_failed() -> Self {
        Self::new(401, "No token after login", REAUTH_FAILED)
    }

    pub fn invalid_response(detail: impl std::fmt::Display) -> Self {
        Self::new(
            500,
            format!("Failed to decode response body: {}", detail),
            INVALID_RESPONSE,
        )
    }

    pub fn invalid_request(detail: impl std::fmt::Display) -> Self {
        Self::new(500, format!("Invalid request: {}", detail), INVALID_REQUEST)
    }
}

/// Result type alias for API operations
pub type Result<T> = std::result::Result<T, ApiError>;
