//! Error types for the sync server.

use calcsync_core::ModelError;
use calcsync_protocol::{HttpResponse, ProtocolError};
use thiserror::Error;

/// Result type for server operations.
pub type ServerResult<T> = Result<T, ServerError>;

/// Errors that can occur in the sync server.
#[derive(Error, Debug)]
pub enum ServerError {
    /// Malformed request.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// Missing, malformed, forged or expired token.
    #[error("authentication failed: {0}")]
    Unauthorized(String),

    /// No route or row matches.
    #[error("not found: {0}")]
    NotFound(String),

    /// Request body exceeds the configured limit.
    #[error("request body of {size} bytes exceeds {limit}")]
    PayloadTooLarge {
        /// Body size.
        size: usize,
        /// Configured limit.
        limit: usize,
    },

    /// Database error.
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// A stored row cannot be decoded.
    #[error("corrupt row: {0}")]
    CorruptRow(String),

    /// Internal server error.
    #[error("internal error: {0}")]
    Internal(String),
}

impl ServerError {
    /// HTTP status for this error.
    pub fn status(&self) -> u16 {
        match self {
            ServerError::InvalidRequest(_) => 400,
            ServerError::Unauthorized(_) => 401,
            ServerError::NotFound(_) => 404,
            ServerError::PayloadTooLarge { .. } => 413,
            ServerError::Database(_) | ServerError::CorruptRow(_) | ServerError::Internal(_) => 500,
        }
    }

    /// Machine-readable code for the error body.
    pub fn code(&self) -> &'static str {
        match self {
            ServerError::InvalidRequest(_) => "bad_request",
            ServerError::Unauthorized(_) => "unauthorized",
            ServerError::NotFound(_) => "not_found",
            ServerError::PayloadTooLarge { .. } => "payload_too_large",
            ServerError::Database(_) | ServerError::CorruptRow(_) | ServerError::Internal(_) => {
                "internal"
            }
        }
    }

    /// Returns true if this is a client error (4xx).
    pub fn is_client_error(&self) -> bool {
        (400..500).contains(&self.status())
    }

    /// Returns true if this is a server error (5xx).
    pub fn is_server_error(&self) -> bool {
        self.status() >= 500
    }

    /// The error as an HTTP response. Internal details stay in the log.
    pub fn to_response(&self) -> HttpResponse {
        let message = if self.is_server_error() {
            "internal server error".to_string()
        } else {
            self.to_string()
        };
        HttpResponse::error(self.status(), self.code(), message)
    }
}

impl From<ProtocolError> for ServerError {
    fn from(err: ProtocolError) -> Self {
        match err {
            ProtocolError::UnknownRoute { .. } => ServerError::NotFound(err.to_string()),
            other => ServerError::InvalidRequest(other.to_string()),
        }
    }
}

impl From<ModelError> for ServerError {
    fn from(err: ModelError) -> Self {
        ServerError::InvalidRequest(err.to_string())
    }
}

impl From<serde_json::Error> for ServerError {
    fn from(err: serde_json::Error) -> Self {
        ServerError::CorruptRow(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_classification() {
        assert!(ServerError::InvalidRequest("bad".into()).is_client_error());
        assert!(ServerError::Internal("oops".into()).is_server_error());
        assert!(!ServerError::InvalidRequest("bad".into()).is_server_error());
        assert_eq!(ServerError::Unauthorized("expired".into()).status(), 401);
    }

    #[test]
    fn internal_details_are_not_leaked() {
        let response = ServerError::CorruptRow("records row 7: bad JSON".into()).to_response();
        assert_eq!(response.status, 500);
        let body = response.error_body().unwrap();
        assert_eq!(body.error, "internal");
        assert!(!body.message.contains("row 7"));
    }

    #[test]
    fn unknown_route_maps_to_not_found() {
        let err: ServerError = ProtocolError::UnknownRoute {
            method: "GET".into(),
            path: "/api/users".into(),
        }
        .into();
        assert_eq!(err.status(), 404);
    }
}
