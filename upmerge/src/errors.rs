use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::{Deserialize, Serialize};
use thiserror::Error as ThisError;

#[derive(ThisError, Debug)]
pub enum Error {
    /// A required multipart part was not present
    #[error("Missing required field '{field}'")]
    MissingField { field: String },

    /// Request content could not be interpreted (bad JSON, bad multipart framing, bad filename)
    #[error("{message}")]
    MalformedInput { message: String },

    /// Authentication required but not provided
    #[error("Not authenticated")]
    Unauthenticated { message: Option<String> },

    /// Caller is authenticated but the request failed a CSRF or referrer check
    #[error("Forbidden: {message}")]
    Forbidden { message: String },

    /// Reading a part's byte stream failed part way through
    #[error("Failed to read part '{part}': {message}")]
    Io { part: String, message: String },

    /// A configured upload size limit was exceeded
    #[error("{message}")]
    PayloadTooLarge { message: String },

    /// Nothing is registered at the requested path
    #[error("No extension registered at {path}")]
    NotFound { path: String },

    /// Generic internal service error
    #[error("Failed to {operation}")]
    Internal { operation: String },

    /// Unexpected error with full context chain
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Body written for every failed request.
#[derive(Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct ErrorBody {
    pub error: String,
    pub message: String,
}

impl Error {
    pub fn status_code(&self) -> StatusCode {
        match self {
            Error::MissingField { .. } => StatusCode::BAD_REQUEST,
            Error::MalformedInput { .. } => StatusCode::BAD_REQUEST,
            Error::Unauthenticated { .. } => StatusCode::UNAUTHORIZED,
            Error::Forbidden { .. } => StatusCode::FORBIDDEN,
            Error::Io { .. } => StatusCode::BAD_REQUEST,
            Error::PayloadTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            Error::NotFound { .. } => StatusCode::NOT_FOUND,
            Error::Internal { .. } | Error::Other(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Machine-readable error kind, stable across releases
    pub fn kind(&self) -> &'static str {
        match self {
            Error::MissingField { .. } => "missing_field",
            Error::MalformedInput { .. } => "malformed_input",
            Error::Unauthenticated { .. } => "unauthorized",
            Error::Forbidden { .. } => "forbidden",
            Error::Io { .. } => "io_error",
            Error::PayloadTooLarge { .. } => "payload_too_large",
            Error::NotFound { .. } => "not_found",
            Error::Internal { .. } | Error::Other(_) => "internal",
        }
    }

    /// Returns a user-safe error message, without leaking internal implementation details
    pub fn user_message(&self) -> String {
        match self {
            Error::Unauthenticated { message } => message.clone().unwrap_or_else(|| "Authentication required".to_string()),
            Error::Internal { .. } | Error::Other(_) => "Internal server error".to_string(),
            _ => self.to_string(),
        }
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        // Log full error details for debugging - different log levels based on severity
        match &self {
            Error::Internal { .. } | Error::Other(_) => {
                tracing::error!("Internal service error: {:#}", self);
            }
            Error::Unauthenticated { .. } | Error::Forbidden { .. } => {
                tracing::info!("Authorization error: {}", self);
            }
            Error::PayloadTooLarge { .. } | Error::Io { .. } => {
                tracing::warn!("Upload rejected: {}", self);
            }
            Error::MissingField { .. } | Error::MalformedInput { .. } | Error::NotFound { .. } => {
                tracing::debug!("Client error: {}", self);
            }
        }

        let body = ErrorBody {
            error: self.kind().to_string(),
            message: self.user_message(),
        };

        (self.status_code(), Json(body)).into_response()
    }
}

/// Type alias for service operation results
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::to_bytes;

    async fn body_of(err: Error) -> (StatusCode, ErrorBody) {
        let response = err.into_response();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    #[tokio::test]
    async fn test_missing_field_is_structured() {
        let (status, body) = body_of(Error::MissingField {
            field: "jsondata".to_string(),
        })
        .await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body.error, "missing_field");
        assert_eq!(body.message, "Missing required field 'jsondata'");
    }

    #[tokio::test]
    async fn test_internal_errors_do_not_leak_details() {
        let (status, body) = body_of(Error::Internal {
            operation: "serialize document: secret detail".to_string(),
        })
        .await;

        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body.error, "internal");
        assert_eq!(body.message, "Internal server error");

        let (_, body) = body_of(Error::Other(anyhow::anyhow!("boom"))).await;
        assert_eq!(body.message, "Internal server error");
    }

    #[test]
    fn test_status_and_kind_mapping() {
        let cases = [
            (
                Error::MalformedInput { message: "x".into() },
                StatusCode::BAD_REQUEST,
                "malformed_input",
            ),
            (Error::Unauthenticated { message: None }, StatusCode::UNAUTHORIZED, "unauthorized"),
            (Error::Forbidden { message: "x".into() }, StatusCode::FORBIDDEN, "forbidden"),
            (
                Error::Io {
                    part: "filesToUpload[]".into(),
                    message: "reset".into(),
                },
                StatusCode::BAD_REQUEST,
                "io_error",
            ),
            (
                Error::PayloadTooLarge { message: "x".into() },
                StatusCode::PAYLOAD_TOO_LARGE,
                "payload_too_large",
            ),
            (Error::NotFound { path: "/x".into() }, StatusCode::NOT_FOUND, "not_found"),
        ];

        for (err, status, kind) in cases {
            assert_eq!(err.status_code(), status, "{err:?}");
            assert_eq!(err.kind(), kind, "{err:?}");
        }
    }

    #[test]
    fn test_unauthenticated_custom_message() {
        let err = Error::Unauthenticated {
            message: Some("Invalid session".to_string()),
        };
        assert_eq!(err.user_message(), "Invalid session");
        assert_eq!(Error::Unauthenticated { message: None }.user_message(), "Authentication required");
    }
}
