//! HTTP error mapping
//!
//! Every failure leaves the daemon as
//! `{ "message": <status phrase>, "data": { "error": <detail> } }`.
//! Internal errors are logged in full and answered with a generic detail.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use sealzip_batch::IngestError;
use sealzip_crypto::CipherError;
use serde_json::json;
use std::io;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ApiError {
    /// One or more request validation failures, reported together.
    #[error("{}", .0.join("; "))]
    Validation(Vec<String>),

    #[error("{0}")]
    BadRequest(String),

    #[error("missing tenant")]
    Unauthorized,

    #[error("wrong password or corrupted ciphertext")]
    Authentication,

    #[error("internal error: {0}")]
    Internal(String),
}

impl ApiError {
    pub fn internal(err: impl std::fmt::Display) -> Self {
        ApiError::Internal(err.to_string())
    }

    /// Classify an error item taken from a cipher output stream.
    pub fn from_stream(err: io::Error) -> Self {
        match err.get_ref().and_then(|e| e.downcast_ref::<CipherError>()) {
            Some(CipherError::Authentication) => ApiError::Authentication,
            Some(e @ CipherError::TruncatedHeader) => ApiError::BadRequest(e.public_message().into()),
            _ => ApiError::Internal(err.to_string()),
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::Validation(_) | ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Unauthorized => StatusCode::UNAUTHORIZED,
            ApiError::Authentication => StatusCode::UNPROCESSABLE_ENTITY,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<IngestError> for ApiError {
    fn from(err: IngestError) -> Self {
        match err {
            IngestError::Rejected(violations) => {
                ApiError::Validation(violations.iter().map(ToString::to_string).collect())
            }
            IngestError::Multipart(e) => ApiError::BadRequest(e.body_text()),
            IngestError::Io(e) => ApiError::internal(e),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let message = match status {
            StatusCode::BAD_REQUEST => "Request Error",
            StatusCode::UNAUTHORIZED => "Unauthorized",
            StatusCode::UNPROCESSABLE_ENTITY => "Unprocessable Entity",
            _ => "Internal Server Error",
        };

        let body = match &self {
            ApiError::Validation(errors) => json!({
                "message": message,
                "data": { "error": self.to_string(), "errors": errors },
            }),
            ApiError::Internal(detail) => {
                tracing::error!(error = %detail, "request failed");
                json!({ "message": message, "data": { "error": "internal error" } })
            }
            _ => json!({ "message": message, "data": { "error": self.to_string() } }),
        };
        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stream_errors_classified() {
        let auth = ApiError::from_stream(CipherError::Authentication.into_io());
        assert!(matches!(auth, ApiError::Authentication));

        let short = ApiError::from_stream(CipherError::TruncatedHeader.into_io());
        assert_eq!(short.status(), StatusCode::BAD_REQUEST);

        let other = ApiError::from_stream(io::Error::other("disk full"));
        assert_eq!(other.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn test_validation_message_joins() {
        let err = ApiError::Validation(vec!["a".into(), "b".into()]);
        assert_eq!(err.to_string(), "a; b");
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);
    }
}
