//! API error types with HTTP response mapping.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use document_store::DocumentStoreError;
use domain::{DomainError, OpenTabError};
use settlement::SettlementError;
use thiserror::Error;

use crate::envelope::Envelope;

/// API-level error type that maps to HTTP responses.
#[derive(Debug, Error)]
pub enum ApiError {
    /// Missing or blank company scope.
    #[error("{0}")]
    Unauthorized(String),

    /// Bad request from the client.
    #[error("{0}")]
    BadRequest(String),

    /// Resource not found.
    #[error("{0}")]
    NotFound(String),

    /// Domain logic error.
    #[error(transparent)]
    Domain(#[from] DomainError),

    /// Close sequence error.
    #[error(transparent)]
    Settlement(#[from] SettlementError),
}

impl ApiError {
    /// Returns the HTTP status for this error.
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Domain(err) => domain_status(err),
            ApiError::Settlement(err) => match err {
                SettlementError::Domain(err) => domain_status(err),
                SettlementError::Store(err) => store_status(err),
                _ => StatusCode::INTERNAL_SERVER_ERROR,
            },
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let message = if status == StatusCode::INTERNAL_SERVER_ERROR {
            tracing::error!(error = %self, "internal server error");
            "Internal server error".to_string()
        } else {
            tracing::debug!(%status, error = %self, "request failed");
            self.to_string()
        };

        (status, Json(Envelope::<()>::failure(message))).into_response()
    }
}

fn domain_status(err: &DomainError) -> StatusCode {
    match err {
        DomainError::OpenTab(err) => match err {
            OpenTabError::NotFound { .. } | OpenTabError::ParticipantNotFound { .. } => {
                StatusCode::NOT_FOUND
            }
            _ => StatusCode::BAD_REQUEST,
        },
        DomainError::Store(err) => store_status(err),
        DomainError::Serialization(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn store_status(err: &DocumentStoreError) -> StatusCode {
    match err {
        DocumentStoreError::ConcurrencyConflict { .. } => StatusCode::CONFLICT,
        // A concurrent cancel removed the document between load and write.
        DocumentStoreError::NotFound { .. } => StatusCode::NOT_FOUND,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}
