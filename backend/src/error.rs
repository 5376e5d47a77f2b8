use actix_web::error::BlockingError;
use actix_web::http::StatusCode;
use actix_web::{HttpResponse, ResponseError};
use batik_shared::ErrorResponse;

use crate::model::InferenceError;
use crate::storage::StorageError;

/// Errors surfaced to HTTP clients as `{"error": "..."}`.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("{0}")]
    BadRequest(String),
    #[error("Uploaded file is not a valid image: {0}")]
    InvalidImage(String),
    #[error("Invalid filename: {0}")]
    InvalidFilename(String),
    #[error("Image not found: {0}")]
    NotFound(String),
    #[error("Internal server error")]
    Internal(String),
}

impl From<StorageError> for ApiError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::InvalidFilename(name) => ApiError::InvalidFilename(name),
            StorageError::UnsupportedExtension(_) => ApiError::BadRequest(err.to_string()),
            StorageError::NotFound(name) => ApiError::NotFound(name),
            StorageError::Encode(_) | StorageError::Io(_) => ApiError::Internal(err.to_string()),
        }
    }
}

impl From<InferenceError> for ApiError {
    fn from(err: InferenceError) -> Self {
        ApiError::Internal(err.to_string())
    }
}

impl From<BlockingError> for ApiError {
    fn from(err: BlockingError) -> Self {
        ApiError::Internal(err.to_string())
    }
}

impl ResponseError for ApiError {
    fn status_code(&self) -> StatusCode {
        match self {
            ApiError::BadRequest(_) | ApiError::InvalidImage(_) | ApiError::InvalidFilename(_) => {
                StatusCode::BAD_REQUEST
            }
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        match self {
            ApiError::Internal(detail) => log::error!("Request failed: {}", detail),
            other => log::warn!("Rejected request: {}", other),
        }

        HttpResponse::build(self.status_code()).json(ErrorResponse {
            error: self.to_string(),
        })
    }
}
