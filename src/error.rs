use axum::{
    http::{Error as HttpError, StatusCode},
    response::{IntoResponse, Response},
};
use thiserror::Error;

use crate::dispatch::DispatchError;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Not Found")]
    NotFound,

    #[error("Media file not found: {0}")]
    MediaFileNotFound(String),

    #[error("Internal Server Error")]
    Internal(#[from] anyhow::Error),

    #[error("I/O Error: {0}")]
    Io(#[from] std::io::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] HttpError),
}

impl From<DispatchError> for AppError {
    fn from(err: DispatchError) -> Self {
        match err {
            DispatchError::MediaFileNotFound { filename, .. } => AppError::MediaFileNotFound(filename),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            AppError::NotFound | AppError::MediaFileNotFound(_) => (StatusCode::NOT_FOUND, self.to_string()),
            AppError::Internal(_) | AppError::Io(_) | AppError::Http(_) => {
                tracing::error!("Request failed: {:?}", self);
                (StatusCode::INTERNAL_SERVER_ERROR, self.to_string())
            }
        };

        (status, message).into_response()
    }
}
