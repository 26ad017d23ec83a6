use std::path::PathBuf;

use rocket::http::Status;
use rocket::response::{self, status, Responder};
use rocket::serde::json::Json;
use rocket::Request;
use thiserror::Error;

use crate::types::ErrorDetail;

/// Failures of the artifact listing.
#[derive(Error, Debug)]
pub enum ListingError {
    #[error("Access denied")]
    AccessDenied,

    #[error("Project not found")]
    NotFound,

    /// One bad artifact fails the whole listing.
    #[error("Error reading JSON file: {message}")]
    ArtifactRead { path: PathBuf, message: String },

    #[error("Error reading project directory: {0}")]
    Io(#[from] std::io::Error),
}

impl ListingError {
    pub fn artifact_read(path: impl Into<PathBuf>, message: impl ToString) -> Self {
        Self::ArtifactRead {
            path: path.into(),
            message: message.to_string(),
        }
    }
}

/// Everything a handler can fail with, mapped onto an HTTP status at the boundary.
#[derive(Error, Debug)]
pub enum ApiError {
    #[error(transparent)]
    Listing(#[from] ListingError),

    #[error("{0}")]
    Validation(String),

    #[error("segmentation failed: {0:#}")]
    Segmentation(anyhow::Error),

    #[error("segmentation worker panicked")]
    WorkerPanicked,

    #[error("Segmentation timed out")]
    Timeout,

    #[error("Segmentation workers unavailable")]
    Unavailable,
}

impl ApiError {
    pub fn status(&self) -> Status {
        match self {
            ApiError::Listing(ListingError::AccessDenied) => Status::Forbidden,
            ApiError::Listing(ListingError::NotFound) => Status::NotFound,
            ApiError::Listing(_) => Status::InternalServerError,
            ApiError::Validation(_) => Status::UnprocessableEntity,
            ApiError::Segmentation(_) | ApiError::WorkerPanicked => Status::InternalServerError,
            ApiError::Timeout => Status::GatewayTimeout,
            ApiError::Unavailable => Status::ServiceUnavailable,
        }
    }

    /// Message put in the `detail` field. External faults stay opaque to the client.
    pub fn detail(&self) -> String {
        match self {
            ApiError::Segmentation(_) | ApiError::WorkerPanicked => {
                "Internal Server Error".to_string()
            }
            other => other.to_string(),
        }
    }
}

impl From<rocket::tokio::task::JoinError> for ApiError {
    fn from(err: rocket::tokio::task::JoinError) -> Self {
        if err.is_panic() {
            ApiError::WorkerPanicked
        } else {
            ApiError::Unavailable
        }
    }
}

impl<'r> Responder<'r, 'static> for ApiError {
    fn respond_to(self, req: &'r Request<'_>) -> response::Result<'static> {
        let status = self.status();
        if let ApiError::Listing(ListingError::ArtifactRead { path, .. }) = &self {
            tracing::error!(path = %path.display(), "artifact could not be read");
        }
        if status.code >= 500 {
            tracing::error!(status = status.code, "{}", self);
        } else {
            tracing::warn!(status = status.code, "{}", self);
        }

        status::Custom(
            status,
            Json(ErrorDetail {
                detail: self.detail(),
            }),
        )
        .respond_to(req)
    }
}
