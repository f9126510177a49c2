//! Error types for the HTTP API

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use thiserror::Error;

use crate::api::Status;
use crate::base64_stream::DecodeError;
use crate::display::DisplayError;
use crate::nvs::StoreError;
use crate::photos::LibraryError;
use crate::render::RenderError;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Request body too long: {0} bytes")]
    BodyTooLong(u64),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Invalid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Receive failed: {0}")]
    Receive(String),

    #[error("Photo library error: {0}")]
    Library(#[from] LibraryError),

    #[error("Settings store error: {0}")]
    Store(#[from] StoreError),

    #[error("Upload decode error: {0}")]
    Decode(#[from] DecodeError),

    #[error("Render error: {0}")]
    Render(#[from] RenderError),

    #[error("Display error: {0}")]
    Display(#[from] DisplayError),

    #[error("Stored photo {filename} could not be shown: {source}")]
    StoredPhoto {
        filename: String,
        source: RenderError,
    },

    #[error("Background task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

impl AppError {
    pub fn status(&self) -> StatusCode {
        match self {
            AppError::BodyTooLong(_) | AppError::BadRequest(_) | AppError::Json(_) => {
                StatusCode::BAD_REQUEST
            }
            AppError::Library(LibraryError::InvalidName(_)) => StatusCode::BAD_REQUEST,
            AppError::Library(LibraryError::NotFound(_)) => StatusCode::NOT_FOUND,
            AppError::Decode(e) if e.is_malformed() => StatusCode::BAD_REQUEST,
            AppError::Render(RenderError::Decode(_)) => StatusCode::BAD_REQUEST,
            AppError::Receive(_)
            | AppError::Library(LibraryError::Conflict(_) | LibraryError::Io(_))
            | AppError::Store(_)
            | AppError::Decode(_)
            | AppError::Render(RenderError::Panel(_))
            | AppError::Display(_)
            | AppError::StoredPhoto { .. }
            | AppError::Task(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        let detail = self.to_string();

        if status.is_server_error() {
            tracing::error!("{}", detail);
        } else {
            tracing::warn!("{}", detail);
        }

        (status, Json(Status::fail(detail))).into_response()
    }
}
