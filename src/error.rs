//! Centralized error type for everything that can cross an HTTP response
//! boundary. Capture-loop-internal failures are logged and handled in place;
//! they never construct an `AppError`.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("device error: {0}")]
    Device(String),

    #[error("snapshot capture is busy")]
    SnapshotBusy,

    #[error("snapshot capture timed out")]
    SnapshotTimeout,

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = match &self {
            AppError::Device(_) | AppError::Io(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::SnapshotBusy | AppError::SnapshotTimeout => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        tracing::error!(error = %self, "request failed");
        (status, self.to_string()).into_response()
    }
}
