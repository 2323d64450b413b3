//! Error responses.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use extraction::ExtractError;
use serde::Serialize;
use tracing::{error, warn};

/// Body of every error response.
#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub error: &'static str,
    pub detail: String,
}

/// An [`ExtractError`] rendered as HTTP.
#[derive(Debug)]
pub struct ApiError(pub ExtractError);

impl From<ExtractError> for ApiError {
    fn from(err: ExtractError) -> Self {
        ApiError(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = StatusCode::from_u16(self.0.status_code())
            .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);

        if status.is_server_error() {
            error!(error = %self.0, kind = self.0.kind(), "Extraction failed");
        } else {
            warn!(error = %self.0, kind = self.0.kind(), "Extraction rejected");
        }

        let body = ErrorBody {
            error: self.0.kind(),
            detail: self.0.to_string(),
        };
        (status, Json(body)).into_response()
    }
}
