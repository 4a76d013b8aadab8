use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

use housing_common::error::CommonError;

use crate::relay::cors_headers;

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error(transparent)]
    Common(#[from] CommonError),

    #[error("config error: {0}")]
    Config(String),
}

/// JSON error envelope returned by every endpoint.
#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub error: String,
    pub details: String,
}

pub fn error_response(status: StatusCode, error: &str, details: impl Into<String>) -> Response {
    (
        status,
        cors_headers(),
        Json(ErrorBody {
            error: error.to_string(),
            details: details.into(),
        }),
    )
        .into_response()
}
