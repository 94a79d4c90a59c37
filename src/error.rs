use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

/// Library error taxonomy
///
/// Connection failures are fatal at startup; validation failures are
/// rejected before reaching storage; storage failures surface to the
/// immediate caller (and are contained inside the cleanup loop and the
/// broadcaster, which log instead of propagating).
#[derive(Debug, Error)]
pub enum Error {
    /// Backend unreachable or not connected
    #[error("connection error: {0}")]
    Connection(String),
    /// Malformed filter or retention policy value
    #[error("validation error: {0}")]
    Validation(String),
    /// Transient failure during save/fetch/cleanup
    #[error("storage operation failed: {0}")]
    Storage(String),
}

pub type Result<T> = std::result::Result<T, Error>;

impl From<sqlx::Error> for Error {
    fn from(err: sqlx::Error) -> Self {
        Self::Storage(err.to_string())
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Self::Storage(format!("JSON error: {}", err))
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let status = match &self {
            Self::Connection(_) => StatusCode::SERVICE_UNAVAILABLE,
            Self::Validation(_) => StatusCode::BAD_REQUEST,
            Self::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };

        let body = Json(json!({
            "error": {
                "message": self.to_string(),
                "type": error_type_name(&self),
            }
        }));

        (status, body).into_response()
    }
}

fn error_type_name(error: &Error) -> &'static str {
    match error {
        Error::Connection(_) => "connection_error",
        Error::Validation(_) => "validation_error",
        Error::Storage(_) => "storage_error",
    }
}
