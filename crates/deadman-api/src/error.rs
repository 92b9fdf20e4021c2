use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;

use deadman_core::WatchdogError;

#[derive(Debug)]
pub enum ApiError {
    /// The watchdog loop behind the route has stopped.
    Unavailable(String),
}

#[derive(Serialize)]
struct ErrorBody {
    error: String,
    message: String,
}

impl From<WatchdogError> for ApiError {
    fn from(e: WatchdogError) -> Self {
        ApiError::Unavailable(e.to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error_kind, message) = match self {
            ApiError::Unavailable(msg) => {
                (StatusCode::SERVICE_UNAVAILABLE, "watchdog_unavailable", msg)
            }
        };

        let body = ErrorBody {
            error: error_kind.to_string(),
            message,
        };

        (status, axum::Json(body)).into_response()
    }
}
