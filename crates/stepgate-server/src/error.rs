use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use stepgate_core::error::{StepgateError, WriteError};

// ---------------------------------------------------------------------------
// Rejection: gate denials
// ---------------------------------------------------------------------------

/// Boundary denial produced before any downstream component runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rejection {
    /// The admission budget is exhausted.
    AdmissionDenied,
    /// The credential header is missing or wrong.
    AuthDenied,
}

impl IntoResponse for Rejection {
    fn into_response(self) -> Response {
        match self {
            Rejection::AdmissionDenied => (
                StatusCode::TOO_MANY_REQUESTS,
                axum::Json(serde_json::json!({ "message": "Too Many Requests" })),
            )
                .into_response(),
            Rejection::AuthDenied => (
                StatusCode::FORBIDDEN,
                axum::Json(serde_json::json!({ "isAuthorized": false })),
            )
                .into_response(),
        }
    }
}

// ---------------------------------------------------------------------------
// Internal sentinel for explicit 400 Bad Request errors
// ---------------------------------------------------------------------------

/// Private sentinel error type used to carry an explicit HTTP 400 through
/// the `anyhow::Error` chain.
#[derive(Debug)]
struct BadRequestError(String);

impl std::fmt::Display for BadRequestError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::error::Error for BadRequestError {}

// ---------------------------------------------------------------------------
// AppError: unified error type for HTTP responses
// ---------------------------------------------------------------------------

/// Unified error type for HTTP responses.
#[derive(Debug)]
pub struct AppError(pub anyhow::Error);

impl AppError {
    /// Construct a 400 Bad Request error with the given message.
    pub fn bad_request(msg: impl Into<String>) -> Self {
        Self(BadRequestError(msg.into()).into())
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        if let Some(b) = self.0.downcast_ref::<BadRequestError>() {
            let body = serde_json::json!({ "error": b.0.clone() });
            return (StatusCode::BAD_REQUEST, axum::Json(body)).into_response();
        }

        let status = match self.0.downcast_ref::<StepgateError>() {
            Some(e) => match e {
                StepgateError::RunNotFound(_) => StatusCode::NOT_FOUND,
                StepgateError::Write(WriteError::Storage { .. }) | StepgateError::Storage(_) => {
                    StatusCode::BAD_GATEWAY
                }
                StepgateError::Write(WriteError::Timeout { .. }) => StatusCode::GATEWAY_TIMEOUT,
                StepgateError::InvalidTransition { .. } => StatusCode::CONFLICT,
                StepgateError::Write(WriteError::Encode(_))
                | StepgateError::Config(_)
                | StepgateError::Ledger(_)
                | StepgateError::Io(_)
                | StepgateError::Json(_) => StatusCode::INTERNAL_SERVER_ERROR,
            },
            None => StatusCode::INTERNAL_SERVER_ERROR,
        };

        let body = serde_json::json!({ "error": self.0.to_string() });
        (status, axum::Json(body)).into_response()
    }
}

impl<E> From<E> for AppError
where
    E: Into<anyhow::Error>,
{
    fn from(err: E) -> Self {
        Self(err.into())
    }
}
