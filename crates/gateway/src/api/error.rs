use aiop_domain::Error;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;

/// Maps the shared [`Error`] taxonomy onto HTTP statuses at the one
/// boundary that needs to know about them (§6's failure column).
pub struct ApiError(pub Error);

impl From<Error> for ApiError {
    fn from(e: Error) -> Self {
        ApiError(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match &self.0 {
            Error::BadRequest(m) => (StatusCode::BAD_REQUEST, m.clone()),
            Error::NotFound(m) => (StatusCode::NOT_FOUND, m.clone()),
            Error::Unavailable(m) => (StatusCode::SERVICE_UNAVAILABLE, m.clone()),
            // §7: InvalidArgument maps to HTTP 500 for the orchestrator (schema/dimension
            // mismatches are server-side bugs at this boundary, not malformed requests).
            Error::InvalidArgument(m) => (StatusCode::INTERNAL_SERVER_ERROR, m.clone()),
            Error::UnknownTool(m) => (StatusCode::INTERNAL_SERVER_ERROR, format!("unknown tool: {m}")),
            Error::DuplicateTool(m) => (StatusCode::INTERNAL_SERVER_ERROR, format!("tool already registered: {m}")),
            Error::UnknownTaskType(m) => (StatusCode::INTERNAL_SERVER_ERROR, format!("unknown task type: {m}")),
            Error::StoreUnavailable(m) => (StatusCode::SERVICE_UNAVAILABLE, m.clone()),
            Error::InferenceFailure(m) => (StatusCode::INTERNAL_SERVER_ERROR, m.clone()),
            Error::Io(e) => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
            Error::Json(e) => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
            Error::Config(m) => (StatusCode::INTERNAL_SERVER_ERROR, m.clone()),
            Error::Other(m) => (StatusCode::INTERNAL_SERVER_ERROR, m.clone()),
        };
        (status, Json(json!({"error": message}))).into_response()
    }
}
