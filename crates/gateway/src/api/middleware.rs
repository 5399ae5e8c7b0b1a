use std::time::Instant;

use axum::body::{to_bytes, Body};
use axum::extract::Request;
use axum::http::{HeaderMap, HeaderValue};
use axum::middleware::Next;
use axum::response::Response;
use uuid::Uuid;

/// Carried in request extensions so handlers can read the `run_id` the
/// middleware already derived, instead of re-deriving it (§4.7.1).
#[derive(Debug, Clone, Copy)]
pub struct RunId(pub Uuid);

fn extract_or_generate_run_id(headers: &HeaderMap) -> Uuid {
    headers
        .get("x-run-id")
        .and_then(|v| v.to_str().ok())
        .and_then(|s| Uuid::parse_str(s).ok())
        .unwrap_or_else(Uuid::new_v4)
}

/// `request_start` / `request_end` / `request_error` one-line JSON
/// records, mirroring the original source's `RequestLoggingMiddleware`
/// but built as `axum::middleware::from_fn`, the idiom this crate already
/// uses elsewhere.
pub async fn request_logging(mut req: Request, next: Next) -> Response {
    let method = req.method().clone();
    let path = req.uri().path().to_string();
    let query = req.uri().query().unwrap_or("").to_string();
    let client = req
        .headers()
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("")
        .to_string();
    let run_id = extract_or_generate_run_id(req.headers());
    req.extensions_mut().insert(RunId(run_id));

    tracing::info!(event = "request_start", %run_id, %method, %path, %query, %client, "request received");

    let start = Instant::now();
    let response = next.run(req).await;
    let duration_ms = start.elapsed().as_millis() as u64;
    let status = response.status();

    let mut response = if status.is_server_error() {
        let (parts, body) = response.into_parts();
        let bytes = to_bytes(body, usize::MAX).await.unwrap_or_default();
        let error = serde_json::from_slice::<serde_json::Value>(&bytes)
            .ok()
            .and_then(|v| v.get("error").and_then(|e| e.as_str()).map(str::to_string))
            .unwrap_or_else(|| status.canonical_reason().unwrap_or("request failed").to_string());
        tracing::error!(event = "request_error", %run_id, status_code = status.as_u16(), duration_ms, %error, "request failed");
        Response::from_parts(parts, Body::from(bytes))
    } else {
        tracing::info!(event = "request_end", %run_id, status_code = status.as_u16(), duration_ms, "request completed");
        response
    };

    if let Ok(value) = HeaderValue::from_str(&run_id.to_string()) {
        response.headers_mut().insert("x-run-id", value);
    }
    response
}
