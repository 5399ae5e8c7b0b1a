use std::time::Duration;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use serde_json::{json, Map, Value};

use crate::state::AppState;

const OLLAMA_PROBE_TIMEOUT: Duration = Duration::from_secs(10);

pub async fn healthz() -> impl IntoResponse {
    Json(json!({"status": "ok"}))
}

/// Probes the store and the Ollama host; 503 with per-dependency details
/// when either is unreachable (§6).
pub async fn readyz(State(state): State<AppState>) -> impl IntoResponse {
    let mut details = Map::new();
    let mut ok = true;

    match state.store.db_ping().await {
        Ok(()) => {
            details.insert("postgres".into(), json!("ok"));
        }
        Err(e) => {
            ok = false;
            details.insert("postgres".into(), json!(format!("error: {e}")));
        }
    }

    let ollama_probe = reqwest::Client::new()
        .get(format!("{}/api/tags", state.config.ollama_url))
        .timeout(OLLAMA_PROBE_TIMEOUT)
        .send()
        .await;
    match ollama_probe {
        Ok(resp) if resp.status().is_success() => {
            details.insert("ollama".into(), json!("ok"));
        }
        Ok(resp) => {
            ok = false;
            details.insert("ollama".into(), json!(format!("error: HTTP {}", resp.status())));
        }
        Err(e) => {
            ok = false;
            details.insert("ollama".into(), json!(format!("error: {e}")));
        }
    }

    let body = json!({"status": if ok { "ok" } else { "error" }, "details": Value::Object(details)});
    let status_code = if ok { StatusCode::OK } else { StatusCode::SERVICE_UNAVAILABLE };
    (status_code, Json(body))
}
