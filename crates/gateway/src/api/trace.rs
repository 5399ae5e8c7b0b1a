use axum::extract::{Path, State};
use axum::response::IntoResponse;
use axum::Json;
use serde_json::json;
use uuid::Uuid;

use crate::api::error::ApiError;
use crate::state::AppState;

/// `GET /trace/{run_id}` — the full ordered event history for one run (§6).
pub async fn trace(State(state): State<AppState>, Path(run_id): Path<Uuid>) -> Result<impl IntoResponse, ApiError> {
    let entries = state.events.get_trace(run_id).await?;
    let events: Vec<_> = entries
        .iter()
        .map(|e| json!({"created_at": e.created_at, "tool": e.tool, "event": e.event}))
        .collect();
    Ok(Json(json!({"run_id": run_id, "count": events.len(), "events": events})))
}
