use std::sync::OnceLock;
use std::time::Instant;

use aiop_domain::{Error, MemoryEvent};
use axum::extract::State;
use axum::response::IntoResponse;
use axum::{Extension, Json};
use regex::Regex;
use serde::Deserialize;
use serde_json::{json, Value};
use uuid::Uuid;

use crate::api::error::ApiError;
use crate::api::middleware::RunId;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct AskRequest {
    pub prompt: String,
}

enum Mode {
    Remember(String),
    Recall,
    Chat,
}

fn remember_rx() -> &'static Regex {
    static RX: OnceLock<Regex> = OnceLock::new();
    RX.get_or_init(|| Regex::new(r"(?i)^\s*remember this exact phrase\s*:\s*(.+)\s*$").expect("valid regex"))
}

fn recall_rx() -> &'static Regex {
    static RX: OnceLock<Regex> = OnceLock::new();
    RX.get_or_init(|| Regex::new(r"(?i)^\s*what exact phrase did i ask you to remember\b").expect("valid regex"))
}

fn classify(prompt: &str) -> Mode {
    if let Some(caps) = remember_rx().captures(prompt) {
        return Mode::Remember(caps[1].trim().to_string());
    }
    if recall_rx().is_match(prompt) {
        return Mode::Recall;
    }
    Mode::Chat
}

/// Accepts a strict JSON object `{"tool": "...", "args": {...}}`. Anything
/// else — malformed JSON, a non-object, an empty/missing `tool`, a
/// non-object `args` — is treated as "no tool call" (§4.7 step e).
fn parse_tool_call(text: &str) -> Option<(String, Value)> {
    let value: Value = serde_json::from_str(text.trim()).ok()?;
    let obj = value.as_object()?;
    let tool = obj.get("tool")?.as_str()?.trim();
    if tool.is_empty() {
        return None;
    }
    let args = obj.get("args").cloned().unwrap_or_else(|| json!({}));
    if !args.is_object() {
        return None;
    }
    Some((tool.to_string(), args))
}

fn format_retrieved_for_injection(rows: &[aiop_domain::MemoryRow]) -> String {
    let mut chunks = Vec::new();
    for row in rows {
        let content = row.content.trim();
        if content.is_empty() {
            continue;
        }
        let mut header = vec![format!("id={}", row.id)];
        if let Some(sim) = row.cosine_sim {
            header.push(format!("sim={sim:.3}"));
        }
        chunks.push(format!("[{}]\n{}", header.join(", "), content));
    }
    chunks.join("\n\n")
}

fn round4(seconds: f64) -> f64 {
    (seconds * 10_000.0).round() / 10_000.0
}

/// `POST /ask` — intent classification, retrieval-augmented generation,
/// and the at-most-one tool turn (§4.7).
pub async fn ask(
    State(state): State<AppState>,
    Extension(RunId(run_id)): Extension<RunId>,
    Json(body): Json<AskRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let total_start = Instant::now();
    let prompt = body.prompt.trim().to_string();
    if prompt.is_empty() {
        return Err(ApiError::from(Error::BadRequest("prompt is required".into())));
    }

    match classify(&prompt) {
        Mode::Remember(phrase) => remember(&state, run_id, &phrase, total_start).await,
        Mode::Recall => recall(&state, run_id, total_start).await,
        Mode::Chat => chat(&state, run_id, &prompt, total_start).await,
    }
}

async fn remember(state: &AppState, run_id: Uuid, phrase: &str, total_start: Instant) -> Result<impl IntoResponse, ApiError> {
    if phrase.is_empty() {
        return Err(ApiError::from(Error::BadRequest("No phrase provided".into())));
    }
    let db_start = Instant::now();
    let event = MemoryEvent::make("remember_phrase", "orchestrator", json!({"phrase": phrase}), Some(run_id))?;
    let memory_id = state.events.append(&event).await?;
    let db_s = round4(db_start.elapsed().as_secs_f64());
    let total_s = round4(total_start.elapsed().as_secs_f64());

    Ok(Json(json!({
        "model": state.config.chat_model,
        "response": phrase,
        "memory_id": memory_id,
        "retrieved": [],
        "tool_used": Value::Null,
        "tool_result": Value::Null,
        "timings": {"embed_s": 0.0, "retrieve_s": 0.0, "generate_s": 0.0, "db_s": db_s, "total_s": total_s},
        "config": {"mode": "remember", "expected_dim": state.config.expected_embed_dim},
        "run_id": run_id,
    })))
}

async fn recall(state: &AppState, run_id: Uuid, total_start: Instant) -> Result<impl IntoResponse, ApiError> {
    let phrase = state
        .store
        .get_latest_phrase(state.config.include_tools)
        .await?
        .ok_or_else(|| Error::NotFound("No remembered phrase found".into()))?;
    let total_s = round4(total_start.elapsed().as_secs_f64());

    Ok(Json(json!({
        "model": state.config.chat_model,
        "response": phrase,
        "memory_id": Value::Null,
        "retrieved": [],
        "tool_used": Value::Null,
        "tool_result": Value::Null,
        "timings": {"embed_s": 0.0, "retrieve_s": 0.0, "generate_s": 0.0, "db_s": 0.0, "total_s": total_s},
        "config": {"mode": "recall", "expected_dim": state.config.expected_embed_dim},
        "run_id": run_id,
    })))
}

async fn chat(state: &AppState, run_id: Uuid, prompt: &str, total_start: Instant) -> Result<impl IntoResponse, ApiError> {
    let embed_start = Instant::now();
    let query_vec = state
        .inference
        .embed(prompt)
        .await
        .map_err(|e| Error::InferenceFailure(format!("embedding failed: {e}")))?;
    let embed_s = round4(embed_start.elapsed().as_secs_f64());

    let retrieve_start = Instant::now();
    let retrieved = state
        .store
        .search_memories(&query_vec, state.config.top_k, state.config.min_similarity, state.config.include_tools)
        .await
        .map_err(|e| Error::StoreUnavailable(format!("memory search failed: {e}")))?;
    let retrieve_s = round4(retrieve_start.elapsed().as_secs_f64());

    let injected = format_retrieved_for_injection(&retrieved);

    let generate_start = Instant::now();
    let mut response_text = state
        .inference
        .chat(&state.config.system_prompt, prompt, &injected)
        .await
        .map_err(|e| Error::InferenceFailure(format!("generation failed: {e}")))?;
    let generate_s = round4(generate_start.elapsed().as_secs_f64());

    let mut tool_used: Option<String> = None;
    let mut tool_result: Option<Value> = None;
    let mut generate_s_2: Option<f64> = None;

    if state.config.include_tools {
        if let Some((tool, args)) = parse_tool_call(&response_text) {
            let call_event = MemoryEvent::make("tool_call", "orchestrator", json!({"tool": tool.clone(), "args": args.clone()}), Some(run_id))?;
            state.events.append(&call_event).await?;

            let result = state
                .tools
                .run(&tool, &args)
                .unwrap_or_else(|e| json!({"ok": false, "tool": tool.clone(), "error": e.to_string()}));

            let result_event = MemoryEvent::make(
                "tool_result",
                format!("tool:{tool}"),
                json!({"tool": tool.clone(), "result": result.clone()}),
                Some(run_id),
            )?;
            state.events.append(&result_event).await?;

            let followup =
                format!("{prompt}\n\nTOOL_USED: {tool}\nTOOL_RESULT: {result}\n\nNow respond to the user with the final answer.");
            let gen2_start = Instant::now();
            response_text = state
                .inference
                .chat(&state.config.system_prompt, &followup, &injected)
                .await
                .map_err(|e| Error::InferenceFailure(format!("generation (post-tool) failed: {e}")))?;
            generate_s_2 = Some(round4(gen2_start.elapsed().as_secs_f64()));

            tool_used = Some(tool);
            tool_result = Some(result);
        }
    }

    let retrieved_ids: Vec<Uuid> = retrieved.iter().map(|r| r.id).collect();
    let response_event = MemoryEvent::make(
        "response",
        "orchestrator",
        json!({
            "prompt": prompt,
            "retrieved_topk": retrieved.len(),
            "retrieved_ids": retrieved_ids,
            "tool_used": tool_used,
            "response": response_text,
        }),
        Some(run_id),
    )?;
    let memory_id = state.events.append(&response_event).await?;

    let db_s = round4(total_start.elapsed().as_secs_f64());
    let total_s = db_s;
    let mut timings = json!({
        "embed_s": embed_s,
        "retrieve_s": retrieve_s,
        "generate_s": generate_s,
        "db_s": db_s,
        "total_s": total_s,
    });
    if let Some(g2) = generate_s_2 {
        timings["generate_s_2"] = json!(g2);
    }

    let retrieved_json: Vec<Value> = retrieved
        .iter()
        .map(|r| json!({"id": r.id, "source": r.source, "content": r.content, "cosine_sim": r.cosine_sim, "tool": r.tool}))
        .collect();

    Ok(Json(json!({
        "model": state.config.chat_model,
        "response": response_text,
        "memory_id": memory_id,
        "retrieved": retrieved_json,
        "tool_used": tool_used,
        "tool_result": tool_result,
        "timings": timings,
        "config": {"mode": "chat", "expected_dim": state.config.expected_embed_dim},
        "run_id": run_id,
    })))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classify_detects_remember() {
        match classify("Remember this exact phrase: blue_giraffe_42") {
            Mode::Remember(p) => assert_eq!(p, "blue_giraffe_42"),
            _ => panic!("expected Remember"),
        }
    }

    #[test]
    fn classify_detects_recall() {
        assert!(matches!(classify("What exact phrase did I ask you to remember?"), Mode::Recall));
    }

    #[test]
    fn classify_falls_back_to_chat() {
        assert!(matches!(classify("what's the weather like"), Mode::Chat));
    }

    #[test]
    fn parse_tool_call_accepts_strict_json() {
        let (tool, args) = parse_tool_call(r#"{"tool":"ping","args":{"message":"hi"}}"#).unwrap();
        assert_eq!(tool, "ping");
        assert_eq!(args["message"], "hi");
    }

    #[test]
    fn parse_tool_call_rejects_non_json() {
        assert!(parse_tool_call("just a normal reply").is_none());
    }

    #[test]
    fn parse_tool_call_rejects_empty_tool_name() {
        assert!(parse_tool_call(r#"{"tool":"  ","args":{}}"#).is_none());
    }

    #[test]
    fn format_retrieved_skips_blank_content() {
        let rows = vec![aiop_domain::MemoryRow {
            id: Uuid::new_v4(),
            source: "orchestrator".into(),
            content: "  ".into(),
            embedding: None,
            embedding_model: None,
            tool: None,
            tool_result: None,
            created_at: chrono::Utc::now(),
            cosine_sim: Some(0.9),
        }];
        assert_eq!(format_retrieved_for_injection(&rows), "");
    }

    #[test]
    fn round4_rounds_to_four_decimals() {
        assert_eq!(round4(0.123456), 0.1235);
    }
}
