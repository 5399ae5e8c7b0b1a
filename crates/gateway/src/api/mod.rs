pub mod ask;
pub mod error;
pub mod health;
pub mod middleware;
pub mod trace;

use axum::routing::{get, post};
use axum::Router;
use tower_http::trace::TraceLayer;

use crate::state::AppState;

/// The full HTTP surface (§6): health/readiness, `/ask`, and `/trace/{run_id}`,
/// wrapped in the request-logging middleware plus a `tower-http` access-log
/// layer for good measure.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(health::healthz))
        .route("/readyz", get(health::readyz))
        .route("/ask", post(ask::ask))
        .route("/trace/:run_id", get(trace::trace))
        .layer(axum::middleware::from_fn(middleware::request_logging))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use aiop_domain::{default_registry, Config};
    use aiop_inference::{FakeInference, Inference};
    use aiop_store::{EventLog, FakeStore, Store};
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use serde_json::{json, Value};
    use tower::ServiceExt;

    use super::*;

    fn test_state() -> AppState {
        let store: Arc<dyn Store> = Arc::new(FakeStore::new(8));
        let events = Arc::new(EventLog::new(store.clone()));
        let inference: Arc<dyn Inference> = Arc::new(FakeInference::new(8, "just a normal reply"));
        let mut config = Config::default();
        config.expected_embed_dim = 8;
        AppState { config: Arc::new(config), store, events, inference, tools: default_registry() }
    }

    async fn body_json(response: axum::response::Response) -> Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn healthz_returns_ok() {
        let app = router(test_state());
        let response = app
            .oneshot(Request::builder().uri("/healthz").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert!(response.headers().contains_key("x-run-id"));
    }

    #[tokio::test]
    async fn ask_rejects_empty_prompt() {
        let app = router(test_state());
        let req = Request::builder()
            .method("POST")
            .uri("/ask")
            .header("content-type", "application/json")
            .body(Body::from(json!({"prompt": "   "}).to_string()))
            .unwrap();
        let response = app.oneshot(req).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn ask_remember_then_recall_round_trips() {
        let state = test_state();
        let app = router(state.clone());
        let remember_req = Request::builder()
            .method("POST")
            .uri("/ask")
            .header("content-type", "application/json")
            .body(Body::from(json!({"prompt": "Remember this exact phrase: blue_giraffe_42"}).to_string()))
            .unwrap();
        let response = app.clone().oneshot(remember_req).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["response"], "blue_giraffe_42");

        let recall_req = Request::builder()
            .method("POST")
            .uri("/ask")
            .header("content-type", "application/json")
            .body(Body::from(json!({"prompt": "What exact phrase did I ask you to remember?"}).to_string()))
            .unwrap();
        let response = app.oneshot(recall_req).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["response"], "blue_giraffe_42");
    }

    #[tokio::test]
    async fn ask_recall_without_prior_remember_is_404() {
        let app = router(test_state());
        let req = Request::builder()
            .method("POST")
            .uri("/ask")
            .header("content-type", "application/json")
            .body(Body::from(json!({"prompt": "What exact phrase did I ask you to remember?"}).to_string()))
            .unwrap();
        let response = app.oneshot(req).await.unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn ask_chat_returns_scripted_reply_and_run_id_header() {
        let app = router(test_state());
        let req = Request::builder()
            .method("POST")
            .uri("/ask")
            .header("content-type", "application/json")
            .header("x-run-id", "11111111-1111-1111-1111-111111111111")
            .body(Body::from(json!({"prompt": "tell me something"}).to_string()))
            .unwrap();
        let response = app.oneshot(req).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers().get("x-run-id").unwrap().to_str().unwrap(),
            "11111111-1111-1111-1111-111111111111"
        );
        let body = body_json(response).await;
        assert_eq!(body["response"], "just a normal reply");
        assert_eq!(body["tool_used"], Value::Null);
    }

    #[tokio::test]
    async fn ask_chat_with_tool_call_reply_runs_the_tool_turn() {
        let store: Arc<dyn Store> = Arc::new(FakeStore::new(8));
        let events = Arc::new(EventLog::new(store.clone()));
        let inference: Arc<dyn Inference> = Arc::new(FakeInference::new(8, r#"{"tool":"ping","args":{"message":"hi"}}"#));
        let mut config = Config::default();
        config.expected_embed_dim = 8;
        config.include_tools = true;
        let state = AppState { config: Arc::new(config), store, events, inference, tools: default_registry() };

        let app = router(state);
        let req = Request::builder()
            .method("POST")
            .uri("/ask")
            .header("content-type", "application/json")
            .body(Body::from(json!({"prompt": "ping please"}).to_string()))
            .unwrap();
        let response = app.oneshot(req).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["tool_used"], "ping");
        assert_eq!(body["tool_result"]["echo"], "hi");
        // The scripted chat reply is a fixed string regardless of the
        // follow-up prompt, matching FakeInference's behavior.
        assert_eq!(body["response"], r#"{"tool":"ping","args":{"message":"hi"}}"#);
    }

    #[tokio::test]
    async fn trace_returns_events_for_run() {
        let state = test_state();
        let app = router(state.clone());
        let req = Request::builder()
            .method("POST")
            .uri("/ask")
            .header("content-type", "application/json")
            .header("x-run-id", "22222222-2222-2222-2222-222222222222")
            .body(Body::from(json!({"prompt": "Remember this exact phrase: hi there"}).to_string()))
            .unwrap();
        app.clone().oneshot(req).await.unwrap();

        let trace_req = Request::builder()
            .uri("/trace/22222222-2222-2222-2222-222222222222")
            .body(Body::empty())
            .unwrap();
        let response = app.oneshot(trace_req).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["count"], 1);
        assert_eq!(body["events"][0]["event"]["type"], "remember_phrase");
    }
}
