pub mod artifacts;
pub mod patch_apply;

use std::sync::Arc;
use std::time::{Duration, Instant};

use aiop_domain::{Error, Result, Task, TaskType, ToolRegistry};
use aiop_store::{EventLog, Store};
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use artifacts::Artifacts;
use patch_apply::PatchApplier;

/// Long-running dispatch loop (§4.6). One `Worker` per process; multiple
/// processes compete for rows via [`Store::claim_task`]'s `FOR UPDATE SKIP
/// LOCKED` semantics, so no in-process coordination is needed here.
pub struct Worker {
    worker_id: String,
    poll_s: u64,
    lock_s: i64,
    store: Arc<dyn Store>,
    events: EventLog,
    tools: ToolRegistry,
    patch_applier: Arc<dyn PatchApplier>,
}

impl Worker {
    pub fn new(
        store: Arc<dyn Store>,
        tools: ToolRegistry,
        patch_applier: Arc<dyn PatchApplier>,
        poll_s: u64,
        lock_s: i64,
    ) -> Self {
        let worker_id = format!("{}:{}", hostname(), std::process::id());
        let events = EventLog::new(store.clone());
        Self { worker_id, poll_s, lock_s, store, events, tools, patch_applier }
    }

    pub fn worker_id(&self) -> &str {
        &self.worker_id
    }

    /// Runs until `cancel` is triggered. The token is only observed between
    /// iterations (before the next `claim_task`) — a task already dispatched
    /// always runs to completion (§5 "Cancellation").
    pub async fn run_forever(&self, cancel: CancellationToken) {
        loop {
            if cancel.is_cancelled() {
                tracing::info!(worker_id = %self.worker_id, "worker loop stopping");
                return;
            }
            match self.run_once().await {
                Ok(true) => {}
                Ok(false) => {
                    tokio::select! {
                        _ = tokio::time::sleep(Duration::from_secs(self.poll_s)) => {}
                        _ = cancel.cancelled() => {}
                    }
                }
                Err(e) => {
                    tracing::error!(worker_id = %self.worker_id, error = %e, "claim_task failed");
                    tokio::time::sleep(Duration::from_secs(self.poll_s)).await;
                }
            }
        }
    }

    /// Claims and fully processes at most one task. Returns `Ok(true)` when
    /// a task was claimed (whether it ultimately succeeded or failed),
    /// `Ok(false)` when the queue was empty.
    pub async fn run_once(&self) -> Result<bool> {
        let task = match self.store.claim_task(&self.worker_id, self.lock_s).await? {
            Some(t) => t,
            None => return Ok(false),
        };
        self.process(task).await;
        Ok(true)
    }

    async fn process(&self, task: Task) {
        let run_id = task.run_id;

        if let Err(e) = self
            .events
            .append(&make_envelope(
                "task.claimed",
                run_id,
                json!({
                    "task_id": task.id,
                    "task_type": task.task_type,
                    "attempts": task.attempts,
                    "max_attempts": task.max_attempts,
                    "worker_id": self.worker_id,
                    "payload": task.payload,
                }),
            ))
            .await
        {
            tracing::warn!(error = %e, "failed to append task.claimed event");
        }

        if let Err(e) = self
            .events
            .append(&make_envelope(&task.task_type, run_id, task.payload.clone()))
            .await
        {
            tracing::warn!(error = %e, "failed to append task begin event");
        }

        let started = Instant::now();
        let outcome = self.dispatch(&task).await;
        let took_ms = started.elapsed().as_millis() as i64;

        match outcome {
            Ok(result) => {
                let normalized = normalize_result(result);
                let mut envelope = json!({"ok": true, "kind": task.task_type, "took_ms": took_ms});
                merge_into(&mut envelope, &normalized);

                if let Err(e) = self.store.complete_task_success(task.id, envelope.clone()).await {
                    tracing::error!(task_id = %task.id, error = %e, "complete_task_success failed");
                }
                let result_kind = format!("{}.result", task.task_type);
                if let Err(e) = self.events.append(&make_envelope(&result_kind, run_id, envelope)).await {
                    tracing::warn!(error = %e, "failed to append task result event");
                }
            }
            Err(e) => {
                let backoff_s = aiop_domain::backoff_seconds(task.attempts);
                let message = e.to_string();
                if let Err(store_err) = self.store.complete_task_failure(task.id, &message, backoff_s).await {
                    tracing::error!(task_id = %task.id, error = %store_err, "complete_task_failure failed");
                }

                let permanently_failed = task.attempts >= task.max_attempts;
                let kind = if permanently_failed { "task.permanently_failed" } else { "task.failed" };
                let payload = json!({
                    "task_id": task.id,
                    "task_type": task.task_type,
                    "attempts": task.attempts,
                    "max_attempts": task.max_attempts,
                    "error_kind": error_kind(&e),
                    "error": message,
                    "backoff_s": backoff_s,
                });
                if let Err(log_err) = self.events.append(&make_envelope(kind, run_id, payload)).await {
                    tracing::warn!(error = %log_err, "failed to append task failure event");
                }
            }
        }
    }

    async fn dispatch(&self, task: &Task) -> Result<Value> {
        let task_type = TaskType::parse(&task.task_type)?;
        match task_type {
            TaskType::ToolCall => self.dispatch_tool_call(&task.payload),
            TaskType::RepoChange => Artifacts::write_patch(&task.payload),
            TaskType::DocBuild => Artifacts::write_doc(&task.payload),
            TaskType::PatchApply => self.dispatch_patch_apply(&task.payload).await,
        }
    }

    fn dispatch_tool_call(&self, payload: &Value) -> Result<Value> {
        let tool = payload
            .get("tool")
            .and_then(Value::as_str)
            .ok_or_else(|| Error::InvalidArgument("payload.tool required".into()))?;
        let args = payload.get("args").cloned().unwrap_or_else(|| json!({}));
        self.tools.run(tool, &args)
    }

    async fn dispatch_patch_apply(&self, payload: &Value) -> Result<Value> {
        let repo_path = payload
            .get("repo_path")
            .and_then(Value::as_str)
            .ok_or_else(|| Error::InvalidArgument("payload.repo_path required".into()))?;
        let patch_path = payload
            .get("patch_path")
            .and_then(Value::as_str)
            .ok_or_else(|| Error::InvalidArgument("payload.patch_path required".into()))?;
        // require_clean defaults to true, preserving the source's default (§9b).
        let require_clean = payload.get("require_clean").and_then(Value::as_bool).unwrap_or(true);
        let check_only = payload.get("check_only").and_then(Value::as_bool).unwrap_or(false);

        let result = self.patch_applier.apply(repo_path, patch_path, require_clean, check_only).await?;
        serde_json::to_value(result).map_err(Error::from)
    }
}

fn error_kind(e: &Error) -> &'static str {
    match e {
        Error::BadRequest(_) => "bad_request",
        Error::NotFound(_) => "not_found",
        Error::Unavailable(_) => "unavailable",
        Error::InvalidArgument(_) => "invalid_argument",
        Error::UnknownTool(_) => "unknown_tool",
        Error::DuplicateTool(_) => "duplicate_tool",
        Error::UnknownTaskType(_) => "unknown_task_type",
        Error::StoreUnavailable(_) => "store_unavailable",
        Error::InferenceFailure(_) => "inference_failure",
        Error::Io(_) => "io",
        Error::Json(_) => "json",
        Error::Config(_) => "config",
        Error::Other(_) => "other",
    }
}

/// Wraps scalars as `{value: x}`; leaves JSON objects as-is so their fields
/// flatten into the result envelope (§4.6 step 5).
fn normalize_result(value: Value) -> Value {
    if value.is_object() {
        value
    } else {
        json!({"value": value})
    }
}

fn merge_into(target: &mut Value, extra: &Value) {
    if let (Some(target_obj), Some(extra_obj)) = (target.as_object_mut(), extra.as_object()) {
        for (k, v) in extra_obj {
            target_obj.insert(k.clone(), v.clone());
        }
    }
}

fn make_envelope(kind: &str, run_id: Option<Uuid>, data: Value) -> aiop_domain::MemoryEvent {
    aiop_domain::MemoryEvent::make(kind, "worker", data, run_id)
        .expect("worker-authored envelopes always carry a non-empty kind/source and object data")
}

fn hostname() -> String {
    std::env::var("HOSTNAME").ok().filter(|s| !s.is_empty()).unwrap_or_else(|| "worker".to_string())
}
