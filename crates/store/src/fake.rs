use std::collections::HashMap;

use async_trait::async_trait;
use aiop_domain::{Error, MemoryRow, Result, Task, TaskStatus, TaskType, DEFAULT_MAX_ATTEMPTS};
use chrono::Utc;
use parking_lot::RwLock;
use serde_json::Value;
use uuid::Uuid;

use crate::Store;

/// In-memory [`Store`] double for tests: `Vec<MemoryRow>` + `HashMap<Uuid,
/// Task>` behind `parking_lot::RwLock`s (§8.1). Contention in tests is
/// exercised with `tokio::spawn` + a `tokio::sync::Barrier` rather than a
/// real `FOR UPDATE SKIP LOCKED` round-trip — the write-lock critical
/// section below still gives exactly-once claim semantics, but it is a
/// documented fidelity gap relative to Postgres row locking (see
/// DESIGN.md).
pub struct FakeStore {
    expected_dim: usize,
    memory: RwLock<Vec<MemoryRow>>,
    tasks: RwLock<HashMap<Uuid, Task>>,
}

impl FakeStore {
    pub fn new(expected_dim: usize) -> Self {
        Self {
            expected_dim,
            memory: RwLock::new(Vec::new()),
            tasks: RwLock::new(HashMap::new()),
        }
    }

    pub fn memory_len(&self) -> usize {
        self.memory.read().len()
    }
}

fn cosine_similarity(a: &[f32], b: &[f32]) -> f64 {
    let dot: f64 = a.iter().zip(b).map(|(x, y)| (*x as f64) * (*y as f64)).sum();
    let norm_a: f64 = a.iter().map(|x| (*x as f64).powi(2)).sum::<f64>().sqrt();
    let norm_b: f64 = b.iter().map(|x| (*x as f64).powi(2)).sum::<f64>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a * norm_b)
}

#[async_trait]
impl Store for FakeStore {
    async fn insert_memory(
        &self,
        source: &str,
        content: &str,
        embedding: Option<Vec<f32>>,
        embedding_model: Option<&str>,
        tool: Option<&str>,
        tool_result: Option<Value>,
    ) -> Result<Uuid> {
        if let Some(emb) = &embedding {
            if emb.len() != self.expected_dim {
                return Err(Error::InvalidArgument(format!(
                    "expected {}-dim embedding, got {}",
                    self.expected_dim,
                    emb.len()
                )));
            }
        }
        let id = Uuid::new_v4();
        let row = MemoryRow {
            id,
            source: source.to_string(),
            content: content.to_string(),
            embedding,
            embedding_model: embedding_model.map(str::to_string),
            tool: tool.map(str::to_string),
            tool_result,
            created_at: Utc::now(),
            cosine_sim: None,
        };
        self.memory.write().push(row);
        Ok(id)
    }

    async fn search_memories(
        &self,
        query_vec: &[f32],
        top_k: i64,
        min_similarity: f64,
        include_tools: bool,
    ) -> Result<Vec<MemoryRow>> {
        let mut candidates: Vec<MemoryRow> = self
            .memory
            .read()
            .iter()
            .filter(|row| row.embedding.is_some())
            .filter(|row| include_tools || row.tool.as_deref().unwrap_or("").is_empty())
            .filter_map(|row| {
                let sim = cosine_similarity(row.embedding.as_ref().unwrap(), query_vec);
                if sim >= min_similarity {
                    let mut row = row.clone();
                    row.cosine_sim = Some(sim);
                    Some(row)
                } else {
                    None
                }
            })
            .collect();
        candidates.sort_by(|a, b| b.cosine_sim.partial_cmp(&a.cosine_sim).unwrap());
        candidates.truncate(top_k.max(0) as usize);
        Ok(candidates)
    }

    async fn list_event_rows(&self) -> Result<Vec<MemoryRow>> {
        let mut rows: Vec<MemoryRow> = self
            .memory
            .read()
            .iter()
            .filter(|row| row.content.starts_with("EVENT:"))
            .cloned()
            .collect();
        rows.sort_by_key(|r| r.created_at);
        Ok(rows)
    }

    async fn get_latest_phrase(&self, include_tools: bool) -> Result<Option<String>> {
        let rows = self.list_event_rows().await?;
        for row in rows.into_iter().rev() {
            if !include_tools && !row.tool.as_deref().unwrap_or("").is_empty() {
                continue;
            }
            if let Some(event) = aiop_domain::parse_event_content(&row.content) {
                if event.kind == "remember_phrase" {
                    if let Some(phrase) = event.data.get("phrase").and_then(Value::as_str) {
                        return Ok(Some(phrase.trim().to_string()));
                    }
                }
            }
        }
        Ok(None)
    }

    async fn db_ping(&self) -> Result<()> {
        Ok(())
    }

    async fn enqueue_task(
        &self,
        task_type: TaskType,
        payload: Value,
        priority: i32,
        max_attempts: Option<i32>,
        run_id: Option<Uuid>,
    ) -> Result<Uuid> {
        let id = Uuid::new_v4();
        let now = Utc::now();
        let task = Task {
            id,
            task_type: task_type.as_str().to_string(),
            payload,
            priority,
            status: TaskStatus::Queued.as_str().to_string(),
            attempts: 0,
            max_attempts: max_attempts.unwrap_or(DEFAULT_MAX_ATTEMPTS),
            available_at: now,
            created_at: now,
            updated_at: now,
            locked_by: None,
            locked_at: None,
            lock_expires_at: None,
            result: None,
            last_error: None,
            run_id,
        };
        self.tasks.write().insert(id, task);
        Ok(id)
    }

    async fn claim_task(&self, worker_id: &str, lock_s: i64) -> Result<Option<Task>> {
        let mut tasks = self.tasks.write();
        let now = Utc::now();

        let candidate_id = tasks
            .values()
            .filter(|t| {
                let queued_ready = t.status == TaskStatus::Queued.as_str() && t.available_at <= now;
                let lease_expired = t.status == TaskStatus::Running.as_str()
                    && t.lock_expires_at.map(|exp| exp < now).unwrap_or(false);
                queued_ready || lease_expired
            })
            .min_by(|a, b| a.priority.cmp(&b.priority).then(a.created_at.cmp(&b.created_at)))
            .map(|t| t.id);

        let Some(id) = candidate_id else {
            return Ok(None);
        };

        let task = tasks.get_mut(&id).expect("candidate id came from this map");
        task.status = TaskStatus::Running.as_str().to_string();
        task.locked_by = Some(worker_id.to_string());
        task.locked_at = Some(now);
        task.lock_expires_at = Some(now + chrono::Duration::seconds(lock_s));
        task.attempts += 1;
        task.updated_at = now;
        Ok(Some(task.clone()))
    }

    async fn complete_task_success(&self, id: Uuid, result: Value) -> Result<()> {
        let mut tasks = self.tasks.write();
        let task = tasks
            .get_mut(&id)
            .ok_or_else(|| Error::Other(format!("no such task: {id}")))?;
        task.status = TaskStatus::Succeeded.as_str().to_string();
        task.result = Some(result);
        task.last_error = None;
        task.locked_by = None;
        task.locked_at = None;
        task.lock_expires_at = None;
        task.updated_at = Utc::now();
        Ok(())
    }

    async fn complete_task_failure(&self, id: Uuid, error: &str, retry_backoff_s: i64) -> Result<()> {
        let mut tasks = self.tasks.write();
        let task = tasks
            .get_mut(&id)
            .ok_or_else(|| Error::Other(format!("no such task: {id}")))?;
        let now = Utc::now();
        if task.attempts >= task.max_attempts {
            task.status = TaskStatus::Failed.as_str().to_string();
        } else {
            task.status = TaskStatus::Queued.as_str().to_string();
            task.available_at = now + chrono::Duration::seconds(retry_backoff_s.max(0));
        }
        task.last_error = Some(error.to_string());
        task.locked_by = None;
        task.locked_at = None;
        task.lock_expires_at = None;
        task.updated_at = now;
        Ok(())
    }

    async fn get_task(&self, id: Uuid) -> Result<Option<Task>> {
        Ok(self.tasks.read().get(&id).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::Arc;
    use tokio::sync::Barrier;

    #[tokio::test]
    async fn insert_memory_rejects_wrong_dimension() {
        let store = FakeStore::new(4);
        let err = store
            .insert_memory("orchestrator", "EVENT:{}", Some(vec![1.0, 2.0]), None, None, None)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidArgument(_)));
    }

    #[tokio::test]
    async fn search_memories_filters_tools_and_orders_by_similarity() {
        let store = FakeStore::new(2);
        store
            .insert_memory("orchestrator", "a", Some(vec![1.0, 0.0]), None, None, None)
            .await
            .unwrap();
        store
            .insert_memory("orchestrator", "b", Some(vec![0.0, 1.0]), None, None, None)
            .await
            .unwrap();
        store
            .insert_memory("tool:ping", "c", Some(vec![1.0, 0.0]), None, Some("ping"), None)
            .await
            .unwrap();

        let results = store.search_memories(&[1.0, 0.0], 5, 0.0, false).await.unwrap();
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].content, "a");

        let with_tools = store.search_memories(&[1.0, 0.0], 5, 0.0, true).await.unwrap();
        assert_eq!(with_tools.len(), 3);
    }

    #[tokio::test]
    async fn get_latest_phrase_returns_most_recent_remember_event() {
        let store = FakeStore::new(2);
        let e1 = aiop_domain::MemoryEvent::make("remember_phrase", "orchestrator", json!({"phrase": "first"}), None).unwrap();
        let e2 = aiop_domain::MemoryEvent::make("remember_phrase", "orchestrator", json!({"phrase": "second"}), None).unwrap();
        store
            .insert_memory(&e1.source, &e1.to_content().unwrap(), None, None, Some("remember_phrase"), None)
            .await
            .unwrap();
        store
            .insert_memory(&e2.source, &e2.to_content().unwrap(), None, None, Some("remember_phrase"), None)
            .await
            .unwrap();

        assert_eq!(store.get_latest_phrase(false).await.unwrap(), Some("second".to_string()));
    }

    #[tokio::test]
    async fn concurrent_claims_are_exactly_once() {
        let store = Arc::new(FakeStore::new(2));
        let id = store
            .enqueue_task(TaskType::ToolCall, json!({"tool": "ping", "args": {}}), 10, None, None)
            .await
            .unwrap();

        let barrier = Arc::new(Barrier::new(2));
        let mut handles = Vec::new();
        for worker_n in 0..2 {
            let store = store.clone();
            let barrier = barrier.clone();
            handles.push(tokio::spawn(async move {
                barrier.wait().await;
                store.claim_task(&format!("worker-{worker_n}"), 60).await.unwrap()
            }));
        }

        let mut claimed = 0;
        for h in handles {
            if h.await.unwrap().is_some() {
                claimed += 1;
            }
        }
        assert_eq!(claimed, 1);

        let task = store.get_task(id).await.unwrap().unwrap();
        assert_eq!(task.attempts, 1);
        assert_eq!(task.status, "running");
    }

    #[tokio::test]
    async fn failure_requeues_until_max_attempts_then_terminal() {
        let store = FakeStore::new(2);
        let id = store
            .enqueue_task(TaskType::ToolCall, json!({}), 100, Some(2), None)
            .await
            .unwrap();

        store.claim_task("w1", 60).await.unwrap();
        store.complete_task_failure(id, "boom", 1).await.unwrap();
        let task = store.get_task(id).await.unwrap().unwrap();
        assert_eq!(task.status, "queued");
        assert_eq!(task.attempts, 1);

        store.claim_task("w1", 60).await.unwrap();
        store.complete_task_failure(id, "boom again", 2).await.unwrap();
        let task = store.get_task(id).await.unwrap().unwrap();
        assert_eq!(task.status, "failed");
        assert_eq!(task.attempts, 2);
        assert!(task.locked_by.is_none());
    }

    #[tokio::test]
    async fn expired_lease_is_reclaimable() {
        let store = FakeStore::new(2);
        let id = store.enqueue_task(TaskType::ToolCall, json!({}), 100, None, None).await.unwrap();
        store.claim_task("w1", -1).await.unwrap();

        let reclaimed = store.claim_task("w2", 60).await.unwrap().unwrap();
        assert_eq!(reclaimed.id, id);
        assert_eq!(reclaimed.attempts, 2);
        assert_eq!(reclaimed.locked_by.as_deref(), Some("w2"));
    }

    #[tokio::test]
    async fn complete_success_clears_lease_fields() {
        let store = FakeStore::new(2);
        let id = store.enqueue_task(TaskType::ToolCall, json!({}), 100, None, None).await.unwrap();
        store.claim_task("w1", 60).await.unwrap();
        store.complete_task_success(id, json!({"ok": true})).await.unwrap();
        let task = store.get_task(id).await.unwrap().unwrap();
        assert_eq!(task.status, "succeeded");
        assert!(task.locked_by.is_none());
        assert!(task.locked_at.is_none());
        assert!(task.lock_expires_at.is_none());
    }
}
