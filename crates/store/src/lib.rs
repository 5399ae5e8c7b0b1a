mod eventlog;
mod fake;
mod pg;

pub use eventlog::EventLog;
pub use fake::FakeStore;
pub use pg::PgStore;

use async_trait::async_trait;
use aiop_domain::{MemoryRow, Result, Task, TaskType};
use serde_json::Value;
use uuid::Uuid;

/// Persistence of memory events and tasks; vector similarity search;
/// transactional task claim/complete/fail (§4.1, §4.5).
///
/// One trait, two implementations: [`PgStore`] against a live Postgres +
/// pgvector instance, and [`FakeStore`] (an in-memory double) used by the
/// rest of the crate's test suite so `EventLog`, the Worker dispatch loop,
/// and claim/lease-expiry logic can be exercised without a database.
#[async_trait]
pub trait Store: Send + Sync {
    /// Allocates an id, stamps `created_at = now()`, writes one row.
    /// `embedding`, when present, must match the store's configured
    /// dimension (`InvalidArgument` otherwise).
    async fn insert_memory(
        &self,
        source: &str,
        content: &str,
        embedding: Option<Vec<f32>>,
        embedding_model: Option<&str>,
        tool: Option<&str>,
        tool_result: Option<Value>,
    ) -> Result<Uuid>;

    /// Rows with a non-null embedding, cosine similarity >= `min_similarity`,
    /// sorted descending by similarity, truncated to `top_k`. Excludes rows
    /// with a non-empty `tool` column unless `include_tools` is set.
    async fn search_memories(
        &self,
        query_vec: &[f32],
        top_k: i64,
        min_similarity: f64,
        include_tools: bool,
    ) -> Result<Vec<MemoryRow>>;

    /// All rows whose `content` begins with `EVENT:`, oldest first. Callers
    /// (`EventLog::get_trace`) filter by envelope `run_id` and parse JSON.
    async fn list_event_rows(&self) -> Result<Vec<MemoryRow>>;

    /// Most recently remembered phrase (`remember_phrase` envelope), same
    /// tool filter as `search_memories`. See SPEC_FULL.md §9(c) for why this
    /// scans `EVENT:` rows rather than a separate `PHRASE:` prefix.
    async fn get_latest_phrase(&self, include_tools: bool) -> Result<Option<String>>;

    /// Succeeds when a trivial round-trip to the backing store completes.
    async fn db_ping(&self) -> Result<()>;

    /// Inserts a new queued task. Lower `priority` is serviced earlier;
    /// the default is `100` (see [`aiop_domain::task::DEFAULT_PRIORITY`]).
    async fn enqueue_task(
        &self,
        task_type: TaskType,
        payload: Value,
        priority: i32,
        max_attempts: Option<i32>,
        run_id: Option<Uuid>,
    ) -> Result<Uuid>;

    /// Atomically claims one eligible row: `status='queued'` or an expired
    /// lease (`status='running' AND lock_expires_at < now()`), ordered
    /// `(priority ASC, created_at ASC)`, under `FOR UPDATE SKIP LOCKED`.
    async fn claim_task(&self, worker_id: &str, lock_s: i64) -> Result<Option<Task>>;

    async fn complete_task_success(&self, id: Uuid, result: Value) -> Result<()>;

    async fn complete_task_failure(&self, id: Uuid, error: &str, retry_backoff_s: i64) -> Result<()>;

    /// Fetches a single task by id (used by tests and `/trace`-adjacent tooling).
    async fn get_task(&self, id: Uuid) -> Result<Option<Task>>;
}
