use async_trait::async_trait;
use aiop_domain::{Error, MemoryRow, Result, Task, TaskType};
use pgvector::Vector;
use serde_json::Value;
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Row};
use uuid::Uuid;

use crate::Store;

/// [`Store`] backed by Postgres + `pgvector` (§3.1 schema, §4.1/§4.5
/// operations). All mutation funnels through plain `sqlx::query` (not the
/// `query!` macro family, which needs a live connection to typecheck
/// against at build time) so the crate stays buildable offline.
pub struct PgStore {
    pool: PgPool,
    expected_dim: usize,
}

impl PgStore {
    pub async fn connect(database_url: &str, expected_dim: usize) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(10)
            .connect(database_url)
            .await
            .map_err(|e| Error::StoreUnavailable(format!("connecting to store: {e}")))?;
        Ok(Self { pool, expected_dim })
    }

    /// Applies the bundled migrations. Call once at startup (see `main`).
    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| Error::StoreUnavailable(format!("running migrations: {e}")))
    }

    fn row_to_memory(row: &sqlx::postgres::PgRow) -> Result<MemoryRow> {
        let embedding: Option<Vector> = row.try_get("embedding").map_err(pg_err)?;
        Ok(MemoryRow {
            id: row.try_get("id").map_err(pg_err)?,
            source: row.try_get("source").map_err(pg_err)?,
            content: row.try_get("content").map_err(pg_err)?,
            embedding: embedding.map(|v| v.to_vec()),
            embedding_model: row.try_get("embedding_model").map_err(pg_err)?,
            tool: row.try_get("tool").map_err(pg_err)?,
            tool_result: row.try_get("tool_result").map_err(pg_err)?,
            created_at: row.try_get("created_at").map_err(pg_err)?,
            cosine_sim: row.try_get::<Option<f64>, _>("cosine_sim").map_err(pg_err)?,
        })
    }

    fn row_to_task(row: &sqlx::postgres::PgRow) -> Result<Task> {
        Ok(Task {
            id: row.try_get("id").map_err(pg_err)?,
            task_type: row.try_get("type").map_err(pg_err)?,
            payload: row.try_get("payload").map_err(pg_err)?,
            priority: row.try_get("priority").map_err(pg_err)?,
            status: row.try_get("status").map_err(pg_err)?,
            attempts: row.try_get("attempts").map_err(pg_err)?,
            max_attempts: row.try_get("max_attempts").map_err(pg_err)?,
            available_at: row.try_get("available_at").map_err(pg_err)?,
            created_at: row.try_get("created_at").map_err(pg_err)?,
            updated_at: row.try_get("updated_at").map_err(pg_err)?,
            locked_by: row.try_get("locked_by").map_err(pg_err)?,
            locked_at: row.try_get("locked_at").map_err(pg_err)?,
            lock_expires_at: row.try_get("lock_expires_at").map_err(pg_err)?,
            result: row.try_get("result").map_err(pg_err)?,
            last_error: row.try_get("last_error").map_err(pg_err)?,
            run_id: row.try_get("run_id").map_err(pg_err)?,
        })
    }
}

fn pg_err(e: sqlx::Error) -> Error {
    Error::StoreUnavailable(e.to_string())
}

#[async_trait]
impl Store for PgStore {
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
        let embedding = embedding.map(Vector::from);
        sqlx::query(
            "INSERT INTO memory (id, source, content, embedding, embedding_model, tool, tool_result, created_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, now())",
        )
        .bind(id)
        .bind(source)
        .bind(content)
        .bind(embedding)
        .bind(embedding_model)
        .bind(tool)
        .bind(tool_result)
        .execute(&self.pool)
        .await
        .map_err(pg_err)?;
        Ok(id)
    }

    async fn search_memories(
        &self,
        query_vec: &[f32],
        top_k: i64,
        min_similarity: f64,
        include_tools: bool,
    ) -> Result<Vec<MemoryRow>> {
        let qvec = Vector::from(query_vec.to_vec());
        let tool_clause = if include_tools { "" } else { "AND (tool IS NULL OR tool = '')" };
        let sql = format!(
            "SELECT id, source, content, embedding, embedding_model, tool, tool_result, created_at, \
                    1 - (embedding <=> $1) AS cosine_sim \
             FROM memory \
             WHERE embedding IS NOT NULL {tool_clause} \
               AND (1 - (embedding <=> $1)) >= $2 \
             ORDER BY embedding <=> $1 \
             LIMIT $3"
        );
        let rows = sqlx::query(&sql)
            .bind(qvec)
            .bind(min_similarity)
            .bind(top_k)
            .fetch_all(&self.pool)
            .await
            .map_err(pg_err)?;
        rows.iter().map(Self::row_to_memory).collect()
    }

    async fn list_event_rows(&self) -> Result<Vec<MemoryRow>> {
        let rows = sqlx::query(
            "SELECT id, source, content, embedding, embedding_model, tool, tool_result, created_at, NULL::float8 AS cosine_sim \
             FROM memory WHERE content LIKE 'EVENT:%' ORDER BY created_at ASC",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(pg_err)?;
        rows.iter().map(Self::row_to_memory).collect()
    }

    async fn get_latest_phrase(&self, include_tools: bool) -> Result<Option<String>> {
        let tool_clause = if include_tools { "" } else { "AND (tool IS NULL OR tool = '')" };
        let sql = format!(
            "SELECT content FROM memory \
             WHERE content LIKE 'EVENT:%' {tool_clause} \
             ORDER BY created_at DESC"
        );
        let rows = sqlx::query(&sql).fetch_all(&self.pool).await.map_err(pg_err)?;
        for row in rows {
            let content: String = row.try_get("content").map_err(pg_err)?;
            if let Some(event) = aiop_domain::parse_event_content(&content) {
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
        sqlx::query("SELECT 1").execute(&self.pool).await.map_err(pg_err)?;
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
        let max_attempts = max_attempts.unwrap_or(aiop_domain::DEFAULT_MAX_ATTEMPTS);
        sqlx::query(
            "INSERT INTO tasks (id, type, payload, priority, status, attempts, max_attempts, available_at, created_at, updated_at, run_id) \
             VALUES ($1, $2, $3, $4, 'queued', 0, $5, now(), now(), now(), $6)",
        )
        .bind(id)
        .bind(task_type.as_str())
        .bind(payload)
        .bind(priority)
        .bind(max_attempts)
        .bind(run_id)
        .execute(&self.pool)
        .await
        .map_err(pg_err)?;
        Ok(id)
    }

    async fn claim_task(&self, worker_id: &str, lock_s: i64) -> Result<Option<Task>> {
        let row = sqlx::query(
            "WITH candidate AS ( \
                SELECT id FROM tasks \
                WHERE (status = 'queued' AND available_at <= now()) \
                   OR (status = 'running' AND lock_expires_at < now()) \
                ORDER BY priority ASC, created_at ASC \
                FOR UPDATE SKIP LOCKED \
                LIMIT 1 \
            ) \
            UPDATE tasks t \
            SET status = 'running', \
                locked_by = $1, \
                locked_at = now(), \
                lock_expires_at = now() + ($2 || ' seconds')::interval, \
                attempts = attempts + 1, \
                updated_at = now() \
            FROM candidate c \
            WHERE t.id = c.id \
            RETURNING t.*",
        )
        .bind(worker_id)
        .bind(lock_s.to_string())
        .fetch_optional(&self.pool)
        .await
        .map_err(pg_err)?;

        row.as_ref().map(Self::row_to_task).transpose()
    }

    async fn complete_task_success(&self, id: Uuid, result: Value) -> Result<()> {
        sqlx::query(
            "UPDATE tasks SET status='succeeded', result=$2, last_error=NULL, \
             locked_by=NULL, locked_at=NULL, lock_expires_at=NULL, updated_at=now() \
             WHERE id=$1",
        )
        .bind(id)
        .bind(result)
        .execute(&self.pool)
        .await
        .map_err(pg_err)?;
        Ok(())
    }

    async fn complete_task_failure(&self, id: Uuid, error: &str, retry_backoff_s: i64) -> Result<()> {
        sqlx::query(
            "UPDATE tasks SET \
                status = CASE WHEN attempts >= max_attempts THEN 'failed' ELSE 'queued' END, \
                last_error = $2, \
                available_at = CASE WHEN attempts >= max_attempts THEN available_at \
                                     ELSE now() + ($3 || ' seconds')::interval END, \
                locked_by = NULL, locked_at = NULL, lock_expires_at = NULL, \
                updated_at = now() \
             WHERE id = $1",
        )
        .bind(id)
        .bind(error)
        .bind(retry_backoff_s.max(0).to_string())
        .execute(&self.pool)
        .await
        .map_err(pg_err)?;
        Ok(())
    }

    async fn get_task(&self, id: Uuid) -> Result<Option<Task>> {
        let row = sqlx::query("SELECT * FROM tasks WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(pg_err)?;
        row.as_ref().map(Self::row_to_task).transpose()
    }
}
