use std::sync::Arc;

use aiop_domain::{parse_event_content, MemoryEvent, Result, TraceEntry};
use serde_json::Value;
use uuid::Uuid;

use crate::Store;

/// The single canonical persistence path for anything that goes into the
/// memory log (§4.2, §9 "Single write path for events"). The Worker, the
/// tool turn, and the remember/response paths in the Orchestrator all go
/// through [`EventLog::write_event`] — no other write path exists.
pub struct EventLog {
    store: Arc<dyn Store>,
}

impl EventLog {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    /// Serializes `event` to `EVENT:<canonical-json>`, mirrors the envelope
    /// into the `tool_result` column, sets `tool` to `tool` (or falls back
    /// to `event.kind`), and inserts via [`Store::insert_memory`].
    pub async fn write_event(
        &self,
        event: &MemoryEvent,
        tool: Option<&str>,
        embedding: Option<Vec<f32>>,
        embedding_model: Option<&str>,
    ) -> Result<Uuid> {
        let content = event.to_content()?;
        let tool_result = event.to_tool_result();
        let tool_column = tool.unwrap_or(event.kind.as_str());
        self.store
            .insert_memory(
                &event.source,
                &content,
                embedding,
                embedding_model,
                Some(tool_column),
                Some(tool_result),
            )
            .await
    }

    /// Convenience wrapper for the common case: no embedding, `tool`
    /// column defaults to the event's own type.
    pub async fn append(&self, event: &MemoryEvent) -> Result<Uuid> {
        self.write_event(event, None, None, None).await
    }

    /// Scans `EVENT:`-prefixed rows, parses each JSON suffix, keeps those
    /// whose envelope `run_id` matches, and returns them ordered by
    /// `created_at` ascending. Parse failures are skipped with a null
    /// event rather than raised (§4.2).
    pub async fn get_trace(&self, run_id: Uuid) -> Result<Vec<TraceEntry>> {
        let rows = self.store.list_event_rows().await?;
        let mut out = Vec::new();
        for row in rows {
            let event = parse_event_content(&row.content);
            let matches = match &event {
                Some(e) => e.run_id == Some(run_id),
                None => false,
            };
            if matches {
                out.push(TraceEntry {
                    created_at: row.created_at,
                    tool: row.tool,
                    event,
                });
            }
        }
        out.sort_by_key(|e| e.created_at);
        Ok(out)
    }

    pub fn store(&self) -> &Arc<dyn Store> {
        &self.store
    }
}

/// Re-exported for convenience: `EventLog` callers build envelopes through
/// the same constructor the domain crate tests exercise directly.
pub fn make_event(kind: impl Into<String>, source: impl Into<String>, data: Value, run_id: Option<Uuid>) -> Result<MemoryEvent> {
    MemoryEvent::make(kind, source, data, run_id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::FakeStore;
    use serde_json::json;

    #[tokio::test]
    async fn write_event_round_trips_through_get_trace() {
        let store: Arc<dyn Store> = Arc::new(FakeStore::new(8));
        let log = EventLog::new(store);
        let run_id = Uuid::new_v4();

        let e1 = make_event("remember_phrase", "orchestrator", json!({"phrase": "x"}), Some(run_id)).unwrap();
        log.append(&e1).await.unwrap();

        let other_run = make_event("response", "orchestrator", json!({}), Some(Uuid::new_v4())).unwrap();
        log.append(&other_run).await.unwrap();

        let e2 = make_event("response", "orchestrator", json!({"response": "x"}), Some(run_id)).unwrap();
        log.append(&e2).await.unwrap();

        let trace = log.get_trace(run_id).await.unwrap();
        assert_eq!(trace.len(), 2);
        assert!(trace[0].created_at <= trace[1].created_at);
        assert_eq!(trace[0].event.as_ref().unwrap().kind, "remember_phrase");
        assert_eq!(trace[1].event.as_ref().unwrap().kind, "response");
    }

    #[tokio::test]
    async fn get_trace_is_empty_for_unknown_run() {
        let store: Arc<dyn Store> = Arc::new(FakeStore::new(8));
        let log = EventLog::new(store);
        let trace = log.get_trace(Uuid::new_v4()).await.unwrap();
        assert!(trace.is_empty());
    }
}
