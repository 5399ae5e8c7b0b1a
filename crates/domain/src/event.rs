use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::error::{Error, Result};

/// The canonical envelope for anything persisted into the memory log.
///
/// `run_id` groups all events produced during a single `/ask` execution
/// or a single task run. `data` is a free-form JSON object.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MemoryEvent {
    pub id: Uuid,
    pub run_id: Option<Uuid>,
    #[serde(rename = "type")]
    pub kind: String,
    pub source: String,
    pub ts: DateTime<Utc>,
    pub data: Value,
}

impl MemoryEvent {
    /// Construct a fresh envelope: assigns an id, stamps `ts = now_utc()`.
    ///
    /// `kind` and `source` must be non-empty; `data` must be a JSON object
    /// (an empty object is fine).
    pub fn make(kind: impl Into<String>, source: impl Into<String>, data: Value, run_id: Option<Uuid>) -> Result<Self> {
        let kind = kind.into();
        let source = source.into();
        if kind.trim().is_empty() {
            return Err(Error::InvalidArgument("event type must be non-empty".into()));
        }
        if source.trim().is_empty() {
            return Err(Error::InvalidArgument("event source must be non-empty".into()));
        }
        if !data.is_object() {
            return Err(Error::InvalidArgument("event data must be a JSON object".into()));
        }
        Ok(Self {
            id: Uuid::new_v4(),
            run_id,
            kind,
            source,
            ts: Utc::now(),
            data,
        })
    }

    /// Serialize the envelope as canonical JSON: sorted keys, compact
    /// separators, UTF-8 preserved (non-ASCII not escaped). This is what
    /// makes `EVENT:<...>` content strings byte-stable across runs, and
    /// is the only thing `get_trace` round-trips through.
    pub fn to_canonical_json(&self) -> Result<String> {
        let value = serde_json::to_value(self)?;
        Ok(canonical_json(&value))
    }

    /// Content-column representation: `EVENT:<canonical-json>`.
    pub fn to_content(&self) -> Result<String> {
        Ok(format!("EVENT:{}", self.to_canonical_json()?))
    }

    /// JSONB-safe mirror stored in the `tool_result` column.
    pub fn to_tool_result(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}

/// Render a `serde_json::Value` with sorted object keys and compact
/// separators (`,`/`:` with no surrounding whitespace). `serde_json`
/// preserves key insertion order by default (or alphabetical order when
/// built with the `preserve_order` feature disabled); we sort explicitly
/// so the output is stable regardless of that feature flag.
pub fn canonical_json(value: &Value) -> String {
    fn sorted(value: &Value) -> Value {
        match value {
            Value::Object(map) => {
                let mut entries: Vec<(&String, &Value)> = map.iter().collect();
                entries.sort_by(|a, b| a.0.cmp(b.0));
                let mut sorted_map = serde_json::Map::new();
                for (k, v) in entries {
                    sorted_map.insert(k.clone(), sorted(v));
                }
                Value::Object(sorted_map)
            }
            Value::Array(items) => Value::Array(items.iter().map(sorted).collect()),
            other => other.clone(),
        }
    }
    serde_json::to_string(&sorted(value)).unwrap_or_default()
}

/// The persisted form of a [`MemoryEvent`] plus retrieval fields.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryRow {
    pub id: Uuid,
    pub source: String,
    pub content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub embedding: Option<Vec<f32>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub embedding_model: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_result: Option<Value>,
    pub created_at: DateTime<Utc>,
    /// Present only on rows returned by similarity search.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cosine_sim: Option<f64>,
}

/// One entry of a run trace, as returned by `get_trace`.
#[derive(Debug, Clone, Serialize)]
pub struct TraceEntry {
    pub created_at: DateTime<Utc>,
    pub tool: Option<String>,
    pub event: Option<MemoryEvent>,
}

/// Parse an `EVENT:`-prefixed content string back into its envelope.
/// Returns `None` if the prefix is missing or the JSON suffix fails to
/// parse — callers (`get_trace`) treat that as a skip, never an error.
pub fn parse_event_content(content: &str) -> Option<MemoryEvent> {
    let suffix = content.strip_prefix("EVENT:")?;
    serde_json::from_str(suffix).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn make_rejects_empty_type() {
        let err = MemoryEvent::make("", "orchestrator", json!({}), None).unwrap_err();
        assert!(matches!(err, Error::InvalidArgument(_)));
    }

    #[test]
    fn make_rejects_non_object_data() {
        let err = MemoryEvent::make("response", "orchestrator", json!("not an object"), None).unwrap_err();
        assert!(matches!(err, Error::InvalidArgument(_)));
    }

    #[test]
    fn canonical_json_sorts_keys_and_is_compact() {
        let value = json!({"b": 1, "a": {"d": 2, "c": 3}});
        assert_eq!(canonical_json(&value), r#"{"a":{"c":3,"d":2},"b":1}"#);
    }

    #[test]
    fn round_trip_through_content_string() {
        let event = MemoryEvent::make("remember_phrase", "orchestrator", json!({"phrase": "blue_giraffe_42"}), Some(Uuid::new_v4())).unwrap();
        let content = event.to_content().unwrap();
        assert!(content.starts_with("EVENT:"));
        let parsed = parse_event_content(&content).unwrap();
        assert_eq!(parsed.id, event.id);
        assert_eq!(parsed.run_id, event.run_id);
        assert_eq!(parsed.kind, event.kind);
        assert_eq!(parsed.data, event.data);
    }

    #[test]
    fn parse_event_content_rejects_missing_prefix() {
        assert!(parse_event_content(r#"{"id":"x"}"#).is_none());
    }

    #[test]
    fn parse_event_content_rejects_malformed_json() {
        assert!(parse_event_content("EVENT:{not json").is_none());
    }
}
