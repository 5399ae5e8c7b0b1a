pub mod config;
pub mod error;
pub mod event;
pub mod task;
pub mod tool;

pub use config::Config;
pub use error::{Error, Result};
pub use event::{canonical_json, parse_event_content, MemoryEvent, MemoryRow, TraceEntry};
pub use task::{backoff_seconds, Task, TaskStatus, TaskType, DEFAULT_MAX_ATTEMPTS, DEFAULT_PRIORITY};
pub use tool::{default_registry, PropertySchema, ToolHandler, ToolRegistry, ToolSchema, ToolSpec};
