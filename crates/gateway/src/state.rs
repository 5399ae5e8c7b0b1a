use std::sync::Arc;

use aiop_domain::{Config, ToolRegistry};
use aiop_inference::Inference;
use aiop_store::{EventLog, Store};

/// Shared handles the HTTP surface needs per request. Cheap to clone —
/// every field is either an `Arc` or, for `ToolRegistry`, a map of `Arc`
/// handlers already designed to be shared (§4.4).
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub store: Arc<dyn Store>,
    pub events: Arc<EventLog>,
    pub inference: Arc<dyn Inference>,
    pub tools: ToolRegistry,
}
