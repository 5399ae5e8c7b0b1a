/// Shared error type used across all aiop crates.
///
/// Variants are kinds, not HTTP statuses — the HTTP boundary (in
/// `aiop-gateway`) maps each to a status code and JSON body; the Worker
/// maps each to retry/terminal task accounting instead.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("unavailable: {0}")]
    Unavailable(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("unknown tool: {0}")]
    UnknownTool(String),

    #[error("tool already registered: {0}")]
    DuplicateTool(String),

    #[error("unknown task type: {0}")]
    UnknownTaskType(String),

    #[error("store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("inference failed: {0}")]
    InferenceFailure(String),

    #[error("io: {0}")]
    Io(#[from] std::io::Error),

    #[error("json: {0}")]
    Json(#[from] serde_json::Error),

    #[error("config: {0}")]
    Config(String),

    #[error("{0}")]
    Other(String),
}

pub type Result<T> = std::result::Result<T, Error>;
