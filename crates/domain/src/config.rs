use std::env;

/// Severity of a configuration issue surfaced by [`Config::validate`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigSeverity {
    Warning,
    Error,
}

#[derive(Debug, Clone)]
pub struct ConfigIssue {
    pub severity: ConfigSeverity,
    pub message: String,
}

impl std::fmt::Display for ConfigIssue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.message)
    }
}

/// Process-wide configuration, loaded once at startup from the
/// environment (see the recognized options table in the wire contract).
/// There is no config file — every field has an environment variable and
/// a documented default, in the style of the original source's `env()` /
/// `env_int()` / `env_float()` / `env_bool()` helpers.
#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: Option<String>,
    pub ollama_url: String,
    pub embed_model: String,
    pub chat_model: String,
    pub expected_embed_dim: usize,
    pub top_k: i64,
    pub min_similarity: f64,
    pub include_tools: bool,
    pub system_prompt: String,
    pub worker_poll_s: u64,
    pub worker_lock_s: i64,
    pub log_level: String,
    pub host: String,
    pub port: u16,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database_url: None,
            ollama_url: "http://127.0.0.1:11434".into(),
            embed_model: "mxbai-embed-large:latest".into(),
            chat_model: "llama3.1:8b".into(),
            expected_embed_dim: 1024,
            top_k: 5,
            min_similarity: 0.6,
            include_tools: false,
            system_prompt: default_system_prompt(),
            worker_poll_s: 1,
            worker_lock_s: 60,
            log_level: "info".into(),
            host: "0.0.0.0".into(),
            port: 8080,
        }
    }
}

fn default_system_prompt() -> String {
    "You are a precise, fast assistant.\n\
     If the user asks for an exact phrase, reply with ONLY that phrase, no extra text.\n\
     Follow the user's instructions exactly.\n"
        .to_string()
}

fn env_str(name: &str, default: &str) -> String {
    env::var(name).ok().filter(|v| !v.is_empty()).unwrap_or_else(|| default.to_string())
}

fn env_parse<T: std::str::FromStr>(name: &str, default: T) -> T {
    env::var(name)
        .ok()
        .filter(|v| !v.is_empty())
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

fn env_bool(name: &str, default: bool) -> bool {
    match env::var(name) {
        Ok(v) if !v.is_empty() => matches!(v.trim().to_lowercase().as_str(), "1" | "true" | "yes" | "y" | "on"),
        _ => default,
    }
}

impl Config {
    /// Loads configuration from the process environment, applying the
    /// documented defaults for anything unset.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            database_url: env::var("DATABASE_URL").ok().filter(|v| !v.is_empty()),
            ollama_url: env_str("OLLAMA_URL", &defaults.ollama_url).trim_end_matches('/').to_string(),
            embed_model: env_str("EMBED_MODEL", &defaults.embed_model),
            chat_model: env_str("CHAT_MODEL", &defaults.chat_model),
            expected_embed_dim: env_parse("EXPECTED_EMBED_DIM", defaults.expected_embed_dim),
            top_k: env_parse("TOP_K", defaults.top_k),
            min_similarity: env_parse("MIN_SIMILARITY", defaults.min_similarity),
            include_tools: env_bool("INCLUDE_TOOLS", defaults.include_tools),
            system_prompt: env_str("SYSTEM_PROMPT", &defaults.system_prompt),
            worker_poll_s: env_parse("AIOP_WORKER_POLL_S", defaults.worker_poll_s),
            worker_lock_s: env_parse("AIOP_WORKER_LOCK_S", defaults.worker_lock_s),
            log_level: env_str("AIOP_LOG_LEVEL", &defaults.log_level),
            host: env_str("HOST", &defaults.host),
            port: env_parse("PORT", defaults.port),
        }
    }

    /// Surfaces configuration problems before the server binds a socket.
    /// A missing `DATABASE_URL` is an `Error`; everything else validated
    /// here is advisory (`Warning`).
    pub fn validate(&self) -> Vec<ConfigIssue> {
        let mut issues = Vec::new();
        if self.database_url.is_none() {
            issues.push(ConfigIssue {
                severity: ConfigSeverity::Error,
                message: "DATABASE_URL is not set".into(),
            });
        }
        if self.expected_embed_dim == 0 {
            issues.push(ConfigIssue {
                severity: ConfigSeverity::Error,
                message: "EXPECTED_EMBED_DIM must be > 0".into(),
            });
        }
        if !(0.0..=1.0).contains(&self.min_similarity) {
            issues.push(ConfigIssue {
                severity: ConfigSeverity::Warning,
                message: format!("MIN_SIMILARITY={} is outside [0,1]; cosine similarity filtering may behave unexpectedly", self.min_similarity),
            });
        }
        if self.top_k <= 0 {
            issues.push(ConfigIssue {
                severity: ConfigSeverity::Warning,
                message: "TOP_K <= 0; search_memories will always return no rows".into(),
            });
        }
        if self.worker_lock_s <= 0 {
            issues.push(ConfigIssue {
                severity: ConfigSeverity::Error,
                message: "AIOP_WORKER_LOCK_S must be > 0".into(),
            });
        }
        issues
    }

    /// `DATABASE_URL`, required for server/worker startup.
    pub fn database_url(&self) -> crate::error::Result<&str> {
        self.database_url
            .as_deref()
            .ok_or_else(|| crate::error::Error::Config("DATABASE_URL is not set".into()))
    }
}
