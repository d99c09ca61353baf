use thiserror::Error;

/// The single error hierarchy shared by every crate in the trading core.
#[derive(Error, Debug)]
pub enum CoreError {
    #[error("task rejected: duplicate task_id {0}")]
    TaskRejectedDuplicate(String),

    #[error("agent task timed out after {timeout_secs}s: {task_id}")]
    AgentTimeout { task_id: String, timeout_secs: f64 },

    #[error("agent '{agent_id}' not found")]
    AgentNotFound { agent_id: String },

    #[error("agent '{0}' entered ERROR state after too many consecutive failures")]
    AgentErrored(String),

    #[error("unknown strategy: {0}")]
    UnknownStrategy(String),

    #[error("exchange unavailable: {0}")]
    ExchangeUnavailable(String),

    #[error("LLM provider rate limited (HTTP 429)")]
    LlmRateLimited,

    #[error("LLM provider error: {0}")]
    LlmProviderError(String),

    #[error("invalid response_type for cache key: {0}")]
    InvalidResponseType(String),

    #[error("cached/query payload too large: {bytes} bytes (limit {limit})")]
    PayloadTooLarge { bytes: usize, limit: usize },

    #[error("budget exceeded: {0}")]
    BudgetExceeded(String),

    #[error("KV store error: {0}")]
    KvError(String),

    #[error("configuration error: {0}")]
    ConfigError(String),

    #[error("serialization error: {0}")]
    SerializationError(String),

    #[error("HTTP error: {0}")]
    HttpError(String),

    #[error("validation failed: {0}")]
    ValidationFailed(String),
}

impl From<reqwest::Error> for CoreError {
    fn from(e: reqwest::Error) -> Self {
        CoreError::HttpError(e.to_string())
    }
}

impl From<serde_json::Error> for CoreError {
    fn from(e: serde_json::Error) -> Self {
        CoreError::SerializationError(e.to_string())
    }
}
