use std::sync::Arc;

use serde_json::Value;
use sha2::{Digest, Sha256};
use trading_core_types::CoreError;
use trading_kv::KvStore;

const MAX_CACHED_RESPONSE_BYTES: usize = 1_000_000;

const VALID_RESPONSE_TYPES: &[&str] = &[
    "market_analysis",
    "signal_validation",
    "risk_assessment",
    "portfolio_optimization",
    "anomaly_detection",
    "strategy_generation",
];

fn ttl_for_response_type(response_type: &str) -> u64 {
    match response_type {
        "market_analysis" => 300,
        "signal_validation" => 60,
        "risk_assessment" => 120,
        "portfolio_optimization" => 1800,
        "anomaly_detection" => 180,
        "strategy_generation" => 3600,
        _ => 300,
    }
}

/// Caches full AI responses keyed by `response_type` + a hash of the
/// canonicalized query, so identical requests across agents/users within the
/// TTL window reuse one inference call.
pub struct ResponseCache {
    kv: Arc<dyn KvStore>,
}

impl ResponseCache {
    pub fn new(kv: Arc<dyn KvStore>) -> Self {
        Self { kv }
    }

    /// `response_type` must be a known type matching `^[a-z_]+$`; the query
    /// is canonicalized (serde_json sorts object keys) before hashing so
    /// semantically identical queries always produce the same key.
    pub fn cache_key(response_type: &str, query: &Value) -> Result<String, CoreError> {
        if !VALID_RESPONSE_TYPES.contains(&response_type)
            || !response_type.chars().all(|c| c.is_ascii_lowercase() || c == '_')
        {
            return Err(CoreError::InvalidResponseType(response_type.to_string()));
        }

        let canonical = canonicalize(query);
        let mut hasher = Sha256::new();
        hasher.update(response_type.as_bytes());
        hasher.update(b":");
        hasher.update(canonical.as_bytes());
        let digest = format!("{:x}", hasher.finalize());

        Ok(format!("ai:response:{response_type}:{digest}"))
    }

    pub async fn get(&self, response_type: &str, query: &Value) -> Result<Option<Value>, CoreError> {
        let key = Self::cache_key(response_type, query)?;
        let Some(raw) = self.kv.get(&key).await? else {
            return Ok(None);
        };

        if raw.len() > MAX_CACHED_RESPONSE_BYTES {
            self.kv.delete(&key).await?;
            return Ok(None);
        }

        match serde_json::from_str::<Value>(&raw) {
            Ok(value) if value.get("response").is_some() || value.get("result").is_some() => {
                Ok(Some(value))
            }
            _ => {
                self.kv.delete(&key).await?;
                Ok(None)
            }
        }
    }

    pub async fn set(&self, response_type: &str, query: &Value, response: &Value) -> Result<(), CoreError> {
        let key = Self::cache_key(response_type, query)?;
        let serialized = serde_json::to_string(response)?;
        if serialized.len() > MAX_CACHED_RESPONSE_BYTES {
            return Err(CoreError::PayloadTooLarge {
                bytes: serialized.len(),
                limit: MAX_CACHED_RESPONSE_BYTES,
            });
        }
        let ttl = ttl_for_response_type(response_type);
        self.kv.set_ex(&key, &serialized, ttl).await
    }

    pub async fn invalidate(&self, response_type: &str, query: &Value) -> Result<(), CoreError> {
        let key = Self::cache_key(response_type, query)?;
        self.kv.delete(&key).await
    }

    /// No-cache conditions taken from the reference `should_cache`:
    /// real-time symbol data on a short timeframe, or an explicit
    /// user-specific/no-cache flag on the query.
    pub fn should_cache(query: &Value) -> bool {
        if query.get("no_cache").and_then(Value::as_bool).unwrap_or(false) {
            return false;
        }
        if query.get("user_specific").and_then(Value::as_bool).unwrap_or(false) {
            return false;
        }
        let is_short_timeframe = matches!(
            query.get("timeframe").and_then(Value::as_str),
            Some("1m") | Some("5m")
        );
        if query.get("symbol").is_some() && is_short_timeframe {
            return false;
        }
        true
    }
}

/// Canonical JSON serialization with sorted object keys, so two
/// semantically-identical queries hash identically.
fn canonicalize(value: &Value) -> String {
    match value {
        Value::Object(map) => {
            let mut entries: Vec<_> = map.iter().collect();
            entries.sort_by(|a, b| a.0.cmp(b.0));
            let body = entries
                .iter()
                .map(|(k, v)| format!("{:?}:{}", k, canonicalize(v)))
                .collect::<Vec<_>>()
                .join(",");
            format!("{{{body}}}")
        }
        Value::Array(items) => {
            let body = items.iter().map(canonicalize).collect::<Vec<_>>().join(",");
            format!("[{body}]")
        }
        other => other.to_string(),
    }
}

/// Caches reusable prompt fragments (system prompts, market-data blocks) so
/// the gateway doesn't rebuild the same long prompt text on every call. This
/// caches prompt construction, never the inference result itself.
pub struct PromptCache {
    kv: Arc<dyn KvStore>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PromptKind {
    SystemPrompt,
    AgentPrompt,
    MarketData,
    StrategyContext,
}

impl PromptKind {
    fn as_str(self) -> &'static str {
        match self {
            PromptKind::SystemPrompt => "system_prompt",
            PromptKind::AgentPrompt => "agent_prompt",
            PromptKind::MarketData => "market_data",
            PromptKind::StrategyContext => "strategy_context",
        }
    }
}

impl PromptCache {
    pub fn new(kv: Arc<dyn KvStore>) -> Self {
        Self { kv }
    }

    fn key(kind: PromptKind, query: &Value) -> Result<String, CoreError> {
        let canonical = canonicalize(query);
        let mut hasher = Sha256::new();
        hasher.update(kind.as_str().as_bytes());
        hasher.update(b":");
        hasher.update(canonical.as_bytes());
        Ok(format!(
            "ai:response:{}:{:x}",
            kind.as_str(),
            hasher.finalize()
        ))
    }

    pub async fn get(&self, kind: PromptKind, query: &Value) -> Result<Option<String>, CoreError> {
        self.kv.get(&Self::key(kind, query)?).await
    }

    pub async fn set(&self, kind: PromptKind, query: &Value, prompt: &str, ttl_secs: u64) -> Result<(), CoreError> {
        self.kv.set_ex(&Self::key(kind, query)?, prompt, ttl_secs).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use trading_kv::InMemoryKvStore;

    #[test]
    fn cache_key_rejects_unknown_response_type() {
        let err = ResponseCache::cache_key("not_a_type", &json!({}));
        assert!(matches!(err, Err(CoreError::InvalidResponseType(_))));
    }

    #[test]
    fn cache_key_is_stable_under_key_reordering() {
        let a = ResponseCache::cache_key("market_analysis", &json!({"symbol": "BTC", "tf": "1h"})).unwrap();
        let b = ResponseCache::cache_key("market_analysis", &json!({"tf": "1h", "symbol": "BTC"})).unwrap();
        assert_eq!(a, b);
    }

    #[tokio::test]
    async fn set_then_get_roundtrips_through_kv() {
        let kv: Arc<dyn KvStore> = Arc::new(InMemoryKvStore::new());
        let cache = ResponseCache::new(kv);
        let query = json!({"symbol": "ETH"});
        let response = json!({"response": "hold"});

        cache.set("signal_validation", &query, &response).await.unwrap();
        let fetched = cache.get("signal_validation", &query).await.unwrap();
        assert_eq!(fetched, Some(response));
    }

    #[tokio::test]
    async fn corrupt_cache_entry_is_deleted_on_read() {
        let kv: Arc<dyn KvStore> = Arc::new(InMemoryKvStore::new());
        let key = ResponseCache::cache_key("signal_validation", &json!({})).unwrap();
        kv.set_ex(&key, "not json", 60).await.unwrap();

        let cache = ResponseCache::new(kv.clone());
        let fetched = cache.get("signal_validation", &json!({})).await.unwrap();
        assert_eq!(fetched, None);
        assert_eq!(kv.get(&key).await.unwrap(), None);
    }

    #[test]
    fn should_cache_excludes_short_timeframe_symbol_queries() {
        assert!(!ResponseCache::should_cache(&json!({"symbol": "BTC", "timeframe": "1m"})));
        assert!(ResponseCache::should_cache(&json!({"symbol": "BTC", "timeframe": "1d"})));
        assert!(!ResponseCache::should_cache(&json!({"no_cache": true})));
        assert!(!ResponseCache::should_cache(&json!({"user_specific": true})));
    }
}
