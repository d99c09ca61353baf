use crate::error::CoreError;

/// Process-wide configuration, read once from the environment at startup and
/// passed by reference into every component (no lazily-initialized
/// singletons; see the reference crate's module-level-singleton guidance).
#[derive(Debug, Clone)]
pub struct Config {
    pub kv_url: String,
    pub llm_provider: LlmProviderConfig,
    pub daily_budget_usd: f64,
    pub monthly_budget_usd: f64,
}

#[derive(Debug, Clone)]
pub enum LlmProviderConfig {
    Anthropic {
        api_key: String,
        model: String,
    },
    Zai {
        api_key: String,
        model: String,
        endpoint: String,
    },
}

impl Config {
    /// Mirrors the reference binaries' own style: typed `std::env::var`
    /// reads with explicit fallbacks, no config-file layer.
    pub fn from_env() -> Result<Self, CoreError> {
        let kv_url =
            std::env::var("KV_URL").unwrap_or_else(|_| "redis://127.0.0.1:6379".to_string());

        let daily_budget_usd = std::env::var("DAILY_BUDGET_USD")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(50.0);

        let monthly_budget_usd = std::env::var("MONTHLY_BUDGET_USD")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(1000.0);

        let provider = std::env::var("LLM_PROVIDER").unwrap_or_else(|_| "anthropic".to_string());
        let llm_provider = match provider.as_str() {
            "zai" => LlmProviderConfig::Zai {
                api_key: std::env::var("ZAI_API_KEY")
                    .map_err(|_| CoreError::ConfigError("ZAI_API_KEY is required".into()))?,
                model: std::env::var("ZAI_MODEL").unwrap_or_else(|_| "glm-4-plus".to_string()),
                endpoint: std::env::var("ZAI_ENDPOINT")
                    .unwrap_or_else(|_| "https://api.z.ai/api/paas/v4".to_string()),
            },
            "anthropic" => LlmProviderConfig::Anthropic {
                api_key: std::env::var("ANTHROPIC_API_KEY")
                    .map_err(|_| CoreError::ConfigError("ANTHROPIC_API_KEY is required".into()))?,
                model: std::env::var("ANTHROPIC_MODEL")
                    .unwrap_or_else(|_| "claude-sonnet-4".to_string()),
            },
            other => {
                return Err(CoreError::ConfigError(format!(
                    "unknown LLM_PROVIDER: {other}"
                )));
            }
        };

        Ok(Self {
            kv_url,
            llm_provider,
            daily_budget_usd,
            monthly_budget_usd,
        })
    }
}
