use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use trading_core_types::CoreError;
use trading_kv::{KvStore, PipelineBuilder};

use crate::provider::Usage;

struct ModelPricing {
    input: f64,
    output: f64,
    cache_write: f64,
    cache_read: f64,
}

/// USD per million tokens, by model. Falls back to the `claude-sonnet-4` row
/// for unrecognized models, matching the reference tracker.
fn pricing_for(model: &str) -> ModelPricing {
    match model {
        "claude-haiku-4" => ModelPricing {
            input: 0.8,
            output: 4.0,
            cache_write: 1.0,
            cache_read: 0.08,
        },
        "deepseek-v3" => ModelPricing {
            input: 0.27,
            output: 1.10,
            cache_write: 0.27,
            cache_read: 0.027,
        },
        "gemini-3-pro" | "gemini-2.5-pro" => ModelPricing {
            input: 1.25,
            output: 5.00,
            cache_write: 1.25,
            cache_read: 0.125,
        },
        _ => ModelPricing {
            input: 3.0,
            output: 15.0,
            cache_write: 3.75,
            cache_read: 0.30,
        },
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CostInfo {
    pub model: String,
    pub agent_type: String,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub cache_read_tokens: u64,
    pub cache_write_tokens: u64,
    pub total_cost_usd: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct BudgetAlert {
    pub alert_type: &'static str,
    pub severity: &'static str,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct BudgetStatus {
    pub daily_spent_usd: f64,
    pub daily_usage_percent: f64,
    pub monthly_spent_usd: f64,
    pub monthly_usage_percent: f64,
    pub alerts: Vec<BudgetAlert>,
}

/// Tracks per-call LLM cost and pushes the hourly/daily/per-agent aggregates
/// into the KV store atomically, matching the reference tracker's pipelined
/// Redis writes (correctness under concurrent writers depends on this being
/// one round-trip, not three).
pub struct CostTracker {
    kv: Arc<dyn KvStore>,
    total_cost_micros: AtomicU64,
}

impl CostTracker {
    pub fn new(kv: Arc<dyn KvStore>) -> Self {
        Self {
            kv,
            total_cost_micros: AtomicU64::new(0),
        }
    }

    pub async fn track_api_call(
        &self,
        model: &str,
        agent_type: &str,
        usage: Usage,
    ) -> Result<CostInfo, CoreError> {
        let pricing = pricing_for(model);

        let input_cost = (usage.prompt_tokens as f64 / 1_000_000.0) * pricing.input;
        let output_cost = (usage.completion_tokens as f64 / 1_000_000.0) * pricing.output;
        let cache_read_cost = (usage.cache_read_tokens as f64 / 1_000_000.0) * pricing.cache_read;
        let cache_write_cost = (usage.cache_write_tokens as f64 / 1_000_000.0) * pricing.cache_write;
        let total_cost = input_cost + output_cost + cache_read_cost + cache_write_cost;

        self.total_cost_micros
            .fetch_add((total_cost * 1_000_000.0) as u64, Ordering::SeqCst);

        let now = Utc::now();
        let date_key = now.format("%Y-%m-%d").to_string();
        let hour_key = now.format("%Y-%m-%d:%H").to_string();

        let daily_key = format!("ai:cost:daily:{date_key}");
        let hourly_key = format!("ai:cost:hourly:{hour_key}");
        let agent_key = format!("ai:cost:agent:{agent_type}");

        let builder = PipelineBuilder::new()
            .hincrby(&daily_key, "calls", 1)
            .hincrby_float(&daily_key, "cost", total_cost)
            .hincrby(&daily_key, "input_tokens", usage.prompt_tokens as i64)
            .hincrby(&daily_key, "output_tokens", usage.completion_tokens as i64)
            .expire(&daily_key, 86_400 * 90)
            .hincrby(&hourly_key, "calls", 1)
            .hincrby_float(&hourly_key, "cost", total_cost)
            .expire(&hourly_key, 86_400 * 7)
            .hincrby(&agent_key, "calls", 1)
            .hincrby_float(&agent_key, "cost", total_cost)
            .expire(&agent_key, 86_400 * 30);

        self.kv.execute_pipeline(builder).await?;

        Ok(CostInfo {
            model: model.to_string(),
            agent_type: agent_type.to_string(),
            input_tokens: usage.prompt_tokens,
            output_tokens: usage.completion_tokens,
            cache_read_tokens: usage.cache_read_tokens,
            cache_write_tokens: usage.cache_write_tokens,
            total_cost_usd: total_cost,
        })
    }

    pub async fn daily_cost(&self) -> Result<f64, CoreError> {
        let date_key = Utc::now().format("%Y-%m-%d").to_string();
        self.hash_cost_field(&format!("ai:cost:daily:{date_key}")).await
    }

    pub async fn monthly_cost(&self) -> Result<f64, CoreError> {
        let prefix = Utc::now().format("ai:cost:daily:%Y-%m-").to_string();
        let keys = self.kv.scan(&format!("{prefix}*")).await?;
        let mut total = 0.0;
        for key in keys {
            total += self.hash_cost_field(&key).await?;
        }
        Ok(total)
    }

    /// Per-agent breakdown, the fourth of the mandatory cost reads alongside
    /// daily/monthly/budget-check.
    pub async fn agent_cost(&self, agent_type: &str) -> Result<f64, CoreError> {
        self.hash_cost_field(&format!("ai:cost:agent:{agent_type}")).await
    }

    async fn hash_cost_field(&self, key: &str) -> Result<f64, CoreError> {
        Ok(self
            .kv
            .hget(key, "cost")
            .await?
            .and_then(|v| v.parse().ok())
            .unwrap_or(0.0))
    }

    pub async fn check_budget(
        &self,
        daily_budget_usd: f64,
        monthly_budget_usd: f64,
    ) -> Result<BudgetStatus, CoreError> {
        let daily_spent = self.daily_cost().await?;
        let monthly_spent = self.monthly_cost().await?;

        let daily_usage_percent = if daily_budget_usd > 0.0 {
            daily_spent / daily_budget_usd * 100.0
        } else {
            0.0
        };
        let monthly_usage_percent = if monthly_budget_usd > 0.0 {
            monthly_spent / monthly_budget_usd * 100.0
        } else {
            0.0
        };

        let mut alerts = Vec::new();
        if daily_usage_percent >= 100.0 {
            alerts.push(BudgetAlert {
                alert_type: "daily_budget_exceeded",
                severity: "critical",
            });
        } else if daily_usage_percent >= 80.0 {
            alerts.push(BudgetAlert {
                alert_type: "daily_budget_warning",
                severity: "warning",
            });
        }
        if monthly_usage_percent >= 100.0 {
            alerts.push(BudgetAlert {
                alert_type: "monthly_budget_exceeded",
                severity: "critical",
            });
        } else if monthly_usage_percent >= 80.0 {
            alerts.push(BudgetAlert {
                alert_type: "monthly_budget_warning",
                severity: "warning",
            });
        }

        Ok(BudgetStatus {
            daily_spent_usd: daily_spent,
            daily_usage_percent,
            monthly_spent_usd: monthly_spent,
            monthly_usage_percent,
            alerts,
        })
    }

    pub fn total_cost_usd(&self) -> f64 {
        self.total_cost_micros.load(Ordering::SeqCst) as f64 / 1_000_000.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pricing_falls_back_to_sonnet_for_unknown_model() {
        let default = pricing_for("claude-sonnet-4");
        let unknown = pricing_for("some-future-model");
        assert_eq!(default.input, unknown.input);
        assert_eq!(default.output, unknown.output);
    }

    #[tokio::test]
    async fn track_api_call_computes_cost_from_pricing_table() {
        let kv: Arc<dyn KvStore> = Arc::new(trading_kv::InMemoryKvStore::new());
        let tracker = CostTracker::new(kv);

        let info = tracker
            .track_api_call(
                "claude-sonnet-4",
                "market_regime",
                Usage {
                    prompt_tokens: 1_000_000,
                    completion_tokens: 1_000_000,
                    cache_read_tokens: 0,
                    cache_write_tokens: 0,
                },
            )
            .await
            .unwrap();

        assert!((info.total_cost_usd - 18.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn agent_cost_reads_back_the_per_agent_breakdown() {
        let kv: Arc<dyn KvStore> = Arc::new(trading_kv::InMemoryKvStore::new());
        let tracker = CostTracker::new(kv);

        tracker
            .track_api_call(
                "claude-sonnet-4",
                "market_regime",
                Usage {
                    prompt_tokens: 1_000_000,
                    completion_tokens: 0,
                    cache_read_tokens: 0,
                    cache_write_tokens: 0,
                },
            )
            .await
            .unwrap();

        let cost = tracker.agent_cost("market_regime").await.unwrap();
        assert!((cost - 3.0).abs() < 1e-9);
        assert_eq!(tracker.agent_cost("portfolio_optimizer").await.unwrap(), 0.0);
    }
}
