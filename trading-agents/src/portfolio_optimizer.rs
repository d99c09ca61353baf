//! Portfolio-optimization agent. Ported from the reference
//! `PortfolioOptimizationAgent`: weights bounded to `[min_alloc, max_alloc]`
//! summing to 1, rebalancing suggested only past a 5pp threshold.
//!
//! The reference optimizer calls into `scipy.optimize.minimize` (SLSQP) for
//! mean-variance weights and explicitly falls back to equal weights when
//! scipy isn't installed. There is no scientific-optimization crate in this
//! workspace's dependency set, so the fallback path is generalized here into
//! the primary one: weights proportional to each bot's Sharpe ratio (clamped
//! non-negative), bounded to the allocation range and renormalized to sum to
//! one. This keeps the same shape (risk-adjusted, bounded, normalized) the
//! real optimizer produces without introducing a constrained NLP solver.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use serde_json::{json, Value};
use trading_agent_runtime::Executor;
use trading_core_types::{AgentTask, CoreError};
use trading_gateway::GatewayHandle;
use trading_kv::KvStore;

const MIN_ALLOCATION_PERCENT: f64 = 5.0;
const MAX_ALLOCATION_PERCENT: f64 = 40.0;
const REBALANCING_THRESHOLD_PERCENT: f64 = 5.0;

const ANALYSIS_TTL_SECS: u64 = 3600;
const SUGGESTION_TTL_SECS: u64 = 7200;
const HISTORY_TTL_SECS: u64 = 2_592_000;
const HISTORY_LIST_CAP: usize = 20;

#[derive(Debug, Clone)]
struct BotPerformance {
    bot_instance_id: i64,
    bot_name: String,
    sharpe_ratio: f64,
    roi: f64,
    current_allocation_percent: f64,
}

fn parse_bots(value: &Value) -> Vec<BotPerformance> {
    value
        .as_array()
        .into_iter()
        .flatten()
        .map(|b| BotPerformance {
            bot_instance_id: b.get("bot_instance_id").and_then(Value::as_i64).unwrap_or(0),
            bot_name: b.get("bot_name").and_then(Value::as_str).unwrap_or("").to_string(),
            sharpe_ratio: b.get("sharpe_ratio").and_then(Value::as_f64).unwrap_or(0.0),
            roi: b.get("roi").and_then(Value::as_f64).unwrap_or(0.0),
            current_allocation_percent: b.get("current_allocation_percent").and_then(Value::as_f64).unwrap_or(0.0),
        })
        .collect()
}

/// Sharpe-weighted allocation bounded to `[min, max]` and summing to
/// exactly one. Scales each bot's Sharpe ratio by a common factor `t`, found
/// by bisection so that `sum(clip(sharpe_i * t, min, max)) == 1`; `clip` is
/// monotonic non-decreasing in `t` so the root is unique whenever the bounds
/// are feasible for `n` bots. Falls back to an equal split when they aren't
/// (e.g. too many bots for `max` to cover 100%), matching the reference
/// optimizer's own equal-weight fallback for when scipy isn't installed.
fn optimize_weights(bots: &[BotPerformance]) -> Vec<f64> {
    let n = bots.len();
    if n == 0 {
        return Vec::new();
    }
    let min = MIN_ALLOCATION_PERCENT / 100.0;
    let max = MAX_ALLOCATION_PERCENT / 100.0;

    if (n as f64) * min > 1.0 || (n as f64) * max < 1.0 {
        return vec![1.0 / n as f64; n];
    }

    let scores: Vec<f64> = bots.iter().map(|b| b.sharpe_ratio.max(0.01)).collect();
    let weighted_sum = |t: f64| -> f64 { scores.iter().map(|s| (s * t).clamp(min, max)).sum() };

    let mut lo = 0.0_f64;
    let mut hi = 1.0_f64;
    while weighted_sum(hi) < 1.0 {
        hi *= 2.0;
    }
    for _ in 0..60 {
        let mid = (lo + hi) / 2.0;
        if weighted_sum(mid) < 1.0 {
            lo = mid;
        } else {
            hi = mid;
        }
    }
    scores.iter().map(|s| (s * hi).clamp(min, max)).collect()
}

fn portfolio_sharpe(bots: &[BotPerformance], weights: &[f64]) -> f64 {
    bots.iter().zip(weights).map(|(b, w)| b.sharpe_ratio * w).sum()
}

fn suggest_rebalancing(bots: &[BotPerformance]) -> Value {
    let optimal = optimize_weights(bots);
    let current_sharpe = portfolio_sharpe(bots, &bots.iter().map(|b| b.current_allocation_percent / 100.0).collect::<Vec<_>>());
    let expected_sharpe = portfolio_sharpe(bots, &optimal);

    let suggestions: Vec<Value> = bots
        .iter()
        .zip(optimal.iter())
        .filter_map(|(bot, &weight)| {
            let suggested_percent = weight * 100.0;
            let change = suggested_percent - bot.current_allocation_percent;
            if change.abs() >= REBALANCING_THRESHOLD_PERCENT {
                Some(json!({
                    "bot_instance_id": bot.bot_instance_id,
                    "bot_name": bot.bot_name,
                    "current_allocation_percent": bot.current_allocation_percent,
                    "suggested_allocation_percent": suggested_percent,
                    "change_percent": change,
                    "reason": if bot.sharpe_ratio > 1.5 { "high sharpe ratio" } else if bot.sharpe_ratio < 0.5 { "low sharpe ratio" } else { "rebalance toward target weights" },
                }))
            } else {
                None
            }
        })
        .collect();

    let sharpe_improvement = if current_sharpe.abs() > 0.01 {
        (expected_sharpe - current_sharpe) / current_sharpe.abs() * 100.0
    } else {
        0.0
    };

    json!({
        "suggestions": suggestions,
        "current_portfolio_sharpe": current_sharpe,
        "expected_portfolio_sharpe": expected_sharpe,
        "sharpe_improvement_percent": sharpe_improvement,
        "optimization_method": "sharpe_weighted",
    })
}

fn correlation_matrix(series: &[Vec<f64>]) -> Vec<Vec<f64>> {
    let n = series.len();
    let mut matrix = vec![vec![0.0; n]; n];
    for i in 0..n {
        for j in 0..n {
            matrix[i][j] = pearson_correlation(&series[i], &series[j]);
        }
    }
    matrix
}

fn pearson_correlation(a: &[f64], b: &[f64]) -> f64 {
    let len = a.len().min(b.len());
    if len < 2 {
        return 0.0;
    }
    let (a, b) = (&a[..len], &b[..len]);
    let mean_a = a.iter().sum::<f64>() / len as f64;
    let mean_b = b.iter().sum::<f64>() / len as f64;

    let mut cov = 0.0;
    let mut var_a = 0.0;
    let mut var_b = 0.0;
    for i in 0..len {
        let da = a[i] - mean_a;
        let db = b[i] - mean_b;
        cov += da * db;
        var_a += da * da;
        var_b += db * db;
    }

    if var_a == 0.0 || var_b == 0.0 {
        return 0.0;
    }
    cov / (var_a.sqrt() * var_b.sqrt())
}

/// Thin `Executor`; the gateway adds narrative explanation for rebalancing
/// suggestions only, never the weights themselves.
pub struct PortfolioOptimizerAgent {
    #[allow(dead_code)]
    gateway: Arc<GatewayHandle>,
    kv: Arc<dyn KvStore>,
    enable_ai: bool,
}

impl PortfolioOptimizerAgent {
    pub fn new(gateway: Arc<GatewayHandle>, kv: Arc<dyn KvStore>) -> Self {
        Self { gateway, kv, enable_ai: true }
    }

    pub fn without_ai(gateway: Arc<GatewayHandle>, kv: Arc<dyn KvStore>) -> Self {
        Self { gateway, kv, enable_ai: false }
    }
}

#[async_trait]
impl Executor for PortfolioOptimizerAgent {
    async fn process_task(&self, task: &AgentTask) -> Result<Value, CoreError> {
        let params: Value = serde_json::to_value(&task.params)?;

        match task.task_type.as_str() {
            "analyze_portfolio" => {
                let user_id = params.get("user_id").and_then(Value::as_i64).unwrap_or(0);
                let bots = parse_bots(params.get("bot_performance").unwrap_or(&json!([])));
                let weights: Vec<f64> = bots.iter().map(|b| b.current_allocation_percent / 100.0).collect();
                let sharpe = portfolio_sharpe(&bots, &weights);
                let roi: f64 = bots.iter().zip(&weights).map(|(b, w)| b.roi * w).sum();
                let analysis = json!({
                    "user_id": user_id,
                    "total_bots": bots.len(),
                    "portfolio_sharpe": sharpe,
                    "portfolio_roi": roi,
                });

                if let Ok(payload) = serde_json::to_string(&analysis) {
                    self.kv.set_ex(&format!("agent:portfolio:analysis:user:{user_id}"), &payload, ANALYSIS_TTL_SECS).await?;
                }
                Ok(analysis)
            }
            "suggest_rebalancing" => {
                let user_id = params.get("user_id").and_then(Value::as_i64).unwrap_or(0);
                let bots = parse_bots(params.get("bot_performance").unwrap_or(&json!([])));
                let mut suggestion = suggest_rebalancing(&bots);
                suggestion["user_id"] = json!(user_id);

                if self.enable_ai && !suggestion["suggestions"].as_array().map(|a| a.is_empty()).unwrap_or(true) {
                    if let Ok(call) = self
                        .gateway
                        .call_ai("portfolio_optimizer", None, "Summarize this rebalancing suggestion in one sentence.", None, "text", &suggestion, 0.3, 120)
                        .await
                    {
                        suggestion["ai_summary"] = call.response;
                    }
                }

                if let Ok(payload) = serde_json::to_string(&suggestion) {
                    self.kv.set_ex(&format!("agent:portfolio:suggestion:user:{user_id}"), &payload, SUGGESTION_TTL_SECS).await?;
                }
                Ok(suggestion)
            }
            "apply_rebalancing" => {
                let user_id = params.get("user_id").and_then(Value::as_i64).unwrap_or(0);
                let suggestions = params
                    .get("suggestion")
                    .and_then(|s| s.get("suggestions"))
                    .and_then(Value::as_array)
                    .cloned()
                    .unwrap_or_default();

                let before_snapshot: serde_json::Map<String, Value> = suggestions
                    .iter()
                    .map(|s| (s["bot_instance_id"].to_string(), s["current_allocation_percent"].clone()))
                    .collect();
                let after_snapshot: serde_json::Map<String, Value> = suggestions
                    .iter()
                    .map(|s| (s["bot_instance_id"].to_string(), s["suggested_allocation_percent"].clone()))
                    .collect();

                let rebalancing_id = format!("rebal_{}", uuid::Uuid::new_v4().simple());
                let history = json!({
                    "rebalancing_id": rebalancing_id,
                    "user_id": user_id,
                    "executed_at": Utc::now(),
                    "suggestions_applied": suggestions,
                    "before_snapshot": before_snapshot,
                    "after_snapshot": after_snapshot,
                });

                if let Ok(payload) = serde_json::to_string(&history) {
                    self.kv.set_ex(&format!("agent:portfolio:history:{rebalancing_id}"), &payload, HISTORY_TTL_SECS).await?;
                }
                self.kv
                    .list_push_capped(&format!("agent:portfolio:user:{user_id}:history"), &rebalancing_id, HISTORY_LIST_CAP)
                    .await?;

                tracing::info!(rebalancing_id, user_id, "rebalancing applied");
                Ok(json!({"applied": true, "rebalancing_id": rebalancing_id}))
            }
            "calculate_correlation" => {
                let series: Vec<Vec<f64>> = params
                    .get("returns")
                    .and_then(Value::as_array)
                    .into_iter()
                    .flatten()
                    .map(|row| row.as_array().into_iter().flatten().filter_map(Value::as_f64).collect())
                    .collect();
                Ok(json!({"matrix": correlation_matrix(&series)}))
            }
            other => Err(CoreError::ValidationFailed(format!("unknown task type: {other}"))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use trading_core_types::AgentTaskBuilder;

    fn gateway() -> Arc<GatewayHandle> {
        Arc::new(GatewayHandle::new(
            trading_gateway::AiProvider::Anthropic { api_key: "test".into(), model: "test".into() },
            Arc::new(trading_kv::InMemoryKvStore::new()),
        ))
    }

    #[tokio::test]
    async fn apply_rebalancing_persists_a_history_record() {
        let kv = Arc::new(trading_kv::InMemoryKvStore::new());
        let agent = PortfolioOptimizerAgent::without_ai(gateway(), kv.clone());
        let suggestion = json!({
            "suggestions": [
                {"bot_instance_id": 1, "current_allocation_percent": 10.0, "suggested_allocation_percent": 40.0},
            ],
        });
        let task = AgentTaskBuilder::new()
            .task_id("t-1")
            .task_type("apply_rebalancing")
            .param("user_id", json!(42))
            .param("suggestion", suggestion)
            .build()
            .unwrap();

        let result = agent.process_task(&task).await.unwrap();
        assert_eq!(result["applied"], json!(true));
        let rebalancing_id = result["rebalancing_id"].as_str().unwrap().to_string();

        let stored = kv.get(&format!("agent:portfolio:history:{rebalancing_id}")).await.unwrap().unwrap();
        let history: Value = serde_json::from_str(&stored).unwrap();
        assert_eq!(history["user_id"], json!(42));
        assert_eq!(history["after_snapshot"]["1"], json!(40.0));
    }

    #[tokio::test]
    async fn analyze_portfolio_persists_the_analysis_for_the_user() {
        let kv = Arc::new(trading_kv::InMemoryKvStore::new());
        let agent = PortfolioOptimizerAgent::without_ai(gateway(), kv.clone());
        let task = AgentTaskBuilder::new()
            .task_id("t-2")
            .task_type("analyze_portfolio")
            .param("user_id", json!(9))
            .param("bot_performance", json!([{"bot_instance_id": 1, "sharpe_ratio": 1.0, "roi": 5.0, "current_allocation_percent": 100.0}]))
            .build()
            .unwrap();

        agent.process_task(&task).await.unwrap();
        let stored = kv.get("agent:portfolio:analysis:user:9").await.unwrap();
        assert!(stored.is_some());
    }

    fn bot(id: i64, sharpe: f64, roi: f64, allocation: f64) -> BotPerformance {
        BotPerformance {
            bot_instance_id: id,
            bot_name: format!("bot-{id}"),
            sharpe_ratio: sharpe,
            roi,
            current_allocation_percent: allocation,
        }
    }

    #[test]
    fn weights_are_bounded_and_sum_to_one() {
        let bots = vec![bot(1, 3.0, 10.0, 50.0), bot(2, 0.2, 2.0, 30.0), bot(3, 1.0, 5.0, 20.0)];
        let weights = optimize_weights(&bots);
        let sum: f64 = weights.iter().sum();
        assert!((sum - 1.0).abs() < 1e-9);
        for w in &weights {
            assert!(*w >= MIN_ALLOCATION_PERCENT / 100.0 - 1e-9);
            assert!(*w <= MAX_ALLOCATION_PERCENT / 100.0 + 1e-9);
        }
    }

    #[test]
    fn rebalancing_skips_changes_below_the_threshold() {
        let bots = vec![bot(1, 1.0, 5.0, 33.4), bot(2, 1.0, 5.0, 33.3), bot(3, 1.0, 5.0, 33.3)];
        let suggestion = suggest_rebalancing(&bots);
        assert!(suggestion["suggestions"].as_array().unwrap().is_empty());
    }

    #[test]
    fn high_sharpe_bot_gets_a_larger_suggested_allocation() {
        let bots = vec![bot(1, 3.0, 10.0, 10.0), bot(2, 0.1, 1.0, 90.0)];
        let suggestion = suggest_rebalancing(&bots);
        let suggestions = suggestion["suggestions"].as_array().unwrap();
        let first = suggestions.iter().find(|s| s["bot_instance_id"] == json!(1)).unwrap();
        assert!(first["change_percent"].as_f64().unwrap() > 0.0);
    }

    #[test]
    fn perfectly_correlated_series_has_correlation_one() {
        let series = vec![vec![1.0, 2.0, 3.0, 4.0], vec![2.0, 4.0, 6.0, 8.0]];
        let matrix = correlation_matrix(&series);
        assert!((matrix[0][1] - 1.0).abs() < 1e-9);
    }
}
