use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use serde_json::Value;
use tokio::sync::Mutex;
use trading_core_types::SamplingStrategy;

const SAMPLING_ALWAYS_AGENTS: &[&str] = &["signal_validator", "circuit_breaker"];

/// Decision returned by `SmartSampler::should_sample`.
#[derive(Debug, Clone, PartialEq)]
pub struct SampleDecision {
    pub should_call: bool,
    pub reason: String,
}

impl SampleDecision {
    fn call(reason: impl Into<String>) -> Self {
        Self {
            should_call: true,
            reason: reason.into(),
        }
    }

    fn skip(reason: impl Into<String>) -> Self {
        Self {
            should_call: false,
            reason: reason.into(),
        }
    }
}

/// Per agent-type configuration installed once at construction; overridable
/// at runtime via `override_strategy`, matching the reference manager's
/// dynamic strategy table.
#[derive(Debug, Clone)]
pub struct StrategyConfig {
    pub strategy: SamplingStrategy,
    pub interval_secs: u64,
    pub min_interval_secs: u64,
    pub max_interval_secs: u64,
    pub cache_by_symbol: bool,
    pub threshold: f64,
}

impl StrategyConfig {
    fn always() -> Self {
        Self {
            strategy: SamplingStrategy::Always,
            interval_secs: 0,
            min_interval_secs: 0,
            max_interval_secs: 0,
            cache_by_symbol: false,
            threshold: 0.0,
        }
    }

    fn periodic(interval_secs: u64, min_interval_secs: u64, max_interval_secs: u64, cache_by_symbol: bool) -> Self {
        Self {
            strategy: SamplingStrategy::Periodic,
            interval_secs,
            min_interval_secs,
            max_interval_secs,
            cache_by_symbol,
            threshold: 0.0,
        }
    }

    fn change_based(threshold: f64) -> Self {
        Self {
            strategy: SamplingStrategy::ChangeBased,
            interval_secs: 0,
            min_interval_secs: 0,
            max_interval_secs: 0,
            cache_by_symbol: false,
            threshold,
        }
    }

    fn threshold(threshold: f64) -> Self {
        Self {
            strategy: SamplingStrategy::Threshold,
            interval_secs: 0,
            min_interval_secs: 0,
            max_interval_secs: 0,
            cache_by_symbol: false,
            threshold,
        }
    }
}

fn default_strategy_table() -> HashMap<&'static str, StrategyConfig> {
    let mut table = HashMap::new();
    table.insert("signal_validator", StrategyConfig::always());
    table.insert("circuit_breaker", StrategyConfig::always());
    table.insert(
        "market_regime",
        StrategyConfig::periodic(15, 10, 45, true),
    );
    table.insert(
        "portfolio_optimizer",
        StrategyConfig::periodic(120, 60, 300, false),
    );
    table.insert("anomaly_detector", StrategyConfig::change_based(0.10));
    table.insert("risk_monitor", StrategyConfig::threshold(0.80));
    table
}

/// Samples whether an agent-type's AI call should actually go out, tracking
/// per-agent-type last-call times and a shared rate-limit backoff multiplier
/// that doubles on HTTP 429 (capped at 8x) and halves on success.
pub struct SmartSampler {
    strategies: Mutex<HashMap<String, StrategyConfig>>,
    last_periodic_call: Mutex<HashMap<String, std::time::Instant>>,
    last_change_context: Mutex<HashMap<String, Value>>,
    rate_limit_backoff: AtomicU32,
    consecutive_rate_limits: AtomicU32,
}

impl Default for SmartSampler {
    fn default() -> Self {
        Self::new()
    }
}

impl SmartSampler {
    pub fn new() -> Self {
        Self {
            strategies: Mutex::new(
                default_strategy_table()
                    .into_iter()
                    .map(|(k, v)| (k.to_string(), v))
                    .collect(),
            ),
            last_periodic_call: Mutex::new(HashMap::new()),
            last_change_context: Mutex::new(HashMap::new()),
            rate_limit_backoff: AtomicU32::new(1),
            consecutive_rate_limits: AtomicU32::new(0),
        }
    }

    pub async fn override_strategy(&self, agent_type: impl Into<String>, config: StrategyConfig) {
        self.strategies.lock().await.insert(agent_type.into(), config);
    }

    pub fn notify_rate_limit(&self) {
        let consecutive = self.consecutive_rate_limits.fetch_add(1, Ordering::SeqCst) + 1;
        let backoff = 2u32.saturating_pow(consecutive).min(8);
        self.rate_limit_backoff.store(backoff, Ordering::SeqCst);
    }

    pub fn notify_success(&self) {
        let current = self.rate_limit_backoff.load(Ordering::SeqCst);
        if current > 1 {
            self.rate_limit_backoff.store((current / 2).max(1), Ordering::SeqCst);
            let consecutive = self.consecutive_rate_limits.load(Ordering::SeqCst);
            if consecutive > 0 {
                self.consecutive_rate_limits.store(consecutive - 1, Ordering::SeqCst);
            }
        }
    }

    pub async fn should_sample(
        &self,
        agent_type: &str,
        symbol: Option<&str>,
        context: &Value,
    ) -> SampleDecision {
        if SAMPLING_ALWAYS_AGENTS.contains(&agent_type) {
            return SampleDecision::call("always_strategy");
        }

        let config = {
            let strategies = self.strategies.lock().await;
            match strategies.get(agent_type) {
                Some(c) => c.clone(),
                None => return SampleDecision::call("no_strategy_defined"),
            }
        };

        match config.strategy {
            SamplingStrategy::Always => SampleDecision::call("always_strategy"),
            SamplingStrategy::Periodic => self.check_periodic(agent_type, symbol, &config).await,
            SamplingStrategy::ChangeBased => {
                self.check_change_based(agent_type, &config, context).await
            }
            SamplingStrategy::Threshold => check_threshold(&config, context),
            // ADAPTIVE has no distinct implementation in the reference source
            // (its branch always returns "adaptive_strategy" with no adjustment);
            // routed through the same path as ALWAYS here.
            SamplingStrategy::Adaptive => SampleDecision::call("adaptive_strategy"),
        }
    }

    fn effective_interval(&self, config: &StrategyConfig) -> u64 {
        let backoff = self.rate_limit_backoff.load(Ordering::SeqCst);
        if backoff > 1 {
            (config.interval_secs * backoff as u64).min(config.max_interval_secs.max(config.interval_secs))
        } else {
            config.interval_secs
        }
    }

    async fn check_periodic(
        &self,
        agent_type: &str,
        symbol: Option<&str>,
        config: &StrategyConfig,
    ) -> SampleDecision {
        let effective = self.effective_interval(config);
        let key = match (config.cache_by_symbol, symbol) {
            (true, Some(sym)) => format!("{agent_type}:{sym}"),
            _ => agent_type.to_string(),
        };

        let mut last_calls = self.last_periodic_call.lock().await;
        let now = std::time::Instant::now();
        match last_calls.get(&key) {
            None => {
                last_calls.insert(key, now);
                SampleDecision::call("first_call")
            }
            Some(last) => {
                let elapsed = now.duration_since(*last).as_secs();
                if elapsed >= effective {
                    last_calls.insert(key, now);
                    SampleDecision::call(format!("periodic_elapsed_{elapsed}s_interval_{effective}s"))
                } else {
                    SampleDecision::skip(format!("periodic_wait_{}s", effective - elapsed))
                }
            }
        }
    }

    async fn check_change_based(
        &self,
        agent_type: &str,
        config: &StrategyConfig,
        context: &Value,
    ) -> SampleDecision {
        let mut previous = self.last_change_context.lock().await;
        match previous.get(agent_type) {
            None => {
                previous.insert(agent_type.to_string(), context.clone());
                SampleDecision::call("first_call")
            }
            Some(prev) => {
                let change_percent = average_abs_percent_change(prev, context);
                if change_percent >= config.threshold * 100.0 {
                    previous.insert(agent_type.to_string(), context.clone());
                    SampleDecision::call(format!("change_detected_{change_percent:.1}%"))
                } else {
                    SampleDecision::skip(format!("no_change_{change_percent:.1}%"))
                }
            }
        }
    }
}

fn check_threshold(config: &StrategyConfig, context: &Value) -> SampleDecision {
    let metric_value = context.get("metric_value").and_then(Value::as_f64).unwrap_or(0.0);
    if metric_value >= config.threshold {
        SampleDecision::call(format!("threshold_exceeded_{metric_value:.2}"))
    } else {
        SampleDecision::skip(format!("below_threshold_{metric_value:.2}"))
    }
}

fn average_abs_percent_change(prev: &Value, current: &Value) -> f64 {
    let (Some(prev_obj), Some(curr_obj)) = (prev.as_object(), current.as_object()) else {
        return 0.0;
    };

    let mut changes = Vec::new();
    for (key, curr_val) in curr_obj {
        let (Some(prev_raw), Some(curr_num)) = (prev_obj.get(key), curr_val.as_f64()) else {
            continue;
        };
        let Some(prev_num) = prev_raw.as_f64() else {
            continue;
        };
        if prev_num != 0.0 {
            changes.push(((curr_num - prev_num) / prev_num * 100.0).abs());
        }
    }

    if changes.is_empty() {
        0.0
    } else {
        changes.iter().sum::<f64>() / changes.len() as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn always_agents_never_skip() {
        let sampler = SmartSampler::new();
        let decision = sampler
            .should_sample("signal_validator", None, &json!({}))
            .await;
        assert!(decision.should_call);
    }

    #[tokio::test]
    async fn periodic_skips_within_interval_then_fires_after() {
        let sampler = SmartSampler::new();
        let first = sampler.should_sample("market_regime", Some("BTCUSDT"), &json!({})).await;
        assert!(first.should_call);

        let second = sampler.should_sample("market_regime", Some("BTCUSDT"), &json!({})).await;
        assert!(!second.should_call);
    }

    #[tokio::test]
    async fn periodic_caches_independently_per_symbol() {
        let sampler = SmartSampler::new();
        assert!(sampler.should_sample("market_regime", Some("BTCUSDT"), &json!({})).await.should_call);
        assert!(sampler.should_sample("market_regime", Some("ETHUSDT"), &json!({})).await.should_call);
    }

    #[tokio::test]
    async fn change_based_requires_threshold_move() {
        let sampler = SmartSampler::new();
        let first = sampler
            .should_sample("anomaly_detector", None, &json!({"volume": 100.0}))
            .await;
        assert!(first.should_call);

        let small_move = sampler
            .should_sample("anomaly_detector", None, &json!({"volume": 102.0}))
            .await;
        assert!(!small_move.should_call);

        let big_move = sampler
            .should_sample("anomaly_detector", None, &json!({"volume": 200.0}))
            .await;
        assert!(big_move.should_call);
    }

    #[tokio::test]
    async fn threshold_strategy_gates_on_metric_value() {
        let sampler = SmartSampler::new();
        let below = sampler
            .should_sample("risk_monitor", None, &json!({"metric_value": 0.5}))
            .await;
        assert!(!below.should_call);

        let above = sampler
            .should_sample("risk_monitor", None, &json!({"metric_value": 0.9}))
            .await;
        assert!(above.should_call);
    }

    #[test]
    fn rate_limit_backoff_doubles_and_caps_at_eight() {
        let sampler = SmartSampler::new();
        sampler.notify_rate_limit();
        assert_eq!(sampler.rate_limit_backoff.load(Ordering::SeqCst), 2);
        sampler.notify_rate_limit();
        assert_eq!(sampler.rate_limit_backoff.load(Ordering::SeqCst), 4);
        sampler.notify_rate_limit();
        assert_eq!(sampler.rate_limit_backoff.load(Ordering::SeqCst), 8);
        sampler.notify_rate_limit();
        assert_eq!(sampler.rate_limit_backoff.load(Ordering::SeqCst), 8);
    }

    #[test]
    fn success_halves_backoff_down_to_one() {
        let sampler = SmartSampler::new();
        sampler.notify_rate_limit();
        sampler.notify_rate_limit();
        assert_eq!(sampler.rate_limit_backoff.load(Ordering::SeqCst), 4);
        sampler.notify_success();
        assert_eq!(sampler.rate_limit_backoff.load(Ordering::SeqCst), 2);
        sampler.notify_success();
        assert_eq!(sampler.rate_limit_backoff.load(Ordering::SeqCst), 1);
    }
}
