//! Signal-validation agent: a rule checklist over a proposed trade signal.
//! No direct reference implementation exists in the original source (it was
//! never ported beyond the strategies' own internal confidence gate), so
//! this is built from the specification's rule table: approve only if at
//! least seven of the rules pass and every critical rule passes.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};
use trading_agent_runtime::Executor;
use trading_core_types::{AgentTask, CoreError};
use trading_gateway::GatewayHandle;
use trading_kv::KvStore;

const APPROVAL_MIN_PASSED: usize = 7;

struct Rule {
    name: &'static str,
    critical: bool,
    passed: bool,
}

fn evaluate_rules(params: &Value) -> Vec<Rule> {
    let confidence = params.get("confidence").and_then(Value::as_f64).unwrap_or(0.0);
    let position_size_percent = params.get("position_size_percent").and_then(Value::as_f64).unwrap_or(0.0);
    let margin_usage_percent = params.get("margin_usage_percent").and_then(Value::as_f64).unwrap_or(0.0);
    let daily_pnl = params.get("daily_pnl").and_then(Value::as_f64).unwrap_or(0.0);
    let protection_mode = params.get("protection_mode").and_then(Value::as_str).unwrap_or("NORMAL");
    let leverage = params.get("target_leverage").and_then(Value::as_f64).unwrap_or(1.0);
    let max_leverage = params.get("max_leverage").and_then(Value::as_f64).unwrap_or(20.0);
    let has_conflicting_position = params.get("has_conflicting_position").and_then(Value::as_bool).unwrap_or(false);
    let stop_loss_percent = params.get("stop_loss_percent").and_then(Value::as_f64).unwrap_or(0.0);
    let take_profit_percent = params.get("take_profit_percent").and_then(Value::as_f64).unwrap_or(0.0);

    vec![
        Rule { name: "confidence_above_threshold", critical: true, passed: confidence >= 0.6 },
        Rule { name: "margin_not_exhausted", critical: true, passed: margin_usage_percent < 95.0 },
        Rule { name: "daily_loss_limit_not_breached", critical: true, passed: daily_pnl > -1000.0 },
        Rule { name: "position_size_within_limits", critical: false, passed: position_size_percent <= 80.0 },
        Rule { name: "leverage_within_bounds", critical: false, passed: leverage <= max_leverage },
        Rule { name: "protection_mode_allows_entry", critical: false, passed: protection_mode != "LOCKDOWN" },
        Rule { name: "no_conflicting_position", critical: false, passed: !has_conflicting_position },
        Rule { name: "stop_loss_is_set", critical: false, passed: stop_loss_percent > 0.0 },
        Rule { name: "risk_reward_ratio_acceptable", critical: false, passed: stop_loss_percent <= 0.0 || take_profit_percent / stop_loss_percent >= 1.2 },
    ]
}

fn validate(params: &Value) -> Value {
    let rules = evaluate_rules(params);
    let passed_count = rules.iter().filter(|r| r.passed).count();
    let failed_rules: Vec<&str> = rules.iter().filter(|r| !r.passed).map(|r| r.name).collect();
    let critical_failed = rules.iter().any(|r| r.critical && !r.passed);

    let approved = !critical_failed && passed_count >= APPROVAL_MIN_PASSED;
    let warnings: Vec<&str> = if approved {
        rules.iter().filter(|r| !r.critical && !r.passed).map(|r| r.name).collect()
    } else {
        Vec::new()
    };

    json!({
        "approved": approved,
        "confidence": passed_count as f64 / rules.len() as f64,
        "reason": if approved { "passed checklist".to_string() } else { format!("failed rules: {}", failed_rules.join(", ")) },
        "failed_rules": failed_rules,
        "warnings": warnings,
    })
}

/// Thin `Executor`; the gateway is consulted only to add narrative reasoning
/// and is never on the approve/reject critical path (`enable_ai = false`
/// skips it entirely, matching the reference agents' own `enable_ai` flag).
pub struct SignalValidatorAgent {
    #[allow(dead_code)]
    gateway: Arc<GatewayHandle>,
    #[allow(dead_code)]
    kv: Arc<dyn KvStore>,
    enable_ai: bool,
}

impl SignalValidatorAgent {
    pub fn new(gateway: Arc<GatewayHandle>, kv: Arc<dyn KvStore>) -> Self {
        Self { gateway, kv, enable_ai: true }
    }

    pub fn without_ai(gateway: Arc<GatewayHandle>, kv: Arc<dyn KvStore>) -> Self {
        Self { gateway, kv, enable_ai: false }
    }
}

#[async_trait]
impl Executor for SignalValidatorAgent {
    async fn process_task(&self, task: &AgentTask) -> Result<Value, CoreError> {
        match task.task_type.as_str() {
            "validate_signal" | "validate_rebalancing" => {
                let params_value: Value = serde_json::to_value(&task.params)?;
                let mut outcome = validate(&params_value);

                if self.enable_ai && !outcome["approved"].as_bool().unwrap_or(false) {
                    let symbol = task.params.get("symbol").and_then(Value::as_str);
                    if let Ok(call) = self
                        .gateway
                        .call_ai(
                            "signal_validator",
                            symbol,
                            "Briefly explain why this trading signal failed validation.",
                            None,
                            "text",
                            &params_value,
                            0.2,
                            150,
                        )
                        .await
                    {
                        outcome["ai_explanation"] = call.response;
                    }
                }

                Ok(outcome)
            }
            other => Err(CoreError::ValidationFailed(format!("unknown task type: {other}"))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use trading_core_types::AgentTaskBuilder;

    fn gateway() -> Arc<GatewayHandle> {
        Arc::new(GatewayHandle::new(
            trading_gateway::AiProvider::Anthropic { api_key: "test".into(), model: "test".into() },
            Arc::new(trading_kv::InMemoryKvStore::new()),
        ))
    }

    fn params(pairs: &[(&str, Value)]) -> HashMap<String, Value> {
        pairs.iter().map(|(k, v)| (k.to_string(), v.clone())).collect()
    }

    #[tokio::test]
    async fn strong_signal_with_clean_risk_profile_is_approved() {
        let agent = SignalValidatorAgent::without_ai(gateway(), Arc::new(trading_kv::InMemoryKvStore::new()));
        let task = AgentTaskBuilder::new()
            .task_id("t-1")
            .task_type("validate_signal")
            .params(params(&[
                ("confidence", json!(0.85)),
                ("position_size_percent", json!(40.0)),
                ("margin_usage_percent", json!(20.0)),
                ("daily_pnl", json!(50.0)),
                ("protection_mode", json!("NORMAL")),
                ("target_leverage", json!(10.0)),
                ("max_leverage", json!(20.0)),
                ("stop_loss_percent", json!(2.0)),
                ("take_profit_percent", json!(4.0)),
            ]))
            .build()
            .unwrap();

        let result = agent.process_task(&task).await.unwrap();
        assert_eq!(result["approved"], json!(true));
        assert!(result["failed_rules"].as_array().unwrap().is_empty());
    }

    #[tokio::test]
    async fn low_confidence_is_a_critical_rejection_regardless_of_other_rules() {
        let agent = SignalValidatorAgent::without_ai(gateway(), Arc::new(trading_kv::InMemoryKvStore::new()));
        let task = AgentTaskBuilder::new()
            .task_id("t-2")
            .task_type("validate_signal")
            .params(params(&[
                ("confidence", json!(0.3)),
                ("position_size_percent", json!(10.0)),
                ("margin_usage_percent", json!(5.0)),
                ("daily_pnl", json!(100.0)),
                ("stop_loss_percent", json!(2.0)),
                ("take_profit_percent", json!(4.0)),
            ]))
            .build()
            .unwrap();

        let result = agent.process_task(&task).await.unwrap();
        assert_eq!(result["approved"], json!(false));
        assert!(result["failed_rules"]
            .as_array()
            .unwrap()
            .iter()
            .any(|v| v == "confidence_above_threshold"));
    }

    #[tokio::test]
    async fn lockdown_mode_alone_does_not_block_if_enough_other_rules_pass() {
        let agent = SignalValidatorAgent::without_ai(gateway(), Arc::new(trading_kv::InMemoryKvStore::new()));
        let task = AgentTaskBuilder::new()
            .task_id("t-3")
            .task_type("validate_signal")
            .params(params(&[
                ("confidence", json!(0.9)),
                ("position_size_percent", json!(10.0)),
                ("margin_usage_percent", json!(5.0)),
                ("daily_pnl", json!(100.0)),
                ("protection_mode", json!("LOCKDOWN")),
                ("target_leverage", json!(5.0)),
                ("max_leverage", json!(20.0)),
                ("stop_loss_percent", json!(2.0)),
                ("take_profit_percent", json!(4.0)),
            ]))
            .build()
            .unwrap();

        let result = agent.process_task(&task).await.unwrap();
        assert_eq!(result["approved"], json!(true));
        assert!(result["warnings"]
            .as_array()
            .unwrap()
            .iter()
            .any(|v| v == "protection_mode_allows_entry"));
    }
}
