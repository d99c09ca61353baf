//! Risk-monitoring agent: a pure-rule fast path over open positions, with an
//! LLM consulted only above a severity threshold (the gateway's own
//! `risk_monitor` sampling strategy is THRESHOLD-based, see `SmartSampler`).
//! No direct reference implementation exists in the original source, so the
//! thresholds are grounded in the margin-cap enforcer's own stop-loss /
//! liquidation-proximity language from the specification.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};
use trading_agent_runtime::Executor;
use trading_core_types::{AgentTask, CoreError};
use trading_gateway::GatewayHandle;
use trading_kv::KvStore;

const STOP_LOSS_PNL_PERCENT: f64 = -2.0;
const LIQUIDATION_PROXIMITY_PERCENT: f64 = 5.0;
const EMERGENCY_DRAWDOWN_PERCENT: f64 = -15.0;

fn get_f64(params: &Value, key: &str) -> f64 {
    params.get(key).and_then(Value::as_f64).unwrap_or(0.0)
}

/// One position's verdict: "hold", "stop_loss", "liquidation_risk".
fn assess_position(position: &Value) -> (&'static str, f64) {
    let pnl_percent = get_f64(position, "unrealized_pnl_percent");
    let liquidation_price = get_f64(position, "liquidation_price");
    let current_price = get_f64(position, "current_price");

    let liquidation_distance_percent = if liquidation_price > 0.0 && current_price > 0.0 {
        (current_price - liquidation_price).abs() / current_price * 100.0
    } else {
        100.0
    };

    if liquidation_distance_percent < LIQUIDATION_PROXIMITY_PERCENT {
        return ("liquidation_risk", liquidation_distance_percent);
    }
    if pnl_percent <= STOP_LOSS_PNL_PERCENT {
        return ("stop_loss", pnl_percent);
    }
    ("hold", pnl_percent)
}

fn monitor_position(params: &Value) -> Value {
    let (verdict, metric) = assess_position(params);
    json!({
        "verdict": verdict,
        "metric_value": metric,
    })
}

fn check_emergency_stop(params: &Value) -> Value {
    let drawdown_percent = get_f64(params, "drawdown_percent");
    let should_stop = drawdown_percent <= EMERGENCY_DRAWDOWN_PERCENT;
    json!({
        "should_stop": should_stop,
        "drawdown_percent": drawdown_percent,
        "threshold": EMERGENCY_DRAWDOWN_PERCENT,
    })
}

/// Thin `Executor`. `monitor_position`'s rule verdict is always returned
/// synchronously; the gateway is only consulted to add a severity score
/// used purely for alert prioritization, gated by the sampler's own
/// THRESHOLD strategy on `metric_value`.
pub struct RiskMonitorAgent {
    gateway: Arc<GatewayHandle>,
    kv: Arc<dyn KvStore>,
    enable_ai: bool,
}

impl RiskMonitorAgent {
    pub fn new(gateway: Arc<GatewayHandle>, kv: Arc<dyn KvStore>) -> Self {
        Self { gateway, kv, enable_ai: true }
    }

    pub fn without_ai(gateway: Arc<GatewayHandle>, kv: Arc<dyn KvStore>) -> Self {
        Self { gateway, kv, enable_ai: false }
    }
}

#[async_trait]
impl Executor for RiskMonitorAgent {
    async fn process_task(&self, task: &AgentTask) -> Result<Value, CoreError> {
        let params: Value = serde_json::to_value(&task.params)?;

        match task.task_type.as_str() {
            "monitor_position" => {
                let mut verdict = monitor_position(&params);
                if verdict["verdict"] != json!("hold") {
                    tracing::warn!(verdict = ?verdict["verdict"], "risk monitor flagged a position");
                }

                if self.enable_ai {
                    let metric_value = verdict["metric_value"].as_f64().unwrap_or(0.0).abs() / 100.0;
                    let context = json!({"metric_value": metric_value});
                    if let Ok(call) = self
                        .gateway
                        .call_ai("risk_monitor", None, "Assess the severity of this position risk.", None, "text", &context, 0.1, 80)
                        .await
                    {
                        verdict["ai_severity"] = call.response;
                    }
                }
                Ok(verdict)
            }
            "check_emergency_stop" => Ok(check_emergency_stop(&params)),
            "emergency_stop_all" => {
                let reason = params.get("reason").and_then(Value::as_str).unwrap_or("circuit_breaker").to_string();
                let bot_ids: Vec<i64> = params
                    .get("bot_instance_ids")
                    .and_then(Value::as_array)
                    .map(|ids| ids.iter().filter_map(Value::as_i64).collect())
                    .unwrap_or_else(|| {
                        params.get("bot_instance_id").and_then(Value::as_i64).into_iter().collect()
                    });

                tracing::error!(count = bot_ids.len(), reason = %reason, "emergency stop all positions requested");
                let command = json!({"action": "stop", "reason": reason, "auto": true}).to_string();
                for bot_id in &bot_ids {
                    self.kv.publish(&format!("bot:command:{bot_id}"), &command).await?;
                }
                Ok(json!({"stopped": true, "bot_instance_ids": bot_ids}))
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

    #[test]
    fn position_near_liquidation_takes_priority_over_pnl() {
        let (verdict, _) = assess_position(&json!({
            "unrealized_pnl_percent": 5.0,
            "liquidation_price": 98.0,
            "current_price": 100.0,
        }));
        assert_eq!(verdict, "liquidation_risk");
    }

    #[test]
    fn stop_loss_trips_at_minus_two_percent() {
        let (verdict, _) = assess_position(&json!({
            "unrealized_pnl_percent": -2.5,
            "liquidation_price": 50.0,
            "current_price": 100.0,
        }));
        assert_eq!(verdict, "stop_loss");
    }

    #[test]
    fn healthy_position_holds() {
        let (verdict, _) = assess_position(&json!({
            "unrealized_pnl_percent": 1.0,
            "liquidation_price": 50.0,
            "current_price": 100.0,
        }));
        assert_eq!(verdict, "hold");
    }

    #[tokio::test]
    async fn monitor_position_task_stays_on_the_rule_path_without_ai() {
        let agent = RiskMonitorAgent::without_ai(gateway(), Arc::new(trading_kv::InMemoryKvStore::new()));
        let task = AgentTaskBuilder::new()
            .task_id("t-1")
            .task_type("monitor_position")
            .param("unrealized_pnl_percent", json!(-3.0))
            .param("liquidation_price", json!(50.0))
            .param("current_price", json!(100.0))
            .build()
            .unwrap();

        let result = agent.process_task(&task).await.unwrap();
        assert_eq!(result["verdict"], json!("stop_loss"));
        assert!(result.get("ai_severity").is_none());
    }

    #[tokio::test]
    async fn emergency_stop_all_publishes_a_stop_command_per_bot() {
        let kv = Arc::new(trading_kv::InMemoryKvStore::new());
        let mut rx = kv.subscribe("bot:command:7").await.unwrap();
        let agent = RiskMonitorAgent::without_ai(gateway(), kv.clone());
        let task = AgentTaskBuilder::new()
            .task_id("t-3")
            .task_type("emergency_stop_all")
            .param("bot_instance_ids", json!([7]))
            .param("reason", json!("circuit_breaker"))
            .build()
            .unwrap();

        let result = agent.process_task(&task).await.unwrap();
        assert_eq!(result["stopped"], json!(true));

        let message = rx.recv().await.unwrap();
        let parsed: Value = serde_json::from_str(&message).unwrap();
        assert_eq!(parsed["action"], json!("stop"));
        assert_eq!(parsed["reason"], json!("circuit_breaker"));
        assert_eq!(parsed["auto"], json!(true));
    }

    #[tokio::test]
    async fn emergency_stop_fires_past_the_drawdown_threshold() {
        let agent = RiskMonitorAgent::without_ai(gateway(), Arc::new(trading_kv::InMemoryKvStore::new()));
        let task = AgentTaskBuilder::new()
            .task_id("t-2")
            .task_type("check_emergency_stop")
            .param("drawdown_percent", json!(-20.0))
            .build()
            .unwrap();

        let result = agent.process_task(&task).await.unwrap();
        assert_eq!(result["should_stop"], json!(true));
    }
}
