//! Anomaly-detection agent. Ported from the reference `AnomalyDetectionAgent`:
//! per-type thresholds over bot-behavior and market metrics, persisting
//! alerts to the KV store and optionally auto-executing a stop.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use serde_json::{json, Value};
use trading_agent_runtime::Executor;
use trading_core_types::{AgentTask, CoreError, MarketEvent, MarketEventType};
use trading_gateway::{EventGate, GatewayHandle};
use trading_kv::KvStore;

const MAX_TRADES_PER_10MIN: i64 = 20;
const LOSING_STREAK_THRESHOLD: i64 = 7;
const MAX_SLIPPAGE_PERCENT: f64 = 0.5;
const MAX_API_ERROR_RATE: f64 = 0.3;
const BOT_STUCK_SECONDS: i64 = 15 * 60;
const FLASH_CRASH_THRESHOLD_PERCENT: f64 = 5.0;
const VOLUME_SPIKE_RATIO: f64 = 10.0;
const MAX_DAILY_LOSS_PERCENT: f64 = 10.0;

const ALERT_TTL_SECS: u64 = 3600;
const USER_ALERT_LIST_CAP: usize = 100;
const BOT_ALERT_LIST_CAP: usize = 50;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    fn as_str(self) -> &'static str {
        match self {
            Severity::Low => "low",
            Severity::Medium => "medium",
            Severity::High => "high",
            Severity::Critical => "critical",
        }
    }
}

fn get_f64(params: &Value, key: &str) -> f64 {
    params.get(key).and_then(Value::as_f64).unwrap_or(0.0)
}

fn get_i64(params: &Value, key: &str) -> i64 {
    params.get(key).and_then(Value::as_i64).unwrap_or(0)
}

fn get_bool(params: &Value, key: &str, default: bool) -> bool {
    params.get(key).and_then(Value::as_bool).unwrap_or(default)
}

fn alert(anomaly_type: &str, severity: Severity, message: String, details: Value, recommended_action: &str) -> Value {
    json!({
        "alert_id": format!("anomaly_{}", uuid::Uuid::new_v4()),
        "anomaly_type": anomaly_type,
        "severity": severity.as_str(),
        "message": message,
        "details": details,
        "recommended_action": recommended_action,
        "auto_executed": false,
    })
}

fn monitor_bot_behavior(bot_id: i64, metrics: &Value, auto_execute: bool) -> Vec<Value> {
    let mut alerts = Vec::new();

    let trades_last_10min = get_i64(metrics, "trades_last_10min");
    if trades_last_10min > MAX_TRADES_PER_10MIN {
        let mut a = alert(
            "excessive_trading",
            Severity::High,
            format!("abnormally high trade frequency: {trades_last_10min}/10min"),
            json!({"trade_count": trades_last_10min, "threshold": MAX_TRADES_PER_10MIN}),
            "stop the bot and review the strategy logic",
        );
        if auto_execute {
            a["auto_executed"] = json!(true);
        }
        alerts.push(a);
    }

    let recent_trades_count = get_i64(metrics, "recent_trades_count");
    let losing_trades_count = get_i64(metrics, "losing_trades_count");
    if recent_trades_count >= 10 && losing_trades_count >= LOSING_STREAK_THRESHOLD {
        let win_rate = get_f64(metrics, "win_rate");
        alerts.push(alert(
            "losing_streak",
            Severity::Medium,
            format!("losing streak: {losing_trades_count}/{recent_trades_count} (win rate {win_rate:.1}%)"),
            json!({"losing_trades": losing_trades_count, "total_trades": recent_trades_count, "win_rate": win_rate}),
            "review strategy parameters and backtest",
        ));
    }

    let avg_slippage = get_f64(metrics, "avg_slippage_percent");
    if avg_slippage > MAX_SLIPPAGE_PERCENT {
        alerts.push(alert(
            "high_slippage",
            Severity::Low,
            format!("high slippage: avg {avg_slippage:.2}%"),
            json!({"avg_slippage": avg_slippage, "threshold": MAX_SLIPPAGE_PERCENT}),
            "check liquidity depth for this symbol",
        ));
    }

    let api_error_rate = get_f64(metrics, "api_error_rate");
    if api_error_rate > MAX_API_ERROR_RATE {
        let mut a = alert(
            "api_error_spike",
            Severity::High,
            format!("API error rate spike: {:.1}%", api_error_rate * 100.0),
            json!({"error_rate": api_error_rate}),
            "check exchange API status, consider pausing the bot",
        );
        if auto_execute && api_error_rate > 0.5 {
            a["auto_executed"] = json!(true);
        }
        alerts.push(a);
    }

    let inactive_seconds = get_i64(metrics, "seconds_since_last_activity");
    if inactive_seconds > BOT_STUCK_SECONDS {
        alerts.push(alert(
            "bot_stuck",
            Severity::High,
            format!("bot unresponsive for {} minutes", inactive_seconds / 60),
            json!({"inactive_seconds": inactive_seconds}),
            "restart the bot",
        ));
    }

    for a in alerts.iter_mut() {
        a["bot_instance_id"] = json!(bot_id);
    }
    alerts
}

fn detect_market_anomaly(symbol: &str, metrics: &Value) -> Vec<Value> {
    let mut alerts = Vec::new();

    let change_1min = get_f64(metrics, "price_change_1min_percent");
    if change_1min.abs() > FLASH_CRASH_THRESHOLD_PERCENT {
        let direction = if change_1min > 0.0 { "spike" } else { "crash" };
        alerts.push(alert(
            "flash_crash",
            Severity::Critical,
            format!("{symbol} {direction}: {:.2}% (1min)", change_1min.abs()),
            json!({"price_change_1min": change_1min, "threshold": FLASH_CRASH_THRESHOLD_PERCENT}),
            "pause all bots on this symbol until the market stabilizes",
        ));
    }

    let volume_ratio = get_f64(metrics, "volume_ratio");
    if volume_ratio > VOLUME_SPIKE_RATIO {
        alerts.push(alert(
            "volume_spike",
            Severity::Medium,
            format!("{symbol} volume spike: {volume_ratio:.1}x average"),
            json!({"volume_ratio": volume_ratio}),
            "confirm this is not a data artifact before acting",
        ));
    }

    for a in alerts.iter_mut() {
        a["symbol"] = json!(symbol);
    }
    alerts
}

fn check_circuit_breaker(user_id: i64, daily_pnl: f64, total_equity: f64, auto_execute: bool) -> Option<Value> {
    if total_equity <= 0.0 {
        return None;
    }
    let daily_loss_percent = daily_pnl / total_equity * 100.0;
    if daily_loss_percent >= -MAX_DAILY_LOSS_PERCENT {
        return None;
    }

    Some(json!({
        "user_id": user_id,
        "daily_pnl": daily_pnl,
        "total_equity": total_equity,
        "daily_loss_percent": daily_loss_percent,
        "max_daily_loss_percent": MAX_DAILY_LOSS_PERCENT,
        "is_triggered": true,
        "reason": format!("daily loss {:.1}% reached (limit {:.1}%)", daily_loss_percent.abs(), MAX_DAILY_LOSS_PERCENT),
        "auto_executed": auto_execute,
    }))
}

/// Thin `Executor`; consults the gateway only to classify alert severity
/// when `enable_ai` is set, never on the detection path itself.
pub struct AnomalyDetectorAgent {
    gateway: Arc<GatewayHandle>,
    kv: Arc<dyn KvStore>,
    enable_ai: bool,
}

impl AnomalyDetectorAgent {
    pub fn new(gateway: Arc<GatewayHandle>, kv: Arc<dyn KvStore>) -> Self {
        Self { gateway, kv, enable_ai: true }
    }

    pub fn without_ai(gateway: Arc<GatewayHandle>, kv: Arc<dyn KvStore>) -> Self {
        Self { gateway, kv, enable_ai: false }
    }

    async fn persist_alerts(&self, alerts: &[Value], user_id: Option<i64>, bot_id: Option<i64>) -> Result<(), CoreError> {
        for a in alerts {
            let alert_id = a["alert_id"].as_str().unwrap_or_default();
            let payload = a.to_string();
            self.kv.set_ex(&format!("agent:anomaly:alert:{alert_id}"), &payload, ALERT_TTL_SECS).await?;
            if let Some(uid) = user_id {
                self.kv.list_push_capped(&format!("agent:anomaly:user:{uid}:alerts"), alert_id, USER_ALERT_LIST_CAP).await?;
            }
            if let Some(bid) = bot_id {
                self.kv.list_push_capped(&format!("agent:anomaly:bot:{bid}:alerts"), alert_id, BOT_ALERT_LIST_CAP).await?;
            }
        }
        Ok(())
    }

    /// Builds the `MarketEvent` a detected market anomaly corresponds to, so
    /// severity classification runs through the gateway's event-driven
    /// pre-gate rather than calling the sampler directly.
    fn market_event(symbol: &str, metrics: &Value, alert: &Value) -> MarketEvent {
        let event_type = match alert["anomaly_type"].as_str() {
            Some("flash_crash") => MarketEventType::PriceChange,
            _ => MarketEventType::VolumeSpike,
        };
        let mut data = HashMap::new();
        if let Some(v) = metrics.get("price_change_1min_percent") {
            data.insert("change_percent".to_string(), v.clone());
        }
        if let Some(v) = metrics.get("volume_ratio") {
            data.insert("volume_ratio".to_string(), v.clone());
        }
        MarketEvent {
            event_id: alert["alert_id"].as_str().unwrap_or_default().to_string(),
            event_type,
            symbol: symbol.to_string(),
            priority: EventGate::classify_priority(event_type, None),
            data,
            timestamp: Utc::now(),
        }
    }
}

#[async_trait]
impl Executor for AnomalyDetectorAgent {
    async fn process_task(&self, task: &AgentTask) -> Result<Value, CoreError> {
        let params: Value = serde_json::to_value(&task.params)?;

        match task.task_type.as_str() {
            "monitor_bot_behavior" => {
                let bot_id = params.get("bot_instance_id").and_then(Value::as_i64).unwrap_or(0);
                let metrics = params.get("metrics").cloned().unwrap_or(json!({}));
                let auto_execute = get_bool(&params, "auto_execute", true);
                let alerts = monitor_bot_behavior(bot_id, &metrics, auto_execute);
                if !alerts.is_empty() {
                    tracing::warn!(bot_id, count = alerts.len(), "bot anomalies detected");
                }
                self.persist_alerts(&alerts, None, Some(bot_id)).await?;
                Ok(json!(alerts))
            }
            "detect_market_anomaly" => {
                let symbol = params.get("symbol").and_then(Value::as_str).unwrap_or("BTCUSDT").to_string();
                let metrics = params.get("metrics").cloned().unwrap_or(json!({}));
                let mut alerts = detect_market_anomaly(&symbol, &metrics);

                if self.enable_ai {
                    for a in alerts.iter_mut() {
                        let event = Self::market_event(&symbol, &metrics, a);
                        if let Ok(call) = self
                            .gateway
                            .call_ai_with_event(&event, "anomaly_detector", "Classify the severity of this market anomaly.", None, "text", a, 0.1, 100)
                            .await
                        {
                            a["ai_severity_note"] = call.response;
                        }
                    }
                }

                self.persist_alerts(&alerts, None, None).await?;
                Ok(json!(alerts))
            }
            "check_circuit_breaker" => {
                let user_id = params.get("user_id").and_then(Value::as_i64).unwrap_or(0);
                let daily_pnl = get_f64(&params, "daily_pnl");
                let total_equity = get_f64(&params, "total_equity");
                let auto_execute = get_bool(&params, "auto_execute", true);

                match check_circuit_breaker(user_id, daily_pnl, total_equity, auto_execute) {
                    Some(status) => {
                        tracing::error!(user_id, loss_percent = status["daily_loss_percent"].as_f64(), "circuit breaker triggered");
                        let alert = alert(
                            "circuit_breaker",
                            Severity::Critical,
                            format!("circuit breaker triggered: daily loss {:.1}%", status["daily_loss_percent"].as_f64().unwrap_or(0.0).abs()),
                            status.clone(),
                            "all bots stopped automatically, review strategy",
                        );
                        self.persist_alerts(&[alert], Some(user_id), None).await?;
                        Ok(status)
                    }
                    None => Ok(json!(null)),
                }
            }
            "get_active_alerts" => {
                let prefix = match (params.get("user_id").and_then(Value::as_i64), params.get("bot_instance_id").and_then(Value::as_i64)) {
                    (Some(uid), _) => format!("agent:anomaly:user:{uid}:alerts"),
                    (_, Some(bid)) => format!("agent:anomaly:bot:{bid}:alerts"),
                    _ => "agent:anomaly:alert:".to_string(),
                };
                let keys = self.kv.scan(&format!("{prefix}*")).await?;
                Ok(json!(keys))
            }
            other => Err(CoreError::ValidationFailed(format!("unknown task type: {other}"))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gateway() -> Arc<GatewayHandle> {
        Arc::new(GatewayHandle::new(
            trading_gateway::AiProvider::Anthropic { api_key: "test".into(), model: "test".into() },
            Arc::new(trading_kv::InMemoryKvStore::new()),
        ))
    }

    #[test]
    fn excessive_trading_trips_and_auto_stops() {
        let alerts = monitor_bot_behavior(1, &json!({"trades_last_10min": 25}), true);
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0]["anomaly_type"], json!("excessive_trading"));
        assert_eq!(alerts[0]["auto_executed"], json!(true));
    }

    #[test]
    fn losing_streak_requires_minimum_sample_size() {
        let alerts = monitor_bot_behavior(1, &json!({"recent_trades_count": 5, "losing_trades_count": 5}), true);
        assert!(alerts.is_empty());

        let alerts = monitor_bot_behavior(1, &json!({"recent_trades_count": 10, "losing_trades_count": 7}), true);
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0]["anomaly_type"], json!("losing_streak"));
    }

    #[test]
    fn flash_crash_detected_regardless_of_direction() {
        let alerts = detect_market_anomaly("BTCUSDT", &json!({"price_change_1min_percent": -7.0}));
        assert_eq!(alerts[0]["anomaly_type"], json!("flash_crash"));
    }

    #[test]
    fn circuit_breaker_triggers_past_the_daily_loss_limit() {
        let status = check_circuit_breaker(1, -1500.0, 10_000.0, true).unwrap();
        assert_eq!(status["is_triggered"], json!(true));

        assert!(check_circuit_breaker(1, -500.0, 10_000.0, true).is_none());
    }

    #[tokio::test]
    async fn monitor_bot_behavior_task_persists_alerts_for_the_bot() {
        let kv = Arc::new(trading_kv::InMemoryKvStore::new());
        let agent = AnomalyDetectorAgent::without_ai(gateway(), kv.clone());
        let task = trading_core_types::AgentTaskBuilder::new()
            .task_id("t-1")
            .task_type("monitor_bot_behavior")
            .param("bot_instance_id", json!(7))
            .param("metrics", json!({"trades_last_10min": 30}))
            .param("auto_execute", json!(false))
            .build()
            .unwrap();

        let result = agent.process_task(&task).await.unwrap();
        assert_eq!(result.as_array().unwrap().len(), 1);

        let keys = kv.scan("agent:anomaly:alert:").await.unwrap();
        assert_eq!(keys.len(), 1);
    }
}
