//! `final_decision` aggregation, one function per event type (§7's
//! taxonomy). Reads `OrchestrationResult.action_results` by the agent ids
//! the default rules actually call, plus whatever context fields the
//! triggering event carried in `data`.
//!
//! The specification's own illustrative scenarios describe a `risk_level`
//! field on the risk-monitor's response; this crate's `risk_monitor` agent
//! instead reports a `verdict` (`hold` / `stop_loss` / `liquidation_risk`,
//! see `trading-agents`). Aggregation here reads the field names this
//! workspace's agents actually produce rather than the spec's illustrative
//! ones — there is no `risk_level` anywhere in this implementation.

use std::collections::HashMap;

use serde_json::Value;
use trading_core_types::{ActionResult, EventType};

fn ok_value<'a>(results: &'a HashMap<String, ActionResult>, agent_id: &str) -> Option<&'a Value> {
    match results.get(agent_id) {
        Some(ActionResult::Ok(v)) => Some(v),
        _ => None,
    }
}

fn decide_signal_generated(results: &HashMap<String, ActionResult>) -> &'static str {
    let validator = ok_value(results, "signal_validator");
    let approved = validator.and_then(|v| v.get("approved")).and_then(Value::as_bool);
    let confidence = validator.and_then(|v| v.get("confidence")).and_then(Value::as_f64);
    let risk_verdict = ok_value(results, "risk_monitor")
        .and_then(|v| v.get("verdict"))
        .and_then(Value::as_str);

    if risk_verdict == Some("liquidation_risk") {
        return "block_risk";
    }
    match approved {
        Some(false) => {
            if confidence.unwrap_or(1.0) < 0.5 {
                "block_low_confidence"
            } else {
                "block_risk"
            }
        }
        Some(true) if risk_verdict == Some("stop_loss") => "adjust_size",
        Some(true) => "allow",
        None => "block_risk",
    }
}

fn decide_anomaly_detected(results: &HashMap<String, ActionResult>, event_data: &HashMap<String, Value>) -> &'static str {
    let should_stop = ok_value(results, "risk_monitor")
        .and_then(|v| v.get("should_stop"))
        .and_then(Value::as_bool)
        .unwrap_or(false);
    if should_stop {
        return "emergency_stop";
    }
    match event_data.get("severity").and_then(Value::as_str) {
        Some("critical") | Some("high") => "reduce_positions",
        Some("medium") => "monitor",
        _ => "ignore",
    }
}

fn decide_circuit_breaker_triggered(results: &HashMap<String, ActionResult>, event_data: &HashMap<String, Value>) -> &'static str {
    let stopped = ok_value(results, "risk_monitor")
        .and_then(|v| v.get("stopped"))
        .and_then(Value::as_bool)
        .unwrap_or(false);
    if !stopped {
        return "reduce_all_positions";
    }
    let daily_loss_percent = event_data.get("daily_loss_percent").and_then(Value::as_f64).unwrap_or(0.0);
    if daily_loss_percent >= 10.0 {
        "stop_all_bots"
    } else {
        "stop_losing_bots"
    }
}

fn decide_rebalancing_due(results: &HashMap<String, ActionResult>) -> &'static str {
    let suggestion = match ok_value(results, "portfolio_optimizer") {
        Some(v) => v,
        None => return "skip_insufficient_improvement",
    };
    let suggestions_empty = suggestion["suggestions"].as_array().map(|a| a.is_empty()).unwrap_or(true);
    if suggestions_empty {
        return "skip_insufficient_improvement";
    }
    let sharpe_improvement = suggestion["sharpe_improvement_percent"].as_f64().unwrap_or(0.0);
    if sharpe_improvement < 0.0 {
        return "skip_risk_increase";
    }
    let validator_approved = ok_value(results, "signal_validator").and_then(|v| v.get("approved")).and_then(Value::as_bool);
    if validator_approved != Some(true) {
        return "skip_validation_failed";
    }
    "apply_rebalancing"
}

fn decide_market_regime_changed(results: &HashMap<String, ActionResult>, event_data: &HashMap<String, Value>) -> &'static str {
    match event_data.get("regime").and_then(Value::as_str) {
        Some("Volatile") | Some("TrendingDown") => "adjust_risk_params",
        Some("TrendingUp") | Some("Ranging") if ok_value(results, "portfolio_optimizer").is_some() => "trigger_rebalancing",
        _ => "no_action",
    }
}

/// Aggregate one event's `action_results` into a single decision string.
/// Unmatched event types (no rule installed for them) fall through to
/// `no_action`, per §7.
pub fn final_decision(event_type: EventType, results: &HashMap<String, ActionResult>, event_data: &HashMap<String, Value>) -> String {
    match event_type {
        EventType::SignalGenerated => decide_signal_generated(results),
        EventType::AnomalyDetected => decide_anomaly_detected(results, event_data),
        EventType::CircuitBreakerTriggered => decide_circuit_breaker_triggered(results, event_data),
        EventType::RebalancingDue => decide_rebalancing_due(results),
        EventType::MarketRegimeChanged => decide_market_regime_changed(results, event_data),
        _ => "no_action",
    }
    .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn ok(results: &mut HashMap<String, ActionResult>, agent_id: &str, value: Value) {
        results.insert(agent_id.to_string(), ActionResult::Ok(value));
    }

    #[test]
    fn signal_generated_allows_on_approval_and_safe_risk() {
        let mut results = HashMap::new();
        ok(&mut results, "signal_validator", json!({"approved": true, "confidence": 0.9}));
        ok(&mut results, "risk_monitor", json!({"verdict": "hold"}));
        assert_eq!(final_decision(EventType::SignalGenerated, &results, &HashMap::new()), "allow");
    }

    #[test]
    fn signal_generated_blocks_on_risk_even_when_approved() {
        let mut results = HashMap::new();
        ok(&mut results, "signal_validator", json!({"approved": true, "confidence": 0.9}));
        ok(&mut results, "risk_monitor", json!({"verdict": "liquidation_risk"}));
        assert_eq!(final_decision(EventType::SignalGenerated, &results, &HashMap::new()), "block_risk");
    }

    #[test]
    fn signal_generated_blocks_low_confidence() {
        let mut results = HashMap::new();
        ok(&mut results, "signal_validator", json!({"approved": false, "confidence": 0.2}));
        assert_eq!(final_decision(EventType::SignalGenerated, &results, &HashMap::new()), "block_low_confidence");
    }

    #[test]
    fn circuit_breaker_stops_all_bots_past_ten_percent_daily_loss() {
        let mut results = HashMap::new();
        ok(&mut results, "risk_monitor", json!({"stopped": true}));
        let mut data = HashMap::new();
        data.insert("daily_loss_percent".to_string(), json!(12.0));
        assert_eq!(final_decision(EventType::CircuitBreakerTriggered, &results, &data), "stop_all_bots");
    }

    #[test]
    fn unmatched_event_type_is_no_action() {
        let results = HashMap::new();
        assert_eq!(final_decision(EventType::TradeExecuted, &results, &HashMap::new()), "no_action");
    }
}
