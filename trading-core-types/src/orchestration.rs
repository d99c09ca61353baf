use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// The closed set of event types the orchestrator's rule engine matches on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventType {
    SignalGenerated,
    TradeExecuted,
    PositionOpened,
    PositionClosed,
    MarketRegimeChanged,
    PriceAlert,
    VolumeSpike,
    RiskLevelChanged,
    StopLossTriggered,
    MarginWarning,
    RebalancingDue,
    AllocationChanged,
    AnomalyDetected,
    CircuitBreakerTriggered,
}

/// A typed message crossing the orchestrator's boundary.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestrationEvent {
    pub event_id: String,
    pub event_type: EventType,
    pub source_agent: String,
    pub user_id: Option<String>,
    pub bot_instance_id: Option<String>,
    pub symbol: Option<String>,
    pub data: HashMap<String, Value>,
    pub timestamp: DateTime<Utc>,
    pub priority: u8,
}

impl OrchestrationEvent {
    pub fn new(event_type: EventType, source_agent: impl Into<String>) -> Self {
        Self {
            event_id: Uuid::new_v4().to_string(),
            event_type,
            source_agent: source_agent.into(),
            user_id: None,
            bot_instance_id: None,
            symbol: None,
            data: HashMap::new(),
            timestamp: Utc::now(),
            priority: 3,
        }
    }

    pub fn with_data(mut self, key: impl Into<String>, value: Value) -> Self {
        self.data.insert(key.into(), value);
        self
    }

    pub fn with_symbol(mut self, symbol: impl Into<String>) -> Self {
        self.symbol = Some(symbol.into());
        self
    }

    pub fn with_user(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }
}

/// One step of a rule's action list: which agent to call, with what task
/// type and extra params, bounded by a per-action timeout.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentAction {
    pub agent_id: String,
    pub action: String,
    pub params: HashMap<String, Value>,
    pub timeout_secs: f64,
}

impl AgentAction {
    pub fn new(agent_id: impl Into<String>, action: impl Into<String>, timeout_secs: f64) -> Self {
        Self {
            agent_id: agent_id.into(),
            action: action.into(),
            params: HashMap::new(),
            timeout_secs,
        }
    }
}

/// Static configuration mapping event types (+ optional equality predicate)
/// to an ordered list of agent actions. Rules never mutate at runtime; they
/// are installed once at startup (default set plus any operator additions).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestrationRule {
    pub rule_id: String,
    pub name: String,
    pub trigger_event_types: Vec<EventType>,
    pub trigger_conditions: Option<HashMap<String, Value>>,
    pub actions: Vec<AgentAction>,
    pub enabled: bool,
    pub priority: i32,
}

impl OrchestrationRule {
    /// True if this rule's trigger list contains the event's type and every
    /// `trigger_conditions` key equals the corresponding value in
    /// `event.data` (simple equality match, per the spec).
    pub fn matches(&self, event: &OrchestrationEvent) -> bool {
        if !self.enabled {
            return false;
        }
        if !self.trigger_event_types.contains(&event.event_type) {
            return false;
        }
        match &self.trigger_conditions {
            None => true,
            Some(conditions) => conditions
                .iter()
                .all(|(k, v)| event.data.get(k) == Some(v)),
        }
    }
}

/// The outcome of running one `AgentAction`, keyed by `agent_id` in
/// `OrchestrationResult.action_results` (later actions for the same agent id
/// overwrite earlier ones, per the spec).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ActionResult {
    Ok(Value),
    Error { error: String },
}

/// The orchestrator's output for a single `handle_event` call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestrationResult {
    pub event_id: String,
    pub event_type: EventType,
    pub actions_executed: Vec<AgentAction>,
    pub action_results: HashMap<String, ActionResult>,
    pub success: bool,
    pub errors: Vec<String>,
    pub final_decision: String,
}

impl OrchestrationResult {
    pub fn new(event: &OrchestrationEvent) -> Self {
        Self {
            event_id: event.event_id.clone(),
            event_type: event.event_type,
            actions_executed: Vec::new(),
            action_results: HashMap::new(),
            success: true,
            errors: Vec::new(),
            final_decision: "no_action".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rule_matches_requires_event_type_membership() {
        let rule = OrchestrationRule {
            rule_id: "r1".into(),
            name: "test".into(),
            trigger_event_types: vec![EventType::SignalGenerated],
            trigger_conditions: None,
            actions: vec![],
            enabled: true,
            priority: 1,
        };

        let matching = OrchestrationEvent::new(EventType::SignalGenerated, "x");
        assert!(rule.matches(&matching));

        let other = OrchestrationEvent::new(EventType::AnomalyDetected, "x");
        assert!(!rule.matches(&other));
    }

    #[test]
    fn rule_matches_equality_predicate_on_data() {
        let mut conditions = HashMap::new();
        conditions.insert("severity".to_string(), Value::String("critical".into()));

        let rule = OrchestrationRule {
            rule_id: "r1".into(),
            name: "test".into(),
            trigger_event_types: vec![EventType::AnomalyDetected],
            trigger_conditions: Some(conditions),
            actions: vec![],
            enabled: true,
            priority: 1,
        };

        let matches =
            OrchestrationEvent::new(EventType::AnomalyDetected, "x").with_data("severity", Value::String("critical".into()));
        assert!(rule.matches(&matches));

        let no_match =
            OrchestrationEvent::new(EventType::AnomalyDetected, "x").with_data("severity", Value::String("low".into()));
        assert!(!rule.matches(&no_match));
    }

    #[test]
    fn disabled_rule_never_matches() {
        let rule = OrchestrationRule {
            rule_id: "r1".into(),
            name: "test".into(),
            trigger_event_types: vec![EventType::SignalGenerated],
            trigger_conditions: None,
            actions: vec![],
            enabled: false,
            priority: 1,
        };
        let event = OrchestrationEvent::new(EventType::SignalGenerated, "x");
        assert!(!rule.matches(&event));
    }
}
