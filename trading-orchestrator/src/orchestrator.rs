use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde_json::Value;
use trading_agent_runtime::Executor;
use trading_core_types::{
    ActionResult, AgentTaskBuilder, CoreError, EventType, OrchestrationEvent, OrchestrationResult, OrchestrationRule,
};
use trading_kv::KvStore;

use crate::decision::final_decision;
use crate::registry::AgentRegistry;
use crate::rules::default_rules;

/// Called once per `handle_event` after the result is persisted; fire-and-forget.
pub trait EventHandler: Send + Sync {
    fn handle(&self, result: &OrchestrationResult);
}

/// Health as last observed by `check_agent_health`; not the agent's own
/// `AgentState` (that lives inside `AgentRuntime`, which the orchestrator
/// does not own).
#[derive(Debug, Clone)]
pub struct AgentHealth {
    pub is_healthy: bool,
    pub last_heartbeat: Option<DateTime<Utc>>,
    pub error_count: u64,
}

impl Default for AgentHealth {
    fn default() -> Self {
        Self { is_healthy: true, last_heartbeat: None, error_count: 0 }
    }
}

const ORCHESTRATION_RESULT_TTL_SECS: u64 = 3600;
const HEALTH_CHECK_TIMEOUT_SECS: u64 = 3;

fn channel_name(event_type: EventType) -> String {
    let tag = serde_json::to_value(event_type).unwrap_or(Value::Null);
    format!("orchestration:events:{}", tag.as_str().unwrap_or("UNKNOWN"))
}

const ALL_EVENT_TYPES: &[EventType] = &[
    EventType::SignalGenerated,
    EventType::TradeExecuted,
    EventType::PositionOpened,
    EventType::PositionClosed,
    EventType::MarketRegimeChanged,
    EventType::PriceAlert,
    EventType::VolumeSpike,
    EventType::RiskLevelChanged,
    EventType::StopLossTriggered,
    EventType::MarginWarning,
    EventType::RebalancingDue,
    EventType::AllocationChanged,
    EventType::AnomalyDetected,
    EventType::CircuitBreakerTriggered,
];

/// Owns the agent registry, the rule table, and registered event handlers.
/// `handle_event` is the only place actions actually run; `publish_event`/
/// `subscribe_to_events` are the pub/sub wrapper around it.
pub struct Orchestrator {
    registry: RwLock<AgentRegistry>,
    rules: RwLock<Vec<OrchestrationRule>>,
    event_handlers: RwLock<HashMap<EventType, Vec<Arc<dyn EventHandler>>>>,
    health: RwLock<HashMap<String, AgentHealth>>,
    kv: Arc<dyn KvStore>,
}

impl Orchestrator {
    pub fn new(kv: Arc<dyn KvStore>) -> Self {
        Self {
            registry: RwLock::new(AgentRegistry::new()),
            rules: RwLock::new(default_rules()),
            event_handlers: RwLock::new(HashMap::new()),
            health: RwLock::new(HashMap::new()),
            kv,
        }
    }

    pub fn register_agent(&self, id: impl Into<String>, instance: Arc<dyn Executor>) {
        self.registry.write().unwrap().register_agent(id, instance);
    }

    pub fn add_rule(&self, rule: OrchestrationRule) {
        self.rules.write().unwrap().push(rule);
    }

    pub fn add_event_handler(&self, event_type: EventType, handler: Arc<dyn EventHandler>) {
        self.event_handlers.write().unwrap().entry(event_type).or_default().push(handler);
    }

    /// Matching rules, sorted by descending priority (ties keep table order,
    /// per §8 property 2's "concatenation" requirement — a stable sort).
    fn matching_rules(&self, event: &OrchestrationEvent) -> Vec<OrchestrationRule> {
        let mut matched: Vec<OrchestrationRule> =
            self.rules.read().unwrap().iter().filter(|r| r.matches(event)).cloned().collect();
        matched.sort_by(|a, b| b.priority.cmp(&a.priority));
        matched
    }

    pub async fn handle_event(&self, event: &OrchestrationEvent) -> Result<OrchestrationResult, CoreError> {
        let mut result = OrchestrationResult::new(event);

        for rule in self.matching_rules(event) {
            for action in &rule.actions {
                result.actions_executed.push(action.clone());

                let agent = match self.registry.read().unwrap().get(&action.agent_id) {
                    Ok(agent) => agent,
                    Err(err) => {
                        result.success = false;
                        result.errors.push(err.to_string());
                        result.action_results.insert(action.agent_id.clone(), ActionResult::Error { error: err.to_string() });
                        continue;
                    }
                };

                let mut params = action.params.clone();
                params.extend(event.data.clone());
                params.insert("event_id".to_string(), Value::String(event.event_id.clone()));
                params.insert("event_type".to_string(), serde_json::to_value(event.event_type)?);

                let task = AgentTaskBuilder::new()
                    .task_id(format!("{}-{}", event.event_id, action.agent_id))
                    .task_type(action.action.clone())
                    .params(params)
                    .timeout(Duration::from_secs_f64(action.timeout_secs))
                    .build()?;

                let outcome = tokio::time::timeout(Duration::from_secs_f64(action.timeout_secs), agent.process_task(&task)).await;

                match outcome {
                    Ok(Ok(value)) => {
                        result.action_results.insert(action.agent_id.clone(), ActionResult::Ok(value));
                    }
                    Ok(Err(err)) => {
                        result.success = false;
                        result.errors.push(err.to_string());
                        result.action_results.insert(action.agent_id.clone(), ActionResult::Error { error: err.to_string() });
                    }
                    Err(_) => {
                        let message = format!("action timed out after {}s", action.timeout_secs);
                        result.success = false;
                        result.errors.push(message.clone());
                        result.action_results.insert(action.agent_id.clone(), ActionResult::Error { error: message });
                    }
                }
            }
        }

        result.final_decision = final_decision(event.event_type, &result.action_results, &event.data);

        let serialized = serde_json::to_string(&result)?;
        self.kv
            .set_ex(&format!("orchestration:result:{}", event.event_id), &serialized, ORCHESTRATION_RESULT_TTL_SECS)
            .await?;

        if let Some(handlers) = self.event_handlers.read().unwrap().get(&event.event_type) {
            for handler in handlers {
                handler.handle(&result);
            }
        }

        Ok(result)
    }

    pub async fn publish_event(&self, event: &OrchestrationEvent) -> Result<(), CoreError> {
        let serialized = serde_json::to_string(event)?;
        self.kv.publish(&channel_name(event.event_type), &serialized).await
    }

    /// Subscribes to every known event type's channel and feeds each
    /// deserialized message into `handle_event`. The underlying `KvStore`
    /// subscribes to exact channel names only (no `PSUBSCRIBE`-style glob),
    /// so this fans out one subscription per `EventType` rather than the one
    /// `orchestration:events:*` subscription the spec describes; the
    /// observable behavior — every published event reaches `handle_event`
    /// exactly once — is the same.
    pub async fn subscribe_to_events(self: Arc<Self>) -> Result<(), CoreError> {
        for &event_type in ALL_EVENT_TYPES {
            let mut rx = self.kv.subscribe(&channel_name(event_type)).await?;
            let orchestrator = self.clone();
            tokio::spawn(async move {
                while let Some(message) = rx.recv().await {
                    match serde_json::from_str::<OrchestrationEvent>(&message) {
                        Ok(event) => {
                            if let Err(err) = orchestrator.handle_event(&event).await {
                                tracing::warn!(error = %err, "failed to handle subscribed event");
                            }
                        }
                        Err(err) => tracing::warn!(error = %err, "dropped malformed orchestration event"),
                    }
                }
            });
        }
        Ok(())
    }

    pub async fn check_agent_health(&self) -> HashMap<String, AgentHealth> {
        let agent_ids: Vec<String> = self.registry.read().unwrap().ids().map(str::to_string).collect();

        for agent_id in agent_ids {
            let agent = self.registry.read().unwrap().get(&agent_id).expect("just listed");
            let task = AgentTaskBuilder::new()
                .task_id(format!("health-{agent_id}"))
                .task_type("health_check")
                .timeout(Duration::from_secs(HEALTH_CHECK_TIMEOUT_SECS))
                .build()
                .expect("well-formed health check task");

            let outcome = tokio::time::timeout(Duration::from_secs(HEALTH_CHECK_TIMEOUT_SECS), agent.process_task(&task)).await;

            let mut health = self.health.write().unwrap();
            let entry = health.entry(agent_id).or_default();
            match outcome {
                Ok(Ok(_)) => {
                    entry.is_healthy = true;
                    entry.last_heartbeat = Some(Utc::now());
                }
                _ => {
                    entry.is_healthy = false;
                    entry.error_count += 1;
                }
            }
        }

        self.health.read().unwrap().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use trading_core_types::AgentTask;
    use trading_kv::InMemoryKvStore;

    struct StubValidator;

    #[async_trait]
    impl Executor for StubValidator {
        async fn process_task(&self, _task: &AgentTask) -> Result<Value, CoreError> {
            Ok(json!({"approved": true, "confidence": 0.9}))
        }
    }

    struct StubRiskMonitor;

    #[async_trait]
    impl Executor for StubRiskMonitor {
        async fn process_task(&self, _task: &AgentTask) -> Result<Value, CoreError> {
            Ok(json!({"verdict": "hold"}))
        }
    }

    struct AlwaysErrors;

    #[async_trait]
    impl Executor for AlwaysErrors {
        async fn process_task(&self, _task: &AgentTask) -> Result<Value, CoreError> {
            Err(CoreError::AgentErrored("boom".to_string()))
        }
    }

    fn orchestrator() -> Orchestrator {
        let orchestrator = Orchestrator::new(Arc::new(InMemoryKvStore::new()));
        orchestrator.register_agent("signal_validator", Arc::new(StubValidator));
        orchestrator.register_agent("risk_monitor", Arc::new(StubRiskMonitor));
        orchestrator
    }

    #[tokio::test]
    async fn signal_generated_runs_the_default_pipeline_and_allows() {
        let orchestrator = orchestrator();
        let event = OrchestrationEvent::new(EventType::SignalGenerated, "strategy");
        let result = orchestrator.handle_event(&event).await.unwrap();

        assert_eq!(result.final_decision, "allow");
        assert_eq!(result.actions_executed.len(), 2);
        assert!(result.action_results.contains_key("signal_validator"));
        assert!(result.action_results.contains_key("risk_monitor"));
    }

    #[tokio::test]
    async fn missing_agent_records_an_error_but_keeps_running_remaining_actions() {
        let orchestrator = Orchestrator::new(Arc::new(InMemoryKvStore::new()));
        orchestrator.register_agent("risk_monitor", Arc::new(StubRiskMonitor));
        let event = OrchestrationEvent::new(EventType::SignalGenerated, "strategy");

        let result = orchestrator.handle_event(&event).await.unwrap();
        assert!(!result.success);
        assert!(matches!(result.action_results.get("signal_validator"), Some(ActionResult::Error { .. })));
        assert!(result.action_results.contains_key("risk_monitor"));
    }

    #[tokio::test]
    async fn action_error_is_recorded_without_aborting_the_rule() {
        let orchestrator = Orchestrator::new(Arc::new(InMemoryKvStore::new()));
        orchestrator.register_agent("signal_validator", Arc::new(AlwaysErrors));
        orchestrator.register_agent("risk_monitor", Arc::new(StubRiskMonitor));

        let event = OrchestrationEvent::new(EventType::SignalGenerated, "strategy");
        let result = orchestrator.handle_event(&event).await.unwrap();

        assert!(!result.success);
        assert!(matches!(result.action_results.get("signal_validator"), Some(ActionResult::Error { .. })));
        assert!(matches!(result.action_results.get("risk_monitor"), Some(ActionResult::Ok(_))));
    }

    #[tokio::test]
    async fn event_handler_is_invoked_after_persistence() {
        let orchestrator = orchestrator();

        struct CountingHandler(Arc<AtomicUsize>);
        impl EventHandler for CountingHandler {
            fn handle(&self, _result: &OrchestrationResult) {
                self.0.fetch_add(1, Ordering::SeqCst);
            }
        }

        let calls = Arc::new(AtomicUsize::new(0));
        orchestrator.add_event_handler(EventType::SignalGenerated, Arc::new(CountingHandler(calls.clone())));

        let event = OrchestrationEvent::new(EventType::SignalGenerated, "strategy");
        orchestrator.handle_event(&event).await.unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn unmatched_event_type_produces_no_action_with_no_actions_executed() {
        let orchestrator = orchestrator();
        let event = OrchestrationEvent::new(EventType::TradeExecuted, "strategy");
        let result = orchestrator.handle_event(&event).await.unwrap();

        assert_eq!(result.final_decision, "no_action");
        assert!(result.actions_executed.is_empty());
    }

    #[tokio::test]
    async fn publish_then_handle_round_trips_the_event() {
        let kv = Arc::new(InMemoryKvStore::new());
        let orchestrator = Orchestrator::new(kv.clone());
        orchestrator.register_agent("signal_validator", Arc::new(StubValidator));
        orchestrator.register_agent("risk_monitor", Arc::new(StubRiskMonitor));

        let mut rx = kv.subscribe(&channel_name(EventType::SignalGenerated)).await.unwrap();
        let event = OrchestrationEvent::new(EventType::SignalGenerated, "strategy").with_symbol("BTC/USDT");
        orchestrator.publish_event(&event).await.unwrap();

        let message = tokio::time::timeout(Duration::from_secs(1), rx.recv()).await.unwrap().unwrap();
        let round_tripped: OrchestrationEvent = serde_json::from_str(&message).unwrap();
        assert_eq!(round_tripped.event_id, event.event_id);
        assert_eq!(round_tripped.symbol, event.symbol);
    }

    #[tokio::test(start_paused = true)]
    async fn check_agent_health_flags_a_timing_out_agent_unhealthy() {
        struct HangsForever;
        #[async_trait]
        impl Executor for HangsForever {
            async fn process_task(&self, _task: &AgentTask) -> Result<Value, CoreError> {
                std::future::pending::<()>().await;
                unreachable!()
            }
        }

        let orchestrator = Orchestrator::new(Arc::new(InMemoryKvStore::new()));
        orchestrator.register_agent("anomaly_detector", Arc::new(HangsForever));

        let health = orchestrator.check_agent_health().await;
        assert!(!health["anomaly_detector"].is_healthy);
    }
}
