use trading_core_types::{AgentAction, EventType, OrchestrationRule};

/// The five pre-installed rules, in the reference orchestrator's own table
/// order. Priority is the sort key `handle_event` uses (descending); it is
/// not the order below.
pub fn default_rules() -> Vec<OrchestrationRule> {
    vec![
        OrchestrationRule {
            rule_id: "signal-validation-pipeline".to_string(),
            name: "Signal Validation Pipeline".to_string(),
            trigger_event_types: vec![EventType::SignalGenerated],
            trigger_conditions: None,
            actions: vec![
                AgentAction::new("signal_validator", "validate_signal", 5.0),
                AgentAction::new("risk_monitor", "monitor_position", 5.0),
            ],
            enabled: true,
            priority: 5,
        },
        OrchestrationRule {
            rule_id: "anomaly-risk-alert".to_string(),
            name: "Anomaly Risk Alert".to_string(),
            trigger_event_types: vec![EventType::AnomalyDetected],
            trigger_conditions: None,
            actions: vec![AgentAction::new("risk_monitor", "check_emergency_stop", 3.0)],
            enabled: true,
            priority: 5,
        },
        OrchestrationRule {
            rule_id: "circuit-breaker-emergency".to_string(),
            name: "Circuit Breaker Emergency".to_string(),
            trigger_event_types: vec![EventType::CircuitBreakerTriggered],
            trigger_conditions: None,
            actions: vec![AgentAction::new("risk_monitor", "emergency_stop_all", 10.0)],
            enabled: true,
            priority: 10,
        },
        OrchestrationRule {
            rule_id: "rebalancing-validation".to_string(),
            name: "Rebalancing Validation".to_string(),
            trigger_event_types: vec![EventType::RebalancingDue],
            trigger_conditions: None,
            actions: vec![
                AgentAction::new("portfolio_optimizer", "suggest_rebalancing", 10.0),
                AgentAction::new("signal_validator", "validate_rebalancing", 5.0),
            ],
            enabled: true,
            priority: 3,
        },
        OrchestrationRule {
            rule_id: "market-regime-portfolio-reanalysis".to_string(),
            name: "Market Regime Portfolio Reanalysis".to_string(),
            trigger_event_types: vec![EventType::MarketRegimeChanged],
            trigger_conditions: None,
            actions: vec![AgentAction::new("portfolio_optimizer", "analyze_portfolio", 15.0)],
            enabled: true,
            priority: 2,
        },
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_rules_cover_every_priority_event() {
        let rules = default_rules();
        assert_eq!(rules.len(), 5);
        assert!(rules.iter().all(|r| r.enabled));

        let circuit_breaker = rules.iter().find(|r| r.rule_id == "circuit-breaker-emergency").unwrap();
        assert_eq!(circuit_breaker.priority, 10);
        assert!(rules.iter().all(|r| r.priority <= circuit_breaker.priority));
    }

    #[test]
    fn signal_pipeline_calls_validator_then_risk_monitor_in_order() {
        let rules = default_rules();
        let pipeline = rules.iter().find(|r| r.rule_id == "signal-validation-pipeline").unwrap();
        let agent_ids: Vec<&str> = pipeline.actions.iter().map(|a| a.agent_id.as_str()).collect();
        assert_eq!(agent_ids, vec!["signal_validator", "risk_monitor"]);
    }
}
