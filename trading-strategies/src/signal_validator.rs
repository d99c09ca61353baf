use async_trait::async_trait;
use trading_core_types::{AutonomousDecision, CoreError};

/// Outcome of submitting a non-HOLD decision to the signal-validator agent
/// (C3), reached through the orchestrator (C4). Strategies depend only on
/// this trait; the wiring binary supplies the concrete implementation that
/// actually talks to the agent runtime.
#[derive(Debug, Clone)]
pub enum ValidationOutcome {
    Approved,
    ApprovedWithConditions { warnings: Vec<String> },
    Rejected { failed_rules: Vec<String> },
}

#[async_trait]
pub trait SignalValidator: Send + Sync {
    async fn validate(&self, decision: &AutonomousDecision) -> Result<ValidationOutcome, CoreError>;
}

/// No-op validator: approves everything. Used when signal validation is
/// disabled for a strategy instance.
pub struct NoopValidator;

#[async_trait]
impl SignalValidator for NoopValidator {
    async fn validate(&self, _decision: &AutonomousDecision) -> Result<ValidationOutcome, CoreError> {
        Ok(ValidationOutcome::Approved)
    }
}
