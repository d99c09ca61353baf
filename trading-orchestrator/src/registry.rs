use std::collections::HashMap;
use std::sync::Arc;

use trading_agent_runtime::Executor;
use trading_core_types::CoreError;

/// Agent instances keyed by id. No agent owns a singleton; the orchestrator
/// is the one place that holds `Arc<dyn Executor>` handles to all of them.
#[derive(Default)]
pub struct AgentRegistry {
    agents: HashMap<String, Arc<dyn Executor>>,
}

impl AgentRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_agent(&mut self, id: impl Into<String>, instance: Arc<dyn Executor>) {
        self.agents.insert(id.into(), instance);
    }

    pub fn get(&self, id: &str) -> Result<Arc<dyn Executor>, CoreError> {
        self.agents
            .get(id)
            .cloned()
            .ok_or_else(|| CoreError::AgentNotFound { agent_id: id.to_string() })
    }

    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.agents.keys().map(String::as_str)
    }
}
