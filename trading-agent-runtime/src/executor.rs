use async_trait::async_trait;
use serde_json::Value;
use trading_core_types::{AgentTask, CoreError};

/// The one method a specialist agent implements. `AgentRuntime<E>` owns
/// everything else — queueing, retries, metrics, the loop itself.
#[async_trait]
pub trait Executor: Send + Sync {
    async fn process_task(&self, task: &AgentTask) -> Result<Value, CoreError>;
}
