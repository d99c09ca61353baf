pub mod config;
pub mod error;
pub mod gateway;
pub mod margin;
pub mod orchestration;
pub mod task;
pub mod trading;

pub use config::{Config, LlmProviderConfig};
pub use error::CoreError;
pub use gateway::{
    EventPriority, MarketEvent, MarketEventType, SamplingDecision, SamplingStrategy,
};
pub use margin::MarginStatus;
pub use orchestration::{
    ActionResult, AgentAction, EventType, OrchestrationEvent, OrchestrationResult,
    OrchestrationRule,
};
pub use task::{AgentMetrics, AgentState, AgentTask, AgentTaskBuilder, TaskPriority};
pub use trading::{
    AutonomousDecision, Candle, MarketRegime, PositionInfo, ProtectionMode, Side, TradingDecision,
};
