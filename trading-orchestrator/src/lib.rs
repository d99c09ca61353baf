//! The rule-driven event orchestrator (C4). Matches incoming
//! `OrchestrationEvent`s against an installed `OrchestrationRule` table,
//! runs each matching rule's actions against the registered agents in
//! priority order, and aggregates the outcomes into a single
//! `final_decision`.

mod decision;
mod orchestrator;
mod registry;
mod rules;

pub use orchestrator::{AgentHealth, EventHandler, Orchestrator};
pub use registry::AgentRegistry;
pub use rules::default_rules;
