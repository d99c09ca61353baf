pub mod exchange;
pub mod indicators;
pub mod protection;
pub mod regime;
pub mod registry;
pub mod signal_validator;
pub mod strategy;
pub mod variants;

pub use exchange::{Balance, ExchangeClient, OrderRequest};
pub use protection::ProtectionState;
pub use registry::{build_strategy, registered_strategy_names};
pub use signal_validator::{NoopValidator, SignalValidator, ValidationOutcome};
pub use strategy::{AutonomousStrategy, StrategyProfile, StrategyVariant};
