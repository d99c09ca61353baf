//! The five specialist agents (C3): each a thin `Executor` built on a
//! rule-based primary path, with `GatewayHandle` used only to augment
//! severity, narrative reasoning, or false-positive suppression. None own a
//! singleton; the orchestrator constructs one of each per tick loop.

pub mod anomaly_detector;
pub mod market_regime;
pub mod portfolio_optimizer;
pub mod risk_monitor;
pub mod signal_validator;

pub use anomaly_detector::AnomalyDetectorAgent;
pub use market_regime::{MarketRegimeAgent, RegimeReading};
pub use portfolio_optimizer::PortfolioOptimizerAgent;
pub use risk_monitor::RiskMonitorAgent;
pub use signal_validator::SignalValidatorAgent;
