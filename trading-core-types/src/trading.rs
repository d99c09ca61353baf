use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// One OHLCV candle, the minimal shape the indicator math needs. Supplied by
/// the external candle feed; this core never persists it.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Candle {
    pub open_time: DateTime<Utc>,
    pub open: Decimal,
    pub high: Decimal,
    pub low: Decimal,
    pub close: Decimal,
    pub volume: Decimal,
}

/// NORMAL→CAUTIOUS→DEFENSIVE→LOCKDOWN ladder driven by consecutive losses
/// and daily P&L (see `trading-strategies::protection`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ProtectionMode {
    Normal,
    Cautious,
    Defensive,
    Lockdown,
}

impl Default for ProtectionMode {
    fn default() -> Self {
        ProtectionMode::Normal
    }
}

/// The strategy's output token: a closed set of eight decisions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TradingDecision {
    EnterLong,
    EnterShort,
    ExitLong,
    ExitShort,
    IncreasePosition,
    DecreasePosition,
    EmergencyExit,
    Hold,
}

/// A market-state classification, used by the regime agent and the
/// strategies' fallback regime rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MarketRegime {
    TrendingUp,
    TrendingDown,
    Ranging,
    Volatile,
    LowVolume,
    Unknown,
}

/// Which side of the market a position (or a candidate decision) is on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Long,
    Short,
}

/// Read-only (from the strategy's point of view) snapshot of an open
/// position, maintained by the exchange layer.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct PositionInfo {
    pub side: Side,
    pub size: Decimal,
    pub entry_price: Decimal,
    pub current_price: Decimal,
    pub unrealized_pnl: Decimal,
    pub unrealized_pnl_percent: Decimal,
    pub leverage: u32,
    pub margin_used: Decimal,
    pub liquidation_price: Decimal,
    pub entry_time: DateTime<Utc>,
}

impl PositionInfo {
    pub fn holding_duration(&self, now: DateTime<Utc>) -> chrono::Duration {
        now - self.entry_time
    }
}

/// A strategy's full decision output, including the dynamic parameters
/// computed for it and any warnings accumulated along the pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AutonomousDecision {
    pub decision: TradingDecision,
    pub confidence: f64,
    pub position_size_percent: f64,
    pub target_leverage: u32,
    pub stop_loss_percent: f64,
    pub take_profit_percent: f64,
    pub tp1_percent: Option<f64>,
    pub tp2_percent: Option<f64>,
    pub tp3_percent: Option<f64>,
    pub reasoning: String,
    pub market_regime: MarketRegime,
    pub ai_enhanced: bool,
    pub warnings: Vec<String>,
}

impl AutonomousDecision {
    pub fn hold(reasoning: impl Into<String>, market_regime: MarketRegime) -> Self {
        Self {
            decision: TradingDecision::Hold,
            confidence: 0.5,
            position_size_percent: 0.0,
            target_leverage: 1,
            stop_loss_percent: 0.0,
            take_profit_percent: 0.0,
            tp1_percent: None,
            tp2_percent: None,
            tp3_percent: None,
            reasoning: reasoning.into(),
            market_regime,
            ai_enhanced: false,
            warnings: Vec::new(),
        }
    }

    pub fn with_warning(mut self, warning: impl Into<String>) -> Self {
        self.warnings.push(warning.into());
        self
    }
}
