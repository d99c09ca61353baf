use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Market event types the cost-optimization gateway's event-driven pre-gate
/// filters on. Distinct from `orchestration::EventType` — this is the
/// gateway's own, narrower vocabulary of "is this worth an AI call" events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MarketEventType {
    PriceChange,
    VolumeSpike,
    TrendReversal,
    SupportBreak,
    ResistanceBreak,
    HighVolatility,
    SignalGenerated,
    PositionOpened,
    PositionClosed,
    AnomalyDetected,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventPriority {
    Low,
    Medium,
    High,
    Critical,
}

/// An incoming market event considered by the gateway's pre-gate, before
/// sampling even runs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarketEvent {
    pub event_id: String,
    pub event_type: MarketEventType,
    pub symbol: String,
    pub data: HashMap<String, Value>,
    pub priority: EventPriority,
    pub timestamp: DateTime<Utc>,
}

/// Which sampling policy governs a given agent type's AI calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SamplingStrategy {
    Always,
    Periodic,
    ChangeBased,
    Threshold,
    Adaptive,
}

/// Per agent-type sampling configuration. The sampler owns the per-key
/// "last call" timestamps separately (see `trading-gateway::SmartSampler`);
/// this struct only carries the tunables.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SamplingDecision {
    pub strategy: SamplingStrategy,
    pub interval_secs: f64,
    pub min_interval_secs: f64,
    pub max_interval_secs: f64,
    pub cache_by_symbol: bool,
    pub change_threshold: f64,
    pub metric_threshold: f64,
}

impl SamplingDecision {
    pub fn always() -> Self {
        Self {
            strategy: SamplingStrategy::Always,
            interval_secs: 0.0,
            min_interval_secs: 0.0,
            max_interval_secs: 0.0,
            cache_by_symbol: false,
            change_threshold: 0.0,
            metric_threshold: 0.0,
        }
    }

    pub fn periodic(interval_secs: f64, min_interval_secs: f64, max_interval_secs: f64) -> Self {
        Self {
            strategy: SamplingStrategy::Periodic,
            interval_secs,
            min_interval_secs,
            max_interval_secs,
            cache_by_symbol: false,
            change_threshold: 0.0,
            metric_threshold: 0.0,
        }
    }

    pub fn change_based(threshold: f64) -> Self {
        Self {
            strategy: SamplingStrategy::ChangeBased,
            interval_secs: 0.0,
            min_interval_secs: 0.0,
            max_interval_secs: 0.0,
            cache_by_symbol: false,
            change_threshold: threshold,
            metric_threshold: 0.0,
        }
    }

    pub fn threshold(metric_threshold: f64) -> Self {
        Self {
            strategy: SamplingStrategy::Threshold,
            interval_secs: 0.0,
            min_interval_secs: 0.0,
            max_interval_secs: 0.0,
            cache_by_symbol: false,
            change_threshold: 0.0,
            metric_threshold,
        }
    }
}
