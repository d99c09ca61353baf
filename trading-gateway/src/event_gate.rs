use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::Mutex;
use trading_core_types::{EventPriority, MarketEvent, MarketEventType};

const MIN_AI_INTERVAL_SECS: u64 = 60;
const BATCH_SIZE: usize = 5;
const BATCH_TIMEOUT: Duration = Duration::from_secs(10);

const PRICE_CHANGE_THRESHOLD_PCT: f64 = 0.5;
const VOLUME_SPIKE_MULTIPLIER: f64 = 2.0;
const VOLATILITY_THRESHOLD_PCT: f64 = 2.0;

#[derive(Debug, Clone, PartialEq)]
pub enum GateDecision {
    Trigger,
    Batch,
    Skip,
}

struct SymbolBatch {
    events: Vec<MarketEvent>,
    started_at: Instant,
}

/// Pre-filters market events *before* the smart sampler ever runs, so a run
/// of unremarkable ticks never reaches an AI call at all. Mirrors the
/// reference event-driven optimizer's trigger thresholds and batching.
pub struct EventGate {
    last_ai_call: Mutex<HashMap<String, Instant>>,
    batches: Mutex<HashMap<String, SymbolBatch>>,
}

impl Default for EventGate {
    fn default() -> Self {
        Self::new()
    }
}

impl EventGate {
    pub fn new() -> Self {
        Self {
            last_ai_call: Mutex::new(HashMap::new()),
            batches: Mutex::new(HashMap::new()),
        }
    }

    pub fn classify_priority(event_type: MarketEventType, confidence: Option<f64>) -> EventPriority {
        match event_type {
            MarketEventType::AnomalyDetected
            | MarketEventType::SupportBreak
            | MarketEventType::ResistanceBreak
            | MarketEventType::TrendReversal => EventPriority::Critical,
            MarketEventType::SignalGenerated => {
                if confidence.unwrap_or(1.0) < 0.6 {
                    EventPriority::Medium
                } else {
                    EventPriority::High
                }
            }
            MarketEventType::HighVolatility | MarketEventType::VolumeSpike => EventPriority::High,
            MarketEventType::PriceChange
            | MarketEventType::PositionOpened
            | MarketEventType::PositionClosed => EventPriority::Medium,
        }
    }

    /// Returns whether `event` should immediately trigger an AI call, be
    /// folded into a per-symbol batch, or be skipped outright.
    pub async fn should_trigger(&self, event: &MarketEvent) -> GateDecision {
        if event.priority == EventPriority::Critical {
            self.mark_called(&event.symbol).await;
            return GateDecision::Trigger;
        }

        {
            let last_calls = self.last_ai_call.lock().await;
            if let Some(last) = last_calls.get(&event.symbol) {
                if last.elapsed() < Duration::from_secs(MIN_AI_INTERVAL_SECS) {
                    return GateDecision::Skip;
                }
            }
        }

        let passes_threshold = match event.event_type {
            MarketEventType::PriceChange => event
                .data
                .get("change_percent")
                .and_then(|v| v.as_f64())
                .map(|v| v.abs() >= PRICE_CHANGE_THRESHOLD_PCT)
                .unwrap_or(true),
            MarketEventType::VolumeSpike => event
                .data
                .get("volume_ratio")
                .and_then(|v| v.as_f64())
                .map(|v| v >= VOLUME_SPIKE_MULTIPLIER)
                .unwrap_or(true),
            MarketEventType::HighVolatility => event
                .data
                .get("volatility_percent")
                .and_then(|v| v.as_f64())
                .map(|v| v >= VOLATILITY_THRESHOLD_PCT)
                .unwrap_or(true),
            _ => true,
        };

        if !passes_threshold {
            return GateDecision::Skip;
        }

        if event.priority == EventPriority::Low {
            self.add_to_batch(event.clone()).await;
            return GateDecision::Batch;
        }

        self.mark_called(&event.symbol).await;
        GateDecision::Trigger
    }

    async fn mark_called(&self, symbol: &str) {
        self.last_ai_call.lock().await.insert(symbol.to_string(), Instant::now());
    }

    async fn add_to_batch(&self, event: MarketEvent) {
        let mut batches = self.batches.lock().await;
        let batch = batches.entry(event.symbol.clone()).or_insert_with(|| SymbolBatch {
            events: Vec::new(),
            started_at: Instant::now(),
        });
        batch.events.push(event);
    }

    /// Flushes a symbol's batch if it has reached `BATCH_SIZE` events or has
    /// been open for `BATCH_TIMEOUT`; otherwise returns `None` and leaves it
    /// accumulating.
    pub async fn flush_ready_batch(&self, symbol: &str) -> Option<Vec<MarketEvent>> {
        let mut batches = self.batches.lock().await;
        let ready = batches
            .get(symbol)
            .map(|b| b.events.len() >= BATCH_SIZE || b.started_at.elapsed() >= BATCH_TIMEOUT)
            .unwrap_or(false);

        if ready {
            batches.remove(symbol).map(|b| b.events)
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use serde_json::json;
    use std::collections::HashMap as Map;

    fn event(event_type: MarketEventType, priority: EventPriority, data: Map<String, serde_json::Value>) -> MarketEvent {
        MarketEvent {
            event_id: "e1".into(),
            event_type,
            symbol: "BTCUSDT".into(),
            data,
            priority,
            timestamp: Utc::now(),
        }
    }

    #[tokio::test]
    async fn critical_events_always_trigger() {
        let gate = EventGate::new();
        let e = event(MarketEventType::AnomalyDetected, EventPriority::Critical, Map::new());
        assert_eq!(gate.should_trigger(&e).await, GateDecision::Trigger);
    }

    #[tokio::test]
    async fn small_price_change_is_skipped() {
        let gate = EventGate::new();
        let mut data = Map::new();
        data.insert("change_percent".to_string(), json!(0.1));
        let e = event(MarketEventType::PriceChange, EventPriority::Medium, data);
        assert_eq!(gate.should_trigger(&e).await, GateDecision::Skip);
    }

    #[tokio::test]
    async fn large_price_change_triggers() {
        let gate = EventGate::new();
        let mut data = Map::new();
        data.insert("change_percent".to_string(), json!(1.2));
        let e = event(MarketEventType::PriceChange, EventPriority::Medium, data);
        assert_eq!(gate.should_trigger(&e).await, GateDecision::Trigger);
    }

    #[tokio::test]
    async fn low_priority_events_batch_until_size_reached() {
        let gate = EventGate::new();
        for _ in 0..4 {
            let e = event(MarketEventType::PositionOpened, EventPriority::Low, Map::new());
            assert_eq!(gate.should_trigger(&e).await, GateDecision::Batch);
            assert!(gate.flush_ready_batch("BTCUSDT").await.is_none());
        }
        let e = event(MarketEventType::PositionOpened, EventPriority::Low, Map::new());
        gate.should_trigger(&e).await;
        let flushed = gate.flush_ready_batch("BTCUSDT").await;
        assert_eq!(flushed.unwrap().len(), 5);
    }

    #[test]
    fn classify_priority_downgrades_low_confidence_signal() {
        let high = EventGate::classify_priority(MarketEventType::SignalGenerated, Some(0.9));
        assert_eq!(high, EventPriority::High);
        let medium = EventGate::classify_priority(MarketEventType::SignalGenerated, Some(0.3));
        assert_eq!(medium, EventPriority::Medium);
    }
}
