//! Market-regime classification agent. Ported from the reference
//! `MarketRegimeAgent` / `RegimeIndicators`: fetch candles, compute ATR, ADX,
//! Bollinger Bands, EMA20/50, support/resistance and average volume, then
//! classify in strict priority order (LOW_VOLUME, VOLATILE, TRENDING,
//! RANGING, UNKNOWN) and cache the result for 5 minutes.

use std::sync::Arc;
use std::sync::Mutex;

use async_trait::async_trait;
use serde_json::{json, Value};
use trading_agent_runtime::Executor;
use trading_core_types::{AgentTask, Candle, CoreError, MarketRegime};
use trading_gateway::GatewayHandle;
use trading_kv::KvStore;
use trading_strategies::ExchangeClient;

const TRENDING_ADX_THRESHOLD: f64 = 25.0;
const RANGING_ADX_THRESHOLD: f64 = 20.0;
const VOLATILE_ATR_MULTIPLIER: f64 = 2.0;
const LOW_VOLUME_THRESHOLD: f64 = 0.3;
const MIN_CANDLES: usize = 50;
const CACHE_TTL_SECS: u64 = 300;
/// Short enough that a 1m/5m timeframe never trades on stale candles, long
/// enough to absorb the burst of calls a volatile symbol's event gate lets
/// through.
const CANDLE_CACHE_TTL_SECS: u64 = 60;

#[derive(Debug, Clone, serde::Serialize)]
pub struct RegimeReading {
    pub symbol: String,
    pub regime: MarketRegime,
    pub confidence: f64,
    pub volatility_percent: f64,
    pub trend_strength: f64,
    pub support: Option<f64>,
    pub resistance: Option<f64>,
}

impl RegimeReading {
    fn unknown(symbol: &str) -> Self {
        Self {
            symbol: symbol.to_string(),
            regime: MarketRegime::Unknown,
            confidence: 0.0,
            volatility_percent: 0.0,
            trend_strength: 0.0,
            support: None,
            resistance: None,
        }
    }
}

fn to_f64(d: rust_decimal::Decimal) -> f64 {
    d.to_string().parse().unwrap_or(0.0)
}

/// Plus/minus directional index over the trailing `period` candles,
/// simplified to DX (no further Wilder smoothing of DX itself), matching
/// the reference implementation's own simplification.
fn adx(candles: &[Candle], period: usize) -> f64 {
    if candles.len() < period + 1 {
        return 0.0;
    }

    let mut plus_dm = Vec::new();
    let mut minus_dm = Vec::new();
    let mut true_ranges = Vec::new();

    for i in 1..candles.len() {
        let high = to_f64(candles[i].high);
        let low = to_f64(candles[i].low);
        let prev_high = to_f64(candles[i - 1].high);
        let prev_low = to_f64(candles[i - 1].low);
        let prev_close = to_f64(candles[i - 1].close);

        let high_diff = high - prev_high;
        let low_diff = prev_low - low;

        plus_dm.push(if high_diff > low_diff && high_diff > 0.0 { high_diff } else { 0.0 });
        minus_dm.push(if low_diff > high_diff && low_diff > 0.0 { low_diff } else { 0.0 });

        let tr = (high - low).max((high - prev_close).abs()).max((low - prev_close).abs());
        true_ranges.push(tr);
    }

    if true_ranges.len() < period {
        return 0.0;
    }

    let tail = |v: &[f64]| -> f64 {
        let slice = &v[v.len() - period..];
        slice.iter().sum::<f64>() / period as f64
    };

    let smoothed_plus_dm = tail(&plus_dm);
    let smoothed_minus_dm = tail(&minus_dm);
    let smoothed_atr = tail(&true_ranges);

    if smoothed_atr == 0.0 {
        return 0.0;
    }

    let plus_di = smoothed_plus_dm / smoothed_atr * 100.0;
    let minus_di = smoothed_minus_dm / smoothed_atr * 100.0;

    if plus_di + minus_di == 0.0 {
        return 0.0;
    }

    (plus_di - minus_di).abs() / (plus_di + minus_di) * 100.0
}

/// 25th/75th percentile of trailing lows/highs as support/resistance,
/// matching the reference's `np.percentile` usage.
fn support_resistance(candles: &[Candle], lookback: usize) -> (Option<f64>, Option<f64>) {
    if candles.len() < lookback {
        return (None, None);
    }
    let recent = &candles[candles.len() - lookback..];
    let mut lows: Vec<f64> = recent.iter().map(|c| to_f64(c.low)).collect();
    let mut highs: Vec<f64> = recent.iter().map(|c| to_f64(c.high)).collect();
    lows.sort_by(|a, b| a.partial_cmp(b).unwrap());
    highs.sort_by(|a, b| a.partial_cmp(b).unwrap());

    (Some(percentile(&lows, 25.0)), Some(percentile(&highs, 75.0)))
}

fn percentile(sorted: &[f64], pct: f64) -> f64 {
    if sorted.is_empty() {
        return 0.0;
    }
    let rank = (pct / 100.0) * (sorted.len() - 1) as f64;
    let lower = rank.floor() as usize;
    let upper = rank.ceil() as usize;
    if lower == upper {
        sorted[lower]
    } else {
        let frac = rank - lower as f64;
        sorted[lower] + (sorted[upper] - sorted[lower]) * frac
    }
}

#[allow(clippy::too_many_arguments)]
fn determine_regime(
    current_price: f64,
    adx_value: f64,
    atr: f64,
    avg_atr: f64,
    ema20: f64,
    ema50: f64,
    bands: &trading_strategies::indicators::BollingerBands,
    current_volume: f64,
    avg_volume: f64,
) -> (MarketRegime, f64) {
    let volume_ratio = if avg_volume > 0.0 { current_volume / avg_volume } else { 1.0 };
    if volume_ratio < LOW_VOLUME_THRESHOLD {
        return (MarketRegime::LowVolume, 0.8);
    }

    let atr_ratio = if avg_atr > 0.0 { atr / avg_atr } else { 1.0 };
    if atr_ratio >= VOLATILE_ATR_MULTIPLIER {
        return (MarketRegime::Volatile, 0.85);
    }

    if adx_value > TRENDING_ADX_THRESHOLD {
        if ema20 > ema50 && current_price > ema20 {
            return (MarketRegime::TrendingUp, (adx_value / 100.0 + 0.5).min(0.9));
        }
        if ema20 < ema50 && current_price < ema20 {
            return (MarketRegime::TrendingDown, (adx_value / 100.0 + 0.5).min(0.9));
        }
    }

    if adx_value < RANGING_ADX_THRESHOLD {
        let range = bands.upper - bands.lower;
        let bb_percent = if range > 0.0 { (current_price - bands.lower) / range } else { 0.5 };
        if bb_percent > 0.3 && bb_percent < 0.7 {
            return (MarketRegime::Ranging, 0.75);
        }
    }

    (MarketRegime::Unknown, 0.4)
}

/// Thin `Executor` wired with its own exchange/KV/gateway handles, never a
/// singleton. Keeps the last reading in memory for `get_current_regime`.
pub struct MarketRegimeAgent {
    exchange: Arc<dyn ExchangeClient>,
    kv: Arc<dyn KvStore>,
    #[allow(dead_code)]
    gateway: Arc<GatewayHandle>,
    timeframe: String,
    current: Mutex<Option<RegimeReading>>,
}

impl MarketRegimeAgent {
    pub fn new(exchange: Arc<dyn ExchangeClient>, kv: Arc<dyn KvStore>, gateway: Arc<GatewayHandle>, timeframe: impl Into<String>) -> Self {
        Self {
            exchange,
            kv,
            gateway,
            timeframe: timeframe.into(),
            current: Mutex::new(None),
        }
    }

    fn candle_cache_key(&self, symbol: &str) -> String {
        format!("market:candles:{symbol}:{}", self.timeframe)
    }

    /// Candle-cache-first fetch: a cache hit with enough candles skips the
    /// exchange call entirely; a miss (or a short read) falls back to the
    /// exchange and repopulates the cache for the next call.
    async fn fetch_candles(&self, symbol: &str) -> Vec<Candle> {
        let cache_key = self.candle_cache_key(symbol);
        if let Ok(Some(raw)) = self.kv.get(&cache_key).await {
            if let Ok(cached) = serde_json::from_str::<Vec<Candle>>(&raw) {
                if cached.len() >= MIN_CANDLES {
                    return cached;
                }
            }
        }

        let candles = self
            .exchange
            .fetch_ohlcv(symbol, &self.timeframe, 200)
            .await
            .unwrap_or_default();

        if candles.len() >= MIN_CANDLES {
            if let Ok(payload) = serde_json::to_string(&candles) {
                let _ = self.kv.set_ex(&cache_key, &payload, CANDLE_CACHE_TTL_SECS).await;
            }
        }

        candles
    }

    async fn analyze(&self, symbol: &str) -> Result<RegimeReading, CoreError> {
        let candles = self.fetch_candles(symbol).await;

        if candles.len() < MIN_CANDLES {
            tracing::warn!(symbol, count = candles.len(), "insufficient candles for regime analysis");
            return Ok(RegimeReading::unknown(symbol));
        }

        let current_price = to_f64(candles.last().unwrap().close);
        let current_volume = to_f64(candles.last().unwrap().volume);

        let atr = trading_strategies::indicators::atr(&candles, 14).unwrap_or(0.0);
        let adx_value = adx(&candles, 14);
        let bands = trading_strategies::indicators::bollinger_bands(&candles, 20, 2.0)
            .unwrap_or(trading_strategies::indicators::BollingerBands { upper: current_price, middle: current_price, lower: current_price });
        let ema20 = trading_strategies::indicators::ema(&candles, 20).unwrap_or(current_price);
        let ema50 = trading_strategies::indicators::ema(&candles, 50).unwrap_or(current_price);
        let avg_volume = trading_strategies::indicators::volume_sma(&candles, 20).unwrap_or(0.0);
        let (support, resistance) = support_resistance(&candles, 50);

        let volatility_percent = if current_price > 0.0 { atr / current_price * 100.0 } else { 0.0 };

        let window_start = candles.len().saturating_sub(20).max(14);
        let mut atr_history = Vec::new();
        for i in window_start..candles.len() {
            if let Some(v) = trading_strategies::indicators::atr(&candles[..=i], 14) {
                atr_history.push(v);
            }
        }
        let avg_atr = if atr_history.is_empty() {
            atr
        } else {
            atr_history.iter().sum::<f64>() / atr_history.len() as f64
        };

        let (regime, confidence) =
            determine_regime(current_price, adx_value, atr, avg_atr, ema20, ema50, &bands, current_volume, avg_volume);

        let reading = RegimeReading {
            symbol: symbol.to_string(),
            regime,
            confidence,
            volatility_percent,
            trend_strength: adx_value,
            support,
            resistance,
        };

        *self.current.lock().unwrap() = Some(reading.clone());

        let cache_key = format!("agent:market_regime:current:{symbol}");
        if let Ok(payload) = serde_json::to_string(&reading) {
            let _ = self.kv.set_ex(&cache_key, &payload, CACHE_TTL_SECS).await;
        }

        tracing::info!(symbol, regime = ?reading.regime, confidence, "market regime classified");
        Ok(reading)
    }
}

#[async_trait]
impl Executor for MarketRegimeAgent {
    async fn process_task(&self, task: &AgentTask) -> Result<Value, CoreError> {
        match task.task_type.as_str() {
            "analyze_market" => {
                let symbol = task
                    .params
                    .get("symbol")
                    .and_then(Value::as_str)
                    .ok_or_else(|| CoreError::ValidationFailed("symbol is required".into()))?;
                let reading = self.analyze(symbol).await?;
                serde_json::to_value(reading).map_err(CoreError::from)
            }
            "get_current_regime" => {
                let current = self.current.lock().unwrap().clone();
                Ok(match current {
                    Some(reading) => serde_json::to_value(reading)?,
                    None => json!(null),
                })
            }
            other => Err(CoreError::ValidationFailed(format!("unknown task type: {other}"))),
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use rust_decimal::Decimal;
    use trading_strategies::{Balance, OrderRequest};
    use trading_core_types::PositionInfo;

    use super::*;

    fn candle(close: f64, volume: f64) -> Candle {
        Candle {
            open_time: Utc::now(),
            open: Decimal::try_from(close).unwrap(),
            high: Decimal::try_from(close * 1.001).unwrap(),
            low: Decimal::try_from(close * 0.999).unwrap(),
            close: Decimal::try_from(close).unwrap(),
            volume: Decimal::try_from(volume).unwrap(),
        }
    }

    struct FixedExchange(Vec<Candle>);

    #[async_trait]
    impl ExchangeClient for FixedExchange {
        async fn fetch_balance(&self) -> Result<Balance, CoreError> {
            unimplemented!()
        }
        async fn fetch_ohlcv(&self, _symbol: &str, _timeframe: &str, _limit: usize) -> Result<Vec<Candle>, CoreError> {
            Ok(self.0.clone())
        }
        async fn fetch_positions(&self, _symbol: &str) -> Result<Vec<PositionInfo>, CoreError> {
            Ok(vec![])
        }
        async fn create_order(&self, _order: OrderRequest) -> Result<String, CoreError> {
            unimplemented!()
        }
        async fn cancel_order(&self, _symbol: &str, _order_id: &str) -> Result<(), CoreError> {
            unimplemented!()
        }
        async fn set_leverage(&self, _symbol: &str, _leverage: u32) -> Result<(), CoreError> {
            unimplemented!()
        }
    }

    /// Panics if `fetch_ohlcv` is ever called, to prove a cache hit skips
    /// the exchange entirely.
    struct PanicsOnFetchExchange;

    #[async_trait]
    impl ExchangeClient for PanicsOnFetchExchange {
        async fn fetch_balance(&self) -> Result<Balance, CoreError> {
            unimplemented!()
        }
        async fn fetch_ohlcv(&self, _symbol: &str, _timeframe: &str, _limit: usize) -> Result<Vec<Candle>, CoreError> {
            panic!("fetch_ohlcv should not be called when the candle cache has enough candles");
        }
        async fn fetch_positions(&self, _symbol: &str) -> Result<Vec<PositionInfo>, CoreError> {
            Ok(vec![])
        }
        async fn create_order(&self, _order: OrderRequest) -> Result<String, CoreError> {
            unimplemented!()
        }
        async fn cancel_order(&self, _symbol: &str, _order_id: &str) -> Result<(), CoreError> {
            unimplemented!()
        }
        async fn set_leverage(&self, _symbol: &str, _leverage: u32) -> Result<(), CoreError> {
            unimplemented!()
        }
    }

    fn gateway() -> Arc<GatewayHandle> {
        Arc::new(GatewayHandle::new(
            trading_gateway::AiProvider::Anthropic { api_key: "test".into(), model: "test".into() },
            Arc::new(trading_kv::InMemoryKvStore::new()),
        ))
    }

    #[tokio::test]
    async fn too_few_candles_reports_unknown() {
        let candles = vec![candle(100.0, 10.0); 10];
        let agent = MarketRegimeAgent::new(Arc::new(FixedExchange(candles)), Arc::new(trading_kv::InMemoryKvStore::new()), gateway(), "1h");
        let reading = agent.analyze("BTC/USDT").await.unwrap();
        assert_eq!(reading.regime, MarketRegime::Unknown);
    }

    #[tokio::test]
    async fn low_volume_takes_priority_over_everything_else() {
        let mut candles: Vec<Candle> = (0..80).map(|i| candle(100.0 + i as f64 * 0.01, 1000.0)).collect();
        candles.push(candle(100.8, 1.0));
        let agent = MarketRegimeAgent::new(Arc::new(FixedExchange(candles)), Arc::new(trading_kv::InMemoryKvStore::new()), gateway(), "1h");
        let reading = agent.analyze("BTC/USDT").await.unwrap();
        assert_eq!(reading.regime, MarketRegime::LowVolume);
    }

    #[tokio::test]
    async fn a_warm_candle_cache_is_used_instead_of_the_exchange() {
        let kv: Arc<dyn KvStore> = Arc::new(trading_kv::InMemoryKvStore::new());
        let candles: Vec<Candle> = (0..80).map(|i| candle(100.0 + i as f64 * 0.01, 1000.0)).collect();
        let payload = serde_json::to_string(&candles).unwrap();
        kv.set_ex("market:candles:BTC/USDT:1h", &payload, 60).await.unwrap();

        let agent = MarketRegimeAgent::new(Arc::new(PanicsOnFetchExchange), kv, gateway(), "1h");
        let reading = agent.analyze("BTC/USDT").await.unwrap();
        assert_ne!(reading.regime, MarketRegime::Unknown);
    }

    #[tokio::test]
    async fn a_cold_candle_cache_falls_back_to_the_exchange_and_populates_it() {
        let kv: Arc<dyn KvStore> = Arc::new(trading_kv::InMemoryKvStore::new());
        let candles: Vec<Candle> = (0..80).map(|i| candle(100.0 + i as f64 * 0.01, 1000.0)).collect();
        let agent = MarketRegimeAgent::new(Arc::new(FixedExchange(candles)), kv.clone(), gateway(), "1h");

        agent.analyze("BTC/USDT").await.unwrap();

        let cached = kv.get("market:candles:BTC/USDT:1h").await.unwrap();
        assert!(cached.is_some());
    }

    #[tokio::test]
    async fn get_current_regime_is_none_before_any_analysis() {
        let agent = MarketRegimeAgent::new(Arc::new(FixedExchange(vec![])), Arc::new(trading_kv::InMemoryKvStore::new()), gateway(), "1h");
        let task = trading_core_types::AgentTaskBuilder::new()
            .task_id("t-1")
            .task_type("get_current_regime")
            .build()
            .unwrap();
        let result = agent.process_task(&task).await.unwrap();
        assert!(result.is_null());
    }
}
