use trading_core_types::{Candle, MarketRegime};

use crate::indicators::{atr, ema};

/// Fallback regime classifier used when the market-regime agent's verdict is
/// unavailable: EMA21 vs EMA50 crossover with a high-volatility override.
pub fn classify_regime(candles: &[Candle]) -> MarketRegime {
    let (Some(ema21), Some(ema50)) = (ema(candles, 21), ema(candles, 50)) else {
        return MarketRegime::Unknown;
    };

    let close = candles
        .last()
        .map(|c| c.close.to_string().parse::<f64>().unwrap_or(0.0))
        .unwrap_or(0.0);

    if let Some(atr_value) = atr(candles, 14) {
        if close > 0.0 && atr_value / close > 0.03 {
            return MarketRegime::Volatile;
        }
    }

    if ema21 > ema50 * 1.02 {
        MarketRegime::TrendingUp
    } else if ema21 < ema50 * 0.98 {
        MarketRegime::TrendingDown
    } else {
        MarketRegime::Ranging
    }
}
