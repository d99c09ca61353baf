use rust_decimal::Decimal;
use trading_core_types::Candle;

fn to_f64(d: Decimal) -> f64 {
    d.to_string().parse().unwrap_or(0.0)
}

/// Exponential moving average over the closing prices, period `n`, seeded
/// with a simple average over the first `n` candles.
pub fn ema(candles: &[Candle], period: usize) -> Option<f64> {
    if candles.len() < period || period == 0 {
        return None;
    }
    let closes: Vec<f64> = candles.iter().map(|c| to_f64(c.close)).collect();
    let k = 2.0 / (period as f64 + 1.0);
    let mut value = closes[..period].iter().sum::<f64>() / period as f64;
    for close in &closes[period..] {
        value = close * k + value * (1.0 - k);
    }
    Some(value)
}

/// Wilder's RSI, period 14 by convention but parameterized here.
pub fn rsi(candles: &[Candle], period: usize) -> Option<f64> {
    if candles.len() < period + 1 {
        return None;
    }
    let closes: Vec<f64> = candles.iter().map(|c| to_f64(c.close)).collect();
    let mut gains = 0.0;
    let mut losses = 0.0;
    for window in closes.windows(2).take(period) {
        let delta = window[1] - window[0];
        if delta >= 0.0 {
            gains += delta;
        } else {
            losses -= delta;
        }
    }
    let mut avg_gain = gains / period as f64;
    let mut avg_loss = losses / period as f64;

    for window in closes.windows(2).skip(period) {
        let delta = window[1] - window[0];
        let (gain, loss) = if delta >= 0.0 { (delta, 0.0) } else { (0.0, -delta) };
        avg_gain = (avg_gain * (period as f64 - 1.0) + gain) / period as f64;
        avg_loss = (avg_loss * (period as f64 - 1.0) + loss) / period as f64;
    }

    if avg_loss == 0.0 {
        return Some(100.0);
    }
    let rs = avg_gain / avg_loss;
    Some(100.0 - (100.0 / (1.0 + rs)))
}

#[derive(Debug, Clone, Copy)]
pub struct BollingerBands {
    pub upper: f64,
    pub middle: f64,
    pub lower: f64,
}

/// Bollinger Bands: `period`-candle SMA middle band, `sigma` standard
/// deviations for the upper/lower envelope.
pub fn bollinger_bands(candles: &[Candle], period: usize, sigma: f64) -> Option<BollingerBands> {
    if candles.len() < period || period == 0 {
        return None;
    }
    let closes: Vec<f64> = candles[candles.len() - period..]
        .iter()
        .map(|c| to_f64(c.close))
        .collect();
    let middle = closes.iter().sum::<f64>() / period as f64;
    let variance = closes.iter().map(|c| (c - middle).powi(2)).sum::<f64>() / period as f64;
    let std_dev = variance.sqrt();
    Some(BollingerBands {
        upper: middle + sigma * std_dev,
        middle,
        lower: middle - sigma * std_dev,
    })
}

#[derive(Debug, Clone, Copy)]
pub struct MacdOutput {
    pub macd: f64,
    pub signal: f64,
    pub histogram: f64,
    pub prev_histogram: f64,
}

/// MACD(fast, slow, signal). Computed on the last two points of the MACD
/// line's own EMA so the caller can tell whether the histogram is rising.
pub fn macd(candles: &[Candle], fast: usize, slow: usize, signal_period: usize) -> Option<MacdOutput> {
    if candles.len() < slow + signal_period {
        return None;
    }
    let closes: Vec<f64> = candles.iter().map(|c| to_f64(c.close)).collect();
    let ema_series = |period: usize| -> Vec<f64> {
        let k = 2.0 / (period as f64 + 1.0);
        let mut out = Vec::with_capacity(closes.len());
        let mut value = closes[..period].iter().sum::<f64>() / period as f64;
        out.push(value);
        for close in &closes[period..] {
            value = close * k + value * (1.0 - k);
            out.push(value);
        }
        out
    };

    let fast_series = ema_series(fast);
    let slow_series = ema_series(slow);
    let offset = fast_series.len() - slow_series.len();
    let macd_line: Vec<f64> = slow_series
        .iter()
        .enumerate()
        .map(|(i, slow_v)| fast_series[i + offset] - slow_v)
        .collect();

    if macd_line.len() < signal_period + 2 {
        return None;
    }
    let k = 2.0 / (signal_period as f64 + 1.0);
    let mut signal_value = macd_line[..signal_period].iter().sum::<f64>() / signal_period as f64;
    let mut prev_histogram = macd_line[signal_period - 1] - signal_value;
    for &m in &macd_line[signal_period..macd_line.len() - 1] {
        signal_value = m * k + signal_value * (1.0 - k);
        prev_histogram = m - signal_value;
    }
    let last_macd = *macd_line.last().unwrap();
    let final_signal = last_macd * k + signal_value * (1.0 - k);

    Some(MacdOutput {
        macd: last_macd,
        signal: final_signal,
        histogram: last_macd - final_signal,
        prev_histogram,
    })
}

/// Average True Range, Wilder-smoothed, period 14 by convention.
pub fn atr(candles: &[Candle], period: usize) -> Option<f64> {
    if candles.len() < period + 1 {
        return None;
    }
    let true_ranges: Vec<f64> = candles
        .windows(2)
        .map(|w| {
            let (prev, curr) = (w[0], w[1]);
            let high = to_f64(curr.high);
            let low = to_f64(curr.low);
            let prev_close = to_f64(prev.close);
            (high - low).max((high - prev_close).abs()).max((low - prev_close).abs())
        })
        .collect();

    if true_ranges.len() < period {
        return None;
    }
    let mut value = true_ranges[..period].iter().sum::<f64>() / period as f64;
    for tr in &true_ranges[period..] {
        value = (value * (period as f64 - 1.0) + tr) / period as f64;
    }
    Some(value)
}

/// Simple moving average of volume, used for the "volume > k × SMA" checks.
pub fn volume_sma(candles: &[Candle], period: usize) -> Option<f64> {
    if candles.len() < period || period == 0 {
        return None;
    }
    let slice = &candles[candles.len() - period..];
    Some(slice.iter().map(|c| to_f64(c.volume)).sum::<f64>() / period as f64)
}
