//! Extensions layered on top of the common pipeline for the SOL and
//! adaptive-regime-fighter profiles. The reference strategy modules for both
//! variants are themselves stubs beyond their module docstrings (no
//! sub-strategy switching or volatility-regime logic was ever implemented
//! there), so these are built directly from the specification's prose
//! description rather than ported from a concrete source, and kept as small,
//! independently testable pure functions.

use trading_core_types::MarketRegime;

/// Four-way volatility-regime classification by ATR percentile rank against
/// a trailing history, used by the SOL 15-minute variant for multi-stage
/// take-profit sizing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VolatilityRegime {
    Compression,
    Expansion,
    HighVolatility,
    Exhaustion,
}

/// `history` is the trailing window of ATR values (oldest first); `current`
/// is the latest. Percentile rank below 25% is compression (a breakout
/// setup), above 90% with a falling latest value is exhaustion, above 75% is
/// high volatility, otherwise expansion.
pub fn classify_volatility_regime(history: &[f64], current: f64) -> VolatilityRegime {
    if history.is_empty() {
        return VolatilityRegime::Expansion;
    }
    let below = history.iter().filter(|&&v| v <= current).count();
    let percentile = below as f64 / history.len() as f64 * 100.0;

    let falling = history.last().map(|&last| current < last).unwrap_or(false);

    if percentile >= 90.0 && falling {
        VolatilityRegime::Exhaustion
    } else if percentile >= 75.0 {
        VolatilityRegime::HighVolatility
    } else if percentile <= 25.0 {
        VolatilityRegime::Compression
    } else {
        VolatilityRegime::Expansion
    }
}

/// Multi-stage take-profit ladder at 1.5x/2.5x/4x ATR (as a percent of
/// entry price), with a 30/40/30 size allocation across the three stages.
pub fn multi_stage_take_profits(atr_percent: f64) -> (f64, f64, f64) {
    (atr_percent * 1.5, atr_percent * 2.5, atr_percent * 4.0)
}

pub const STAGE_ALLOCATION_PERCENT: (f64, f64, f64) = (30.0, 40.0, 30.0);

/// Sub-strategies the adaptive fighter switches between by market regime.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubStrategy {
    BullMomentumFollow,
    BearRangeFade,
    SidewaysMeanReversion,
    HighVolDefensive,
}

fn sub_strategy_for(regime: MarketRegime) -> SubStrategy {
    match regime {
        MarketRegime::TrendingUp => SubStrategy::BullMomentumFollow,
        MarketRegime::TrendingDown => SubStrategy::BearRangeFade,
        MarketRegime::Ranging => SubStrategy::SidewaysMeanReversion,
        MarketRegime::Volatile => SubStrategy::HighVolDefensive,
        _ => SubStrategy::SidewaysMeanReversion,
    }
}

/// Inverse of `sub_strategy_for`: feeds a confirmed sub-strategy back into
/// the common regime-indexed signal/parameter pipeline once the switcher has
/// locked it in.
pub fn regime_for_sub_strategy(sub: SubStrategy) -> MarketRegime {
    match sub {
        SubStrategy::BullMomentumFollow => MarketRegime::TrendingUp,
        SubStrategy::BearRangeFade => MarketRegime::TrendingDown,
        SubStrategy::SidewaysMeanReversion => MarketRegime::Ranging,
        SubStrategy::HighVolDefensive => MarketRegime::Volatile,
    }
}

/// Anti-whipsaw hysteresis: only switches to the regime-implied
/// sub-strategy once it has been the candidate for `confirmations_required`
/// consecutive calls. Returns the (possibly unchanged) active sub-strategy
/// and the updated confirmation counter.
pub struct RegimeSwitcher {
    pub active: SubStrategy,
    candidate: Option<SubStrategy>,
    confirmations: u32,
    confirmations_required: u32,
}

impl RegimeSwitcher {
    pub fn new(confirmations_required: u32) -> Self {
        Self {
            active: SubStrategy::SidewaysMeanReversion,
            candidate: None,
            confirmations: 0,
            confirmations_required,
        }
    }

    pub fn observe(&mut self, regime: MarketRegime) -> SubStrategy {
        let implied = sub_strategy_for(regime);
        if implied == self.active {
            self.candidate = None;
            self.confirmations = 0;
            return self.active;
        }

        if self.candidate == Some(implied) {
            self.confirmations += 1;
        } else {
            self.candidate = Some(implied);
            self.confirmations = 1;
        }

        if self.confirmations >= self.confirmations_required {
            self.active = implied;
            self.candidate = None;
            self.confirmations = 0;
        }

        self.active
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn low_atr_percentile_is_compression() {
        let history = vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0, 8.0, 9.0, 10.0];
        assert_eq!(classify_volatility_regime(&history, 0.5), VolatilityRegime::Compression);
    }

    #[test]
    fn high_and_falling_is_exhaustion() {
        let history = vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0, 8.0, 9.0, 10.0];
        assert_eq!(classify_volatility_regime(&history, 9.5), VolatilityRegime::Exhaustion);
    }

    #[test]
    fn multi_stage_take_profits_scale_off_atr() {
        let (tp1, tp2, tp3) = multi_stage_take_profits(2.0);
        assert_eq!((tp1, tp2, tp3), (3.0, 5.0, 8.0));
    }

    #[test]
    fn switcher_requires_consecutive_confirmations_before_switching() {
        let mut switcher = RegimeSwitcher::new(3);
        assert_eq!(switcher.observe(MarketRegime::TrendingUp), SubStrategy::SidewaysMeanReversion);
        assert_eq!(switcher.observe(MarketRegime::TrendingUp), SubStrategy::SidewaysMeanReversion);
        assert_eq!(switcher.observe(MarketRegime::TrendingUp), SubStrategy::BullMomentumFollow);
    }

    #[test]
    fn switcher_resets_confirmations_on_a_flicker_back() {
        let mut switcher = RegimeSwitcher::new(3);
        switcher.observe(MarketRegime::TrendingUp);
        switcher.observe(MarketRegime::TrendingUp);
        switcher.observe(MarketRegime::Ranging);
        assert_eq!(switcher.observe(MarketRegime::TrendingUp), SubStrategy::SidewaysMeanReversion);
    }
}
