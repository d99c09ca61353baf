use rust_decimal::Decimal;
use trading_core_types::{AutonomousDecision, CoreError, MarketRegime, PositionInfo, ProtectionMode, Side, TradingDecision};
use trading_margin::{MarginCapEnforcer, OrderVerdict, StrategyClass};

use crate::exchange::{Balance, ExchangeClient};
use crate::indicators::{atr, bollinger_bands, ema, macd, rsi, volume_sma};
use crate::protection::ProtectionState;
use crate::regime::classify_regime;
use crate::signal_validator::{SignalValidator, ValidationOutcome};
use crate::variants::{classify_volatility_regime, multi_stage_take_profits, regime_for_sub_strategy, RegimeSwitcher, VolatilityRegime};

/// Consecutive same-regime observations the adaptive fighter requires before
/// switching its active sub-strategy.
const REGIME_SWITCH_CONFIRMATIONS: u32 = 3;
/// Trailing window of ATR-percent readings the SOL variant classifies
/// against.
const ATR_HISTORY_CAP: usize = 20;

fn f64_of(d: Decimal) -> f64 {
    d.to_string().parse().unwrap_or(0.0)
}

/// Which extra behavior, if any, a strategy instance layers on top of the
/// common pipeline. `Standard` is the plain 30/40% autonomous strategy;
/// `VolatilityRegime` and `AdaptiveSwitching` add the two extensions
/// described for the SOL and regime-fighter variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StrategyVariant {
    Standard,
    VolatilityRegime,
    AdaptiveSwitching,
}

/// Static configuration for one registered strategy: symbol, timeframe,
/// margin class, leverage bounds, and which variant behavior it layers on.
#[derive(Debug, Clone)]
pub struct StrategyProfile {
    pub name: &'static str,
    pub symbol: &'static str,
    pub timeframe: &'static str,
    pub margin_class: StrategyClass,
    pub base_leverage: u32,
    pub max_leverage: u32,
    pub variant: StrategyVariant,
}

/// Per-user, per-symbol decision loop. Owns its protection-mode state and a
/// margin enforcer scoped to the profile's class; stateless otherwise — all
/// market data and positions are supplied fresh on every call.
pub struct AutonomousStrategy {
    pub profile: StrategyProfile,
    enforcer: MarginCapEnforcer,
    pub protection: ProtectionState,
    pub margin_limit_blocks: u64,
    regime_switcher: Option<RegimeSwitcher>,
    atr_history: Vec<f64>,
}

impl AutonomousStrategy {
    pub fn new(profile: StrategyProfile) -> Self {
        let enforcer = MarginCapEnforcer::new(profile.margin_class);
        let regime_switcher = matches!(profile.variant, StrategyVariant::AdaptiveSwitching)
            .then(|| RegimeSwitcher::new(REGIME_SWITCH_CONFIRMATIONS));
        Self {
            profile,
            enforcer,
            protection: ProtectionState::new(),
            margin_limit_blocks: 0,
            regime_switcher,
            atr_history: Vec::new(),
        }
    }

    /// Folds a closed trade's PnL into the protection-mode ladder.
    pub fn record_trade_result(&mut self, pnl: Decimal) {
        self.protection.record_trade(pnl);
    }

    pub async fn analyze_and_decide(
        &mut self,
        exchange: &dyn ExchangeClient,
        validator: &dyn SignalValidator,
    ) -> Result<AutonomousDecision, CoreError> {
        if self.protection.mode == ProtectionMode::Lockdown {
            tracing::warn!(strategy = self.profile.name, "protection mode LOCKDOWN, holding");
            return Ok(AutonomousDecision::hold(
                "trading suspended: protection mode is LOCKDOWN",
                MarketRegime::Unknown,
            ));
        }

        let candles = exchange
            .fetch_ohlcv(self.profile.symbol, self.profile.timeframe, 250)
            .await?;
        let raw_regime = classify_regime(&candles);
        let close = candles.last().map(|c| f64_of(c.close)).unwrap_or(0.0);
        let atr_value = atr(&candles, 14).unwrap_or(0.0);
        let volatility = if close > 0.0 { atr_value / close } else { 0.0 };
        let atr_percent = volatility * 100.0;
        let regime = self.effective_regime(raw_regime, atr_percent);

        let positions = exchange.fetch_positions(self.profile.symbol).await?;
        if let Some(position) = positions.first() {
            if let Some(exit) = self.check_exit(position, &candles, regime) {
                return Ok(exit);
            }
        }

        let balance = exchange.fetch_balance().await?;
        let status = self.enforcer.margin_status(balance.total, balance.used);

        if positions.is_empty() && !status.can_open_position {
            self.margin_limit_blocks += 1;
            tracing::info!(
                strategy = self.profile.name,
                blocks = self.margin_limit_blocks,
                "margin cap reached, holding"
            );
            return Ok(AutonomousDecision::hold(
                "margin cap reached: no free margin for a new position",
                regime,
            ));
        }

        let (dyn_leverage, base_size_percent, sl_percent, tp_percent) =
            self.dynamic_params(regime, volatility);

        let Some(signal) = self.signal_for_regime(regime, &candles) else {
            return Ok(AutonomousDecision::hold("no signal: regime conditions not met", regime));
        };

        let size_percent = (base_size_percent * signal.size_multiplier).min(80.0);
        let leverage = dyn_leverage.min(signal.leverage_cap);

        let mut decision = AutonomousDecision {
            decision: signal.decision,
            confidence: signal.confidence,
            position_size_percent: size_percent,
            target_leverage: leverage,
            stop_loss_percent: sl_percent,
            take_profit_percent: tp_percent,
            tp1_percent: None,
            tp2_percent: None,
            tp3_percent: None,
            reasoning: signal.reasoning,
            market_regime: regime,
            ai_enhanced: false,
            warnings: Vec::new(),
        };

        self.apply_volatility_staging(&mut decision, atr_percent);

        let requested_margin = balance.total * Decimal::try_from(decision.position_size_percent / 100.0)
            .unwrap_or(Decimal::ZERO);
        let validation = self.enforcer.validate_order(requested_margin, &status);
        match validation.verdict {
            OrderVerdict::Rejected => {
                return Ok(AutonomousDecision::hold(validation.message, regime));
            }
            OrderVerdict::AllowedAdjusted => {
                let adjusted_percent = if balance.total > Decimal::ZERO {
                    f64_of(validation.adjusted_margin / balance.total * Decimal::from(100))
                } else {
                    0.0
                };
                decision.position_size_percent = adjusted_percent;
                decision = decision.with_warning(validation.message);
            }
            OrderVerdict::Allowed => {}
        }

        if !matches!(
            decision.decision,
            TradingDecision::Hold | TradingDecision::EmergencyExit
        ) {
            match validator.validate(&decision).await? {
                ValidationOutcome::Approved => {}
                ValidationOutcome::ApprovedWithConditions { warnings } => {
                    decision.confidence *= 0.8;
                    for warning in warnings {
                        decision = decision.with_warning(warning);
                    }
                }
                ValidationOutcome::Rejected { failed_rules } => {
                    return Ok(AutonomousDecision::hold(
                        format!("signal rejected: {}", failed_rules.join(", ")),
                        regime,
                    ));
                }
            }
        }

        Ok(decision)
    }

    fn check_exit(
        &self,
        position: &PositionInfo,
        candles: &[trading_core_types::Candle],
        regime: MarketRegime,
    ) -> Option<AutonomousDecision> {
        let pnl_percent = f64_of(position.unrealized_pnl_percent);
        let exit_decision = match position.side {
            Side::Long => TradingDecision::ExitLong,
            Side::Short => TradingDecision::ExitShort,
        };

        if pnl_percent <= -2.0 {
            return Some(
                AutonomousDecision::hold("stop-loss hit", regime)
                    .with_warning(format!("closing at {pnl_percent:.2}% unrealized"))
                    .tap_decision(exit_decision, 100.0),
            );
        }
        if pnl_percent >= 4.0 {
            return Some(
                AutonomousDecision::hold("take-profit hit", regime)
                    .tap_decision(exit_decision, 100.0),
            );
        }

        let current_price = f64_of(position.current_price);
        let liq_price = f64_of(position.liquidation_price);
        if liq_price > 0.0 && current_price > 0.0 {
            let distance = (current_price - liq_price).abs() / current_price;
            if distance < 0.05 {
                return Some(
                    AutonomousDecision::hold("liquidation proximity", regime)
                        .tap_decision(TradingDecision::EmergencyExit, 100.0),
                );
            }
        }

        if let (Some(ema21), Some(macd_out)) = (ema(candles, 21), macd(candles, 12, 26, 9)) {
            let close = candles.last().map(|c| f64_of(c.close)).unwrap_or(0.0);
            let rsi14 = rsi(candles, 14).unwrap_or(50.0);
            let reversal_against_long = position.side == Side::Long
                && close < ema21
                && macd_out.histogram < macd_out.prev_histogram
                && rsi14 < 50.0;
            let reversal_against_short = position.side == Side::Short
                && close > ema21
                && macd_out.histogram > macd_out.prev_histogram
                && rsi14 > 50.0;
            if reversal_against_long || reversal_against_short {
                return Some(
                    AutonomousDecision::hold("trend reversal against open position", regime)
                        .tap_decision(exit_decision, 100.0),
                );
            }
        }

        None
    }

    /// Classifies `atr_percent` against the trailing history, then pushes it
    /// onto that history (capped) for the next call.
    fn classify_and_record_volatility(&mut self, atr_percent: f64) -> VolatilityRegime {
        let vr = classify_volatility_regime(&self.atr_history, atr_percent);
        self.atr_history.push(atr_percent);
        if self.atr_history.len() > ATR_HISTORY_CAP {
            self.atr_history.remove(0);
        }
        vr
    }

    /// Applies the profile's variant on top of the raw EMA-crossover regime:
    /// the SOL variant overrides to `Volatile` on ATR exhaustion, the
    /// adaptive fighter routes the raw regime through its hysteresis
    /// switcher before using it anywhere downstream.
    fn effective_regime(&mut self, raw_regime: MarketRegime, atr_percent: f64) -> MarketRegime {
        let volatility_regime = matches!(self.profile.variant, StrategyVariant::VolatilityRegime)
            .then(|| self.classify_and_record_volatility(atr_percent));

        match (&mut self.regime_switcher, volatility_regime) {
            (Some(switcher), _) => regime_for_sub_strategy(switcher.observe(raw_regime)),
            (None, Some(VolatilityRegime::Exhaustion)) => MarketRegime::Volatile,
            _ => raw_regime,
        }
    }

    /// SOL variant only: once a signal enters a position, replaces the
    /// single take-profit level with the 1.5x/2.5x/4x ATR ladder.
    fn apply_volatility_staging(&self, decision: &mut AutonomousDecision, atr_percent: f64) {
        if matches!(self.profile.variant, StrategyVariant::VolatilityRegime)
            && matches!(decision.decision, TradingDecision::EnterLong | TradingDecision::EnterShort)
        {
            let (tp1, tp2, tp3) = multi_stage_take_profits(atr_percent);
            decision.tp1_percent = Some(tp1);
            decision.tp2_percent = Some(tp2);
            decision.tp3_percent = Some(tp3);
        }
    }

    fn dynamic_params(&self, regime: MarketRegime, volatility: f64) -> (u32, f64, f64, f64) {
        let leverage = if volatility > 0.03 {
            5u32.min(self.profile.max_leverage)
        } else if volatility > 0.02 {
            8u32.min(self.profile.max_leverage)
        } else if regime == MarketRegime::TrendingUp {
            15u32.min(self.profile.max_leverage)
        } else {
            self.profile.base_leverage
        };

        let mut size_percent = 50.0;
        if volatility > 0.03 {
            size_percent *= 0.3;
        } else if volatility > 0.02 {
            size_percent *= 0.5;
        }
        size_percent *= match regime {
            MarketRegime::TrendingUp => 1.0,
            MarketRegime::TrendingDown => 0.7,
            MarketRegime::Ranging => 0.5,
            MarketRegime::Volatile => 0.3,
            _ => 0.5,
        };
        size_percent *= match self.protection.mode {
            ProtectionMode::Cautious => 0.5,
            ProtectionMode::Defensive => 0.25,
            _ => 1.0,
        };
        let size_percent = size_percent.min(80.0);

        let mut sl = 2.0;
        let mut tp = 4.0;
        if volatility > 0.03 {
            sl *= 2.0;
            tp *= 2.0;
        } else if volatility > 0.02 {
            sl *= 1.5;
            tp *= 1.5;
        }
        match regime {
            MarketRegime::TrendingUp => tp *= 1.5,
            MarketRegime::Ranging => {
                sl *= 0.8;
                tp *= 0.7;
            }
            _ => {}
        }

        (leverage, size_percent, sl, tp)
    }

    fn signal_for_regime(
        &self,
        regime: MarketRegime,
        candles: &[trading_core_types::Candle],
    ) -> Option<SignalCandidate> {
        let close = candles.last().map(|c| f64_of(c.close))?;
        let ema21 = ema(candles, 21)?;
        let ema50 = ema(candles, 50)?;
        let rsi14 = rsi(candles, 14)?;
        let bands = bollinger_bands(candles, 20, 2.0)?;
        let macd_out = macd(candles, 12, 26, 9)?;
        let vol_sma = volume_sma(candles, 20)?;
        let volume = candles.last().map(|c| f64_of(c.volume))?;

        match regime {
            MarketRegime::TrendingUp => {
                if close > ema21
                    && ema21 > ema50
                    && (50.0..75.0).contains(&rsi14)
                    && macd_out.macd > macd_out.signal
                    && macd_out.histogram > macd_out.prev_histogram
                    && volume > 1.2 * vol_sma
                {
                    return Some(SignalCandidate {
                        decision: TradingDecision::EnterLong,
                        confidence: 0.85,
                        size_multiplier: 1.0,
                        leverage_cap: self.profile.max_leverage,
                        reasoning: "trending up: bullish confluence of EMA/RSI/MACD/volume".to_string(),
                    });
                }
            }
            MarketRegime::TrendingDown => {
                if close < ema21
                    && ema21 < ema50
                    && (25.0..50.0).contains(&rsi14)
                    && macd_out.macd < macd_out.signal
                    && macd_out.histogram < macd_out.prev_histogram
                    && volume > 1.2 * vol_sma
                {
                    return Some(SignalCandidate {
                        decision: TradingDecision::EnterShort,
                        confidence: 0.80,
                        size_multiplier: 0.8,
                        leverage_cap: self.profile.max_leverage,
                        reasoning: "trending down: bearish confluence of EMA/RSI/MACD/volume".to_string(),
                    });
                }
            }
            MarketRegime::Ranging => {
                if rsi14 < 30.0 && close < bands.lower {
                    return Some(SignalCandidate {
                        decision: TradingDecision::EnterLong,
                        confidence: 0.75,
                        size_multiplier: 0.6,
                        leverage_cap: 8,
                        reasoning: "ranging: oversold bounce off lower band".to_string(),
                    });
                }
                if rsi14 > 70.0 && close > bands.upper {
                    return Some(SignalCandidate {
                        decision: TradingDecision::EnterShort,
                        confidence: 0.70,
                        size_multiplier: 0.5,
                        leverage_cap: 5,
                        reasoning: "ranging: overbought fade off upper band".to_string(),
                    });
                }
            }
            MarketRegime::Volatile => {
                if rsi14 < 20.0 && close < bands.lower * 0.98 && volume > 2.0 * vol_sma {
                    return Some(SignalCandidate {
                        decision: TradingDecision::EnterLong,
                        confidence: 0.70,
                        size_multiplier: 0.4,
                        leverage_cap: 5,
                        reasoning: "high volatility: extreme oversold exhaustion".to_string(),
                    });
                }
            }
            _ => {}
        }

        None
    }
}

struct SignalCandidate {
    decision: TradingDecision,
    confidence: f64,
    size_multiplier: f64,
    leverage_cap: u32,
    reasoning: String,
}

/// Small builder extension so `check_exit` can construct the exit decision
/// in one expression while reusing `AutonomousDecision::hold`'s field
/// defaults.
trait TapDecision {
    fn tap_decision(self, decision: TradingDecision, size_percent: f64) -> Self;
}

impl TapDecision for AutonomousDecision {
    fn tap_decision(mut self, decision: TradingDecision, size_percent: f64) -> Self {
        self.decision = decision;
        self.position_size_percent = size_percent;
        self
    }
}
