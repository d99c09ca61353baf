use trading_core_types::CoreError;
use trading_margin::StrategyClass;

use crate::strategy::{AutonomousStrategy, StrategyProfile, StrategyVariant};

const PROFILES: &[StrategyProfile] = &[
    StrategyProfile {
        name: "autonomous_30pct",
        symbol: "BTC/USDT",
        timeframe: "1h",
        margin_class: StrategyClass::Standard,
        base_leverage: 10,
        max_leverage: 20,
        variant: StrategyVariant::Standard,
    },
    StrategyProfile {
        name: "eth_autonomous_40pct",
        symbol: "ETH/USDT",
        timeframe: "1h",
        margin_class: StrategyClass::Aggressive,
        base_leverage: 8,
        max_leverage: 15,
        variant: StrategyVariant::Standard,
    },
    StrategyProfile {
        name: "sol_volatility_regime_15m",
        symbol: "SOL/USDT",
        timeframe: "15m",
        margin_class: StrategyClass::Standard,
        base_leverage: 5,
        max_leverage: 12,
        variant: StrategyVariant::VolatilityRegime,
    },
    StrategyProfile {
        name: "adaptive_market_regime_fighter",
        symbol: "BTC/USDT",
        timeframe: "1h",
        margin_class: StrategyClass::Standard,
        base_leverage: 10,
        max_leverage: 20,
        variant: StrategyVariant::AdaptiveSwitching,
    },
];

/// Fixed registry of the four production strategies, looked up by name.
/// Dynamic strategy code execution is explicitly disallowed — there is no
/// path from an arbitrary string to executable logic here, only this table.
pub fn build_strategy(name: &str) -> Result<AutonomousStrategy, CoreError> {
    let profile = PROFILES
        .iter()
        .find(|p| p.name == name)
        .ok_or_else(|| CoreError::UnknownStrategy(name.to_string()))?;
    Ok(AutonomousStrategy::new(profile.clone()))
}

pub fn registered_strategy_names() -> Vec<&'static str> {
    PROFILES.iter().map(|p| p.name).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_strategy_names_build() {
        for name in registered_strategy_names() {
            assert!(build_strategy(name).is_ok());
        }
    }

    #[test]
    fn unknown_strategy_name_is_rejected() {
        let err = build_strategy("does_not_exist");
        assert!(matches!(err, Err(CoreError::UnknownStrategy(_))));
    }
}
