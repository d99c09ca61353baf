use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Always derived from an exchange balance snapshot, never stored.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MarginStatus {
    pub total_balance: Decimal,
    pub available_margin: Decimal,
    pub used_margin: Decimal,
    pub margin_usage_percent: Decimal,
    pub remaining_margin: Decimal,
    pub can_open_position: bool,
    pub max_position_value: Decimal,
}

impl MarginStatus {
    /// Fail-closed sentinel returned whenever the exchange is unavailable:
    /// all zeros, no new positions permitted.
    pub fn fail_closed() -> Self {
        Self {
            total_balance: Decimal::ZERO,
            available_margin: Decimal::ZERO,
            used_margin: Decimal::ZERO,
            margin_usage_percent: Decimal::from(100),
            remaining_margin: Decimal::ZERO,
            can_open_position: false,
            max_position_value: Decimal::ZERO,
        }
    }
}
