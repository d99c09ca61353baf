use rust_decimal::Decimal;
use trading_core_types::MarginStatus;

/// How aggressively a strategy class is allowed to use margin. The specific
/// percentages are fixed at construction time, never read from
/// configuration, so a strategy can't accidentally loosen its own cap.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StrategyClass {
    /// 30% steady-state cap — the default for most strategies.
    Standard,
    /// 40% hard ceiling — only for strategies explicitly built around it,
    /// and still subject to the same safety buffer and free-margin floor.
    Aggressive,
}

impl StrategyClass {
    fn max_margin_percent(self) -> Decimal {
        match self {
            StrategyClass::Standard => Decimal::from(30),
            StrategyClass::Aggressive => Decimal::from(40),
        }
    }
}

const SAFETY_BUFFER_PERCENT: i64 = 2;
const MIN_FREE_MARGIN_PERCENT: i64 = 5;
const SAFE_SIZE_BUFFER_NUM: i64 = 8;
const SAFE_SIZE_BUFFER_DEN: i64 = 10;
const ADJUSTED_MARGIN_NUM: i64 = 9;
const ADJUSTED_MARGIN_DEN: i64 = 10;
const MIN_POSITION_SIZE: &str = "0.001";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderVerdict {
    Allowed,
    AllowedAdjusted,
    Rejected,
}

#[derive(Debug, Clone)]
pub struct OrderValidation {
    pub verdict: OrderVerdict,
    pub message: String,
    pub adjusted_margin: Decimal,
}

/// Pure margin-cap logic: no I/O, no shared mutable state, just arithmetic
/// over a `MarginStatus` snapshot the caller fetched from the exchange.
pub struct MarginCapEnforcer {
    class: StrategyClass,
}

impl MarginCapEnforcer {
    pub fn new(class: StrategyClass) -> Self {
        Self { class }
    }

    fn effective_cap_percent(&self) -> Decimal {
        self.class.max_margin_percent() - Decimal::from(SAFETY_BUFFER_PERCENT)
    }

    /// Derives a `MarginStatus` from exchange totals and the used-margin
    /// figure (either summed from open positions or the exchange's own
    /// "used" field — the caller decides which source is authoritative).
    pub fn margin_status(&self, total_balance: Decimal, used_margin: Decimal) -> MarginStatus {
        if total_balance <= Decimal::ZERO {
            return MarginStatus::fail_closed();
        }

        let effective_cap_value = total_balance * self.effective_cap_percent() / Decimal::from(100);
        let remaining_margin = (effective_cap_value - used_margin).max(Decimal::ZERO);
        let margin_usage_percent = used_margin / total_balance * Decimal::from(100);
        let min_free_margin = total_balance * Decimal::from(MIN_FREE_MARGIN_PERCENT) / Decimal::from(100);

        MarginStatus {
            total_balance,
            available_margin: total_balance - used_margin,
            used_margin,
            margin_usage_percent,
            remaining_margin,
            can_open_position: remaining_margin > min_free_margin,
            max_position_value: effective_cap_value,
        }
    }

    /// Rejects a requested margin increase that would push usage over
    /// `MAX_MARGIN_PERCENT`; adjusts one that clears that hard line but still
    /// exceeds the effective (buffered) cap down to 90% of remaining room;
    /// allows anything else as-is.
    pub fn validate_order(&self, requested_margin: Decimal, status: &MarginStatus) -> OrderValidation {
        if status.total_balance <= Decimal::ZERO {
            return OrderValidation {
                verdict: OrderVerdict::Rejected,
                message: "no balance available".to_string(),
                adjusted_margin: Decimal::ZERO,
            };
        }

        let projected_usage =
            (status.used_margin + requested_margin) / status.total_balance * Decimal::from(100);

        if projected_usage > self.class.max_margin_percent() {
            return OrderValidation {
                verdict: OrderVerdict::Rejected,
                message: format!(
                    "projected usage {projected_usage:.2}% exceeds hard cap {}%",
                    self.class.max_margin_percent()
                ),
                adjusted_margin: status.remaining_margin,
            };
        }

        if status.used_margin + requested_margin > status.max_position_value {
            let adjusted = status.remaining_margin * Decimal::from(ADJUSTED_MARGIN_NUM)
                / Decimal::from(ADJUSTED_MARGIN_DEN);
            return OrderValidation {
                verdict: OrderVerdict::AllowedAdjusted,
                message: "requested margin adjusted down to stay within the buffered cap".to_string(),
                adjusted_margin: adjusted,
            };
        }

        OrderValidation {
            verdict: OrderVerdict::Allowed,
            message: "within margin caps".to_string(),
            adjusted_margin: requested_margin,
        }
    }

    /// Position size in base-asset units, using 80% of remaining margin as a
    /// second safety factor on top of the buffered cap, clamped to a 0.001
    /// floor. Returns 0 when the status forbids opening a position at all.
    pub fn safe_position_size(&self, status: &MarginStatus, price: Decimal, leverage: u32) -> Decimal {
        if !status.can_open_position || price <= Decimal::ZERO {
            return Decimal::ZERO;
        }

        let safe_margin =
            status.remaining_margin * Decimal::from(SAFE_SIZE_BUFFER_NUM) / Decimal::from(SAFE_SIZE_BUFFER_DEN);
        let size = (safe_margin * Decimal::from(leverage) / price).round_dp(6);
        let floor: Decimal = MIN_POSITION_SIZE.parse().unwrap();

        size.max(floor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn status_with(total: i64, used: i64) -> MarginStatus {
        let enforcer = MarginCapEnforcer::new(StrategyClass::Standard);
        enforcer.margin_status(Decimal::from(total), Decimal::from(used))
    }

    #[test]
    fn fail_closed_when_balance_is_zero() {
        let enforcer = MarginCapEnforcer::new(StrategyClass::Standard);
        let status = enforcer.margin_status(Decimal::ZERO, Decimal::ZERO);
        assert!(!status.can_open_position);
        assert_eq!(status.remaining_margin, Decimal::ZERO);
    }

    #[test]
    fn effective_cap_is_max_minus_safety_buffer() {
        let status = status_with(10_000, 0);
        // (30 - 2)% of 10_000 = 2800
        assert_eq!(status.max_position_value, Decimal::from(2800));
    }

    #[test]
    fn validate_order_rejects_past_hard_cap() {
        let enforcer = MarginCapEnforcer::new(StrategyClass::Standard);
        let status = enforcer.margin_status(Decimal::from(10_000), Decimal::from(2_500));
        let result = enforcer.validate_order(Decimal::from(600), &status);
        assert_eq!(result.verdict, OrderVerdict::Rejected);
    }

    #[test]
    fn validate_order_adjusts_within_hard_cap_but_over_buffer() {
        let enforcer = MarginCapEnforcer::new(StrategyClass::Standard);
        let status = enforcer.margin_status(Decimal::from(10_000), Decimal::from(2_700));
        let result = enforcer.validate_order(Decimal::from(200), &status);
        assert_eq!(result.verdict, OrderVerdict::AllowedAdjusted);
        assert!(result.adjusted_margin < status.remaining_margin);
    }

    #[test]
    fn validate_order_allows_comfortably_within_cap() {
        let enforcer = MarginCapEnforcer::new(StrategyClass::Standard);
        let status = enforcer.margin_status(Decimal::from(10_000), Decimal::from(1_000));
        let result = enforcer.validate_order(Decimal::from(100), &status);
        assert_eq!(result.verdict, OrderVerdict::Allowed);
        assert_eq!(result.adjusted_margin, Decimal::from(100));
    }

    #[test]
    fn safe_position_size_is_zero_when_cannot_open() {
        let enforcer = MarginCapEnforcer::new(StrategyClass::Standard);
        let status = MarginStatus::fail_closed();
        assert_eq!(
            enforcer.safe_position_size(&status, Decimal::from(100), 5),
            Decimal::ZERO
        );
    }

    #[test]
    fn safe_position_size_respects_minimum_floor() {
        let enforcer = MarginCapEnforcer::new(StrategyClass::Standard);
        let mut status = enforcer.margin_status(Decimal::from(10_000), Decimal::ZERO);
        status.remaining_margin = Decimal::new(1, 3); // 0.001
        let size = enforcer.safe_position_size(&status, Decimal::from(50_000), 1);
        assert_eq!(size, "0.001".parse().unwrap());
    }

    #[test]
    fn accepted_orders_never_push_usage_past_the_hard_cap() {
        let enforcer = MarginCapEnforcer::new(StrategyClass::Standard);
        let total_balance = Decimal::from(10_000);
        let mut used_margin = Decimal::ZERO;

        for requested in [500, 700, 900, 400, 600, 300, 800, 250] {
            let status = enforcer.margin_status(total_balance, used_margin);
            let result = enforcer.validate_order(Decimal::from(requested), &status);
            if result.verdict != OrderVerdict::Rejected {
                used_margin += result.adjusted_margin;
            }

            let usage_percent = used_margin / total_balance * Decimal::from(100);
            assert!(usage_percent <= StrategyClass::Standard.max_margin_percent());
        }
    }
}
