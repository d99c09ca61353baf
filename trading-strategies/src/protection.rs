use rust_decimal::Decimal;
use trading_core_types::ProtectionMode;

/// Tracks the consecutive-loss / daily-P&L state that drives the
/// NORMAL→CAUTIOUS→DEFENSIVE→LOCKDOWN ladder, and counts how many times it
/// has escalated.
#[derive(Debug, Clone)]
pub struct ProtectionState {
    pub mode: ProtectionMode,
    pub consecutive_losses: u32,
    pub daily_pnl: Decimal,
    pub activations: u64,
}

impl Default for ProtectionState {
    fn default() -> Self {
        Self {
            mode: ProtectionMode::Normal,
            consecutive_losses: 0,
            daily_pnl: Decimal::ZERO,
            activations: 0,
        }
    }
}

impl ProtectionState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Folds in the result of a closed trade and re-evaluates the ladder.
    pub fn record_trade(&mut self, pnl: Decimal) {
        if pnl < Decimal::ZERO {
            self.consecutive_losses += 1;
        } else {
            self.consecutive_losses = 0;
        }
        self.daily_pnl += pnl;
        self.recompute();
    }

    fn recompute(&mut self) {
        let next = if self.consecutive_losses >= 5 || self.daily_pnl <= Decimal::from(-1000) {
            ProtectionMode::Lockdown
        } else if self.consecutive_losses >= 3 {
            ProtectionMode::Defensive
        } else if self.consecutive_losses >= 2 {
            ProtectionMode::Cautious
        } else {
            ProtectionMode::Normal
        };

        if next != self.mode {
            self.activations += 1;
        }
        self.mode = next;
    }

    /// Daily reset hook: clears the P&L accumulator and demotes LOCKDOWN
    /// down one rung rather than clearing it outright.
    pub fn daily_reset(&mut self) {
        self.daily_pnl = Decimal::ZERO;
        if self.mode == ProtectionMode::Lockdown {
            self.mode = ProtectionMode::Defensive;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn two_losses_trip_cautious() {
        let mut state = ProtectionState::new();
        state.record_trade(Decimal::from(-10));
        state.record_trade(Decimal::from(-10));
        assert_eq!(state.mode, ProtectionMode::Cautious);
    }

    #[test]
    fn five_losses_trip_lockdown() {
        let mut state = ProtectionState::new();
        for _ in 0..5 {
            state.record_trade(Decimal::from(-10));
        }
        assert_eq!(state.mode, ProtectionMode::Lockdown);
        assert_eq!(state.activations, 3); // Cautious -> Defensive -> Lockdown
    }

    #[test]
    fn large_daily_loss_trips_lockdown_regardless_of_streak() {
        let mut state = ProtectionState::new();
        state.record_trade(Decimal::from(-1200));
        assert_eq!(state.mode, ProtectionMode::Lockdown);
    }

    #[test]
    fn a_win_resets_the_streak() {
        let mut state = ProtectionState::new();
        state.record_trade(Decimal::from(-10));
        state.record_trade(Decimal::from(-10));
        state.record_trade(Decimal::from(5));
        assert_eq!(state.consecutive_losses, 0);
        assert_eq!(state.mode, ProtectionMode::Normal);
    }

    #[test]
    fn daily_reset_demotes_lockdown_to_defensive() {
        let mut state = ProtectionState::new();
        for _ in 0..5 {
            state.record_trade(Decimal::from(-10));
        }
        state.daily_reset();
        assert_eq!(state.mode, ProtectionMode::Defensive);
        assert_eq!(state.daily_pnl, Decimal::ZERO);
    }
}
