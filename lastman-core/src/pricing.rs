//! Deposit pricing: a flat base plus a fixed share of the pot.

use crate::config::GameConfig;
use crate::types::Amount;

const BPS_DENOMINATOR: u128 = 10_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PricingPolicy {
    base_deposit: Amount,
    pot_percentage_bps: u32,
}

impl PricingPolicy {
    pub fn new(base_deposit: Amount, pot_percentage_bps: u32) -> Self {
        Self {
            base_deposit,
            pot_percentage_bps,
        }
    }

    pub fn from_config(config: &GameConfig) -> Self {
        Self::new(config.base_deposit, config.pot_percentage_bps)
    }

    pub fn base_deposit(&self) -> Amount {
        self.base_deposit
    }

    /// `BASE_DEPOSIT + floor(pot * POT_PERCENTAGE_BPS / 10000)`, integer only.
    pub fn next_deposit(&self, pot_amount: Amount) -> Amount {
        let share = pot_amount.mul_div_floor(self.pot_percentage_bps as u128, BPS_DENOMINATOR);
        self.base_deposit.saturating_add(share)
    }
}
