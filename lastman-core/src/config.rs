use crate::error::{GameError, Result};
use crate::types::{Amount, Identity, UNIT};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GameConfig {
    /// Flat part of every deposit.
    pub base_deposit: Amount,
    /// Share of the current pot added to the base deposit, in basis points.
    pub pot_percentage_bps: u32,
    /// Every Nth deposit of a round opens a bonus slot.
    pub bonus_interval: u64,
    /// Inactivity window after which the last depositor wins.
    pub round_timeout: Duration,
    pub min_bonus_pct: u32,
    pub max_bonus_pct: u32,
    /// How long after a slot opens the timelocked percentage becomes revealable.
    pub reveal_delay: Duration,
    /// Identity allowed to run administrative overrides.
    pub operator: Identity,
    /// Pay revealed bonuses in the same step as the reveal.
    pub auto_pay_bonus: bool,
}

impl Default for GameConfig {
    fn default() -> Self {
        Self {
            base_deposit: Amount::from_units(UNIT / 100), // 0.01
            pot_percentage_bps: 50,                        // 0.5%
            bonus_interval: 10,
            round_timeout: Duration::from_secs(24 * 3600),
            min_bonus_pct: 1,
            max_bonus_pct: 5,
            reveal_delay: Duration::from_secs(24 * 3600),
            operator: Identity::new("operator"),
            auto_pay_bonus: false,
        }
    }
}

impl GameConfig {
    pub fn validate(&self) -> Result<()> {
        if self.base_deposit.is_zero() {
            return Err(GameError::config("Base deposit must be greater than 0"));
        }

        if self.pot_percentage_bps > 10_000 {
            return Err(GameError::config("Pot percentage cannot exceed 10000 bps"));
        }

        if self.bonus_interval == 0 {
            return Err(GameError::config("Bonus interval must be greater than 0"));
        }

        if self.round_timeout.is_zero() {
            return Err(GameError::config("Round timeout must be greater than 0"));
        }

        if self.min_bonus_pct == 0 || self.min_bonus_pct > self.max_bonus_pct {
            return Err(GameError::config(
                "Bonus percentage bounds must satisfy 0 < min <= max",
            ));
        }

        if self.max_bonus_pct > 100 {
            return Err(GameError::config("Bonus percentage cannot exceed 100"));
        }

        if self.operator.as_str().is_empty() {
            return Err(GameError::config("Operator identity cannot be empty"));
        }

        Ok(())
    }

    pub fn round_timeout(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.round_timeout.as_secs() as i64)
    }

    pub fn reveal_delay(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.reveal_delay.as_secs() as i64)
    }

    /// Number of distinct percentages a bonus can take.
    pub fn bonus_pct_span(&self) -> u32 {
        self.max_bonus_pct - self.min_bonus_pct + 1
    }

    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: GameConfig = serde_json::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }
}
