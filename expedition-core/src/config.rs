//! Engine configuration.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors from validating an [`EngineConfig`].
#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("gradient_points_per_charge must be greater than zero")]
    ZeroGradientCharge,

    #[error("low_hp_ratio must be in (0, 1], got {0}")]
    LowHpRatio(f64),

    #[error("status damage multiplier must not be negative: {0}")]
    NegativeMultiplier(f64),

    #[error("initiative_dice must be between 1 and {max}, got {0}", max = crate::dice::MAX_DICE)]
    InitiativeDice(u32),
}

/// Tunable rules for the battle engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Gradient points that make up one gradient charge.
    pub gradient_points_per_charge: u32,

    /// Display cap for gradient charges.
    pub max_gradient_charges: u32,

    /// HP ratio under which the `low-hp` condition holds.
    pub low_hp_ratio: f64,

    /// Number of picto slots (from slot 0) whose passives are active.
    pub active_picto_slots: usize,

    /// Dice rolled by an initiative roll.
    pub initiative_dice: u32,

    /// Damage multiplier for an Empowered attacker or an Unprotected defender.
    pub status_amplify: f64,

    /// Damage multiplier for a Weakened attacker or a Protected defender.
    pub status_dampen: f64,

    /// Extra multiplier for Fire hits against FireVulnerability.
    pub fire_vulnerability: f64,

    /// Whether a Shielded stack negates a whole hit.
    pub shield_blocks_hits: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            gradient_points_per_charge: 12,
            max_gradient_charges: 3,
            low_hp_ratio: 0.30,
            active_picto_slots: 3,
            initiative_dice: 1,
            status_amplify: 1.25,
            status_dampen: 0.75,
            fire_vulnerability: 1.5,
            shield_blocks_hits: true,
        }
    }
}

impl EngineConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_gradient_points_per_charge(mut self, points: u32) -> Self {
        self.gradient_points_per_charge = points;
        self
    }

    pub fn with_low_hp_ratio(mut self, ratio: f64) -> Self {
        self.low_hp_ratio = ratio;
        self
    }

    pub fn with_active_picto_slots(mut self, slots: usize) -> Self {
        self.active_picto_slots = slots;
        self
    }

    pub fn with_initiative_dice(mut self, dice: u32) -> Self {
        self.initiative_dice = dice;
        self
    }

    pub fn with_status_multipliers(mut self, amplify: f64, dampen: f64) -> Self {
        self.status_amplify = amplify;
        self.status_dampen = dampen;
        self
    }

    pub fn with_shield_blocks_hits(mut self, blocks: bool) -> Self {
        self.shield_blocks_hits = blocks;
        self
    }

    /// Check the configuration for values the rules cannot work with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.gradient_points_per_charge == 0 {
            return Err(ConfigError::ZeroGradientCharge);
        }
        if !(1..=crate::dice::MAX_DICE).contains(&self.initiative_dice) {
            return Err(ConfigError::InitiativeDice(self.initiative_dice));
        }
        if !(self.low_hp_ratio > 0.0 && self.low_hp_ratio <= 1.0) {
            return Err(ConfigError::LowHpRatio(self.low_hp_ratio));
        }
        for m in [
            self.status_amplify,
            self.status_dampen,
            self.fire_vulnerability,
        ] {
            if m < 0.0 {
                return Err(ConfigError::NegativeMultiplier(m));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_valid() {
        assert!(EngineConfig::default().validate().is_ok());
    }

    #[test]
    fn test_rejects_zero_charge_size() {
        let config = EngineConfig::new().with_gradient_points_per_charge(0);
        assert_eq!(config.validate(), Err(ConfigError::ZeroGradientCharge));
    }

    #[test]
    fn test_rejects_bad_low_hp_ratio() {
        let config = EngineConfig::new().with_low_hp_ratio(1.5);
        assert_eq!(config.validate(), Err(ConfigError::LowHpRatio(1.5)));
    }

    #[test]
    fn test_rejects_unbounded_initiative_dice() {
        let config = EngineConfig::new().with_initiative_dice(0);
        assert_eq!(config.validate(), Err(ConfigError::InitiativeDice(0)));
        let config = EngineConfig::new().with_initiative_dice(u32::MAX);
        assert_eq!(config.validate(), Err(ConfigError::InitiativeDice(u32::MAX)));
    }
}
