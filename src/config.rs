//! Engine configuration with validation and defaults.
//!
//! Defaults reflect the production deployment: a 30 second betting window,
//! a 500x derivation ceiling, and a quarter-bankroll exposure limit.

use crate::errors::{EngineError, EngineResult};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Genesis seed used when the persistence store holds no prior round.
pub const GENESIS_HASH: &str =
    "0000000000000000000000000000000000000000000000000000000000000000";

/// Top-level engine configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Seed hash for round 0 when no history exists.
    pub genesis_hash: String,
    /// Bootstrap bankroll when neither the provider nor the store knows one.
    pub starting_bankroll: f64,
    pub min_bet: f64,
    pub max_bet: f64,
    pub fairness: FairnessConfig,
    pub risk: RiskConfig,
    pub clock: ClockConfig,
    pub settlement: SettlementConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            genesis_hash: GENESIS_HASH.to_string(),
            starting_bankroll: 100.0,
            min_bet: 0.1,
            max_bet: 100.0,
            fairness: FairnessConfig::default(),
            risk: RiskConfig::default(),
            clock: ClockConfig::default(),
            settlement: SettlementConfig::default(),
        }
    }
}

/// Multiplier derivation bounds.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct FairnessConfig {
    /// Derived targets above this are clamped; the clamp is part of the
    /// published verification formula.
    pub max_multiplier: f64,
}

impl Default for FairnessConfig {
    fn default() -> Self {
        Self { max_multiplier: 500.0 }
    }
}

/// Exposure limits enforced by the risk governor.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct RiskConfig {
    /// Fraction of (house balance + pool) the projected liability may reach
    /// before the round is force-crashed.
    pub threshold_fraction: f64,
    /// Targets above this with an empty ledger are redrawn at round start.
    pub no_bet_threshold: f64,
    /// Upper bound of a redrawn target.
    pub redraw_ceiling: f64,
}

impl Default for RiskConfig {
    fn default() -> Self {
        Self {
            threshold_fraction: 0.25,
            no_bet_threshold: 50.0,
            redraw_ceiling: 10.0,
        }
    }
}

/// Betting countdown and tick pacing.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct ClockConfig {
    pub betting_window_secs: u64,
    /// Tick delay while the multiplier is below `medium_from`.
    pub slow_tick_ms: u64,
    pub medium_tick_ms: u64,
    pub fast_tick_ms: u64,
    /// Multiplier at which pacing switches from slow to medium.
    pub medium_from: f64,
    /// Multiplier at which pacing switches from medium to fast.
    pub fast_from: f64,
}

impl Default for ClockConfig {
    fn default() -> Self {
        Self {
            betting_window_secs: 30,
            slow_tick_ms: 130,
            medium_tick_ms: 90,
            fast_tick_ms: 50,
            medium_from: 2.0,
            fast_from: 3.5,
        }
    }
}

/// Payout confirmation pacing and retry budget.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct SettlementConfig {
    /// Sleep before the first status poll.
    pub grace_period_ms: u64,
    pub poll_interval_ms: u64,
    /// Total status polls before the settlement is escalated.
    pub max_attempts: u32,
}

impl Default for SettlementConfig {
    fn default() -> Self {
        Self {
            grace_period_ms: 2_000,
            poll_interval_ms: 2_000,
            max_attempts: 10,
        }
    }
}

impl EngineConfig {
    /// Validate the assembled configuration before the engine starts.
    pub fn validate(&self) -> EngineResult<()> {
        if self.genesis_hash.len() != 64
            || !self.genesis_hash.chars().all(|c| c.is_ascii_hexdigit())
        {
            return Err(EngineError::Configuration(
                "genesis_hash must be 64 hex characters".to_string(),
            ));
        }
        if self.starting_bankroll <= 0.0 {
            return Err(EngineError::Configuration(
                "starting_bankroll must be positive".to_string(),
            ));
        }
        if self.min_bet <= 0.0 || self.min_bet > self.max_bet {
            return Err(EngineError::Configuration(format!(
                "bet range [{}, {}] is invalid",
                self.min_bet, self.max_bet
            )));
        }
        if self.fairness.max_multiplier < 1.0 {
            return Err(EngineError::Configuration(
                "max_multiplier must be at least 1.00".to_string(),
            ));
        }
        if self.risk.threshold_fraction <= 0.0 || self.risk.threshold_fraction > 1.0 {
            return Err(EngineError::Configuration(
                "threshold_fraction must be in (0, 1]".to_string(),
            ));
        }
        if self.risk.redraw_ceiling < 1.0 || self.risk.redraw_ceiling > self.risk.no_bet_threshold {
            return Err(EngineError::Configuration(
                "redraw_ceiling must be in [1.00, no_bet_threshold]".to_string(),
            ));
        }
        if self.clock.slow_tick_ms == 0
            || self.clock.medium_tick_ms == 0
            || self.clock.fast_tick_ms == 0
        {
            return Err(EngineError::Configuration(
                "tick delays must be non-zero".to_string(),
            ));
        }
        if self.clock.medium_from >= self.clock.fast_from {
            return Err(EngineError::Configuration(
                "medium_from must be below fast_from".to_string(),
            ));
        }
        if self.settlement.max_attempts == 0 {
            return Err(EngineError::Configuration(
                "settlement max_attempts must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

/// Configuration loader with environment variable overrides.
pub struct ConfigLoader {
    config_path: Option<String>,
}

impl ConfigLoader {
    pub fn new() -> Self {
        Self { config_path: None }
    }

    pub fn with_path<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.config_path = Some(path.as_ref().to_string_lossy().to_string());
        self
    }

    /// Load from TOML (if a path was given), apply environment overrides,
    /// and validate.
    pub fn load(&self) -> EngineResult<EngineConfig> {
        let mut config = if let Some(ref path) = self.config_path {
            let content = std::fs::read_to_string(path).map_err(|e| {
                EngineError::Configuration(format!("failed to read {}: {}", path, e))
            })?;
            toml::from_str(&content)
                .map_err(|e| EngineError::Configuration(format!("failed to parse TOML: {}", e)))?
        } else {
            EngineConfig::default()
        };

        self.apply_env_overrides(&mut config)?;
        config.validate()?;
        Ok(config)
    }

    fn apply_env_overrides(&self, config: &mut EngineConfig) -> EngineResult<()> {
        if let Ok(hash) = std::env::var("CRASHPOINT_GENESIS_HASH") {
            config.genesis_hash = hash;
        }
        if let Ok(secs) = std::env::var("CRASHPOINT_BETTING_WINDOW_SECS") {
            config.clock.betting_window_secs = secs.parse().map_err(|_| {
                EngineError::Configuration(format!(
                    "CRASHPOINT_BETTING_WINDOW_SECS: '{}' is not a number",
                    secs
                ))
            })?;
        }
        Ok(())
    }
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_validates() {
        assert!(EngineConfig::default().validate().is_ok());
    }

    #[test]
    fn rejects_out_of_range_threshold() {
        let mut config = EngineConfig::default();
        config.risk.threshold_fraction = 1.5;
        assert!(matches!(
            config.validate(),
            Err(EngineError::Configuration(_))
        ));
    }

    #[test]
    fn rejects_malformed_genesis() {
        let mut config = EngineConfig::default();
        config.genesis_hash = "not-hex".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_inverted_bet_range() {
        let mut config = EngineConfig::default();
        config.min_bet = 50.0;
        config.max_bet = 1.0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn toml_round_trip_preserves_defaults() {
        let config = EngineConfig::default();
        let text = toml::to_string(&config).unwrap();
        let back: EngineConfig = toml::from_str(&text).unwrap();
        assert_eq!(back.clock.betting_window_secs, config.clock.betting_window_secs);
        assert_eq!(back.risk.threshold_fraction, config.risk.threshold_fraction);
    }

    #[test]
    fn partial_toml_fills_defaults() {
        let back: EngineConfig = toml::from_str("min_bet = 1.0\n[risk]\nthreshold_fraction = 0.5\n").unwrap();
        assert_eq!(back.min_bet, 1.0);
        assert_eq!(back.risk.threshold_fraction, 0.5);
        assert_eq!(back.max_bet, EngineConfig::default().max_bet);
        assert_eq!(back.risk.no_bet_threshold, RiskConfig::default().no_bet_threshold);
    }
}
