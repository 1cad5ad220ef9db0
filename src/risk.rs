//! House exposure circuit breaker.
//!
//! Consulted every tick while the round is running; a trip makes the current
//! tick the terminal one regardless of how much curve remains. Also owns the
//! no-bet redraw rule, checked exactly once at the Betting→Running
//! transition.

use crate::config::RiskConfig;
use rand::Rng;

#[derive(Clone, Debug)]
pub struct RiskGovernor {
    threshold_fraction: f64,
    no_bet_threshold_cents: u64,
    redraw_ceiling_cents: u64,
}

impl RiskGovernor {
    pub fn new(config: &RiskConfig) -> Self {
        Self {
            threshold_fraction: config.threshold_fraction,
            no_bet_threshold_cents: (config.no_bet_threshold * 100.0).round() as u64,
            redraw_ceiling_cents: (config.redraw_ceiling * 100.0).round() as u64,
        }
    }

    /// True when projected liability exceeds the configured fraction of the
    /// funds backing the round (house balance plus the pool itself).
    pub fn should_force_crash(&self, liability: f64, house_balance: f64, pool_size: f64) -> bool {
        liability > self.threshold_fraction * (house_balance + pool_size)
    }

    /// No-bet rule: an extreme chain-derived target with an empty ledger
    /// would stall the table on a long bet-free climb.
    pub fn should_redraw_target(&self, target_cents: u64, ledger_empty: bool) -> bool {
        ledger_empty && target_cents > self.no_bet_threshold_cents
    }

    /// Replacement target in [1.00, redraw_ceiling], cents granularity.
    pub fn redraw_target<R: Rng>(&self, rng: &mut R) -> u64 {
        rng.gen_range(100..=self.redraw_ceiling_cents)
    }
}
