//! Per-round bet ledger.
//!
//! One stake per address for the active round; repeat stakes merge. The
//! ledger owns stake settlement state, but state-machine guards (which round
//! phase permits which call) live in the engine.

use crate::errors::{EngineError, EngineResult};
use crate::round::{Address, RoundResolution, Stake, StakeStatus};
use chrono::Utc;
use std::collections::HashMap;

/// Stakes for the active round, keyed by address.
#[derive(Clone, Debug, Default)]
pub struct BetLedger {
    stakes: HashMap<Address, Stake>,
}

impl BetLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a stake; an address already present merges amounts instead of
    /// creating a second entry.
    pub fn place(&mut self, address: &str, amount: f64) {
        match self.stakes.get_mut(address) {
            Some(existing) => existing.merge(amount),
            None => {
                self.stakes
                    .insert(address.to_string(), Stake::open(address, amount, Utc::now()));
            }
        }
    }

    /// Lock the address's open stake at the round's current multiplier.
    pub fn cashout(&mut self, address: &str, multiplier: f64) -> EngineResult<Stake> {
        let stake = self
            .stakes
            .get_mut(address)
            .ok_or_else(|| EngineError::UnknownAddress(address.to_string()))?;
        if !stake.is_open() {
            return Err(EngineError::StakeAlreadySettled(address.to_string()));
        }
        stake.close_won(multiplier);
        Ok(stake.clone())
    }

    /// Close every still-open stake, once, at the Running→Settling
    /// transition: forfeited on a crash, or paid at the carried multiplier.
    pub fn force_settle_remaining(&mut self, resolution: RoundResolution) {
        for stake in self.stakes.values_mut().filter(|s| s.is_open()) {
            match resolution {
                RoundResolution::Crash => stake.close_lost(),
                RoundResolution::Payout(multiplier) => stake.close_won(multiplier),
            }
        }
    }

    /// Worst-case payout if the round ended this tick: locked winnings plus
    /// every open stake cashed out at the current multiplier.
    pub fn projected_liability(&self, current_multiplier: f64) -> f64 {
        self.stakes
            .values()
            .map(|s| match (s.status, s.won) {
                (StakeStatus::Open, _) => s.amount * current_multiplier,
                (StakeStatus::Closed, true) => s.profit,
                (StakeStatus::Closed, false) => 0.0,
            })
            .sum()
    }

    /// Sum of all stake amounts.
    pub fn pool_size(&self) -> f64 {
        self.stakes.values().map(|s| s.amount).sum()
    }

    /// Net profit across all players; the house result is its negation.
    pub fn player_profit_total(&self) -> f64 {
        self.stakes.values().map(|s| s.profit).sum()
    }

    /// Winning stakes and their locked multipliers, keyed by address — the
    /// shape the payout rail consumes.
    pub fn winning_payouts(&self) -> HashMap<Address, f64> {
        self.stakes
            .values()
            .filter(|s| s.status == StakeStatus::Closed && s.won)
            .filter_map(|s| s.multiplier.map(|m| (s.address.clone(), m)))
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.stakes.is_empty()
    }

    pub fn len(&self) -> usize {
        self.stakes.len()
    }

    /// Point-in-time copy of every stake, oldest placement first.
    pub fn stakes(&self) -> Vec<Stake> {
        let mut all: Vec<Stake> = self.stakes.values().cloned().collect();
        all.sort_by_key(|s| s.placed_at);
        all
    }
}
