//! Round engine façade.
//!
//! Owns the live round, ledger, and clock behind a single-writer lock and
//! drives the Betting → Running → Settling machine. All mutating entry
//! points serialize through the write side; snapshots are point-in-time
//! clones served from the read side. The lock is never held across an
//! await: settlement copies the finished round out, does its I/O lock-free,
//! and reacquires the lock only to install the next round.

use crate::clock::RoundClock;
use crate::config::EngineConfig;
use crate::errors::{EngineError, EngineResult};
use crate::fairness::{Derivation, FairnessChain};
use crate::ledger::BetLedger;
use crate::providers::{BankrollProvider, PayoutGateway, PersistenceStore};
use crate::risk::RiskGovernor;
use crate::round::{cents_to_multiplier, Round, RoundResolution, RoundState, Stake, TICK_FINISHED};
use crate::settlement::SettlementOrchestrator;
use chrono::{Duration as ChronoDuration, Utc};
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tracing::{error, info, warn};

/// Crash multipliers retained for the snapshot history strip.
const RECENT_MULTIPLIER_WINDOW: usize = 30;

/// Pause before the single persistence retry.
const PERSIST_RETRY_DELAY: Duration = Duration::from_millis(500);

/// Outcome of one tick, telling the scheduling loop what to do next.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum TickOutcome {
    /// Curve advanced; sleep `next_delay` before the next tick.
    Advanced { multiplier: f64, next_delay: Duration },
    /// The round terminated this tick; drive settlement next.
    Crashed { multiplier: f64 },
}

/// Point-in-time public view of the engine, serialized by adapters.
#[derive(Clone, Debug, Serialize)]
pub struct RoundSnapshot {
    pub round_id: u64,
    pub state: RoundState,
    pub current_multiplier: f64,
    /// Whole seconds left in the betting window; 0 outside Betting.
    pub countdown_secs: i64,
    pub pool_size: f64,
    pub stakes: Vec<Stake>,
    pub risk_tripped: bool,
    pub target_redrawn: bool,
    /// Crash multipliers of the most recent settled rounds, oldest first.
    pub recent_multipliers: Vec<f64>,
}

/// Totals of a settled round, returned once settlement confirms.
#[derive(Clone, Debug)]
pub struct SettledRound {
    pub round_id: u64,
    pub commitment_hash: String,
    pub crash_multiplier: f64,
    pub pool_size: f64,
    pub house_profit: f64,
    pub house_balance_after: f64,
    pub payout_tx: Option<String>,
}

struct EngineInner {
    round: Round,
    ledger: BetLedger,
    clock: RoundClock,
    recent_multipliers: VecDeque<f64>,
}

pub struct RoundEngine {
    inner: RwLock<EngineInner>,
    fairness: FairnessChain,
    risk: RiskGovernor,
    settlement: SettlementOrchestrator,
    store: Arc<dyn PersistenceStore>,
    bankroll: Arc<dyn BankrollProvider>,
    config: EngineConfig,
}

impl RoundEngine {
    /// Bootstrap the engine: chain from the last persisted round, or from
    /// the configured genesis when no history exists.
    pub async fn new(
        config: EngineConfig,
        store: Arc<dyn PersistenceStore>,
        bankroll: Arc<dyn BankrollProvider>,
        gateway: Arc<dyn PayoutGateway>,
    ) -> EngineResult<Self> {
        config.validate()?;

        let fairness = FairnessChain::new(config.fairness.max_multiplier);
        let risk = RiskGovernor::new(&config.risk);
        let settlement = SettlementOrchestrator::new(gateway, config.settlement.clone());

        let seed = store
            .last_round_hash()
            .await?
            .unwrap_or_else(|| config.genesis_hash.clone());
        let id = match store.last_round_id().await? {
            Some(last) => last + 1,
            None => 0,
        };
        let balance = match bankroll.current_balance().await {
            Ok(balance) => balance,
            Err(e) => {
                warn!(error = %e, "bankroll provider unavailable at boot, using persisted balance");
                store
                    .last_house_balance()
                    .await?
                    .unwrap_or(config.starting_bankroll)
            }
        };

        let derivation = fairness.derive(&seed);
        let round = Self::open_round(&config, id, &derivation, balance);
        let clock = RoundClock::new(round.target_cents, config.clock.clone());
        info!(round_id = round.id, "round open for betting");

        Ok(Self {
            inner: RwLock::new(EngineInner {
                round,
                ledger: BetLedger::new(),
                clock,
                recent_multipliers: VecDeque::with_capacity(RECENT_MULTIPLIER_WINDOW),
            }),
            fairness,
            risk,
            settlement,
            store,
            bankroll,
            config,
        })
    }

    fn open_round(config: &EngineConfig, id: u64, derivation: &Derivation, balance: f64) -> Round {
        if derivation.clamped {
            warn!(round_id = id, ceiling = config.fairness.max_multiplier,
                "derived target above ceiling, clamped");
        }
        if derivation.instant_crash {
            info!(round_id = id, "chain derived an instant crash");
        }
        Round::open(
            id,
            derivation.commitment_hash.clone(),
            derivation.multiplier_cents,
            ChronoDuration::seconds(config.clock.betting_window_secs as i64),
            balance,
        )
    }

    /// Record a stake for the active betting window.
    pub fn place_bet(&self, address: &str, amount: f64) -> EngineResult<()> {
        let mut inner = self.inner.write().unwrap();
        if inner.round.state != RoundState::Betting {
            return Err(EngineError::InvalidStateTransition {
                operation: "place_bet",
                state: inner.round.state,
            });
        }
        if !(amount >= self.config.min_bet && amount <= self.config.max_bet) {
            return Err(EngineError::BetAmountOutOfRange {
                amount,
                min: self.config.min_bet,
                max: self.config.max_bet,
            });
        }
        inner.ledger.place(address, amount);
        inner.round.pool_size = inner.ledger.pool_size();
        info!(round_id = inner.round.id, address, amount, pool = inner.round.pool_size,
            "stake placed");
        Ok(())
    }

    /// Lock the caller's stake at the multiplier of this instant.
    pub fn cashout(&self, address: &str) -> EngineResult<Stake> {
        let mut inner = self.inner.write().unwrap();
        if inner.round.state != RoundState::Running {
            return Err(EngineError::InvalidStateTransition {
                operation: "cashout",
                state: inner.round.state,
            });
        }
        let multiplier = inner.round.current_multiplier();
        let stake = inner.ledger.cashout(address, multiplier)?;
        info!(round_id = inner.round.id, address, multiplier, profit = stake.profit,
            "cashout locked");
        Ok(stake)
    }

    /// Close the betting window: deadline fire or operator "start now". The
    /// no-bet redraw is evaluated here, exactly once per round.
    pub fn begin_running(&self) -> EngineResult<()> {
        let mut inner = self.inner.write().unwrap();
        if inner.round.state != RoundState::Betting {
            return Err(EngineError::InvalidStateTransition {
                operation: "begin_running",
                state: inner.round.state,
            });
        }

        if self
            .risk
            .should_redraw_target(inner.round.target_cents, inner.ledger.is_empty())
        {
            let fresh = self.risk.redraw_target(&mut rand::thread_rng());
            warn!(round_id = inner.round.id,
                chain_target = cents_to_multiplier(inner.round.target_cents),
                fresh_target = cents_to_multiplier(fresh),
                "no stakes against an extreme target, redrawing curve");
            inner.round.target_cents = fresh;
            inner.round.target_redrawn = true;
            inner.clock = RoundClock::new(fresh, self.config.clock.clone());
        }

        inner.round.state = RoundState::Running;
        info!(round_id = inner.round.id, stakes = inner.ledger.len(),
            "betting closed, round running");
        Ok(())
    }

    /// Advance the multiplier curve one sample. Invoked by the scheduling
    /// loop at the delay the previous tick reported.
    pub fn advance_tick(&self) -> EngineResult<TickOutcome> {
        let mut inner = self.inner.write().unwrap();
        if inner.round.state != RoundState::Running {
            return Err(EngineError::InvalidStateTransition {
                operation: "advance_tick",
                state: inner.round.state,
            });
        }

        match inner.clock.next_tick() {
            Some(cents) => {
                inner.round.tick_index += 1;
                inner.round.current_cents = cents;
                let multiplier = cents_to_multiplier(cents);
                let liability = inner.ledger.projected_liability(multiplier);
                if self.risk.should_force_crash(
                    liability,
                    inner.round.house_balance_before,
                    inner.round.pool_size,
                ) {
                    inner.round.risk_tripped = true;
                    warn!(round_id = inner.round.id, multiplier, liability,
                        "risk limit tripped, forcing crash");
                    Self::terminate(&mut inner);
                    Ok(TickOutcome::Crashed { multiplier })
                } else {
                    let next_delay = inner.clock.delay_for(cents);
                    Ok(TickOutcome::Advanced {
                        multiplier,
                        next_delay,
                    })
                }
            }
            None => {
                // Curve exhausted: the target itself is the crash value.
                let multiplier = inner.round.current_multiplier();
                Self::terminate(&mut inner);
                Ok(TickOutcome::Crashed { multiplier })
            }
        }
    }

    /// Operator override; behaves exactly like a risk-governor trip.
    pub fn crash_now(&self) -> EngineResult<f64> {
        let mut inner = self.inner.write().unwrap();
        if inner.round.state != RoundState::Running {
            return Err(EngineError::InvalidStateTransition {
                operation: "crash_now",
                state: inner.round.state,
            });
        }
        let multiplier = inner.round.current_multiplier();
        inner.round.risk_tripped = true;
        warn!(round_id = inner.round.id, multiplier, "operator forced crash");
        Self::terminate(&mut inner);
        Ok(multiplier)
    }

    /// Terminal transition: abandon the curve, settle the open remainder of
    /// the ledger as losses, and enter Settling.
    fn terminate(inner: &mut EngineInner) {
        inner.clock.abandon();
        inner.round.tick_index = TICK_FINISHED;
        inner.round.state = RoundState::Settling;
        inner.ledger.force_settle_remaining(RoundResolution::Crash);
        info!(round_id = inner.round.id,
            multiplier = inner.round.current_multiplier(),
            "round crashed");
    }

    /// Consistent point-in-time view; concurrent with mutating calls.
    pub fn snapshot(&self) -> RoundSnapshot {
        let inner = self.inner.read().unwrap();
        let countdown_secs = if inner.round.state == RoundState::Betting {
            (inner.round.betting_deadline - Utc::now()).num_seconds().max(0)
        } else {
            0
        };
        RoundSnapshot {
            round_id: inner.round.id,
            state: inner.round.state,
            current_multiplier: inner.round.current_multiplier(),
            countdown_secs,
            pool_size: inner.round.pool_size,
            stakes: inner.ledger.stakes(),
            risk_tripped: inner.round.risk_tripped,
            target_redrawn: inner.round.target_redrawn,
            recent_multipliers: inner.recent_multipliers.iter().copied().collect(),
        }
    }

    /// Drive settlement for the crashed round, persist its history, and
    /// install the next round chained from its commitment hash. Betting
    /// stays closed until this completes; an error leaves the round in
    /// Settling for the caller to retry.
    pub async fn settle_and_reset(&self) -> EngineResult<SettledRound> {
        let (mut finished, ledger) = {
            let inner = self.inner.read().unwrap();
            if inner.round.state != RoundState::Settling {
                return Err(EngineError::InvalidStateTransition {
                    operation: "settle_and_reset",
                    state: inner.round.state,
                });
            }
            (inner.round.clone(), inner.ledger.clone())
        };

        let payouts = SettlementOrchestrator::compute_payouts(&ledger);
        let payout_tx = if payouts.is_empty() {
            info!(round_id = finished.id, "no winning stakes, skipping payout submission");
            None
        } else {
            Some(self.settlement.settle(&payouts).await?.tx_ref)
        };

        finished.house_profit = -ledger.player_profit_total();
        let balance_after = finished.house_balance_before + finished.house_profit;
        finished.house_balance_after = Some(balance_after);
        finished.payout_tx = payout_tx.clone();
        finished.settled_at = Some(Utc::now());

        self.persist_with_retry(&finished, &ledger).await?;

        let next_balance = self.fetch_house_balance(balance_after).await;
        let derivation = self.fairness.derive(&finished.commitment_hash);
        let next = Self::open_round(&self.config, finished.id + 1, &derivation, next_balance);
        let crash_multiplier = finished.current_multiplier();

        {
            let mut inner = self.inner.write().unwrap();
            inner.recent_multipliers.push_back(crash_multiplier);
            if inner.recent_multipliers.len() > RECENT_MULTIPLIER_WINDOW {
                inner.recent_multipliers.pop_front();
            }
            inner.clock = RoundClock::new(next.target_cents, self.config.clock.clone());
            inner.ledger = BetLedger::new();
            info!(round_id = next.id, "round open for betting");
            inner.round = next;
        }

        Ok(SettledRound {
            round_id: finished.id,
            commitment_hash: finished.commitment_hash,
            crash_multiplier,
            pool_size: finished.pool_size,
            house_profit: finished.house_profit,
            house_balance_after: balance_after,
            payout_tx,
        })
    }

    /// History writes with one delayed retry; a second failure escalates so
    /// the round is never silently lost.
    async fn persist_with_retry(&self, round: &Round, ledger: &BetLedger) -> EngineResult<()> {
        let stakes = ledger.stakes();
        match self.try_persist(round, &stakes).await {
            Ok(()) => Ok(()),
            Err(first) => {
                warn!(round_id = round.id, error = %first, "history write failed, retrying");
                tokio::time::sleep(PERSIST_RETRY_DELAY).await;
                self.try_persist(round, &stakes).await.map_err(|retry| {
                    error!(round_id = round.id, error = %retry,
                        "history write failed after retry; operator action required");
                    EngineError::PersistenceUnavailable(retry.to_string())
                })
            }
        }
    }

    async fn try_persist(&self, round: &Round, stakes: &[Stake]) -> EngineResult<()> {
        self.store.save_round(round).await?;
        self.store.save_stakes(&round.commitment_hash, stakes).await
    }

    /// Authoritative balance for the next round, degrading to the persisted
    /// (or carried) value when the provider is unreachable.
    async fn fetch_house_balance(&self, last_known: f64) -> f64 {
        match self.bankroll.current_balance().await {
            Ok(balance) => balance,
            Err(e) => {
                warn!(error = %e, "bankroll provider unavailable, using last-known balance");
                match self.store.last_house_balance().await {
                    Ok(Some(balance)) => balance,
                    _ => last_known,
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::{MemoryBankroll, MemoryPayoutGateway, MemoryStore};

    fn fast_config() -> EngineConfig {
        let mut config = EngineConfig::default();
        config.settlement.grace_period_ms = 1;
        config.settlement.poll_interval_ms = 1;
        config
    }

    async fn engine_with(config: EngineConfig) -> Arc<RoundEngine> {
        let store = Arc::new(MemoryStore::new());
        let bankroll = Arc::new(MemoryBankroll::new(config.starting_bankroll));
        let gateway = Arc::new(MemoryPayoutGateway::new());
        Arc::new(
            RoundEngine::new(config, store, bankroll, gateway)
                .await
                .unwrap(),
        )
    }

    /// Genesis seed whose first derived target lands in the given cent range.
    fn genesis_in_range(config: &EngineConfig, min_cents: u64, max_cents: u64) -> String {
        let chain = FairnessChain::new(config.fairness.max_multiplier);
        (0..20_000u32)
            .map(|i| format!("{:064x}", i))
            .find(|seed| {
                let d = chain.derive(seed);
                !d.instant_crash && d.multiplier_cents >= min_cents && d.multiplier_cents <= max_cents
            })
            .expect("no seed in range within search budget")
    }

    #[tokio::test]
    async fn mutating_calls_are_state_guarded() {
        let engine = engine_with(fast_config()).await;

        // Betting: cashout, ticks, and crash_now are rejected.
        assert!(matches!(
            engine.cashout("erd1alice"),
            Err(EngineError::InvalidStateTransition { operation: "cashout", .. })
        ));
        assert!(engine.advance_tick().is_err());
        assert!(engine.crash_now().is_err());
        assert!(engine.settle_and_reset().await.is_err());

        engine.begin_running().unwrap();

        // Running: bets and a second begin_running are rejected.
        assert!(matches!(
            engine.place_bet("erd1alice", 1.0),
            Err(EngineError::InvalidStateTransition { operation: "place_bet", .. })
        ));
        assert!(engine.begin_running().is_err());
    }

    #[tokio::test]
    async fn bet_amounts_are_range_checked() {
        let engine = engine_with(fast_config()).await;
        assert!(matches!(
            engine.place_bet("erd1alice", 0.0),
            Err(EngineError::BetAmountOutOfRange { .. })
        ));
        assert!(matches!(
            engine.place_bet("erd1alice", 1_000_000.0),
            Err(EngineError::BetAmountOutOfRange { .. })
        ));
        assert!(engine.place_bet("erd1alice", 1.0).is_ok());
    }

    #[tokio::test]
    async fn repeat_bets_merge_in_snapshot() {
        let engine = engine_with(fast_config()).await;
        engine.place_bet("erd1alice", 5.0).unwrap();
        engine.place_bet("erd1alice", 5.0).unwrap();

        let snapshot = engine.snapshot();
        assert_eq!(snapshot.stakes.len(), 1);
        assert!((snapshot.stakes[0].amount - 10.0).abs() < f64::EPSILON);
        assert!((snapshot.pool_size - 10.0).abs() < f64::EPSILON);
    }

    #[tokio::test]
    async fn no_bet_redraw_replaces_extreme_target() {
        let mut config = fast_config();
        // Any non-instant target trips the rule; the redraw must land at 1.00x.
        config.risk.no_bet_threshold = 1.0;
        config.risk.redraw_ceiling = 1.0;
        config.genesis_hash = genesis_in_range(&config, 150, 50_000);

        let engine = engine_with(config).await;
        engine.begin_running().unwrap();

        let snapshot = engine.snapshot();
        assert!(snapshot.target_redrawn);

        // The shortened curve crashes at the redrawn 1.00x target.
        loop {
            match engine.advance_tick().unwrap() {
                TickOutcome::Advanced { .. } => continue,
                TickOutcome::Crashed { multiplier } => {
                    assert!((multiplier - 1.0).abs() < f64::EPSILON);
                    break;
                }
            }
        }
    }

    #[tokio::test]
    async fn staked_round_keeps_chain_target() {
        let mut config = fast_config();
        config.risk.no_bet_threshold = 1.0;
        config.risk.redraw_ceiling = 1.0;
        config.genesis_hash = genesis_in_range(&config, 150, 50_000);

        let engine = engine_with(config).await;
        engine.place_bet("erd1alice", 1.0).unwrap();
        engine.begin_running().unwrap();
        assert!(!engine.snapshot().target_redrawn);
    }
}
