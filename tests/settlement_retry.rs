//! Settlement failure handling: rail resubmission, confirmation exhaustion
//! gating the next round, persistence retry, and bankroll degradation.

use crashpoint::config::EngineConfig;
use crashpoint::engine::{RoundEngine, TickOutcome};
use crashpoint::errors::EngineError;
use crashpoint::fairness::FairnessChain;
use crashpoint::providers::{MemoryBankroll, MemoryPayoutGateway, MemoryStore};
use crashpoint::round::RoundState;
use std::sync::Arc;

struct Harness {
    engine: Arc<RoundEngine>,
    store: Arc<MemoryStore>,
    gateway: Arc<MemoryPayoutGateway>,
    bankroll: Arc<MemoryBankroll>,
}

fn fast_config() -> EngineConfig {
    let mut config = EngineConfig::default();
    config.settlement.grace_period_ms = 1;
    config.settlement.poll_interval_ms = 1;
    config.settlement.max_attempts = 3;
    config
}

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

async fn harness(config: EngineConfig) -> Harness {
    let store = Arc::new(MemoryStore::new());
    let bankroll = Arc::new(MemoryBankroll::new(config.starting_bankroll));
    let gateway = Arc::new(MemoryPayoutGateway::new());
    let engine = Arc::new(
        RoundEngine::new(config, store.clone(), bankroll.clone(), gateway.clone())
            .await
            .unwrap(),
    );
    Harness {
        engine,
        store,
        gateway,
        bankroll,
    }
}

fn run_to_crash(engine: &RoundEngine) -> f64 {
    loop {
        match engine.advance_tick().unwrap() {
            TickOutcome::Advanced { .. } => continue,
            TickOutcome::Crashed { multiplier } => return multiplier,
        }
    }
}

/// Crash a round that has one winning cashout at 1.10x.
fn crash_with_winner(engine: &RoundEngine) {
    engine.place_bet("erd1alice", 10.0).unwrap();
    engine.begin_running().unwrap();
    loop {
        match engine.advance_tick().unwrap() {
            TickOutcome::Advanced { multiplier, .. } => {
                if (multiplier * 100.0).round() as u64 == 110 {
                    break;
                }
            }
            TickOutcome::Crashed { .. } => panic!("crashed below 1.10x"),
        }
    }
    engine.cashout("erd1alice").unwrap();
    run_to_crash(engine);
}

#[tokio::test]
async fn failed_rail_status_resubmits_and_confirms() {
    let mut config = fast_config();
    config.genesis_hash = genesis_in_range(&config, 200, 4_000);
    let h = harness(config).await;

    crash_with_winner(h.engine.as_ref());
    h.gateway.fail_next_polls(1);

    let settled = h.engine.settle_and_reset().await.unwrap();
    assert_eq!(h.gateway.submissions().len(), 2, "one resubmission expected");
    assert_eq!(settled.payout_tx.as_deref(), Some("payout-1"));
    assert_eq!(h.engine.snapshot().state, RoundState::Betting);
}

#[tokio::test]
async fn exhausted_confirmation_keeps_betting_closed() {
    let mut config = fast_config();
    config.genesis_hash = genesis_in_range(&config, 200, 4_000);
    let h = harness(config).await;

    crash_with_winner(h.engine.as_ref());
    h.gateway.pending_polls(u32::MAX);

    match h.engine.settle_and_reset().await {
        Err(EngineError::PayoutConfirmationFailed { attempts, .. }) => assert_eq!(attempts, 3),
        other => panic!("expected escalation, got {:?}", other.map(|s| s.round_id)),
    }

    // The correctness boundary holds: no history, no new bets.
    assert!(h.store.rounds().is_empty());
    assert_eq!(h.engine.snapshot().state, RoundState::Settling);
    assert!(matches!(
        h.engine.place_bet("erd1bob", 5.0),
        Err(EngineError::InvalidStateTransition { .. })
    ));

    // Once the rail recovers, the same settlement drive completes.
    h.gateway.pending_polls(0);
    let settled = h.engine.settle_and_reset().await.unwrap();
    assert!(settled.payout_tx.is_some());
    assert_eq!(h.store.rounds().len(), 1);
    assert_eq!(h.engine.snapshot().state, RoundState::Betting);
}

#[tokio::test]
async fn persistence_outage_is_retried_once() {
    let mut config = fast_config();
    config.genesis_hash = genesis_in_range(&config, 150, 4_000);
    let h = harness(config).await;

    h.engine.begin_running().unwrap();
    run_to_crash(h.engine.as_ref());

    h.store.fail_next_saves(1);
    let settled = h.engine.settle_and_reset().await.unwrap();
    assert_eq!(h.store.rounds().len(), 1);
    assert_eq!(settled.round_id, 0);
}

#[tokio::test]
async fn persistent_outage_escalates_without_losing_the_round() {
    let mut config = fast_config();
    config.genesis_hash = genesis_in_range(&config, 150, 4_000);
    let h = harness(config).await;

    h.engine.begin_running().unwrap();
    run_to_crash(h.engine.as_ref());

    h.store.fail_next_saves(2);
    assert!(matches!(
        h.engine.settle_and_reset().await,
        Err(EngineError::PersistenceUnavailable(_))
    ));
    assert_eq!(h.engine.snapshot().state, RoundState::Settling);
    assert!(h.store.rounds().is_empty());

    // Store recovers; the retry writes history exactly once.
    let settled = h.engine.settle_and_reset().await.unwrap();
    assert_eq!(h.store.rounds().len(), 1);
    assert_eq!(h.store.rounds()[0].id, settled.round_id);
    assert_eq!(h.engine.snapshot().state, RoundState::Betting);
}

#[tokio::test]
async fn bankroll_outage_degrades_to_persisted_balance() {
    let mut config = fast_config();
    config.risk.no_bet_threshold = 1.0;
    config.risk.redraw_ceiling = 1.0;
    let h = harness(config).await;

    // Round 0: provider down at reseed time; the engine carries on with the
    // just-persisted balance.
    h.engine.begin_running().unwrap();
    run_to_crash(h.engine.as_ref());
    h.bankroll.set_balance(777.0);
    h.bankroll.fail_next_reads(1);
    let first = h.engine.settle_and_reset().await.unwrap();

    // Round 1 inherits the persisted balance, not the unread 777.
    h.engine.begin_running().unwrap();
    run_to_crash(h.engine.as_ref());
    h.bankroll.fail_next_reads(1);
    let second = h.engine.settle_and_reset().await.unwrap();
    assert_eq!(second.house_balance_after, first.house_balance_after);

    // With the provider healthy again, its balance seeds the round after
    // this settlement, and shows up in that round's totals.
    h.engine.begin_running().unwrap();
    run_to_crash(h.engine.as_ref());
    h.engine.settle_and_reset().await.unwrap();

    h.engine.begin_running().unwrap();
    run_to_crash(h.engine.as_ref());
    let fourth = h.engine.settle_and_reset().await.unwrap();
    assert_eq!(fourth.house_balance_after, 777.0);
}
