//! Cooperative scheduling loop driving the engine.
//!
//! One task owns every source of autonomous progress: the betting-window
//! deadline, the tick cadence at the delay the clock last reported, and the
//! settlement drive. Nothing else mutates the engine in the background.
//! Shutdown is a broadcast selected against every sleep.

use crate::engine::{RoundEngine, TickOutcome};
use crate::round::RoundState;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Pause before re-driving settlement after an escalated failure. The payout
/// is never abandoned; the loop keeps alerting and retrying until an
/// operator intervenes or the collaborator recovers.
const SETTLEMENT_RETRY_DELAY: Duration = Duration::from_secs(5);

pub struct EngineRunner {
    shutdown: broadcast::Sender<()>,
    handle: JoinHandle<()>,
}

impl EngineRunner {
    pub fn spawn(engine: Arc<RoundEngine>) -> Self {
        let (shutdown, rx) = broadcast::channel(1);
        let handle = tokio::spawn(run_loop(engine, rx));
        Self { shutdown, handle }
    }

    pub fn stop(&self) {
        let _ = self.shutdown.send(());
    }

    pub async fn join(self) {
        let _ = self.handle.await;
    }
}

async fn run_loop(engine: Arc<RoundEngine>, mut shutdown: broadcast::Receiver<()>) {
    loop {
        let snapshot = engine.snapshot();
        match snapshot.state {
            RoundState::Betting => {
                let wait = Duration::from_secs(snapshot.countdown_secs.max(0) as u64);
                tokio::select! {
                    _ = shutdown.recv() => break,
                    _ = tokio::time::sleep(wait) => {}
                }
                // A rejected transition means an operator already started
                // the round; the deadline arm is superseded.
                if let Err(e) = engine.begin_running() {
                    debug!(error = %e, "deadline fired on a round no longer betting");
                }
            }
            RoundState::Running => match engine.advance_tick() {
                Ok(TickOutcome::Advanced { next_delay, .. }) => {
                    tokio::select! {
                        _ = shutdown.recv() => break,
                        _ = tokio::time::sleep(next_delay) => {}
                    }
                }
                Ok(TickOutcome::Crashed { multiplier }) => {
                    debug!(multiplier, "terminal tick applied");
                }
                Err(e) => {
                    // Lost a race with crash_now; re-read state next pass.
                    warn!(error = %e, "tick rejected");
                }
            },
            RoundState::Settling => match engine.settle_and_reset().await {
                Ok(settled) => {
                    info!(
                        round_id = settled.round_id,
                        multiplier = settled.crash_multiplier,
                        pool = settled.pool_size,
                        house_profit = settled.house_profit,
                        "round settled"
                    );
                }
                Err(e) => {
                    error!(error = %e, "settlement failed; retrying until it confirms");
                    tokio::select! {
                        _ = shutdown.recv() => break,
                        _ = tokio::time::sleep(SETTLEMENT_RETRY_DELAY) => {}
                    }
                }
            },
        }
    }
    info!("engine runner stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use crate::providers::{MemoryBankroll, MemoryPayoutGateway, MemoryStore};

    #[tokio::test]
    async fn runner_drives_full_rounds_unattended() {
        let mut config = EngineConfig::default();
        config.clock.betting_window_secs = 0;
        config.clock.slow_tick_ms = 1;
        config.clock.medium_tick_ms = 1;
        config.clock.fast_tick_ms = 1;
        config.settlement.grace_period_ms = 1;
        config.settlement.poll_interval_ms = 1;
        // Keep unattended rounds short.
        config.risk.no_bet_threshold = 1.0;
        config.risk.redraw_ceiling = 1.0;

        let store = Arc::new(MemoryStore::new());
        let bankroll = Arc::new(MemoryBankroll::new(config.starting_bankroll));
        let gateway = Arc::new(MemoryPayoutGateway::new());
        let engine = Arc::new(
            RoundEngine::new(config, store.clone(), bankroll, gateway)
                .await
                .unwrap(),
        );

        let runner = EngineRunner::spawn(engine.clone());
        tokio::time::sleep(Duration::from_millis(300)).await;
        runner.stop();
        runner.join().await;

        // Several bet-free rounds settled and were persisted in order.
        let rounds = store.rounds();
        assert!(rounds.len() >= 2, "only {} rounds settled", rounds.len());
        for (i, round) in rounds.iter().enumerate() {
            assert_eq!(round.id, i as u64);
            assert!(round.settled_at.is_some());
        }
    }
}
