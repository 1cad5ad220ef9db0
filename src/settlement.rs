//! Payout settlement orchestration.
//!
//! After a round crashes the orchestrator computes the winning payout map,
//! submits it to the payout rail, and drives the confirmation loop: a fixed
//! grace sleep, then bounded status polling. A `Failed` status triggers
//! resubmission under the same attempt budget; exhausting the budget raises
//! an operator-visible alert and a typed escalation. A payout is never
//! silently dropped.

use crate::config::SettlementConfig;
use crate::errors::{EngineError, EngineResult};
use crate::ledger::BetLedger;
use crate::providers::{PayoutGateway, PayoutStatus};
use crate::round::Address;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

/// Confirmed settlement handed back to the engine.
#[derive(Clone, Debug)]
pub struct Confirmation {
    /// Reference of the transaction that finally confirmed.
    pub tx_ref: String,
    /// Status polls consumed.
    pub attempts: u32,
    /// Times the payout had to be resubmitted after a `Failed` status.
    pub resubmissions: u32,
}

pub struct SettlementOrchestrator {
    gateway: Arc<dyn PayoutGateway>,
    config: SettlementConfig,
}

impl SettlementOrchestrator {
    pub fn new(gateway: Arc<dyn PayoutGateway>, config: SettlementConfig) -> Self {
        Self { gateway, config }
    }

    /// Winning stakes and their locked multipliers; the rail multiplies each
    /// address's escrowed stake by this value.
    pub fn compute_payouts(ledger: &BetLedger) -> HashMap<Address, f64> {
        ledger.winning_payouts()
    }

    pub async fn submit(&self, payouts: &HashMap<Address, f64>) -> EngineResult<String> {
        let tx_ref = self.gateway.submit(payouts).await?;
        info!(%tx_ref, recipients = payouts.len(), "payout transaction submitted");
        Ok(tx_ref)
    }

    /// Poll until the rail confirms, resubmitting on a `Failed` status,
    /// bounded by the configured attempt budget.
    pub async fn await_confirmation(
        &self,
        tx_ref: String,
        payouts: &HashMap<Address, f64>,
    ) -> EngineResult<Confirmation> {
        tokio::time::sleep(Duration::from_millis(self.config.grace_period_ms)).await;

        let mut tx_ref = tx_ref;
        let mut resubmissions = 0;
        let max_attempts = self.config.max_attempts;

        for attempt in 1..=max_attempts {
            match self.gateway.poll_status(&tx_ref).await {
                Ok(PayoutStatus::Success) => {
                    info!(%tx_ref, attempt, resubmissions, "payout confirmed");
                    return Ok(Confirmation {
                        tx_ref,
                        attempts: attempt,
                        resubmissions,
                    });
                }
                Ok(PayoutStatus::Pending) => {}
                Ok(PayoutStatus::Failed) => {
                    warn!(%tx_ref, attempt, "payout failed on the rail, resubmitting");
                    tx_ref = self.submit(payouts).await?;
                    resubmissions += 1;
                }
                Err(e) => {
                    warn!(%tx_ref, attempt, error = %e, "status poll failed");
                }
            }
            if attempt < max_attempts {
                tokio::time::sleep(Duration::from_millis(self.config.poll_interval_ms)).await;
            }
        }

        error!(
            %tx_ref,
            attempts = max_attempts,
            "payout confirmation attempts exhausted; operator action required"
        );
        Err(EngineError::PayoutConfirmationFailed {
            attempts: max_attempts,
            reason: format!("transaction {} unconfirmed", tx_ref),
        })
    }

    /// Submit-and-confirm path the engine drives once per round.
    pub async fn settle(&self, payouts: &HashMap<Address, f64>) -> EngineResult<Confirmation> {
        let tx_ref = self.submit(payouts).await?;
        self.await_confirmation(tx_ref, payouts).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::MemoryPayoutGateway;

    fn fast_config(max_attempts: u32) -> SettlementConfig {
        SettlementConfig {
            grace_period_ms: 1,
            poll_interval_ms: 1,
            max_attempts,
        }
    }

    fn payouts() -> HashMap<Address, f64> {
        let mut map = HashMap::new();
        map.insert("erd1alice".to_string(), 1.5);
        map
    }

    #[tokio::test]
    async fn confirms_on_first_success() {
        let gateway = Arc::new(MemoryPayoutGateway::new());
        let orchestrator = SettlementOrchestrator::new(gateway.clone(), fast_config(5));

        let confirmation = orchestrator.settle(&payouts()).await.unwrap();
        assert_eq!(confirmation.attempts, 1);
        assert_eq!(confirmation.resubmissions, 0);
        assert_eq!(gateway.submissions().len(), 1);
    }

    #[tokio::test]
    async fn waits_out_pending_polls() {
        let gateway = Arc::new(MemoryPayoutGateway::new());
        gateway.pending_polls(3);
        let orchestrator = SettlementOrchestrator::new(gateway.clone(), fast_config(5));

        let confirmation = orchestrator.settle(&payouts()).await.unwrap();
        assert_eq!(confirmation.attempts, 4);
        assert_eq!(confirmation.resubmissions, 0);
    }

    #[tokio::test]
    async fn failed_status_triggers_resubmission() {
        let gateway = Arc::new(MemoryPayoutGateway::new());
        gateway.fail_next_polls(1);
        let orchestrator = SettlementOrchestrator::new(gateway.clone(), fast_config(5));

        let confirmation = orchestrator.settle(&payouts()).await.unwrap();
        assert_eq!(confirmation.resubmissions, 1);
        assert_eq!(gateway.submissions().len(), 2);
        assert_ne!(confirmation.tx_ref, "payout-0");
    }

    #[tokio::test]
    async fn exhausted_budget_escalates() {
        let gateway = Arc::new(MemoryPayoutGateway::new());
        gateway.pending_polls(u32::MAX);
        let orchestrator = SettlementOrchestrator::new(gateway, fast_config(3));

        match orchestrator.settle(&payouts()).await {
            Err(EngineError::PayoutConfirmationFailed { attempts, .. }) => {
                assert_eq!(attempts, 3)
            }
            other => panic!("expected escalation, got {:?}", other.map(|c| c.tx_ref)),
        }
    }

    #[tokio::test]
    async fn rejected_submission_is_typed() {
        let gateway = Arc::new(MemoryPayoutGateway::new());
        gateway.fail_next_submits(1);
        let orchestrator = SettlementOrchestrator::new(gateway, fast_config(3));

        assert!(matches!(
            orchestrator.settle(&payouts()).await,
            Err(EngineError::PayoutSubmissionFailed(_))
        ));
    }
}
