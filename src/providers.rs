//! External collaborator seams and in-memory reference implementations.
//!
//! Production deployments implement these traits over their storage engine,
//! payout rail, and treasury service; the in-memory versions back the test
//! suite and the demo binary. The gateway stub supports scripted failures so
//! the confirmation retry loop can be exercised deterministically.

use crate::errors::{EngineError, EngineResult};
use crate::round::{Address, Round, Stake};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::RwLock;

/// Status of a submitted payout transaction as the rail reports it.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum PayoutStatus {
    Pending,
    Success,
    Failed,
}

/// Append-only round history and bootstrap seed values.
#[async_trait]
pub trait PersistenceStore: Send + Sync {
    /// Commitment hash of the most recently settled round, if any.
    async fn last_round_hash(&self) -> EngineResult<Option<String>>;

    /// Identifier of the most recently settled round, if any.
    async fn last_round_id(&self) -> EngineResult<Option<u64>>;

    /// House balance after the most recently settled round, if any.
    async fn last_house_balance(&self) -> EngineResult<Option<f64>>;

    async fn save_round(&self, round: &Round) -> EngineResult<()>;

    async fn save_stakes(&self, round_hash: &str, stakes: &[Stake]) -> EngineResult<()>;
}

/// The blockchain/payment rail abstraction.
#[async_trait]
pub trait PayoutGateway: Send + Sync {
    /// Submit a payout map (address → locked multiplier); returns the rail's
    /// transaction reference.
    async fn submit(&self, payouts: &HashMap<Address, f64>) -> EngineResult<String>;

    async fn poll_status(&self, tx_ref: &str) -> EngineResult<PayoutStatus>;
}

/// Authoritative external house balance.
#[async_trait]
pub trait BankrollProvider: Send + Sync {
    async fn current_balance(&self) -> EngineResult<f64>;
}

/// Round history kept in memory.
#[derive(Default)]
pub struct MemoryStore {
    rounds: RwLock<Vec<Round>>,
    stakes: RwLock<HashMap<String, Vec<Stake>>>,
    fail_next_saves: AtomicU32,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Script the next `n` save calls to fail, for retry tests.
    pub fn fail_next_saves(&self, n: u32) {
        self.fail_next_saves.store(n, Ordering::SeqCst);
    }

    pub fn rounds(&self) -> Vec<Round> {
        self.rounds.read().unwrap().clone()
    }

    pub fn stakes_for(&self, round_hash: &str) -> Vec<Stake> {
        self.stakes
            .read()
            .unwrap()
            .get(round_hash)
            .cloned()
            .unwrap_or_default()
    }

    fn check_scripted_failure(&self) -> EngineResult<()> {
        let remaining = self.fail_next_saves.load(Ordering::SeqCst);
        if remaining > 0 {
            self.fail_next_saves.store(remaining - 1, Ordering::SeqCst);
            return Err(EngineError::PersistenceUnavailable(
                "scripted store outage".to_string(),
            ));
        }
        Ok(())
    }
}

#[async_trait]
impl PersistenceStore for MemoryStore {
    async fn last_round_hash(&self) -> EngineResult<Option<String>> {
        Ok(self
            .rounds
            .read()
            .unwrap()
            .last()
            .map(|r| r.commitment_hash.clone()))
    }

    async fn last_round_id(&self) -> EngineResult<Option<u64>> {
        Ok(self.rounds.read().unwrap().last().map(|r| r.id))
    }

    async fn last_house_balance(&self) -> EngineResult<Option<f64>> {
        Ok(self
            .rounds
            .read()
            .unwrap()
            .last()
            .and_then(|r| r.house_balance_after))
    }

    async fn save_round(&self, round: &Round) -> EngineResult<()> {
        self.check_scripted_failure()?;
        self.rounds.write().unwrap().push(round.clone());
        Ok(())
    }

    async fn save_stakes(&self, round_hash: &str, stakes: &[Stake]) -> EngineResult<()> {
        self.check_scripted_failure()?;
        self.stakes
            .write()
            .unwrap()
            .insert(round_hash.to_string(), stakes.to_vec());
        Ok(())
    }
}

/// Payout rail stub with scriptable submit and poll behavior.
#[derive(Default)]
pub struct MemoryPayoutGateway {
    submissions: RwLock<Vec<HashMap<Address, f64>>>,
    counter: AtomicU64,
    fail_next_submits: AtomicU32,
    fail_next_polls: AtomicU32,
    pending_polls: AtomicU32,
}

impl MemoryPayoutGateway {
    pub fn new() -> Self {
        Self::default()
    }

    /// Script the next `n` submissions to be rejected.
    pub fn fail_next_submits(&self, n: u32) {
        self.fail_next_submits.store(n, Ordering::SeqCst);
    }

    /// Script the next `n` status polls to report `Failed`.
    pub fn fail_next_polls(&self, n: u32) {
        self.fail_next_polls.store(n, Ordering::SeqCst);
    }

    /// Script the next `n` status polls to report `Pending`.
    pub fn pending_polls(&self, n: u32) {
        self.pending_polls.store(n, Ordering::SeqCst);
    }

    /// Every payout map submitted so far, in order.
    pub fn submissions(&self) -> Vec<HashMap<Address, f64>> {
        self.submissions.read().unwrap().clone()
    }

    fn take_scripted(counter: &AtomicU32) -> bool {
        let remaining = counter.load(Ordering::SeqCst);
        if remaining > 0 {
            counter.store(remaining - 1, Ordering::SeqCst);
            return true;
        }
        false
    }
}

#[async_trait]
impl PayoutGateway for MemoryPayoutGateway {
    async fn submit(&self, payouts: &HashMap<Address, f64>) -> EngineResult<String> {
        if Self::take_scripted(&self.fail_next_submits) {
            return Err(EngineError::PayoutSubmissionFailed(
                "scripted gateway rejection".to_string(),
            ));
        }
        self.submissions.write().unwrap().push(payouts.clone());
        let id = self.counter.fetch_add(1, Ordering::SeqCst);
        Ok(format!("payout-{}", id))
    }

    async fn poll_status(&self, _tx_ref: &str) -> EngineResult<PayoutStatus> {
        if Self::take_scripted(&self.pending_polls) {
            return Ok(PayoutStatus::Pending);
        }
        if Self::take_scripted(&self.fail_next_polls) {
            return Ok(PayoutStatus::Failed);
        }
        Ok(PayoutStatus::Success)
    }
}

/// Fixed treasury with a scriptable outage.
pub struct MemoryBankroll {
    balance: RwLock<f64>,
    fail_next_reads: AtomicU32,
}

impl MemoryBankroll {
    pub fn new(balance: f64) -> Self {
        Self {
            balance: RwLock::new(balance),
            fail_next_reads: AtomicU32::new(0),
        }
    }

    pub fn set_balance(&self, balance: f64) {
        *self.balance.write().unwrap() = balance;
    }

    /// Script the next `n` balance reads to fail.
    pub fn fail_next_reads(&self, n: u32) {
        self.fail_next_reads.store(n, Ordering::SeqCst);
    }
}

#[async_trait]
impl BankrollProvider for MemoryBankroll {
    async fn current_balance(&self) -> EngineResult<f64> {
        let remaining = self.fail_next_reads.load(Ordering::SeqCst);
        if remaining > 0 {
            self.fail_next_reads.store(remaining - 1, Ordering::SeqCst);
            return Err(EngineError::BankrollProviderUnavailable(
                "scripted treasury outage".to_string(),
            ));
        }
        Ok(*self.balance.read().unwrap())
    }
}
