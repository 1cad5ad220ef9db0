//! Round and stake records.
//!
//! Fixed-shape types with explicit transition methods. A stake moves
//! Open→Closed exactly once, and only through [`Stake::close_won`] /
//! [`Stake::close_lost`]; round state moves Betting→Running→Settling under
//! the engine's lock. Nothing patches fields free-form.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// Opaque wallet identifier, exactly as the transport layer presents it.
pub type Address = String;

/// Tick index sentinel marking a finished round.
pub const TICK_FINISHED: i64 = -1;

/// Multiplier values are carried as integer cents (1.00x == 100) so the
/// curve stays exact; converted to `f64` only at the API edge.
pub fn cents_to_multiplier(cents: u64) -> f64 {
    cents as f64 / 100.0
}

/// Lifecycle of the single active round.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum RoundState {
    Betting,
    Running,
    Settling,
}

impl std::fmt::Display for RoundState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RoundState::Betting => write!(f, "betting"),
            RoundState::Running => write!(f, "running"),
            RoundState::Settling => write!(f, "settling"),
        }
    }
}

/// Settlement state of a single stake.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum StakeStatus {
    Open,
    Closed,
}

/// One player's position in the active round.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Stake {
    pub address: Address,
    pub amount: f64,
    pub placed_at: DateTime<Utc>,
    pub status: StakeStatus,
    pub won: bool,
    /// Locked-in multiplier, present only once the stake is Closed as a win.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub multiplier: Option<f64>,
    pub profit: f64,
}

impl Stake {
    /// Fresh open stake at the moment of placement.
    pub fn open(address: &str, amount: f64, placed_at: DateTime<Utc>) -> Self {
        Self {
            address: address.to_string(),
            amount,
            placed_at,
            status: StakeStatus::Open,
            won: false,
            multiplier: None,
            profit: 0.0,
        }
    }

    /// Re-stake by the same address: amounts sum, the original placement
    /// timestamp is kept.
    pub fn merge(&mut self, amount: f64) {
        self.amount += amount;
    }

    pub fn is_open(&self) -> bool {
        self.status == StakeStatus::Open
    }

    /// Close as a win at `multiplier`; profit excludes the returned stake.
    pub(crate) fn close_won(&mut self, multiplier: f64) {
        self.status = StakeStatus::Closed;
        self.won = true;
        self.multiplier = Some(multiplier);
        self.profit = self.amount * (multiplier - 1.0);
    }

    /// Close as a loss: the whole stake is forfeit.
    pub(crate) fn close_lost(&mut self) {
        self.status = StakeStatus::Closed;
        self.won = false;
        self.multiplier = None;
        self.profit = -self.amount;
    }
}

/// How the still-open remainder of the ledger resolves at round end.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum RoundResolution {
    /// The round crashed: open stakes are forfeit.
    Crash,
    /// Open stakes are paid out at the carried multiplier.
    Payout(f64),
}

/// The single active round, exclusively owned by the engine.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Round {
    pub id: u64,
    /// HMAC-SHA256 digest committing to this round's outcome; also the
    /// derivation seed for the next round.
    pub commitment_hash: String,
    /// Chain-derived crash target, in multiplier cents. Secret while the
    /// round is live; recomputable by anyone once the hash is published.
    pub target_cents: u64,
    pub state: RoundState,
    pub betting_deadline: DateTime<Utc>,
    /// Ticks applied so far; [`TICK_FINISHED`] once the round has crashed.
    pub tick_index: i64,
    pub current_cents: u64,
    /// Sum of all stakes in the ledger.
    pub pool_size: f64,
    pub house_balance_before: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub house_balance_after: Option<f64>,
    pub house_profit: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payout_tx: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub settled_at: Option<DateTime<Utc>>,
    /// The no-bet redraw replaced the chain-derived target this round.
    pub target_redrawn: bool,
    /// The risk governor (or an operator) forced the crash.
    pub risk_tripped: bool,
}

impl Round {
    /// Open a fresh round in the Betting state.
    pub fn open(
        id: u64,
        commitment_hash: String,
        target_cents: u64,
        betting_window: Duration,
        house_balance_before: f64,
    ) -> Self {
        Self {
            id,
            commitment_hash,
            target_cents,
            state: RoundState::Betting,
            betting_deadline: Utc::now() + betting_window,
            tick_index: 0,
            current_cents: 100,
            pool_size: 0.0,
            house_balance_before,
            house_balance_after: None,
            house_profit: 0.0,
            payout_tx: None,
            settled_at: None,
            target_redrawn: false,
            risk_tripped: false,
        }
    }

    pub fn current_multiplier(&self) -> f64 {
        cents_to_multiplier(self.current_cents)
    }

    pub fn is_finished(&self) -> bool {
        self.tick_index == TICK_FINISHED
    }
}
