//! Typed failure taxonomy for the round engine.
//!
//! Every rejection the engine hands back to a caller is one of these
//! variants; nothing in the engine panics on a bad request or a flaky
//! collaborator. A risk-limit trip is deliberately absent here: it is a
//! policy action, logged and surfaced in the snapshot, not a failure.

use crate::round::RoundState;

/// Root error type for all engine operations.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// A mutating call arrived outside the round state that permits it.
    #[error("{operation} is not permitted while the round is {state}")]
    InvalidStateTransition {
        operation: &'static str,
        state: RoundState,
    },

    /// Cashout lookup miss: the address holds no stake this round.
    #[error("no stake recorded for address {0}")]
    UnknownAddress(String),

    /// Cashout of a stake that already settled.
    #[error("stake for address {0} is already settled")]
    StakeAlreadySettled(String),

    /// Stake amount outside the configured range.
    #[error("bet amount {amount} outside permitted range [{min}, {max}]")]
    BetAmountOutOfRange { amount: f64, min: f64, max: f64 },

    /// Treasury service unreachable; the engine falls back to the
    /// last-persisted balance and keeps running degraded.
    #[error("bankroll provider unavailable: {0}")]
    BankrollProviderUnavailable(String),

    /// History write failed even after the retry attempt.
    #[error("persistence unavailable: {0}")]
    PersistenceUnavailable(String),

    /// The payout gateway rejected a submission.
    #[error("payout submission failed: {0}")]
    PayoutSubmissionFailed(String),

    /// Confirmation polling exhausted its attempt budget.
    #[error("payout unconfirmed after {attempts} attempts: {reason}")]
    PayoutConfirmationFailed { attempts: u32, reason: String },

    /// Invalid configuration detected at startup.
    #[error("invalid configuration: {0}")]
    Configuration(String),
}

/// Convenience alias used throughout the crate.
pub type EngineResult<T> = Result<T, EngineError>;
