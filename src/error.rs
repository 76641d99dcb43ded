use std::time::Duration;

use thiserror::Error;

/// User-visible failure taxonomy of the retrieval flow.
///
/// Every variant maps to exactly one message on the session; nothing in
/// the flow is retried automatically, so recovery is always a fresh
/// user-initiated invocation.
#[derive(Debug, Error)]
pub enum FlowError {
    #[error("no wallet is connected")]
    NotConnected,
    #[error("wrong network: expected chain {expected}, connected to chain {actual}")]
    WrongNetwork { expected: u64, actual: u64 },
    #[error("could not fetch schedule: {0}")]
    ScheduleFetch(String),
    #[error("could not check prediction access: {0}")]
    AccessCheck(String),
    #[error("payment cancelled in the wallet")]
    PaymentCancelled,
    #[error("insufficient funds to purchase this prediction")]
    InsufficientFunds,
    #[error("payment submission failed: {0}")]
    PaymentFailed(String),
    #[error("payment settled but access was not granted, do not pay again")]
    PaymentVerificationFailed,
    #[error("prediction unavailable: {0}")]
    PredictionUnavailable(String),
    #[error("payment not settled after {0:?}")]
    SettlementTimeout(Duration),
    #[error("withdrawal failed: {0}")]
    Withdrawal(String),
    #[error("superseded by a newer request")]
    Superseded,
}
