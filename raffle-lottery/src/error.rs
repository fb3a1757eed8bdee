use crate::raffle::RaffleState;
use raffle_core::{Address, Amount, RequestId};
use thiserror::Error;

pub type Result<T> = std::result::Result<T, RaffleError>;

#[derive(Error, Debug)]
pub enum RaffleError {
    #[error("Raffle core error: {0}")]
    Core(#[from] raffle_core::CoreError),

    #[error("Not enough value sent to enter: sent {sent}, required {required}")]
    InsufficientPayment { sent: Amount, required: Amount },

    #[error("Raffle is not open")]
    NotOpen,

    #[error("Upkeep not needed: balance {balance}, players {num_players}, state {state}")]
    UpkeepNotNeeded {
        balance: Amount,
        num_players: usize,
        state: RaffleState,
    },

    #[error("Unknown randomness request: {0}")]
    UnknownRequest(RequestId),

    #[error("Unauthorized caller: {caller}")]
    Unauthorized { caller: Address },

    #[error("Payout failed: {0}")]
    PayoutFailed(String),

    #[error("No random words delivered for request {0}")]
    MissingRandomWords(RequestId),

    #[error("Player index {index} out of bounds ({len} players)")]
    PlayerIndexOutOfBounds { index: usize, len: usize },

    #[error("Oracle error: {0}")]
    Oracle(String),

    #[error("Invalid snapshot: {0}")]
    InvalidSnapshot(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl RaffleError {
    pub fn oracle(msg: impl Into<String>) -> Self {
        Self::Oracle(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }
}
