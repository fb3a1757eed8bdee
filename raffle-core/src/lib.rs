//! Raffle core - shared primitives for the automated raffle
//!
//! Amounts and addresses, the host ledger and clock abstractions, network
//! configuration and SQLite-backed persistence used by the raffle state
//! machine and the CLI.

pub mod clock;
pub mod config;
pub mod error;
pub mod ledger;
pub mod storage;
pub mod types;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{Network, NetworkConfig, OracleConfig, RaffleConfig};
pub use error::{CoreError, Result};
pub use ledger::{InMemoryLedger, Ledger};
pub use storage::{RaffleRecord, RaffleStore, RoundRecord, Storage};
pub use types::{Address, Amount, RequestId};
