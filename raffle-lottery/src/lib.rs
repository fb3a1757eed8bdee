//! Automated raffle driven by an upkeep trigger and a randomness oracle
//!
//! Players enter by paying the entrance fee. When the round interval has
//! passed, the upkeep trigger asks the oracle for a random word; the oracle's
//! callback picks the winner, pays out the whole pool and reopens the raffle.

pub mod error;
pub mod events;
pub mod keeper;
pub mod oracle;
pub mod raffle;

pub use error::{RaffleError, Result};
pub use events::{EventBus, RaffleEvent};
pub use keeper::UpkeepKeeper;
pub use oracle::{
    MockVrfCoordinator, RandomWord, RandomnessConsumer, RandomnessDelivery, RandomnessOracle,
    RandomnessRequest,
};
pub use raffle::{Raffle, RaffleInfo, RaffleSnapshot, RaffleState};

use raffle_core::{Amount, Clock, Ledger, RaffleConfig};
use std::sync::Arc;

/// LINK put into a freshly created mock subscription
pub const VRF_SUB_FUND_AMOUNT: Amount = Amount::from_wei(2_000_000_000_000_000_000);

/// Deploy a raffle against a new mock coordinator, as on a development chain.
///
/// Creates and funds a subscription, points `config` at it and registers the
/// raffle as a consumer.
pub fn deploy_with_mock(
    mut config: RaffleConfig,
    coordinator: Arc<MockVrfCoordinator>,
    ledger: Arc<dyn Ledger>,
    clock: Arc<dyn Clock>,
    fund_amount: Amount,
) -> Result<Raffle> {
    let subscription_id = coordinator.create_subscription();
    coordinator.fund_subscription(subscription_id, fund_amount)?;
    config.oracle.subscription_id = subscription_id;

    let raffle = Raffle::deploy(config, ledger, coordinator.clone(), clock)?;
    coordinator.add_consumer(subscription_id, raffle.address())?;

    Ok(raffle)
}
