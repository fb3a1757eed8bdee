//! Boundary to the verifiable randomness oracle.
//!
//! A raffle sends a [`RandomnessRequest`] and gets a [`RequestId`] back
//! immediately. The oracle answers later, in a separate call, with a
//! [`RandomnessDelivery`] carrying the same id.

pub mod mock;

pub use mock::{CoordinatorEvent, MockVrfCoordinator, Subscription};

use crate::Result;
use raffle_core::{Address, RequestId};
use serde::{Deserialize, Serialize};

/// One random value as delivered by the oracle.
///
/// Narrower than the 256-bit words a VRF coordinator on chain produces. A
/// full-width word has to be truncated to its low 128 bits before delivery,
/// and `word % players` on the truncated value can pick a different player
/// than the same reduction on the full word.
pub type RandomWord = u128;

/// Parameters of a randomness request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RandomnessRequest {
    pub key_hash: String,
    pub subscription_id: u64,
    pub request_confirmations: u16,
    pub callback_gas_limit: u32,
    pub num_words: u32,
}

/// Oracle callback payload
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RandomnessDelivery {
    pub request_id: RequestId,
    pub random_words: Vec<RandomWord>,
}

pub trait RandomnessOracle: Send + Sync {
    /// Address the oracle calls back from
    fn address(&self) -> &Address;

    /// Register a request on behalf of `requester` and return its id
    fn request_random_words(
        &self,
        requester: &Address,
        request: RandomnessRequest,
    ) -> Result<RequestId>;
}

/// Receiver of oracle callbacks
pub trait RandomnessConsumer {
    fn consumer_address(&self) -> &Address;

    /// Entry point the oracle invokes; `caller` is the oracle's address
    fn raw_fulfill_random_words(
        &mut self,
        caller: &Address,
        delivery: RandomnessDelivery,
    ) -> Result<()>;
}
