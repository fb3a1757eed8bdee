use super::{RandomWord, RandomnessConsumer, RandomnessDelivery, RandomnessOracle, RandomnessRequest};
use crate::{RaffleError, Result};
use parking_lot::Mutex;
use raffle_core::{Address, Amount, CoreError, RequestId};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashMap;

/// 0.25 LINK flat fee per fulfilment
pub const BASE_FEE: Amount = Amount::from_wei(250_000_000_000_000_000);
/// LINK per unit of callback gas
pub const GAS_PRICE_LINK: Amount = Amount::from_wei(1_000_000_000);
pub const MAX_NUM_WORDS: u32 = 500;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subscription {
    pub balance: Amount,
    pub consumers: Vec<Address>,
}

/// Log entries emitted by the coordinator, in order
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "camelCase")]
pub enum CoordinatorEvent {
    SubscriptionCreated {
        subscription_id: u64,
    },
    SubscriptionFunded {
        subscription_id: u64,
        old_balance: Amount,
        new_balance: Amount,
    },
    ConsumerAdded {
        subscription_id: u64,
        consumer: Address,
    },
    RandomWordsRequested {
        request_id: RequestId,
        subscription_id: u64,
        key_hash: String,
        sender: Address,
    },
    RandomWordsFulfilled {
        request_id: RequestId,
        payment: Amount,
    },
}

#[derive(Debug, Clone)]
struct PendingRequest {
    subscription_id: u64,
    consumer: Address,
    callback_gas_limit: u32,
    num_words: u32,
}

#[derive(Debug)]
struct CoordinatorState {
    next_subscription_id: u64,
    next_request_id: u64,
    subscriptions: HashMap<u64, Subscription>,
    requests: HashMap<RequestId, PendingRequest>,
    events: Vec<CoordinatorEvent>,
}

/// In-process VRF coordinator for development chains.
///
/// Words are derived from a seed and the request id, so a run with a fixed
/// seed always picks the same winners.
#[derive(Debug)]
pub struct MockVrfCoordinator {
    address: Address,
    base_fee: Amount,
    gas_price_link: Amount,
    seed: [u8; 32],
    inner: Mutex<CoordinatorState>,
}

impl MockVrfCoordinator {
    pub fn new(base_fee: Amount, gas_price_link: Amount) -> Self {
        Self::with_seed(base_fee, gas_price_link, [0u8; 32])
    }

    pub fn with_seed(base_fee: Amount, gas_price_link: Amount, seed: [u8; 32]) -> Self {
        let digest = Sha256::digest(b"mock-vrf-coordinator");
        let mut address = [0u8; 20];
        address.copy_from_slice(&digest[..20]);

        Self {
            address: Address::from_bytes(&address),
            base_fee,
            gas_price_link,
            seed,
            inner: Mutex::new(CoordinatorState {
                next_subscription_id: 1,
                next_request_id: 1,
                subscriptions: HashMap::new(),
                requests: HashMap::new(),
                events: Vec::new(),
            }),
        }
    }

    pub fn create_subscription(&self) -> u64 {
        let mut inner = self.inner.lock();
        let subscription_id = inner.next_subscription_id;
        inner.next_subscription_id += 1;
        inner
            .subscriptions
            .insert(subscription_id, Subscription::default());
        inner
            .events
            .push(CoordinatorEvent::SubscriptionCreated { subscription_id });

        tracing::info!("Created VRF subscription {}", subscription_id);
        subscription_id
    }

    pub fn fund_subscription(&self, subscription_id: u64, amount: Amount) -> Result<()> {
        let mut inner = self.inner.lock();
        let subscription = inner
            .subscriptions
            .get_mut(&subscription_id)
            .ok_or_else(|| RaffleError::oracle("invalid subscription"))?;

        let old_balance = subscription.balance;
        let new_balance = old_balance
            .checked_add(amount)
            .ok_or_else(|| RaffleError::oracle("subscription balance overflow"))?;
        subscription.balance = new_balance;

        inner.events.push(CoordinatorEvent::SubscriptionFunded {
            subscription_id,
            old_balance,
            new_balance,
        });
        Ok(())
    }

    pub fn add_consumer(&self, subscription_id: u64, consumer: &Address) -> Result<()> {
        let mut inner = self.inner.lock();
        let subscription = inner
            .subscriptions
            .get_mut(&subscription_id)
            .ok_or_else(|| RaffleError::oracle("invalid subscription"))?;

        if subscription.consumers.contains(consumer) {
            return Ok(());
        }
        subscription.consumers.push(consumer.clone());

        inner.events.push(CoordinatorEvent::ConsumerAdded {
            subscription_id,
            consumer: consumer.clone(),
        });
        tracing::debug!("Consumer {} added to subscription {}", consumer, subscription_id);
        Ok(())
    }

    pub fn subscription(&self, subscription_id: u64) -> Option<Subscription> {
        self.inner.lock().subscriptions.get(&subscription_id).cloned()
    }

    pub fn is_pending(&self, request_id: RequestId) -> bool {
        self.inner.lock().requests.contains_key(&request_id)
    }

    pub fn events(&self) -> Vec<CoordinatorEvent> {
        self.inner.lock().events.clone()
    }

    /// Amount charged to the subscription for one fulfilment
    pub fn fulfillment_cost(&self, callback_gas_limit: u32) -> Amount {
        self.gas_price_link
            .checked_mul(u128::from(callback_gas_limit))
            .and_then(|gas| gas.checked_add(self.base_fee))
            .unwrap_or(Amount::from_wei(u128::MAX))
    }

    fn derive_words(&self, request_id: RequestId, num_words: u32) -> Vec<RandomWord> {
        (0..num_words)
            .map(|index| {
                let mut hasher = Sha256::new();
                hasher.update(self.seed);
                hasher.update(request_id.value().to_be_bytes());
                hasher.update(index.to_be_bytes());
                let digest = hasher.finalize();

                let mut word = [0u8; 16];
                word.copy_from_slice(&digest[..16]);
                RandomWord::from_be_bytes(word)
            })
            .collect()
    }

    /// Deliver derived words for `request_id` to `consumer`
    pub fn fulfill_random_words(
        &self,
        request_id: RequestId,
        consumer: &mut dyn RandomnessConsumer,
    ) -> Result<Vec<RandomWord>> {
        self.fulfill(request_id, None, consumer)
    }

    /// Deliver caller-chosen words, for deterministic tests
    pub fn fulfill_random_words_with_override(
        &self,
        request_id: RequestId,
        words: Vec<RandomWord>,
        consumer: &mut dyn RandomnessConsumer,
    ) -> Result<Vec<RandomWord>> {
        self.fulfill(request_id, Some(words), consumer)
    }

    fn fulfill(
        &self,
        request_id: RequestId,
        words: Option<Vec<RandomWord>>,
        consumer: &mut dyn RandomnessConsumer,
    ) -> Result<Vec<RandomWord>> {
        // held across the callback so a fulfilment is all-or-nothing
        let mut inner = self.inner.lock();

        let request = inner
            .requests
            .get(&request_id)
            .cloned()
            .ok_or_else(|| RaffleError::oracle("nonexistent request"))?;

        if consumer.consumer_address() != &request.consumer {
            return Err(RaffleError::oracle(format!(
                "request {} belongs to {}",
                request_id, request.consumer
            )));
        }

        let payment = self.fulfillment_cost(request.callback_gas_limit);
        let available = inner
            .subscriptions
            .get(&request.subscription_id)
            .map(|s| s.balance)
            .ok_or_else(|| RaffleError::oracle("invalid subscription"))?;
        let remaining = available
            .checked_sub(payment)
            .ok_or(CoreError::InsufficientFunds {
                need: payment,
                available,
            })?;

        let words = words.unwrap_or_else(|| self.derive_words(request_id, request.num_words));

        consumer.raw_fulfill_random_words(
            &self.address,
            RandomnessDelivery {
                request_id,
                random_words: words.clone(),
            },
        )?;

        if let Some(subscription) = inner.subscriptions.get_mut(&request.subscription_id) {
            subscription.balance = remaining;
        }
        inner.requests.remove(&request_id);
        inner
            .events
            .push(CoordinatorEvent::RandomWordsFulfilled { request_id, payment });

        tracing::info!("Fulfilled request {} (payment {})", request_id, payment);
        Ok(words)
    }
}

impl RandomnessOracle for MockVrfCoordinator {
    fn address(&self) -> &Address {
        &self.address
    }

    fn request_random_words(
        &self,
        requester: &Address,
        request: RandomnessRequest,
    ) -> Result<RequestId> {
        let mut inner = self.inner.lock();

        let subscription = inner
            .subscriptions
            .get(&request.subscription_id)
            .ok_or_else(|| RaffleError::oracle("invalid subscription"))?;

        if !subscription.consumers.contains(requester) {
            return Err(RaffleError::oracle(format!(
                "invalid consumer {} for subscription {}",
                requester, request.subscription_id
            )));
        }

        if request.num_words == 0 || request.num_words > MAX_NUM_WORDS {
            return Err(RaffleError::oracle(format!(
                "num words {} outside 1..={}",
                request.num_words, MAX_NUM_WORDS
            )));
        }

        let request_id = RequestId::new(inner.next_request_id);
        inner.next_request_id += 1;

        inner.requests.insert(
            request_id,
            PendingRequest {
                subscription_id: request.subscription_id,
                consumer: requester.clone(),
                callback_gas_limit: request.callback_gas_limit,
                num_words: request.num_words,
            },
        );
        inner.events.push(CoordinatorEvent::RandomWordsRequested {
            request_id,
            subscription_id: request.subscription_id,
            key_hash: request.key_hash,
            sender: requester.clone(),
        });

        tracing::debug!("Random words requested: {} by {}", request_id, requester);
        Ok(request_id)
    }
}
