use crate::events::{EventBus, RaffleEvent};
use crate::oracle::{RandomnessConsumer, RandomnessDelivery, RandomnessOracle, RandomnessRequest};
use crate::{RaffleError, Result};
use raffle_core::{Address, Amount, Clock, Ledger, RaffleConfig, RequestId};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::sync::Arc;
use tokio::sync::broadcast;
use uuid::Uuid;

/// Random words asked for per round
pub const NUM_WORDS: u32 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RaffleState {
    /// Accepting entries
    Open,
    /// Waiting for the randomness callback
    Calculating,
}

impl RaffleState {
    /// Numeric encoding seen by external observers
    pub fn as_u8(self) -> u8 {
        match self {
            RaffleState::Open => 0,
            RaffleState::Calculating => 1,
        }
    }
}

impl fmt::Display for RaffleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RaffleState::Open => f.write_str("OPEN"),
            RaffleState::Calculating => f.write_str("CALCULATING"),
        }
    }
}

/// Durable state of a raffle
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RaffleSnapshot {
    pub id: Uuid,
    pub address: Address,
    pub config: RaffleConfig,
    pub state: RaffleState,
    pub last_timestamp: u64,
    pub players: Vec<Address>,
    pub pending_request: Option<RequestId>,
    pub recent_winner: Option<Address>,
    pub rounds_completed: u64,
}

/// Raffle summary for display
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RaffleInfo {
    pub id: Uuid,
    pub address: Address,
    pub state: RaffleState,
    pub entrance_fee: Amount,
    pub interval: u64,
    pub player_count: usize,
    pub balance: Amount,
    pub recent_winner: Option<Address>,
    pub last_timestamp: u64,
    pub pending_request: Option<RequestId>,
    pub rounds_completed: u64,
}

/// Automated raffle.
///
/// Players pay at least the entrance fee to enter. Once the interval has
/// passed with players and a balance, the upkeep trigger moves the raffle to
/// `Calculating` and asks the oracle for one random word. The oracle's
/// callback picks `word % players` as the winner, pays out the whole pool and
/// reopens the raffle.
///
/// Every mutating call either commits all of its effects or returns an error
/// having changed nothing.
pub struct Raffle {
    id: Uuid,
    address: Address,
    config: RaffleConfig,
    state: RaffleState,
    last_timestamp: u64,
    players: Vec<Address>,
    pending_request: Option<RequestId>,
    recent_winner: Option<Address>,
    rounds_completed: u64,
    ledger: Arc<dyn Ledger>,
    oracle: Arc<dyn RandomnessOracle>,
    clock: Arc<dyn Clock>,
    events: EventBus,
}

impl Raffle {
    pub fn deploy(
        config: RaffleConfig,
        ledger: Arc<dyn Ledger>,
        oracle: Arc<dyn RandomnessOracle>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        config.validate()?;

        let id = Uuid::new_v4();
        let address = derive_address(id);
        let last_timestamp = clock.now();

        tracing::info!(
            "Raffle {} deployed at {} (fee {}, interval {}s)",
            id,
            address,
            config.entrance_fee,
            config.interval
        );

        Ok(Self {
            id,
            address,
            config,
            state: RaffleState::Open,
            last_timestamp,
            players: Vec::new(),
            pending_request: None,
            recent_winner: None,
            rounds_completed: 0,
            ledger,
            oracle,
            clock,
            events: EventBus::new(),
        })
    }

    /// Rebuild a raffle from a saved snapshot
    pub fn restore(
        snapshot: RaffleSnapshot,
        ledger: Arc<dyn Ledger>,
        oracle: Arc<dyn RandomnessOracle>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        snapshot.config.validate()?;

        let calculating = snapshot.state == RaffleState::Calculating;
        if calculating != snapshot.pending_request.is_some() {
            return Err(RaffleError::InvalidSnapshot(format!(
                "state {} with pending request {:?}",
                snapshot.state, snapshot.pending_request
            )));
        }

        if calculating && snapshot.players.is_empty() {
            return Err(RaffleError::InvalidSnapshot(
                "calculating without players".to_string(),
            ));
        }

        tracing::info!("Raffle {} restored in state {}", snapshot.id, snapshot.state);

        Ok(Self {
            id: snapshot.id,
            address: snapshot.address,
            config: snapshot.config,
            state: snapshot.state,
            last_timestamp: snapshot.last_timestamp,
            players: snapshot.players,
            pending_request: snapshot.pending_request,
            recent_winner: snapshot.recent_winner,
            rounds_completed: snapshot.rounds_completed,
            ledger,
            oracle,
            clock,
            events: EventBus::new(),
        })
    }

    /// Enter the raffle by paying `payment` from `player`'s account
    pub fn enter(&mut self, player: &Address, payment: Amount) -> Result<()> {
        if self.state != RaffleState::Open {
            return Err(RaffleError::NotOpen);
        }

        if payment < self.config.entrance_fee {
            return Err(RaffleError::InsufficientPayment {
                sent: payment,
                required: self.config.entrance_fee,
            });
        }

        self.ledger.transfer(player, &self.address, payment)?;
        self.players.push(player.clone());

        tracing::info!(
            "Player {} entered raffle {} with {} ({} players)",
            player,
            self.id,
            payment,
            self.players.len()
        );

        self.events.publish(RaffleEvent::RaffleEnter {
            player: player.clone(),
            amount: payment,
        });
        Ok(())
    }

    /// Whether the upkeep trigger should call [`Raffle::perform_upkeep`].
    ///
    /// True when the raffle is open, the interval has passed, and there are
    /// players and a balance. The returned perform data is always empty.
    pub fn check_upkeep(&self, _check_data: &[u8]) -> (bool, Vec<u8>) {
        let is_open = self.state == RaffleState::Open;
        let elapsed = self.clock.now().saturating_sub(self.last_timestamp);
        let time_passed = elapsed >= self.config.interval;
        let has_players = !self.players.is_empty();
        let has_balance = !self.balance().is_zero();

        let upkeep_needed = is_open && time_passed && has_players && has_balance;
        (upkeep_needed, Vec::new())
    }

    /// Close entries and request randomness for the current round
    pub fn perform_upkeep(&mut self, perform_data: &[u8]) -> Result<RequestId> {
        let (upkeep_needed, _) = self.check_upkeep(perform_data);
        if !upkeep_needed {
            return Err(RaffleError::UpkeepNotNeeded {
                balance: self.balance(),
                num_players: self.players.len(),
                state: self.state,
            });
        }

        let request = RandomnessRequest {
            key_hash: self.config.oracle.key_hash.clone(),
            subscription_id: self.config.oracle.subscription_id,
            request_confirmations: self.config.oracle.request_confirmations,
            callback_gas_limit: self.config.oracle.callback_gas_limit,
            num_words: NUM_WORDS,
        };
        let request_id = self.oracle.request_random_words(&self.address, request)?;

        self.state = RaffleState::Calculating;
        self.pending_request = Some(request_id);

        tracing::info!(
            "Raffle {} calculating, requested randomness {}",
            self.id,
            request_id
        );

        self.events
            .publish(RaffleEvent::RequestedRaffleWinner { request_id });
        Ok(request_id)
    }

    /// Oracle callback: pick the winner, pay out the pool and reopen.
    ///
    /// The winner index is `word % players`. Modulo reduction is slightly
    /// biased towards low indices when the player count does not divide the
    /// word range; that bias is accepted.
    pub fn fulfill_random_words(
        &mut self,
        caller: &Address,
        delivery: RandomnessDelivery,
    ) -> Result<Address> {
        if caller != self.oracle.address() {
            return Err(RaffleError::Unauthorized {
                caller: caller.clone(),
            });
        }

        let request_id = match self.pending_request {
            Some(pending) if pending == delivery.request_id => pending,
            _ => return Err(RaffleError::UnknownRequest(delivery.request_id)),
        };

        let word = *delivery
            .random_words
            .first()
            .ok_or(RaffleError::MissingRandomWords(request_id))?;

        if self.players.is_empty() {
            return Err(RaffleError::internal("pending request without players"));
        }

        let index = (word % self.players.len() as u128) as usize;
        let winner = self.players[index].clone();
        let prize = self.balance();

        self.ledger
            .transfer(&self.address, &winner, prize)
            .map_err(|e| {
                tracing::warn!(
                    "Raffle {} payout of {} to {} failed: {}",
                    self.id,
                    prize,
                    winner,
                    e
                );
                RaffleError::PayoutFailed(e.to_string())
            })?;

        let round = self.rounds_completed + 1;
        self.recent_winner = Some(winner.clone());
        self.players.clear();
        self.pending_request = None;
        self.last_timestamp = self.clock.now();
        self.rounds_completed = round;
        self.state = RaffleState::Open;

        tracing::info!(
            "Raffle {} round {} winner: {} (index {}, prize {})",
            self.id,
            round,
            winner,
            index,
            prize
        );

        self.events.publish(RaffleEvent::WinnerPicked {
            winner: winner.clone(),
            prize,
            request_id,
            round,
        });
        Ok(winner)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<RaffleEvent> {
        self.events.subscribe()
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn address(&self) -> &Address {
        &self.address
    }

    pub fn config(&self) -> &RaffleConfig {
        &self.config
    }

    pub fn entrance_fee(&self) -> Amount {
        self.config.entrance_fee
    }

    pub fn interval(&self) -> u64 {
        self.config.interval
    }

    pub fn state(&self) -> RaffleState {
        self.state
    }

    pub fn player(&self, index: usize) -> Result<&Address> {
        self.players
            .get(index)
            .ok_or(RaffleError::PlayerIndexOutOfBounds {
                index,
                len: self.players.len(),
            })
    }

    pub fn players(&self) -> &[Address] {
        &self.players
    }

    pub fn number_of_players(&self) -> usize {
        self.players.len()
    }

    pub fn recent_winner(&self) -> Option<&Address> {
        self.recent_winner.as_ref()
    }

    pub fn latest_timestamp(&self) -> u64 {
        self.last_timestamp
    }

    pub fn pending_request(&self) -> Option<RequestId> {
        self.pending_request
    }

    pub fn rounds_completed(&self) -> u64 {
        self.rounds_completed
    }

    /// Pool held by the raffle's account on the ledger
    pub fn balance(&self) -> Amount {
        self.ledger.balance_of(&self.address)
    }

    pub fn num_words(&self) -> u32 {
        NUM_WORDS
    }

    pub fn request_confirmations(&self) -> u16 {
        self.config.oracle.request_confirmations
    }

    pub fn snapshot(&self) -> RaffleSnapshot {
        RaffleSnapshot {
            id: self.id,
            address: self.address.clone(),
            config: self.config.clone(),
            state: self.state,
            last_timestamp: self.last_timestamp,
            players: self.players.clone(),
            pending_request: self.pending_request,
            recent_winner: self.recent_winner.clone(),
            rounds_completed: self.rounds_completed,
        }
    }

    pub fn get_info(&self) -> RaffleInfo {
        RaffleInfo {
            id: self.id,
            address: self.address.clone(),
            state: self.state,
            entrance_fee: self.config.entrance_fee,
            interval: self.config.interval,
            player_count: self.players.len(),
            balance: self.balance(),
            recent_winner: self.recent_winner.clone(),
            last_timestamp: self.last_timestamp,
            pending_request: self.pending_request,
            rounds_completed: self.rounds_completed,
        }
    }
}

impl RandomnessConsumer for Raffle {
    fn consumer_address(&self) -> &Address {
        &self.address
    }

    fn raw_fulfill_random_words(
        &mut self,
        caller: &Address,
        delivery: RandomnessDelivery,
    ) -> Result<()> {
        Raffle::fulfill_random_words(self, caller, delivery).map(|_| ())
    }
}

impl fmt::Debug for Raffle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Raffle")
            .field("id", &self.id)
            .field("address", &self.address)
            .field("state", &self.state)
            .field("players", &self.players.len())
            .field("pending_request", &self.pending_request)
            .field("recent_winner", &self.recent_winner)
            .finish()
    }
}

fn derive_address(id: Uuid) -> Address {
    let mut hasher = Sha256::new();
    hasher.update(b"raffle");
    hasher.update(id.as_bytes());
    let digest = hasher.finalize();

    let mut bytes = [0u8; 20];
    bytes.copy_from_slice(&digest[..20]);
    Address::from_bytes(&bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::oracle::mock::{BASE_FEE, GAS_PRICE_LINK};
    use crate::oracle::MockVrfCoordinator;
    use proptest::prelude::*;
    use raffle_core::{CoreError, InMemoryLedger, ManualClock};

    const FEE: u128 = 100;
    const INTERVAL: u64 = 30;
    const START: u64 = 1_700_000_000;

    struct Harness {
        raffle: Raffle,
        ledger: Arc<InMemoryLedger>,
        coordinator: Arc<MockVrfCoordinator>,
        clock: Arc<ManualClock>,
    }

    impl Harness {
        fn new() -> Self {
            let ledger = Arc::new(InMemoryLedger::new());
            let coordinator = Arc::new(MockVrfCoordinator::new(BASE_FEE, GAS_PRICE_LINK));
            let clock = Arc::new(ManualClock::new(START));

            let subscription_id = coordinator.create_subscription();
            coordinator
                .fund_subscription(subscription_id, Amount::from_wei(5_000_000_000_000_000_000))
                .unwrap();

            let mut config = RaffleConfig {
                entrance_fee: Amount::from_wei(FEE),
                interval: INTERVAL,
                ..RaffleConfig::default()
            };
            config.oracle.subscription_id = subscription_id;

            let raffle = Raffle::deploy(
                config,
                ledger.clone(),
                coordinator.clone(),
                clock.clone(),
            )
            .unwrap();
            coordinator
                .add_consumer(subscription_id, raffle.address())
                .unwrap();

            Self {
                raffle,
                ledger,
                coordinator,
                clock,
            }
        }

        fn player(&self, n: u8) -> Address {
            let address = Address::from_bytes(&[n; 20]);
            if self.ledger.balance_of(&address).is_zero() {
                self.ledger
                    .mint(&address, Amount::from_wei(10_000))
                    .unwrap();
            }
            address
        }

        fn enter(&mut self, n: u8) -> Address {
            let player = self.player(n);
            self.raffle.enter(&player, Amount::from_wei(FEE)).unwrap();
            player
        }

        fn pass_interval(&self) {
            self.clock.advance(INTERVAL + 1);
        }

        fn deliver(&mut self, request_id: RequestId, word: u128) -> Result<Vec<u128>> {
            self.coordinator.fulfill_random_words_with_override(
                request_id,
                vec![word],
                &mut self.raffle,
            )
        }
    }

    #[test]
    fn test_deploys_open() {
        let h = Harness::new();

        assert_eq!(h.raffle.state(), RaffleState::Open);
        assert_eq!(h.raffle.state().as_u8(), 0);
        assert_eq!(h.raffle.interval(), INTERVAL);
        assert_eq!(h.raffle.entrance_fee(), Amount::from_wei(FEE));
        assert_eq!(h.raffle.latest_timestamp(), START);
        assert_eq!(h.raffle.num_words(), 1);
        assert!(h.raffle.pending_request().is_none());
        assert!(h.raffle.recent_winner().is_none());
    }

    #[test]
    fn test_deploy_rejects_invalid_config() {
        let config = RaffleConfig {
            entrance_fee: Amount::ZERO,
            ..RaffleConfig::default()
        };
        let result = Raffle::deploy(
            config,
            Arc::new(InMemoryLedger::new()),
            Arc::new(MockVrfCoordinator::new(BASE_FEE, GAS_PRICE_LINK)),
            Arc::new(ManualClock::new(START)),
        );
        assert!(matches!(
            result,
            Err(RaffleError::Core(CoreError::Config(_)))
        ));
    }

    #[test]
    fn test_enter_below_fee_rejected() {
        let mut h = Harness::new();
        let player = h.player(1);

        for sent in [0, 1, FEE - 1] {
            let err = h
                .raffle
                .enter(&player, Amount::from_wei(sent))
                .unwrap_err();
            assert!(matches!(err, RaffleError::InsufficientPayment { .. }));
        }

        assert_eq!(h.raffle.number_of_players(), 0);
        assert_eq!(h.raffle.balance(), Amount::ZERO);
        assert_eq!(h.ledger.balance_of(&player), Amount::from_wei(10_000));
    }

    #[test]
    fn test_enter_records_player_and_emits() {
        let mut h = Harness::new();
        let mut events = h.raffle.subscribe();

        let player = h.enter(1);

        assert_eq!(h.raffle.player(0).unwrap(), &player);
        assert_eq!(
            events.try_recv().unwrap(),
            RaffleEvent::RaffleEnter {
                player,
                amount: Amount::from_wei(FEE)
            }
        );
    }

    #[test]
    fn test_overpayment_is_kept() {
        let mut h = Harness::new();
        let player = h.player(1);

        h.raffle.enter(&player, Amount::from_wei(FEE + 50)).unwrap();

        assert_eq!(h.raffle.balance(), Amount::from_wei(FEE + 50));
        assert_eq!(h.ledger.balance_of(&player), Amount::from_wei(10_000 - FEE - 50));
    }

    #[test]
    fn test_duplicate_entries_allowed() {
        let mut h = Harness::new();
        h.enter(1);
        h.enter(1);

        assert_eq!(h.raffle.number_of_players(), 2);
        assert_eq!(h.raffle.balance(), Amount::from_wei(2 * FEE));
    }

    #[test]
    fn test_unfunded_player_cannot_enter() {
        let mut h = Harness::new();
        let broke = Address::new("0xbroke");

        let err = h
            .raffle
            .enter(&broke, Amount::from_wei(FEE))
            .unwrap_err();

        assert!(matches!(
            err,
            RaffleError::Core(CoreError::InsufficientFunds { .. })
        ));
        assert_eq!(h.raffle.number_of_players(), 0);
    }

    #[test]
    fn test_player_index_out_of_bounds() {
        let mut h = Harness::new();
        h.enter(1);

        assert!(matches!(
            h.raffle.player(1),
            Err(RaffleError::PlayerIndexOutOfBounds { index: 1, len: 1 })
        ));
    }

    #[test]
    fn test_check_upkeep_false_without_players() {
        let h = Harness::new();
        h.pass_interval();

        let (upkeep_needed, perform_data) = h.raffle.check_upkeep(&[]);
        assert!(!upkeep_needed);
        assert!(perform_data.is_empty());
    }

    #[test]
    fn test_check_upkeep_false_before_interval() {
        let mut h = Harness::new();
        h.enter(1);
        h.clock.advance(INTERVAL - 5);

        assert!(!h.raffle.check_upkeep(&[]).0);

        h.clock.advance(5);
        assert!(h.raffle.check_upkeep(&[]).0);
    }

    #[test]
    fn test_check_upkeep_false_while_calculating() {
        let mut h = Harness::new();
        h.enter(1);
        h.pass_interval();
        h.raffle.perform_upkeep(&[]).unwrap();

        h.clock.advance(10 * INTERVAL);
        assert_eq!(h.raffle.state(), RaffleState::Calculating);
        assert!(!h.raffle.check_upkeep(&[]).0);
    }

    #[test]
    fn test_check_upkeep_does_not_mutate() {
        let mut h = Harness::new();
        h.enter(1);
        h.pass_interval();

        let before = h.raffle.snapshot();
        h.raffle.check_upkeep(b"0x");
        assert_eq!(h.raffle.snapshot(), before);
    }

    #[test]
    fn test_perform_upkeep_moves_to_calculating() {
        let mut h = Harness::new();
        let mut events = h.raffle.subscribe();
        h.enter(1);
        h.pass_interval();

        let request_id = h.raffle.perform_upkeep(&[]).unwrap();

        assert!(request_id.value() > 0);
        assert_eq!(h.raffle.state(), RaffleState::Calculating);
        assert_eq!(h.raffle.pending_request(), Some(request_id));
        assert!(h.coordinator.is_pending(request_id));

        events.try_recv().unwrap();
        assert_eq!(
            events.try_recv().unwrap(),
            RaffleEvent::RequestedRaffleWinner { request_id }
        );

        let latecomer = h.player(2);
        let err = h
            .raffle
            .enter(&latecomer, Amount::from_wei(FEE))
            .unwrap_err();
        assert!(matches!(err, RaffleError::NotOpen));
        assert_eq!(h.raffle.number_of_players(), 1);
    }

    #[test]
    fn test_perform_upkeep_twice_fails() {
        let mut h = Harness::new();
        h.enter(1);
        h.pass_interval();
        let request_id = h.raffle.perform_upkeep(&[]).unwrap();

        let err = h.raffle.perform_upkeep(&[]).unwrap_err();
        assert!(matches!(
            err,
            RaffleError::UpkeepNotNeeded {
                state: RaffleState::Calculating,
                num_players: 1,
                ..
            }
        ));
        assert_eq!(h.raffle.pending_request(), Some(request_id));
    }

    #[test]
    fn test_scenario_c_upkeep_with_nothing_fails() {
        let mut h = Harness::new();
        h.pass_interval();
        let before = h.raffle.snapshot();

        let err = h.raffle.perform_upkeep(&[]).unwrap_err();

        match err {
            RaffleError::UpkeepNotNeeded {
                balance,
                num_players,
                state,
            } => {
                assert_eq!(balance, Amount::ZERO);
                assert_eq!(num_players, 0);
                assert_eq!(state, RaffleState::Open);
            }
            other => panic!("unexpected error: {}", other),
        }
        assert_eq!(h.raffle.snapshot(), before);
    }

    #[test]
    fn test_oracle_rejection_leaves_raffle_open() {
        let ledger = Arc::new(InMemoryLedger::new());
        let coordinator = Arc::new(MockVrfCoordinator::new(BASE_FEE, GAS_PRICE_LINK));
        let clock = Arc::new(ManualClock::new(START));
        let mut config = RaffleConfig {
            entrance_fee: Amount::from_wei(FEE),
            interval: INTERVAL,
            ..RaffleConfig::default()
        };
        // never registered as a consumer
        config.oracle.subscription_id = coordinator.create_subscription();

        let mut raffle =
            Raffle::deploy(config, ledger.clone(), coordinator, clock.clone()).unwrap();
        let player = Address::new("0xplayer");
        ledger.mint(&player, Amount::from_wei(FEE)).unwrap();
        raffle.enter(&player, Amount::from_wei(FEE)).unwrap();
        clock.advance(INTERVAL);

        assert!(matches!(
            raffle.perform_upkeep(&[]),
            Err(RaffleError::Oracle(_))
        ));
        assert_eq!(raffle.state(), RaffleState::Open);
        assert!(raffle.pending_request().is_none());
    }

    #[test]
    fn test_fulfil_requires_pending_request() {
        let mut h = Harness::new();
        h.enter(1);
        h.pass_interval();

        for id in [0, 1] {
            let err = h.deliver(RequestId::new(id), 42).unwrap_err();
            assert!(err.to_string().contains("nonexistent request"));
        }
        assert_eq!(h.raffle.state(), RaffleState::Open);
    }

    #[test]
    fn test_fulfil_unknown_request_changes_nothing() {
        let mut h = Harness::new();
        h.enter(1);
        h.pass_interval();
        let request_id = h.raffle.perform_upkeep(&[]).unwrap();
        let before = h.raffle.snapshot();
        let oracle = h.coordinator.address().clone();

        let err = h
            .raffle
            .fulfill_random_words(
                &oracle,
                RandomnessDelivery {
                    request_id: RequestId::new(request_id.value() + 1),
                    random_words: vec![42],
                },
            )
            .unwrap_err();

        assert!(matches!(err, RaffleError::UnknownRequest(_)));
        assert_eq!(h.raffle.snapshot(), before);
    }

    #[test]
    fn test_fulfil_stale_request_from_previous_round() {
        let mut h = Harness::new();
        h.enter(1);
        h.pass_interval();
        let first = h.raffle.perform_upkeep(&[]).unwrap();
        h.deliver(first, 42).unwrap();

        h.enter(2);
        h.pass_interval();
        let second = h.raffle.perform_upkeep(&[]).unwrap();
        assert_ne!(first, second);
        let before = h.raffle.snapshot();

        let oracle = h.coordinator.address().clone();
        let err = h
            .raffle
            .fulfill_random_words(
                &oracle,
                RandomnessDelivery {
                    request_id: first,
                    random_words: vec![0],
                },
            )
            .unwrap_err();

        assert!(matches!(err, RaffleError::UnknownRequest(id) if id == first));
        assert_eq!(h.raffle.snapshot(), before);
    }

    #[test]
    fn test_fulfil_from_stranger_unauthorized() {
        let mut h = Harness::new();
        h.enter(1);
        h.pass_interval();
        let request_id = h.raffle.perform_upkeep(&[]).unwrap();
        let before = h.raffle.snapshot();

        let err = h
            .raffle
            .fulfill_random_words(
                &Address::new("0xmallory"),
                RandomnessDelivery {
                    request_id,
                    random_words: vec![42],
                },
            )
            .unwrap_err();

        assert!(matches!(err, RaffleError::Unauthorized { .. }));
        assert_eq!(h.raffle.snapshot(), before);
    }

    #[test]
    fn test_fulfil_without_words() {
        let mut h = Harness::new();
        h.enter(1);
        h.pass_interval();
        let request_id = h.raffle.perform_upkeep(&[]).unwrap();

        let err = h
            .coordinator
            .fulfill_random_words_with_override(request_id, Vec::new(), &mut h.raffle)
            .unwrap_err();

        assert!(matches!(err, RaffleError::MissingRandomWords(id) if id == request_id));
        assert_eq!(h.raffle.state(), RaffleState::Calculating);
    }

    #[test]
    fn test_replay_after_success_fails() {
        let mut h = Harness::new();
        h.enter(1);
        h.pass_interval();
        let request_id = h.raffle.perform_upkeep(&[]).unwrap();
        h.deliver(request_id, 42).unwrap();

        // straight to the raffle, bypassing the coordinator's own bookkeeping
        let oracle = h.coordinator.address().clone();
        let err = h
            .raffle
            .fulfill_random_words(
                &oracle,
                RandomnessDelivery {
                    request_id,
                    random_words: vec![42],
                },
            )
            .unwrap_err();
        assert!(matches!(err, RaffleError::UnknownRequest(_)));

        // and through the coordinator
        assert!(h.deliver(request_id, 42).is_err());
    }

    #[test]
    fn test_scenario_a_single_player() {
        let mut h = Harness::new();
        let mut events = h.raffle.subscribe();
        let player = h.enter(1);
        let starting = h.ledger.balance_of(&player);
        h.pass_interval();

        let request_id = h.raffle.perform_upkeep(&[]).unwrap();
        h.clock.advance(12);
        h.deliver(request_id, 42).unwrap();

        assert_eq!(h.raffle.recent_winner(), Some(&player));
        assert_eq!(
            h.ledger.balance_of(&player),
            starting.checked_add(Amount::from_wei(FEE)).unwrap()
        );
        assert_eq!(h.raffle.number_of_players(), 0);
        assert_eq!(h.raffle.balance(), Amount::ZERO);
        assert_eq!(h.raffle.state(), RaffleState::Open);
        assert!(h.raffle.pending_request().is_none());
        assert_eq!(h.raffle.latest_timestamp(), START + INTERVAL + 1 + 12);
        assert_eq!(h.raffle.rounds_completed(), 1);

        let last = std::iter::from_fn(|| events.try_recv().ok()).last().unwrap();
        assert_eq!(
            last,
            RaffleEvent::WinnerPicked {
                winner: player,
                prize: Amount::from_wei(FEE),
                request_id,
                round: 1,
            }
        );
    }

    #[test]
    fn test_scenario_b_four_players() {
        let mut h = Harness::new();
        let players: Vec<Address> = (0..4).map(|n| h.enter(n + 1)).collect();
        let starting = h.ledger.balance_of(&players[3]);
        assert_eq!(h.raffle.balance(), Amount::from_wei(400));
        h.pass_interval();

        let request_id = h.raffle.perform_upkeep(&[]).unwrap();
        h.deliver(request_id, 7).unwrap();

        assert_eq!(h.raffle.recent_winner(), Some(&players[3]));
        assert_eq!(
            h.ledger.balance_of(&players[3]),
            starting.checked_add(Amount::from_wei(400)).unwrap()
        );
        for loser in &players[..3] {
            assert_eq!(h.ledger.balance_of(loser), Amount::from_wei(10_000 - FEE));
        }
    }

    #[test]
    fn test_scenario_d_payout_failure_is_recoverable() {
        let mut h = Harness::new();
        let player = h.enter(1);
        h.pass_interval();
        let request_id = h.raffle.perform_upkeep(&[]).unwrap();
        let before = h.raffle.snapshot();

        h.ledger.freeze(&player);
        let err = h.deliver(request_id, 42).unwrap_err();

        assert!(matches!(err, RaffleError::PayoutFailed(_)));
        assert_eq!(h.raffle.snapshot(), before);
        assert_eq!(h.raffle.state(), RaffleState::Calculating);
        assert_eq!(h.raffle.pending_request(), Some(request_id));
        assert_eq!(h.raffle.balance(), Amount::from_wei(FEE));
        assert!(h.coordinator.is_pending(request_id));

        h.ledger.unfreeze(&player);
        let winners = h.deliver(request_id, 42);
        assert!(winners.is_ok());
        assert_eq!(h.raffle.recent_winner(), Some(&player));
        assert_eq!(h.raffle.state(), RaffleState::Open);
    }

    #[test]
    fn test_multiple_rounds() {
        let mut h = Harness::new();

        for round in 1..=3u64 {
            h.enter(1);
            h.enter(2);
            h.pass_interval();
            let request_id = h.raffle.perform_upkeep(&[]).unwrap();
            assert_eq!(request_id, RequestId::new(round));
            h.coordinator
                .fulfill_random_words(request_id, &mut h.raffle)
                .unwrap();
            assert_eq!(h.raffle.rounds_completed(), round);
        }

        // new round starts its interval from the last payout
        h.enter(3);
        assert!(!h.raffle.check_upkeep(&[]).0);
    }

    #[test]
    fn test_snapshot_round_trip_while_calculating() {
        let mut h = Harness::new();
        h.enter(1);
        h.enter(2);
        h.pass_interval();
        let request_id = h.raffle.perform_upkeep(&[]).unwrap();

        let snapshot = h.raffle.snapshot();
        let json = serde_json::to_value(&snapshot).unwrap();
        let snapshot: RaffleSnapshot = serde_json::from_value(json).unwrap();

        let mut restored = Raffle::restore(
            snapshot,
            h.ledger.clone(),
            h.coordinator.clone(),
            h.clock.clone(),
        )
        .unwrap();
        assert_eq!(restored.address(), h.raffle.address());
        assert_eq!(restored.balance(), Amount::from_wei(2 * FEE));

        h.coordinator
            .fulfill_random_words_with_override(request_id, vec![1], &mut restored)
            .unwrap();
        assert_eq!(restored.recent_winner(), Some(&h.player(2)));
    }

    #[test]
    fn test_restore_rejects_inconsistent_snapshot() {
        let h = Harness::new();
        let mut snapshot = h.raffle.snapshot();
        snapshot.state = RaffleState::Calculating;

        let result = Raffle::restore(
            snapshot,
            h.ledger.clone(),
            h.coordinator.clone(),
            h.clock.clone(),
        );
        assert!(matches!(result, Err(RaffleError::InvalidSnapshot(_))));
    }

    proptest! {
        #[test]
        fn prop_entries_track_players_and_balance(
            payments in prop::collection::vec(0u128..300, 0..40)
        ) {
            let mut h = Harness::new();
            let player = h.player(1);
            let mut accepted = 0usize;
            let mut total = 0u128;

            for payment in payments {
                let result = h.raffle.enter(&player, Amount::from_wei(payment));
                if payment >= FEE {
                    prop_assert!(result.is_ok());
                    accepted += 1;
                    total += payment;
                } else {
                    let insufficient = matches!(result, Err(RaffleError::InsufficientPayment { .. }));
                    prop_assert!(insufficient);
                }
            }

            prop_assert_eq!(h.raffle.number_of_players(), accepted);
            prop_assert_eq!(h.raffle.balance(), Amount::from_wei(total));
        }

        #[test]
        fn prop_perform_upkeep_fails_iff_check_fails(
            entries in 0u8..4,
            elapsed in 0u64..(3 * INTERVAL),
            calculating in any::<bool>(),
        ) {
            let mut h = Harness::new();
            for n in 0..entries {
                h.enter(n + 1);
            }
            if calculating && entries > 0 {
                h.pass_interval();
                h.raffle.perform_upkeep(&[]).unwrap();
            }
            h.clock.advance(elapsed);

            let (upkeep_needed, _) = h.raffle.check_upkeep(&[]);
            let before = h.raffle.snapshot();
            let result = h.raffle.perform_upkeep(&[]);

            if upkeep_needed {
                prop_assert!(result.is_ok());
                prop_assert_eq!(h.raffle.state(), RaffleState::Calculating);
            } else {
                let not_needed = matches!(result, Err(RaffleError::UpkeepNotNeeded { .. }));
                prop_assert!(not_needed);
                prop_assert_eq!(h.raffle.snapshot(), before);
            }
        }

        #[test]
        fn prop_winner_is_word_mod_players(
            entries in 1u8..12,
            word in any::<u128>(),
        ) {
            let mut h = Harness::new();
            let players: Vec<Address> = (0..entries).map(|n| h.enter(n + 1)).collect();
            h.pass_interval();
            let request_id = h.raffle.perform_upkeep(&[]).unwrap();

            h.deliver(request_id, word).unwrap();

            let expected = &players[(word % entries as u128) as usize];
            prop_assert_eq!(h.raffle.recent_winner(), Some(expected));
            prop_assert_eq!(h.raffle.balance(), Amount::ZERO);
        }
    }
}
