use chrono::{DateTime, Utc};
use comfy_table::{presets::UTF8_FULL, Table};
use parking_lot::Mutex;
use raffle_core::{
    Address, Amount, Clock, InMemoryLedger, ManualClock, NetworkConfig, RaffleRecord,
    RaffleStore, RoundRecord, Storage,
};
use raffle_lottery::oracle::mock::{BASE_FEE, GAS_PRICE_LINK};
use raffle_lottery::{
    deploy_with_mock, MockVrfCoordinator, RaffleSnapshot, UpkeepKeeper, VRF_SUB_FUND_AMOUNT,
};
use std::error::Error;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};

type CommandResult = Result<(), Box<dyn Error>>;

const KEEPER_POLL: Duration = Duration::from_millis(20);
const ORACLE_TIMEOUT: Duration = Duration::from_secs(10);

pub struct SimulateOptions {
    pub players: u32,
    pub rounds: u32,
    pub fee: Option<u128>,
    pub interval: Option<u64>,
    pub seed: Option<String>,
}

fn parse_seed(seed: Option<&str>) -> Result<[u8; 32], Box<dyn Error>> {
    match seed {
        Some(hex_seed) => {
            let bytes = hex::decode(hex_seed.trim_start_matches("0x"))?;
            let mut seed = [0u8; 32];
            let len = bytes.len().min(32);
            seed[..len].copy_from_slice(&bytes[..len]);
            Ok(seed)
        }
        None => Ok(rand::random()),
    }
}

fn player_address(index: u32) -> Address {
    let mut bytes = [0u8; 20];
    bytes[0] = 0xaa;
    bytes[16..].copy_from_slice(&(index + 1).to_be_bytes());
    Address::from_bytes(&bytes)
}

fn format_timestamp(secs: u64) -> String {
    DateTime::<Utc>::from_timestamp(secs as i64, 0)
        .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
        .unwrap_or_else(|| secs.to_string())
}

pub async fn simulate(
    storage: &Storage,
    network_config: NetworkConfig,
    options: SimulateOptions,
) -> CommandResult {
    if !network_config.is_development() {
        return Err(format!(
            "Simulation needs a development network, not {}",
            network_config.network
        )
        .into());
    }
    if options.players == 0 || options.rounds == 0 {
        return Err("Need at least one player and one round".into());
    }

    let mut config = network_config.raffle.clone();
    if let Some(fee) = options.fee {
        config.entrance_fee = Amount::from_wei(fee);
    }
    if let Some(interval) = options.interval {
        config.interval = interval;
    }
    config.validate()?;

    let seed = parse_seed(options.seed.as_deref())?;
    let ledger = Arc::new(InMemoryLedger::new());
    let clock = Arc::new(ManualClock::starting_now());
    let coordinator = Arc::new(MockVrfCoordinator::with_seed(BASE_FEE, GAS_PRICE_LINK, seed));

    let fund_amount = coordinator
        .fulfillment_cost(config.oracle.callback_gas_limit)
        .checked_mul(u128::from(options.rounds))
        .map(|needed| needed.max(VRF_SUB_FUND_AMOUNT))
        .ok_or("Too many rounds to fund")?;

    let raffle = deploy_with_mock(
        config.clone(),
        coordinator.clone(),
        ledger.clone(),
        clock.clone(),
        fund_amount,
    )?;
    let raffle_id = raffle.id();
    let raffle = Arc::new(Mutex::new(raffle));

    let store = RaffleStore::new(storage);
    let created_at = Utc::now();
    let initial = serde_json::to_value(raffle.lock().snapshot())?;
    store
        .save_raffle(&RaffleRecord {
            id: raffle_id.to_string(),
            network: network_config.network.to_string(),
            snapshot: initial,
            created_at,
            updated_at: created_at,
        })
        .await?;

    let players: Vec<Address> = (0..options.players).map(player_address).collect();
    let per_player = config
        .entrance_fee
        .checked_mul(u128::from(options.rounds))
        .ok_or("Entrance fee too large")?;
    for player in &players {
        ledger.mint(player, per_player)?;
    }

    tracing::info!(
        "Simulating {} rounds of raffle {} with {} players",
        options.rounds,
        raffle_id,
        players.len()
    );
    println!("Deployed raffle {}", raffle_id);
    println!("Seed: 0x{}", hex::encode(seed));
    println!();

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let (request_tx, mut request_rx) = mpsc::channel(4);
    let keeper = UpkeepKeeper::new(raffle.clone(), KEEPER_POLL);
    let keeper_handle = tokio::spawn(keeper.run(shutdown_rx, request_tx));

    let mut table = Table::new();
    table.load_preset(UTF8_FULL);
    table.set_header(vec!["Round", "Request", "Winner", "Prize", "Players"]);

    for _ in 0..options.rounds {
        {
            let mut raffle = raffle.lock();
            for player in &players {
                raffle.enter(player, config.entrance_fee)?;
            }
        }

        // let the round interval elapse
        clock.advance(config.interval + 1);

        let request_id = tokio::time::timeout(ORACLE_TIMEOUT, request_rx.recv())
            .await?
            .ok_or("Keeper stopped before requesting randomness")?;

        // confirmation delay before the oracle answers
        clock.advance(config.oracle.request_confirmations as u64 * 12);
        let (winner, prize, round) = {
            let mut raffle = raffle.lock();
            let prize = raffle.balance();
            coordinator.fulfill_random_words(request_id, &mut *raffle)?;
            let winner = raffle
                .recent_winner()
                .cloned()
                .ok_or("Round closed without a winner")?;
            (winner, prize, raffle.rounds_completed())
        };

        tracing::info!("Round {} of raffle {} won by {}", round, raffle_id, winner);

        store
            .save_round(&RoundRecord {
                raffle_id: raffle_id.to_string(),
                round,
                request_id,
                winner: winner.clone(),
                prize,
                players: players.len(),
                closed_at: clock.now(),
            })
            .await?;

        table.add_row(vec![
            round.to_string(),
            request_id.to_string(),
            winner.to_string(),
            prize.to_string(),
            players.len().to_string(),
        ]);
    }

    // a closed channel means the keeper already stopped; its result comes next
    shutdown_tx.send(true).ok();
    keeper_handle.await??;
    tracing::debug!("Keeper for raffle {} joined", raffle_id);

    let (snapshot, info) = {
        let raffle = raffle.lock();
        (raffle.snapshot(), raffle.get_info())
    };
    store
        .save_raffle(&RaffleRecord {
            id: raffle_id.to_string(),
            network: network_config.network.to_string(),
            snapshot: serde_json::to_value(&snapshot)?,
            created_at,
            updated_at: Utc::now(),
        })
        .await?;

    println!("{}", table);
    println!(
        "Raffle {} is {} after {} rounds (pool {})",
        info.id, info.state, info.rounds_completed, info.balance
    );
    Ok(())
}

pub async fn show_status(storage: &Storage, raffle_id: &str) -> CommandResult {
    let store = RaffleStore::new(storage);
    let record = store
        .load_raffle(raffle_id)
        .await?
        .ok_or_else(|| format!("Raffle {} not found", raffle_id))?;
    let snapshot: RaffleSnapshot = serde_json::from_value(record.snapshot)?;

    let mut table = Table::new();
    table.load_preset(UTF8_FULL);
    table.set_header(vec!["Field", "Value"]);
    table.add_row(vec!["ID".to_string(), snapshot.id.to_string()]);
    table.add_row(vec!["Network".to_string(), record.network]);
    table.add_row(vec!["Address".to_string(), snapshot.address.to_string()]);
    table.add_row(vec!["State".to_string(), snapshot.state.to_string()]);
    table.add_row(vec![
        "Entrance fee".to_string(),
        snapshot.config.entrance_fee.to_string(),
    ]);
    table.add_row(vec![
        "Interval".to_string(),
        format!("{}s", snapshot.config.interval),
    ]);
    table.add_row(vec![
        "Players".to_string(),
        snapshot.players.len().to_string(),
    ]);
    table.add_row(vec![
        "Recent winner".to_string(),
        snapshot
            .recent_winner
            .map(|w| w.to_string())
            .unwrap_or_else(|| "-".to_string()),
    ]);
    table.add_row(vec![
        "Pending request".to_string(),
        snapshot
            .pending_request
            .map(|r| r.to_string())
            .unwrap_or_else(|| "-".to_string()),
    ]);
    table.add_row(vec![
        "Last round".to_string(),
        format_timestamp(snapshot.last_timestamp),
    ]);
    table.add_row(vec![
        "Rounds completed".to_string(),
        snapshot.rounds_completed.to_string(),
    ]);

    println!("{}", table);
    Ok(())
}

pub async fn show_history(storage: &Storage, raffle_id: Option<&str>) -> CommandResult {
    let store = RaffleStore::new(storage);
    let rounds = store.list_rounds(raffle_id).await?;

    if rounds.is_empty() {
        println!("No completed rounds");
        return Ok(());
    }

    let mut table = Table::new();
    table.load_preset(UTF8_FULL);
    table.set_header(vec![
        "Raffle", "Round", "Request", "Winner", "Prize", "Players", "Closed",
    ]);
    for round in rounds {
        table.add_row(vec![
            round.raffle_id,
            round.round.to_string(),
            round.request_id.to_string(),
            round.winner.to_string(),
            round.prize.to_string(),
            round.players.to_string(),
            format_timestamp(round.closed_at),
        ]);
    }

    println!("{}", table);
    Ok(())
}

pub async fn list_raffles(storage: &Storage) -> CommandResult {
    let store = RaffleStore::new(storage);
    let raffles = store.list_raffles().await?;

    if raffles.is_empty() {
        println!("No raffles found");
        return Ok(());
    }

    let mut table = Table::new();
    table.load_preset(UTF8_FULL);
    table.set_header(vec!["ID", "Network", "State", "Rounds", "Updated"]);
    for record in raffles {
        let state = record.snapshot["state"].as_str().unwrap_or("?").to_string();
        let rounds = record.snapshot["rounds_completed"]
            .as_u64()
            .unwrap_or(0)
            .to_string();
        table.add_row(vec![
            record.id,
            record.network,
            state,
            rounds,
            record.updated_at.format("%Y-%m-%d %H:%M:%S").to_string(),
        ]);
    }

    println!("{}", table);
    Ok(())
}

pub fn show_config(network_config: &NetworkConfig) -> CommandResult {
    network_config.validate()?;
    println!("{}", serde_json::to_string_pretty(network_config)?);
    Ok(())
}
