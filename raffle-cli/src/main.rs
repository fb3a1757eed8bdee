mod commands;

use clap::{Parser, Subcommand};
use raffle_core::{CoreError, Network, NetworkConfig, Storage};
use raffle_lottery::RaffleError;
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "raffle")]
#[command(about = "Automated raffle with verifiable randomness")]
#[command(version)]
struct Cli {
    /// Data directory for raffle storage
    #[arg(short, long, global = true)]
    data_dir: Option<PathBuf>,

    /// Network to use (hardhat, goerli)
    #[arg(short, long, global = true, default_value = "hardhat")]
    network: Network,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Deploy a raffle with a mock coordinator and play rounds
    Simulate {
        /// Players entering each round
        #[arg(short, long, default_value_t = 4)]
        players: u32,
        /// Rounds to play
        #[arg(short, long, default_value_t = 1)]
        rounds: u32,
        /// Entrance fee in wei (defaults to the network's)
        #[arg(long)]
        fee: Option<u128>,
        /// Round interval in seconds (defaults to the network's)
        #[arg(long)]
        interval: Option<u64>,
        /// Hex seed for the mock coordinator (random if omitted)
        #[arg(long)]
        seed: Option<String>,
    },
    /// Show a stored raffle
    Status {
        /// Raffle ID
        raffle_id: String,
    },
    /// Show completed rounds
    History {
        /// Only rounds of this raffle
        raffle_id: Option<String>,
    },
    /// List stored raffles
    List,
    /// Print the network configuration
    Config,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Initialize logging
    let log_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(format!(
            "raffle={},raffle_lottery={},raffle_core={}",
            log_level, log_level, log_level
        )))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let data_dir = cli.data_dir.unwrap_or_else(|| {
        dirs::data_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("raffle")
    });
    tokio::fs::create_dir_all(&data_dir).await?;

    let storage = Storage::new(&data_dir.join("raffle.db")).await?;
    let network_config = NetworkConfig::for_network(cli.network);

    let result = match cli.command {
        Commands::Simulate {
            players,
            rounds,
            fee,
            interval,
            seed,
        } => {
            let options = commands::SimulateOptions {
                players,
                rounds,
                fee,
                interval,
                seed,
            };
            commands::simulate(&storage, network_config, options).await
        }
        Commands::Status { raffle_id } => commands::show_status(&storage, &raffle_id).await,
        Commands::History { raffle_id } => {
            commands::show_history(&storage, raffle_id.as_deref()).await
        }
        Commands::List => commands::list_raffles(&storage).await,
        Commands::Config => commands::show_config(&network_config),
    };

    if let Err(e) = result {
        if let Some(err) = e.downcast_ref::<RaffleError>() {
            match err {
                RaffleError::UpkeepNotNeeded {
                    balance,
                    num_players,
                    state,
                } => {
                    eprintln!("Error: Upkeep not needed");
                    eprintln!(
                        "Balance: {}, Players: {}, State: {}",
                        balance, num_players, state
                    );
                }
                RaffleError::Core(CoreError::InsufficientFunds { need, available }) => {
                    eprintln!("Error: Insufficient funds");
                    eprintln!("Need: {}, Available: {}", need, available);
                }
                _ => eprintln!("Error: {}", err),
            }
        } else {
            eprintln!("Error: {}", e);
        }
        std::process::exit(1);
    }

    Ok(())
}
