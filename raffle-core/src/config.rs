use crate::error::{CoreError, Result};
use crate::types::{Address, Amount};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// 0.01 ETH
pub const DEFAULT_ENTRANCE_FEE: Amount = Amount::from_wei(10_000_000_000_000_000);
pub const DEFAULT_INTERVAL_SECS: u64 = 30;
pub const DEFAULT_CALLBACK_GAS_LIMIT: u32 = 500_000;
pub const DEFAULT_KEY_HASH: &str =
    "0xd89b2bf150e3b9e13446986e571fb9cab24b13cea0a43ea20a6049a85cc807cc";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Network {
    /// Local development chain, deploys a mock coordinator
    Hardhat,
    Goerli,
}

impl Network {
    pub fn chain_id(self) -> u64 {
        match self {
            Network::Hardhat => 31337,
            Network::Goerli => 5,
        }
    }

    pub fn is_development(self) -> bool {
        matches!(self, Network::Hardhat)
    }
}

impl fmt::Display for Network {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Network::Hardhat => f.write_str("hardhat"),
            Network::Goerli => f.write_str("goerli"),
        }
    }
}

impl FromStr for Network {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "hardhat" | "localhost" => Ok(Network::Hardhat),
            "goerli" => Ok(Network::Goerli),
            other => Err(CoreError::config(format!("Unknown network: {}", other))),
        }
    }
}

/// Parameters passed to the randomness oracle with every request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OracleConfig {
    pub subscription_id: u64,
    /// Gas lane / key selector
    pub key_hash: String,
    pub callback_gas_limit: u32,
    pub request_confirmations: u16,
}

/// Immutable parameters of a deployed raffle
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RaffleConfig {
    pub entrance_fee: Amount,
    /// Seconds that must pass between rounds
    pub interval: u64,
    pub oracle: OracleConfig,
}

impl Default for RaffleConfig {
    fn default() -> Self {
        Self {
            entrance_fee: DEFAULT_ENTRANCE_FEE,
            interval: DEFAULT_INTERVAL_SECS,
            oracle: OracleConfig {
                subscription_id: 0,
                key_hash: DEFAULT_KEY_HASH.to_string(),
                callback_gas_limit: DEFAULT_CALLBACK_GAS_LIMIT,
                request_confirmations: 3,
            },
        }
    }
}

impl RaffleConfig {
    pub fn validate(&self) -> Result<()> {
        if self.entrance_fee.is_zero() {
            return Err(CoreError::config("Entrance fee must be greater than 0"));
        }

        if self.oracle.key_hash.is_empty() {
            return Err(CoreError::config("Key hash cannot be empty"));
        }

        if self.oracle.callback_gas_limit == 0 {
            return Err(CoreError::config(
                "Callback gas limit must be greater than 0",
            ));
        }

        Ok(())
    }
}

/// Everything needed to deploy a raffle on a given network
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkConfig {
    pub network: Network,
    pub chain_id: u64,
    pub block_confirmations: u16,
    /// Coordinator address on live networks; `None` means deploy the mock
    pub vrf_coordinator: Option<Address>,
    pub raffle: RaffleConfig,
}

impl NetworkConfig {
    pub fn for_network(network: Network) -> Self {
        let mut raffle = RaffleConfig::default();

        let (block_confirmations, vrf_coordinator) = match network {
            Network::Hardhat => (1, None),
            Network::Goerli => {
                raffle.oracle.key_hash =
                    "0x79d3d8832d904592c0bf9818b621522c988bb8b0c05cdc3b15aea1b6e8db0c15"
                        .to_string();
                raffle.oracle.subscription_id = std::env::var("RAFFLE_SUBSCRIPTION_ID")
                    .ok()
                    .and_then(|id| id.parse().ok())
                    .unwrap_or(0);
                (
                    6,
                    Some(Address::new("0x2Ca8E0C643bDe4C2E08ab1fA0da3401AdAD7734D")),
                )
            }
        };
        raffle.oracle.request_confirmations = block_confirmations;

        Self {
            network,
            chain_id: network.chain_id(),
            block_confirmations,
            vrf_coordinator,
            raffle,
        }
    }

    pub fn is_development(&self) -> bool {
        self.network.is_development()
    }

    pub fn validate(&self) -> Result<()> {
        self.raffle.validate()?;

        if !self.is_development() {
            if self.vrf_coordinator.is_none() {
                return Err(CoreError::config(format!(
                    "No coordinator address for {}",
                    self.network
                )));
            }

            // live subscriptions are created out of band
            if self.raffle.oracle.subscription_id == 0 {
                return Err(CoreError::config(
                    "Subscription id must be set (RAFFLE_SUBSCRIPTION_ID)",
                ));
            }
        }

        Ok(())
    }
}
