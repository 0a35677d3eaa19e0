//! Network-wide consensus parameters.
//!
//! A parameter set is chosen once at startup, either from a built-in preset
//! or from a JSON file, and is shared read-only afterwards.

use std::path::Path;

use log::{info, warn};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{Amount, COIN};

#[derive(Debug, Error)]
pub enum ParamsError {
    #[error("Failed to read parameter file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse parameters: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid parameter set: {0}")]
    Invalid(String),
}

/// Identifies a preset parameter set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Network {
    Mainnet,
    Testnet,
    Regtest,
}

/// Consensus parameters of the staking subsystem.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsensusParams {
    /// Network this parameter set belongs to
    pub network: Network,
    /// Lowest price a ticket can ever cost (in base units)
    pub minimum_stake_diff: Amount,
    /// Target number of live tickets
    pub ticket_pool_size: u32,
    /// Number of lottery winners per block
    pub tickets_per_block: u16,
    /// Blocks a ticket waits after purchase before it goes live
    pub ticket_maturity: u32,
    /// Blocks a live ticket may wait for selection before it is missed
    pub ticket_expiry: u32,
    /// Blocks after which an unmined vote is dropped from the mempool
    pub mempool_vote_expiry: u32,
    /// Blocks before coinbase outputs, vote rewards and refunds can be spent
    pub coinbase_maturity: u32,
    /// Blocks before ticket change outputs can be spent
    pub sstx_change_maturity: u32,
    /// Weight applied to the pool size deviation when pricing tickets
    pub ticket_pool_size_weight: u16,
    /// Smoothing factor of the stake difficulty average
    pub stake_diff_alpha: i64,
    /// Blocks per stake difficulty retarget window
    pub stake_diff_window_size: u32,
    /// Number of windows used for averaged ticket prices
    pub stake_diff_windows: u32,
    /// Blocks per stake version tally interval
    pub stake_version_interval: u32,
    /// Maximum number of tickets one block may buy
    pub max_fresh_stake_per_block: u8,
    /// Height at which the first tickets can mature
    pub stake_enabled_height: u32,
    /// Height from which blocks must carry votes
    pub stake_validation_height: u32,
    /// Signature script every vote subsidy input must carry
    #[serde(with = "hex::serde")]
    pub stake_base_sig_script: Vec<u8>,
    /// Supermajority numerator
    pub stake_majority_multiplier: u32,
    /// Supermajority denominator
    pub stake_majority_divisor: u32,
    /// Lowest total vote fee limit a ticket may declare
    pub minimum_total_vote_fee_limit: Amount,
    /// Lowest total revocation fee limit a ticket may declare
    pub minimum_total_revocation_fee_limit: Amount,
    /// Blocks between subsidy halvings
    pub subsidy_halving_interval: u32,
    /// Block subsidy before the first halving (in base units)
    pub base_subsidy: Amount,
    /// Share of the subsidy paid to the miner once votes are required
    pub work_subsidy_proportion: u16,
    /// Share of the subsidy paid to voters
    pub stake_subsidy_proportion: u16,
    /// First height whose header carries the stake fields
    pub hybrid_fork_height: u32,
}

impl Default for ConsensusParams {
    fn default() -> Self {
        Self::mainnet()
    }
}

impl ConsensusParams {
    pub fn mainnet() -> Self {
        let ticket_pool_size = 8192;
        let tickets_per_block = 5;
        ConsensusParams {
            network: Network::Mainnet,
            minimum_stake_diff: 2 * COIN,
            ticket_pool_size,
            tickets_per_block,
            ticket_maturity: 256,
            ticket_expiry: 5 * ticket_pool_size,
            mempool_vote_expiry: 10,
            coinbase_maturity: 100,
            sstx_change_maturity: 1,
            ticket_pool_size_weight: 4,
            stake_diff_alpha: 1,
            stake_diff_window_size: 144,
            stake_diff_windows: 20,
            stake_version_interval: 144 * 2 * 7, // ~2 weeks
            max_fresh_stake_per_block: 4 * tickets_per_block as u8,
            stake_enabled_height: 155_062,    // fork height + 2 * maturity
            stake_validation_height: 155_574, // enabled height + 2 * maturity
            stake_base_sig_script: vec![0x00, 0x00],
            stake_majority_multiplier: 3,
            stake_majority_divisor: 4,
            minimum_total_vote_fee_limit: 0,
            minimum_total_revocation_fee_limit: 1 << 15,
            subsidy_halving_interval: 210_000,
            base_subsidy: 1500 * COIN,
            work_subsidy_proportion: 7,
            stake_subsidy_proportion: 3,
            hybrid_fork_height: 154_550,
        }
    }

    pub fn testnet() -> Self {
        let ticket_pool_size = 1024;
        let hybrid_fork_height = 1500;
        let ticket_maturity = 16;
        let stake_enabled_height = hybrid_fork_height + ticket_maturity + 1;
        ConsensusParams {
            network: Network::Testnet,
            minimum_stake_diff: COIN / 5,
            ticket_pool_size,
            ticket_maturity,
            ticket_expiry: 6 * ticket_pool_size,
            stake_enabled_height,
            stake_validation_height: stake_enabled_height + 100,
            hybrid_fork_height,
            ..Self::mainnet()
        }
    }

    pub fn regtest() -> Self {
        let ticket_pool_size = 64;
        ConsensusParams {
            network: Network::Regtest,
            minimum_stake_diff: 20_000,
            ticket_pool_size,
            ticket_maturity: 8,
            ticket_expiry: 3 * ticket_pool_size,
            stake_diff_window_size: 8,
            stake_diff_windows: 8,
            stake_version_interval: 6 * 24, // ~1 day
            stake_enabled_height: 2000,
            stake_validation_height: 2100,
            stake_base_sig_script: vec![0x01, 0x73, 0x01, 0x57],
            subsidy_halving_interval: 150,
            hybrid_fork_height: 1500,
            ..Self::mainnet()
        }
    }

    pub fn for_network(network: Network) -> Self {
        match network {
            Network::Mainnet => Self::mainnet(),
            Network::Testnet => Self::testnet(),
            Network::Regtest => Self::regtest(),
        }
    }

    /// Parses and validates a JSON parameter set.
    pub fn from_json_str(json: &str) -> Result<Self, ParamsError> {
        let params: ConsensusParams = serde_json::from_str(json)?;
        params.validate()?;
        Ok(params)
    }

    /// Reads, parses and validates a JSON parameter file.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, ParamsError> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path)?;
        let params = Self::from_json_str(&json)?;
        info!(
            "Loaded {:?} consensus parameters from {}",
            params.network,
            path.display()
        );
        if params != Self::for_network(params.network) {
            warn!(
                "Parameters in {} override the built-in {:?} preset",
                path.display(),
                params.network
            );
        }
        Ok(params)
    }

    /// Checks the relations the stake rules rely on.
    pub fn validate(&self) -> Result<(), ParamsError> {
        let invalid = |msg: &str| Err(ParamsError::Invalid(msg.to_string()));

        if self.tickets_per_block == 0 {
            return invalid("tickets_per_block must be positive");
        }
        if self.ticket_maturity == 0 {
            return invalid("ticket_maturity must be positive");
        }
        if self.ticket_pool_size == 0 {
            return invalid("ticket_pool_size must be positive");
        }
        if self.stake_diff_window_size == 0 || self.stake_version_interval == 0 {
            return invalid("window sizes and intervals must be positive");
        }
        if self.subsidy_halving_interval == 0 {
            return invalid("subsidy_halving_interval must be positive");
        }
        if self.stake_majority_divisor == 0
            || self.stake_majority_multiplier > self.stake_majority_divisor
        {
            return invalid("stake majority must be a fraction no greater than one");
        }
        if self.stake_validation_height <= self.stake_enabled_height {
            return invalid("stake_validation_height must be above stake_enabled_height");
        }
        if self.hybrid_fork_height >= self.stake_enabled_height {
            return invalid("hybrid_fork_height must be below stake_enabled_height");
        }
        if self.mempool_vote_expiry >= self.ticket_expiry {
            return invalid("mempool_vote_expiry must be below ticket_expiry");
        }
        if self.minimum_stake_diff <= 0 {
            return invalid("minimum_stake_diff must be positive");
        }
        if self.total_subsidy_proportions() == 0 {
            return invalid("subsidy proportions must not both be zero");
        }
        if !(2..=100).contains(&self.stake_base_sig_script.len()) {
            return invalid("stake_base_sig_script must be 2 to 100 bytes");
        }
        Ok(())
    }

    pub fn total_subsidy_proportions(&self) -> u32 {
        self.work_subsidy_proportion as u32 + self.stake_subsidy_proportion as u32
    }

    /// Supermajority threshold of `count`, truncating.
    pub fn majority_of(&self, count: u64) -> u64 {
        count * self.stake_majority_multiplier as u64 / self.stake_majority_divisor as u64
    }

    /// Fewest votes a block at or above the validation height must carry.
    pub fn min_votes_required(&self) -> u16 {
        self.tickets_per_block / 2 + 1
    }
}
