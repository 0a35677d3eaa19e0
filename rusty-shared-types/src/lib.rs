//! Chain primitives shared across the Rusty Coin staking workspace.
//!
//! This crate holds the plain data the stake engine reads: transactions and
//! their outpoints, unspent coins, the two block header layouts, the script
//! helpers needed to recognise payment and structured-data outputs, and the
//! network-wide consensus parameters.

pub mod block;
pub mod coin;
pub mod params;
pub mod script;
pub mod transaction;

pub use block::{
    BaseHeader, Block, BlockHeader, HeaderDecodeError, LotteryState, StakeHeaderFields, VoteBits,
    HARDFORK_VERSION_BIT,
};
pub use coin::{Coin, TxClass};
pub use params::{ConsensusParams, Network, ParamsError};
pub use transaction::{OutPoint, Transaction, TxInput, TxOutput};

/// A 32-byte hash (transaction ids, block hashes, ticket hashes).
pub type Hash = [u8; 32];

/// A 20-byte HASH160 digest as carried by P2PKH and P2SH scripts.
pub type PubKeyHash = [u8; 20];

/// Monetary amounts in base units. Signed so that range checks mirror the
/// consensus rules that reject negative values.
pub type Amount = i64;

/// Number of base units in one coin.
pub const COIN: Amount = 100_000_000;

/// Upper bound on any single amount or sum of amounts.
pub const MAX_MONEY: Amount = 2_997_000_000 * COIN;

/// Returns true when `value` is a valid monetary amount.
pub fn money_range(value: Amount) -> bool {
    (0..=MAX_MONEY).contains(&value)
}

/// Formats a hash for log output.
pub fn hash_to_hex(hash: &Hash) -> String {
    hex::encode(hash)
}
