//! Proof-of-stake consensus rules for Rusty Coin.

pub mod audit_log;
pub mod block_validation;
pub mod chain;
pub mod error;
pub mod remuneration;
pub mod stake_difficulty;
pub mod stake_pool_fee;
pub mod stake_tx;
pub mod stake_version;
pub mod structure;
pub mod subsidy;
pub mod ticket_pool;
pub mod tx_inputs;
pub mod utxo_set;

pub use block_validation::{ConnectedBlock, StakeValidator};
pub use chain::{BlockId, ChainEntry, ChainIndex, Reorganization, StakeDelta};
pub use error::{ConsensusError, RejectKind, RejectReason, StructureError};
pub use remuneration::{build_payment_outputs, calc_contributor_remuneration, calc_ticket_payouts};
pub use stake_difficulty::{
    calc_next_stake_diff_v2, calculate_next_required_stake_difficulty,
    estimate_next_stake_difficulty, ticket_vwap, ticket_vwap_recent,
};
pub use stake_pool_fee::{is_valid_pool_fee_percent, stake_pool_ticket_fee};
pub use stake_tx::{
    parse_tx_class, parse_vote, ExtendedVoteBits, StakeTx, TicketContribution, VoteData, VoteVersion,
};
pub use stake_version::StakeVersionVoter;
pub use subsidy::{estimate_supply, miner_subsidy, total_block_subsidy, voter_subsidy};
pub use ticket_pool::{calc_lottery_iv, StakeNode, TicketValue, UndoTicketData};
pub use tx_inputs::{check_stake_transaction, check_tx_inputs};
pub use utxo_set::{CoinsOverlay, TicketSource, UtxoBatch, UtxoSet, UtxoView};

pub use rusty_shared_types::ConsensusParams;
