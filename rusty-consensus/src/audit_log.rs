//! Audit logging for stake state changes.

use rusty_shared_types::{hash_to_hex, Amount, Hash};
use tracing::{event, Level};

use crate::error::ConsensusError;
use crate::ticket_pool::StakeNode;

/// Logs a block whose stake rules passed and whose stake node was derived.
#[tracing::instrument(level = "info", skip(hash, node))]
pub fn log_block_stake_connected(hash: &Hash, height: u32, node: &StakeNode, fees: Amount) {
    event!(
        Level::INFO,
        "Block stake connected: height={}, hash={}, pool_size={}, winners={}, fees={}",
        height,
        hash_to_hex(hash),
        node.pool_size(),
        node.winners().len(),
        fees
    );
}

/// Logs a block rejected by the stake rules.
#[tracing::instrument(level = "warn", skip(hash, error))]
pub fn log_block_stake_rejected(hash: &Hash, height: u32, error: &ConsensusError) {
    let code = error
        .reject_reason()
        .map(|reason| reason.code())
        .unwrap_or_else(|| "internal".to_string());
    event!(
        Level::WARN,
        "Block stake rejected: height={}, hash={}, code={}: {}",
        height,
        hash_to_hex(hash),
        code,
        error
    );
}

/// Logs what a block did to the ticket pool.
#[tracing::instrument(level = "debug", skip(node))]
pub fn log_ticket_pool_transition(node: &StakeNode) {
    event!(
        Level::DEBUG,
        "Ticket pool at height {}: live={}, matured={}, voted={}, missed={}, expired={}, revoked={}, state={}",
        node.height(),
        node.pool_size(),
        node.new_tickets().len(),
        node.spent_by_block().len(),
        node.missed_by_block().len(),
        node.expired_by_block().len(),
        node.revoked_by_block().len(),
        hex::encode(node.final_state())
    );
}

/// Logs a change of the active chain that disconnected blocks.
#[tracing::instrument(level = "info", skip(old_tip, new_tip))]
pub fn log_reorganization(
    old_tip: &Hash,
    new_tip: &Hash,
    fork_height: u32,
    disconnected: usize,
    connected: usize,
) {
    event!(
        Level::INFO,
        "Reorganization at fork height {}: {} -> {}, disconnected={}, connected={}",
        fork_height,
        hash_to_hex(old_tip),
        hash_to_hex(new_tip),
        disconnected,
        connected
    );
}

#[tracing::instrument(level = "info")]
pub fn log_stake_difficulty_retarget(height: u32, previous: Amount, next: Amount) {
    event!(
        Level::INFO,
        "Stake difficulty retarget at height {}: {} -> {}",
        height,
        previous,
        next
    );
}
