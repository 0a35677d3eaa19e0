//! Block subsidy schedule and its split between miners and voters.

use rusty_shared_types::{Amount, ConsensusParams};

/// Halvings after which the subsidy is forced to zero.
const MAX_HALVINGS: u32 = 64;

/// Full block subsidy at `height`, before the work/stake split.
pub fn total_block_subsidy(height: u32, params: &ConsensusParams) -> Amount {
    let halvings = height / params.subsidy_halving_interval;
    if halvings >= MAX_HALVINGS {
        return 0;
    }
    params.base_subsidy >> halvings
}

/// Subsidy paid to each individual vote in a block at `height`.
pub fn voter_subsidy(height: u32, params: &ConsensusParams) -> Amount {
    if height < params.stake_validation_height {
        return 0;
    }
    let total = total_block_subsidy(height, params);
    let stake_share =
        total * params.stake_subsidy_proportion as Amount / params.total_subsidy_proportions() as Amount;
    stake_share / params.tickets_per_block as Amount
}

/// Subsidy paid to the miner of a block at `height`.
pub fn miner_subsidy(height: u32, params: &ConsensusParams) -> Amount {
    let total = total_block_subsidy(height, params);
    if height < params.stake_validation_height {
        return total;
    }
    total * params.work_subsidy_proportion as Amount / params.total_subsidy_proportions() as Amount
}

/// Coins issued by the time the block at `height` is mined, counting the
/// full subsidy of every block including `height`.
pub fn estimate_supply(height: i64, params: &ConsensusParams) -> Amount {
    if height <= 0 {
        return 0;
    }
    let interval = params.subsidy_halving_interval as i64;
    let halvings = height / interval;

    let mut supply: Amount = 0;
    let mut subsidy = total_block_subsidy(0, params);
    for i in 0..halvings {
        supply = supply.saturating_add(interval.saturating_mul(subsidy));
        subsidy = if i >= MAX_HALVINGS as i64 { 0 } else { subsidy >> 1 };
    }
    supply.saturating_add((1 + height % interval) * subsidy)
}
