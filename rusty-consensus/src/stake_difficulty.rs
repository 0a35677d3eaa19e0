//! Ticket price retargeting.
//!
//! The price changes once per `stake_diff_window_size` blocks. The new price
//! scales the current one by the relative change of the pool (live plus
//! immature tickets) since the previous retarget and by the pool's distance
//! from its target size, all in 256-bit integer math.

use primitive_types::U256;
use rusty_shared_types::{Amount, ConsensusParams};

use crate::chain::{BlockId, ChainIndex};
use crate::error::ConsensusError;
use crate::subsidy::estimate_supply;

/// Number of tickets bought in the `count` blocks ending at `start`.
pub fn sum_purchased_tickets(chain: &ChainIndex, start: Option<BlockId>, count: i64) -> i64 {
    let mut purchased = 0i64;
    let mut node = start;
    let mut traversed = 0i64;
    while let Some(id) = node {
        if traversed >= count {
            break;
        }
        let entry = chain.get(id);
        purchased += entry.fresh_stake() as i64;
        node = entry.parent();
        traversed += 1;
    }
    purchased
}

fn ancestor_at(chain: &ChainIndex, id: BlockId, height: i64) -> Option<BlockId> {
    if height < 0 {
        return None;
    }
    chain.get_ancestor(id, height as u32)
}

/// `cur_diff * cur_pool_size_all^2 / (prev_pool_size_all * target_pool_size_all)`,
/// clamped to `[minimum_stake_diff, estimated_supply / ticket_pool_size]`.
pub fn calc_next_stake_diff_v2(
    params: &ConsensusParams,
    next_height: i64,
    cur_diff: Amount,
    prev_pool_size_all: i64,
    cur_pool_size_all: i64,
) -> Amount {
    let votes_per_block = params.tickets_per_block as i64;
    let ticket_pool_size = params.ticket_pool_size as i64;
    let ticket_maturity = params.ticket_maturity as i64;
    let target_pool_size_all = votes_per_block * (ticket_pool_size + ticket_maturity);
    if prev_pool_size_all <= 0 || target_pool_size_all <= 0 {
        return cur_diff;
    }

    let cur_all = U256::from(cur_pool_size_all.max(0) as u64);
    let next_big = U256::from(cur_diff.max(0) as u64) * cur_all * cur_all
        / U256::from(prev_pool_size_all as u64)
        / U256::from(target_pool_size_all as u64);

    let mut next_diff = next_big.low_u64() as Amount;
    let maximum_stake_diff = estimate_supply(next_height, params) / ticket_pool_size;
    if next_diff > maximum_stake_diff {
        next_diff = maximum_stake_diff;
    }
    if next_diff < params.minimum_stake_diff {
        next_diff = params.minimum_stake_diff;
    }
    next_diff
}

/// Price every ticket bought in the block after `tip` must pay.
pub fn calculate_next_required_stake_difficulty(
    chain: &ChainIndex,
    tip: BlockId,
    params: &ConsensusParams,
) -> Amount {
    let last = chain.get(tip);
    let next_height = last.height() as i64 + 1;
    if next_height < params.stake_enabled_height as i64 {
        return params.minimum_stake_diff;
    }

    let interval = params.stake_diff_window_size as i64;
    let cur_diff = last.stake_difficulty();
    if next_height % interval != 0 {
        return cur_diff;
    }

    // Pool data of the previous retarget is read from the block before it.
    let ticket_maturity = params.ticket_maturity as i64;
    let prev_retarget = ancestor_at(chain, tip, next_height - interval - 1);
    let prev_pool_size = prev_retarget.map_or(0, |id| chain.get(id).ticket_pool_size() as i64);
    let prev_immature = sum_purchased_tickets(chain, prev_retarget, ticket_maturity);
    let prev_pool_size_all = prev_pool_size + prev_immature;
    if prev_pool_size_all == 0 {
        return cur_diff;
    }

    let immature = sum_purchased_tickets(chain, Some(tip), ticket_maturity);
    let cur_pool_size_all = last.ticket_pool_size() as i64 + immature;
    calc_next_stake_diff_v2(
        params,
        next_height,
        cur_diff,
        prev_pool_size_all,
        cur_pool_size_all,
    )
}

/// Projects the price of the next retarget assuming `new_tickets` more
/// tickets are bought before it, or the most the remaining blocks allow when
/// `use_max_tickets` is set. Not a consensus value.
pub fn estimate_next_stake_difficulty(
    chain: &ChainIndex,
    tip: BlockId,
    new_tickets: i64,
    use_max_tickets: bool,
    params: &ConsensusParams,
) -> Result<Amount, ConsensusError> {
    let last = chain.get(tip);
    let cur_height = last.height() as i64;
    let ticket_maturity = params.ticket_maturity as i64;
    let interval = params.stake_diff_window_size as i64;
    let blocks_until_retarget = interval - cur_height % interval;
    let next_retarget_height = cur_height + blocks_until_retarget;

    let max_tickets_per_block = params.max_fresh_stake_per_block as i64;
    let max_remaining_tickets = (blocks_until_retarget - 1) * max_tickets_per_block;
    let new_tickets = if use_max_tickets {
        max_remaining_tickets
    } else {
        new_tickets
    };
    if new_tickets > max_remaining_tickets {
        return Err(ConsensusError::InvalidEstimate(format!(
            "{} tickets exceed the {} that can still be bought before height {}",
            new_tickets, max_remaining_tickets, next_retarget_height
        )));
    }

    if next_retarget_height < params.stake_enabled_height as i64 {
        return Ok(params.minimum_stake_diff);
    }

    let prev_retarget = ancestor_at(chain, tip, next_retarget_height - interval - 1);
    let prev_pool_size = prev_retarget.map_or(0, |id| chain.get(id).ticket_pool_size() as i64);
    let prev_immature = sum_purchased_tickets(chain, prev_retarget, ticket_maturity);
    let cur_diff = last.stake_difficulty();
    let prev_pool_size_all = prev_pool_size + prev_immature;
    if prev_pool_size_all == 0 {
        return Ok(cur_diff);
    }

    // Known tickets still immature at the next retarget, then the estimated ones.
    let next_maturity_floor = next_retarget_height - ticket_maturity - 1;
    let mut remaining_immature = 0i64;
    if cur_height > next_maturity_floor {
        remaining_immature =
            sum_purchased_tickets(chain, Some(tip), cur_height - next_maturity_floor);
    }
    remaining_immature += new_tickets.min(ticket_maturity * max_tickets_per_block);

    // Tickets maturing at a height only count toward the pool from the next
    // block on, so the known range ends one block before the maturity floor.
    let final_maturing_height = (next_maturity_floor - 1).min(cur_height);
    let final_maturing = ancestor_at(chain, tip, final_maturing_height);
    let first_maturing_height = cur_height - ticket_maturity;
    let mut maturing = sum_purchased_tickets(
        chain,
        final_maturing,
        final_maturing_height - first_maturing_height + 1,
    );
    if cur_height < next_maturity_floor {
        let estimate_blocks = next_maturity_floor - cur_height - 1;
        maturing += (max_tickets_per_block * estimate_blocks).min(new_tickets);
    }

    let stake_validation_height = params.stake_validation_height as i64;
    let mut pending_votes = 0i64;
    if next_retarget_height > stake_validation_height {
        let voting_blocks = if cur_height < stake_validation_height {
            next_retarget_height - stake_validation_height
        } else {
            blocks_until_retarget - 1
        };
        pending_votes = voting_blocks * params.tickets_per_block as i64;
    }

    let estimated_pool_size = last.ticket_pool_size() as i64 + maturing - pending_votes;
    let estimated_pool_size_all = estimated_pool_size + remaining_immature;
    Ok(calc_next_stake_diff_v2(
        params,
        next_retarget_height,
        cur_diff,
        prev_pool_size_all,
        estimated_pool_size_all,
    ))
}

/// Volume weighted average ticket price of the active blocks in
/// `[start, end]`. Zero when no tickets were bought.
pub fn ticket_vwap(chain: &ChainIndex, start: u32, end: u32) -> Amount {
    let mut tickets = 0i64;
    let mut total_value = 0i64;
    for height in start..=end {
        let Some(id) = chain.active_at(height) else {
            break;
        };
        let entry = chain.get(id);
        let fresh = entry.fresh_stake() as i64;
        tickets += fresh;
        total_value = total_value.saturating_add(entry.stake_difficulty().saturating_mul(fresh));
    }
    if tickets == 0 {
        return 0;
    }
    total_value / tickets
}

/// [`ticket_vwap`] over the last `stake_diff_windows * stake_diff_window_size`
/// active blocks, starting no lower than height 1.
pub fn ticket_vwap_recent(chain: &ChainIndex, params: &ConsensusParams) -> Amount {
    let end = chain.tip_height();
    let span = params.stake_diff_windows * params.stake_diff_window_size;
    let start = end.saturating_sub(span).max(1);
    if start > end {
        return 0;
    }
    ticket_vwap(chain, start, end)
}
