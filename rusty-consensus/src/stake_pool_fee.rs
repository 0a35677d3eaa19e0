//! Fees charged by voting service providers for tickets they vote on behalf
//! of a purchaser. Wallet policy, not consensus.

use primitive_types::U256;
use rusty_shared_types::{Amount, ConsensusParams};

use crate::subsidy::voter_subsidy;

/// Pool fee percentages are expressed with two decimals, 0.01% to 100%.
const FEE_PERCENT_SCALE: f64 = 100.0;
const MAX_FEE_PERCENT_INT: u64 = 10_000;

pub fn is_valid_pool_fee_percent(fee_percent: f64) -> bool {
    let multiplied = fee_percent * FEE_PERCENT_SCALE;
    if !(1.0..=MAX_FEE_PERCENT_INT as f64).contains(&multiplied) {
        return false;
    }
    let normalized = multiplied.floor();
    (1.0..=MAX_FEE_PERCENT_INT as f64).contains(&normalized)
}

/// Fee a pool charges for a ticket bought at `stake_diff` with `relay_fee`,
/// at `pool_fee_percent` of the expected vote subsidy share.
///
/// Computes `p * s * (v + z) / (10000 * (s + v))` in 64.64 fixed point, where
/// `p` is the percentage times 100, `s` the voter subsidy at `height`, `v` the
/// ticket price and `z` the relay fee.
pub fn stake_pool_ticket_fee(
    stake_diff: Amount,
    relay_fee: Amount,
    height: u32,
    pool_fee_percent: f64,
    params: &ConsensusParams,
) -> Amount {
    if !is_valid_pool_fee_percent(pool_fee_percent) {
        return 0;
    }

    let percent_int = ((pool_fee_percent * FEE_PERCENT_SCALE).floor() as u64).clamp(1, MAX_FEE_PERCENT_INT);
    let subsidy = U256::from(voter_subsidy(height, params).max(0) as u64);
    let price = U256::from(stake_diff.max(0) as u64);
    let relay = U256::from(relay_fee.max(0) as u64);

    let num = (U256::from(percent_int) * subsidy * (price + relay)) << 64;
    let den = (subsidy + price) * U256::from(MAX_FEE_PERCENT_INT);
    if den.is_zero() {
        return 0;
    }
    ((num / den) >> 64).low_u64() as Amount
}
