//! Splitting a ticket's stake and vote subsidy among its contributors.

use primitive_types::U256;
use rusty_shared_types::{Amount, TxOutput};

use crate::stake_tx::TicketContribution;

/// Share of `staked_amount + subsidy` owed to a contributor of
/// `contributed_amount` out of `contribution_sum`, truncated.
///
/// Shares are computed independently, so the payouts of one ticket may sum
/// to slightly less than the pool. The remainder is not redistributed.
pub fn calc_contributor_remuneration(
    contributed_amount: Amount,
    staked_amount: Amount,
    subsidy: Amount,
    contribution_sum: Amount,
) -> Amount {
    if contribution_sum <= 0 || contributed_amount <= 0 || staked_amount < 0 || subsidy < 0 {
        return 0;
    }
    let pool = U256::from(staked_amount as u64) + U256::from(subsidy as u64);
    let share = U256::from(contributed_amount as u64) * pool / U256::from(contribution_sum as u64);
    if share > U256::from(Amount::MAX as u64) {
        return Amount::MAX;
    }
    share.low_u64() as Amount
}

/// Payouts for every contribution of a ticket, in contribution order.
pub fn calc_ticket_payouts(
    contributions: &[TicketContribution],
    staked_amount: Amount,
    subsidy: Amount,
) -> Vec<Amount> {
    let contribution_sum = contributions
        .iter()
        .fold(0 as Amount, |sum, c| sum.saturating_add(c.contributed_amount));
    contributions
        .iter()
        .map(|c| {
            calc_contributor_remuneration(c.contributed_amount, staked_amount, subsidy, contribution_sum)
        })
        .collect()
}

/// Reward or refund outputs paying every contributor of a ticket. Votes pass
/// the voter subsidy, revocations pass zero.
pub fn build_payment_outputs(
    contributions: &[TicketContribution],
    staked_amount: Amount,
    subsidy: Amount,
) -> Vec<TxOutput> {
    calc_ticket_payouts(contributions, staked_amount, subsidy)
        .into_iter()
        .zip(contributions)
        .map(|(value, contribution)| TxOutput::new(value, contribution.reward_script()))
        .collect()
}
