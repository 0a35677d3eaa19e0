//! Transaction checks specific to the stake rules.
//!
//! [`check_stake_transaction`] runs without any chain context.
//! [`check_tx_inputs`] resolves every input against a coin view and returns
//! the transaction fee.

use std::collections::HashSet;

use rusty_shared_types::script::{solve, ScriptClass};
use rusty_shared_types::{
    money_range, Amount, Coin, ConsensusParams, OutPoint, Transaction, TxClass, TxOutput, MAX_MONEY,
};
use tracing::trace;

use crate::error::RejectReason;
use crate::remuneration::calc_contributor_remuneration;
use crate::stake_tx::{
    parse_tx_class, parse_vote, FundedContribution, StakeTx, PAYMENT_OUTPUT_START,
    TICKET_STAKE_OUTPUT_INDEX, VOTE_STAKE_INPUT_INDEX, VOTE_SUBSIDY_INPUT_INDEX,
};
use crate::subsidy::voter_subsidy;
use crate::utxo_set::{TicketSource, UtxoView};

const MIN_GENERATION_SCRIPT_LEN: usize = 2;
const MAX_GENERATION_SCRIPT_LEN: usize = 100;

fn generation_script_len_ok(script: &[u8]) -> bool {
    (MIN_GENERATION_SCRIPT_LEN..=MAX_GENERATION_SCRIPT_LEN).contains(&script.len())
}

/// Checks that need nothing but the transaction and the network parameters.
pub fn check_stake_transaction(tx: &Transaction, params: &ConsensusParams) -> Result<(), RejectReason> {
    if tx.inputs.is_empty() {
        return Err(RejectReason::NoInputs);
    }
    if tx.outputs.is_empty() {
        return Err(RejectReason::NoOutputs);
    }

    let mut value_out: Amount = 0;
    for output in &tx.outputs {
        if output.value < 0 {
            return Err(RejectReason::NegativeOutput);
        }
        if output.value > MAX_MONEY {
            return Err(RejectReason::OutputTooLarge);
        }
        value_out += output.value;
        if !money_range(value_out) {
            return Err(RejectReason::OutputTotalTooLarge);
        }
    }

    let mut seen = HashSet::with_capacity(tx.inputs.len());
    if !tx.inputs.iter().all(|input| seen.insert(input.previous_output)) {
        return Err(RejectReason::DuplicateInputs);
    }

    let class = parse_tx_class(tx);
    if class == TxClass::Regular && tx.is_coinbase() {
        if !generation_script_len_ok(&tx.inputs[0].script_sig) {
            return Err(RejectReason::CoinbaseLength);
        }
    } else if class == TxClass::Vote {
        let subsidy_script = &tx.inputs[VOTE_SUBSIDY_INPUT_INDEX].script_sig;
        if !generation_script_len_ok(subsidy_script) {
            return Err(RejectReason::StakeRewardLength);
        }
        if *subsidy_script != params.stake_base_sig_script {
            return Err(RejectReason::StakeRewardScriptSig);
        }
        match tx.inputs.get(VOTE_STAKE_INPUT_INDEX) {
            Some(input) if !input.previous_output.is_null() => {}
            _ => return Err(RejectReason::NullTicketReference),
        }
    } else if tx.inputs.iter().any(|input| input.previous_output.is_null()) {
        return Err(RejectReason::NullPrevout);
    }
    Ok(())
}

fn is_buy_ticket_stake(coin: &Coin, vout: u32) -> bool {
    coin.tx_class == TxClass::BuyTicket && vout == TICKET_STAKE_OUTPUT_INDEX as u32
}

fn is_vote_reward(coin: &Coin, vout: u32) -> bool {
    coin.tx_class == TxClass::Vote && vout >= PAYMENT_OUTPUT_START as u32
}

fn is_revocation_refund(coin: &Coin, vout: u32) -> bool {
    coin.tx_class == TxClass::RevokeTicket && vout >= PAYMENT_OUTPUT_START as u32
}

/// Stake transactions may only move coins locked to P2PKH or P2SH.
pub fn is_legal_script_type_for_stake(script: &[u8]) -> bool {
    matches!(solve(script), ScriptClass::PubKeyHash(_) | ScriptClass::ScriptHash(_))
}

fn is_legal_input_for_buy_ticket(coin: &Coin, vout: u32) -> bool {
    if coin.is_coinbase {
        return true;
    }
    let legal_class = match coin.tx_class {
        TxClass::Regular | TxClass::Vote | TxClass::RevokeTicket => true,
        TxClass::BuyTicket => vout != TICKET_STAKE_OUTPUT_INDEX as u32,
    };
    legal_class && is_legal_script_type_for_stake(&coin.output.script_pubkey)
}

fn is_legal_input_for_vote_or_revocation(coin: &Coin, vout: u32) -> bool {
    is_buy_ticket_stake(coin, vout) && is_legal_script_type_for_stake(&coin.output.script_pubkey)
}

fn check_buy_ticket_inputs<V: UtxoView>(
    tx: &Transaction,
    contributions: &[FundedContribution],
    view: &V,
) -> Result<(), RejectReason> {
    for (input, funded) in tx.inputs.iter().zip(contributions) {
        let outpoint = &input.previous_output;
        let coin = view
            .get_coin(outpoint)
            .ok_or(RejectReason::FundingMissingOrSpent)?;

        if !is_legal_input_for_buy_ticket(&coin, outpoint.vout) {
            return Err(RejectReason::IllegalInput);
        }

        let committed = funded
            .contribution
            .contributed_amount
            .checked_add(funded.change.value);
        if committed != Some(coin.value()) {
            return Err(RejectReason::ContributionAmountMismatch);
        }
    }
    Ok(())
}

fn check_vote_or_revocation_inputs<V: UtxoView, T: TicketSource>(
    class: TxClass,
    ticket: &OutPoint,
    payments: &[TxOutput],
    view: &V,
    tickets: &T,
    spend_height: u32,
    params: &ConsensusParams,
) -> Result<(), RejectReason> {
    if ticket.vout != TICKET_STAKE_OUTPUT_INDEX as u32 {
        return Err(RejectReason::SpendsNonStake(class));
    }

    let ticket_tx = tickets
        .get_ticket(&ticket.txid)
        .ok_or(RejectReason::BadTicketReference(class))?;
    let (stake, contributions) = match StakeTx::from_transaction(&ticket_tx) {
        Ok(StakeTx::BuyTicket {
            stake,
            contributions,
        }) => (stake, contributions),
        _ => return Err(RejectReason::BadTicketReference(class)),
    };

    let coin = view
        .get_coin(ticket)
        .ok_or(RejectReason::TicketStakeMissingOrSpent(class))?;
    if !is_legal_input_for_vote_or_revocation(&coin, ticket.vout) {
        return Err(RejectReason::IllegalInput);
    }

    let maturity_add = if class == TxClass::Vote { 1 } else { 2 };
    let required_age = params.ticket_maturity as i64 + maturity_add;
    if (spend_height as i64) - (coin.height as i64) < required_age {
        return Err(RejectReason::TicketStakeImmature(class));
    }

    if payments.len() != contributions.len() {
        return Err(RejectReason::PaymentsContributionsMismatch(class));
    }

    let contribution_sum = contributions.iter().fold(0 as Amount, |sum, funded| {
        sum.saturating_add(funded.contribution.contributed_amount)
    });
    let subsidy = if class == TxClass::Vote {
        voter_subsidy(spend_height, params)
    } else {
        0
    };

    for (payment, funded) in payments.iter().zip(&contributions) {
        if !is_legal_script_type_for_stake(&payment.script_pubkey) {
            return Err(RejectReason::InvalidPaymentType(class));
        }
        let (_, address) = solve(&payment.script_pubkey)
            .destination()
            .ok_or(RejectReason::InvalidPaymentAddress(class))?;
        let contribution = &funded.contribution;
        if address != contribution.reward_address {
            return Err(RejectReason::IncorrectPaymentAddress(class));
        }

        let expected = calc_contributor_remuneration(
            contribution.contributed_amount,
            stake.value,
            subsidy,
            contribution_sum,
        );
        if payment.value != expected {
            trace!(paid = payment.value, expected, "payment amount mismatch");
            return Err(RejectReason::BadPaymentAmount(class));
        }
    }
    Ok(())
}

/// Checks the inputs of `tx` against `view` for inclusion in a block at
/// `spend_height` and returns the fee.
pub fn check_tx_inputs<V, T>(
    tx: &Transaction,
    view: &V,
    tickets: &T,
    spend_height: u32,
    params: &ConsensusParams,
) -> Result<Amount, RejectReason>
where
    V: UtxoView,
    T: TicketSource,
{
    if !view.have_inputs(tx) {
        return Err(RejectReason::InputsMissingOrSpent);
    }

    let class = parse_tx_class(tx);
    if class == TxClass::Vote && parse_vote(tx).is_none() {
        return Err(RejectReason::UnparsableVote);
    }

    let stake_tx = StakeTx::from_transaction(tx).map_err(|err| RejectReason::BadStructure {
        class,
        reason: err.reason,
    })?;
    match &stake_tx {
        StakeTx::Regular => {}
        StakeTx::BuyTicket { contributions, .. } => {
            check_buy_ticket_inputs(tx, contributions, view)?;
        }
        StakeTx::Vote {
            ticket, rewards, ..
        } => check_vote_or_revocation_inputs(
            TxClass::Vote,
            ticket,
            rewards,
            view,
            tickets,
            spend_height,
            params,
        )?,
        StakeTx::RevokeTicket { ticket, refunds } => check_vote_or_revocation_inputs(
            TxClass::RevokeTicket,
            ticket,
            refunds,
            view,
            tickets,
            spend_height,
            params,
        )?,
    }

    let mut value_in: Amount = 0;
    for (i, input) in tx.inputs.iter().enumerate() {
        if class == TxClass::Vote && i == VOTE_SUBSIDY_INPUT_INDEX {
            value_in += voter_subsidy(spend_height, params);
            continue;
        }

        let outpoint = &input.previous_output;
        let coin = view
            .get_coin(outpoint)
            .ok_or(RejectReason::InputsMissingOrSpent)?;
        let depth = spend_height as i64 - coin.height as i64;

        if coin.is_coinbase && depth < params.coinbase_maturity as i64 {
            return Err(RejectReason::PrematureSpendOfCoinbase(depth.max(0) as u32));
        }

        if !matches!(class, TxClass::Vote | TxClass::RevokeTicket)
            && is_buy_ticket_stake(&coin, outpoint.vout)
        {
            return Err(RejectReason::IllegalSpendOfTicketStake);
        }

        if (is_vote_reward(&coin, outpoint.vout) || is_revocation_refund(&coin, outpoint.vout))
            && depth < params.coinbase_maturity as i64
        {
            return Err(RejectReason::RewardOrRefundImmature);
        }

        value_in = value_in.saturating_add(coin.value());
        if !money_range(coin.value()) || !money_range(value_in) {
            return Err(RejectReason::InputValuesOutOfRange);
        }
    }

    let value_out = tx.value_out().ok_or(RejectReason::OutputTotalTooLarge)?;
    if value_in < value_out {
        return Err(RejectReason::InBelowOut {
            value_in,
            value_out,
        });
    }

    let fee = value_in - value_out;
    if !money_range(fee) {
        return Err(RejectReason::FeeOutOfRange);
    }
    Ok(fee)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::remuneration::build_payment_outputs;
    use crate::stake_tx::{
        buy_ticket_declaration_script, p2pkh_script, revoke_ticket_declaration_script,
        ticket_contribution_script, vote_declaration_script, TicketContribution, VoteData,
    };
    use crate::utxo_set::UtxoSet;
    use rusty_shared_types::script::AddressType;
    use rusty_shared_types::{TxInput, VoteBits};

    const REWARD_ADDR: [u8; 20] = [0x42; 20];

    fn params() -> ConsensusParams {
        ConsensusParams::regtest()
    }

    fn coinbase(height: u32, value: Amount) -> Transaction {
        Transaction::new(
            vec![TxInput::generation(height.to_le_bytes().to_vec())],
            vec![TxOutput::new(value, p2pkh_script(&[1u8; 20]))],
        )
    }

    fn contribution(amount: Amount) -> TicketContribution {
        TicketContribution::new(REWARD_ADDR, AddressType::PubKeyHash, amount)
    }

    fn buy_ticket(funding: OutPoint, price: Amount, contributed: Amount, change: Amount) -> Transaction {
        Transaction::new(
            vec![TxInput::new(funding, vec![])],
            vec![
                TxOutput::new(0, buy_ticket_declaration_script()),
                TxOutput::new(price, p2pkh_script(&[2u8; 20])),
                TxOutput::new(0, ticket_contribution_script(&contribution(contributed))),
                TxOutput::new(change, p2pkh_script(&[3u8; 20])),
            ],
        )
    }

    fn vote(ticket: &Transaction, payments: Vec<TxOutput>, params: &ConsensusParams) -> Transaction {
        let data = VoteData::new([9u8; 32], 100, VoteBits::rtt_accepted(), 0);
        let mut outputs = vec![TxOutput::new(0, vote_declaration_script(&data))];
        outputs.extend(payments);
        Transaction::new(
            vec![
                TxInput::generation(params.stake_base_sig_script.clone()),
                TxInput::new(OutPoint::new(ticket.txid(), 1), vec![]),
            ],
            outputs,
        )
    }

    fn revocation(ticket: &Transaction, payments: Vec<TxOutput>) -> Transaction {
        let mut outputs = vec![TxOutput::new(0, revoke_ticket_declaration_script())];
        outputs.extend(payments);
        Transaction::new(
            vec![TxInput::new(OutPoint::new(ticket.txid(), 1), vec![])],
            outputs,
        )
    }

    /// A coin set holding a coinbase of 5000 and a ticket bought from it at
    /// height 200 for 1000, paying a fee of 10.
    fn setup() -> (UtxoSet, Transaction, Transaction) {
        let mut set = UtxoSet::new();
        let cb = coinbase(1, 5000);
        set.apply_transaction(&cb, 1);
        let ticket = buy_ticket(OutPoint::new(cb.txid(), 0), 1000, 1010, 3990);
        set.apply_transaction(&ticket, 200);
        (set, cb, ticket)
    }

    #[test]
    fn test_context_free_checks() {
        let params = params();
        let mut cb = coinbase(1, 50);
        check_stake_transaction(&cb, &params).unwrap();
        cb.inputs[0].script_sig = vec![1];
        assert_eq!(check_stake_transaction(&cb, &params), Err(RejectReason::CoinbaseLength));

        let dup_input = TxInput::new(OutPoint::new([1u8; 32], 0), vec![]);
        let dup = Transaction::new(
            vec![dup_input.clone(), dup_input],
            vec![TxOutput::new(1, vec![0x51])],
        );
        assert_eq!(check_stake_transaction(&dup, &params), Err(RejectReason::DuplicateInputs));

        let null = Transaction::new(
            vec![
                TxInput::new(OutPoint::new([1u8; 32], 0), vec![]),
                TxInput::generation(vec![0, 0]),
            ],
            vec![TxOutput::new(1, vec![0x51])],
        );
        assert_eq!(check_stake_transaction(&null, &params), Err(RejectReason::NullPrevout));

        let negative = Transaction::new(
            vec![TxInput::new(OutPoint::new([1u8; 32], 0), vec![])],
            vec![TxOutput::new(-1, vec![0x51])],
        );
        assert_eq!(check_stake_transaction(&negative, &params), Err(RejectReason::NegativeOutput));
    }

    #[test]
    fn test_vote_subsidy_script() {
        let params = params();
        let (_, _, ticket) = setup();
        let mut tx = vote(&ticket, vec![], &params);
        check_stake_transaction(&tx, &params).unwrap();

        tx.inputs[0].script_sig = vec![0, 0];
        assert_eq!(check_stake_transaction(&tx, &params), Err(RejectReason::StakeRewardScriptSig));
        tx.inputs[0].script_sig = vec![0];
        assert_eq!(check_stake_transaction(&tx, &params), Err(RejectReason::StakeRewardLength));

        let mut tx = vote(&ticket, vec![], &params);
        tx.inputs.truncate(1);
        assert_eq!(check_stake_transaction(&tx, &params), Err(RejectReason::NullTicketReference));
    }

    #[test]
    fn test_buy_ticket_inputs() {
        let params = params();
        let mut set = UtxoSet::new();
        let cb = coinbase(1, 5000);
        set.apply_transaction(&cb, 1);
        let funding = OutPoint::new(cb.txid(), 0);

        let ticket = buy_ticket(funding, 1000, 1010, 3990);
        assert_eq!(check_tx_inputs(&ticket, &set, &set, 150, &params), Ok(10));

        let mismatched = buy_ticket(funding, 1000, 1010, 4000);
        assert_eq!(
            check_tx_inputs(&mismatched, &set, &set, 150, &params),
            Err(RejectReason::ContributionAmountMismatch)
        );

        assert_eq!(
            check_tx_inputs(&ticket, &set, &set, 50, &params),
            Err(RejectReason::PrematureSpendOfCoinbase(49))
        );
    }

    #[test]
    fn test_ticket_stake_cannot_fund_a_ticket() {
        let params = params();
        let (set, _, ticket) = setup();
        let respend = buy_ticket(OutPoint::new(ticket.txid(), 1), 500, 500, 500);
        assert_eq!(
            check_tx_inputs(&respend, &set, &set, 300, &params),
            Err(RejectReason::IllegalInput)
        );
    }

    #[test]
    fn test_regular_spend_of_ticket_stake() {
        let params = params();
        let (set, _, ticket) = setup();
        let spend = Transaction::new(
            vec![TxInput::new(OutPoint::new(ticket.txid(), 1), vec![])],
            vec![TxOutput::new(900, vec![0x51])],
        );
        assert_eq!(
            check_tx_inputs(&spend, &set, &set, 300, &params),
            Err(RejectReason::IllegalSpendOfTicketStake)
        );
    }

    #[test]
    fn test_vote_inputs_and_fee() {
        let params = params();
        let (set, _, ticket) = setup();
        let spend_height = params.stake_validation_height;
        let subsidy = voter_subsidy(spend_height, &params);
        assert!(subsidy > 0);

        let rewards = build_payment_outputs(&[contribution(1010)], 1000, subsidy);
        assert_eq!(rewards[0].value, 1000 + subsidy);
        let tx = vote(&ticket, rewards, &params);
        assert_eq!(check_tx_inputs(&tx, &set, &set, spend_height, &params), Ok(0));
    }

    #[test]
    fn test_vote_payment_failures() {
        let params = params();
        let (set, _, ticket) = setup();
        let spend_height = params.stake_validation_height;
        let subsidy = voter_subsidy(spend_height, &params);

        let short = vote(
            &ticket,
            vec![TxOutput::new(1000 + subsidy - 1, p2pkh_script(&REWARD_ADDR))],
            &params,
        );
        assert_eq!(
            check_tx_inputs(&short, &set, &set, spend_height, &params).map_err(|e| e.code()),
            Err("vote-bad-payment-amount".to_string())
        );

        let wrong_address = vote(
            &ticket,
            vec![TxOutput::new(1000 + subsidy, p2pkh_script(&[0x43; 20]))],
            &params,
        );
        assert_eq!(
            check_tx_inputs(&wrong_address, &set, &set, spend_height, &params),
            Err(RejectReason::IncorrectPaymentAddress(TxClass::Vote))
        );

        let bare = vote(
            &ticket,
            vec![TxOutput::new(1000 + subsidy, vec![0x51])],
            &params,
        );
        assert_eq!(
            check_tx_inputs(&bare, &set, &set, spend_height, &params),
            Err(RejectReason::InvalidPaymentType(TxClass::Vote))
        );

        let extra = vote(
            &ticket,
            vec![
                TxOutput::new(1000 + subsidy, p2pkh_script(&REWARD_ADDR)),
                TxOutput::new(0, p2pkh_script(&REWARD_ADDR)),
            ],
            &params,
        );
        assert_eq!(
            check_tx_inputs(&extra, &set, &set, spend_height, &params),
            Err(RejectReason::PaymentsContributionsMismatch(TxClass::Vote))
        );
    }

    #[test]
    fn test_ticket_maturity_for_votes_and_revocations() {
        let params = params();
        let (set, _, ticket) = setup();
        let rewards = build_payment_outputs(&[contribution(1010)], 1000, 0);

        let vote_height = 200 + params.ticket_maturity;
        let tx = vote(&ticket, rewards.clone(), &params);
        assert_eq!(
            check_tx_inputs(&tx, &set, &set, vote_height, &params),
            Err(RejectReason::TicketStakeImmature(TxClass::Vote))
        );
        assert!(check_tx_inputs(&tx, &set, &set, vote_height + 1, &params).is_ok());

        let revoke = revocation(&ticket, rewards);
        assert_eq!(
            check_tx_inputs(&revoke, &set, &set, vote_height + 1, &params),
            Err(RejectReason::TicketStakeImmature(TxClass::RevokeTicket))
        );
        assert_eq!(check_tx_inputs(&revoke, &set, &set, vote_height + 2, &params), Ok(0));
    }

    #[test]
    fn test_revocation_refund_has_no_subsidy() {
        let params = params();
        let (set, _, ticket) = setup();
        let height = params.stake_validation_height;
        let subsidy = voter_subsidy(height, &params);
        let refund = revocation(
            &ticket,
            vec![TxOutput::new(1000 + subsidy, p2pkh_script(&REWARD_ADDR))],
        );
        let err = check_tx_inputs(&refund, &set, &set, height, &params).unwrap_err();
        assert_eq!(err, RejectReason::BadPaymentAmount(TxClass::RevokeTicket));
        assert_eq!(err.code(), "revocation-bad-payment-amount");
    }

    #[test]
    fn test_unknown_ticket_reference() {
        let params = params();
        let (mut set, _, ticket) = setup();
        let mut tx = vote(
            &ticket,
            vec![TxOutput::new(1000, p2pkh_script(&REWARD_ADDR))],
            &params,
        );
        tx.inputs[1].previous_output = OutPoint::new([0xee; 32], 1);
        set.add_coin(
            tx.inputs[1].previous_output,
            Coin::new(ticket.outputs[1].clone(), 200, false, TxClass::BuyTicket),
        );
        assert_eq!(
            check_tx_inputs(&tx, &set, &set, 3000, &params),
            Err(RejectReason::BadTicketReference(TxClass::Vote))
        );
    }

    #[test]
    fn test_reward_spend_maturity() {
        let params = params();
        let mut set = UtxoSet::new();
        let reward = OutPoint::new([5u8; 32], 1);
        set.add_coin(
            reward,
            Coin::new(TxOutput::new(700, p2pkh_script(&REWARD_ADDR)), 3000, false, TxClass::Vote),
        );
        let spend = Transaction::new(
            vec![TxInput::new(reward, vec![])],
            vec![TxOutput::new(600, p2pkh_script(&[1u8; 20]))],
        );
        assert_eq!(
            check_tx_inputs(&spend, &set, &set, 3050, &params),
            Err(RejectReason::RewardOrRefundImmature)
        );
        assert_eq!(check_tx_inputs(&spend, &set, &set, 3100, &params), Ok(100));
    }

    #[test]
    fn test_missing_inputs_and_overspend() {
        let params = params();
        let set = UtxoSet::new();
        let spend = Transaction::new(
            vec![TxInput::new(OutPoint::new([5u8; 32], 0), vec![])],
            vec![TxOutput::new(1, vec![0x51])],
        );
        assert_eq!(
            check_tx_inputs(&spend, &set, &set, 10, &params),
            Err(RejectReason::InputsMissingOrSpent)
        );

        let mut set = UtxoSet::new();
        set.add_coin(
            OutPoint::new([5u8; 32], 0),
            Coin::new(TxOutput::new(1, vec![0x51]), 1, false, TxClass::Regular),
        );
        let over = Transaction::new(
            vec![TxInput::new(OutPoint::new([5u8; 32], 0), vec![])],
            vec![TxOutput::new(2, vec![0x51])],
        );
        assert_eq!(
            check_tx_inputs(&over, &set, &set, 10, &params),
            Err(RejectReason::InBelowOut {
                value_in: 1,
                value_out: 2
            })
        );
    }
}
