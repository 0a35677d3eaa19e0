//! Positional layout checks for ticket purchases, votes and revocations.
//!
//! These checks look at a transaction in isolation. The reasons they return
//! are diagnostics; callers branch only on success or failure.

use rusty_shared_types::script::{is_unspendable, solve, ScriptClass};
use rusty_shared_types::{Transaction, TxClass, TxOutput};

use crate::error::StructureError;
use crate::stake_tx::{
    change_output_index, contribution_output_index, is_data_output, is_structured_data_output,
    parse_tx_class, ExtendedVoteBits, BUY_TICKET_MAX_INPUTS, DECLARATION_OUTPUT_INDEX, PAYMENT_OUTPUT_START,
    REVOCATION_STAKE_INPUT_INDEX, TICKET_STAKE_OUTPUT_INDEX, VOTE_STAKE_INPUT_INDEX,
    VOTE_SUBSIDY_INPUT_INDEX,
};

/// Expected item sizes after the stake prefix. Zero means any size.
const BUY_TICKET_DECLARATION_SIZES: [usize; 2] = [0, 0];
const VOTE_DECLARATION_SIZES: [usize; 7] = [0, 0, 32, 0, 0, 0, 0];
const REVOKE_TICKET_DECLARATION_SIZES: [usize; 2] = [0, 0];
const CONTRIBUTION_SIZES: [usize; 6] = [0, 20, 0, 0, 1, 1];

/// Items skipped at the front of structured outputs: struct version, data
/// class and stake data class.
const STRUCT_PREFIX_ITEMS: usize = 3;

/// A payment output: spendable and not a data carrier.
pub fn is_payment_output(output: &TxOutput) -> bool {
    !is_unspendable(&output.script_pubkey)
}

/// Checks that output `index` is a data output whose payload items have the
/// expected sizes.
pub fn validate_data_output_structure(
    tx: &Transaction,
    index: usize,
    expected_sizes: &[usize],
) -> Result<(), StructureError> {
    let output = tx
        .outputs
        .get(index)
        .filter(|output| is_data_output(output))
        .ok_or_else(|| StructureError::new(format!("output {} not a data output", index)))?;

    let (items, skip) = match solve(&output.script_pubkey) {
        ScriptClass::StructData(items) if is_structured_data_output(output) => {
            (items, STRUCT_PREFIX_ITEMS)
        }
        ScriptClass::NullData(items) => (items, 0),
        _ => return Err(StructureError::new(format!("couldn't parse output {}", index))),
    };

    let payload = items.get(skip..).unwrap_or(&[]);
    if payload.len() != expected_sizes.len() {
        return Err(StructureError::new(format!(
            "in output {} expected {} data items, found {}",
            index,
            expected_sizes.len(),
            payload.len()
        )));
    }

    for (i, (item, expected)) in payload.iter().zip(expected_sizes).enumerate() {
        if *expected != 0 && item.len() != *expected {
            return Err(StructureError::new(format!(
                "in output {}, data item {} expected size was {} bytes, found {} bytes",
                index,
                i,
                expected,
                item.len()
            )));
        }
    }
    Ok(())
}

fn require_class(tx: &Transaction, expected: TxClass) -> Result<(), StructureError> {
    let class = parse_tx_class(tx);
    if class != expected {
        return Err(StructureError::new(format!(
            "declared class {} but expected {}",
            class.name(),
            expected.name()
        )));
    }
    Ok(())
}

pub fn validate_buy_ticket_structure(tx: &Transaction) -> Result<(), StructureError> {
    require_class(tx, TxClass::BuyTicket)?;

    let inputs = tx.inputs.len();
    if inputs == 0 {
        return Err(StructureError::new("transaction has no inputs"));
    }
    if inputs > BUY_TICKET_MAX_INPUTS {
        return Err(StructureError::new(format!(
            "transaction has {} inputs, maximum is {}",
            inputs, BUY_TICKET_MAX_INPUTS
        )));
    }

    let expected_outputs = 2 + 2 * inputs;
    if tx.outputs.len() != expected_outputs {
        return Err(StructureError::new(format!(
            "transaction has {} outputs, expected {}",
            tx.outputs.len(),
            expected_outputs
        )));
    }

    validate_data_output_structure(tx, DECLARATION_OUTPUT_INDEX, &BUY_TICKET_DECLARATION_SIZES)?;

    if !is_payment_output(&tx.outputs[TICKET_STAKE_OUTPUT_INDEX]) {
        return Err(StructureError::new(format!(
            "output {} (stake) not a payment",
            TICKET_STAKE_OUTPUT_INDEX
        )));
    }

    for i in 0..inputs {
        validate_data_output_structure(tx, contribution_output_index(i), &CONTRIBUTION_SIZES)?;
        let change = change_output_index(i);
        if !is_payment_output(&tx.outputs[change]) {
            return Err(StructureError::new(format!(
                "output {} (change) not a payment",
                change
            )));
        }
    }
    Ok(())
}

fn validate_extended_vote_bits(declaration: &TxOutput) -> Result<(), StructureError> {
    let size = match solve(&declaration.script_pubkey) {
        ScriptClass::StructData(items) => items.last().map_or(0, Vec::len),
        _ => 0,
    };
    if !ExtendedVoteBits::is_valid_size(size) {
        return Err(StructureError::new(format!(
            "extended vote bits are {} bytes, expected {} to {}",
            size,
            ExtendedVoteBits::MIN_SIZE,
            ExtendedVoteBits::MAX_SIZE
        )));
    }
    Ok(())
}

pub fn validate_vote_structure(tx: &Transaction) -> Result<(), StructureError> {
    require_class(tx, TxClass::Vote)?;

    if tx.inputs.len() != 2 {
        return Err(StructureError::new(format!(
            "transaction has {} inputs, expected 2",
            tx.inputs.len()
        )));
    }
    if tx.outputs.len() < 2 {
        return Err(StructureError::new(format!(
            "transaction has {} outputs, expected at least 2",
            tx.outputs.len()
        )));
    }

    if !tx.inputs[VOTE_SUBSIDY_INPUT_INDEX].previous_output.is_null() {
        return Err(StructureError::new(format!(
            "input {} (subsidy issuance) not a coin generation outpoint",
            VOTE_SUBSIDY_INPUT_INDEX
        )));
    }
    if tx.inputs[VOTE_STAKE_INPUT_INDEX].previous_output.vout != TICKET_STAKE_OUTPUT_INDEX as u32 {
        return Err(StructureError::new(format!(
            "input {} not a ticket stake outpoint",
            VOTE_STAKE_INPUT_INDEX
        )));
    }

    validate_data_output_structure(tx, DECLARATION_OUTPUT_INDEX, &VOTE_DECLARATION_SIZES)?;
    validate_extended_vote_bits(&tx.outputs[DECLARATION_OUTPUT_INDEX])?;

    for (index, output) in tx.outputs.iter().enumerate().skip(PAYMENT_OUTPUT_START) {
        if !is_payment_output(output) {
            return Err(StructureError::new(format!(
                "output {} (reward) not a payment",
                index
            )));
        }
    }
    Ok(())
}

pub fn validate_revoke_ticket_structure(tx: &Transaction) -> Result<(), StructureError> {
    require_class(tx, TxClass::RevokeTicket)?;

    if tx.inputs.len() != 1 {
        return Err(StructureError::new(format!(
            "transaction has {} inputs, expected 1",
            tx.inputs.len()
        )));
    }
    if tx.outputs.is_empty() {
        return Err(StructureError::new("transaction has no outputs"));
    }
    if tx.inputs[REVOCATION_STAKE_INPUT_INDEX].previous_output.vout
        != TICKET_STAKE_OUTPUT_INDEX as u32
    {
        return Err(StructureError::new(format!(
            "input {} does not reference a stake",
            REVOCATION_STAKE_INPUT_INDEX
        )));
    }

    validate_data_output_structure(tx, DECLARATION_OUTPUT_INDEX, &REVOKE_TICKET_DECLARATION_SIZES)?;

    for (index, output) in tx.outputs.iter().enumerate().skip(PAYMENT_OUTPUT_START) {
        if !is_payment_output(output) {
            return Err(StructureError::new(format!("output {} not a payment", index)));
        }
    }
    Ok(())
}

/// Validates the layout required by the declared class of `tx`.
pub fn validate_stake_tx_structure(tx: &Transaction) -> Result<(), StructureError> {
    match parse_tx_class(tx) {
        TxClass::BuyTicket => validate_buy_ticket_structure(tx),
        TxClass::Vote => validate_vote_structure(tx),
        TxClass::RevokeTicket => validate_revoke_ticket_structure(tx),
        TxClass::Regular => Err(StructureError::new("transaction is not a stake transaction")),
    }
}
