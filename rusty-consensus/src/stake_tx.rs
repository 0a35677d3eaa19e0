//! Stake transaction classification and declaration parsing.
//!
//! A stake transaction announces its class in a structured data output at
//! index 0: `OP_RETURN OP_STRUCT <1> <Staking> <TxDeclaration> <class> ...`.
//! Ticket purchases carry one more structured output per contributor.
//! Everything in this module is pure; structural validation lives in
//! [`crate::structure`].

use rusty_shared_types::script::{
    opcode::{OP_RETURN, OP_STRUCT},
    solve, AddressType, ScriptClass, ScriptNum, StandardScripts, DEFAULT_MAX_NUM_SIZE,
};
use rusty_shared_types::{
    Amount, Block, Hash, OutPoint, PubKeyHash, Transaction, TxClass, TxOutput, VoteBits,
};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::StructureError;
use crate::structure::validate_stake_tx_structure;

/// Version of the structured data envelope.
pub const STRUCT_VERSION: i64 = 1;
/// Version of the declaration and contribution records.
pub const STAKE_DATA_VERSION: i64 = 1;
/// Largest number of funding inputs a ticket purchase may have.
pub const BUY_TICKET_MAX_INPUTS: usize = 64;
/// Byte width of the contributed amount item.
pub const CONTRIBUTION_AMOUNT_MAX_SIZE: usize = 8;
/// Largest structured data output, envelope opcodes included.
pub const MAX_STRUCT_DATA_CARRIER_BYTES: usize = 1024;

/// Longest vote declaration whose extended vote bits are an empty push:
/// envelope opcodes, five small ints, the block hash push, then pushes of
/// at most 5, 3 and 5 bytes for height, vote bits and voter version.
const VOTE_DECLARATION_BASE_SIZE: usize = 2 + 5 + 33 + 6 + 4 + 6 + 1;

pub const DECLARATION_OUTPUT_INDEX: usize = 0;
pub const TICKET_STAKE_OUTPUT_INDEX: usize = 1;
pub const VOTE_SUBSIDY_INPUT_INDEX: usize = 0;
pub const VOTE_STAKE_INPUT_INDEX: usize = 1;
pub const REVOCATION_STAKE_INPUT_INDEX: usize = 0;
pub const PAYMENT_OUTPUT_START: usize = 1;

/// Items preceding the payload of every stake structured output:
/// struct version, data class and stake data class.
const STAKE_DATA_PREFIX_ITEMS: usize = 3;

/// Minimum item counts, prefix included.
const TX_CLASS_MIN_ITEMS: usize = STAKE_DATA_PREFIX_ITEMS + 1;
const VOTE_MIN_ITEMS: usize = STAKE_DATA_PREFIX_ITEMS + 7;
const CONTRIBUTION_MIN_ITEMS: usize = STAKE_DATA_PREFIX_ITEMS + 6;

/// Output index of the contribution record of funding input `input`.
pub fn contribution_output_index(input: usize) -> usize {
    2 + 2 * input
}

/// Output index of the change of funding input `input`.
pub fn change_output_index(input: usize) -> usize {
    3 + 2 * input
}

/// Payload families of structured outputs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataClass {
    Staking = 0,
}

/// Record kinds within the staking data class.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StakeDataClass {
    TxDeclaration = 0,
    TicketContribution = 1,
}

/// True if the output is an `OP_RETURN` data carrier.
pub fn is_data_output(output: &TxOutput) -> bool {
    output.script_pubkey.first() == Some(&OP_RETURN)
}

/// True if the output is an `OP_RETURN OP_STRUCT` structured data carrier.
pub fn is_structured_data_output(output: &TxOutput) -> bool {
    let script = &output.script_pubkey;
    script.len() >= 3 && script[0] == OP_RETURN && script[1] == OP_STRUCT
}

fn script_int(item: &[u8]) -> Option<i64> {
    ScriptNum::decode(item, DEFAULT_MAX_NUM_SIZE)
        .ok()
        .map(|num| num.value())
}

/// Returns the items of the staking record at `index`, prefix included, if
/// that output is a structured record of `class` with at least `min_items`.
fn parse_stake_data(
    tx: &Transaction,
    index: usize,
    class: StakeDataClass,
    min_items: usize,
) -> Option<Vec<Vec<u8>>> {
    let output = tx.outputs.get(index)?;
    if !is_structured_data_output(output) {
        return None;
    }
    let items = match solve(&output.script_pubkey) {
        ScriptClass::StructData(items) => items,
        _ => return None,
    };
    if items.len() < min_items.max(STAKE_DATA_PREFIX_ITEMS) {
        return None;
    }
    if script_int(&items[0])? != STRUCT_VERSION
        || script_int(&items[1])? != DataClass::Staking as i64
        || script_int(&items[2])? != class as i64
    {
        return None;
    }
    Some(items)
}

/// Classifies `tx` by its declaration output. Anything without a well-formed
/// declaration of a known class is regular.
pub fn parse_tx_class(tx: &Transaction) -> TxClass {
    parse_stake_data(
        tx,
        DECLARATION_OUTPUT_INDEX,
        StakeDataClass::TxDeclaration,
        TX_CLASS_MIN_ITEMS,
    )
    .and_then(|items| script_int(&items[3]))
    .and_then(TxClass::from_i64)
    .unwrap_or(TxClass::Regular)
}

pub fn is_stake_tx(class: TxClass) -> bool {
    class.is_stake()
}

/// Free-form vote bits appended to a vote declaration, `1..=MAX_SIZE` bytes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtendedVoteBits(Vec<u8>);

impl ExtendedVoteBits {
    pub const MIN_SIZE: usize = 1;
    pub const MAX_SIZE: usize = MAX_STRUCT_DATA_CARRIER_BYTES - VOTE_DECLARATION_BASE_SIZE - 1;
    const DEFAULT_BITS: u8 = 0x00;

    pub fn is_valid_size(len: usize) -> bool {
        (Self::MIN_SIZE..=Self::MAX_SIZE).contains(&len)
    }

    /// True if `hex` is an even-length hex string of a valid size.
    pub fn is_valid_hex(hex: &str) -> bool {
        hex::decode(hex).map_or(false, |bytes| Self::is_valid_size(bytes.len()))
    }

    /// Strict constructor: `None` unless `bytes` has a valid size.
    pub fn try_from_bytes(bytes: &[u8]) -> Option<Self> {
        Self::is_valid_size(bytes.len()).then(|| ExtendedVoteBits(bytes.to_vec()))
    }

    /// Falls back to the default for invalid input.
    pub fn from_bytes(bytes: &[u8]) -> Self {
        Self::try_from_bytes(bytes).unwrap_or_default()
    }

    /// Falls back to the default for malformed or badly sized hex.
    pub fn from_hex(hex: &str) -> Self {
        hex::decode(hex)
            .ok()
            .and_then(|bytes| Self::try_from_bytes(&bytes))
            .unwrap_or_default()
    }

    pub fn is_valid(&self) -> bool {
        Self::is_valid_size(self.0.len())
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(&self.0)
    }
}

impl Default for ExtendedVoteBits {
    fn default() -> Self {
        ExtendedVoteBits(vec![Self::DEFAULT_BITS])
    }
}

impl fmt::Display for ExtendedVoteBits {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

/// Declaration payload of a vote.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoteData {
    pub version: i64,
    pub block_hash: Hash,
    pub block_height: u32,
    pub vote_bits: VoteBits,
    pub voter_stake_version: u32,
    pub extended_vote_bits: ExtendedVoteBits,
}

impl VoteData {
    /// A vote with the default extended vote bits.
    pub fn new(
        block_hash: Hash,
        block_height: u32,
        vote_bits: VoteBits,
        voter_stake_version: u32,
    ) -> Self {
        VoteData {
            version: STAKE_DATA_VERSION,
            block_hash,
            block_height,
            vote_bits,
            voter_stake_version,
            extended_vote_bits: ExtendedVoteBits::default(),
        }
    }

    pub fn with_extended_vote_bits(mut self, extended_vote_bits: ExtendedVoteBits) -> Self {
        self.extended_vote_bits = extended_vote_bits;
        self
    }
}

/// Parses the vote declaration of `tx`.
pub fn parse_vote(tx: &Transaction) -> Option<VoteData> {
    let items = parse_stake_data(
        tx,
        DECLARATION_OUTPUT_INDEX,
        StakeDataClass::TxDeclaration,
        VOTE_MIN_ITEMS,
    )?;
    if script_int(&items[3])? != TxClass::Vote.as_i64() {
        return None;
    }
    let version = script_int(&items[4])?;
    if version != STAKE_DATA_VERSION {
        return None;
    }
    let block_hash: Hash = items[5].as_slice().try_into().ok()?;
    let block_height = u32::try_from(script_int(&items[6])?).ok()?;
    let vote_bits = VoteBits(script_int(&items[7])? as u16);
    let voter_stake_version = script_int(&items[8])? as u32;
    let extended_vote_bits = ExtendedVoteBits::try_from_bytes(&items[9])?;

    Some(VoteData {
        version,
        block_hash,
        block_height,
        vote_bits,
        voter_stake_version,
        extended_vote_bits,
    })
}

/// A contributor's share of a ticket.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TicketContribution {
    pub version: i64,
    pub reward_address: PubKeyHash,
    pub address_type: AddressType,
    pub contributed_amount: Amount,
    /// Vote fee limit marker, `0..=MAX_FEES` or `NO_FEES`.
    pub vote_fees: u8,
    /// Revocation fee limit marker, `0..=MAX_FEES` or `NO_FEES`.
    pub revoke_fees: u8,
}

impl TicketContribution {
    pub const MAX_FEES: u8 = 0x3F;
    pub const NO_FEES: u8 = 0x40;

    pub fn new(
        reward_address: PubKeyHash,
        address_type: AddressType,
        contributed_amount: Amount,
    ) -> Self {
        TicketContribution {
            version: STAKE_DATA_VERSION,
            reward_address,
            address_type,
            contributed_amount,
            vote_fees: Self::NO_FEES,
            revoke_fees: Self::NO_FEES,
        }
    }

    pub fn with_fee_limits(mut self, vote_fees: u8, revoke_fees: u8) -> Self {
        self.vote_fees = Self::fee_marker(vote_fees as i64);
        self.revoke_fees = Self::fee_marker(revoke_fees as i64);
        self
    }

    fn fee_marker(value: i64) -> u8 {
        if (0..=Self::MAX_FEES as i64).contains(&value) {
            value as u8
        } else {
            Self::NO_FEES
        }
    }

    /// Whether a fee limit is set for votes.
    pub fn has_vote_fee_limit(&self) -> bool {
        self.vote_fees <= Self::MAX_FEES
    }

    pub fn has_revoke_fee_limit(&self) -> bool {
        self.revoke_fees <= Self::MAX_FEES
    }

    /// Vote fee limit in base units: `2^marker`.
    pub fn vote_fee_limit(&self) -> Option<u64> {
        self.has_vote_fee_limit().then(|| 1u64 << self.vote_fees)
    }

    pub fn revoke_fee_limit(&self) -> Option<u64> {
        self.has_revoke_fee_limit().then(|| 1u64 << self.revoke_fees)
    }

    /// The locking script paying this contributor.
    pub fn reward_script(&self) -> Vec<u8> {
        self.address_type.script_for(&self.reward_address)
    }
}

/// Parses the contribution record at output `index` of a ticket purchase.
pub fn parse_ticket_contribution(tx: &Transaction, index: usize) -> Option<TicketContribution> {
    let items = parse_stake_data(
        tx,
        index,
        StakeDataClass::TicketContribution,
        CONTRIBUTION_MIN_ITEMS,
    )?;
    let version = script_int(&items[3])?;
    if version != STAKE_DATA_VERSION {
        return None;
    }
    let reward_address: PubKeyHash = items[4].as_slice().try_into().ok()?;
    let address_type = AddressType::from_i64(script_int(&items[5])?)?;
    let contributed_amount = ScriptNum::decode(&items[6], CONTRIBUTION_AMOUNT_MAX_SIZE)
        .ok()?
        .value();

    Some(TicketContribution {
        version,
        reward_address,
        address_type,
        contributed_amount,
        vote_fees: TicketContribution::fee_marker(script_int(&items[7])?),
        revoke_fees: TicketContribution::fee_marker(script_int(&items[8])?),
    })
}

fn declaration(class: TxClass) -> rusty_shared_types::script::ScriptBuilder {
    StandardScripts::structured_data(STRUCT_VERSION, DataClass::Staking as i64)
        .push_int(StakeDataClass::TxDeclaration as i64)
        .push_int(class.as_i64())
        .push_int(STAKE_DATA_VERSION)
}

pub fn buy_ticket_declaration_script() -> Vec<u8> {
    declaration(TxClass::BuyTicket).into_bytes()
}

pub fn vote_declaration_script(vote: &VoteData) -> Vec<u8> {
    declaration(TxClass::Vote)
        .push_slice(&vote.block_hash)
        .push_int(vote.block_height as i64)
        .push_int(vote.vote_bits.bits() as i64)
        .push_int(vote.voter_stake_version as i64)
        .push_slice(vote.extended_vote_bits.as_bytes())
        .into_bytes()
}

pub fn revoke_ticket_declaration_script() -> Vec<u8> {
    declaration(TxClass::RevokeTicket).into_bytes()
}

pub fn ticket_contribution_script(contribution: &TicketContribution) -> Vec<u8> {
    StandardScripts::structured_data(STRUCT_VERSION, DataClass::Staking as i64)
        .push_int(StakeDataClass::TicketContribution as i64)
        .push_int(contribution.version)
        .push_slice(&contribution.reward_address)
        .push_int(contribution.address_type as i64)
        .push_int(contribution.contributed_amount)
        .push_int(contribution.vote_fees as i64)
        .push_int(contribution.revoke_fees as i64)
        .into_bytes()
}

pub fn p2pkh_script(hash: &PubKeyHash) -> Vec<u8> {
    StandardScripts::p2pkh(hash)
}

pub fn p2sh_script(hash: &PubKeyHash) -> Vec<u8> {
    StandardScripts::p2sh(hash)
}

/// One funding input of a ticket purchase, paired with its outputs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FundedContribution {
    pub contribution: TicketContribution,
    pub change: TxOutput,
}

/// A stake transaction after structural validation, with its positional
/// fields resolved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StakeTx {
    Regular,
    BuyTicket {
        stake: TxOutput,
        contributions: Vec<FundedContribution>,
    },
    Vote {
        vote: VoteData,
        ticket: OutPoint,
        rewards: Vec<TxOutput>,
    },
    RevokeTicket {
        ticket: OutPoint,
        refunds: Vec<TxOutput>,
    },
}

impl StakeTx {
    /// Classifies and structurally validates `tx`.
    pub fn from_transaction(tx: &Transaction) -> Result<StakeTx, StructureError> {
        let class = parse_tx_class(tx);
        if class == TxClass::Regular {
            return Ok(StakeTx::Regular);
        }
        validate_stake_tx_structure(tx)?;

        match class {
            TxClass::Regular => Ok(StakeTx::Regular),
            TxClass::BuyTicket => {
                let contributions = (0..tx.inputs.len())
                    .map(|i| {
                        let index = contribution_output_index(i);
                        let contribution = parse_ticket_contribution(tx, index).ok_or_else(|| {
                            StructureError::new(format!("couldn't parse contribution output {}", index))
                        })?;
                        Ok(FundedContribution {
                            contribution,
                            change: tx.outputs[change_output_index(i)].clone(),
                        })
                    })
                    .collect::<Result<Vec<_>, StructureError>>()?;
                Ok(StakeTx::BuyTicket {
                    stake: tx.outputs[TICKET_STAKE_OUTPUT_INDEX].clone(),
                    contributions,
                })
            }
            TxClass::Vote => {
                let vote = parse_vote(tx)
                    .ok_or_else(|| StructureError::new("couldn't parse vote declaration"))?;
                Ok(StakeTx::Vote {
                    vote,
                    ticket: tx.inputs[VOTE_STAKE_INPUT_INDEX].previous_output,
                    rewards: tx.outputs[PAYMENT_OUTPUT_START..].to_vec(),
                })
            }
            TxClass::RevokeTicket => Ok(StakeTx::RevokeTicket {
                ticket: tx.inputs[REVOCATION_STAKE_INPUT_INDEX].previous_output,
                refunds: tx.outputs[PAYMENT_OUTPUT_START..].to_vec(),
            }),
        }
    }

    pub fn class(&self) -> TxClass {
        match self {
            StakeTx::Regular => TxClass::Regular,
            StakeTx::BuyTicket { .. } => TxClass::BuyTicket,
            StakeTx::Vote { .. } => TxClass::Vote,
            StakeTx::RevokeTicket { .. } => TxClass::RevokeTicket,
        }
    }

    /// Hash of the ticket spent by a vote or revocation.
    pub fn spent_ticket(&self) -> Option<Hash> {
        match self {
            StakeTx::Vote { ticket, .. } | StakeTx::RevokeTicket { ticket, .. } => Some(ticket.txid),
            _ => None,
        }
    }
}

/// Voter stake version and vote bits carried by one vote.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoteVersion {
    pub version: u32,
    pub bits: VoteBits,
}

/// Tickets consumed by a block.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SpentTickets {
    pub voters: Vec<Hash>,
    pub revocations: Vec<Hash>,
    pub vote_versions: Vec<VoteVersion>,
}

/// Collects the tickets voted and revoked in `block`. Votes whose declaration
/// cannot be parsed are skipped; callers validate them separately.
pub fn find_spent_tickets_in_block(block: &Block) -> SpentTickets {
    let mut spent = SpentTickets::default();
    for tx in &block.transactions {
        match parse_tx_class(tx) {
            TxClass::Vote => {
                let (Some(vote), Some(input)) = (parse_vote(tx), tx.inputs.get(VOTE_STAKE_INPUT_INDEX))
                else {
                    continue;
                };
                spent.voters.push(input.previous_output.txid);
                spent.vote_versions.push(VoteVersion {
                    version: vote.voter_stake_version,
                    bits: vote.vote_bits,
                });
            }
            TxClass::RevokeTicket => {
                if let Some(input) = tx.inputs.get(REVOCATION_STAKE_INPUT_INDEX) {
                    spent.revocations.push(input.previous_output.txid);
                }
            }
            TxClass::Regular | TxClass::BuyTicket => {}
        }
    }
    spent
}
