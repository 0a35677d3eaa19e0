//! Block-level stake validation.
//!
//! [`StakeValidator::connect_block`] checks everything a block's header and
//! stake transactions commit to against the block index and the parent's
//! ticket pool, then indexes the block, derives its [`StakeNode`] and makes
//! it the active tip.

use std::collections::HashSet;
use std::sync::Arc;

use rusty_shared_types::{hash_to_hex, Amount, Block, ConsensusParams, Hash, StakeHeaderFields};
use tracing::{debug, trace};

use crate::audit_log;
use crate::chain::{BlockId, ChainIndex, Reorganization, StakeDelta};
use crate::error::{ConsensusError, RejectReason};
use crate::stake_difficulty::calculate_next_required_stake_difficulty;
use crate::stake_tx::{parse_tx_class, StakeTx, VoteData};
use crate::stake_version::StakeVersionVoter;
use crate::ticket_pool::{calc_lottery_iv, StakeNode};
use crate::tx_inputs::{check_stake_transaction, check_tx_inputs};
use crate::utxo_set::{CoinsOverlay, UtxoSet};

/// Outcome of connecting a block.
#[derive(Debug, Clone)]
pub struct ConnectedBlock {
    pub id: BlockId,
    pub stake_node: Arc<StakeNode>,
    /// Sum of the fees of the block's non-coinbase transactions.
    pub fees: Amount,
    pub reorganization: Reorganization,
}

/// The block's stake transactions, sorted by class.
#[derive(Default)]
struct StakeContents {
    tickets: Vec<StakeTx>,
    votes: Vec<(VoteData, Hash)>,
    revocations: Vec<Hash>,
}

impl StakeContents {
    fn has_stake_txs(&self) -> bool {
        !self.tickets.is_empty() || !self.votes.is_empty() || !self.revocations.is_empty()
    }
}

pub struct StakeValidator {
    params: Arc<ConsensusParams>,
    voter: StakeVersionVoter,
}

impl StakeValidator {
    pub fn new(params: Arc<ConsensusParams>) -> Self {
        StakeValidator {
            voter: StakeVersionVoter::new(Arc::clone(&params)),
            params,
        }
    }

    pub fn params(&self) -> &Arc<ConsensusParams> {
        &self.params
    }

    pub fn voter(&self) -> &StakeVersionVoter {
        &self.voter
    }

    /// Validates `block` on top of its parent and connects it.
    ///
    /// `utxos` must hold the coins as of the parent. On success the block's
    /// coin changes are applied to it and the block becomes the active tip.
    /// Nothing is changed when the block is rejected.
    pub fn connect_block(
        &self,
        chain: &mut ChainIndex,
        block: &Block,
        utxos: &mut UtxoSet,
    ) -> Result<ConnectedBlock, ConsensusError> {
        let hash = block.header.hash();
        let height = chain
            .by_hash(block.header.prev_block_hash())
            .map_or(0, |parent| chain.get(parent).height() + 1);

        match self.connect_block_inner(chain, block, &hash, utxos) {
            Ok(connected) => {
                audit_log::log_ticket_pool_transition(&connected.stake_node);
                audit_log::log_block_stake_connected(
                    &hash,
                    height,
                    &connected.stake_node,
                    connected.fees,
                );
                Ok(connected)
            }
            Err(err) => {
                audit_log::log_block_stake_rejected(&hash, height, &err);
                Err(err)
            }
        }
    }

    fn connect_block_inner(
        &self,
        chain: &mut ChainIndex,
        block: &Block,
        hash: &Hash,
        utxos: &mut UtxoSet,
    ) -> Result<ConnectedBlock, ConsensusError> {
        let params = self.params.as_ref();
        if chain.by_hash(hash).is_some() {
            return Err(ConsensusError::DuplicateBlock(hash_to_hex(hash)));
        }
        let parent = chain
            .by_hash(block.header.prev_block_hash())
            .ok_or_else(|| ConsensusError::UnknownBlock(hash_to_hex(block.header.prev_block_hash())))?;
        let height = chain.get(parent).height() + 1;

        if block.header.is_hybrid() != (height >= params.hybrid_fork_height) {
            return Err(RejectReason::WrongHeaderLayout.into());
        }

        let contents = classify_transactions(block, params)?;
        if !block.header.is_hybrid() && contents.has_stake_txs() {
            return Err(RejectReason::StakeTxBeforeFork.into());
        }
        if let Some(stake) = block.header.stake() {
            check_header_counts(stake, &contents, params)?;
        }

        self.check_ticket_prices(chain, parent, height, block, &contents)?;

        let parent_node = chain.fetch_stake_node(parent)?;
        check_votes(chain, parent, &parent_node, height, block, &contents, params)?;
        for ticket in &contents.revocations {
            if !parent_node.exists_missed_ticket(ticket) {
                return Err(RejectReason::RevokeNonMissed(hash_to_hex(ticket)).into());
            }
        }

        let mut overlay = CoinsOverlay::new(&*utxos);
        let mut fees: Amount = 0;
        for tx in &block.transactions {
            if !tx.is_coinbase() {
                let fee = check_tx_inputs(tx, &overlay, &overlay, height, params)?;
                fees = fees
                    .checked_add(fee)
                    .ok_or(RejectReason::FeeOutOfRange)?;
            }
            overlay.apply_transaction(tx, height);
        }
        let batch = overlay.into_batch();

        if let Some(stake) = block.header.stake() {
            if stake.ticket_pool_size != parent_node.pool_size() {
                return Err(RejectReason::PoolSizeMismatch {
                    header: stake.ticket_pool_size,
                    expected: parent_node.pool_size(),
                }
                .into());
            }
            if stake.ticket_lottery_state != parent_node.final_state() {
                return Err(RejectReason::LotteryStateMismatch.into());
            }
            let expected = self.voter.calc_stake_version(chain, parent);
            if stake.stake_version != expected {
                return Err(RejectReason::StakeVersionMismatch {
                    header: stake.stake_version,
                    expected,
                }
                .into());
            }
        }

        let (delta, vote_versions) = StakeDelta::from_block(block);
        let node = parent_node.connect(
            params,
            calc_lottery_iv(hash, height),
            &delta.voted,
            &delta.revoked,
            &delta.purchased,
        )?;
        let stake_node = Arc::new(node);

        let id = chain.insert(block.header.clone(), delta, vote_versions)?;
        chain.set_stake_node(id, Arc::clone(&stake_node));
        utxos.apply_batch(batch);
        let reorganization = chain.set_active_tip(id)?;
        debug!(height, hash = %hash_to_hex(hash), fees, "connected block");

        Ok(ConnectedBlock {
            id,
            stake_node,
            fees,
            reorganization,
        })
    }

    fn check_ticket_prices(
        &self,
        chain: &ChainIndex,
        parent: BlockId,
        height: u32,
        block: &Block,
        contents: &StakeContents,
    ) -> Result<(), ConsensusError> {
        let params = self.params.as_ref();
        let required = calculate_next_required_stake_difficulty(chain, parent, params);
        let previous = chain.get(parent).stake_difficulty();
        if height % params.stake_diff_window_size == 0 && previous != required {
            audit_log::log_stake_difficulty_retarget(height, previous, required);
        }

        if let Some(stake) = block.header.stake() {
            if stake.stake_difficulty != required {
                return Err(RejectReason::WrongStakeDifficulty {
                    header: stake.stake_difficulty,
                    required,
                }
                .into());
            }
        }
        for ticket in &contents.tickets {
            if let StakeTx::BuyTicket { stake, .. } = ticket {
                if stake.value != required {
                    return Err(RejectReason::WrongTicketPrice {
                        paid: stake.value,
                        required,
                    }
                    .into());
                }
            }
        }
        Ok(())
    }
}

fn classify_transactions(
    block: &Block,
    params: &ConsensusParams,
) -> Result<StakeContents, ConsensusError> {
    let mut contents = StakeContents::default();
    for tx in &block.transactions {
        check_stake_transaction(tx, params)?;
        let stake_tx = StakeTx::from_transaction(tx).map_err(|err| RejectReason::BadStructure {
            class: parse_tx_class(tx),
            reason: err.reason,
        })?;
        match stake_tx {
            StakeTx::Regular => {}
            StakeTx::BuyTicket { .. } => contents.tickets.push(stake_tx),
            StakeTx::Vote { vote, ticket, .. } => contents.votes.push((vote, ticket.txid)),
            StakeTx::RevokeTicket { ticket, .. } => contents.revocations.push(ticket.txid),
        }
    }
    Ok(contents)
}

fn check_header_counts(
    stake: &StakeHeaderFields,
    contents: &StakeContents,
    params: &ConsensusParams,
) -> Result<(), RejectReason> {
    let tickets = contents.tickets.len();
    if tickets > params.max_fresh_stake_per_block as usize {
        return Err(RejectReason::TooManyFreshStake(
            tickets,
            params.max_fresh_stake_per_block,
        ));
    }
    if stake.fresh_stake as usize != tickets {
        return Err(RejectReason::FreshStakeMismatch {
            header: stake.fresh_stake,
            actual: tickets,
        });
    }
    if stake.revocations as usize != contents.revocations.len() {
        return Err(RejectReason::RevocationCountMismatch {
            header: stake.revocations,
            actual: contents.revocations.len(),
        });
    }
    if stake.voters as usize != contents.votes.len() {
        return Err(RejectReason::VoterCountMismatch {
            header: stake.voters,
            actual: contents.votes.len(),
        });
    }
    Ok(())
}

fn check_votes(
    chain: &ChainIndex,
    parent: BlockId,
    parent_node: &StakeNode,
    height: u32,
    block: &Block,
    contents: &StakeContents,
    params: &ConsensusParams,
) -> Result<(), RejectReason> {
    let votes = contents.votes.len();
    if height < params.stake_validation_height {
        if votes > 0 {
            return Err(RejectReason::VotesBeforeValidation);
        }
        return Ok(());
    }

    let min = params.min_votes_required();
    if votes < min as usize {
        return Err(RejectReason::TooFewVotes { votes, min });
    }
    if votes > params.tickets_per_block as usize {
        return Err(RejectReason::TooManyVotes {
            votes,
            max: params.tickets_per_block,
        });
    }

    let winners: HashSet<&Hash> = parent_node.winners().iter().collect();
    let mut seen = HashSet::with_capacity(votes);
    let parent_entry = chain.get(parent);
    let mut approvals = 0usize;
    for (vote, ticket) in &contents.votes {
        if !winners.contains(ticket) {
            return Err(RejectReason::VoteForNonWinner(hash_to_hex(ticket)));
        }
        if !seen.insert(*ticket) {
            return Err(RejectReason::DuplicateVote(hash_to_hex(ticket)));
        }
        if vote.block_hash != *parent_entry.hash() || vote.block_height != parent_entry.height() {
            return Err(RejectReason::VoteOnWrongBlock);
        }
        if vote.vote_bits.is_rtt_accepted() {
            approvals += 1;
        }
    }

    let approved = approvals * 2 > votes;
    let header_approves = block
        .header
        .stake()
        .map_or(true, |stake| stake.vote_bits.is_rtt_accepted());
    if approved != header_approves {
        trace!(approvals, votes, "vote tally disagrees with header");
        return Err(RejectReason::HeaderVoteBitsMismatch);
    }
    Ok(())
}
