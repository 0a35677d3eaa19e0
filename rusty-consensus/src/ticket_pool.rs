//! Ticket pool snapshots, one per connected block.
//!
//! A [`StakeNode`] is derived from its parent's node and the stake
//! transactions of one block and is never modified afterwards. Nodes share
//! unchanged ticket maps with their parent through `Arc`; a map is copied
//! only when the block touches it.

use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::sync::Arc;

use rusty_crypto::{calc_hash256_prng_iv, Hash256Prng, PrngError, StakeHasher};
use rusty_shared_types::{hash_to_hex, ConsensusParams, Hash, LotteryState};
use serde::{Deserialize, Serialize};
use tracing::trace;

use crate::error::{ConsensusError, RejectReason};

/// State of one ticket in the pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct TicketValue {
    /// Height at which the ticket went live.
    pub height: u32,
    pub missed: bool,
    pub revoked: bool,
    pub spent: bool,
    pub expired: bool,
}

/// What happened to one ticket while connecting a block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct UndoTicketData {
    pub ticket_hash: Hash,
    pub ticket_height: u32,
    pub missed: bool,
    pub revoked: bool,
    pub spent: bool,
    pub expired: bool,
}

impl UndoTicketData {
    fn new(ticket_hash: Hash, value: &TicketValue) -> Self {
        UndoTicketData {
            ticket_hash,
            ticket_height: value.height,
            missed: value.missed,
            revoked: value.revoked,
            spent: value.spent,
            expired: value.expired,
        }
    }
}

/// Seed of the lottery run when the block `block_hash` at `height` is connected.
pub fn calc_lottery_iv(block_hash: &Hash, height: u32) -> [u8; 32] {
    let mut seed = Vec::with_capacity(36);
    seed.extend_from_slice(block_hash);
    seed.extend_from_slice(&height.to_le_bytes());
    calc_hash256_prng_iv(&seed)
}

/// Looks up the tickets at the drawn indices of the sorted live set, in draw order.
pub fn fetch_winners(
    idxs: &[u32],
    live: &BTreeMap<Hash, TicketValue>,
) -> Result<Vec<Hash>, PrngError> {
    let keys: Vec<&Hash> = live.keys().collect();
    idxs.iter()
        .map(|idx| {
            keys.get(*idx as usize)
                .map(|hash| **hash)
                .ok_or(PrngError::IndexOutOfRange {
                    index: *idx,
                    size: keys.len(),
                })
        })
        .collect()
}

fn lottery_final_state(winners: &[Hash], prng: &Hash256Prng) -> LotteryState {
    let digest = winners
        .iter()
        .fold(StakeHasher::new(), |hasher, winner| hasher.write(winner))
        .write(&prng.state_hash())
        .finalize();
    let mut state = [0u8; 6];
    state.copy_from_slice(&digest[..6]);
    state
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct StakeNode {
    height: u32,
    live_tickets: Arc<BTreeMap<Hash, TicketValue>>,
    /// Live tickets ordered by the height at which they went live.
    live_by_height: Arc<BTreeSet<(u32, Hash)>>,
    missed_tickets: Arc<BTreeMap<Hash, TicketValue>>,
    revoked_tickets: Arc<BTreeMap<Hash, TicketValue>>,
    /// Purchased tickets keyed by the height at which they go live.
    immature_tickets: Arc<BTreeMap<u32, Vec<Hash>>>,
    undo: Vec<UndoTicketData>,
    new_tickets: Vec<Hash>,
    winners: Vec<Hash>,
    final_state: LotteryState,
}

impl StakeNode {
    /// The empty pool of the genesis block.
    pub fn genesis() -> Self {
        Self::default()
    }

    /// Derives the node of the child block at `self.height + 1`.
    ///
    /// `tickets_voted` and `revoked` are the tickets spent by the block's
    /// votes and revocations, `purchased` the tickets it buys.
    pub fn connect(
        &self,
        params: &ConsensusParams,
        lottery_iv: [u8; 32],
        tickets_voted: &[Hash],
        revoked: &[Hash],
        purchased: &[Hash],
    ) -> Result<StakeNode, ConsensusError> {
        let height = self.height + 1;
        let mut live = Arc::clone(&self.live_tickets);
        let mut by_height = Arc::clone(&self.live_by_height);
        let mut missed = Arc::clone(&self.missed_tickets);
        let mut revoked_map = Arc::clone(&self.revoked_tickets);
        let mut immature = Arc::clone(&self.immature_tickets);
        let mut undo = Vec::new();

        if height >= params.stake_enabled_height {
            let voted: HashSet<&Hash> = tickets_voted.iter().collect();
            if let Some(stray) = tickets_voted.iter().find(|hash| !self.winners.contains(*hash)) {
                return Err(RejectReason::VoteForNonWinner(hash_to_hex(stray)).into());
            }

            for winner in &self.winners {
                let mut value = Arc::make_mut(&mut live).remove(winner).ok_or_else(|| {
                    ConsensusError::CorruptTicketPool(format!(
                        "winner {} is not live",
                        hash_to_hex(winner)
                    ))
                })?;
                Arc::make_mut(&mut by_height).remove(&(value.height, *winner));
                if voted.contains(winner) {
                    value.spent = true;
                } else {
                    value.missed = true;
                    Arc::make_mut(&mut missed).insert(*winner, value);
                }
                undo.push(UndoTicketData::new(*winner, &value));
            }

            let to_expire = height.saturating_sub(params.ticket_expiry);
            let expiring: Vec<(u32, Hash)> = by_height
                .range(..=(to_expire, [0xffu8; 32]))
                .copied()
                .collect();
            for key in expiring {
                Arc::make_mut(&mut by_height).remove(&key);
                if let Some(mut value) = Arc::make_mut(&mut live).remove(&key.1) {
                    value.missed = true;
                    value.expired = true;
                    Arc::make_mut(&mut missed).insert(key.1, value);
                    undo.push(UndoTicketData::new(key.1, &value));
                }
            }

            for hash in revoked {
                let mut value = Arc::make_mut(&mut missed)
                    .remove(hash)
                    .ok_or_else(|| RejectReason::RevokeNonMissed(hash_to_hex(hash)))?;
                value.revoked = true;
                Arc::make_mut(&mut revoked_map).insert(*hash, value);
                undo.push(UndoTicketData::new(*hash, &value));
            }
        }

        if !purchased.is_empty() {
            Arc::make_mut(&mut immature)
                .entry(height + params.ticket_maturity)
                .or_default()
                .extend_from_slice(purchased);
        }

        let new_tickets = if immature.contains_key(&height) {
            Arc::make_mut(&mut immature).remove(&height).unwrap_or_default()
        } else {
            Vec::new()
        };
        for hash in &new_tickets {
            let value = TicketValue {
                height,
                ..TicketValue::default()
            };
            if Arc::make_mut(&mut live).insert(*hash, value).is_some() {
                return Err(RejectReason::DuplicateTicket(hash_to_hex(hash)).into());
            }
            Arc::make_mut(&mut by_height).insert((height, *hash));
            undo.push(UndoTicketData::new(*hash, &value));
        }

        let (winners, final_state) = if height + 1 >= params.stake_validation_height {
            let mut prng = Hash256Prng::from_iv(lottery_iv);
            let idxs = prng.find_ticket_idxs(live.len() as u32, params.tickets_per_block as u32)?;
            let winners = fetch_winners(&idxs, &live)?;
            let state = lottery_final_state(&winners, &prng);
            (winners, state)
        } else {
            (Vec::new(), [0u8; 6])
        };

        trace!(
            height,
            live = live.len(),
            missed = missed.len(),
            matured = new_tickets.len(),
            "connected stake node"
        );

        Ok(StakeNode {
            height,
            live_tickets: live,
            live_by_height: by_height,
            missed_tickets: missed,
            revoked_tickets: revoked_map,
            immature_tickets: immature,
            undo,
            new_tickets,
            winners,
            final_state,
        })
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    /// Number of live tickets.
    pub fn pool_size(&self) -> u32 {
        self.live_tickets.len() as u32
    }

    /// Tickets that must vote in the next block, in draw order.
    pub fn winners(&self) -> &[Hash] {
        &self.winners
    }

    pub fn final_state(&self) -> LotteryState {
        self.final_state
    }

    /// Live tickets in ascending hash order.
    pub fn live_tickets(&self) -> Vec<Hash> {
        self.live_tickets.keys().copied().collect()
    }

    pub fn missed_tickets(&self) -> Vec<Hash> {
        self.missed_tickets.keys().copied().collect()
    }

    pub fn revoked_tickets(&self) -> Vec<Hash> {
        self.revoked_tickets.keys().copied().collect()
    }

    /// Tickets bought but not yet live.
    pub fn immature_tickets(&self) -> Vec<Hash> {
        self.immature_tickets.values().flatten().copied().collect()
    }

    pub fn live_ticket(&self, hash: &Hash) -> Option<&TicketValue> {
        self.live_tickets.get(hash)
    }

    pub fn exists_live_ticket(&self, hash: &Hash) -> bool {
        self.live_tickets.contains_key(hash)
    }

    pub fn exists_missed_ticket(&self, hash: &Hash) -> bool {
        self.missed_tickets.contains_key(hash)
    }

    pub fn exists_revoked_ticket(&self, hash: &Hash) -> bool {
        self.revoked_tickets.contains_key(hash)
    }

    /// True if the ticket expired, whether or not it was revoked since.
    pub fn exists_expired_ticket(&self, hash: &Hash) -> bool {
        self.missed_tickets
            .get(hash)
            .or_else(|| self.revoked_tickets.get(hash))
            .map_or(false, |value| value.expired)
    }

    /// Tickets that went live in this block.
    pub fn new_tickets(&self) -> &[Hash] {
        &self.new_tickets
    }

    /// Tickets voted in this block.
    pub fn spent_by_block(&self) -> Vec<Hash> {
        self.undo
            .iter()
            .filter(|entry| entry.spent)
            .map(|entry| entry.ticket_hash)
            .collect()
    }

    /// Tickets flagged missed in this block's undo data: winners that did
    /// not vote, expired tickets and missed tickets revoked by the block.
    pub fn missed_by_block(&self) -> Vec<Hash> {
        self.undo
            .iter()
            .filter(|entry| entry.missed)
            .map(|entry| entry.ticket_hash)
            .collect()
    }

    pub fn expired_by_block(&self) -> Vec<Hash> {
        self.undo
            .iter()
            .filter(|entry| entry.expired && !entry.revoked)
            .map(|entry| entry.ticket_hash)
            .collect()
    }

    pub fn revoked_by_block(&self) -> Vec<Hash> {
        self.undo
            .iter()
            .filter(|entry| entry.revoked)
            .map(|entry| entry.ticket_hash)
            .collect()
    }

    pub fn undo_data(&self) -> &[UndoTicketData] {
        &self.undo
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn params() -> ConsensusParams {
        ConsensusParams {
            ticket_maturity: 2,
            ticket_expiry: 10,
            tickets_per_block: 3,
            stake_enabled_height: 3,
            stake_validation_height: 6,
            mempool_vote_expiry: 2,
            hybrid_fork_height: 1,
            ..ConsensusParams::regtest()
        }
    }

    fn ticket(i: u8) -> Hash {
        let mut hash = [0u8; 32];
        hash[0] = i;
        hash[31] = 0xaa;
        hash
    }

    fn iv(height: u32) -> [u8; 32] {
        calc_lottery_iv(&[height as u8; 32], height)
    }

    /// Connects blocks up to `height`, buying `per_block` tickets in each of
    /// the first blocks and voting every winner.
    fn grow(params: &ConsensusParams, height: u32, per_block: u8) -> StakeNode {
        let mut node = StakeNode::genesis();
        let mut next = 0u8;
        while node.height() < height {
            let bought: Vec<Hash> = (0..per_block)
                .map(|_| {
                    next += 1;
                    ticket(next)
                })
                .collect();
            let voted = node.winners().to_vec();
            let h = node.height() + 1;
            node = node.connect(params, iv(h), &voted, &[], &bought).unwrap();
        }
        node
    }

    #[test]
    fn test_tickets_go_live_after_maturity() {
        let params = params();
        let g = StakeNode::genesis();
        let n1 = g.connect(&params, iv(1), &[], &[], &[ticket(1)]).unwrap();
        assert!(!n1.exists_live_ticket(&ticket(1)));
        assert_eq!(n1.immature_tickets(), vec![ticket(1)]);
        let n2 = n1.connect(&params, iv(2), &[], &[], &[]).unwrap();
        assert!(!n2.exists_live_ticket(&ticket(1)));
        let n3 = n2.connect(&params, iv(3), &[], &[], &[]).unwrap();
        assert!(n3.exists_live_ticket(&ticket(1)));
        assert_eq!(n3.new_tickets(), &[ticket(1)]);
        assert_eq!(n3.live_ticket(&ticket(1)).map(|v| v.height), Some(3));
        assert!(n3.immature_tickets().is_empty());
    }

    #[test]
    fn test_winners_drawn_from_validation_height_minus_one() {
        let params = params();
        let node = grow(&params, 4, 2);
        assert!(node.winners().is_empty());
        assert_eq!(node.final_state(), [0u8; 6]);

        let node = grow(&params, 5, 2);
        assert_eq!(node.winners().len(), 3);
        assert_ne!(node.final_state(), [0u8; 6]);
        for winner in node.winners() {
            assert!(node.exists_live_ticket(winner));
        }
    }

    #[test]
    fn test_unvoted_winners_become_missed() {
        let params = params();
        let node = grow(&params, 5, 2);
        let winners = node.winners().to_vec();
        let child = node.connect(&params, iv(6), &winners[..2], &[], &[]).unwrap();

        assert_eq!(child.spent_by_block().len(), 2);
        assert_eq!(child.missed_by_block(), vec![winners[2]]);
        assert!(child.exists_missed_ticket(&winners[2]));
        assert!(!child.exists_live_ticket(&winners[0]));
        assert!(!child.exists_missed_ticket(&winners[0]));
        // three winners leave, two tickets bought at height 4 mature
        assert_eq!(child.pool_size(), node.pool_size() - 3 + 2);
    }

    #[test]
    fn test_vote_for_non_winner_is_rejected() {
        let params = params();
        let node = grow(&params, 5, 2);
        let err = node
            .connect(&params, iv(6), &[ticket(200)], &[], &[])
            .unwrap_err();
        assert!(matches!(
            err.reject_reason(),
            Some(RejectReason::VoteForNonWinner(_))
        ));
    }

    #[test]
    fn test_revocation_moves_missed_to_revoked() {
        let params = params();
        let node = grow(&params, 5, 2);
        let winners = node.winners().to_vec();
        let missed = node.connect(&params, iv(6), &[], &[], &[]).unwrap();
        assert_eq!(missed.missed_tickets().len(), 3);

        let revoked = missed
            .connect(&params, iv(7), missed.winners(), &[winners[0]], &[])
            .unwrap();
        assert!(revoked.exists_revoked_ticket(&winners[0]));
        assert!(!revoked.exists_missed_ticket(&winners[0]));
        assert_eq!(revoked.revoked_by_block(), vec![winners[0]]);
        assert!(revoked.missed_by_block().contains(&winners[0]));
        assert!(!revoked.expired_by_block().contains(&winners[0]));

        let err = revoked
            .connect(&params, iv(8), revoked.winners(), &[winners[0]], &[])
            .unwrap_err();
        assert!(matches!(
            err.reject_reason(),
            Some(RejectReason::RevokeNonMissed(_))
        ));
    }

    #[test]
    fn test_tickets_expire_into_missed() {
        let params = ConsensusParams {
            stake_validation_height: 40,
            ..params()
        };
        let node = grow(&params, 3, 1);
        assert!(node.exists_live_ticket(&ticket(1)));

        let mut node = node;
        while node.height() < 2 + params.ticket_expiry {
            let h = node.height() + 1;
            node = node.connect(&params, iv(h), &[], &[], &[]).unwrap();
        }
        assert!(node.exists_live_ticket(&ticket(1)));

        let expired = node
            .connect(&params, iv(node.height() + 1), &[], &[], &[])
            .unwrap();
        assert!(expired.exists_missed_ticket(&ticket(1)));
        assert!(expired.exists_expired_ticket(&ticket(1)));
        assert_eq!(expired.expired_by_block(), vec![ticket(1)]);
        assert_eq!(expired.missed_by_block(), vec![ticket(1)]);
    }

    #[test]
    fn test_expiry_follows_live_height_order() {
        let params = ConsensusParams {
            stake_validation_height: 40,
            ..params()
        };
        // ticket i goes live at height i + 2
        let mut node = grow(&params, 5, 1);
        while node.height() < 3 + params.ticket_expiry {
            let h = node.height() + 1;
            node = node.connect(&params, iv(h), &[], &[], &[]).unwrap();
            assert_eq!(node.live_by_height.len(), node.live_tickets.len());
        }
        assert_eq!(node.expired_by_block(), vec![ticket(1)]);

        let node = node
            .connect(&params, iv(node.height() + 1), &[], &[], &[])
            .unwrap();
        assert_eq!(node.expired_by_block(), vec![ticket(2)]);
        assert_eq!(node.live_tickets(), vec![ticket(3), ticket(4), ticket(5)]);
        assert!(node.live_by_height.contains(&(5, ticket(3))));
        assert_eq!(node.live_by_height.len(), 3);
    }

    #[test]
    fn test_voted_winners_leave_height_index() {
        let params = params();
        let node = grow(&params, 5, 2);
        let winners = node.winners().to_vec();
        let child = node.connect(&params, iv(6), &winners, &[], &[]).unwrap();
        assert_eq!(child.live_by_height.len(), child.live_tickets.len());
        for winner in &winners {
            assert!(!child.live_by_height.iter().any(|(_, hash)| hash == winner));
        }
    }

    #[test]
    fn test_pool_too_small_for_lottery() {
        let params = ConsensusParams {
            tickets_per_block: 5,
            ..params()
        };
        let node = grow(&params, 4, 1);
        assert_eq!(node.pool_size(), 2);
        let err = node.connect(&params, iv(5), &[], &[], &[]).unwrap_err();
        assert!(matches!(err, ConsensusError::Lottery(PrngError::PoolTooSmall { .. })));
    }

    #[test]
    fn test_fetch_winners_index_out_of_range() {
        let live: BTreeMap<Hash, TicketValue> =
            (0..255u8).map(|i| (ticket(i), TicketValue::default())).collect();
        assert_eq!(fetch_winners(&[0, 254], &live).unwrap(), vec![ticket(0), ticket(254)]);
        assert_eq!(
            fetch_winners(&[256], &live),
            Err(PrngError::IndexOutOfRange {
                index: 256,
                size: 255
            })
        );
    }

    #[test]
    fn test_children_share_parent_maps() {
        let params = params();
        let node = grow(&params, 4, 2);
        let child = node.connect(&params, iv(5), &[], &[], &[]).unwrap();
        assert!(Arc::ptr_eq(&node.missed_tickets, &child.missed_tickets));
        assert!(Arc::ptr_eq(&node.revoked_tickets, &child.revoked_tickets));
        assert!(!Arc::ptr_eq(&node.live_tickets, &child.live_tickets));
        assert_eq!(child.pool_size(), node.pool_size() + 2);
    }

    proptest! {
        #[test]
        fn prop_reconnecting_is_deterministic(seed in any::<[u8; 32]>(), count in 3u8..40) {
            let params = params();
            let mut parent = StakeNode::genesis();
            let bought: Vec<Hash> = (1..=count).map(ticket).collect();
            parent = parent.connect(&params, iv(1), &[], &[], &bought).unwrap();
            while parent.height() < 4 {
                let h = parent.height() + 1;
                parent = parent.connect(&params, iv(h), &[], &[], &[]).unwrap();
            }

            let a = parent.connect(&params, seed, &[], &[], &[]).unwrap();
            let b = parent.connect(&params, seed, &[], &[], &[]).unwrap();
            prop_assert_eq!(&a, &b);
            prop_assert_eq!(a.winners().len(), 3);
        }
    }
}
