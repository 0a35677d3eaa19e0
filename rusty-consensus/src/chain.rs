//! Arena of block index entries.
//!
//! Entries are addressed by [`BlockId`] and link to their parent and skip
//! ancestor by index, never by reference. The active chain is a height-indexed
//! list of ids. Stake nodes are cached per entry and can be dropped and
//! replayed from the entry's recorded stake delta at any time.

use std::collections::HashMap;
use std::sync::Arc;

use rusty_shared_types::{
    hash_to_hex, Amount, Block, BlockHeader, ConsensusParams, Hash, StakeHeaderFields, TxClass,
};
use tracing::{debug, trace};

use crate::audit_log;
use crate::error::ConsensusError;
use crate::stake_tx::{find_spent_tickets_in_block, parse_tx_class, VoteVersion};
use crate::ticket_pool::{calc_lottery_iv, StakeNode};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BlockId(usize);

impl BlockId {
    pub fn index(&self) -> usize {
        self.0
    }
}

/// Tickets a block votes, revokes and buys.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StakeDelta {
    pub voted: Vec<Hash>,
    pub revoked: Vec<Hash>,
    pub purchased: Vec<Hash>,
}

impl StakeDelta {
    pub fn from_block(block: &Block) -> (Self, Vec<VoteVersion>) {
        let spent = find_spent_tickets_in_block(block);
        let purchased = block
            .transactions
            .iter()
            .filter(|tx| parse_tx_class(tx) == TxClass::BuyTicket)
            .map(|tx| tx.txid())
            .collect();
        let delta = StakeDelta {
            voted: spent.voters,
            revoked: spent.revocations,
            purchased,
        };
        (delta, spent.vote_versions)
    }
}

#[derive(Debug, Clone)]
pub struct ChainEntry {
    hash: Hash,
    height: u32,
    parent: Option<BlockId>,
    skip: Option<BlockId>,
    header: BlockHeader,
    stake: StakeHeaderFields,
    vote_versions: Vec<VoteVersion>,
    delta: StakeDelta,
    stake_node: Option<Arc<StakeNode>>,
}

impl ChainEntry {
    pub fn hash(&self) -> &Hash {
        &self.hash
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn parent(&self) -> Option<BlockId> {
        self.parent
    }

    pub fn header(&self) -> &BlockHeader {
        &self.header
    }

    /// Stake header fields; zeroed for pre-fork headers.
    pub fn stake_fields(&self) -> &StakeHeaderFields {
        &self.stake
    }

    pub fn stake_difficulty(&self) -> Amount {
        self.stake.stake_difficulty
    }

    pub fn ticket_pool_size(&self) -> u32 {
        self.stake.ticket_pool_size
    }

    pub fn fresh_stake(&self) -> u8 {
        self.stake.fresh_stake
    }

    pub fn stake_version(&self) -> u32 {
        self.stake.stake_version
    }

    /// Versions carried by the block's votes.
    pub fn vote_versions(&self) -> &[VoteVersion] {
        &self.vote_versions
    }

    pub fn delta(&self) -> &StakeDelta {
        &self.delta
    }

    /// The cached stake node, if it has been derived.
    pub fn stake_node(&self) -> Option<&Arc<StakeNode>> {
        self.stake_node.as_ref()
    }
}

/// Blocks removed from and added to the active chain by a tip change.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Reorganization {
    /// Disconnected blocks, old tip first.
    pub disconnected: Vec<BlockId>,
    /// Connected blocks, fork child first.
    pub connected: Vec<BlockId>,
}

fn invert_lowest_one(n: u32) -> u32 {
    n & n.wrapping_sub(1)
}

/// Height the skip link of a block at `height` points to.
fn skip_height(height: u32) -> u32 {
    if height < 2 {
        0
    } else if height & 1 != 0 {
        invert_lowest_one(invert_lowest_one(height - 1)) + 1
    } else {
        invert_lowest_one(height)
    }
}

pub struct ChainIndex {
    params: Arc<ConsensusParams>,
    entries: Vec<ChainEntry>,
    by_hash: HashMap<Hash, BlockId>,
    active: Vec<BlockId>,
}

impl ChainIndex {
    /// Creates an index holding only `genesis`, which becomes the active tip.
    pub fn new(genesis: BlockHeader, params: Arc<ConsensusParams>) -> Self {
        let hash = genesis.hash();
        let entry = ChainEntry {
            hash,
            height: 0,
            parent: None,
            skip: None,
            stake: genesis.stake_or_default(),
            header: genesis,
            vote_versions: Vec::new(),
            delta: StakeDelta::default(),
            stake_node: Some(Arc::new(StakeNode::genesis())),
        };
        let id = BlockId(0);
        let mut by_hash = HashMap::new();
        by_hash.insert(hash, id);
        ChainIndex {
            params,
            entries: vec![entry],
            by_hash,
            active: vec![id],
        }
    }

    pub fn params(&self) -> &Arc<ConsensusParams> {
        &self.params
    }

    /// Adds a header whose parent is already indexed. Inserting a known
    /// header returns its existing id.
    pub fn insert(
        &mut self,
        header: BlockHeader,
        delta: StakeDelta,
        vote_versions: Vec<VoteVersion>,
    ) -> Result<BlockId, ConsensusError> {
        let hash = header.hash();
        if let Some(id) = self.by_hash.get(&hash) {
            return Ok(*id);
        }
        let parent = self
            .by_hash(header.prev_block_hash())
            .ok_or_else(|| ConsensusError::UnknownBlock(hash_to_hex(header.prev_block_hash())))?;
        let height = self.get(parent).height + 1;
        let skip = self.get_ancestor(parent, skip_height(height));

        let id = BlockId(self.entries.len());
        self.entries.push(ChainEntry {
            hash,
            height,
            parent: Some(parent),
            skip,
            stake: header.stake_or_default(),
            header,
            vote_versions,
            delta,
            stake_node: None,
        });
        self.by_hash.insert(hash, id);
        trace!(height, hash = %hash_to_hex(&hash), "indexed block");
        Ok(id)
    }

    pub fn get(&self, id: BlockId) -> &ChainEntry {
        &self.entries[id.0]
    }

    pub fn by_hash(&self, hash: &Hash) -> Option<BlockId> {
        self.by_hash.get(hash).copied()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn tip(&self) -> BlockId {
        self.active[self.active.len() - 1]
    }

    pub fn tip_height(&self) -> u32 {
        (self.active.len() - 1) as u32
    }

    /// The active block at `height`.
    pub fn active_at(&self, height: u32) -> Option<BlockId> {
        self.active.get(height as usize).copied()
    }

    pub fn is_active(&self, id: BlockId) -> bool {
        self.active_at(self.get(id).height) == Some(id)
    }

    /// Ancestor of `id` at `height`, following skip links where they do not
    /// overshoot.
    pub fn get_ancestor(&self, id: BlockId, height: u32) -> Option<BlockId> {
        let mut current = id;
        let mut entry = self.get(current);
        if height > entry.height {
            return None;
        }
        while entry.height > height {
            current = match entry.skip {
                Some(skip) if self.get(skip).height >= height => skip,
                _ => entry.parent?,
            };
            entry = self.get(current);
        }
        Some(current)
    }

    /// Ancestor `distance` blocks below `id`.
    pub fn get_relative_ancestor(&self, id: BlockId, distance: u32) -> Option<BlockId> {
        let height = self.get(id).height.checked_sub(distance)?;
        self.get_ancestor(id, height)
    }

    /// Last block shared by the chains ending at `a` and `b`.
    pub fn find_fork(&self, a: BlockId, b: BlockId) -> BlockId {
        let (mut a, mut b) = (a, b);
        let (ha, hb) = (self.get(a).height, self.get(b).height);
        if ha > hb {
            a = self.get_ancestor(a, hb).unwrap_or(a);
        } else if hb > ha {
            b = self.get_ancestor(b, ha).unwrap_or(b);
        }
        while a != b {
            match (self.get(a).parent, self.get(b).parent) {
                (Some(pa), Some(pb)) => {
                    a = pa;
                    b = pb;
                }
                _ => break,
            }
        }
        a
    }

    /// Stores a derived stake node for `id`.
    pub fn set_stake_node(&mut self, id: BlockId, node: Arc<StakeNode>) {
        self.entries[id.0].stake_node = Some(node);
    }

    /// The stake node of `id`, replaying stake deltas from the nearest
    /// ancestor with a cached node when needed.
    pub fn fetch_stake_node(&mut self, id: BlockId) -> Result<Arc<StakeNode>, ConsensusError> {
        let mut path = Vec::new();
        let mut current = id;
        let mut node = loop {
            let entry = self.get(current);
            if let Some(node) = &entry.stake_node {
                break Arc::clone(node);
            }
            path.push(current);
            current = entry
                .parent
                .ok_or_else(|| ConsensusError::MissingStakeNode(hash_to_hex(&entry.hash)))?;
        };

        if !path.is_empty() {
            debug!(blocks = path.len(), "replaying stake nodes");
        }
        for block in path.into_iter().rev() {
            let entry = self.get(block);
            let delta = &entry.delta;
            let child = node.connect(
                &self.params,
                calc_lottery_iv(&entry.hash, entry.height),
                &delta.voted,
                &delta.revoked,
                &delta.purchased,
            )?;
            node = Arc::new(child);
            self.set_stake_node(block, Arc::clone(&node));
        }
        Ok(node)
    }

    /// Makes `id` the active tip. Stake nodes of blocks leaving the active
    /// chain are dropped and the new branch's nodes are derived.
    pub fn set_active_tip(&mut self, id: BlockId) -> Result<Reorganization, ConsensusError> {
        let old_tip = self.tip();
        let fork = self.find_fork(old_tip, id);
        let fork_height = self.get(fork).height;

        let disconnected: Vec<BlockId> = self.active[fork_height as usize + 1..]
            .iter()
            .rev()
            .copied()
            .collect();
        let mut connected = Vec::new();
        let mut current = id;
        while current != fork {
            connected.push(current);
            current = match self.get(current).parent {
                Some(parent) => parent,
                None => break,
            };
        }
        connected.reverse();

        self.fetch_stake_node(id)?;

        for block in &disconnected {
            self.entries[block.0].stake_node = None;
        }
        self.active.truncate(fork_height as usize + 1);
        self.active.extend_from_slice(&connected);

        if !disconnected.is_empty() {
            audit_log::log_reorganization(
                self.get(old_tip).hash(),
                self.get(id).hash(),
                fork_height,
                disconnected.len(),
                connected.len(),
            );
        }
        Ok(Reorganization {
            disconnected,
            connected,
        })
    }
}
