//! Stake version agreement.
//!
//! Versions are tallied over fixed windows of `stake_version_interval`
//! blocks aligned to the stake validation height. A version wins a window
//! when its count reaches the supermajority of the window. Results are
//! cached per block hash in [`StakeVersionVoter`].

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, PoisonError, RwLock};

use rusty_shared_types::{ConsensusParams, Hash};
use tracing::trace;

use crate::chain::{BlockId, ChainIndex};

/// Height of the final block of the window before the one containing `height`.
pub fn calc_want_height(stake_validation_height: i64, interval: i64, height: i64) -> i64 {
    let interval_offset = stake_validation_height % interval;
    let adjusted_height = height - interval_offset - 1;
    (adjusted_height - ((adjusted_height + 1) % interval)) + interval_offset
}

/// The final block of the window before the block following `prev`, or
/// `None` while no complete window exists above the stake validation height.
pub fn find_stake_version_prior_node(
    chain: &ChainIndex,
    prev: BlockId,
    params: &ConsensusParams,
) -> Option<BlockId> {
    let next_height = chain.get(prev).height() as i64 + 1;
    let svh = params.stake_validation_height as i64;
    let interval = params.stake_version_interval as i64;
    if next_height < svh + interval {
        return None;
    }
    let want_height = calc_want_height(svh, interval, next_height);
    if want_height < 0 {
        return None;
    }
    chain.get_ancestor(prev, want_height as u32)
}

/// Smallest version whose count reaches `required`.
fn majority_version(counts: &BTreeMap<u32, u64>, required: u64) -> Option<u32> {
    counts
        .iter()
        .find(|(_, count)| **count >= required)
        .map(|(version, _)| *version)
}

#[derive(Debug)]
pub struct StakeVersionVoter {
    params: Arc<ConsensusParams>,
    majority_cache: RwLock<HashMap<(Hash, u32), bool>>,
    prior_version_cache: RwLock<HashMap<Hash, Option<u32>>>,
    voter_interval_cache: RwLock<HashMap<Hash, Option<u32>>>,
    stake_version_cache: RwLock<HashMap<Hash, u32>>,
}

impl StakeVersionVoter {
    pub fn new(params: Arc<ConsensusParams>) -> Self {
        StakeVersionVoter {
            params,
            majority_cache: RwLock::new(HashMap::new()),
            prior_version_cache: RwLock::new(HashMap::new()),
            voter_interval_cache: RwLock::new(HashMap::new()),
            stake_version_cache: RwLock::new(HashMap::new()),
        }
    }

    fn cached<K, V>(cache: &RwLock<HashMap<K, V>>, key: &K) -> Option<V>
    where
        K: std::hash::Hash + Eq,
        V: Clone,
    {
        cache
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .cloned()
    }

    fn remember<K, V>(cache: &RwLock<HashMap<K, V>>, key: K, value: V)
    where
        K: std::hash::Hash + Eq,
    {
        cache
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(key)
            .or_insert(value);
    }

    fn header_version_counts(&self, chain: &ChainIndex, end: BlockId) -> BTreeMap<u32, u64> {
        let mut counts = BTreeMap::new();
        let mut node = Some(end);
        for _ in 0..self.params.stake_version_interval {
            let Some(id) = node else { break };
            let entry = chain.get(id);
            *counts.entry(entry.stake_version()).or_insert(0) += 1;
            node = entry.parent();
        }
        counts
    }

    /// True if the header stake versions of the window ending before the
    /// block after `prev` reach `min_version` in a supermajority of blocks.
    pub fn is_stake_majority_version(&self, chain: &ChainIndex, min_version: u32, prev: BlockId) -> bool {
        let Some(node) = find_stake_version_prior_node(chain, prev, &self.params) else {
            return min_version == 0;
        };
        let key = (*chain.get(node).hash(), min_version);
        if let Some(result) = Self::cached(&self.majority_cache, &key) {
            return result;
        }

        let count: u64 = self
            .header_version_counts(chain, node)
            .range(min_version..)
            .map(|(_, count)| *count)
            .sum();
        let result = count >= self.params.majority_of(self.params.stake_version_interval as u64);
        Self::remember(&self.majority_cache, key, result);
        result
    }

    /// The supermajority header stake version of the window ending before
    /// the block after `prev`.
    pub fn calc_prior_stake_version(&self, chain: &ChainIndex, prev: BlockId) -> Option<u32> {
        let node = find_stake_version_prior_node(chain, prev, &self.params)?;
        let hash = *chain.get(node).hash();
        if let Some(result) = Self::cached(&self.prior_version_cache, &hash) {
            return result;
        }

        let counts = self.header_version_counts(chain, node);
        let required = self.params.majority_of(self.params.stake_version_interval as u64);
        let result = majority_version(&counts, required);
        Self::remember(&self.prior_version_cache, hash, result);
        result
    }

    /// The supermajority version among the votes of the window ending at
    /// `end`.
    ///
    /// # Panics
    ///
    /// If `end` is not the final block of a window at or above the stake
    /// validation height.
    pub fn calc_voter_version_interval(&self, chain: &ChainIndex, end: BlockId) -> Option<u32> {
        let entry = chain.get(end);
        let svh = self.params.stake_validation_height as i64;
        let expected_height = calc_want_height(
            svh,
            self.params.stake_version_interval as i64,
            entry.height() as i64 + 1,
        );
        assert!(
            entry.height() as i64 == expected_height && expected_height >= svh,
            "calc_voter_version_interval called on block {} which does not end a stake version interval",
            entry.height()
        );

        let hash = *entry.hash();
        if let Some(result) = Self::cached(&self.voter_interval_cache, &hash) {
            return result;
        }

        let mut counts: BTreeMap<u32, u64> = BTreeMap::new();
        let mut total_votes = 0u64;
        let mut node = Some(end);
        for _ in 0..self.params.stake_version_interval {
            let Some(id) = node else { break };
            let entry = chain.get(id);
            total_votes += entry.vote_versions().len() as u64;
            for vote in entry.vote_versions() {
                *counts.entry(vote.version).or_insert(0) += 1;
            }
            node = entry.parent();
        }

        let result = majority_version(&counts, self.params.majority_of(total_votes));
        Self::remember(&self.voter_interval_cache, hash, result);
        result
    }

    /// The most recent window's supermajority voter version, walking back
    /// one window at a time while none is found. Returns the version with
    /// the window's final block, or zero when no window has a majority.
    pub fn calc_voter_version(&self, chain: &ChainIndex, prev: BlockId) -> (u32, Option<BlockId>) {
        let svh = self.params.stake_validation_height;
        let mut node = find_stake_version_prior_node(chain, prev, &self.params);
        while let Some(id) = node {
            if chain.get(id).height() < svh {
                break;
            }
            if let Some(version) = self.calc_voter_version_interval(chain, id) {
                return (version, Some(id));
            }
            node = chain.get_relative_ancestor(id, self.params.stake_version_interval);
        }
        (0, None)
    }

    /// Stake version the header of the block after `prev` must carry.
    ///
    /// Follows the voter majority, except that a higher version already
    /// locked in by the header majority of the same window is kept.
    pub fn calc_stake_version(&self, chain: &ChainIndex, prev: BlockId) -> u32 {
        let (mut version, node) = self.calc_voter_version(chain, prev);
        let Some(node) = node else {
            return 0;
        };
        if version == 0 {
            return 0;
        }

        let hash = *chain.get(node).hash();
        if let Some(cached) = Self::cached(&self.stake_version_cache, &hash) {
            return cached;
        }

        if self.is_stake_majority_version(chain, version, node) {
            if let Some(prior) = self.calc_prior_stake_version(chain, node) {
                if prior > version {
                    version = prior;
                }
            }
        }
        trace!(height = chain.get(node).height(), version, "calculated stake version");
        Self::remember(&self.stake_version_cache, hash, version);
        version
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rusty_shared_types::{BaseHeader, BlockHeader, StakeHeaderFields, VoteBits};

    use crate::chain::StakeDelta;
    use crate::stake_tx::VoteVersion;

    fn params() -> Arc<ConsensusParams> {
        Arc::new(ConsensusParams {
            stake_validation_height: 10,
            stake_version_interval: 5,
            stake_enabled_height: 5,
            hybrid_fork_height: 1,
            ..ConsensusParams::regtest()
        })
    }

    /// Builds blocks 1..=heights.len(); entry `i` holds the header stake
    /// version and the versions of the block's votes.
    fn build(params: &Arc<ConsensusParams>, blocks: &[(u32, Vec<u32>)]) -> (ChainIndex, Vec<BlockId>) {
        let genesis = BlockHeader::PreFork(BaseHeader {
            version: 1,
            prev_block_hash: [0u8; 32],
            merkle_root: [0u8; 32],
            time: 0,
            bits: 0,
            nonce: 0,
        });
        let mut chain = ChainIndex::new(genesis, Arc::clone(params));
        let mut ids = vec![chain.tip()];
        for (i, (stake_version, votes)) in blocks.iter().enumerate() {
            let prev = ids[ids.len() - 1];
            let header = BlockHeader::Hybrid {
                base: BaseHeader {
                    version: 1,
                    prev_block_hash: *chain.get(prev).hash(),
                    merkle_root: [0u8; 32],
                    time: i as u32 + 1,
                    bits: 0,
                    nonce: 0,
                },
                stake: StakeHeaderFields {
                    stake_version: *stake_version,
                    ..StakeHeaderFields::default()
                },
            };
            let votes = votes
                .iter()
                .map(|version| VoteVersion {
                    version: *version,
                    bits: VoteBits::rtt_accepted(),
                })
                .collect();
            ids.push(chain.insert(header, StakeDelta::default(), votes).unwrap());
        }
        (chain, ids)
    }

    /// `count` blocks with header version `header` and five votes of `vote`
    /// from height 10 on.
    fn blocks(from: u32, count: u32, header: u32, vote: u32) -> Vec<(u32, Vec<u32>)> {
        (from..from + count)
            .map(|height| {
                let votes = if height >= 10 { vec![vote; 5] } else { Vec::new() };
                (header, votes)
            })
            .collect()
    }

    #[test]
    fn test_calc_want_height() {
        assert_eq!(calc_want_height(13, 11, 35), 34);
        assert_eq!(calc_want_height(13, 11, 40), 34);
        assert_eq!(calc_want_height(13, 11, 46), 45);
        assert_eq!(calc_want_height(10, 5, 20), 19);
        assert_eq!(calc_want_height(10, 5, 24), 19);
    }

    #[test]
    fn test_no_version_before_first_window() {
        let params = params();
        let (chain, ids) = build(&params, &blocks(1, 13, 0, 3));
        let voter = StakeVersionVoter::new(Arc::clone(&params));
        assert_eq!(find_stake_version_prior_node(&chain, ids[13], &params), None);
        assert_eq!(voter.calc_stake_version(&chain, ids[13]), 0);
        assert!(voter.is_stake_majority_version(&chain, 0, ids[13]));
        assert!(!voter.is_stake_majority_version(&chain, 1, ids[13]));
    }

    #[test]
    fn test_voter_majority_sets_version() {
        let params = params();
        let (chain, ids) = build(&params, &blocks(1, 19, 0, 3));
        let voter = StakeVersionVoter::new(Arc::clone(&params));
        assert_eq!(find_stake_version_prior_node(&chain, ids[19], &params), Some(ids[19]));
        assert_eq!(voter.calc_voter_version(&chain, ids[19]), (3, Some(ids[19])));
        assert_eq!(voter.calc_stake_version(&chain, ids[19]), 3);
        // the window stays in force until the next one completes
        let (chain, ids) = build(&params, &blocks(1, 23, 0, 3));
        assert_eq!(voter.calc_stake_version(&chain, ids[23]), 3);
    }

    #[test]
    fn test_split_window_falls_back_to_previous() {
        let params = params();
        let mut chain_blocks = blocks(1, 14, 0, 2);
        for height in 15..=19u32 {
            let votes = if height % 2 == 0 { vec![3; 5] } else { vec![2, 2, 2, 3, 3] };
            chain_blocks.push((0, votes));
        }
        let (chain, ids) = build(&params, &chain_blocks);
        let voter = StakeVersionVoter::new(Arc::clone(&params));
        assert_eq!(voter.calc_voter_version_interval(&chain, ids[19]), None);
        assert_eq!(voter.calc_voter_version(&chain, ids[19]), (2, Some(ids[14])));
    }

    #[test]
    fn test_header_majority_prevents_regression() {
        let params = params();
        let mut chain_blocks = blocks(1, 14, 0, 4);
        chain_blocks.extend(blocks(15, 5, 4, 3));
        let (chain, ids) = build(&params, &chain_blocks);
        let voter = StakeVersionVoter::new(Arc::clone(&params));
        assert_eq!(voter.calc_voter_version(&chain, ids[19]).0, 3);
        assert_eq!(voter.calc_prior_stake_version(&chain, ids[19]), Some(4));
        assert_eq!(voter.calc_stake_version(&chain, ids[19]), 4);

        let mut unlocked = blocks(1, 14, 0, 4);
        unlocked.extend(blocks(15, 5, 0, 3));
        let (chain, ids) = build(&params, &unlocked);
        let voter = StakeVersionVoter::new(Arc::clone(&params));
        assert_eq!(voter.calc_stake_version(&chain, ids[19]), 3);
    }

    #[test]
    fn test_cached_results_match_fresh_results() {
        let params = params();
        let mut chain_blocks = blocks(1, 14, 0, 2);
        chain_blocks.extend(blocks(15, 10, 2, 3));
        let (chain, ids) = build(&params, &chain_blocks);
        let warm = StakeVersionVoter::new(Arc::clone(&params));
        let first: Vec<u32> = ids.iter().map(|id| warm.calc_stake_version(&chain, *id)).collect();
        let second: Vec<u32> = ids.iter().map(|id| warm.calc_stake_version(&chain, *id)).collect();
        assert_eq!(first, second);
        for (id, version) in ids.iter().zip(&first) {
            let cold = StakeVersionVoter::new(Arc::clone(&params));
            assert_eq!(cold.calc_stake_version(&chain, *id), *version);
        }
        assert_eq!(first[24], 3);
    }

    #[test]
    #[should_panic(expected = "does not end a stake version interval")]
    fn test_voter_interval_requires_window_end() {
        let params = params();
        let (chain, ids) = build(&params, &blocks(1, 19, 0, 3));
        let voter = StakeVersionVoter::new(params);
        voter.calc_voter_version_interval(&chain, ids[17]);
    }
}
