//! Deterministic pseudo-random number generator for the ticket lottery.
//!
//! Every node must draw the same winners from the same live pool, so the
//! generator is fully specified: it walks a chain of SHAKE256 digests and
//! hands out their big-endian 32-bit words one at a time.

use log::{debug, trace};
use thiserror::Error;

use crate::stake_hasher::StakeHasher;

/// Mixed into every seed before it becomes an initialization vector. The
/// bytes are the leading hex digits of pi.
pub const SEED_CONST: [u8; 8] = [0x24, 0x3F, 0x6A, 0x88, 0x85, 0xA3, 0x08, 0xD3];

const WORDS_PER_HASH: usize = 8;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PrngError {
    #[error("List size too small: {size} tickets for {wanted} winners")]
    PoolTooSmall { size: u32, wanted: u32 },

    #[error("Ticket index {index} out of range for pool of {size}")]
    IndexOutOfRange { index: u32, size: usize },
}

/// Derives the initialization vector for `seed`.
pub fn calc_hash256_prng_iv(seed: &[u8]) -> [u8; 32] {
    StakeHasher::new().write(seed).write(&SEED_CONST).finalize()
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Hash256Prng {
    seed: [u8; 32],
    last_hash: [u8; 32],
    idx: u64,
    hash_idx: usize,
}

impl Hash256Prng {
    /// Creates a generator for an arbitrary seed.
    pub fn new(seed: &[u8]) -> Self {
        Self::from_iv(calc_hash256_prng_iv(seed))
    }

    /// Creates a generator from a precomputed initialization vector.
    pub fn from_iv(iv: [u8; 32]) -> Self {
        Hash256Prng {
            seed: iv,
            last_hash: iv,
            idx: 0,
            hash_idx: 0,
        }
    }

    /// Returns the next 32-bit value.
    pub fn hash256_rand(&mut self) -> u32 {
        let start = self.hash_idx * 4;
        let mut word = [0u8; 4];
        word.copy_from_slice(&self.last_hash[start..start + 4]);
        let rand = u32::from_be_bytes(word);
        self.hash_idx += 1;

        if self.hash_idx >= WORDS_PER_HASH {
            self.last_hash = StakeHasher::new()
                .write(&self.seed)
                .write_u32_be(self.idx as u32)
                .finalize();
            self.idx += 1;
            self.hash_idx = 0;
        }

        if self.idx > u32::MAX as u64 {
            self.seed = StakeHasher::new().write(&self.seed).finalize();
            self.last_hash = self.seed;
            self.idx = 0;
        }

        rand
    }

    /// Digest of the generator's current position.
    pub fn state_hash(&self) -> [u8; 32] {
        StakeHasher::new()
            .write(&self.last_hash)
            .write_u32_be(self.idx as u32)
            .write_u8(self.hash_idx as u8)
            .finalize()
    }

    /// Returns a value uniformly distributed in `[0, upper_bound)`, rejecting
    /// draws that would bias the modulo.
    pub fn uniform_random(&mut self, upper_bound: u32) -> u32 {
        if upper_bound < 2 {
            return 0;
        }

        let min = if upper_bound > 0x8000_0000 {
            (!upper_bound).wrapping_add(1)
        } else {
            // (2^32 - 2x) % x == 2^32 % x for x <= 2^31
            u32::MAX
                .wrapping_sub(upper_bound.wrapping_mul(2))
                .wrapping_add(1)
                % upper_bound
        };

        loop {
            let rand = self.hash256_rand();
            if rand >= min {
                return rand % upper_bound;
            }
        }
    }

    /// Draws `n` distinct indices into a pool of `size` tickets, in draw order.
    pub fn find_ticket_idxs(&mut self, size: u32, n: u32) -> Result<Vec<u32>, PrngError> {
        if size < n {
            debug!("Ticket pool of {} cannot supply {} winners", size, n);
            return Err(PrngError::PoolTooSmall { size, wanted: n });
        }

        let mut list = Vec::with_capacity(n as usize);
        while list.len() < n as usize {
            let rand = self.uniform_random(size);
            if !list.contains(&rand) {
                list.push(rand);
            }
        }
        trace!("Drew ticket indexes {:?} from a pool of {}", list, size);
        Ok(list)
    }
}
