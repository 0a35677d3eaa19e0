//! Cryptographic primitives for the Rusty Coin staking engine

pub mod hash;
pub mod prng;
pub mod stake_hasher;

pub use hash::{blake3_hash, calculate_sha256, double_sha256, merkle_root};
pub use prng::{calc_hash256_prng_iv, Hash256Prng, PrngError, SEED_CONST};
pub use stake_hasher::{stake_hash, StakeHasher};
