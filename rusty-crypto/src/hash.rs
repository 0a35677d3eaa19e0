//! General purpose hashing helpers.

use blake3::Hasher as Blake3Hasher;
use sha2::{Digest, Sha256};

/// Calculate SHA256 hash of input data
pub fn calculate_sha256(data: &[u8]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hasher.finalize().into()
}

/// SHA256 applied twice.
pub fn double_sha256(data: &[u8]) -> [u8; 32] {
    calculate_sha256(&calculate_sha256(data))
}

/// BLAKE3 digest of `data`, used for block and transaction identity.
pub fn blake3_hash(data: &[u8]) -> [u8; 32] {
    blake3::hash(data).into()
}

/// Computes the Merkle root of a list of leaf hashes. An odd node at any
/// level is paired with itself; an empty list yields the zero hash.
pub fn merkle_root(leaves: &[[u8; 32]]) -> [u8; 32] {
    if leaves.is_empty() {
        return [0u8; 32];
    }

    let mut current_level = leaves.to_vec();
    while current_level.len() > 1 {
        current_level = current_level
            .chunks(2)
            .map(|pair| {
                let left = pair[0];
                let right = pair.get(1).copied().unwrap_or(left);
                Blake3Hasher::new()
                    .update(&left)
                    .update(&right)
                    .finalize()
                    .into()
            })
            .collect();
    }
    current_level[0]
}
