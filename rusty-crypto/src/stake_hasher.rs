//! SHAKE256 based hasher used by the ticket lottery.
//!
//! The lottery reads a fixed 32 bytes of SHAKE256 output. Integers are
//! written in the byte order the caller asks for; the lottery only ever uses
//! big-endian indices.

use sha3::digest::{ExtendableOutput, Update, XofReader};
use sha3::Shake256;

/// Incremental SHAKE256 hasher producing 32-byte digests.
#[derive(Clone, Default)]
pub struct StakeHasher {
    inner: Shake256,
}

impl StakeHasher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn write(mut self, data: &[u8]) -> Self {
        self.inner.update(data);
        self
    }

    pub fn write_u32_be(self, value: u32) -> Self {
        self.write(&value.to_be_bytes())
    }

    pub fn write_u8(self, value: u8) -> Self {
        self.write(&[value])
    }

    pub fn finalize(self) -> [u8; 32] {
        let mut out = [0u8; 32];
        self.inner.finalize_xof().read(&mut out);
        out
    }
}

/// One-shot SHAKE256 digest of `data`.
pub fn stake_hash(data: &[u8]) -> [u8; 32] {
    StakeHasher::new().write(data).finalize()
}
