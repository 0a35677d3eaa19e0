//! Block headers and blocks.
//!
//! Headers come in two layouts. Blocks before the hybrid fork carry only the
//! proof-of-work fields; blocks from the fork onward append the stake fields.
//! The header encoder and decoder are the only code that looks at
//! [`HARDFORK_VERSION_BIT`]; everything else matches on [`BlockHeader`].

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{Amount, Hash, Transaction};

/// Version bit announcing that the stake fields follow the base header.
pub const HARDFORK_VERSION_BIT: u32 = 0x8000_0000;

/// Serialized size of the base header.
pub const BASE_HEADER_SIZE: usize = 4 + 32 + 32 + 4 + 4 + 4;

/// Serialized size of the stake fields.
pub const STAKE_FIELDS_SIZE: usize = 8 + 2 + 4 + 6 + 2 + 1 + 1 + 32 + 4;

/// The 48-bit lottery checksum committed to by hybrid headers.
pub type LotteryState = [u8; 6];

/// Per-feature approval bits carried by votes and block headers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct VoteBits(pub u16);

impl VoteBits {
    /// Bit approving the regular transaction tree of the voted block.
    pub const RTT: u8 = 0;

    pub fn rtt_accepted() -> Self {
        VoteBits(1 << Self::RTT)
    }

    pub fn rtt_rejected() -> Self {
        VoteBits(0)
    }

    pub fn bits(&self) -> u16 {
        self.0
    }

    pub fn get_bit(&self, pos: u8) -> bool {
        pos < 16 && self.0 & (1 << pos) != 0
    }

    pub fn set_bit(&mut self, pos: u8, value: bool) {
        if pos >= 16 {
            return;
        }
        if value {
            self.0 |= 1 << pos;
        } else {
            self.0 &= !(1 << pos);
        }
    }

    pub fn is_rtt_accepted(&self) -> bool {
        self.get_bit(Self::RTT)
    }

    pub fn set_rtt_accepted(&mut self, accepted: bool) {
        self.set_bit(Self::RTT, accepted);
    }
}

impl Default for VoteBits {
    fn default() -> Self {
        VoteBits::rtt_accepted()
    }
}

/// Proof-of-work header fields present in every block.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BaseHeader {
    pub version: u32,
    pub prev_block_hash: Hash,
    pub merkle_root: Hash,
    pub time: u32,
    pub bits: u32,
    pub nonce: u32,
}

/// Stake fields appended to hybrid headers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StakeHeaderFields {
    /// Price every ticket bought in this block must pay.
    pub stake_difficulty: Amount,
    /// Aggregate approval of the parent block's regular transactions.
    pub vote_bits: VoteBits,
    /// Live ticket count of the parent block's ticket pool.
    pub ticket_pool_size: u32,
    /// Lottery checksum of the parent block's ticket pool.
    pub ticket_lottery_state: LotteryState,
    /// Number of votes included.
    pub voters: u16,
    /// Number of tickets bought.
    pub fresh_stake: u8,
    /// Number of revocations included.
    pub revocations: u8,
    pub extra_data: [u8; 32],
    /// Stake version the block producer computed for this height.
    pub stake_version: u32,
}

impl Default for StakeHeaderFields {
    fn default() -> Self {
        StakeHeaderFields {
            stake_difficulty: 0,
            vote_bits: VoteBits::rtt_accepted(),
            ticket_pool_size: 0,
            ticket_lottery_state: [0u8; 6],
            voters: 0,
            fresh_stake: 0,
            revocations: 0,
            extra_data: [0u8; 32],
            stake_version: 0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HeaderDecodeError {
    #[error("Header truncated: needed {needed} more bytes, {remaining} remaining")]
    UnexpectedEnd { needed: usize, remaining: usize },

    #[error("Header followed by {0} unexpected bytes")]
    TrailingBytes(usize),
}

/// A block header in one of its two layouts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum BlockHeader {
    /// Header of a block mined before the hybrid fork.
    PreFork(BaseHeader),
    /// Header of a block mined at or after the hybrid fork.
    Hybrid {
        base: BaseHeader,
        stake: StakeHeaderFields,
    },
}

impl BlockHeader {
    /// Picks the layout required at `height`.
    pub fn for_height(
        mut base: BaseHeader,
        stake: StakeHeaderFields,
        height: u32,
        hybrid_fork_height: u32,
    ) -> Self {
        if height >= hybrid_fork_height {
            base.version |= HARDFORK_VERSION_BIT;
            BlockHeader::Hybrid { base, stake }
        } else {
            base.version &= !HARDFORK_VERSION_BIT;
            BlockHeader::PreFork(base)
        }
    }

    pub fn base(&self) -> &BaseHeader {
        match self {
            BlockHeader::PreFork(base) => base,
            BlockHeader::Hybrid { base, .. } => base,
        }
    }

    pub fn stake(&self) -> Option<&StakeHeaderFields> {
        match self {
            BlockHeader::PreFork(_) => None,
            BlockHeader::Hybrid { stake, .. } => Some(stake),
        }
    }

    /// Stake fields, with pre-fork headers reading as the defaults.
    pub fn stake_or_default(&self) -> StakeHeaderFields {
        self.stake().cloned().unwrap_or_default()
    }

    pub fn is_hybrid(&self) -> bool {
        matches!(self, BlockHeader::Hybrid { .. })
    }

    pub fn prev_block_hash(&self) -> &Hash {
        &self.base().prev_block_hash
    }

    /// Canonical little-endian encoding.
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(BASE_HEADER_SIZE + STAKE_FIELDS_SIZE);
        let base = self.base();
        let version = match self {
            BlockHeader::PreFork(_) => base.version & !HARDFORK_VERSION_BIT,
            BlockHeader::Hybrid { .. } => base.version | HARDFORK_VERSION_BIT,
        };
        out.extend_from_slice(&version.to_le_bytes());
        out.extend_from_slice(&base.prev_block_hash);
        out.extend_from_slice(&base.merkle_root);
        out.extend_from_slice(&base.time.to_le_bytes());
        out.extend_from_slice(&base.bits.to_le_bytes());
        out.extend_from_slice(&base.nonce.to_le_bytes());

        if let BlockHeader::Hybrid { stake, .. } = self {
            out.extend_from_slice(&stake.stake_difficulty.to_le_bytes());
            out.extend_from_slice(&stake.vote_bits.0.to_le_bytes());
            out.extend_from_slice(&stake.ticket_pool_size.to_le_bytes());
            out.extend_from_slice(&stake.ticket_lottery_state);
            out.extend_from_slice(&stake.voters.to_le_bytes());
            out.push(stake.fresh_stake);
            out.push(stake.revocations);
            out.extend_from_slice(&stake.extra_data);
            out.extend_from_slice(&stake.stake_version.to_le_bytes());
        }
        out
    }

    /// Decodes a header produced by [`BlockHeader::encode`].
    pub fn decode(bytes: &[u8]) -> Result<Self, HeaderDecodeError> {
        let mut reader = Reader { bytes, pos: 0 };
        let base = BaseHeader {
            version: u32::from_le_bytes(reader.array()?),
            prev_block_hash: reader.array()?,
            merkle_root: reader.array()?,
            time: u32::from_le_bytes(reader.array()?),
            bits: u32::from_le_bytes(reader.array()?),
            nonce: u32::from_le_bytes(reader.array()?),
        };

        let header = if base.version & HARDFORK_VERSION_BIT != 0 {
            let stake = StakeHeaderFields {
                stake_difficulty: i64::from_le_bytes(reader.array()?),
                vote_bits: VoteBits(u16::from_le_bytes(reader.array()?)),
                ticket_pool_size: u32::from_le_bytes(reader.array()?),
                ticket_lottery_state: reader.array()?,
                voters: u16::from_le_bytes(reader.array()?),
                fresh_stake: reader.array::<1>()?[0],
                revocations: reader.array::<1>()?[0],
                extra_data: reader.array()?,
                stake_version: u32::from_le_bytes(reader.array()?),
            };
            BlockHeader::Hybrid { base, stake }
        } else {
            BlockHeader::PreFork(base)
        };

        let remaining = bytes.len() - reader.pos;
        if remaining != 0 {
            return Err(HeaderDecodeError::TrailingBytes(remaining));
        }
        Ok(header)
    }

    /// The block hash: BLAKE3 over the canonical encoding.
    pub fn hash(&self) -> Hash {
        blake3::hash(&self.encode()).into()
    }
}

struct Reader<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn array<const N: usize>(&mut self) -> Result<[u8; N], HeaderDecodeError> {
        let remaining = self.bytes.len() - self.pos;
        if remaining < N {
            return Err(HeaderDecodeError::UnexpectedEnd {
                needed: N,
                remaining,
            });
        }
        let mut out = [0u8; N];
        out.copy_from_slice(&self.bytes[self.pos..self.pos + N]);
        self.pos += N;
        Ok(out)
    }
}

/// A block: header plus transactions, coinbase first, stake transactions next.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Block {
    pub header: BlockHeader,
    pub transactions: Vec<Transaction>,
}

impl Block {
    pub fn hash(&self) -> Hash {
        self.header.hash()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base(version: u32) -> BaseHeader {
        BaseHeader {
            version,
            prev_block_hash: [1u8; 32],
            merkle_root: [2u8; 32],
            time: 1_600_000_000,
            bits: 0x207f_ffff,
            nonce: 7,
        }
    }

    #[test]
    fn test_pre_fork_header_omits_stake_fields() {
        let header = BlockHeader::for_height(base(4), StakeHeaderFields::default(), 10, 100);
        let bytes = header.encode();
        assert_eq!(bytes.len(), BASE_HEADER_SIZE);
        assert_eq!(BlockHeader::decode(&bytes).unwrap(), header);
        assert_eq!(header.stake_or_default(), StakeHeaderFields::default());
    }

    #[test]
    fn test_hybrid_header_sets_fork_bit() {
        let stake = StakeHeaderFields {
            stake_difficulty: 20_000,
            ticket_pool_size: 64,
            ticket_lottery_state: [1, 2, 3, 4, 5, 6],
            voters: 5,
            fresh_stake: 3,
            stake_version: 2,
            ..StakeHeaderFields::default()
        };
        let header = BlockHeader::for_height(base(4), stake, 100, 100);
        let bytes = header.encode();
        assert_eq!(bytes.len(), BASE_HEADER_SIZE + STAKE_FIELDS_SIZE);
        assert_ne!(u32::from_le_bytes(bytes[0..4].try_into().unwrap()) & HARDFORK_VERSION_BIT, 0);

        let decoded = BlockHeader::decode(&bytes).unwrap();
        assert_eq!(decoded, header);
        assert_eq!(decoded.stake().map(|s| s.ticket_pool_size), Some(64));
    }

    #[test]
    fn test_decode_rejects_truncated_and_trailing() {
        let header = BlockHeader::for_height(base(4), StakeHeaderFields::default(), 100, 100);
        let bytes = header.encode();
        assert!(matches!(
            BlockHeader::decode(&bytes[..bytes.len() - 1]),
            Err(HeaderDecodeError::UnexpectedEnd { .. })
        ));

        let mut longer = bytes.clone();
        longer.push(0);
        assert_eq!(BlockHeader::decode(&longer), Err(HeaderDecodeError::TrailingBytes(1)));
    }

    #[test]
    fn test_vote_bits() {
        let mut bits = VoteBits::default();
        assert!(bits.is_rtt_accepted());
        bits.set_rtt_accepted(false);
        assert_eq!(bits, VoteBits::rtt_rejected());
        bits.set_bit(3, true);
        assert!(bits.get_bit(3));
        assert!(!bits.get_bit(16));
    }
}
