//! Unspent coins and the transaction class recorded alongside them.

use serde::{Deserialize, Serialize};

use crate::{Amount, TxOutput};

/// The class of a transaction as declared by its structured first output.
/// Values are stored in scripts and must never be renumbered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum TxClass {
    Regular = 0,
    BuyTicket = 1,
    Vote = 2,
    RevokeTicket = 3,
}

impl TxClass {
    /// Maps a script-encoded class number onto a known class.
    pub fn from_i64(value: i64) -> Option<TxClass> {
        match value {
            0 => Some(TxClass::Regular),
            1 => Some(TxClass::BuyTicket),
            2 => Some(TxClass::Vote),
            3 => Some(TxClass::RevokeTicket),
            _ => None,
        }
    }

    pub fn as_i64(self) -> i64 {
        self as u8 as i64
    }

    pub fn is_stake(self) -> bool {
        !matches!(self, TxClass::Regular)
    }

    /// Lower-case name used in rejection codes (`vote`, `revocation`, ...).
    pub fn name(self) -> &'static str {
        match self {
            TxClass::Regular => "regular",
            TxClass::BuyTicket => "buyticket",
            TxClass::Vote => "vote",
            TxClass::RevokeTicket => "revocation",
        }
    }
}

/// An unspent transaction output together with the context needed to judge
/// whether a given transaction may spend it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Coin {
    /// The unspent output.
    pub output: TxOutput,
    /// Height of the block that created the output.
    pub height: u32,
    /// Whether the creating transaction was a coinbase.
    pub is_coinbase: bool,
    /// Class of the creating transaction.
    pub tx_class: TxClass,
}

impl Coin {
    pub fn new(output: TxOutput, height: u32, is_coinbase: bool, tx_class: TxClass) -> Self {
        Coin {
            output,
            height,
            is_coinbase,
            tx_class,
        }
    }

    pub fn value(&self) -> Amount {
        self.output.value
    }
}
