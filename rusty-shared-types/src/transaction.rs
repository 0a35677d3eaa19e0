//! Transactions, inputs, outputs and outpoints.

use serde::{Deserialize, Serialize};

use crate::{money_range, Amount, Hash};

/// Represents a reference to a specific transaction output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct OutPoint {
    /// The transaction ID (hash) of the transaction containing the output.
    pub txid: Hash,
    /// The index of the output within that transaction.
    pub vout: u32,
}

impl OutPoint {
    /// Output index used by the null outpoint of coin generation inputs.
    pub const NULL_INDEX: u32 = u32::MAX;

    pub fn new(txid: Hash, vout: u32) -> Self {
        OutPoint { txid, vout }
    }

    /// The outpoint carried by coinbase and vote subsidy inputs.
    pub fn null() -> Self {
        OutPoint {
            txid: [0u8; 32],
            vout: Self::NULL_INDEX,
        }
    }

    pub fn is_null(&self) -> bool {
        self.txid == [0u8; 32] && self.vout == Self::NULL_INDEX
    }
}

/// Represents a transaction input, referencing a previous transaction's output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxInput {
    /// The `OutPoint` referencing the output being spent.
    pub previous_output: OutPoint,
    /// The script signature, providing proof of ownership.
    pub script_sig: Vec<u8>,
    /// A sequence number, typically used for replace-by-fee or relative lock-times.
    pub sequence: u32,
}

impl TxInput {
    pub const SEQUENCE_FINAL: u32 = u32::MAX;

    /// Creates an input spending `previous_output`.
    pub fn new(previous_output: OutPoint, script_sig: Vec<u8>) -> Self {
        TxInput {
            previous_output,
            script_sig,
            sequence: Self::SEQUENCE_FINAL,
        }
    }

    /// Creates a coin generation input (null outpoint) carrying `script_sig`.
    pub fn generation(script_sig: Vec<u8>) -> Self {
        TxInput::new(OutPoint::null(), script_sig)
    }
}

/// Represents a transaction output, specifying a value and a locking script.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxOutput {
    /// The value of the output in base units.
    pub value: Amount,
    /// The locking script (scriptPubKey) that defines the conditions for spending this output.
    pub script_pubkey: Vec<u8>,
}

impl TxOutput {
    /// Creates a new `TxOutput`.
    ///
    /// # Arguments
    /// * `value` - The value of the output in base units
    /// * `script_pubkey` - The locking script that defines spending conditions
    pub fn new(value: Amount, script_pubkey: Vec<u8>) -> Self {
        TxOutput {
            value,
            script_pubkey,
        }
    }
}

/// A transaction. Stake transactions are ordinary transactions whose first
/// output carries a structured declaration; see `coin::TxClass`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    /// The version of the transaction format.
    pub version: u32,
    /// A list of transaction inputs.
    pub inputs: Vec<TxInput>,
    /// A list of transaction outputs.
    pub outputs: Vec<TxOutput>,
    /// The lock time of the transaction.
    pub lock_time: u32,
}

impl Transaction {
    pub fn new(inputs: Vec<TxInput>, outputs: Vec<TxOutput>) -> Self {
        Transaction {
            version: 1,
            inputs,
            outputs,
            lock_time: 0,
        }
    }

    /// Returns the canonical byte representation of the transaction.
    pub fn to_bytes(&self) -> Result<Vec<u8>, bincode::Error> {
        bincode::serialize(self)
    }

    /// Calculates the transaction ID: BLAKE3 over the canonical encoding.
    pub fn txid(&self) -> Hash {
        let mut hasher = blake3::Hasher::new();
        // Writes into the hasher cannot fail.
        let _ = bincode::serialize_into(&mut hasher, self);
        hasher.finalize().into()
    }

    /// A coinbase has exactly one input and that input spends the null outpoint.
    pub fn is_coinbase(&self) -> bool {
        self.inputs.len() == 1 && self.inputs[0].previous_output.is_null()
    }

    /// Sum of all output values, or `None` if any value or the running total
    /// leaves the money range.
    pub fn value_out(&self) -> Option<Amount> {
        let mut total: Amount = 0;
        for output in &self.outputs {
            if !money_range(output.value) {
                return None;
            }
            total = total.checked_add(output.value)?;
            if !money_range(total) {
                return None;
            }
        }
        Some(total)
    }
}
