use super::opcode::{
    self, OP_CHECKSIG, OP_DUP, OP_EQUAL, OP_EQUALVERIFY, OP_HASH160, OP_RETURN, OP_STRUCT,
};
use serde::{Deserialize, Serialize};

use super::{instructions, Instruction, ScriptBuilder, MAX_SCRIPT_SIZE};
use crate::PubKeyHash;

/// The template a locking script matches.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScriptClass {
    NonStandard,
    PubKeyHash(PubKeyHash),
    ScriptHash(PubKeyHash),
    /// `OP_RETURN` followed by pushes only.
    NullData(Vec<Vec<u8>>),
    /// `OP_RETURN OP_STRUCT` followed by pushes only.
    StructData(Vec<Vec<u8>>),
}

impl ScriptClass {
    /// The 20-byte destination of a P2PKH or P2SH script.
    pub fn destination(&self) -> Option<(AddressType, PubKeyHash)> {
        match self {
            ScriptClass::PubKeyHash(hash) => Some((AddressType::PubKeyHash, *hash)),
            ScriptClass::ScriptHash(hash) => Some((AddressType::ScriptHash, *hash)),
            _ => None,
        }
    }
}

/// Address kinds a ticket contribution can name for its reward.
/// Values are stored in scripts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AddressType {
    PubKeyHash = 1,
    ScriptHash = 2,
}

impl AddressType {
    pub fn from_i64(value: i64) -> Option<AddressType> {
        match value {
            1 => Some(AddressType::PubKeyHash),
            2 => Some(AddressType::ScriptHash),
            _ => None,
        }
    }

    /// The locking script paying to `hash` with this address kind.
    pub fn script_for(self, hash: &PubKeyHash) -> Vec<u8> {
        match self {
            AddressType::PubKeyHash => StandardScripts::p2pkh(hash),
            AddressType::ScriptHash => StandardScripts::p2sh(hash),
        }
    }
}

/// Standard script patterns for common transaction types
pub struct StandardScripts;

impl StandardScripts {
    /// Create a Pay-to-Public-Key-Hash (P2PKH) script
    pub fn p2pkh(pubkey_hash: &PubKeyHash) -> Vec<u8> {
        let mut script = Vec::with_capacity(25);
        script.extend_from_slice(&[OP_DUP, OP_HASH160, 0x14]);
        script.extend_from_slice(pubkey_hash);
        script.extend_from_slice(&[OP_EQUALVERIFY, OP_CHECKSIG]);
        script
    }

    /// Create a Pay-to-Script-Hash (P2SH) script
    pub fn p2sh(script_hash: &PubKeyHash) -> Vec<u8> {
        let mut script = Vec::with_capacity(23);
        script.extend_from_slice(&[OP_HASH160, 0x14]);
        script.extend_from_slice(script_hash);
        script.push(OP_EQUAL);
        script
    }

    /// Create an `OP_RETURN OP_STRUCT <version> <class>` prefix to which
    /// further items are appended.
    pub fn structured_data(struct_version: i64, data_class: i64) -> ScriptBuilder {
        ScriptBuilder::new()
            .push_opcode(OP_RETURN)
            .push_opcode(OP_STRUCT)
            .push_int(struct_version)
            .push_int(data_class)
    }

    /// Check if a script is a standard P2PKH script
    pub fn is_p2pkh(data: &[u8]) -> bool {
        data.len() == 25 &&
        data[0] == OP_DUP &&
        data[1] == OP_HASH160 &&
        data[2] == 0x14 && // Push 20 bytes
        data[23] == OP_EQUALVERIFY &&
        data[24] == OP_CHECKSIG
    }

    /// Check if a script is a standard P2SH script
    pub fn is_p2sh(data: &[u8]) -> bool {
        data.len() == 23 &&
        data[0] == OP_HASH160 &&
        data[1] == 0x14 && // Push 20 bytes
        data[22] == OP_EQUAL
    }

    /// Extract the public key hash from a P2PKH script
    pub fn extract_p2pkh_hash(data: &[u8]) -> Option<PubKeyHash> {
        if !Self::is_p2pkh(data) {
            return None;
        }
        let mut hash = [0u8; 20];
        hash.copy_from_slice(&data[3..23]);
        Some(hash)
    }

    /// Extract the script hash from a P2SH script
    pub fn extract_p2sh_hash(data: &[u8]) -> Option<PubKeyHash> {
        if !Self::is_p2sh(data) {
            return None;
        }
        let mut hash = [0u8; 20];
        hash.copy_from_slice(&data[2..22]);
        Some(hash)
    }
}

/// An output is unspendable when it starts with `OP_RETURN` or is oversized.
pub fn is_unspendable(script: &[u8]) -> bool {
    script.first() == Some(&OP_RETURN) || script.len() > MAX_SCRIPT_SIZE
}

/// Collects the data items of a push-only script tail. Small-integer
/// opcodes yield their one-byte script number (`OP_0` yields `[0x00]`).
fn push_only_items(tail: &[u8]) -> Option<Vec<Vec<u8>>> {
    let mut items = Vec::new();
    for instruction in instructions(tail) {
        match instruction.ok()? {
            Instruction::Push(data) => items.push(data.to_vec()),
            Instruction::Op(op) => {
                let value = opcode::decode_small_int(op)?;
                items.push(vec![if value < 0 { 0x81 } else { value as u8 }]);
            }
        }
    }
    Some(items)
}

/// Matches `script` against the standard templates.
pub fn solve(script: &[u8]) -> ScriptClass {
    if let Some(hash) = StandardScripts::extract_p2pkh_hash(script) {
        return ScriptClass::PubKeyHash(hash);
    }
    if let Some(hash) = StandardScripts::extract_p2sh_hash(script) {
        return ScriptClass::ScriptHash(hash);
    }
    if script.len() > MAX_SCRIPT_SIZE {
        return ScriptClass::NonStandard;
    }

    match script {
        [OP_RETURN, OP_STRUCT, tail @ ..] => push_only_items(tail)
            .map(ScriptClass::StructData)
            .unwrap_or(ScriptClass::NonStandard),
        [OP_RETURN, tail @ ..] => push_only_items(tail)
            .map(ScriptClass::NullData)
            .unwrap_or(ScriptClass::NonStandard),
        _ => ScriptClass::NonStandard,
    }
}
