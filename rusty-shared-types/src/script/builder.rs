//! Incremental script construction.

use super::opcode::{self, OP_PUSHDATA1, OP_PUSHDATA2, OP_PUSHDATA4};
use super::ScriptNum;

/// Builds a script one element at a time, choosing the canonical push form.
#[derive(Debug, Default, Clone)]
pub struct ScriptBuilder {
    bytes: Vec<u8>,
}

impl ScriptBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_opcode(mut self, op: u8) -> Self {
        self.bytes.push(op);
        self
    }

    /// Pushes an integer, using `OP_0`, `OP_1NEGATE` or `OP_1..OP_16` when possible.
    pub fn push_int(self, value: i64) -> Self {
        match opcode::encode_small_int(value) {
            Some(op) => self.push_opcode(op),
            None => self.push_slice(&ScriptNum(value).encode()),
        }
    }

    /// Pushes raw data with the smallest push opcode that fits it.
    pub fn push_slice(mut self, data: &[u8]) -> Self {
        let len = data.len();
        if len < OP_PUSHDATA1 as usize {
            self.bytes.push(len as u8);
        } else if len <= 0xff {
            self.bytes.push(OP_PUSHDATA1);
            self.bytes.push(len as u8);
        } else if len <= 0xffff {
            self.bytes.push(OP_PUSHDATA2);
            self.bytes.extend_from_slice(&(len as u16).to_le_bytes());
        } else {
            self.bytes.push(OP_PUSHDATA4);
            self.bytes.extend_from_slice(&(len as u32).to_le_bytes());
        }
        self.bytes.extend_from_slice(data);
        self
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.bytes
    }
}
