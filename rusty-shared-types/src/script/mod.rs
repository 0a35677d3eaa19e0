//! Script parsing, construction and standard-template recognition.

mod builder;
mod num;
pub mod opcode;
mod standard;

pub use builder::ScriptBuilder;
pub use num::{ScriptNum, DEFAULT_MAX_NUM_SIZE};
pub use standard::{is_unspendable, solve, AddressType, ScriptClass, StandardScripts};

use thiserror::Error;

use opcode::{OP_PUSHDATA1, OP_PUSHDATA2, OP_PUSHDATA4};

/// Maximum size of a script in bytes.
pub const MAX_SCRIPT_SIZE: usize = 10_000;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ScriptError {
    #[error("Push of {0} bytes runs past the end of the script")]
    TruncatedPush(usize),

    #[error("Script number of {0} bytes exceeds the maximum of {1} bytes")]
    NumberTooLarge(usize, usize),
}

/// A single parsed script element.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Instruction<'a> {
    /// Data pushed by a direct push or one of the `OP_PUSHDATA` opcodes.
    Push(&'a [u8]),
    /// Any other opcode, including the small-integer opcodes.
    Op(u8),
}

/// Iterator over the instructions of a script.
pub struct Instructions<'a> {
    script: &'a [u8],
    pos: usize,
    failed: bool,
}

/// Parses `script` lazily into instructions.
pub fn instructions(script: &[u8]) -> Instructions<'_> {
    Instructions {
        script,
        pos: 0,
        failed: false,
    }
}

impl<'a> Instructions<'a> {
    fn read_len(&mut self, width: usize) -> Result<usize, ScriptError> {
        let end = self.pos + width;
        if end > self.script.len() {
            return Err(ScriptError::TruncatedPush(width));
        }
        let mut len = 0usize;
        for (i, byte) in self.script[self.pos..end].iter().enumerate() {
            len |= (*byte as usize) << (8 * i);
        }
        self.pos = end;
        Ok(len)
    }

    fn take(&mut self, len: usize) -> Result<&'a [u8], ScriptError> {
        let end = self
            .pos
            .checked_add(len)
            .filter(|end| *end <= self.script.len())
            .ok_or(ScriptError::TruncatedPush(len))?;
        let data = &self.script[self.pos..end];
        self.pos = end;
        Ok(data)
    }

    fn next_instruction(&mut self, opcode: u8) -> Result<Instruction<'a>, ScriptError> {
        let len = match opcode {
            0x01..=0x4b => opcode as usize,
            OP_PUSHDATA1 => self.read_len(1)?,
            OP_PUSHDATA2 => self.read_len(2)?,
            OP_PUSHDATA4 => self.read_len(4)?,
            _ => return Ok(Instruction::Op(opcode)),
        };
        Ok(Instruction::Push(self.take(len)?))
    }
}

impl<'a> Iterator for Instructions<'a> {
    type Item = Result<Instruction<'a>, ScriptError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed || self.pos >= self.script.len() {
            return None;
        }
        let opcode = self.script[self.pos];
        self.pos += 1;
        let result = self.next_instruction(opcode);
        if result.is_err() {
            self.failed = true;
        }
        Some(result)
    }
}
