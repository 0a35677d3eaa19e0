//! Minimal little-endian sign-magnitude integers as pushed by scripts.

use super::ScriptError;

/// Default maximum byte length of a script number.
pub const DEFAULT_MAX_NUM_SIZE: usize = 4;

/// Integer encoding used for numeric script pushes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScriptNum(pub i64);

impl ScriptNum {
    /// Decodes `bytes`, rejecting encodings longer than `max_len`.
    /// Non-minimal encodings are accepted.
    pub fn decode(bytes: &[u8], max_len: usize) -> Result<ScriptNum, ScriptError> {
        if bytes.len() > max_len {
            return Err(ScriptError::NumberTooLarge(bytes.len(), max_len));
        }
        if bytes.is_empty() {
            return Ok(ScriptNum(0));
        }

        let mut magnitude: u64 = 0;
        for (i, byte) in bytes.iter().enumerate() {
            magnitude |= (*byte as u64) << (8 * i);
        }

        let last = bytes.len() - 1;
        if bytes[last] & 0x80 != 0 {
            magnitude &= !(0x80u64 << (8 * last));
            Ok(ScriptNum(-(magnitude as i64)))
        } else {
            Ok(ScriptNum(magnitude as i64))
        }
    }

    /// Encodes the number minimally.
    pub fn encode(&self) -> Vec<u8> {
        let value = self.0;
        if value == 0 {
            return Vec::new();
        }

        let negative = value < 0;
        let mut magnitude = value.unsigned_abs();
        let mut result = Vec::with_capacity(9);
        while magnitude > 0 {
            result.push((magnitude & 0xff) as u8);
            magnitude >>= 8;
        }

        // The sign lives in the top bit of the last byte.
        let last = result.len() - 1;
        if result[last] & 0x80 != 0 {
            result.push(if negative { 0x80 } else { 0x00 });
        } else if negative {
            result[last] |= 0x80;
        }
        result
    }

    pub fn value(&self) -> i64 {
        self.0
    }
}
