//! Opcode bytes understood by the stake engine.
//!
//! Only the subset needed to build and recognise payment scripts and
//! structured data outputs is listed here.

pub const OP_0: u8 = 0x00;
pub const OP_PUSHDATA1: u8 = 0x4c;
pub const OP_PUSHDATA2: u8 = 0x4d;
pub const OP_PUSHDATA4: u8 = 0x4e;
pub const OP_1NEGATE: u8 = 0x4f;
pub const OP_1: u8 = 0x51;
pub const OP_16: u8 = 0x60;
pub const OP_RETURN: u8 = 0x6a;
pub const OP_DUP: u8 = 0x76;
pub const OP_EQUAL: u8 = 0x87;
pub const OP_EQUALVERIFY: u8 = 0x88;
pub const OP_HASH160: u8 = 0xa9;
pub const OP_CHECKSIG: u8 = 0xac;
/// Marks an OP_RETURN output whose pushes follow the structured data layout.
pub const OP_STRUCT: u8 = 0xc0;

/// Returns the small integer encoded by `OP_1NEGATE`, `OP_0` or `OP_1..=OP_16`.
pub fn decode_small_int(opcode: u8) -> Option<i64> {
    match opcode {
        OP_0 => Some(0),
        OP_1NEGATE => Some(-1),
        OP_1..=OP_16 => Some((opcode - OP_1 + 1) as i64),
        _ => None,
    }
}

/// Returns the opcode that encodes `value`, if it is a small integer.
pub fn encode_small_int(value: i64) -> Option<u8> {
    match value {
        0 => Some(OP_0),
        -1 => Some(OP_1NEGATE),
        1..=16 => Some(OP_1 + (value as u8) - 1),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_small_int_round_trip() {
        for value in -1..=16 {
            let opcode = encode_small_int(value).unwrap();
            assert_eq!(decode_small_int(opcode), Some(value));
        }
        assert_eq!(encode_small_int(17), None);
        assert_eq!(decode_small_int(OP_RETURN), None);
    }
}
