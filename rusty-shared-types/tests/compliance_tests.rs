//! Compliance tests for the wire-level structures shared by the stake engine.

use proptest::prelude::*;
use rusty_shared_types::script::{opcode, solve, ScriptBuilder, ScriptClass, ScriptNum};
use rusty_shared_types::*;

fn base_header(version: u32, nonce: u32) -> BaseHeader {
    BaseHeader {
        version,
        prev_block_hash: [0xab; 32],
        merkle_root: [0xcd; 32],
        time: 1_700_000_000,
        bits: 0x1d00_ffff,
        nonce,
    }
}

#[cfg(test)]
mod block_header_compliance {
    use super::*;

    #[test]
    fn test_layout_switches_at_fork_height() {
        let params = ConsensusParams::regtest();
        let fork = params.hybrid_fork_height;

        let before = BlockHeader::for_height(
            base_header(4, 1),
            StakeHeaderFields::default(),
            fork - 1,
            fork,
        );
        let at = BlockHeader::for_height(
            base_header(4, 1),
            StakeHeaderFields::default(),
            fork,
            fork,
        );

        assert!(!before.is_hybrid());
        assert!(at.is_hybrid());
        assert_eq!(at.encode().len() - before.encode().len(), 60);
        assert_ne!(before.hash(), at.hash());
    }

    #[test]
    fn test_pre_fork_encoder_clears_version_bit() {
        let header = BlockHeader::PreFork(base_header(HARDFORK_VERSION_BIT | 4, 9));
        // The encoder clears the bit for pre-fork headers.
        let decoded = BlockHeader::decode(&header.encode()).unwrap();
        assert!(!decoded.is_hybrid());
        assert_eq!(decoded.base().version, 4);
    }

    #[test]
    fn test_lottery_state_is_carried_verbatim() {
        let stake = StakeHeaderFields {
            ticket_lottery_state: hex_literal::hex!("0102030405ff"),
            vote_bits: VoteBits::rtt_rejected(),
            ..StakeHeaderFields::default()
        };
        let header = BlockHeader::for_height(base_header(1, 0), stake, 10, 0);
        let decoded = BlockHeader::decode(&header.encode()).unwrap();
        let fields = decoded.stake().unwrap();
        assert_eq!(fields.ticket_lottery_state, [1, 2, 3, 4, 5, 0xff]);
        assert!(!fields.vote_bits.is_rtt_accepted());
    }
}

#[cfg(test)]
mod script_compliance {
    use super::*;

    #[test]
    fn test_struct_marker_prefix() {
        let script = script::StandardScripts::structured_data(1, 0).into_bytes();
        assert_eq!(&script[..2], &[opcode::OP_RETURN, opcode::OP_STRUCT]);
    }

    #[test]
    fn test_eight_byte_amount_item() {
        let amount = 21_000_000 * COIN;
        let script = ScriptBuilder::new()
            .push_opcode(opcode::OP_RETURN)
            .push_opcode(opcode::OP_STRUCT)
            .push_int(amount)
            .into_bytes();
        match solve(&script) {
            ScriptClass::StructData(items) => {
                assert_eq!(items.len(), 1);
                assert_eq!(ScriptNum::decode(&items[0], 8).unwrap().value(), amount);
                assert!(ScriptNum::decode(&items[0], 4).is_err());
            }
            other => panic!("unexpected class {:?}", other),
        }
    }
}

proptest! {
    #[test]
    fn prop_header_decode_inverts_encode(
        version in 0u32..0x8000_0000,
        nonce in any::<u32>(),
        height in 0u32..4000,
        difficulty in 0i64..(1i64 << 50),
        pool in any::<u32>(),
        voters in 0u16..=5,
    ) {
        let stake = StakeHeaderFields {
            stake_difficulty: difficulty,
            ticket_pool_size: pool,
            voters,
            ..StakeHeaderFields::default()
        };
        let header = BlockHeader::for_height(base_header(version, nonce), stake, height, 1500);
        let decoded = BlockHeader::decode(&header.encode()).unwrap();
        prop_assert_eq!(decoded.is_hybrid(), height >= 1500);
        prop_assert_eq!(decoded, header);
    }

    #[test]
    fn prop_script_num_decodes_what_builder_pushes(value in -(1i64 << 62)..(1i64 << 62)) {
        let script = ScriptBuilder::new().push_int(value).into_bytes();
        let mut wrapped = vec![opcode::OP_RETURN];
        wrapped.extend_from_slice(&script);
        match solve(&wrapped) {
            ScriptClass::NullData(items) => {
                prop_assert_eq!(items.len(), 1);
                prop_assert_eq!(ScriptNum::decode(&items[0], 8).unwrap().value(), value);
            }
            other => prop_assert!(false, "unexpected class {:?}", other),
        }
    }

    #[test]
    fn prop_txid_commits_to_outputs(value in 0i64..MAX_MONEY, extra in 1i64..1000) {
        let tx = Transaction::new(
            vec![TxInput::new(OutPoint::new([3u8; 32], 0), vec![])],
            vec![TxOutput::new(value, vec![0x51])],
        );
        let mut changed = tx.clone();
        changed.outputs[0].value = value.saturating_add(extra);
        prop_assert_ne!(tx.txid(), changed.txid());
    }
}
