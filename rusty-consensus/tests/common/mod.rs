//! Chain builder shared by the integration tests.
//!
//! The parameters make every lottery draw see exactly `tickets_per_block`
//! live tickets: purchases start `ticket_maturity` blocks before the first
//! draw and every block buys `tickets_per_block` more, so every live ticket
//! wins the draw it takes part in.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::Arc;

use rusty_consensus::stake_tx::{
    buy_ticket_declaration_script, contribution_output_index, p2pkh_script,
    parse_ticket_contribution, revoke_ticket_declaration_script, ticket_contribution_script,
    vote_declaration_script,
};
use rusty_consensus::{
    build_payment_outputs, calculate_next_required_stake_difficulty, parse_tx_class, parse_vote,
    voter_subsidy, ChainIndex, ConnectedBlock, ConsensusError, StakeNode, StakeValidator,
    TicketContribution, UtxoSet, VoteData,
};
use rusty_crypto::merkle_root;
use rusty_shared_types::script::AddressType;
use rusty_shared_types::{
    Amount, BaseHeader, Block, BlockHeader, ConsensusParams, Hash, OutPoint, StakeHeaderFields,
    Transaction, TxClass, TxInput, TxOutput, VoteBits,
};

pub const TICKET_PRICE: Amount = 1000;
pub const FUNDING_VALUE: Amount = 5000;
pub const TICKET_FEE: Amount = 10;
pub const VOTER_VERSION: u32 = 3;

pub fn test_params() -> ConsensusParams {
    let params = ConsensusParams {
        minimum_stake_diff: TICKET_PRICE,
        tickets_per_block: 5,
        ticket_maturity: 2,
        ticket_expiry: 100,
        mempool_vote_expiry: 4,
        coinbase_maturity: 2,
        stake_diff_window_size: 1000,
        stake_version_interval: 4,
        stake_enabled_height: 5,
        stake_validation_height: 10,
        hybrid_fork_height: 1,
        base_subsidy: 1500,
        work_subsidy_proportion: 7,
        stake_subsidy_proportion: 3,
        subsidy_halving_interval: 1_000_000,
        ..ConsensusParams::regtest()
    };
    assert!(params.validate().is_ok());
    params
}

fn reward_address(ticket_index: u32) -> [u8; 20] {
    let mut address = [0x42u8; 20];
    address[..4].copy_from_slice(&ticket_index.to_be_bytes());
    address
}

pub struct Harness {
    pub params: Arc<ConsensusParams>,
    pub validator: StakeValidator,
    pub chain: ChainIndex,
    pub utxos: UtxoSet,
    pub tickets: HashMap<Hash, Transaction>,
    coinbases: HashMap<u32, Transaction>,
    bought: u32,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_params(test_params())
    }

    pub fn with_params(params: ConsensusParams) -> Self {
        let params = Arc::new(params);
        let genesis = BlockHeader::PreFork(BaseHeader {
            version: 1,
            prev_block_hash: [0u8; 32],
            merkle_root: [0u8; 32],
            time: 1_600_000_000,
            bits: 0x207f_ffff,
            nonce: 0,
        });
        Harness {
            validator: StakeValidator::new(Arc::clone(&params)),
            chain: ChainIndex::new(genesis, Arc::clone(&params)),
            utxos: UtxoSet::new(),
            tickets: HashMap::new(),
            coinbases: HashMap::new(),
            bought: 0,
            params,
        }
    }

    pub fn tip_height(&self) -> u32 {
        self.chain.tip_height()
    }

    pub fn next_height(&self) -> u32 {
        self.tip_height() + 1
    }

    pub fn tip_hash(&self) -> Hash {
        *self.chain.get(self.chain.tip()).hash()
    }

    pub fn tip_node(&mut self) -> Arc<StakeNode> {
        let tip = self.chain.tip();
        self.chain
            .fetch_stake_node(tip)
            .expect("tip stake node")
    }

    /// Height of the first block that buys tickets.
    pub fn first_purchase_height(&self) -> u32 {
        self.params.stake_validation_height - 1 - self.params.ticket_maturity
    }

    pub fn coinbase(&mut self, height: u32) -> Transaction {
        let per_block = self.params.tickets_per_block as usize;
        let tx = Transaction::new(
            vec![TxInput::generation(height.to_le_bytes().to_vec())],
            (0..per_block)
                .map(|_| TxOutput::new(FUNDING_VALUE, p2pkh_script(&[0x11; 20])))
                .collect(),
        );
        self.coinbases.insert(height, tx.clone());
        tx
    }

    /// One ticket spending output `vout` of the coinbase at `funding_height`.
    pub fn ticket(&mut self, funding_height: u32, vout: u32, price: Amount) -> Transaction {
        let funding = self
            .coinbases
            .get(&funding_height)
            .expect("funding coinbase")
            .txid();
        let contributed = price + TICKET_FEE;
        let contribution = TicketContribution::new(
            reward_address(self.bought),
            AddressType::PubKeyHash,
            contributed,
        );
        self.bought += 1;
        let tx = Transaction::new(
            vec![TxInput::new(OutPoint::new(funding, vout), Vec::new())],
            vec![
                TxOutput::new(0, buy_ticket_declaration_script()),
                TxOutput::new(price, p2pkh_script(&[0x22; 20])),
                TxOutput::new(0, ticket_contribution_script(&contribution)),
                TxOutput::new(FUNDING_VALUE - contributed, p2pkh_script(&[0x33; 20])),
            ],
        );
        self.tickets.insert(tx.txid(), tx.clone());
        tx
    }

    /// The tickets a block at `height` buys at the required price.
    pub fn tickets_for(&mut self, height: u32) -> Vec<Transaction> {
        if height < self.first_purchase_height() {
            return Vec::new();
        }
        let price = self.required_stake_difficulty();
        let funding_height = height - self.params.coinbase_maturity;
        (0..self.params.tickets_per_block as u32)
            .map(|vout| self.ticket(funding_height, vout, price))
            .collect()
    }

    pub fn required_stake_difficulty(&self) -> Amount {
        calculate_next_required_stake_difficulty(&self.chain, self.chain.tip(), &self.params)
    }

    fn contributions(&self, ticket_hash: &Hash) -> (Amount, Vec<TicketContribution>) {
        let ticket = self.tickets.get(ticket_hash).expect("known ticket");
        let contributions = (0..ticket.inputs.len())
            .filter_map(|i| parse_ticket_contribution(ticket, contribution_output_index(i)))
            .collect();
        (ticket.outputs[1].value, contributions)
    }

    /// A vote on the current tip spending `ticket_hash`, paid in full.
    pub fn vote(&self, ticket_hash: &Hash, approve: bool) -> Transaction {
        let (stake, contributions) = self.contributions(ticket_hash);
        let payments = build_payment_outputs(
            &contributions,
            stake,
            voter_subsidy(self.next_height(), &self.params),
        );
        self.vote_with_payments(ticket_hash, approve, payments)
    }

    pub fn vote_with_payments(
        &self,
        ticket_hash: &Hash,
        approve: bool,
        payments: Vec<TxOutput>,
    ) -> Transaction {
        let bits = if approve {
            VoteBits::rtt_accepted()
        } else {
            VoteBits::rtt_rejected()
        };
        let data = VoteData::new(self.tip_hash(), self.tip_height(), bits, VOTER_VERSION);
        let mut outputs = vec![TxOutput::new(0, vote_declaration_script(&data))];
        outputs.extend(payments);
        Transaction::new(
            vec![
                TxInput::generation(self.params.stake_base_sig_script.clone()),
                TxInput::new(OutPoint::new(*ticket_hash, 1), Vec::new()),
            ],
            outputs,
        )
    }

    /// A revocation of `ticket_hash` refunding `refunds`.
    pub fn revocation_with_refunds(&self, ticket_hash: &Hash, refunds: Vec<TxOutput>) -> Transaction {
        let mut outputs = vec![TxOutput::new(0, revoke_ticket_declaration_script())];
        outputs.extend(refunds);
        Transaction::new(
            vec![TxInput::new(OutPoint::new(*ticket_hash, 1), Vec::new())],
            outputs,
        )
    }

    pub fn revocation(&self, ticket_hash: &Hash) -> Transaction {
        let (stake, contributions) = self.contributions(ticket_hash);
        let refunds = build_payment_outputs(&contributions, stake, 0);
        self.revocation_with_refunds(ticket_hash, refunds)
    }

    /// Votes approving the tip for every winner of the tip's stake node.
    pub fn winning_votes(&mut self) -> Vec<Transaction> {
        if self.next_height() < self.params.stake_validation_height {
            return Vec::new();
        }
        let node = self.tip_node();
        node.winners().iter().map(|winner| self.vote(winner, true)).collect()
    }

    /// Assembles the next block from `stake_txs` with a header that commits
    /// to the current chain state.
    pub fn build_block(&mut self, stake_txs: Vec<Transaction>) -> Block {
        let height = self.next_height();
        let mut transactions = vec![self.coinbase(height)];
        transactions.extend(stake_txs);

        let count = |class: TxClass| {
            transactions
                .iter()
                .filter(|tx| parse_tx_class(tx) == class)
                .count()
        };
        let fresh_stake = count(TxClass::BuyTicket);
        let revocations = count(TxClass::RevokeTicket);
        let votes: Vec<&Transaction> = transactions
            .iter()
            .filter(|tx| parse_tx_class(tx) == TxClass::Vote)
            .collect();
        let approvals = votes
            .iter()
            .filter_map(|tx| parse_vote(tx))
            .filter(|vote| vote.vote_bits.is_rtt_accepted())
            .count();
        let voters = votes.len();
        let vote_bits = if voters == 0 || approvals * 2 > voters {
            VoteBits::rtt_accepted()
        } else {
            VoteBits::rtt_rejected()
        };

        let node = self.tip_node();
        let stake = StakeHeaderFields {
            stake_difficulty: self.required_stake_difficulty(),
            vote_bits,
            ticket_pool_size: node.pool_size(),
            ticket_lottery_state: node.final_state(),
            voters: voters as u16,
            fresh_stake: fresh_stake as u8,
            revocations: revocations as u8,
            extra_data: [0u8; 32],
            stake_version: self
                .validator
                .voter()
                .calc_stake_version(&self.chain, self.chain.tip()),
        };
        let txids: Vec<Hash> = transactions.iter().map(Transaction::txid).collect();
        let base = BaseHeader {
            version: 1,
            prev_block_hash: self.tip_hash(),
            merkle_root: merkle_root(&txids),
            time: 1_600_000_000 + height * 300,
            bits: 0x207f_ffff,
            nonce: height,
        };
        Block {
            header: BlockHeader::for_height(base, stake, height, self.params.hybrid_fork_height),
            transactions,
        }
    }

    /// The block every honest producer would build: all winners vote and
    /// the usual tickets are bought.
    pub fn standard_block(&mut self) -> Block {
        let height = self.next_height();
        let mut stake_txs = self.tickets_for(height);
        stake_txs.extend(self.winning_votes());
        self.build_block(stake_txs)
    }

    pub fn connect(&mut self, block: &Block) -> Result<ConnectedBlock, ConsensusError> {
        self.validator
            .connect_block(&mut self.chain, block, &mut self.utxos)
    }

    /// Connects standard blocks until the tip is at `height`.
    pub fn advance_to(&mut self, height: u32) {
        while self.tip_height() < height {
            let block = self.standard_block();
            self.connect(&block).expect("standard block connects");
        }
    }
}
