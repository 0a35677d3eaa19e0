//! Unspent coin views for the stake rules.
//!
//! The stake engine reads coins through [`UtxoView`] and looks up ticket
//! purchases through [`TicketSource`]. [`UtxoSet`] is an in-memory
//! implementation updated through batches; [`CoinsOverlay`] layers the
//! changes of a block under validation on top of any view.

use std::collections::{HashMap, HashSet};

use rusty_shared_types::script::is_unspendable;
use rusty_shared_types::{Block, Coin, Hash, OutPoint, Transaction, TxClass};
use tracing::{debug, trace};

use crate::stake_tx::{
    parse_tx_class, REVOCATION_STAKE_INPUT_INDEX, VOTE_STAKE_INPUT_INDEX, VOTE_SUBSIDY_INPUT_INDEX,
};

pub trait UtxoView {
    /// The unspent coin at `outpoint`, if any.
    fn get_coin(&self, outpoint: &OutPoint) -> Option<Coin>;

    /// True if every input of `tx` spends an available coin. Coin generation
    /// inputs (the coinbase input and the vote subsidy input) are skipped.
    fn have_inputs(&self, tx: &Transaction) -> bool {
        if tx.is_coinbase() {
            return true;
        }
        let is_vote = parse_tx_class(tx) == TxClass::Vote;
        tx.inputs.iter().enumerate().all(|(i, input)| {
            (is_vote && i == VOTE_SUBSIDY_INPUT_INDEX) || self.get_coin(&input.previous_output).is_some()
        })
    }
}

pub trait TicketSource {
    /// The ticket purchase transaction with id `ticket_hash`.
    fn get_ticket(&self, ticket_hash: &Hash) -> Option<Transaction>;
}

#[derive(Debug, Clone)]
enum BatchOp {
    PutCoin(OutPoint, Coin),
    DeleteCoin(OutPoint),
    PutTicket(Hash, Transaction),
    DeleteTicket(Hash),
}

/// Ordered set of changes applied to a [`UtxoSet`] at once.
#[derive(Debug, Clone, Default)]
pub struct UtxoBatch {
    ops: Vec<BatchOp>,
}

impl UtxoBatch {
    pub fn put_coin(&mut self, outpoint: OutPoint, coin: Coin) {
        self.ops.push(BatchOp::PutCoin(outpoint, coin));
    }

    pub fn delete_coin(&mut self, outpoint: OutPoint) {
        self.ops.push(BatchOp::DeleteCoin(outpoint));
    }

    pub fn put_ticket(&mut self, ticket_hash: Hash, tx: Transaction) {
        self.ops.push(BatchOp::PutTicket(ticket_hash, tx));
    }

    pub fn delete_ticket(&mut self, ticket_hash: Hash) {
        self.ops.push(BatchOp::DeleteTicket(ticket_hash));
    }

    /// Records the effect of connecting `tx` at `height`: inputs spent,
    /// spendable outputs created, ticket purchases indexed and tickets
    /// consumed by votes or revocations dropped from the index.
    pub fn add_transaction(&mut self, tx: &Transaction, height: u32) {
        let txid = tx.txid();
        let class = parse_tx_class(tx);
        let is_coinbase = tx.is_coinbase();

        for input in &tx.inputs {
            if !input.previous_output.is_null() {
                self.delete_coin(input.previous_output);
            }
        }
        for (vout, output) in tx.outputs.iter().enumerate() {
            if is_unspendable(&output.script_pubkey) {
                continue;
            }
            self.put_coin(
                OutPoint::new(txid, vout as u32),
                Coin::new(output.clone(), height, is_coinbase, class),
            );
        }
        let stake_input = match class {
            TxClass::BuyTicket => {
                self.put_ticket(txid, tx.clone());
                None
            }
            TxClass::Vote => tx.inputs.get(VOTE_STAKE_INPUT_INDEX),
            TxClass::RevokeTicket => tx.inputs.get(REVOCATION_STAKE_INPUT_INDEX),
            TxClass::Regular => None,
        };
        if let Some(input) = stake_input {
            self.delete_ticket(input.previous_output.txid);
        }
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }
}

/// In-memory coin set with a ticket index.
#[derive(Debug, Clone, Default)]
pub struct UtxoSet {
    coins: HashMap<OutPoint, Coin>,
    tickets: HashMap<Hash, Transaction>,
}

impl UtxoSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn create_batch() -> UtxoBatch {
        UtxoBatch::default()
    }

    /// Retrieves a coin by its outpoint.
    pub fn get_utxo(&self, outpoint: &OutPoint) -> Option<&Coin> {
        self.coins.get(outpoint)
    }

    /// Applies a batch of changes in order.
    pub fn apply_batch(&mut self, batch: UtxoBatch) {
        trace!(ops = batch.len(), "applying utxo batch");
        for op in batch.ops {
            match op {
                BatchOp::PutCoin(outpoint, coin) => {
                    self.coins.insert(outpoint, coin);
                }
                BatchOp::DeleteCoin(outpoint) => {
                    self.coins.remove(&outpoint);
                }
                BatchOp::PutTicket(hash, tx) => {
                    self.tickets.insert(hash, tx);
                }
                BatchOp::DeleteTicket(hash) => {
                    self.tickets.remove(&hash);
                }
            }
        }
    }

    pub fn add_coin(&mut self, outpoint: OutPoint, coin: Coin) {
        self.coins.insert(outpoint, coin);
    }

    pub fn apply_transaction(&mut self, tx: &Transaction, height: u32) {
        let mut batch = Self::create_batch();
        batch.add_transaction(tx, height);
        self.apply_batch(batch);
    }

    /// Applies every transaction of `block`, connected at `height`.
    pub fn apply_block(&mut self, block: &Block, height: u32) {
        let mut batch = Self::create_batch();
        for tx in &block.transactions {
            batch.add_transaction(tx, height);
        }
        debug!(height, ops = batch.len(), "connecting block to utxo set");
        self.apply_batch(batch);
    }

    pub fn len(&self) -> usize {
        self.coins.len()
    }

    /// Number of indexed ticket purchases not yet voted or revoked.
    pub fn ticket_count(&self) -> usize {
        self.tickets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.coins.is_empty()
    }
}

impl UtxoView for UtxoSet {
    fn get_coin(&self, outpoint: &OutPoint) -> Option<Coin> {
        self.coins.get(outpoint).cloned()
    }
}

impl TicketSource for UtxoSet {
    fn get_ticket(&self, ticket_hash: &Hash) -> Option<Transaction> {
        self.tickets.get(ticket_hash).cloned()
    }
}

/// The changes of a block under validation layered over a base view.
/// Transactions see the outputs of earlier transactions in the same block.
pub struct CoinsOverlay<'a, V> {
    base: &'a V,
    added: HashMap<OutPoint, Coin>,
    spent: HashSet<OutPoint>,
    tickets: HashMap<Hash, Transaction>,
    dropped_tickets: HashSet<Hash>,
    batch: UtxoBatch,
}

impl<'a, V: UtxoView + TicketSource> CoinsOverlay<'a, V> {
    pub fn new(base: &'a V) -> Self {
        CoinsOverlay {
            base,
            added: HashMap::new(),
            spent: HashSet::new(),
            tickets: HashMap::new(),
            dropped_tickets: HashSet::new(),
            batch: UtxoBatch::default(),
        }
    }

    pub fn apply_transaction(&mut self, tx: &Transaction, height: u32) {
        let mut batch = UtxoBatch::default();
        batch.add_transaction(tx, height);
        for op in &batch.ops {
            match op {
                BatchOp::PutCoin(outpoint, coin) => {
                    self.spent.remove(outpoint);
                    self.added.insert(*outpoint, coin.clone());
                }
                BatchOp::DeleteCoin(outpoint) => {
                    self.added.remove(outpoint);
                    self.spent.insert(*outpoint);
                }
                BatchOp::PutTicket(hash, tx) => {
                    self.dropped_tickets.remove(hash);
                    self.tickets.insert(*hash, tx.clone());
                }
                BatchOp::DeleteTicket(hash) => {
                    self.tickets.remove(hash);
                    self.dropped_tickets.insert(*hash);
                }
            }
        }
        self.batch.ops.extend(batch.ops);
    }

    /// The accumulated changes, ready for [`UtxoSet::apply_batch`].
    pub fn into_batch(self) -> UtxoBatch {
        self.batch
    }
}

impl<'a, V: UtxoView> UtxoView for CoinsOverlay<'a, V> {
    fn get_coin(&self, outpoint: &OutPoint) -> Option<Coin> {
        if self.spent.contains(outpoint) {
            return None;
        }
        self.added
            .get(outpoint)
            .cloned()
            .or_else(|| self.base.get_coin(outpoint))
    }
}

impl<'a, V: TicketSource> TicketSource for CoinsOverlay<'a, V> {
    fn get_ticket(&self, ticket_hash: &Hash) -> Option<Transaction> {
        if self.dropped_tickets.contains(ticket_hash) {
            return None;
        }
        self.tickets
            .get(ticket_hash)
            .cloned()
            .or_else(|| self.base.get_ticket(ticket_hash))
    }
}
