use crate::balance::{
    BalanceRow, ColorLookupError, ColoredTransactionLookup, TransactionLookup, WalletRuleEntry,
};
use crate::chain::ChainPartEntry;
use crate::colored::ColoredTransaction;
use bitcoincore_rpc::bitcoin::{Block, BlockHash, Transaction, Txid};
use std::sync::Arc;

pub trait BalanceStore: Send + Sync {
    // All rows are written in one atomic batch
    fn put_balance_rows(&self, rows: &[BalanceRow]) -> Result<(), String>;

    // Rows of one subject in row key (locator) order
    fn get_balance_rows(&self, partition_key: &str) -> Result<Vec<BalanceRow>, String>;
}

pub trait ChainStore: Send + Sync {
    fn put_chain_parts(&self, parts: &[ChainPartEntry]) -> Result<(), String>;

    /// Parts whose offset is below `before` (all parts when `None`), highest
    /// offset first, at most `limit` of them.
    fn get_chain_parts_desc(
        &self,
        before: Option<u32>,
        limit: usize,
    ) -> Result<Vec<ChainPartEntry>, String>;
}

pub trait CheckpointStore: Send + Sync {
    fn get_checkpoint_value(&self, key: &str) -> Result<Option<Vec<u8>>, String>;
    fn put_checkpoint_value(&self, key: &str, value: &[u8]) -> Result<(), String>;
}

pub trait TransactionStore: Send + Sync {
    fn put_transactions(&self, txs: &[Transaction]) -> Result<(), String>;
    fn get_transaction(&self, txid: &Txid) -> Result<Option<Transaction>, String>;
}

pub trait BlockStore: Send + Sync {
    fn put_blocks(&self, blocks: &[Block]) -> Result<(), String>;
    fn get_block(&self, block_hash: &BlockHash) -> Result<Option<Block>, String>;
}

pub trait ColoredTransactionStore: Send + Sync {
    fn put_colored_transaction(
        &self,
        txid: &Txid,
        colored: &ColoredTransaction,
    ) -> Result<(), String>;
    fn get_colored_transaction(&self, txid: &Txid) -> Result<Option<ColoredTransaction>, String>;
}

pub trait WalletRuleStore: Send + Sync {
    fn put_wallet_rule(&self, entry: &WalletRuleEntry) -> Result<(), String>;
    fn get_wallet_rules(&self) -> Result<Vec<WalletRuleEntry>, String>;
}

/// Everything the indexer persists. Implemented for any type that provides
/// all the row contracts.
pub trait IndexStore:
    BalanceStore
    + ChainStore
    + CheckpointStore
    + TransactionStore
    + BlockStore
    + ColoredTransactionStore
    + WalletRuleStore
{
}

impl<T> IndexStore for T where
    T: BalanceStore
        + ChainStore
        + CheckpointStore
        + TransactionStore
        + BlockStore
        + ColoredTransactionStore
        + WalletRuleStore
{
}

pub type IndexStoreRef = Arc<dyn IndexStore>;

// Parent transactions come from the transactions stream
pub struct StoreTransactionLookup {
    store: IndexStoreRef,
}

impl StoreTransactionLookup {
    pub fn new(store: IndexStoreRef) -> Self {
        Self { store }
    }
}

impl TransactionLookup for StoreTransactionLookup {
    fn get_transaction(&self, txid: &Txid) -> Result<Option<Transaction>, String> {
        TransactionStore::get_transaction(self.store.as_ref(), txid)
    }
}

/// Colored data is only meaningful for transactions the store knows; an
/// unknown transaction is reported as such so the caller can retry later.
pub struct StoreColoredLookup {
    store: IndexStoreRef,
}

impl StoreColoredLookup {
    pub fn new(store: IndexStoreRef) -> Self {
        Self { store }
    }
}

impl ColoredTransactionLookup for StoreColoredLookup {
    fn get_colored_transaction(
        &self,
        txid: &Txid,
    ) -> Result<Option<ColoredTransaction>, ColorLookupError> {
        let colored = ColoredTransactionStore::get_colored_transaction(self.store.as_ref(), txid)
            .map_err(ColorLookupError::Failed)?;
        if colored.is_some() {
            return Ok(colored);
        }

        match TransactionStore::get_transaction(self.store.as_ref(), txid) {
            Ok(Some(_)) => Ok(None),
            Ok(None) => Err(ColorLookupError::TransactionNotFound(*txid)),
            Err(e) => Err(ColorLookupError::Failed(e)),
        }
    }
}
