use super::store::*;
use crate::balance::{BalanceRow, WalletRuleEntry};
use crate::chain::ChainPartEntry;
use crate::colored::ColoredTransaction;
use bitcoincore_rpc::bitcoin::{Block, BlockHash, Transaction, Txid};
use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

// In-memory store for tests, counts atomic writes and can be made to fail
#[derive(Default)]
pub struct MemoryStore {
    balances: Mutex<BTreeMap<(String, String), BalanceRow>>,
    chain: Mutex<BTreeMap<u32, ChainPartEntry>>,
    checkpoints: Mutex<HashMap<String, Vec<u8>>>,
    transactions: Mutex<HashMap<Txid, Transaction>>,
    blocks: Mutex<HashMap<BlockHash, Block>>,
    colored: Mutex<HashMap<Txid, ColoredTransaction>>,
    wallet_rules: Mutex<Vec<WalletRuleEntry>>,

    writes: AtomicUsize,
    fail_writes: AtomicUsize,
    broken: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn write_count(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    // The next `count` writes fail
    pub fn fail_next_writes(&self, count: usize) {
        self.fail_writes.store(count, Ordering::SeqCst);
    }

    // Every write fails until reset
    pub fn set_broken(&self, broken: bool) {
        self.broken.store(broken, Ordering::SeqCst);
    }

    pub fn chain_part_count(&self) -> usize {
        self.chain.lock().unwrap().len()
    }

    fn begin_write(&self) -> Result<(), String> {
        if self.broken.load(Ordering::SeqCst) {
            return Err("Store is broken".to_string());
        }

        let failed = self
            .fail_writes
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failed {
            return Err("Injected write failure".to_string());
        }

        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

impl BalanceStore for MemoryStore {
    fn put_balance_rows(&self, rows: &[BalanceRow]) -> Result<(), String> {
        self.begin_write()?;
        let mut balances = self.balances.lock().unwrap();
        for row in rows {
            balances.insert((row.partition_key.clone(), row.row_key.clone()), row.clone());
        }
        Ok(())
    }

    fn get_balance_rows(&self, partition_key: &str) -> Result<Vec<BalanceRow>, String> {
        let balances = self.balances.lock().unwrap();
        Ok(balances
            .iter()
            .filter(|((partition, _), _)| partition == partition_key)
            .map(|(_, row)| row.clone())
            .collect())
    }
}

impl ChainStore for MemoryStore {
    fn put_chain_parts(&self, parts: &[ChainPartEntry]) -> Result<(), String> {
        self.begin_write()?;
        let mut chain = self.chain.lock().unwrap();
        for part in parts {
            chain.insert(part.chain_offset, part.clone());
        }
        Ok(())
    }

    fn get_chain_parts_desc(
        &self,
        before: Option<u32>,
        limit: usize,
    ) -> Result<Vec<ChainPartEntry>, String> {
        let chain = self.chain.lock().unwrap();
        let end = before.unwrap_or(u32::MAX);
        Ok(chain
            .iter()
            .rev()
            .filter(|(offset, _)| before.is_none() || **offset < end)
            .take(limit)
            .map(|(_, part)| part.clone())
            .collect())
    }
}

impl CheckpointStore for MemoryStore {
    fn get_checkpoint_value(&self, key: &str) -> Result<Option<Vec<u8>>, String> {
        Ok(self.checkpoints.lock().unwrap().get(key).cloned())
    }

    fn put_checkpoint_value(&self, key: &str, value: &[u8]) -> Result<(), String> {
        self.begin_write()?;
        self.checkpoints
            .lock()
            .unwrap()
            .insert(key.to_string(), value.to_vec());
        Ok(())
    }
}

impl TransactionStore for MemoryStore {
    fn put_transactions(&self, txs: &[Transaction]) -> Result<(), String> {
        self.begin_write()?;
        let mut transactions = self.transactions.lock().unwrap();
        for tx in txs {
            transactions.insert(tx.compute_txid(), tx.clone());
        }
        Ok(())
    }

    fn get_transaction(&self, txid: &Txid) -> Result<Option<Transaction>, String> {
        Ok(self.transactions.lock().unwrap().get(txid).cloned())
    }
}

impl BlockStore for MemoryStore {
    fn put_blocks(&self, blocks: &[Block]) -> Result<(), String> {
        self.begin_write()?;
        let mut stored = self.blocks.lock().unwrap();
        for block in blocks {
            stored.insert(block.block_hash(), block.clone());
        }
        Ok(())
    }

    fn get_block(&self, block_hash: &BlockHash) -> Result<Option<Block>, String> {
        Ok(self.blocks.lock().unwrap().get(block_hash).cloned())
    }
}

impl ColoredTransactionStore for MemoryStore {
    fn put_colored_transaction(
        &self,
        txid: &Txid,
        colored: &ColoredTransaction,
    ) -> Result<(), String> {
        self.begin_write()?;
        self.colored.lock().unwrap().insert(*txid, colored.clone());
        Ok(())
    }

    fn get_colored_transaction(&self, txid: &Txid) -> Result<Option<ColoredTransaction>, String> {
        Ok(self.colored.lock().unwrap().get(txid).cloned())
    }
}

impl WalletRuleStore for MemoryStore {
    fn put_wallet_rule(&self, entry: &WalletRuleEntry) -> Result<(), String> {
        self.begin_write()?;
        let mut rules = self.wallet_rules.lock().unwrap();
        if !rules.contains(entry) {
            rules.push(entry.clone());
        }
        Ok(())
    }

    fn get_wallet_rules(&self) -> Result<Vec<WalletRuleEntry>, String> {
        Ok(self.wallet_rules.lock().unwrap().clone())
    }
}
