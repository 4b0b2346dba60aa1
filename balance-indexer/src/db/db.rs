use super::store::*;
use crate::balance::{BalanceRow, WalletRuleEntry};
use crate::chain::ChainPartEntry;
use crate::colored::ColoredTransaction;
use bitcoincore_rpc::bitcoin::consensus::encode;
use bitcoincore_rpc::bitcoin::hashes::Hash;
use bitcoincore_rpc::bitcoin::{Block, BlockHash, Transaction, Txid};
use rocksdb::{
    ColumnFamily, ColumnFamilyDescriptor, DB, Direction, IteratorMode, Options, WriteBatch,
    WriteOptions,
};
use rust_rocksdb::{self as rocksdb};
use std::path::{Path, PathBuf};

// Column family names
pub const BALANCES_CF: &str = "balances";
pub const CHAIN_CF: &str = "chain";
pub const CHECKPOINTS_CF: &str = "checkpoints";
pub const TRANSACTIONS_CF: &str = "transactions";
pub const BLOCKS_CF: &str = "blocks";
pub const COLORED_CF: &str = "colored";
pub const WALLET_RULES_CF: &str = "wallet_rules";

// Separates the partition key from the row key in balance keys
const KEY_SEPARATOR: u8 = 0x00;

/// RocksDB backed store, one column family per row contract.
pub struct IndexerDB {
    file: PathBuf,
    db: DB,
}

impl IndexerDB {
    pub fn new(data_dir: &Path) -> Result<Self, String> {
        let db_dir = Self::get_db_dir(data_dir);
        if !db_dir.exists() {
            std::fs::create_dir_all(&db_dir).map_err(|e| {
                let msg = format!(
                    "Could not create database directory at {}: {}",
                    db_dir.display(),
                    e
                );
                error!("{}", msg);
                msg
            })?;
        }

        let file = db_dir.join("indexer");
        info!("Opening RocksDB at {}", file.display());

        let mut options = Options::default();
        options.create_if_missing(true);
        options.create_missing_column_families(true);

        let mut balances_cf_options = Options::default();
        balances_cf_options.set_level_compaction_dynamic_level_bytes(true);
        balances_cf_options.set_compaction_style(rocksdb::DBCompactionStyle::Level);

        let mut transactions_cf_options = Options::default();
        transactions_cf_options.set_level_compaction_dynamic_level_bytes(true);
        transactions_cf_options.set_compaction_style(rocksdb::DBCompactionStyle::Level);

        let cf_descriptors = vec![
            ColumnFamilyDescriptor::new(BALANCES_CF, balances_cf_options),
            ColumnFamilyDescriptor::new(CHAIN_CF, Options::default()),
            ColumnFamilyDescriptor::new(CHECKPOINTS_CF, Options::default()),
            ColumnFamilyDescriptor::new(TRANSACTIONS_CF, transactions_cf_options),
            ColumnFamilyDescriptor::new(BLOCKS_CF, Options::default()),
            ColumnFamilyDescriptor::new(COLORED_CF, Options::default()),
            ColumnFamilyDescriptor::new(WALLET_RULES_CF, Options::default()),
        ];

        let db = DB::open_cf_descriptors(&options, &file, cf_descriptors).map_err(|e| {
            let msg = format!("Failed to open RocksDB at {}: {}", file.display(), e);
            error!("{}", msg);
            msg
        })?;

        Ok(IndexerDB { file, db })
    }

    pub fn get_db_dir(data_dir: &Path) -> PathBuf {
        data_dir.join("db")
    }

    /// Removes the database files under `data_dir`. The database must not be
    /// open.
    pub fn clear(data_dir: &Path) -> Result<(), String> {
        let db_dir = Self::get_db_dir(data_dir);
        if !db_dir.exists() {
            info!("No database at {}", db_dir.display());
            return Ok(());
        }

        std::fs::remove_dir_all(&db_dir).map_err(|e| {
            let msg = format!("Failed to remove database at {}: {}", db_dir.display(), e);
            error!("{}", msg);
            msg
        })?;

        info!("Removed database at {}", db_dir.display());
        Ok(())
    }

    pub fn flush_all(&self) -> Result<(), String> {
        self.db.flush().map_err(|e| {
            let msg = format!("Failed to flush RocksDB at {}: {}", self.file.display(), e);
            error!("{}", msg);
            msg
        })
    }

    fn cf(&self, name: &str) -> Result<&ColumnFamily, String> {
        self.db.cf_handle(name).ok_or_else(|| {
            let msg = format!("Column family {} not found", name);
            error!("{}", msg);
            msg
        })
    }

    fn write(&self, batch: WriteBatch, what: &str) -> Result<(), String> {
        let mut write_options = WriteOptions::default();
        write_options.set_sync(true);
        self.db.write_opt(&batch, &write_options).map_err(|e| {
            let msg = format!("Failed to write {} batch to DB: {}", what, e);
            error!("{}", msg);
            msg
        })
    }

    fn get_value(&self, cf_name: &str, key: &[u8]) -> Result<Option<Vec<u8>>, String> {
        let cf = self.cf(cf_name)?;
        self.db.get_cf(cf, key).map_err(|e| {
            let msg = format!("Failed to read from {}: {}", cf_name, e);
            error!("{}", msg);
            msg
        })
    }

    fn make_balance_key(partition_key: &str, row_key: &str) -> Vec<u8> {
        let mut key = Vec::with_capacity(partition_key.len() + 1 + row_key.len());
        key.extend_from_slice(partition_key.as_bytes());
        key.push(KEY_SEPARATOR);
        key.extend_from_slice(row_key.as_bytes());
        key
    }

    fn make_wallet_rule_key(entry: &WalletRuleEntry) -> Result<Vec<u8>, String> {
        let rule = serde_json::to_vec(&entry.rule).map_err(|e| {
            let msg = format!("Failed to encode wallet rule of {}: {}", entry.wallet_id, e);
            error!("{}", msg);
            msg
        })?;

        let mut key = Vec::with_capacity(entry.wallet_id.len() + 1 + rule.len());
        key.extend_from_slice(entry.wallet_id.as_bytes());
        key.push(KEY_SEPARATOR);
        key.extend_from_slice(&rule);
        Ok(key)
    }
}

impl BalanceStore for IndexerDB {
    fn put_balance_rows(&self, rows: &[BalanceRow]) -> Result<(), String> {
        let cf = self.cf(BALANCES_CF)?;
        let mut batch = WriteBatch::default();
        for row in rows {
            if row.partition_key.as_bytes().contains(&KEY_SEPARATOR) {
                let msg = format!("Invalid partition key {:?}", row.partition_key);
                error!("{}", msg);
                return Err(msg);
            }

            let key = Self::make_balance_key(&row.partition_key, &row.row_key);
            batch.put_cf(cf, key, row.to_bytes()?);
        }

        self.write(batch, BALANCES_CF)
    }

    fn get_balance_rows(&self, partition_key: &str) -> Result<Vec<BalanceRow>, String> {
        let cf = self.cf(BALANCES_CF)?;

        let mut prefix = partition_key.as_bytes().to_vec();
        prefix.push(KEY_SEPARATOR);

        let iter = self
            .db
            .iterator_cf(cf, IteratorMode::From(&prefix, Direction::Forward));

        let mut rows = Vec::new();
        for item in iter {
            let (key, value) = item.map_err(|e| {
                let msg = format!("Iterator error on {}: {}", partition_key, e);
                error!("{}", msg);
                msg
            })?;

            // Past the last row of this partition
            if !key.starts_with(&prefix) {
                break;
            }

            rows.push(BalanceRow::from_bytes(&value)?);
        }

        Ok(rows)
    }
}

impl ChainStore for IndexerDB {
    fn put_chain_parts(&self, parts: &[ChainPartEntry]) -> Result<(), String> {
        let cf = self.cf(CHAIN_CF)?;
        let mut batch = WriteBatch::default();
        for part in parts {
            batch.put_cf(cf, part.make_key(), part.to_bytes());
        }

        self.write(batch, CHAIN_CF)
    }

    fn get_chain_parts_desc(
        &self,
        before: Option<u32>,
        limit: usize,
    ) -> Result<Vec<ChainPartEntry>, String> {
        let cf = self.cf(CHAIN_CF)?;

        let mode = match before {
            Some(0) => return Ok(Vec::new()),
            Some(offset) => {
                let seek = (offset - 1).to_be_bytes();
                let iter = self
                    .db
                    .iterator_cf(cf, IteratorMode::From(&seek, Direction::Reverse));
                return Self::collect_parts(iter, limit);
            }
            None => IteratorMode::End,
        };

        Self::collect_parts(self.db.iterator_cf(cf, mode), limit)
    }
}

impl IndexerDB {
    fn collect_parts<I>(iter: I, limit: usize) -> Result<Vec<ChainPartEntry>, String>
    where
        I: Iterator<Item = Result<(Box<[u8]>, Box<[u8]>), rocksdb::Error>>,
    {
        let mut parts = Vec::with_capacity(limit);
        for item in iter.take(limit) {
            let (key, value) = item.map_err(|e| {
                let msg = format!("Iterator error on {}: {}", CHAIN_CF, e);
                error!("{}", msg);
                msg
            })?;

            let offset: [u8; 4] = key.as_ref().try_into().map_err(|_| {
                let msg = format!("Invalid chain key length {}", key.len());
                error!("{}", msg);
                msg
            })?;
            parts.push(ChainPartEntry::from_bytes(
                u32::from_be_bytes(offset),
                &value,
            )?);
        }

        Ok(parts)
    }
}

impl CheckpointStore for IndexerDB {
    fn get_checkpoint_value(&self, key: &str) -> Result<Option<Vec<u8>>, String> {
        self.get_value(CHECKPOINTS_CF, key.as_bytes())
    }

    fn put_checkpoint_value(&self, key: &str, value: &[u8]) -> Result<(), String> {
        let cf = self.cf(CHECKPOINTS_CF)?;
        let mut batch = WriteBatch::default();
        batch.put_cf(cf, key.as_bytes(), value);

        self.write(batch, CHECKPOINTS_CF)
    }
}

impl TransactionStore for IndexerDB {
    fn put_transactions(&self, txs: &[Transaction]) -> Result<(), String> {
        let cf = self.cf(TRANSACTIONS_CF)?;
        let mut batch = WriteBatch::default();
        for tx in txs {
            let txid = tx.compute_txid();
            batch.put_cf(cf, txid.as_byte_array(), encode::serialize(tx));
        }

        self.write(batch, TRANSACTIONS_CF)
    }

    fn get_transaction(&self, txid: &Txid) -> Result<Option<Transaction>, String> {
        let Some(value) = self.get_value(TRANSACTIONS_CF, txid.as_byte_array())? else {
            return Ok(None);
        };

        let tx = encode::deserialize(&value).map_err(|e| {
            let msg = format!("Invalid stored transaction {}: {}", txid, e);
            error!("{}", msg);
            msg
        })?;
        Ok(Some(tx))
    }
}

impl BlockStore for IndexerDB {
    fn put_blocks(&self, blocks: &[Block]) -> Result<(), String> {
        let cf = self.cf(BLOCKS_CF)?;
        let mut batch = WriteBatch::default();
        for block in blocks {
            batch.put_cf(
                cf,
                block.block_hash().as_byte_array(),
                encode::serialize(block),
            );
        }

        self.write(batch, BLOCKS_CF)
    }

    fn get_block(&self, block_hash: &BlockHash) -> Result<Option<Block>, String> {
        let Some(value) = self.get_value(BLOCKS_CF, block_hash.as_byte_array())? else {
            return Ok(None);
        };

        let block = encode::deserialize(&value).map_err(|e| {
            let msg = format!("Invalid stored block {}: {}", block_hash, e);
            error!("{}", msg);
            msg
        })?;
        Ok(Some(block))
    }
}

impl ColoredTransactionStore for IndexerDB {
    fn put_colored_transaction(
        &self,
        txid: &Txid,
        colored: &ColoredTransaction,
    ) -> Result<(), String> {
        let cf = self.cf(COLORED_CF)?;
        let mut batch = WriteBatch::default();
        batch.put_cf(cf, txid.as_byte_array(), colored.to_bytes());

        self.write(batch, COLORED_CF)
    }

    fn get_colored_transaction(&self, txid: &Txid) -> Result<Option<ColoredTransaction>, String> {
        match self.get_value(COLORED_CF, txid.as_byte_array())? {
            Some(value) => ColoredTransaction::from_bytes(&value).map(Some),
            None => Ok(None),
        }
    }
}

impl WalletRuleStore for IndexerDB {
    fn put_wallet_rule(&self, entry: &WalletRuleEntry) -> Result<(), String> {
        let key = Self::make_wallet_rule_key(entry)?;
        let value = serde_json::to_vec(entry).map_err(|e| {
            let msg = format!("Failed to encode wallet rule of {}: {}", entry.wallet_id, e);
            error!("{}", msg);
            msg
        })?;

        let cf = self.cf(WALLET_RULES_CF)?;
        let mut batch = WriteBatch::default();
        batch.put_cf(cf, key, value);

        self.write(batch, WALLET_RULES_CF)
    }

    fn get_wallet_rules(&self) -> Result<Vec<WalletRuleEntry>, String> {
        let cf = self.cf(WALLET_RULES_CF)?;

        let mut entries = Vec::new();
        for item in self.db.iterator_cf(cf, IteratorMode::Start) {
            let (_key, value) = item.map_err(|e| {
                let msg = format!("Iterator error on {}: {}", WALLET_RULES_CF, e);
                error!("{}", msg);
                msg
            })?;

            let entry: WalletRuleEntry = serde_json::from_slice(&value).map_err(|e| {
                let msg = format!("Invalid stored wallet rule: {}", e);
                error!("{}", msg);
                msg
            })?;
            entries.push(entry);
        }

        Ok(entries)
    }
}
