use super::writer::{BalanceWriterPool, RowBatch, WriteJob};
use crate::balance::{
    BalanceRow, OrderedBalanceChange, WalletRuleEntryCollection, extract_script_balances,
    extract_wallet_balances,
};
use crate::fetcher::{BlockFetcher, FetchedBlock, SaveBarrier};
use crate::output::IndexOutputRef;
use rayon::prelude::*;
use std::collections::BTreeMap;

// Transactions per atomic write
const TRANSACTION_BATCH_SIZE: usize = 100;

/// Turns one block into the batches of one index stream.
pub trait IndexTask: Send + Sync {
    fn name(&self) -> &'static str;
    fn process_block(&self, block: &FetchedBlock) -> Result<Vec<RowBatch>, String>;
}

pub struct BlockTask;

impl IndexTask for BlockTask {
    fn name(&self) -> &'static str {
        "blocks"
    }

    fn process_block(&self, block: &FetchedBlock) -> Result<Vec<RowBatch>, String> {
        Ok(vec![RowBatch::new(
            block.block_id.to_string(),
            WriteJob::Blocks(vec![block.block.clone()]),
        )])
    }
}

pub struct TransactionTask;

impl IndexTask for TransactionTask {
    fn name(&self) -> &'static str {
        "transactions"
    }

    fn process_block(&self, block: &FetchedBlock) -> Result<Vec<RowBatch>, String> {
        let partition = block.block_id.to_string();
        Ok(block
            .block
            .txdata
            .chunks(TRANSACTION_BATCH_SIZE)
            .map(|txs| RowBatch::new(partition.clone(), WriteJob::Transactions(txs.to_vec())))
            .collect())
    }
}

/// Script balances, or wallet balances when wallet rules are given.
pub struct BalanceTask {
    rules: Option<WalletRuleEntryCollection>,
}

impl BalanceTask {
    pub fn scripts() -> Self {
        Self { rules: None }
    }

    pub fn wallets(rules: WalletRuleEntryCollection) -> Self {
        Self { rules: Some(rules) }
    }

    pub fn extract(&self, block: &FetchedBlock) -> Vec<OrderedBalanceChange> {
        let header = &block.block.header;
        block
            .block
            .txdata
            .par_iter()
            .flat_map_iter(|tx| {
                let txid = Some(tx.compute_txid());
                match &self.rules {
                    Some(rules) => extract_wallet_balances(
                        txid,
                        tx,
                        Some(block.block_id),
                        Some(header),
                        block.height,
                        rules,
                    ),
                    None => extract_script_balances(
                        txid,
                        tx,
                        Some(block.block_id),
                        Some(header),
                        block.height,
                    ),
                }
            })
            .collect()
    }
}

/// Groups rows by subject, one batch per subject.
pub fn make_balance_batches(changes: &[OrderedBalanceChange]) -> Result<Vec<RowBatch>, String> {
    let mut partitions: BTreeMap<String, Vec<BalanceRow>> = BTreeMap::new();
    for change in changes {
        let row = BalanceRow::from_change(change)?;
        partitions
            .entry(row.partition_key.clone())
            .or_default()
            .push(row);
    }

    Ok(partitions
        .into_iter()
        .map(|(partition, rows)| RowBatch::new(partition, WriteJob::Balances(rows)))
        .collect())
}

impl IndexTask for BalanceTask {
    fn name(&self) -> &'static str {
        match self.rules {
            Some(_) => "wallets",
            None => "balances",
        }
    }

    fn process_block(&self, block: &FetchedBlock) -> Result<Vec<RowBatch>, String> {
        make_balance_batches(&self.extract(block))
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IndexStats {
    pub blocks: u64,
    pub entities: u64,
    pub last_height: Option<u32>,
}

/// Drives one pass of `task` over the fetched blocks. Everything enqueued is
/// committed before this returns.
pub fn run_task(
    task: &dyn IndexTask,
    fetcher: BlockFetcher<'_>,
    pool: &BalanceWriterPool,
    output: &IndexOutputRef,
) -> Result<IndexStats, String> {
    let (start, end) = fetcher.range();
    info!("Index task {} started on blocks {} to {}", task.name(), start, end);

    if start <= end {
        output.update_total(end as u64);
        output.update_current(start as u64);
    }
    output.set_message(&format!("Indexing {}", task.name()));

    let mut stats = IndexStats::default();
    for item in fetcher {
        let block = item?;
        for batch in task.process_block(&block)? {
            stats.entities += batch.job.len() as u64;
            pool.enqueue(batch)?;
        }

        stats.blocks += 1;
        stats.last_height = Some(block.height);
        output.update_current(block.height as u64);
    }

    pool.wait()?;

    info!(
        "Index task {} done: {} blocks, {} entities",
        task.name(),
        stats.blocks,
        stats.entities
    );
    Ok(stats)
}
