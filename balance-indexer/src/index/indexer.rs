use super::task::{BalanceTask, BlockTask, IndexStats, IndexTask, TransactionTask, make_balance_batches, run_task};
use super::writer::{BalanceWriterPool, RowBatch, WriteJob};
use crate::balance::{
    BalanceId, CachedTransactionLookup, OrderedBalanceChange, Resolution,
    WalletRuleEntry, WalletRuleEntryCollection, extract_script_balances, extract_wallet_balances,
    resolve_color, resolve_spent_coins,
};
use crate::btc::BTCClientRef;
use crate::chain::{Chain, ChainSyncDriver, ChainSyncOutcome, ChainView};
use crate::checkpoint::{Checkpoint, CheckpointRepository, IndexerCheckpoint};
use crate::config::IndexerConfigRef;
use crate::db::{
    BalanceStore, BlockStore, ChainStore, IndexStoreRef, StoreColoredLookup,
    StoreTransactionLookup, TransactionStore, WalletRuleStore,
};
use crate::fetcher::{BlockFetcher, FetchedBlock};
use crate::output::IndexOutputRef;
use bitcoincore_rpc::bitcoin::{Block, Transaction};
use indexer_util::BALANCE_INDEXER_SERVICE_NAME;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

// Chain rows read per page when rebuilding the stored chain
const CHAIN_LOAD_PAGE: usize = 1000;

/// Entry point of every indexing pass and of balance queries.
#[derive(Clone)]
pub struct ChainIndexer {
    config: IndexerConfigRef,
    store: IndexStoreRef,
    btc_client: BTCClientRef,
    output: IndexOutputRef,
    cancel: Arc<AtomicBool>,
}

impl ChainIndexer {
    pub fn new(
        config: IndexerConfigRef,
        store: IndexStoreRef,
        btc_client: BTCClientRef,
        output: IndexOutputRef,
    ) -> Self {
        Self {
            config,
            store,
            btc_client,
            output,
            cancel: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn cancel_flag(&self) -> Arc<AtomicBool> {
        self.cancel.clone()
    }

    pub fn cancel(&self) {
        info!("Cancellation requested");
        self.cancel.store(true, Ordering::SeqCst);
    }

    pub fn checkpoint_repository(&self) -> CheckpointRepository {
        CheckpointRepository::new(
            self.store.clone(),
            &self.config.sync.checkpoint_set_name,
            self.config.btc.network(),
        )
    }

    // Stored position of a stream, regardless of ignore mode
    pub fn get_checkpoint(&self, stream: IndexerCheckpoint) -> Result<Checkpoint, String> {
        self.checkpoint_repository().get_checkpoint(stream.as_str())
    }

    // Start position of a pass, genesis in ignore mode
    fn get_start_checkpoint(&self, stream: IndexerCheckpoint) -> Result<Checkpoint, String> {
        self.checkpoint_repository()
            .with_ignore(self.config.sync.ignore_checkpoints)
            .get_checkpoint(stream.as_str())
    }

    pub fn get_block_fetcher<'a>(
        &self,
        checkpoint: Checkpoint,
        chain: &'a dyn ChainView,
    ) -> Result<BlockFetcher<'a>, String> {
        let fetcher = BlockFetcher::new(
            checkpoint,
            self.checkpoint_repository(),
            self.btc_client.clone(),
            chain,
            self.config.sync.from_height,
            self.config.sync.to_height,
        )?;

        Ok(fetcher
            .with_save_interval(self.config.sync.checkpoint_interval())
            .with_cancel(self.cancel.clone()))
    }

    fn run_stream(
        &self,
        stream: IndexerCheckpoint,
        chain: &dyn ChainView,
        task: &dyn IndexTask,
    ) -> Result<IndexStats, String> {
        let set_name = self.checkpoint_repository().set_name().to_string();
        let (_lock, _guard) =
            indexer_util::try_lock_stream(BALANCE_INDEXER_SERVICE_NAME, &set_name, stream.as_str())?;

        let checkpoint = self.get_start_checkpoint(stream)?;
        let pool = Arc::new(BalanceWriterPool::new(self.store.clone(), &self.config.sync));
        let fetcher = self
            .get_block_fetcher(checkpoint, chain)?
            .with_barrier(pool.clone());

        let ret = run_task(task, fetcher, &pool, &self.output);
        pool.shutdown();

        if let Ok(stats) = &ret {
            self.output
                .println(&format!("{}: {} blocks, {} entities", stream, stats.blocks, stats.entities));
        }
        ret
    }

    pub fn index_blocks(&self, chain: &dyn ChainView) -> Result<IndexStats, String> {
        self.run_stream(IndexerCheckpoint::Blocks, chain, &BlockTask)
    }

    pub fn index_transactions(&self, chain: &dyn ChainView) -> Result<IndexStats, String> {
        self.run_stream(IndexerCheckpoint::Transactions, chain, &TransactionTask)
    }

    pub fn index_ordered_balances(&self, chain: &dyn ChainView) -> Result<IndexStats, String> {
        self.run_stream(IndexerCheckpoint::Balances, chain, &BalanceTask::scripts())
    }

    pub fn index_wallet_balances(&self, chain: &dyn ChainView) -> Result<IndexStats, String> {
        let rules = self.get_wallet_rules()?;
        info!("Indexing wallet balances with {} rules", rules.len());
        self.run_stream(IndexerCheckpoint::Wallets, chain, &BalanceTask::wallets(rules))
    }

    fn write_now(&self, batches: Vec<RowBatch>) -> Result<usize, String> {
        let mut count = 0;
        for batch in batches {
            count += batch.job.len();
            match batch.job {
                WriteJob::Balances(rows) => self.store.put_balance_rows(&rows)?,
                WriteJob::Transactions(txs) => self.store.put_transactions(&txs)?,
                WriteJob::Blocks(blocks) => self.store.put_blocks(&blocks)?,
            }
        }

        Ok(count)
    }

    /// Indexes a single unconfirmed transaction. Returns the rows written.
    pub fn index_ordered_balance_tx(&self, tx: &Transaction) -> Result<usize, String> {
        let changes = extract_script_balances(None, tx, None, None, 0);
        self.write_now(make_balance_batches(&changes)?)
    }

    pub fn index_ordered_balance_block(&self, height: u32, block: &Block) -> Result<usize, String> {
        let fetched = Self::to_fetched(height, block);
        let batches = BalanceTask::scripts().process_block(&fetched)?;
        self.write_now(batches)
    }

    pub fn index_wallet_ordered_balance_block(
        &self,
        height: u32,
        block: &Block,
        rules: &WalletRuleEntryCollection,
    ) -> Result<usize, String> {
        let block_id = block.block_hash();
        let changes: Vec<OrderedBalanceChange> = block
            .txdata
            .iter()
            .flat_map(|tx| {
                extract_wallet_balances(None, tx, Some(block_id), Some(&block.header), height, rules)
            })
            .collect();
        self.write_now(make_balance_batches(&changes)?)
    }

    pub fn index_transactions_block(&self, height: u32, block: &Block) -> Result<usize, String> {
        let fetched = Self::to_fetched(height, block);
        self.write_now(TransactionTask.process_block(&fetched)?)
    }

    fn to_fetched(height: u32, block: &Block) -> FetchedBlock {
        FetchedBlock {
            height,
            block_id: block.block_hash(),
            block: block.clone(),
        }
    }

    /// The node's main chain, rebuilt from the stored chain rows when
    /// possible and completed from the node.
    pub fn get_node_chain(&self) -> Result<Chain, String> {
        let client = &**self.btc_client;
        self.output.println("Synchronizing chain with the node...");

        let mut chain = match self.load_stored_chain()? {
            Some(chain) => chain,
            None => return Chain::load_from_client(client),
        };

        match chain.sync_from_client(client) {
            Ok(_) => Ok(chain),
            Err(e) => {
                warn!("Stored chain unusable ({}), loading from the node", e);
                Chain::load_from_client(client)
            }
        }
    }

    // Longest linked prefix of the stored chain rows
    fn load_stored_chain(&self) -> Result<Option<Chain>, String> {
        let mut parts = Vec::new();
        let mut before = None;
        loop {
            let page = self.store.get_chain_parts_desc(before, CHAIN_LOAD_PAGE)?;
            let Some(last) = page.last() else {
                break;
            };
            before = Some(last.chain_offset);
            parts.extend(page);
        }
        parts.reverse();

        let mut headers = parts.into_iter().flat_map(|p| p.headers.into_iter());
        let Some(genesis) = headers.next() else {
            return Ok(None);
        };

        let mut chain = Chain::new(genesis);
        for header in headers {
            if chain.push(header).is_err() {
                warn!("Stored chain broken above height {}", chain.tip_height());
                break;
            }
        }

        info!("Stored chain loaded with height {}", chain.tip_height());
        Ok(Some(chain))
    }

    pub fn index_chain(&self, chain: &dyn ChainView) -> Result<ChainSyncOutcome, String> {
        let set_name = self.checkpoint_repository().set_name().to_string();
        let (_lock, _guard) =
            indexer_util::try_lock_stream(BALANCE_INDEXER_SERVICE_NAME, &set_name, "chain")?;

        ChainSyncDriver::new(self.store.clone(), self.cancel.clone())
            .with_output(self.output.clone())
            .index_chain(chain)
    }

    pub fn index_node_main_chain(&self) -> Result<ChainSyncOutcome, String> {
        let chain = self.get_node_chain()?;
        self.index_chain(&chain)
    }

    pub fn add_wallet_rule(&self, entry: &WalletRuleEntry) -> Result<(), String> {
        self.store.put_wallet_rule(entry)?;
        info!(
            "Wallet rule added to {} for script {}",
            entry.wallet_id,
            entry.rule.script_pubkey.to_hex_string()
        );
        Ok(())
    }

    pub fn get_wallet_rules(&self) -> Result<WalletRuleEntryCollection, String> {
        Ok(self.store.get_wallet_rules()?.into_iter().collect())
    }

    /// Balance changes of a subject in locator order, with spent coins and
    /// colored data resolved where the data is already indexed.
    pub fn get_ordered_balance(
        &self,
        balance_id: &BalanceId,
    ) -> Result<Vec<OrderedBalanceChange>, String> {
        let rows = self.store.get_balance_rows(&balance_id.partition_key())?;

        let tx_lookup = CachedTransactionLookup::new(
            StoreTransactionLookup::new(self.store.clone()),
            self.config.sync.transaction_cache_size,
        );
        let color_lookup = StoreColoredLookup::new(self.store.clone());

        let mut changes = Vec::with_capacity(rows.len());
        for row in rows {
            let mut change = row.into_change()?;

            match resolve_spent_coins(&mut change, &tx_lookup) {
                Resolution::Resolved => {}
                Resolution::Pending(reason) => debug!("Spent coins pending: {}", reason),
                Resolution::Failed(reason) => warn!("Spent coins unresolved: {}", reason),
            }

            match resolve_color(&mut change, &color_lookup) {
                Resolution::Resolved => {}
                Resolution::Pending(reason) => debug!("Colored data pending: {}", reason),
                Resolution::Failed(reason) => warn!("Colored data unresolved: {}", reason),
            }

            changes.push(change);
        }

        Ok(changes)
    }
}
