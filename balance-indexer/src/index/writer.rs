use crate::balance::BalanceRow;
use crate::config::SyncConfig;
use crate::db::{BalanceStore, BlockStore, IndexStoreRef, TransactionStore};
use crate::fetcher::SaveBarrier;
use bitcoincore_rpc::bitcoin::{Block, Transaction};
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::mpsc::{Receiver, SyncSender, sync_channel};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

const RETRY_BACKOFF_MS: u64 = 100;

#[derive(Debug, Clone)]
pub enum WriteJob {
    Balances(Vec<BalanceRow>),
    Transactions(Vec<Transaction>),
    Blocks(Vec<Block>),
}

impl WriteJob {
    pub fn len(&self) -> usize {
        match self {
            WriteJob::Balances(rows) => rows.len(),
            WriteJob::Transactions(txs) => txs.len(),
            WriteJob::Blocks(blocks) => blocks.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// One atomic write. Batches with the same partition are committed in the
/// order they were enqueued.
#[derive(Debug, Clone)]
pub struct RowBatch {
    pub partition: String,
    pub job: WriteJob,
}

impl RowBatch {
    pub fn new(partition: String, job: WriteJob) -> Self {
        Self { partition, job }
    }
}

#[derive(Default)]
struct PendingState {
    pending: usize,
    first_error: Option<String>,
}

#[derive(Default)]
struct Pending {
    state: Mutex<PendingState>,
    cond: Condvar,
}

impl Pending {
    fn add(&self) {
        self.state.lock().unwrap().pending += 1;
    }

    fn complete(&self, ret: Result<(), String>) {
        let mut state = self.state.lock().unwrap();
        state.pending -= 1;
        if let Err(e) = ret {
            if state.first_error.is_none() {
                state.first_error = Some(e);
            }
        }

        if state.pending == 0 {
            self.cond.notify_all();
        }
    }
}

/// Writer threads draining bounded per-thread queues into the store.
/// Producers block while the target queue is full.
pub struct BalanceWriterPool {
    senders: Mutex<Option<Vec<SyncSender<RowBatch>>>>,
    handles: Mutex<Vec<JoinHandle<()>>>,
    pending: Arc<Pending>,
}

impl BalanceWriterPool {
    pub fn new(store: IndexStoreRef, config: &SyncConfig) -> Self {
        let threads = config.writer_threads.max(1);
        let capacity = config.queue_capacity.max(1);
        let retries = config.write_retries;

        let pending = Arc::new(Pending::default());
        let mut senders = Vec::with_capacity(threads);
        let mut handles = Vec::with_capacity(threads);

        for i in 0..threads {
            let (tx, rx) = sync_channel::<RowBatch>(capacity);
            let store = store.clone();
            let pending = pending.clone();
            let handle = std::thread::Builder::new()
                .name(format!("balance-writer-{}", i))
                .spawn(move || Self::run_writer(rx, store, pending, retries));

            match handle {
                Ok(handle) => {
                    senders.push(tx);
                    handles.push(handle);
                }
                Err(e) => {
                    error!("Failed to spawn writer thread {}: {}", i, e);
                }
            }
        }

        info!(
            "Writer pool started with {} threads, queue capacity {}",
            handles.len(),
            capacity
        );

        Self {
            senders: Mutex::new(Some(senders)),
            handles: Mutex::new(handles),
            pending,
        }
    }

    fn run_writer(rx: Receiver<RowBatch>, store: IndexStoreRef, pending: Arc<Pending>, retries: u32) {
        for batch in rx {
            let ret = Self::write_with_retry(&store, &batch, retries);
            pending.complete(ret);
        }
    }

    fn write_with_retry(store: &IndexStoreRef, batch: &RowBatch, retries: u32) -> Result<(), String> {
        let mut attempt = 0;
        loop {
            match Self::execute(store, &batch.job) {
                Ok(()) => return Ok(()),
                Err(e) if attempt < retries => {
                    attempt += 1;
                    warn!(
                        "Write of {} failed, retry {}/{}: {}",
                        batch.partition, attempt, retries, e
                    );
                    std::thread::sleep(Duration::from_millis(RETRY_BACKOFF_MS * attempt as u64));
                }
                Err(e) => {
                    let msg = format!(
                        "Write of {} failed after {} retries: {}",
                        batch.partition, retries, e
                    );
                    error!("{}", msg);
                    return Err(msg);
                }
            }
        }
    }

    fn execute(store: &IndexStoreRef, job: &WriteJob) -> Result<(), String> {
        match job {
            WriteJob::Balances(rows) => store.put_balance_rows(rows),
            WriteJob::Transactions(txs) => store.put_transactions(txs),
            WriteJob::Blocks(blocks) => store.put_blocks(blocks),
        }
    }

    fn route(partition: &str, writers: usize) -> usize {
        let mut hasher = DefaultHasher::new();
        partition.hash(&mut hasher);
        (hasher.finish() % writers as u64) as usize
    }

    pub fn enqueue(&self, batch: RowBatch) -> Result<(), String> {
        if batch.job.is_empty() {
            return Ok(());
        }

        let sender = {
            let senders = self.senders.lock().unwrap();
            let senders = match senders.as_ref() {
                Some(senders) if !senders.is_empty() => senders,
                _ => {
                    let msg = "Writer pool is shut down".to_string();
                    error!("{}", msg);
                    return Err(msg);
                }
            };
            senders[Self::route(&batch.partition, senders.len())].clone()
        };

        // Blocks while the writer's queue is full
        self.pending.add();
        sender.send(batch).map_err(|e| {
            self.pending.complete(Ok(()));
            let msg = format!("Writer thread for {} exited", e.0.partition);
            error!("{}", msg);
            msg
        })
    }

    pub fn pending_count(&self) -> usize {
        self.pending.state.lock().unwrap().pending
    }

    /// Closes the queues and joins the writer threads after they drain.
    pub fn shutdown(&self) {
        let senders = self.senders.lock().unwrap().take();
        drop(senders);

        let handles: Vec<JoinHandle<()>> = self.handles.lock().unwrap().drain(..).collect();
        for handle in handles {
            if handle.join().is_err() {
                error!("Writer thread panicked");
            }
        }
    }
}

impl SaveBarrier for BalanceWriterPool {
    // Waits for every enqueued batch and reports the first failed one
    fn wait(&self) -> Result<(), String> {
        let mut state = self.pending.state.lock().unwrap();
        while state.pending > 0 {
            state = self.pending.cond.wait(state).unwrap();
        }

        match &state.first_error {
            Some(e) => Err(e.clone()),
            None => Ok(()),
        }
    }
}

impl Drop for BalanceWriterPool {
    fn drop(&mut self) {
        self.shutdown();
    }
}
