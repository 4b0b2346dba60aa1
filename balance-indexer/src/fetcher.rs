use crate::btc::BTCClientRef;
use crate::chain::ChainView;
use crate::checkpoint::{Checkpoint, CheckpointRepository};
use bitcoincore_rpc::bitcoin::{Block, BlockHash};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

#[derive(Debug, Clone)]
pub struct FetchedBlock {
    pub height: u32,
    pub block_id: BlockHash,
    pub block: Block,
}

/// Blocks until everything produced from the blocks yielded so far is
/// durably written, so a checkpoint never runs ahead of the data.
pub trait SaveBarrier: Send + Sync {
    fn wait(&self) -> Result<(), String>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetcherState {
    PositionedAtFork { fork_height: u32 },
    Streaming,
    Exhausted,
}

/// Streams main chain blocks after a checkpoint, one at a time, and moves the
/// checkpoint forward as the consumer asks for the next block.
pub struct BlockFetcher<'a> {
    chain: &'a dyn ChainView,
    client: BTCClientRef,
    repository: CheckpointRepository,
    checkpoint: Checkpoint,

    from_height: u32,
    to_height: u32,
    next_height: u32,
    end_height: u32,
    state: FetcherState,

    last_yielded: Option<u32>,
    last_saved: Option<u32>,
    last_save_time: Instant,
    save_interval: Duration,
    disable_save: bool,
    barrier: Option<Arc<dyn SaveBarrier>>,
    cancel: Arc<AtomicBool>,
}

impl<'a> BlockFetcher<'a> {
    pub fn new(
        checkpoint: Checkpoint,
        repository: CheckpointRepository,
        client: BTCClientRef,
        chain: &'a dyn ChainView,
        from_height: u32,
        to_height: u32,
    ) -> Result<Self, String> {
        if from_height > to_height {
            let msg = format!(
                "Invalid fetch range: from height {} is above to height {}",
                from_height, to_height
            );
            error!("{}", msg);
            return Err(msg);
        }

        let fork_height = chain.find_fork(&checkpoint.locator).unwrap_or(0);
        info!(
            "Checkpoint {} loaded, fork with main chain at height {}",
            checkpoint.name, fork_height
        );

        Ok(Self {
            chain,
            client,
            repository,
            checkpoint,
            from_height,
            to_height,
            next_height: 0,
            end_height: 0,
            state: FetcherState::PositionedAtFork { fork_height },
            last_yielded: None,
            last_saved: None,
            last_save_time: Instant::now(),
            save_interval: Duration::from_secs(15 * 60),
            disable_save: false,
            barrier: None,
            cancel: Arc::new(AtomicBool::new(false)),
        })
    }

    pub fn with_save_interval(mut self, interval: Duration) -> Self {
        self.save_interval = interval;
        self
    }

    pub fn with_disable_save(mut self, disable: bool) -> Self {
        self.disable_save = disable;
        self
    }

    pub fn with_barrier(mut self, barrier: Arc<dyn SaveBarrier>) -> Self {
        self.barrier = Some(barrier);
        self
    }

    pub fn with_cancel(mut self, cancel: Arc<AtomicBool>) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn state(&self) -> FetcherState {
        self.state
    }

    pub fn checkpoint(&self) -> &Checkpoint {
        &self.checkpoint
    }

    // Heights this fetcher will yield, inclusive. Empty when start > end.
    pub fn range(&self) -> (u32, u32) {
        match self.state {
            FetcherState::PositionedAtFork { fork_height } => self.compute_range(fork_height),
            _ => (self.next_height, self.end_height),
        }
    }

    fn compute_range(&self, fork_height: u32) -> (u32, u32) {
        let start = fork_height.saturating_add(1).max(self.from_height);
        let end = self.chain.tip_height().min(self.to_height);
        (start, end)
    }

    fn save_at(&mut self, height: u32) -> Result<(), String> {
        if self.disable_save {
            return Ok(());
        }

        if let Some(barrier) = &self.barrier {
            barrier.wait()?;
        }

        self.checkpoint.locator = self.chain.locator_at(height);
        self.checkpoint.height = height;
        self.repository.save_checkpoint(&self.checkpoint)?;

        self.last_saved = Some(height);
        self.last_save_time = Instant::now();
        info!("Checkpoint {} moved to height {}", self.checkpoint.name, height);
        Ok(())
    }

    // The consumer is done with the previous block when it asks for the next
    fn save_if_needed(&mut self, cancelled: bool) -> Result<(), String> {
        let Some(height) = self.last_yielded else {
            return Ok(());
        };
        if self.last_saved == Some(height) {
            return Ok(());
        }

        let is_last = height >= self.end_height;
        if is_last || cancelled || self.last_save_time.elapsed() >= self.save_interval {
            self.save_at(height)?;
        }

        Ok(())
    }

    fn fetch(&self, height: u32) -> Result<FetchedBlock, String> {
        let block_id = self.chain.hash_at(height).ok_or_else(|| {
            let msg = format!("Main chain has no block at height {}", height);
            error!("{}", msg);
            msg
        })?;

        let block = self.client.get_block_by_hash(&block_id)?;
        if block.block_hash() != block_id {
            let msg = format!(
                "Node returned block {} for requested block {} at height {}",
                block.block_hash(),
                block_id,
                height
            );
            error!("{}", msg);
            return Err(msg);
        }

        Ok(FetchedBlock {
            height,
            block_id,
            block,
        })
    }
}

impl Iterator for BlockFetcher<'_> {
    type Item = Result<FetchedBlock, String>;

    fn next(&mut self) -> Option<Self::Item> {
        if let FetcherState::PositionedAtFork { fork_height } = self.state {
            let (start, end) = self.compute_range(fork_height);
            self.next_height = start;
            self.end_height = end;
            self.state = FetcherState::Streaming;
            info!(
                "Fetching blocks {} to {} for {}",
                start, end, self.checkpoint.name
            );
        }

        if self.state == FetcherState::Exhausted {
            return None;
        }

        let cancelled = self.cancel.load(Ordering::SeqCst);
        if let Err(e) = self.save_if_needed(cancelled) {
            self.state = FetcherState::Exhausted;
            return Some(Err(e));
        }

        if cancelled {
            info!(
                "Fetching for {} cancelled before height {}",
                self.checkpoint.name, self.next_height
            );
            self.state = FetcherState::Exhausted;
            return None;
        }

        if self.next_height > self.end_height {
            self.state = FetcherState::Exhausted;
            return None;
        }

        match self.fetch(self.next_height) {
            Ok(block) => {
                self.last_yielded = Some(self.next_height);
                self.next_height += 1;
                Some(Ok(block))
            }
            Err(e) => {
                self.state = FetcherState::Exhausted;
                Some(Err(e))
            }
        }
    }
}
