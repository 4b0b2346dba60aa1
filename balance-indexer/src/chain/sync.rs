use super::view::ChainView;
use crate::db::{ChainStore, IndexStoreRef};
use crate::output::IndexOutputRef;
use bitcoincore_rpc::bitcoin::block::Header;
use bitcoincore_rpc::bitcoin::consensus::encode;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

pub const BLOCK_HEADERS_PER_ROW: usize = 6;

// Chain rows per atomic write
pub const CHAIN_BATCH_SIZE: usize = 100;

const HEADER_SIZE: usize = 80;

/// Up to [`BLOCK_HEADERS_PER_ROW`] consecutive headers starting at height
/// `chain_offset`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChainPartEntry {
    pub chain_offset: u32,
    pub headers: Vec<Header>,
}

impl ChainPartEntry {
    pub fn new(chain_offset: u32) -> Self {
        Self {
            chain_offset,
            headers: Vec::with_capacity(BLOCK_HEADERS_PER_ROW),
        }
    }

    pub fn last_height(&self) -> u32 {
        self.chain_offset + self.headers.len().saturating_sub(1) as u32
    }

    pub fn make_key(&self) -> [u8; 4] {
        self.chain_offset.to_be_bytes()
    }

    // Value format: consensus encoded headers back to back
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut data = Vec::with_capacity(self.headers.len() * HEADER_SIZE);
        for header in self.headers.iter() {
            data.extend_from_slice(&encode::serialize(header));
        }
        data
    }

    pub fn from_bytes(chain_offset: u32, data: &[u8]) -> Result<Self, String> {
        if data.is_empty()
            || data.len() % HEADER_SIZE != 0
            || data.len() / HEADER_SIZE > BLOCK_HEADERS_PER_ROW
        {
            let msg = format!(
                "Invalid chain part at offset {}: length {}",
                chain_offset,
                data.len()
            );
            error!("{}", msg);
            return Err(msg);
        }

        let mut part = Self::new(chain_offset);
        for chunk in data.chunks(HEADER_SIZE) {
            let header: Header = encode::deserialize(chunk).map_err(|e| {
                let msg = format!("Invalid header in chain part at offset {}: {}", chain_offset, e);
                error!("{}", msg);
                msg
            })?;
            part.headers.push(header);
        }

        Ok(part)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChainSyncOutcome {
    // The stored chain is ahead of the input, nothing written
    InputBehind { stored_height: u32, input_tip: u32 },

    UpToDate { tip: u32 },

    Indexed { from: u32, to: u32 },

    // Stopped between batches, rows up to `next_height - 1` are written
    Cancelled { next_height: u32 },
}

/// Persists a header chain as 6-header rows, writing only what changed since
/// the last pass.
pub struct ChainSyncDriver {
    store: IndexStoreRef,
    output: Option<IndexOutputRef>,
    cancel: Arc<AtomicBool>,
}

enum StoredPosition {
    Ahead(u32),
    Fork(Option<u32>),
}

impl ChainSyncDriver {
    pub fn new(store: IndexStoreRef, cancel: Arc<AtomicBool>) -> Self {
        Self {
            store,
            output: None,
            cancel,
        }
    }

    pub fn with_output(mut self, output: IndexOutputRef) -> Self {
        self.output = Some(output);
        self
    }

    pub fn index_chain(&self, chain: &dyn ChainView) -> Result<ChainSyncOutcome, String> {
        let tip = chain.tip_height();

        let fork = match self.find_stored_fork(chain, tip)? {
            StoredPosition::Ahead(stored_height) => {
                info!(
                    "Stored chain at height {} is ahead of input chain at {}, skipping",
                    stored_height, tip
                );
                return Ok(ChainSyncOutcome::InputBehind {
                    stored_height,
                    input_tip: tip,
                });
            }
            StoredPosition::Fork(fork) => fork,
        };

        let start = match fork {
            Some(fork) => {
                if fork + 1 > tip {
                    info!("Stored chain is up to date at height {}", tip);
                    return Ok(ChainSyncOutcome::UpToDate { tip });
                }
                fork + 1
            }
            None => {
                info!("No common stored chain, indexing the chain from height 0");
                0
            }
        };

        self.write_chain(chain, start, tip)
    }

    // Walks stored headers from the highest down until one is on `chain`
    fn find_stored_fork(&self, chain: &dyn ChainView, tip: u32) -> Result<StoredPosition, String> {
        let mut before = None;
        let mut latest_checked = false;

        loop {
            let parts = self.store.get_chain_parts_desc(before, CHAIN_BATCH_SIZE)?;
            if parts.is_empty() {
                return Ok(StoredPosition::Fork(None));
            }

            for part in parts.iter() {
                for (i, header) in part.headers.iter().enumerate().rev() {
                    let height = part.chain_offset + i as u32;
                    if !latest_checked {
                        latest_checked = true;
                        if height > tip {
                            return Ok(StoredPosition::Ahead(height));
                        }
                    }

                    if chain.hash_at(height) == Some(header.block_hash()) {
                        return Ok(StoredPosition::Fork(Some(height)));
                    }
                }

                before = Some(part.chain_offset);
            }
        }
    }

    fn write_chain(
        &self,
        chain: &dyn ChainView,
        start: u32,
        tip: u32,
    ) -> Result<ChainSyncOutcome, String> {
        let from = start - start % BLOCK_HEADERS_PER_ROW as u32;
        info!("Indexing chain headers from {} to {}", from, tip);

        if let Some(output) = &self.output {
            output.update_total(tip as u64 + 1);
            output.update_current(from as u64);
            output.set_message("Indexing chain headers");
        }

        let mut batch = Vec::with_capacity(CHAIN_BATCH_SIZE);
        let mut part = ChainPartEntry::new(from);
        for height in from..=tip {
            let header = chain.header_at(height).ok_or_else(|| {
                let msg = format!("Input chain has no header at height {}", height);
                error!("{}", msg);
                msg
            })?;
            part.headers.push(header);

            if part.headers.len() == BLOCK_HEADERS_PER_ROW || height == tip {
                batch.push(std::mem::replace(&mut part, ChainPartEntry::new(height + 1)));
            }

            if batch.len() == CHAIN_BATCH_SIZE || (height == tip && !batch.is_empty()) {
                self.store.put_chain_parts(&batch)?;
                let written = batch[batch.len() - 1].last_height();
                batch.clear();

                debug!("Chain headers written up to {} of {}", written, tip);
                if let Some(output) = &self.output {
                    output.update_current(written as u64 + 1);
                }

                if written < tip && self.cancel.load(Ordering::SeqCst) {
                    info!("Chain indexing cancelled at height {}", written + 1);
                    return Ok(ChainSyncOutcome::Cancelled {
                        next_height: written + 1,
                    });
                }
            }
        }

        info!("Chain headers indexed from {} to {}", from, tip);
        Ok(ChainSyncOutcome::Indexed { from, to: tip })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::view::Chain;
    use crate::db::MemoryStore;
    use crate::test_util::*;

    fn driver(store: &Arc<MemoryStore>) -> ChainSyncDriver {
        ChainSyncDriver::new(store.clone(), Arc::new(AtomicBool::new(false)))
    }

    #[test]
    fn test_chain_part_bytes() {
        let headers = test_headers(4, 1);
        let part = ChainPartEntry {
            chain_offset: 6,
            headers: headers.clone(),
        };
        assert_eq!(part.last_height(), 9);

        let decoded = ChainPartEntry::from_bytes(6, &part.to_bytes()).unwrap();
        assert_eq!(decoded, part);

        assert!(ChainPartEntry::from_bytes(6, &[]).is_err());
        assert!(ChainPartEntry::from_bytes(6, &[0u8; 81]).is_err());
        assert!(ChainPartEntry::from_bytes(6, &[0u8; 80 * 7]).is_err());
    }

    #[test]
    fn test_index_chain_then_no_op() {
        let store = Arc::new(MemoryStore::new());
        let chain = Chain::from_headers(test_headers(20, 1)).unwrap();

        let outcome = driver(&store).index_chain(&chain).unwrap();
        assert_eq!(outcome, ChainSyncOutcome::Indexed { from: 0, to: 19 });
        assert_eq!(store.chain_part_count(), 4);

        // Same chain again, zero writes
        let writes = store.write_count();
        let outcome = driver(&store).index_chain(&chain).unwrap();
        assert_eq!(outcome, ChainSyncOutcome::UpToDate { tip: 19 });
        assert_eq!(store.write_count(), writes);

        // A shorter chain is behind the stored one
        let short = Chain::from_headers(test_headers(10, 1)).unwrap();
        let outcome = driver(&store).index_chain(&short).unwrap();
        assert_eq!(
            outcome,
            ChainSyncOutcome::InputBehind {
                stored_height: 19,
                input_tip: 9
            }
        );
        assert_eq!(store.write_count(), writes);
    }

    #[test]
    fn test_index_chain_rewrites_from_fork() {
        let store = Arc::new(MemoryStore::new());
        let base = test_headers(20, 1);
        let chain = Chain::from_headers(base.clone()).unwrap();
        driver(&store).index_chain(&chain).unwrap();

        // Fork after height 13, new branch reaches 24
        let fork = test_fork(&base, 14, 11, 2);
        let forked = Chain::from_headers(fork.clone()).unwrap();
        let outcome = driver(&store).index_chain(&forked).unwrap();
        assert_eq!(outcome, ChainSyncOutcome::Indexed { from: 12, to: 24 });

        let parts = store.get_chain_parts_desc(None, 10).unwrap();
        assert_eq!(parts[0].chain_offset, 24);
        assert_eq!(parts[0].headers, vec![fork[24]]);
        let part12 = parts.iter().find(|p| p.chain_offset == 12).unwrap();
        assert_eq!(part12.headers[..], fork[12..18]);
    }

    #[test]
    fn test_index_chain_batches_and_cancel() {
        let store = Arc::new(MemoryStore::new());
        let chain = Chain::from_headers(test_headers(700, 1)).unwrap();

        // 117 rows: two batches, cancel after the first one
        let cancel = Arc::new(AtomicBool::new(true));
        let outcome = ChainSyncDriver::new(store.clone(), cancel.clone())
            .index_chain(&chain)
            .unwrap();
        assert_eq!(outcome, ChainSyncOutcome::Cancelled { next_height: 600 });
        assert_eq!(store.chain_part_count(), 100);
        assert_eq!(store.write_count(), 1);

        cancel.store(false, Ordering::SeqCst);
        let outcome = ChainSyncDriver::new(store.clone(), cancel)
            .index_chain(&chain)
            .unwrap();
        assert_eq!(outcome, ChainSyncOutcome::Indexed { from: 600, to: 699 });
        assert_eq!(store.chain_part_count(), 117);
    }
}
