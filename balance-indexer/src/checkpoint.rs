use crate::db::{CheckpointStore, IndexStoreRef};
use bitcoincore_rpc::bitcoin::blockdata::constants::genesis_block;
use bitcoincore_rpc::bitcoin::consensus::encode;
use bitcoincore_rpc::bitcoin::{BlockHash, Network};
use std::fmt;
use std::str::FromStr;

/// Sparse list of block hashes, densest near the tip, used to find where a
/// stored position meets the current chain.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct BlockLocator {
    pub blocks: Vec<BlockHash>,
}

impl BlockLocator {
    pub fn new(blocks: Vec<BlockHash>) -> Self {
        Self { blocks }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Checkpoint {
    pub name: String,
    pub locator: BlockLocator,
    pub height: u32,
}

impl Checkpoint {
    /// Position before any block was processed: only the network genesis.
    pub fn genesis(name: &str, network: Network) -> Self {
        let genesis_hash = genesis_block(network).block_hash();
        Self {
            name: name.to_string(),
            locator: BlockLocator::new(vec![genesis_hash]),
            height: 0,
        }
    }

    // Value format: height (u32 BE) + consensus encoded locator hashes
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut data = Vec::with_capacity(4 + 1 + self.locator.blocks.len() * 32);
        data.extend_from_slice(&self.height.to_be_bytes());
        data.extend_from_slice(&encode::serialize(&self.locator.blocks));
        data
    }

    pub fn from_bytes(name: &str, data: &[u8]) -> Result<Self, String> {
        if data.len() < 4 {
            let msg = format!("Invalid checkpoint {} value length {}", name, data.len());
            error!("{}", msg);
            return Err(msg);
        }

        let height = u32::from_be_bytes([data[0], data[1], data[2], data[3]]);
        let blocks: Vec<BlockHash> = encode::deserialize(&data[4..]).map_err(|e| {
            let msg = format!("Invalid checkpoint {} locator: {}", name, e);
            error!("{}", msg);
            msg
        })?;

        Ok(Self {
            name: name.to_string(),
            locator: BlockLocator::new(blocks),
            height,
        })
    }
}

/// The checkpointed index streams.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IndexerCheckpoint {
    Blocks,
    Transactions,
    Balances,
    Wallets,
}

impl IndexerCheckpoint {
    pub fn as_str(&self) -> &'static str {
        match self {
            IndexerCheckpoint::Blocks => "blocks",
            IndexerCheckpoint::Transactions => "transactions",
            IndexerCheckpoint::Balances => "balances",
            IndexerCheckpoint::Wallets => "wallets",
        }
    }
}

impl fmt::Display for IndexerCheckpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for IndexerCheckpoint {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "blocks" => Ok(IndexerCheckpoint::Blocks),
            "transactions" => Ok(IndexerCheckpoint::Transactions),
            "balances" => Ok(IndexerCheckpoint::Balances),
            "wallets" => Ok(IndexerCheckpoint::Wallets),
            _ => {
                let msg = format!("Unknown checkpoint stream {}", s);
                error!("{}", msg);
                Err(msg)
            }
        }
    }
}

/// Loads and stores checkpoints of one checkpoint set. In ignore mode every
/// lookup returns a fresh genesis checkpoint and storage is left untouched
/// on read.
#[derive(Clone)]
pub struct CheckpointRepository {
    store: IndexStoreRef,
    set_name: String,
    network: Network,
    ignore: bool,
}

impl CheckpointRepository {
    pub fn new(store: IndexStoreRef, set_name: &str, network: Network) -> Self {
        let set_name = if set_name.trim().is_empty() {
            indexer_util::DEFAULT_CHECKPOINT_SET
        } else {
            set_name
        };

        Self {
            store,
            set_name: set_name.to_string(),
            network,
            ignore: false,
        }
    }

    pub fn with_ignore(mut self, ignore: bool) -> Self {
        self.ignore = ignore;
        self
    }

    pub fn set_name(&self) -> &str {
        &self.set_name
    }

    pub fn network(&self) -> Network {
        self.network
    }

    fn make_key(&self, name: &str) -> String {
        format!("{}/{}", self.set_name, name)
    }

    pub fn get_checkpoint(&self, name: &str) -> Result<Checkpoint, String> {
        if name.is_empty() {
            let msg = "Checkpoint name must not be empty".to_string();
            error!("{}", msg);
            return Err(msg);
        }

        if self.ignore {
            return Ok(Checkpoint::genesis(name, self.network));
        }

        match self.store.get_checkpoint_value(&self.make_key(name))? {
            Some(data) => Checkpoint::from_bytes(name, &data),
            None => Ok(Checkpoint::genesis(name, self.network)),
        }
    }

    pub fn save_checkpoint(&self, checkpoint: &Checkpoint) -> Result<(), String> {
        if checkpoint.name.is_empty() {
            let msg = "Checkpoint name must not be empty".to_string();
            error!("{}", msg);
            return Err(msg);
        }

        self.store
            .put_checkpoint_value(&self.make_key(&checkpoint.name), &checkpoint.to_bytes())?;
        debug!(
            "Checkpoint {}/{} saved at height {}",
            self.set_name, checkpoint.name, checkpoint.height
        );

        Ok(())
    }
}
