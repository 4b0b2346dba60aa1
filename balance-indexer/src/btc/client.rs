use bitcoincore_rpc::bitcoin::block::Header;
use bitcoincore_rpc::bitcoin::{Block, BlockHash};
use std::sync::Arc;

/// Source of blocks and headers, usually a bitcoind node.
pub trait BTCClient: Send + Sync {
    fn init(&self) -> Result<(), String>;
    fn stop(&self) -> Result<(), String>;

    fn get_latest_block_height(&self) -> Result<u64, String>;
    fn get_block_hash(&self, block_height: u64) -> Result<BlockHash, String>;
    fn get_block_header(&self, block_hash: &BlockHash) -> Result<Header, String>;
    fn get_block_by_hash(&self, block_hash: &BlockHash) -> Result<Block, String>;
}

pub type BTCClientRef = Arc<Box<dyn BTCClient>>;
