use crate::btc::BTCClient;
use crate::checkpoint::BlockLocator;
use bitcoincore_rpc::bitcoin::BlockHash;
use bitcoincore_rpc::bitcoin::block::Header;
use std::collections::HashMap;

// Locator entries taken one by one from the tip before the step starts doubling
const LOCATOR_DENSE_ENTRIES: usize = 10;

/// Read access to a chain of headers, height 0 first.
pub trait ChainView: Send + Sync {
    fn tip_height(&self) -> u32;
    fn header_at(&self, height: u32) -> Option<Header>;
    fn hash_at(&self, height: u32) -> Option<BlockHash>;
    fn height_of(&self, hash: &BlockHash) -> Option<u32>;

    fn tip_hash(&self) -> Option<BlockHash> {
        self.hash_at(self.tip_height())
    }

    /// Height of the first locator entry that is on this chain.
    fn find_fork(&self, locator: &BlockLocator) -> Option<u32> {
        locator.blocks.iter().find_map(|hash| self.height_of(hash))
    }

    /// Locator for the block at `height`: the latest heights one by one, then
    /// exponentially sparser, always ending with height 0.
    fn locator_at(&self, height: u32) -> BlockLocator {
        let mut blocks = Vec::new();
        let mut current = height.min(self.tip_height()) as i64;
        let mut step = 1i64;

        while current > 0 {
            if let Some(hash) = self.hash_at(current as u32) {
                blocks.push(hash);
            }
            if blocks.len() >= LOCATOR_DENSE_ENTRIES {
                step *= 2;
            }
            current -= step;
        }

        if let Some(genesis) = self.hash_at(0) {
            blocks.push(genesis);
        }

        BlockLocator::new(blocks)
    }
}

/// In-memory header chain, the local view of the node's main chain.
#[derive(Debug, Clone)]
pub struct Chain {
    headers: Vec<Header>,
    index: HashMap<BlockHash, u32>,
}

impl Chain {
    pub fn new(genesis: Header) -> Self {
        let mut index = HashMap::new();
        index.insert(genesis.block_hash(), 0);
        Self {
            headers: vec![genesis],
            index,
        }
    }

    /// Builds a chain from consecutive headers, height 0 first.
    pub fn from_headers(headers: Vec<Header>) -> Result<Self, String> {
        let mut iter = headers.into_iter();
        let genesis = iter.next().ok_or_else(|| {
            let msg = "Cannot build a chain without headers".to_string();
            error!("{}", msg);
            msg
        })?;

        let mut chain = Self::new(genesis);
        for header in iter {
            chain.push(header)?;
        }

        Ok(chain)
    }

    /// Appends a header that must extend the current tip.
    pub fn push(&mut self, header: Header) -> Result<u32, String> {
        let tip_hash = self.headers[self.headers.len() - 1].block_hash();
        if header.prev_blockhash != tip_hash {
            let msg = format!(
                "Header {} does not extend tip {} at height {}",
                header.block_hash(),
                tip_hash,
                self.tip_height()
            );
            error!("{}", msg);
            return Err(msg);
        }

        let height = self.headers.len() as u32;
        self.index.insert(header.block_hash(), height);
        self.headers.push(header);
        Ok(height)
    }

    /// Drops every header above `height`. Height 0 is always kept.
    pub fn truncate(&mut self, height: u32) {
        let keep = height as usize + 1;
        if keep >= self.headers.len() {
            return;
        }

        for header in self.headers.drain(keep..) {
            self.index.remove(&header.block_hash());
        }
    }

    /// Loads the node's main chain header by header.
    pub fn load_from_client(client: &dyn BTCClient) -> Result<Self, String> {
        let genesis_hash = client.get_block_hash(0)?;
        let genesis = client.get_block_header(&genesis_hash)?;

        let mut chain = Self::new(genesis);
        chain.sync_from_client(client)?;
        Ok(chain)
    }

    /// Brings the chain in line with the node: rewinds to the last height
    /// both agree on, then appends the node's headers up to its tip.
    /// Returns the new tip height.
    pub fn sync_from_client(&mut self, client: &dyn BTCClient) -> Result<u32, String> {
        let remote_tip = client.get_latest_block_height()? as u32;

        let mut common = self.tip_height().min(remote_tip);
        loop {
            let remote_hash = client.get_block_hash(common as u64)?;
            if self.hash_at(common) == Some(remote_hash) {
                break;
            }

            if common == 0 {
                let msg = format!("Node genesis {} does not match local chain", remote_hash);
                error!("{}", msg);
                return Err(msg);
            }
            common -= 1;
        }

        if common < self.tip_height() {
            warn!(
                "Local chain reorganized, rewinding from {} to {}",
                self.tip_height(),
                common
            );
            self.truncate(common);
        }

        for height in common + 1..=remote_tip {
            let hash = client.get_block_hash(height as u64)?;
            let header = client.get_block_header(&hash)?;
            self.push(header)?;

            if height % 10000 == 0 {
                info!("Chain synchronized up to height {}", height);
            }
        }

        info!("Chain loaded with height {}", self.tip_height());
        Ok(self.tip_height())
    }
}

impl ChainView for Chain {
    fn tip_height(&self) -> u32 {
        self.headers.len() as u32 - 1
    }

    fn header_at(&self, height: u32) -> Option<Header> {
        self.headers.get(height as usize).copied()
    }

    fn hash_at(&self, height: u32) -> Option<BlockHash> {
        self.headers.get(height as usize).map(|h| h.block_hash())
    }

    fn height_of(&self, hash: &BlockHash) -> Option<u32> {
        self.index.get(hash).copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::btc::mock::MockBTCClient;
    use crate::test_util::*;

    fn blocks_of(headers: &[Header]) -> Vec<bitcoincore_rpc::bitcoin::Block> {
        headers.iter().map(|h| test_block(*h, vec![])).collect()
    }

    #[test]
    fn test_chain_links_and_locator() {
        let headers = test_headers(40, 1);
        let chain = Chain::from_headers(headers.clone()).unwrap();
        assert_eq!(chain.tip_height(), 39);
        assert_eq!(chain.height_of(&headers[17].block_hash()), Some(17));

        let locator = chain.locator_at(39);
        assert_eq!(locator.blocks[0], headers[39].block_hash());
        assert_eq!(locator.blocks[9], headers[30].block_hash());
        assert_eq!(*locator.blocks.last().unwrap(), headers[0].block_hash());
        assert!(locator.blocks.len() < 20);
        assert_eq!(chain.find_fork(&locator), Some(39));

        // A header that does not extend the tip is rejected
        let mut broken = headers.clone();
        broken.swap(3, 4);
        assert!(Chain::from_headers(broken).is_err());
    }

    #[test]
    fn test_find_fork_on_other_branch() {
        let base = test_headers(20, 1);
        let fork = test_fork(&base, 12, 10, 2);
        let chain = Chain::from_headers(fork).unwrap();

        let old_tip = Chain::from_headers(base).unwrap().locator_at(19);
        assert_eq!(chain.find_fork(&old_tip), Some(11));

        let unknown = BlockLocator::new(vec![test_headers(3, 9)[2].block_hash()]);
        assert_eq!(chain.find_fork(&unknown), None);
    }

    #[test]
    fn test_sync_from_client_follows_reorg() {
        let base = test_headers(15, 1);
        let client = MockBTCClient::new(blocks_of(&base));

        let mut chain = Chain::load_from_client(&client).unwrap();
        assert_eq!(chain.tip_height(), 14);
        assert_eq!(chain.tip_hash(), Some(base[14].block_hash()));

        let fork = test_fork(&base, 10, 8, 3);
        client.set_blocks(blocks_of(&fork));
        assert_eq!(chain.sync_from_client(&client).unwrap(), 17);
        assert_eq!(chain.hash_at(9), Some(base[9].block_hash()));
        assert_eq!(chain.hash_at(10), Some(fork[10].block_hash()));
        assert_eq!(chain.height_of(&base[12].block_hash()), None);
    }
}
