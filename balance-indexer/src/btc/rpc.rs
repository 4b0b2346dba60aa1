use super::client::BTCClient;
use bitcoincore_rpc::bitcoin::block::Header;
use bitcoincore_rpc::bitcoin::{Block, BlockHash};
use bitcoincore_rpc::{Auth, Client, RpcApi};
use std::sync::{Arc, RwLock};

/// bitcoind JSON-RPC client. The underlying connection is created on first
/// use and recreated after a transport error, since a restarted node writes
/// a new auth cookie.
pub struct BTCRpcClient {
    rpc_url: String,
    auth: Auth,
    client: RwLock<Option<Arc<Client>>>,
}

impl BTCRpcClient {
    pub fn new(rpc_url: String, auth: Auth) -> Self {
        Self {
            rpc_url,
            auth,
            client: RwLock::new(None),
        }
    }

    fn update_client(&self) -> Result<Arc<Client>, String> {
        let new_client = Client::new(&self.rpc_url, self.auth.clone()).map_err(|e| {
            let msg = format!("Failed to create BTC RPC client for {}: {}", self.rpc_url, e);
            error!("{}", msg);
            msg
        })?;

        let client = Arc::new(new_client);
        *self.client.write().unwrap() = Some(client.clone());

        info!("BTC RPC client connected to {}", self.rpc_url);
        Ok(client)
    }

    fn client(&self) -> Result<Arc<Client>, String> {
        if let Some(client) = &*self.client.read().unwrap() {
            return Ok(client.clone());
        }

        self.update_client()
    }

    fn on_error(&self, method: &str, error: bitcoincore_rpc::Error) -> String {
        if let bitcoincore_rpc::Error::JsonRpc(bitcoincore_rpc::jsonrpc::Error::Transport(_)) =
            &error
        {
            if matches!(self.auth, Auth::CookieFile(_)) {
                warn!("Transport error on {}, reloading auth cookie", method);
                let _ = self.update_client();
            }
        }

        let msg = format!("{} failed: {}", method, error);
        error!("{}", msg);
        msg
    }
}

impl BTCClient for BTCRpcClient {
    fn init(&self) -> Result<(), String> {
        let height = self.get_latest_block_height()?;
        info!("BTC RPC client initialized, latest block height: {}", height);

        Ok(())
    }

    fn stop(&self) -> Result<(), String> {
        self.client.write().unwrap().take();
        info!("BTC RPC client stopped.");

        Ok(())
    }

    fn get_latest_block_height(&self) -> Result<u64, String> {
        self.client()?
            .get_block_count()
            .map_err(|e| self.on_error("get_block_count", e))
    }

    fn get_block_hash(&self, block_height: u64) -> Result<BlockHash, String> {
        self.client()?
            .get_block_hash(block_height)
            .map_err(|e| self.on_error("get_block_hash", e))
    }

    fn get_block_header(&self, block_hash: &BlockHash) -> Result<Header, String> {
        self.client()?
            .get_block_header(block_hash)
            .map_err(|e| self.on_error("get_block_header", e))
    }

    fn get_block_by_hash(&self, block_hash: &BlockHash) -> Result<Block, String> {
        self.client()?
            .get_block(block_hash)
            .map_err(|e| self.on_error("get_block", e))
    }
}
