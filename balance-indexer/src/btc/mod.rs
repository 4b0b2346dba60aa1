mod client;
mod rpc;

pub use client::*;
pub use rpc::*;

use crate::config::IndexerConfigRef;
use std::sync::Arc;

pub fn create_btc_rpc_client(config: &IndexerConfigRef) -> BTCClientRef {
    let rpc_url = config.btc.rpc_url();
    let auth = config.btc.auth();
    info!("Using bitcoind RPC at {}", rpc_url);

    let client = BTCRpcClient::new(rpc_url, auth);
    Arc::new(Box::new(client) as Box<dyn BTCClient>)
}
