use bitcoincore_rpc::bitcoin::{Script, ScriptBuf};
use indexer_util::{ScriptId, ToScriptId, parse_script_id};
use std::fmt;
use std::str::FromStr;

/// Scripts longer than this are keyed by their hash, the raw script then
/// travels with each record instead of in the key.
pub const MAX_SCRIPT_SIZE: usize = 512;

const SCRIPT_HASH_PREFIX: &str = "h$";
const WALLET_PREFIX: &str = "w$";

/// Subject of a balance history: a script, the hash of an oversized script,
/// or a wallet grouping several scripts.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum BalanceId {
    Script(ScriptBuf),
    ScriptHash(ScriptId),
    Wallet(String),
}

impl BalanceId {
    pub fn from_script(script: &Script) -> Self {
        if script.len() > MAX_SCRIPT_SIZE {
            BalanceId::ScriptHash(script.to_script_id())
        } else {
            BalanceId::Script(script.to_owned())
        }
    }

    pub fn from_wallet(wallet_id: &str) -> Self {
        BalanceId::Wallet(wallet_id.to_string())
    }

    pub fn wallet_id(&self) -> Option<&str> {
        match self {
            BalanceId::Wallet(id) => Some(id),
            _ => None,
        }
    }

    /// Script carried by the id itself. Hashed ids and wallets have none.
    pub fn extract_script(&self) -> Option<&Script> {
        match self {
            BalanceId::Script(script) => Some(script.as_script()),
            _ => None,
        }
    }

    pub fn partition_key(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for BalanceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BalanceId::Script(script) => write!(f, "{}", script.to_hex_string()),
            BalanceId::ScriptHash(id) => write!(f, "{}{}", SCRIPT_HASH_PREFIX, id),
            BalanceId::Wallet(id) => write!(f, "{}{}", WALLET_PREFIX, id),
        }
    }
}

impl FromStr for BalanceId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if let Some(wallet_id) = s.strip_prefix(WALLET_PREFIX) {
            if wallet_id.is_empty() {
                let msg = format!("Invalid balance id {}: empty wallet id", s);
                error!("{}", msg);
                return Err(msg);
            }
            return Ok(BalanceId::Wallet(wallet_id.to_string()));
        }

        if let Some(hash) = s.strip_prefix(SCRIPT_HASH_PREFIX) {
            let id = parse_script_id(hash).map_err(|e| {
                let msg = format!("Invalid balance id {}: {}", s, e);
                error!("{}", msg);
                msg
            })?;
            return Ok(BalanceId::ScriptHash(id));
        }

        let script = ScriptBuf::from_hex(s).map_err(|e| {
            let msg = format!("Invalid balance id {}: {}", s, e);
            error!("{}", msg);
            msg
        })?;

        if script.len() > MAX_SCRIPT_SIZE {
            let msg = format!(
                "Invalid balance id: script of {} bytes must be keyed by hash",
                script.len()
            );
            error!("{}", msg);
            return Err(msg);
        }

        Ok(BalanceId::Script(script))
    }
}
