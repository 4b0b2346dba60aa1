use bitcoincore_rpc::bitcoin::hashes::{self, Hash, hash160};
use bitcoincore_rpc::bitcoin::{Script, ScriptBuf};
use std::str::FromStr;

hashes::hash_newtype! {
    /// Compact identity of a script too large to be used verbatim as a subject key.
    pub struct ScriptId(hash160::Hash);
}

pub trait ToScriptId {
    fn to_script_id(&self) -> ScriptId;
}

impl ToScriptId for Script {
    fn to_script_id(&self) -> ScriptId {
        ScriptId::from_byte_array(hash160::Hash::hash(self.as_bytes()).to_byte_array())
    }
}

impl ToScriptId for ScriptBuf {
    fn to_script_id(&self) -> ScriptId {
        self.as_script().to_script_id()
    }
}

pub fn parse_script_id(s: &str) -> Result<ScriptId, String> {
    ScriptId::from_str(s).map_err(|e| format!("Invalid script id {}: {}", s, e))
}
