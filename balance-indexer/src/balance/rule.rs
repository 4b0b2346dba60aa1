use bitcoincore_rpc::bitcoin::{Script, ScriptBuf};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Rule attaching a script to a wallet. `redeem_script` lets wallet records
/// annotate matching coins as script coins.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WalletRule {
    pub script_pubkey: ScriptBuf,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub redeem_script: Option<ScriptBuf>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub custom_data: Option<String>,
}

impl WalletRule {
    pub fn new(script_pubkey: ScriptBuf) -> Self {
        Self {
            script_pubkey,
            redeem_script: None,
            custom_data: None,
        }
    }

    pub fn with_redeem_script(mut self, redeem_script: ScriptBuf) -> Self {
        self.redeem_script = Some(redeem_script);
        self
    }

    pub fn with_custom_data(mut self, custom_data: &str) -> Self {
        self.custom_data = Some(custom_data.to_string());
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MatchLocation {
    Input,
    Output,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatchedRule {
    pub index: u32,
    pub location: MatchLocation,
    pub rule: WalletRule,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WalletRuleEntry {
    pub wallet_id: String,
    pub rule: WalletRule,
}

impl WalletRuleEntry {
    pub fn new(wallet_id: &str, rule: WalletRule) -> Self {
        Self {
            wallet_id: wallet_id.to_string(),
            rule,
        }
    }
}

/// Wallet rules indexed by the script they match.
#[derive(Debug, Clone, Default)]
pub struct WalletRuleEntryCollection {
    by_script: BTreeMap<ScriptBuf, Vec<WalletRuleEntry>>,
    count: usize,
}

impl WalletRuleEntryCollection {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns false if an identical entry is already present.
    pub fn add(&mut self, entry: WalletRuleEntry) -> bool {
        let entries = self
            .by_script
            .entry(entry.rule.script_pubkey.clone())
            .or_default();
        if entries.contains(&entry) {
            return false;
        }

        entries.push(entry);
        self.count += 1;
        true
    }

    pub fn rules_for(&self, script: &Script) -> &[WalletRuleEntry] {
        self.by_script
            .get(script)
            .map(|v| v.as_slice())
            .unwrap_or(&[])
    }

    pub fn len(&self) -> usize {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    pub fn iter(&self) -> impl Iterator<Item = &WalletRuleEntry> {
        self.by_script.values().flatten()
    }
}

impl FromIterator<WalletRuleEntry> for WalletRuleEntryCollection {
    fn from_iter<I: IntoIterator<Item = WalletRuleEntry>>(iter: I) -> Self {
        let mut collection = Self::new();
        for entry in iter {
            collection.add(entry);
        }
        collection
    }
}
