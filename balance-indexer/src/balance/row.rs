use super::change::OrderedBalanceChange;
use super::id::BalanceId;
use super::locator::{BalanceLocator, UNCONFIRMED_HEIGHT, parse_locator_parts};
use super::rule::MatchedRule;
use crate::coin::Coin;
use crate::colored::{AssetId, AssetMoney, ColoredTransaction};
use bitcoincore_rpc::bitcoin::hashes::Hash;
use bitcoincore_rpc::bitcoin::{Amount, OutPoint, ScriptBuf, TxOut, Txid};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredAsset {
    pub asset_id: [u8; 20],
    pub quantity: u64,
}

// Output of a coin with its variant annotation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredOutput {
    pub value: u64,
    pub script_pubkey: Vec<u8>,
    pub asset: Option<StoredAsset>,
    pub redeem_script: Option<Vec<u8>>,
}

impl StoredOutput {
    fn from_coin(coin: &Coin) -> Self {
        Self {
            value: coin.amount().to_sat(),
            script_pubkey: coin.txout().script_pubkey.to_bytes(),
            asset: coin.asset().map(|a| StoredAsset {
                asset_id: a.asset_id.to_byte_array(),
                quantity: a.quantity,
            }),
            redeem_script: coin.redeem_script().map(|s| s.to_bytes()),
        }
    }

    fn into_coin(self, outpoint: OutPoint) -> Result<Coin, String> {
        let plain = Coin::new(
            outpoint,
            TxOut {
                value: Amount::from_sat(self.value),
                script_pubkey: ScriptBuf::from(self.script_pubkey),
            },
        );

        match (self.asset, self.redeem_script) {
            (None, None) => Ok(plain),
            (Some(asset), None) => Ok(plain.to_colored(AssetMoney::new(
                AssetId::from_byte_array(asset.asset_id),
                asset.quantity,
            ))),
            (None, Some(redeem)) => Ok(plain.to_script_coin(ScriptBuf::from(redeem))),
            (Some(_), Some(_)) => {
                let msg = format!("Invalid stored coin {}: both colored and scripted", outpoint);
                error!("{}", msg);
                Err(msg)
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredOutPoint {
    pub txid: [u8; 32],
    pub vout: u32,
}

impl From<&OutPoint> for StoredOutPoint {
    fn from(outpoint: &OutPoint) -> Self {
        Self {
            txid: outpoint.txid.to_byte_array(),
            vout: outpoint.vout,
        }
    }
}

impl From<&StoredOutPoint> for OutPoint {
    fn from(stored: &StoredOutPoint) -> Self {
        OutPoint::new(Txid::from_byte_array(stored.txid), stored.vout)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredCoin {
    pub outpoint: StoredOutPoint,
    pub output: StoredOutput,
}

/// Storage form of an [`OrderedBalanceChange`]. Rows of one subject share a
/// partition key and sort by row key in locator order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BalanceRow {
    pub partition_key: String,
    pub row_key: String,

    #[serde(rename = "s")]
    pub seen_ms: u64,

    #[serde(rename = "ss")]
    pub spent_indices: Vec<u32>,

    #[serde(rename = "a")]
    pub spent_outpoints: Vec<StoredOutPoint>,

    #[serde(rename = "b")]
    pub spent_coins: Option<Vec<StoredCoin>>,

    #[serde(rename = "c")]
    pub received_indices: Vec<u32>,

    #[serde(rename = "d")]
    pub received_outputs: Vec<StoredOutput>,

    // op-return flag then coinbase flag, 'o' or 'n'
    #[serde(rename = "e")]
    pub flags: String,

    // matched rules as JSON
    #[serde(rename = "f")]
    pub matched_rules: String,

    #[serde(rename = "g")]
    pub colored_transaction: Option<Vec<u8>>,

    #[serde(rename = "h")]
    pub script: Option<Vec<u8>>,

    #[serde(rename = "cu")]
    pub custom_data: Option<String>,
}

fn flag(value: bool) -> char {
    if value { 'o' } else { 'n' }
}

fn parse_flag(c: char, flags: &str) -> Result<bool, String> {
    match c {
        'o' => Ok(true),
        'n' => Ok(false),
        _ => {
            let msg = format!("Invalid balance row flags {}", flags);
            error!("{}", msg);
            Err(msg)
        }
    }
}

pub fn make_row_key(balance_id: &BalanceId, locator: &BalanceLocator) -> String {
    format!("{}-{}", balance_id, locator)
}

/// Splits a row key into its balance id and locator. The locator is taken
/// from the right, so wallet ids may contain '-'.
pub fn parse_row_key(row_key: &str) -> Result<(BalanceId, BalanceLocator), String> {
    let parts: Vec<&str> = row_key.rsplitn(4, '-').collect();
    if parts.len() != 4 {
        let msg = format!("Invalid balance row key {}", row_key);
        error!("{}", msg);
        return Err(msg);
    }

    let locator = parse_locator_parts(parts[2], parts[1], parts[0])?;
    let balance_id = parts[3].parse::<BalanceId>()?;
    Ok((balance_id, locator))
}

impl BalanceRow {
    pub fn from_change(change: &OrderedBalanceChange) -> Result<Self, String> {
        let matched_rules = serde_json::to_string(change.matched_rules()).map_err(|e| {
            let msg = format!(
                "Failed to serialize matched rules of {}: {}",
                change.transaction_id, e
            );
            error!("{}", msg);
            msg
        })?;

        let flags: String = [flag(change.has_op_return), flag(change.is_coinbase)]
            .iter()
            .collect();

        Ok(Self {
            partition_key: change.partition_key(),
            row_key: make_row_key(&change.balance_id, &change.create_balance_locator()),
            seen_ms: change.seen_ms,
            spent_indices: change.spent_indices().to_vec(),
            spent_outpoints: change.spent_outpoints().iter().map(StoredOutPoint::from).collect(),
            spent_coins: change.spent_coins().map(|coins| {
                coins
                    .iter()
                    .map(|c| StoredCoin {
                        outpoint: StoredOutPoint::from(c.outpoint()),
                        output: StoredOutput::from_coin(c),
                    })
                    .collect()
            }),
            received_indices: change.received_coins().iter().map(|c| c.outpoint().vout).collect(),
            received_outputs: change.received_coins().iter().map(StoredOutput::from_coin).collect(),
            flags,
            matched_rules,
            colored_transaction: change.colored_transaction.as_ref().map(|c| c.to_bytes()),
            script: change.script.as_ref().map(|s| s.to_bytes()),
            custom_data: change.custom_data.clone(),
        })
    }

    pub fn into_change(self) -> Result<OrderedBalanceChange, String> {
        let (balance_id, locator) = parse_row_key(&self.row_key)?;
        if balance_id.partition_key() != self.partition_key {
            let msg = format!(
                "Balance row key {} does not belong to partition {}",
                self.row_key, self.partition_key
            );
            error!("{}", msg);
            return Err(msg);
        }

        let flag_chars: Vec<char> = self.flags.chars().collect();
        if flag_chars.len() != 2 {
            let msg = format!("Invalid balance row flags {}", self.flags);
            error!("{}", msg);
            return Err(msg);
        }
        let has_op_return = parse_flag(flag_chars[0], &self.flags)?;
        let is_coinbase = parse_flag(flag_chars[1], &self.flags)?;

        if self.spent_indices.len() != self.spent_outpoints.len() {
            let msg = format!(
                "Balance row {} has {} spent indices for {} spent outpoints",
                self.row_key,
                self.spent_indices.len(),
                self.spent_outpoints.len()
            );
            error!("{}", msg);
            return Err(msg);
        }
        if self.received_indices.len() != self.received_outputs.len() {
            let msg = format!(
                "Balance row {} has {} received indices for {} received outputs",
                self.row_key,
                self.received_indices.len(),
                self.received_outputs.len()
            );
            error!("{}", msg);
            return Err(msg);
        }

        let matched_rules: Vec<MatchedRule> = serde_json::from_str(&self.matched_rules)
            .map_err(|e| {
                let msg = format!("Invalid matched rules in row {}: {}", self.row_key, e);
                error!("{}", msg);
                msg
            })?;

        let colored_transaction = match self.colored_transaction {
            Some(data) => Some(ColoredTransaction::from_bytes(&data)?),
            None => None,
        };

        let transaction_id = *locator.transaction_id();
        let received_coins = self
            .received_indices
            .iter()
            .zip(self.received_outputs)
            .map(|(vout, output)| output.into_coin(OutPoint::new(transaction_id, *vout)))
            .collect::<Result<Vec<_>, _>>()?;

        let spent_coins = match self.spent_coins {
            Some(coins) => Some(
                coins
                    .into_iter()
                    .map(|c| c.output.into_coin(OutPoint::from(&c.outpoint)))
                    .collect::<Result<Vec<_>, _>>()?,
            ),
            None => None,
        };

        let (block_id, height) = match locator {
            BalanceLocator::Confirmed {
                height, block_id, ..
            } => (Some(block_id), height),
            BalanceLocator::Unconfirmed { .. } => (None, UNCONFIRMED_HEIGHT),
        };

        Ok(OrderedBalanceChange {
            balance_id,
            transaction_id,
            block_id,
            height,
            seen_ms: self.seen_ms,
            has_op_return,
            is_coinbase,
            spent_outpoints: self.spent_outpoints.iter().map(OutPoint::from).collect(),
            spent_indices: self.spent_indices,
            received_coins,
            spent_coins,
            colored_transaction,
            matched_rules,
            script: self.script.map(ScriptBuf::from),
            custom_data: self.custom_data,
        })
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, String> {
        bincode::serde::encode_to_vec(self, bincode::config::standard()).map_err(|e| {
            let msg = format!("Failed to serialize balance row {}: {}", self.row_key, e);
            error!("{}", msg);
            msg
        })
    }

    pub fn from_bytes(data: &[u8]) -> Result<Self, String> {
        let (row, len): (Self, usize) =
            bincode::serde::decode_from_slice(data, bincode::config::standard()).map_err(|e| {
                let msg = format!("Failed to deserialize balance row: {}", e);
                error!("{}", msg);
                msg
            })?;

        if len != data.len() {
            let msg = format!(
                "Invalid balance row data: {} trailing bytes",
                data.len() - len
            );
            error!("{}", msg);
            return Err(msg);
        }

        Ok(row)
    }
}
