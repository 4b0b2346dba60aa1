use bitcoincore_rpc::bitcoin::hashes::{self, Hash, hash160};

hashes::hash_newtype! {
    /// Identifier of a colored asset: hash160 of the script that issued it.
    pub struct AssetId(hash160::Hash);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AssetMoney {
    pub asset_id: AssetId,
    pub quantity: u64,
}

impl AssetMoney {
    pub fn new(asset_id: AssetId, quantity: u64) -> Self {
        Self { asset_id, quantity }
    }
}

// Colored output or input of a transaction, by ordinal
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ColoredEntry {
    pub index: u32,
    pub asset: AssetMoney,
}

// index (4) + asset id (20) + quantity (8)
const COLORED_ENTRY_LEN: usize = 4 + 20 + 8;

/// Result of a colored-coin computation for one transaction. Computing it is
/// the job of an external colored-asset engine; the indexer only stores it and
/// uses it to annotate coins.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ColoredTransaction {
    pub inputs: Vec<ColoredEntry>,
    pub issuances: Vec<ColoredEntry>,
    pub transfers: Vec<ColoredEntry>,
}

impl ColoredTransaction {
    /// Colored entry for output `index`, issuances first.
    pub fn get_colored_entry(&self, index: u32) -> Option<&ColoredEntry> {
        self.issuances
            .iter()
            .chain(self.transfers.iter())
            .find(|e| e.index == index)
    }

    /// Asset carried by input `index`.
    pub fn input_asset(&self, index: u32) -> Option<AssetMoney> {
        self.inputs.iter().find(|e| e.index == index).map(|e| e.asset)
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let count = self.inputs.len() + self.issuances.len() + self.transfers.len();
        let mut data = Vec::with_capacity(12 + count * COLORED_ENTRY_LEN);
        for list in [&self.inputs, &self.issuances, &self.transfers] {
            data.extend_from_slice(&(list.len() as u32).to_be_bytes());
            for entry in list.iter() {
                data.extend_from_slice(&entry.index.to_be_bytes());
                data.extend_from_slice(entry.asset.asset_id.as_byte_array());
                data.extend_from_slice(&entry.asset.quantity.to_be_bytes());
            }
        }
        data
    }

    pub fn from_bytes(data: &[u8]) -> Result<Self, String> {
        let mut pos = 0;
        let mut lists = Vec::with_capacity(3);
        for _ in 0..3 {
            let count = read_u32(data, &mut pos)? as usize;
            if data.len() < pos + count * COLORED_ENTRY_LEN {
                let msg = format!(
                    "Invalid colored transaction data: {} entries do not fit in {} bytes",
                    count,
                    data.len() - pos
                );
                error!("{}", msg);
                return Err(msg);
            }

            let mut list = Vec::with_capacity(count);
            for _ in 0..count {
                let index = read_u32(data, &mut pos)?;
                let asset_id = AssetId::from_slice(&data[pos..pos + 20]).map_err(|e| {
                    let msg = format!("Invalid asset id in colored transaction: {}", e);
                    error!("{}", msg);
                    msg
                })?;
                pos += 20;
                let quantity = u64::from_be_bytes(
                    data[pos..pos + 8]
                        .try_into()
                        .map_err(|_| "Failed to parse asset quantity".to_string())?,
                );
                pos += 8;
                list.push(ColoredEntry {
                    index,
                    asset: AssetMoney::new(asset_id, quantity),
                });
            }
            lists.push(list);
        }

        if pos != data.len() {
            let msg = format!(
                "Invalid colored transaction data: {} trailing bytes",
                data.len() - pos
            );
            error!("{}", msg);
            return Err(msg);
        }

        let transfers = lists.pop().unwrap_or_default();
        let issuances = lists.pop().unwrap_or_default();
        let inputs = lists.pop().unwrap_or_default();
        Ok(Self {
            inputs,
            issuances,
            transfers,
        })
    }
}

fn read_u32(data: &[u8], pos: &mut usize) -> Result<u32, String> {
    if data.len() < *pos + 4 {
        let msg = format!("Unexpected end of colored transaction data at {}", pos);
        error!("{}", msg);
        return Err(msg);
    }

    let value = u32::from_be_bytes([data[*pos], data[*pos + 1], data[*pos + 2], data[*pos + 3]]);
    *pos += 4;
    Ok(value)
}
