use crate::colored::{AssetId, AssetMoney};
use bitcoincore_rpc::bitcoin::{Amount, OutPoint, Script, ScriptBuf, TxOut};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlainCoin {
    pub outpoint: OutPoint,
    pub txout: TxOut,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColoredCoin {
    pub bearer: PlainCoin,
    pub asset: AssetMoney,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScriptCoin {
    pub bearer: PlainCoin,
    pub redeem_script: ScriptBuf,
}

/// A spendable output, optionally annotated with a colored asset or with the
/// redeem script needed to spend it. Exactly one variant is active; switching
/// goes through the explicit conversions below.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Coin {
    Plain(PlainCoin),
    Colored(ColoredCoin),
    Script(ScriptCoin),
}

impl Coin {
    pub fn new(outpoint: OutPoint, txout: TxOut) -> Self {
        Coin::Plain(PlainCoin { outpoint, txout })
    }

    pub fn underlying_plain(&self) -> &PlainCoin {
        match self {
            Coin::Plain(coin) => coin,
            Coin::Colored(coin) => &coin.bearer,
            Coin::Script(coin) => &coin.bearer,
        }
    }

    pub fn outpoint(&self) -> &OutPoint {
        &self.underlying_plain().outpoint
    }

    pub fn txout(&self) -> &TxOut {
        &self.underlying_plain().txout
    }

    pub fn amount(&self) -> Amount {
        self.txout().value
    }

    pub fn is_colored(&self) -> bool {
        matches!(self, Coin::Colored(_))
    }

    pub fn asset(&self) -> Option<&AssetMoney> {
        match self {
            Coin::Colored(coin) => Some(&coin.asset),
            _ => None,
        }
    }

    pub fn redeem_script(&self) -> Option<&Script> {
        match self {
            Coin::Script(coin) => Some(coin.redeem_script.as_script()),
            _ => None,
        }
    }

    pub fn to_colored(&self, asset: AssetMoney) -> Coin {
        Coin::Colored(ColoredCoin {
            bearer: self.underlying_plain().clone(),
            asset,
        })
    }

    pub fn to_script_coin(&self, redeem_script: ScriptBuf) -> Coin {
        Coin::Script(ScriptCoin {
            bearer: self.underlying_plain().clone(),
            redeem_script,
        })
    }

    pub fn to_plain(&self) -> Coin {
        Coin::Plain(self.underlying_plain().clone())
    }
}

pub fn find_coin<'a>(coins: &'a [Coin], outpoint: &OutPoint) -> Option<&'a Coin> {
    coins.iter().find(|c| c.outpoint() == outpoint)
}

// Native value of all coins that carry no colored asset
pub fn sum_uncolored(coins: &[Coin]) -> Amount {
    coins
        .iter()
        .filter(|c| !c.is_colored())
        .map(|c| c.amount())
        .sum()
}

// Widened so that any number of u64 quantities adds up without overflow
pub fn sum_asset(coins: &[Coin], asset_id: &AssetId) -> u128 {
    coins
        .iter()
        .filter_map(|c| c.asset())
        .filter(|a| &a.asset_id == asset_id)
        .map(|a| a.quantity as u128)
        .sum()
}
