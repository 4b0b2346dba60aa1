use super::change::OrderedBalanceChange;
use crate::coin::Coin;
use crate::colored::ColoredTransaction;
use bitcoincore_rpc::bitcoin::{Transaction, Txid};
use lru::LruCache;
use std::num::NonZeroUsize;
use std::sync::Mutex;

/// Outcome of enriching a record with data that may not be indexed yet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    Resolved,

    // Data is missing for now, retry later
    Pending(String),

    Failed(String),
}

impl Resolution {
    pub fn is_resolved(&self) -> bool {
        matches!(self, Resolution::Resolved)
    }
}

pub trait TransactionLookup: Send + Sync {
    fn get_transaction(&self, txid: &Txid) -> Result<Option<Transaction>, String>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ColorLookupError {
    TransactionNotFound(Txid),
    Failed(String),
}

pub trait ColoredTransactionLookup: Send + Sync {
    fn get_colored_transaction(
        &self,
        txid: &Txid,
    ) -> Result<Option<ColoredTransaction>, ColorLookupError>;
}

/// Loads the coins spent by `record` from their parent transactions.
pub fn resolve_spent_coins(
    record: &mut OrderedBalanceChange,
    lookup: &dyn TransactionLookup,
) -> Resolution {
    if record.spent_coins.is_some() {
        return Resolution::Resolved;
    }

    let mut coins = Vec::with_capacity(record.spent_outpoints.len());
    for outpoint in record.spent_outpoints.iter() {
        if outpoint.is_null() {
            continue;
        }

        let parent = match lookup.get_transaction(&outpoint.txid) {
            Ok(Some(parent)) => parent,
            Ok(None) => {
                let msg = format!(
                    "Parent transaction {} of {} is not indexed yet",
                    outpoint.txid, record.transaction_id
                );
                debug!("{}", msg);
                return Resolution::Pending(msg);
            }
            Err(e) => {
                let msg = format!(
                    "Failed to load parent transaction {} of {}: {}",
                    outpoint.txid, record.transaction_id, e
                );
                error!("{}", msg);
                return Resolution::Failed(msg);
            }
        };

        let Some(txout) = parent.output.get(outpoint.vout as usize) else {
            let msg = format!(
                "Parent transaction {} has no output {}, spent by {}",
                outpoint.txid, outpoint.vout, record.transaction_id
            );
            error!("{}", msg);
            return Resolution::Failed(msg);
        };
        coins.push(Coin::new(*outpoint, txout.clone()));
    }

    record.spent_coins = Some(coins);
    record.update_to_script_coins();
    if record.colored_transaction.is_some() {
        if let Err(e) = record.update_to_colored_coins() {
            return Resolution::Failed(e);
        }
    }

    Resolution::Resolved
}

/// Attaches the colored transaction of `record` and annotates its coins.
pub fn resolve_color(
    record: &mut OrderedBalanceChange,
    lookup: &dyn ColoredTransactionLookup,
) -> Resolution {
    if record.colored_transaction.is_none() {
        match lookup.get_colored_transaction(&record.transaction_id) {
            Ok(Some(colored)) => record.colored_transaction = Some(colored),
            Ok(None) => {
                let msg = format!(
                    "Colored transaction {} is not available yet",
                    record.transaction_id
                );
                debug!("{}", msg);
                return Resolution::Pending(msg);
            }
            Err(ColorLookupError::TransactionNotFound(txid)) => {
                let msg = format!(
                    "Transaction {} needed to color {} is not indexed yet",
                    txid, record.transaction_id
                );
                debug!("{}", msg);
                return Resolution::Pending(msg);
            }
            Err(ColorLookupError::Failed(e)) => {
                let msg = format!(
                    "Failed to get colored transaction {}: {}",
                    record.transaction_id, e
                );
                error!("{}", msg);
                return Resolution::Failed(msg);
            }
        }
    }

    match record.update_to_colored_coins() {
        Ok(()) => Resolution::Resolved,
        Err(e) => Resolution::Failed(e),
    }
}

/// Keeps recently fetched parent transactions in memory. Misses are not
/// cached, so a parent indexed later is found on the next attempt.
pub struct CachedTransactionLookup<L: TransactionLookup> {
    inner: L,
    cache: Mutex<LruCache<Txid, Transaction>>,
}

impl<L: TransactionLookup> CachedTransactionLookup<L> {
    pub fn new(inner: L, capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            inner,
            cache: Mutex::new(LruCache::new(capacity)),
        }
    }

    pub fn cached_count(&self) -> usize {
        self.cache.lock().unwrap().len()
    }
}

impl<L: TransactionLookup> TransactionLookup for CachedTransactionLookup<L> {
    fn get_transaction(&self, txid: &Txid) -> Result<Option<Transaction>, String> {
        if let Some(tx) = self.cache.lock().unwrap().get(txid) {
            return Ok(Some(tx.clone()));
        }

        let ret = self.inner.get_transaction(txid)?;
        if let Some(tx) = &ret {
            self.cache.lock().unwrap().put(*txid, tx.clone());
        }

        Ok(ret)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::balance::change::extract_script_balances;
    use crate::colored::{AssetId, AssetMoney, ColoredEntry};
    use crate::test_util::*;
    use bitcoincore_rpc::bitcoin::hashes::Hash;
    use bitcoincore_rpc::bitcoin::{Amount, OutPoint, SignedAmount, TxOut};
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct MapLookup {
        txs: HashMap<Txid, Transaction>,
        calls: AtomicUsize,
        broken: bool,
    }

    impl MapLookup {
        fn with(txs: Vec<Transaction>) -> Self {
            Self {
                txs: txs.into_iter().map(|tx| (tx.compute_txid(), tx)).collect(),
                ..Default::default()
            }
        }
    }

    impl TransactionLookup for MapLookup {
        fn get_transaction(&self, txid: &Txid) -> Result<Option<Transaction>, String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.broken {
                return Err("storage offline".to_string());
            }
            Ok(self.txs.get(txid).cloned())
        }
    }

    struct ColorLookup(Result<Option<ColoredTransaction>, ColorLookupError>);

    impl ColoredTransactionLookup for ColorLookup {
        fn get_colored_transaction(
            &self,
            _txid: &Txid,
        ) -> Result<Option<ColoredTransaction>, ColorLookupError> {
            self.0.clone()
        }
    }

    fn scenario() -> (Transaction, Transaction) {
        let parent = test_tx(
            vec![p2pkh_txin(test_outpoint(0xee, 0), 8)],
            vec![TxOut { value: Amount::from_sat(20000), script_pubkey: p2pkh_script(9) }],
        );
        let tx = test_tx(
            vec![p2pkh_txin(OutPoint::new(parent.compute_txid(), 0), 9)],
            vec![
                TxOut { value: Amount::from_sat(10000), script_pubkey: p2pkh_script(1) },
                TxOut { value: Amount::from_sat(5000), script_pubkey: p2pkh_script(2) },
            ],
        );
        (parent, tx)
    }

    #[test]
    fn test_resolve_scenario_amounts() {
        let (parent, tx) = scenario();
        let lookup = MapLookup::with(vec![parent]);

        let mut changes = extract_script_balances(None, &tx, None, None, 100);
        for change in changes.iter_mut() {
            assert_eq!(change.amount(), None);
            assert_eq!(resolve_spent_coins(change, &lookup), Resolution::Resolved);
        }

        let s1 = find_change(&changes, &p2pkh_script(1));
        assert_eq!(s1.amount(), Some(SignedAmount::from_sat(10000)));
        let s2 = find_change(&changes, &p2pkh_script(2));
        assert_eq!(s2.amount(), Some(SignedAmount::from_sat(5000)));
        let owner = find_change(&changes, &p2pkh_script(9));
        assert_eq!(owner.amount(), Some(SignedAmount::from_sat(-20000)));
        assert_eq!(owner.spent_coins().unwrap().len(), 1);

        // Resolving again does not hit the lookup
        let calls = lookup.calls.load(Ordering::SeqCst);
        let mut owner = owner.clone();
        assert_eq!(resolve_spent_coins(&mut owner, &lookup), Resolution::Resolved);
        assert_eq!(lookup.calls.load(Ordering::SeqCst), calls);
    }

    #[test]
    fn test_resolve_pending_and_failed() {
        let (parent, tx) = scenario();
        let changes = extract_script_balances(None, &tx, None, None, 100);
        let owner = find_change(&changes, &p2pkh_script(9)).clone();

        let mut record = owner.clone();
        let missing = MapLookup::default();
        assert!(matches!(resolve_spent_coins(&mut record, &missing), Resolution::Pending(_)));
        assert!(record.spent_coins().is_none());
        assert_eq!(record.amount(), None);

        let mut record = owner.clone();
        let broken = MapLookup {
            broken: true,
            ..Default::default()
        };
        assert!(matches!(resolve_spent_coins(&mut record, &broken), Resolution::Failed(_)));
        assert!(record.spent_coins().is_none());

        // Parent without the spent output index
        let mut short_parent = parent.clone();
        short_parent.output.clear();
        let mut record = owner.clone();
        record.spent_outpoints = vec![OutPoint::new(short_parent.compute_txid(), 0)];
        let lookup = MapLookup::with(vec![short_parent]);
        assert!(matches!(resolve_spent_coins(&mut record, &lookup), Resolution::Failed(_)));
    }

    #[test]
    fn test_resolve_color() {
        let (parent, tx) = scenario();
        let changes = extract_script_balances(None, &tx, None, None, 100);
        let asset = AssetMoney::new(AssetId::from_byte_array([4u8; 20]), 100);
        let colored = ColoredTransaction {
            inputs: vec![ColoredEntry { index: 0, asset }],
            issuances: vec![],
            transfers: vec![ColoredEntry { index: 0, asset }],
        };

        let mut s1 = find_change(&changes, &p2pkh_script(1)).clone();
        let pending = ColorLookup(Err(ColorLookupError::TransactionNotFound(parent.compute_txid())));
        assert!(matches!(resolve_color(&mut s1, &pending), Resolution::Pending(_)));
        assert!(matches!(resolve_color(&mut s1, &ColorLookup(Ok(None))), Resolution::Pending(_)));
        let failed = ColorLookup(Err(ColorLookupError::Failed("engine down".to_string())));
        assert!(matches!(resolve_color(&mut s1, &failed), Resolution::Failed(_)));
        assert!(s1.colored_transaction.is_none());

        let found = ColorLookup(Ok(Some(colored.clone())));
        assert_eq!(resolve_color(&mut s1, &found), Resolution::Resolved);
        assert!(s1.received_coins()[0].is_colored());

        // Spent coins resolved after the color pick up the input asset
        let mut owner = find_change(&changes, &p2pkh_script(9)).clone();
        owner.colored_transaction = Some(colored);
        let lookup = MapLookup::with(vec![parent]);
        assert_eq!(resolve_spent_coins(&mut owner, &lookup), Resolution::Resolved);
        assert_eq!(owner.spent_coins().unwrap()[0].asset(), Some(&asset));
        assert_eq!(owner.amount(), Some(SignedAmount::ZERO));
        assert_eq!(owner.asset_amount(&asset.asset_id), Some(-100));
    }

    #[test]
    fn test_cached_lookup() {
        let (parent, _) = scenario();
        let txid = parent.compute_txid();
        let cached = CachedTransactionLookup::new(MapLookup::with(vec![parent.clone()]), 2);

        assert_eq!(cached.get_transaction(&txid).unwrap(), Some(parent.clone()));
        assert_eq!(cached.get_transaction(&txid).unwrap(), Some(parent));
        assert_eq!(cached.inner.calls.load(Ordering::SeqCst), 1);

        let unknown = Txid::from_byte_array([1u8; 32]);
        assert_eq!(cached.get_transaction(&unknown).unwrap(), None);
        assert_eq!(cached.get_transaction(&unknown).unwrap(), None);
        assert_eq!(cached.inner.calls.load(Ordering::SeqCst), 3);
        assert_eq!(cached.cached_count(), 1);
    }
}
