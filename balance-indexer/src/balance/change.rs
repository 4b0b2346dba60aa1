use super::id::BalanceId;
use super::locator::{BalanceLocator, UNCONFIRMED_HEIGHT};
use super::rule::{MatchLocation, MatchedRule, WalletRule, WalletRuleEntryCollection};
use crate::coin::{self, Coin};
use crate::colored::{AssetId, ColoredTransaction};
use crate::script::signer_script;
use bitcoincore_rpc::bitcoin::block::Header;
use bitcoincore_rpc::bitcoin::{BlockHash, OutPoint, Script, ScriptBuf, SignedAmount, Transaction, Txid};
use std::collections::BTreeMap;
use std::time::{SystemTime, UNIX_EPOCH};

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Balance change of one subject caused by one transaction.
///
/// `spent_outpoints` and `spent_indices` are parallel: entry `i` is the
/// outpoint spent by input `spent_indices[i]`. `spent_coins` stays `None`
/// until the parents of those outpoints are resolved, and the amount of the
/// record is only known from then on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderedBalanceChange {
    pub balance_id: BalanceId,
    pub transaction_id: Txid,
    pub block_id: Option<BlockHash>,
    pub height: u32,
    pub seen_ms: u64,
    pub has_op_return: bool,
    pub is_coinbase: bool,

    pub(crate) spent_outpoints: Vec<OutPoint>,
    pub(crate) spent_indices: Vec<u32>,
    pub(crate) received_coins: Vec<Coin>,
    pub(crate) spent_coins: Option<Vec<Coin>>,

    pub colored_transaction: Option<ColoredTransaction>,
    pub(crate) matched_rules: Vec<MatchedRule>,

    // Raw script, kept when the balance id cannot carry it
    pub(crate) script: Option<ScriptBuf>,
    pub custom_data: Option<String>,
}

impl OrderedBalanceChange {
    fn new(
        transaction_id: Txid,
        balance_id: BalanceId,
        block_id: Option<BlockHash>,
        header: Option<&Header>,
        height: u32,
    ) -> Self {
        let seen_ms = match header {
            Some(header) => header.time as u64 * 1000,
            None => now_ms(),
        };
        let height = if block_id.is_none() {
            UNCONFIRMED_HEIGHT
        } else {
            height
        };

        Self {
            balance_id,
            transaction_id,
            block_id,
            height,
            seen_ms,
            has_op_return: false,
            is_coinbase: false,
            spent_outpoints: Vec::new(),
            spent_indices: Vec::new(),
            received_coins: Vec::new(),
            spent_coins: None,
            colored_transaction: None,
            matched_rules: Vec::new(),
            script: None,
            custom_data: None,
        }
    }

    fn for_script(
        transaction_id: Txid,
        script: &Script,
        block_id: Option<BlockHash>,
        header: Option<&Header>,
        height: u32,
    ) -> Self {
        let balance_id = BalanceId::from_script(script);
        let mut change = Self::new(transaction_id, balance_id, block_id, header, height);
        if change.balance_id.extract_script().is_none() {
            change.script = Some(script.to_owned());
        }
        change
    }

    /// Empty wallet record positioned like `source`, ready to be merged into.
    pub fn for_wallet(wallet_id: &str, source: &OrderedBalanceChange) -> Self {
        Self {
            balance_id: BalanceId::from_wallet(wallet_id),
            transaction_id: source.transaction_id,
            block_id: source.block_id,
            height: source.height,
            seen_ms: source.seen_ms,
            has_op_return: source.has_op_return,
            is_coinbase: source.is_coinbase,
            spent_outpoints: Vec::new(),
            spent_indices: Vec::new(),
            received_coins: Vec::new(),
            spent_coins: None,
            colored_transaction: None,
            matched_rules: Vec::new(),
            script: source.script_pubkey(),
            custom_data: None,
        }
    }

    pub fn spent_outpoints(&self) -> &[OutPoint] {
        &self.spent_outpoints
    }

    pub fn spent_indices(&self) -> &[u32] {
        &self.spent_indices
    }

    pub fn received_coins(&self) -> &[Coin] {
        &self.received_coins
    }

    pub fn spent_coins(&self) -> Option<&[Coin]> {
        self.spent_coins.as_deref()
    }

    pub fn matched_rules(&self) -> &[MatchedRule] {
        &self.matched_rules
    }

    pub fn script_pubkey(&self) -> Option<ScriptBuf> {
        match &self.script {
            Some(script) => Some(script.clone()),
            None => self.balance_id.extract_script().map(|s| s.to_owned()),
        }
    }

    pub fn partition_key(&self) -> String {
        self.balance_id.partition_key()
    }

    pub fn is_mempool_entry(&self) -> bool {
        self.block_id.is_none()
    }

    pub fn create_balance_locator(&self) -> BalanceLocator {
        match self.block_id {
            Some(block_id) => BalanceLocator::Confirmed {
                height: self.height,
                block_id,
                transaction_id: self.transaction_id,
            },
            None => BalanceLocator::Unconfirmed {
                seen_ms: self.seen_ms,
                transaction_id: self.transaction_id,
            },
        }
    }

    /// Native value moved for the subject, `None` while spent coins are unknown.
    pub fn amount(&self) -> Option<SignedAmount> {
        let spent = self.spent_coins.as_ref()?;
        let received = coin::sum_uncolored(&self.received_coins).to_sat() as i64;
        let spent = coin::sum_uncolored(spent).to_sat() as i64;
        Some(SignedAmount::from_sat(received - spent))
    }

    /// Quantity of `asset_id` moved for the subject. `None` while spent coins
    /// are unknown, or when the net quantity does not fit an `i64`.
    pub fn asset_amount(&self, asset_id: &AssetId) -> Option<i64> {
        let spent = self.spent_coins.as_ref()?;
        let received = coin::sum_asset(&self.received_coins, asset_id) as i128;
        let spent = coin::sum_asset(spent, asset_id) as i128;

        match i64::try_from(received - spent) {
            Ok(amount) => Some(amount),
            Err(_) => {
                warn!(
                    "Net quantity {} of asset {} in {} is out of range",
                    received - spent,
                    asset_id,
                    self.transaction_id
                );
                None
            }
        }
    }

    pub fn matched_rules_at(&self, index: u32, location: MatchLocation) -> Vec<&WalletRule> {
        self.matched_rules
            .iter()
            .filter(|m| m.index == index && m.location == location)
            .map(|m| &m.rule)
            .collect()
    }

    /// Rules that matched the output or input behind `outpoint`.
    pub fn matched_rules_for(&self, outpoint: &OutPoint) -> Vec<&WalletRule> {
        if outpoint.txid == self.transaction_id {
            return self.matched_rules_at(outpoint.vout, MatchLocation::Output);
        }

        match self.spent_index_of(outpoint) {
            Some(index) => self.matched_rules_at(index, MatchLocation::Input),
            None => Vec::new(),
        }
    }

    fn spent_index_of(&self, outpoint: &OutPoint) -> Option<u32> {
        self.spent_outpoints
            .iter()
            .position(|o| o == outpoint)
            .map(|pos| self.spent_indices[pos])
    }

    /// Folds `source` into this record. Coins and spent entries already
    /// present are kept as they are, so merging the same source twice
    /// changes nothing.
    pub fn merge(&mut self, source: &OrderedBalanceChange, rule: Option<&WalletRule>) {
        for received in source.received_coins.iter() {
            if coin::find_coin(&self.received_coins, received.outpoint()).is_none() {
                self.received_coins.push(received.clone());
            }
        }

        let mut spent_changed = false;
        for (index, outpoint) in source.spent_indices.iter().zip(source.spent_outpoints.iter()) {
            if !self.spent_indices.contains(index) {
                self.spent_indices.push(*index);
                self.spent_outpoints.push(*outpoint);
                spent_changed = true;
            }
        }

        if let Some(rule) = rule {
            let outputs = source
                .received_coins
                .iter()
                .map(|c| (c.outpoint().vout, MatchLocation::Output));
            let inputs = source
                .spent_indices
                .iter()
                .map(|i| (*i, MatchLocation::Input));
            for (index, location) in outputs.chain(inputs) {
                let matched = MatchedRule {
                    index,
                    location,
                    rule: rule.clone(),
                };
                if !self.matched_rules.contains(&matched) {
                    self.matched_rules.push(matched);
                }
            }
        }

        if spent_changed {
            self.spent_coins = None;
            self.update_to_uncolored_coins();
        }
    }

    /// Turns coins matched by a rule carrying a redeem script into script coins.
    pub fn update_to_script_coins(&mut self) {
        let annotations: Vec<(u32, MatchLocation, ScriptBuf)> = self
            .matched_rules
            .iter()
            .filter_map(|m| {
                m.rule
                    .redeem_script
                    .as_ref()
                    .map(|redeem| (m.index, m.location, redeem.clone()))
            })
            .collect();

        for (index, location, redeem) in annotations {
            match location {
                MatchLocation::Output => {
                    let outpoint = OutPoint::new(self.transaction_id, index);
                    if let Some(c) = self
                        .received_coins
                        .iter_mut()
                        .find(|c| c.outpoint() == &outpoint)
                    {
                        if let Coin::Plain(_) = c {
                            *c = c.to_script_coin(redeem);
                        }
                    }
                }
                MatchLocation::Input => {
                    let Some(pos) = self.spent_indices.iter().position(|i| *i == index) else {
                        continue;
                    };
                    let outpoint = self.spent_outpoints[pos];
                    let Some(spent) = self.spent_coins.as_mut() else {
                        continue;
                    };
                    if let Some(c) = spent.iter_mut().find(|c| c.outpoint() == &outpoint) {
                        if let Coin::Plain(_) = c {
                            *c = c.to_script_coin(redeem);
                        }
                    }
                }
            }
        }
    }

    /// Annotates coins with the assets of the colored transaction.
    pub fn update_to_colored_coins(&mut self) -> Result<(), String> {
        let Some(colored) = self.colored_transaction.as_ref() else {
            let msg = format!(
                "Colored transaction of {} is unknown, cannot color coins",
                self.transaction_id
            );
            error!("{}", msg);
            return Err(msg);
        };

        for c in self.received_coins.iter_mut() {
            if c.is_colored() {
                continue;
            }
            if let Some(entry) = colored.get_colored_entry(c.outpoint().vout) {
                *c = c.to_colored(entry.asset);
            }
        }

        if let Some(spent) = self.spent_coins.as_mut() {
            for c in spent.iter_mut() {
                if c.is_colored() {
                    continue;
                }
                let index = self
                    .spent_outpoints
                    .iter()
                    .position(|o| o == c.outpoint())
                    .map(|pos| self.spent_indices[pos]);
                if let Some(asset) = index.and_then(|i| colored.input_asset(i)) {
                    *c = c.to_colored(asset);
                }
            }
        }

        Ok(())
    }

    pub fn update_to_uncolored_coins(&mut self) {
        for c in self.received_coins.iter_mut() {
            if c.is_colored() {
                *c = c.to_plain();
            }
        }

        if let Some(spent) = self.spent_coins.as_mut() {
            for c in spent.iter_mut() {
                if c.is_colored() {
                    *c = c.to_plain();
                }
            }
        }
    }
}

/// Splits a transaction into one record per script it touches, ordered by
/// script bytes. Inputs are attributed through their signer script, outputs
/// through their scriptPubKey; OP_RETURN outputs only flag the transaction.
pub fn extract_script_balances(
    txid: Option<Txid>,
    tx: &Transaction,
    block_id: Option<BlockHash>,
    header: Option<&Header>,
    height: u32,
) -> Vec<OrderedBalanceChange> {
    let txid = txid.unwrap_or_else(|| tx.compute_txid());
    let block_id = block_id.or_else(|| header.map(|h| h.block_hash()));
    let is_coinbase = tx.is_coinbase();

    let mut changes: BTreeMap<ScriptBuf, OrderedBalanceChange> = BTreeMap::new();

    if !is_coinbase {
        for (index, input) in tx.input.iter().enumerate() {
            let Some(signer) = signer_script(input) else {
                continue;
            };

            let change = changes.entry(signer).or_insert_with_key(|script| {
                OrderedBalanceChange::for_script(txid, script, block_id, header, height)
            });
            change.spent_outpoints.push(input.previous_output);
            change.spent_indices.push(index as u32);
        }
    }

    let mut has_op_return = false;
    for (vout, output) in tx.output.iter().enumerate() {
        if output.script_pubkey.is_op_return() {
            has_op_return = true;
            continue;
        }

        let change = changes
            .entry(output.script_pubkey.clone())
            .or_insert_with_key(|script| {
                OrderedBalanceChange::for_script(txid, script, block_id, header, height)
            });
        change
            .received_coins
            .push(Coin::new(OutPoint::new(txid, vout as u32), output.clone()));
    }

    changes
        .into_values()
        .map(|mut change| {
            change.has_op_return = has_op_return;
            change.is_coinbase = is_coinbase;
            change
        })
        .collect()
}

/// Groups the script records of a transaction into one record per wallet
/// whose rules match them, ordered by wallet id.
pub fn extract_wallet_balances(
    txid: Option<Txid>,
    tx: &Transaction,
    block_id: Option<BlockHash>,
    header: Option<&Header>,
    height: u32,
    rules: &WalletRuleEntryCollection,
) -> Vec<OrderedBalanceChange> {
    let mut wallets: BTreeMap<String, OrderedBalanceChange> = BTreeMap::new();

    for script_change in extract_script_balances(txid, tx, block_id, header, height) {
        let Some(script) = script_change.script_pubkey() else {
            continue;
        };

        for entry in rules.rules_for(&script) {
            let wallet = wallets
                .entry(entry.wallet_id.clone())
                .or_insert_with(|| OrderedBalanceChange::for_wallet(&entry.wallet_id, &script_change));
            wallet.merge(&script_change, Some(&entry.rule));
        }
    }

    wallets
        .into_values()
        .map(|mut wallet| {
            wallet.update_to_script_coins();
            wallet
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::balance::rule::WalletRuleEntry;
    use crate::colored::{AssetMoney, ColoredEntry};
    use crate::test_util::*;
    use bitcoincore_rpc::bitcoin::hashes::Hash;
    use bitcoincore_rpc::bitcoin::{Amount, TxOut};

    #[test]
    fn test_extract_scenario_spend_and_pay() {
        let header = test_header(BlockHash::from_byte_array([0u8; 32]), 1_600_000_000);
        let parent = test_outpoint(0xa0, 0);
        let tx = test_tx(
            vec![p2pkh_txin(parent, 9)],
            vec![
                TxOut { value: Amount::from_sat(10000), script_pubkey: p2pkh_script(1) },
                TxOut { value: Amount::from_sat(5000), script_pubkey: p2pkh_script(2) },
            ],
        );
        let txid = tx.compute_txid();

        let changes = extract_script_balances(None, &tx, None, Some(&header), 100);
        assert_eq!(changes.len(), 3);

        let s1 = find_change(&changes, &p2pkh_script(1));
        assert_eq!(s1.received_coins().len(), 1);
        assert_eq!(s1.received_coins()[0].outpoint(), &OutPoint::new(txid, 0));
        assert_eq!(s1.received_coins()[0].amount(), Amount::from_sat(10000));
        assert!(s1.spent_outpoints().is_empty());
        assert_eq!(s1.amount(), None);

        let owner = find_change(&changes, &p2pkh_script(9));
        assert_eq!(owner.spent_outpoints(), &[parent]);
        assert_eq!(owner.spent_indices(), &[0]);
        assert!(owner.received_coins().is_empty());

        for change in changes.iter() {
            assert_eq!(change.transaction_id, txid);
            assert_eq!(change.block_id, Some(header.block_hash()));
            assert_eq!(change.height, 100);
            assert_eq!(change.seen_ms, 1_600_000_000_000);
            assert!(!change.has_op_return);
            assert!(!change.is_coinbase);
            assert!(!change.is_mempool_entry());
        }

        // Records come out in script byte order
        let scripts: Vec<ScriptBuf> = changes.iter().map(|c| c.script_pubkey().unwrap()).collect();
        let mut sorted = scripts.clone();
        sorted.sort();
        assert_eq!(scripts, sorted);
    }

    #[test]
    fn test_coinbase_has_no_input_records() {
        let tx = test_coinbase_tx(vec![TxOut {
            value: Amount::from_sat(50_0000_0000),
            script_pubkey: p2pkh_script(1),
        }]);

        let changes = extract_script_balances(None, &tx, Some(BlockHash::from_byte_array([1u8; 32])), None, 0);
        assert_eq!(changes.len(), 1);
        assert!(changes[0].is_coinbase);
        assert!(changes[0].spent_outpoints().is_empty());
        assert_eq!(changes[0].received_coins().len(), 1);
    }

    #[test]
    fn test_op_return_outputs_flag_every_record() {
        let op_return = ScriptBuf::new_op_return([1u8, 2, 3]);
        let tx = test_tx(
            vec![p2pkh_txin(test_outpoint(1, 0), 9)],
            vec![
                TxOut { value: Amount::ZERO, script_pubkey: op_return.clone() },
                TxOut { value: Amount::from_sat(700), script_pubkey: p2pkh_script(1) },
            ],
        );

        let changes = extract_script_balances(None, &tx, None, None, 42);
        assert_eq!(changes.len(), 2);
        assert!(changes.iter().all(|c| c.has_op_return));
        assert!(changes.iter().all(|c| c.balance_id != BalanceId::from_script(&op_return)));

        // Received coin keeps its real output index
        let s1 = find_change(&changes, &p2pkh_script(1));
        assert_eq!(s1.received_coins()[0].outpoint().vout, 1);

        // Mempool entries carry the unconfirmed height
        assert!(changes.iter().all(|c| c.is_mempool_entry()));
        assert!(changes.iter().all(|c| c.height == UNCONFIRMED_HEIGHT));
        assert!(!changes[0].create_balance_locator().is_confirmed());
    }

    #[test]
    fn test_oversized_script_is_carried_by_record() {
        let large = ScriptBuf::from(vec![0x51; 600]);
        let tx = test_tx(
            vec![p2pkh_txin(test_outpoint(1, 0), 9)],
            vec![TxOut { value: Amount::from_sat(1), script_pubkey: large.clone() }],
        );

        let changes = extract_script_balances(None, &tx, None, None, 0);
        let change = changes
            .iter()
            .find(|c| matches!(c.balance_id, BalanceId::ScriptHash(_)))
            .unwrap();
        assert_eq!(change.script_pubkey(), Some(large));
    }

    #[test]
    fn test_merge_is_idempotent() {
        let tx = test_tx(
            vec![p2pkh_txin(test_outpoint(1, 0), 1), p2pkh_txin(test_outpoint(2, 1), 2)],
            vec![TxOut { value: Amount::from_sat(900), script_pubkey: p2pkh_script(1) }],
        );
        let changes = extract_script_balances(None, &tx, None, None, 0);
        let rule = WalletRule::new(p2pkh_script(1));

        let mut wallet = OrderedBalanceChange::for_wallet("w", &changes[0]);
        for change in changes.iter() {
            wallet.merge(change, Some(&rule));
        }
        let once = wallet.clone();
        for change in changes.iter() {
            wallet.merge(change, Some(&rule));
        }

        assert_eq!(wallet, once);
        assert_eq!(wallet.spent_indices().len(), wallet.spent_outpoints().len());
        let mut indices = wallet.spent_indices().to_vec();
        indices.sort();
        assert_eq!(indices, vec![0, 1]);
        assert_eq!(wallet.received_coins().len(), 1);
    }

    #[test]
    fn test_wallet_merge_scenario() {
        let tx = test_tx(
            vec![p2pkh_txin(test_outpoint(1, 0), 9)],
            vec![
                TxOut { value: Amount::from_sat(10000), script_pubkey: p2pkh_script(1) },
                TxOut { value: Amount::from_sat(5000), script_pubkey: p2pkh_script(2) },
            ],
        );
        let txid = tx.compute_txid();
        let rules: WalletRuleEntryCollection = vec![
            WalletRuleEntry::new("W", WalletRule::new(p2pkh_script(1))),
            WalletRuleEntry::new("W", WalletRule::new(p2pkh_script(2))),
        ]
        .into_iter()
        .collect();

        let wallets = extract_wallet_balances(None, &tx, None, None, 0, &rules);
        assert_eq!(wallets.len(), 1);
        let wallet = &wallets[0];
        assert_eq!(wallet.balance_id, BalanceId::from_wallet("W"));
        assert_eq!(wallet.received_coins().len(), 2);
        assert_eq!(wallet.matched_rules().len(), 2);
        assert_eq!(
            wallet.matched_rules_at(0, MatchLocation::Output),
            vec![&WalletRule::new(p2pkh_script(1))]
        );
        assert_eq!(
            wallet.matched_rules_for(&OutPoint::new(txid, 1)),
            vec![&WalletRule::new(p2pkh_script(2))]
        );
        assert!(wallet.matched_rules_at(0, MatchLocation::Input).is_empty());

        // Merging the script records again leaves the wallet record unchanged
        let mut again = wallet.clone();
        for change in extract_script_balances(None, &tx, None, None, 0) {
            let script = change.script_pubkey().unwrap();
            for entry in rules.rules_for(&script) {
                again.merge(&change, Some(&entry.rule));
            }
        }
        assert_eq!(again.received_coins().len(), 2);
        assert_eq!(again.matched_rules().len(), 2);
    }

    #[test]
    fn test_wallet_rules_annotate_script_coins() {
        let redeem = ScriptBuf::from(vec![0x52, 0xae]);
        let tx = test_tx(
            vec![p2pkh_txin(test_outpoint(1, 0), 9)],
            vec![TxOut { value: Amount::from_sat(10000), script_pubkey: p2pkh_script(1) }],
        );
        let rules: WalletRuleEntryCollection = vec![
            WalletRuleEntry::new("W", WalletRule::new(p2pkh_script(1)).with_redeem_script(redeem.clone())),
            WalletRuleEntry::new("W", WalletRule::new(p2pkh_script(9))),
        ]
        .into_iter()
        .collect();

        let wallets = extract_wallet_balances(None, &tx, None, None, 0, &rules);
        let wallet = &wallets[0];
        assert_eq!(wallet.received_coins()[0].redeem_script(), Some(redeem.as_script()));
        assert_eq!(wallet.spent_indices(), &[0]);
        assert_eq!(wallet.matched_rules_for(&test_outpoint(1, 0)).len(), 1);
    }

    #[test]
    fn test_spent_change_uncolors_coins() {
        let tx = test_tx(
            vec![p2pkh_txin(test_outpoint(1, 0), 1)],
            vec![TxOut { value: Amount::from_sat(600), script_pubkey: p2pkh_script(1) }],
        );
        let changes = extract_script_balances(None, &tx, None, None, 0);
        let mut record = changes[0].clone();
        let asset = AssetMoney::new(AssetId::from_byte_array([7u8; 20]), 5);
        record.colored_transaction = Some(ColoredTransaction {
            inputs: vec![ColoredEntry { index: 0, asset }],
            issuances: vec![],
            transfers: vec![ColoredEntry { index: 0, asset }],
        });
        record.spent_coins = Some(vec![Coin::new(test_outpoint(1, 0), TxOut {
            value: Amount::from_sat(1000),
            script_pubkey: p2pkh_script(1),
        })]);
        record.update_to_colored_coins().unwrap();
        assert!(record.received_coins()[0].is_colored());
        assert!(record.spent_coins().unwrap()[0].is_colored());
        assert_eq!(record.amount(), Some(SignedAmount::ZERO));
        assert_eq!(record.asset_amount(&asset.asset_id), Some(0));

        let other = test_tx(vec![p2pkh_txin(test_outpoint(3, 0), 1)], vec![]);
        let mut source = extract_script_balances(None, &other, None, None, 0).remove(0);
        source.spent_indices = vec![1];
        record.merge(&source, None);

        assert!(record.spent_coins().is_none());
        assert!(record.colored_transaction.is_some());
        assert!(!record.received_coins()[0].is_colored());
        assert_eq!(record.amount(), None);
    }

    fn issued_record(quantity: u64) -> (OrderedBalanceChange, AssetId) {
        let tx = test_tx(
            vec![p2pkh_txin(test_outpoint(1, 0), 9)],
            vec![
                TxOut { value: Amount::from_sat(600), script_pubkey: p2pkh_script(1) },
                TxOut { value: Amount::from_sat(600), script_pubkey: p2pkh_script(1) },
            ],
        );
        let mut record = find_change(&extract_script_balances(None, &tx, None, None, 0), &p2pkh_script(1)).clone();
        let asset = AssetMoney::new(AssetId::from_byte_array([5u8; 20]), quantity);
        record.colored_transaction = Some(ColoredTransaction {
            inputs: vec![],
            issuances: vec![ColoredEntry { index: 0, asset }, ColoredEntry { index: 1, asset }],
            transfers: vec![],
        });
        record.spent_coins = Some(vec![]);
        record.update_to_colored_coins().unwrap();
        (record, asset.asset_id)
    }

    #[test]
    fn test_asset_amount_of_large_issuances() {
        let (record, asset_id) = issued_record(1 << 61);
        assert_eq!(record.asset_amount(&asset_id), Some(1 << 62));

        // Two issuances of i64::MAX add up past the i64 range
        let (record, asset_id) = issued_record(i64::MAX as u64);
        assert!(record.received_coins().iter().all(|c| c.is_colored()));
        assert_eq!(record.asset_amount(&asset_id), None);

        let (record, asset_id) = issued_record(u64::MAX);
        assert_eq!(record.asset_amount(&asset_id), None);
    }

    #[test]
    fn test_redeem_script_annotates_resolved_spent_coin() {
        let redeem = ScriptBuf::from(vec![0x52, 0xae]);
        let p2sh = ScriptBuf::new_p2sh(&redeem.script_hash());
        let parent = test_outpoint(4, 0);
        let tx = test_tx(
            vec![p2pkh_txin(parent, 9)],
            vec![TxOut { value: Amount::from_sat(700), script_pubkey: p2pkh_script(1) }],
        );
        let rules: WalletRuleEntryCollection = vec![WalletRuleEntry::new(
            "W",
            WalletRule::new(p2pkh_script(9)).with_redeem_script(redeem.clone()),
        )]
        .into_iter()
        .collect();

        let mut wallet = extract_wallet_balances(None, &tx, None, None, 0, &rules).remove(0);
        assert_eq!(wallet.matched_rules_at(0, MatchLocation::Input).len(), 1);

        // Nothing to annotate before the spent coins are known
        wallet.update_to_script_coins();
        assert!(wallet.spent_coins().is_none());

        wallet.spent_coins = Some(vec![Coin::new(parent, TxOut {
            value: Amount::from_sat(1000),
            script_pubkey: p2sh,
        })]);
        wallet.update_to_script_coins();

        let spent = wallet.spent_coins().unwrap();
        assert_eq!(spent[0].redeem_script(), Some(redeem.as_script()));
        assert_eq!(wallet.amount(), Some(SignedAmount::from_sat(-1000)));
    }
}
