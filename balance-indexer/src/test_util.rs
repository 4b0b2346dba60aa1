use crate::balance::OrderedBalanceChange;
use bitcoincore_rpc::bitcoin::absolute::LockTime;
use bitcoincore_rpc::bitcoin::block::{Header, Version as BlockVersion};
use bitcoincore_rpc::bitcoin::hashes::Hash;
use bitcoincore_rpc::bitcoin::script::{Builder, PushBytesBuf};
use bitcoincore_rpc::bitcoin::secp256k1::{Secp256k1, SecretKey};
use bitcoincore_rpc::bitcoin::transaction::Version;
use bitcoincore_rpc::bitcoin::{
    Block, BlockHash, CompactTarget, OutPoint, PublicKey, Script, ScriptBuf, Sequence,
    Transaction, TxIn, TxMerkleNode, TxOut, Txid, Witness,
};

pub fn test_key(n: u8) -> PublicKey {
    let secp = Secp256k1::new();
    let secret = SecretKey::from_slice(&[n.max(1); 32]).unwrap();
    PublicKey::new(secret.public_key(&secp))
}

pub fn p2pkh_script(n: u8) -> ScriptBuf {
    ScriptBuf::new_p2pkh(&test_key(n).pubkey_hash())
}

// Input spending `prev` with a P2PKH scriptSig of key `n`
pub fn p2pkh_txin(prev: OutPoint, n: u8) -> TxIn {
    let signature = PushBytesBuf::try_from(vec![0x30; 71]).unwrap();
    TxIn {
        previous_output: prev,
        script_sig: Builder::new()
            .push_slice(signature)
            .push_key(&test_key(n))
            .into_script(),
        sequence: Sequence::MAX,
        witness: Witness::new(),
    }
}

pub fn test_outpoint(tag: u8, vout: u32) -> OutPoint {
    OutPoint::new(Txid::from_byte_array([tag; 32]), vout)
}

pub fn test_tx(input: Vec<TxIn>, output: Vec<TxOut>) -> Transaction {
    Transaction {
        version: Version::TWO,
        lock_time: LockTime::ZERO,
        input,
        output,
    }
}

pub fn test_coinbase_tx(output: Vec<TxOut>) -> Transaction {
    test_coinbase_tx_at(0, output)
}

// Coinbase made unique by the height pushed in its scriptSig
pub fn test_coinbase_tx_at(height: u32, output: Vec<TxOut>) -> Transaction {
    let input = TxIn {
        previous_output: OutPoint::null(),
        script_sig: Builder::new().push_int(height as i64).push_int(1).into_script(),
        sequence: Sequence::MAX,
        witness: Witness::new(),
    };
    test_tx(vec![input], output)
}

pub fn test_header(prev_blockhash: BlockHash, time: u32) -> Header {
    Header {
        version: BlockVersion::ONE,
        prev_blockhash,
        merkle_root: TxMerkleNode::all_zeros(),
        time,
        bits: CompactTarget::from_consensus(0x207fffff),
        nonce: 0,
    }
}

/// Headers chained from the all-zero hash, `tag` varies the nonce so two
/// chains built with different tags diverge from their first header.
pub fn test_headers(count: usize, tag: u32) -> Vec<Header> {
    let mut headers: Vec<Header> = Vec::with_capacity(count);
    for i in 0..count {
        let prev = headers
            .last()
            .map(|h| h.block_hash())
            .unwrap_or_else(BlockHash::all_zeros);
        let mut header = test_header(prev, 1_500_000_000 + i as u32 * 600);
        header.nonce = tag;
        headers.push(header);
    }
    headers
}

/// Extends `base[..keep]` with `extra` new headers, nonce `tag`.
pub fn test_fork(base: &[Header], keep: usize, extra: usize, tag: u32) -> Vec<Header> {
    let mut headers = base[..keep].to_vec();
    for i in 0..extra {
        let prev = headers
            .last()
            .map(|h| h.block_hash())
            .unwrap_or_else(BlockHash::all_zeros);
        let mut header = test_header(prev, 1_600_000_000 + i as u32 * 600);
        header.nonce = tag;
        headers.push(header);
    }
    headers
}

pub fn test_block(header: Header, txdata: Vec<Transaction>) -> Block {
    Block { header, txdata }
}

pub fn find_change<'a>(changes: &'a [OrderedBalanceChange], script: &Script) -> &'a OrderedBalanceChange {
    changes
        .iter()
        .find(|c| c.script_pubkey().as_deref() == Some(script))
        .unwrap()
}
