use bitcoincore_rpc::bitcoin::opcodes::all::{
    OP_CHECKMULTISIG, OP_CHECKMULTISIGVERIFY, OP_CHECKSIG, OP_CHECKSIGVERIFY,
};
use bitcoincore_rpc::bitcoin::script::Instruction;
use bitcoincore_rpc::bitcoin::{CompressedPublicKey, PublicKey, Script, ScriptBuf, TxIn};

// Taproot control block: leaf version byte + internal key + 32 * path length
const TAPROOT_CONTROL_BASE_SIZE: usize = 33;
const TAPROOT_CONTROL_NODE_SIZE: usize = 32;

/// Script of the output spent by `txin`, recovered from its scriptSig or
/// witness. Returns `None` for coinbase inputs and for spends whose shape is
/// not one of P2PKH, P2SH, P2WPKH or P2WSH.
pub fn signer_script(txin: &TxIn) -> Option<ScriptBuf> {
    if txin.previous_output.is_null() {
        return None;
    }

    let script_sig = txin.script_sig.as_script();
    if !script_sig.is_empty() {
        let pushes = collect_pushes(script_sig)?;
        if let Some(script) = p2pkh_signer(&pushes) {
            return Some(script);
        }

        return p2sh_signer(&pushes);
    }

    match txin.witness.len() {
        0 => None,
        2 => {
            let last = txin.witness.last()?;
            if let Ok(key) = CompressedPublicKey::from_slice(last) {
                return Some(ScriptBuf::new_p2wpkh(&key.wpubkey_hash()));
            }
            p2wsh_signer(last)
        }
        1 => None,
        _ => p2wsh_signer(txin.witness.last()?),
    }
}

// All pushes of a push-only script, None if any instruction is an opcode
fn collect_pushes(script: &Script) -> Option<Vec<&[u8]>> {
    let mut pushes = Vec::new();
    for instruction in script.instructions() {
        match instruction.ok()? {
            Instruction::PushBytes(bytes) => pushes.push(bytes.as_bytes()),
            Instruction::Op(_) => return None,
        }
    }

    Some(pushes)
}

fn p2pkh_signer(pushes: &[&[u8]]) -> Option<ScriptBuf> {
    if pushes.len() != 2 || pushes[0].is_empty() {
        return None;
    }

    let key = PublicKey::from_slice(pushes[1]).ok()?;
    Some(ScriptBuf::new_p2pkh(&key.pubkey_hash()))
}

fn p2sh_signer(pushes: &[&[u8]]) -> Option<ScriptBuf> {
    let redeem = Script::from_bytes(pushes.last()?);
    if !is_redeem_script(redeem) {
        return None;
    }

    Some(redeem.to_p2sh())
}

fn p2wsh_signer(last: &[u8]) -> Option<ScriptBuf> {
    if is_taproot_control_block(last) {
        return None;
    }

    let witness_script = Script::from_bytes(last);
    if !is_redeem_script(witness_script) {
        return None;
    }

    Some(witness_script.to_p2wsh())
}

// A redeem script either wraps a witness program or ends in a signature check
fn is_redeem_script(script: &Script) -> bool {
    if script.is_empty() {
        return false;
    }

    if script.is_witness_program() {
        return true;
    }

    let mut last_op = None;
    for instruction in script.instructions() {
        match instruction {
            Ok(Instruction::Op(op)) => last_op = Some(op),
            Ok(Instruction::PushBytes(_)) => last_op = None,
            Err(_) => return false,
        }
    }

    matches!(
        last_op,
        Some(op) if op == OP_CHECKSIG
            || op == OP_CHECKSIGVERIFY
            || op == OP_CHECKMULTISIG
            || op == OP_CHECKMULTISIGVERIFY
    )
}

fn is_taproot_control_block(data: &[u8]) -> bool {
    data.len() >= TAPROOT_CONTROL_BASE_SIZE
        && (data.len() - TAPROOT_CONTROL_BASE_SIZE) % TAPROOT_CONTROL_NODE_SIZE == 0
        && data[0] & 0xfe == 0xc0
}
