//! Local check that an unlocking script satisfies the output it spends.
//!
//! Only the two templates the wallet produces are understood. Anything
//! else fails verification rather than being executed.

use bitcoin::secp256k1::{ecdsa::Signature, Message, Secp256k1, Verification};
use bitcoin::{PublicKey, Script, Transaction};

use crate::error::BsvError;
use crate::script::{classify, push_data, LockingScript};
use crate::sighash::{signature_hash, SIGHASH_FORKID};

/// Verify input `input_index` of `tx` against the output it spends.
pub fn verify_input<C: Verification>(
    secp: &Secp256k1<C>,
    tx: &Transaction,
    input_index: usize,
    prevout_script: &Script,
    value: u64,
) -> Result<(), BsvError> {
    let input = tx.input.get(input_index).ok_or(BsvError::InputOutOfRange {
        index: input_index,
        inputs: tx.input.len(),
    })?;
    let pushes = push_data(&input.script_sig)?;

    let (sig_bytes, pubkey) = match (classify(prevout_script)?, pushes.as_slice()) {
        (LockingScript::P2pkh(expected_hash), [sig, key]) => {
            let pubkey = PublicKey::from_slice(key)
                .map_err(|e| BsvError::VerificationFailed(format!("bad public key push: {e}")))?;
            if pubkey.pubkey_hash() != expected_hash {
                return Err(BsvError::VerificationFailed("pubkey hash mismatch".into()));
            }
            (sig.as_slice(), pubkey)
        }
        (LockingScript::P2pk(pubkey), [sig]) => (sig.as_slice(), pubkey),
        (locking, _) => {
            return Err(BsvError::VerificationFailed(format!(
                "{} pushes do not fit a {} output",
                pushes.len(),
                locking.template()
            )))
        }
    };

    let (sighash_byte, der) = sig_bytes
        .split_last()
        .ok_or_else(|| BsvError::VerificationFailed("empty signature".into()))?;
    let sighash_type = u32::from(*sighash_byte);
    if sighash_type & SIGHASH_FORKID == 0 {
        return Err(BsvError::VerificationFailed(
            "signature is missing the FORKID flag".into(),
        ));
    }

    let signature = Signature::from_der(der)
        .map_err(|e| BsvError::VerificationFailed(format!("bad DER signature: {e}")))?;
    let digest = signature_hash(tx, input_index, prevout_script, value, sighash_type)?;

    secp.verify_ecdsa(&Message::from_digest(digest), &signature, &pubkey.inner)
        .map_err(|e| BsvError::VerificationFailed(format!("input {input_index}: {e}")))
}

/// Verify every input; `prevouts` pairs each input with its locking script and value.
pub fn verify_transaction<C: Verification>(
    secp: &Secp256k1<C>,
    tx: &Transaction,
    prevouts: &[(&Script, u64)],
) -> Result<(), BsvError> {
    if prevouts.len() != tx.input.len() {
        return Err(BsvError::VerificationFailed(format!(
            "{} prevouts supplied for {} inputs",
            prevouts.len(),
            tx.input.len()
        )));
    }
    for (index, (script, value)) in prevouts.iter().enumerate() {
        verify_input(secp, tx, index, script, *value)?;
    }
    Ok(())
}
