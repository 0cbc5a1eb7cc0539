//! Signing engine.
//!
//! Every input is signed with the key at the path the ledger recorded for
//! it, then the whole transaction is verified locally before it is handed
//! back. A transaction that fails its own verification never leaves here.

use bitcoin::consensus::encode::serialize;
use bitcoin::secp256k1::{Secp256k1, Verification};
use bitcoin::{Transaction, Txid};
use chain_bsv::{transaction, verify, BsvError};
use tracing::{debug, error};

use crate::builder::{ChangeOutput, UnsignedTransaction};
use crate::error::WalletError;
use crate::keys::KeySource;
use crate::types::{outpoint_label, Utxo};

/// A fully signed transaction ready for broadcast.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedTransaction {
    pub transaction: Transaction,
    /// The coins spent, in input order.
    pub inputs: Vec<Utxo>,
    pub fee: u64,
    pub change: Option<ChangeOutput>,
}

impl SignedTransaction {
    pub fn txid(&self) -> Txid {
        self.transaction.compute_txid()
    }

    /// Consensus serialization handed to the broadcast transport.
    pub fn to_bytes(&self) -> Vec<u8> {
        serialize(&self.transaction)
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.to_bytes())
    }

    pub fn size(&self) -> usize {
        self.to_bytes().len()
    }
}

/// Sign every input of `unsigned` with keys from `keys`.
pub fn sign<K: KeySource + ?Sized>(
    unsigned: UnsignedTransaction,
    keys: &K,
) -> Result<SignedTransaction, WalletError> {
    let secp = Secp256k1::new();
    let UnsignedTransaction {
        mut tx,
        inputs,
        fee,
        change,
    } = unsigned;

    let mut unlocking = Vec::with_capacity(inputs.len());
    for (index, utxo) in inputs.iter().enumerate() {
        let missing = |reason: String| {
            error!(outpoint = %utxo.outpoint, path = %utxo.path, %reason, "signer: no key for input");
            WalletError::MissingKey {
                outpoint: outpoint_label(&utxo.outpoint),
                path: utxo.path.to_string(),
            }
        };

        let key = keys.key_pair(&utxo.path).map_err(|e| missing(e.to_string()))?;
        if key.locking_script(utxo.template) != utxo.script {
            return Err(missing(format!("key does not produce {} script", utxo.template)));
        }

        let script = transaction::sign_input(
            &secp,
            &tx,
            index,
            &utxo.script,
            utxo.value,
            &key.secret,
            utxo.template,
        )
        .map_err(|e| match e {
            BsvError::SigningError(reason) => missing(reason),
            other => other.into(),
        })?;
        unlocking.push(script);
    }
    for (input, script) in tx.input.iter_mut().zip(unlocking) {
        input.script_sig = script;
    }

    check_signatures(&secp, &tx, &inputs)?;

    let signed = SignedTransaction {
        transaction: tx,
        inputs,
        fee,
        change,
    };
    debug!(txid = %signed.txid(), size = signed.size(), fee, "signer: transaction signed");
    Ok(signed)
}

/// Run every input's unlocking script against the coin it spends.
fn check_signatures<C: Verification>(
    secp: &Secp256k1<C>,
    tx: &Transaction,
    inputs: &[Utxo],
) -> Result<(), WalletError> {
    for (index, utxo) in inputs.iter().enumerate() {
        verify::verify_input(secp, tx, index, &utxo.script, utxo.value).map_err(|e| {
            error!(input = index, error = %e, "signer: self-verification failed");
            WalletError::SignatureVerification {
                input: index,
                reason: e.to_string(),
            }
        })?;
    }
    Ok(())
}
