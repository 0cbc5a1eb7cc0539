use bitcoin::absolute::LockTime;
use bitcoin::secp256k1::{Message, Secp256k1, SecretKey, Signing};
use bitcoin::transaction::Version;
use bitcoin::{OutPoint, PublicKey, Script, ScriptBuf, Sequence, Transaction, TxIn, TxOut, Witness};
use serde::{Deserialize, Serialize};

use crate::error::BsvError;
use crate::script::ScriptTemplate;
use crate::sighash::{signature_hash, SIGHASH_ALL_FORKID};

/// Outputs below this value are treated as dust and never created.
pub const DUST_THRESHOLD: u64 = 546;

/// Version and lock time.
const TX_FIXED_BYTES: usize = 4 + 4;

/// Outpoint and sequence of every input.
const INPUT_FIXED_BYTES: usize = 32 + 4 + 4;

/// Value of every output.
const OUTPUT_FIXED_BYTES: usize = 8;

/// Serialized size of a Bitcoin variable-length integer.
pub fn var_int_size(n: usize) -> usize {
    match n {
        0..=0xfc => 1,
        0xfd..=0xffff => 3,
        0x1_0000..=0xffff_ffff => 5,
        _ => 9,
    }
}

/// Serialized size of an input whose unlocking script is `unlocking_len` bytes.
pub fn input_size(unlocking_len: usize) -> usize {
    INPUT_FIXED_BYTES + var_int_size(unlocking_len) + unlocking_len
}

/// Serialized size of an output with a `script_len` byte locking script.
pub fn output_size(script_len: usize) -> usize {
    OUTPUT_FIXED_BYTES + var_int_size(script_len) + script_len
}

/// Upper bound on the size of the signed transaction.
///
/// Inputs are sized from their template's expected unlocking script, so the
/// estimate never undershoots the finished transaction.
pub fn estimate_size(inputs: &[ScriptTemplate], output_script_lens: &[usize]) -> usize {
    let inputs_bytes: usize = inputs
        .iter()
        .map(|t| input_size(t.expected_unlocking_size()))
        .sum();
    let outputs_bytes: usize = output_script_lens.iter().map(|len| output_size(*len)).sum();

    TX_FIXED_BYTES
        + var_int_size(inputs.len())
        + inputs_bytes
        + var_int_size(output_script_lens.len())
        + outputs_bytes
}

/// Fee rate expressed as `satoshis` per `bytes`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeeRate {
    pub satoshis: u64,
    pub bytes: u64,
}

impl FeeRate {
    pub fn new(satoshis: u64, bytes: u64) -> Result<Self, BsvError> {
        if bytes == 0 {
            return Err(BsvError::InvalidFeeRate(
                "byte denominator must be non-zero".into(),
            ));
        }
        Ok(Self { satoshis, bytes })
    }

    pub fn per_byte(satoshis: u64) -> Self {
        Self { satoshis, bytes: 1 }
    }

    pub fn per_kilobyte(satoshis: u64) -> Self {
        Self {
            satoshis,
            bytes: 1000,
        }
    }

    /// Fee for a transaction of `size` bytes, rounded up.
    pub fn fee(&self, size: usize) -> u64 {
        let num = size as u128 * self.satoshis as u128;
        let den = self.bytes.max(1) as u128;
        u64::try_from(num.div_ceil(den)).unwrap_or(u64::MAX)
    }
}

impl Default for FeeRate {
    /// 500 satoshis per kilobyte.
    fn default() -> Self {
        Self::per_kilobyte(500)
    }
}

impl std::fmt::Display for FeeRate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} sat/{} B", self.satoshis, self.bytes)
    }
}

/// Fee for spending `inputs` into outputs of the given script sizes.
pub fn estimate_fee(inputs: &[ScriptTemplate], output_script_lens: &[usize], rate: FeeRate) -> u64 {
    rate.fee(estimate_size(inputs, output_script_lens))
}

/// Assemble an unsigned version 1 transaction with final sequences.
pub fn build_unsigned(inputs: &[OutPoint], outputs: Vec<TxOut>, lock_time: u32) -> Transaction {
    Transaction {
        version: Version::ONE,
        lock_time: LockTime::from_consensus(lock_time),
        input: inputs
            .iter()
            .map(|outpoint| TxIn {
                previous_output: *outpoint,
                script_sig: ScriptBuf::new(),
                sequence: Sequence::MAX,
                witness: Witness::new(),
            })
            .collect(),
        output: outputs,
    }
}

/// Produce the unlocking script for input `input_index`.
///
/// The key must control `prevout_script` under `template`. The signature
/// commits to `value` and uses SIGHASH_ALL | FORKID.
pub fn sign_input<C: Signing>(
    secp: &Secp256k1<C>,
    tx: &Transaction,
    input_index: usize,
    prevout_script: &Script,
    value: u64,
    secret_key: &SecretKey,
    template: ScriptTemplate,
) -> Result<ScriptBuf, BsvError> {
    let pubkey = PublicKey::new(bitcoin::secp256k1::PublicKey::from_secret_key(secp, secret_key));
    if template.locking_script(&pubkey).as_script() != prevout_script {
        return Err(BsvError::SigningError(format!(
            "key does not control {template} output of input {input_index}"
        )));
    }

    let digest = signature_hash(tx, input_index, prevout_script, value, SIGHASH_ALL_FORKID)?;
    let msg = Message::from_digest(digest);
    let signature = secp.sign_ecdsa(&msg, secret_key);

    let mut sig_bytes = signature.serialize_der().to_vec();
    sig_bytes.push(SIGHASH_ALL_FORKID as u8);

    template.unlocking_script(&sig_bytes, &pubkey)
}
