//! Replay-protected signature digest.
//!
//! BSV signs a BIP143-shaped preimage for every input, legacy scripts
//! included, and requires the FORKID bit in the sighash type so that
//! signatures cannot be replayed on chains that split from it.

use bitcoin::consensus::encode::serialize;
use bitcoin::hashes::{sha256d, Hash};
use bitcoin::{Script, Transaction};

use crate::error::BsvError;

pub const SIGHASH_ALL: u32 = 0x01;
pub const SIGHASH_NONE: u32 = 0x02;
pub const SIGHASH_SINGLE: u32 = 0x03;
pub const SIGHASH_FORKID: u32 = 0x40;
pub const SIGHASH_ANYONECANPAY: u32 = 0x80;

/// The only sighash type the wallet produces.
pub const SIGHASH_ALL_FORKID: u32 = SIGHASH_ALL | SIGHASH_FORKID;

const BASE_TYPE_MASK: u32 = 0x1f;

/// Digest signed by input `input_index`.
///
/// `script_code` is the locking script of the output being spent and
/// `value` its amount in satoshis.
pub fn signature_hash(
    tx: &Transaction,
    input_index: usize,
    script_code: &Script,
    value: u64,
    sighash_type: u32,
) -> Result<[u8; 32], BsvError> {
    let input = tx.input.get(input_index).ok_or(BsvError::InputOutOfRange {
        index: input_index,
        inputs: tx.input.len(),
    })?;

    let base_type = sighash_type & BASE_TYPE_MASK;
    let anyone_can_pay = sighash_type & SIGHASH_ANYONECANPAY != 0;

    let hash_prevouts = if anyone_can_pay {
        [0u8; 32]
    } else {
        let mut buf = Vec::with_capacity(36 * tx.input.len());
        for txin in &tx.input {
            buf.extend_from_slice(&serialize(&txin.previous_output));
        }
        sha256d::Hash::hash(&buf).to_byte_array()
    };

    let hash_sequence =
        if anyone_can_pay || base_type == SIGHASH_SINGLE || base_type == SIGHASH_NONE {
            [0u8; 32]
        } else {
            let mut buf = Vec::with_capacity(4 * tx.input.len());
            for txin in &tx.input {
                buf.extend_from_slice(&txin.sequence.0.to_le_bytes());
            }
            sha256d::Hash::hash(&buf).to_byte_array()
        };

    let hash_outputs = if base_type != SIGHASH_SINGLE && base_type != SIGHASH_NONE {
        let mut buf = Vec::new();
        for txout in &tx.output {
            buf.extend_from_slice(&serialize(txout));
        }
        sha256d::Hash::hash(&buf).to_byte_array()
    } else if base_type == SIGHASH_SINGLE && input_index < tx.output.len() {
        sha256d::Hash::hash(&serialize(&tx.output[input_index])).to_byte_array()
    } else {
        [0u8; 32]
    };

    let mut preimage = Vec::with_capacity(160 + script_code.len());
    preimage.extend_from_slice(&tx.version.0.to_le_bytes());
    preimage.extend_from_slice(&hash_prevouts);
    preimage.extend_from_slice(&hash_sequence);
    preimage.extend_from_slice(&serialize(&input.previous_output));
    preimage.extend_from_slice(&serialize(&script_code.to_owned()));
    preimage.extend_from_slice(&value.to_le_bytes());
    preimage.extend_from_slice(&input.sequence.0.to_le_bytes());
    preimage.extend_from_slice(&hash_outputs);
    preimage.extend_from_slice(&tx.lock_time.to_consensus_u32().to_le_bytes());
    preimage.extend_from_slice(&sighash_type.to_le_bytes());

    Ok(sha256d::Hash::hash(&preimage).to_byte_array())
}
