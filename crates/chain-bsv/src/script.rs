//! Locking and unlocking script templates owned by the wallet.

use bitcoin::hashes::Hash;
use bitcoin::opcodes::all::OP_CHECKSIG;
use bitcoin::script::{Builder, Instruction, PushBytesBuf};
use bitcoin::{PubkeyHash, PublicKey, Script, ScriptBuf};
use serde::{Deserialize, Serialize};

use crate::error::BsvError;

/// Largest DER-encoded low-S signature plus the trailing sighash byte.
pub const MAX_SIGNATURE_LEN: usize = 73;

/// Length of a compressed secp256k1 public key.
pub const COMPRESSED_PUBKEY_LEN: usize = 33;

/// Length of a P2PKH locking script.
pub const P2PKH_SCRIPT_LEN: usize = 25;

/// Script templates a wallet key can back.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScriptTemplate {
    /// `OP_DUP OP_HASH160 <hash160(pubkey)> OP_EQUALVERIFY OP_CHECKSIG`
    P2pkh,
    /// `<pubkey> OP_CHECKSIG`
    P2pk,
}

impl ScriptTemplate {
    pub const ALL: [ScriptTemplate; 2] = [ScriptTemplate::P2pkh, ScriptTemplate::P2pk];

    /// The locking script paying `pubkey` under this template.
    pub fn locking_script(self, pubkey: &PublicKey) -> ScriptBuf {
        match self {
            ScriptTemplate::P2pkh => ScriptBuf::new_p2pkh(&pubkey.pubkey_hash()),
            ScriptTemplate::P2pk => ScriptBuf::new_p2pk(pubkey),
        }
    }

    /// Upper bound on the size of a finished unlocking script.
    pub fn expected_unlocking_size(self) -> usize {
        match self {
            ScriptTemplate::P2pkh => 1 + MAX_SIGNATURE_LEN + 1 + COMPRESSED_PUBKEY_LEN,
            ScriptTemplate::P2pk => 1 + MAX_SIGNATURE_LEN,
        }
    }

    /// Assemble the unlocking script from a finished signature
    /// (DER bytes with the sighash byte appended).
    pub fn unlocking_script(self, signature: &[u8], pubkey: &PublicKey) -> Result<ScriptBuf, BsvError> {
        let sig = PushBytesBuf::try_from(signature.to_vec())
            .map_err(|e| BsvError::InvalidScript(format!("signature push too large: {e}")))?;

        let builder = Builder::new().push_slice(sig);
        let builder = match self {
            ScriptTemplate::P2pkh => builder.push_key(pubkey),
            ScriptTemplate::P2pk => builder,
        };
        Ok(builder.into_script())
    }
}

impl std::fmt::Display for ScriptTemplate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ScriptTemplate::P2pkh => write!(f, "p2pkh"),
            ScriptTemplate::P2pk => write!(f, "p2pk"),
        }
    }
}

/// A recognised locking script with the data needed to satisfy it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LockingScript {
    P2pkh(PubkeyHash),
    P2pk(PublicKey),
}

impl LockingScript {
    pub fn template(&self) -> ScriptTemplate {
        match self {
            LockingScript::P2pkh(_) => ScriptTemplate::P2pkh,
            LockingScript::P2pk(_) => ScriptTemplate::P2pk,
        }
    }
}

/// Recognise a P2PKH or P2PK locking script.
pub fn classify(script: &Script) -> Result<LockingScript, BsvError> {
    let bytes = script.as_bytes();

    if script.is_p2pkh() {
        let hash: [u8; 20] = bytes[3..23]
            .try_into()
            .map_err(|_| BsvError::InvalidScript("truncated P2PKH hash".into()))?;
        return Ok(LockingScript::P2pkh(PubkeyHash::from_byte_array(hash)));
    }

    // <33 or 65 byte push> OP_CHECKSIG
    let key_len = bytes.first().copied().unwrap_or_default() as usize;
    let is_p2pk = (key_len == 33 || key_len == 65)
        && bytes.len() == key_len + 2
        && bytes[key_len + 1] == OP_CHECKSIG.to_u8();
    if is_p2pk {
        let pubkey = PublicKey::from_slice(&bytes[1..=key_len])
            .map_err(|e| BsvError::InvalidPublicKey(format!("P2PK key does not parse: {e}")))?;
        return Ok(LockingScript::P2pk(pubkey));
    }

    Err(BsvError::UnsupportedScript(hex::encode(bytes)))
}

/// Split a push-only unlocking script into its data elements.
pub fn push_data(script: &Script) -> Result<Vec<Vec<u8>>, BsvError> {
    script
        .instructions()
        .map(|ins| match ins {
            Ok(Instruction::PushBytes(data)) => Ok(data.as_bytes().to_vec()),
            Ok(Instruction::Op(op)) => Err(BsvError::InvalidScript(format!(
                "unlocking script is not push-only: {op}"
            ))),
            Err(e) => Err(BsvError::InvalidScript(format!("malformed script: {e}"))),
        })
        .collect()
}
