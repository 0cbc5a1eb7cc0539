use crypto_utils::{encryption, kdf, KdfParams, SecretBytes};
use serde::{Deserialize, Serialize};
use zeroize::Zeroize;

use crate::error::WalletError;

/// Current envelope format.
pub const ENVELOPE_VERSION: u8 = 1;

/// Associated data binding the ciphertext to its purpose.
const SEED_AAD: &[u8] = b"wallet/seed";

/// The seed as stored at rest: Argon2id-stretched password, AES-256-GCM.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncryptedSeed {
    pub version: u8,
    /// nonce || ciphertext || tag
    pub ciphertext: Vec<u8>,
    pub salt: Vec<u8>,
    /// Parameters used to stretch the password, so they can change later
    /// without breaking existing wallets.
    pub kdf: KdfParams,
}

/// Encrypt a seed with `password`.
pub fn encrypt_seed(
    seed: &[u8],
    password: &[u8],
    params: &KdfParams,
) -> Result<EncryptedSeed, WalletError> {
    let salt = kdf::generate_salt();
    let mut key = kdf::derive_key(password, &salt, params)?;
    let ciphertext = encryption::seal(seed, &key, SEED_AAD);
    key.zeroize();

    Ok(EncryptedSeed {
        version: ENVELOPE_VERSION,
        ciphertext: ciphertext?,
        salt: salt.to_vec(),
        kdf: *params,
    })
}

/// Decrypt a seed. A wrong password surfaces as `DecryptionFailed`.
pub fn decrypt_seed(encrypted: &EncryptedSeed, password: &[u8]) -> Result<SecretBytes, WalletError> {
    if encrypted.version != ENVELOPE_VERSION {
        return Err(WalletError::DecryptionFailed(format!(
            "unsupported envelope version {}",
            encrypted.version
        )));
    }
    let salt: [u8; kdf::SALT_LEN] = encrypted
        .salt
        .as_slice()
        .try_into()
        .map_err(|_| WalletError::DecryptionFailed("Invalid salt length".into()))?;

    let mut key = kdf::derive_key(password, &salt, &encrypted.kdf)?;
    let seed = encryption::open(&encrypted.ciphertext, &key, SEED_AAD);
    key.zeroize();

    Ok(seed?)
}

/// Serialize EncryptedSeed to JSON for storage
pub fn serialize_encrypted_seed(encrypted: &EncryptedSeed) -> Result<String, WalletError> {
    Ok(serde_json::to_string(encrypted)?)
}

/// Deserialize EncryptedSeed from JSON
pub fn deserialize_encrypted_seed(json: &str) -> Result<EncryptedSeed, WalletError> {
    Ok(serde_json::from_str(json)?)
}
