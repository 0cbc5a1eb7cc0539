use bip39::{Language, Mnemonic};
use crypto_utils::SecretBytes;
use zeroize::Zeroize;

use crate::error::WalletError;

/// Entropy sizes BIP-39 accepts, in bytes (12 to 24 words).
pub const ENTROPY_LENGTHS: [usize; 5] = [16, 20, 24, 28, 32];

/// Generate a fresh 24-word mnemonic from 256 bits of OS randomness.
pub fn generate_mnemonic() -> Result<ZeroizingMnemonic, WalletError> {
    let mut entropy = crypto_utils::random::random_bytes_fixed::<32>();
    let mnemonic = mnemonic_from_entropy(&entropy);
    entropy.zeroize();
    mnemonic
}

/// Encode caller-supplied entropy as an English mnemonic.
pub fn mnemonic_from_entropy(entropy: &[u8]) -> Result<ZeroizingMnemonic, WalletError> {
    if !ENTROPY_LENGTHS.contains(&entropy.len()) {
        return Err(WalletError::InvalidSeed(format!(
            "entropy must be one of {ENTROPY_LENGTHS:?} bytes, got {}",
            entropy.len()
        )));
    }
    let mnemonic = Mnemonic::from_entropy_in(Language::English, entropy)
        .map_err(|e| WalletError::InvalidMnemonic(e.to_string()))?;
    Ok(ZeroizingMnemonic {
        phrase: mnemonic.to_string(),
    })
}

/// Validate a mnemonic phrase
pub fn validate_mnemonic(phrase: &str) -> bool {
    Mnemonic::parse_in_normalized(Language::English, phrase).is_ok()
}

/// Derive the 64-byte BIP-39 seed from a phrase and optional passphrase.
pub fn mnemonic_to_seed(phrase: &str, passphrase: &str) -> Result<SecretBytes, WalletError> {
    let mnemonic = Mnemonic::parse_in_normalized(Language::English, phrase)
        .map_err(|e| WalletError::InvalidMnemonic(e.to_string()))?;

    let mut seed = mnemonic.to_seed(passphrase);
    let out = SecretBytes::new(seed.to_vec());
    seed.zeroize();
    Ok(out)
}

/// Validate a single word against the BIP-39 word list
pub fn is_valid_word(word: &str) -> bool {
    Language::English.find_word(word).is_some()
}

/// A mnemonic phrase that is wiped from memory on drop.
pub struct ZeroizingMnemonic {
    phrase: String,
}

impl ZeroizingMnemonic {
    pub fn new(phrase: String) -> Result<Self, WalletError> {
        if !validate_mnemonic(&phrase) {
            return Err(WalletError::InvalidMnemonic("Invalid mnemonic phrase".into()));
        }
        Ok(Self { phrase })
    }

    pub fn as_str(&self) -> &str {
        &self.phrase
    }

    pub fn to_seed(&self, passphrase: &str) -> Result<SecretBytes, WalletError> {
        mnemonic_to_seed(&self.phrase, passphrase)
    }

    pub fn words(&self) -> Vec<&str> {
        self.phrase.split_whitespace().collect()
    }
}

impl std::fmt::Debug for ZeroizingMnemonic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "ZeroizingMnemonic({} words)", self.words().len())
    }
}

impl Drop for ZeroizingMnemonic {
    fn drop(&mut self) {
        self.phrase.zeroize();
    }
}
