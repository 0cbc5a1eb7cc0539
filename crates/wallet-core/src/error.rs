use thiserror::Error;

/// Broad class of a [`WalletError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Bad input or wrong wallet state. Nothing was mutated.
    User,
    /// A collaborator reported something that contradicts the ledger or
    /// keychain. The ledger keeps its last good state.
    Consistency,
    /// A defect inside the wallet. The operation is aborted with no effects.
    Invariant,
    /// Storage, encoding or cryptographic backend failure.
    Infrastructure,
}

#[derive(Debug, Error)]
pub enum WalletError {
    // User errors
    #[error("Insufficient funds: {available} sat available, {required} sat required")]
    InsufficientFunds { available: u64, required: u64 },

    #[error("Wallet not initialized")]
    NotInitialized,

    #[error("Wallet already initialized")]
    AlreadyInitialized,

    #[error("Invalid mnemonic: {0}")]
    InvalidMnemonic(String),

    #[error("Invalid seed: {0}")]
    InvalidSeed(String),

    #[error("Invalid address: {0}")]
    InvalidAddress(String),

    #[error("Invalid amount: {0}")]
    InvalidAmount(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Decryption failed: {0}")]
    DecryptionFailed(String),

    #[error("Key derivation failed: {0}")]
    KeyDerivation(String),

    // Consistency errors
    #[error("Ledger consistency error for {outpoint}: {reason}")]
    LedgerConsistency { outpoint: String, reason: String },

    #[error("Unknown UTXO: {0}")]
    UnknownUtxo(String),

    #[error("No key for input {outpoint} (path {path})")]
    MissingKey { outpoint: String, path: String },

    #[error("Unknown payment: {0}")]
    UnknownPayment(String),

    // Invariant violations
    #[error("Value conservation violated: inputs {inputs} sat, outputs {outputs} sat, fee {fee} sat")]
    ValueConservation { inputs: u64, outputs: u64, fee: u64 },

    #[error("Signature verification failed on input {input}: {reason}")]
    SignatureVerification { input: usize, reason: String },

    // Infrastructure
    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Encryption failed: {0}")]
    EncryptionFailed(String),

    #[error("Protocol error: {0}")]
    Protocol(String),
}

impl WalletError {
    pub fn kind(&self) -> ErrorKind {
        use WalletError::*;
        match self {
            InsufficientFunds { .. }
            | NotInitialized
            | AlreadyInitialized
            | InvalidMnemonic(_)
            | InvalidSeed(_)
            | InvalidAddress(_)
            | InvalidAmount(_)
            | InvalidConfig(_)
            | DecryptionFailed(_)
            | KeyDerivation(_) => ErrorKind::User,
            LedgerConsistency { .. } | UnknownUtxo(_) | MissingKey { .. } | UnknownPayment(_) => {
                ErrorKind::Consistency
            }
            ValueConservation { .. } | SignatureVerification { .. } => ErrorKind::Invariant,
            Storage(_) | Serialization(_) | EncryptionFailed(_) | Protocol(_) => {
                ErrorKind::Infrastructure
            }
        }
    }

    /// Invariant violations must halt the operation; they are never retried.
    pub fn is_fatal(&self) -> bool {
        self.kind() == ErrorKind::Invariant
    }
}

impl From<crypto_utils::CryptoError> for WalletError {
    fn from(e: crypto_utils::CryptoError) -> Self {
        match e {
            crypto_utils::CryptoError::OpenFailed(msg) => WalletError::DecryptionFailed(msg),
            other => WalletError::EncryptionFailed(other.to_string()),
        }
    }
}

impl From<chain_bsv::BsvError> for WalletError {
    fn from(e: chain_bsv::BsvError) -> Self {
        use chain_bsv::BsvError;
        match e {
            BsvError::InvalidAddress(msg) => WalletError::InvalidAddress(msg),
            BsvError::InvalidNetwork(msg) | BsvError::InvalidFeeRate(msg) => {
                WalletError::InvalidConfig(msg)
            }
            other => WalletError::Protocol(other.to_string()),
        }
    }
}

impl From<serde_json::Error> for WalletError {
    fn from(e: serde_json::Error) -> Self {
        WalletError::Serialization(e.to_string())
    }
}
