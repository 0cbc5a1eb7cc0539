//! # wallet-core
//!
//! Single-account BSV wallet: hierarchical keys, a UTXO ledger, coin
//! selection, transaction assembly and FORKID signing, composed behind
//! [`Wallet`]. Network I/O is left to the embedding application, which
//! feeds chain events in and broadcasts the signed bytes it gets back.

pub mod builder;
pub mod config;
pub mod error;
pub mod keys;
pub mod ledger;
pub mod mnemonic;
pub mod restore;
pub mod seed_encryption;
pub mod select;
pub mod signer;
pub mod store;
pub mod types;
pub mod wallet;

pub use chain_bsv::{BsvNetwork, FeeRate, ScriptTemplate};
pub use config::WalletConfig;
pub use error::{ErrorKind, WalletError};
pub use keys::{KeyPath, Keychain};
pub use ledger::{Ledger, Reversal};
pub use mnemonic::ZeroizingMnemonic;
pub use restore::{AddressHistory, RestoreSummary};
pub use signer::SignedTransaction;
pub use store::{FileStore, MemoryStore, WalletStore};
pub use types::{Confirmation, IncomingOutput, PaymentRequest, Purpose, ReceiveAddress, Utxo};
pub use wallet::{Wallet, WalletStatus};

/// Generate a fresh 24-word mnemonic.
pub fn generate_mnemonic() -> Result<ZeroizingMnemonic, WalletError> {
    mnemonic::generate_mnemonic()
}

/// Check a phrase's words and checksum.
pub fn validate_mnemonic(phrase: &str) -> bool {
    mnemonic::validate_mnemonic(phrase)
}

/// Whether `address` is a P2PKH address the wallet can pay on `network`.
pub fn validate_address(address: &str, network: BsvNetwork) -> Result<bool, WalletError> {
    Ok(chain_bsv::address::validate_address(address, network)?)
}
