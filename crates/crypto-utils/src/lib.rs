//! # crypto-utils
//!
//! At-rest protection for wallet secrets: Argon2id password stretching,
//! AES-256-GCM sealing with associated data, secure randomness, and a
//! zeroizing byte buffer for decrypted plaintext.

pub mod encryption;
pub mod error;
pub mod kdf;
pub mod random;
pub mod zeroizing;

pub use error::CryptoError;
pub use kdf::KdfParams;
pub use zeroizing::SecretBytes;
