//! Bitcoin SV protocol support for the wallet core.
//!
//! Provides P2PKH address handling, the P2PKH and P2PK script templates,
//! the replay-protected (FORKID) signature digest, transaction size and fee
//! estimation, per-input signing, and local verification of unlocking
//! scripts against the outputs they spend.

pub mod address;
pub mod error;
pub mod network;
pub mod script;
pub mod sighash;
pub mod transaction;
pub mod verify;

pub use error::BsvError;
pub use network::BsvNetwork;
pub use script::ScriptTemplate;
pub use transaction::FeeRate;
