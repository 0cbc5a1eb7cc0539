use std::path::Path;

use chain_bsv::transaction::DUST_THRESHOLD;
use chain_bsv::{BsvNetwork, FeeRate};
use crypto_utils::KdfParams;
use serde::{Deserialize, Serialize};

use crate::error::WalletError;
use crate::keys::MAX_INDEX;

/// Wallet settings. Every field falls back to its default when absent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WalletConfig {
    /// Network the wallet's addresses and derivation paths belong to. Default mainnet.
    pub network: BsvNetwork,
    /// BIP-44 account index. Default 0.
    pub account: u32,
    /// Fee rate used when a payment does not name one. Default 500 sat/kB.
    pub fee_rate: FeeRate,
    /// Change below this is given to the miner instead. Default 546 sat.
    pub dust_threshold: u64,
    /// Confirmations a coin needs before `pay` will spend it. Default 1.
    pub min_confirmations: u32,
    /// Lock time written into new transactions. Default 0.
    pub lock_time: u32,
    /// Consecutive unused addresses that end a restore scan, and the number
    /// of unallocated addresses watched for incoming payments. Default 20.
    pub gap_limit: u32,
    /// Argon2id cost for the at-rest seed envelope.
    pub kdf: KdfParams,
}

impl Default for WalletConfig {
    fn default() -> Self {
        Self {
            network: BsvNetwork::Mainnet,
            account: 0,
            fee_rate: FeeRate::default(),
            dust_threshold: DUST_THRESHOLD,
            min_confirmations: 1,
            lock_time: 0,
            gap_limit: 20,
            kdf: KdfParams::default(),
        }
    }
}

impl WalletConfig {
    pub fn from_json_str(json: &str) -> Result<Self, WalletError> {
        let config: Self = serde_json::from_str(json)
            .map_err(|e| WalletError::InvalidConfig(format!("malformed config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, WalletError> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path).map_err(|e| {
            WalletError::InvalidConfig(format!("cannot read {}: {e}", path.display()))
        })?;
        Self::from_json_str(&json)
    }

    pub fn validate(&self) -> Result<(), WalletError> {
        if self.fee_rate.bytes == 0 {
            return Err(WalletError::InvalidConfig(
                "fee_rate.bytes must be non-zero".into(),
            ));
        }
        if self.account > MAX_INDEX {
            return Err(WalletError::InvalidConfig(format!(
                "account must be at most {MAX_INDEX}"
            )));
        }
        if self.gap_limit == 0 {
            return Err(WalletError::InvalidConfig("gap_limit must be positive".into()));
        }
        Ok(())
    }
}
