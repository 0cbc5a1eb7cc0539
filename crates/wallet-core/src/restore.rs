//! Gap-limit scan used when restoring a wallet from its seed.

use bitcoin::Script;
use chain_bsv::ScriptTemplate;
use tracing::debug;

use crate::error::WalletError;
use crate::keys::{Keychain, MAX_INDEX};
use crate::types::Purpose;

/// Answers whether a locking script ever appeared on chain.
pub trait AddressHistory {
    fn is_used(&self, script: &Script) -> Result<bool, WalletError>;
}

impl<F> AddressHistory for F
where
    F: Fn(&Script) -> bool,
{
    fn is_used(&self, script: &Script) -> Result<bool, WalletError> {
        Ok(self(script))
    }
}

/// Highest used index found on each chain.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RestoreSummary {
    pub last_receive: Option<u32>,
    pub last_change: Option<u32>,
}

impl RestoreSummary {
    pub fn last_used(&self, purpose: Purpose) -> Option<u32> {
        match purpose {
            Purpose::Receive => self.last_receive,
            Purpose::Change => self.last_change,
        }
    }
}

/// Walk one chain until `gap_limit` consecutive indices are unused.
///
/// An index counts as used when any of its script templates is.
pub fn scan_chain(
    keychain: &Keychain,
    purpose: Purpose,
    history: &dyn AddressHistory,
    gap_limit: u32,
) -> Result<Option<u32>, WalletError> {
    let mut last_used = None;
    let mut unused_run = 0u32;
    let mut index = 0u32;

    while unused_run < gap_limit && index <= MAX_INDEX {
        let path = keychain.path(purpose, index)?;
        let mut used = false;
        for template in ScriptTemplate::ALL {
            if history.is_used(&keychain.locking_script(&path, template)?)? {
                used = true;
                break;
            }
        }

        if used {
            debug!(%path, "restore: used address found");
            last_used = Some(index);
            unused_run = 0;
        } else {
            unused_run += 1;
        }
        index += 1;
    }
    Ok(last_used)
}

/// Scan both chains.
pub fn scan(
    keychain: &Keychain,
    history: &dyn AddressHistory,
    gap_limit: u32,
) -> Result<RestoreSummary, WalletError> {
    Ok(RestoreSummary {
        last_receive: scan_chain(keychain, Purpose::Receive, history, gap_limit)?,
        last_change: scan_chain(keychain, Purpose::Change, history, gap_limit)?,
    })
}
