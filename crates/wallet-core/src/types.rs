use bitcoin::{OutPoint, ScriptBuf, Txid};
use chain_bsv::{FeeRate, ScriptTemplate};
use serde::{Deserialize, Serialize};

use crate::keys::KeyPath;

/// Which BIP-44 chain an address belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Purpose {
    Receive,
    Change,
}

impl Purpose {
    pub const ALL: [Purpose; 2] = [Purpose::Receive, Purpose::Change];

    /// The `chain` component of the derivation path.
    pub fn chain_index(self) -> u32 {
        match self {
            Purpose::Receive => 0,
            Purpose::Change => 1,
        }
    }

    pub fn from_chain_index(index: u32) -> Option<Self> {
        match index {
            0 => Some(Purpose::Receive),
            1 => Some(Purpose::Change),
            _ => None,
        }
    }
}

impl std::fmt::Display for Purpose {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Purpose::Receive => write!(f, "receive"),
            Purpose::Change => write!(f, "change"),
        }
    }
}

/// Confirmation state as reported by the chain-state collaborator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase", tag = "state")]
pub enum Confirmation {
    Unconfirmed,
    Confirmed { height: u32 },
}

impl Confirmation {
    /// Number of confirmations given the current chain tip.
    ///
    /// A confirmed output always counts at least one confirmation, even
    /// when the tip has not been reported yet.
    pub fn confirmations(&self, tip: u32) -> u32 {
        match self {
            Confirmation::Unconfirmed => 0,
            Confirmation::Confirmed { height } => tip.saturating_sub(*height).saturating_add(1),
        }
    }

    pub fn height(&self) -> Option<u32> {
        match self {
            Confirmation::Unconfirmed => None,
            Confirmation::Confirmed { height } => Some(*height),
        }
    }
}

/// An output owned by one of the wallet's keys.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Utxo {
    pub outpoint: OutPoint,
    /// Value in satoshis.
    pub value: u64,
    pub script: ScriptBuf,
    /// Derivation path of the key that controls `script`.
    pub path: KeyPath,
    pub template: ScriptTemplate,
    pub confirmation: Confirmation,
    pub spent: bool,
    /// Transaction that consumed this output, when known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub spent_by: Option<Txid>,
}

impl Utxo {
    /// Two reports describe the same output when everything except the
    /// confirmation and spend state agrees.
    pub fn same_output(&self, other: &Utxo) -> bool {
        self.outpoint == other.outpoint
            && self.value == other.value
            && self.script == other.script
            && self.path == other.path
            && self.template == other.template
    }
}

/// An output observed on chain that may pay one of the wallet's scripts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IncomingOutput {
    pub outpoint: OutPoint,
    pub value: u64,
    pub script: ScriptBuf,
    pub confirmation: Confirmation,
}

/// A caller's request to pay `value` satoshis to `destination`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaymentRequest {
    pub destination: ScriptBuf,
    pub value: u64,
    /// Overrides the configured fee rate for this payment only.
    pub fee_rate: Option<FeeRate>,
}

impl PaymentRequest {
    pub fn new(destination: ScriptBuf, value: u64) -> Self {
        Self {
            destination,
            value,
            fee_rate: None,
        }
    }

    pub fn with_fee_rate(mut self, fee_rate: FeeRate) -> Self {
        self.fee_rate = Some(fee_rate);
        self
    }
}

/// A freshly allocated receive address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReceiveAddress {
    pub address: String,
    pub path: KeyPath,
    pub script: ScriptBuf,
}

/// Format an outpoint as `txid:vout` for error messages and logs.
pub(crate) fn outpoint_label(outpoint: &OutPoint) -> String {
    format!("{}:{}", outpoint.txid, outpoint.vout)
}
