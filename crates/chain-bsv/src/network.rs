use std::str::FromStr;

use bitcoin::Network;
use serde::{Deserialize, Serialize};

use crate::error::BsvError;

/// SLIP-44 coin type registered for Bitcoin SV.
pub const BSV_COIN_TYPE: u32 = 236;

/// SLIP-44 coin type shared by all test networks.
pub const TESTNET_COIN_TYPE: u32 = 1;

/// Supported BSV networks.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BsvNetwork {
    #[default]
    Mainnet,
    Testnet,
    Regtest,
}

impl BsvNetwork {
    /// The `bitcoin` crate network with the same address prefixes.
    pub fn to_bitcoin_network(self) -> Network {
        match self {
            BsvNetwork::Mainnet => Network::Bitcoin,
            BsvNetwork::Testnet => Network::Testnet,
            BsvNetwork::Regtest => Network::Regtest,
        }
    }

    /// BIP-44 coin type used in derivation paths on this network.
    pub fn coin_type(self) -> u32 {
        match self {
            BsvNetwork::Mainnet => BSV_COIN_TYPE,
            BsvNetwork::Testnet | BsvNetwork::Regtest => TESTNET_COIN_TYPE,
        }
    }
}

impl std::fmt::Display for BsvNetwork {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BsvNetwork::Mainnet => write!(f, "mainnet"),
            BsvNetwork::Testnet => write!(f, "testnet"),
            BsvNetwork::Regtest => write!(f, "regtest"),
        }
    }
}

impl FromStr for BsvNetwork {
    type Err = BsvError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "mainnet" | "main" => Ok(BsvNetwork::Mainnet),
            "testnet" | "test" => Ok(BsvNetwork::Testnet),
            "regtest" => Ok(BsvNetwork::Regtest),
            other => Err(BsvError::InvalidNetwork(other.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn converts_to_bitcoin_network() {
        assert_eq!(BsvNetwork::Mainnet.to_bitcoin_network(), Network::Bitcoin);
        assert_eq!(BsvNetwork::Testnet.to_bitcoin_network(), Network::Testnet);
        assert_eq!(BsvNetwork::Regtest.to_bitcoin_network(), Network::Regtest);
    }

    #[test]
    fn coin_types() {
        assert_eq!(BsvNetwork::Mainnet.coin_type(), 236);
        assert_eq!(BsvNetwork::Testnet.coin_type(), 1);
        assert_eq!(BsvNetwork::Regtest.coin_type(), 1);
    }

    #[test]
    fn display_and_parse_agree() {
        for net in [BsvNetwork::Mainnet, BsvNetwork::Testnet, BsvNetwork::Regtest] {
            assert_eq!(net.to_string().parse::<BsvNetwork>().unwrap(), net);
        }
    }

    #[test]
    fn unknown_network_is_rejected() {
        assert!(matches!(
            "signet".parse::<BsvNetwork>(),
            Err(BsvError::InvalidNetwork(_))
        ));
    }

    #[test]
    fn serde_uses_lowercase_names() {
        let json = serde_json::to_string(&BsvNetwork::Testnet).unwrap();
        assert_eq!(json, "\"testnet\"");
    }
}
