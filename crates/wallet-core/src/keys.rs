//! Hierarchical deterministic keys.
//!
//! Keys are a pure function of (seed, path). The [`Keychain`] owns the seed
//! and caches public keys by path; private keys are derived on demand for
//! signing and erased when the [`KeyPair`] is dropped.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use bip32::{DerivationPath, XPrv};
use bitcoin::secp256k1::SecretKey;
use bitcoin::{PublicKey, ScriptBuf};
use chain_bsv::{address, BsvNetwork, ScriptTemplate};
use k256::ecdsa::SigningKey;
use parking_lot::RwLock;
use secrecy::{ExposeSecret, SecretSlice};
use serde::{Deserialize, Serialize};
use zeroize::Zeroize;

use crate::error::WalletError;
use crate::types::Purpose;

/// Bit marking a hardened child index.
pub const HARDENED: u32 = 0x8000_0000;

/// Largest non-hardened child index.
pub const MAX_INDEX: u32 = HARDENED - 1;

/// BIP-44 purpose field.
const BIP44_PURPOSE: u32 = 44;

/// Accepted seed lengths in bytes (BIP-32).
pub const MIN_SEED_LEN: usize = 16;
pub const MAX_SEED_LEN: usize = 64;

/// A derivation path such as `m/44'/236'/0'/0/5`.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct KeyPath(Vec<u32>);

impl KeyPath {
    /// `m/44'/coin_type'/account'/chain/index`
    pub fn bip44(
        network: BsvNetwork,
        account: u32,
        purpose: Purpose,
        index: u32,
    ) -> Result<Self, WalletError> {
        if account > MAX_INDEX {
            return Err(WalletError::KeyDerivation(format!(
                "account {account} exceeds {MAX_INDEX}"
            )));
        }
        if index > MAX_INDEX {
            return Err(WalletError::KeyDerivation(format!(
                "{purpose} index {index} exceeds {MAX_INDEX}"
            )));
        }
        Ok(Self(vec![
            BIP44_PURPOSE | HARDENED,
            network.coin_type() | HARDENED,
            account | HARDENED,
            purpose.chain_index(),
            index,
        ]))
    }

    pub fn components(&self) -> &[u32] {
        &self.0
    }

    /// Receive or change, for a BIP-44 shaped path.
    pub fn purpose(&self) -> Option<Purpose> {
        match self.0.as_slice() {
            [_, _, _, chain, _] => Purpose::from_chain_index(*chain),
            _ => None,
        }
    }

    /// Address index, for a BIP-44 shaped path.
    pub fn index(&self) -> Option<u32> {
        match self.0.as_slice() {
            [_, _, _, _, index] if index & HARDENED == 0 => Some(*index),
            _ => None,
        }
    }

    fn to_derivation_path(&self) -> Result<DerivationPath, WalletError> {
        self.to_string()
            .parse()
            .map_err(|e: bip32::Error| WalletError::KeyDerivation(format!("{self}: {e}")))
    }
}

impl fmt::Display for KeyPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "m")?;
        for child in &self.0 {
            if child & HARDENED != 0 {
                write!(f, "/{}'", child & MAX_INDEX)?;
            } else {
                write!(f, "/{child}")?;
            }
        }
        Ok(())
    }
}

impl fmt::Debug for KeyPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "KeyPath({self})")
    }
}

impl FromStr for KeyPath {
    type Err = WalletError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let rest = s
            .strip_prefix('m')
            .ok_or_else(|| WalletError::KeyDerivation(format!("path must start with m: {s}")))?;
        if rest.is_empty() {
            return Ok(Self(Vec::new()));
        }
        let rest = rest
            .strip_prefix('/')
            .ok_or_else(|| WalletError::KeyDerivation(format!("malformed path: {s}")))?;

        rest.split('/')
            .map(|component| {
                let (digits, hardened) = match component
                    .strip_suffix('\'')
                    .or_else(|| component.strip_suffix('h'))
                {
                    Some(digits) => (digits, true),
                    None => (component, false),
                };
                let index: u32 = digits.parse().map_err(|e| {
                    WalletError::KeyDerivation(format!("invalid path component {component:?}: {e}"))
                })?;
                if index > MAX_INDEX {
                    return Err(WalletError::KeyDerivation(format!(
                        "path component {index} exceeds {MAX_INDEX}"
                    )));
                }
                Ok(if hardened { index | HARDENED } else { index })
            })
            .collect::<Result<Vec<_>, _>>()
            .map(Self)
    }
}

impl TryFrom<String> for KeyPath {
    type Error = WalletError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<KeyPath> for String {
    fn from(path: KeyPath) -> Self {
        path.to_string()
    }
}

/// A derived secp256k1 key pair. The private scalar is erased on drop.
pub struct KeyPair {
    pub secret: SecretKey,
    pub public: PublicKey,
    pub path: KeyPath,
}

impl KeyPair {
    pub fn locking_script(&self, template: ScriptTemplate) -> ScriptBuf {
        template.locking_script(&self.public)
    }
}

impl fmt::Debug for KeyPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyPair")
            .field("public", &self.public)
            .field("path", &self.path)
            .finish_non_exhaustive()
    }
}

impl Drop for KeyPair {
    fn drop(&mut self) {
        self.secret.non_secure_erase();
    }
}

/// Derive the key pair at `path` from `seed` using BIP-32.
pub fn derive_key(seed: &[u8], path: &KeyPath) -> Result<KeyPair, WalletError> {
    let derivation_path = path.to_derivation_path()?;

    let xprv = XPrv::derive_from_path(seed, &derivation_path)
        .map_err(|e| WalletError::KeyDerivation(format!("{path}: {e}")))?;

    let mut private_key_bytes: [u8; 32] = xprv.to_bytes().into();
    let signing_key = SigningKey::from_bytes(&private_key_bytes.into())
        .map_err(|e| WalletError::KeyDerivation(e.to_string()));
    let secret = SecretKey::from_slice(&private_key_bytes)
        .map_err(|e| WalletError::KeyDerivation(e.to_string()));
    private_key_bytes.zeroize();
    let (signing_key, secret) = (signing_key?, secret?);

    let public_key_compressed: [u8; 33] = signing_key
        .verifying_key()
        .to_sec1_bytes()
        .as_ref()
        .try_into()
        .map_err(|_| WalletError::KeyDerivation("invalid public key length".into()))?;
    let public = PublicKey::from_slice(&public_key_compressed)
        .map_err(|e| WalletError::KeyDerivation(e.to_string()))?;

    Ok(KeyPair {
        secret,
        public,
        path: path.clone(),
    })
}

/// Supplies private keys to the signing engine.
pub trait KeySource {
    fn key_pair(&self, path: &KeyPath) -> Result<KeyPair, WalletError>;
}

/// The wallet's seed plus a public-key cache.
pub struct Keychain {
    seed: SecretSlice<u8>,
    network: BsvNetwork,
    account: u32,
    cache: RwLock<HashMap<KeyPath, PublicKey>>,
}

impl Keychain {
    pub fn new(seed: &[u8], network: BsvNetwork, account: u32) -> Result<Self, WalletError> {
        if !(MIN_SEED_LEN..=MAX_SEED_LEN).contains(&seed.len()) {
            return Err(WalletError::InvalidSeed(format!(
                "seed must be {MIN_SEED_LEN} to {MAX_SEED_LEN} bytes, got {}",
                seed.len()
            )));
        }
        if account > MAX_INDEX {
            return Err(WalletError::InvalidConfig(format!(
                "account {account} exceeds {MAX_INDEX}"
            )));
        }
        Ok(Self {
            seed: SecretSlice::from(seed.to_vec()),
            network,
            account,
            cache: RwLock::new(HashMap::new()),
        })
    }

    pub fn network(&self) -> BsvNetwork {
        self.network
    }

    pub fn account(&self) -> u32 {
        self.account
    }

    pub fn path(&self, purpose: Purpose, index: u32) -> Result<KeyPath, WalletError> {
        KeyPath::bip44(self.network, self.account, purpose, index)
    }

    pub fn public_key(&self, path: &KeyPath) -> Result<PublicKey, WalletError> {
        if let Some(pk) = self.cache.read().get(path) {
            return Ok(*pk);
        }
        let pair = derive_key(self.seed.expose_secret(), path)?;
        self.cache.write().insert(path.clone(), pair.public);
        Ok(pair.public)
    }

    pub fn locking_script(
        &self,
        path: &KeyPath,
        template: ScriptTemplate,
    ) -> Result<ScriptBuf, WalletError> {
        Ok(template.locking_script(&self.public_key(path)?))
    }

    pub fn address(&self, path: &KeyPath) -> Result<String, WalletError> {
        let pk = self.public_key(path)?;
        Ok(address::pubkey_to_p2pkh_address(
            &pk.inner.serialize(),
            self.network,
        )?)
    }
}

impl KeySource for Keychain {
    fn key_pair(&self, path: &KeyPath) -> Result<KeyPair, WalletError> {
        derive_key(self.seed.expose_secret(), path)
    }
}

impl fmt::Debug for Keychain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Keychain")
            .field("network", &self.network)
            .field("account", &self.account)
            .field("cached_keys", &self.cache.read().len())
            .finish_non_exhaustive()
    }
}

/// Next unused index on each chain. Only ever moves forward.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddressCounters {
    pub receive: u32,
    pub change: u32,
}

impl AddressCounters {
    pub fn peek(&self, purpose: Purpose) -> u32 {
        match purpose {
            Purpose::Receive => self.receive,
            Purpose::Change => self.change,
        }
    }

    fn slot(&mut self, purpose: Purpose) -> &mut u32 {
        match purpose {
            Purpose::Receive => &mut self.receive,
            Purpose::Change => &mut self.change,
        }
    }

    /// Hand out the next index and advance past it.
    pub fn allocate(&mut self, purpose: Purpose) -> Result<u32, WalletError> {
        let slot = self.slot(purpose);
        let index = *slot;
        if index > MAX_INDEX {
            return Err(WalletError::KeyDerivation(format!(
                "{purpose} chain exhausted"
            )));
        }
        *slot = index + 1;
        Ok(index)
    }

    /// Make sure `index` will never be handed out again.
    pub fn advance_past(&mut self, purpose: Purpose, index: u32) -> bool {
        let slot = self.slot(purpose);
        let next = index.saturating_add(1);
        if next > *slot {
            *slot = next;
            true
        } else {
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mnemonic::mnemonic_to_seed;

    // BIP-39 test vector: "abandon" x11 + "about"
    const TEST_MNEMONIC: &str = "abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon about";

    fn test_seed() -> Vec<u8> {
        mnemonic_to_seed(TEST_MNEMONIC, "").unwrap().to_vec()
    }

    #[test]
    fn bip44_path_display() {
        let path = KeyPath::bip44(BsvNetwork::Mainnet, 0, Purpose::Change, 5).unwrap();
        assert_eq!(path.to_string(), "m/44'/236'/0'/1/5");
        assert_eq!(path.purpose(), Some(Purpose::Change));
        assert_eq!(path.index(), Some(5));

        let test = KeyPath::bip44(BsvNetwork::Testnet, 2, Purpose::Receive, 0).unwrap();
        assert_eq!(test.to_string(), "m/44'/1'/2'/0/0");
    }

    #[test]
    fn path_parse_roundtrip() {
        let path: KeyPath = "m/44'/236'/0'/0/7".parse().unwrap();
        assert_eq!(path, KeyPath::bip44(BsvNetwork::Mainnet, 0, Purpose::Receive, 7).unwrap());
        let h: KeyPath = "m/44h/236h/0h/0/7".parse().unwrap();
        assert_eq!(h, path);
        assert_eq!("m".parse::<KeyPath>().unwrap().components(), &[] as &[u32]);
    }

    #[test]
    fn path_rejects_garbage() {
        assert!("44'/0".parse::<KeyPath>().is_err());
        assert!("m/abc".parse::<KeyPath>().is_err());
        assert!("m/2147483648".parse::<KeyPath>().is_err());
        assert!(KeyPath::bip44(BsvNetwork::Mainnet, 0, Purpose::Receive, HARDENED).is_err());
    }

    #[test]
    fn path_serde_as_string() {
        let path = KeyPath::bip44(BsvNetwork::Mainnet, 0, Purpose::Receive, 3).unwrap();
        let json = serde_json::to_string(&path).unwrap();
        assert_eq!(json, "\"m/44'/236'/0'/0/3\"");
        let back: KeyPath = serde_json::from_str(&json).unwrap();
        assert_eq!(back, path);
        assert!(serde_json::from_str::<KeyPath>("\"x/1\"").is_err());
    }

    #[test]
    fn known_bip44_address() {
        // First BIP-44 Bitcoin receive address of the abandon mnemonic.
        let path: KeyPath = "m/44'/0'/0'/0/0".parse().unwrap();
        let key = derive_key(&test_seed(), &path).unwrap();
        let addr = address::pubkey_to_p2pkh_address(
            &key.public.inner.serialize(),
            BsvNetwork::Mainnet,
        )
        .unwrap();
        assert_eq!(addr, "1LqBGSKuX5yYUonjxT5qGfpUsXKYYWeabA");
    }

    #[test]
    fn derivation_deterministic() {
        let seed = test_seed();
        let path = KeyPath::bip44(BsvNetwork::Mainnet, 0, Purpose::Receive, 0).unwrap();
        let a = derive_key(&seed, &path).unwrap();
        let b = derive_key(&seed, &path).unwrap();
        assert_eq!(a.secret, b.secret);
        assert_eq!(a.public, b.public);
        assert!(a.public.compressed);
    }

    #[test]
    fn different_paths_different_keys() {
        let keychain = Keychain::new(&test_seed(), BsvNetwork::Mainnet, 0).unwrap();
        let r0 = keychain.path(Purpose::Receive, 0).unwrap();
        let c0 = keychain.path(Purpose::Change, 0).unwrap();
        assert_ne!(
            keychain.public_key(&r0).unwrap(),
            keychain.public_key(&c0).unwrap()
        );
    }

    #[test]
    fn keychain_cache_matches_derivation() {
        let seed = test_seed();
        let keychain = Keychain::new(&seed, BsvNetwork::Mainnet, 0).unwrap();
        let path = keychain.path(Purpose::Receive, 4).unwrap();
        let cached = keychain.public_key(&path).unwrap();
        assert_eq!(cached, keychain.public_key(&path).unwrap());
        assert_eq!(cached, keychain.key_pair(&path).unwrap().public);
        assert_eq!(cached, derive_key(&seed, &path).unwrap().public);
    }

    #[test]
    fn keychain_rejects_bad_seed_length() {
        assert!(matches!(
            Keychain::new(&[0u8; 8], BsvNetwork::Mainnet, 0),
            Err(WalletError::InvalidSeed(_))
        ));
        assert!(Keychain::new(&[0u8; 65], BsvNetwork::Mainnet, 0).is_err());
        assert!(Keychain::new(&[0u8; 16], BsvNetwork::Mainnet, 0).is_ok());
    }

    #[test]
    fn keychain_debug_hides_seed() {
        let keychain = Keychain::new(&[0xAB; 32], BsvNetwork::Mainnet, 0).unwrap();
        let debug = format!("{keychain:?}");
        assert!(debug.starts_with("Keychain"));
        assert!(!debug.contains("seed"));
    }

    #[test]
    fn counters_allocate_monotonically() {
        let mut counters = AddressCounters::default();
        assert_eq!(counters.allocate(Purpose::Receive).unwrap(), 0);
        assert_eq!(counters.allocate(Purpose::Receive).unwrap(), 1);
        assert_eq!(counters.allocate(Purpose::Change).unwrap(), 0);
        assert_eq!(counters.peek(Purpose::Receive), 2);

        assert!(counters.advance_past(Purpose::Receive, 9));
        assert!(!counters.advance_past(Purpose::Receive, 3));
        assert_eq!(counters.allocate(Purpose::Receive).unwrap(), 10);
    }

    #[test]
    fn counters_exhaust() {
        let mut counters = AddressCounters {
            receive: MAX_INDEX,
            change: 0,
        };
        assert_eq!(counters.allocate(Purpose::Receive).unwrap(), MAX_INDEX);
        assert!(matches!(
            counters.allocate(Purpose::Receive),
            Err(WalletError::KeyDerivation(_))
        ));
    }
}
