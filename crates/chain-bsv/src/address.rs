use bitcoin::address::{Address, AddressType, NetworkUnchecked};
use bitcoin::{PublicKey, Script, ScriptBuf};

use crate::error::BsvError;
use crate::network::BsvNetwork;

/// Encode a compressed public key as a Base58Check P2PKH address.
///
/// `1...` on mainnet, `m...`/`n...` on testnet and regtest.
pub fn pubkey_to_p2pkh_address(
    pubkey_bytes: &[u8; 33],
    network: BsvNetwork,
) -> Result<String, BsvError> {
    let pubkey = PublicKey::from_slice(pubkey_bytes).map_err(|e| {
        BsvError::InvalidPublicKey(format!("failed to parse compressed public key: {e}"))
    })?;

    Ok(Address::p2pkh(pubkey.pubkey_hash(), network.to_bitcoin_network()).to_string())
}

/// Parse an address string and return the locking script that pays it.
///
/// BSV only relays P2PKH for new outputs, so any other address type is
/// rejected even when it is well formed.
pub fn address_to_script(address: &str, network: BsvNetwork) -> Result<ScriptBuf, BsvError> {
    let parsed = address
        .parse::<Address<NetworkUnchecked>>()
        .map_err(|e| BsvError::InvalidAddress(format!("failed to parse address: {e}")))?
        .require_network(network.to_bitcoin_network())
        .map_err(|e| BsvError::InvalidAddress(format!("address is for another network: {e}")))?;

    match parsed.address_type() {
        Some(AddressType::P2pkh) => Ok(parsed.script_pubkey()),
        other => Err(BsvError::InvalidAddress(format!(
            "only P2PKH addresses are supported, got {other:?}"
        ))),
    }
}

/// Render a P2PKH locking script back into its address, if it is one.
pub fn script_to_address(script: &Script, network: BsvNetwork) -> Option<String> {
    if !script.is_p2pkh() {
        return None;
    }
    Address::from_script(script, network.to_bitcoin_network())
        .ok()
        .map(|a| a.to_string())
}

/// Check whether `address` is a P2PKH address valid for `network`.
///
/// Returns `Ok(false)` for a well-formed address of another network or
/// type, and an error when the string does not parse at all.
pub fn validate_address(address: &str, network: BsvNetwork) -> Result<bool, BsvError> {
    let parsed = address
        .parse::<Address<NetworkUnchecked>>()
        .map_err(|e| BsvError::InvalidAddress(format!("failed to parse address: {e}")))?;

    if !parsed.is_valid_for_network(network.to_bitcoin_network()) {
        return Ok(false);
    }
    Ok(address_to_script(address, network).is_ok())
}
