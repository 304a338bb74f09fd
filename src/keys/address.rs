//! Address rendering for single-key scripts

use bitcoin::key::CompressedPublicKey;
use bitcoin::{Address, Network, PublicKey};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

use crate::error::{ValidationError, WalletError};

/// Single-signature script families.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AddressType {
    /// P2PKH, BIP44
    Legacy,
    /// P2SH-P2WPKH, BIP49
    #[serde(rename = "segwit")]
    SegWit,
    /// P2WPKH, BIP84
    #[serde(rename = "native-segwit")]
    NativeSegWit,
}

impl AddressType {
    pub fn purpose(&self) -> u32 {
        match self {
            AddressType::Legacy => 44,
            AddressType::SegWit => 49,
            AddressType::NativeSegWit => 84,
        }
    }

    pub fn from_purpose(purpose: u32) -> Option<Self> {
        match purpose {
            44 => Some(AddressType::Legacy),
            49 => Some(AddressType::SegWit),
            84 => Some(AddressType::NativeSegWit),
            _ => None,
        }
    }
}

/// Render the address of `pubkey` for `address_type`.
///
/// Uncompressed keys only have a Legacy address; asking for a SegWit form
/// is an error rather than a silent fallback.
pub fn derive_address(
    pubkey: &PublicKey,
    address_type: AddressType,
    network: Network,
) -> Result<Address, WalletError> {
    match address_type {
        AddressType::Legacy => Ok(Address::p2pkh(pubkey.pubkey_hash(), network)),
        AddressType::SegWit => {
            let compressed = compressed(pubkey)?;
            Ok(Address::p2shwpkh(&compressed, network))
        }
        AddressType::NativeSegWit => {
            let compressed = compressed(pubkey)?;
            Ok(Address::p2wpkh(&compressed, network))
        }
    }
}

/// Parse a destination address and require it to belong to `network`.
pub fn parse_address(text: &str, network: Network) -> Result<Address, WalletError> {
    Address::from_str(text.trim())
        .map_err(|_| ValidationError::InvalidAddress)?
        .require_network(network)
        .map_err(|_| ValidationError::InvalidAddress.into())
}

fn compressed(pubkey: &PublicKey) -> Result<CompressedPublicKey, WalletError> {
    CompressedPublicKey::try_from(*pubkey).map_err(|_| ValidationError::IncompatibleAddressType.into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use bitcoin::secp256k1::{Secp256k1, SecretKey};
    use bitcoin::PrivateKey;

    fn keypair(compressed: bool) -> PublicKey {
        let secp = Secp256k1::new();
        let secret = SecretKey::from_slice(&[0x11; 32]).unwrap();
        let key = if compressed {
            PrivateKey::new(secret, Network::Testnet)
        } else {
            PrivateKey::new_uncompressed(secret, Network::Testnet)
        };
        key.public_key(&secp)
    }

    #[test]
    fn test_address_prefixes() {
        let pubkey = keypair(true);
        let legacy = derive_address(&pubkey, AddressType::Legacy, Network::Testnet).unwrap();
        let segwit = derive_address(&pubkey, AddressType::SegWit, Network::Testnet).unwrap();
        let native = derive_address(&pubkey, AddressType::NativeSegWit, Network::Testnet).unwrap();

        assert!(legacy.to_string().starts_with('m') || legacy.to_string().starts_with('n'));
        assert!(segwit.to_string().starts_with('2'));
        assert!(native.to_string().starts_with("tb1q"));
    }

    #[test]
    fn test_uncompressed_is_legacy_only() {
        let pubkey = keypair(false);
        assert!(derive_address(&pubkey, AddressType::Legacy, Network::Testnet).is_ok());

        for address_type in [AddressType::SegWit, AddressType::NativeSegWit] {
            assert!(matches!(
                derive_address(&pubkey, address_type, Network::Testnet),
                Err(WalletError::Validation(ValidationError::IncompatibleAddressType))
            ));
        }
    }

    #[test]
    fn test_compressed_and_uncompressed_differ() {
        let a = derive_address(&keypair(true), AddressType::Legacy, Network::Testnet).unwrap();
        let b = derive_address(&keypair(false), AddressType::Legacy, Network::Testnet).unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn test_parse_address_network() {
        let mainnet = "bc1qcr8te4kr609gcawutmrza0j4xv80jy8z306fyu";
        assert!(parse_address(mainnet, Network::Bitcoin).is_ok());
        assert!(matches!(
            parse_address(mainnet, Network::Testnet),
            Err(WalletError::Validation(ValidationError::InvalidAddress))
        ));
        assert!(parse_address("not-an-address", Network::Bitcoin).is_err());
    }

    #[test]
    fn test_serde_names() {
        assert_eq!(serde_json::to_string(&AddressType::NativeSegWit).unwrap(), "\"native-segwit\"");
        assert_eq!(serde_json::to_string(&AddressType::SegWit).unwrap(), "\"segwit\"");
        assert_eq!(serde_json::to_string(&AddressType::Legacy).unwrap(), "\"legacy\"");
    }
}
