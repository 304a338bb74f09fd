//! Wallet Import Format
//!
//! Errors never include any part of the key text.

use bitcoin::secp256k1::SecretKey;
use bitcoin::{Network, NetworkKind, PrivateKey};
use zeroize::Zeroizing;

use crate::error::{ValidationError, WalletError};

/// A decoded WIF. The secret is erased when this value is dropped.
pub struct DecodedWif {
    pub private_key: PrivateKey,
    pub compressed: bool,
    pub network: NetworkKind,
}

impl Drop for DecodedWif {
    fn drop(&mut self) {
        self.private_key.inner.non_secure_erase();
    }
}

impl std::fmt::Debug for DecodedWif {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DecodedWif")
            .field("compressed", &self.compressed)
            .field("network", &self.network)
            .finish_non_exhaustive()
    }
}

/// Decode a WIF string and require that it belongs to `network`.
pub fn decode_wif(wif: &str, network: Network) -> Result<DecodedWif, WalletError> {
    let private_key =
        PrivateKey::from_wif(wif.trim()).map_err(|_| ValidationError::InvalidWif)?;

    let expected = NetworkKind::from(network);
    if private_key.network != expected {
        return Err(ValidationError::WrongNetwork {
            key: private_key.network,
            wallet: expected,
        }
        .into());
    }

    Ok(DecodedWif {
        compressed: private_key.compressed,
        network: private_key.network,
        private_key,
    })
}

pub fn encode_wif(secret: &SecretKey, compressed: bool, network: Network) -> Zeroizing<String> {
    let key = if compressed {
        PrivateKey::new(*secret, network)
    } else {
        PrivateKey::new_uncompressed(*secret, network)
    };
    Zeroizing::new(key.to_wif())
}
