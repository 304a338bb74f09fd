//! Multisig account configuration

use bitcoin::{Network, NetworkKind};
use std::collections::HashSet;

use super::address_manager::parse_xpub;
use crate::error::{ValidationError, WalletError};
use crate::storage::{MultisigConfig, MultisigScript};

/// Bounded by the 520-byte P2SH redeem script limit with compressed keys.
pub const MAX_COSIGNERS: usize = 15;

/// Assemble and check a multisig configuration.
///
/// `own_xpub` is added to `other_xpubs` if the caller did not include it.
/// Every xpub must parse, belong to `network` and appear once.
pub fn build_config(
    script: MultisigScript,
    threshold: u8,
    own_xpub: &str,
    other_xpubs: &[String],
    network: Network,
) -> Result<MultisigConfig, WalletError> {
    let invalid = || WalletError::from(ValidationError::InvalidMultisig {
        max_cosigners: MAX_COSIGNERS,
    });

    let mut cosigner_xpubs = vec![own_xpub.to_string()];
    for xpub in other_xpubs {
        let xpub = xpub.trim();
        if xpub != own_xpub {
            cosigner_xpubs.push(xpub.to_string());
        }
    }

    let expected = NetworkKind::from(network);
    let mut seen = HashSet::new();
    for text in &cosigner_xpubs {
        let xpub = parse_xpub(text)?;
        if xpub.network != expected {
            return Err(ValidationError::InvalidXpub.into());
        }
        if !seen.insert(xpub.public_key) {
            return Err(invalid());
        }
    }

    let cosigners = cosigner_xpubs.len();
    if cosigners < 2 || cosigners > MAX_COSIGNERS || threshold == 0 || threshold as usize > cosigners {
        return Err(invalid());
    }

    Ok(MultisigConfig {
        script,
        threshold,
        cosigner_xpubs,
    })
}

/// Worst-case virtual size of one input spending an m-of-n output.
pub fn input_vsize(script: MultisigScript, threshold: u8, cosigners: usize) -> u64 {
    let m = threshold as u64;
    let n = cosigners as u64;
    // redeem/witness script: OP_m, n pushes of 33-byte keys, OP_n, OP_CHECKMULTISIG
    let script_len = 3 + 34 * n;
    // OP_0 dummy plus m DER signatures with sighash byte
    let sigs_len = 1 + 73 * m;

    match script {
        MultisigScript::P2sh => 41 + sigs_len + 2 + script_len,
        MultisigScript::P2wsh => 41 + (1 + sigs_len + 1 + script_len).div_ceil(4),
        MultisigScript::P2shP2wsh => 41 + 35 + (1 + sigs_len + 1 + script_len).div_ceil(4),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hd::account_xpub;
    use crate::wallet::address_manager::AddressManager;

    fn xpub(tag: u8) -> String {
        let path = AddressManager::multisig_account_path(MultisigScript::P2wsh, Network::Testnet, 0);
        account_xpub(&[tag; 32], &path, Network::Testnet).unwrap().0.to_string()
    }

    #[test]
    fn test_build_config_includes_own_key() {
        let own = xpub(1);
        let config = build_config(MultisigScript::P2wsh, 2, &own, &[xpub(2), xpub(3)], Network::Testnet).unwrap();
        assert_eq!(config.cosigner_xpubs.len(), 3);
        assert_eq!(config.cosigner_xpubs[0], own);

        let config = build_config(MultisigScript::P2wsh, 2, &own, &[own.clone(), xpub(2)], Network::Testnet).unwrap();
        assert_eq!(config.cosigner_xpubs.len(), 2);
    }

    #[test]
    fn test_rejects_bad_thresholds() {
        let own = xpub(1);
        for threshold in [0u8, 4] {
            assert!(matches!(
                build_config(MultisigScript::P2wsh, threshold, &own, &[xpub(2), xpub(3)], Network::Testnet),
                Err(WalletError::Validation(ValidationError::InvalidMultisig { .. }))
            ));
        }
        assert!(build_config(MultisigScript::P2wsh, 1, &own, &[], Network::Testnet).is_err());
    }

    #[test]
    fn test_rejects_foreign_network() {
        let own = xpub(1);
        let path = AddressManager::multisig_account_path(MultisigScript::P2wsh, Network::Bitcoin, 0);
        let mainnet = account_xpub(&[9; 32], &path, Network::Bitcoin).unwrap().0.to_string();
        assert!(matches!(
            build_config(MultisigScript::P2wsh, 2, &own, &[mainnet], Network::Testnet),
            Err(WalletError::Validation(ValidationError::InvalidXpub))
        ));
    }

    #[test]
    fn test_input_vsize_ordering() {
        let legacy = input_vsize(MultisigScript::P2sh, 2, 3);
        let nested = input_vsize(MultisigScript::P2shP2wsh, 2, 3);
        let native = input_vsize(MultisigScript::P2wsh, 2, 3);
        assert!(legacy > nested && nested > native);
    }
}
