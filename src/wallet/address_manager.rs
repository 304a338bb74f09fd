use bitcoin::bip32::Xpub;
use bitcoin::blockdata::opcodes::all::OP_CHECKMULTISIG;
use bitcoin::blockdata::script::{Builder, ScriptBuf};
use bitcoin::secp256k1::Secp256k1;
use bitcoin::{Address, Network, PublicKey};
use std::str::FromStr;

use crate::error::{StateError, ValidationError, WalletError};
use crate::hd::{AccountPath, HdPath, EXTERNAL_CHAIN, INTERNAL_CHAIN};
use crate::keys::{derive_address, AddressType};
use crate::storage::{Account, AccountKind, MultisigConfig, MultisigScript};

/// BIP45 purpose used for legacy P2SH multisig accounts
pub const BIP45_PURPOSE: u32 = 45;

/// An address together with the full path it was derived at.
#[derive(Debug, Clone)]
pub struct DerivedAddress {
    pub address: Address,
    pub path: HdPath,
}

/// Public derivation of receive and change addresses from stored account xpubs.
///
/// Nothing here touches private key material; the wallet can hand out
/// addresses without decrypting the seed.
pub struct AddressManager;

impl AddressManager {
    pub fn single_sig_account_path(address_type: AddressType, network: Network, account: u32) -> AccountPath {
        AccountPath::new(address_type.purpose(), network, account)
    }

    pub fn multisig_account_path(script: MultisigScript, network: Network, account: u32) -> AccountPath {
        match script {
            MultisigScript::P2sh => AccountPath::new(BIP45_PURPOSE, network, account),
            MultisigScript::P2shP2wsh => AccountPath::bip48(network, account, 1),
            MultisigScript::P2wsh => AccountPath::bip48(network, account, 2),
        }
    }

    /// Derive the address at `index` on the receive or change chain of `account`.
    pub fn derive_for_account(
        account: &Account,
        is_change: bool,
        index: u32,
        network: Network,
    ) -> Result<DerivedAddress, WalletError> {
        let chains = account.chains().ok_or(StateError::NotDerivable)?;
        let account_path = AccountPath::from_str(&chains.derivation_path)?;
        let chain = if is_change { INTERNAL_CHAIN } else { EXTERNAL_CHAIN };
        let path = account_path.child(chain, index);

        let address = match &account.kind {
            AccountKind::Hd { address_type, .. } | AccountKind::ImportedSeed { address_type, .. } => {
                let xpub = parse_xpub(&chains.xpub)?;
                let pubkey = Self::child_pubkey(&xpub, &path)?;
                derive_address(&pubkey, *address_type, network)?
            }
            AccountKind::Multisig { config, .. } => Self::multisig_address(config, &path, network)?,
            AccountKind::ImportedKey { .. } => return Err(StateError::NotDerivable.into()),
        };

        Ok(DerivedAddress { address, path })
    }

    /// Derive the public key at the `chain/index` tail of `path` from an account xpub.
    pub fn child_pubkey(xpub: &Xpub, path: &HdPath) -> Result<PublicKey, WalletError> {
        let secp = Secp256k1::verification_only();
        let child = xpub
            .derive_pub(&secp, &path.relative()?)
            .map_err(WalletError::internal("public derivation failed"))?;
        Ok(PublicKey::new(child.public_key))
    }

    /// Cosigner public keys at `path`, sorted lexicographically (BIP67).
    pub fn multisig_pubkeys(config: &MultisigConfig, path: &HdPath) -> Result<Vec<PublicKey>, WalletError> {
        let mut pubkeys = config
            .cosigner_xpubs
            .iter()
            .map(|xpub| {
                let xpub = parse_xpub(xpub)?;
                Self::child_pubkey(&xpub, path)
            })
            .collect::<Result<Vec<_>, WalletError>>()?;
        pubkeys.sort_by_key(|pubkey| pubkey.to_bytes());
        Ok(pubkeys)
    }

    /// `OP_m <sorted pubkeys> OP_n OP_CHECKMULTISIG`
    pub fn multisig_script(config: &MultisigConfig, path: &HdPath) -> Result<ScriptBuf, WalletError> {
        let pubkeys = Self::multisig_pubkeys(config, path)?;

        let mut builder = Builder::new().push_int(i64::from(config.threshold));
        for pubkey in &pubkeys {
            builder = builder.push_key(pubkey);
        }
        Ok(builder
            .push_int(pubkeys.len() as i64)
            .push_opcode(OP_CHECKMULTISIG)
            .into_script())
    }

    pub fn multisig_address(
        config: &MultisigConfig,
        path: &HdPath,
        network: Network,
    ) -> Result<Address, WalletError> {
        let script = Self::multisig_script(config, path)?;
        match config.script {
            MultisigScript::P2sh => Address::p2sh(&script, network)
                .map_err(|_| ValidationError::InvalidMultisig {
                    max_cosigners: super::multisig::MAX_COSIGNERS,
                }
                .into()),
            MultisigScript::P2shP2wsh => Ok(Address::p2shwsh(&script, network)),
            MultisigScript::P2wsh => Ok(Address::p2wsh(&script, network)),
        }
    }
}

pub fn parse_xpub(text: &str) -> Result<Xpub, WalletError> {
    Xpub::from_str(text.trim()).map_err(|_| ValidationError::InvalidXpub.into())
}
