//! BIP32 hierarchical deterministic derivation
//!
//! Paths are walked as a state machine
//! `Root → Purpose' → CoinType' → Account' → [ScriptType'] → Chain → Index`,
//! so a malformed path is rejected before any key is touched.
//!
//! | purpose | script |
//! |---|---|
//! | 44' | P2PKH |
//! | 49' | P2SH-P2WPKH |
//! | 84' | P2WPKH |
//! | 48' | multisig, script type 1' (P2SH-P2WSH) or 2' (P2WSH) |
//! | 45' | legacy P2SH multisig |

use bitcoin::bip32::{ChildNumber, DerivationPath, Fingerprint, Xpriv, Xpub};
use bitcoin::secp256k1::{Secp256k1, SecretKey};
use bitcoin::{Network, PublicKey};
use std::fmt;
use std::str::FromStr;

use crate::error::{ValidationError, WalletError};

pub const EXTERNAL_CHAIN: u32 = 0;
pub const INTERNAL_CHAIN: u32 = 1;

const KNOWN_PURPOSES: [u32; 5] = [44, 45, 48, 49, 84];
const MULTISIG_PURPOSE: u32 = 48;

/// Account node of a derivation path, e.g. `m/84'/1'/0'`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AccountPath {
    pub purpose: u32,
    pub coin_type: u32,
    pub account: u32,
    /// BIP48 script type level, only present for purpose 48'
    pub script_type: Option<u32>,
}

/// Full path to an address key, e.g. `m/84'/1'/0'/1/7`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HdPath {
    pub account: AccountPath,
    pub chain: u32,
    pub index: u32,
}

impl AccountPath {
    pub fn new(purpose: u32, network: Network, account: u32) -> Self {
        Self {
            purpose,
            coin_type: crate::config::coin_type(network),
            account,
            script_type: None,
        }
    }

    pub fn bip48(network: Network, account: u32, script_type: u32) -> Self {
        Self {
            purpose: MULTISIG_PURPOSE,
            coin_type: crate::config::coin_type(network),
            account,
            script_type: Some(script_type),
        }
    }

    pub fn child(&self, chain: u32, index: u32) -> HdPath {
        HdPath {
            account: *self,
            chain,
            index,
        }
    }

    pub fn to_derivation_path(&self) -> Result<DerivationPath, WalletError> {
        let mut children = vec![
            hardened(self.purpose)?,
            hardened(self.coin_type)?,
            hardened(self.account)?,
        ];
        if let Some(script_type) = self.script_type {
            children.push(hardened(script_type)?);
        }
        Ok(DerivationPath::from(children))
    }
}

impl HdPath {
    pub fn is_change(&self) -> bool {
        self.chain == INTERNAL_CHAIN
    }

    pub fn to_derivation_path(&self) -> Result<DerivationPath, WalletError> {
        let account = self.account.to_derivation_path()?;
        Ok(account.extend([normal(self.chain)?, normal(self.index)?]))
    }

    /// The unhardened `chain/index` tail, for deriving from an account xpub.
    pub fn relative(&self) -> Result<[ChildNumber; 2], WalletError> {
        Ok([normal(self.chain)?, normal(self.index)?])
    }
}

impl fmt::Display for AccountPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "m/{}'/{}'/{}'", self.purpose, self.coin_type, self.account)?;
        if let Some(script_type) = self.script_type {
            write!(f, "/{}'", script_type)?;
        }
        Ok(())
    }
}

impl fmt::Display for HdPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.account, self.chain, self.index)
    }
}

impl FromStr for AccountPath {
    type Err = WalletError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match walk(s)? {
            (account, None) => Ok(account),
            _ => Err(ValidationError::InvalidDerivationPath.into()),
        }
    }
}

impl FromStr for HdPath {
    type Err = WalletError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match walk(s)? {
            (account, Some((chain, index))) => Ok(account.child(chain, index)),
            _ => Err(ValidationError::InvalidDerivationPath.into()),
        }
    }
}

#[derive(Clone, Copy)]
enum Level {
    Root,
    Purpose,
    CoinType,
    Account,
    ScriptType,
    Chain,
    Index,
    Done,
}

/// Walk a path string level by level. Returns the account node and, when the
/// path goes that deep, the `(chain, index)` pair.
fn walk(s: &str) -> Result<(AccountPath, Option<(u32, u32)>), WalletError> {
    let invalid = || WalletError::from(ValidationError::InvalidDerivationPath);

    let mut level = Level::Root;
    let mut account = AccountPath {
        purpose: 0,
        coin_type: 0,
        account: 0,
        script_type: None,
    };
    let mut chain = None;
    let mut index = None;

    for component in s.trim().split('/') {
        level = match level {
            Level::Root => {
                if component != "m" {
                    return Err(invalid());
                }
                Level::Purpose
            }
            Level::Purpose => {
                account.purpose = parse_component(component, true).ok_or_else(invalid)?;
                if !KNOWN_PURPOSES.contains(&account.purpose) {
                    return Err(invalid());
                }
                Level::CoinType
            }
            Level::CoinType => {
                account.coin_type = parse_component(component, true).ok_or_else(invalid)?;
                Level::Account
            }
            Level::Account => {
                account.account = parse_component(component, true).ok_or_else(invalid)?;
                if account.purpose == MULTISIG_PURPOSE {
                    Level::ScriptType
                } else {
                    Level::Chain
                }
            }
            Level::ScriptType => {
                account.script_type = Some(parse_component(component, true).ok_or_else(invalid)?);
                Level::Chain
            }
            Level::Chain => {
                let value = parse_component(component, false).ok_or_else(invalid)?;
                if value != EXTERNAL_CHAIN && value != INTERNAL_CHAIN {
                    return Err(invalid());
                }
                chain = Some(value);
                Level::Index
            }
            Level::Index => {
                index = Some(parse_component(component, false).ok_or_else(invalid)?);
                Level::Done
            }
            Level::Done => return Err(invalid()),
        };
    }

    match (level, chain, index) {
        (Level::Chain, None, None) => Ok((account, None)),
        (Level::Done, Some(chain), Some(index)) => Ok((account, Some((chain, index)))),
        _ => Err(invalid()),
    }
}

/// Parse one component, requiring hardened (`'` or `h`) iff `hardened`.
fn parse_component(component: &str, hardened: bool) -> Option<u32> {
    let (digits, is_hardened) = match component.strip_suffix('\'').or_else(|| component.strip_suffix('h')) {
        Some(digits) => (digits, true),
        None => (component, false),
    };
    if is_hardened != hardened || digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let value: u32 = digits.parse().ok()?;
    (value < (1 << 31)).then_some(value)
}

fn hardened(index: u32) -> Result<ChildNumber, WalletError> {
    ChildNumber::from_hardened_idx(index).map_err(|_| ValidationError::InvalidDerivationPath.into())
}

fn normal(index: u32) -> Result<ChildNumber, WalletError> {
    ChildNumber::from_normal_idx(index).map_err(|_| ValidationError::InvalidDerivationPath.into())
}

/// A derived keypair. The secret is erased when this value is dropped.
pub struct DerivedKey {
    pub secret: SecretKey,
    pub public: PublicKey,
}

impl Drop for DerivedKey {
    fn drop(&mut self) {
        self.secret.non_secure_erase();
    }
}

/// Derive the keypair at `path` from a raw BIP39 seed.
///
/// Intermediate extended keys are erased before returning.
pub fn derive_path(seed: &[u8], path: &HdPath, network: Network) -> Result<DerivedKey, WalletError> {
    let secp = Secp256k1::new();
    let mut master =
        Xpriv::new_master(network, seed).map_err(WalletError::internal("master key derivation failed"))?;
    let derived = master.derive_priv(&secp, &path.to_derivation_path()?);
    master.private_key.non_secure_erase();

    let mut child = derived.map_err(WalletError::internal("child key derivation failed"))?;
    let key = DerivedKey {
        secret: child.private_key,
        public: PublicKey::new(child.private_key.public_key(&secp)),
    };
    child.private_key.non_secure_erase();

    Ok(key)
}

/// Derive the extended public key of an account node together with the
/// seed's master fingerprint.
pub fn account_xpub(
    seed: &[u8],
    path: &AccountPath,
    network: Network,
) -> Result<(Xpub, Fingerprint), WalletError> {
    let secp = Secp256k1::new();
    let mut master =
        Xpriv::new_master(network, seed).map_err(WalletError::internal("master key derivation failed"))?;
    let fingerprint = master.fingerprint(&secp);
    let derived = master.derive_priv(&secp, &path.to_derivation_path()?);
    master.private_key.non_secure_erase();

    let mut account_key = derived.map_err(WalletError::internal("account key derivation failed"))?;
    let xpub = Xpub::from_priv(&secp, &account_key);
    account_key.private_key.non_secure_erase();

    Ok((xpub, fingerprint))
}
