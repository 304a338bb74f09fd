//! Data models for wallet storage

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::crypto::PasswordSealed;
use crate::keys::AddressType;

pub const CURRENT_VERSION: u32 = 1;

/// Marker stored in `AddressRecord::derivation_path` for imported-key addresses.
pub const IMPORTED_PATH: &str = "imported";

/// The single persisted object.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WalletRecord {
    pub version: u32,
    /// Hex ciphertext‖tag of the 64-byte seed, or "" for a wallet without one
    pub encrypted_seed: String,
    #[serde(default)]
    pub encrypted_mnemonic: String,
    #[serde(default)]
    pub mnemonic_iv: String,
    pub salt: String,
    pub iv: String,
    pub kdf_iterations: u32,
    pub accounts: Vec<Account>,
    #[serde(default)]
    pub imported_keys: BTreeMap<u32, ImportedKeyRecord>,
    pub settings: WalletSettings,
    pub created_at: DateTime<Utc>,
}

impl WalletRecord {
    pub fn has_seed(&self) -> bool {
        !self.encrypted_seed.is_empty()
    }

    pub fn account(&self, index: u32) -> Option<&Account> {
        self.accounts.get(index as usize)
    }

    pub fn account_mut(&mut self, index: u32) -> Option<&mut Account> {
        self.accounts.get_mut(index as usize)
    }

    /// Find the account and address record owning `address`.
    pub fn find_address(&self, address: &str) -> Option<(&Account, &AddressRecord)> {
        self.accounts.iter().find_map(|account| {
            account
                .addresses
                .iter()
                .find(|record| record.address == address)
                .map(|record| (account, record))
        })
    }

    pub fn next_account_index(&self) -> u32 {
        self.accounts.len() as u32
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WalletSettings {
    pub network: bitcoin::Network,
    pub auto_lock_minutes: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AccountType {
    Single,
    Multisig,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ImportType {
    #[serde(rename = "HD")]
    Hd,
    ImportedPrivateKey,
    ImportedSeed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Account {
    pub index: u32,
    pub name: String,
    #[serde(flatten)]
    pub kind: AccountKind,
    pub addresses: Vec<AddressRecord>,
    pub created_at: DateTime<Utc>,
}

/// What backs an account's keys.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum AccountKind {
    /// Derived from the wallet seed at account-level index `Account::index`
    #[serde(rename_all = "camelCase")]
    Hd {
        address_type: AddressType,
        chains: Chains,
    },
    /// A single imported private key with exactly one address
    #[serde(rename_all = "camelCase")]
    ImportedKey { address_type: AddressType },
    /// Derived from an imported seed phrase stored in `importedKeys`
    #[serde(rename_all = "camelCase")]
    ImportedSeed {
        address_type: AddressType,
        chains: Chains,
    },
    Multisig {
        config: MultisigConfig,
        chains: Chains,
    },
}

impl Account {
    pub fn account_type(&self) -> AccountType {
        match self.kind {
            AccountKind::Multisig { .. } => AccountType::Multisig,
            _ => AccountType::Single,
        }
    }

    pub fn import_type(&self) -> ImportType {
        match self.kind {
            AccountKind::Hd { .. } | AccountKind::Multisig { .. } => ImportType::Hd,
            AccountKind::ImportedKey { .. } => ImportType::ImportedPrivateKey,
            AccountKind::ImportedSeed { .. } => ImportType::ImportedSeed,
        }
    }

    pub fn chains(&self) -> Option<&Chains> {
        match &self.kind {
            AccountKind::Hd { chains, .. }
            | AccountKind::ImportedSeed { chains, .. }
            | AccountKind::Multisig { chains, .. } => Some(chains),
            AccountKind::ImportedKey { .. } => None,
        }
    }

    pub fn chains_mut(&mut self) -> Option<&mut Chains> {
        match &mut self.kind {
            AccountKind::Hd { chains, .. }
            | AccountKind::ImportedSeed { chains, .. }
            | AccountKind::Multisig { chains, .. } => Some(chains),
            AccountKind::ImportedKey { .. } => None,
        }
    }

    /// Single-sig script family, `None` for multisig accounts.
    pub fn address_type(&self) -> Option<AddressType> {
        match &self.kind {
            AccountKind::Hd { address_type, .. }
            | AccountKind::ImportedKey { address_type }
            | AccountKind::ImportedSeed { address_type, .. } => Some(*address_type),
            AccountKind::Multisig { .. } => None,
        }
    }

    pub fn receive_addresses(&self) -> impl DoubleEndedIterator<Item = &AddressRecord> + '_ {
        self.addresses.iter().filter(|record| !record.is_change)
    }

    /// Number of unused receive addresses at the tip of the external chain.
    pub fn trailing_unused_receive(&self) -> u32 {
        self.receive_addresses()
            .rev()
            .take_while(|record| !record.used)
            .count() as u32
    }
}

/// External and internal chain state of an account node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Chains {
    pub xpub: String,
    /// Account node path, e.g. `m/84'/1'/0'`
    pub derivation_path: String,
    pub external_index: u32,
    pub internal_index: u32,
}

impl Chains {
    pub fn new(xpub: String, derivation_path: String) -> Self {
        Self {
            xpub,
            derivation_path,
            external_index: 0,
            internal_index: 0,
        }
    }

    pub fn next_index(&self, is_change: bool) -> u32 {
        if is_change {
            self.internal_index
        } else {
            self.external_index
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MultisigScript {
    /// Legacy P2SH, BIP45-style path
    #[serde(rename = "P2SH")]
    P2sh,
    /// P2SH-wrapped P2WSH, BIP48 script type 1'
    #[serde(rename = "P2SH-P2WSH")]
    P2shP2wsh,
    /// Native P2WSH, BIP48 script type 2'
    #[serde(rename = "P2WSH")]
    P2wsh,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MultisigConfig {
    pub script: MultisigScript,
    pub threshold: u8,
    /// Account xpubs of every cosigner, this wallet's own (`chains.xpub`) included
    pub cosigner_xpubs: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AddressRecord {
    pub address: String,
    /// Full path like `m/84'/1'/0'/0/3`, or [`IMPORTED_PATH`]
    pub derivation_path: String,
    pub index: u32,
    pub is_change: bool,
    pub used: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ImportedKeyType {
    PrivateKey,
    Seed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportedKeyRecord {
    #[serde(flatten)]
    pub sealed: PasswordSealed,
    #[serde(rename = "type")]
    pub key_type: ImportedKeyType,
    /// WIF compression flag, private keys only
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub compressed: Option<bool>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(address: &str, is_change: bool, used: bool) -> AddressRecord {
        AddressRecord {
            address: address.to_string(),
            derivation_path: IMPORTED_PATH.to_string(),
            index: 0,
            is_change,
            used,
        }
    }

    #[test]
    fn test_account_kind_accessors() {
        let account = Account {
            index: 0,
            name: "Savings".to_string(),
            kind: AccountKind::ImportedKey {
                address_type: AddressType::Legacy,
            },
            addresses: vec![record("a", false, false)],
            created_at: Utc::now(),
        };

        assert_eq!(account.account_type(), AccountType::Single);
        assert_eq!(account.import_type(), ImportType::ImportedPrivateKey);
        assert!(account.chains().is_none());
        assert_eq!(account.address_type(), Some(AddressType::Legacy));
    }

    #[test]
    fn test_trailing_unused() {
        let account = Account {
            index: 0,
            name: "Main".to_string(),
            kind: AccountKind::Hd {
                address_type: AddressType::NativeSegWit,
                chains: Chains::new("xpub".into(), "m/84'/1'/0'".into()),
            },
            addresses: vec![
                record("a", false, false),
                record("b", false, true),
                record("c", true, false),
                record("d", false, false),
                record("e", false, false),
            ],
            created_at: Utc::now(),
        };
        assert_eq!(account.trailing_unused_receive(), 2);
    }

    #[test]
    fn test_account_kind_serde_tag() {
        let kind = AccountKind::ImportedKey {
            address_type: AddressType::NativeSegWit,
        };
        let json = serde_json::to_value(&kind).unwrap();
        assert_eq!(json["kind"], "importedKey");
        assert_eq!(json["addressType"], "native-segwit");
    }

    #[test]
    fn test_imported_key_record_shape() {
        let entry = ImportedKeyRecord {
            sealed: PasswordSealed {
                encrypted_data: "00".into(),
                salt: "11".into(),
                iv: "22".into(),
                iterations: 100_000,
            },
            key_type: ImportedKeyType::PrivateKey,
            compressed: Some(true),
        };
        let json = serde_json::to_value(&entry).unwrap();
        assert_eq!(json["encryptedData"], "00");
        assert_eq!(json["type"], "PrivateKey");

        let back: ImportedKeyRecord = serde_json::from_value(json).unwrap();
        assert_eq!(back, entry);
    }
}
