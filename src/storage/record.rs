//! Loading, saving and structural validation of the wallet record

use bitcoin::bip32::Xpub;
use bitcoin::NetworkKind;
use std::collections::HashSet;
use std::str::FromStr;

use super::file_system::BlobStore;
use super::models::{
    Account, AccountKind, ImportedKeyType, WalletRecord, CURRENT_VERSION, IMPORTED_PATH,
};
use crate::crypto::{IV_LEN, MIN_KDF_ITERATIONS};
use crate::error::{StructuralError, WalletError};
use crate::hd::{AccountPath, HdPath};
use crate::wallet::address_manager::AddressManager;

/// Blob key the record is stored under.
pub const RECORD_KEY: &str = "wallet";

/// Persists the wallet record through a [`BlobStore`].
pub struct WalletStore<S: BlobStore> {
    store: S,
}

impl<S: BlobStore> WalletStore<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    pub fn blob_store(&self) -> &S {
        &self.store
    }

    /// Load and validate the record. `Ok(None)` when no wallet exists yet.
    pub fn load(&self) -> Result<Option<WalletRecord>, WalletError> {
        let bytes = match self.store.get(RECORD_KEY)? {
            Some(bytes) => bytes,
            None => return Ok(None),
        };

        let record = parse_record(&bytes)?;
        validate(&record)?;

        log::debug!(
            "Loaded wallet record v{} with {} accounts",
            record.version,
            record.accounts.len()
        );
        Ok(Some(record))
    }

    pub fn save(&self, record: &WalletRecord) -> Result<(), WalletError> {
        let json = serde_json::to_vec_pretty(record).map_err(crate::error::StorageError::from)?;
        self.store.set(RECORD_KEY, &json)?;
        Ok(())
    }

    pub fn delete(&self) -> Result<(), WalletError> {
        self.store.delete(RECORD_KEY)?;
        Ok(())
    }
}

/// Parse a serialized record, checking the schema version before the body.
pub fn parse_record(bytes: &[u8]) -> Result<WalletRecord, WalletError> {
    let value: serde_json::Value = serde_json::from_slice(bytes).map_err(|e| {
        log::debug!("Wallet record is not JSON: {}", e);
        StructuralError::Malformed
    })?;

    let version = value
        .get("version")
        .and_then(|v| v.as_u64())
        .ok_or(StructuralError::Malformed)?;
    if version == 0 || version > CURRENT_VERSION as u64 {
        return Err(StructuralError::UnsupportedVersion {
            found: u32::try_from(version).unwrap_or(u32::MAX),
            supported: CURRENT_VERSION,
        }
        .into());
    }

    serde_json::from_value(value).map_err(|e| {
        log::debug!("Wallet record does not match schema: {}", e);
        StructuralError::Malformed.into()
    })
}

/// Check every structural invariant of the record.
///
/// Runs on load and before any signing operation.
pub fn validate(record: &WalletRecord) -> Result<(), StructuralError> {
    validate_cipher_params(record)?;

    let network = record.settings.network;
    let mut seen_addresses = HashSet::new();

    for (position, account) in record.accounts.iter().enumerate() {
        if account.index as usize != position {
            return Err(StructuralError::AccountIndexMismatch {
                position,
                index: account.index,
            });
        }

        // No seed means nothing may be derived from it.
        if !record.has_seed() && matches!(account.kind, AccountKind::Hd { .. } | AccountKind::Multisig { .. }) {
            return Err(StructuralError::SeedlessHdAccount {
                account: account.index,
            });
        }

        let expected_key_type = match account.kind {
            AccountKind::ImportedKey { .. } => Some(ImportedKeyType::PrivateKey),
            AccountKind::ImportedSeed { .. } => Some(ImportedKeyType::Seed),
            AccountKind::Hd { .. } | AccountKind::Multisig { .. } => None,
        };
        if let Some(expected) = expected_key_type {
            let entry = record
                .imported_keys
                .get(&account.index)
                .ok_or(StructuralError::MissingImportedKey {
                    account: account.index,
                })?;
            if entry.key_type != expected {
                return Err(StructuralError::ImportedKeyTypeMismatch {
                    account: account.index,
                });
            }
        }

        for entry in &account.addresses {
            if !seen_addresses.insert(entry.address.as_str()) {
                return Err(StructuralError::InvalidAddresses {
                    account: account.index,
                });
            }
        }

        match &account.kind {
            AccountKind::ImportedKey { .. } => validate_imported_key_account(account)?,
            AccountKind::Hd { .. } | AccountKind::ImportedSeed { .. } | AccountKind::Multisig { .. } => {
                validate_chain_account(account, network)?
            }
        }
    }

    for index in record.imported_keys.keys() {
        let backed = record.account(*index).map(|account| {
            matches!(
                account.kind,
                AccountKind::ImportedKey { .. } | AccountKind::ImportedSeed { .. }
            )
        });
        if backed != Some(true) {
            return Err(StructuralError::OrphanImportedKey { account: *index });
        }
    }

    Ok(())
}

fn validate_cipher_params(record: &WalletRecord) -> Result<(), StructuralError> {
    if record.kdf_iterations < MIN_KDF_ITERATIONS {
        return Err(StructuralError::InvalidCipherParams);
    }

    let salt_ok = hex::decode(&record.salt).map(|salt| salt.len() >= 16).unwrap_or(false);
    if !salt_ok {
        return Err(StructuralError::InvalidCipherParams);
    }

    if record.has_seed() {
        let iv_ok = hex::decode(&record.iv).map(|iv| iv.len() == IV_LEN).unwrap_or(false);
        if !iv_ok || hex::decode(&record.encrypted_seed).is_err() {
            return Err(StructuralError::InvalidCipherParams);
        }
    } else if !record.encrypted_mnemonic.is_empty() {
        return Err(StructuralError::InvalidCipherParams);
    }

    Ok(())
}

fn validate_imported_key_account(account: &Account) -> Result<(), StructuralError> {
    let invalid = StructuralError::InvalidAddresses {
        account: account.index,
    };
    match account.addresses.as_slice() {
        [only] if !only.is_change && only.derivation_path == IMPORTED_PATH => Ok(()),
        _ => Err(invalid),
    }
}

fn validate_chain_account(account: &Account, network: bitcoin::Network) -> Result<(), StructuralError> {
    let index = account.index;
    let chains = account
        .chains()
        .ok_or(StructuralError::InvalidAddresses { account: index })?;

    let account_path = AccountPath::from_str(&chains.derivation_path)
        .map_err(|_| StructuralError::InvalidDerivationPath { account: index })?;

    let path_matches_kind = match &account.kind {
        AccountKind::Hd { address_type, .. } => {
            account_path.purpose == address_type.purpose() && account_path.account == index
        }
        AccountKind::ImportedSeed { address_type, .. } => account_path.purpose == address_type.purpose(),
        AccountKind::Multisig { config, .. } => {
            AddressManager::multisig_account_path(config.script, network, index) == account_path
        }
        AccountKind::ImportedKey { .. } => false,
    };
    if !path_matches_kind || account_path.coin_type != crate::config::coin_type(network) {
        return Err(StructuralError::InvalidDerivationPath { account: index });
    }

    let xpub = Xpub::from_str(&chains.xpub).map_err(|_| StructuralError::InvalidXpub { account: index })?;
    if xpub.network != NetworkKind::from(network) {
        return Err(StructuralError::InvalidXpub { account: index });
    }
    if let AccountKind::Multisig { config, .. } = &account.kind {
        if !config.cosigner_xpubs.contains(&chains.xpub) {
            return Err(StructuralError::InvalidXpub { account: index });
        }
    }

    for entry in &account.addresses {
        let path = HdPath::from_str(&entry.derivation_path)
            .map_err(|_| StructuralError::InvalidDerivationPath { account: index })?;
        if path.account != account_path || path.index != entry.index || path.is_change() != entry.is_change {
            return Err(StructuralError::InvalidDerivationPath { account: index });
        }

        if entry.index >= chains.next_index(entry.is_change) {
            return Err(StructuralError::CounterBehind { account: index });
        }

        let derived = AddressManager::derive_for_account(account, entry.is_change, entry.index, network)
            .map_err(|_| StructuralError::AddressMismatch {
                account: index,
                index: entry.index,
            })?;
        if derived.address.to_string() != entry.address {
            return Err(StructuralError::AddressMismatch {
                account: index,
                index: entry.index,
            });
        }
    }

    Ok(())
}
