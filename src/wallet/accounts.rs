//! Account operations on a wallet record
//!
//! Every function here mutates a draft `WalletRecord` in memory. Key
//! material arrives already decrypted; persisting the draft is the caller's
//! job.

use bitcoin::secp256k1::Secp256k1;
use bitcoin::Network;
use chrono::Utc;

use super::address_manager::AddressManager;
use crate::config::WalletConfig;
use crate::crypto::PasswordSealed;
use crate::error::{StateError, ValidationError, WalletError};
use crate::hd::{self, AccountPath};
use crate::keys::{derive_address, AddressType, DecodedWif};
use crate::storage::{
    Account, AccountKind, AddressRecord, Chains, ImportedKeyRecord, ImportedKeyType, MultisigConfig,
    WalletRecord, IMPORTED_PATH,
};

pub const MAX_ACCOUNT_NAME_LEN: usize = 50;

/// Trim and bound an account label.
pub fn validate_account_name(name: &str) -> Result<String, WalletError> {
    let name = name.trim();
    let length = name.chars().count();
    if length == 0 || length > MAX_ACCOUNT_NAME_LEN || name.chars().any(char::is_control) {
        return Err(ValidationError::InvalidAccountName {
            max: MAX_ACCOUNT_NAME_LEN,
        }
        .into());
    }
    Ok(name.to_string())
}

pub fn check_account_capacity(record: &WalletRecord, config: &WalletConfig) -> Result<(), WalletError> {
    if record.accounts.len() >= config.max_accounts {
        return Err(ValidationError::AccountLimit {
            max: config.max_accounts,
        }
        .into());
    }
    Ok(())
}

pub fn account<'a>(record: &'a WalletRecord, index: u32) -> Result<&'a Account, WalletError> {
    record
        .account(index)
        .ok_or_else(|| ValidationError::UnknownAccount.into())
}

/// Add an account derived from the wallet seed at the next account index.
pub fn add_hd_account(
    record: &mut WalletRecord,
    seed: &[u8],
    address_type: AddressType,
    name: &str,
    config: &WalletConfig,
) -> Result<Account, WalletError> {
    if !record.has_seed() {
        return Err(StateError::NoSeed.into());
    }
    let name = validate_account_name(name)?;
    check_account_capacity(record, config)?;

    let network = record.settings.network;
    let index = record.next_account_index();
    let path = AddressManager::single_sig_account_path(address_type, network, index);
    let (xpub, _) = hd::account_xpub(seed, &path, network)?;

    push_chain_account(
        record,
        name,
        AccountKind::Hd {
            address_type,
            chains: Chains::new(xpub.to_string(), path.to_string()),
        },
        config,
    )
}

/// Add a single-address account for an imported private key.
///
/// Duplicate detection scans every recorded address of every account.
pub fn add_imported_key_account(
    record: &mut WalletRecord,
    key: &DecodedWif,
    address_type: AddressType,
    name: &str,
    sealed: PasswordSealed,
    config: &WalletConfig,
) -> Result<Account, WalletError> {
    let name = validate_account_name(name)?;
    check_account_capacity(record, config)?;

    let network = record.settings.network;
    let secp = Secp256k1::signing_only();
    let address = derive_address(&key.private_key.public_key(&secp), address_type, network)?;
    ensure_not_present(record, &address.to_string())?;

    let index = record.next_account_index();
    let account = Account {
        index,
        name,
        kind: AccountKind::ImportedKey { address_type },
        addresses: vec![AddressRecord {
            address: address.to_string(),
            derivation_path: IMPORTED_PATH.to_string(),
            index: 0,
            is_change: false,
            used: false,
        }],
        created_at: Utc::now(),
    };

    record.imported_keys.insert(
        index,
        ImportedKeyRecord {
            sealed,
            key_type: ImportedKeyType::PrivateKey,
            compressed: Some(key.compressed),
        },
    );
    record.accounts.push(account.clone());

    log::info!("Imported private key as account {} ({})", index, address);
    Ok(account)
}

/// Add an account whose chains derive from an imported seed phrase.
pub fn add_imported_seed_account(
    record: &mut WalletRecord,
    seed: &[u8],
    account_index: u32,
    address_type: AddressType,
    name: &str,
    sealed: PasswordSealed,
    config: &WalletConfig,
) -> Result<Account, WalletError> {
    let name = validate_account_name(name)?;
    check_account_capacity(record, config)?;

    let network = record.settings.network;
    let path = AccountPath::new(address_type.purpose(), network, account_index);
    // rejects account indices outside the hardened range
    path.to_derivation_path()?;
    let (xpub, _) = hd::account_xpub(seed, &path, network)?;

    let xpub = xpub.to_string();
    let already_present = record
        .accounts
        .iter()
        .any(|account| account.chains().map(|chains| chains.xpub == xpub).unwrap_or(false));
    if already_present {
        return Err(ValidationError::DuplicateImport.into());
    }

    let kind = AccountKind::ImportedSeed {
        address_type,
        chains: Chains::new(xpub, path.to_string()),
    };
    let probe = Account {
        index: record.next_account_index(),
        name: name.clone(),
        kind: kind.clone(),
        addresses: Vec::new(),
        created_at: Utc::now(),
    };
    let first = AddressManager::derive_for_account(&probe, false, 0, network)?;
    ensure_not_present(record, &first.address.to_string())?;

    let index = probe.index;
    record.imported_keys.insert(
        index,
        ImportedKeyRecord {
            sealed,
            key_type: ImportedKeyType::Seed,
            compressed: None,
        },
    );
    push_chain_account(record, name, kind, config)
}

pub fn add_multisig_account(
    record: &mut WalletRecord,
    multisig: MultisigConfig,
    account_path: &AccountPath,
    own_xpub: String,
    name: &str,
    config: &WalletConfig,
) -> Result<Account, WalletError> {
    if !record.has_seed() {
        return Err(StateError::NoSeed.into());
    }
    let name = validate_account_name(name)?;
    check_account_capacity(record, config)?;

    push_chain_account(
        record,
        name,
        AccountKind::Multisig {
            config: multisig,
            chains: Chains::new(own_xpub, account_path.to_string()),
        },
        config,
    )
}

/// Append a chain-bearing account and hand out its first receive address.
fn push_chain_account(
    record: &mut WalletRecord,
    name: String,
    kind: AccountKind,
    config: &WalletConfig,
) -> Result<Account, WalletError> {
    let index = record.next_account_index();
    record.accounts.push(Account {
        index,
        name,
        kind,
        addresses: Vec::new(),
        created_at: Utc::now(),
    });
    next_address(record, index, false, config.gap_limit)?;

    let account = self::account(record, index)?;
    log::info!("Created account {} '{}'", index, account.name);
    Ok(account.clone())
}

/// Derive the next address on the receive or change chain and advance the
/// counter in the draft.
///
/// Imported-key accounts have no chains and return their single address for
/// both receive and change. Receive addresses stop at `gap_limit` consecutive
/// unused entries.
pub fn next_address(
    record: &mut WalletRecord,
    account_index: u32,
    is_change: bool,
    gap_limit: u32,
) -> Result<AddressRecord, WalletError> {
    let network = record.settings.network;
    let account = record
        .account_mut(account_index)
        .ok_or(ValidationError::UnknownAccount)?;

    if let AccountKind::ImportedKey { .. } = account.kind {
        return account
            .addresses
            .first()
            .cloned()
            .ok_or_else(|| WalletError::Internal("imported account has no address"));
    }

    if !is_change && account.trailing_unused_receive() >= gap_limit {
        return Err(ValidationError::GapLimitReached { limit: gap_limit }.into());
    }

    let chains = account.chains().ok_or(StateError::NotDerivable)?;
    let index = chains.next_index(is_change);
    let next = index
        .checked_add(1)
        .filter(|next| *next < (1 << 31))
        .ok_or(ValidationError::InvalidDerivationPath)?;

    let derived = AddressManager::derive_for_account(account, is_change, index, network)?;
    let entry = AddressRecord {
        address: derived.address.to_string(),
        derivation_path: derived.path.to_string(),
        index,
        is_change,
        used: false,
    };

    let chains = account.chains_mut().ok_or(StateError::NotDerivable)?;
    if is_change {
        chains.internal_index = next;
    } else {
        chains.external_index = next;
    }
    account.addresses.push(entry.clone());

    log::debug!(
        "Account {} {} address #{}: {}",
        account_index,
        if is_change { "change" } else { "receive" },
        index,
        entry.address
    );
    Ok(entry)
}

pub fn mark_address_used(record: &mut WalletRecord, address: &str) -> Result<(), WalletError> {
    let entry = record
        .accounts
        .iter_mut()
        .flat_map(|account| account.addresses.iter_mut())
        .find(|entry| entry.address == address)
        .ok_or(ValidationError::UnknownAddress)?;
    entry.used = true;
    Ok(())
}

pub fn rename_account(record: &mut WalletRecord, index: u32, name: &str) -> Result<(), WalletError> {
    let name = validate_account_name(name)?;
    let account = record.account_mut(index).ok_or(ValidationError::UnknownAccount)?;
    account.name = name;
    Ok(())
}

pub fn account_xpub(record: &WalletRecord, index: u32) -> Result<String, WalletError> {
    let account = account(record, index)?;
    account
        .chains()
        .map(|chains| chains.xpub.clone())
        .ok_or_else(|| StateError::NotDerivable.into())
}

fn ensure_not_present(record: &WalletRecord, address: &str) -> Result<(), WalletError> {
    if record.find_address(address).is_some() {
        log::warn!("Rejected duplicate import");
        return Err(ValidationError::DuplicateImport.into());
    }
    Ok(())
}

/// A fresh record shell for `network` with the given cipher parameters.
pub fn empty_record(
    network: Network,
    config: &WalletConfig,
    salt_hex: String,
) -> WalletRecord {
    WalletRecord {
        version: crate::storage::CURRENT_VERSION,
        encrypted_seed: String::new(),
        encrypted_mnemonic: String::new(),
        mnemonic_iv: String::new(),
        salt: salt_hex,
        iv: String::new(),
        kdf_iterations: config.kdf_iterations,
        accounts: Vec::new(),
        imported_keys: Default::default(),
        settings: crate::storage::WalletSettings {
            network,
            auto_lock_minutes: config.auto_lock_minutes,
        },
        created_at: Utc::now(),
    }
}
