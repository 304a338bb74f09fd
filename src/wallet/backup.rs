//! Password-encrypted wallet backups
//!
//! A backup is the full wallet record, already encrypted at rest, sealed a
//! second time under a backup password with its own salt.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::crypto::{open_with_password, seal_with_password, PasswordSealed};
use crate::error::{ValidationError, WalletError};
use crate::storage::record::parse_record;
use crate::storage::{validate, WalletRecord};

pub const BACKUP_FORMAT: &str = "wallet-core-backup";
pub const BACKUP_VERSION: u32 = 1;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EncryptedBackup {
    pub format: String,
    pub version: u32,
    pub created_at: DateTime<Utc>,
    pub payload: PasswordSealed,
}

pub fn create_backup(
    record: &WalletRecord,
    backup_password: &str,
    iterations: u32,
) -> Result<EncryptedBackup, WalletError> {
    let json = zeroize::Zeroizing::new(
        serde_json::to_vec(record).map_err(crate::error::StorageError::from)?,
    );
    let payload = seal_with_password(&json, backup_password, iterations)?;

    Ok(EncryptedBackup {
        format: BACKUP_FORMAT.to_string(),
        version: BACKUP_VERSION,
        created_at: Utc::now(),
        payload,
    })
}

/// Decrypt a backup and run the full structural validation on its record.
pub fn open_backup(backup: &EncryptedBackup, backup_password: &str) -> Result<WalletRecord, WalletError> {
    if backup.format != BACKUP_FORMAT || backup.version == 0 || backup.version > BACKUP_VERSION {
        return Err(ValidationError::InvalidBackup.into());
    }

    let json = open_with_password(&backup.payload, backup_password)?;
    let record = parse_record(&json)?;
    validate(&record)?;
    Ok(record)
}

pub fn backup_to_json(backup: &EncryptedBackup) -> Result<String, WalletError> {
    serde_json::to_string_pretty(backup).map_err(|e| crate::error::StorageError::from(e).into())
}

pub fn backup_from_json(json: &str) -> Result<EncryptedBackup, WalletError> {
    serde_json::from_str(json).map_err(|e| {
        log::debug!("Backup is not valid JSON: {}", e);
        ValidationError::InvalidBackup.into()
    })
}
