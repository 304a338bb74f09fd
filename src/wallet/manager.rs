//! Wallet orchestrator
//!
//! `WalletManager` owns the wallet record, the unlock session and the rate
//! limiter behind one async mutex, so every operation on a wallet runs in
//! sequence. Mutations are applied to a draft copy of the record, persisted,
//! and only then committed in memory. PBKDF2 runs on the blocking pool.

use bitcoin::secp256k1::Secp256k1;
use bitcoin::Network;
use std::str::FromStr;
use std::time::Instant;
use tokio::sync::Mutex;
use zeroize::Zeroizing;

use super::accounts;
use super::address_manager::AddressManager;
use super::backup::{self, EncryptedBackup};
use super::limits::RateLimiter;
use super::multisig;
use super::session::Session;
use crate::bitcoin::send::{self as spend, Recipient, SignedTx};
use crate::bitcoin::signer::{AccountKeys, ImportedKeys, SeedKeys};
use crate::bitcoin::ChainBackend;
use crate::bitcoin::Utxo;
use crate::config::WalletConfig;
use crate::crypto::{
    self, derive_key, encrypt, keys_match, open_with_password, random_array, seal_with_password, PasswordSealed,
    Sealed, SecretKeyBytes, SALT_LEN,
};
use crate::error::{StateError, StructuralError, ValidationError, WalletError};
use crate::hd::{self, AccountPath, HdPath};
use crate::keys::{
    check_seed_entropy, decode_wif, derive_address, encode_wif, generate_mnemonic, mnemonic_to_seed,
    parse_mnemonic, score_password_strength, AddressType, PasswordStrength,
};
use crate::storage::{
    validate, Account, AccountKind, AddressRecord, BlobStore, FileStore, MultisigScript, WalletRecord, WalletStore,
};

pub const DEFAULT_ACCOUNT_NAME: &str = "Account 1";
pub const DEFAULT_MNEMONIC_STRENGTH: usize = 128;
pub const MAX_AUTO_LOCK_MINUTES: u32 = 24 * 60;

/// Result of creating a wallet.
pub struct CreatedWallet {
    /// Seed phrase to show the user once; `None` for a wallet built from a private key
    pub mnemonic: Option<Zeroizing<String>>,
    pub account: Account,
    pub password_strength: PasswordStrength,
}

pub enum ExportedKey {
    Wif(Zeroizing<String>),
    /// WIF sealed under an export password
    Encrypted(PasswordSealed),
}

struct Inner {
    record: Option<WalletRecord>,
    session: Session,
    limiter: RateLimiter,
}

pub struct WalletManager<S: BlobStore> {
    config: WalletConfig,
    store: WalletStore<S>,
    inner: Mutex<Inner>,
}

impl WalletManager<FileStore> {
    /// Open the wallet stored under `config.data_dir`.
    pub fn from_config(config: WalletConfig) -> Result<Self, WalletError> {
        let store = FileStore::new_with_base_dir(config.data_dir.clone());
        Self::open(config, store)
    }
}

impl<S: BlobStore> WalletManager<S> {
    /// Load (and validate) any existing record from `store`. The session
    /// starts locked.
    pub fn open(config: WalletConfig, store: S) -> Result<Self, WalletError> {
        let store = WalletStore::new(store);
        let record = store.load()?;

        let auto_lock = record
            .as_ref()
            .map(|record| record.settings.auto_lock_minutes)
            .unwrap_or(config.auto_lock_minutes);
        if let Some(record) = &record {
            log::info!(
                "📂 Opened wallet with {} accounts on {}",
                record.accounts.len(),
                record.settings.network
            );
        }

        let inner = Inner {
            record,
            session: Session::from_minutes(auto_lock),
            limiter: RateLimiter::new(config.rate_limit_ops, config.rate_limit_window),
        };

        Ok(Self {
            config,
            store,
            inner: Mutex::new(inner),
        })
    }

    pub fn config(&self) -> &WalletConfig {
        &self.config
    }

    pub fn blob_store(&self) -> &S {
        self.store.blob_store()
    }

    pub async fn has_wallet(&self) -> bool {
        self.inner.lock().await.record.is_some()
    }

    /// The latest committed record.
    pub async fn snapshot(&self) -> Option<WalletRecord> {
        self.inner.lock().await.record.clone()
    }

    // ---------------------------------------------------------------------
    // Wallet lifecycle
    // ---------------------------------------------------------------------

    /// Create an HD wallet from a fresh mnemonic and unlock it.
    pub async fn create_wallet(
        &self,
        password: &str,
        address_type: AddressType,
        strength_bits: usize,
    ) -> Result<CreatedWallet, WalletError> {
        let password_strength = score_password_strength(password)?;
        let mnemonic = generate_mnemonic(strength_bits)?;
        let account = self.init_seeded(mnemonic.clone(), password, address_type).await?;

        log::info!("✅ Created HD wallet");
        Ok(CreatedWallet {
            mnemonic: Some(mnemonic),
            account,
            password_strength,
        })
    }

    /// Restore an HD wallet from the user's own seed phrase and unlock it.
    pub async fn restore_wallet(
        &self,
        mnemonic: &str,
        password: &str,
        address_type: AddressType,
    ) -> Result<CreatedWallet, WalletError> {
        let password_strength = score_password_strength(password)?;
        let phrase = Zeroizing::new(parse_mnemonic(mnemonic)?.to_string());
        let account = self.init_seeded(phrase, password, address_type).await?;

        log::info!("✅ Restored HD wallet from seed phrase");
        Ok(CreatedWallet {
            mnemonic: None,
            account,
            password_strength,
        })
    }

    /// Create a wallet with no HD seed whose first account is an imported key.
    pub async fn create_wallet_from_private_key(
        &self,
        wif: &str,
        password: &str,
        address_type: AddressType,
    ) -> Result<CreatedWallet, WalletError> {
        let password_strength = score_password_strength(password)?;

        let mut inner = self.inner.lock().await;
        if inner.record.is_some() {
            return Err(StateError::WalletExists.into());
        }

        let network = self.config.network;
        let decoded = decode_wif(wif, network)?;
        let secp = Secp256k1::signing_only();
        derive_address(&decoded.private_key.public_key(&secp), address_type, network)?;

        let salt = random_array::<SALT_LEN>();
        let canonical = Zeroizing::new(decoded.private_key.to_wif());
        let password = Zeroizing::new(password.to_string());
        let iterations = self.config.kdf_iterations;
        let (key, sealed) = run_blocking(move || {
            let key = derive_key(&password, &salt, iterations)?;
            let sealed = seal_with_password(canonical.as_bytes(), &password, iterations)?;
            Ok((key, sealed))
        })
        .await?;

        let mut record = accounts::empty_record(network, &self.config, hex::encode(salt));
        let account = accounts::add_imported_key_account(
            &mut record,
            &decoded,
            address_type,
            DEFAULT_ACCOUNT_NAME,
            sealed,
            &self.config,
        )?;
        validate(&record)?;
        self.store.save(&record)?;

        inner.session = Session::from_minutes(record.settings.auto_lock_minutes);
        inner.session.unlock(key, now());
        inner.record = Some(record);

        log::info!("✅ Created wallet from imported private key");
        Ok(CreatedWallet {
            mnemonic: None,
            account,
            password_strength,
        })
    }

    async fn init_seeded(
        &self,
        phrase: Zeroizing<String>,
        password: &str,
        address_type: AddressType,
    ) -> Result<Account, WalletError> {
        let mut inner = self.inner.lock().await;
        if inner.record.is_some() {
            return Err(StateError::WalletExists.into());
        }

        let seed = mnemonic_to_seed(&phrase, "")?;
        let salt = random_array::<SALT_LEN>();
        let key = derive_master_key(password, hex::encode(salt), self.config.kdf_iterations).await?;

        let mut record = accounts::empty_record(self.config.network, &self.config, hex::encode(salt));
        let (encrypted_seed, iv) = encrypt(seed.as_slice(), &key, None)?.to_stored();
        let (encrypted_mnemonic, mnemonic_iv) = encrypt(phrase.as_bytes(), &key, None)?.to_stored();
        record.encrypted_seed = encrypted_seed;
        record.iv = iv;
        record.encrypted_mnemonic = encrypted_mnemonic;
        record.mnemonic_iv = mnemonic_iv;

        let account = accounts::add_hd_account(
            &mut record,
            seed.as_slice(),
            address_type,
            DEFAULT_ACCOUNT_NAME,
            &self.config,
        )?;
        validate(&record)?;
        self.store.save(&record)?;

        inner.session = Session::from_minutes(record.settings.auto_lock_minutes);
        inner.session.unlock(key, now());
        inner.record = Some(record);
        Ok(account)
    }

    pub async fn unlock(&self, password: &str) -> Result<(), WalletError> {
        let mut inner = self.inner.lock().await;
        let record = current_record(&inner)?.clone();
        let password = Zeroizing::new(password.to_string());

        let result = run_blocking(move || {
            let salt = hex::decode(&record.salt).map_err(|_| StructuralError::InvalidCipherParams)?;
            let key = derive_key(&password, &salt, record.kdf_iterations)?;
            check_master_key(&record, &key, &password)?;
            Ok(key)
        })
        .await;

        match result {
            Ok(key) => {
                inner.session.unlock(key, now());
                log::info!("🔓 Wallet unlocked");
                Ok(())
            }
            Err(e) => {
                log::warn!("Unlock attempt failed");
                Err(e)
            }
        }
    }

    pub async fn lock(&self) {
        self.inner.lock().await.session.lock();
    }

    pub async fn is_unlocked(&self) -> bool {
        self.inner.lock().await.session.is_unlocked(now())
    }

    /// Re-encrypt every secret in the wallet under a new password.
    pub async fn change_password(&self, current: &str, new_password: &str) -> Result<PasswordStrength, WalletError> {
        let strength = score_password_strength(new_password)?;

        let mut inner = self.inner.lock().await;
        let old_key = self.verify_password(&mut inner, current).await?;
        let record = current_record(&inner)?.clone();

        let current = Zeroizing::new(current.to_string());
        let new_password = Zeroizing::new(new_password.to_string());
        let iterations = self.config.kdf_iterations;
        let (draft, new_key) =
            run_blocking(move || reencrypt(record, &old_key, &current, &new_password, iterations)).await?;

        validate(&draft)?;
        self.store.save(&draft)?;
        inner.record = Some(draft);
        inner.session.unlock(new_key, now());

        log::info!("🔑 Wallet password changed");
        Ok(strength)
    }

    pub async fn reveal_mnemonic(&self, password: &str) -> Result<Zeroizing<String>, WalletError> {
        let mut inner = self.inner.lock().await;
        let key = self.verify_password(&mut inner, password).await?;
        let record = current_record(&inner)?;
        if !record.has_seed() || record.encrypted_mnemonic.is_empty() {
            return Err(StateError::NoSeed.into());
        }

        let sealed = Sealed::from_stored(&record.encrypted_mnemonic, &record.mnemonic_iv)?;
        let bytes = crypto::decrypt(&sealed, &key)?;
        let phrase = std::str::from_utf8(&bytes).map_err(|_| WalletError::Crypto)?;
        Ok(Zeroizing::new(phrase.to_string()))
    }

    /// Seal the current record under a separate backup password.
    pub async fn export_backup(&self, backup_password: &str) -> Result<EncryptedBackup, WalletError> {
        score_password_strength(backup_password)?;

        let mut inner = self.inner.lock().await;
        inner.session.key(now())?;
        let record = current_record(&inner)?.clone();

        let backup_password = Zeroizing::new(backup_password.to_string());
        let iterations = self.config.kdf_iterations;
        let backup = run_blocking(move || backup::create_backup(&record, &backup_password, iterations)).await?;

        log::info!("💾 Exported encrypted backup");
        Ok(backup)
    }

    /// Replace an empty wallet slot with the record inside `backup`. The
    /// restored wallet starts locked.
    pub async fn restore_backup(&self, backup: EncryptedBackup, backup_password: &str) -> Result<(), WalletError> {
        let mut inner = self.inner.lock().await;
        if inner.record.is_some() {
            return Err(StateError::WalletExists.into());
        }

        let backup_password = Zeroizing::new(backup_password.to_string());
        let restored = run_blocking(move || backup::open_backup(&backup, &backup_password)).await?;
        if restored.settings.network != self.config.network {
            log::warn!("Backup belongs to {}, not {}", restored.settings.network, self.config.network);
            return Err(ValidationError::InvalidBackup.into());
        }

        self.store.save(&restored)?;
        inner.session = Session::from_minutes(restored.settings.auto_lock_minutes);
        inner.record = Some(restored);

        log::info!("💾 Restored wallet from backup");
        Ok(())
    }

    /// Delete the wallet record. Irreversible without a backup or seed phrase,
    /// so it needs an unlocked session and the password.
    pub async fn reset_wallet(&self, password: &str) -> Result<(), WalletError> {
        let mut inner = self.inner.lock().await;
        self.verify_password(&mut inner, password).await?;
        self.store.delete()?;
        inner.record = None;
        inner.session.lock();
        log::warn!("🗑️  Wallet reset");
        Ok(())
    }

    pub async fn set_auto_lock(&self, minutes: u32) -> Result<(), WalletError> {
        if minutes == 0 || minutes > MAX_AUTO_LOCK_MINUTES {
            return Err(ValidationError::InvalidAutoLock {
                max: MAX_AUTO_LOCK_MINUTES,
            }
            .into());
        }

        let mut inner = self.inner.lock().await;
        let mut draft = current_record(&inner)?.clone();
        draft.settings.auto_lock_minutes = minutes;
        self.commit(&mut inner, draft)?;
        inner.session.set_timeout(std::time::Duration::from_secs(u64::from(minutes) * 60));
        Ok(())
    }

    // ---------------------------------------------------------------------
    // Accounts
    // ---------------------------------------------------------------------

    /// Add an account derived from the wallet seed.
    pub async fn create_hd_account(&self, address_type: AddressType, name: &str) -> Result<Account, WalletError> {
        let mut inner = self.inner.lock().await;
        inner.limiter.acquire(now())?;
        if !current_record(&inner)?.has_seed() {
            return Err(StateError::NoSeed.into());
        }
        let key = inner.session.key(now())?;

        let record = current_record(&inner)?;
        let seed = decrypt_seed(record, &key)?;
        let mut draft = record.clone();
        let account = accounts::add_hd_account(&mut draft, &seed, address_type, name, &self.config)?;

        self.commit(&mut inner, draft)?;
        Ok(account)
    }

    /// Import a WIF private key as a single-address account.
    pub async fn import_private_key(
        &self,
        wif: &str,
        address_type: AddressType,
        name: &str,
        password: &str,
    ) -> Result<Account, WalletError> {
        let mut inner = self.inner.lock().await;
        inner.limiter.acquire(now())?;
        self.verify_password(&mut inner, password).await?;

        let network = current_record(&inner)?.settings.network;
        let decoded = decode_wif(wif, network)?;
        let secp = Secp256k1::signing_only();
        let address = derive_address(&decoded.private_key.public_key(&secp), address_type, network)?;
        if current_record(&inner)?.find_address(&address.to_string()).is_some() {
            log::warn!("Rejected duplicate import");
            return Err(ValidationError::DuplicateImport.into());
        }

        let canonical = Zeroizing::new(decoded.private_key.to_wif().into_bytes());
        let sealed = seal_async(canonical, password, self.config.kdf_iterations).await?;

        let mut draft = current_record(&inner)?.clone();
        let account =
            accounts::add_imported_key_account(&mut draft, &decoded, address_type, name, sealed, &self.config)?;

        self.commit(&mut inner, draft)?;
        Ok(account)
    }

    /// Import a foreign seed phrase as an account with its own chains.
    pub async fn import_seed(
        &self,
        mnemonic: &str,
        account_index: u32,
        address_type: AddressType,
        name: &str,
        password: &str,
    ) -> Result<Account, WalletError> {
        let mut inner = self.inner.lock().await;
        inner.limiter.acquire(now())?;
        let phrase = Zeroizing::new(parse_mnemonic(mnemonic)?.to_string());
        check_seed_entropy(&phrase)?;
        self.verify_password(&mut inner, password).await?;

        let seed = mnemonic_to_seed(&phrase, "")?;
        let plaintext = Zeroizing::new(phrase.as_bytes().to_vec());
        let sealed = seal_async(plaintext, password, self.config.kdf_iterations).await?;

        let mut draft = current_record(&inner)?.clone();
        let account = accounts::add_imported_seed_account(
            &mut draft,
            seed.as_slice(),
            account_index,
            address_type,
            name,
            sealed,
            &self.config,
        )?;

        self.commit(&mut inner, draft)?;
        Ok(account)
    }

    /// This wallet's xpub for the next multisig account of `script`, to hand
    /// to cosigners before the account is created.
    pub async fn cosigner_xpub(&self, script: MultisigScript) -> Result<String, WalletError> {
        let mut inner = self.inner.lock().await;
        let key = inner.session.key(now())?;
        let record = current_record(&inner)?;
        let seed = decrypt_seed(record, &key)?;

        let network = record.settings.network;
        let path = AddressManager::multisig_account_path(script, network, record.next_account_index());
        let (xpub, _) = hd::account_xpub(&seed, &path, network)?;
        Ok(xpub.to_string())
    }

    pub async fn create_multisig_account(
        &self,
        script: MultisigScript,
        threshold: u8,
        cosigner_xpubs: &[String],
        name: &str,
    ) -> Result<Account, WalletError> {
        let mut inner = self.inner.lock().await;
        inner.limiter.acquire(now())?;
        if !current_record(&inner)?.has_seed() {
            return Err(StateError::NoSeed.into());
        }
        let key = inner.session.key(now())?;

        let record = current_record(&inner)?;
        let seed = decrypt_seed(record, &key)?;
        let network = record.settings.network;
        let path = AddressManager::multisig_account_path(script, network, record.next_account_index());
        let (own_xpub, _) = hd::account_xpub(&seed, &path, network)?;
        let own_xpub = own_xpub.to_string();
        let multisig = multisig::build_config(script, threshold, &own_xpub, cosigner_xpubs, network)?;
        let cosigners = multisig.cosigner_xpubs.len();

        let mut draft = record.clone();
        let account = accounts::add_multisig_account(&mut draft, multisig, &path, own_xpub, name, &self.config)?;

        self.commit(&mut inner, draft)?;
        log::info!("Created {}-of-{} multisig account {}", threshold, cosigners, account.index);
        Ok(account)
    }

    /// Hand out the next receive or change address. The advanced counter is
    /// persisted before the address is returned.
    pub async fn generate_next_address(&self, account_index: u32, is_change: bool) -> Result<AddressRecord, WalletError> {
        let mut inner = self.inner.lock().await;
        let mut draft = current_record(&inner)?.clone();
        let entry = accounts::next_address(&mut draft, account_index, is_change, self.config.gap_limit)?;
        self.commit(&mut inner, draft)?;
        Ok(entry)
    }

    pub async fn get_change_address(&self, account_index: u32) -> Result<AddressRecord, WalletError> {
        self.generate_next_address(account_index, true).await
    }

    pub async fn mark_address_used(&self, address: &str) -> Result<(), WalletError> {
        let mut inner = self.inner.lock().await;
        let mut draft = current_record(&inner)?.clone();
        accounts::mark_address_used(&mut draft, address)?;
        self.commit(&mut inner, draft)
    }

    pub async fn rename_account(&self, account_index: u32, name: &str) -> Result<(), WalletError> {
        let mut inner = self.inner.lock().await;
        let mut draft = current_record(&inner)?.clone();
        accounts::rename_account(&mut draft, account_index, name)?;
        self.commit(&mut inner, draft)
    }

    pub async fn export_xpub(&self, account_index: u32) -> Result<String, WalletError> {
        let inner = self.inner.lock().await;
        accounts::account_xpub(current_record(&inner)?, account_index)
    }

    /// Export the private key behind one address as WIF, optionally sealed
    /// under `export_password`.
    pub async fn export_private_key(
        &self,
        account_index: u32,
        address: &str,
        password: &str,
        export_password: Option<&str>,
    ) -> Result<ExportedKey, WalletError> {
        if let Some(export_password) = export_password {
            score_password_strength(export_password)?;
        }

        let mut inner = self.inner.lock().await;
        let key = self.verify_password(&mut inner, password).await?;
        let record = current_record(&inner)?;
        let account = accounts::account(record, account_index)?;
        let entry = account
            .addresses
            .iter()
            .find(|entry| entry.address == address)
            .ok_or(ValidationError::UnknownAddress)?;
        let network = record.settings.network;

        let wif = match &account.kind {
            AccountKind::Multisig { .. } => return Err(ValidationError::MultisigExportUnsupported.into()),
            AccountKind::ImportedKey { .. } => {
                let imported = imported_entry(record, account_index)?;
                let bytes = open_async(imported.sealed.clone(), password).await?;
                let text = std::str::from_utf8(&bytes).map_err(|_| WalletError::Crypto)?;
                Zeroizing::new(text.to_string())
            }
            AccountKind::Hd { .. } => {
                let seed = decrypt_seed(record, &key)?;
                wif_at(&seed, &entry.derivation_path, network)?
            }
            AccountKind::ImportedSeed { .. } => {
                let seed = imported_seed(record, account_index, password).await?;
                wif_at(&seed, &entry.derivation_path, network)?
            }
        };

        log::info!("Exported private key for account {}", account_index);
        match export_password {
            None => Ok(ExportedKey::Wif(wif)),
            Some(export_password) => {
                let plaintext = Zeroizing::new(wif.as_bytes().to_vec());
                let sealed = seal_async(plaintext, export_password, self.config.kdf_iterations).await?;
                Ok(ExportedKey::Encrypted(sealed))
            }
        }
    }

    // ---------------------------------------------------------------------
    // Spending
    // ---------------------------------------------------------------------

    /// Select inputs from `utxos`, sign, and persist the change counter.
    ///
    /// Single-sig accounts yield a complete transaction; multisig accounts
    /// yield a PSBT carrying this wallet's signatures.
    pub async fn build_transaction(
        &self,
        account_index: u32,
        recipients: &[Recipient],
        fee_rate: u64,
        password: &str,
        utxos: &[Utxo],
    ) -> Result<SignedTx, WalletError> {
        let mut inner = self.inner.lock().await;
        let session_key = self.verify_password(&mut inner, password).await?;
        let record = current_record(&inner)?;
        validate(record)?;

        let mut draft = record.clone();
        let plan = spend::plan(&mut draft, account_index, recipients, fee_rate, utxos, &self.config)?;
        let account = accounts::account(&draft, account_index)?.clone();
        let network = draft.settings.network;

        let keys = match &account.kind {
            AccountKind::Hd { chains, .. } | AccountKind::Multisig { chains, .. } => {
                let seed = decrypt_seed(&draft, &session_key)?;
                AccountKeys::Seed(SeedKeys::new(seed, AccountPath::from_str(&chains.derivation_path)?, network))
            }
            AccountKind::ImportedSeed { chains, .. } => {
                let seed = imported_seed(&draft, account_index, password).await?;
                AccountKeys::Seed(SeedKeys::new(seed, AccountPath::from_str(&chains.derivation_path)?, network))
            }
            AccountKind::ImportedKey { .. } => {
                let imported = imported_entry(&draft, account_index)?;
                let key = derive_master_key(password, imported.sealed.salt.clone(), imported.sealed.iterations)
                    .await
                    .map_err(|_| WalletError::Crypto)?;
                let sealed = Sealed::from_stored(&imported.sealed.encrypted_data, &imported.sealed.iv)?;
                let address = account
                    .addresses
                    .first()
                    .map(|entry| entry.address.clone())
                    .ok_or(WalletError::Internal("imported account has no address"))?;
                AccountKeys::Imported(ImportedKeys::new(key, sealed, address, network))
            }
        };

        let signed = match account.kind {
            AccountKind::Multisig { .. } => spend::finish_multisig(plan, &account, network, &keys)?,
            _ => spend::finish_single_sig(plan, &account, network, &keys)?,
        };
        drop(keys);

        self.commit(&mut inner, draft)?;
        log::info!(
            "✍️  Signed {} from account {} ({} inputs, fee {} sats)",
            if signed.complete { "transaction" } else { "PSBT" },
            account_index,
            signed.inputs.len(),
            signed.fee
        );
        Ok(signed)
    }

    /// Fetch UTXOs and fees from `backend`, build, broadcast a complete
    /// transaction and mark the touched addresses used.
    ///
    /// The wallet lock is not held while the backend is awaited.
    pub async fn send<B: ChainBackend>(
        &self,
        backend: &B,
        account_index: u32,
        recipients: &[Recipient],
        fee_rate: Option<u64>,
        password: &str,
    ) -> Result<SignedTx, WalletError> {
        let addresses: Vec<String> = {
            let inner = self.inner.lock().await;
            let account = accounts::account(current_record(&inner)?, account_index)?;
            account.addresses.iter().map(|entry| entry.address.clone()).collect()
        };

        let snapshot = backend.fetch_snapshot(&addresses).await?;
        snapshot.validate()?;
        let fee_rate = fee_rate.unwrap_or(snapshot.fee_estimates.half_hour_fee);
        log::debug!(
            "Snapshot at height {}: {} UTXOs, fee rate {} sat/vB",
            snapshot.current_height,
            snapshot.utxos.len(),
            fee_rate
        );

        let signed = self
            .build_transaction(account_index, recipients, fee_rate, password, &snapshot.utxos)
            .await?;
        if !signed.complete {
            return Ok(signed);
        }

        let raw_hex = signed
            .raw_hex
            .as_deref()
            .ok_or(WalletError::Internal("complete transaction without raw hex"))?;
        let txid = backend.broadcast(raw_hex).await?;
        if txid != signed.txid {
            log::warn!("Backend reported txid {} for transaction {}", txid, signed.txid);
        }
        log::info!("📡 Broadcast transaction {}", signed.txid);

        let mut inner = self.inner.lock().await;
        let mut draft = current_record(&inner)?.clone();
        spend::mark_spent(&mut draft, &signed)?;
        self.commit(&mut inner, draft)?;

        Ok(signed)
    }

    // ---------------------------------------------------------------------
    // Internals
    // ---------------------------------------------------------------------

    fn commit(&self, inner: &mut Inner, draft: WalletRecord) -> Result<(), WalletError> {
        self.store.save(&draft)?;
        inner.record = Some(draft);
        Ok(())
    }

    /// Check `password` against the unlocked session and return the master key.
    async fn verify_password(&self, inner: &mut Inner, password: &str) -> Result<SecretKeyBytes, WalletError> {
        let session_key = inner.session.key(now())?;
        let record = current_record(inner)?;
        let derived = derive_master_key(password, record.salt.clone(), record.kdf_iterations).await?;

        if !keys_match(&derived, &session_key) {
            log::warn!("Password re-authentication failed");
            return Err(WalletError::Crypto);
        }
        Ok(session_key)
    }
}

fn now() -> Instant {
    tokio::time::Instant::now().into_std()
}

fn current_record(inner: &Inner) -> Result<&WalletRecord, WalletError> {
    inner.record.as_ref().ok_or_else(|| StateError::NoWallet.into())
}

fn imported_entry(record: &WalletRecord, account_index: u32) -> Result<&crate::storage::ImportedKeyRecord, WalletError> {
    record
        .imported_keys
        .get(&account_index)
        .ok_or_else(|| StructuralError::MissingImportedKey { account: account_index }.into())
}

async fn run_blocking<T, F>(task: F) -> Result<T, WalletError>
where
    F: FnOnce() -> Result<T, WalletError> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(task)
        .await
        .map_err(WalletError::internal("blocking task failed"))?
}

async fn derive_master_key(password: &str, salt_hex: String, iterations: u32) -> Result<SecretKeyBytes, WalletError> {
    let password = Zeroizing::new(password.to_string());
    run_blocking(move || {
        let salt = hex::decode(&salt_hex).map_err(|_| StructuralError::InvalidCipherParams)?;
        derive_key(&password, &salt, iterations)
    })
    .await
}

async fn seal_async(
    plaintext: Zeroizing<Vec<u8>>,
    password: &str,
    iterations: u32,
) -> Result<PasswordSealed, WalletError> {
    let password = Zeroizing::new(password.to_string());
    run_blocking(move || seal_with_password(&plaintext, &password, iterations)).await
}

async fn open_async(sealed: PasswordSealed, password: &str) -> Result<Zeroizing<Vec<u8>>, WalletError> {
    let password = Zeroizing::new(password.to_string());
    run_blocking(move || open_with_password(&sealed, &password)).await
}

fn decrypt_seed(record: &WalletRecord, key: &SecretKeyBytes) -> Result<Zeroizing<Vec<u8>>, WalletError> {
    if !record.has_seed() {
        return Err(StateError::NoSeed.into());
    }
    let sealed = Sealed::from_stored(&record.encrypted_seed, &record.iv)?;
    crypto::decrypt(&sealed, key)
}

/// Decrypt an imported seed phrase and expand it to a BIP39 seed.
async fn imported_seed(
    record: &WalletRecord,
    account_index: u32,
    password: &str,
) -> Result<Zeroizing<Vec<u8>>, WalletError> {
    let imported = imported_entry(record, account_index)?;
    let bytes = open_async(imported.sealed.clone(), password).await?;
    let phrase = std::str::from_utf8(&bytes).map_err(|_| WalletError::Crypto)?;
    let seed = mnemonic_to_seed(phrase, "")?;
    Ok(Zeroizing::new(seed.to_vec()))
}

fn wif_at(seed: &[u8], derivation_path: &str, network: Network) -> Result<Zeroizing<String>, WalletError> {
    let path = HdPath::from_str(derivation_path)?;
    let key = hd::derive_path(seed, &path, network)?;
    Ok(encode_wif(&key.secret, key.public.compressed, network))
}

/// Prove `key` (and `password`) open the wallet's secrets.
fn check_master_key(record: &WalletRecord, key: &SecretKeyBytes, password: &str) -> Result<(), WalletError> {
    if record.has_seed() {
        return decrypt_seed(record, key).map(|_| ());
    }
    let first = record
        .imported_keys
        .values()
        .next()
        .ok_or(StructuralError::MissingImportedKey { account: 0 })?;
    open_with_password(&first.sealed, password).map(|_| ())
}

/// Move every ciphertext in `record` from the old password to a new one.
fn reencrypt(
    mut record: WalletRecord,
    old_key: &SecretKeyBytes,
    old_password: &str,
    new_password: &str,
    iterations: u32,
) -> Result<(WalletRecord, SecretKeyBytes), WalletError> {
    let salt = random_array::<SALT_LEN>();
    let new_key = derive_key(new_password, &salt, iterations)?;

    if record.has_seed() {
        let seed = decrypt_seed(&record, old_key)?;
        let (encrypted_seed, iv) = encrypt(&seed, &new_key, None)?.to_stored();
        record.encrypted_seed = encrypted_seed;
        record.iv = iv;

        if !record.encrypted_mnemonic.is_empty() {
            let sealed = Sealed::from_stored(&record.encrypted_mnemonic, &record.mnemonic_iv)?;
            let phrase = crypto::decrypt(&sealed, old_key)?;
            let (encrypted_mnemonic, mnemonic_iv) = encrypt(&phrase, &new_key, None)?.to_stored();
            record.encrypted_mnemonic = encrypted_mnemonic;
            record.mnemonic_iv = mnemonic_iv;
        }
    }

    for entry in record.imported_keys.values_mut() {
        let plaintext = open_with_password(&entry.sealed, old_password)?;
        entry.sealed = seal_with_password(&plaintext, new_password, iterations)?;
    }

    record.salt = hex::encode(salt);
    record.kdf_iterations = iterations;
    Ok((record, new_key))
}
