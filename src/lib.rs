//! wallet-core: non-custodial Bitcoin key management and transaction construction
//!
//! This crate owns the secrets of a single-signature (and optionally
//! multisignature) Bitcoin wallet: encrypted-at-rest HD seeds and imported
//! keys, BIP32/39/44/49/84/48 derivation, coin selection, change policy and
//! per-input signing. It performs no network I/O; hosts plug a
//! [`ChainBackend`] in for UTXOs, fee estimates and broadcast.
//!
//! # Architecture
//!
//! - **CryptoCore** (`crypto`): PBKDF2-HMAC-SHA256, AES-256-GCM, OS randomness
//! - **KeyCodec** (`keys`): mnemonics, WIF, addresses, password scoring
//! - **HDDeriver** (`hd`): validated derivation paths and key derivation
//! - **WalletStore** (`storage`): the persisted record and its invariants
//! - **AccountEngine** (`wallet`): accounts, sessions, limits, orchestration
//! - **TxBuilder** (`bitcoin`): selection, assembly, signing, spending
//!
//! # Example
//!
//! ```ignore
//! use wallet_core::{AddressType, MemoryStore, WalletConfig, WalletManager};
//!
//! let manager = WalletManager::open(WalletConfig::from_env()?, MemoryStore::new())?;
//! let created = manager.create_wallet("correct horse battery", AddressType::NativeSegWit, 128).await?;
//! let receive = manager.generate_next_address(created.account.index, false).await?;
//! ```

// Public modules
pub mod api;
pub mod bitcoin;
pub mod config;
pub mod crypto;
pub mod error;
pub mod hd;
pub mod keys;
pub mod storage;
pub mod wallet;

// Re-exports for convenience
pub use crate::bitcoin::{ChainBackend, ChainSnapshot, FeeEstimates, Recipient, SignedTx, Utxo};
pub use api::ApiResponse;
pub use config::WalletConfig;
pub use error::{ErrorKind, StateError, StructuralError, ValidationError, WalletError};
pub use hd::{AccountPath, HdPath};
pub use keys::AddressType;
pub use storage::{
    Account, AccountKind, AddressRecord, BlobStore, FileStore, MemoryStore, MultisigScript, WalletRecord,
};
pub use wallet::{CreatedWallet, EncryptedBackup, ExportedKey, WalletManager};

// Common result type
pub type Result<T> = std::result::Result<T, WalletError>;
