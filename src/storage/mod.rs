//! Storage and persistence layer
//!
//! - Blob stores (file system and in-memory)
//! - Wallet record schema
//! - Load, save and structural validation

mod file_system;
pub mod models;
pub mod record;

pub use file_system::{BlobStore, FileStore, MemoryStore};
pub use models::{
    Account, AccountKind, AccountType, AddressRecord, Chains, ImportType, ImportedKeyRecord,
    ImportedKeyType, MultisigConfig, MultisigScript, WalletRecord, WalletSettings,
    CURRENT_VERSION, IMPORTED_PATH,
};
pub use record::{validate, WalletStore, RECORD_KEY};
