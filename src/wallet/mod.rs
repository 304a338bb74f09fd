//! Account engine
//!
//! - `manager.rs` - Orchestrator for all wallet operations
//! - `accounts.rs` - Account creation, import and address pools
//! - `address_manager.rs` - Public derivation of addresses and multisig scripts
//! - `multisig.rs` - Multisig configuration
//! - `session.rs` - Unlock session with auto-lock
//! - `limits.rs` - Rate limiting
//! - `backup.rs` - Encrypted backups

pub mod accounts;
pub mod address_manager;
pub mod backup;
pub mod limits;
pub mod manager;
pub mod multisig;
pub mod session;

// Re-export the manager as the main entry point
pub use address_manager::AddressManager;
pub use backup::EncryptedBackup;
pub use manager::{CreatedWallet, ExportedKey, WalletManager};
