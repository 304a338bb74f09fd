//! Bitcoin transaction construction
//!
//! - UTXO validation and coin selection
//! - Transaction assembly and size estimation
//! - Per-input signing
//! - Spend planning
//! - The blockchain-data collaborator contract

pub mod chain;
pub mod send;
pub mod signer;
pub mod transaction;
pub mod utxo;

// Re-export main types
pub use chain::{ChainBackend, ChainSnapshot, FeeEstimates};
pub use send::{ChangeOutput, Recipient, SignedTx};
pub use signer::{AccountKeys, ImportedKeys, KeyResolver, SeedKeys};
pub use transaction::{InputKind, TransactionBuilder};
pub use utxo::{select_utxos, CostModel, Selection, Utxo};
