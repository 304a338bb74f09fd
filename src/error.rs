//! Error types for wallet-core operations
//!
//! Every message rendered by these types is a fixed template. Variants carry
//! only enums and counters, never user input, key material or the text of an
//! underlying library error.

use bitcoin::NetworkKind;
use serde::Serialize;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum WalletError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// Covers both a wrong password and a corrupted ciphertext.
    #[error("Incorrect password or corrupted data")]
    Crypto,

    #[error(transparent)]
    Structural(#[from] StructuralError),

    #[error(transparent)]
    State(#[from] StateError),

    #[error("Insufficient funds: need {needed} sats, have {available} sats")]
    InsufficientFunds { needed: u64, available: u64 },

    #[error("Storage error")]
    Storage(#[from] StorageError),

    #[error("Blockchain backend error: {0}")]
    Backend(&'static str),

    #[error("Internal error: {0}")]
    Internal(&'static str),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Invalid seed phrase")]
    InvalidMnemonic,

    #[error("Seed phrase strength must be 128, 160, 192, 224 or 256 bits")]
    UnsupportedStrength,

    #[error("This seed phrase is publicly known or too repetitive to be safe")]
    LowEntropySeed,

    #[error("Invalid private key format")]
    InvalidWif,

    #[error("This is a {} key; this wallet only accepts {} keys", network_label(.key), network_label(.wallet))]
    WrongNetwork { key: NetworkKind, wallet: NetworkKind },

    #[error("Uncompressed keys can only be used with Legacy addresses")]
    IncompatibleAddressType,

    #[error("This key is already in the wallet")]
    DuplicateImport,

    #[error("Password must be at least {min} characters")]
    PasswordTooShort { min: usize },

    #[error("Maximum number of accounts ({max}) reached")]
    AccountLimit { max: usize },

    #[error("Too many account operations; try again in {retry_after_secs} seconds")]
    RateLimited { retry_after_secs: u64 },

    #[error("Invalid Bitcoin address for this network")]
    InvalidAddress,

    #[error("Invalid derivation path")]
    InvalidDerivationPath,

    #[error("Amount must be greater than zero")]
    InvalidAmount,

    #[error("Output amount is below the dust threshold of {threshold} sats")]
    DustOutput { threshold: u64 },

    #[error("Fee rate must be between 1 and {max} sat/vB")]
    InvalidFeeRate { max: u64 },

    #[error("Account name must be 1 to {max} characters")]
    InvalidAccountName { max: usize },

    #[error("Account not found")]
    UnknownAccount,

    #[error("Address does not belong to this wallet")]
    UnknownAddress,

    #[error("Multisig needs 1 <= threshold <= cosigners <= {max_cosigners}")]
    InvalidMultisig { max_cosigners: usize },

    #[error("Invalid extended public key")]
    InvalidXpub,

    #[error("{limit} consecutive receive addresses are unused; use one before generating more")]
    GapLimitReached { limit: u32 },

    #[error("Transaction needs at least one output")]
    NoOutputs,

    #[error("Malformed UTXO data")]
    InvalidUtxo,

    #[error("Multisig accounts have no single exportable private key")]
    MultisigExportUnsupported,

    #[error("Invalid backup file")]
    InvalidBackup,

    #[error("Auto-lock must be between 1 and {max} minutes")]
    InvalidAutoLock { max: u32 },
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StateError {
    #[error("Wallet is locked")]
    Locked,

    #[error("This wallet has no HD seed; accounts can only be imported from keys or seed phrases")]
    NoSeed,

    #[error("No wallet has been created")]
    NoWallet,

    #[error("A wallet already exists")]
    WalletExists,

    #[error("Imported private key accounts cannot derive new addresses")]
    NotDerivable,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StructuralError {
    #[error("Wallet data is malformed")]
    Malformed,

    #[error("Wallet schema version {found} is not supported (max {supported})")]
    UnsupportedVersion { found: u32, supported: u32 },

    #[error("Account {account} requires an HD seed but the wallet has none")]
    SeedlessHdAccount { account: u32 },

    #[error("Account {account} is missing its imported key")]
    MissingImportedKey { account: u32 },

    #[error("Imported key entry {account} has no matching account")]
    OrphanImportedKey { account: u32 },

    #[error("Imported key entry {account} has the wrong type")]
    ImportedKeyTypeMismatch { account: u32 },

    #[error("Account at position {position} records index {index}")]
    AccountIndexMismatch { position: usize, index: u32 },

    #[error("Account {account} has an invalid address list")]
    InvalidAddresses { account: u32 },

    #[error("Account {account} has chain counters behind its addresses")]
    CounterBehind { account: u32 },

    #[error("Account {account} has an invalid derivation path")]
    InvalidDerivationPath { account: u32 },

    #[error("Account {account} has an invalid extended public key")]
    InvalidXpub { account: u32 },

    #[error("Account {account} address {index} does not match its derivation")]
    AddressMismatch { account: u32, index: u32 },

    #[error("Wallet encryption parameters are invalid")]
    InvalidCipherParams,
}

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Storage lock poisoned")]
    Poisoned,
}

/// Coarse error category reported to collaborators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ErrorKind {
    ValidationError,
    CryptographicError,
    StructuralError,
    StateError,
    InsufficientFunds,
    StorageError,
    BackendError,
    InternalError,
}

impl WalletError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            WalletError::Validation(_) => ErrorKind::ValidationError,
            WalletError::Crypto => ErrorKind::CryptographicError,
            WalletError::Structural(_) => ErrorKind::StructuralError,
            WalletError::State(_) => ErrorKind::StateError,
            WalletError::InsufficientFunds { .. } => ErrorKind::InsufficientFunds,
            WalletError::Storage(_) => ErrorKind::StorageError,
            WalletError::Backend(_) => ErrorKind::BackendError,
            WalletError::Internal(_) => ErrorKind::InternalError,
        }
    }

    /// Log a library error at debug level and replace it with a fixed context string.
    pub(crate) fn internal<E: std::fmt::Display>(context: &'static str) -> impl FnOnce(E) -> WalletError {
        move |e| {
            log::debug!("{}: {}", context, e);
            WalletError::Internal(context)
        }
    }
}

fn network_label(kind: &NetworkKind) -> &'static str {
    match kind {
        NetworkKind::Main => "mainnet",
        NetworkKind::Test => "testnet",
    }
}
