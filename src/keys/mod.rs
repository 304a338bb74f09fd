//! Key encoding
//!
//! - BIP39 mnemonics
//! - WIF private keys
//! - Public key → address rendering
//! - Password strength

pub mod address;
pub mod mnemonic;
pub mod password;
pub mod wif;

pub use address::{derive_address, parse_address, AddressType};
pub use mnemonic::{
    check_seed_entropy, generate_mnemonic, mnemonic_to_seed, parse_mnemonic, validate_mnemonic,
};
pub use password::{score_password_strength, PasswordStrength, PasswordVerdict, MIN_PASSWORD_LEN};
pub use wif::{decode_wif, encode_wif, DecodedWif};
