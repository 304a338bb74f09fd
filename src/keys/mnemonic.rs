//! BIP39 seed phrases

use bip39::Mnemonic;
use std::collections::HashSet;
use zeroize::Zeroizing;

use crate::crypto;
use crate::error::{ValidationError, WalletError};

pub const VALID_STRENGTHS: [usize; 5] = [128, 160, 192, 224, 256];

/// Published BIP39 test vectors. Anything derived from these is public knowledge.
const KNOWN_TEST_PHRASES: &[&str] = &[
    "abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon about",
    "legal winner thank year wave sausage worth useful legal winner thank yellow",
    "letter advice cage absurd amount doctor acoustic avoid letter advice cage above",
    "zoo zoo zoo zoo zoo zoo zoo zoo zoo zoo zoo wrong",
    "abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon agent",
    "zoo zoo zoo zoo zoo zoo zoo zoo zoo zoo zoo zoo zoo zoo zoo zoo zoo when",
    "abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon art",
    "zoo zoo zoo zoo zoo zoo zoo zoo zoo zoo zoo zoo zoo zoo zoo zoo zoo zoo zoo zoo zoo zoo zoo vote",
    "scheme spot photo card baby mountain device kick cradle pact join borrow",
    "cat swing flag economy stadium alone churn speed unique patch report train",
    "vessel ladder alter error federal sibling chat ability sun glass valve picture",
    "ozone drill grab fiber curtain grace pudding thank cruise elder eight picnic",
];

/// Generate a new English mnemonic with `strength_bits` of CSPRNG entropy.
///
/// The entropy bytes go straight into the checksum encoding; nothing is
/// hashed, mixed or truncated on the way.
pub fn generate_mnemonic(strength_bits: usize) -> Result<Zeroizing<String>, WalletError> {
    if !VALID_STRENGTHS.contains(&strength_bits) {
        return Err(ValidationError::UnsupportedStrength.into());
    }

    let entropy = Zeroizing::new(crypto::random_bytes(strength_bits / 8));
    let mnemonic = Mnemonic::from_entropy(&entropy)
        .map_err(|_| WalletError::Internal("mnemonic encoding failed"))?;

    Ok(Zeroizing::new(mnemonic.to_string()))
}

/// Parse a phrase after collapsing whitespace and case.
pub fn parse_mnemonic(phrase: &str) -> Result<Mnemonic, WalletError> {
    let normalized = normalize(phrase);
    Mnemonic::parse(normalized.as_str()).map_err(|_| ValidationError::InvalidMnemonic.into())
}

/// Checksum and wordlist validation.
pub fn validate_mnemonic(phrase: &str) -> bool {
    parse_mnemonic(phrase).is_ok()
}

pub fn mnemonic_to_seed(phrase: &str, passphrase: &str) -> Result<Zeroizing<[u8; 64]>, WalletError> {
    let mnemonic = parse_mnemonic(phrase)?;
    Ok(Zeroizing::new(mnemonic.to_seed(passphrase)))
}

/// Reject phrases that are published test vectors or where a quarter or
/// more of the words are repeats.
///
/// This is a narrow blacklist, not an entropy estimator.
pub fn check_seed_entropy(phrase: &str) -> Result<(), WalletError> {
    let normalized = normalize(phrase);

    if KNOWN_TEST_PHRASES.contains(&normalized.as_str()) {
        log::warn!("Rejected seed phrase matching a published test vector");
        return Err(ValidationError::LowEntropySeed.into());
    }

    let words: Vec<&str> = normalized.split(' ').collect();
    let unique: HashSet<&str> = words.iter().copied().collect();
    let repeated = words.len() - unique.len();

    if repeated * 4 >= words.len() {
        log::warn!("Rejected seed phrase with {} repeated words", repeated);
        return Err(ValidationError::LowEntropySeed.into());
    }

    Ok(())
}

fn normalize(phrase: &str) -> Zeroizing<String> {
    Zeroizing::new(
        phrase
            .split_whitespace()
            .map(str::to_lowercase)
            .collect::<Vec<_>>()
            .join(" "),
    )
}
