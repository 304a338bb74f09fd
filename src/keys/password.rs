//! Password strength scoring

use serde::Serialize;

use crate::error::{ValidationError, WalletError};

pub const MIN_PASSWORD_LEN: usize = 8;

const COMMON_PASSWORDS: &[&str] = &[
    "password", "password1", "password123", "12345678", "123456789", "1234567890",
    "qwertyuiop", "iloveyou", "sunshine", "football", "baseball", "letmein1",
    "bitcoin123", "satoshi1", "trustno1", "abc12345",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PasswordVerdict {
    /// Accepted, but the caller should warn
    Weak,
    Fair,
    /// Recommended
    Strong,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PasswordStrength {
    /// 0 (weakest) to 5
    pub score: u8,
    pub verdict: PasswordVerdict,
}

/// Score a password by length and character classes.
///
/// Passwords shorter than [`MIN_PASSWORD_LEN`] are rejected outright.
pub fn score_password_strength(password: &str) -> Result<PasswordStrength, WalletError> {
    let length = password.chars().count();
    if length < MIN_PASSWORD_LEN {
        return Err(ValidationError::PasswordTooShort {
            min: MIN_PASSWORD_LEN,
        }
        .into());
    }

    let has_lower = password.chars().any(|c| c.is_lowercase());
    let has_upper = password.chars().any(|c| c.is_uppercase());
    let has_digit = password.chars().any(|c| c.is_ascii_digit());
    let has_symbol = password.chars().any(|c| !c.is_alphanumeric());
    let classes = [has_lower, has_upper, has_digit, has_symbol]
        .iter()
        .filter(|present| **present)
        .count();

    let mut score: u8 = 0;
    if length >= 12 {
        score += 1;
    }
    if length >= 16 {
        score += 1;
    }
    if classes >= 2 {
        score += 1;
    }
    if classes >= 3 {
        score += 1;
    }
    if classes == 4 {
        score += 1;
    }

    let lowered = password.to_lowercase();
    let single_char = password.chars().all(|c| Some(c) == password.chars().next());
    if single_char || COMMON_PASSWORDS.contains(&lowered.as_str()) {
        score = 0;
    }

    let verdict = match score {
        0..=1 => PasswordVerdict::Weak,
        2..=3 => PasswordVerdict::Fair,
        _ => PasswordVerdict::Strong,
    };

    Ok(PasswordStrength { score, verdict })
}
