//! Symmetric authenticated encryption, password-based key derivation and
//! randomness.
//!
//! - PBKDF2-HMAC-SHA256 for password-derived keys
//! - AES-256-GCM with a detached tag for every ciphertext
//! - OS-backed CSPRNG for salts, nonces and mnemonic entropy
//!
//! Decryption fails closed: any malformed field or tag mismatch collapses
//! into [`WalletError::Crypto`], and no partially decrypted buffer escapes.

use aes_gcm::aead::generic_array::GenericArray;
use aes_gcm::aead::{AeadInPlace, KeyInit};
use aes_gcm::{Aes256Gcm, Nonce};
use rand::rngs::OsRng;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use zeroize::Zeroizing;

use crate::error::{StructuralError, WalletError};

pub const MIN_KDF_ITERATIONS: u32 = 100_000;
pub const KEY_LEN: usize = 32;
pub const SALT_LEN: usize = 32;
pub const IV_LEN: usize = 12;
pub const TAG_LEN: usize = 16;

/// A 256-bit symmetric key that is overwritten when dropped.
pub type SecretKeyBytes = Zeroizing<[u8; KEY_LEN]>;

/// Derive a 256-bit key from a password with PBKDF2-HMAC-SHA256.
///
/// Expensive at production iteration counts; async callers should run it on a
/// blocking thread.
pub fn derive_key(password: &str, salt: &[u8], iterations: u32) -> Result<SecretKeyBytes, WalletError> {
    if iterations < MIN_KDF_ITERATIONS || salt.len() < 16 {
        return Err(StructuralError::InvalidCipherParams.into());
    }

    let mut key = Zeroizing::new([0u8; KEY_LEN]);
    pbkdf2::pbkdf2_hmac::<Sha256>(password.as_bytes(), salt, iterations, &mut key[..]);
    Ok(key)
}

/// Fill `n` bytes from the operating system CSPRNG.
pub fn random_bytes(n: usize) -> Vec<u8> {
    let mut bytes = vec![0u8; n];
    OsRng.fill_bytes(&mut bytes);
    bytes
}

pub fn random_array<const N: usize>() -> [u8; N] {
    let mut bytes = [0u8; N];
    OsRng.fill_bytes(&mut bytes);
    bytes
}

/// Compare two keys without short-circuiting on the first differing byte.
pub fn keys_match(a: &[u8; KEY_LEN], b: &[u8; KEY_LEN]) -> bool {
    a.iter().zip(b.iter()).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

/// AES-256-GCM output with the tag kept separate from the ciphertext.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Sealed {
    pub ciphertext: Vec<u8>,
    pub iv: [u8; IV_LEN],
    pub tag: [u8; TAG_LEN],
}

impl Sealed {
    /// Hex encodings for persistence: (ciphertext‖tag, iv)
    pub fn to_stored(&self) -> (String, String) {
        let mut data = Vec::with_capacity(self.ciphertext.len() + TAG_LEN);
        data.extend_from_slice(&self.ciphertext);
        data.extend_from_slice(&self.tag);
        (hex::encode(data), hex::encode(self.iv))
    }

    /// Parse the persisted hex form. Malformed input is reported exactly like
    /// a failed tag check.
    pub fn from_stored(data_hex: &str, iv_hex: &str) -> Result<Self, WalletError> {
        let data = hex::decode(data_hex).map_err(|_| WalletError::Crypto)?;
        let iv_bytes = hex::decode(iv_hex).map_err(|_| WalletError::Crypto)?;

        if data.len() < TAG_LEN || iv_bytes.len() != IV_LEN {
            return Err(WalletError::Crypto);
        }

        let (ciphertext, tag_bytes) = data.split_at(data.len() - TAG_LEN);
        let mut iv = [0u8; IV_LEN];
        iv.copy_from_slice(&iv_bytes);
        let mut tag = [0u8; TAG_LEN];
        tag.copy_from_slice(tag_bytes);

        Ok(Self {
            ciphertext: ciphertext.to_vec(),
            iv,
            tag,
        })
    }
}

/// Encrypt `plaintext` under `key`. A fresh random IV is drawn unless one is supplied.
pub fn encrypt(
    plaintext: &[u8],
    key: &[u8; KEY_LEN],
    iv: Option<[u8; IV_LEN]>,
) -> Result<Sealed, WalletError> {
    let cipher = Aes256Gcm::new_from_slice(key).map_err(WalletError::internal("cipher init failed"))?;
    let iv = iv.unwrap_or_else(random_array::<IV_LEN>);

    let mut buffer = plaintext.to_vec();
    let tag = cipher
        .encrypt_in_place_detached(Nonce::from_slice(&iv), b"", &mut buffer)
        .map_err(|_| WalletError::Internal("encryption failed"))?;

    let mut tag_bytes = [0u8; TAG_LEN];
    tag_bytes.copy_from_slice(tag.as_slice());

    Ok(Sealed {
        ciphertext: buffer,
        iv,
        tag: tag_bytes,
    })
}

/// Decrypt and authenticate. Returns the plaintext only if the tag verifies.
pub fn decrypt(sealed: &Sealed, key: &[u8; KEY_LEN]) -> Result<Zeroizing<Vec<u8>>, WalletError> {
    let cipher = Aes256Gcm::new_from_slice(key).map_err(|_| WalletError::Crypto)?;

    let mut buffer = Zeroizing::new(sealed.ciphertext.clone());
    cipher
        .decrypt_in_place_detached(
            Nonce::from_slice(&sealed.iv),
            b"",
            buffer.as_mut_slice(),
            GenericArray::from_slice(&sealed.tag),
        )
        .map_err(|_| WalletError::Crypto)?;

    Ok(buffer)
}

/// A standalone ciphertext carrying its own KDF salt, used for imported keys,
/// exported keys and backups.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PasswordSealed {
    pub encrypted_data: String,
    pub salt: String,
    pub iv: String,
    pub iterations: u32,
}

pub fn seal_with_password(
    plaintext: &[u8],
    password: &str,
    iterations: u32,
) -> Result<PasswordSealed, WalletError> {
    let salt = random_array::<SALT_LEN>();
    let key = derive_key(password, &salt, iterations)?;
    let sealed = encrypt(plaintext, &key, None)?;
    let (encrypted_data, iv) = sealed.to_stored();

    Ok(PasswordSealed {
        encrypted_data,
        salt: hex::encode(salt),
        iv,
        iterations,
    })
}

pub fn open_with_password(
    sealed: &PasswordSealed,
    password: &str,
) -> Result<Zeroizing<Vec<u8>>, WalletError> {
    let salt = hex::decode(&sealed.salt).map_err(|_| WalletError::Crypto)?;
    let key = derive_key(password, &salt, sealed.iterations).map_err(|_| WalletError::Crypto)?;
    let parsed = Sealed::from_stored(&sealed.encrypted_data, &sealed.iv)?;
    decrypt(&parsed, &key)
}
