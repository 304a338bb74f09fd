//! Key generation, encoding and derivation against published vectors
//!
//! Run with: cargo test --test keys_test -- --nocapture

mod common;

use std::collections::HashSet;

use bitcoin::Network;
use common::{init_logging, TestEnvironment, ABANDON_MNEMONIC, PASSWORD};
use wallet_core::keys::{decode_wif, encode_wif, generate_mnemonic, mnemonic::VALID_STRENGTHS};
use wallet_core::{AddressType, ValidationError, WalletError};

const SAMPLES_PER_STRENGTH: usize = 1_000;

/// Pearson chi-square over the 256 byte values, df = 255. The 0.9999
/// quantile is about 345.
const CHI_SQUARE_LIMIT: f64 = 350.0;

#[test]
fn test_mnemonic_entropy_is_uniform_and_unique() -> anyhow::Result<()> {
    init_logging();

    for strength in VALID_STRENGTHS {
        let mut counts = [0u64; 256];
        let mut seen = HashSet::new();

        for _ in 0..SAMPLES_PER_STRENGTH {
            let phrase = generate_mnemonic(strength)?;
            let entropy = bip39::Mnemonic::parse(phrase.as_str())?.to_entropy();
            assert_eq!(entropy.len() * 8, strength);
            for byte in &entropy {
                counts[*byte as usize] += 1;
            }
            assert!(seen.insert(entropy), "duplicate mnemonic at {} bits", strength);
        }

        let total: u64 = counts.iter().sum();
        let expected = total as f64 / 256.0;
        let chi_square: f64 = counts
            .iter()
            .map(|&observed| {
                let diff = observed as f64 - expected;
                diff * diff / expected
            })
            .sum();

        log::info!("📊 {} bits: chi-square {:.1} over {} bytes", strength, chi_square, total);
        assert!(chi_square < CHI_SQUARE_LIMIT, "chi-square {} at {} bits", chi_square, strength);
    }

    Ok(())
}

#[test]
fn test_rejects_unsupported_strength() {
    assert!(matches!(
        generate_mnemonic(100),
        Err(WalletError::Validation(ValidationError::UnsupportedStrength))
    ));
}

#[test]
fn test_wif_vectors() -> anyhow::Result<()> {
    init_logging();
    let secret_hex = "0c28fca386c7a227600b2fe50b7cae11ec86d3bf1fbe471be89827e19d72aa1d";

    let uncompressed = decode_wif("5HueCGU8rMjxEXxiPuD5BDku4MkFqeZyd4dZ1jvhTVqvbTLvyTJ", Network::Bitcoin)?;
    assert!(!uncompressed.compressed);
    assert_eq!(hex::encode(uncompressed.private_key.inner.secret_bytes()), secret_hex);

    let compressed = decode_wif("KwdMAjGmerYanjeui5SHS7JkmpZvVipYvB2LJGU1ZxJwYvP98617", Network::Bitcoin)?;
    assert!(compressed.compressed);
    assert_eq!(compressed.private_key.inner, uncompressed.private_key.inner);

    for (decoded, compressed) in [(&uncompressed, false), (&compressed, true)] {
        let encoded = encode_wif(&decoded.private_key.inner, compressed, Network::Bitcoin);
        let again = decode_wif(&encoded, Network::Bitcoin)?;
        assert_eq!(again.private_key.inner, decoded.private_key.inner);
        assert_eq!(again.compressed, compressed);
    }

    Ok(())
}

#[test]
fn test_wif_network_errors_do_not_echo_input() {
    init_logging();
    let wif = "KwdMAjGmerYanjeui5SHS7JkmpZvVipYvB2LJGU1ZxJwYvP98617";

    let err = decode_wif(wif, Network::Testnet).unwrap_err();
    let message = err.to_string();
    assert_eq!(message, "This is a mainnet key; this wallet only accepts testnet keys");
    assert!(!message.contains(wif));

    let err = decode_wif("KwdMAjGmerYanjeui5SHS7JkmpZvVipYvB2LJGU1ZxJwYvP98618", Network::Bitcoin).unwrap_err();
    assert!(matches!(err, WalletError::Validation(ValidationError::InvalidWif)));
}

#[tokio::test]
async fn test_bip84_vectors_through_manager() -> anyhow::Result<()> {
    let env = TestEnvironment::with_network(Network::Bitcoin)?;
    let created = env
        .manager
        .restore_wallet(ABANDON_MNEMONIC, PASSWORD, AddressType::NativeSegWit)
        .await?;

    assert!(created.mnemonic.is_none());
    assert_eq!(created.account.addresses[0].address, "bc1qcr8te4kr609gcawutmrza0j4xv80jy8z306fyu");
    assert_eq!(created.account.addresses[0].derivation_path, "m/84'/0'/0'/0/0");

    let receive = env.manager.generate_next_address(0, false).await?;
    assert_eq!(receive.address, "bc1qnjg0jd8228aq7egyzacy8cys3knf9xvrerkf9g");
    assert_eq!(receive.derivation_path, "m/84'/0'/0'/0/1");

    let change = env.manager.get_change_address(0).await?;
    assert_eq!(change.address, "bc1q8c6fshw2dlwun7ekn9qwf37cu2rn755upcp6el");
    assert_eq!(change.derivation_path, "m/84'/0'/0'/1/0");
    assert!(change.is_change);

    Ok(())
}

#[tokio::test]
async fn test_bip44_and_bip49_vectors() -> anyhow::Result<()> {
    let mainnet = TestEnvironment::with_network(Network::Bitcoin)?;
    let legacy = mainnet
        .manager
        .restore_wallet(ABANDON_MNEMONIC, PASSWORD, AddressType::Legacy)
        .await?;
    assert_eq!(legacy.account.addresses[0].address, "1LqBGSKuX5yYUonjxT5qGfpUsXKYYWeabA");

    let testnet = TestEnvironment::new()?;
    let nested = testnet
        .manager
        .restore_wallet(ABANDON_MNEMONIC, PASSWORD, AddressType::SegWit)
        .await?;
    assert_eq!(nested.account.addresses[0].address, "2Mww8dCYPUpKHofjgcXcBCEGmniw9CoaiD2");
    assert_eq!(nested.account.addresses[0].derivation_path, "m/49'/1'/0'/0/0");

    Ok(())
}
