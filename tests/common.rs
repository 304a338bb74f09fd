//! Common test utilities for wallet-core integration tests
//!
//! - Test environment setup over a temporary data directory
//! - A scripted chain backend
//! - UTXO and key helpers

#![allow(dead_code)]

use std::str::FromStr;
use std::sync::Mutex;

use bitcoin::blockdata::script::Instruction;
use bitcoin::consensus::deserialize;
use bitcoin::hashes::Hash;
use bitcoin::psbt::Psbt;
use bitcoin::secp256k1::{Message, Secp256k1, SecretKey};
use bitcoin::sighash::{EcdsaSighashType, SighashCache};
use bitcoin::{ecdsa, Address, Amount, Network, PublicKey, Script, ScriptBuf, Transaction};
use tempfile::TempDir;
use wallet_core::crypto::MIN_KDF_ITERATIONS;
use wallet_core::keys::encode_wif;
use wallet_core::{
    AddressRecord, ChainBackend, ChainSnapshot, FeeEstimates, FileStore, Utxo, WalletConfig, WalletError,
    WalletManager,
};

pub const PASSWORD: &str = "correct-Horse-battery-9";
pub const OTHER_PASSWORD: &str = "Tr0ubadour&3-staple";

pub const ABANDON_MNEMONIC: &str =
    "abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon about";

pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Test configuration with the cheapest allowed KDF cost.
pub fn test_config(temp_dir: &TempDir, network: Network) -> WalletConfig {
    WalletConfig {
        network,
        data_dir: temp_dir.path().to_path_buf(),
        kdf_iterations: MIN_KDF_ITERATIONS,
        ..WalletConfig::default()
    }
}

/// Wallet manager over a temporary directory
pub struct TestEnvironment {
    pub temp_dir: TempDir,
    pub manager: WalletManager<FileStore>,
}

impl TestEnvironment {
    pub fn new() -> anyhow::Result<Self> {
        Self::with_network(Network::Testnet)
    }

    pub fn with_network(network: Network) -> anyhow::Result<Self> {
        Self::with_config(|config| config.network = network)
    }

    pub fn with_config(adjust: impl FnOnce(&mut WalletConfig)) -> anyhow::Result<Self> {
        init_logging();
        let temp_dir = TempDir::new()?;
        log::info!("📁 Test directory: {:?}", temp_dir.path());

        let mut config = test_config(&temp_dir, Network::Testnet);
        adjust(&mut config);
        let manager = WalletManager::from_config(config)?;

        Ok(Self { temp_dir, manager })
    }

    /// Drop the manager and open a fresh one over the same directory.
    pub fn reopen(self) -> anyhow::Result<Self> {
        let config = self.manager.config().clone();
        let temp_dir = self.temp_dir;
        drop(self.manager);

        let manager = WalletManager::from_config(config)?;
        Ok(Self { temp_dir, manager })
    }
}

pub fn fake_txid(n: u32) -> String {
    format!("{:064x}", u64::from(n) + 1)
}

pub fn utxo_for(entry: &AddressRecord, n: u32, value: u64) -> Utxo {
    Utxo {
        txid: fake_txid(n),
        vout: n % 4,
        value,
        address: entry.address.clone(),
        derivation_path: entry.derivation_path.clone(),
    }
}

pub fn test_wif(byte: u8, compressed: bool, network: Network) -> String {
    let secret = SecretKey::from_slice(&[byte; 32]).expect("valid secret key");
    encode_wif(&secret, compressed, network).to_string()
}

fn pushes(script: &Script) -> Vec<Vec<u8>> {
    script
        .instructions()
        .map(|instruction| match instruction.expect("valid script") {
            Instruction::PushBytes(bytes) => bytes.as_bytes().to_vec(),
            Instruction::Op(op) => panic!("unexpected opcode {}", op),
        })
        .collect()
}

fn funding_for<'a>(txin: &bitcoin::TxIn, funding: &'a [Utxo]) -> &'a Utxo {
    funding
        .iter()
        .find(|utxo| utxo.txid == txin.previous_output.txid.to_string() && utxo.vout == txin.previous_output.vout)
        .expect("input spends a funding utxo")
}

fn verify(digest: [u8; 32], signature: &[u8], pubkey: &PublicKey) {
    let signature = ecdsa::Signature::from_slice(signature).expect("DER signature");
    assert_eq!(signature.sighash_type, EcdsaSighashType::All);
    Secp256k1::verification_only()
        .verify_ecdsa(&Message::from_digest(digest), &signature.signature, &pubkey.inner)
        .expect("signature verifies");
}

/// Recompute every input's sighash and verify its signature against the
/// public key in the unlocking data, which must also match the spent script.
pub fn assert_signatures_valid(tx: &Transaction, funding: &[Utxo]) {
    let mut cache = SighashCache::new(tx);
    for (index, txin) in tx.input.iter().enumerate() {
        let utxo = funding_for(txin, funding);
        let spk = Address::from_str(&utxo.address).expect("address").assume_checked().script_pubkey();

        if spk.is_p2pkh() {
            assert!(txin.witness.is_empty());
            let items = pushes(&txin.script_sig);
            assert_eq!(items.len(), 2);
            let pubkey = PublicKey::from_slice(&items[1]).expect("pubkey");
            assert_eq!(ScriptBuf::new_p2pkh(&pubkey.pubkey_hash()), spk);
            let sighash = cache
                .legacy_signature_hash(index, &spk, EcdsaSighashType::All.to_u32())
                .expect("sighash");
            verify(sighash.to_byte_array(), &items[0], &pubkey);
        } else {
            assert_eq!(txin.witness.len(), 2);
            let pubkey = PublicKey::from_slice(&txin.witness[1]).expect("pubkey");
            let program = ScriptBuf::new_p2wpkh(&pubkey.wpubkey_hash().expect("compressed key"));
            if spk.is_p2sh() {
                assert_eq!(pushes(&txin.script_sig), vec![program.to_bytes()]);
                assert_eq!(program.to_p2sh(), spk);
            } else {
                assert!(txin.script_sig.is_empty());
                assert_eq!(program, spk);
            }
            let sighash = cache
                .p2wpkh_signature_hash(index, &program, Amount::from_sat(utxo.value), EcdsaSighashType::All)
                .expect("sighash");
            verify(sighash.to_byte_array(), &txin.witness[0], &pubkey);
        }
    }
}

/// Verify every partial signature of a P2WSH multisig PSBT. Returns the
/// number checked.
pub fn assert_partial_sigs_valid(psbt: &Psbt) -> usize {
    let mut cache = SighashCache::new(&psbt.unsigned_tx);
    let mut checked = 0;
    for (index, input) in psbt.inputs.iter().enumerate() {
        let witness_script = input.witness_script.as_ref().expect("witness script");
        let prevout = input.witness_utxo.as_ref().expect("witness utxo");
        assert_eq!(witness_script.to_p2wsh(), prevout.script_pubkey);

        let sighash = cache
            .p2wsh_signature_hash(index, witness_script, prevout.value, EcdsaSighashType::All)
            .expect("sighash");
        for (pubkey, signature) in &input.partial_sigs {
            verify(sighash.to_byte_array(), &signature.to_vec(), pubkey);
            checked += 1;
        }
    }
    checked
}

/// Chain backend serving a fixed snapshot and recording broadcasts.
pub struct MockBackend {
    pub utxos: Mutex<Vec<Utxo>>,
    pub fees: FeeEstimates,
    pub broadcasts: Mutex<Vec<String>>,
}

impl MockBackend {
    pub fn new(utxos: Vec<Utxo>, fees: FeeEstimates) -> Self {
        Self {
            utxos: Mutex::new(utxos),
            fees,
            broadcasts: Mutex::new(Vec::new()),
        }
    }

    pub fn broadcast_count(&self) -> usize {
        self.broadcasts.lock().expect("lock").len()
    }
}

impl ChainBackend for MockBackend {
    async fn fetch_snapshot(&self, addresses: &[String]) -> Result<ChainSnapshot, WalletError> {
        let utxos = self
            .utxos
            .lock()
            .map_err(|_| WalletError::Backend("mock poisoned"))?
            .iter()
            .filter(|utxo| addresses.contains(&utxo.address))
            .cloned()
            .collect();

        Ok(ChainSnapshot {
            utxos,
            fee_estimates: self.fees,
            current_height: 850_000,
        })
    }

    async fn broadcast(&self, raw_tx_hex: &str) -> Result<String, WalletError> {
        let bytes = hex::decode(raw_tx_hex).map_err(|_| WalletError::Backend("bad hex"))?;
        let tx: Transaction = deserialize(&bytes).map_err(|_| WalletError::Backend("bad transaction"))?;
        self.broadcasts
            .lock()
            .map_err(|_| WalletError::Backend("mock poisoned"))?
            .push(raw_tx_hex.to_string());
        Ok(tx.compute_txid().to_string())
    }
}
