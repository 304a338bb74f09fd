//! Per-input transaction signing
//!
//! Each input's key is resolved, used for one signature and dropped before
//! the next input is touched. [`DerivedKey`] erases its secret on drop.

use bitcoin::blockdata::script::{Builder, PushBytesBuf, ScriptBuf};
use bitcoin::blockdata::transaction::{Transaction, TxOut};
use bitcoin::blockdata::witness::Witness;
use bitcoin::hashes::Hash;
use bitcoin::key::CompressedPublicKey;
use bitcoin::psbt::Psbt;
use bitcoin::secp256k1::{Message, Secp256k1, SecretKey, Signing};
use bitcoin::sighash::{EcdsaSighashType, SighashCache};
use bitcoin::{ecdsa, Address, Amount, Network, PublicKey};
use std::str::FromStr;
use zeroize::Zeroizing;

use super::utxo::Utxo;
use crate::crypto::{self, Sealed, SecretKeyBytes};
use crate::error::{StructuralError, ValidationError, WalletError};
use crate::hd::{derive_path, AccountPath, DerivedKey, HdPath};
use crate::keys::{decode_wif, derive_address, AddressType};
use crate::storage::{MultisigConfig, MultisigScript};
use crate::wallet::address_manager::AddressManager;

/// Resolves the signing key for one input.
pub trait KeyResolver {
    fn key_for(&self, utxo: &Utxo) -> Result<DerivedKey, WalletError>;
}

/// Derives keys from a decrypted seed at each input's path.
pub struct SeedKeys {
    seed: Zeroizing<Vec<u8>>,
    account_path: AccountPath,
    network: Network,
}

impl SeedKeys {
    pub fn new(seed: Zeroizing<Vec<u8>>, account_path: AccountPath, network: Network) -> Self {
        Self {
            seed,
            account_path,
            network,
        }
    }
}

impl KeyResolver for SeedKeys {
    fn key_for(&self, utxo: &Utxo) -> Result<DerivedKey, WalletError> {
        let path = HdPath::from_str(&utxo.derivation_path)?;
        if path.account != self.account_path {
            return Err(ValidationError::InvalidUtxo.into());
        }
        derive_path(&self.seed, &path, self.network)
    }
}

/// Decrypts the stored WIF of an imported key for every input it signs.
pub struct ImportedKeys {
    decryption_key: SecretKeyBytes,
    sealed: Sealed,
    address: String,
    network: Network,
}

impl ImportedKeys {
    pub fn new(decryption_key: SecretKeyBytes, sealed: Sealed, address: String, network: Network) -> Self {
        Self {
            decryption_key,
            sealed,
            address,
            network,
        }
    }
}

impl KeyResolver for ImportedKeys {
    fn key_for(&self, utxo: &Utxo) -> Result<DerivedKey, WalletError> {
        if utxo.address != self.address {
            return Err(ValidationError::InvalidUtxo.into());
        }

        let plaintext = crypto::decrypt(&self.sealed, &self.decryption_key)?;
        let wif = std::str::from_utf8(&plaintext).map_err(|_| WalletError::Crypto)?;
        let decoded = decode_wif(wif, self.network).map_err(|_| StructuralError::Malformed)?;

        let secp = Secp256k1::signing_only();
        Ok(DerivedKey {
            secret: decoded.private_key.inner,
            public: decoded.private_key.public_key(&secp),
        })
    }
}

/// The resolver an account spends with.
pub enum AccountKeys {
    Seed(SeedKeys),
    Imported(ImportedKeys),
}

impl KeyResolver for AccountKeys {
    fn key_for(&self, utxo: &Utxo) -> Result<DerivedKey, WalletError> {
        match self {
            AccountKeys::Seed(keys) => keys.key_for(utxo),
            AccountKeys::Imported(keys) => keys.key_for(utxo),
        }
    }
}

fn sign_digest<C: Signing>(secp: &Secp256k1<C>, digest: [u8; 32], secret: &SecretKey) -> ecdsa::Signature {
    let message = Message::from_digest(digest);
    ecdsa::Signature {
        signature: secp.sign_ecdsa(&message, secret),
        sighash_type: EcdsaSighashType::All,
    }
}

fn push_bytes(bytes: Vec<u8>) -> Result<PushBytesBuf, WalletError> {
    PushBytesBuf::try_from(bytes).map_err(WalletError::internal("push exceeds script limits"))
}

/// Sign every input of a single-sig transaction in place.
///
/// `inputs[i]` must describe `tx.input[i]`. The key resolved for each input
/// is checked against the input's address before it signs anything.
pub fn sign_single_sig<R: KeyResolver>(
    tx: &mut Transaction,
    inputs: &[Utxo],
    address_type: AddressType,
    network: Network,
    resolver: &R,
) -> Result<(), WalletError> {
    if inputs.len() != tx.input.len() {
        return Err(WalletError::Internal("input count mismatch"));
    }

    let secp = Secp256k1::new();
    let mut unlocking: Vec<(ScriptBuf, Witness)> = Vec::with_capacity(inputs.len());

    {
        let mut cache = SighashCache::new(&*tx);

        for (index, utxo) in inputs.iter().enumerate() {
            let key = resolver.key_for(utxo)?;
            let address = derive_address(&key.public, address_type, network)?;
            if address.to_string() != utxo.address {
                return Err(ValidationError::InvalidUtxo.into());
            }
            let script_pubkey = address.script_pubkey();
            let amount = Amount::from_sat(utxo.value);

            let entry = match address_type {
                AddressType::Legacy => {
                    let sighash = cache
                        .legacy_signature_hash(index, &script_pubkey, EcdsaSighashType::All.to_u32())
                        .map_err(WalletError::internal("legacy sighash failed"))?;
                    let signature = sign_digest(&secp, sighash.to_byte_array(), &key.secret);
                    let script_sig = Builder::new()
                        .push_slice(push_bytes(signature.to_vec())?)
                        .push_key(&key.public)
                        .into_script();
                    (script_sig, Witness::new())
                }
                AddressType::SegWit => {
                    let compressed = CompressedPublicKey::try_from(key.public)
                        .map_err(|_| ValidationError::IncompatibleAddressType)?;
                    let redeem_script = ScriptBuf::new_p2wpkh(&compressed.wpubkey_hash());
                    let sighash = cache
                        .p2wpkh_signature_hash(index, &redeem_script, amount, EcdsaSighashType::All)
                        .map_err(WalletError::internal("segwit sighash failed"))?;
                    let signature = sign_digest(&secp, sighash.to_byte_array(), &key.secret);
                    let script_sig = Builder::new()
                        .push_slice(push_bytes(redeem_script.into_bytes())?)
                        .into_script();
                    (script_sig, p2wpkh_witness(&signature, &key.public))
                }
                AddressType::NativeSegWit => {
                    let sighash = cache
                        .p2wpkh_signature_hash(index, &script_pubkey, amount, EcdsaSighashType::All)
                        .map_err(WalletError::internal("segwit sighash failed"))?;
                    let signature = sign_digest(&secp, sighash.to_byte_array(), &key.secret);
                    (ScriptBuf::new(), p2wpkh_witness(&signature, &key.public))
                }
            };

            // key is erased here, before the next input is resolved
            drop(key);
            unlocking.push(entry);
        }
    }

    for (input, (script_sig, witness)) in tx.input.iter_mut().zip(unlocking) {
        input.script_sig = script_sig;
        input.witness = witness;
    }

    Ok(())
}

fn p2wpkh_witness(signature: &ecdsa::Signature, pubkey: &PublicKey) -> Witness {
    let mut witness = Witness::new();
    witness.push(signature.to_vec());
    witness.push(pubkey.to_bytes());
    witness
}

/// Build a PSBT for a multisig spend carrying this wallet's signature on
/// every input. Cosigners add theirs and finalize.
pub fn sign_multisig_psbt<R: KeyResolver>(
    tx: Transaction,
    inputs: &[Utxo],
    config: &MultisigConfig,
    network: Network,
    resolver: &R,
) -> Result<Psbt, WalletError> {
    if inputs.len() != tx.input.len() {
        return Err(WalletError::Internal("input count mismatch"));
    }

    let secp = Secp256k1::new();
    let mut psbt = Psbt::from_unsigned_tx(tx).map_err(WalletError::internal("PSBT construction failed"))?;
    let mut signatures = Vec::with_capacity(inputs.len());

    {
        let mut cache = SighashCache::new(&psbt.unsigned_tx);

        for (index, utxo) in inputs.iter().enumerate() {
            let path = HdPath::from_str(&utxo.derivation_path)?;
            let script = AddressManager::multisig_script(config, &path)?;
            let address = AddressManager::multisig_address(config, &path, network)?;
            if address.to_string() != utxo.address {
                return Err(ValidationError::InvalidUtxo.into());
            }

            let key = resolver.key_for(utxo)?;
            if !AddressManager::multisig_pubkeys(config, &path)?.contains(&key.public) {
                return Err(ValidationError::InvalidUtxo.into());
            }

            let amount = Amount::from_sat(utxo.value);
            let digest = match config.script {
                MultisigScript::P2sh => cache
                    .legacy_signature_hash(index, &script, EcdsaSighashType::All.to_u32())
                    .map_err(WalletError::internal("legacy sighash failed"))?
                    .to_byte_array(),
                MultisigScript::P2shP2wsh | MultisigScript::P2wsh => cache
                    .p2wsh_signature_hash(index, &script, amount, EcdsaSighashType::All)
                    .map_err(WalletError::internal("segwit sighash failed"))?
                    .to_byte_array(),
            };
            let signature = sign_digest(&secp, digest, &key.secret);
            signatures.push((key.public, signature, script, address));
        }
    }

    for ((input, utxo), (pubkey, signature, script, address)) in
        psbt.inputs.iter_mut().zip(inputs).zip(signatures)
    {
        match config.script {
            MultisigScript::P2sh => {
                input.redeem_script = Some(script);
            }
            MultisigScript::P2shP2wsh => {
                input.witness_utxo = Some(witness_utxo(&address, utxo.value));
                input.redeem_script = Some(Address::p2wsh(&script, network).script_pubkey());
                input.witness_script = Some(script);
            }
            MultisigScript::P2wsh => {
                input.witness_utxo = Some(witness_utxo(&address, utxo.value));
                input.witness_script = Some(script);
            }
        }
        input.partial_sigs.insert(pubkey, signature);
    }

    Ok(psbt)
}

fn witness_utxo(address: &Address, value: u64) -> TxOut {
    TxOut {
        value: Amount::from_sat(value),
        script_pubkey: address.script_pubkey(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bitcoin::transaction::TransactionBuilder;
    use crate::keys::{mnemonic_to_seed, parse_address};
    use bitcoin::blockdata::script::Instruction;
    use bitcoin::consensus::encode::serialize_hex;

    const ABANDON: &str = "abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon about";

    fn seed_keys(purpose: u32) -> SeedKeys {
        let seed = mnemonic_to_seed(ABANDON, "").unwrap();
        SeedKeys::new(
            Zeroizing::new(seed.to_vec()),
            AccountPath::new(purpose, Network::Testnet, 0),
            Network::Testnet,
        )
    }

    fn input_for(keys: &SeedKeys, address_type: AddressType, index: u32) -> Utxo {
        let path = keys.account_path.child(0, index);
        let key = derive_path(&keys.seed, &path, Network::Testnet).unwrap();
        let address = derive_address(&key.public, address_type, Network::Testnet).unwrap();
        Utxo {
            txid: format!("{:02x}", index + 1).repeat(32),
            vout: 0,
            value: 50_000,
            address: address.to_string(),
            derivation_path: path.to_string(),
        }
    }

    fn pushes(script: &bitcoin::Script) -> Vec<Vec<u8>> {
        script
            .instructions()
            .map(|instruction| match instruction.unwrap() {
                Instruction::PushBytes(bytes) => bytes.as_bytes().to_vec(),
                Instruction::Op(op) => panic!("unexpected opcode {}", op),
            })
            .collect()
    }

    /// Recompute each input's sighash and check its signature against the
    /// key the unlocking data carries.
    fn assert_signatures_valid(tx: &Transaction, inputs: &[Utxo]) {
        let secp = Secp256k1::verification_only();
        let mut cache = SighashCache::new(tx);

        for (index, (txin, utxo)) in tx.input.iter().zip(inputs).enumerate() {
            let spk = parse_address(&utxo.address, Network::Testnet).unwrap().script_pubkey();
            let amount = Amount::from_sat(utxo.value);

            let (signature, pubkey, digest) = if spk.is_p2pkh() {
                assert!(txin.witness.is_empty());
                let items = pushes(&txin.script_sig);
                assert_eq!(items.len(), 2);
                let pubkey = PublicKey::from_slice(&items[1]).unwrap();
                assert_eq!(ScriptBuf::new_p2pkh(&pubkey.pubkey_hash()), spk);
                let sighash = cache
                    .legacy_signature_hash(index, &spk, EcdsaSighashType::All.to_u32())
                    .unwrap();
                (items[0].clone(), pubkey, sighash.to_byte_array())
            } else {
                assert_eq!(txin.witness.len(), 2);
                let pubkey = PublicKey::from_slice(&txin.witness[1]).unwrap();
                let program = ScriptBuf::new_p2wpkh(&pubkey.wpubkey_hash().unwrap());
                if spk.is_p2sh() {
                    assert_eq!(pushes(&txin.script_sig), vec![program.to_bytes()]);
                    assert_eq!(program.to_p2sh(), spk);
                } else {
                    assert!(txin.script_sig.is_empty());
                    assert_eq!(program, spk);
                }
                let sighash = cache
                    .p2wpkh_signature_hash(index, &program, amount, EcdsaSighashType::All)
                    .unwrap();
                (txin.witness[0].to_vec(), pubkey, sighash.to_byte_array())
            };

            let signature = ecdsa::Signature::from_slice(&signature).unwrap();
            assert_eq!(signature.sighash_type, EcdsaSighashType::All);
            secp.verify_ecdsa(&Message::from_digest(digest), &signature.signature, &pubkey.inner)
                .unwrap();
        }
    }

    #[test]
    fn test_sign_each_address_type() {
        for (purpose, address_type) in [
            (84, AddressType::NativeSegWit),
            (49, AddressType::SegWit),
            (44, AddressType::Legacy),
        ] {
            let keys = seed_keys(purpose);
            let inputs = vec![input_for(&keys, address_type, 0), input_for(&keys, address_type, 1)];
            let recipient = parse_address(&inputs[0].address, Network::Testnet).unwrap().script_pubkey();

            let mut tx = TransactionBuilder::build_unsigned(&inputs, &[(recipient, 90_000)], None).unwrap();
            sign_single_sig(&mut tx, &inputs, address_type, Network::Testnet, &keys).unwrap();

            assert_signatures_valid(&tx, &inputs);
            assert!(!serialize_hex(&tx).is_empty());
        }
    }

    #[test]
    fn test_rejects_input_from_other_account() {
        let keys = seed_keys(84);
        let mut input = input_for(&keys, AddressType::NativeSegWit, 0);
        input.derivation_path = "m/84'/1'/5'/0/0".to_string();

        let recipient = ScriptBuf::from_bytes(vec![1u8; 22]);
        let mut tx = TransactionBuilder::build_unsigned(&[input.clone()], &[(recipient, 1_000)], None).unwrap();
        assert!(matches!(
            sign_single_sig(&mut tx, &[input], AddressType::NativeSegWit, Network::Testnet, &keys),
            Err(WalletError::Validation(ValidationError::InvalidUtxo))
        ));
    }

    #[test]
    fn test_rejects_path_address_mismatch() {
        let keys = seed_keys(84);
        let mut input = input_for(&keys, AddressType::NativeSegWit, 0);
        input.derivation_path = "m/84'/1'/0'/0/7".to_string();

        let recipient = ScriptBuf::from_bytes(vec![1u8; 22]);
        let mut tx = TransactionBuilder::build_unsigned(&[input.clone()], &[(recipient, 1_000)], None).unwrap();
        assert!(sign_single_sig(&mut tx, &[input], AddressType::NativeSegWit, Network::Testnet, &keys).is_err());
    }
}
