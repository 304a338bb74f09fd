use bitcoin::blockdata::script::{Script, ScriptBuf};
use bitcoin::blockdata::transaction::{Transaction, TxIn, TxOut};
use bitcoin::blockdata::witness::Witness;
use bitcoin::transaction::Sequence;
use bitcoin::{absolute, Amount};
use rand::rngs::OsRng;
use rand::Rng;

use super::utxo::Utxo;
use crate::error::WalletError;
use crate::keys::AddressType;
use crate::storage::MultisigScript;

/// Version, locktime, counts and the segwit marker, rounded up.
pub const TX_OVERHEAD_VSIZE: u64 = 11;

/// Spending script shape of an input, for size estimation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputKind {
    P2pkh,
    /// P2PKH with a 65-byte uncompressed key
    P2pkhUncompressed,
    P2shP2wpkh,
    P2wpkh,
    Multisig {
        script: MultisigScript,
        threshold: u8,
        cosigners: usize,
    },
}

impl InputKind {
    pub fn for_address_type(address_type: AddressType, compressed: bool) -> Self {
        match address_type {
            AddressType::Legacy if !compressed => InputKind::P2pkhUncompressed,
            AddressType::Legacy => InputKind::P2pkh,
            AddressType::SegWit => InputKind::P2shP2wpkh,
            AddressType::NativeSegWit => InputKind::P2wpkh,
        }
    }

    /// Worst-case virtual size of one signed input.
    pub fn vsize(&self) -> u64 {
        match self {
            InputKind::P2pkh => 148,
            InputKind::P2pkhUncompressed => 180,
            InputKind::P2shP2wpkh => 91,
            InputKind::P2wpkh => 68,
            InputKind::Multisig {
                script,
                threshold,
                cosigners,
            } => crate::wallet::multisig::input_vsize(*script, *threshold, *cosigners),
        }
    }
}

/// Serialized size of an output paying to `script_pubkey`.
pub fn output_vsize(script_pubkey: &Script) -> u64 {
    // value (8) + script length prefix (1) + script
    9 + script_pubkey.len() as u64
}

pub struct TransactionBuilder;

impl TransactionBuilder {
    /// Estimate transaction size in virtual bytes
    pub fn estimate_vsize(input: InputKind, num_inputs: usize, output_scripts: &[&Script]) -> u64 {
        TX_OVERHEAD_VSIZE
            + input.vsize() * num_inputs as u64
            + output_scripts.iter().map(|script| output_vsize(script)).sum::<u64>()
    }

    /// Assemble an unsigned version-2 transaction.
    ///
    /// Recipients keep their order; a change output, if any, is inserted at a
    /// random position so it cannot be picked out by index.
    pub fn build_unsigned(
        inputs: &[Utxo],
        recipients: &[(ScriptBuf, u64)],
        change: Option<(ScriptBuf, u64)>,
    ) -> Result<Transaction, WalletError> {
        let mut tx = Transaction {
            version: bitcoin::transaction::Version::TWO,
            lock_time: absolute::LockTime::ZERO,
            input: Vec::with_capacity(inputs.len()),
            output: Vec::with_capacity(recipients.len() + 1),
        };

        for utxo in inputs {
            tx.input.push(TxIn {
                previous_output: utxo.outpoint()?,
                script_sig: ScriptBuf::new(),
                // opt into replace-by-fee
                sequence: Sequence::ENABLE_RBF_NO_LOCKTIME,
                witness: Witness::new(),
            });
        }

        for (script_pubkey, amount) in recipients {
            tx.output.push(TxOut {
                value: Amount::from_sat(*amount),
                script_pubkey: script_pubkey.clone(),
            });
        }

        if let Some((script_pubkey, amount)) = change {
            let position = OsRng.gen_range(0..=tx.output.len());
            tx.output.insert(
                position,
                TxOut {
                    value: Amount::from_sat(amount),
                    script_pubkey,
                },
            );
        }

        Ok(tx)
    }
}
