//! Spending from an account
//!
//! Planning validates recipients and collaborator UTXOs, selects inputs and
//! draws the change address on a draft record. Finishing signs the planned
//! transaction with whatever key resolver the account needs.

use bitcoin::blockdata::script::ScriptBuf;
use bitcoin::blockdata::transaction::Transaction;
use bitcoin::consensus::encode::serialize_hex;
use bitcoin::Network;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

use super::signer::{sign_multisig_psbt, sign_single_sig, KeyResolver};
use super::transaction::{output_vsize, InputKind, TransactionBuilder, TX_OVERHEAD_VSIZE};
use super::utxo::{select_utxos, CostModel, Selection, Utxo};
use crate::config::WalletConfig;
use crate::error::{StateError, ValidationError, WalletError};
use crate::keys::parse_address;
use crate::storage::{Account, AccountKind, WalletRecord};
use crate::wallet::accounts;
use crate::wallet::address_manager::AddressManager;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Recipient {
    pub address: String,
    /// Amount in sats
    pub amount: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangeOutput {
    pub address: String,
    pub value: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignedTx {
    pub txid: String,
    /// Fully signed transaction, ready to broadcast
    pub raw_hex: Option<String>,
    /// Partially signed transaction awaiting cosigners
    pub psbt_hex: Option<String>,
    pub complete: bool,
    pub fee: u64,
    pub fee_rate: u64,
    pub vsize: u64,
    pub change: Option<ChangeOutput>,
    pub inputs: Vec<Utxo>,
}

/// An unsigned transaction and the choices made to build it.
#[derive(Debug, Clone)]
pub struct TxPlan {
    pub account_index: u32,
    pub tx: Transaction,
    pub selection: Selection,
    pub change: Option<ChangeOutput>,
    pub fee_rate: u64,
    pub estimated_vsize: u64,
}

pub fn check_fee_rate(fee_rate: u64, config: &WalletConfig) -> Result<(), WalletError> {
    if fee_rate == 0 || fee_rate > config.max_fee_rate {
        return Err(ValidationError::InvalidFeeRate {
            max: config.max_fee_rate,
        }
        .into());
    }
    Ok(())
}

/// Parse destinations for `network` and check every amount against dust.
pub fn recipient_outputs(
    recipients: &[Recipient],
    network: Network,
    dust_threshold: u64,
) -> Result<Vec<(ScriptBuf, u64)>, WalletError> {
    if recipients.is_empty() {
        return Err(ValidationError::NoOutputs.into());
    }

    recipients
        .iter()
        .map(|recipient| {
            if recipient.amount == 0 {
                return Err(ValidationError::InvalidAmount.into());
            }
            if recipient.amount < dust_threshold {
                return Err(ValidationError::DustOutput {
                    threshold: dust_threshold,
                }
                .into());
            }
            let address = parse_address(&recipient.address, network)?;
            Ok((address.script_pubkey(), recipient.amount))
        })
        .collect()
}

/// Keep the UTXOs that pay to `account`.
///
/// A UTXO on one of the account's addresses must carry that address's
/// recorded derivation path; anything else is treated as tampered data.
/// UTXOs on foreign addresses are dropped, and duplicates are ignored.
pub fn account_utxos(account: &Account, utxos: &[Utxo]) -> Result<Vec<Utxo>, WalletError> {
    let mut seen = HashSet::new();
    let mut owned = Vec::new();

    for utxo in utxos {
        utxo.validate()?;
        let Some(entry) = account.addresses.iter().find(|entry| entry.address == utxo.address) else {
            log::debug!("Ignoring UTXO {}:{} on a foreign address", utxo.txid, utxo.vout);
            continue;
        };
        if entry.derivation_path != utxo.derivation_path {
            log::warn!("UTXO {}:{} reports a path that does not match its address", utxo.txid, utxo.vout);
            return Err(ValidationError::InvalidUtxo.into());
        }
        if seen.insert((utxo.txid.clone(), utxo.vout)) {
            owned.push(utxo.clone());
        }
    }

    Ok(owned)
}

/// How inputs of `account` are spent.
pub fn input_kind(record: &WalletRecord, account: &Account) -> Result<InputKind, WalletError> {
    Ok(match &account.kind {
        AccountKind::Hd { address_type, .. } | AccountKind::ImportedSeed { address_type, .. } => {
            InputKind::for_address_type(*address_type, true)
        }
        AccountKind::ImportedKey { address_type } => {
            let compressed = record
                .imported_keys
                .get(&account.index)
                .and_then(|entry| entry.compressed)
                .unwrap_or(true);
            InputKind::for_address_type(*address_type, compressed)
        }
        AccountKind::Multisig { config, .. } => InputKind::Multisig {
            script: config.script,
            threshold: config.threshold,
            cosigners: config.cosigner_xpubs.len(),
        },
    })
}

/// The address the next change output of `account` would pay to, without
/// advancing any counter.
fn peek_change_script(account: &Account, network: Network) -> Result<ScriptBuf, WalletError> {
    match &account.kind {
        AccountKind::ImportedKey { .. } => {
            let entry = account
                .addresses
                .first()
                .ok_or(WalletError::Internal("imported account has no address"))?;
            Ok(parse_address(&entry.address, network)?.script_pubkey())
        }
        _ => {
            let chains = account.chains().ok_or(StateError::NotDerivable)?;
            let derived = AddressManager::derive_for_account(account, true, chains.internal_index, network)?;
            Ok(derived.address.script_pubkey())
        }
    }
}

/// Select inputs, draw a change address on `draft` and assemble the
/// unsigned transaction.
pub fn plan(
    draft: &mut WalletRecord,
    account_index: u32,
    recipients: &[Recipient],
    fee_rate: u64,
    utxos: &[Utxo],
    config: &WalletConfig,
) -> Result<TxPlan, WalletError> {
    check_fee_rate(fee_rate, config)?;
    let network = draft.settings.network;
    let outputs = recipient_outputs(recipients, network, config.dust_threshold)?;
    let target = outputs
        .iter()
        .try_fold(0u64, |sum, (_, amount)| sum.checked_add(*amount))
        .ok_or(ValidationError::InvalidAmount)?;

    let account = accounts::account(draft, account_index)?;
    let available = account_utxos(account, utxos)?;
    let kind = input_kind(draft, account)?;
    let change_script = peek_change_script(account, network)?;

    let fixed_vsize = TX_OVERHEAD_VSIZE + outputs.iter().map(|(script, _)| output_vsize(script)).sum::<u64>();
    let model = CostModel::new(kind, fixed_vsize, output_vsize(&change_script), config.dust_threshold);
    let selection = select_utxos(&available, target, fee_rate, &model)?;

    let change = if selection.change > 0 {
        let entry = accounts::next_address(draft, account_index, true, config.gap_limit)?;
        Some(ChangeOutput {
            address: entry.address,
            value: selection.change,
        })
    } else {
        None
    };

    let change_output = match &change {
        Some(change) => Some((parse_address(&change.address, network)?.script_pubkey(), change.value)),
        None => None,
    };
    let tx = TransactionBuilder::build_unsigned(&selection.selected, &outputs, change_output)?;

    let mut scripts: Vec<&bitcoin::Script> = outputs.iter().map(|(script, _)| script.as_script()).collect();
    if change.is_some() {
        scripts.push(change_script.as_script());
    }
    let estimated_vsize = TransactionBuilder::estimate_vsize(kind, selection.selected.len(), &scripts);

    log::info!(
        "Planned spend from account {}: {} inputs, fee {} sats at {} sat/vB",
        account_index,
        selection.selected.len(),
        selection.fee,
        fee_rate
    );

    Ok(TxPlan {
        account_index,
        tx,
        selection,
        change,
        fee_rate,
        estimated_vsize,
    })
}

/// Sign a planned single-sig spend into a broadcastable transaction.
pub fn finish_single_sig<R: KeyResolver>(
    plan: TxPlan,
    account: &Account,
    network: Network,
    resolver: &R,
) -> Result<SignedTx, WalletError> {
    let address_type = account.address_type().ok_or(WalletError::Internal("account has no address type"))?;

    let mut tx = plan.tx;
    sign_single_sig(&mut tx, &plan.selection.selected, address_type, network, resolver)?;

    Ok(SignedTx {
        txid: tx.compute_txid().to_string(),
        raw_hex: Some(serialize_hex(&tx)),
        psbt_hex: None,
        complete: true,
        fee: plan.selection.fee,
        fee_rate: plan.fee_rate,
        vsize: tx.vsize() as u64,
        change: plan.change,
        inputs: plan.selection.selected,
    })
}

/// Sign a planned multisig spend with this wallet's key into a PSBT.
pub fn finish_multisig<R: KeyResolver>(
    plan: TxPlan,
    account: &Account,
    network: Network,
    resolver: &R,
) -> Result<SignedTx, WalletError> {
    let AccountKind::Multisig { config, .. } = &account.kind else {
        return Err(WalletError::Internal("not a multisig account"));
    };

    let txid = plan.tx.compute_txid().to_string();
    let psbt = sign_multisig_psbt(plan.tx, &plan.selection.selected, config, network, resolver)?;

    Ok(SignedTx {
        txid,
        raw_hex: None,
        psbt_hex: Some(hex::encode(psbt.serialize())),
        complete: false,
        fee: plan.selection.fee,
        fee_rate: plan.fee_rate,
        vsize: plan.estimated_vsize,
        change: plan.change,
        inputs: plan.selection.selected,
    })
}

/// Flag the addresses a broadcast transaction touched as used.
pub fn mark_spent(draft: &mut WalletRecord, signed: &SignedTx) -> Result<(), WalletError> {
    for input in &signed.inputs {
        accounts::mark_address_used(draft, &input.address)?;
    }
    if let Some(change) = &signed.change {
        accounts::mark_address_used(draft, &change.address)?;
    }
    Ok(())
}
