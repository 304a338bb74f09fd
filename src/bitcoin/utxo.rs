//! Spendable outputs and coin selection
//!
//! Selection shuffles candidates uniformly at random and accumulates until
//! the target plus fee is covered within the input cap. A deterministic order
//! is a wallet fingerprint, so largest-first is only a logged fallback after
//! [`MAX_RANDOM_ATTEMPTS`] randomized attempts fail.

use bitcoin::transaction::OutPoint;
use bitcoin::Txid;
use rand::rngs::OsRng;
use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

use super::transaction::InputKind;
use crate::error::{ValidationError, WalletError};

pub const MAX_RANDOM_ATTEMPTS: usize = 5;

/// Input cap per transaction, well inside the standard weight limit.
pub const MAX_INPUTS: usize = 500;

const MAX_ADDRESS_LEN: usize = 100;
const MAX_PATH_LEN: usize = 64;

/// Total supply in sats; anything above is malformed.
const MAX_MONEY: u64 = 21_000_000 * 100_000_000;

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Utxo {
    pub txid: String,
    pub vout: u32,
    /// Value in sats
    pub value: u64,
    pub address: String,
    /// Full derivation path of the owning key, or "imported"
    pub derivation_path: String,
}

impl Utxo {
    pub fn validate(&self) -> Result<(), WalletError> {
        let txid_ok = self.txid.len() == 64 && self.txid.bytes().all(|b| b.is_ascii_hexdigit());
        if !txid_ok
            || self.value == 0
            || self.value > MAX_MONEY
            || self.address.is_empty()
            || self.address.len() > MAX_ADDRESS_LEN
            || self.derivation_path.len() > MAX_PATH_LEN
        {
            return Err(ValidationError::InvalidUtxo.into());
        }
        Ok(())
    }

    pub fn outpoint(&self) -> Result<OutPoint, WalletError> {
        let txid = Txid::from_str(&self.txid).map_err(|_| ValidationError::InvalidUtxo)?;
        Ok(OutPoint {
            txid,
            vout: self.vout,
        })
    }
}

/// Virtual sizes the selection loop needs to price a candidate set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CostModel {
    /// Per-input vsize
    pub input_vsize: u64,
    /// Overhead plus every recipient output
    pub fixed_vsize: u64,
    /// Cost of adding a change output
    pub change_vsize: u64,
    pub dust_threshold: u64,
    pub max_inputs: usize,
}

impl CostModel {
    pub fn new(input: InputKind, fixed_vsize: u64, change_vsize: u64, dust_threshold: u64) -> Self {
        Self {
            input_vsize: input.vsize(),
            fixed_vsize,
            change_vsize,
            dust_threshold,
            max_inputs: MAX_INPUTS,
        }
    }

    pub fn with_max_inputs(mut self, max_inputs: usize) -> Self {
        self.max_inputs = max_inputs;
        self
    }

    fn fee(&self, inputs: usize, with_change: bool, fee_rate: u64) -> u64 {
        let mut vsize = self.fixed_vsize + self.input_vsize * inputs as u64;
        if with_change {
            vsize += self.change_vsize;
        }
        vsize * fee_rate
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Selection {
    pub selected: Vec<Utxo>,
    pub fee: u64,
    /// Zero when the remainder was folded into the fee
    pub change: u64,
}

impl Selection {
    pub fn total_in(&self) -> u64 {
        self.selected.iter().map(|utxo| utxo.value).sum()
    }
}

/// Pick inputs covering `target` sats at `fee_rate` sat/vB.
pub fn select_utxos(
    available: &[Utxo],
    target: u64,
    fee_rate: u64,
    model: &CostModel,
) -> Result<Selection, WalletError> {
    if target == 0 {
        return Err(ValidationError::InvalidAmount.into());
    }

    let input_cost = model.input_vsize * fee_rate;
    let mut candidates: Vec<&Utxo> = available.iter().filter(|utxo| utxo.value > input_cost).collect();
    if candidates.len() < available.len() {
        log::debug!(
            "Skipping {} uneconomical UTXOs at {} sat/vB",
            available.len() - candidates.len(),
            fee_rate
        );
    }

    for attempt in 1..=MAX_RANDOM_ATTEMPTS {
        candidates.shuffle(&mut OsRng);
        if let Some(selection) = accumulate(&candidates, target, fee_rate, model) {
            log::debug!("Randomized selection succeeded on attempt {}", attempt);
            return Ok(selection);
        }
    }

    candidates.sort_by(|a, b| b.value.cmp(&a.value));
    if let Some(selection) = accumulate(&candidates, target, fee_rate, model) {
        log::warn!(
            "Randomized coin selection failed after {} attempts; fell back to largest-first",
            MAX_RANDOM_ATTEMPTS
        );
        return Ok(selection);
    }

    Err(WalletError::InsufficientFunds {
        needed: target.saturating_add(model.fee(1, false, fee_rate)),
        available: available.iter().map(|utxo| utxo.value).sum(),
    })
}

fn accumulate(order: &[&Utxo], target: u64, fee_rate: u64, model: &CostModel) -> Option<Selection> {
    let mut selected = Vec::new();
    let mut total = 0u64;

    for utxo in order {
        selected.push((*utxo).clone());
        total = total.saturating_add(utxo.value);

        let fee_without_change = model.fee(selected.len(), false, fee_rate);
        if total < target.saturating_add(fee_without_change) {
            if selected.len() >= model.max_inputs {
                return None;
            }
            continue;
        }

        let fee_with_change = model.fee(selected.len(), true, fee_rate);
        let change = total
            .checked_sub(target)
            .and_then(|rest| rest.checked_sub(fee_with_change))
            .unwrap_or(0);

        return Some(if change >= model.dust_threshold {
            Selection {
                selected,
                fee: fee_with_change,
                change,
            }
        } else {
            // remainder below dust goes to the miner
            Selection {
                selected,
                fee: total - target,
                change: 0,
            }
        });
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn utxo(n: u8, value: u64) -> Utxo {
        Utxo {
            txid: format!("{:02x}", n).repeat(32),
            vout: 0,
            value,
            address: "tb1qtest".to_string(),
            derivation_path: format!("m/84'/1'/0'/0/{}", n),
        }
    }

    fn model() -> CostModel {
        CostModel::new(InputKind::P2wpkh, 10 + 31, 31, 546)
    }

    #[test]
    fn test_fee_and_change() {
        let utxos = vec![utxo(1, 100_000)];
        let selection = select_utxos(&utxos, 50_000, 2, &model()).unwrap();
        assert_eq!(selection.fee, (41 + 68 + 31) * 2);
        assert_eq!(selection.change, 100_000 - 50_000 - selection.fee);
        assert_eq!(selection.total_in(), 100_000);
    }

    #[test]
    fn test_dust_change_folded_into_fee() {
        let utxos = vec![utxo(1, 50_500)];
        let selection = select_utxos(&utxos, 50_000, 1, &model()).unwrap();
        assert_eq!(selection.change, 0);
        assert_eq!(selection.fee, 500);
    }

    #[test]
    fn test_dust_boundary() {
        // one input: 140 vB with change at 1 sat/vB
        let at_dust = select_utxos(&[utxo(1, 50_000 + 140 + 546)], 50_000, 1, &model()).unwrap();
        assert_eq!(at_dust.change, 546);
        assert_eq!(at_dust.fee, 140);

        let below_dust = select_utxos(&[utxo(1, 50_000 + 140 + 545)], 50_000, 1, &model()).unwrap();
        assert_eq!(below_dust.change, 0);
        assert_eq!(below_dust.fee, 140 + 545);
        assert_eq!(below_dust.total_in(), 50_000 + below_dust.fee);
    }

    #[test]
    fn test_largest_first_fallback_within_input_cap() {
        // Only the two large coins fit under a two-input cap; a shuffled
        // order almost never leads with both
        let mut utxos: Vec<Utxo> = (0..200).map(|n| utxo(n, 1_000)).collect();
        utxos.push(utxo(250, 60_000));
        utxos.push(utxo(251, 60_000));
        let capped = model().with_max_inputs(2);

        for _ in 0..10 {
            let selection = select_utxos(&utxos, 100_000, 1, &capped).unwrap();
            let mut values: Vec<u64> = selection.selected.iter().map(|u| u.value).collect();
            values.sort();
            assert_eq!(values, vec![60_000, 60_000]);
        }

        let err = select_utxos(&utxos, 130_000, 1, &capped).unwrap_err();
        assert!(matches!(err, WalletError::InsufficientFunds { .. }));
    }

    #[test]
    fn test_insufficient_funds() {
        let utxos = vec![utxo(1, 10_000), utxo(2, 10_000)];
        let err = select_utxos(&utxos, 50_000, 1, &model()).unwrap_err();
        assert!(matches!(
            err,
            WalletError::InsufficientFunds { available: 20_000, .. }
        ));
    }

    #[test]
    fn test_uneconomical_inputs_skipped() {
        // 68 vB at 10 sat/vB costs 680 sats, more than the 600-sat output is worth
        let utxos = vec![utxo(1, 600), utxo(2, 100_000)];
        for _ in 0..20 {
            let selection = select_utxos(&utxos, 10_000, 10, &model()).unwrap();
            assert_eq!(selection.selected.len(), 1);
            assert_eq!(selection.selected[0].value, 100_000);
        }
    }

    #[test]
    fn test_selection_is_not_deterministic() {
        let utxos: Vec<Utxo> = (0..8).map(|n| utxo(n, 10_000)).collect();
        let mut seen: HashMap<Vec<String>, usize> = HashMap::new();

        for _ in 0..200 {
            let selection = select_utxos(&utxos, 25_000, 1, &model()).unwrap();
            let mut key: Vec<String> = selection.selected.iter().map(|u| u.txid.clone()).collect();
            key.sort();
            *seen.entry(key).or_default() += 1;
        }

        assert!(seen.len() > 10, "only {} distinct selections", seen.len());
    }

    #[test]
    fn test_utxo_validation() {
        assert!(utxo(1, 1_000).validate().is_ok());

        let mut bad = utxo(1, 1_000);
        bad.txid = "xyz".into();
        assert!(bad.validate().is_err());

        let mut bad = utxo(1, 0);
        bad.value = 0;
        assert!(bad.validate().is_err());

        let mut bad = utxo(1, 1_000);
        bad.address = "a".repeat(200);
        assert!(bad.validate().is_err());
    }
}
