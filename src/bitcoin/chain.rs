//! Blockchain-data collaborator contract
//!
//! The wallet core performs no network I/O itself. Hosts implement
//! [`ChainBackend`] over whatever indexer they use (Esplora, mempool.space,
//! a node RPC) and the core treats everything it returns as untrusted in
//! shape.

use serde::{Deserialize, Serialize};
use std::future::Future;

use super::utxo::Utxo;
use crate::error::{ValidationError, WalletError};

/// Upper bound on UTXOs accepted from one snapshot.
pub const MAX_SNAPSHOT_UTXOS: usize = 10_000;

/// Fee rates in sat/vB, shaped like mempool.space's recommended-fees endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeeEstimates {
    pub fastest_fee: u64,
    pub half_hour_fee: u64,
    pub hour_fee: u64,
    pub economy_fee: u64,
    pub minimum_fee: u64,
}

impl Default for FeeEstimates {
    fn default() -> Self {
        Self {
            fastest_fee: 1,
            half_hour_fee: 1,
            hour_fee: 1,
            economy_fee: 1,
            minimum_fee: 1,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChainSnapshot {
    pub utxos: Vec<Utxo>,
    pub fee_estimates: FeeEstimates,
    pub current_height: u32,
}

impl ChainSnapshot {
    /// Length and format checks on collaborator data.
    pub fn validate(&self) -> Result<(), WalletError> {
        if self.utxos.len() > MAX_SNAPSHOT_UTXOS {
            return Err(ValidationError::InvalidUtxo.into());
        }
        for utxo in &self.utxos {
            utxo.validate()?;
        }
        Ok(())
    }
}

pub trait ChainBackend: Send + Sync {
    /// Unspent outputs and fee estimates for `addresses`.
    fn fetch_snapshot(
        &self,
        addresses: &[String],
    ) -> impl Future<Output = Result<ChainSnapshot, WalletError>> + Send;

    /// Broadcast a raw transaction and return its txid.
    fn broadcast(&self, raw_tx_hex: &str) -> impl Future<Output = Result<String, WalletError>> + Send;
}
