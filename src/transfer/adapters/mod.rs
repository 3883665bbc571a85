//! Ledger Adapters
//!
//! The engine talks to every ledger through `LedgerAdapter`: balance and
//! UTXO queries, fee inputs, transaction issuance and status polling.

pub mod rpc;

#[cfg(test)]
pub mod mock;

pub use rpc::RpcLedger;

use alloy::consensus::TxEip1559;
use alloy::primitives::{Address, B256, Bytes, U256};
use async_trait::async_trait;
use thiserror::Error;

use super::codec::{AtomicTx, Utxo};
use super::types::{Endpoint, TxId};
use crate::ids::{Id, ShortId};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum LedgerError {
    /// Network or node failure; nothing is known about the request
    #[error("Transport error: {0}")]
    Transport(String),

    /// Node refused the request
    #[error("RPC error {code}: {message}")]
    Rpc { code: i64, message: String },

    #[error("Malformed response: {0}")]
    Decode(String),

    #[error("Unsupported on {endpoint}: {operation}")]
    Unsupported {
        endpoint: Endpoint,
        operation: &'static str,
    },
}

/// Acceptance state of an issued transaction
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TxStatus {
    /// The ledger has no record of the transaction
    Unknown,
    /// Known but not yet final
    Pending,
    Accepted,
    Rejected(String),
}

/// Signed payload ready for issuance
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SignedPayload {
    Atomic { tx: AtomicTx, bytes: Vec<u8> },
    Evm {
        tx: TxEip1559,
        from: Address,
        hash: B256,
        raw: Vec<u8>,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedTx {
    pub ledger: Endpoint,
    pub payload: SignedPayload,
}

impl SignedTx {
    pub fn id(&self) -> TxId {
        match &self.payload {
            SignedPayload::Atomic { bytes, .. } => TxId::Avalanche(Id::digest(bytes)),
            SignedPayload::Evm { hash, .. } => TxId::Evm(*hash),
        }
    }
}

/// Ledger access used by the builder, submitter and recovery controller
#[async_trait]
pub trait LedgerAdapter: Send + Sync {
    /// Adapter name for logging
    fn name(&self) -> &'static str;

    /// Spendable UTXOs on a P/X ledger
    async fn utxos(&self, ledger: Endpoint, owner: &ShortId) -> Result<Vec<Utxo>, LedgerError>;

    /// UTXOs exported from `source` into `ledger`'s atomic memory
    async fn atomic_utxos(
        &self,
        ledger: Endpoint,
        source: Endpoint,
        owner: &ShortId,
    ) -> Result<Vec<Utxo>, LedgerError>;

    async fn evm_chain_id(&self, ledger: Endpoint) -> Result<u64, LedgerError>;

    /// Pending-state nonce
    async fn evm_nonce(&self, ledger: Endpoint, address: Address) -> Result<u64, LedgerError>;

    /// Balance in wei
    async fn evm_balance(&self, ledger: Endpoint, address: Address) -> Result<U256, LedgerError>;

    async fn base_fee(&self, ledger: Endpoint) -> Result<u128, LedgerError>;

    async fn suggested_priority_fee(&self, ledger: Endpoint) -> Result<u128, LedgerError>;

    /// Read-only contract call
    async fn eth_call(&self, ledger: Endpoint, to: Address, data: Bytes) -> Result<Bytes, LedgerError>;

    /// Hand a transaction to the ledger. Returns its ID on acceptance into
    /// the mempool; `Rpc` errors mean the ledger refused it outright.
    async fn issue(&self, tx: &SignedTx) -> Result<TxId, LedgerError>;

    async fn status(&self, ledger: Endpoint, tx_id: &TxId) -> Result<TxStatus, LedgerError>;
}
