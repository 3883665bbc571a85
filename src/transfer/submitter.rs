//! Signer / Submitter
//!
//! Signs built transactions with the key source, issues them and waits for
//! acceptance. Timeouts and cancellation leave the cursor where it was; an
//! explicit rejection is final.

use tokio::time::{Instant, sleep};
use tracing::{debug, info, warn};

use super::adapters::{LedgerAdapter, LedgerError, SignedPayload, SignedTx, TxStatus};
use super::builder::UnsignedTx;
use super::cancel::CancelToken;
use super::error::TransferError;
use super::evm;
use super::keys::KeySource;
use super::types::{Endpoint, StepCursor, TxId};
use crate::config::EngineConfig;
use crate::ids::Id;
use crate::logging::POLL_TARGET;

pub struct Submitter<'a> {
    ledger: &'a dyn LedgerAdapter,
    keys: &'a dyn KeySource,
    engine: &'a EngineConfig,
    cancel: &'a CancelToken,
}

impl<'a> Submitter<'a> {
    pub fn new(
        ledger: &'a dyn LedgerAdapter,
        keys: &'a dyn KeySource,
        engine: &'a EngineConfig,
        cancel: &'a CancelToken,
    ) -> Self {
        Self {
            ledger,
            keys,
            engine,
            cancel,
        }
    }

    async fn sign_hash(&self, cursor: StepCursor, hash: &[u8; 32]) -> Result<super::keys::RecoverableSignature, TransferError> {
        tokio::select! {
            _ = self.cancel.cancelled() => Err(TransferError::Cancelled { cursor, tx_id: None }),
            res = self.keys.sign_hash(hash) => res.map_err(|e| TransferError::Signing {
                cursor,
                reason: e.to_string(),
            }),
        }
    }

    /// Sign every credential of `tx`.
    ///
    /// All inputs belong to one key, so an atomic transaction needs a single
    /// signature however many inputs it spends.
    pub async fn sign(&self, cursor: StepCursor, tx: UnsignedTx) -> Result<SignedTx, TransferError> {
        match tx {
            UnsignedTx::Atomic { ledger, tx } => {
                let unsigned = tx.unsigned_bytes();
                let hash = *Id::digest(&unsigned).as_bytes();
                let signature = self.sign_hash(cursor, &hash).await?;
                let credentials = vec![*signature.as_bytes(); tx.signature_count()];
                let bytes = tx.signed_bytes(&credentials);
                Ok(SignedTx {
                    ledger,
                    payload: SignedPayload::Atomic { tx, bytes },
                })
            }
            UnsignedTx::Evm { ledger, tx, .. } => {
                let hash = evm::signing_hash(&tx);
                let signature = self.sign_hash(cursor, &hash.0).await?;
                let (hash, raw) = evm::seal(tx.clone(), &signature);
                Ok(SignedTx {
                    ledger,
                    payload: SignedPayload::Evm {
                        tx,
                        from: self.keys.evm_address(),
                        hash,
                        raw,
                    },
                })
            }
        }
    }

    /// Issue and wait for acceptance
    pub async fn submit(&self, cursor: StepCursor, signed: &SignedTx) -> Result<TxId, TransferError> {
        let expected = signed.id();
        let issued = tokio::select! {
            _ = self.cancel.cancelled() => {
                return Err(TransferError::Cancelled { cursor, tx_id: Some(expected) });
            }
            res = self.ledger.issue(signed) => res,
        };

        let tx_id = match issued {
            Ok(id) => id,
            Err(LedgerError::Rpc { code, message }) => {
                warn!(cursor = cursor.get(), code, "Ledger refused transaction: {}", message);
                return Err(TransferError::SubmissionRejected {
                    cursor,
                    tx_id: Some(expected),
                    reason: message,
                });
            }
            Err(e) => {
                // Fate unknown; the resume path re-checks this ID
                warn!(cursor = cursor.get(), tx_id = %expected, "Issue failed: {}", e);
                return Err(TransferError::SubmissionTimeout {
                    cursor,
                    tx_id: Some(expected),
                });
            }
        };

        info!(
            cursor = cursor.get(),
            ledger = %signed.ledger,
            tx_id = %tx_id,
            "Transaction issued"
        );
        self.await_acceptance(cursor, signed.ledger, tx_id).await?;
        Ok(tx_id)
    }

    /// Poll until accepted, rejected, timed out or cancelled
    pub async fn await_acceptance(
        &self,
        cursor: StepCursor,
        ledger: Endpoint,
        tx_id: TxId,
    ) -> Result<(), TransferError> {
        let deadline = Instant::now() + self.engine.submit_timeout();
        loop {
            match self.ledger.status(ledger, &tx_id).await {
                Ok(TxStatus::Accepted) => {
                    debug!(cursor = cursor.get(), tx_id = %tx_id, "Transaction accepted");
                    return Ok(());
                }
                Ok(TxStatus::Rejected(reason)) => {
                    return Err(TransferError::SubmissionRejected {
                        cursor,
                        tx_id: Some(tx_id),
                        reason,
                    });
                }
                Ok(status) => {
                    debug!(target: POLL_TARGET, cursor = cursor.get(), tx_id = %tx_id, ?status, "Waiting for acceptance");
                }
                Err(e) => {
                    warn!(cursor = cursor.get(), tx_id = %tx_id, "Status poll failed: {}", e);
                }
            }

            if Instant::now() >= deadline {
                return Err(TransferError::SubmissionTimeout {
                    cursor,
                    tx_id: Some(tx_id),
                });
            }

            tokio::select! {
                _ = self.cancel.cancelled() => {
                    return Err(TransferError::Cancelled { cursor, tx_id: Some(tx_id) });
                }
                _ = sleep(self.engine.poll_interval()) => {}
            }
        }
    }

    /// Current ledger view of a previously issued transaction
    pub async fn status(&self, cursor: StepCursor, ledger: Endpoint, tx_id: &TxId) -> Result<TxStatus, TransferError> {
        self.ledger
            .status(ledger, tx_id)
            .await
            .map_err(|e| TransferError::Ledger {
                cursor,
                reason: e.to_string(),
            })
    }
}
