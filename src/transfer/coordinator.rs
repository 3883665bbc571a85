//! Step Recovery Controller
//!
//! Drives a transfer intent hop by hop from a resume cursor. Each hop is
//! built, signed, issued and awaited before the cursor advances; a failure
//! stops the run and reports the cursor to restart from.

use tokio::time::{Instant, sleep};
use tracing::{debug, error, info, warn};

use super::adapters::{LedgerAdapter, TxStatus};
use super::builder::{BuiltHop, TransactionBuilder};
use super::cancel::CancelToken;
use super::error::{TransferError, TransferFailure};
use super::intent::TransferIntent;
use super::keys::KeySource;
use super::state::StepState;
use super::submitter::Submitter;
use super::types::{Endpoint, HopReceipt, ResumePoint, StepCursor, TransferOutcome, TxId};
use crate::config::{EngineConfig, NetworkContext};
use crate::fee::{FeeSchedule, GasPolicy};
use crate::logging::POLL_TARGET;

pub struct StepRecoveryController<'a> {
    builder: TransactionBuilder<'a>,
    submitter: Submitter<'a>,
    engine: &'a EngineConfig,
    cancel: &'a CancelToken,
}

impl<'a> StepRecoveryController<'a> {
    pub fn new(
        network: &'a NetworkContext,
        fees: &'a FeeSchedule,
        gas: &'a GasPolicy,
        engine: &'a EngineConfig,
        ledger: &'a dyn LedgerAdapter,
        keys: &'a dyn KeySource,
        cancel: &'a CancelToken,
    ) -> Self {
        Self {
            builder: TransactionBuilder::new(network, fees, gas, engine, ledger, keys),
            submitter: Submitter::new(ledger, keys, engine, cancel),
            engine,
            cancel,
        }
    }

    /// Execute the intent's route from `resume` to completion.
    ///
    /// Returns receipts for the hops accepted in this run only, on success
    /// and on failure alike. Resuming at `route.len()` is a no-op that
    /// reports success.
    pub async fn run(&self, intent: &TransferIntent, resume: ResumePoint) -> Result<TransferOutcome, TransferFailure> {
        let mut receipts = Vec::new();
        match self.drive(intent, resume, &mut receipts).await {
            Ok(cursor) => Ok(TransferOutcome {
                mode: intent.mode,
                route: intent.route.clone(),
                cursor,
                receipts,
            }),
            Err(error) => Err(TransferFailure { error, receipts }),
        }
    }

    async fn drive(
        &self,
        intent: &TransferIntent,
        resume: ResumePoint,
        receipts: &mut Vec<HopReceipt>,
    ) -> Result<StepCursor, TransferError> {
        let len = intent.route.len();
        let mut state = StepState::begin(resume.cursor, len)?;
        let mut cursor = resume.cursor;
        let mut pending = resume.pending_tx;

        info!(
            mode = intent.mode.as_str(),
            route = %intent.route,
            cursor = cursor.get(),
            state = %state,
            "Transfer run started"
        );

        while let StepState::HopExecuting(ordinal) = state {
            if ordinal > resume.cursor.get() {
                self.settle(cursor).await?;
            }

            match self.execute_hop(intent, ordinal, pending.take()).await {
                Ok(receipt) => {
                    state = state.accept()?;
                    info!(
                        cursor = ordinal,
                        hop = %receipt.hop,
                        credited = %receipt.credited,
                        tx = ?receipt.tx_ids,
                        "Hop accepted"
                    );
                    receipts.push(receipt);
                    cursor.advance();
                    state = state.next(len)?;
                }
                Err(e) => {
                    state = state.abort();
                    error!(
                        cursor = ordinal,
                        state = %state,
                        code = e.code(),
                        retryable = e.is_retryable(),
                        landed = receipts.len(),
                        "Hop failed: {}",
                        e
                    );
                    return Err(e);
                }
            }
        }

        debug!(state = %state, hops = receipts.len(), "Transfer run finished");
        Ok(cursor)
    }

    /// Let the previous hop's outputs propagate before spending them
    async fn settle(&self, cursor: StepCursor) -> Result<(), TransferError> {
        tokio::select! {
            _ = self.cancel.cancelled() => Err(TransferError::Cancelled { cursor, tx_id: None }),
            _ = sleep(self.engine.settle_delay()) => Ok(()),
        }
    }

    async fn execute_hop(
        &self,
        intent: &TransferIntent,
        ordinal: usize,
        pending: Option<TxId>,
    ) -> Result<HopReceipt, TransferError> {
        let cursor = StepCursor::new(ordinal);
        let hop = *intent.route.hop(ordinal).ok_or(TransferError::Build {
            cursor,
            reason: format!("no hop {} in route", ordinal),
        })?;

        if let Some(tx_id) = pending
            && self.reconcile_pending(cursor, hop.ledger(), tx_id).await?
        {
            info!(cursor = ordinal, tx_id = %tx_id, "Hop already accepted, skipping");
            return Ok(HopReceipt {
                ordinal,
                hop,
                tx_ids: vec![tx_id],
                credited: intent.value_after(ordinal),
            });
        }

        let built = self.build_when_funded(intent, cursor).await?;
        let last = built.txs.len().saturating_sub(1);
        let mut tx_ids = Vec::with_capacity(built.txs.len());

        for (i, unsigned) in built.txs.into_iter().enumerate() {
            if self.cancel.is_cancelled() {
                return Err(TransferError::Cancelled { cursor, tx_id: None });
            }
            let signed = self.submitter.sign(cursor, unsigned).await?;
            let tx_id = self
                .submitter
                .submit(cursor, &signed)
                .await
                .map_err(|e| if i < last { forget_tx(e) } else { e })?;
            tx_ids.push(tx_id);
        }

        Ok(HopReceipt {
            ordinal,
            hop,
            tx_ids,
            credited: built.credited,
        })
    }

    /// Decide what a resumed hop's unconfirmed transaction means.
    ///
    /// Returns true when it is accepted and the hop can be skipped.
    async fn reconcile_pending(
        &self,
        cursor: StepCursor,
        ledger: Endpoint,
        tx_id: TxId,
    ) -> Result<bool, TransferError> {
        match self.submitter.status(cursor, ledger, &tx_id).await? {
            TxStatus::Accepted => Ok(true),
            TxStatus::Pending => {
                info!(cursor = cursor.get(), tx_id = %tx_id, "Awaiting previously issued transaction");
                self.submitter.await_acceptance(cursor, ledger, tx_id).await?;
                Ok(true)
            }
            TxStatus::Rejected(reason) => {
                warn!(cursor = cursor.get(), tx_id = %tx_id, "Previous attempt rejected ({}), rebuilding", reason);
                Ok(false)
            }
            TxStatus::Unknown => {
                warn!(cursor = cursor.get(), tx_id = %tx_id, "Previous attempt never landed, rebuilding");
                Ok(false)
            }
        }
    }

    /// Build the hop, waiting up to `utxo_wait` for parked funds to appear
    async fn build_when_funded(&self, intent: &TransferIntent, cursor: StepCursor) -> Result<BuiltHop, TransferError> {
        let deadline = Instant::now() + self.engine.utxo_wait();
        loop {
            match self.builder.build(intent, cursor.get()).await {
                Err(TransferError::FundsNotYetAvailable { .. }) if Instant::now() < deadline => {
                    debug!(target: POLL_TARGET, cursor = cursor.get(), "Parked funds not visible yet");
                }
                other => return other,
            }
            tokio::select! {
                _ = self.cancel.cancelled() => {
                    return Err(TransferError::Cancelled { cursor, tx_id: None });
                }
                _ = sleep(self.engine.poll_interval()) => {}
            }
        }
    }
}

/// Drop the tx ID of a non-final transaction in a hop.
///
/// Only the last transaction completes a hop; earlier ones (token approvals)
/// are rebuilt against live state on resume.
fn forget_tx(e: TransferError) -> TransferError {
    match e {
        TransferError::SubmissionTimeout { cursor, .. } => TransferError::SubmissionTimeout { cursor, tx_id: None },
        TransferError::Cancelled { cursor, .. } => TransferError::Cancelled { cursor, tx_id: None },
        other => other,
    }
}
