//! Transfer Error Types
//!
//! Every failure after route resolution carries the cursor of the hop that
//! failed, so the caller can decide whether to resume there.

use thiserror::Error;

use super::types::{Amount, HopReceipt, StepCursor, TxId};

/// Transfer error types
#[derive(Error, Debug, Clone)]
pub enum TransferError {
    // === Request Errors (nothing attempted) ===
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("No route: {0}")]
    Route(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Key error: {0}")]
    Key(String),

    // === Hop Errors ===
    #[error("Hop {cursor}: insufficient funds: have {have}, need {need}")]
    InsufficientFunds {
        cursor: StepCursor,
        have: Amount,
        need: Amount,
    },

    #[error("Hop {cursor}: cannot build transaction: {reason}")]
    Build { cursor: StepCursor, reason: String },

    #[error("Hop {cursor}: signing failed: {reason}")]
    Signing { cursor: StepCursor, reason: String },

    #[error("Hop {cursor}: ledger unavailable: {reason}")]
    Ledger { cursor: StepCursor, reason: String },

    #[error("Hop {cursor}: funds from the previous hop are not yet available")]
    FundsNotYetAvailable { cursor: StepCursor },

    #[error("Hop {cursor}: acceptance not confirmed in time")]
    SubmissionTimeout {
        cursor: StepCursor,
        tx_id: Option<TxId>,
    },

    #[error("Hop {cursor}: transaction rejected: {reason}")]
    SubmissionRejected {
        cursor: StepCursor,
        tx_id: Option<TxId>,
        reason: String,
    },

    #[error("Hop {cursor}: cancelled")]
    Cancelled {
        cursor: StepCursor,
        tx_id: Option<TxId>,
    },
}

impl TransferError {
    /// Get the error code for logs and CLI output
    pub fn code(&self) -> &'static str {
        match self {
            TransferError::InvalidRequest(_) => "INVALID_REQUEST",
            TransferError::Route(_) => "ROUTE_ERROR",
            TransferError::Config(_) => "CONFIG_ERROR",
            TransferError::Key(_) => "KEY_ERROR",
            TransferError::InsufficientFunds { .. } => "INSUFFICIENT_FUNDS",
            TransferError::Build { .. } => "BUILD_ERROR",
            TransferError::Signing { .. } => "SIGNING_ERROR",
            TransferError::Ledger { .. } => "LEDGER_UNAVAILABLE",
            TransferError::FundsNotYetAvailable { .. } => "FUNDS_NOT_YET_AVAILABLE",
            TransferError::SubmissionTimeout { .. } => "SUBMISSION_TIMEOUT",
            TransferError::SubmissionRejected { .. } => "SUBMISSION_REJECTED",
            TransferError::Cancelled { .. } => "CANCELLED",
        }
    }

    /// Cursor of the hop that failed, if a hop was reached
    pub fn cursor(&self) -> Option<StepCursor> {
        match self {
            TransferError::InsufficientFunds { cursor, .. }
            | TransferError::Build { cursor, .. }
            | TransferError::Signing { cursor, .. }
            | TransferError::Ledger { cursor, .. }
            | TransferError::FundsNotYetAvailable { cursor }
            | TransferError::SubmissionTimeout { cursor, .. }
            | TransferError::SubmissionRejected { cursor, .. }
            | TransferError::Cancelled { cursor, .. } => Some(*cursor),
            _ => None,
        }
    }

    /// Transaction whose fate is unknown or known-bad
    pub fn tx_id(&self) -> Option<TxId> {
        match self {
            TransferError::SubmissionTimeout { tx_id, .. }
            | TransferError::SubmissionRejected { tx_id, .. }
            | TransferError::Cancelled { tx_id, .. } => *tx_id,
            _ => None,
        }
    }

    /// Whether resuming at `cursor()` can make progress
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            TransferError::Signing { .. }
                | TransferError::Ledger { .. }
                | TransferError::FundsNotYetAvailable { .. }
                | TransferError::SubmissionTimeout { .. }
                | TransferError::Cancelled { .. }
        )
    }

    /// Fatal failure after earlier hops were already accepted on-ledger
    pub fn requires_manual_reconciliation(&self) -> bool {
        !self.is_retryable() && self.cursor().is_some_and(|c| c.get() > 0)
    }

    /// Operator guidance for the CLI
    pub fn resume_hint(&self) -> Option<String> {
        let cursor = self.cursor()?;
        if self.is_retryable() {
            let pending = self
                .tx_id()
                .map(|tx| format!(" --pending-tx {}", tx))
                .unwrap_or_default();
            Some(format!(
                "restart from this step with --recovery-step {}{}",
                cursor, pending
            ))
        } else if self.requires_manual_reconciliation() {
            Some(format!(
                "hops before step {} are already accepted on-ledger; funds are parked and need manual reconciliation",
                cursor
            ))
        } else {
            None
        }
    }

    /// Process exit code for the CLI
    pub fn exit_code(&self) -> i32 {
        match self {
            TransferError::InvalidRequest(_)
            | TransferError::Route(_)
            | TransferError::Config(_)
            | TransferError::Key(_) => 2,
            TransferError::InsufficientFunds { .. } | TransferError::Build { .. } => 3,
            TransferError::SubmissionRejected { .. } => 4,
            TransferError::Signing { .. }
            | TransferError::Ledger { .. }
            | TransferError::FundsNotYetAvailable { .. }
            | TransferError::SubmissionTimeout { .. }
            | TransferError::Cancelled { .. } => 75,
        }
    }
}

/// A failed run together with the hops it had already landed
#[derive(Error, Debug, Clone)]
#[error("{error}")]
pub struct TransferFailure {
    pub error: TransferError,
    /// Accepted in this run before `error`, in route order
    pub receipts: Vec<HopReceipt>,
}

impl From<TransferError> for TransferFailure {
    fn from(error: TransferError) -> Self {
        Self {
            error,
            receipts: Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    #[test]
    fn test_error_codes() {
        assert_eq!(TransferError::Route("x".into()).code(), "ROUTE_ERROR");
        assert_eq!(
            TransferError::FundsNotYetAvailable {
                cursor: StepCursor::new(1)
            }
            .code(),
            "FUNDS_NOT_YET_AVAILABLE"
        );
    }

    #[test]
    fn test_retry_classification() {
        let timeout = TransferError::SubmissionTimeout {
            cursor: StepCursor::new(2),
            tx_id: None,
        };
        assert!(timeout.is_retryable());
        assert_eq!(timeout.cursor(), Some(StepCursor::new(2)));
        assert_eq!(timeout.exit_code(), 75);

        let rejected = TransferError::SubmissionRejected {
            cursor: StepCursor::new(2),
            tx_id: None,
            reason: "insufficient funds".into(),
        };
        assert!(!rejected.is_retryable());
        assert!(rejected.requires_manual_reconciliation());

        let first_hop = TransferError::Build {
            cursor: StepCursor::START,
            reason: "x".into(),
        };
        assert!(!first_hop.requires_manual_reconciliation());
        assert!(first_hop.resume_hint().is_none());
    }

    #[test]
    fn test_resume_hint_names_step() {
        let err = TransferError::Cancelled {
            cursor: StepCursor::new(1),
            tx_id: None,
        };
        assert_eq!(
            err.resume_hint().unwrap(),
            "restart from this step with --recovery-step 1"
        );
        assert!(TransferError::Route("none".into()).resume_hint().is_none());
    }

    #[test]
    fn test_display() {
        let err = TransferError::InsufficientFunds {
            cursor: StepCursor::START,
            have: 1,
            need: 5,
        };
        assert_eq!(err.to_string(), "Hop 0: insufficient funds: have 1, need 5");
        assert!(err.resume_hint().is_none());
    }

    #[test]
    fn test_short_funds_after_landed_hops_need_reconciliation() {
        let err = TransferError::InsufficientFunds {
            cursor: StepCursor::new(1),
            have: 0,
            need: 5,
        };
        assert_eq!(err.cursor(), Some(StepCursor::new(1)));
        assert!(err.requires_manual_reconciliation());
        assert!(err.resume_hint().unwrap().contains("step 1"));
    }

    #[test]
    fn test_failure_displays_inner_error() {
        let failure = TransferFailure::from(TransferError::FundsNotYetAvailable {
            cursor: StepCursor::new(3),
        });
        assert!(failure.receipts.is_empty());
        assert_eq!(failure.to_string(), failure.error.to_string());
        assert_eq!(failure.error.code(), "FUNDS_NOT_YET_AVAILABLE");
    }
}
