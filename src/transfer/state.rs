//! Step Recovery State Machine
//!
//! ```text
//! Start --begin(r)--> HopExecuting(r) --accept--> HopAccepted(r) --next--> HopExecuting(r+1)
//!                           |                                                    ...
//!                         fail                                   HopAccepted(n-1) --next--> Done
//!                           v
//!                      Aborted(r)
//! ```
//!
//! The ordinal only ever moves forward, and only through `HopAccepted`.

use std::fmt;

use super::error::TransferError;
use super::types::StepCursor;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StepState {
    /// Nothing executed in this run yet
    Start,
    /// Hop `i` is being built, signed or awaited
    HopExecuting(usize),
    /// Hop `i` is accepted on-ledger
    HopAccepted(usize),
    /// Every hop of the mode route is accepted
    Done,
    /// Hop `i` failed; the run stopped there
    Aborted(usize),
}

impl StepState {
    #[inline]
    pub fn is_terminal(&self) -> bool {
        matches!(self, StepState::Done | StepState::Aborted(_))
    }

    /// Enter the first hop to run, honoring the resume ordinal.
    ///
    /// `resume == len` means the route is already complete.
    pub fn begin(resume: StepCursor, len: usize) -> Result<Self, TransferError> {
        match resume.get() {
            r if r < len => Ok(StepState::HopExecuting(r)),
            r if r == len => Ok(StepState::Done),
            r => Err(TransferError::InvalidRequest(format!(
                "recovery step {} is past the end of a {}-hop route",
                r, len
            ))),
        }
    }

    pub fn accept(self) -> Result<Self, TransferError> {
        match self {
            StepState::HopExecuting(i) => Ok(StepState::HopAccepted(i)),
            other => Err(invalid_transition(other, "accept")),
        }
    }

    pub fn next(self, len: usize) -> Result<Self, TransferError> {
        match self {
            StepState::HopAccepted(i) if i + 1 < len => Ok(StepState::HopExecuting(i + 1)),
            StepState::HopAccepted(_) => Ok(StepState::Done),
            other => Err(invalid_transition(other, "next")),
        }
    }

    pub fn abort(self) -> Self {
        match self {
            StepState::HopExecuting(i) | StepState::HopAccepted(i) | StepState::Aborted(i) => {
                StepState::Aborted(i)
            }
            other => other,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            StepState::Start => "START",
            StepState::HopExecuting(_) => "HOP_EXECUTING",
            StepState::HopAccepted(_) => "HOP_ACCEPTED",
            StepState::Done => "DONE",
            StepState::Aborted(_) => "ABORTED",
        }
    }
}

fn invalid_transition(from: StepState, event: &str) -> TransferError {
    TransferError::InvalidRequest(format!("invalid step transition: {} on {}", event, from))
}

impl fmt::Display for StepState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StepState::HopExecuting(i) | StepState::HopAccepted(i) | StepState::Aborted(i) => {
                write!(f, "{}({})", self.as_str(), i)
            }
            _ => write!(f, "{}", self.as_str()),
        }
    }
}
