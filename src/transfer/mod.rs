//! Multi-hop Transfer Engine
//!
//! Moves native value between the P, X and C chains and bridged EVM chains,
//! one ledger transaction (hop) at a time.
//!
//! # Architecture
//!
//! - [`route`] resolves a (source, destination) pair into an ordered hop list
//! - [`crate::fee`] prices the route and fixes the reserve the sender locks
//! - [`builder`] turns one hop into unsigned transactions from live ledger state
//! - [`submitter`] signs through a [`keys::KeySource`], issues and awaits acceptance
//! - [`coordinator`] sequences hops from an external resume cursor
//! - [`facade`] validates a request and runs it in send or receive mode
//!
//! # Step Machine
//!
//! ```text
//! START → HOP_EXECUTING(r) → HOP_ACCEPTED(r) → HOP_EXECUTING(r+1) → ... → DONE
//!              ↓
//!         ABORTED(r)
//! ```
//!
//! # Safety Invariants
//!
//! 1. **Forward only**: the cursor advances after acceptance and never moves back
//! 2. **No replays**: hops before the resume cursor are never rebuilt or resubmitted
//! 3. **Fixed plan**: the fee reserve is computed once per invocation
//! 4. **Explicit retry**: the engine never retries on its own; failures carry the cursor

pub mod adapters;
pub mod builder;
pub mod cancel;
pub mod codec;
pub mod coordinator;
pub mod error;
pub mod evm;
pub mod facade;
pub mod intent;
pub mod keys;
pub mod route;
pub mod state;
pub mod submitter;
pub mod types;


// Re-exports for convenience
pub use adapters::{LedgerAdapter, RpcLedger};
pub use cancel::{CancelHandle, CancelToken, cancel_pair};
pub use coordinator::StepRecoveryController;
pub use error::{TransferError, TransferFailure};
pub use facade::{TransferFacade, TransferRequest};
pub use intent::TransferIntent;
pub use keys::{HardwareDevice, HardwareIndexed, KeySource, LocalSecret};
pub use route::{RoutePolicy, RouteResolver};
pub use state::StepState;
pub use types::{Endpoint, OwnerDescriptor, ResumePoint, Route, StepCursor, TransferMode, TransferOutcome, TxId};
