//! hop-transfer - Multi-hop AVAX transfer engine
//!
//! Moves AVAX between the P-Chain, X-Chain, C-Chain and bridged EVM chains,
//! one ledger transaction at a time, resumable from any hop.
//!
//! # Modules
//!
//! - [`ids`] - CB58 identifiers and bech32 short IDs
//! - [`money`] - Decimal string conversion for operator-facing amounts
//! - [`fee`] - Fee schedule, reserve computation and EIP-1559 gas policy
//! - [`config`] - YAML configuration per environment
//! - [`logging`] - tracing subscriber setup
//! - [`transfer`] - Route resolution, building, signing and step recovery

pub mod config;
pub mod fee;
pub mod ids;
pub mod logging;
pub mod money;
pub mod transfer;

pub use config::{AppConfig, NetworkContext};
pub use fee::{FeeReserve, FeeSchedule, GasPolicy};
pub use transfer::{TransferError, TransferFacade, TransferFailure, TransferRequest};
