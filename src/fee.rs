//! Fee Model
//!
//! Fees are charged per hop on the ledger that executes it. Every hop after
//! the first is paid out of the transferred value itself, so the first
//! transaction must lock `amount + carried` where `carried` is the sum of the
//! downstream fees.
//!
//! Static per-transaction fees apply on the UTXO ledgers. C-Chain atomic
//! transactions are checked against a live gas price but always burn their
//! scheduled budget, so every hop costs exactly what the plan says.

use serde::Deserialize;

use crate::transfer::types::{Amount, Endpoint, Hop, HopKind, Route, WEI_PER_NAVAX};

/// Fixed gas charged for every C-Chain atomic transaction
pub const ATOMIC_TX_INTRINSIC_GAS: u64 = 10_000;

/// Gas per signature on a C-Chain atomic transaction
pub const ATOMIC_TX_GAS_PER_SIG: u64 = 1_000;

/// Per-hop fee table, in nAVAX
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct FeeSchedule {
    pub p_chain_tx_fee: u64,
    pub x_chain_tx_fee: u64,
    /// Burned by every C-Chain atomic transaction; the live fee must fit in it
    pub c_chain_atomic_budget: u64,
}

impl Default for FeeSchedule {
    fn default() -> Self {
        Self {
            p_chain_tx_fee: 1_000_000,
            x_chain_tx_fee: 1_000_000,
            c_chain_atomic_budget: 1_000_000,
        }
    }
}

impl FeeSchedule {
    /// Static fee of a UTXO ledger
    pub fn utxo_fee(&self, ledger: Endpoint) -> Amount {
        match ledger {
            Endpoint::XChain => self.x_chain_tx_fee as Amount,
            _ => self.p_chain_tx_fee as Amount,
        }
    }

    /// Fee a hop takes out of the value it moves.
    ///
    /// EVM value transfers and bridge calls pay gas from the sender's
    /// balance, not from the transferred amount.
    pub fn hop_fee(&self, hop: &Hop) -> Amount {
        match hop.kind {
            HopKind::UtxoExport | HopKind::UtxoImport { .. } | HopKind::UtxoBaseTx => {
                self.utxo_fee(hop.ledger())
            }
            HopKind::EvmAtomicExport | HopKind::EvmAtomicImport { .. } => {
                self.c_chain_atomic_budget as Amount
            }
            HopKind::EvmBridgeCall { .. } | HopKind::EvmValueTransfer => 0,
        }
    }

    pub fn hop_fees(&self, route: &Route) -> Vec<Amount> {
        route.hops().iter().map(|h| self.hop_fee(h)).collect()
    }
}

/// Every fee a route burns, fixed before its first transaction.
///
/// The source is debited exactly `amount + total()`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FeeReserve {
    /// Fee of the first transaction, paid beside the locked value
    pub own: Amount,
    /// Fees of every later hop, locked together with the amount
    pub carried: Amount,
}

impl FeeReserve {
    pub fn total(&self) -> Amount {
        self.own + self.carried
    }
}

/// Compute the reserve for a full route.
///
/// The signer kind enters through the route: a signer that cannot sign a
/// P-Chain base transaction resolves P to P as the four-hop relay and pays
/// for every hop of it.
///
/// ```
/// use hop_transfer::fee::{FeeSchedule, compute_reserve};
/// use hop_transfer::transfer::{RoutePolicy, RouteResolver};
/// use hop_transfer::transfer::types::Endpoint;
///
/// let schedule = FeeSchedule { p_chain_tx_fee: 1, x_chain_tx_fee: 1, c_chain_atomic_budget: 1 };
/// let route = RouteResolver::new()
///     .resolve(Endpoint::PChain, Endpoint::XChain, RoutePolicy::default())
///     .unwrap();
/// assert_eq!(compute_reserve(&route, &schedule).total(), 2);
/// ```
pub fn compute_reserve(route: &Route, schedule: &FeeSchedule) -> FeeReserve {
    let fees = schedule.hop_fees(route);
    FeeReserve {
        own: fees.first().copied().unwrap_or_default(),
        carried: fees.iter().skip(1).sum(),
    }
}

/// EIP-1559 pricing knobs for EVM transactions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct GasPolicy {
    /// Base fee safety factor in percent (150 = 1.5x)
    pub base_fee_multiplier_pct: u64,
    /// Floor for the priority fee, in wei
    pub min_priority_fee_wei: u64,
}

impl Default for GasPolicy {
    fn default() -> Self {
        Self {
            base_fee_multiplier_pct: 150,
            min_priority_fee_wei: 1_000_000_000,
        }
    }
}

impl GasPolicy {
    pub fn priority_fee(&self, suggested: u128) -> u128 {
        suggested.max(self.min_priority_fee_wei as u128)
    }

    /// `max_fee_per_gas = base_fee * multiplier + priority`
    pub fn max_fee_per_gas(&self, base_fee: u128, priority: u128) -> u128 {
        base_fee.saturating_mul(self.base_fee_multiplier_pct as u128) / 100 + priority
    }
}

/// Gas consumed by a C-Chain atomic transaction of `tx_bytes` signed bytes
pub fn atomic_gas(tx_bytes: usize, signatures: usize) -> u64 {
    ATOMIC_TX_INTRINSIC_GAS + tx_bytes as u64 + ATOMIC_TX_GAS_PER_SIG * signatures as u64
}

/// Convert gas at `gas_price` wei into nAVAX, rounding up
pub fn atomic_fee(gas: u64, gas_price: u128) -> Amount {
    (gas as u128 * gas_price).div_ceil(WEI_PER_NAVAX)
}
