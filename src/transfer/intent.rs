//! Transfer Intent
//!
//! The value plan of one run: which slice of the route executes, who owns
//! the result, and how much value each hop must receive and leave behind.

use super::error::TransferError;
use super::types::{Amount, OwnerDescriptor, Route, TransferMode};
use crate::fee::{FeeReserve, FeeSchedule, compute_reserve};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferIntent {
    pub mode: TransferMode,
    /// Hops this run executes; the cursor indexes into it
    pub route: Route,
    pub amount: Amount,
    pub owner: OwnerDescriptor,
    pub fee_reserve: FeeReserve,
    full_route: Route,
    offset: usize,
    hop_fees: Vec<Amount>,
}

impl TransferIntent {
    /// Fix the value plan for `full_route`; fees are not recomputed later
    pub fn new(
        mode: TransferMode,
        full_route: Route,
        amount: Amount,
        owner: OwnerDescriptor,
        schedule: &FeeSchedule,
    ) -> Result<Self, TransferError> {
        if amount == 0 {
            return Err(TransferError::InvalidRequest(
                "amount must be greater than zero".to_string(),
            ));
        }
        let (offset, route) = full_route.split_for(mode)?;
        let hop_fees = schedule.hop_fees(&full_route);
        let fee_reserve = compute_reserve(&full_route, schedule);
        Ok(Self {
            mode,
            route,
            amount,
            owner,
            fee_reserve,
            full_route,
            offset,
            hop_fees,
        })
    }

    pub fn full_route(&self) -> &Route {
        &self.full_route
    }

    /// Static fee of hop `ordinal` of the mode route
    pub fn hop_fee(&self, ordinal: usize) -> Amount {
        self.hop_fees
            .get(self.offset + ordinal)
            .copied()
            .unwrap_or_default()
    }

    /// Value that must exist on the hop's destination once it is accepted
    pub fn value_after(&self, ordinal: usize) -> Amount {
        let downstream: Amount = self
            .hop_fees
            .iter()
            .skip(self.offset + ordinal + 1)
            .sum();
        self.amount + downstream
    }

    /// Value the hop starts from (what an import expects to unlock)
    pub fn value_before(&self, ordinal: usize) -> Amount {
        self.value_after(ordinal) + self.hop_fee(ordinal)
    }

    /// Balance the source needs before the first hop of a send; also
    /// exactly what the send debits
    pub fn required_balance(&self) -> Amount {
        self.amount + self.fee_reserve.total()
    }
}
