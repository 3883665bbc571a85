//! Transfer Facade
//!
//! Entry point for one transfer invocation: validates the request, resolves
//! the route for the signer, fixes the value plan and hands it to the step
//! recovery controller.

use std::sync::Arc;

use alloy::primitives::U256;
use tracing::info;

use super::adapters::{LedgerAdapter, LedgerError};
use super::cancel::CancelToken;
use super::coordinator::StepRecoveryController;
use super::error::{TransferError, TransferFailure};
use super::intent::TransferIntent;
use super::keys::KeySource;
use super::route::{RoutePolicy, RouteResolver};
use super::types::{
    Amount, Endpoint, OwnerDescriptor, ResumePoint, Route, StepCursor, TransferMode, TransferOutcome, WEI_PER_NAVAX,
};
use crate::config::{AppConfig, EngineConfig, NetworkContext};
use crate::fee::{FeeSchedule, GasPolicy};

/// One transfer invocation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferRequest {
    pub mode: TransferMode,
    pub source: Endpoint,
    pub destination: Endpoint,
    /// Smallest unit of the route's decimals
    pub amount: Amount,
    /// Required for sends; receives always credit the signing key
    pub destination_owner: Option<OwnerDescriptor>,
    pub resume: ResumePoint,
}

pub struct TransferFacade {
    network: NetworkContext,
    fees: FeeSchedule,
    gas: GasPolicy,
    engine: EngineConfig,
    resolver: RouteResolver,
    ledger: Arc<dyn LedgerAdapter>,
}

impl TransferFacade {
    /// Build from configuration, registering every configured bridge
    pub fn new(config: &AppConfig, ledger: Arc<dyn LedgerAdapter>) -> Result<Self, TransferError> {
        let mut resolver = RouteResolver::new();
        for bridge in &config.bridges {
            let (source, destination, route) = bridge
                .resolve(&config.network)
                .map_err(|e| TransferError::Config(e.to_string()))?;
            resolver = resolver.with_bridge(source, destination, route);
        }
        Ok(Self::from_parts(
            config.network.clone(),
            config.fees,
            config.gas,
            config.engine.clone(),
            resolver,
            ledger,
        ))
    }

    pub fn from_parts(
        network: NetworkContext,
        fees: FeeSchedule,
        gas: GasPolicy,
        engine: EngineConfig,
        resolver: RouteResolver,
        ledger: Arc<dyn LedgerAdapter>,
    ) -> Self {
        Self {
            network,
            fees,
            gas,
            engine,
            resolver,
            ledger,
        }
    }

    pub fn network(&self) -> &NetworkContext {
        &self.network
    }

    /// Full route between two endpoints for this signer.
    ///
    /// A direct P-Chain base transaction leaves nothing to receive, so the
    /// receive side always resolves the relay.
    pub fn resolve_route(
        &self,
        mode: TransferMode,
        source: Endpoint,
        destination: Endpoint,
        keys: &dyn KeySource,
    ) -> Result<Route, TransferError> {
        let policy = RoutePolicy {
            direct_base_tx: mode == TransferMode::Send && keys.can_sign_base_tx(),
        };
        self.resolver.resolve(
            self.normalize(source),
            self.normalize(destination),
            policy,
        )
    }

    fn normalize(&self, endpoint: Endpoint) -> Endpoint {
        match endpoint {
            Endpoint::Evm(id) => self.network.endpoint_of(id),
            other => other,
        }
    }

    /// Value plan for a request; validates ownership against the route
    pub fn plan(&self, req: &TransferRequest, keys: &dyn KeySource) -> Result<TransferIntent, TransferError> {
        let route = self.resolve_route(req.mode, req.source, req.destination, keys)?;
        let owner = self.owner_for(req, &route, keys)?;
        TransferIntent::new(req.mode, route, req.amount, owner, &self.fees)
    }

    fn owner_for(
        &self,
        req: &TransferRequest,
        route: &Route,
        keys: &dyn KeySource,
    ) -> Result<OwnerDescriptor, TransferError> {
        let mine = OwnerDescriptor::both(keys.short_id(), keys.evm_address());
        let owner = match req.mode {
            TransferMode::Receive => {
                if let Some(given) = req.destination_owner
                    && !owns(&mine, &given)
                {
                    return Err(TransferError::InvalidRequest(
                        "receive credits the signing key; a different destination is not allowed".to_string(),
                    ));
                }
                return Ok(mine);
            }
            TransferMode::Send => req.destination_owner.ok_or_else(|| {
                TransferError::InvalidRequest("send requires a destination address".to_string())
            })?,
        };

        let needs_evm = route.is_direct() && route.source().is_evm();
        if needs_evm && owner.evm.is_none() {
            return Err(TransferError::InvalidRequest(format!(
                "{} -> {} needs an EVM (0x) destination address",
                route.source(),
                route.destination()
            )));
        }
        if !needs_evm && owner.short_id.is_none() {
            return Err(TransferError::InvalidRequest(format!(
                "{} -> {} needs a {}-prefixed destination address",
                route.source(),
                route.destination(),
                self.network.hrp
            )));
        }
        if route.is_direct() && route.source() == route.destination() && owns(&mine, &owner) {
            return Err(TransferError::InvalidRequest(
                "source and destination are the same account".to_string(),
            ));
        }
        Ok(owner)
    }

    /// Run the request to completion or to the first failing hop.
    ///
    /// A failure carries the receipts of the hops this run already landed.
    pub async fn transfer(
        &self,
        req: TransferRequest,
        keys: &dyn KeySource,
        cancel: &CancelToken,
    ) -> Result<TransferOutcome, TransferFailure> {
        let intent = self.plan(&req, keys)?;

        info!(
            mode = req.mode.as_str(),
            signer = keys.name(),
            manual_confirmation = keys.requires_manual_confirmation(),
            route = %intent.route,
            full_route = %intent.full_route(),
            amount = %intent.amount,
            decimals = intent.full_route().decimals(),
            reserve = %intent.fee_reserve.total(),
            resume = req.resume.cursor.get(),
            "Transfer planned"
        );

        if req.mode == TransferMode::Send && req.resume == ResumePoint::default() {
            self.preflight(&intent, keys).await?;
        }

        let controller = StepRecoveryController::new(
            &self.network,
            &self.fees,
            &self.gas,
            &self.engine,
            self.ledger.as_ref(),
            keys,
            cancel,
        );
        controller.run(&intent, req.resume).await
    }

    /// Refuse to start a send the source balance cannot cover.
    ///
    /// Direct EVM sends are priced in wei or token units and are checked by
    /// the builder instead.
    async fn preflight(&self, intent: &TransferIntent, keys: &dyn KeySource) -> Result<(), TransferError> {
        let source = intent.route.source();
        let unavailable = |e: LedgerError| TransferError::Ledger {
            cursor: StepCursor::START,
            reason: e.to_string(),
        };

        let have: Amount = if source.is_utxo() {
            let me = keys.short_id();
            self.ledger
                .utxos(source, &me)
                .await
                .map_err(unavailable)?
                .iter()
                .filter(|u| u.asset_id == self.network.avax_asset_id && u.owners.spendable_by(&me).is_some())
                .map(|u| u.amount as Amount)
                .sum()
        } else if !intent.route.is_direct() {
            let wei = self
                .ledger
                .evm_balance(source, keys.evm_address())
                .await
                .map_err(unavailable)?;
            (wei / U256::from(WEI_PER_NAVAX)).saturating_to::<u128>()
        } else {
            return Ok(());
        };

        let need = intent.required_balance();
        if have < need {
            return Err(TransferError::InsufficientFunds {
                cursor: StepCursor::START,
                have,
                need,
            });
        }
        Ok(())
    }
}

fn owns(mine: &OwnerDescriptor, other: &OwnerDescriptor) -> bool {
    let short = other.short_id.is_some() && other.short_id == mine.short_id;
    let evm = other.evm.is_some() && other.evm == mine.evm;
    short || evm
}
