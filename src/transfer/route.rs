//! Route Resolution
//!
//! Maps a (source, destination) pair to an ordered hop list. Resolution is
//! pure: the same inputs and policy always yield the same route.
//!
//! | source | destination | route |
//! |--------|-------------|-------|
//! | P | P | export P->X, import X, export X->P, import P (or one base tx with `direct_base_tx`) |
//! | X | X | base tx |
//! | P/X | other P/X | export, import |
//! | P/X | C | export, EVM atomic import |
//! | C | P/X | EVM atomic export, import |
//! | C or EVM(a) | same | value transfer |
//! | C/EVM(a) | C/EVM(b) with bridge | bridge call |
//! | P/X | EVM(a), and back | no route |

use std::collections::HashMap;

use tracing::debug;

use super::error::TransferError;
use super::types::{BridgeRoute, Endpoint, Hop, HopKind, Route};

/// Signer-dependent knobs that change the shape of a route
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RoutePolicy {
    /// P to P uses one base transaction instead of relaying through X
    pub direct_base_tx: bool,
}

/// Resolves routes; holds the bridge registry for EVM pairs
#[derive(Debug, Clone, Default)]
pub struct RouteResolver {
    bridges: HashMap<(Endpoint, Endpoint), BridgeRoute>,
}

impl RouteResolver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the bridge contracts connecting `source` to `destination`
    pub fn with_bridge(mut self, source: Endpoint, destination: Endpoint, bridge: BridgeRoute) -> Self {
        self.bridges.insert((source, destination), bridge);
        self
    }

    pub fn bridge(&self, source: Endpoint, destination: Endpoint) -> Option<BridgeRoute> {
        self.bridges.get(&(source, destination)).copied()
    }

    pub fn resolve(
        &self,
        source: Endpoint,
        destination: Endpoint,
        policy: RoutePolicy,
    ) -> Result<Route, TransferError> {
        use Endpoint::*;

        let hops = match (source, destination) {
            (PChain, PChain) if policy.direct_base_tx => {
                vec![Hop::new(PChain, PChain, HopKind::UtxoBaseTx)]
            }
            (PChain, PChain) => vec![
                Hop::new(PChain, XChain, HopKind::UtxoExport),
                Hop::new(XChain, XChain, HopKind::UtxoImport { from: PChain }),
                Hop::new(XChain, PChain, HopKind::UtxoExport),
                Hop::new(PChain, PChain, HopKind::UtxoImport { from: XChain }),
            ],
            (XChain, XChain) => vec![Hop::new(XChain, XChain, HopKind::UtxoBaseTx)],
            (s, d) if s.is_utxo() && d.is_utxo() => vec![
                Hop::new(s, d, HopKind::UtxoExport),
                Hop::new(d, d, HopKind::UtxoImport { from: s }),
            ],
            (s, CChain) if s.is_utxo() => vec![
                Hop::new(s, CChain, HopKind::UtxoExport),
                Hop::new(CChain, CChain, HopKind::EvmAtomicImport { from: s }),
            ],
            (CChain, d) if d.is_utxo() => vec![
                Hop::new(CChain, d, HopKind::EvmAtomicExport),
                Hop::new(d, d, HopKind::UtxoImport { from: CChain }),
            ],
            (s, d) if s == d => vec![Hop::new(s, d, HopKind::EvmValueTransfer)],
            (s, d) if s.is_evm() && d.is_evm() => match self.bridge(s, d) {
                Some(bridge) => vec![Hop::new(s, d, HopKind::EvmBridgeCall { bridge })],
                None => {
                    return Err(TransferError::Route(format!(
                        "{} and {} are not connected by a configured bridge",
                        s, d
                    )));
                }
            },
            (s, d) => {
                return Err(TransferError::Route(format!(
                    "no supported route from {} to {}",
                    s, d
                )));
            }
        };

        let route = Route::new(hops)?;
        debug!(
            source = %source,
            destination = %destination,
            hops = route.len(),
            "Route resolved: {}",
            route
        );
        Ok(route)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ids::Id;
    use crate::transfer::types::HopClass;
    use alloy::primitives::Address;

    fn evm(byte: u8) -> Endpoint {
        Endpoint::Evm(Id([byte; 32]))
    }

    fn bridge() -> BridgeRoute {
        BridgeRoute {
            origin: Address::repeat_byte(1),
            destination: Address::repeat_byte(2),
        }
    }

    #[test]
    fn test_p_to_p_relays_through_x() {
        let route = RouteResolver::new()
            .resolve(Endpoint::PChain, Endpoint::PChain, RoutePolicy::default())
            .unwrap();
        assert_eq!(route.len(), 4);
        let classes: Vec<HopClass> = route.hops().iter().map(|h| h.kind.class()).collect();
        assert_eq!(
            classes,
            vec![
                HopClass::Export,
                HopClass::Import,
                HopClass::Export,
                HopClass::Import
            ]
        );
    }

    #[test]
    fn test_p_to_p_direct_policy() {
        let route = RouteResolver::new()
            .resolve(
                Endpoint::PChain,
                Endpoint::PChain,
                RoutePolicy {
                    direct_base_tx: true,
                },
            )
            .unwrap();
        assert_eq!(route.len(), 1);
        assert_eq!(route.hops()[0].kind, HopKind::UtxoBaseTx);
    }

    #[test]
    fn test_cross_chain_pairs() {
        let resolver = RouteResolver::new();
        let policy = RoutePolicy::default();

        let p_to_x = resolver.resolve(Endpoint::PChain, Endpoint::XChain, policy).unwrap();
        assert_eq!(p_to_x.len(), 2);
        assert_eq!(
            p_to_x.hops()[1].kind,
            HopKind::UtxoImport {
                from: Endpoint::PChain
            }
        );

        let c_to_p = resolver.resolve(Endpoint::CChain, Endpoint::PChain, policy).unwrap();
        assert_eq!(c_to_p.hops()[0].kind, HopKind::EvmAtomicExport);

        let x_to_c = resolver.resolve(Endpoint::XChain, Endpoint::CChain, policy).unwrap();
        assert_eq!(
            x_to_c.hops()[1].kind,
            HopKind::EvmAtomicImport {
                from: Endpoint::XChain
            }
        );
    }

    #[test]
    fn test_evm_pairs() {
        let resolver = RouteResolver::new().with_bridge(Endpoint::CChain, evm(7), bridge());
        let policy = RoutePolicy::default();

        let same = resolver.resolve(evm(7), evm(7), policy).unwrap();
        assert_eq!(same.hops()[0].kind, HopKind::EvmValueTransfer);

        let bridged = resolver.resolve(Endpoint::CChain, evm(7), policy).unwrap();
        assert_eq!(
            bridged.hops()[0].kind,
            HopKind::EvmBridgeCall { bridge: bridge() }
        );

        // Bridges are directional
        let back = resolver.resolve(evm(7), Endpoint::CChain, policy).unwrap_err();
        assert_eq!(back.code(), "ROUTE_ERROR");
    }

    #[test]
    fn test_no_route_between_utxo_and_foreign_evm() {
        let resolver = RouteResolver::new();
        let policy = RoutePolicy::default();
        assert!(resolver.resolve(Endpoint::PChain, evm(3), policy).is_err());
        assert!(resolver.resolve(evm(3), Endpoint::XChain, policy).is_err());
    }

    #[test]
    fn test_resolution_is_deterministic() {
        let resolver = RouteResolver::new();
        let a = resolver
            .resolve(Endpoint::CChain, Endpoint::XChain, RoutePolicy::default())
            .unwrap();
        let b = resolver
            .resolve(Endpoint::CChain, Endpoint::XChain, RoutePolicy::default())
            .unwrap();
        assert_eq!(a, b);
    }
}
