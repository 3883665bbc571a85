//! Transfer Core Types
//!
//! Endpoints, hops, routes and the resume ordinal shared by every stage of
//! the engine.

use std::fmt;
use std::str::FromStr;

use alloy::primitives::{Address, B256};

use super::error::TransferError;
use crate::ids::{Id, ShortId};

/// Smallest-unit amount (nAVAX on atomic routes, wei on EVM routes)
pub type Amount = u128;

/// Decimals of the native asset on the UTXO ledgers and in atomic memory
pub const ATOMIC_DECIMALS: u32 = 9;

/// Decimals of native value on EVM ledgers
pub const EVM_DECIMALS: u32 = 18;

/// One nAVAX expressed in wei
pub const WEI_PER_NAVAX: u128 = 1_000_000_000;

/// A ledger that can hold value
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Endpoint {
    /// Platform chain (UTXO)
    PChain,
    /// Exchange chain (UTXO)
    XChain,
    /// Primary-network EVM chain (account model, atomic import/export)
    CChain,
    /// Any other EVM blockchain, identified by its blockchain ID
    Evm(Id),
}

impl Endpoint {
    pub fn is_utxo(&self) -> bool {
        matches!(self, Endpoint::PChain | Endpoint::XChain)
    }

    pub fn is_evm(&self) -> bool {
        matches!(self, Endpoint::CChain | Endpoint::Evm(_))
    }

    /// Endpoints that share the primary network's atomic memory
    pub fn is_primary(&self) -> bool {
        !matches!(self, Endpoint::Evm(_))
    }

    /// Alias used in RPC paths and address prefixes
    pub fn alias(&self) -> String {
        match self {
            Endpoint::PChain => "P".to_string(),
            Endpoint::XChain => "X".to_string(),
            Endpoint::CChain => "C".to_string(),
            Endpoint::Evm(id) => id.to_cb58(),
        }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Endpoint::PChain => write!(f, "P-Chain"),
            Endpoint::XChain => write!(f, "X-Chain"),
            Endpoint::CChain => write!(f, "C-Chain"),
            Endpoint::Evm(id) => write!(f, "EVM({})", id),
        }
    }
}

impl FromStr for Endpoint {
    type Err = TransferError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "P" | "P-CHAIN" | "PCHAIN" => Ok(Endpoint::PChain),
            "X" | "X-CHAIN" | "XCHAIN" => Ok(Endpoint::XChain),
            "C" | "C-CHAIN" | "CCHAIN" => Ok(Endpoint::CChain),
            _ => s
                .trim()
                .parse::<Id>()
                .map(Endpoint::Evm)
                .map_err(|e| TransferError::InvalidRequest(format!("unknown endpoint '{}': {}", s, e))),
        }
    }
}

/// Bridge contract pair for an EVM to EVM hop
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BridgeRoute {
    /// Token transferrer on the source ledger
    pub origin: Address,
    /// Token transferrer on the destination ledger
    pub destination: Address,
}

/// Ledger transaction a hop executes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HopKind {
    /// Export from a UTXO ledger into the destination's atomic memory
    UtxoExport,
    /// Import into a UTXO ledger from the atomic memory of `from`
    UtxoImport { from: Endpoint },
    /// Export from C-Chain account balance into atomic memory
    EvmAtomicExport,
    /// Import into a C-Chain account from the atomic memory of `from`
    EvmAtomicImport { from: Endpoint },
    /// Contract call on a token bridge
    EvmBridgeCall { bridge: BridgeRoute },
    /// Same-ledger UTXO transfer
    UtxoBaseTx,
    /// Same-ledger EVM value transfer
    EvmValueTransfer,
}

/// Coarse classification of a hop
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HopClass {
    Export,
    Import,
    DirectSend,
}

impl HopKind {
    pub fn class(&self) -> HopClass {
        match self {
            HopKind::UtxoExport | HopKind::EvmAtomicExport => HopClass::Export,
            HopKind::UtxoImport { .. } | HopKind::EvmAtomicImport { .. } => HopClass::Import,
            HopKind::EvmBridgeCall { .. } | HopKind::UtxoBaseTx | HopKind::EvmValueTransfer => {
                HopClass::DirectSend
            }
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            HopKind::UtxoExport => "UTXO_EXPORT",
            HopKind::UtxoImport { .. } => "UTXO_IMPORT",
            HopKind::EvmAtomicExport => "EVM_ATOMIC_EXPORT",
            HopKind::EvmAtomicImport { .. } => "EVM_ATOMIC_IMPORT",
            HopKind::EvmBridgeCall { .. } => "EVM_BRIDGE_CALL",
            HopKind::UtxoBaseTx => "UTXO_BASE_TX",
            HopKind::EvmValueTransfer => "EVM_VALUE_TRANSFER",
        }
    }
}

/// One ledger transaction moving value between endpoints.
///
/// Endpoints follow the value: an export runs `A -> B` on `A`, the matching
/// import runs `B -> B` on `B` and names `A` in its kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Hop {
    pub source: Endpoint,
    pub destination: Endpoint,
    pub kind: HopKind,
}

impl Hop {
    pub fn new(source: Endpoint, destination: Endpoint, kind: HopKind) -> Self {
        Self {
            source,
            destination,
            kind,
        }
    }

    /// Ledger the transaction is issued on
    pub fn ledger(&self) -> Endpoint {
        match self.kind.class() {
            HopClass::Import => self.destination,
            HopClass::Export | HopClass::DirectSend => self.source,
        }
    }
}

impl fmt::Display for Hop {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            HopKind::UtxoImport { from } | HopKind::EvmAtomicImport { from } => {
                write!(f, "{} {} <- {}", self.kind.as_str(), self.destination, from)
            }
            _ => write!(f, "{} {} -> {}", self.kind.as_str(), self.source, self.destination),
        }
    }
}

/// Whether the caller is originating value or relaying it onward
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransferMode {
    Send,
    Receive,
}

impl TransferMode {
    /// Resolve CLI-style flags; exactly one must be set
    pub fn from_flags(send: bool, receive: bool) -> Result<Self, TransferError> {
        match (send, receive) {
            (true, false) => Ok(TransferMode::Send),
            (false, true) => Ok(TransferMode::Receive),
            (true, true) => Err(TransferError::InvalidRequest(
                "send and receive are mutually exclusive".to_string(),
            )),
            (false, false) => Err(TransferError::InvalidRequest(
                "one of send or receive must be selected".to_string(),
            )),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TransferMode::Send => "SEND",
            TransferMode::Receive => "RECEIVE",
        }
    }
}

/// Ordered, chained list of hops.
///
/// Invariants: non-empty, first hop starts at `source`, last hop ends at
/// `destination`, and every hop starts where the previous one ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Route {
    source: Endpoint,
    destination: Endpoint,
    hops: Vec<Hop>,
}

impl Route {
    pub fn new(hops: Vec<Hop>) -> Result<Self, TransferError> {
        let (first, last) = match (hops.first(), hops.last()) {
            (Some(first), Some(last)) => (*first, *last),
            _ => return Err(TransferError::Route("route has no hops".to_string())),
        };
        for pair in hops.windows(2) {
            if pair[0].destination != pair[1].source {
                return Err(TransferError::Route(format!(
                    "hop '{}' does not chain into '{}'",
                    pair[0], pair[1]
                )));
            }
        }
        Ok(Self {
            source: first.source,
            destination: last.destination,
            hops,
        })
    }

    pub fn source(&self) -> Endpoint {
        self.source
    }

    pub fn destination(&self) -> Endpoint {
        self.destination
    }

    pub fn hops(&self) -> &[Hop] {
        &self.hops
    }

    pub fn hop(&self, index: usize) -> Option<&Hop> {
        self.hops.get(index)
    }

    pub fn len(&self) -> usize {
        self.hops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hops.is_empty()
    }

    /// Index of the first export, if the route crosses ledgers
    pub fn first_export(&self) -> Option<usize> {
        self.hops
            .iter()
            .position(|h| h.kind.class() == HopClass::Export)
    }

    /// True when no hop goes through atomic memory
    pub fn is_direct(&self) -> bool {
        self.first_export().is_none()
    }

    /// Decimals the request amount is expressed in
    pub fn decimals(&self) -> u32 {
        if self.is_direct() && self.source.is_evm() {
            EVM_DECIMALS
        } else {
            ATOMIC_DECIMALS
        }
    }

    /// Slice of the route a given mode executes, with its offset in `self`.
    ///
    /// Send runs up to and including the first export; receive runs
    /// everything after it. Direct routes are send-only.
    pub fn split_for(&self, mode: TransferMode) -> Result<(usize, Route), TransferError> {
        match (mode, self.first_export()) {
            (TransferMode::Send, None) => Ok((0, self.clone())),
            (TransferMode::Send, Some(i)) => Ok((0, Route::new(self.hops[..=i].to_vec())?)),
            (TransferMode::Receive, None) => Err(TransferError::InvalidRequest(format!(
                "{} -> {} is a direct transfer; there is nothing to receive",
                self.source, self.destination
            ))),
            (TransferMode::Receive, Some(i)) => {
                let rest = self.hops[i + 1..].to_vec();
                match rest.first() {
                    Some(h) if h.kind.class() == HopClass::Import => Ok((i + 1, Route::new(rest)?)),
                    _ => Err(TransferError::Route(format!(
                        "export at hop {} is not followed by an import",
                        i
                    ))),
                }
            }
        }
    }
}

impl fmt::Display for Route {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self.hops.iter().map(|h| h.to_string()).collect();
        write!(f, "[{}]", parts.join(", "))
    }
}

/// Who ends up owning the transferred value.
///
/// UTXO ledgers and atomic memory need a short ID; EVM credits need an
/// account address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct OwnerDescriptor {
    pub short_id: Option<ShortId>,
    pub evm: Option<Address>,
}

impl OwnerDescriptor {
    pub fn utxo(short_id: ShortId) -> Self {
        Self {
            short_id: Some(short_id),
            evm: None,
        }
    }

    pub fn evm(address: Address) -> Self {
        Self {
            short_id: None,
            evm: Some(address),
        }
    }

    pub fn both(short_id: ShortId, evm: Address) -> Self {
        Self {
            short_id: Some(short_id),
            evm: Some(evm),
        }
    }

    /// Parse `0x...` as an EVM owner, anything else as a bech32 address
    pub fn parse(text: &str, hrp: &str) -> Result<Self, TransferError> {
        let text = text.trim();
        if text.starts_with("0x") || text.starts_with("0X") {
            let addr = Address::from_str(text).map_err(|e| {
                TransferError::InvalidRequest(format!("invalid EVM address '{}': {}", text, e))
            })?;
            return Ok(Self::evm(addr));
        }
        let (_, short) = ShortId::parse_address(text, hrp).map_err(|e| {
            TransferError::InvalidRequest(format!("invalid address '{}': {}", text, e))
        })?;
        Ok(Self::utxo(short))
    }
}

/// External resume ordinal: index of the next hop to execute.
///
/// Advances only after a hop is accepted and never goes backwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct StepCursor(usize);

impl StepCursor {
    pub const START: StepCursor = StepCursor(0);

    pub fn new(ordinal: usize) -> Self {
        Self(ordinal)
    }

    pub fn get(&self) -> usize {
        self.0
    }

    pub fn advance(&mut self) {
        self.0 += 1;
    }
}

impl fmt::Display for StepCursor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Ledger transaction ID
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TxId {
    /// Primary-network atomic or UTXO transaction
    Avalanche(Id),
    /// EVM transaction hash
    Evm(B256),
}

impl fmt::Display for TxId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TxId::Avalanche(id) => write!(f, "{}", id),
            TxId::Evm(hash) => write!(f, "{}", hash),
        }
    }
}

impl FromStr for TxId {
    type Err = TransferError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.starts_with("0x") {
            return B256::from_str(s)
                .map(TxId::Evm)
                .map_err(|e| TransferError::InvalidRequest(format!("invalid tx hash '{}': {}", s, e)));
        }
        s.parse::<Id>()
            .map(TxId::Avalanche)
            .map_err(|e| TransferError::InvalidRequest(format!("invalid tx id '{}': {}", s, e)))
    }
}

/// Where to pick up a transfer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ResumePoint {
    pub cursor: StepCursor,
    /// Transaction of hop `cursor` whose acceptance was never confirmed
    pub pending_tx: Option<TxId>,
}

impl ResumePoint {
    pub fn at(ordinal: usize) -> Self {
        Self {
            cursor: StepCursor::new(ordinal),
            pending_tx: None,
        }
    }

    pub fn with_pending(mut self, tx: TxId) -> Self {
        self.pending_tx = Some(tx);
        self
    }
}

/// Result of one accepted hop
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HopReceipt {
    pub ordinal: usize,
    pub hop: Hop,
    pub tx_ids: Vec<TxId>,
    /// Value the hop left on its destination
    pub credited: Amount,
}

/// Result of a completed run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferOutcome {
    pub mode: TransferMode,
    pub route: Route,
    pub cursor: StepCursor,
    pub receipts: Vec<HopReceipt>,
}

impl TransferOutcome {
    pub fn last_tx(&self) -> Option<TxId> {
        self.receipts
            .last()
            .and_then(|r| r.tx_ids.last().copied())
    }
}
