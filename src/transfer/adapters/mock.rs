//! In-memory ledger for tests.
//!
//! Applies issued transactions to UTXO sets, atomic memory and EVM balances,
//! so tests can check where value ended up.

use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use alloy::primitives::{Address, Bytes, U256};
use async_trait::async_trait;

use super::{LedgerAdapter, LedgerError, SignedPayload, SignedTx, TxStatus};
use crate::config::NetworkContext;
use crate::ids::{Id, ShortId};
use crate::transfer::codec::{AtomicTx, OutputOwners, TransferableInput, TransferableOutput, UtxoVm, Utxo};
use crate::transfer::types::{Endpoint, TxId, WEI_PER_NAVAX};

pub const TEST_NETWORK_ID: u32 = 12345;
pub const TEST_BASE_FEE: u128 = 25_000_000_000;
pub const TEST_EVM_CHAIN_ID: u64 = 43112;

pub fn test_network() -> NetworkContext {
    NetworkContext {
        name: "test".to_string(),
        network_id: TEST_NETWORK_ID,
        hrp: "local".to_string(),
        rpc_url: "http://127.0.0.1:9650".to_string(),
        avax_asset_id: Id([0xAA; 32]),
        p_chain_id: Id::EMPTY,
        x_chain_id: Id([0x58; 32]),
        c_chain_id: Id([0x43; 32]),
        evm_chains: vec![],
    }
}

/// Scripted misbehavior for the next issue on a ledger
#[derive(Debug, Clone)]
pub enum MockFailure {
    /// Node refuses the transaction at issue time
    RejectOnIssue(String),
    /// Transaction is issued, then reported rejected
    RejectAfterIssue(String),
    /// Transaction is issued but never reported final until released
    Stuck,
    /// Issue call fails before reaching the node
    Transport,
}

#[derive(Debug, Clone, PartialEq)]
enum MockTxState {
    Pending { polls_left: usize },
    Stuck,
    Accepted,
    Rejected(String),
}

struct MockTx {
    tx: SignedTx,
    state: MockTxState,
}

#[derive(Default)]
struct LedgerState {
    utxos: HashMap<Endpoint, Vec<Utxo>>,
    atomic: HashMap<(Endpoint, Endpoint), Vec<Utxo>>,
    evm_balances: HashMap<(Endpoint, Address), U256>,
    nonces: HashMap<(Endpoint, Address), u64>,
    txs: HashMap<TxId, MockTx>,
    issued: Vec<(Endpoint, TxId)>,
    evm_calls: Vec<(Endpoint, Address, Bytes, U256)>,
    call_results: HashMap<(Address, [u8; 4]), Bytes>,
    failures: Vec<(Endpoint, MockFailure)>,
    funding_nonce: u8,
}

pub struct MockLedger {
    network: NetworkContext,
    state: Mutex<LedgerState>,
    pending_polls: Mutex<usize>,
    issue_count: AtomicUsize,
    status_count: AtomicUsize,
}

impl Default for MockLedger {
    fn default() -> Self {
        Self::new()
    }
}

impl MockLedger {
    pub fn new() -> Self {
        Self {
            network: test_network(),
            state: Mutex::new(LedgerState::default()),
            pending_polls: Mutex::new(0),
            issue_count: AtomicUsize::new(0),
            status_count: AtomicUsize::new(0),
        }
    }

    pub fn network(&self) -> &NetworkContext {
        &self.network
    }

    /// Every accepted tx reports `Pending` this many times first
    pub fn set_pending_polls(&self, polls: usize) {
        *self.pending_polls.lock().unwrap() = polls;
    }

    /// Fail the next issue on `ledger`
    pub fn fail_next(&self, ledger: Endpoint, failure: MockFailure) {
        self.state.lock().unwrap().failures.push((ledger, failure));
    }

    /// Apply and accept every stuck transaction
    pub fn release_stuck(&self) {
        let mut state = self.state.lock().unwrap();
        let stuck: Vec<TxId> = state
            .txs
            .iter()
            .filter(|(_, t)| t.state == MockTxState::Stuck)
            .map(|(id, _)| *id)
            .collect();
        for id in stuck {
            if let Some(tx) = state.txs.get(&id).map(|t| t.tx.clone()) {
                apply(&mut state, &self.network, &tx, &id);
            }
            if let Some(t) = state.txs.get_mut(&id) {
                t.state = MockTxState::Accepted;
            }
        }
    }

    pub fn set_call_result(&self, to: Address, selector: [u8; 4], result: Bytes) {
        self.state
            .lock()
            .unwrap()
            .call_results
            .insert((to, selector), result);
    }

    pub fn fund_utxo(&self, ledger: Endpoint, owner: ShortId, amount: u64) {
        let mut state = self.state.lock().unwrap();
        state.funding_nonce += 1;
        let utxo = Utxo {
            tx_id: Id([state.funding_nonce; 32]),
            output_index: 0,
            asset_id: self.network.avax_asset_id,
            amount,
            owners: OutputOwners::single(owner),
        };
        state.utxos.entry(ledger).or_default().push(utxo);
    }

    pub fn fund_evm(&self, ledger: Endpoint, address: Address, wei: U256) {
        *self
            .state
            .lock()
            .unwrap()
            .evm_balances
            .entry((ledger, address))
            .or_default() += wei;
    }

    pub fn utxo_balance(&self, ledger: Endpoint, owner: &ShortId) -> u64 {
        let state = self.state.lock().unwrap();
        sum_owned(state.utxos.get(&ledger), owner)
    }

    pub fn atomic_balance(&self, ledger: Endpoint, source: Endpoint, owner: &ShortId) -> u64 {
        let state = self.state.lock().unwrap();
        sum_owned(state.atomic.get(&(ledger, source)), owner)
    }

    pub fn evm_balance_of(&self, ledger: Endpoint, address: Address) -> U256 {
        let state = self.state.lock().unwrap();
        state
            .evm_balances
            .get(&(ledger, address))
            .copied()
            .unwrap_or_default()
    }

    /// Transactions issued, in order
    pub fn issued(&self) -> Vec<(Endpoint, TxId)> {
        self.state.lock().unwrap().issued.clone()
    }

    pub fn evm_calls(&self) -> Vec<(Endpoint, Address, Bytes, U256)> {
        self.state.lock().unwrap().evm_calls.clone()
    }

    pub fn issue_count(&self) -> usize {
        self.issue_count.load(Ordering::SeqCst)
    }

    pub fn status_count(&self) -> usize {
        self.status_count.load(Ordering::SeqCst)
    }
}

fn sum_owned(utxos: Option<&Vec<Utxo>>, owner: &ShortId) -> u64 {
    utxos
        .map(|v| {
            v.iter()
                .filter(|u| u.owners.addrs.contains(owner))
                .map(|u| u.amount)
                .sum()
        })
        .unwrap_or(0)
}

fn vm_ledger(vm: UtxoVm) -> Endpoint {
    match vm {
        UtxoVm::Platform => Endpoint::PChain,
        UtxoVm::Avm => Endpoint::XChain,
    }
}

fn consume(set: &mut Vec<Utxo>, ins: &[TransferableInput]) {
    set.retain(|u| {
        !ins.iter()
            .any(|i| i.tx_id == u.tx_id && i.output_index == u.output_index)
    });
}

fn produce(set: &mut Vec<Utxo>, outs: &[TransferableOutput], tx_id: Id, first_index: usize) {
    for (i, out) in outs.iter().enumerate() {
        set.push(Utxo {
            tx_id,
            output_index: (first_index + i) as u32,
            asset_id: out.asset_id,
            amount: out.amount,
            owners: out.owners.clone(),
        });
    }
}

fn apply(state: &mut LedgerState, network: &NetworkContext, tx: &SignedTx, tx_id: &TxId) {
    let id = match tx_id {
        TxId::Avalanche(id) => *id,
        TxId::Evm(hash) => Id(hash.0),
    };
    match &tx.payload {
        SignedPayload::Atomic { tx: atomic, .. } => match atomic {
            AtomicTx::Base { vm, base } => {
                let set = state.utxos.entry(vm_ledger(*vm)).or_default();
                consume(set, &base.ins);
                produce(set, &base.outs, id, 0);
            }
            AtomicTx::Export {
                vm,
                base,
                destination_chain,
                exported,
            } => {
                let ledger = vm_ledger(*vm);
                let set = state.utxos.entry(ledger).or_default();
                consume(set, &base.ins);
                produce(set, &base.outs, id, 0);
                let dest = network.endpoint_of(*destination_chain);
                let memory = state.atomic.entry((dest, ledger)).or_default();
                produce(memory, exported, id, base.outs.len());
            }
            AtomicTx::Import {
                vm,
                base,
                source_chain,
                imported,
            } => {
                let ledger = vm_ledger(*vm);
                let source = network.endpoint_of(*source_chain);
                consume(state.atomic.entry((ledger, source)).or_default(), imported);
                let set = state.utxos.entry(ledger).or_default();
                consume(set, &base.ins);
                produce(set, &base.outs, id, 0);
            }
            AtomicTx::EvmExport {
                destination_chain,
                ins,
                exported,
                ..
            } => {
                for input in ins {
                    let balance = state
                        .evm_balances
                        .entry((Endpoint::CChain, input.address))
                        .or_default();
                    *balance = balance.saturating_sub(U256::from(input.amount as u128 * WEI_PER_NAVAX));
                    *state
                        .nonces
                        .entry((Endpoint::CChain, input.address))
                        .or_default() += 1;
                }
                let dest = network.endpoint_of(*destination_chain);
                let memory = state.atomic.entry((dest, Endpoint::CChain)).or_default();
                produce(memory, exported, id, 0);
            }
            AtomicTx::EvmImport {
                source_chain,
                imported,
                outs,
                ..
            } => {
                let source = network.endpoint_of(*source_chain);
                consume(
                    state.atomic.entry((Endpoint::CChain, source)).or_default(),
                    imported,
                );
                for out in outs {
                    *state
                        .evm_balances
                        .entry((Endpoint::CChain, out.address))
                        .or_default() += U256::from(out.amount as u128 * WEI_PER_NAVAX);
                }
            }
        },
        SignedPayload::Evm { tx: call, from, .. } => {
            let to = call.to.to().copied().unwrap_or_default();
            let gas = U256::from(call.gas_limit) * U256::from(call.max_fee_per_gas);
            let sender = state.evm_balances.entry((tx.ledger, *from)).or_default();
            *sender = sender.saturating_sub(call.value + gas);
            *state.evm_balances.entry((tx.ledger, to)).or_default() += call.value;
            *state.nonces.entry((tx.ledger, *from)).or_default() += 1;
            state
                .evm_calls
                .push((tx.ledger, to, call.input.clone(), call.value));
        }
    }
}

#[async_trait]
impl LedgerAdapter for MockLedger {
    fn name(&self) -> &'static str {
        "mock"
    }

    async fn utxos(&self, ledger: Endpoint, owner: &ShortId) -> Result<Vec<Utxo>, LedgerError> {
        let state = self.state.lock().unwrap();
        Ok(state
            .utxos
            .get(&ledger)
            .map(|v| {
                v.iter()
                    .filter(|u| u.owners.addrs.contains(owner))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn atomic_utxos(
        &self,
        ledger: Endpoint,
        source: Endpoint,
        owner: &ShortId,
    ) -> Result<Vec<Utxo>, LedgerError> {
        let state = self.state.lock().unwrap();
        Ok(state
            .atomic
            .get(&(ledger, source))
            .map(|v| {
                v.iter()
                    .filter(|u| u.owners.addrs.contains(owner))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn evm_chain_id(&self, _ledger: Endpoint) -> Result<u64, LedgerError> {
        Ok(TEST_EVM_CHAIN_ID)
    }

    async fn evm_nonce(&self, ledger: Endpoint, address: Address) -> Result<u64, LedgerError> {
        let state = self.state.lock().unwrap();
        Ok(state.nonces.get(&(ledger, address)).copied().unwrap_or(0))
    }

    async fn evm_balance(&self, ledger: Endpoint, address: Address) -> Result<U256, LedgerError> {
        Ok(self.evm_balance_of(ledger, address))
    }

    async fn base_fee(&self, _ledger: Endpoint) -> Result<u128, LedgerError> {
        Ok(TEST_BASE_FEE)
    }

    async fn suggested_priority_fee(&self, _ledger: Endpoint) -> Result<u128, LedgerError> {
        Ok(0)
    }

    async fn eth_call(&self, _ledger: Endpoint, to: Address, data: Bytes) -> Result<Bytes, LedgerError> {
        let mut selector = [0u8; 4];
        if data.len() >= 4 {
            selector.copy_from_slice(&data[..4]);
        }
        let state = self.state.lock().unwrap();
        state
            .call_results
            .get(&(to, selector))
            .cloned()
            .ok_or(LedgerError::Rpc {
                code: 3,
                message: "execution reverted".to_string(),
            })
    }

    async fn issue(&self, tx: &SignedTx) -> Result<TxId, LedgerError> {
        self.issue_count.fetch_add(1, Ordering::SeqCst);
        let id = tx.id();
        let polls = *self.pending_polls.lock().unwrap();
        let mut state = self.state.lock().unwrap();

        if state.txs.contains_key(&id) {
            return Ok(id);
        }

        let failure = state
            .failures
            .iter()
            .position(|(ledger, _)| *ledger == tx.ledger)
            .map(|i| state.failures.remove(i).1);

        let tx_state = match failure {
            Some(MockFailure::RejectOnIssue(message)) => {
                return Err(LedgerError::Rpc {
                    code: -32000,
                    message,
                });
            }
            Some(MockFailure::Transport) => {
                return Err(LedgerError::Transport("connection reset".to_string()));
            }
            Some(MockFailure::RejectAfterIssue(reason)) => MockTxState::Rejected(reason),
            Some(MockFailure::Stuck) => MockTxState::Stuck,
            None => {
                apply(&mut state, &self.network, tx, &id);
                MockTxState::Pending { polls_left: polls }
            }
        };

        state.issued.push((tx.ledger, id));
        state.txs.insert(
            id,
            MockTx {
                tx: tx.clone(),
                state: tx_state,
            },
        );
        Ok(id)
    }

    async fn status(&self, _ledger: Endpoint, tx_id: &TxId) -> Result<TxStatus, LedgerError> {
        self.status_count.fetch_add(1, Ordering::SeqCst);
        let mut state = self.state.lock().unwrap();
        let Some(entry) = state.txs.get_mut(tx_id) else {
            return Ok(TxStatus::Unknown);
        };
        Ok(match entry.state.clone() {
            MockTxState::Pending { polls_left } if polls_left > 0 => {
                entry.state = MockTxState::Pending {
                    polls_left: polls_left - 1,
                };
                TxStatus::Pending
            }
            MockTxState::Pending { .. } => {
                entry.state = MockTxState::Accepted;
                TxStatus::Accepted
            }
            MockTxState::Stuck => TxStatus::Pending,
            MockTxState::Accepted => TxStatus::Accepted,
            MockTxState::Rejected(reason) => TxStatus::Rejected(reason),
        })
    }
}
