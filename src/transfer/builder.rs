//! Transaction Builder
//!
//! Turns one hop of a transfer intent into unsigned ledger transactions,
//! using live ledger state (UTXOs, nonces, base fee) and the fee plan.
//!
//! Amount rules:
//! - an export locks exactly `value_after(hop)` for the owner
//! - an import sweeps every matching atomic UTXO and credits it minus its fee;
//!   it never starts before `value_before(hop)` is present
//! - C-Chain atomic hops burn their scheduled budget and fail to build when
//!   the live fee would exceed it
//! - UTXO transactions balance to the nAVAX: consumed = produced + fee

use alloy::consensus::TxEip1559;
use alloy::primitives::{Address, U256};
use tracing::{debug, info};

use super::adapters::{LedgerAdapter, LedgerError};
use super::codec::{
    AtomicTx, BaseTx, EvmInput, EvmOutput, OutputOwners, TransferableInput, TransferableOutput, UtxoVm,
    Utxo, sort_inputs, sort_outputs,
};
use super::error::TransferError;
use super::evm::{self, BridgeKind, CallParams, EvmFees, VALUE_TRANSFER_GAS};
use super::intent::TransferIntent;
use super::keys::KeySource;
use super::types::{Amount, BridgeRoute, Endpoint, Hop, HopKind, StepCursor, WEI_PER_NAVAX};
use crate::config::{EngineConfig, NetworkContext};
use crate::fee::{FeeSchedule, GasPolicy, atomic_fee, atomic_gas};
use crate::ids::ShortId;

/// Transaction ready for signing
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UnsignedTx {
    Atomic {
        ledger: Endpoint,
        tx: AtomicTx,
    },
    Evm {
        ledger: Endpoint,
        tx: TxEip1559,
        label: &'static str,
    },
}

/// Transactions of one hop, executed in order
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuiltHop {
    pub txs: Vec<UnsignedTx>,
    /// Fee this hop pays, in the route's unit
    pub fee: Amount,
    /// Value left on the hop's destination
    pub credited: Amount,
}

pub struct TransactionBuilder<'a> {
    network: &'a NetworkContext,
    fees: &'a FeeSchedule,
    gas: &'a GasPolicy,
    engine: &'a EngineConfig,
    ledger: &'a dyn LedgerAdapter,
    keys: &'a dyn KeySource,
}

fn build_err(cursor: StepCursor, reason: impl Into<String>) -> TransferError {
    TransferError::Build {
        cursor,
        reason: reason.into(),
    }
}

fn ledger_err(cursor: StepCursor) -> impl Fn(LedgerError) -> TransferError {
    move |e| TransferError::Ledger {
        cursor,
        reason: e.to_string(),
    }
}

fn to_u64(cursor: StepCursor, value: Amount) -> Result<u64, TransferError> {
    u64::try_from(value).map_err(|_| build_err(cursor, format!("{} does not fit a UTXO amount", value)))
}

fn vm_of(ledger: Endpoint) -> UtxoVm {
    match ledger {
        Endpoint::XChain => UtxoVm::Avm,
        _ => UtxoVm::Platform,
    }
}

fn wei_to_navax(wei: U256) -> Amount {
    (wei / U256::from(WEI_PER_NAVAX)).saturating_to::<u128>()
}

impl<'a> TransactionBuilder<'a> {
    pub fn new(
        network: &'a NetworkContext,
        fees: &'a FeeSchedule,
        gas: &'a GasPolicy,
        engine: &'a EngineConfig,
        ledger: &'a dyn LedgerAdapter,
        keys: &'a dyn KeySource,
    ) -> Self {
        Self {
            network,
            fees,
            gas,
            engine,
            ledger,
            keys,
        }
    }

    /// Build hop `ordinal` of the intent's mode route
    pub async fn build(&self, intent: &TransferIntent, ordinal: usize) -> Result<BuiltHop, TransferError> {
        let cursor = StepCursor::new(ordinal);
        let hop = *intent
            .route
            .hop(ordinal)
            .ok_or_else(|| build_err(cursor, format!("no hop {} in route", ordinal)))?;

        let built = match hop.kind {
            HopKind::UtxoExport => self.utxo_export(cursor, intent, &hop).await?,
            HopKind::UtxoImport { from } => self.utxo_import(cursor, intent, &hop, from).await?,
            HopKind::EvmAtomicExport => self.evm_atomic_export(cursor, intent, &hop).await?,
            HopKind::EvmAtomicImport { from } => self.evm_atomic_import(cursor, intent, from).await?,
            HopKind::UtxoBaseTx => self.utxo_base_tx(cursor, intent, &hop).await?,
            HopKind::EvmValueTransfer => self.evm_value_transfer(cursor, intent, &hop).await?,
            HopKind::EvmBridgeCall { bridge } => self.evm_bridge_call(cursor, intent, &hop, bridge).await?,
        };

        debug!(
            cursor = ordinal,
            hop = %hop,
            txs = built.txs.len(),
            fee = %built.fee,
            credited = %built.credited,
            "Hop built"
        );
        Ok(built)
    }

    fn owner_short(&self, cursor: StepCursor, intent: &TransferIntent) -> Result<ShortId, TransferError> {
        intent
            .owner
            .short_id
            .ok_or_else(|| build_err(cursor, "destination owner has no P/X address"))
    }

    fn owner_evm(&self, cursor: StepCursor, intent: &TransferIntent) -> Result<Address, TransferError> {
        intent
            .owner
            .evm
            .ok_or_else(|| build_err(cursor, "destination owner has no EVM address"))
    }

    fn output(&self, amount: u64, owner: ShortId) -> TransferableOutput {
        TransferableOutput {
            asset_id: self.network.avax_asset_id,
            amount,
            owners: OutputOwners::single(owner),
        }
    }

    /// Largest-first selection of the signer's UTXOs covering `target`
    fn select_inputs(
        &self,
        cursor: StepCursor,
        utxos: &[Utxo],
        me: &ShortId,
        target: u64,
    ) -> Result<(Vec<TransferableInput>, u64), TransferError> {
        let mut candidates: Vec<(&Utxo, u32)> = utxos
            .iter()
            .filter(|u| u.asset_id == self.network.avax_asset_id)
            .filter_map(|u| u.owners.spendable_by(me).map(|i| (u, i)))
            .collect();
        candidates.sort_by(|a, b| b.0.amount.cmp(&a.0.amount));

        let mut ins = Vec::new();
        let mut total: u64 = 0;
        for (utxo, sig_index) in candidates {
            if total >= target {
                break;
            }
            total = total.saturating_add(utxo.amount);
            ins.push(TransferableInput::spend(utxo, sig_index));
        }
        if total < target {
            return Err(TransferError::InsufficientFunds {
                cursor,
                have: total as Amount,
                need: target as Amount,
            });
        }
        sort_inputs(&mut ins);
        Ok((ins, total))
    }

    /// Atomic UTXOs parked for the signer, once at least `expected` arrived
    async fn parked_inputs(
        &self,
        cursor: StepCursor,
        ledger: Endpoint,
        from: Endpoint,
        expected: Amount,
    ) -> Result<(Vec<TransferableInput>, Amount), TransferError> {
        let me = self.keys.short_id();
        let utxos = self
            .ledger
            .atomic_utxos(ledger, from, &me)
            .await
            .map_err(ledger_err(cursor))?;
        let mut ins: Vec<TransferableInput> = utxos
            .iter()
            .filter(|u| u.asset_id == self.network.avax_asset_id)
            .filter_map(|u| u.owners.spendable_by(&me).map(|i| TransferableInput::spend(u, i)))
            .collect();
        let total: Amount = ins.iter().map(|i| i.amount as Amount).sum();
        if total < expected {
            return Err(TransferError::FundsNotYetAvailable { cursor });
        }
        sort_inputs(&mut ins);
        Ok((ins, total))
    }

    fn check_conservation(cursor: StepCursor, tx: &AtomicTx, fee: Amount) -> Result<(), TransferError> {
        if tx.consumed() != tx.produced() + fee {
            return Err(build_err(
                cursor,
                format!(
                    "unbalanced transaction: consumed {} != produced {} + fee {}",
                    tx.consumed(),
                    tx.produced(),
                    fee
                ),
            ));
        }
        Ok(())
    }

    async fn utxo_export(&self, cursor: StepCursor, intent: &TransferIntent, hop: &Hop) -> Result<BuiltHop, TransferError> {
        let ledger = hop.source;
        let me = self.keys.short_id();
        let owner = self.owner_short(cursor, intent)?;
        let locked = to_u64(cursor, intent.value_after(cursor.get()))?;
        let fee = to_u64(cursor, self.fees.utxo_fee(ledger))?;
        let target = locked
            .checked_add(fee)
            .ok_or_else(|| build_err(cursor, "amount overflow"))?;

        let utxos = self.ledger.utxos(ledger, &me).await.map_err(ledger_err(cursor))?;
        let (ins, total) = self.select_inputs(cursor, &utxos, &me, target)?;
        let change = total - target;

        let mut outs = Vec::new();
        if change > 0 {
            outs.push(self.output(change, me));
        }
        sort_outputs(&mut outs);

        let tx = AtomicTx::Export {
            vm: vm_of(ledger),
            base: BaseTx {
                network_id: self.network.network_id,
                blockchain_id: self.network.chain_id(ledger),
                outs,
                ins,
                memo: Vec::new(),
            },
            destination_chain: self.network.chain_id(hop.destination),
            exported: vec![self.output(locked, owner)],
        };
        Self::check_conservation(cursor, &tx, fee as Amount)?;

        Ok(BuiltHop {
            txs: vec![UnsignedTx::Atomic { ledger, tx }],
            fee: fee as Amount,
            credited: locked as Amount,
        })
    }

    async fn utxo_import(
        &self,
        cursor: StepCursor,
        intent: &TransferIntent,
        hop: &Hop,
        from: Endpoint,
    ) -> Result<BuiltHop, TransferError> {
        let ledger = hop.destination;
        let me = self.keys.short_id();
        if self.owner_short(cursor, intent)? != me {
            return Err(build_err(cursor, "parked funds belong to a different key"));
        }
        let (imported, total) = self
            .parked_inputs(cursor, ledger, from, intent.value_before(cursor.get()))
            .await?;
        let fee = self.fees.utxo_fee(ledger);
        let credited = to_u64(cursor, total - fee)?;

        let tx = AtomicTx::Import {
            vm: vm_of(ledger),
            base: BaseTx {
                network_id: self.network.network_id,
                blockchain_id: self.network.chain_id(ledger),
                outs: vec![self.output(credited, me)],
                ins: Vec::new(),
                memo: Vec::new(),
            },
            source_chain: self.network.chain_id(from),
            imported,
        };
        Self::check_conservation(cursor, &tx, fee)?;

        Ok(BuiltHop {
            txs: vec![UnsignedTx::Atomic { ledger, tx }],
            fee,
            credited: credited as Amount,
        })
    }

    /// C-Chain atomic gas price: base fee with safety factor plus the minimum tip
    async fn atomic_gas_price(&self, cursor: StepCursor) -> Result<u128, TransferError> {
        let base_fee = self
            .ledger
            .base_fee(Endpoint::CChain)
            .await
            .map_err(ledger_err(cursor))?;
        Ok(self.gas.max_fee_per_gas(base_fee, self.gas.min_priority_fee_wei as u128))
    }

    /// Scheduled C-Chain budget for this hop, refused if the live fee exceeds it
    async fn atomic_budget(&self, cursor: StepCursor, intent: &TransferIntent, sized: &AtomicTx) -> Result<Amount, TransferError> {
        let price = self.atomic_gas_price(cursor).await?;
        let live = atomic_fee(atomic_gas(sized.signed_len(), sized.signature_count()), price);
        let budget = intent.hop_fee(cursor.get());
        debug!(cursor = cursor.get(), live = %live, budget = %budget, gas_price = %price, "C-Chain atomic fee");
        if live > budget {
            return Err(build_err(
                cursor,
                format!("live C-Chain atomic fee {} exceeds the scheduled budget {}", live, budget),
            ));
        }
        Ok(budget)
    }

    async fn evm_atomic_export(
        &self,
        cursor: StepCursor,
        intent: &TransferIntent,
        hop: &Hop,
    ) -> Result<BuiltHop, TransferError> {
        let me = self.keys.evm_address();
        let owner = self.owner_short(cursor, intent)?;
        let locked = to_u64(cursor, intent.value_after(cursor.get()))?;
        let nonce = self
            .ledger
            .evm_nonce(Endpoint::CChain, me)
            .await
            .map_err(ledger_err(cursor))?;

        let draft = |input_amount: u64| AtomicTx::EvmExport {
            network_id: self.network.network_id,
            blockchain_id: self.network.c_chain_id,
            destination_chain: self.network.chain_id(hop.destination),
            ins: vec![EvmInput {
                address: me,
                amount: input_amount,
                asset_id: self.network.avax_asset_id,
                nonce,
            }],
            exported: vec![self.output(locked, owner)],
        };

        // Amounts are fixed-width, so the draft has the final size
        let fee = self.atomic_budget(cursor, intent, &draft(locked)).await?;
        let debit = to_u64(cursor, locked as Amount + fee)?;

        let balance = self
            .ledger
            .evm_balance(Endpoint::CChain, me)
            .await
            .map_err(ledger_err(cursor))?;
        let have = wei_to_navax(balance);
        if have < debit as Amount {
            return Err(TransferError::InsufficientFunds {
                cursor,
                have,
                need: debit as Amount,
            });
        }

        let tx = draft(debit);
        Self::check_conservation(cursor, &tx, fee)?;
        info!(cursor = cursor.get(), fee = %fee, debit = %debit, "C-Chain export priced");

        Ok(BuiltHop {
            txs: vec![UnsignedTx::Atomic {
                ledger: Endpoint::CChain,
                tx,
            }],
            fee,
            credited: locked as Amount,
        })
    }

    async fn evm_atomic_import(
        &self,
        cursor: StepCursor,
        intent: &TransferIntent,
        from: Endpoint,
    ) -> Result<BuiltHop, TransferError> {
        let recipient = self.owner_evm(cursor, intent)?;
        let (imported, total) = self
            .parked_inputs(cursor, Endpoint::CChain, from, intent.value_before(cursor.get()))
            .await?;

        let draft = |credit: u64| AtomicTx::EvmImport {
            network_id: self.network.network_id,
            blockchain_id: self.network.c_chain_id,
            source_chain: self.network.chain_id(from),
            imported: imported.clone(),
            outs: vec![EvmOutput {
                address: recipient,
                amount: credit,
                asset_id: self.network.avax_asset_id,
            }],
        };

        let fee = self.atomic_budget(cursor, intent, &draft(0)).await?;
        let credited = to_u64(cursor, total - fee)?;
        let tx = draft(credited);
        Self::check_conservation(cursor, &tx, fee)?;

        Ok(BuiltHop {
            txs: vec![UnsignedTx::Atomic {
                ledger: Endpoint::CChain,
                tx,
            }],
            fee,
            credited: credited as Amount,
        })
    }

    async fn utxo_base_tx(&self, cursor: StepCursor, intent: &TransferIntent, hop: &Hop) -> Result<BuiltHop, TransferError> {
        let ledger = hop.source;
        let me = self.keys.short_id();
        let owner = self.owner_short(cursor, intent)?;
        let amount = to_u64(cursor, intent.amount)?;
        let fee = to_u64(cursor, self.fees.utxo_fee(ledger))?;
        let target = amount
            .checked_add(fee)
            .ok_or_else(|| build_err(cursor, "amount overflow"))?;

        let utxos = self.ledger.utxos(ledger, &me).await.map_err(ledger_err(cursor))?;
        let (ins, total) = self.select_inputs(cursor, &utxos, &me, target)?;

        let mut outs = vec![self.output(amount, owner)];
        if total > target {
            outs.push(self.output(total - target, me));
        }
        sort_outputs(&mut outs);

        let tx = AtomicTx::Base {
            vm: vm_of(ledger),
            base: BaseTx {
                network_id: self.network.network_id,
                blockchain_id: self.network.chain_id(ledger),
                outs,
                ins,
                memo: Vec::new(),
            },
        };
        Self::check_conservation(cursor, &tx, fee as Amount)?;

        Ok(BuiltHop {
            txs: vec![UnsignedTx::Atomic { ledger, tx }],
            fee: fee as Amount,
            credited: amount as Amount,
        })
    }

    async fn evm_fees(&self, cursor: StepCursor, ledger: Endpoint) -> Result<EvmFees, TransferError> {
        let base_fee = self.ledger.base_fee(ledger).await.map_err(ledger_err(cursor))?;
        let suggested = self
            .ledger
            .suggested_priority_fee(ledger)
            .await
            .map_err(ledger_err(cursor))?;
        let priority = self.gas.priority_fee(suggested);
        Ok(EvmFees {
            max_fee_per_gas: self.gas.max_fee_per_gas(base_fee, priority),
            max_priority_fee_per_gas: priority,
        })
    }

    async fn ensure_balance(&self, cursor: StepCursor, ledger: Endpoint, txs: &[UnsignedTx]) -> Result<(), TransferError> {
        let need: U256 = txs
            .iter()
            .map(|t| match t {
                UnsignedTx::Evm { tx, .. } => evm::max_cost(tx),
                UnsignedTx::Atomic { .. } => U256::ZERO,
            })
            .fold(U256::ZERO, |acc, c| acc + c);
        let have = self
            .ledger
            .evm_balance(ledger, self.keys.evm_address())
            .await
            .map_err(ledger_err(cursor))?;
        if have < need {
            return Err(TransferError::InsufficientFunds {
                cursor,
                have: have.saturating_to::<u128>(),
                need: need.saturating_to::<u128>(),
            });
        }
        Ok(())
    }

    async fn evm_value_transfer(
        &self,
        cursor: StepCursor,
        intent: &TransferIntent,
        hop: &Hop,
    ) -> Result<BuiltHop, TransferError> {
        let ledger = hop.source;
        let recipient = self.owner_evm(cursor, intent)?;
        let me = self.keys.evm_address();
        if recipient == me {
            return Err(build_err(cursor, "sender and recipient are the same account"));
        }
        let chain_id = self.ledger.evm_chain_id(ledger).await.map_err(ledger_err(cursor))?;
        let nonce = self.ledger.evm_nonce(ledger, me).await.map_err(ledger_err(cursor))?;
        let fees = self.evm_fees(cursor, ledger).await?;

        let tx = evm::build_call(CallParams {
            chain_id,
            nonce,
            to: recipient,
            value: U256::from(intent.amount),
            input: Default::default(),
            gas_limit: VALUE_TRANSFER_GAS,
            fees,
        });
        let txs = vec![UnsignedTx::Evm {
            ledger,
            tx,
            label: "value transfer",
        }];
        self.ensure_balance(cursor, ledger, &txs).await?;

        Ok(BuiltHop {
            txs,
            fee: 0,
            credited: intent.amount,
        })
    }

    /// Identify the transferrer behind `bridge` by probing its views
    pub async fn detect_bridge(&self, cursor: StepCursor, ledger: Endpoint, bridge: Address) -> Result<BridgeKind, TransferError> {
        if let Ok(data) = self.ledger.eth_call(ledger, bridge, evm::probe_token()).await
            && let Some(token) = evm::decode_address(&data)
        {
            return Ok(BridgeKind::Erc20Home { token });
        }
        if let Ok(data) = self.ledger.eth_call(ledger, bridge, evm::probe_wrapped_token()).await
            && evm::decode_address(&data).is_some()
        {
            return Ok(BridgeKind::NativeHome);
        }
        if let Ok(data) = self.ledger.eth_call(ledger, bridge, evm::probe_native_supply()).await
            && evm::decode_uint(&data).is_some()
        {
            return Ok(BridgeKind::NativeRemote);
        }
        match self.ledger.eth_call(ledger, bridge, evm::probe_token_home()).await {
            Ok(data) if evm::decode_address(&data).is_some() => Ok(BridgeKind::Erc20Remote),
            Ok(_) => Err(build_err(cursor, format!("{} is not a token transferrer", bridge))),
            Err(e) => Err(build_err(
                cursor,
                format!("{} is not a token transferrer: {}", bridge, e),
            )),
        }
    }

    async fn evm_bridge_call(
        &self,
        cursor: StepCursor,
        intent: &TransferIntent,
        hop: &Hop,
        bridge: BridgeRoute,
    ) -> Result<BuiltHop, TransferError> {
        let ledger = hop.source;
        let recipient = self.owner_evm(cursor, intent)?;
        let me = self.keys.evm_address();
        let amount = U256::from(intent.amount);

        let kind = self.detect_bridge(cursor, ledger, bridge.origin).await?;
        info!(cursor = cursor.get(), bridge = %bridge.origin, kind = kind.as_str(), "Bridge detected");

        let chain_id = self.ledger.evm_chain_id(ledger).await.map_err(ledger_err(cursor))?;
        let mut nonce = self.ledger.evm_nonce(ledger, me).await.map_err(ledger_err(cursor))?;
        let fees = self.evm_fees(cursor, ledger).await?;
        let mut txs = Vec::new();

        if let Some(token) = kind.approval_token(bridge.origin) {
            let data = self
                .ledger
                .eth_call(ledger, token, evm::allowance_call(me, bridge.origin))
                .await
                .map_err(ledger_err(cursor))?;
            let allowance = evm::decode_uint(&data)
                .ok_or_else(|| build_err(cursor, "cannot decode token allowance"))?;
            if allowance < amount {
                txs.push(UnsignedTx::Evm {
                    ledger,
                    tx: evm::build_call(CallParams {
                        chain_id,
                        nonce,
                        to: token,
                        value: U256::ZERO,
                        input: evm::approve_call(bridge.origin, amount),
                        gas_limit: self.engine.bridge_gas_limit,
                        fees,
                    }),
                    label: "token approve",
                });
                nonce += 1;
            }
        }

        let input = evm::send_tokens_input(
            &self.network.chain_id(hop.destination),
            bridge.destination,
            recipient,
        );
        let (data, value) = evm::bridge_send(kind, input, amount);
        txs.push(UnsignedTx::Evm {
            ledger,
            tx: evm::build_call(CallParams {
                chain_id,
                nonce,
                to: bridge.origin,
                value,
                input: data,
                gas_limit: self.engine.bridge_gas_limit,
                fees,
            }),
            label: "bridge send",
        });
        self.ensure_balance(cursor, ledger, &txs).await?;

        Ok(BuiltHop {
            txs,
            fee: 0,
            credited: intent.amount,
        })
    }
}
