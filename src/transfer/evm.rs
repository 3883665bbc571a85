//! EVM Transactions
//!
//! EIP-1559 envelopes for value transfers and bridge calls, plus the token
//! bridge ABI.

use alloy::consensus::{SignableTransaction, TxEip1559, TxEnvelope};
use alloy::eips::eip2718::Encodable2718;
use alloy::primitives::{Address, B256, Bytes, FixedBytes, Signature, U256};
use alloy::sol;
use alloy::sol_types::{SolCall, SolValue};

use super::keys::RecoverableSignature;
use crate::ids::Id;

/// Gas limit of a plain value transfer
pub const VALUE_TRANSFER_GAS: u64 = 21_000;

/// Gas the destination bridge may spend delivering the tokens
pub const BRIDGE_REQUIRED_GAS_LIMIT: u64 = 250_000;

sol! {
    struct SendTokensInput {
        bytes32 destinationBlockchainID;
        address destinationTokenTransferrerAddress;
        address recipient;
        address primaryFeeTokenAddress;
        uint256 primaryFee;
        uint256 secondaryFee;
        uint256 requiredGasLimit;
        address multiHopFallback;
    }

    interface INativeTokenTransferrer {
        function send(SendTokensInput input) external payable;
        function wrappedToken() external view returns (address);
        function totalNativeAssetSupply() external view returns (uint256);
    }

    interface IERC20TokenTransferrer {
        function send(SendTokensInput input, uint256 amount) external;
        function token() external view returns (address);
        function tokenHomeAddress() external view returns (address);
    }

    interface IERC20 {
        function approve(address spender, uint256 amount) external returns (bool);
        function allowance(address owner, address spender) external view returns (uint256);
    }
}

/// Token transferrer flavor behind a bridge address
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BridgeKind {
    /// Locks an ERC20 on its home chain
    Erc20Home { token: Address },
    /// Locks the native asset on its home chain
    NativeHome,
    /// ERC20 representation on a remote chain; the contract is the token
    Erc20Remote,
    /// Native-asset representation on a remote chain
    NativeRemote,
}

impl BridgeKind {
    pub fn is_native(&self) -> bool {
        matches!(self, BridgeKind::NativeHome | BridgeKind::NativeRemote)
    }

    /// Token contract that must approve the bridge, if any
    pub fn approval_token(&self, bridge: Address) -> Option<Address> {
        match self {
            BridgeKind::Erc20Home { token } => Some(*token),
            BridgeKind::Erc20Remote => Some(bridge),
            BridgeKind::NativeHome | BridgeKind::NativeRemote => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            BridgeKind::Erc20Home { .. } => "ERC20_TOKEN_HOME",
            BridgeKind::NativeHome => "NATIVE_TOKEN_HOME",
            BridgeKind::Erc20Remote => "ERC20_TOKEN_REMOTE",
            BridgeKind::NativeRemote => "NATIVE_TOKEN_REMOTE",
        }
    }
}

/// Probe calldata, in detection order
pub fn probe_token() -> Bytes {
    IERC20TokenTransferrer::tokenCall {}.abi_encode().into()
}

pub fn probe_wrapped_token() -> Bytes {
    INativeTokenTransferrer::wrappedTokenCall {}.abi_encode().into()
}

pub fn probe_native_supply() -> Bytes {
    INativeTokenTransferrer::totalNativeAssetSupplyCall {}.abi_encode().into()
}

pub fn probe_token_home() -> Bytes {
    IERC20TokenTransferrer::tokenHomeAddressCall {}.abi_encode().into()
}

pub fn allowance_call(owner: Address, spender: Address) -> Bytes {
    IERC20::allowanceCall { owner, spender }.abi_encode().into()
}

pub fn approve_call(spender: Address, amount: U256) -> Bytes {
    IERC20::approveCall { spender, amount }.abi_encode().into()
}

/// Decode an `address` return value
pub fn decode_address(data: &[u8]) -> Option<Address> {
    Address::abi_decode(data).ok()
}

pub fn decode_uint(data: &[u8]) -> Option<U256> {
    U256::abi_decode(data).ok()
}

pub fn send_tokens_input(
    destination_chain: &Id,
    destination_bridge: Address,
    recipient: Address,
) -> SendTokensInput {
    SendTokensInput {
        destinationBlockchainID: FixedBytes::from(*destination_chain.as_bytes()),
        destinationTokenTransferrerAddress: destination_bridge,
        recipient,
        primaryFeeTokenAddress: Address::ZERO,
        primaryFee: U256::ZERO,
        secondaryFee: U256::ZERO,
        requiredGasLimit: U256::from(BRIDGE_REQUIRED_GAS_LIMIT),
        multiHopFallback: Address::ZERO,
    }
}

/// Calldata and attached value of the bridge `send`
pub fn bridge_send(kind: BridgeKind, input: SendTokensInput, amount: U256) -> (Bytes, U256) {
    if kind.is_native() {
        (
            INativeTokenTransferrer::sendCall { input }.abi_encode().into(),
            amount,
        )
    } else {
        (
            IERC20TokenTransferrer::sendCall { input, amount }
                .abi_encode()
                .into(),
            U256::ZERO,
        )
    }
}

/// Fee parameters fetched from the ledger
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EvmFees {
    pub max_fee_per_gas: u128,
    pub max_priority_fee_per_gas: u128,
}

pub struct CallParams {
    pub chain_id: u64,
    pub nonce: u64,
    pub to: Address,
    pub value: U256,
    pub input: Bytes,
    pub gas_limit: u64,
    pub fees: EvmFees,
}

pub fn build_call(params: CallParams) -> TxEip1559 {
    TxEip1559 {
        chain_id: params.chain_id,
        nonce: params.nonce,
        gas_limit: params.gas_limit,
        max_fee_per_gas: params.fees.max_fee_per_gas,
        max_priority_fee_per_gas: params.fees.max_priority_fee_per_gas,
        to: params.to.into(),
        value: params.value,
        input: params.input,
        ..Default::default()
    }
}

/// Upper bound on what the transaction can spend, in wei
pub fn max_cost(tx: &TxEip1559) -> U256 {
    tx.value + U256::from(tx.gas_limit) * U256::from(tx.max_fee_per_gas)
}

pub fn signing_hash(tx: &TxEip1559) -> B256 {
    tx.signature_hash()
}

/// Attach a signature; returns the tx hash and raw EIP-2718 bytes
pub fn seal(tx: TxEip1559, signature: &RecoverableSignature) -> (B256, Vec<u8>) {
    let raw = signature.as_bytes();
    let r = U256::from_be_slice(&raw[..32]);
    let s = U256::from_be_slice(&raw[32..64]);
    let signed = tx.into_signed(Signature::new(r, s, signature.parity()));
    let hash = *signed.hash();
    let envelope = TxEnvelope::from(signed);
    (hash, envelope.encoded_2718())
}
