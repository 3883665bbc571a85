//! JSON-RPC Ledger Adapter
//!
//! Talks to an avalanchego node: `platform.*` on `/ext/bc/P`, `avm.*` on
//! `/ext/bc/X`, `avax.*` on `/ext/bc/C/avax` and `eth_*` on the EVM RPC
//! endpoints.

use std::str::FromStr;
use std::time::Duration;

use alloy::primitives::{Address, Bytes, U256};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::debug;

use super::{LedgerAdapter, LedgerError, SignedPayload, SignedTx, TxStatus};
use crate::config::NetworkContext;
use crate::ids::ShortId;
use crate::logging::POLL_TARGET;
use crate::transfer::codec::{Utxo, decode_hex, encode_hex};
use crate::transfer::types::{Endpoint, TxId};

const UTXO_PAGE_LIMIT: u64 = 1024;

/// JSON-RPC request structure
#[derive(Serialize)]
struct JsonRpcRequest<T> {
    jsonrpc: &'static str,
    method: &'static str,
    params: T,
    id: u64,
}

/// JSON-RPC response structure
#[derive(Deserialize)]
struct JsonRpcResponse<T> {
    result: Option<T>,
    error: Option<JsonRpcError>,
}

#[derive(Deserialize)]
struct JsonRpcError {
    code: i64,
    message: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct UtxoPage {
    num_fetched: String,
    utxos: Vec<String>,
    end_index: UtxoIndex,
}

#[derive(Deserialize, Serialize, Clone)]
struct UtxoIndex {
    address: String,
    utxo: String,
}

#[derive(Deserialize)]
struct IssueResult {
    #[serde(rename = "txID")]
    tx_id: String,
}

#[derive(Deserialize)]
struct StatusResult {
    status: String,
    #[serde(default)]
    reason: Option<String>,
}

#[derive(Deserialize)]
struct Receipt {
    status: Option<String>,
}

/// Ledger adapter backed by a node's JSON-RPC APIs
pub struct RpcLedger {
    network: NetworkContext,
    client: reqwest::Client,
}

impl RpcLedger {
    pub fn new(network: NetworkContext) -> Result<Self, LedgerError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| LedgerError::Transport(format!("Failed to create HTTP client: {}", e)))?;
        Ok(Self { network, client })
    }

    /// JSON-RPC call; a `null` result comes back as `None`
    async fn rpc_call<T, R>(&self, url: &str, method: &'static str, params: T) -> Result<Option<R>, LedgerError>
    where
        T: Serialize,
        R: for<'de> Deserialize<'de>,
    {
        let request = JsonRpcRequest {
            jsonrpc: "2.0",
            method,
            params,
            id: 1,
        };

        let response = self
            .client
            .post(url)
            .json(&request)
            .send()
            .await
            .map_err(|e| LedgerError::Transport(format!("HTTP request failed: {}", e)))?;

        let rpc_response: JsonRpcResponse<R> = response
            .json()
            .await
            .map_err(|e| LedgerError::Decode(format!("Failed to parse response: {}", e)))?;

        if let Some(error) = rpc_response.error {
            return Err(LedgerError::Rpc {
                code: error.code,
                message: error.message,
            });
        }

        Ok(rpc_response.result)
    }

    async fn rpc_require<T, R>(&self, url: &str, method: &'static str, params: T) -> Result<R, LedgerError>
    where
        T: Serialize,
        R: for<'de> Deserialize<'de>,
    {
        self.rpc_call(url, method, params)
            .await?
            .ok_or_else(|| LedgerError::Decode(format!("No result in {} response", method)))
    }

    fn namespace(endpoint: Endpoint) -> Result<&'static str, LedgerError> {
        match endpoint {
            Endpoint::PChain => Ok("platform"),
            Endpoint::XChain => Ok("avm"),
            Endpoint::CChain => Ok("avax"),
            Endpoint::Evm(_) => Err(LedgerError::Unsupported {
                endpoint,
                operation: "atomic API",
            }),
        }
    }

    fn owner_address(&self, endpoint: Endpoint, owner: &ShortId) -> Result<String, LedgerError> {
        owner
            .to_address(&endpoint.alias(), &self.network.hrp)
            .map_err(|e| LedgerError::Decode(e.to_string()))
    }

    async fn fetch_utxos(
        &self,
        ledger: Endpoint,
        source: Option<Endpoint>,
        owner: &ShortId,
    ) -> Result<Vec<Utxo>, LedgerError> {
        let method = match Self::namespace(ledger)? {
            "platform" => "platform.getUTXOs",
            "avm" => "avm.getUTXOs",
            _ => "avax.getUTXOs",
        };
        let url = self.network.avalanche_api_url(ledger);
        let address = self.owner_address(ledger, owner)?;

        let mut out = Vec::new();
        let mut start: Option<UtxoIndex> = None;
        loop {
            let mut params = json!({
                "addresses": [address],
                "limit": UTXO_PAGE_LIMIT,
                "encoding": "hex",
            });
            if let Some(src) = source {
                params["sourceChain"] = json!(src.alias());
            }
            if let Some(index) = &start {
                params["startIndex"] = json!(index);
            }

            let page: UtxoPage = self.rpc_require(&url, method, params).await?;
            for encoded in &page.utxos {
                let bytes = decode_hex(encoded).map_err(|e| LedgerError::Decode(e.to_string()))?;
                if let Some(utxo) = Utxo::decode(&bytes).map_err(|e| LedgerError::Decode(e.to_string()))? {
                    out.push(utxo);
                }
            }

            let fetched: u64 = page
                .num_fetched
                .parse()
                .map_err(|_| LedgerError::Decode(format!("numFetched '{}'", page.num_fetched)))?;
            if fetched < UTXO_PAGE_LIMIT {
                break;
            }
            start = Some(page.end_index);
        }
        Ok(out)
    }
}

fn parse_quantity(text: &str) -> Result<u128, LedgerError> {
    u128::from_str_radix(text.trim_start_matches("0x"), 16)
        .map_err(|e| LedgerError::Decode(format!("quantity '{}': {}", text, e)))
}

/// Status of an EVM transaction from its receipt status and whether the
/// node still knows the transaction
fn evm_status(receipt_status: Option<&str>, known: bool) -> Result<TxStatus, LedgerError> {
    Ok(match receipt_status {
        Some(s) if parse_quantity(s)? == 1 => TxStatus::Accepted,
        Some(_) => TxStatus::Rejected("execution reverted".to_string()),
        None if known => TxStatus::Pending,
        None => TxStatus::Unknown,
    })
}

#[async_trait]
impl LedgerAdapter for RpcLedger {
    fn name(&self) -> &'static str {
        "rpc"
    }

    async fn utxos(&self, ledger: Endpoint, owner: &ShortId) -> Result<Vec<Utxo>, LedgerError> {
        if !ledger.is_utxo() {
            return Err(LedgerError::Unsupported {
                endpoint: ledger,
                operation: "getUTXOs",
            });
        }
        self.fetch_utxos(ledger, None, owner).await
    }

    async fn atomic_utxos(
        &self,
        ledger: Endpoint,
        source: Endpoint,
        owner: &ShortId,
    ) -> Result<Vec<Utxo>, LedgerError> {
        self.fetch_utxos(ledger, Some(source), owner).await
    }

    async fn evm_chain_id(&self, ledger: Endpoint) -> Result<u64, LedgerError> {
        let url = self.network.evm_rpc_url(ledger);
        let hex: String = self.rpc_require(&url, "eth_chainId", json!([])).await?;
        Ok(parse_quantity(&hex)? as u64)
    }

    async fn evm_nonce(&self, ledger: Endpoint, address: Address) -> Result<u64, LedgerError> {
        let url = self.network.evm_rpc_url(ledger);
        let hex: String = self
            .rpc_require(&url, "eth_getTransactionCount", json!([address.to_string(), "pending"]))
            .await?;
        Ok(parse_quantity(&hex)? as u64)
    }

    async fn evm_balance(&self, ledger: Endpoint, address: Address) -> Result<U256, LedgerError> {
        let url = self.network.evm_rpc_url(ledger);
        let hex: String = self
            .rpc_require(&url, "eth_getBalance", json!([address.to_string(), "latest"]))
            .await?;
        U256::from_str_radix(hex.trim_start_matches("0x"), 16)
            .map_err(|e| LedgerError::Decode(format!("balance '{}': {}", hex, e)))
    }

    async fn base_fee(&self, ledger: Endpoint) -> Result<u128, LedgerError> {
        let url = self.network.evm_rpc_url(ledger);
        let hex: String = self.rpc_require(&url, "eth_baseFee", json!([])).await?;
        parse_quantity(&hex)
    }

    async fn suggested_priority_fee(&self, ledger: Endpoint) -> Result<u128, LedgerError> {
        let url = self.network.evm_rpc_url(ledger);
        let hex: String = self
            .rpc_require(&url, "eth_maxPriorityFeePerGas", json!([]))
            .await?;
        parse_quantity(&hex)
    }

    async fn eth_call(&self, ledger: Endpoint, to: Address, data: Bytes) -> Result<Bytes, LedgerError> {
        let url = self.network.evm_rpc_url(ledger);
        let hex: String = self
            .rpc_require(&url, "eth_call", json!([{ "to": to.to_string(), "data": format!("0x{}", hex::encode(&data)) }, "latest"]))
            .await?;
        Bytes::from_str(&hex).map_err(|e| LedgerError::Decode(format!("eth_call result: {}", e)))
    }

    async fn issue(&self, tx: &SignedTx) -> Result<TxId, LedgerError> {
        match &tx.payload {
            SignedPayload::Atomic { bytes, .. } => {
                let method = match Self::namespace(tx.ledger)? {
                    "platform" => "platform.issueTx",
                    "avm" => "avm.issueTx",
                    _ => "avax.issueTx",
                };
                let url = self.network.avalanche_api_url(tx.ledger);
                let result: IssueResult = self
                    .rpc_require(&url, method, json!({ "tx": encode_hex(bytes), "encoding": "hex" }))
                    .await?;
                TxId::from_str(&result.tx_id).map_err(|e| LedgerError::Decode(e.to_string()))
            }
            SignedPayload::Evm { raw, .. } => {
                let url = self.network.evm_rpc_url(tx.ledger);
                let hash: String = self
                    .rpc_require(
                        &url,
                        "eth_sendRawTransaction",
                        json!([format!("0x{}", hex::encode(raw))]),
                    )
                    .await?;
                TxId::from_str(&hash).map_err(|e| LedgerError::Decode(e.to_string()))
            }
        }
    }

    async fn status(&self, ledger: Endpoint, tx_id: &TxId) -> Result<TxStatus, LedgerError> {
        match tx_id {
            TxId::Avalanche(id) => {
                let (method, url) = match Self::namespace(ledger)? {
                    "platform" => ("platform.getTxStatus", self.network.avalanche_api_url(ledger)),
                    "avm" => ("avm.getTxStatus", self.network.avalanche_api_url(ledger)),
                    _ => ("avax.getAtomicTxStatus", self.network.avalanche_api_url(ledger)),
                };
                let result: StatusResult = self
                    .rpc_require(&url, method, json!({ "txID": id.to_cb58() }))
                    .await?;
                debug!(target: POLL_TARGET, tx_id = %id, status = %result.status, "Polled tx status");
                Ok(match result.status.as_str() {
                    "Committed" | "Accepted" => TxStatus::Accepted,
                    "Dropped" | "Rejected" => TxStatus::Rejected(
                        result.reason.unwrap_or_else(|| result.status.clone()),
                    ),
                    "Unknown" => TxStatus::Unknown,
                    _ => TxStatus::Pending,
                })
            }
            TxId::Evm(hash) => {
                let url = self.network.evm_rpc_url(ledger);
                let receipt: Option<Receipt> = self
                    .rpc_call(&url, "eth_getTransactionReceipt", json!([hash.to_string()]))
                    .await?;
                debug!(target: POLL_TARGET, tx_hash = %hash, mined = receipt.is_some(), "Polled receipt");
                let receipt_status = receipt.and_then(|r| r.status);
                if receipt_status.is_some() {
                    return evm_status(receipt_status.as_deref(), true);
                }
                // Not mined: still in the mempool, or dropped and never coming back
                let known: Option<serde_json::Value> = self
                    .rpc_call(&url, "eth_getTransactionByHash", json!([hash.to_string()]))
                    .await?;
                evm_status(None, known.is_some())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_quantity() {
        assert_eq!(parse_quantity("0x5d21dba000").unwrap(), 400_000_000_000);
        assert_eq!(parse_quantity("0x0").unwrap(), 0);
        assert!(parse_quantity("0xzz").is_err());
    }

    #[test]
    fn test_evm_status_mapping() {
        assert_eq!(evm_status(Some("0x1"), true).unwrap(), TxStatus::Accepted);
        assert!(matches!(evm_status(Some("0x0"), true).unwrap(), TxStatus::Rejected(_)));
        assert_eq!(evm_status(None, true).unwrap(), TxStatus::Pending);
        // Dropped from the mempool: rebuild instead of waiting again
        assert_eq!(evm_status(None, false).unwrap(), TxStatus::Unknown);
    }

    #[test]
    fn test_namespaces() {
        assert_eq!(RpcLedger::namespace(Endpoint::PChain).unwrap(), "platform");
        assert_eq!(RpcLedger::namespace(Endpoint::XChain).unwrap(), "avm");
        assert_eq!(RpcLedger::namespace(Endpoint::CChain).unwrap(), "avax");
        assert!(RpcLedger::namespace(Endpoint::Evm(crate::ids::Id([1u8; 32]))).is_err());
    }

    #[test]
    fn test_utxo_page_shape() {
        let page: UtxoPage = serde_json::from_value(json!({
            "numFetched": "1",
            "utxos": ["0x00"],
            "endIndex": { "address": "P-local1abc", "utxo": "xyz" },
            "encoding": "hex"
        }))
        .unwrap();
        assert_eq!(page.num_fetched, "1");
        assert_eq!(page.end_index.utxo, "xyz");
    }
}
