use serde::Deserialize;
use std::fs;
use std::str::FromStr;
use std::time::Duration;

use alloy::primitives::Address;
use thiserror::Error;

use crate::fee::{FeeSchedule, GasPolicy};
use crate::ids::Id;
use crate::transfer::types::{BridgeRoute, Endpoint};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },

    #[error("Failed to parse config yaml: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("Invalid config: {0}")]
    Invalid(String),
}

#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    pub log_level: String,
    pub log_dir: String,
    pub log_file: String,
    pub use_json: bool,
    pub rotation: String,
    /// Emit per-poll debug events from the hop engine
    #[serde(default)]
    pub enable_tracing: bool,
    pub network: NetworkContext,
    #[serde(default)]
    pub fees: FeeSchedule,
    #[serde(default)]
    pub gas: GasPolicy,
    #[serde(default)]
    pub engine: EngineConfig,
    #[serde(default)]
    pub bridges: Vec<BridgeConfig>,
}

/// Primary network identity and endpoints
#[derive(Debug, Deserialize, Clone)]
pub struct NetworkContext {
    pub name: String,
    pub network_id: u32,
    /// Bech32 human-readable part (`avax`, `fuji`, `local`)
    pub hrp: String,
    /// Base URL of the node API, e.g. `http://127.0.0.1:9650`
    pub rpc_url: String,
    pub avax_asset_id: Id,
    #[serde(default)]
    pub p_chain_id: Id,
    pub x_chain_id: Id,
    pub c_chain_id: Id,
    #[serde(default)]
    pub evm_chains: Vec<EvmChainConfig>,
}

/// Additional EVM blockchain reachable over a bridge
#[derive(Debug, Deserialize, Clone)]
pub struct EvmChainConfig {
    pub name: String,
    pub blockchain_id: Id,
    /// Defaults to `<rpc_url>/ext/bc/<blockchain_id>/rpc`
    #[serde(default)]
    pub rpc_url: Option<String>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct BridgeConfig {
    pub source: String,
    pub destination: String,
    pub origin_bridge: String,
    pub destination_bridge: String,
}

impl BridgeConfig {
    pub fn resolve(&self, network: &NetworkContext) -> Result<(Endpoint, Endpoint, BridgeRoute), ConfigError> {
        let source = network.parse_endpoint(&self.source)?;
        let destination = network.parse_endpoint(&self.destination)?;
        let parse = |s: &str| {
            Address::from_str(s).map_err(|e| ConfigError::Invalid(format!("bridge address '{}': {}", s, e)))
        };
        Ok((
            source,
            destination,
            BridgeRoute {
                origin: parse(&self.origin_bridge)?,
                destination: parse(&self.destination_bridge)?,
            },
        ))
    }
}

/// Hop engine timing and gas limits
#[derive(Debug, Deserialize, Clone)]
pub struct EngineConfig {
    /// Max wait for one transaction to be accepted
    pub submit_timeout_ms: u64,
    pub poll_interval_ms: u64,
    /// Pause between accepted hops so indexers catch up
    pub settle_delay_ms: u64,
    /// Max wait for exported funds to show up before an import
    pub utxo_wait_ms: u64,
    pub bridge_gas_limit: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            submit_timeout_ms: 60_000,
            poll_interval_ms: 1_000,
            settle_delay_ms: 2_000,
            utxo_wait_ms: 30_000,
            bridge_gas_limit: 500_000,
        }
    }
}

impl EngineConfig {
    pub fn submit_timeout(&self) -> Duration {
        Duration::from_millis(self.submit_timeout_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settle_delay_ms)
    }

    pub fn utxo_wait(&self) -> Duration {
        Duration::from_millis(self.utxo_wait_ms)
    }
}

impl NetworkContext {
    /// Blockchain ID of an endpoint
    pub fn chain_id(&self, endpoint: Endpoint) -> Id {
        match endpoint {
            Endpoint::PChain => self.p_chain_id,
            Endpoint::XChain => self.x_chain_id,
            Endpoint::CChain => self.c_chain_id,
            Endpoint::Evm(id) => id,
        }
    }

    /// Endpoint for a blockchain ID; the C-Chain ID maps to `CChain`
    pub fn endpoint_of(&self, id: Id) -> Endpoint {
        if id == self.p_chain_id {
            Endpoint::PChain
        } else if id == self.x_chain_id {
            Endpoint::XChain
        } else if id == self.c_chain_id {
            Endpoint::CChain
        } else {
            Endpoint::Evm(id)
        }
    }

    /// Parse `P`/`X`/`C`, a configured EVM chain name or a blockchain ID
    pub fn parse_endpoint(&self, text: &str) -> Result<Endpoint, ConfigError> {
        if let Some(chain) = self.evm_chains.iter().find(|c| c.name.eq_ignore_ascii_case(text)) {
            return Ok(self.endpoint_of(chain.blockchain_id));
        }
        let endpoint = Endpoint::from_str(text).map_err(|e| ConfigError::Invalid(e.to_string()))?;
        Ok(match endpoint {
            Endpoint::Evm(id) => self.endpoint_of(id),
            other => other,
        })
    }

    /// JSON-RPC URL of an EVM endpoint
    pub fn evm_rpc_url(&self, endpoint: Endpoint) -> String {
        let base = self.rpc_url.trim_end_matches('/');
        match endpoint {
            Endpoint::Evm(id) => self
                .evm_chains
                .iter()
                .find(|c| c.blockchain_id == id)
                .and_then(|c| c.rpc_url.clone())
                .unwrap_or_else(|| format!("{}/ext/bc/{}/rpc", base, id)),
            _ => format!("{}/ext/bc/C/rpc", base),
        }
    }

    /// Avalanche-API URL of a primary network chain
    pub fn avalanche_api_url(&self, endpoint: Endpoint) -> String {
        let base = self.rpc_url.trim_end_matches('/');
        match endpoint {
            Endpoint::PChain => format!("{}/ext/bc/P", base),
            Endpoint::XChain => format!("{}/ext/bc/X", base),
            _ => format!("{}/ext/bc/C/avax", base),
        }
    }
}

impl AppConfig {
    pub fn load(env: &str) -> Result<Self, ConfigError> {
        let config_path = format!("config/{}.yaml", env);
        let content = fs::read_to_string(&config_path).map_err(|source| ConfigError::Read {
            path: config_path.clone(),
            source,
        })?;
        Self::from_yaml(&content)
    }

    pub fn from_yaml(content: &str) -> Result<Self, ConfigError> {
        let config: AppConfig = serde_yaml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.engine.poll_interval_ms == 0 {
            return Err(ConfigError::Invalid("engine.poll_interval_ms must be > 0".into()));
        }
        if self.gas.base_fee_multiplier_pct < 100 {
            return Err(ConfigError::Invalid(
                "gas.base_fee_multiplier_pct must be >= 100".into(),
            ));
        }
        for bridge in &self.bridges {
            bridge.resolve(&self.network)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
log_level: info
log_dir: ./logs
log_file: hop-transfer.log
use_json: false
rotation: daily
network:
  name: local
  network_id: 12345
  hrp: local
  rpc_url: http://127.0.0.1:9650/
  avax_asset_id: 2fombhL7aGPwj3KH4bfrmJwW6PVnMobf9Y2fn9GwxiAAJyFDbe
  x_chain_id: 2eNy1mUFdmaxXNj1eQHUe7Np4gju9sJsEtWQ4MX3ToiNKuADed
  c_chain_id: 2CA6j5zYzasynPsFeNoqWkmTCt3VScMvXUZHbfDJ8k3oGzAPtU
fees:
  p_chain_tx_fee: 1000000
  x_chain_tx_fee: 1000000
  c_chain_atomic_budget: 2000000
"#;

    #[test]
    fn test_parse_sample_with_defaults() {
        let config = AppConfig::from_yaml(SAMPLE).unwrap();
        assert_eq!(config.network.network_id, 12345);
        assert!(config.network.p_chain_id.is_empty());
        assert_eq!(config.fees.c_chain_atomic_budget, 2_000_000);
        assert_eq!(config.engine.settle_delay_ms, 2_000);
        assert!(config.bridges.is_empty());
    }

    #[test]
    fn test_endpoint_lookup() {
        let config = AppConfig::from_yaml(SAMPLE).unwrap();
        let net = &config.network;
        assert_eq!(net.endpoint_of(net.c_chain_id), Endpoint::CChain);
        assert_eq!(
            net.parse_endpoint(&net.c_chain_id.to_cb58()).unwrap(),
            Endpoint::CChain
        );
        assert_eq!(net.avalanche_api_url(Endpoint::PChain), "http://127.0.0.1:9650/ext/bc/P");
        assert_eq!(net.evm_rpc_url(Endpoint::CChain), "http://127.0.0.1:9650/ext/bc/C/rpc");
    }

    #[test]
    fn test_invalid_bridge_rejected() {
        let yaml = format!(
            "{}bridges:\n  - source: C\n    destination: C\n    origin_bridge: nope\n    destination_bridge: nope\n",
            SAMPLE
        );
        assert!(matches!(
            AppConfig::from_yaml(&yaml),
            Err(ConfigError::Invalid(_))
        ));
    }

    #[test]
    fn test_missing_file() {
        assert!(matches!(
            AppConfig::load("does-not-exist"),
            Err(ConfigError::Read { .. })
        ));
    }
}
