use ethers::types::Address;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::core::errors::{BridgeError, Result};

/// Env var naming a TOML config file.
pub const CONFIG_PATH_ENV: &str = "PORTAL_BRIDGE_CONFIG";
pub const L1_RPC_URL_ENV: &str = "PORTAL_BRIDGE_L1_RPC_URL";
pub const L2_RPC_URL_ENV: &str = "PORTAL_BRIDGE_L2_RPC_URL";
pub const STATS_ENDPOINT_ENV: &str = "PORTAL_BRIDGE_STATS_ENDPOINT";

/// Which bridge protocol family the L1/L2 pair speaks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FamilyKind {
    /// Optimistic-rollup style messenger + gateway bridge.
    Rollup,
    /// zk-rollup style mailbox bridge.
    Zk,
}

/// Blockchain network configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NetworkConfig {
    pub id: u64,
    pub name: String,
    pub rpc_url: String,
    #[serde(default)]
    pub block_explorer_url: String,
}

/// Gateway contract deployed on both sides for one gateway type.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct GatewayPair {
    pub l1: Address,
    pub l2: Address,
}

/// Contract addresses for the rollup family.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RollupContracts {
    pub l1_gateway_router: Address,
    pub l2_gateway_router: Address,
    pub l1_messenger: Address,
    pub l2_messenger: Address,
    /// L1 contract exposing `l2BaseFee()`.
    pub l2_gas_price_oracle: Address,
    /// L2 predeploy exposing `getL1Fee(bytes)`.
    #[serde(default = "RollupContracts::default_l1_gas_price_oracle")]
    pub l1_gas_price_oracle: Address,
    pub eth_gateway: GatewayPair,
    pub weth_gateway: GatewayPair,
    pub standard_erc20_gateway: GatewayPair,
    pub custom_erc20_gateway: GatewayPair,
    #[serde(default)]
    pub usdc_gateway: Option<GatewayPair>,
    #[serde(default)]
    pub dai_gateway: Option<GatewayPair>,
    /// L1 address of the wrapped native token.
    pub weth_l1: Address,
    #[serde(default)]
    pub usdc_l1: Option<Address>,
    #[serde(default)]
    pub dai_l1: Option<Address>,
    /// L1 addresses of tokens routed through the custom ERC-20 gateway.
    #[serde(default)]
    pub custom_tokens: Vec<Address>,
}

impl RollupContracts {
    fn default_l1_gas_price_oracle() -> Address {
        // L1GasPriceOracle predeploy, 0x5300..0002
        let mut bytes = [0u8; 20];
        bytes[0] = 0x53;
        bytes[19] = 0x02;
        Address::from(bytes)
    }
}

/// Contract addresses for the zk family.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ZkContracts {
    /// L1 diamond proxy (mailbox facet).
    pub l1_mailbox: Address,
    pub l1_erc20_bridge: Address,
    pub l2_erc20_bridge: Address,
    #[serde(default = "ZkContracts::default_l2_eth_token")]
    pub l2_eth_token: Address,
}

impl ZkContracts {
    fn default_l2_eth_token() -> Address {
        // L2 base token system contract
        Address::from_low_u64_be(0x800a)
    }
}

/// Orchestrator timing settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OrchestratorConfig {
    /// How long the caller waits for a receipt before the spinner is released.
    #[serde(default = "OrchestratorConfig::default_receipt_timeout_ms")]
    pub receipt_timeout_ms: u64,

    #[serde(default = "OrchestratorConfig::default_average_block_interval_ms")]
    pub average_block_interval_ms: u64,

    /// Finalization estimates beyond this horizon are recorded as unknown (0).
    #[serde(default = "OrchestratorConfig::default_max_estimate_horizon_ms")]
    pub max_estimate_horizon_ms: u64,
}

impl OrchestratorConfig {
    fn default_receipt_timeout_ms() -> u64 { 8_000 }
    fn default_average_block_interval_ms() -> u64 { 12_000 }
    fn default_max_estimate_horizon_ms() -> u64 { 30 * 60 * 1_000 }
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            receipt_timeout_ms: Self::default_receipt_timeout_ms(),
            average_block_interval_ms: Self::default_average_block_interval_ms(),
            max_estimate_horizon_ms: Self::default_max_estimate_horizon_ms(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FeeConfig {
    /// Quiet period before a quote refresh runs after input changes.
    #[serde(default = "FeeConfig::default_debounce_ms")]
    pub debounce_ms: u64,
}

impl FeeConfig {
    fn default_debounce_ms() -> u64 { 500 }
}

impl Default for FeeConfig {
    fn default() -> Self {
        Self { debounce_ms: Self::default_debounce_ms() }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StatsConfig {
    #[serde(default)]
    pub endpoint: Option<String>,
    #[serde(default = "StatsConfig::default_timeout_ms")]
    pub timeout_ms: u64,
}

impl StatsConfig {
    fn default_timeout_ms() -> u64 { 5_000 }
}

impl Default for StatsConfig {
    fn default() -> Self {
        Self { endpoint: None, timeout_ms: Self::default_timeout_ms() }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct StoreConfig {
    /// JSON snapshot location; the ledger is memory-only when unset.
    #[serde(default)]
    pub path: Option<PathBuf>,
}

/// Bridge configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BridgeConfig {
    pub family: FamilyKind,
    pub l1: NetworkConfig,
    pub l2: NetworkConfig,
    #[serde(default)]
    pub rollup: Option<RollupContracts>,
    #[serde(default)]
    pub zk: Option<ZkContracts>,
    #[serde(default)]
    pub orchestrator: OrchestratorConfig,
    #[serde(default)]
    pub fees: FeeConfig,
    #[serde(default)]
    pub stats: StatsConfig,
    #[serde(default)]
    pub store: StoreConfig,
}

impl BridgeConfig {
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: BridgeConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            BridgeError::Config(format!("Failed to read {}: {}", path.display(), e))
        })?;
        let mut config: BridgeConfig = toml::from_str(&content)?;
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Loads the file named by `PORTAL_BRIDGE_CONFIG` and applies env overrides.
    pub fn from_env() -> Result<Self> {
        let path = std::env::var(CONFIG_PATH_ENV)
            .map_err(|_| BridgeError::Config(format!("{} is not set", CONFIG_PATH_ENV)))?;
        Self::from_path(path)
    }

    pub fn apply_env_overrides(&mut self) {
        if let Ok(url) = std::env::var(L1_RPC_URL_ENV) {
            self.l1.rpc_url = url.trim().to_string();
        }
        if let Ok(url) = std::env::var(L2_RPC_URL_ENV) {
            self.l2.rpc_url = url.trim().to_string();
        }
        if let Ok(endpoint) = std::env::var(STATS_ENDPOINT_ENV) {
            let endpoint = endpoint.trim();
            self.stats.endpoint = (!endpoint.is_empty()).then(|| endpoint.to_string());
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.l1.id == self.l2.id {
            return Err(BridgeError::Config(format!(
                "l1 and l2 must be different chains (both are {})",
                self.l1.id
            )));
        }
        for network in [&self.l1, &self.l2] {
            reqwest::Url::parse(network.rpc_url.trim()).map_err(|e| {
                BridgeError::Config(format!(
                    "Invalid RPC URL '{}' for {}: {}",
                    network.rpc_url, network.name, e
                ))
            })?;
        }
        match self.family {
            FamilyKind::Rollup if self.rollup.is_none() => {
                Err(BridgeError::Config("family = \"rollup\" requires a [rollup] section".into()))
            }
            FamilyKind::Zk if self.zk.is_none() => {
                Err(BridgeError::Config("family = \"zk\" requires a [zk] section".into()))
            }
            _ => Ok(()),
        }
    }
}
