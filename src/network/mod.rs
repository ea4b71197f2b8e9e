//! Resolves which of the paired networks is the source and destination of a
//! transfer, and whether the connected wallet sits on the right one.

use serde::{Deserialize, Serialize};

use crate::core::config::{BridgeConfig, NetworkConfig};

/// A chain participating in a bridge pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Network {
    pub id: u64,
    pub name: String,
    pub is_l2: bool,
    pub rpc_url: String,
    pub block_explorer_url: String,
}

impl Network {
    pub fn from_config(config: &NetworkConfig, is_l2: bool) -> Self {
        Self {
            id: config.id,
            name: config.name.clone(),
            is_l2,
            rpc_url: config.rpc_url.clone(),
            block_explorer_url: config.block_explorer_url.clone(),
        }
    }

    /// Explorer link for a transaction hash, or an empty string without an explorer.
    pub fn tx_url(&self, hash: &str) -> String {
        if self.block_explorer_url.is_empty() {
            return String::new();
        }
        format!("{}/tx/{}", self.block_explorer_url.trim_end_matches('/'), hash)
    }
}

/// Transfer direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    /// L1 -> L2
    Deposit,
    /// L2 -> L1
    Withdraw,
}

impl Direction {
    pub fn from_is_deposit(is_deposit: bool) -> Self {
        if is_deposit {
            Direction::Deposit
        } else {
            Direction::Withdraw
        }
    }

    pub fn is_deposit(self) -> bool {
        self == Direction::Deposit
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Direction::Deposit => "deposit",
            Direction::Withdraw => "withdraw",
        }
    }
}

/// Source and destination of a transfer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Route {
    pub from_network: Network,
    pub to_network: Network,
}

/// Active {fromNetwork, toNetwork, l1Network, l2Network, direction} tuple.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetworkContext {
    pub l1: Network,
    pub l2: Network,
    pub direction: Direction,
}

impl NetworkContext {
    pub fn new(l1: Network, l2: Network, direction: Direction) -> Self {
        Self { l1, l2, direction }
    }

    pub fn from_config(config: &BridgeConfig, direction: Direction) -> Self {
        Self::new(
            Network::from_config(&config.l1, false),
            Network::from_config(&config.l2, true),
            direction,
        )
    }

    /// deposit: L1 -> L2, withdraw: L2 -> L1.
    pub fn resolve_direction(&self, is_deposit: bool) -> Route {
        if is_deposit {
            Route { from_network: self.l1.clone(), to_network: self.l2.clone() }
        } else {
            Route { from_network: self.l2.clone(), to_network: self.l1.clone() }
        }
    }

    pub fn set_direction(&mut self, direction: Direction) {
        self.direction = direction;
    }

    pub fn from_network(&self) -> &Network {
        match self.direction {
            Direction::Deposit => &self.l1,
            Direction::Withdraw => &self.l2,
        }
    }

    pub fn to_network(&self) -> &Network {
        match self.direction {
            Direction::Deposit => &self.l2,
            Direction::Withdraw => &self.l1,
        }
    }

    /// True iff the wallet's connected chain is the source network.
    pub fn is_correct_network_set(&self, wallet_chain_id: u64) -> bool {
        wallet_chain_id == self.from_network().id
    }
}
