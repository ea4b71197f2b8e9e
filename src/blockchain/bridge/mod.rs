// src/blockchain/bridge/mod.rs

pub mod family;
pub mod orchestrator;
pub mod rollup;
pub mod state;
pub mod zk;

use std::sync::Arc;
use tracing::info;

use crate::blockchain::traits::{PublicClient, ZkSyncRpc};
use crate::core::config::{BridgeConfig, FamilyKind};
use crate::core::errors::{BridgeError, Result};

pub use family::{BridgeCall, BridgeFamily};
pub use orchestrator::{
    OrchestratorParts, SendOutcome, SendRequest, Settlement, SkipReason, TransactionOrchestrator, TxData,
};
pub use rollup::{GatewayType, RollupFamily};
pub use state::{TxEvent, TxMachine, TxState};
pub use zk::ZkFamily;

/// Builds the fee/call strategy named by `config.family`.
///
/// `zk_rpc` is only consulted by the zk family.
pub fn family_from_config(
    config: &BridgeConfig,
    l1: Arc<dyn PublicClient>,
    l2: Arc<dyn PublicClient>,
    zk_rpc: Arc<dyn ZkSyncRpc>,
) -> Result<Arc<dyn BridgeFamily>> {
    info!(family = ?config.family, l1 = config.l1.id, l2 = config.l2.id, "selecting bridge family");
    match config.family {
        FamilyKind::Rollup => {
            let contracts = config
                .rollup
                .clone()
                .ok_or_else(|| BridgeError::Config("missing [rollup] contracts".into()))?;
            Ok(Arc::new(RollupFamily::new(contracts, l1, l2)))
        }
        FamilyKind::Zk => {
            let contracts =
                config.zk.clone().ok_or_else(|| BridgeError::Config("missing [zk] contracts".into()))?;
            Ok(Arc::new(ZkFamily::new(contracts, l1, l2, zk_rpc)))
        }
    }
}
