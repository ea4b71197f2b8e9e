//! Off-chain reporting of settled bridge transactions.
//!
//! Reporting is fire-and-forget: collectors log their own failures and never
//! hand them back to the orchestrator.

use async_trait::async_trait;
use parking_lot::Mutex;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, warn};

use crate::core::config::StatsConfig;
use crate::core::errors::{BridgeError, Result};
use crate::network::Direction;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransactionStatus {
    Success,
    Failed,
    Canceled,
}

/// Body posted to the stats endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BridgeStats {
    #[serde(rename = "type")]
    pub kind: Direction,
    pub network: String,
    pub token_symbol: String,
    pub token_address: String,
    pub token_decimals: u32,
    pub transaction_hash: String,
    pub transaction_status: TransactionStatus,
    pub block_number: Option<u64>,
    /// Amount in base units, as a decimal string.
    pub value: String,
}

#[async_trait]
pub trait StatsCollector: Send + Sync {
    async fn report(&self, stats: BridgeStats);
}

/// Drops every report.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopStatsCollector;

#[async_trait]
impl StatsCollector for NoopStatsCollector {
    async fn report(&self, stats: BridgeStats) {
        debug!(hash = %stats.transaction_hash, "stats reporting disabled");
    }
}

/// Keeps reports in memory.
#[derive(Debug, Default)]
pub struct RecordingStatsCollector {
    reports: Mutex<Vec<BridgeStats>>,
}

impl RecordingStatsCollector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reports(&self) -> Vec<BridgeStats> {
        self.reports.lock().clone()
    }
}

#[async_trait]
impl StatsCollector for RecordingStatsCollector {
    async fn report(&self, stats: BridgeStats) {
        self.reports.lock().push(stats);
    }
}

pub struct HttpStatsCollector {
    client: Client,
    endpoint: String,
}

impl HttpStatsCollector {
    pub fn new(endpoint: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| BridgeError::Config(format!("Failed to build stats client: {}", e)))?;
        Ok(Self { client, endpoint: endpoint.into() })
    }

    /// `None` when no endpoint is configured.
    pub fn from_config(config: &StatsConfig) -> Result<Option<Self>> {
        config
            .endpoint
            .as_ref()
            .map(|endpoint| Self::new(endpoint.clone(), Duration::from_millis(config.timeout_ms)))
            .transpose()
    }

    async fn post(&self, stats: &BridgeStats) -> Result<()> {
        let response = self
            .client
            .post(&self.endpoint)
            .json(stats)
            .send()
            .await
            .map_err(|e| BridgeError::Other(format!("stats request failed: {}", e)))?;
        if !response.status().is_success() {
            return Err(BridgeError::Other(format!("stats endpoint returned {}", response.status())));
        }
        Ok(())
    }
}

#[async_trait]
impl StatsCollector for HttpStatsCollector {
    async fn report(&self, stats: BridgeStats) {
        match self.post(&stats).await {
            Ok(()) => debug!(hash = %stats.transaction_hash, "stats reported"),
            Err(e) => warn!(hash = %stats.transaction_hash, error = %e, "stats reporting failed"),
        }
    }
}
