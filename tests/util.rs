// tests/util.rs
// Shared helpers for the orchestrator integration tests
#![allow(dead_code)]

use ethers::types::{Address, Bytes, H256, U256};
use std::sync::Arc;

use portal_bridge::blockchain::bridge::{family_from_config, BridgeFamily, OrchestratorParts, SendRequest, TransactionOrchestrator};
use portal_bridge::blockchain::mock::{demo_rollup_contracts, demo_zk_contracts, MockChain};
use portal_bridge::core::config::{BridgeConfig, FamilyKind, NetworkConfig, OrchestratorConfig};
use portal_bridge::fee::{FeeService, FeeStore};
use portal_bridge::network::{Direction, NetworkContext};
use portal_bridge::stats::{RecordingStatsCollector, StatsCollector};
use portal_bridge::storage::LocalTxStore;
use portal_bridge::token::{Token, TokenSelection};

pub const ACCOUNT: u64 = 0xa11ce;
pub const L1_ID: u64 = 1;
pub const ROLLUP_L2_ID: u64 = 534352;
pub const ZK_L2_ID: u64 = 324;
pub const USDC_L2: u64 = 0xc2c2;

/// Hash the mock wallet hands out for its `n`-th write (0-based).
pub fn nth_hash(n: u64) -> H256 {
    H256::from_low_u64_be(0x1000 + n)
}

pub fn account() -> Address {
    Address::from_low_u64_be(ACCOUNT)
}

pub fn word(value: impl Into<U256>) -> Bytes {
    Bytes::from(ethers::abi::encode(&[ethers::abi::Token::Uint(value.into())]))
}

pub fn ether(whole: u64) -> U256 {
    U256::from(whole) * U256::exp10(18)
}

pub fn test_config(family: FamilyKind) -> BridgeConfig {
    let l2_id = match family {
        FamilyKind::Rollup => ROLLUP_L2_ID,
        FamilyKind::Zk => ZK_L2_ID,
    };
    BridgeConfig {
        family,
        l1: NetworkConfig {
            id: L1_ID,
            name: "Ethereum".into(),
            rpc_url: "http://127.0.0.1:8545".into(),
            block_explorer_url: "https://etherscan.io".into(),
        },
        l2: NetworkConfig {
            id: l2_id,
            name: "L2".into(),
            rpc_url: "http://127.0.0.1:8546".into(),
            block_explorer_url: String::new(),
        },
        rollup: (family == FamilyKind::Rollup).then(demo_rollup_contracts),
        zk: (family == FamilyKind::Zk).then(demo_zk_contracts),
        orchestrator: OrchestratorConfig::default(),
        fees: Default::default(),
        stats: Default::default(),
        store: Default::default(),
    }
}

/// Two scripted chains wired into an orchestrator. The wallet is the source
/// chain of `direction`, so receipts scripted on `source()` apply to sends.
pub struct Harness {
    pub config: BridgeConfig,
    pub direction: Direction,
    pub l1: Arc<MockChain>,
    pub l2: Arc<MockChain>,
    pub family: Arc<dyn BridgeFamily>,
    pub fees: Arc<FeeService>,
    pub stats: Arc<RecordingStatsCollector>,
    pub orchestrator: TransactionOrchestrator,
}

impl Harness {
    pub fn new(family: FamilyKind, direction: Direction) -> Self {
        Self::with_store(family, direction, LocalTxStore::in_memory())
    }

    pub fn with_store(family: FamilyKind, direction: Direction, store: LocalTxStore) -> Self {
        Self::build(family, direction, store, None)
    }

    /// Reports go to `collector`; `stats` stays empty.
    pub fn with_collector(family: FamilyKind, direction: Direction, collector: Arc<dyn StatsCollector>) -> Self {
        Self::build(family, direction, LocalTxStore::in_memory(), Some(collector))
    }

    fn build(
        family: FamilyKind,
        direction: Direction,
        store: LocalTxStore,
        collector: Option<Arc<dyn StatsCollector>>,
    ) -> Self {
        let config = test_config(family);
        let l1 = Arc::new(MockChain::new(config.l1.id, account()));
        let l2 = Arc::new(MockChain::new(config.l2.id, account()));
        prime(&config, &l1, &l2);

        let family = family_from_config(&config, l1.clone(), l2.clone(), l2.clone()).unwrap();
        let fees = Arc::new(FeeService::new(family.clone(), FeeStore::new()));
        let stats = Arc::new(RecordingStatsCollector::new());
        let wallet = if direction == Direction::Deposit { l1.clone() } else { l2.clone() };
        let orchestrator = TransactionOrchestrator::new(OrchestratorParts {
            family: family.clone(),
            fees: fees.clone(),
            networks: NetworkContext::from_config(&config, direction),
            l1: l1.clone(),
            l2: l2.clone(),
            wallet,
            store: Arc::new(store),
            stats: collector.unwrap_or_else(|| stats.clone() as Arc<dyn StatsCollector>),
            config: config.orchestrator.clone(),
        });
        Self { config, direction, l1, l2, family, fees, stats, orchestrator }
    }

    pub fn source(&self) -> &Arc<MockChain> {
        match self.direction {
            Direction::Deposit => &self.l1,
            Direction::Withdraw => &self.l2,
        }
    }

    pub fn eth(&self) -> Token {
        Token::native("ETH", self.config.l2.id)
    }

    /// USDC as seen from the source chain, with an unlimited allowance on both sides.
    pub fn usdc(&self) -> Token {
        let l1_address = self
            .config
            .rollup
            .as_ref()
            .and_then(|r| r.usdc_l1)
            .unwrap_or_else(|| Address::from_low_u64_be(0xc1c1));
        let token = Token::erc20("USDC", "USD Coin", 6, l1_address, Address::from_low_u64_be(USDC_L2), self.config.l2.id);
        self.set_allowance(&token, U256::MAX);
        self.l2.set_bytecode(token.l2_address, vec![0x60, 0x80]);
        let context = NetworkContext::from_config(&self.config, self.direction);
        token.viewed_from(context.from_network())
    }

    pub fn set_allowance(&self, token: &Token, allowance: U256) {
        self.l1.set_uint_response(token.l1_address, "allowance(address,address)", allowance);
        self.l2.set_uint_response(token.l2_address, "allowance(address,address)", allowance);
    }

    pub fn request(&self, token: Token, amount: &str) -> SendRequest {
        SendRequest {
            direction: self.direction,
            selection: TokenSelection::new(token).with_amount(amount),
            recipient: None,
        }
    }

    pub fn store(&self) -> &LocalTxStore {
        self.orchestrator.store()
    }
}

/// Answers the oracle reads both families make while quoting.
fn prime(config: &BridgeConfig, l1: &MockChain, l2: &MockChain) {
    if let Some(rollup) = &config.rollup {
        l1.set_uint_response(rollup.l2_gas_price_oracle, "l2BaseFee()", U256::from(1_000_000_000u64));
        l2.set_uint_response(rollup.l1_gas_price_oracle, "getL1Fee(bytes)", U256::from(31_337u64));
    }
    if let Some(zk) = &config.zk {
        l1.set_uint_response(
            zk.l1_mailbox,
            "l2TransactionBaseCost(uint256,uint256,uint256)",
            U256::from(250_000_000_000_000u64),
        );
    }
}
