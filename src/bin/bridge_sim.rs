// src/bin/bridge_sim.rs
//! Drives the orchestrator end to end against scripted in-memory chains and
//! prints the resulting ledger.

use anyhow::{bail, Result};
use clap::{Parser, ValueEnum};
use ethers::types::{Address, Bytes, H256, U256};
use futures::future::join_all;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use portal_bridge::blockchain::bridge::{
    family_from_config, OrchestratorParts, SendOutcome, SendRequest, TransactionOrchestrator,
};
use portal_bridge::blockchain::mock::{demo_rollup_contracts, demo_zk_contracts, MockChain, ReceiptScript};
use portal_bridge::blockchain::traits::{PublicClient, ReceiptStatus, ReplacementReceipt, WalletClient};
use portal_bridge::core::config::{BridgeConfig, FamilyKind, NetworkConfig};
use portal_bridge::core::validation::parse_ethereum_address;
use portal_bridge::fee::{FeeService, FeeStore};
use portal_bridge::network::{Direction, NetworkContext};
use portal_bridge::stats::{HttpStatsCollector, NoopStatsCollector, StatsCollector};
use portal_bridge::storage::LocalTxStore;
use portal_bridge::token::{Token, TokenSelection};

#[derive(Parser)]
#[clap(name = "bridge-sim", about = "Simulate bridge transfers against scripted chains")]
struct Cli {
    #[clap(long, value_enum, default_value = "rollup")]
    family: FamilyArg,

    #[clap(long, value_enum, default_value = "deposit")]
    direction: DirectionArg,

    /// Token to move
    #[clap(long, value_enum, default_value = "eth")]
    token: TokenArg,

    /// Amount in whole units
    #[clap(long, default_value = "0.1")]
    amount: String,

    /// How the receipt of the bridge transaction resolves
    #[clap(long, value_enum, default_value = "success")]
    outcome: OutcomeArg,

    /// Delay before the receipt resolves
    #[clap(long, default_value = "500")]
    delay_ms: u64,

    /// Number of simultaneous sends; all but one are expected to be skipped
    #[clap(long, default_value = "1")]
    concurrent: usize,

    /// Recipient on the destination chain; defaults to the sender
    #[clap(long)]
    recipient: Option<String>,

    /// Persist the ledger to this JSON file
    #[clap(long)]
    ledger: Option<PathBuf>,

    /// Post settlement stats to this endpoint
    #[clap(long)]
    stats_endpoint: Option<String>,
}

#[derive(Clone, Copy, ValueEnum)]
enum FamilyArg {
    Rollup,
    Zk,
}

#[derive(Clone, Copy, ValueEnum)]
enum DirectionArg {
    Deposit,
    Withdraw,
}

#[derive(Clone, Copy, ValueEnum)]
enum TokenArg {
    Eth,
    Usdc,
}

#[derive(Clone, Copy, ValueEnum)]
enum OutcomeArg {
    Success,
    Revert,
    Replaced,
    Cancelled,
}

const L1_CHAIN_ID: u64 = 1;
const ACCOUNT: u64 = 0xa11ce;

fn init_logging() -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = FmtSubscriber::builder().with_env_filter(filter).with_writer(std::io::stderr).finish();
    tracing::subscriber::set_global_default(subscriber)?;
    Ok(())
}

fn sim_config(family: FamilyKind) -> BridgeConfig {
    let (l2_id, l2_name) = match family {
        FamilyKind::Rollup => (534352, "Scroll"),
        FamilyKind::Zk => (324, "zkSync Era"),
    };
    BridgeConfig {
        family,
        l1: NetworkConfig {
            id: L1_CHAIN_ID,
            name: "Ethereum".into(),
            rpc_url: "http://127.0.0.1:8545".into(),
            block_explorer_url: "https://etherscan.io".into(),
        },
        l2: NetworkConfig {
            id: l2_id,
            name: l2_name.into(),
            rpc_url: "http://127.0.0.1:8546".into(),
            block_explorer_url: String::new(),
        },
        rollup: (family == FamilyKind::Rollup).then(demo_rollup_contracts),
        zk: (family == FamilyKind::Zk).then(demo_zk_contracts),
        orchestrator: Default::default(),
        fees: Default::default(),
        stats: Default::default(),
        store: Default::default(),
    }
}

/// Answers every read the chosen family makes while quoting.
fn prime_chains(config: &BridgeConfig, l1: &MockChain, l2: &MockChain, token: &Token) {
    let word = |v: u64| Bytes::from(ethers::abi::encode(&[ethers::abi::Token::Uint(U256::from(v))]));
    if let Some(rollup) = &config.rollup {
        l1.set_call_response(rollup.l2_gas_price_oracle, "l2BaseFee()", Ok(word(1_000_000_000)));
        l2.set_call_response(rollup.l1_gas_price_oracle, "getL1Fee(bytes)", Ok(word(42_000_000_000)));
    }
    if let Some(zk) = &config.zk {
        l1.set_call_response(zk.l1_mailbox, "l2TransactionBaseCost(uint256,uint256,uint256)", Ok(word(250_000_000_000_000)));
    }
    if !token.native {
        l2.set_bytecode(token.l2_address, vec![0x60, 0x80]);
        for chain in [l1, l2] {
            chain.set_call_response(token.address, "allowance(address,address)", Ok(word(u64::MAX)));
            chain.set_call_response(token.l2_address, "allowance(address,address)", Ok(word(u64::MAX)));
        }
    }
}

fn receipt_script(outcome: OutcomeArg) -> ReceiptScript {
    let replacement = |status| ReplacementReceipt { hash: H256::from_low_u64_be(0xbeef), block_number: 101, status };
    match outcome {
        OutcomeArg::Success => ReceiptScript::Success { block_number: 101 },
        OutcomeArg::Revert => ReceiptScript::Reverted { block_number: 101 },
        OutcomeArg::Replaced => {
            ReceiptScript::Replaced { cancelled: false, replacement: replacement(ReceiptStatus::Success) }
        }
        OutcomeArg::Cancelled => {
            ReceiptScript::Replaced { cancelled: true, replacement: replacement(ReceiptStatus::Success) }
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    init_logging()?;
    let cli = Cli::parse();
    if cli.concurrent == 0 {
        bail!("--concurrent must be at least 1");
    }

    let family_kind = match cli.family {
        FamilyArg::Rollup => FamilyKind::Rollup,
        FamilyArg::Zk => FamilyKind::Zk,
    };
    let direction = match cli.direction {
        DirectionArg::Deposit => Direction::Deposit,
        DirectionArg::Withdraw => Direction::Withdraw,
    };
    let mut config = sim_config(family_kind);
    config.stats.endpoint = cli.stats_endpoint.clone();
    config.validate()?;

    let account = Address::from_low_u64_be(ACCOUNT);
    let l1 = Arc::new(MockChain::new(config.l1.id, account));
    let l2 = Arc::new(MockChain::new(config.l2.id, account));
    let networks = NetworkContext::from_config(&config, direction);

    let token = match cli.token {
        TokenArg::Eth => Token::native("ETH", config.l2.id),
        TokenArg::Usdc => Token::erc20(
            "USDC",
            "USD Coin",
            6,
            config.rollup.as_ref().and_then(|r| r.usdc_l1).unwrap_or(Address::from_low_u64_be(0xc1c1)),
            Address::from_low_u64_be(0xc2c2),
            config.l2.id,
        ),
    }
    .viewed_from(networks.from_network());
    prime_chains(&config, &l1, &l2, &token);

    let source = if direction.is_deposit() { l1.clone() } else { l2.clone() };
    source.push_receipt(receipt_script(cli.outcome), Duration::from_millis(cli.delay_ms));

    let family = family_from_config(&config, l1.clone(), l2.clone(), l2.clone())?;
    let store = match &cli.ledger {
        Some(path) => LocalTxStore::with_persistence(path)?,
        None => LocalTxStore::in_memory(),
    };
    let stats: Arc<dyn StatsCollector> = match HttpStatsCollector::from_config(&config.stats)? {
        Some(collector) => Arc::new(collector),
        None => Arc::new(NoopStatsCollector),
    };
    let wallet: Arc<dyn WalletClient> = source.clone();
    let orchestrator = TransactionOrchestrator::new(OrchestratorParts {
        fees: Arc::new(FeeService::new(family.clone(), FeeStore::new())),
        family,
        networks,
        l1: l1.clone() as Arc<dyn PublicClient>,
        l2: l2.clone() as Arc<dyn PublicClient>,
        wallet,
        store: Arc::new(store),
        stats,
        config: config.orchestrator.clone(),
    });

    let recipient = cli.recipient.as_deref().map(parse_ethereum_address).transpose()?;
    let request = SendRequest {
        direction,
        selection: TokenSelection::new(token).with_amount(cli.amount.clone()),
        recipient,
    };
    let outcomes = join_all((0..cli.concurrent).map(|_| orchestrator.send_transaction(request.clone()))).await;

    for outcome in outcomes {
        match outcome {
            Ok(SendOutcome::Pending { hash }) => {
                info!(?hash, "waiting for background reconciliation");
                let settlement = orchestrator.wait_for_reconciliation(hash).await?;
                info!(?settlement, "reconciled");
            }
            Ok(outcome) => info!(?outcome, "send finished"),
            Err(e) => warn!(error = %e, "send failed"),
        }
    }

    orchestrator.flush_stats().await;

    let store = orchestrator.store();
    let report = serde_json::json!({
        "state": orchestrator.state(direction),
        "txData": orchestrator.tx_data(),
        "txError": orchestrator.tx_error(),
        "transactions": store.transactions(account),
        "abnormalTransactions": store.abnormal_transactions(account),
        "orderedTxs": store.ordered_txs(account),
        "writes": source.writes().iter().map(|w| serde_json::json!({
            "function": w.function_name,
            "to": w.address,
            "value": w.value.to_string(),
        })).collect::<Vec<_>>(),
    });
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}
