//! Scriptable in-memory chain used by tests and the `bridge-sim` binary.
//!
//! One `MockChain` plays both the read side and the wallet of a single chain.
//! Each `write_contract` takes the next scripted receipt outcome from a queue and
//! binds it to the hash it hands out, so a test scripts outcomes in send order.

use async_trait::async_trait;
use ethers::types::{Address, Bytes, H256, U256};
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::time::Duration;
use tracing::debug;

use super::traits::{
    BlockHeader, CallRequest, ChainError, ContractWrite, FeeData, FeeType, PublicClient, ReceiptStatus,
    ReplacementReceipt, TxReceipt, WalletClient, ZkSyncRpc,
};
use crate::core::abi::selector_from_signature;
use crate::core::config::{GatewayPair, RollupContracts, ZkContracts};

/// What `wait_for_transaction_receipt` does for one submitted hash.
#[derive(Debug, Clone, PartialEq)]
pub enum ReceiptScript {
    Success { block_number: u64 },
    Reverted { block_number: u64 },
    Replaced { cancelled: bool, replacement: ReplacementReceipt },
    Error(ChainError),
    /// Never resolves.
    Pending,
}

#[derive(Debug, Clone)]
struct ScriptedReceipt {
    script: ReceiptScript,
    delay: Duration,
}

#[derive(Debug)]
struct MockState {
    writes: Vec<ContractWrite>,
    write_error: Option<ChainError>,
    next_hash: u64,
    queued_receipts: VecDeque<ScriptedReceipt>,
    bound_receipts: HashMap<H256, ScriptedReceipt>,
    estimate_gas: Result<U256, ChainError>,
    estimate_gas_calls: Vec<CallRequest>,
    zk_estimate: Result<U256, ChainError>,
    zk_estimate_calls: Vec<CallRequest>,
    bytecode: HashMap<Address, Bytes>,
    call_responses: HashMap<(Address, [u8; 4]), Result<Bytes, ChainError>>,
    calls: Vec<CallRequest>,
    fee_data: FeeData,
    legacy_gas_price: U256,
    block_number: u64,
    finalized_block: u64,
    block_timestamps: HashMap<u64, u64>,
    default_timestamp: u64,
    balances: HashMap<Address, U256>,
    nonce: u64,
}

pub struct MockChain {
    chain_id: u64,
    account: Address,
    state: Mutex<MockState>,
}

impl MockChain {
    pub fn new(chain_id: u64, account: Address) -> Self {
        Self {
            chain_id,
            account,
            state: Mutex::new(MockState {
                writes: Vec::new(),
                write_error: None,
                next_hash: 0x1000,
                queued_receipts: VecDeque::new(),
                bound_receipts: HashMap::new(),
                estimate_gas: Ok(U256::from(100_000u64)),
                estimate_gas_calls: Vec::new(),
                zk_estimate: Ok(U256::from(500_000u64)),
                zk_estimate_calls: Vec::new(),
                bytecode: HashMap::new(),
                call_responses: HashMap::new(),
                calls: Vec::new(),
                fee_data: FeeData::Eip1559 {
                    max_fee_per_gas: U256::from(2_000_000_000u64),
                    max_priority_fee_per_gas: U256::from(1_000_000_000u64),
                },
                legacy_gas_price: U256::from(1_000_000_000u64),
                block_number: 100,
                finalized_block: 100,
                block_timestamps: HashMap::new(),
                default_timestamp: 1_700_000_000,
                balances: HashMap::new(),
                nonce: 0,
            }),
        }
    }

    /// Queues the outcome for the next submitted transaction.
    pub fn push_receipt(&self, script: ReceiptScript, delay: Duration) {
        self.state.lock().queued_receipts.push_back(ScriptedReceipt { script, delay });
    }

    pub fn fail_writes_with(&self, error: ChainError) {
        self.state.lock().write_error = Some(error);
    }

    pub fn set_estimate_gas(&self, result: Result<U256, ChainError>) {
        self.state.lock().estimate_gas = result;
    }

    pub fn set_zk_estimate(&self, result: Result<U256, ChainError>) {
        self.state.lock().zk_estimate = result;
    }

    pub fn set_bytecode(&self, address: Address, code: impl Into<Bytes>) {
        self.state.lock().bytecode.insert(address, code.into());
    }

    /// Response for `eth_call`s to `to` whose calldata starts with `signature`'s selector.
    pub fn set_call_response(&self, to: Address, signature: &str, response: Result<Bytes, ChainError>) {
        let selector = selector_from_signature(signature);
        self.state.lock().call_responses.insert((to, selector), response);
    }

    pub fn set_uint_response(&self, to: Address, signature: &str, value: U256) {
        let encoded = ethers::abi::encode(&[ethers::abi::Token::Uint(value)]);
        self.set_call_response(to, signature, Ok(Bytes::from(encoded)));
    }

    pub fn set_fee_data(&self, fee_data: FeeData) {
        self.state.lock().fee_data = fee_data;
    }

    pub fn set_legacy_gas_price(&self, gas_price: U256) {
        self.state.lock().legacy_gas_price = gas_price;
    }

    pub fn set_block_number(&self, number: u64) {
        self.state.lock().block_number = number;
    }

    pub fn set_finalized_block(&self, number: u64) {
        self.state.lock().finalized_block = number;
    }

    pub fn set_block_timestamp(&self, number: u64, timestamp_secs: u64) {
        self.state.lock().block_timestamps.insert(number, timestamp_secs);
    }

    pub fn set_balance(&self, address: Address, balance: U256) {
        self.state.lock().balances.insert(address, balance);
    }

    pub fn writes(&self) -> Vec<ContractWrite> {
        self.state.lock().writes.clone()
    }

    pub fn write_count(&self) -> usize {
        self.state.lock().writes.len()
    }

    pub fn estimate_gas_calls(&self) -> Vec<CallRequest> {
        self.state.lock().estimate_gas_calls.clone()
    }

    pub fn zk_estimate_calls(&self) -> Vec<CallRequest> {
        self.state.lock().zk_estimate_calls.clone()
    }

    pub fn calls(&self) -> Vec<CallRequest> {
        self.state.lock().calls.clone()
    }
}

#[async_trait]
impl PublicClient for MockChain {
    fn chain_id(&self) -> u64 {
        self.chain_id
    }

    async fn wait_for_transaction_receipt(&self, hash: H256) -> Result<TxReceipt, ChainError> {
        let scripted = {
            let state = self.state.lock();
            state.bound_receipts.get(&hash).cloned().unwrap_or(ScriptedReceipt {
                script: ReceiptScript::Success { block_number: state.block_number },
                delay: Duration::ZERO,
            })
        };
        if !scripted.delay.is_zero() {
            tokio::time::sleep(scripted.delay).await;
        }
        debug!(chain_id = self.chain_id, ?hash, script = ?scripted.script, "mock receipt resolving");
        match scripted.script {
            ReceiptScript::Success { block_number } => {
                Ok(TxReceipt { hash, block_number, status: ReceiptStatus::Success })
            }
            ReceiptScript::Reverted { block_number } => {
                Ok(TxReceipt { hash, block_number, status: ReceiptStatus::Reverted })
            }
            ReceiptScript::Replaced { cancelled, replacement } => {
                Err(ChainError::TransactionReplaced { cancelled, replacement })
            }
            ReceiptScript::Error(e) => Err(e),
            ReceiptScript::Pending => std::future::pending().await,
        }
    }

    async fn get_block(&self, number: u64) -> Result<BlockHeader, ChainError> {
        let state = self.state.lock();
        let timestamp = state.block_timestamps.get(&number).copied().unwrap_or(state.default_timestamp);
        Ok(BlockHeader { number, timestamp })
    }

    async fn get_block_number(&self) -> Result<u64, ChainError> {
        Ok(self.state.lock().block_number)
    }

    async fn get_finalized_block_number(&self) -> Result<u64, ChainError> {
        Ok(self.state.lock().finalized_block)
    }

    async fn estimate_gas(&self, request: &CallRequest) -> Result<U256, ChainError> {
        let mut state = self.state.lock();
        state.estimate_gas_calls.push(request.clone());
        state.estimate_gas.clone()
    }

    async fn get_bytecode(&self, address: Address) -> Result<Bytes, ChainError> {
        Ok(self.state.lock().bytecode.get(&address).cloned().unwrap_or_default())
    }

    async fn estimate_fees_per_gas(&self, fee_type: FeeType) -> Result<FeeData, ChainError> {
        let state = self.state.lock();
        Ok(match fee_type {
            FeeType::Eip1559 => state.fee_data,
            FeeType::Legacy => FeeData::Legacy { gas_price: state.legacy_gas_price },
        })
    }

    async fn call(&self, request: &CallRequest) -> Result<Bytes, ChainError> {
        let mut state = self.state.lock();
        state.calls.push(request.clone());
        let selector: [u8; 4] = request
            .data
            .get(..4)
            .and_then(|s| s.try_into().ok())
            .ok_or_else(|| ChainError::Rpc("calldata shorter than a selector".to_string()))?;
        state
            .call_responses
            .get(&(request.to, selector))
            .cloned()
            .unwrap_or_else(|| Err(ChainError::Rpc(format!("execution reverted: no mock for {:?}", request.to))))
    }

    async fn get_transaction_count(&self, _address: Address) -> Result<u64, ChainError> {
        Ok(self.state.lock().nonce)
    }

    async fn get_balance(&self, address: Address) -> Result<U256, ChainError> {
        Ok(self.state.lock().balances.get(&address).copied().unwrap_or_default())
    }
}

#[async_trait]
impl WalletClient for MockChain {
    fn chain_id(&self) -> u64 {
        self.chain_id
    }

    fn address(&self) -> Address {
        self.account
    }

    async fn write_contract(&self, request: ContractWrite) -> Result<H256, ChainError> {
        let mut state = self.state.lock();
        if let Some(e) = state.write_error.clone() {
            return Err(e);
        }
        let hash = H256::from_low_u64_be(state.next_hash);
        state.next_hash += 1;
        state.nonce += 1;
        debug!(chain_id = self.chain_id, ?hash, function = request.function_name, "mock write");
        state.writes.push(request);
        if let Some(scripted) = state.queued_receipts.pop_front() {
            state.bound_receipts.insert(hash, scripted);
        }
        Ok(hash)
    }
}

#[async_trait]
impl ZkSyncRpc for MockChain {
    async fn estimate_gas_l1_to_l2(&self, request: &CallRequest) -> Result<U256, ChainError> {
        let mut state = self.state.lock();
        state.zk_estimate_calls.push(request.clone());
        state.zk_estimate.clone()
    }
}

fn addr(n: u64) -> Address {
    Address::from_low_u64_be(n)
}

/// Rollup contract set with small well-known addresses, for simulations.
pub fn demo_rollup_contracts() -> RollupContracts {
    RollupContracts {
        l1_gateway_router: addr(0x1001),
        l2_gateway_router: addr(0x2001),
        l1_messenger: addr(0x1002),
        l2_messenger: addr(0x2002),
        l2_gas_price_oracle: addr(0x1003),
        l1_gas_price_oracle: addr(0x5300),
        eth_gateway: GatewayPair { l1: addr(0x1010), l2: addr(0x2010) },
        weth_gateway: GatewayPair { l1: addr(0x1011), l2: addr(0x2011) },
        standard_erc20_gateway: GatewayPair { l1: addr(0x1012), l2: addr(0x2012) },
        custom_erc20_gateway: GatewayPair { l1: addr(0x1013), l2: addr(0x2013) },
        usdc_gateway: Some(GatewayPair { l1: addr(0x1014), l2: addr(0x2014) }),
        dai_gateway: None,
        weth_l1: addr(0xe7e1),
        usdc_l1: Some(addr(0xc1c1)),
        dai_l1: None,
        custom_tokens: Vec::new(),
    }
}

/// Zk contract set with small well-known addresses, for simulations.
pub fn demo_zk_contracts() -> ZkContracts {
    ZkContracts {
        l1_mailbox: addr(0x3001),
        l1_erc20_bridge: addr(0x3002),
        l2_erc20_bridge: addr(0x4002),
        l2_eth_token: addr(0x800a),
    }
}
