use async_trait::async_trait;
use ethers::types::{Address, Bytes, H256, U256};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors reported by chain collaborators (RPC clients and wallets).
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ChainError {
    #[error("RPC error: {0}")]
    Rpc(String),

    #[error("User rejected the request: {0}")]
    UserRejected(String),

    /// The awaited transaction was dropped in favour of another one with the
    /// same sender and nonce.
    #[error("Transaction replaced (cancelled: {cancelled}) by {}", replacement.hash)]
    TransactionReplaced { cancelled: bool, replacement: ReplacementReceipt },

    /// Neither the receipt nor the transaction showed up while polling.
    #[error("Transaction {0:?} not found")]
    TransactionNotFound(H256),

    #[error("Unsupported operation: {0}")]
    Unsupported(String),

    #[error("Decode error: {0}")]
    Decode(String),
}

/// Receipt of the transaction that superseded an awaited one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplacementReceipt {
    pub hash: H256,
    pub block_number: u64,
    pub status: ReceiptStatus,
}

/// EIP-658 receipt status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReceiptStatus {
    Success,
    Reverted,
}

impl ReceiptStatus {
    pub fn from_eip658(status: Option<u64>) -> Self {
        match status {
            Some(1) => ReceiptStatus::Success,
            _ => ReceiptStatus::Reverted,
        }
    }

    pub fn is_success(self) -> bool {
        self == ReceiptStatus::Success
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxReceipt {
    pub hash: H256,
    pub block_number: u64,
    pub status: ReceiptStatus,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockHeader {
    pub number: u64,
    /// Seconds since the unix epoch.
    pub timestamp: u64,
}

/// A read-only call or gas-estimation request.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CallRequest {
    pub from: Option<Address>,
    pub to: Address,
    pub data: Bytes,
    pub value: U256,
}

impl CallRequest {
    pub fn new(to: Address, data: impl Into<Bytes>) -> Self {
        Self { from: None, to, data: data.into(), value: U256::zero() }
    }

    pub fn from(mut self, from: Address) -> Self {
        self.from = Some(from);
        self
    }

    pub fn value(mut self, value: U256) -> Self {
        self.value = value;
        self
    }
}

/// Which fee model to ask `estimate_fees_per_gas` for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FeeType {
    Legacy,
    #[default]
    Eip1559,
}

/// Fee fields attached to a transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FeeData {
    Legacy { gas_price: U256 },
    Eip1559 { max_fee_per_gas: U256, max_priority_fee_per_gas: U256 },
}

impl FeeData {
    /// The per-gas price a fee computation should multiply by.
    pub fn price_ceiling(&self) -> U256 {
        match self {
            FeeData::Legacy { gas_price } => *gas_price,
            FeeData::Eip1559 { max_fee_per_gas, .. } => *max_fee_per_gas,
        }
    }
}

/// Arguments of a wallet `writeContract` call with calldata already encoded.
#[derive(Debug, Clone, PartialEq)]
pub struct ContractWrite {
    pub address: Address,
    /// Human readable method name, used for logs only.
    pub function_name: &'static str,
    pub calldata: Bytes,
    pub value: U256,
    pub gas_limit: Option<U256>,
    pub fees: Option<FeeData>,
}

/// Read side of a chain (`PublicClient` / provider).
#[async_trait]
pub trait PublicClient: Send + Sync {
    fn chain_id(&self) -> u64;

    /// Waits until the transaction is mined. Replacement is reported as
    /// [`ChainError::TransactionReplaced`].
    async fn wait_for_transaction_receipt(&self, hash: H256) -> Result<TxReceipt, ChainError>;

    async fn get_block(&self, number: u64) -> Result<BlockHeader, ChainError>;

    async fn get_block_number(&self) -> Result<u64, ChainError>;

    /// Latest block considered final by the chain's consensus.
    async fn get_finalized_block_number(&self) -> Result<u64, ChainError>;

    async fn estimate_gas(&self, request: &CallRequest) -> Result<U256, ChainError>;

    /// Deployed code at `address`; empty when nothing is deployed.
    async fn get_bytecode(&self, address: Address) -> Result<Bytes, ChainError>;

    async fn estimate_fees_per_gas(&self, fee_type: FeeType) -> Result<FeeData, ChainError>;

    async fn call(&self, request: &CallRequest) -> Result<Bytes, ChainError>;

    async fn get_transaction_count(&self, address: Address) -> Result<u64, ChainError>;

    /// Native balance in wei.
    async fn get_balance(&self, address: Address) -> Result<U256, ChainError>;
}

/// Signing side of a chain (`WalletClient` / signer).
#[async_trait]
pub trait WalletClient: Send + Sync {
    /// Chain the wallet is currently connected to.
    fn chain_id(&self) -> u64;

    fn address(&self) -> Address;

    /// Signs and broadcasts the call, returning the hash as soon as it is known.
    async fn write_contract(&self, request: ContractWrite) -> Result<H256, ChainError>;
}

/// The zk-family destination chain's native fee-estimation RPC surface.
#[async_trait]
pub trait ZkSyncRpc: Send + Sync {
    /// Gas needed on L2 to execute a priority (L1 -> L2) transaction.
    async fn estimate_gas_l1_to_l2(&self, request: &CallRequest) -> Result<U256, ChainError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_receipt_status_from_eip658() {
        assert_eq!(ReceiptStatus::from_eip658(Some(1)), ReceiptStatus::Success);
        assert_eq!(ReceiptStatus::from_eip658(Some(0)), ReceiptStatus::Reverted);
        // pre-Byzantium receipts carry no status; treat as not successful
        assert_eq!(ReceiptStatus::from_eip658(None), ReceiptStatus::Reverted);
    }

    #[test]
    fn test_fee_data_price_ceiling() {
        let legacy = FeeData::Legacy { gas_price: U256::from(7u64) };
        let eip1559 = FeeData::Eip1559 {
            max_fee_per_gas: U256::from(30u64),
            max_priority_fee_per_gas: U256::from(2u64),
        };
        assert_eq!(legacy.price_ceiling(), U256::from(7u64));
        assert_eq!(eip1559.price_ceiling(), U256::from(30u64));
    }

    #[test]
    fn test_replaced_error_display_mentions_new_hash() {
        let err = ChainError::TransactionReplaced {
            cancelled: false,
            replacement: ReplacementReceipt {
                hash: H256::from_low_u64_be(0xbeef),
                block_number: 9,
                status: ReceiptStatus::Success,
            },
        };
        let msg = err.to_string();
        assert!(msg.contains("cancelled: false"), "unexpected: {}", msg);
        assert!(msg.contains("beef"), "unexpected: {}", msg);
    }
}
