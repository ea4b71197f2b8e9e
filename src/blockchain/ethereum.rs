use async_trait::async_trait;
use ethers::{
    middleware::SignerMiddleware,
    prelude::JsonRpcClient,
    providers::{Http, Middleware, Provider},
    signers::{LocalWallet, Signer},
    types::{
        transaction::eip2718::TypedTransaction, Address, BlockNumber, Bytes, Eip1559TransactionRequest,
        Transaction, TransactionRequest, H256, U256,
    },
};
use serde_json::json;
use std::time::Duration;
use tracing::{debug, info, warn};

use super::traits::{
    BlockHeader, CallRequest, ChainError, ContractWrite, FeeData, FeeType, PublicClient, ReceiptStatus,
    ReplacementReceipt, TxReceipt, WalletClient, ZkSyncRpc,
};
use crate::core::errors::{BridgeError, Result};

const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(4);
/// Polls in a row where the node knows neither the receipt nor the transaction.
const DEFAULT_MAX_UNSEEN_POLLS: u32 = 30;

fn rpc_error(context: &str, e: impl std::fmt::Display) -> ChainError {
    ChainError::Rpc(format!("{}: {}", context, e))
}

fn typed_call(request: &CallRequest) -> TypedTransaction {
    let mut tx = TransactionRequest::new().to(request.to).data(request.data.clone()).value(request.value);
    if let Some(from) = request.from {
        tx = tx.from(from);
    }
    tx.into()
}

/// Builds an HTTP provider with a short timeout, honouring proxy env vars.
pub fn http_provider(rpc_url: &str) -> Result<Provider<Http>> {
    let rpc_url_clean = rpc_url.trim();
    let parsed_url = reqwest::Url::parse(rpc_url_clean)
        .map_err(|e| BridgeError::Config(format!("Invalid RPC URL '{}': {}", rpc_url_clean, e)))?;
    let mut builder = reqwest::Client::builder().timeout(Duration::from_secs(10));
    if let Ok(proxy) = std::env::var("HTTPS_PROXY").or_else(|_| std::env::var("HTTP_PROXY")) {
        if let Ok(p) = reqwest::Proxy::all(proxy) {
            builder = builder.proxy(p);
        }
    }
    let client = builder
        .build()
        .map_err(|e| BridgeError::Config(format!("Failed to build HTTP client: {}", e)))?;
    Ok(Provider::new(Http::new_with_client(parsed_url, client)))
}

/// Read-side client over an ethers provider.
#[derive(Clone)]
pub struct EthersPublicClient<P: JsonRpcClient = Http> {
    provider: Provider<P>,
    chain_id: u64,
    poll_interval: Duration,
    max_unseen_polls: u32,
}

impl EthersPublicClient<Http> {
    /// Connects and asks the node for its chain id.
    pub async fn connect(rpc_url: &str) -> Result<Self> {
        let provider = http_provider(rpc_url)?;
        let chain_id = provider
            .get_chainid()
            .await
            .map_err(|e| BridgeError::Config(format!("Failed to get chain ID from {}: {}", rpc_url, e)))?
            .as_u64();
        info!(rpc_url, chain_id, "connected to chain");
        Ok(Self::new_with_provider(provider, chain_id))
    }
}

impl<P: JsonRpcClient> EthersPublicClient<P> {
    /// Wraps an existing provider, e.g. a `MockProvider` in tests.
    pub fn new_with_provider(provider: Provider<P>, chain_id: u64) -> Self {
        Self { provider, chain_id, poll_interval: DEFAULT_POLL_INTERVAL, max_unseen_polls: DEFAULT_MAX_UNSEEN_POLLS }
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn with_max_unseen_polls(mut self, polls: u32) -> Self {
        self.max_unseen_polls = polls.max(1);
        self
    }

    pub fn provider(&self) -> &Provider<P> {
        &self.provider
    }

    /// Looks for a mined transaction from `original.from` with the same nonce in `[from_block, to_block]`.
    async fn find_replacement(
        &self,
        original: &Transaction,
        from_block: u64,
        to_block: u64,
    ) -> std::result::Result<Option<(Transaction, u64)>, ChainError> {
        for number in from_block..=to_block {
            let block = self
                .provider
                .get_block_with_txs(number)
                .await
                .map_err(|e| rpc_error("get_block_with_txs", e))?;
            let Some(block) = block else { continue };
            if let Some(tx) = block
                .transactions
                .into_iter()
                .find(|tx| tx.from == original.from && tx.nonce == original.nonce && tx.hash != original.hash)
            {
                return Ok(Some((tx, number)));
            }
        }
        Ok(None)
    }
}

/// A replacement that sends nothing to oneself with no calldata is a cancellation.
pub fn is_cancellation(original: &Transaction, replacement: &Transaction) -> bool {
    replacement.to == Some(original.from) && replacement.value.is_zero() && replacement.input.is_empty()
}

#[async_trait]
impl<P> PublicClient for EthersPublicClient<P>
where
    P: JsonRpcClient + 'static,
{
    fn chain_id(&self) -> u64 {
        self.chain_id
    }

    async fn wait_for_transaction_receipt(&self, hash: H256) -> std::result::Result<TxReceipt, ChainError> {
        let mut original: Option<Transaction> = None;
        let mut scan_from = self.get_block_number().await?;
        let mut unseen_polls = 0u32;
        loop {
            let receipt = self
                .provider
                .get_transaction_receipt(hash)
                .await
                .map_err(|e| rpc_error("get_transaction_receipt", e))?;
            if let Some(receipt) = receipt {
                let block_number = receipt.block_number.map(|n| n.as_u64()).unwrap_or_default();
                return Ok(TxReceipt {
                    hash,
                    block_number,
                    status: ReceiptStatus::from_eip658(receipt.status.map(|s| s.as_u64())),
                });
            }

            let current = self
                .provider
                .get_transaction(hash)
                .await
                .map_err(|e| rpc_error("get_transaction", e))?;
            if let Some(tx) = current {
                original = Some(tx);
            } else if let Some(tx) = &original {
                // dropped from the pool; look for a mined tx that reused its nonce
                let latest = self.get_block_number().await?;
                if let Some((replacement, block_number)) = self.find_replacement(tx, scan_from, latest).await? {
                    let status = self
                        .provider
                        .get_transaction_receipt(replacement.hash)
                        .await
                        .map_err(|e| rpc_error("get_transaction_receipt", e))?
                        .map(|r| ReceiptStatus::from_eip658(r.status.map(|s| s.as_u64())))
                        .unwrap_or(ReceiptStatus::Success);
                    let cancelled = is_cancellation(tx, &replacement);
                    info!(?hash, replacement = ?replacement.hash, cancelled, "transaction replaced");
                    return Err(ChainError::TransactionReplaced {
                        cancelled,
                        replacement: ReplacementReceipt { hash: replacement.hash, block_number, status },
                    });
                }
                scan_from = latest + 1;
            } else {
                unseen_polls += 1;
                if unseen_polls >= self.max_unseen_polls {
                    warn!(?hash, polls = unseen_polls, "transaction never became visible");
                    return Err(ChainError::TransactionNotFound(hash));
                }
                debug!(?hash, polls = unseen_polls, "transaction not visible yet");
            }
            tokio::time::sleep(self.poll_interval).await;
        }
    }

    async fn get_block(&self, number: u64) -> std::result::Result<BlockHeader, ChainError> {
        let block = self
            .provider
            .get_block(number)
            .await
            .map_err(|e| rpc_error("get_block", e))?
            .ok_or_else(|| ChainError::Rpc(format!("block {} not found", number)))?;
        Ok(BlockHeader { number, timestamp: block.timestamp.as_u64() })
    }

    async fn get_block_number(&self) -> std::result::Result<u64, ChainError> {
        let number = self.provider.get_block_number().await.map_err(|e| rpc_error("get_block_number", e))?;
        Ok(number.as_u64())
    }

    async fn get_finalized_block_number(&self) -> std::result::Result<u64, ChainError> {
        self.provider
            .get_block(BlockNumber::Finalized)
            .await
            .map_err(|e| rpc_error("get_block(finalized)", e))?
            .and_then(|b| b.number)
            .map(|n| n.as_u64())
            .ok_or_else(|| ChainError::Rpc("finalized block not available".to_string()))
    }

    async fn estimate_gas(&self, request: &CallRequest) -> std::result::Result<U256, ChainError> {
        self.provider.estimate_gas(&typed_call(request), None).await.map_err(|e| rpc_error("estimate_gas", e))
    }

    async fn get_bytecode(&self, address: Address) -> std::result::Result<Bytes, ChainError> {
        self.provider.get_code(address, None).await.map_err(|e| rpc_error("get_code", e))
    }

    async fn estimate_fees_per_gas(&self, fee_type: FeeType) -> std::result::Result<FeeData, ChainError> {
        if fee_type == FeeType::Eip1559 {
            match self.provider.estimate_eip1559_fees(None).await {
                Ok((max_fee_per_gas, max_priority_fee_per_gas)) => {
                    return Ok(FeeData::Eip1559 { max_fee_per_gas, max_priority_fee_per_gas })
                }
                Err(e) => debug!(error = %e, "EIP-1559 fees unavailable, using legacy gas price"),
            }
        }
        let gas_price = self.provider.get_gas_price().await.map_err(|e| rpc_error("get_gas_price", e))?;
        Ok(FeeData::Legacy { gas_price })
    }

    async fn call(&self, request: &CallRequest) -> std::result::Result<Bytes, ChainError> {
        self.provider.call(&typed_call(request), None).await.map_err(|e| rpc_error("eth_call", e))
    }

    async fn get_transaction_count(&self, address: Address) -> std::result::Result<u64, ChainError> {
        let nonce = self
            .provider
            .get_transaction_count(address, None)
            .await
            .map_err(|e| rpc_error("get_transaction_count", e))?;
        Ok(nonce.as_u64())
    }

    async fn get_balance(&self, address: Address) -> std::result::Result<U256, ChainError> {
        self.provider.get_balance(address, None).await.map_err(|e| rpc_error("get_balance", e))
    }
}

#[async_trait]
impl<P> ZkSyncRpc for EthersPublicClient<P>
where
    P: JsonRpcClient + 'static,
{
    async fn estimate_gas_l1_to_l2(&self, request: &CallRequest) -> std::result::Result<U256, ChainError> {
        let mut params = json!({
            "to": request.to,
            "data": request.data,
            "value": request.value,
        });
        if let Some(from) = request.from {
            params["from"] = json!(from);
        }
        self.provider
            .request("zks_estimateGasL1ToL2", [params])
            .await
            .map_err(|e| rpc_error("zks_estimateGasL1ToL2", e))
    }
}

/// Signing client: a local key over an ethers provider.
pub struct EthersWalletClient<P: JsonRpcClient = Http> {
    client: SignerMiddleware<Provider<P>, LocalWallet>,
}

impl<P: JsonRpcClient + 'static> EthersWalletClient<P> {
    pub fn new(provider: Provider<P>, wallet: LocalWallet, chain_id: u64) -> Self {
        Self { client: SignerMiddleware::new(provider, wallet.with_chain_id(chain_id)) }
    }

    /// Wallet from a 32-byte hex private key. Key material is never logged.
    pub fn from_private_key(provider: Provider<P>, private_key_hex: &str, chain_id: u64) -> Result<Self> {
        let bytes = hex::decode(private_key_hex.trim().trim_start_matches("0x"))
            .map_err(|e| BridgeError::Validation(format!("Invalid private key encoding: {}", e)))?;
        if bytes.len() != 32 {
            return Err(BridgeError::Validation("Private key must be 32 bytes".to_string()));
        }
        let wallet = LocalWallet::from_bytes(&bytes)
            .map_err(|e| BridgeError::Validation(format!("Invalid private key: {}", e)))?;
        Ok(Self::new(provider, wallet, chain_id))
    }

    fn build_transaction(&self, request: ContractWrite) -> TypedTransaction {
        let from = self.client.signer().address();
        match request.fees {
            Some(FeeData::Legacy { gas_price }) => {
                let mut tx = TransactionRequest::new()
                    .from(from)
                    .to(request.address)
                    .data(request.calldata)
                    .value(request.value)
                    .gas_price(gas_price);
                tx.gas = request.gas_limit;
                tx.into()
            }
            fees => {
                let mut tx = Eip1559TransactionRequest::new()
                    .from(from)
                    .to(request.address)
                    .data(request.calldata)
                    .value(request.value);
                tx.gas = request.gas_limit;
                if let Some(FeeData::Eip1559 { max_fee_per_gas, max_priority_fee_per_gas }) = fees {
                    tx = tx.max_fee_per_gas(max_fee_per_gas).max_priority_fee_per_gas(max_priority_fee_per_gas);
                }
                tx.into()
            }
        }
    }
}

fn classify_send_error(message: String) -> ChainError {
    let lower = message.to_lowercase();
    if lower.contains("user rejected") || lower.contains("user denied") {
        ChainError::UserRejected(message)
    } else {
        ChainError::Rpc(message)
    }
}

#[async_trait]
impl<P> WalletClient for EthersWalletClient<P>
where
    P: JsonRpcClient + 'static,
{
    fn chain_id(&self) -> u64 {
        self.client.signer().chain_id()
    }

    fn address(&self) -> Address {
        self.client.signer().address()
    }

    async fn write_contract(&self, request: ContractWrite) -> std::result::Result<H256, ChainError> {
        let function = request.function_name;
        let tx = self.build_transaction(request);
        let pending = self.client.send_transaction(tx, None).await.map_err(|e| {
            warn!(function, error = %e, "transaction rejected");
            classify_send_error(format!("Failed to send {}: {}", function, e))
        })?;
        let hash = pending.tx_hash();
        info!(function, tx_hash = ?hash, "transaction sent");
        Ok(hash)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ethers::providers::MockProvider;
    use ethers::types::{TransactionReceipt, U64};

    fn mock_client() -> (EthersPublicClient<MockProvider>, MockProvider) {
        let mock = MockProvider::new();
        let provider = Provider::new(mock.clone());
        (EthersPublicClient::new_with_provider(provider, 1).with_poll_interval(Duration::from_millis(1)), mock)
    }

    #[test]
    fn test_http_provider_rejects_bad_url() {
        assert!(http_provider("not a url").is_err());
        assert!(http_provider("http://127.0.0.1:8545").is_ok());
    }

    #[tokio::test]
    async fn test_get_block_number() {
        let (client, mock) = mock_client();
        mock.push(U64::from(42u64)).unwrap();
        assert_eq!(client.get_block_number().await.unwrap(), 42);
    }

    #[tokio::test]
    async fn test_get_bytecode_empty() {
        let (client, mock) = mock_client();
        mock.push::<Bytes, _>(Bytes::default()).unwrap();
        let code = client.get_bytecode(Address::from_low_u64_be(1)).await.unwrap();
        assert!(code.is_empty());
    }

    #[tokio::test]
    async fn test_zks_estimate_decodes_quantity() {
        let (client, mock) = mock_client();
        mock.push(U256::from(777_000u64)).unwrap();
        let request = CallRequest::new(Address::from_low_u64_be(2), vec![0u8; 4]).from(Address::from_low_u64_be(3));
        assert_eq!(client.estimate_gas_l1_to_l2(&request).await.unwrap(), U256::from(777_000u64));
    }

    #[tokio::test]
    async fn test_wait_for_receipt_returns_mined_status() {
        let (client, mock) = mock_client();
        let receipt = TransactionReceipt {
            transaction_hash: H256::from_low_u64_be(9),
            block_number: Some(U64::from(100u64)),
            status: Some(U64::from(0u64)),
            ..Default::default()
        };
        // MockProvider answers the most recently pushed response first
        mock.push(receipt).unwrap();
        mock.push(U64::from(99u64)).unwrap();

        let got = client.wait_for_transaction_receipt(H256::from_low_u64_be(9)).await.unwrap();
        assert_eq!(got.block_number, 100);
        assert_eq!(got.status, ReceiptStatus::Reverted);
    }

    #[tokio::test]
    async fn test_wait_for_receipt_gives_up_on_unknown_transaction() {
        let (client, mock) = mock_client();
        let client = client.with_max_unseen_polls(2);
        // answered last to first: block number, then (receipt, transaction) per poll
        mock.push::<Option<Transaction>, _>(None).unwrap();
        mock.push::<Option<TransactionReceipt>, _>(None).unwrap();
        mock.push::<Option<Transaction>, _>(None).unwrap();
        mock.push::<Option<TransactionReceipt>, _>(None).unwrap();
        mock.push(U64::from(50u64)).unwrap();

        let hash = H256::from_low_u64_be(0xabc);
        let err = client.wait_for_transaction_receipt(hash).await.unwrap_err();
        assert_eq!(err, ChainError::TransactionNotFound(hash));
    }

    #[tokio::test]
    async fn test_rpc_failure_maps_to_chain_error() {
        let (client, _mock) = mock_client();
        // nothing queued: the mock provider errors out
        assert!(matches!(client.get_block_number().await, Err(ChainError::Rpc(_))));
    }

    #[test]
    fn test_cancellation_detection() {
        let sender = Address::from_low_u64_be(1);
        let original = Transaction {
            hash: H256::from_low_u64_be(1),
            from: sender,
            to: Some(Address::from_low_u64_be(2)),
            value: U256::from(5u64),
            ..Default::default()
        };
        let cancel = Transaction {
            hash: H256::from_low_u64_be(2),
            from: sender,
            to: Some(sender),
            ..Default::default()
        };
        let speed_up = Transaction { hash: H256::from_low_u64_be(3), ..original.clone() };
        assert!(is_cancellation(&original, &cancel));
        assert!(!is_cancellation(&original, &speed_up));
    }

    #[test]
    fn test_wallet_from_private_key() {
        let provider = Provider::new(MockProvider::new());
        let key = "0x".to_string() + &"11".repeat(32);
        let wallet = EthersWalletClient::from_private_key(provider, &key, 5).unwrap();
        assert_eq!(WalletClient::chain_id(&wallet), 5);

        let short = EthersWalletClient::from_private_key(Provider::new(MockProvider::new()), "0x1234", 5);
        assert!(short.is_err());
    }

    #[test]
    fn test_legacy_fees_build_legacy_transaction() {
        let provider = Provider::new(MockProvider::new());
        let key = "22".repeat(32);
        let wallet = EthersWalletClient::from_private_key(provider, &key, 1).unwrap();
        let write = ContractWrite {
            address: Address::from_low_u64_be(7),
            function_name: "depositETH",
            calldata: Bytes::from(vec![1, 2, 3, 4]),
            value: U256::from(10u64),
            gas_limit: Some(U256::from(50_000u64)),
            fees: Some(FeeData::Legacy { gas_price: U256::from(3u64) }),
        };
        let tx = wallet.build_transaction(write.clone());
        assert!(matches!(tx, TypedTransaction::Legacy(_)));
        assert_eq!(tx.gas(), Some(&U256::from(50_000u64)));

        let eip1559 = ContractWrite { fees: None, ..write };
        assert!(matches!(wallet.build_transaction(eip1559), TypedTransaction::Eip1559(_)));
    }

    #[test]
    fn test_user_rejection_classified() {
        assert!(matches!(classify_send_error("User denied transaction".into()), ChainError::UserRejected(_)));
        assert!(matches!(classify_send_error("nonce too low".into()), ChainError::Rpc(_)));
    }
}
