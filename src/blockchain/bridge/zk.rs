//! Mailbox-based bridge of the zk-rollup style family.

use async_trait::async_trait;
use ethers::abi::Token as AbiToken;
use ethers::types::{Address, U256};
use std::sync::Arc;
use tracing::{debug, info};

use super::family::{pad_gas_limit, BridgeCall, BridgeFamily};
use crate::blockchain::traits::{CallRequest, ContractWrite, FeeData, FeeType, PublicClient, ZkSyncRpc};
use crate::core::abi::{apply_l1_to_l2_alias, decode_uint, encode_call};
use crate::core::config::{FamilyKind, ZkContracts};
use crate::core::errors::Result;
use crate::fee::{FeeQuote, FeeRequest, SingleFlight};
use crate::network::Direction;
use crate::token::Token;

/// Gas per pubdata byte the priority transaction is submitted with.
pub const REQUIRED_L2_GAS_PRICE_PER_PUBDATA: u64 = 800;

pub const MIN_L1_GAS_LIMIT_NATIVE: u64 = 200_000;
pub const MIN_L1_GAS_LIMIT_ERC20: u64 = 400_000;

pub struct ZkFamily {
    contracts: ZkContracts,
    l1: Arc<dyn PublicClient>,
    l2: Arc<dyn PublicClient>,
    rpc: Arc<dyn ZkSyncRpc>,
    flight: SingleFlight,
}

impl ZkFamily {
    pub fn new(
        contracts: ZkContracts,
        l1: Arc<dyn PublicClient>,
        l2: Arc<dyn PublicClient>,
        rpc: Arc<dyn ZkSyncRpc>,
    ) -> Self {
        Self { contracts, l1, l2, rpc, flight: SingleFlight::new() }
    }

    /// Gas the L2 leg of a deposit needs, from `zks_estimateGasL1ToL2`.
    pub async fn estimate_l2_deposit_gas(&self, request: &FeeRequest) -> Result<U256> {
        let simulation = if request.token.native {
            CallRequest::new(request.recipient, Vec::<u8>::new())
                .from(request.sender)
                .value(request.amount)
        } else {
            CallRequest::new(self.contracts.l2_erc20_bridge, finalize_deposit_calldata(request))
                .from(apply_l1_to_l2_alias(self.contracts.l1_erc20_bridge))
        };
        Ok(self.rpc.estimate_gas_l1_to_l2(&simulation).await?)
    }

    /// `l2TransactionBaseCost(gasPrice, l2GasLimit, gasPerPubdata)` on the mailbox.
    pub async fn base_cost(&self, gas_price: U256, l2_gas_limit: U256) -> Result<U256> {
        let data = encode_call(
            "l2TransactionBaseCost(uint256,uint256,uint256)",
            &[
                AbiToken::Uint(gas_price),
                AbiToken::Uint(l2_gas_limit),
                AbiToken::Uint(U256::from(REQUIRED_L2_GAS_PRICE_PER_PUBDATA)),
            ],
        );
        let raw = self.l1.call(&CallRequest::new(self.contracts.l1_mailbox, data)).await?;
        Ok(decode_uint(&raw)?)
    }

    async fn estimate_deposit(&self, request: &FeeRequest) -> Result<FeeQuote> {
        let fees = self.l1.estimate_fees_per_gas(FeeType::Eip1559).await?;
        let gas_price = fees.price_ceiling();
        let l2_gas_limit = self.estimate_l2_deposit_gas(request).await?;
        let base_cost = self.base_cost(gas_price, l2_gas_limit).await?;

        let mut quote = FeeQuote {
            gas_price,
            l2_gas_limit: Some(l2_gas_limit),
            base_cost: Some(base_cost),
            ..FeeQuote::zero()
        };
        if let FeeData::Eip1559 { max_fee_per_gas, max_priority_fee_per_gas } = fees {
            quote.max_fee_per_gas = Some(max_fee_per_gas);
            quote.max_priority_fee_per_gas = Some(max_priority_fee_per_gas);
        }

        let call = self.build_deposit_call(&BridgeCall::from_request(request, quote.clone()))?;
        let l1_estimate = self
            .l1
            .estimate_gas(&CallRequest::new(call.address, call.calldata).from(request.sender).value(call.value))
            .await?;
        let floor = if request.token.native { MIN_L1_GAS_LIMIT_NATIVE } else { MIN_L1_GAS_LIMIT_ERC20 };
        let l1_gas_limit = pad_gas_limit(l1_estimate).max(U256::from(floor));
        debug!(%l1_estimate, %l1_gas_limit, %l2_gas_limit, %base_cost, "zk deposit gas resolved");

        quote.gas_limit = l1_gas_limit;
        quote.total_fee = match fees {
            FeeData::Eip1559 { max_fee_per_gas, .. } => l1_gas_limit * max_fee_per_gas + base_cost,
            FeeData::Legacy { gas_price } => l1_gas_limit * gas_price,
        };
        Ok(quote)
    }

    async fn estimate_withdraw(&self, request: &FeeRequest) -> Result<FeeQuote> {
        let call = self.build_withdraw_call(&BridgeCall::from_request(request, FeeQuote::zero()))?;
        let gas_limit = self
            .l2
            .estimate_gas(&CallRequest::new(call.address, call.calldata).from(request.sender).value(call.value))
            .await?;
        let gas_price = self.l1.estimate_fees_per_gas(FeeType::Legacy).await?.price_ceiling();
        Ok(FeeQuote { gas_price, gas_limit, total_fee: gas_price * gas_limit, ..FeeQuote::zero() })
    }
}

/// `finalizeDeposit` as the L2 bridge receives it from the aliased L1 bridge.
pub fn finalize_deposit_calldata(request: &FeeRequest) -> ethers::types::Bytes {
    let token = &request.token;
    let bridge_data = ethers::abi::encode(&[
        AbiToken::Bytes(ethers::abi::encode(&[AbiToken::String(token.name.clone())])),
        AbiToken::Bytes(ethers::abi::encode(&[AbiToken::String(token.symbol.clone())])),
        AbiToken::Bytes(ethers::abi::encode(&[AbiToken::Uint(U256::from(token.decimals))])),
    ]);
    encode_call(
        "finalizeDeposit(address,address,address,uint256,bytes)",
        &[
            AbiToken::Address(request.sender),
            AbiToken::Address(request.recipient),
            AbiToken::Address(token.l1_address),
            AbiToken::Uint(request.amount),
            AbiToken::Bytes(bridge_data),
        ],
    )
}

#[async_trait]
impl BridgeFamily for ZkFamily {
    fn kind(&self) -> FamilyKind {
        FamilyKind::Zk
    }

    fn single_flight(&self) -> &SingleFlight {
        &self.flight
    }

    fn l2_chain_id(&self) -> u64 {
        self.l2.chain_id()
    }

    fn approval_spender(&self, direction: Direction, token: &Token) -> Option<Address> {
        match direction {
            Direction::Deposit if !token.native => Some(self.contracts.l1_erc20_bridge),
            // L2 bridge burns directly
            _ => None,
        }
    }

    async fn estimate_fee(&self, request: &FeeRequest) -> Result<FeeQuote> {
        let quote = match request.direction {
            Direction::Deposit => self.estimate_deposit(request).await?,
            Direction::Withdraw => self.estimate_withdraw(request).await?,
        };
        info!(
            direction = request.direction.as_str(),
            token = %request.token.symbol,
            total_fee = %quote.total_fee,
            "zk fee estimated"
        );
        Ok(quote)
    }

    fn build_deposit_call(&self, call: &BridgeCall) -> Result<ContractWrite> {
        let l2_gas_limit = call.quote.l2_gas_limit.unwrap_or_default();
        let base_cost = call.quote.base_cost.unwrap_or_default();
        let pubdata = U256::from(REQUIRED_L2_GAS_PRICE_PER_PUBDATA);
        let gas_limit = (!call.quote.gas_limit.is_zero()).then_some(call.quote.gas_limit);

        if call.token.native {
            Ok(ContractWrite {
                address: self.contracts.l1_mailbox,
                function_name: "requestL2Transaction",
                calldata: encode_call(
                    "requestL2Transaction(address,uint256,bytes,uint256,uint256,bytes[],address)",
                    &[
                        AbiToken::Address(call.recipient),
                        AbiToken::Uint(call.amount),
                        AbiToken::Bytes(Vec::new()),
                        AbiToken::Uint(l2_gas_limit),
                        AbiToken::Uint(pubdata),
                        AbiToken::Array(Vec::new()),
                        AbiToken::Address(call.sender),
                    ],
                ),
                value: call.amount + base_cost,
                gas_limit,
                fees: call.quote.fee_data(),
            })
        } else {
            Ok(ContractWrite {
                address: self.contracts.l1_erc20_bridge,
                function_name: "deposit",
                calldata: encode_call(
                    "deposit(address,address,uint256,uint256,uint256,address)",
                    &[
                        AbiToken::Address(call.recipient),
                        AbiToken::Address(call.token.l1_address),
                        AbiToken::Uint(call.amount),
                        AbiToken::Uint(l2_gas_limit),
                        AbiToken::Uint(pubdata),
                        AbiToken::Address(call.sender),
                    ],
                ),
                value: base_cost,
                gas_limit,
                fees: call.quote.fee_data(),
            })
        }
    }

    fn build_withdraw_call(&self, call: &BridgeCall) -> Result<ContractWrite> {
        // the quote's gas price is an L1 price; the L2 wallet picks its own fees
        let gas_limit = (!call.quote.gas_limit.is_zero()).then_some(call.quote.gas_limit);
        if call.token.native {
            Ok(ContractWrite {
                address: self.contracts.l2_eth_token,
                function_name: "withdraw",
                calldata: encode_call("withdraw(address)", &[AbiToken::Address(call.recipient)]),
                value: call.amount,
                gas_limit,
                fees: None,
            })
        } else {
            Ok(ContractWrite {
                address: self.contracts.l2_erc20_bridge,
                function_name: "withdraw",
                calldata: encode_call(
                    "withdraw(address,address,uint256)",
                    &[
                        AbiToken::Address(call.recipient),
                        AbiToken::Address(call.token.l2_address),
                        AbiToken::Uint(call.amount),
                    ],
                ),
                value: U256::zero(),
                gas_limit,
                fees: None,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blockchain::mock::{demo_zk_contracts, MockChain};
    use crate::blockchain::traits::ChainError;

    const L2_ID: u64 = 324;

    fn sender() -> Address {
        Address::from_low_u64_be(0xb0b)
    }

    fn setup() -> (Arc<MockChain>, Arc<MockChain>, ZkFamily) {
        let l1 = Arc::new(MockChain::new(1, sender()));
        let l2 = Arc::new(MockChain::new(L2_ID, sender()));
        let contracts = demo_zk_contracts();
        l1.set_uint_response(
            contracts.l1_mailbox,
            "l2TransactionBaseCost(uint256,uint256,uint256)",
            U256::from(5_000u64),
        );
        let family = ZkFamily::new(contracts, l1.clone(), l2.clone(), l2.clone());
        (l1, l2, family)
    }

    fn request(direction: Direction, token: Token) -> FeeRequest {
        FeeRequest { direction, token, amount: U256::from(1_000u64), sender: sender(), recipient: sender() }
    }

    #[tokio::test]
    async fn test_eip1559_deposit_total_includes_base_cost() {
        let (l1, l2, family) = setup();
        l1.set_fee_data(FeeData::Eip1559 {
            max_fee_per_gas: U256::from(30u64),
            max_priority_fee_per_gas: U256::from(2u64),
        });
        l1.set_estimate_gas(Ok(U256::from(250_000u64)));
        l2.set_zk_estimate(Ok(U256::from(700_000u64)));

        let quote = family.estimate_fee(&request(Direction::Deposit, Token::native("ETH", L2_ID))).await.unwrap();
        assert_eq!(quote.gas_limit, U256::from(300_000u64));
        assert_eq!(quote.l2_gas_limit, Some(U256::from(700_000u64)));
        assert_eq!(quote.base_cost, Some(U256::from(5_000u64)));
        assert_eq!(quote.total_fee, U256::from(300_000u64 * 30 + 5_000));
        assert_eq!(quote.max_priority_fee_per_gas, Some(U256::from(2u64)));

        // the L1 estimate runs against the real deposit, which carries the base cost
        let l1_calls = l1.estimate_gas_calls();
        assert_eq!(l1_calls[0].to, demo_zk_contracts().l1_mailbox);
        assert_eq!(l1_calls[0].value, U256::from(6_000u64));
    }

    #[tokio::test]
    async fn test_legacy_deposit_total_and_floor() {
        let (l1, _, family) = setup();
        l1.set_fee_data(FeeData::Legacy { gas_price: U256::from(7u64) });
        l1.set_estimate_gas(Ok(U256::from(10_000u64)));
        let token = Token::erc20("USDT", "Tether", 6, Address::from_low_u64_be(0x70), Address::from_low_u64_be(0x71), L2_ID);

        let quote = family.estimate_fee(&request(Direction::Deposit, token)).await.unwrap();
        assert_eq!(quote.gas_limit, U256::from(MIN_L1_GAS_LIMIT_ERC20));
        assert_eq!(quote.total_fee, U256::from(MIN_L1_GAS_LIMIT_ERC20 * 7));
        assert_eq!(quote.max_fee_per_gas, None);
    }

    #[tokio::test]
    async fn test_erc20_l2_estimate_comes_from_aliased_bridge() {
        let (_, l2, family) = setup();
        let token = Token::erc20("USDT", "Tether", 6, Address::from_low_u64_be(0x70), Address::from_low_u64_be(0x71), L2_ID);
        family.estimate_l2_deposit_gas(&request(Direction::Deposit, token)).await.unwrap();
        let calls = l2.zk_estimate_calls();
        let contracts = demo_zk_contracts();
        assert_eq!(calls[0].to, contracts.l2_erc20_bridge);
        assert_eq!(calls[0].from, Some(apply_l1_to_l2_alias(contracts.l1_erc20_bridge)));
    }

    #[tokio::test]
    async fn test_withdraw_fee_is_l1_price_times_l2_gas() {
        let (l1, l2, family) = setup();
        l1.set_legacy_gas_price(U256::from(20u64));
        l2.set_estimate_gas(Ok(U256::from(90_000u64)));
        let quote = family.estimate_fee(&request(Direction::Withdraw, Token::native("ETH", L2_ID))).await.unwrap();
        assert_eq!(quote.total_fee, U256::from(1_800_000u64));
        assert_eq!(l2.estimate_gas_calls()[0].to, demo_zk_contracts().l2_eth_token);
    }

    #[tokio::test]
    async fn test_rpc_failure_propagates() {
        let (_, l2, family) = setup();
        l2.set_zk_estimate(Err(ChainError::Rpc("zks unavailable".into())));
        assert!(family.estimate_fee(&request(Direction::Deposit, Token::native("ETH", L2_ID))).await.is_err());
    }

    #[test]
    fn test_approval_only_for_erc20_deposits() {
        let (_, _, family) = setup();
        let token = Token::erc20("USDT", "Tether", 6, Address::from_low_u64_be(0x70), Address::from_low_u64_be(0x71), L2_ID);
        assert_eq!(family.approval_spender(Direction::Deposit, &token), Some(demo_zk_contracts().l1_erc20_bridge));
        assert_eq!(family.approval_spender(Direction::Withdraw, &token), None);
    }
}
