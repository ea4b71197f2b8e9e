//! Messenger + gateway bridge of the optimistic-rollup style family.
//!
//! Deposits pay for L2 execution up front on L1, so the L2 gas limit is found by
//! simulating the messenger's relay of the finalize call on L2, from the alias
//! of the L1 messenger. Withdrawals additionally pay an L1 data fee quoted by
//! the L2's gas price oracle predeploy.

use async_trait::async_trait;
use ethers::abi::Token as AbiToken;
use ethers::types::transaction::eip2718::TypedTransaction;
use ethers::types::{Address, Bytes, TransactionRequest, U256};
use std::sync::Arc;
use tracing::{debug, info};

use super::family::{pad_gas_limit, BridgeCall, BridgeFamily};
use crate::blockchain::traits::{CallRequest, ContractWrite, FeeType, PublicClient};
use crate::core::abi::{apply_l1_to_l2_alias, decode_uint, encode_call};
use crate::core::config::{FamilyKind, GatewayPair, RollupContracts};
use crate::core::errors::{BridgeError, Result};
use crate::fee::{FeeQuote, FeeRequest, SingleFlight};
use crate::network::Direction;
use crate::token::Token;

/// Gas limit used when the destination token contract is not deployed yet.
pub const UNDEPLOYED_TOKEN_GAS_LIMIT: u64 = 700_000;

/// Nonce passed to the relay simulation; never reached by real messages.
const SIMULATION_NONCE: U256 = U256::MAX;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GatewayType {
    Eth,
    Weth,
    StandardErc20,
    CustomErc20,
    Usdc,
    Dai,
}

impl GatewayType {
    /// Floor applied to the simulated relay gas before padding.
    pub fn min_gas_limit(self) -> u64 {
        match self {
            GatewayType::Eth => 140_000,
            GatewayType::Weth => 200_000,
            GatewayType::StandardErc20 | GatewayType::CustomErc20 => 180_000,
            GatewayType::Usdc | GatewayType::Dai => 160_000,
        }
    }

    fn carries_value(self) -> bool {
        matches!(self, GatewayType::Eth | GatewayType::Weth)
    }
}

pub struct RollupFamily {
    contracts: RollupContracts,
    l1: Arc<dyn PublicClient>,
    l2: Arc<dyn PublicClient>,
    flight: SingleFlight,
}

impl RollupFamily {
    pub fn new(contracts: RollupContracts, l1: Arc<dyn PublicClient>, l2: Arc<dyn PublicClient>) -> Self {
        Self { contracts, l1, l2, flight: SingleFlight::new() }
    }

    pub fn gateway_type(&self, token: &Token) -> GatewayType {
        if token.native {
            GatewayType::Eth
        } else if token.l1_address == self.contracts.weth_l1 {
            GatewayType::Weth
        } else if Some(token.l1_address) == self.contracts.usdc_l1 {
            GatewayType::Usdc
        } else if Some(token.l1_address) == self.contracts.dai_l1 {
            GatewayType::Dai
        } else if self.contracts.custom_tokens.contains(&token.l1_address) {
            GatewayType::CustomErc20
        } else {
            GatewayType::StandardErc20
        }
    }

    pub fn gateway_pair(&self, gateway: GatewayType) -> Result<GatewayPair> {
        let pair = match gateway {
            GatewayType::Eth => Some(self.contracts.eth_gateway),
            GatewayType::Weth => Some(self.contracts.weth_gateway),
            GatewayType::StandardErc20 => Some(self.contracts.standard_erc20_gateway),
            GatewayType::CustomErc20 => Some(self.contracts.custom_erc20_gateway),
            GatewayType::Usdc => self.contracts.usdc_gateway,
            GatewayType::Dai => self.contracts.dai_gateway,
        };
        pair.ok_or_else(|| BridgeError::Config(format!("no gateway configured for {:?}", gateway)))
    }

    /// L2 gas limit the deposit must prepay, padded by 20%.
    pub async fn estimate_deposit_gas_limit(&self, request: &FeeRequest) -> Result<U256> {
        let gateway = self.gateway_type(&request.token);
        if gateway != GatewayType::Eth {
            let code = self.l2.get_bytecode(request.token.l2_address).await?;
            if code.is_empty() {
                debug!(token = ?request.token.l2_address, "destination token not deployed, using fallback gas limit");
                return Ok(U256::from(UNDEPLOYED_TOKEN_GAS_LIMIT));
            }
        }

        let pair = self.gateway_pair(gateway)?;
        let message = finalize_deposit_calldata(gateway, request);
        let relay_value = if gateway.carries_value() { request.amount } else { U256::zero() };
        let relay = encode_call(
            "relayMessage(address,address,uint256,uint256,bytes)",
            &[
                AbiToken::Address(pair.l1),
                AbiToken::Address(pair.l2),
                AbiToken::Uint(relay_value),
                AbiToken::Uint(SIMULATION_NONCE),
                AbiToken::Bytes(message.to_vec()),
            ],
        );
        let sender = apply_l1_to_l2_alias(self.contracts.l1_messenger);
        let simulation = CallRequest::new(self.contracts.l2_messenger, relay).from(sender);
        let estimate = self.l2.estimate_gas(&simulation).await?;
        let floored = estimate.max(U256::from(gateway.min_gas_limit()));
        debug!(?gateway, %estimate, "relay simulation finished");
        Ok(pad_gas_limit(floored))
    }

    /// Current `l2BaseFee()` from the L1-side oracle.
    pub async fn l2_base_fee(&self) -> Result<U256> {
        let data = encode_call("l2BaseFee()", &[]);
        let raw = self.l1.call(&CallRequest::new(self.contracts.l2_gas_price_oracle, data)).await?;
        Ok(decode_uint(&raw)?)
    }

    /// `getL1Fee(serializedTx)` from the L2 oracle predeploy.
    pub async fn l1_data_fee(&self, serialized_tx: Bytes) -> Result<U256> {
        let data = encode_call("getL1Fee(bytes)", &[AbiToken::Bytes(serialized_tx.to_vec())]);
        let raw = self.l2.call(&CallRequest::new(self.contracts.l1_gas_price_oracle, data)).await?;
        Ok(decode_uint(&raw)?)
    }

    async fn estimate_deposit(&self, request: &FeeRequest) -> Result<FeeQuote> {
        let gas_limit = self.estimate_deposit_gas_limit(request).await?;
        let gas_price = self.l2_base_fee().await?;
        Ok(FeeQuote { gas_price, gas_limit, total_fee: gas_price * gas_limit, ..FeeQuote::zero() })
    }

    async fn estimate_withdraw(&self, request: &FeeRequest) -> Result<FeeQuote> {
        let call = self.build_withdraw_call(&BridgeCall::from_request(request, FeeQuote::zero()))?;
        let estimate_request = CallRequest::new(call.address, call.calldata.clone())
            .from(request.sender)
            .value(call.value);
        let gas_limit = pad_gas_limit(self.l2.estimate_gas(&estimate_request).await?);
        let gas_price = self.l2.estimate_fees_per_gas(FeeType::Legacy).await?.price_ceiling();
        let nonce = self.l2.get_transaction_count(request.sender).await?;

        let unsigned = TransactionRequest::new()
            .from(request.sender)
            .to(call.address)
            .data(call.calldata)
            .value(call.value)
            .gas(gas_limit)
            .gas_price(gas_price)
            .nonce(nonce)
            .chain_id(self.l2.chain_id());
        let l1_data_fee = self.l1_data_fee(TypedTransaction::Legacy(unsigned).rlp()).await?;

        Ok(FeeQuote {
            gas_price,
            gas_limit,
            l1_data_fee: Some(l1_data_fee),
            total_fee: gas_price * gas_limit + l1_data_fee,
            ..FeeQuote::zero()
        })
    }
}

/// Calldata the destination gateway runs to finalize the deposit.
pub fn finalize_deposit_calldata(gateway: GatewayType, request: &FeeRequest) -> Bytes {
    let token = &request.token;
    match gateway {
        GatewayType::Eth => encode_call(
            "finalizeDepositETH(address,address,uint256,bytes)",
            &[
                AbiToken::Address(request.sender),
                AbiToken::Address(request.recipient),
                AbiToken::Uint(request.amount),
                AbiToken::Bytes(Vec::new()),
            ],
        ),
        _ => {
            let data = if gateway == GatewayType::StandardErc20 {
                // (callData, deployData); deployData stays empty once the L2 token exists
                ethers::abi::encode(&[AbiToken::Bytes(Vec::new()), AbiToken::Bytes(Vec::new())])
            } else {
                Vec::new()
            };
            encode_call(
                "finalizeDepositERC20(address,address,address,address,uint256,bytes)",
                &[
                    AbiToken::Address(token.l1_address),
                    AbiToken::Address(token.l2_address),
                    AbiToken::Address(request.sender),
                    AbiToken::Address(request.recipient),
                    AbiToken::Uint(request.amount),
                    AbiToken::Bytes(data),
                ],
            )
        }
    }
}

#[async_trait]
impl BridgeFamily for RollupFamily {
    fn kind(&self) -> FamilyKind {
        FamilyKind::Rollup
    }

    fn single_flight(&self) -> &SingleFlight {
        &self.flight
    }

    fn l2_chain_id(&self) -> u64 {
        self.l2.chain_id()
    }

    fn approval_spender(&self, direction: Direction, token: &Token) -> Option<Address> {
        if token.native {
            return None;
        }
        Some(match direction {
            Direction::Deposit => self.contracts.l1_gateway_router,
            Direction::Withdraw => self.contracts.l2_gateway_router,
        })
    }

    async fn estimate_fee(&self, request: &FeeRequest) -> Result<FeeQuote> {
        let quote = match request.direction {
            Direction::Deposit => self.estimate_deposit(request).await?,
            Direction::Withdraw => self.estimate_withdraw(request).await?,
        };
        info!(
            direction = request.direction.as_str(),
            token = %request.token.symbol,
            gas_price = %quote.gas_price,
            gas_limit = %quote.gas_limit,
            "rollup fee estimated"
        );
        Ok(quote)
    }

    fn build_deposit_call(&self, call: &BridgeCall) -> Result<ContractWrite> {
        let fee = call.quote.gas_price * call.quote.gas_limit;
        let (function_name, calldata, value) = if call.token.native {
            (
                "depositETH",
                encode_call(
                    "depositETH(address,uint256,uint256)",
                    &[
                        AbiToken::Address(call.recipient),
                        AbiToken::Uint(call.amount),
                        AbiToken::Uint(call.quote.gas_limit),
                    ],
                ),
                call.amount + fee,
            )
        } else {
            (
                "depositERC20",
                encode_call(
                    "depositERC20(address,address,uint256,uint256)",
                    &[
                        AbiToken::Address(call.token.l1_address),
                        AbiToken::Address(call.recipient),
                        AbiToken::Uint(call.amount),
                        AbiToken::Uint(call.quote.gas_limit),
                    ],
                ),
                fee,
            )
        };
        Ok(ContractWrite {
            address: self.contracts.l1_gateway_router,
            function_name,
            calldata,
            value,
            gas_limit: None,
            fees: None,
        })
    }

    fn build_withdraw_call(&self, call: &BridgeCall) -> Result<ContractWrite> {
        // messages to L1 are finalized by the user, so no L1 gas is prepaid
        let message_gas_limit = U256::zero();
        let (function_name, calldata, value) = if call.token.native {
            (
                "withdrawETH",
                encode_call(
                    "withdrawETH(address,uint256,uint256)",
                    &[
                        AbiToken::Address(call.recipient),
                        AbiToken::Uint(call.amount),
                        AbiToken::Uint(message_gas_limit),
                    ],
                ),
                call.amount,
            )
        } else {
            (
                "withdrawERC20",
                encode_call(
                    "withdrawERC20(address,address,uint256,uint256)",
                    &[
                        AbiToken::Address(call.token.l2_address),
                        AbiToken::Address(call.recipient),
                        AbiToken::Uint(call.amount),
                        AbiToken::Uint(message_gas_limit),
                    ],
                ),
                U256::zero(),
            )
        };
        Ok(ContractWrite {
            address: self.contracts.l2_gateway_router,
            function_name,
            calldata,
            value,
            gas_limit: (!call.quote.gas_limit.is_zero()).then_some(call.quote.gas_limit),
            fees: call.quote.fee_data(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blockchain::mock::{demo_rollup_contracts, MockChain};
    use crate::blockchain::traits::ChainError;
    use test_case::test_case;

    const L1_ID: u64 = 1;
    const L2_ID: u64 = 534352;

    fn sender() -> Address {
        Address::from_low_u64_be(0xa11ce)
    }

    fn setup() -> (Arc<MockChain>, Arc<MockChain>, RollupFamily) {
        let l1 = Arc::new(MockChain::new(L1_ID, sender()));
        let l2 = Arc::new(MockChain::new(L2_ID, sender()));
        let contracts = demo_rollup_contracts();
        l1.set_uint_response(contracts.l2_gas_price_oracle, "l2BaseFee()", U256::from(1_000_000_000u64));
        l2.set_uint_response(contracts.l1_gas_price_oracle, "getL1Fee(bytes)", U256::from(31_337u64));
        let family = RollupFamily::new(contracts, l1.clone(), l2.clone());
        (l1, l2, family)
    }

    fn request(direction: Direction, token: Token) -> FeeRequest {
        FeeRequest {
            direction,
            token,
            amount: U256::exp10(18),
            sender: sender(),
            recipient: sender(),
        }
    }

    fn erc20(l1: u64) -> Token {
        Token::erc20("TKN", "Token", 18, Address::from_low_u64_be(l1), Address::from_low_u64_be(l1 + 1), L2_ID)
    }

    #[test_case(Token::native("ETH", L2_ID) => GatewayType::Eth; "native")]
    #[test_case(erc20(0xe7e1) => GatewayType::Weth; "weth")]
    #[test_case(erc20(0xc1c1) => GatewayType::Usdc; "usdc")]
    #[test_case(erc20(0x7777) => GatewayType::StandardErc20; "standard")]
    fn test_gateway_type(token: Token) -> GatewayType {
        let (_, _, family) = setup();
        family.gateway_type(&token)
    }

    #[tokio::test]
    async fn test_undeployed_token_uses_fallback_without_simulation() {
        let (_, l2, family) = setup();
        let req = request(Direction::Deposit, erc20(0x7777));
        let gas = family.estimate_deposit_gas_limit(&req).await.unwrap();
        assert_eq!(gas, U256::from(UNDEPLOYED_TOKEN_GAS_LIMIT));
        assert!(l2.estimate_gas_calls().is_empty());
    }

    #[tokio::test]
    async fn test_eth_deposit_relay_is_floored_then_padded() {
        let (_, l2, family) = setup();
        l2.set_estimate_gas(Ok(U256::from(50_000u64)));
        let quote = family.estimate_fee(&request(Direction::Deposit, Token::native("ETH", L2_ID))).await.unwrap();

        let expected_limit = U256::from(GatewayType::Eth.min_gas_limit() * 120 / 100);
        assert_eq!(quote.gas_limit, expected_limit);
        assert_eq!(quote.gas_price, U256::from(1_000_000_000u64));
        assert_eq!(quote.total_fee, quote.gas_price * quote.gas_limit);

        let calls = l2.estimate_gas_calls();
        assert_eq!(calls.len(), 1);
        let contracts = demo_rollup_contracts();
        assert_eq!(calls[0].to, contracts.l2_messenger);
        assert_eq!(calls[0].from, Some(apply_l1_to_l2_alias(contracts.l1_messenger)));
        assert_eq!(
            &calls[0].data[..4],
            &crate::core::abi::selector_from_signature("relayMessage(address,address,uint256,uint256,bytes)")
        );
    }

    #[tokio::test]
    async fn test_deployed_token_uses_simulated_estimate() {
        let (_, l2, family) = setup();
        let token = erc20(0x7777);
        l2.set_bytecode(token.l2_address, vec![0x60, 0x80]);
        l2.set_estimate_gas(Ok(U256::from(300_000u64)));
        let gas = family.estimate_deposit_gas_limit(&request(Direction::Deposit, token)).await.unwrap();
        assert_eq!(gas, U256::from(360_000u64));
    }

    #[tokio::test]
    async fn test_withdraw_adds_l1_data_fee() {
        let (_, l2, family) = setup();
        l2.set_estimate_gas(Ok(U256::from(100_000u64)));
        l2.set_legacy_gas_price(U256::from(10u64));
        let token = erc20(0x7777).viewed_from(&crate::network::Network {
            id: L2_ID,
            name: "L2".into(),
            is_l2: true,
            rpc_url: String::new(),
            block_explorer_url: String::new(),
        });
        let quote = family.estimate_fee(&request(Direction::Withdraw, token)).await.unwrap();
        assert_eq!(quote.gas_limit, U256::from(120_000u64));
        assert_eq!(quote.l1_data_fee, Some(U256::from(31_337u64)));
        assert_eq!(quote.total_fee, U256::from(1_200_000u64 + 31_337));
    }

    #[tokio::test]
    async fn test_simulation_failure_propagates() {
        let (_, l2, family) = setup();
        l2.set_estimate_gas(Err(ChainError::Rpc("execution reverted".into())));
        let result = family.estimate_fee(&request(Direction::Deposit, Token::native("ETH", L2_ID))).await;
        assert!(result.is_err());
    }

    #[test]
    fn test_eth_deposit_value_prepays_l2_gas() {
        let (_, _, family) = setup();
        let quote = FeeQuote {
            gas_price: U256::from(1_000_000_000u64),
            gas_limit: U256::from(150_000u64),
            ..FeeQuote::zero()
        };
        let req = request(Direction::Deposit, Token::native("ETH", L2_ID));
        let write = family.build_deposit_call(&BridgeCall::from_request(&req, quote)).unwrap();
        assert_eq!(write.function_name, "depositETH");
        assert_eq!(write.address, demo_rollup_contracts().l1_gateway_router);
        assert_eq!(write.value, U256::exp10(18) + U256::from(150_000_000_000_000u64));
    }

    #[test]
    fn test_approval_spender_is_source_router() {
        let (_, _, family) = setup();
        let contracts = demo_rollup_contracts();
        assert_eq!(family.approval_spender(Direction::Deposit, &erc20(0x7777)), Some(contracts.l1_gateway_router));
        assert_eq!(family.approval_spender(Direction::Withdraw, &erc20(0x7777)), Some(contracts.l2_gateway_router));
        assert_eq!(family.approval_spender(Direction::Deposit, &Token::native("ETH", L2_ID)), None);
    }
}
