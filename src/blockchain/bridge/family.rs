use async_trait::async_trait;
use ethers::types::{Address, U256};

use crate::blockchain::traits::ContractWrite;
use crate::core::config::FamilyKind;
use crate::core::errors::Result;
use crate::fee::{FeeQuote, FeeRequest, SingleFlight};
use crate::network::Direction;
use crate::token::Token;

/// Inputs for building the on-chain bridge call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BridgeCall {
    /// Token with `address` set for the source chain.
    pub token: Token,
    pub amount: U256,
    pub sender: Address,
    pub recipient: Address,
    pub quote: FeeQuote,
}

impl BridgeCall {
    pub fn from_request(request: &FeeRequest, quote: FeeQuote) -> Self {
        Self {
            token: request.token.clone(),
            amount: request.amount,
            sender: request.sender,
            recipient: request.recipient,
            quote,
        }
    }
}

/// One L1 <-> L2 bridge protocol family.
#[async_trait]
pub trait BridgeFamily: Send + Sync {
    fn kind(&self) -> FamilyKind;

    /// The estimator's own in-flight guard.
    fn single_flight(&self) -> &SingleFlight;

    /// Chain id of the family's L2; tokens selected for this family must carry it.
    fn l2_chain_id(&self) -> u64;

    /// Contract that must hold an allowance before `token` can be bridged, if any.
    fn approval_spender(&self, direction: Direction, token: &Token) -> Option<Address>;

    async fn estimate_fee(&self, request: &FeeRequest) -> Result<FeeQuote>;

    fn build_deposit_call(&self, call: &BridgeCall) -> Result<ContractWrite>;

    fn build_withdraw_call(&self, call: &BridgeCall) -> Result<ContractWrite>;

    fn build_call(&self, direction: Direction, call: &BridgeCall) -> Result<ContractWrite> {
        match direction {
            Direction::Deposit => self.build_deposit_call(call),
            Direction::Withdraw => self.build_withdraw_call(call),
        }
    }
}

/// `value * 120 / 100`, floored.
pub fn pad_gas_limit(value: U256) -> U256 {
    value * U256::from(120u64) / U256::from(100u64)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pad_gas_limit_floors() {
        assert_eq!(pad_gas_limit(U256::from(100_000u64)), U256::from(120_000u64));
        assert_eq!(pad_gas_limit(U256::from(7u64)), U256::from(8u64));
        assert_eq!(pad_gas_limit(U256::zero()), U256::zero());
    }
}
