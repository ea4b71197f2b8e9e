//! The asset being moved and its per-chain addresses.

use ethers::abi::Token as AbiToken;
use ethers::types::{Address, U256};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::blockchain::traits::{CallRequest, PublicClient};
use crate::core::abi::{decode_uint, encode_call};
use crate::core::errors::Result;
use crate::core::validation::amount_to_base_units;
use crate::network::Network;

/// Placeholder address standing in for the native asset on both chains.
pub const NATIVE_SENTINEL: Address = Address::zero();

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Token {
    /// Address on the chain the token is currently viewed from.
    pub address: Address,
    pub l1_address: Address,
    pub l2_address: Address,
    pub symbol: String,
    pub name: String,
    pub decimals: u32,
    pub native: bool,
    pub l2_chain_id: u64,
}

impl Token {
    pub fn native(symbol: &str, l2_chain_id: u64) -> Self {
        Self {
            address: NATIVE_SENTINEL,
            l1_address: NATIVE_SENTINEL,
            l2_address: NATIVE_SENTINEL,
            symbol: symbol.to_string(),
            name: symbol.to_string(),
            decimals: 18,
            native: true,
            l2_chain_id,
        }
    }

    pub fn erc20(
        symbol: &str,
        name: &str,
        decimals: u32,
        l1_address: Address,
        l2_address: Address,
        l2_chain_id: u64,
    ) -> Self {
        Self {
            address: l1_address,
            l1_address,
            l2_address,
            symbol: symbol.to_string(),
            name: name.to_string(),
            decimals,
            native: false,
            l2_chain_id,
        }
    }

    /// Same token with `address` switched to the side `network` is on.
    pub fn viewed_from(&self, network: &Network) -> Self {
        let address = if network.is_l2 { self.l2_address } else { self.l1_address };
        Self { address, ..self.clone() }
    }

    /// Whether `address` is the contract on `network`. Native assets always match.
    pub fn address_matches(&self, network: &Network) -> bool {
        if self.native {
            return true;
        }
        let expected = if network.is_l2 { self.l2_address } else { self.l1_address };
        self.address == expected
    }

    pub fn parse_amount(&self, amount: &str) -> Result<U256> {
        amount_to_base_units(amount, self.decimals)
    }
}

/// Token currently chosen for transfer together with the entered amount.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenSelection {
    pub token: Token,
    pub amount: Option<String>,
    pub balance: Option<U256>,
}

impl TokenSelection {
    pub fn new(token: Token) -> Self {
        Self { token, amount: None, balance: None }
    }

    pub fn with_amount(mut self, amount: impl Into<String>) -> Self {
        self.amount = Some(amount.into());
        self
    }

    /// Entered amount in base units; `None` when nothing was entered.
    pub fn amount_base_units(&self) -> Result<Option<U256>> {
        match self.amount.as_deref().map(str::trim) {
            None | Some("") => Ok(None),
            Some(amount) => self.token.parse_amount(amount).map(Some),
        }
    }

    /// Allowance is zero or below the amount for a non-native token.
    pub fn need_approval(&self, allowance: U256) -> Result<bool> {
        if self.token.native {
            return Ok(false);
        }
        let amount = self.amount_base_units()?.unwrap_or_default();
        Ok(allowance.is_zero() || allowance < amount)
    }

    pub fn has_sufficient_balance(&self) -> Result<bool> {
        match (self.balance, self.amount_base_units()?) {
            (Some(balance), Some(amount)) => Ok(balance >= amount),
            (None, _) => Ok(false),
            (_, None) => Ok(true),
        }
    }

    /// Reads the owner's balance of the selected token on `network`.
    pub async fn refresh_balance(
        &mut self,
        client: &dyn PublicClient,
        network: &Network,
        owner: Address,
    ) -> Result<U256> {
        let balance = if self.token.native {
            client.get_balance(owner).await?
        } else {
            let token = self.token.viewed_from(network);
            let data = encode_call("balanceOf(address)", &[AbiToken::Address(owner)]);
            let raw = client.call(&CallRequest::new(token.address, data)).await?;
            decode_uint(&raw)?
        };
        debug!(symbol = %self.token.symbol, chain = network.id, %balance, "token balance refreshed");
        self.balance = Some(balance);
        Ok(balance)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn l1() -> Network {
        Network {
            id: 1,
            name: "Ethereum".into(),
            is_l2: false,
            rpc_url: String::new(),
            block_explorer_url: String::new(),
        }
    }

    fn l2() -> Network {
        Network { id: 534352, name: "L2".into(), is_l2: true, ..l1() }
    }

    fn usdc() -> Token {
        Token::erc20(
            "USDC",
            "USD Coin",
            6,
            Address::from_low_u64_be(0xa1),
            Address::from_low_u64_be(0xb2),
            534352,
        )
    }

    #[test]
    fn test_viewed_from_switches_address() {
        let token = usdc();
        assert_eq!(token.viewed_from(&l2()).address, Address::from_low_u64_be(0xb2));
        assert_eq!(token.viewed_from(&l1()).address, Address::from_low_u64_be(0xa1));
    }

    #[test]
    fn test_address_matches() {
        let token = usdc();
        assert!(token.address_matches(&l1()));
        assert!(!token.address_matches(&l2()));
        assert!(Token::native("ETH", 534352).address_matches(&l2()));
    }

    #[test]
    fn test_need_approval() {
        let selection = TokenSelection::new(usdc()).with_amount("2.5");
        assert!(selection.need_approval(U256::zero()).unwrap());
        assert!(selection.need_approval(U256::from(2_499_999u64)).unwrap());
        assert!(!selection.need_approval(U256::from(2_500_000u64)).unwrap());

        let native = TokenSelection::new(Token::native("ETH", 534352)).with_amount("1");
        assert!(!native.need_approval(U256::zero()).unwrap());
    }

    #[test]
    fn test_amount_base_units_empty_is_none() {
        let selection = TokenSelection::new(usdc());
        assert_eq!(selection.amount_base_units().unwrap(), None);
        let blank = TokenSelection::new(usdc()).with_amount("  ");
        assert_eq!(blank.amount_base_units().unwrap(), None);
    }

    #[test]
    fn test_has_sufficient_balance() {
        let mut selection = TokenSelection::new(usdc()).with_amount("1");
        assert!(!selection.has_sufficient_balance().unwrap());
        selection.balance = Some(U256::from(1_000_000u64));
        assert!(selection.has_sufficient_balance().unwrap());
        selection.balance = Some(U256::from(999_999u64));
        assert!(!selection.has_sufficient_balance().unwrap());
    }
}
