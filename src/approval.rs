//! ERC-20 allowance checks and approvals that gate a bridge transfer.

use ethers::abi::Token as AbiToken;
use ethers::types::{Address, H256, U256};
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::{info, warn};

use crate::blockchain::traits::{CallRequest, ContractWrite, PublicClient, WalletClient};
use crate::core::abi::{decode_uint, encode_call};
use crate::core::errors::{BridgeError, Result};
use crate::token::Token;

#[derive(Debug, Clone, PartialEq, Eq)]
struct AllowanceSnapshot {
    owner: Address,
    token: Address,
    spender: Address,
    allowance: U256,
}

/// Reads and sets allowances on the source chain.
pub struct ApprovalGate {
    public: Arc<dyn PublicClient>,
    wallet: Arc<dyn WalletClient>,
    snapshot: Mutex<Option<AllowanceSnapshot>>,
    last_error: Mutex<Option<String>>,
}

impl ApprovalGate {
    pub fn new(public: Arc<dyn PublicClient>, wallet: Arc<dyn WalletClient>) -> Self {
        Self { public, wallet, snapshot: Mutex::new(None), last_error: Mutex::new(None) }
    }

    /// Reads `allowance(owner, spender)` fresh from the chain and caches it.
    pub async fn check_approval(&self, owner: Address, token: &Token, spender: Address) -> Result<U256> {
        if token.native {
            return Ok(U256::MAX);
        }
        let data = encode_call(
            "allowance(address,address)",
            &[AbiToken::Address(owner), AbiToken::Address(spender)],
        );
        let raw = self
            .public
            .call(&CallRequest::new(token.address, data))
            .await
            .map_err(|e| self.fail(format!("allowance read failed: {}", e)))?;
        let allowance = decode_uint(&raw).map_err(|e| self.fail(e.to_string()))?;
        *self.snapshot.lock() =
            Some(AllowanceSnapshot { owner, token: token.address, spender, allowance });
        Ok(allowance)
    }

    /// True when the last observed allowance for this owner/token/spender is zero or below `amount`.
    /// Unknown allowances count as needing approval.
    pub fn need_approval(&self, owner: Address, token: &Token, spender: Address, amount: U256) -> bool {
        if token.native {
            return false;
        }
        match &*self.snapshot.lock() {
            Some(s) if s.owner == owner && s.token == token.address && s.spender == spender => {
                s.allowance.is_zero() || s.allowance < amount
            }
            _ => true,
        }
    }

    /// Sends `approve(spender, amount)`, waits for it to be mined and re-reads the allowance.
    pub async fn approve(&self, token: &Token, spender: Address, amount: U256) -> Result<H256> {
        *self.last_error.lock() = None;
        let owner = self.wallet.address();
        let request = ContractWrite {
            address: token.address,
            function_name: "approve",
            calldata: encode_call(
                "approve(address,uint256)",
                &[AbiToken::Address(spender), AbiToken::Uint(amount)],
            ),
            value: U256::zero(),
            gas_limit: None,
            fees: None,
        };
        info!(token = %token.symbol, spender = ?spender, %amount, "requesting token approval");
        let hash = self
            .wallet
            .write_contract(request)
            .await
            .map_err(|e| self.fail(format!("approve rejected: {}", e)))?;
        let receipt = self
            .public
            .wait_for_transaction_receipt(hash)
            .await
            .map_err(|e| self.fail(format!("approve {:?} not confirmed: {}", hash, e)))?;
        if !receipt.status.is_success() {
            return Err(self.fail(format!("approve {:?} reverted", hash)));
        }
        let allowance = self.check_approval(owner, token, spender).await?;
        info!(hash = ?hash, %allowance, "token approval confirmed");
        Ok(hash)
    }

    /// Error from the most recent failed allowance read or approval.
    pub fn last_error(&self) -> Option<String> {
        self.last_error.lock().clone()
    }

    fn fail(&self, msg: String) -> BridgeError {
        warn!("{}", msg);
        *self.last_error.lock() = Some(msg.clone());
        BridgeError::Approval(msg)
    }
}
