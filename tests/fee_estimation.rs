// tests/fee_estimation.rs
mod util;

use ethers::types::U256;
use pretty_assertions::assert_eq;
use std::time::Duration;

use portal_bridge::blockchain::traits::ChainError;
use portal_bridge::core::config::FamilyKind;
use portal_bridge::core::errors::BridgeError;
use portal_bridge::fee::{FeeQuote, FeeRequest, QuoteRefresher, RefreshOutcome};
use portal_bridge::network::Direction;
use portal_bridge::token::Token;
use util::*;

fn fee_request(h: &Harness, token: Token, amount: U256) -> FeeRequest {
    FeeRequest { direction: h.direction, token, amount, sender: account(), recipient: account() }
}

#[tokio::test]
async fn failed_estimation_resets_quote() {
    let h = Harness::new(FamilyKind::Rollup, Direction::Deposit);
    let usdc = h.usdc();
    h.l2.set_estimate_gas(Ok(U256::from(300_000u64)));

    let first = h.fees.refresh(&fee_request(&h, usdc.clone(), U256::from(5u64))).await.unwrap();
    let RefreshOutcome::Updated(quote) = first else { panic!("estimation was dropped") };
    assert_eq!(quote.gas_limit, U256::from(360_000u64));
    assert!(!h.fees.store().current().is_zero());

    h.l2.set_estimate_gas(Err(ChainError::Rpc("execution reverted".into())));
    let err = h.fees.refresh(&fee_request(&h, usdc, U256::from(6u64))).await.unwrap_err();
    assert!(matches!(err, BridgeError::Estimation(_)));
    assert_eq!(h.fees.store().current(), FeeQuote::zero());
}

#[tokio::test]
async fn undeployed_destination_token_uses_fallback() {
    let h = Harness::new(FamilyKind::Rollup, Direction::Deposit);
    let usdc = h.usdc();
    h.l2.set_bytecode(usdc.l2_address, Vec::<u8>::new());

    let RefreshOutcome::Updated(quote) = h.fees.refresh(&fee_request(&h, usdc, U256::from(1u64))).await.unwrap() else {
        panic!("estimation was dropped")
    };
    assert_eq!(quote.gas_limit, U256::from(700_000u64));
    assert!(h.l2.estimate_gas_calls().is_empty());
}

#[tokio::test]
async fn busy_estimator_drops_request() {
    let h = Harness::new(FamilyKind::Zk, Direction::Deposit);
    let _held = h.family.single_flight().try_acquire().unwrap();
    let outcome = h.fees.refresh(&fee_request(&h, h.eth(), ether(1))).await.unwrap();
    assert_eq!(outcome, RefreshOutcome::Dropped);
    assert!(h.l2.zk_estimate_calls().is_empty());
}

#[tokio::test]
async fn rollup_withdraw_adds_l1_data_fee() {
    let h = Harness::new(FamilyKind::Rollup, Direction::Withdraw);
    let RefreshOutcome::Updated(quote) = h.fees.refresh(&fee_request(&h, h.eth(), ether(1))).await.unwrap() else {
        panic!("estimation was dropped")
    };
    assert_eq!(quote.gas_limit, U256::from(120_000u64));
    assert_eq!(quote.gas_price, U256::from(1_000_000_000u64));
    assert_eq!(quote.l1_data_fee, Some(U256::from(31_337u64)));
    assert_eq!(quote.total_fee, U256::from(120_000u64) * U256::from(1_000_000_000u64) + U256::from(31_337u64));
}

#[tokio::test(start_paused = true)]
async fn debounced_refresh_runs_latest_input_once() {
    let h = Harness::new(FamilyKind::Rollup, Direction::Deposit);
    let refresher = QuoteRefresher::new(h.fees.clone(), Duration::from_millis(h.config.fees.debounce_ms));

    for amount in 1..=3u64 {
        refresher.schedule(fee_request(&h, h.eth(), ether(amount)));
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    tokio::time::sleep(Duration::from_secs(1)).await;

    assert_eq!(h.l2.estimate_gas_calls().len(), 1);
    assert_eq!(refresher.store().current().key.unwrap().amount, ether(3));
    assert!(refresher.last_error().is_none());
}
