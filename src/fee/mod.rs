//! Fee quotes, the shared quote store, and the single-flight guard that keeps
//! each estimator to one run at a time.

use ethers::types::{Address, U256};
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use crate::blockchain::traits::FeeData;
use crate::blockchain::bridge::family::BridgeFamily;
use crate::core::errors::{BridgeError, Result};
use crate::network::Direction;
use crate::token::Token;
use crate::tools::debounce::Debouncer;

/// Identifies the inputs a quote was computed for.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct QuoteKey {
    pub direction: Direction,
    pub token_l1_address: Address,
    pub amount: U256,
    pub sender: Address,
    /// Encoded into the rollup relay simulation.
    pub recipient: Address,
}

/// Inputs for one fee estimation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeeRequest {
    pub direction: Direction,
    /// Token with `address` set for the source chain.
    pub token: Token,
    pub amount: U256,
    pub sender: Address,
    pub recipient: Address,
}

impl FeeRequest {
    pub fn key(&self) -> QuoteKey {
        QuoteKey {
            direction: self.direction,
            token_l1_address: self.token.l1_address,
            amount: self.amount,
            sender: self.sender,
            recipient: self.recipient,
        }
    }
}

/// Family-specific fee bag. All-zero means "no valid quote".
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct FeeQuote {
    pub key: Option<QuoteKey>,
    pub gas_price: U256,
    pub gas_limit: U256,
    pub l1_data_fee: Option<U256>,
    pub max_fee_per_gas: Option<U256>,
    pub max_priority_fee_per_gas: Option<U256>,
    /// zk family: gas limit of the L2 leg of a deposit.
    pub l2_gas_limit: Option<U256>,
    /// zk family: L2 base cost paid on L1.
    pub base_cost: Option<U256>,
    pub total_fee: U256,
}

impl FeeQuote {
    pub fn zero() -> Self {
        Self::default()
    }

    pub fn is_zero(&self) -> bool {
        self.gas_price.is_zero() && self.gas_limit.is_zero() && self.total_fee.is_zero()
    }

    /// Fee fields to attach to the transaction itself, when the quote carries them.
    pub fn fee_data(&self) -> Option<FeeData> {
        match (self.max_fee_per_gas, self.max_priority_fee_per_gas) {
            (Some(max_fee_per_gas), Some(max_priority_fee_per_gas)) => {
                Some(FeeData::Eip1559 { max_fee_per_gas, max_priority_fee_per_gas })
            }
            _ if !self.gas_price.is_zero() => Some(FeeData::Legacy { gas_price: self.gas_price }),
            _ => None,
        }
    }

    /// Usable for `key`.
    pub fn is_valid_for(&self, key: &QuoteKey) -> bool {
        !self.is_zero() && self.key.as_ref() == Some(key)
    }
}

/// Shared fee quote, overwritten wholesale on each estimation cycle.
#[derive(Debug, Clone, Default)]
pub struct FeeStore {
    inner: Arc<RwLock<FeeQuote>>,
}

impl FeeStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn current(&self) -> FeeQuote {
        self.inner.read().clone()
    }

    pub fn replace(&self, quote: FeeQuote) {
        *self.inner.write() = quote;
    }

    pub fn reset(&self) {
        *self.inner.write() = FeeQuote::zero();
    }
}

/// At most one holder at a time; contenders are turned away, not queued.
#[derive(Debug, Default)]
pub struct SingleFlight {
    busy: AtomicBool,
}

impl SingleFlight {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn try_acquire(&self) -> Option<FlightGuard<'_>> {
        self.busy
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| FlightGuard { flight: self })
    }

    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::Acquire)
    }
}

/// Releases the flight on drop, whichever way the estimation ended.
#[derive(Debug)]
pub struct FlightGuard<'a> {
    flight: &'a SingleFlight,
}

impl Drop for FlightGuard<'_> {
    fn drop(&mut self) {
        self.flight.busy.store(false, Ordering::Release);
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RefreshOutcome {
    Updated(FeeQuote),
    /// Another estimation for this family was already running.
    Dropped,
}

/// Runs a family's estimator and publishes the result into a [`FeeStore`].
pub struct FeeService {
    family: Arc<dyn BridgeFamily>,
    store: FeeStore,
}

impl FeeService {
    pub fn new(family: Arc<dyn BridgeFamily>, store: FeeStore) -> Self {
        Self { family, store }
    }

    pub fn store(&self) -> &FeeStore {
        &self.store
    }

    /// Estimates and stores a fresh quote. On failure the stored quote is reset to zero.
    pub async fn refresh(&self, request: &FeeRequest) -> Result<RefreshOutcome> {
        let Some(_guard) = self.family.single_flight().try_acquire() else {
            debug!(family = ?self.family.kind(), "estimation already in flight, dropping request");
            return Ok(RefreshOutcome::Dropped);
        };
        match self.family.estimate_fee(request).await {
            Ok(mut quote) => {
                quote.key = Some(request.key());
                debug!(
                    family = ?self.family.kind(),
                    gas_price = %quote.gas_price,
                    gas_limit = %quote.gas_limit,
                    total_fee = %quote.total_fee,
                    "fee quote updated"
                );
                self.store.replace(quote.clone());
                Ok(RefreshOutcome::Updated(quote))
            }
            Err(e) => {
                self.store.reset();
                warn!(family = ?self.family.kind(), error = %e, "fee estimation failed, quote reset");
                Err(match e {
                    BridgeError::Chain(inner) => BridgeError::Estimation(inner.to_string()),
                    other => other,
                })
            }
        }
    }

    /// The stored quote if it was computed for `request`, else a fresh estimation.
    pub async fn quote_for(&self, request: &FeeRequest) -> Result<Option<FeeQuote>> {
        let current = self.store.current();
        if current.is_valid_for(&request.key()) {
            return Ok(Some(current));
        }
        match self.refresh(request).await? {
            RefreshOutcome::Updated(quote) => Ok(Some(quote)),
            RefreshOutcome::Dropped => Ok(None),
        }
    }
}

/// Debounced quote refresh for interactive input (e.g. typing an amount).
pub struct QuoteRefresher {
    service: Arc<FeeService>,
    debouncer: Debouncer,
    last_error: Arc<Mutex<Option<String>>>,
}

impl QuoteRefresher {
    pub fn new(service: Arc<FeeService>, delay: Duration) -> Self {
        Self { service, debouncer: Debouncer::new(delay), last_error: Arc::new(Mutex::new(None)) }
    }

    pub fn schedule(&self, request: FeeRequest) {
        let service = self.service.clone();
        let last_error = self.last_error.clone();
        self.debouncer.call(async move {
            match service.refresh(&request).await {
                Ok(_) => *last_error.lock() = None,
                Err(e) => *last_error.lock() = Some(e.to_string()),
            }
        });
    }

    pub fn cancel(&self) {
        self.debouncer.cancel();
    }

    pub fn last_error(&self) -> Option<String> {
        self.last_error.lock().clone()
    }

    pub fn store(&self) -> &FeeStore {
        self.service.store()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_flight_guard_releases_on_drop() {
        let flight = SingleFlight::new();
        let guard = flight.try_acquire();
        assert!(guard.is_some());
        assert!(flight.is_busy());
        assert!(flight.try_acquire().is_none());
        drop(guard);
        assert!(!flight.is_busy());
        assert!(flight.try_acquire().is_some());
    }

    #[test]
    fn test_flights_are_independent() {
        let a = SingleFlight::new();
        let b = SingleFlight::new();
        let _ga = a.try_acquire().unwrap();
        assert!(b.try_acquire().is_some());
    }

    #[test]
    fn test_fee_data_prefers_eip1559() {
        let quote = FeeQuote {
            gas_price: U256::from(5u64),
            max_fee_per_gas: Some(U256::from(9u64)),
            max_priority_fee_per_gas: Some(U256::from(1u64)),
            ..Default::default()
        };
        assert_eq!(
            quote.fee_data(),
            Some(FeeData::Eip1559 {
                max_fee_per_gas: U256::from(9u64),
                max_priority_fee_per_gas: U256::from(1u64)
            })
        );
        let legacy = FeeQuote { gas_price: U256::from(5u64), ..Default::default() };
        assert_eq!(legacy.fee_data(), Some(FeeData::Legacy { gas_price: U256::from(5u64) }));
        assert_eq!(FeeQuote::zero().fee_data(), None);
    }

    #[test]
    fn test_store_overwrites_wholesale() {
        let store = FeeStore::new();
        store.replace(FeeQuote {
            gas_price: U256::from(1u64),
            l1_data_fee: Some(U256::from(3u64)),
            ..Default::default()
        });
        store.replace(FeeQuote { gas_limit: U256::from(2u64), ..Default::default() });
        let current = store.current();
        assert_eq!(current.l1_data_fee, None);
        assert_eq!(current.gas_price, U256::zero());
        store.reset();
        assert!(store.current().is_zero());
    }

    #[test]
    fn test_is_valid_for_requires_matching_key() {
        let key = QuoteKey {
            direction: Direction::Deposit,
            token_l1_address: Address::zero(),
            amount: U256::from(1u64),
            sender: Address::from_low_u64_be(1),
            recipient: Address::from_low_u64_be(1),
        };
        let quote = FeeQuote {
            key: Some(key.clone()),
            gas_price: U256::from(1u64),
            gas_limit: U256::from(1u64),
            total_fee: U256::from(1u64),
            ..Default::default()
        };
        assert!(quote.is_valid_for(&key));
        let other = QuoteKey { amount: U256::from(2u64), ..key.clone() };
        assert!(!quote.is_valid_for(&other));
        let elsewhere = QuoteKey { recipient: Address::from_low_u64_be(2), ..key };
        assert!(!quote.is_valid_for(&elsewhere));
    }
}
