//! Builds, submits and reconciles bridge transactions.
//!
//! A send runs until the wallet hands back a hash, records the transaction
//! optimistically, then races the receipt wait against `receipt_timeout_ms`.
//! Losing the race only releases the caller: the wait keeps running on the
//! runtime and reconciles the ledger and stats whenever the receipt arrives.
//! Stats are posted from their own task and never hold up a send.

use ethers::types::{Address, H256, U256};
use futures::FutureExt;
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::family::{BridgeCall, BridgeFamily};
use super::state::{TxEvent, TxMachine, TxState};
use crate::approval::ApprovalGate;
use crate::blockchain::traits::{ChainError, PublicClient, WalletClient};
use crate::core::config::OrchestratorConfig;
use crate::core::errors::{BridgeError, Result};
use crate::fee::{FeeRequest, FeeService};
use crate::network::{Direction, Network, NetworkContext};
use crate::stats::{BridgeStats, StatsCollector, TransactionStatus};
use crate::storage::{
    estimated_time_key, AbnormalTransaction, AssumedStatus, LocalTxStore, Transaction, TransactionPatch,
    TxPosition,
};
use crate::token::{Token, TokenSelection};
use crate::tools::async_support::{spawn_with_deadline, Raced, TimeoutConfig};

/// One user-triggered send.
#[derive(Debug, Clone)]
pub struct SendRequest {
    pub direction: Direction,
    /// Token as seen from the source network, with the entered amount.
    pub selection: TokenSelection,
    /// Defaults to the wallet's own address.
    pub recipient: Option<Address>,
}

/// Why a send ended without touching the chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    NoAmount,
    /// A send for the same wallet and direction is still loading.
    Busy,
    /// The token belongs to a different L2 than this bridge.
    TokenMismatch,
    /// The wallet is not connected to the source network.
    WrongNetwork,
    /// The token address is not the one deployed on the source network.
    AddressMismatch,
    /// The fee estimator was busy with another request.
    QuoteUnavailable,
}

/// Final classification of a submitted transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum Settlement {
    Confirmed { hash: H256, block_number: u64, replaced: Option<H256> },
    Abnormal { hash: H256, status: AssumedStatus, err_msg: String, block_number: Option<u64> },
}

impl Settlement {
    pub fn hash(&self) -> H256 {
        match self {
            Settlement::Confirmed { hash, .. } | Settlement::Abnormal { hash, .. } => *hash,
        }
    }

    fn stats_status(&self) -> TransactionStatus {
        match self {
            Settlement::Confirmed { .. } => TransactionStatus::Success,
            Settlement::Abnormal { status: AssumedStatus::Canceled, .. } => TransactionStatus::Canceled,
            Settlement::Abnormal { .. } => TransactionStatus::Failed,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SendOutcome {
    Skipped(SkipReason),
    /// An approval was sent and mined; the transfer must be sent again.
    ApprovalRequested { hash: H256 },
    /// The receipt arrived within the race.
    Settled(Settlement),
    /// The race timed out; reconciliation continues in the background.
    Pending { hash: H256 },
}

/// Transient, UI-facing view of the latest submission.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TxData {
    pub hash: H256,
    pub direction: Direction,
    pub block_number: Option<u64>,
    pub status: Option<TransactionStatus>,
}

/// Everything a [`TransactionOrchestrator`] talks to.
pub struct OrchestratorParts {
    pub family: Arc<dyn BridgeFamily>,
    pub fees: Arc<FeeService>,
    pub networks: NetworkContext,
    pub l1: Arc<dyn PublicClient>,
    pub l2: Arc<dyn PublicClient>,
    pub wallet: Arc<dyn WalletClient>,
    pub store: Arc<LocalTxStore>,
    pub stats: Arc<dyn StatsCollector>,
    pub config: OrchestratorConfig,
}

/// Settlements kept for `wait_for_reconciliation` after their task is gone.
const SETTLED_HISTORY: usize = 16;

/// Background reconciliations of sends that lost the receipt race.
#[derive(Default)]
struct Reconciliations {
    running: HashMap<H256, JoinHandle<Settlement>>,
    settled: VecDeque<(H256, Settlement)>,
}

impl Reconciliations {
    fn track(&mut self, hash: H256, handle: JoinHandle<Settlement>) {
        self.sweep();
        self.running.insert(hash, handle);
    }

    /// Called by the reconciler itself once `hash` is classified.
    fn settle(&mut self, hash: H256, settlement: &Settlement) {
        if self.running.remove(&hash).is_some() {
            self.remember(hash, settlement.clone());
        }
    }

    /// Moves tasks that already finished out of `running`.
    fn sweep(&mut self) {
        let finished: Vec<H256> =
            self.running.iter().filter(|(_, handle)| handle.is_finished()).map(|(hash, _)| *hash).collect();
        for hash in finished {
            let Some(mut handle) = self.running.remove(&hash) else { continue };
            match (&mut handle).now_or_never() {
                Some(Ok(settlement)) => self.remember(hash, settlement),
                Some(Err(e)) => warn!(?hash, error = %e, "background reconciliation failed"),
                None => {
                    self.running.insert(hash, handle);
                }
            }
        }
    }

    fn remember(&mut self, hash: H256, settlement: Settlement) {
        if self.settled.len() == SETTLED_HISTORY {
            self.settled.pop_front();
        }
        self.settled.push_back((hash, settlement));
    }

    fn take_settled(&mut self, hash: H256) -> Option<Settlement> {
        let index = self.settled.iter().position(|(h, _)| *h == hash)?;
        self.settled.remove(index).map(|(_, settlement)| settlement)
    }
}

/// State shared between the orchestrator and its background reconciliations.
struct Shared {
    store: Arc<LocalTxStore>,
    stats: Arc<dyn StatsCollector>,
    stats_tasks: Mutex<Vec<JoinHandle<()>>>,
    config: OrchestratorConfig,
    machines: Mutex<HashMap<Direction, TxMachine>>,
    tx_data: Mutex<Option<TxData>>,
    tx_error: Mutex<Option<String>>,
    reconciliations: Mutex<Reconciliations>,
}

impl Shared {
    fn apply(&self, direction: Direction, event: TxEvent) {
        let mut machines = self.machines.lock();
        // a failed transition is already logged by the machine
        let _ = machines.entry(direction).or_default().apply(event);
    }

    /// Applies a receipt event only while `hash` is the submission being tracked.
    fn advance(&self, direction: Direction, hash: H256, event: TxEvent) {
        let mut machines = self.machines.lock();
        let machine = machines.entry(direction).or_default();
        let tracked = matches!(machine.state(), TxState::Submitted { hash: current, .. } if *current == hash);
        if tracked {
            let _ = machine.apply(event);
        } else {
            debug!(?hash, state = ?machine.state(), "stale receipt event ignored");
        }
    }

    fn set_error(&self, message: impl Into<String>) {
        *self.tx_error.lock() = Some(message.into());
    }

    fn spawn_report(&self, stats: BridgeStats) {
        let collector = self.stats.clone();
        let task = tokio::spawn(async move { collector.report(stats).await });
        let mut tasks = self.stats_tasks.lock();
        tasks.retain(|t| !t.is_finished());
        tasks.push(task);
    }

    fn update_tx_data(&self, hash: H256, update: impl FnOnce(&mut TxData)) {
        if let Some(data) = self.tx_data.lock().as_mut().filter(|d| d.hash == hash) {
            update(data);
        }
    }
}

/// Releases the (wallet, direction) slot when the send stops loading.
struct InFlightGuard {
    slots: Arc<Mutex<HashSet<(Address, Direction)>>>,
    key: (Address, Direction),
}

impl InFlightGuard {
    fn acquire(slots: &Arc<Mutex<HashSet<(Address, Direction)>>>, key: (Address, Direction)) -> Option<Self> {
        slots.lock().insert(key).then(|| Self { slots: slots.clone(), key })
    }
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.slots.lock().remove(&self.key);
    }
}

pub struct TransactionOrchestrator {
    family: Arc<dyn BridgeFamily>,
    fees: Arc<FeeService>,
    networks: NetworkContext,
    l1: Arc<dyn PublicClient>,
    l2: Arc<dyn PublicClient>,
    wallet: Arc<dyn WalletClient>,
    l1_approval: ApprovalGate,
    l2_approval: ApprovalGate,
    shared: Arc<Shared>,
    in_flight: Arc<Mutex<HashSet<(Address, Direction)>>>,
}

impl TransactionOrchestrator {
    pub fn new(parts: OrchestratorParts) -> Self {
        Self {
            l1_approval: ApprovalGate::new(parts.l1.clone(), parts.wallet.clone()),
            l2_approval: ApprovalGate::new(parts.l2.clone(), parts.wallet.clone()),
            family: parts.family,
            fees: parts.fees,
            networks: parts.networks,
            l1: parts.l1,
            l2: parts.l2,
            wallet: parts.wallet,
            shared: Arc::new(Shared {
                store: parts.store,
                stats: parts.stats,
                stats_tasks: Mutex::new(Vec::new()),
                config: parts.config,
                machines: Mutex::new(HashMap::new()),
                tx_data: Mutex::new(None),
                tx_error: Mutex::new(None),
                reconciliations: Mutex::new(Reconciliations::default()),
            }),
            in_flight: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    /// Whether any send is between submit and the end of its receipt race.
    pub fn tx_loading(&self) -> bool {
        !self.in_flight.lock().is_empty()
    }

    pub fn tx_data(&self) -> Option<TxData> {
        self.shared.tx_data.lock().clone()
    }

    pub fn tx_error(&self) -> Option<String> {
        self.shared.tx_error.lock().clone()
    }

    /// Clears `tx_data` and `tx_error`; the ledger is left alone.
    pub fn reset_tx_data(&self) {
        *self.shared.tx_data.lock() = None;
        *self.shared.tx_error.lock() = None;
    }

    pub fn state(&self, direction: Direction) -> TxState {
        self.shared.machines.lock().get(&direction).map(|m| m.state().clone()).unwrap_or_default()
    }

    pub fn store(&self) -> &Arc<LocalTxStore> {
        &self.shared.store
    }

    pub fn approval_gate(&self, direction: Direction) -> &ApprovalGate {
        match direction {
            Direction::Deposit => &self.l1_approval,
            Direction::Withdraw => &self.l2_approval,
        }
    }

    /// Awaits the background reconciliation of a send that returned [`SendOutcome::Pending`].
    ///
    /// A recently settled reconciliation is handed out once. Returns `None`
    /// when nothing is known for `hash`.
    pub async fn wait_for_reconciliation(&self, hash: H256) -> Result<Option<Settlement>> {
        let handle = {
            let mut reconciliations = self.shared.reconciliations.lock();
            match reconciliations.running.remove(&hash) {
                Some(handle) => handle,
                None => return Ok(reconciliations.take_settled(hash)),
            }
        };
        handle
            .await
            .map(Some)
            .map_err(|e| BridgeError::Other(format!("reconciliation of {:?} failed: {}", hash, e)))
    }

    /// Background reconciliations still waiting for a receipt.
    pub fn pending_reconciliations(&self) -> usize {
        let mut reconciliations = self.shared.reconciliations.lock();
        reconciliations.sweep();
        reconciliations.running.len()
    }

    /// Waits until every stats report spawned so far has been handed to the collector.
    pub async fn flush_stats(&self) {
        let tasks = std::mem::take(&mut *self.shared.stats_tasks.lock());
        for task in tasks {
            if let Err(e) = task.await {
                warn!(error = %e, "stats task failed");
            }
        }
    }

    fn client(&self, network: &Network) -> Arc<dyn PublicClient> {
        if network.is_l2 {
            self.l2.clone()
        } else {
            self.l1.clone()
        }
    }

    pub async fn send_transaction(&self, request: SendRequest) -> Result<SendOutcome> {
        let amount = match request.selection.amount_base_units() {
            Ok(amount) => amount,
            Err(e) => {
                self.shared.set_error(e.to_string());
                return Err(e);
            }
        };
        let Some(amount) = amount.filter(|a| !a.is_zero()) else {
            debug!("send ignored, no amount entered");
            return Ok(SendOutcome::Skipped(SkipReason::NoAmount));
        };
        let direction = request.direction;
        let sender = self.wallet.address();
        let Some(guard) = InFlightGuard::acquire(&self.in_flight, (sender, direction)) else {
            debug!(direction = direction.as_str(), "send ignored, previous send still loading");
            return Ok(SendOutcome::Skipped(SkipReason::Busy));
        };
        *self.shared.tx_error.lock() = None;
        self.shared.apply(direction, TxEvent::Submit);

        match self.submit(request, amount, guard).await {
            Ok(outcome) => {
                if matches!(outcome, SendOutcome::Skipped(_)) {
                    self.shared.apply(direction, TxEvent::Errored);
                }
                Ok(outcome)
            }
            Err(e) => {
                self.shared.apply(direction, TxEvent::Errored);
                // approval failures are reported through the gate
                if !matches!(e, BridgeError::Approval(_)) {
                    self.shared.set_error(e.to_string());
                }
                Err(e)
            }
        }
    }

    async fn submit(&self, request: SendRequest, amount: U256, guard: InFlightGuard) -> Result<SendOutcome> {
        let direction = request.direction;
        let token = request.selection.token.clone();
        let mut networks = self.networks.clone();
        networks.set_direction(direction);
        let from = networks.from_network().clone();
        let to = networks.to_network().clone();

        if token.l2_chain_id != self.family.l2_chain_id() {
            debug!(token = %token.symbol, chain = token.l2_chain_id, "token belongs to another L2");
            return Ok(SendOutcome::Skipped(SkipReason::TokenMismatch));
        }
        if !networks.is_correct_network_set(self.wallet.chain_id()) {
            debug!(wallet_chain = self.wallet.chain_id(), expected = from.id, "wallet on wrong network");
            return Ok(SendOutcome::Skipped(SkipReason::WrongNetwork));
        }
        if !token.address_matches(&from) {
            debug!(token = ?token.address, network = %from.name, "token address not on source network");
            return Ok(SendOutcome::Skipped(SkipReason::AddressMismatch));
        }

        let sender = self.wallet.address();
        if let Some(spender) = self.family.approval_spender(direction, &token) {
            let gate = self.approval_gate(direction);
            gate.check_approval(sender, &token, spender).await?;
            if gate.need_approval(sender, &token, spender, amount) {
                self.shared.apply(direction, TxEvent::ApprovalNeeded { token: token.address });
                let hash = gate.approve(&token, spender, amount).await?;
                self.shared.apply(direction, TxEvent::ApprovalResolved);
                return Ok(SendOutcome::ApprovalRequested { hash });
            }
        }

        let fee_request = FeeRequest {
            direction,
            token: token.clone(),
            amount,
            sender,
            recipient: request.recipient.unwrap_or(sender),
        };
        let Some(quote) = self.fees.quote_for(&fee_request).await? else {
            return Ok(SendOutcome::Skipped(SkipReason::QuoteUnavailable));
        };
        let call = self.family.build_call(direction, &BridgeCall::from_request(&fee_request, quote))?;
        self.shared.apply(direction, TxEvent::Built);

        info!(
            direction = direction.as_str(),
            function = call.function_name,
            to = ?call.address,
            value = %call.value,
            "submitting bridge transaction"
        );
        let hash = self.wallet.write_contract(call).await.map_err(|e| match e {
            ChainError::UserRejected(_) => BridgeError::Chain(e),
            other => BridgeError::Submission(other.to_string()),
        })?;
        self.shared.apply(direction, TxEvent::HashObtained { hash });
        *self.shared.tx_data.lock() = Some(TxData { hash, direction, block_number: None, status: None });

        let entry = Transaction {
            hash,
            from_name: from.name.clone(),
            to_name: to.name.clone(),
            from_explore: from.tx_url(&format!("{:?}", hash)),
            to_explore: to.block_explorer_url.clone(),
            amount: request.selection.amount.clone().unwrap_or_default(),
            is_l1: !from.is_l2,
            token_symbol: token.symbol.clone(),
            timestamp: chrono::Utc::now().timestamp_millis(),
            from_block_number: None,
            assumed_status: None,
        };
        self.shared.store.add_transaction(sender, entry);
        self.shared.store.update_ordered_txs(sender, hash, TxPosition::Frontend, direction);
        info!(?hash, "bridge transaction submitted");

        let reconciler = Reconciler {
            wallet: sender,
            direction,
            token,
            amount,
            network_name: from.name.clone(),
            client: self.client(&from),
            shared: self.shared.clone(),
        };
        let deadline = TimeoutConfig::from_millis(self.shared.config.receipt_timeout_ms, "receipt wait");
        let raced = spawn_with_deadline(reconciler.run(hash), &deadline).await;
        drop(guard);

        match raced {
            Raced::Finished(settlement) => Ok(SendOutcome::Settled(settlement)),
            Raced::TimedOut(handle) => {
                info!(?hash, "receipt not in yet, reconciling in background");
                self.shared.advance(direction, hash, TxEvent::ReceiptTimedOut { hash });
                self.shared.reconciliations.lock().track(hash, handle);
                Ok(SendOutcome::Pending { hash })
            }
            Raced::Failed(msg) => Err(BridgeError::Other(msg)),
        }
    }
}

/// Owns everything needed to classify one submitted hash.
struct Reconciler {
    wallet: Address,
    direction: Direction,
    token: Token,
    amount: U256,
    network_name: String,
    client: Arc<dyn PublicClient>,
    shared: Arc<Shared>,
}

impl Reconciler {
    async fn run(self, hash: H256) -> Settlement {
        let settlement = match self.client.wait_for_transaction_receipt(hash).await {
            Ok(receipt) if receipt.status.is_success() => {
                self.confirm(hash, receipt.block_number, None).await
            }
            Ok(receipt) => {
                self.shared.advance(
                    self.direction,
                    hash,
                    TxEvent::ReceiptResolved { hash, block_number: receipt.block_number, success: false },
                );
                self.archive(hash, AssumedStatus::Failed, "transaction reverted", Some(receipt.block_number))
            }
            Err(ChainError::TransactionReplaced { cancelled: true, replacement }) => {
                self.shared.advance(
                    self.direction,
                    hash,
                    TxEvent::ReceiptReplaced { hash, replacement: replacement.hash, cancelled: true },
                );
                self.archive(hash, AssumedStatus::Canceled, "transaction cancelled", Some(replacement.block_number))
            }
            Err(ChainError::TransactionReplaced { cancelled: false, replacement }) => {
                let new_hash = replacement.hash;
                info!(old = ?hash, new = ?new_hash, "transaction repriced, following replacement");
                self.shared.store.update_transaction(
                    self.wallet,
                    hash,
                    &TransactionPatch::rekey(new_hash, replacement.block_number),
                );
                self.shared.advance(
                    self.direction,
                    hash,
                    TxEvent::ReceiptReplaced { hash, replacement: new_hash, cancelled: false },
                );
                self.shared.update_tx_data(hash, |d| d.hash = new_hash);
                if replacement.status.is_success() {
                    self.confirm(new_hash, replacement.block_number, Some(hash)).await
                } else {
                    self.shared.advance(
                        self.direction,
                        new_hash,
                        TxEvent::ReceiptResolved {
                            hash: new_hash,
                            block_number: replacement.block_number,
                            success: false,
                        },
                    );
                    self.archive(
                        new_hash,
                        AssumedStatus::Failed,
                        "replacement transaction reverted",
                        Some(replacement.block_number),
                    )
                }
            }
            Err(e) => {
                self.shared.advance(self.direction, hash, TxEvent::ReceiptFailed { hash });
                self.shared.set_error(e.to_string());
                self.archive(hash, AssumedStatus::Failed, e.to_string(), None)
            }
        };
        self.report(&settlement);
        self.shared.reconciliations.lock().settle(hash, &settlement);
        settlement
    }

    async fn confirm(&self, hash: H256, block_number: u64, replaced: Option<H256>) -> Settlement {
        self.shared.store.update_transaction(self.wallet, hash, &TransactionPatch::block_number(block_number));
        self.shared.advance(
            self.direction,
            hash,
            TxEvent::ReceiptResolved { hash, block_number, success: true },
        );
        self.shared.update_tx_data(hash, |d| {
            d.block_number = Some(block_number);
            d.status = Some(TransactionStatus::Success);
        });
        info!(?hash, block_number, "bridge transaction confirmed");

        if self.direction == Direction::Deposit {
            let estimate = match self.finalization_estimate(block_number).await {
                Ok(epoch_ms) => epoch_ms,
                Err(e) => {
                    warn!(?hash, error = %e, "could not estimate finalization time");
                    0
                }
            };
            self.shared.store.add_estimated_time_map(estimated_time_key(hash), estimate);
        }
        Settlement::Confirmed { hash, block_number, replaced }
    }

    /// Epoch ms at which an L1 block is expected to be final; 0 past the horizon.
    async fn finalization_estimate(&self, block_number: u64) -> Result<i64> {
        let config = &self.shared.config;
        let reference = self.client.get_finalized_block_number().await?;
        let offset_ms = block_number.saturating_sub(reference).saturating_mul(config.average_block_interval_ms);
        if offset_ms > config.max_estimate_horizon_ms {
            debug!(block_number, reference, offset_ms, "finalization estimate beyond horizon");
            return Ok(0);
        }
        let block = self.client.get_block(block_number).await?;
        let epoch_ms = block.timestamp.saturating_mul(1000).saturating_add(offset_ms);
        Ok(i64::try_from(epoch_ms).unwrap_or(0))
    }

    /// Moves the ledger entry for `hash` into the abnormal archive.
    fn archive(
        &self,
        hash: H256,
        status: AssumedStatus,
        err_msg: impl Into<String>,
        block_number: Option<u64>,
    ) -> Settlement {
        let err_msg = err_msg.into();
        let store = &self.shared.store;
        match store.find(self.wallet, hash) {
            Some(mut tx) => {
                tx.from_block_number = block_number.or(tx.from_block_number);
                store.add_abnormal_transactions(self.wallet, AbnormalTransaction::new(tx, status, err_msg.clone()))
            }
            None => warn!(?hash, "abnormal transaction missing from active ledger"),
        }
        store.remove_front_transactions(self.wallet, hash);
        store.update_ordered_txs(self.wallet, hash, TxPosition::Abnormal, self.direction);
        self.shared.update_tx_data(hash, |d| {
            d.status = Some(match status {
                AssumedStatus::Failed => TransactionStatus::Failed,
                AssumedStatus::Canceled => TransactionStatus::Canceled,
            })
        });
        error!(?hash, ?status, %err_msg, "bridge transaction abnormal");
        Settlement::Abnormal { hash, status, err_msg, block_number }
    }

    fn report(&self, settlement: &Settlement) {
        let block_number = match settlement {
            Settlement::Confirmed { block_number, .. } => Some(*block_number),
            Settlement::Abnormal { block_number, .. } => *block_number,
        };
        let stats = BridgeStats {
            kind: self.direction,
            network: self.network_name.clone(),
            token_symbol: self.token.symbol.clone(),
            token_address: format!("{:?}", self.token.address),
            token_decimals: self.token.decimals,
            transaction_hash: format!("{:?}", settlement.hash()),
            transaction_status: settlement.stats_status(),
            block_number,
            value: self.amount.to_string(),
        };
        self.shared.spawn_report(stats);
    }
}
