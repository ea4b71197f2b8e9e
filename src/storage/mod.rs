//! Client-side ledger of in-flight and historical bridge transactions.
//!
//! Every operation is keyed by wallet address first, then by transaction hash,
//! and re-applying an operation for the same hash updates in place.

use ethers::types::{Address, H256};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use crate::core::errors::{BridgeError, Result};
use crate::network::Direction;

/// Status assumed for a transaction that never confirmed normally.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AssumedStatus {
    Failed,
    Canceled,
}

/// One bridge transaction as shown in history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Transaction {
    pub hash: H256,
    pub from_name: String,
    pub to_name: String,
    pub from_explore: String,
    pub to_explore: String,
    pub amount: String,
    pub is_l1: bool,
    pub token_symbol: String,
    /// Milliseconds since the unix epoch.
    pub timestamp: i64,
    #[serde(default)]
    pub from_block_number: Option<u64>,
    #[serde(default)]
    pub assumed_status: Option<AssumedStatus>,
}

/// Archived entry for a failed or cancelled transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AbnormalTransaction {
    pub transaction: Transaction,
    pub assumed_status: AssumedStatus,
    pub err_msg: String,
}

impl AbnormalTransaction {
    pub fn new(mut transaction: Transaction, status: AssumedStatus, err_msg: impl Into<String>) -> Self {
        transaction.assumed_status = Some(status);
        Self { transaction, assumed_status: status, err_msg: err_msg.into() }
    }
}

/// Partial update for [`LocalTxStore::update_transaction`].
///
/// Setting `hash` to a different value re-keys the entry.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TransactionPatch {
    pub hash: Option<H256>,
    pub from_block_number: Option<u64>,
    pub assumed_status: Option<AssumedStatus>,
}

impl TransactionPatch {
    pub fn block_number(block_number: u64) -> Self {
        Self { from_block_number: Some(block_number), ..Default::default() }
    }

    pub fn rekey(new_hash: H256, block_number: u64) -> Self {
        Self { hash: Some(new_hash), from_block_number: Some(block_number), ..Default::default() }
    }

    fn apply(&self, tx: &mut Transaction) {
        if let Some(hash) = self.hash {
            tx.hash = hash;
        }
        if let Some(block_number) = self.from_block_number {
            tx.from_block_number = Some(block_number);
        }
        if let Some(status) = self.assumed_status {
            tx.assumed_status = Some(status);
        }
    }
}

/// Where a transaction is rendered relative to indexed history.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TxPosition {
    /// Known only locally; shown pending ahead of confirmed history.
    Frontend,
    /// Picked up by the history backend.
    Backend,
    Abnormal,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderedTx {
    pub hash: H256,
    pub position: TxPosition,
    pub direction: Direction,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WalletLedger {
    /// Active ledger, newest first.
    transactions: Vec<Transaction>,
    abnormal_transactions: Vec<AbnormalTransaction>,
    ordered_txs: Vec<OrderedTx>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StoreState {
    wallets: BTreeMap<String, WalletLedger>,
    estimated_time_map: HashMap<String, i64>,
}

impl StoreState {
    fn ledger_mut(&mut self, wallet: Address) -> &mut WalletLedger {
        self.wallets.entry(wallet_key(wallet)).or_default()
    }

    fn ledger(&self, wallet: Address) -> Option<&WalletLedger> {
        self.wallets.get(&wallet_key(wallet))
    }
}

fn wallet_key(wallet: Address) -> String {
    format!("{:?}", wallet)
}

/// Key under which the finalization estimate of a source-chain hash is kept.
pub fn estimated_time_key(hash: H256) -> String {
    format!("from_{:?}", hash)
}

/// Per-wallet transaction ledger, optionally mirrored to a JSON file.
#[derive(Debug, Default)]
pub struct LocalTxStore {
    state: RwLock<StoreState>,
    path: Option<PathBuf>,
}

impl LocalTxStore {
    pub fn in_memory() -> Self {
        Self::default()
    }

    /// Opens (or starts) a ledger persisted at `path`; every mutation is saved back.
    pub fn with_persistence(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let state = if path.exists() { Self::read_snapshot(&path)? } else { StoreState::default() };
        info!(path = %path.display(), wallets = state.wallets.len(), "transaction ledger opened");
        Ok(Self { state: RwLock::new(state), path: Some(path) })
    }

    /// Inserts at the front of the wallet's ledger, or updates in place if the hash is known.
    pub fn add_transaction(&self, wallet: Address, tx: Transaction) {
        {
            let mut state = self.state.write();
            let ledger = state.ledger_mut(wallet);
            match ledger.transactions.iter_mut().find(|t| t.hash == tx.hash) {
                Some(existing) => *existing = tx,
                None => ledger.transactions.insert(0, tx),
            }
        }
        self.autosave();
    }

    /// Applies `patch` to the entry keyed by `hash`. Returns false if no such entry exists.
    pub fn update_transaction(&self, wallet: Address, hash: H256, patch: &TransactionPatch) -> bool {
        let found = {
            let mut state = self.state.write();
            let ledger = state.ledger_mut(wallet);
            match ledger.transactions.iter().position(|t| t.hash == hash) {
                None => false,
                Some(idx) => {
                    let new_hash = patch.hash.filter(|h| *h != hash);
                    if let Some(new_hash) = new_hash {
                        // an entry may already exist under the new key; the patched one wins
                        if let Some(dup) = ledger.transactions.iter().position(|t| t.hash == new_hash) {
                            ledger.transactions.remove(dup);
                        }
                        ledger.ordered_txs.retain(|o| o.hash != new_hash);
                        for ordered in ledger.ordered_txs.iter_mut().filter(|o| o.hash == hash) {
                            ordered.hash = new_hash;
                        }
                        debug!(old = ?hash, new = ?new_hash, "ledger entry re-keyed");
                    }
                    let idx = ledger.transactions.iter().position(|t| t.hash == hash).unwrap_or(idx);
                    patch.apply(&mut ledger.transactions[idx]);
                    true
                }
            }
        };
        if found {
            self.autosave();
        }
        found
    }

    /// Archives an abnormal transaction; re-adding the same hash replaces it.
    pub fn add_abnormal_transactions(&self, wallet: Address, tx: AbnormalTransaction) {
        {
            let mut state = self.state.write();
            let ledger = state.ledger_mut(wallet);
            let hash = tx.transaction.hash;
            match ledger.abnormal_transactions.iter_mut().find(|a| a.transaction.hash == hash) {
                Some(existing) => *existing = tx,
                None => ledger.abnormal_transactions.insert(0, tx),
            }
        }
        self.autosave();
    }

    /// Drops `hash` from the active ledger (after it was archived as abnormal).
    pub fn remove_front_transactions(&self, wallet: Address, hash: H256) {
        {
            let mut state = self.state.write();
            let ledger = state.ledger_mut(wallet);
            ledger.transactions.retain(|t| t.hash != hash);
        }
        self.autosave();
    }

    /// Sets the display position of `hash`, inserting it at the front when unknown.
    pub fn update_ordered_txs(
        &self,
        wallet: Address,
        hash: H256,
        position: TxPosition,
        direction: Direction,
    ) {
        {
            let mut state = self.state.write();
            let ledger = state.ledger_mut(wallet);
            match ledger.ordered_txs.iter_mut().find(|o| o.hash == hash) {
                Some(existing) => {
                    existing.position = position;
                    existing.direction = direction;
                }
                None => ledger.ordered_txs.insert(0, OrderedTx { hash, position, direction }),
            }
        }
        self.autosave();
    }

    /// Records an estimated finalization time; 0 means unknown.
    pub fn add_estimated_time_map(&self, key: impl Into<String>, epoch_ms: i64) {
        self.state.write().estimated_time_map.insert(key.into(), epoch_ms);
        self.autosave();
    }

    pub fn estimated_time(&self, key: &str) -> Option<i64> {
        self.state.read().estimated_time_map.get(key).copied()
    }

    pub fn transactions(&self, wallet: Address) -> Vec<Transaction> {
        self.state.read().ledger(wallet).map(|l| l.transactions.clone()).unwrap_or_default()
    }

    /// Active entries still positioned ahead of indexed history.
    pub fn front_transactions(&self, wallet: Address) -> Vec<Transaction> {
        let state = self.state.read();
        let Some(ledger) = state.ledger(wallet) else {
            return Vec::new();
        };
        ledger
            .transactions
            .iter()
            .filter(|t| {
                ledger
                    .ordered_txs
                    .iter()
                    .any(|o| o.hash == t.hash && o.position == TxPosition::Frontend)
            })
            .cloned()
            .collect()
    }

    pub fn abnormal_transactions(&self, wallet: Address) -> Vec<AbnormalTransaction> {
        self.state
            .read()
            .ledger(wallet)
            .map(|l| l.abnormal_transactions.clone())
            .unwrap_or_default()
    }

    pub fn ordered_txs(&self, wallet: Address) -> Vec<OrderedTx> {
        self.state.read().ledger(wallet).map(|l| l.ordered_txs.clone()).unwrap_or_default()
    }

    pub fn find(&self, wallet: Address, hash: H256) -> Option<Transaction> {
        self.state
            .read()
            .ledger(wallet)
            .and_then(|l| l.transactions.iter().find(|t| t.hash == hash).cloned())
    }

    pub fn save_to_path(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let json = serde_json::to_vec_pretty(&*self.state.read())?;
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let tmp = path.with_extension("tmp");
        std::fs::write(&tmp, json)?;
        std::fs::rename(&tmp, path)?;
        Ok(())
    }

    /// Loads a snapshot into a memory-only store.
    pub fn load_from_path(path: impl AsRef<Path>) -> Result<Self> {
        let state = Self::read_snapshot(path.as_ref())?;
        Ok(Self { state: RwLock::new(state), path: None })
    }

    fn read_snapshot(path: &Path) -> Result<StoreState> {
        let bytes = std::fs::read(path).map_err(|e| {
            BridgeError::Store(format!("Failed to read ledger {}: {}", path.display(), e))
        })?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    fn autosave(&self) {
        if let Some(path) = &self.path {
            if let Err(e) = self.save_to_path(path) {
                warn!(path = %path.display(), error = %e, "failed to persist transaction ledger");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn wallet() -> Address {
        Address::from_low_u64_be(0xa11ce)
    }

    fn tx(hash: u64) -> Transaction {
        Transaction {
            hash: H256::from_low_u64_be(hash),
            from_name: "Ethereum".into(),
            to_name: "L2".into(),
            from_explore: String::new(),
            to_explore: String::new(),
            amount: "1.0".into(),
            is_l1: true,
            token_symbol: "ETH".into(),
            timestamp: 1_700_000_000_000,
            from_block_number: None,
            assumed_status: None,
        }
    }

    #[test]
    fn test_add_transaction_is_idempotent() {
        let store = LocalTxStore::in_memory();
        store.add_transaction(wallet(), tx(1));
        let mut updated = tx(1);
        updated.amount = "2.0".into();
        store.add_transaction(wallet(), updated);
        let txs = store.transactions(wallet());
        assert_eq!(txs.len(), 1);
        assert_eq!(txs[0].amount, "2.0");
    }

    #[test]
    fn test_newest_first() {
        let store = LocalTxStore::in_memory();
        store.add_transaction(wallet(), tx(1));
        store.add_transaction(wallet(), tx(2));
        let hashes: Vec<_> = store.transactions(wallet()).iter().map(|t| t.hash).collect();
        assert_eq!(hashes, vec![H256::from_low_u64_be(2), H256::from_low_u64_be(1)]);
    }

    #[test]
    fn test_update_transaction_twice_same_result() {
        let store = LocalTxStore::in_memory();
        store.add_transaction(wallet(), tx(1));
        let patch = TransactionPatch::block_number(100);
        assert!(store.update_transaction(wallet(), H256::from_low_u64_be(1), &patch));
        let once = store.transactions(wallet());
        assert!(store.update_transaction(wallet(), H256::from_low_u64_be(1), &patch));
        assert_eq!(store.transactions(wallet()), once);
        assert_eq!(once[0].from_block_number, Some(100));
    }

    #[test]
    fn test_rekey_moves_entry_and_ordering() {
        let store = LocalTxStore::in_memory();
        let old = H256::from_low_u64_be(1);
        let new = H256::from_low_u64_be(9);
        store.add_transaction(wallet(), tx(1));
        store.update_ordered_txs(wallet(), old, TxPosition::Frontend, Direction::Deposit);

        let patch = TransactionPatch::rekey(new, 42);
        assert!(store.update_transaction(wallet(), old, &patch));
        // second application finds nothing under the old key and changes nothing
        assert!(!store.update_transaction(wallet(), old, &patch));

        assert!(store.find(wallet(), old).is_none());
        let moved = store.find(wallet(), new).unwrap();
        assert_eq!(moved.from_block_number, Some(42));
        assert_eq!(store.transactions(wallet()).len(), 1);
        let ordered = store.ordered_txs(wallet());
        assert_eq!(ordered.len(), 1);
        assert_eq!(ordered[0].hash, new);
    }

    #[test]
    fn test_rekey_onto_existing_hash_does_not_duplicate() {
        let store = LocalTxStore::in_memory();
        store.add_transaction(wallet(), tx(1));
        store.add_transaction(wallet(), tx(9));
        let patch = TransactionPatch::rekey(H256::from_low_u64_be(9), 7);
        assert!(store.update_transaction(wallet(), H256::from_low_u64_be(1), &patch));
        let txs = store.transactions(wallet());
        assert_eq!(txs.len(), 1);
        assert_eq!(txs[0].from_block_number, Some(7));
    }

    #[test]
    fn test_abnormal_flow() {
        let store = LocalTxStore::in_memory();
        let hash = H256::from_low_u64_be(3);
        store.add_transaction(wallet(), tx(3));
        store.update_ordered_txs(wallet(), hash, TxPosition::Frontend, Direction::Withdraw);
        assert_eq!(store.front_transactions(wallet()).len(), 1);

        let abnormal = AbnormalTransaction::new(tx(3), AssumedStatus::Failed, "reverted");
        store.add_abnormal_transactions(wallet(), abnormal.clone());
        store.add_abnormal_transactions(wallet(), abnormal);
        store.remove_front_transactions(wallet(), hash);
        store.update_ordered_txs(wallet(), hash, TxPosition::Abnormal, Direction::Withdraw);

        assert!(store.transactions(wallet()).is_empty());
        assert!(store.front_transactions(wallet()).is_empty());
        let archived = store.abnormal_transactions(wallet());
        assert_eq!(archived.len(), 1);
        assert_eq!(archived[0].assumed_status, AssumedStatus::Failed);
        assert_eq!(archived[0].transaction.assumed_status, Some(AssumedStatus::Failed));
        assert_eq!(store.ordered_txs(wallet())[0].position, TxPosition::Abnormal);
    }

    #[test]
    fn test_wallets_are_isolated() {
        let store = LocalTxStore::in_memory();
        let other = Address::from_low_u64_be(0xb0b);
        store.add_transaction(wallet(), tx(1));
        assert!(store.transactions(other).is_empty());
        assert!(!store.update_transaction(other, H256::from_low_u64_be(1), &TransactionPatch::block_number(1)));
    }

    #[test]
    fn test_estimated_time_map() {
        let store = LocalTxStore::in_memory();
        let key = estimated_time_key(H256::from_low_u64_be(1));
        assert!(key.starts_with("from_0x"));
        store.add_estimated_time_map(key.clone(), 5);
        store.add_estimated_time_map(key.clone(), 6);
        assert_eq!(store.estimated_time(&key), Some(6));
    }
}
