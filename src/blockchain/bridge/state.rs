//! Explicit lifecycle of one bridge submission.

use ethers::types::{Address, H256};
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, warn};

use crate::storage::AssumedStatus;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum TxState {
    #[default]
    Idle,
    /// Waiting for the allowance of `token` to be raised.
    ApprovalRequired { token: Address },
    Building,
    Submitted { hash: H256, timed_out: bool },
    Confirmed { hash: H256, block_number: u64 },
    Abnormal { hash: H256, status: AssumedStatus },
}

impl TxState {
    /// No further events are expected for the current submission.
    pub fn is_terminal(&self) -> bool {
        matches!(self, TxState::Idle | TxState::Confirmed { .. } | TxState::Abnormal { .. })
    }

    pub fn hash(&self) -> Option<H256> {
        match self {
            TxState::Submitted { hash, .. } | TxState::Confirmed { hash, .. } | TxState::Abnormal { hash, .. } => {
                Some(*hash)
            }
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TxEvent {
    Submit,
    ApprovalNeeded { token: Address },
    ApprovalResolved,
    Built,
    HashObtained { hash: H256 },
    ReceiptResolved { hash: H256, block_number: u64, success: bool },
    ReceiptTimedOut { hash: H256 },
    /// The awaited hash was superseded; a cancelled replacement ends the submission.
    ReceiptReplaced { hash: H256, replacement: H256, cancelled: bool },
    ReceiptFailed { hash: H256 },
    /// Anything that ends the attempt before a hash existed.
    Errored,
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("illegal transition from {from:?} on {event:?}")]
pub struct IllegalTransition {
    pub from: TxState,
    pub event: TxEvent,
}

#[derive(Debug, Default)]
pub struct TxMachine {
    state: TxState,
}

impl TxMachine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> &TxState {
        &self.state
    }

    pub fn apply(&mut self, event: TxEvent) -> Result<&TxState, IllegalTransition> {
        let next = match (&self.state, &event) {
            (s, TxEvent::Submit) if s.is_terminal() || matches!(s, TxState::ApprovalRequired { .. }) => {
                TxState::Building
            }
            // a pending submission may still be resolving in the background
            (TxState::Submitted { timed_out: true, .. }, TxEvent::Submit) => TxState::Building,

            (TxState::Building, TxEvent::ApprovalNeeded { token }) => TxState::ApprovalRequired { token: *token },
            (TxState::ApprovalRequired { .. }, TxEvent::ApprovalResolved) => TxState::Idle,
            (TxState::ApprovalRequired { .. }, TxEvent::Errored) => TxState::Idle,

            (TxState::Building, TxEvent::Built) => TxState::Building,
            (TxState::Building, TxEvent::HashObtained { hash }) => {
                TxState::Submitted { hash: *hash, timed_out: false }
            }
            (TxState::Building, TxEvent::Errored) => TxState::Idle,

            (TxState::Submitted { hash, .. }, TxEvent::ReceiptTimedOut { hash: h }) if hash == h => {
                TxState::Submitted { hash: *hash, timed_out: true }
            }
            (TxState::Submitted { hash, .. }, TxEvent::ReceiptResolved { hash: h, block_number, success })
                if hash == h =>
            {
                if *success {
                    TxState::Confirmed { hash: *hash, block_number: *block_number }
                } else {
                    TxState::Abnormal { hash: *hash, status: AssumedStatus::Failed }
                }
            }
            (TxState::Submitted { hash, timed_out }, TxEvent::ReceiptReplaced { hash: h, replacement, cancelled })
                if hash == h =>
            {
                if *cancelled {
                    TxState::Abnormal { hash: *hash, status: AssumedStatus::Canceled }
                } else {
                    TxState::Submitted { hash: *replacement, timed_out: *timed_out }
                }
            }
            (TxState::Submitted { hash, .. }, TxEvent::ReceiptFailed { hash: h }) if hash == h => {
                TxState::Abnormal { hash: *hash, status: AssumedStatus::Failed }
            }
            _ => {
                warn!(from = ?self.state, ?event, "rejected state transition");
                return Err(IllegalTransition { from: self.state.clone(), event });
            }
        };
        debug!(from = ?self.state, to = ?next, "state transition");
        self.state = next;
        Ok(&self.state)
    }
}
