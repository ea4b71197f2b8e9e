use thiserror::Error;

use crate::blockchain::traits::ChainError;

/// Error type for bridge operations.
#[derive(Debug, Error)]
pub enum BridgeError {
    /// Configuration-related errors.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Input validation errors (bad amount, malformed address).
    #[error("Validation error: {0}")]
    Validation(String),

    /// Gas / fee estimation failed. The fee quote has already been reset.
    #[error("Estimation error: {0}")]
    Estimation(String),

    /// Allowance read or approve transaction failed.
    #[error("Approval error: {0}")]
    Approval(String),

    /// The wallet or RPC refused the bridge transaction before a hash existed.
    #[error("Submission error: {0}")]
    Submission(String),

    /// Local ledger errors.
    #[error("Store error: {0}")]
    Store(String),

    /// Errors surfaced by a chain collaborator.
    #[error(transparent)]
    Chain(#[from] ChainError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Generic errors (glue code).
    #[error("Error: {0}")]
    Other(String),
}

pub type Result<T> = std::result::Result<T, BridgeError>;

impl BridgeError {
    /// Whether retrying the same call later could succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, BridgeError::Chain(ChainError::Rpc(_)) | BridgeError::Estimation(_))
    }

    /// The user declined a wallet prompt.
    pub fn is_user_rejection(&self) -> bool {
        matches!(self, BridgeError::Chain(ChainError::UserRejected(_)))
    }
}

impl From<anyhow::Error> for BridgeError {
    fn from(err: anyhow::Error) -> Self {
        BridgeError::Other(err.to_string())
    }
}

impl From<toml::de::Error> for BridgeError {
    fn from(err: toml::de::Error) -> Self {
        BridgeError::Config(err.to_string())
    }
}
