pub mod bridge;
pub mod ethereum;
pub mod mock;
pub mod traits;

pub use ethereum::{EthersPublicClient, EthersWalletClient};
pub use traits::{ChainError, PublicClient, WalletClient, ZkSyncRpc};
