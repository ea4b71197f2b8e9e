pub mod abi;
pub mod config;
pub mod errors;
pub mod validation;

pub use config::BridgeConfig;
pub use errors::{BridgeError, Result};
