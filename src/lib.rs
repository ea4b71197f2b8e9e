// src/lib.rs
#![allow(clippy::len_zero)]

pub mod approval;
pub mod blockchain;
pub mod core;
pub mod fee;
pub mod network;
pub mod stats;
pub mod storage;
pub mod token;
pub mod tools;

pub use blockchain::bridge::{family_from_config, SendOutcome, SendRequest, TransactionOrchestrator};
pub use core::{BridgeConfig, BridgeError, Result};
