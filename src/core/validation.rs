use ethers::types::{Address, U256};
use ethers::utils::parse_units;
use regex::Regex;
use sha3::{Digest, Keccak256};

use crate::core::errors::{BridgeError, Result};

/// Validates an Ethereum address and parses it.
pub fn parse_ethereum_address(address: &str) -> Result<Address> {
    let hex_regex = Regex::new(r"^0x[0-9a-fA-F]{40}$")
        .map_err(|e| BridgeError::Validation(format!("address pattern: {}", e)))?;
    if !hex_regex.is_match(address) {
        return Err(BridgeError::Validation(format!("Invalid Ethereum address: {}", address)));
    }
    // EIP-55: if mixed-case, enforce checksum. All-lower or all-upper acceptable for compatibility.
    let body = &address[2..];
    let is_all_lower = body.chars().all(|c| !c.is_ascii_uppercase());
    let is_all_upper = body.chars().all(|c| !c.is_ascii_lowercase());
    if !is_all_lower && !is_all_upper && !is_eip55_checksum_valid(address) {
        return Err(BridgeError::Validation(format!(
            "Invalid EIP-55 checksum for Ethereum address: {}",
            address
        )));
    }
    address
        .parse::<Address>()
        .map_err(|e| BridgeError::Validation(format!("Invalid Ethereum address: {}", e)))
}

fn is_eip55_checksum_valid(addr: &str) -> bool {
    let body = &addr[2..];
    let lower = body.to_lowercase();
    let mut keccak = Keccak256::new();
    keccak.update(lower.as_bytes());
    let hash = keccak.finalize();
    for (i, ch) in body.chars().enumerate() {
        let nibble = (hash[i / 2] >> (4 * (1 - (i % 2)))) & 0x0f;
        match ch {
            'a'..='f' if nibble >= 8 => return false,
            'A'..='F' if nibble < 8 => return false,
            _ => {}
        }
    }
    true
}

/// Strict decimal validator for amounts to avoid float parsing where exactness matters.
/// Accepts patterns like 123, 0.1, 1.234567 up to `max_decimals` decimals. No leading '+', no exponent.
pub fn validate_amount_strict(amount: &str, max_decimals: u32) -> Result<()> {
    if amount.is_empty() {
        return Err(BridgeError::Validation("Amount cannot be empty".to_string()));
    }
    let pattern = if max_decimals == 0 {
        r"^(?:0|[1-9]\d*)$".to_string()
    } else {
        format!(r"^(?:0|[1-9]\d*)(?:\.(\d{{1,{}}}))?$", max_decimals)
    };
    let re = Regex::new(&pattern).map_err(|e| BridgeError::Validation(format!("amount pattern: {}", e)))?;
    if !re.is_match(amount) {
        return Err(BridgeError::Validation(format!("Invalid decimal amount: {}", amount)));
    }
    // disallow 0 or 0.0... values
    if amount.trim_matches('0').trim_matches('.').is_empty() {
        return Err(BridgeError::Validation("Amount must be positive".to_string()));
    }
    Ok(())
}

/// Converts a user-entered decimal amount into base units of a token with `decimals`.
pub fn amount_to_base_units(amount: &str, decimals: u32) -> Result<U256> {
    validate_amount_strict(amount, decimals)?;
    let parsed = parse_units(amount, decimals)
        .map_err(|e| BridgeError::Validation(format!("Invalid amount {}: {}", amount, e)))?;
    Ok(parsed.into())
}
