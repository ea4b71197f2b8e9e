use ethers::abi::{self, ParamType, Token};
use ethers::types::{Address, Bytes, U256};
use sha3::{Digest, Keccak256};

use crate::blockchain::traits::ChainError;

/// Offset the L1 -> L2 message relayer adds to an L1 sender address.
pub const L1_TO_L2_ALIAS_OFFSET: &str = "0x1111000000000000000000000000000000001111";

/// Compute the first 4 bytes (function selector) from a signature string, e.g. "transfer(address,uint256)".
pub fn selector_from_signature(signature: &str) -> [u8; 4] {
    let mut keccak = Keccak256::new();
    keccak.update(signature.as_bytes());
    let out = keccak.finalize();
    [out[0], out[1], out[2], out[3]]
}

/// Selector followed by the ABI encoding of `args`.
pub fn encode_call(signature: &str, args: &[Token]) -> Bytes {
    let selector = selector_from_signature(signature);
    let encoded = abi::encode(args);
    let mut out = Vec::with_capacity(4 + encoded.len());
    out.extend_from_slice(&selector);
    out.extend_from_slice(&encoded);
    out.into()
}

/// Decode a single `uint256` return value.
pub fn decode_uint(data: &[u8]) -> Result<U256, ChainError> {
    let tokens = abi::decode(&[ParamType::Uint(256)], data)
        .map_err(|e| ChainError::Decode(format!("expected uint256: {}", e)))?;
    tokens
        .into_iter()
        .next()
        .and_then(Token::into_uint)
        .ok_or_else(|| ChainError::Decode("empty uint256 return data".to_string()))
}

/// Treat `address` as an unsigned 160-bit integer and add `offset` modulo 2^160.
pub fn offset_address(address: Address, offset: Address) -> Address {
    let mask = (U256::one() << 160) - U256::one();
    let a = U256::from_big_endian(address.as_bytes());
    let b = U256::from_big_endian(offset.as_bytes());
    // both operands are < 2^160, so the U256 sum cannot overflow
    let sum = (a + b) & mask;
    let mut word = [0u8; 32];
    sum.to_big_endian(&mut word);
    Address::from_slice(&word[12..])
}

/// Sender the destination chain sees for a message relayed from `l1_address`.
pub fn apply_l1_to_l2_alias(l1_address: Address) -> Address {
    // the constant is a valid 20-byte literal
    let offset: Address = L1_TO_L2_ALIAS_OFFSET.parse().unwrap_or_default();
    offset_address(l1_address, offset)
}
