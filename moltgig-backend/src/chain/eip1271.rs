//! EIP-1271 signature validation for smart-contract wallets.
//!
//! 1. Skip addresses without code (not a contract)
//! 2. Hash the message with the EIP-191 personal-message prefix
//! 3. Call `isValidSignature(bytes32,bytes)` on the wallet
//! 4. Valid iff it returns the magic value `0x1626ba7e`
//!
//! Every failure (RPC error, revert, missing function, timeout) is "invalid".

use ethers::abi::{self, ParamType, Token};
use ethers::types::{Address, Bytes};
use std::sync::Arc;
use std::time::Duration;

use super::ChainReader;
use crate::crypto::personal_message_hash;

/// Magic return value (and function selector) of `isValidSignature(bytes32,bytes)`
pub const EIP1271_MAGIC_VALUE: [u8; 4] = [0x16, 0x26, 0xba, 0x7e];

pub struct ContractWalletVerifier {
    reader: Arc<dyn ChainReader>,
    timeout: Duration,
}

impl ContractWalletVerifier {
    pub fn new(reader: Arc<dyn ChainReader>, timeout: Duration) -> Self {
        Self { reader, timeout }
    }

    /// True only if `address` is a contract that accepts `signature` for `message`.
    pub async fn verify(&self, address: &str, message: &str, signature: &str) -> bool {
        match tokio::time::timeout(self.timeout, self.check(address, message, signature)).await {
            Ok(valid) => valid,
            Err(_) => {
                log::warn!(
                    "[EIP-1271] Verification for {} timed out after {:?}",
                    address,
                    self.timeout
                );
                false
            }
        }
    }

    async fn check(&self, address: &str, message: &str, signature: &str) -> bool {
        let contract: Address = match address.trim().parse() {
            Ok(a) => a,
            Err(_) => return false,
        };

        let code = match self.reader.get_code(contract).await {
            Ok(code) => code,
            Err(e) => {
                log::warn!("[EIP-1271] get_code failed for {}: {}", address, e);
                return false;
            }
        };
        if code.as_ref().is_empty() {
            return false;
        }

        let signature_bytes = match hex::decode(signature.trim().trim_start_matches("0x")) {
            Ok(bytes) => bytes,
            Err(_) => return false,
        };

        let data = encode_is_valid_signature(&personal_message_hash(message).0, signature_bytes);

        match self.reader.call(contract, data).await {
            Ok(ret) => is_magic_value(&ret),
            Err(e) => {
                log::debug!("[EIP-1271] isValidSignature call failed for {}: {}", address, e);
                false
            }
        }
    }
}

/// Calldata for `isValidSignature(bytes32 hash, bytes signature)`.
fn encode_is_valid_signature(hash: &[u8; 32], signature: Vec<u8>) -> Bytes {
    let mut data = EIP1271_MAGIC_VALUE.to_vec();
    data.extend_from_slice(&abi::encode(&[
        Token::FixedBytes(hash.to_vec()),
        Token::Bytes(signature),
    ]));
    Bytes::from(data)
}

/// Decode a `bytes4` return and compare it to the magic value.
/// The return must be a full ABI word; a bare 4-byte value is rejected.
fn is_magic_value(ret: &Bytes) -> bool {
    if ret.as_ref().len() < 32 {
        return false;
    }
    match abi::decode(&[ParamType::FixedBytes(4)], ret.as_ref()) {
        Ok(tokens) => matches!(
            tokens.first(),
            Some(Token::FixedBytes(b)) if b.as_slice() == EIP1271_MAGIC_VALUE
        ),
        Err(_) => false,
    }
}
