//! Signing primitives shared by wallet auth and webhook delivery.
//!
//! - HMAC-SHA256 signing/verification of webhook payloads
//! - Secure random secret generation
//! - EIP-191 personal-message signer recovery

use ethers::types::{Address, H256, Signature, U256};
use hmac::{Hmac, Mac};
use rand::RngCore;
use rand::rngs::OsRng;
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Random bytes in a generated secret (hex-encoded to 64 chars)
pub const SECRET_BYTES: usize = 32;

/// Hex length of an HMAC-SHA256 digest
const SIGNATURE_HEX_LEN: usize = 64;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SignatureError {
    InvalidSignatureFormat(String),
}

impl std::fmt::Display for SignatureError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SignatureError::InvalidSignatureFormat(reason) => {
                write!(f, "Invalid signature format: {}", reason)
            }
        }
    }
}

impl std::error::Error for SignatureError {}

/// Generate a secret from the OS CSPRNG, hex-encoded.
pub fn generate_secret() -> String {
    let mut bytes = [0u8; SECRET_BYTES];
    OsRng.fill_bytes(&mut bytes);
    hex::encode(bytes)
}

fn hmac_for(payload: &str, secret: &str) -> HmacSha256 {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .expect("HMAC can take key of any size");
    mac.update(payload.as_bytes());
    mac
}

/// HMAC-SHA256 of `payload` under `secret`, lowercase hex.
pub fn sign_payload(payload: &str, secret: &str) -> String {
    hex::encode(hmac_for(payload, secret).finalize().into_bytes())
}

/// Check a hex HMAC-SHA256 signature for `payload`.
///
/// Length mismatches are rejected before any content comparison. The digest
/// comparison itself goes through `Mac::verify_slice`, which is constant-time.
pub fn verify_payload_signature(payload: &str, signature: &str, secret: &str) -> bool {
    if signature.len() != SIGNATURE_HEX_LEN {
        return false;
    }
    let provided = match hex::decode(signature) {
        Ok(bytes) => bytes,
        Err(_) => return false,
    };
    hmac_for(payload, secret).verify_slice(&provided).is_ok()
}

/// Constant-time equality for shared keys such as the admin API key.
/// Each side keys an HMAC over a fixed message; the tags go through `verify_slice`.
pub fn secrets_match(provided: &str, expected: &str) -> bool {
    const CONTEXT: &str = "moltgig-shared-key";
    verify_payload_signature(CONTEXT, &sign_payload(CONTEXT, provided), expected)
}

/// The canonical message a wallet signs to authenticate: "<app> Auth: <timestamp>".
///
/// `timestamp` is used verbatim as received; any change to this format
/// invalidates every signature clients have produced.
pub fn auth_message(app_name: &str, timestamp: &str) -> String {
    format!("{} Auth: {}", app_name, timestamp)
}

/// EIP-191 personal-message hash ("\x19Ethereum Signed Message:\n" + len + message).
pub fn personal_message_hash(message: &str) -> H256 {
    ethers::utils::hash_message(message)
}

/// Parse a 65-byte hex signature (r || s || v).
pub fn parse_signature(signature_hex: &str) -> Result<Signature, SignatureError> {
    let sig_bytes = hex::decode(signature_hex.trim().trim_start_matches("0x"))
        .map_err(|e| SignatureError::InvalidSignatureFormat(format!("invalid hex: {}", e)))?;

    if sig_bytes.len() != 65 {
        return Err(SignatureError::InvalidSignatureFormat(format!(
            "signature must be 65 bytes, got {}",
            sig_bytes.len()
        )));
    }

    let r = H256::from_slice(&sig_bytes[0..32]);
    let s = H256::from_slice(&sig_bytes[32..64]);
    let v = sig_bytes[64];

    // Ethereum uses 27/28, some libraries use 0/1
    let recovery_id = if v >= 27 { v - 27 } else { v };
    if recovery_id > 1 {
        return Err(SignatureError::InvalidSignatureFormat(format!(
            "invalid recovery byte {}",
            v
        )));
    }

    Ok(Signature {
        r: U256::from_big_endian(r.as_bytes()),
        s: U256::from_big_endian(s.as_bytes()),
        v: recovery_id as u64,
    })
}

/// Recover the address that produced an EIP-191 personal-message signature.
pub fn recover_signer_address(
    message: &str,
    signature_hex: &str,
) -> Result<Address, SignatureError> {
    let signature = parse_signature(signature_hex)?;
    signature
        .recover(message)
        .map_err(|e| SignatureError::InvalidSignatureFormat(format!("ecrecover failed: {}", e)))
}

/// Lowercase 0x-prefixed hex form of an address.
pub fn format_address(address: &Address) -> String {
    format!("{:?}", address).to_lowercase()
}
