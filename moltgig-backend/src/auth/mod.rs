//! Wallet signature authentication.
//!
//! Callers prove control of a wallet by signing `"<app> Auth: <timestamp>"`
//! and sending three headers:
//! - `x-wallet-address`: the claimed wallet
//! - `x-signature`: hex signature of the canonical message
//! - `x-timestamp`: unix seconds, also embedded in the message
//!
//! A request moves through these gates, rejecting at the first failure:
//! headers present -> timestamp within the replay window -> signature valid
//! (EOA ecrecover first, EIP-1271 contract wallet second) -> agent lookup.
//!
//! No sessions or server-side state are involved.

use actix_web::http::header::HeaderMap;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::chain::{ChainReader, ContractWalletVerifier};
use crate::config::Config;
use crate::crypto::{auth_message, format_address, recover_signer_address};
use crate::db::Database;
use crate::models::Agent;

pub const WALLET_ADDRESS_HEADER: &str = "x-wallet-address";
pub const SIGNATURE_HEADER: &str = "x-signature";
pub const TIMESTAMP_HEADER: &str = "x-timestamp";

/// Source of "now" in unix seconds
pub type Clock = Arc<dyn Fn() -> i64 + Send + Sync>;

fn system_clock() -> Clock {
    Arc::new(|| {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs() as i64)
            .unwrap_or_default()
    })
}

/// Raw auth headers as sent by the caller
#[derive(Debug, Clone)]
pub struct AuthHeaders {
    pub wallet_address: String,
    pub signature: String,
    pub timestamp: String,
}

impl AuthHeaders {
    /// `None` unless all three headers are present and non-empty.
    pub fn from_headers(headers: &HeaderMap) -> Option<Self> {
        let get = |name: &str| {
            headers
                .get(name)
                .and_then(|v| v.to_str().ok())
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
        };
        Some(Self {
            wallet_address: get(WALLET_ADDRESS_HEADER)?,
            signature: get(SIGNATURE_HEADER)?,
            timestamp: get(TIMESTAMP_HEADER)?,
        })
    }
}

/// Why a request failed authentication. Reasons are deliberately coarse.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthRejection {
    MissingHeaders,
    TimestampInvalid,
    InvalidSignature,
}

impl AuthRejection {
    pub fn message(&self) -> &'static str {
        match self {
            AuthRejection::MissingHeaders => "Missing authentication headers",
            AuthRejection::TimestampInvalid => "Timestamp expired or invalid",
            AuthRejection::InvalidSignature => "Invalid signature",
        }
    }
}

impl std::fmt::Display for AuthRejection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.message())
    }
}

#[derive(Debug)]
pub enum AuthError {
    /// Client error: re-sign with a fresh timestamp
    Rejected(AuthRejection),
    /// Agent lookup failed (distinct from "no agent yet")
    Database(rusqlite::Error),
}

impl From<AuthRejection> for AuthError {
    fn from(r: AuthRejection) -> Self {
        AuthError::Rejected(r)
    }
}

/// Verified caller identity attached to a request
#[derive(Debug, Clone)]
pub struct AuthContext {
    /// Lowercase wallet address
    pub wallet_address: String,
    /// Agent row, if the wallet has one yet
    pub agent: Option<Agent>,
}

pub struct WalletAuthenticator {
    db: Arc<Database>,
    contract_verifier: ContractWalletVerifier,
    app_name: String,
    window_secs: u64,
    clock: Clock,
}

impl WalletAuthenticator {
    pub fn new(db: Arc<Database>, chain: Arc<dyn ChainReader>, config: &Config) -> Self {
        Self {
            db,
            contract_verifier: ContractWalletVerifier::new(chain, config.chain_call_timeout),
            app_name: config.app_name.clone(),
            window_secs: config.auth_window_secs,
            clock: system_clock(),
        }
    }

    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }

    pub fn app_name(&self) -> &str {
        &self.app_name
    }

    /// Parse the timestamp header and check it against the replay window (inclusive).
    pub fn check_timestamp(&self, timestamp: &str) -> Result<i64, AuthRejection> {
        let ts: i64 = timestamp
            .parse()
            .map_err(|_| AuthRejection::TimestampInvalid)?;
        let now = (self.clock)();
        if now.abs_diff(ts) > self.window_secs {
            return Err(AuthRejection::TimestampInvalid);
        }
        Ok(ts)
    }

    /// EOA recovery first; the contract-wallet path only when recovery fails
    /// or yields a different address.
    pub async fn verify_signature(
        &self,
        wallet_address: &str,
        message: &str,
        signature: &str,
    ) -> bool {
        match recover_signer_address(message, signature) {
            Ok(recovered) => {
                if format_address(&recovered).eq_ignore_ascii_case(wallet_address.trim()) {
                    return true;
                }
                log::debug!("[Auth] Recovered signer differs from claimed wallet, trying EIP-1271");
            }
            Err(e) => {
                log::debug!("[Auth] EOA recovery failed ({}), trying EIP-1271", e);
            }
        }

        self.contract_verifier
            .verify(wallet_address, message, signature)
            .await
    }

    /// Run the header, timestamp and signature gates. Returns the canonical
    /// (0x-prefixed, lowercase) wallet.
    pub async fn verify_headers(&self, headers: &AuthHeaders) -> Result<String, AuthRejection> {
        self.check_timestamp(&headers.timestamp)?;

        // Each wallet has exactly one accepted spelling
        let wallet_address = canonical_wallet_address(&headers.wallet_address)
            .ok_or(AuthRejection::InvalidSignature)?;

        let message = auth_message(&self.app_name, &headers.timestamp);
        if !self
            .verify_signature(&wallet_address, &message, &headers.signature)
            .await
        {
            return Err(AuthRejection::InvalidSignature);
        }

        Ok(wallet_address)
    }

    /// Required auth: reject on any failed gate. A missing agent row is not
    /// an error; the context simply carries `agent: None`.
    pub async fn require_auth(&self, headers: &HeaderMap) -> Result<AuthContext, AuthError> {
        let auth_headers = AuthHeaders::from_headers(headers).ok_or(AuthRejection::MissingHeaders)?;
        let wallet_address = self.verify_headers(&auth_headers).await?;

        let agent = self
            .db
            .get_agent_by_wallet(&wallet_address)
            .map_err(AuthError::Database)?;

        if let Some(agent) = &agent {
            if let Err(e) = self.db.touch_agent(&agent.id) {
                log::warn!("[Auth] Failed to update last_active for {}: {}", agent.id, e);
            }
        }

        Ok(AuthContext {
            wallet_address,
            agent,
        })
    }

    /// Optional auth: same checks, but every failure means "anonymous".
    pub async fn optional_auth(&self, headers: &HeaderMap) -> Option<AuthContext> {
        let auth_headers = AuthHeaders::from_headers(headers)?;
        let wallet_address = match self.verify_headers(&auth_headers).await {
            Ok(w) => w,
            Err(rejection) => {
                log::debug!("[Auth] Optional auth ignored: {}", rejection);
                return None;
            }
        };

        let agent = match self.db.get_agent_by_wallet(&wallet_address) {
            Ok(agent) => agent,
            Err(e) => {
                log::warn!("[Auth] Optional auth agent lookup failed: {}", e);
                return None;
            }
        };

        Some(AuthContext {
            wallet_address,
            agent,
        })
    }
}

/// `0x` + 40 hex digits, lowercased. Anything else is not a wallet.
fn canonical_wallet_address(raw: &str) -> Option<String> {
    let hex_part = raw.trim().strip_prefix("0x")?;
    if hex_part.len() != 40 {
        return None;
    }
    let address: ethers::types::Address = hex_part.parse().ok()?;
    Some(format_address(&address))
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use actix_web::http::header::{HeaderName, HeaderValue};

    pub fn fixed_clock(now: i64) -> Clock {
        Arc::new(move || now)
    }

    pub fn header_map(wallet: &str, signature: &str, timestamp: &str) -> HeaderMap {
        let mut map = HeaderMap::new();
        for (name, value) in [
            (WALLET_ADDRESS_HEADER, wallet),
            (SIGNATURE_HEADER, signature),
            (TIMESTAMP_HEADER, timestamp),
        ] {
            map.insert(
                HeaderName::from_static(name),
                HeaderValue::from_str(value).expect("header value"),
            );
        }
        map
    }

    pub fn authenticator(
        db: Arc<Database>,
        chain: Arc<dyn ChainReader>,
        app_name: &str,
        now: i64,
    ) -> WalletAuthenticator {
        let config = Config {
            app_name: app_name.to_string(),
            ..Config::default()
        };
        WalletAuthenticator::new(db, chain, &config).with_clock(fixed_clock(now))
    }
}
