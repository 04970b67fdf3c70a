use std::env;
use std::time::Duration;

/// Environment variable names - single source of truth
pub mod env_vars {
    pub const PORT: &str = "PORT";
    pub const DATABASE_URL: &str = "DATABASE_URL";
    pub const APP_NAME: &str = "APP_NAME";
    pub const BASE_RPC_URL: &str = "BASE_RPC_URL";
    pub const ALCHEMY_API_KEY: &str = "MOLTGIG_ALCHEMY_API_KEY";
    pub const AUTH_WINDOW_SECS: &str = "AUTH_WINDOW_SECS";
    pub const CHAIN_CALL_TIMEOUT_SECS: &str = "CHAIN_CALL_TIMEOUT_SECS";
    // Webhook delivery
    pub const WEBHOOK_TIMEOUT_SECS: &str = "WEBHOOK_TIMEOUT_SECS";
    pub const WEBHOOK_RETRY_DELAYS_SECS: &str = "WEBHOOK_RETRY_DELAYS_SECS";
    pub const WEBHOOK_MAX_ATTEMPTS: &str = "WEBHOOK_MAX_ATTEMPTS";
    pub const WEBHOOK_FAILURE_THRESHOLD: &str = "WEBHOOK_FAILURE_THRESHOLD";
    pub const WEBHOOK_MAX_PER_AGENT: &str = "WEBHOOK_MAX_PER_AGENT";
    // Deadline sweeper (0 = disabled)
    pub const DEADLINE_SWEEP_INTERVAL_SECS: &str = "DEADLINE_SWEEP_INTERVAL_SECS";
    // Dispute resolution (unset = admin routes disabled)
    pub const ADMIN_API_KEY: &str = "ADMIN_API_KEY";
}

/// Default values
pub mod defaults {
    pub const PORT: u16 = 4000;
    pub const DATABASE_URL: &str = "./.db/moltgig.db";
    pub const APP_NAME: &str = "MoltGig";
    pub const BASE_RPC_URL: &str = "https://mainnet.base.org";
    pub const ALCHEMY_BASE_URL: &str = "https://base-mainnet.g.alchemy.com/v2";
    pub const AUTH_WINDOW_SECS: u64 = 300;
    pub const CHAIN_CALL_TIMEOUT_SECS: u64 = 5;
    pub const WEBHOOK_TIMEOUT_SECS: u64 = 5;
    pub const WEBHOOK_RETRY_DELAYS_SECS: [u64; 3] = [1, 5, 30];
    pub const WEBHOOK_MAX_ATTEMPTS: usize = 3;
    pub const WEBHOOK_FAILURE_THRESHOLD: i64 = 10;
    pub const WEBHOOK_MAX_PER_AGENT: i64 = 5;
    pub const DEADLINE_SWEEP_INTERVAL_SECS: u64 = 300;
}

/// Read a numeric env var, falling back to the default when unset or unparseable.
fn parse_env<T: std::str::FromStr + std::fmt::Display + Copy>(name: &str, default: T) -> T {
    match env::var(name) {
        Ok(raw) => raw.trim().parse().unwrap_or_else(|_| {
            log::warn!("Invalid value '{}' for {}, using default {}", raw, name, default);
            default
        }),
        Err(_) => default,
    }
}

/// Parse a comma-separated list of seconds ("1,5,30").
pub fn parse_delays(raw: &str) -> Option<Vec<Duration>> {
    let delays: Result<Vec<u64>, _> = raw
        .split(',')
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .map(|s| s.parse::<u64>())
        .collect();
    match delays {
        Ok(d) if !d.is_empty() => Some(d.into_iter().map(Duration::from_secs).collect()),
        _ => None,
    }
}

/// Resolve the chain RPC endpoint: explicit URL first, then Alchemy, then the public Base endpoint.
fn resolve_rpc_url() -> String {
    if let Ok(url) = env::var(env_vars::BASE_RPC_URL) {
        if !url.trim().is_empty() {
            return url;
        }
    }
    match env::var(env_vars::ALCHEMY_API_KEY) {
        Ok(key) if !key.trim().is_empty() => {
            format!("{}/{}", defaults::ALCHEMY_BASE_URL, key.trim())
        }
        _ => defaults::BASE_RPC_URL.to_string(),
    }
}

#[derive(Clone, Debug)]
pub struct Config {
    pub port: u16,
    pub database_url: String,
    /// Label used in the signed auth message: "<app_name> Auth: <timestamp>"
    pub app_name: String,
    pub rpc_url: String,
    pub auth_window_secs: u64,
    pub chain_call_timeout: Duration,
    pub webhook: WebhookConfig,
    pub deadline_sweep_interval_secs: u64,
    /// Shared key for `x-admin-api-key`; `None` disables admin routes
    pub admin_api_key: Option<String>,
}

/// Delivery tuning for outbound webhooks
#[derive(Clone, Debug)]
pub struct WebhookConfig {
    pub request_timeout: Duration,
    pub retry_delays: Vec<Duration>,
    pub max_attempts: usize,
    pub failure_threshold: i64,
    pub max_per_agent: i64,
}

impl Default for WebhookConfig {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(defaults::WEBHOOK_TIMEOUT_SECS),
            retry_delays: defaults::WEBHOOK_RETRY_DELAYS_SECS
                .iter()
                .map(|s| Duration::from_secs(*s))
                .collect(),
            max_attempts: defaults::WEBHOOK_MAX_ATTEMPTS,
            failure_threshold: defaults::WEBHOOK_FAILURE_THRESHOLD,
            max_per_agent: defaults::WEBHOOK_MAX_PER_AGENT,
        }
    }
}

impl WebhookConfig {
    pub fn from_env() -> Self {
        let fallback = Self::default();
        let retry_delays = match env::var(env_vars::WEBHOOK_RETRY_DELAYS_SECS) {
            Ok(raw) => parse_delays(&raw).unwrap_or_else(|| {
                log::warn!(
                    "Invalid {} '{}', using default backoff",
                    env_vars::WEBHOOK_RETRY_DELAYS_SECS,
                    raw
                );
                fallback.retry_delays.clone()
            }),
            Err(_) => fallback.retry_delays.clone(),
        };

        Self {
            request_timeout: Duration::from_secs(parse_env(
                env_vars::WEBHOOK_TIMEOUT_SECS,
                defaults::WEBHOOK_TIMEOUT_SECS,
            )),
            retry_delays,
            max_attempts: parse_env(env_vars::WEBHOOK_MAX_ATTEMPTS, defaults::WEBHOOK_MAX_ATTEMPTS)
                .max(1),
            failure_threshold: parse_env(
                env_vars::WEBHOOK_FAILURE_THRESHOLD,
                defaults::WEBHOOK_FAILURE_THRESHOLD,
            )
            .max(1),
            max_per_agent: parse_env(
                env_vars::WEBHOOK_MAX_PER_AGENT,
                defaults::WEBHOOK_MAX_PER_AGENT,
            ),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: defaults::PORT,
            database_url: defaults::DATABASE_URL.to_string(),
            app_name: defaults::APP_NAME.to_string(),
            rpc_url: defaults::BASE_RPC_URL.to_string(),
            auth_window_secs: defaults::AUTH_WINDOW_SECS,
            chain_call_timeout: Duration::from_secs(defaults::CHAIN_CALL_TIMEOUT_SECS),
            webhook: WebhookConfig::default(),
            deadline_sweep_interval_secs: defaults::DEADLINE_SWEEP_INTERVAL_SECS,
            admin_api_key: None,
        }
    }
}

impl Config {
    pub fn from_env() -> Self {
        Self {
            port: parse_env(env_vars::PORT, defaults::PORT),
            database_url: env::var(env_vars::DATABASE_URL)
                .unwrap_or_else(|_| defaults::DATABASE_URL.to_string()),
            app_name: env::var(env_vars::APP_NAME)
                .ok()
                .filter(|s| !s.trim().is_empty())
                .unwrap_or_else(|| defaults::APP_NAME.to_string()),
            rpc_url: resolve_rpc_url(),
            auth_window_secs: parse_env(env_vars::AUTH_WINDOW_SECS, defaults::AUTH_WINDOW_SECS),
            chain_call_timeout: Duration::from_secs(parse_env(
                env_vars::CHAIN_CALL_TIMEOUT_SECS,
                defaults::CHAIN_CALL_TIMEOUT_SECS,
            )),
            webhook: WebhookConfig::from_env(),
            deadline_sweep_interval_secs: parse_env(
                env_vars::DEADLINE_SWEEP_INTERVAL_SECS,
                defaults::DEADLINE_SWEEP_INTERVAL_SECS,
            ),
            admin_api_key: env::var(env_vars::ADMIN_API_KEY)
                .ok()
                .map(|k| k.trim().to_string())
                .filter(|k| !k.is_empty()),
        }
    }
}
