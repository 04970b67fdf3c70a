use serde::{Deserialize, Serialize};

use super::WebhookEvent;

/// A webhook subscription. `secret` never leaves the server after creation.
#[derive(Debug, Clone)]
pub struct Webhook {
    pub id: String,
    pub agent_id: String,
    pub url: String,
    pub events: Vec<WebhookEvent>,
    pub secret: String,
    pub is_active: bool,
    pub failure_count: i64,
    pub last_success_at: Option<String>,
    pub last_failure_at: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

impl Webhook {
    pub fn subscribes_to(&self, event: WebhookEvent) -> bool {
        self.events.contains(&event)
    }
}

/// Result of recording a failed delivery
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FailureRecord {
    pub failure_count: i64,
    pub is_active: bool,
}

/// Public view of a webhook (no secret)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookResponse {
    pub id: String,
    pub url: String,
    pub events: Vec<WebhookEvent>,
    pub is_active: bool,
    pub failure_count: i64,
    pub last_success_at: Option<String>,
    pub last_failure_at: Option<String>,
    pub created_at: String,
}

impl From<&Webhook> for WebhookResponse {
    fn from(w: &Webhook) -> Self {
        Self {
            id: w.id.clone(),
            url: w.url.clone(),
            events: w.events.clone(),
            is_active: w.is_active,
            failure_count: w.failure_count,
            last_success_at: w.last_success_at.clone(),
            last_failure_at: w.last_failure_at.clone(),
            created_at: w.created_at.clone(),
        }
    }
}

/// Webhook targets must be absolute https URLs with a host.
pub fn validate_webhook_url(raw: &str) -> Result<(), String> {
    let parsed = url::Url::parse(raw.trim()).map_err(|_| "URL is invalid".to_string())?;
    if parsed.scheme() != "https" {
        return Err("URL must use HTTPS".to_string());
    }
    if parsed.host_str().map(|h| h.is_empty()).unwrap_or(true) {
        return Err("URL must include a host".to_string());
    }
    Ok(())
}
