use serde::{Deserialize, Serialize};

use super::WebhookEvent;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Notification {
    pub id: String,
    pub agent_id: String,
    pub event_type: String,
    pub title: String,
    pub body: String,
    pub data: serde_json::Value,
    pub read_at: Option<String>,
    pub created_at: String,
}

/// Body POSTed to webhook endpoints. Serialized once per dispatch so every
/// retry sends (and signs) the same bytes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookPayload {
    pub event: WebhookEvent,
    pub data: serde_json::Value,
    pub timestamp: String,
    pub notification_id: String,
}
