//! Webhook delivery with retry, backoff and a per-endpoint circuit breaker.
//!
//! Each delivery runs as its own detached tokio task and always runs to a
//! final outcome. The payload is serialized once; every attempt sends and
//! signs the same bytes.

use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

use super::transport::WebhookTransport;
use crate::config::WebhookConfig;
use crate::crypto::sign_payload;
use crate::db::Database;
use crate::models::{Webhook, WebhookEvent, WebhookPayload};

pub const SIGNATURE_HEADER: &str = "X-MoltGig-Signature";
pub const EVENT_HEADER: &str = "X-MoltGig-Event";

/// Retry/timeout/threshold settings for deliveries
#[derive(Debug, Clone)]
pub struct DeliveryPolicy {
    pub request_timeout: Duration,
    pub retry_delays: Vec<Duration>,
    pub max_attempts: usize,
    pub failure_threshold: i64,
}

impl DeliveryPolicy {
    /// Delay after failed attempt `attempt` (0-based); clamps to the last entry.
    pub fn delay_for(&self, attempt: usize) -> Duration {
        self.retry_delays
            .get(attempt)
            .or_else(|| self.retry_delays.last())
            .copied()
            .unwrap_or_default()
    }
}

impl From<&WebhookConfig> for DeliveryPolicy {
    fn from(cfg: &WebhookConfig) -> Self {
        Self {
            request_timeout: cfg.request_timeout,
            retry_delays: cfg.retry_delays.clone(),
            max_attempts: cfg.max_attempts.max(1),
            failure_threshold: cfg.failure_threshold,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryOutcome {
    Delivered { attempts: usize },
    Failed {
        attempts: usize,
        last_error: String,
        /// The circuit breaker tripped on this failure
        deactivated: bool,
    },
}

pub struct WebhookDispatcher {
    db: Arc<Database>,
    transport: Arc<dyn WebhookTransport>,
    policy: DeliveryPolicy,
}

impl WebhookDispatcher {
    pub fn new(
        db: Arc<Database>,
        transport: Arc<dyn WebhookTransport>,
        policy: DeliveryPolicy,
    ) -> Self {
        Self { db, transport, policy }
    }

    pub fn policy(&self) -> &DeliveryPolicy {
        &self.policy
    }

    /// Spawn one delivery task per webhook. Returns immediately.
    pub fn dispatch(
        self: &Arc<Self>,
        webhooks: Vec<Webhook>,
        payload: &WebhookPayload,
    ) -> Vec<JoinHandle<DeliveryOutcome>> {
        if webhooks.is_empty() {
            return Vec::new();
        }
        let body: Arc<str> = match serde_json::to_string(payload) {
            Ok(s) => Arc::from(s),
            Err(e) => {
                log::error!("[Webhook] Failed to serialize {} payload: {}", payload.event, e);
                return Vec::new();
            }
        };
        webhooks
            .into_iter()
            .map(|webhook| self.spawn_delivery(webhook, payload.event, body.clone()))
            .collect()
    }

    /// Detached delivery of a pre-serialized body.
    pub fn spawn_delivery(
        self: &Arc<Self>,
        webhook: Webhook,
        event: WebhookEvent,
        body: Arc<str>,
    ) -> JoinHandle<DeliveryOutcome> {
        let dispatcher = Arc::clone(self);
        tokio::spawn(async move {
            let outcome = dispatcher.deliver(&webhook, event, &body).await;
            match &outcome {
                DeliveryOutcome::Delivered { attempts } => log::info!(
                    "[Webhook] Delivered {} to webhook {} after {} attempt(s)",
                    event,
                    webhook.id,
                    attempts
                ),
                DeliveryOutcome::Failed { attempts, last_error, .. } => log::warn!(
                    "[Webhook] Giving up on {} for webhook {} after {} attempt(s): {}",
                    event,
                    webhook.id,
                    attempts,
                    last_error
                ),
            }
            outcome
        })
    }

    /// Deliver with retries, then record the result on the webhook row.
    pub async fn deliver(
        &self,
        webhook: &Webhook,
        event: WebhookEvent,
        body: &str,
    ) -> DeliveryOutcome {
        let headers = delivery_headers(body, &webhook.secret, event);
        let mut last_error = String::new();

        for attempt in 0..self.policy.max_attempts {
            match self.attempt(&webhook.url, body, &headers).await {
                Ok(()) => {
                    if let Err(e) = self.db.record_webhook_success(&webhook.id) {
                        log::error!("[Webhook] Failed to record success for {}: {}", webhook.id, e);
                    }
                    return DeliveryOutcome::Delivered { attempts: attempt + 1 };
                }
                Err(e) => {
                    last_error = e;
                    if attempt + 1 < self.policy.max_attempts {
                        let delay = self.policy.delay_for(attempt);
                        log::warn!(
                            "[Webhook] Attempt {}/{} to {} failed ({}), retrying in {:?}",
                            attempt + 1,
                            self.policy.max_attempts,
                            webhook.id,
                            last_error,
                            delay
                        );
                        tokio::time::sleep(delay).await;
                    }
                }
            }
        }

        let deactivated = match self
            .db
            .record_webhook_failure(&webhook.id, self.policy.failure_threshold)
        {
            Ok(Some(record)) => {
                if !record.is_active && webhook.is_active {
                    log::warn!(
                        "[Webhook] Disabled webhook {} after {} consecutive failures",
                        webhook.id,
                        record.failure_count
                    );
                }
                !record.is_active && webhook.is_active
            }
            Ok(None) => {
                log::debug!("[Webhook] Webhook {} was removed mid-delivery", webhook.id);
                false
            }
            Err(e) => {
                log::error!("[Webhook] Failed to record failure for {}: {}", webhook.id, e);
                false
            }
        };

        DeliveryOutcome::Failed {
            attempts: self.policy.max_attempts,
            last_error,
            deactivated,
        }
    }

    /// Single POST bounded by the per-attempt timeout. Only 2xx counts as success.
    async fn attempt(
        &self,
        url: &str,
        body: &str,
        headers: &[(&'static str, String)],
    ) -> Result<(), String> {
        let send = self.transport.post(url, body, headers);
        match tokio::time::timeout(self.policy.request_timeout, send).await {
            Ok(Ok(status)) if (200..300).contains(&status) => Ok(()),
            Ok(Ok(status)) => Err(format!("HTTP {}", status)),
            Ok(Err(e)) => Err(e),
            Err(_) => Err(format!("Timed out after {:?}", self.policy.request_timeout)),
        }
    }

    /// One-shot signed ping. No retries and no health bookkeeping.
    pub async fn send_test(
        &self,
        webhook: &Webhook,
        payload: &WebhookPayload,
    ) -> Result<u16, String> {
        let body = serde_json::to_string(payload)
            .map_err(|e| format!("Failed to serialize payload: {}", e))?;
        let headers = delivery_headers(&body, &webhook.secret, payload.event);
        match tokio::time::timeout(
            self.policy.request_timeout,
            self.transport.post(&webhook.url, &body, &headers),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => Err(format!("Timed out after {:?}", self.policy.request_timeout)),
        }
    }
}

fn delivery_headers(body: &str, secret: &str, event: WebhookEvent) -> Vec<(&'static str, String)> {
    vec![
        ("Content-Type", "application/json".to_string()),
        (SIGNATURE_HEADER, sign_payload(body, secret)),
        (EVENT_HEADER, event.as_str().to_string()),
    ]
}
