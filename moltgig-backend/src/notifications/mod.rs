//! Task-event notifications: an inbox row per recipient plus signed webhook
//! delivery to that recipient's subscribed endpoints.

pub mod dispatcher;
pub mod transport;

pub use dispatcher::{DeliveryOutcome, DeliveryPolicy, WebhookDispatcher};
pub use transport::HttpWebhookTransport;

use chrono::{SecondsFormat, Utc};
use ethers::types::U256;
use serde_json::{json, Map, Value};
use std::sync::Arc;
use tokio::task::JoinHandle;

use crate::db::Database;
use crate::models::{Recipients, Task, Webhook, WebhookEvent, WebhookPayload};

/// What `notify` did. Delivery handles are detached; awaiting them is optional.
#[derive(Debug, Default)]
pub struct NotifyReport {
    pub notification_ids: Vec<String>,
    pub errors: Vec<String>,
    pub deliveries: Vec<JoinHandle<DeliveryOutcome>>,
}

impl NotifyReport {
    pub fn success(&self) -> bool {
        self.errors.is_empty()
    }
}

pub struct NotificationService {
    db: Arc<Database>,
    dispatcher: Arc<WebhookDispatcher>,
}

impl NotificationService {
    pub fn new(db: Arc<Database>, dispatcher: Arc<WebhookDispatcher>) -> Self {
        Self { db, dispatcher }
    }

    pub fn dispatcher(&self) -> &Arc<WebhookDispatcher> {
        &self.dispatcher
    }

    /// Record `event` for everyone the event concerns and fan out webhooks.
    /// A failure for one recipient never stops the others.
    pub async fn notify(
        &self,
        event: WebhookEvent,
        task_id: &str,
        extra: Map<String, Value>,
    ) -> NotifyReport {
        let mut report = NotifyReport::default();

        let task = match self.db.get_task(task_id) {
            Ok(Some(task)) => task,
            Ok(None) => {
                report.errors.push(format!("Task not found: {}", task_id));
                return report;
            }
            Err(e) => {
                log::error!("[Notify] Failed to load task {}: {}", task_id, e);
                report.errors.push(format!("Failed to load task {}: {}", task_id, e));
                return report;
            }
        };

        let data = enrich(&task, extra);
        let title = render_title(event, &data);
        let body = render_body(event, &data);
        let timestamp = Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true);

        for agent_id in recipients_for(event, &task) {
            let notification = match self
                .db
                .create_notification(&agent_id, event.as_str(), &title, &body, &data)
            {
                Ok(n) => n,
                Err(e) => {
                    log::error!(
                        "[Notify] Failed to create {} notification for {}: {}",
                        event,
                        agent_id,
                        e
                    );
                    report
                        .errors
                        .push(format!("Failed to create notification for {}: {}", agent_id, e));
                    continue;
                }
            };
            report.notification_ids.push(notification.id.clone());

            let webhooks = match self.db.list_active_webhooks_for_event(&agent_id, event) {
                Ok(w) => w,
                Err(e) => {
                    log::error!("[Notify] Failed to load webhooks for {}: {}", agent_id, e);
                    continue;
                }
            };
            if webhooks.is_empty() {
                continue;
            }

            let payload = WebhookPayload {
                event,
                data: data.clone(),
                timestamp: timestamp.clone(),
                notification_id: notification.id,
            };
            report.deliveries.extend(self.dispatcher.dispatch(webhooks, &payload));
        }

        log::info!(
            "[Notify] {} for task {}: {} notification(s), {} webhook delivery(ies)",
            event,
            task.id,
            report.notification_ids.len(),
            report.deliveries.len()
        );
        report
    }
}

/// Task fields first; caller-supplied fields override them.
fn enrich(task: &Task, extra: Map<String, Value>) -> Value {
    let mut data = Map::new();
    data.insert("task_id".into(), json!(task.id));
    data.insert("task_title".into(), json!(task.title));
    data.insert("amount_wei".into(), json!(task.reward_wei));
    data.insert("requester_id".into(), json!(task.requester_id));
    data.insert("worker_id".into(), json!(task.worker_id));
    data.insert("deadline".into(), json!(task.deadline));
    data.extend(extra);
    Value::Object(data)
}

fn recipients_for(event: WebhookEvent, task: &Task) -> Vec<String> {
    let mut ids = Vec::new();
    let mut push = |id: &Option<String>| {
        if let Some(id) = id {
            if !ids.contains(id) {
                ids.push(id.clone());
            }
        }
    };
    match event.recipients() {
        Recipients::Requester => push(&task.requester_id),
        Recipients::Worker => push(&task.worker_id),
        Recipients::Both => {
            push(&task.requester_id);
            push(&task.worker_id);
        }
    }
    ids
}

/// Non-empty string field, else `fallback`
fn field<'a>(data: &'a Value, key: &str, fallback: &'a str) -> &'a str {
    data.get(key)
        .and_then(|v| v.as_str())
        .filter(|s| !s.is_empty())
        .unwrap_or(fallback)
}

fn render_title(event: WebhookEvent, data: &Value) -> String {
    let task_title = field(data, "task_title", "Untitled");
    match event {
        WebhookEvent::TaskAccepted => format!("Task accepted: {}", task_title),
        WebhookEvent::TaskSubmitted => format!("Work submitted: {}", task_title),
        WebhookEvent::TaskCompleted => format!("Task completed: {}", task_title),
        WebhookEvent::PaymentReleased => "Payment received".to_string(),
        WebhookEvent::DisputeRaised => format!("Dispute raised: {}", task_title),
        WebhookEvent::DisputeResolved => format!("Dispute resolved: {}", task_title),
        WebhookEvent::TaskDeadlineWarning => format!("Deadline approaching: {}", task_title),
        WebhookEvent::TaskExpired => format!("Task expired: {}", task_title),
    }
}

fn render_body(event: WebhookEvent, data: &Value) -> String {
    match event {
        WebhookEvent::TaskAccepted => "Your task has been claimed by a worker.".to_string(),
        WebhookEvent::TaskSubmitted => {
            "The worker has submitted their deliverable. Review and approve within 72 hours."
                .to_string()
        }
        WebhookEvent::TaskCompleted => {
            "The task has been approved and payment is being released.".to_string()
        }
        WebhookEvent::PaymentReleased => format!(
            "You received {} ETH for completing a task.",
            format_wei(data.get("amount_wei").and_then(|v| v.as_str()))
        ),
        WebhookEvent::DisputeRaised => {
            format!("A dispute has been raised. Reason: {}", field(data, "reason", "Not specified"))
        }
        WebhookEvent::DisputeResolved => format!(
            "The dispute has been resolved. Outcome: {}",
            field(data, "resolution", "See details")
        ),
        WebhookEvent::TaskDeadlineWarning => format!(
            "Your task deadline is in 24 hours: {}",
            field(data, "deadline", "Check task details")
        ),
        WebhookEvent::TaskExpired => {
            "The task deadline has passed without a submission.".to_string()
        }
    }
}

/// Wei (decimal string) to ETH, truncated to 6 decimals. Missing or
/// unparseable amounts render as "0".
pub fn format_wei(wei: Option<&str>) -> String {
    let Some(amount) = wei.and_then(|w| U256::from_dec_str(w.trim()).ok()) else {
        return "0".to_string();
    };
    let unit = U256::exp10(18);
    let whole = amount / unit;
    let micro = (amount % unit) / U256::exp10(12);
    format!("{}.{:06}", whole, micro.as_u64())
}

/// Ping payload for `POST /api/webhooks/{id}/test`: the first subscribed event, flagged as a test.
pub fn test_payload(webhook: &Webhook) -> WebhookPayload {
    let event = webhook
        .events
        .first()
        .copied()
        .unwrap_or(WebhookEvent::TaskAccepted);
    WebhookPayload {
        event,
        data: json!({
            "test": true,
            "message": "This is a test webhook delivery from MoltGig",
            "webhook_id": webhook.id,
        }),
        timestamp: Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
        notification_id: format!("test-{}", uuid::Uuid::new_v4()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::TaskStatus;
    use crate::notifications::dispatcher::SIGNATURE_HEADER;
    use crate::notifications::transport::test_support::MockTransport;
    use std::time::Duration;

    struct Fixture {
        db: Arc<Database>,
        transport: Arc<MockTransport>,
        service: NotificationService,
        requester: String,
        worker: String,
    }

    fn fixture(transport: MockTransport) -> Fixture {
        let db = Arc::new(Database::new(":memory:").unwrap());
        let requester = db.create_agent("0x00000000000000000000000000000000000000a1").unwrap().id;
        let worker = db.create_agent("0x00000000000000000000000000000000000000b2").unwrap().id;
        let transport = Arc::new(transport);
        let policy = DeliveryPolicy {
            request_timeout: Duration::from_secs(5),
            retry_delays: vec![Duration::ZERO],
            max_attempts: 3,
            failure_threshold: 10,
        };
        let dispatcher = Arc::new(WebhookDispatcher::new(db.clone(), transport.clone(), policy));
        let service = NotificationService::new(db.clone(), dispatcher);
        Fixture { db, transport, service, requester, worker }
    }

    fn task(f: &Fixture) -> Task {
        f.db.create_task(
            "Label images",
            Some(&f.requester),
            Some(&f.worker),
            "1500000000000000000",
            TaskStatus::Accepted,
            None,
        )
        .unwrap()
    }

    #[test]
    fn test_format_wei() {
        assert_eq!(format_wei(Some("1500000000000000000")), "1.500000");
        assert_eq!(format_wei(Some("1")), "0.000000");
        assert_eq!(format_wei(Some("123456789012345678901")), "123.456789");
        assert_eq!(format_wei(None), "0");
        assert_eq!(format_wei(Some("abc")), "0");
    }

    #[tokio::test]
    async fn test_routing_requester_only() {
        let f = fixture(MockTransport::always(Ok(200)));
        let t = task(&f);
        let report = f.service.notify(WebhookEvent::TaskAccepted, &t.id, Map::new()).await;
        assert!(report.success());
        assert_eq!(report.notification_ids.len(), 1);
        let (items, _) = f.db.list_notifications(&f.requester, 20, 0, false).unwrap();
        assert_eq!(items[0].title, "Task accepted: Label images");
        assert_eq!(items[0].event_type, "task.accepted");
        assert_eq!(f.db.count_unread_notifications(&f.worker).unwrap(), 0);
    }

    #[tokio::test]
    async fn test_routing_both_and_payment_body() {
        let f = fixture(MockTransport::always(Ok(200)));
        let t = task(&f);
        let report = f.service.notify(WebhookEvent::TaskCompleted, &t.id, Map::new()).await;
        assert_eq!(report.notification_ids.len(), 2);

        f.service.notify(WebhookEvent::PaymentReleased, &t.id, Map::new()).await;
        let (items, total) = f.db.list_notifications(&f.worker, 20, 0, false).unwrap();
        assert_eq!(total, 2);
        let payment = items.iter().find(|n| n.event_type == "payment.released").unwrap();
        assert_eq!(payment.body, "You received 1.500000 ETH for completing a task.");
        assert_eq!(payment.data["task_id"], t.id.as_str());
    }

    #[tokio::test]
    async fn test_extra_data_overrides() {
        let f = fixture(MockTransport::always(Ok(200)));
        let t = task(&f);
        let mut extra = Map::new();
        extra.insert("reason".into(), json!("Late delivery"));
        extra.insert("task_title".into(), json!("Renamed"));
        f.service.notify(WebhookEvent::DisputeRaised, &t.id, extra).await;

        let (items, _) = f.db.list_notifications(&f.worker, 20, 0, false).unwrap();
        assert_eq!(items[0].title, "Dispute raised: Renamed");
        assert_eq!(items[0].body, "A dispute has been raised. Reason: Late delivery");
    }

    #[tokio::test]
    async fn test_unknown_task() {
        let f = fixture(MockTransport::always(Ok(200)));
        let report = f.service.notify(WebhookEvent::TaskAccepted, "missing", Map::new()).await;
        assert!(!report.success());
        assert!(report.notification_ids.is_empty());
    }

    #[tokio::test]
    async fn test_webhook_failure_does_not_affect_notification() {
        let f = fixture(MockTransport::always(Err("connection refused".into())));
        let t = task(&f);
        let accepted = [WebhookEvent::TaskAccepted];
        f.db.create_webhook(&f.requester, "https://hooks.test/a", &accepted, "s1").unwrap();
        // Not subscribed to this event
        let expired = [WebhookEvent::TaskExpired];
        f.db.create_webhook(&f.requester, "https://hooks.test/b", &expired, "s2").unwrap();

        let report = f.service.notify(WebhookEvent::TaskAccepted, &t.id, Map::new()).await;
        assert!(report.success());
        assert_eq!(report.deliveries.len(), 1);
        for handle in report.deliveries {
            assert!(matches!(handle.await.unwrap(), DeliveryOutcome::Failed { .. }));
        }

        assert_eq!(f.db.count_unread_notifications(&f.requester).unwrap(), 1);
        let sent = f.transport.sent();
        assert_eq!(sent.len(), 3);
        assert!(sent.iter().all(|r| r.url == "https://hooks.test/a"));
        assert!(sent[0].header(SIGNATURE_HEADER).is_some());
        let body: Value = serde_json::from_str(&sent[0].body).unwrap();
        assert_eq!(body["notification_id"], report.notification_ids[0].as_str());
    }

    #[test]
    fn test_test_payload_uses_first_event() {
        let webhook = Webhook {
            id: "w1".into(),
            agent_id: "a1".into(),
            url: "https://hooks.test".into(),
            events: vec![WebhookEvent::DisputeRaised, WebhookEvent::TaskAccepted],
            secret: "s".into(),
            is_active: true,
            failure_count: 0,
            last_success_at: None,
            last_failure_at: None,
            created_at: String::new(),
            updated_at: String::new(),
        };
        let payload = test_payload(&webhook);
        assert_eq!(payload.event, WebhookEvent::DisputeRaised);
        assert_eq!(payload.data["test"], true);
    }
}
