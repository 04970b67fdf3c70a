pub mod agent;
pub mod event;
pub mod notification;
pub mod task;
pub mod webhook;

pub use agent::{normalize_wallet_address, Agent, AgentProfileUpdate};
pub use event::{Recipients, WebhookEvent};
pub use notification::{Notification, WebhookPayload};
pub use task::{Task, TaskStats, TaskStatus};
pub use webhook::{validate_webhook_url, FailureRecord, Webhook, WebhookResponse};
