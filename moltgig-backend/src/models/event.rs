//! Notification/webhook event types (closed set).

use serde::{Deserialize, Serialize};
use strum::{Display, EnumIter, EnumString, IntoEnumIterator, IntoStaticStr};

#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    EnumIter,
    IntoStaticStr,
)]
pub enum WebhookEvent {
    #[serde(rename = "task.accepted")]
    #[strum(serialize = "task.accepted")]
    TaskAccepted,
    #[serde(rename = "task.submitted")]
    #[strum(serialize = "task.submitted")]
    TaskSubmitted,
    #[serde(rename = "task.completed")]
    #[strum(serialize = "task.completed")]
    TaskCompleted,
    #[serde(rename = "payment.released")]
    #[strum(serialize = "payment.released")]
    PaymentReleased,
    #[serde(rename = "dispute.raised")]
    #[strum(serialize = "dispute.raised")]
    DisputeRaised,
    #[serde(rename = "dispute.resolved")]
    #[strum(serialize = "dispute.resolved")]
    DisputeResolved,
    #[serde(rename = "task.deadline_warning")]
    #[strum(serialize = "task.deadline_warning")]
    TaskDeadlineWarning,
    #[serde(rename = "task.expired")]
    #[strum(serialize = "task.expired")]
    TaskExpired,
}

/// Which task participants receive an event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Recipients {
    Requester,
    Worker,
    Both,
}

impl WebhookEvent {
    /// Wire name, e.g. `task.accepted`
    pub fn as_str(&self) -> &'static str {
        self.into()
    }

    pub fn all() -> Vec<WebhookEvent> {
        Self::iter().collect()
    }

    pub fn all_names() -> Vec<&'static str> {
        Self::iter().map(|e| e.as_str()).collect()
    }

    pub fn recipients(&self) -> Recipients {
        match self {
            WebhookEvent::TaskAccepted | WebhookEvent::TaskSubmitted => Recipients::Requester,
            WebhookEvent::PaymentReleased | WebhookEvent::TaskDeadlineWarning => Recipients::Worker,
            WebhookEvent::TaskCompleted
            | WebhookEvent::DisputeRaised
            | WebhookEvent::DisputeResolved
            | WebhookEvent::TaskExpired => Recipients::Both,
        }
    }

    /// Parse a requested event list. Returns the unknown names on failure.
    pub fn parse_list(names: &[String]) -> Result<Vec<WebhookEvent>, Vec<String>> {
        let mut events = Vec::new();
        let mut invalid = Vec::new();
        for name in names {
            match name.parse::<WebhookEvent>() {
                Ok(event) => {
                    if !events.contains(&event) {
                        events.push(event);
                    }
                }
                Err(_) => invalid.push(name.clone()),
            }
        }
        if invalid.is_empty() {
            Ok(events)
        } else {
            Err(invalid)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_trips_through_wire_names() {
        for event in WebhookEvent::all() {
            assert_eq!(event.as_str().parse::<WebhookEvent>().unwrap(), event);
            assert_eq!(
                serde_json::to_value(event).unwrap(),
                serde_json::Value::String(event.as_str().to_string())
            );
        }
        assert_eq!(WebhookEvent::all().len(), 8);
    }

    #[test]
    fn test_display_matches_wire_name() {
        assert_eq!(WebhookEvent::TaskDeadlineWarning.to_string(), "task.deadline_warning");
        assert_eq!(WebhookEvent::PaymentReleased.as_str(), "payment.released");
        assert_eq!(format!("{}", WebhookEvent::DisputeResolved), "dispute.resolved");
    }

    #[test]
    fn test_rejects_unknown_names() {
        assert!("task.created".parse::<WebhookEvent>().is_err());
        assert!("TASK.ACCEPTED".parse::<WebhookEvent>().is_err());
        let err = WebhookEvent::parse_list(&["task.accepted".into(), "bogus".into()]).unwrap_err();
        assert_eq!(err, vec!["bogus".to_string()]);
    }

    #[test]
    fn test_parse_list_dedupes() {
        let events =
            WebhookEvent::parse_list(&["task.expired".into(), "task.expired".into()]).unwrap();
        assert_eq!(events, vec![WebhookEvent::TaskExpired]);
    }

    #[test]
    fn test_recipient_routing() {
        assert_eq!(WebhookEvent::TaskAccepted.recipients(), Recipients::Requester);
        assert_eq!(WebhookEvent::PaymentReleased.recipients(), Recipients::Worker);
        assert_eq!(WebhookEvent::DisputeRaised.recipients(), Recipients::Both);
    }
}
