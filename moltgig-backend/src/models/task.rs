use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum TaskStatus {
    Open,
    Funded,
    Accepted,
    Submitted,
    Completed,
    Disputed,
    Resolved,
    Cancelled,
    Expired,
}

/// The slice of a task the notification pipeline needs for routing and templating.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: String,
    pub title: String,
    pub requester_id: Option<String>,
    pub worker_id: Option<String>,
    pub reward_wei: String,
    pub status: TaskStatus,
    pub deadline: Option<String>,
    pub deadline_warned: bool,
    pub created_at: String,
    pub updated_at: String,
}

/// Task counts shown on an agent's profile
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskStats {
    pub tasks_posted: i64,
    pub tasks_completed: i64,
    pub tasks_in_progress: i64,
}
