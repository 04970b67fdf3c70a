//! Deadline sweeper: warns workers 24h before a deadline and expires tasks
//! whose deadline passed without a submission.

use chrono::{DateTime, Duration, Utc};
use serde_json::Map;
use std::sync::Arc;
use tokio::sync::oneshot;
use tokio::time::{interval, Duration as TokioDuration};

use crate::db::Database;
use crate::models::{Task, TaskStatus, WebhookEvent};
use crate::notifications::NotificationService;

/// How far ahead of a deadline the warning fires
const WARNING_LEAD_HOURS: i64 = 24;

const EXPIRABLE: [TaskStatus; 3] = [TaskStatus::Open, TaskStatus::Funded, TaskStatus::Accepted];

/// Task ids touched by one sweep
#[derive(Debug, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub warned: Vec<String>,
    pub expired: Vec<String>,
}

pub struct DeadlineSweeper {
    db: Arc<Database>,
    notifications: Arc<NotificationService>,
    poll_interval_secs: u64,
}

impl DeadlineSweeper {
    pub fn new(
        db: Arc<Database>,
        notifications: Arc<NotificationService>,
        poll_interval_secs: u64,
    ) -> Self {
        Self {
            db,
            notifications,
            poll_interval_secs,
        }
    }

    /// Start the sweeper background task
    pub async fn start(self: Arc<Self>, mut shutdown_rx: oneshot::Receiver<()>) {
        log::info!(
            "[Deadline] Sweeper started (poll interval: {}s)",
            self.poll_interval_secs
        );

        let mut poll_interval = interval(TokioDuration::from_secs(self.poll_interval_secs.max(1)));

        loop {
            tokio::select! {
                _ = &mut shutdown_rx => {
                    log::info!("[Deadline] Sweeper received shutdown signal");
                    break;
                }
                _ = poll_interval.tick() => {
                    let report = self.sweep(Utc::now()).await;
                    if !report.warned.is_empty() || !report.expired.is_empty() {
                        log::info!(
                            "[Deadline] Warned {} task(s), expired {} task(s)",
                            report.warned.len(),
                            report.expired.len()
                        );
                    }
                }
            }
        }
    }

    /// One pass over tasks with deadlines, as of `now`.
    pub async fn sweep(&self, now: DateTime<Utc>) -> SweepReport {
        let mut report = SweepReport::default();

        let tasks = match self.db.list_tasks_with_deadline(&EXPIRABLE) {
            Ok(tasks) => tasks,
            Err(e) => {
                log::error!("[Deadline] Failed to load tasks: {}", e);
                return report;
            }
        };

        for task in tasks {
            let Some(deadline) = parse_deadline(&task) else {
                continue;
            };

            if deadline <= now {
                match self.db.mark_task_expired(&task.id) {
                    Ok(true) => {
                        self.notifications
                            .notify(WebhookEvent::TaskExpired, &task.id, Map::new())
                            .await;
                        report.expired.push(task.id);
                    }
                    Ok(false) => {}
                    Err(e) => log::error!("[Deadline] Failed to expire task {}: {}", task.id, e),
                }
            } else if task.status == TaskStatus::Accepted
                && !task.deadline_warned
                && deadline - now <= Duration::hours(WARNING_LEAD_HOURS)
            {
                // Mark first so a slow notify can't cause a second warning on the next tick
                match self.db.mark_deadline_warned(&task.id) {
                    Ok(true) => {
                        self.notifications
                            .notify(WebhookEvent::TaskDeadlineWarning, &task.id, Map::new())
                            .await;
                        report.warned.push(task.id);
                    }
                    Ok(false) => {}
                    Err(e) => {
                        log::error!("[Deadline] Failed to mark task {} warned: {}", task.id, e)
                    }
                }
            }
        }

        report
    }
}

fn parse_deadline(task: &Task) -> Option<DateTime<Utc>> {
    let raw = task.deadline.as_deref()?;
    match DateTime::parse_from_rfc3339(raw) {
        Ok(dt) => Some(dt.with_timezone(&Utc)),
        Err(e) => {
            log::warn!("[Deadline] Task {} has unparseable deadline '{}': {}", task.id, raw, e);
            None
        }
    }
}
