//! Task rows: creation, status transitions, deadline handling and profile stats.

use chrono::Utc;
use rusqlite::{OptionalExtension, Result as SqliteResult, Row};
use uuid::Uuid;

use crate::models::{Task, TaskStats, TaskStatus};
use super::super::Database;

const TASK_COLUMNS: &str = "id, title, requester_id, worker_id, reward_wei, status, deadline,
     deadline_warned, created_at, updated_at";

fn row_to_task(row: &Row) -> rusqlite::Result<Task> {
    let status_str: String = row.get(5)?;
    Ok(Task {
        id: row.get(0)?,
        title: row.get(1)?,
        requester_id: row.get(2)?,
        worker_id: row.get(3)?,
        reward_wei: row.get(4)?,
        status: status_str.parse().unwrap_or(TaskStatus::Open),
        deadline: row.get(6)?,
        deadline_warned: row.get::<_, i64>(7)? != 0,
        created_at: row.get(8)?,
        updated_at: row.get(9)?,
    })
}

impl Database {
    pub fn create_task(
        &self,
        title: &str,
        requester_id: Option<&str>,
        worker_id: Option<&str>,
        reward_wei: &str,
        status: TaskStatus,
        deadline: Option<&str>,
    ) -> SqliteResult<Task> {
        let conn = self.conn();
        let now = Utc::now().to_rfc3339();
        let id = Uuid::new_v4().to_string();

        conn.execute(
            "INSERT INTO tasks (id, title, requester_id, worker_id, reward_wei, status, deadline,
                                deadline_warned, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, 0, ?8, ?8)",
            rusqlite::params![
                id,
                title,
                requester_id,
                worker_id,
                reward_wei,
                status.to_string(),
                deadline,
                now
            ],
        )?;

        Ok(Task {
            id,
            title: title.to_string(),
            requester_id: requester_id.map(|s| s.to_string()),
            worker_id: worker_id.map(|s| s.to_string()),
            reward_wei: reward_wei.to_string(),
            status,
            deadline: deadline.map(|s| s.to_string()),
            deadline_warned: false,
            created_at: now.clone(),
            updated_at: now,
        })
    }

    pub fn get_task(&self, id: &str) -> SqliteResult<Option<Task>> {
        let conn = self.conn();
        conn.query_row(
            &format!("SELECT {} FROM tasks WHERE id = ?1", TASK_COLUMNS),
            [id],
            row_to_task,
        )
        .optional()
    }

    /// Tasks in any of `statuses` that have a deadline set.
    pub fn list_tasks_with_deadline(&self, statuses: &[TaskStatus]) -> SqliteResult<Vec<Task>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM tasks WHERE deadline IS NOT NULL ORDER BY deadline",
            TASK_COLUMNS
        ))?;
        let tasks = stmt
            .query_map([], row_to_task)?
            .filter_map(|r| r.ok())
            .filter(|t| statuses.contains(&t.status))
            .collect();
        Ok(tasks)
    }

    pub fn mark_deadline_warned(&self, id: &str) -> SqliteResult<bool> {
        let conn = self.conn();
        let now = Utc::now().to_rfc3339();
        let rows = conn.execute(
            "UPDATE tasks SET deadline_warned = 1, updated_at = ?1
             WHERE id = ?2 AND deadline_warned = 0",
            rusqlite::params![now, id],
        )?;
        Ok(rows > 0)
    }

    /// Move a task to `expired`. Returns false if it already left an expirable status.
    pub fn mark_task_expired(&self, id: &str) -> SqliteResult<bool> {
        let conn = self.conn();
        let now = Utc::now().to_rfc3339();
        let rows = conn.execute(
            "UPDATE tasks SET status = 'expired', updated_at = ?1
             WHERE id = ?2 AND status IN ('open', 'funded', 'accepted')",
            rusqlite::params![now, id],
        )?;
        Ok(rows > 0)
    }

    /// Move a task from one of `from` to `to` in a single UPDATE, optionally
    /// assigning the worker. `None` if the task is missing or not in `from`.
    pub fn transition_task(
        &self,
        id: &str,
        from: &[TaskStatus],
        to: TaskStatus,
        worker_id: Option<&str>,
    ) -> SqliteResult<Option<Task>> {
        if from.is_empty() {
            return Ok(None);
        }
        let conn = self.conn();
        let now = Utc::now().to_rfc3339();
        let allowed: Vec<String> = from.iter().map(|s| format!("'{}'", s)).collect();
        let rows = conn.execute(
            &format!(
                "UPDATE tasks SET status = ?1, worker_id = COALESCE(?2, worker_id), updated_at = ?3
                 WHERE id = ?4 AND status IN ({})",
                allowed.join(", ")
            ),
            rusqlite::params![to.to_string(), worker_id, now, id],
        )?;
        if rows == 0 {
            return Ok(None);
        }
        conn.query_row(
            &format!("SELECT {} FROM tasks WHERE id = ?1", TASK_COLUMNS),
            [id],
            row_to_task,
        )
        .optional()
    }

    /// Posted / completed / in-progress counts for an agent's public profile.
    pub fn get_task_stats(&self, agent_id: &str) -> SqliteResult<TaskStats> {
        let conn = self.conn();
        conn.query_row(
            "SELECT
                (SELECT COUNT(*) FROM tasks WHERE requester_id = ?1),
                (SELECT COUNT(*) FROM tasks WHERE worker_id = ?1 AND status = 'completed'),
                (SELECT COUNT(*) FROM tasks
                 WHERE worker_id = ?1 AND status IN ('accepted', 'submitted'))",
            [agent_id],
            |row| {
                Ok(TaskStats {
                    tasks_posted: row.get(0)?,
                    tasks_completed: row.get(1)?,
                    tasks_in_progress: row.get(2)?,
                })
            },
        )
    }
}
