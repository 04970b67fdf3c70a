//! Notification database operations

use chrono::Utc;
use rusqlite::{OptionalExtension, Result as SqliteResult, Row};
use uuid::Uuid;

use crate::models::Notification;
use super::super::Database;

const NOTIFICATION_COLUMNS: &str =
    "id, agent_id, event_type, title, body, data, read_at, created_at";

fn row_to_notification(row: &Row) -> rusqlite::Result<Notification> {
    let data_str: String = row.get(5)?;
    Ok(Notification {
        id: row.get(0)?,
        agent_id: row.get(1)?,
        event_type: row.get(2)?,
        title: row.get(3)?,
        body: row.get(4)?,
        data: serde_json::from_str(&data_str).unwrap_or(serde_json::Value::Null),
        read_at: row.get(6)?,
        created_at: row.get(7)?,
    })
}

impl Database {
    pub fn create_notification(
        &self,
        agent_id: &str,
        event_type: &str,
        title: &str,
        body: &str,
        data: &serde_json::Value,
    ) -> SqliteResult<Notification> {
        let conn = self.conn();
        let now = Utc::now().to_rfc3339();
        let id = Uuid::new_v4().to_string();
        let data_json = serde_json::to_string(data).unwrap_or_else(|_| "{}".to_string());

        conn.execute(
            "INSERT INTO notifications (id, agent_id, event_type, title, body, data, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            rusqlite::params![id, agent_id, event_type, title, body, data_json, now],
        )?;

        Ok(Notification {
            id,
            agent_id: agent_id.to_string(),
            event_type: event_type.to_string(),
            title: title.to_string(),
            body: body.to_string(),
            data: data.clone(),
            read_at: None,
            created_at: now,
        })
    }

    /// Newest first. Returns the page and the total matching count.
    pub fn list_notifications(
        &self,
        agent_id: &str,
        limit: i64,
        offset: i64,
        unread_only: bool,
    ) -> SqliteResult<(Vec<Notification>, i64)> {
        let conn = self.conn();
        let filter = if unread_only { " AND read_at IS NULL" } else { "" };

        let total: i64 = conn.query_row(
            &format!("SELECT COUNT(*) FROM notifications WHERE agent_id = ?1{}", filter),
            [agent_id],
            |row| row.get(0),
        )?;

        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM notifications WHERE agent_id = ?1{}
             ORDER BY created_at DESC LIMIT ?2 OFFSET ?3",
            NOTIFICATION_COLUMNS, filter
        ))?;
        let notifications = stmt
            .query_map(rusqlite::params![agent_id, limit, offset], row_to_notification)?
            .filter_map(|r| r.ok())
            .collect();

        Ok((notifications, total))
    }

    pub fn count_unread_notifications(&self, agent_id: &str) -> SqliteResult<i64> {
        let conn = self.conn();
        conn.query_row(
            "SELECT COUNT(*) FROM notifications WHERE agent_id = ?1 AND read_at IS NULL",
            [agent_id],
            |row| row.get(0),
        )
    }

    pub fn get_notification(&self, id: &str) -> SqliteResult<Option<Notification>> {
        let conn = self.conn();
        conn.query_row(
            &format!("SELECT {} FROM notifications WHERE id = ?1", NOTIFICATION_COLUMNS),
            [id],
            row_to_notification,
        )
        .optional()
    }

    pub fn mark_notification_read(&self, id: &str) -> SqliteResult<Option<Notification>> {
        {
            let conn = self.conn();
            let now = Utc::now().to_rfc3339();
            conn.execute(
                "UPDATE notifications SET read_at = ?1 WHERE id = ?2 AND read_at IS NULL",
                rusqlite::params![now, id],
            )?;
        }
        self.get_notification(id)
    }

    /// Returns the number of notifications that were unread.
    pub fn mark_all_notifications_read(&self, agent_id: &str) -> SqliteResult<usize> {
        let conn = self.conn();
        let now = Utc::now().to_rfc3339();
        conn.execute(
            "UPDATE notifications SET read_at = ?1 WHERE agent_id = ?2 AND read_at IS NULL",
            rusqlite::params![now, agent_id],
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_unread_tracking() {
        let db = Database::new(":memory:").unwrap();
        let agent = db.create_agent("0xdd00000000000000000000000000000000000000").unwrap();
        let first = db
            .create_notification(&agent.id, "task.accepted", "t", "b", &json!({"task_id": "1"}))
            .unwrap();
        db.create_notification(&agent.id, "task.expired", "t", "b", &json!({})).unwrap();

        assert_eq!(db.count_unread_notifications(&agent.id).unwrap(), 2);
        let read = db.mark_notification_read(&first.id).unwrap().unwrap();
        assert!(read.read_at.is_some());
        assert_eq!(read.data["task_id"], "1");

        let (page, total) = db.list_notifications(&agent.id, 20, 0, true).unwrap();
        assert_eq!(total, 1);
        assert_eq!(page.len(), 1);

        assert_eq!(db.mark_all_notifications_read(&agent.id).unwrap(), 1);
        assert_eq!(db.count_unread_notifications(&agent.id).unwrap(), 0);
    }
}
