//! Webhook subscription database operations

use chrono::Utc;
use rusqlite::{OptionalExtension, Result as SqliteResult, Row};
use uuid::Uuid;

use crate::models::{FailureRecord, Webhook, WebhookEvent};
use super::super::Database;

const WEBHOOK_COLUMNS: &str = "id, agent_id, url, events, secret, is_active, failure_count,
     last_success_at, last_failure_at, created_at, updated_at";

fn row_to_webhook(row: &Row) -> rusqlite::Result<Webhook> {
    let events_str: String = row.get(3)?;
    // Unknown names (e.g. an event type that was retired) are dropped on read
    let names: Vec<String> = serde_json::from_str(&events_str).unwrap_or_default();
    let events = names.iter().filter_map(|n| n.parse::<WebhookEvent>().ok()).collect();
    Ok(Webhook {
        id: row.get(0)?,
        agent_id: row.get(1)?,
        url: row.get(2)?,
        events,
        secret: row.get(4)?,
        is_active: row.get::<_, i64>(5)? != 0,
        failure_count: row.get(6)?,
        last_success_at: row.get(7)?,
        last_failure_at: row.get(8)?,
        created_at: row.get(9)?,
        updated_at: row.get(10)?,
    })
}

fn events_json(events: &[WebhookEvent]) -> String {
    let names: Vec<&str> = events.iter().map(|e| e.as_str()).collect();
    serde_json::to_string(&names).unwrap_or_else(|_| "[]".to_string())
}

impl Database {
    pub fn create_webhook(
        &self,
        agent_id: &str,
        url: &str,
        events: &[WebhookEvent],
        secret: &str,
    ) -> SqliteResult<Webhook> {
        let conn = self.conn();
        let now = Utc::now().to_rfc3339();
        let id = Uuid::new_v4().to_string();

        conn.execute(
            "INSERT INTO webhooks (id, agent_id, url, events, secret, is_active, failure_count,
                                   created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, 1, 0, ?6, ?6)",
            rusqlite::params![id, agent_id, url, events_json(events), secret, now],
        )?;

        Ok(Webhook {
            id,
            agent_id: agent_id.to_string(),
            url: url.to_string(),
            events: events.to_vec(),
            secret: secret.to_string(),
            is_active: true,
            failure_count: 0,
            last_success_at: None,
            last_failure_at: None,
            created_at: now.clone(),
            updated_at: now,
        })
    }

    pub fn get_webhook(&self, id: &str) -> SqliteResult<Option<Webhook>> {
        let conn = self.conn();
        conn.query_row(
            &format!("SELECT {} FROM webhooks WHERE id = ?1", WEBHOOK_COLUMNS),
            [id],
            row_to_webhook,
        )
        .optional()
    }

    pub fn count_webhooks_for_agent(&self, agent_id: &str) -> SqliteResult<i64> {
        let conn = self.conn();
        conn.query_row(
            "SELECT COUNT(*) FROM webhooks WHERE agent_id = ?1",
            [agent_id],
            |row| row.get(0),
        )
    }

    pub fn list_webhooks_for_agent(&self, agent_id: &str) -> SqliteResult<Vec<Webhook>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM webhooks WHERE agent_id = ?1 ORDER BY created_at DESC",
            WEBHOOK_COLUMNS
        ))?;
        let webhooks = stmt
            .query_map([agent_id], row_to_webhook)?
            .filter_map(|r| r.ok())
            .collect();
        Ok(webhooks)
    }

    /// Active webhooks of an agent that subscribe to `event`.
    pub fn list_active_webhooks_for_event(
        &self,
        agent_id: &str,
        event: WebhookEvent,
    ) -> SqliteResult<Vec<Webhook>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM webhooks WHERE agent_id = ?1 AND is_active = 1 ORDER BY created_at",
            WEBHOOK_COLUMNS
        ))?;
        let webhooks = stmt
            .query_map([agent_id], row_to_webhook)?
            .filter_map(|r| r.ok())
            .filter(|w| w.subscribes_to(event))
            .collect();
        Ok(webhooks)
    }

    /// Edit a webhook. Re-activating clears the consecutive-failure counter.
    pub fn update_webhook(
        &self,
        id: &str,
        url: Option<&str>,
        events: Option<&[WebhookEvent]>,
        is_active: Option<bool>,
    ) -> SqliteResult<Option<Webhook>> {
        {
            let conn = self.conn();
            let now = Utc::now().to_rfc3339();
            let events_str = events.map(events_json);
            let active = is_active.map(|a| a as i64);
            conn.execute(
                "UPDATE webhooks SET
                    url = COALESCE(?1, url),
                    events = COALESCE(?2, events),
                    failure_count = CASE WHEN ?3 = 1 AND is_active = 0
                                         THEN 0 ELSE failure_count END,
                    is_active = COALESCE(?3, is_active),
                    updated_at = ?4
                 WHERE id = ?5",
                rusqlite::params![url, events_str, active, now, id],
            )?;
        }
        self.get_webhook(id)
    }

    pub fn delete_webhook(&self, id: &str) -> SqliteResult<bool> {
        let conn = self.conn();
        let rows = conn.execute("DELETE FROM webhooks WHERE id = ?1", [id])?;
        Ok(rows > 0)
    }

    /// Successful delivery: reset the failure counter and stamp the success time.
    pub fn record_webhook_success(&self, id: &str) -> SqliteResult<()> {
        let conn = self.conn();
        let now = Utc::now().to_rfc3339();
        conn.execute(
            "UPDATE webhooks SET failure_count = 0, last_success_at = ?1, updated_at = ?1
             WHERE id = ?2",
            rusqlite::params![now, id],
        )?;
        Ok(())
    }

    /// Failed delivery (retries exhausted): bump the counter and deactivate at `threshold`.
    /// Returns `None` if the webhook no longer exists.
    pub fn record_webhook_failure(
        &self,
        id: &str,
        threshold: i64,
    ) -> SqliteResult<Option<FailureRecord>> {
        let conn = self.conn();
        let now = Utc::now().to_rfc3339();
        let rows = conn.execute(
            "UPDATE webhooks SET
                failure_count = failure_count + 1,
                last_failure_at = ?1,
                updated_at = ?1,
                is_active = CASE WHEN failure_count + 1 >= ?2 THEN 0 ELSE is_active END
             WHERE id = ?3",
            rusqlite::params![now, threshold, id],
        )?;
        if rows == 0 {
            return Ok(None);
        }
        conn.query_row(
            "SELECT failure_count, is_active FROM webhooks WHERE id = ?1",
            [id],
            |row| {
                Ok(FailureRecord {
                    failure_count: row.get(0)?,
                    is_active: row.get::<_, i64>(1)? != 0,
                })
            },
        )
        .optional()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ACCEPTED: [WebhookEvent; 1] = [WebhookEvent::TaskAccepted];

    fn setup() -> (Database, String) {
        let db = Database::new(":memory:").unwrap();
        let agent = db.create_agent("0xee00000000000000000000000000000000000000").unwrap();
        (db, agent.id)
    }

    #[test]
    fn test_https_enforced_by_schema() {
        let (db, agent_id) = setup();
        assert!(db
            .create_webhook(&agent_id, "http://insecure.test", &[WebhookEvent::TaskAccepted], "s")
            .is_err());
    }

    #[test]
    fn test_active_filter_by_event() {
        let (db, agent_id) = setup();
        db.create_webhook(&agent_id, "https://a.test", &ACCEPTED, "s1").unwrap();
        db.create_webhook(&agent_id, "https://b.test", &[WebhookEvent::TaskExpired], "s2").unwrap();
        let hooks = db
            .list_active_webhooks_for_event(&agent_id, WebhookEvent::TaskAccepted)
            .unwrap();
        assert_eq!(hooks.len(), 1);
        assert_eq!(hooks[0].url, "https://a.test");
        assert_eq!(hooks[0].secret, "s1");
    }

    #[test]
    fn test_failure_threshold_deactivates() {
        let (db, agent_id) = setup();
        let hook = db.create_webhook(&agent_id, "https://a.test", &ACCEPTED, "s").unwrap();
        for _ in 0..2 {
            let rec = db.record_webhook_failure(&hook.id, 3).unwrap().unwrap();
            assert!(rec.is_active);
        }
        let rec = db.record_webhook_failure(&hook.id, 3).unwrap().unwrap();
        assert_eq!(rec, FailureRecord { failure_count: 3, is_active: false });
        let active = db.list_active_webhooks_for_event(&agent_id, WebhookEvent::TaskAccepted);
        assert!(active.unwrap().is_empty());
    }

    #[test]
    fn test_success_resets_counter() {
        let (db, agent_id) = setup();
        let hook = db.create_webhook(&agent_id, "https://a.test", &ACCEPTED, "s").unwrap();
        db.record_webhook_failure(&hook.id, 10).unwrap();
        db.record_webhook_success(&hook.id).unwrap();
        let hook = db.get_webhook(&hook.id).unwrap().unwrap();
        assert_eq!(hook.failure_count, 0);
        assert!(hook.last_success_at.is_some());
    }

    #[test]
    fn test_failure_on_deleted_webhook_is_noop() {
        let (db, _) = setup();
        assert_eq!(db.record_webhook_failure("missing", 10).unwrap(), None);
    }

    #[test]
    fn test_reactivation_resets_counter() {
        let (db, agent_id) = setup();
        let hook = db.create_webhook(&agent_id, "https://a.test", &ACCEPTED, "s").unwrap();
        db.record_webhook_failure(&hook.id, 1).unwrap();
        let updated = db.update_webhook(&hook.id, None, None, Some(true)).unwrap().unwrap();
        assert!(updated.is_active);
        assert_eq!(updated.failure_count, 0);
        assert_eq!(updated.url, "https://a.test");
    }
}
