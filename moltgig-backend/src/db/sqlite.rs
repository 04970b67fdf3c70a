use rusqlite::{Connection, Result as SqliteResult};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

pub struct Database {
    conn: Mutex<Connection>,
}

impl Database {
    pub fn new(database_url: &str) -> SqliteResult<Self> {
        let conn = if database_url == ":memory:" {
            Connection::open_in_memory()?
        } else {
            // Create parent directory if it doesn't exist
            if let Some(parent) = Path::new(database_url).parent() {
                if !parent.as_os_str().is_empty() {
                    std::fs::create_dir_all(parent).ok();
                }
            }
            Connection::open(database_url)?
        };
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON;")?;

        let db = Self {
            conn: Mutex::new(conn),
        };
        db.init()?;
        Ok(db)
    }

    /// Lock the connection. A poisoned lock still holds a usable connection.
    pub(crate) fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn init(&self) -> SqliteResult<()> {
        let conn = self.conn();

        // Agents: one row per lowercase wallet address
        conn.execute(
            "CREATE TABLE IF NOT EXISTS agents (
                id TEXT PRIMARY KEY,
                wallet_address TEXT UNIQUE NOT NULL,
                moltbook_id TEXT,
                moltbook_handle TEXT,
                bio TEXT,
                reputation_score REAL NOT NULL DEFAULT 0,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                last_active TEXT
            )",
            [],
        )?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS tasks (
                id TEXT PRIMARY KEY,
                title TEXT NOT NULL,
                requester_id TEXT REFERENCES agents(id) ON DELETE SET NULL,
                worker_id TEXT REFERENCES agents(id) ON DELETE SET NULL,
                reward_wei TEXT NOT NULL DEFAULT '0',
                status TEXT NOT NULL DEFAULT 'open',
                deadline TEXT,
                deadline_warned INTEGER NOT NULL DEFAULT 0,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            )",
            [],
        )?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS notifications (
                id TEXT PRIMARY KEY,
                agent_id TEXT NOT NULL REFERENCES agents(id) ON DELETE CASCADE,
                event_type TEXT NOT NULL,
                title TEXT NOT NULL,
                body TEXT NOT NULL,
                data TEXT NOT NULL DEFAULT '{}',
                read_at TEXT,
                created_at TEXT NOT NULL
            )",
            [],
        )?;
        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_notifications_agent
             ON notifications(agent_id, created_at DESC)",
            [],
        )?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS webhooks (
                id TEXT PRIMARY KEY,
                agent_id TEXT NOT NULL REFERENCES agents(id) ON DELETE CASCADE,
                url TEXT NOT NULL CHECK (url LIKE 'https://%'),
                events TEXT NOT NULL,
                secret TEXT NOT NULL,
                is_active INTEGER NOT NULL DEFAULT 1,
                failure_count INTEGER NOT NULL DEFAULT 0,
                last_success_at TEXT,
                last_failure_at TEXT,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            )",
            [],
        )?;
        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_webhooks_agent ON webhooks(agent_id, is_active)",
            [],
        )?;

        Ok(())
    }
}
