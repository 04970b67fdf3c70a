//! Agent (wallet identity) database operations

use chrono::Utc;
use rusqlite::{OptionalExtension, Result as SqliteResult, Row};
use uuid::Uuid;

use crate::models::{normalize_wallet_address, Agent, AgentProfileUpdate};
use super::super::Database;

const AGENT_COLUMNS: &str = "id, wallet_address, moltbook_id, moltbook_handle, bio,
     reputation_score, created_at, updated_at, last_active";

fn row_to_agent(row: &Row) -> rusqlite::Result<Agent> {
    Ok(Agent {
        id: row.get(0)?,
        wallet_address: row.get(1)?,
        moltbook_id: row.get(2)?,
        moltbook_handle: row.get(3)?,
        bio: row.get(4)?,
        reputation_score: row.get(5)?,
        created_at: row.get(6)?,
        updated_at: row.get(7)?,
        last_active: row.get(8)?,
    })
}

impl Database {
    /// Look up an agent by wallet address. `Ok(None)` means no row; `Err` is a real failure.
    pub fn get_agent_by_wallet(&self, wallet_address: &str) -> SqliteResult<Option<Agent>> {
        let conn = self.conn();
        conn.query_row(
            &format!("SELECT {} FROM agents WHERE wallet_address = ?1", AGENT_COLUMNS),
            [normalize_wallet_address(wallet_address)],
            row_to_agent,
        )
        .optional()
    }

    pub fn get_agent(&self, id: &str) -> SqliteResult<Option<Agent>> {
        let conn = self.conn();
        conn.query_row(
            &format!("SELECT {} FROM agents WHERE id = ?1", AGENT_COLUMNS),
            [id],
            row_to_agent,
        )
        .optional()
    }

    /// Insert a new agent for a wallet address (stored lowercase).
    pub fn create_agent(&self, wallet_address: &str) -> SqliteResult<Agent> {
        let conn = self.conn();
        let now = Utc::now().to_rfc3339();
        let id = Uuid::new_v4().to_string();
        let wallet = normalize_wallet_address(wallet_address);

        conn.execute(
            "INSERT INTO agents
                (id, wallet_address, reputation_score, created_at, updated_at, last_active)
             VALUES (?1, ?2, 0, ?3, ?3, ?3)",
            rusqlite::params![id, wallet, now],
        )?;

        Ok(Agent {
            id,
            wallet_address: wallet,
            moltbook_id: None,
            moltbook_handle: None,
            bio: None,
            reputation_score: 0.0,
            created_at: now.clone(),
            updated_at: now.clone(),
            last_active: Some(now),
        })
    }

    /// Fetch the agent for a wallet, creating it on first use.
    /// Returns the agent and whether it was just created.
    pub fn get_or_create_agent(&self, wallet_address: &str) -> SqliteResult<(Agent, bool)> {
        if let Some(agent) = self.get_agent_by_wallet(wallet_address)? {
            return Ok((agent, false));
        }
        match self.create_agent(wallet_address) {
            Ok(agent) => Ok((agent, true)),
            // Lost a race with a concurrent first request for the same wallet
            Err(rusqlite::Error::SqliteFailure(e, _))
                if e.code == rusqlite::ErrorCode::ConstraintViolation =>
            {
                self.get_agent_by_wallet(wallet_address)?
                    .map(|agent| (agent, false))
                    .ok_or(rusqlite::Error::QueryReturnedNoRows)
            }
            Err(e) => Err(e),
        }
    }

    /// Stamp `last_active` for an authenticated call.
    pub fn touch_agent(&self, id: &str) -> SqliteResult<()> {
        let conn = self.conn();
        let now = Utc::now().to_rfc3339();
        conn.execute(
            "UPDATE agents SET last_active = ?1 WHERE id = ?2",
            rusqlite::params![now, id],
        )?;
        Ok(())
    }

    pub fn update_agent_profile(
        &self,
        id: &str,
        update: &AgentProfileUpdate,
    ) -> SqliteResult<Option<Agent>> {
        {
            let conn = self.conn();
            let now = Utc::now().to_rfc3339();
            conn.execute(
                "UPDATE agents SET
                    moltbook_id = COALESCE(?1, moltbook_id),
                    moltbook_handle = COALESCE(?2, moltbook_handle),
                    bio = COALESCE(?3, bio),
                    updated_at = ?4,
                    last_active = ?4
                 WHERE id = ?5",
                rusqlite::params![update.moltbook_id, update.moltbook_handle, update.bio, now, id],
            )?;
        }
        self.get_agent(id)
    }
}
