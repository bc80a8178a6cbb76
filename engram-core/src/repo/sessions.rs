//! Session repository
//!
//! A session is the unit of attribution for changes, decisions, tasks and
//! the unit of auto-compaction. At most one session is open per server
//! process; opening a new one auto-closes any stragglers.

use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension, Row};

use crate::db::Database;
use crate::error::{Error, Result};
use crate::types::Session;
use crate::util::{decode_str_array, encode_str_array, parse_ts, parse_ts_opt};

pub(crate) fn row_to_session(row: &Row) -> rusqlite::Result<Session> {
    let started_at: String = row.get("started_at")?;
    let ended_at: Option<String> = row.get("ended_at")?;
    let tags: String = row.get("tags")?;

    Ok(Session {
        id: row.get("id")?,
        started_at: parse_ts(&started_at),
        ended_at: parse_ts_opt(ended_at),
        summary: row.get("summary")?,
        agent_name: row.get("agent_name")?,
        project_root: row.get("project_root")?,
        tags: decode_str_array(&tags),
    })
}

impl Database {
    /// Create a new session and return its id.
    pub fn create_session(
        &self,
        agent_name: &str,
        project_root: &str,
        now: DateTime<Utc>,
    ) -> Result<i64> {
        let conn = self.connection();
        conn.execute(
            "INSERT INTO sessions (started_at, agent_name, project_root) VALUES (?1, ?2, ?3)",
            params![now.to_rfc3339(), agent_name, project_root],
        )?;
        Ok(conn.last_insert_rowid())
    }

    /// Ids of sessions that were never closed, oldest first.
    pub fn open_session_ids(&self) -> Result<Vec<i64>> {
        let conn = self.connection();
        let mut stmt =
            conn.prepare("SELECT id FROM sessions WHERE ended_at IS NULL ORDER BY id ASC")?;
        let ids = stmt
            .query_map([], |row| row.get(0))?
            .collect::<std::result::Result<Vec<i64>, _>>()?;
        Ok(ids)
    }

    /// Close a session without a summary (a newer session displaced it).
    pub fn auto_close_session(&self, id: i64, now: DateTime<Utc>) -> Result<()> {
        let conn = self.connection();
        conn.execute(
            "UPDATE sessions SET ended_at = ?1 WHERE id = ?2 AND ended_at IS NULL",
            params![now.to_rfc3339(), id],
        )?;
        Ok(())
    }

    /// Close a session with its final summary and tags.
    pub fn close_session(
        &self,
        id: i64,
        now: DateTime<Utc>,
        summary: &str,
        tags: &[String],
    ) -> Result<()> {
        let conn = self.connection();
        let n = conn.execute(
            "UPDATE sessions SET ended_at = ?1, summary = ?2, tags = ?3 WHERE id = ?4",
            params![now.to_rfc3339(), summary, encode_str_array(tags), id],
        )?;
        if n == 0 {
            return Err(Error::not_found("session", id));
        }
        Ok(())
    }

    /// Get a session by id.
    pub fn get_session(&self, id: i64) -> Result<Option<Session>> {
        let conn = self.connection();
        conn.query_row("SELECT * FROM sessions WHERE id = ?", [id], row_to_session)
            .optional()
            .map_err(Error::from)
    }

    /// Most recently completed session, if any.
    pub fn last_completed_session(&self) -> Result<Option<Session>> {
        let conn = self.connection();
        conn.query_row(
            "SELECT * FROM sessions WHERE ended_at IS NOT NULL ORDER BY ended_at DESC, id DESC LIMIT 1",
            [],
            row_to_session,
        )
        .optional()
        .map_err(Error::from)
    }

    /// Paged session history, newest first, optionally filtered by agent.
    pub fn session_history(
        &self,
        limit: Option<i64>,
        offset: i64,
        agent_name: Option<&str>,
    ) -> Result<Vec<Session>> {
        let limit = super::clamp_limit(limit);
        let conn = self.connection();

        let sessions = match agent_name {
            Some(agent) => {
                let mut stmt = conn.prepare(
                    "SELECT * FROM sessions WHERE agent_name = ?1
                     ORDER BY id DESC LIMIT ?2 OFFSET ?3",
                )?;
                let result = stmt
                    .query_map(params![agent, limit, offset.max(0)], row_to_session)?
                    .collect::<std::result::Result<Vec<_>, _>>()?;
                result
            }
            None => {
                let mut stmt = conn
                    .prepare("SELECT * FROM sessions ORDER BY id DESC LIMIT ?1 OFFSET ?2")?;
                let result = stmt
                    .query_map(params![limit, offset.max(0)], row_to_session)?
                    .collect::<std::result::Result<Vec<_>, _>>()?;
                result
            }
        };

        Ok(sessions)
    }

    /// Total number of sessions.
    pub fn session_count(&self) -> Result<i64> {
        let conn = self.connection();
        let n = conn.query_row("SELECT COUNT(*) FROM sessions", [], |r| r.get(0))?;
        Ok(n)
    }

    /// Completed sessions older than the newest `keep`, oldest first.
    /// Used by compaction to pick collapse candidates.
    pub fn compactable_session_ids(
        &self,
        keep: i64,
        max_age_days: Option<i64>,
        now: DateTime<Utc>,
    ) -> Result<Vec<i64>> {
        let conn = self.connection();
        let mut sql = String::from(
            "SELECT id FROM sessions WHERE ended_at IS NOT NULL
             AND id NOT IN (
                 SELECT id FROM sessions WHERE ended_at IS NOT NULL
                 ORDER BY ended_at DESC, id DESC LIMIT ?1
             )",
        );
        let mut bind: Vec<Box<dyn rusqlite::ToSql>> = vec![Box::new(keep.max(0))];

        if let Some(days) = max_age_days {
            sql.push_str(" AND ended_at < ?2");
            let cutoff = now - chrono::Duration::days(days);
            bind.push(Box::new(cutoff.to_rfc3339()));
        }
        sql.push_str(" ORDER BY id ASC");

        let bind_refs: Vec<&dyn rusqlite::ToSql> = bind.iter().map(|b| b.as_ref()).collect();
        let mut stmt = conn.prepare(&sql)?;
        let ids = stmt
            .query_map(bind_refs.as_slice(), |row| row.get(0))?
            .collect::<std::result::Result<Vec<i64>, _>>()?;
        Ok(ids)
    }
}

impl Database {
    /// Record a handoff emitted at session end.
    pub fn create_handoff(
        &self,
        session_id: Option<i64>,
        agent_name: Option<&str>,
        reason: &str,
        summary: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<i64> {
        let conn = self.connection();
        conn.execute(
            "INSERT INTO handoffs (session_id, agent_name, created_at, reason, summary)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![session_id, agent_name, now.to_rfc3339(), reason, summary],
        )?;
        Ok(conn.last_insert_rowid())
    }

    /// Handoffs not yet surfaced to a successor session, oldest first.
    pub fn unacknowledged_handoffs(&self) -> Result<Vec<crate::types::Handoff>> {
        let conn = self.connection();
        let mut stmt =
            conn.prepare("SELECT * FROM handoffs WHERE acknowledged = 0 ORDER BY id ASC")?;
        let handoffs = stmt
            .query_map([], |row| {
                let created_at: String = row.get("created_at")?;
                let acknowledged: i64 = row.get("acknowledged")?;
                Ok(crate::types::Handoff {
                    id: row.get("id")?,
                    session_id: row.get("session_id")?,
                    agent_name: row.get("agent_name")?,
                    created_at: parse_ts(&created_at),
                    reason: row.get("reason")?,
                    summary: row.get("summary")?,
                    acknowledged: acknowledged != 0,
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(handoffs)
    }

    /// Mark handoffs as read by a successor session.
    pub fn acknowledge_handoffs(&self, ids: &[i64]) -> Result<()> {
        let mut conn = self.connection();
        let tx = conn.transaction()?;
        for id in ids {
            tx.execute("UPDATE handoffs SET acknowledged = 1 WHERE id = ?1", [id])?;
        }
        tx.commit()?;
        Ok(())
    }
}
