//! Checkpoints, session byte accounting, and the snapshot cache
//!
//! A checkpoint is a mid-session understanding snapshot; writes are
//! last-wins per session. `session_bytes` accumulates request/response
//! sizes for the context-pressure estimator. The snapshot cache is keyed,
//! TTL-bounded JSON stored back into the database.

use chrono::{DateTime, Duration, Utc};
use rusqlite::{params, OptionalExtension, Row};

use crate::db::Database;
use crate::error::{Error, Result};
use crate::types::{SessionBytes, SessionCheckpoint};
use crate::util::{decode_str_array, encode_str_array, parse_ts};

pub(crate) fn row_to_checkpoint(row: &Row) -> rusqlite::Result<SessionCheckpoint> {
    let created_at: String = row.get("created_at")?;
    let relevant_files: String = row.get("relevant_files")?;

    Ok(SessionCheckpoint {
        id: row.get("id")?,
        session_id: row.get("session_id")?,
        agent_name: row.get("agent_name")?,
        created_at: parse_ts(&created_at),
        current_understanding: row.get("current_understanding")?,
        progress: row.get("progress")?,
        relevant_files: decode_str_array(&relevant_files),
    })
}

impl Database {
    /// Save a checkpoint. The latest write for a session replaces any prior
    /// one.
    pub fn save_checkpoint(
        &self,
        session_id: Option<i64>,
        agent_name: Option<&str>,
        current_understanding: &str,
        progress: &str,
        relevant_files: &[String],
        now: DateTime<Utc>,
    ) -> Result<i64> {
        let conn = self.connection();
        match session_id {
            Some(sid) => {
                conn.execute(
                    "INSERT INTO checkpoints
                         (session_id, agent_name, created_at, current_understanding,
                          progress, relevant_files)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                     ON CONFLICT(session_id) DO UPDATE SET
                         agent_name = excluded.agent_name,
                         created_at = excluded.created_at,
                         current_understanding = excluded.current_understanding,
                         progress = excluded.progress,
                         relevant_files = excluded.relevant_files",
                    params![
                        sid,
                        agent_name,
                        now.to_rfc3339(),
                        current_understanding,
                        progress,
                        encode_str_array(relevant_files),
                    ],
                )?;
                // On conflict the row keeps its original id.
                let id = conn.query_row(
                    "SELECT id FROM checkpoints WHERE session_id = ?1",
                    [sid],
                    |r| r.get(0),
                )?;
                Ok(id)
            }
            None => {
                conn.execute(
                    "INSERT INTO checkpoints
                         (agent_name, created_at, current_understanding, progress, relevant_files)
                     VALUES (?1, ?2, ?3, ?4, ?5)",
                    params![
                        agent_name,
                        now.to_rfc3339(),
                        current_understanding,
                        progress,
                        encode_str_array(relevant_files),
                    ],
                )?;
                Ok(conn.last_insert_rowid())
            }
        }
    }

    /// Latest checkpoint for a session, or the latest overall.
    pub fn get_checkpoint(&self, session_id: Option<i64>) -> Result<Option<SessionCheckpoint>> {
        let conn = self.connection();
        let result = match session_id {
            Some(sid) => conn
                .query_row(
                    "SELECT * FROM checkpoints WHERE session_id = ?1
                     ORDER BY id DESC LIMIT 1",
                    [sid],
                    row_to_checkpoint,
                )
                .optional()?,
            None => conn
                .query_row(
                    "SELECT * FROM checkpoints ORDER BY id DESC LIMIT 1",
                    [],
                    row_to_checkpoint,
                )
                .optional()?,
        };
        Ok(result)
    }

    /// Accumulate request/response bytes for a session. Each call counts as
    /// one tool invocation.
    pub fn track_context(
        &self,
        session_id: i64,
        input_bytes: i64,
        output_bytes: i64,
        now: DateTime<Utc>,
    ) -> Result<SessionBytes> {
        let conn = self.connection();
        conn.execute(
            "INSERT INTO session_bytes (session_id, input_bytes, output_bytes, tool_calls, updated_at)
             VALUES (?1, ?2, ?3, 1, ?4)
             ON CONFLICT(session_id) DO UPDATE SET
                 input_bytes = session_bytes.input_bytes + excluded.input_bytes,
                 output_bytes = session_bytes.output_bytes + excluded.output_bytes,
                 tool_calls = session_bytes.tool_calls + 1,
                 updated_at = excluded.updated_at",
            params![session_id, input_bytes.max(0), output_bytes.max(0), now.to_rfc3339()],
        )?;
        drop(conn);
        self.session_bytes(session_id)?
            .ok_or_else(|| Error::not_found("session_bytes", session_id))
    }

    /// Byte accumulator for a session.
    pub fn session_bytes(&self, session_id: i64) -> Result<Option<SessionBytes>> {
        let conn = self.connection();
        conn.query_row(
            "SELECT * FROM session_bytes WHERE session_id = ?1",
            [session_id],
            |row| {
                let updated_at: String = row.get("updated_at")?;
                Ok(SessionBytes {
                    session_id: row.get("session_id")?,
                    input_bytes: row.get("input_bytes")?,
                    output_bytes: row.get("output_bytes")?,
                    tool_calls: row.get("tool_calls")?,
                    updated_at: parse_ts(&updated_at),
                })
            },
        )
        .optional()
        .map_err(Error::from)
    }

    /// Store a JSON value in the snapshot cache.
    pub fn cache_put(
        &self,
        key: &str,
        value: &serde_json::Value,
        ttl_minutes: i64,
        now: DateTime<Utc>,
    ) -> Result<()> {
        let conn = self.connection();
        conn.execute(
            "INSERT INTO snapshot_cache (key, value, updated_at, ttl_minutes)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(key) DO UPDATE SET
                 value = excluded.value,
                 updated_at = excluded.updated_at,
                 ttl_minutes = excluded.ttl_minutes",
            params![key, value.to_string(), now.to_rfc3339(), ttl_minutes.max(0)],
        )?;
        Ok(())
    }

    /// Fetch a cached value if its TTL has not elapsed.
    pub fn cache_get(&self, key: &str, now: DateTime<Utc>) -> Result<Option<serde_json::Value>> {
        let conn = self.connection();
        let row: Option<(String, String, i64)> = conn
            .query_row(
                "SELECT value, updated_at, ttl_minutes FROM snapshot_cache WHERE key = ?1",
                [key],
                |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?)),
            )
            .optional()?;

        let Some((value, updated_at, ttl_minutes)) = row else {
            return Ok(None);
        };
        let age = now - parse_ts(&updated_at);
        if age > Duration::minutes(ttl_minutes) {
            return Ok(None);
        }
        Ok(serde_json::from_str(&value).ok())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn db() -> Database {
        let db = Database::open_in_memory().unwrap();
        db.migrate().unwrap();
        db
    }

    #[test]
    fn test_checkpoint_last_wins_per_session() {
        let db = db();
        let now = Utc::now();
        let sid = db.create_session("a", "/p", now).unwrap();

        db.save_checkpoint(Some(sid), Some("a"), "first pass", "10%", &[], now)
            .unwrap();
        db.save_checkpoint(Some(sid), Some("a"), "deeper now", "60%", &[], now)
            .unwrap();

        let cp = db.get_checkpoint(Some(sid)).unwrap().unwrap();
        assert_eq!(cp.current_understanding, "deeper now");

        let count: i64 = db
            .connection()
            .query_row("SELECT COUNT(*) FROM checkpoints", [], |r| r.get(0))
            .unwrap();
        assert_eq!(count, 1);
    }

    #[test]
    fn test_track_context_accumulates() {
        let db = db();
        let now = Utc::now();
        let sid = db.create_session("a", "/p", now).unwrap();

        db.track_context(sid, 100, 200, now).unwrap();
        let bytes = db.track_context(sid, 50, 25, now).unwrap();

        assert_eq!(bytes.input_bytes, 150);
        assert_eq!(bytes.output_bytes, 225);
        assert_eq!(bytes.tool_calls, 2);
    }

    #[test]
    fn test_cache_ttl() {
        let db = db();
        let now = Utc::now();
        db.cache_put("stats", &serde_json::json!({"n": 1}), 5, now).unwrap();

        assert!(db.cache_get("stats", now).unwrap().is_some());
        let later = now + Duration::minutes(6);
        assert!(db.cache_get("stats", later).unwrap().is_none());
        assert!(db.cache_get("missing", now).unwrap().is_none());
    }
}
