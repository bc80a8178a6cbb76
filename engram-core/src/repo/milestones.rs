//! Milestone repository

use chrono::{DateTime, Utc};
use rusqlite::{params, Row};

use crate::db::Database;
use crate::error::Result;
use crate::types::Milestone;
use crate::util::{decode_str_array, encode_str_array, parse_ts};

pub(crate) fn row_to_milestone(row: &Row) -> rusqlite::Result<Milestone> {
    let timestamp: String = row.get("timestamp")?;
    let tags: String = row.get("tags")?;

    Ok(Milestone {
        id: row.get("id")?,
        session_id: row.get("session_id")?,
        timestamp: parse_ts(&timestamp),
        title: row.get("title")?,
        description: row.get("description")?,
        version: row.get("version")?,
        tags: decode_str_array(&tags),
    })
}

impl Database {
    /// Record a milestone.
    pub fn record_milestone(
        &self,
        title: &str,
        description: Option<&str>,
        version: Option<&str>,
        tags: &[String],
        session_id: Option<i64>,
        now: DateTime<Utc>,
    ) -> Result<i64> {
        let conn = self.connection();
        conn.execute(
            "INSERT INTO milestones (session_id, timestamp, title, description, version, tags)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                session_id,
                now.to_rfc3339(),
                title,
                description,
                version,
                encode_str_array(tags),
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    /// Recent milestones, newest first.
    pub fn milestones(&self, limit: Option<i64>) -> Result<Vec<Milestone>> {
        let limit = super::clamp_limit(limit);
        let conn = self.connection();
        let mut stmt =
            conn.prepare("SELECT * FROM milestones ORDER BY id DESC LIMIT ?1")?;
        let milestones = stmt
            .query_map([limit], row_to_milestone)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(milestones)
    }
}
