//! Knowledge repository
//!
//! Free-form findings captured by the dump classifier land here instead of
//! polluting change statistics with synthetic rows.

use chrono::{DateTime, Utc};
use rusqlite::{params, Row};

use crate::db::Database;
use crate::error::Result;
use crate::types::KnowledgeEntry;
use crate::util::{decode_str_array, encode_str_array, parse_ts};

pub(crate) fn row_to_knowledge(row: &Row) -> rusqlite::Result<KnowledgeEntry> {
    let created_at: String = row.get("created_at")?;
    let tags: String = row.get("tags")?;

    Ok(KnowledgeEntry {
        id: row.get("id")?,
        session_id: row.get("session_id")?,
        created_at: parse_ts(&created_at),
        topic: row.get("topic")?,
        content: row.get("content")?,
        tags: decode_str_array(&tags),
    })
}

impl Database {
    /// Record a knowledge entry.
    pub fn add_knowledge(
        &self,
        topic: &str,
        content: &str,
        tags: &[String],
        session_id: Option<i64>,
        now: DateTime<Utc>,
    ) -> Result<i64> {
        let conn = self.connection();
        conn.execute(
            "INSERT INTO knowledge (session_id, created_at, topic, content, tags)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                session_id,
                now.to_rfc3339(),
                topic,
                content,
                encode_str_array(tags),
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    /// Knowledge entries, newest first, optionally LIKE-filtered.
    pub fn knowledge_entries(
        &self,
        query: Option<&str>,
        limit: Option<i64>,
    ) -> Result<Vec<KnowledgeEntry>> {
        let limit = super::clamp_limit(limit);
        let conn = self.connection();

        let entries = match query {
            Some(q) => {
                let pattern = format!("%{}%", q);
                let mut stmt = conn.prepare(
                    "SELECT * FROM knowledge
                     WHERE topic LIKE ?1 OR content LIKE ?1
                     ORDER BY id DESC LIMIT ?2",
                )?;
                let result = stmt
                    .query_map(params![pattern, limit], row_to_knowledge)?
                    .collect::<std::result::Result<Vec<_>, _>>()?;
                result
            }
            None => {
                let mut stmt =
                    conn.prepare("SELECT * FROM knowledge ORDER BY id DESC LIMIT ?1")?;
                let result = stmt
                    .query_map([limit], row_to_knowledge)?
                    .collect::<std::result::Result<Vec<_>, _>>()?;
                result
            }
        };
        Ok(entries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_add_and_query() {
        let db = Database::open_in_memory().unwrap();
        db.migrate().unwrap();

        db.add_knowledge(
            "auth flow",
            "token refresh happens in middleware",
            &["auth".to_string()],
            None,
            Utc::now(),
        )
        .unwrap();
        db.add_knowledge("build", "ci caches cargo target", &[], None, Utc::now())
            .unwrap();

        assert_eq!(db.knowledge_entries(None, None).unwrap().len(), 2);
        let hits = db.knowledge_entries(Some("middleware"), None).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].topic, "auth flow");
    }
}
