//! Decision repository
//!
//! Supersede chains form a DAG: a superseded decision keeps its row, flips
//! status and records its successor. Decisions that depend on a superseded
//! one are tagged for review.

use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension, Row};

use crate::db::Database;
use crate::error::{Error, Result};
use crate::types::{Decision, DecisionStatus, NewDecision};
use crate::util::{
    decode_id_array, decode_str_array, encode_id_array, encode_str_array, normalize_path,
    parse_ts, significant_tokens,
};

/// Tag appended to dependents of a superseded decision.
pub const REVIEW_REQUIRED_TAG: &str = "review-required";

pub(crate) fn row_to_decision(row: &Row) -> rusqlite::Result<Decision> {
    let timestamp: String = row.get("timestamp")?;
    let status: String = row.get("status")?;
    let affected_files: String = row.get("affected_files")?;
    let tags: String = row.get("tags")?;
    let depends_on: String = row.get("depends_on")?;

    Ok(Decision {
        id: row.get("id")?,
        session_id: row.get("session_id")?,
        timestamp: parse_ts(&timestamp),
        decision: row.get("decision")?,
        rationale: row.get("rationale")?,
        affected_files: decode_str_array(&affected_files),
        tags: decode_str_array(&tags),
        status: status.parse().unwrap_or(DecisionStatus::Active),
        superseded_by: row.get("superseded_by")?,
        depends_on: decode_id_array(&depends_on),
    })
}

fn insert_decision(
    conn: &rusqlite::Connection,
    item: &NewDecision,
    session_id: Option<i64>,
    now: DateTime<Utc>,
) -> rusqlite::Result<i64> {
    let files: Vec<String> = item
        .affected_files
        .iter()
        .map(|f| normalize_path(f))
        .collect();
    conn.execute(
        "INSERT INTO decisions
             (session_id, timestamp, decision, rationale, affected_files, tags, status, depends_on)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        params![
            session_id,
            now.to_rfc3339(),
            item.decision,
            item.rationale,
            encode_str_array(&files),
            encode_str_array(&item.tags),
            item.status.unwrap_or(DecisionStatus::Active).as_str(),
            encode_id_array(&item.depends_on),
        ],
    )?;
    Ok(conn.last_insert_rowid())
}

impl Database {
    /// Record one decision.
    pub fn create_decision(
        &self,
        item: &NewDecision,
        session_id: Option<i64>,
        now: DateTime<Utc>,
    ) -> Result<i64> {
        let conn = self.connection();
        Ok(insert_decision(&conn, item, session_id, now)?)
    }

    /// Record a batch of decisions atomically. Returns ids in input order.
    pub fn create_decisions_batch(
        &self,
        items: &[NewDecision],
        session_id: Option<i64>,
        now: DateTime<Utc>,
    ) -> Result<Vec<i64>> {
        if items.is_empty() {
            return Err(Error::Validation("decisions must not be empty".into()));
        }
        let mut conn = self.connection();
        let tx = conn.transaction()?;
        let mut ids = Vec::with_capacity(items.len());
        for item in items {
            ids.push(insert_decision(&tx, item, session_id, now)?);
        }
        tx.commit()?;
        Ok(ids)
    }

    /// Get a decision by id.
    pub fn get_decision(&self, id: i64) -> Result<Option<Decision>> {
        let conn = self.connection();
        conn.query_row("SELECT * FROM decisions WHERE id = ?", [id], row_to_decision)
            .optional()
            .map_err(Error::from)
    }

    /// Decisions filtered by status and/or tag, newest first.
    pub fn decisions_filtered(
        &self,
        status: Option<DecisionStatus>,
        tag: Option<&str>,
        limit: Option<i64>,
    ) -> Result<Vec<Decision>> {
        let limit = super::clamp_limit(limit);
        let conn = self.connection();

        let mut sql = String::from("SELECT * FROM decisions WHERE 1=1");
        let mut bind: Vec<Box<dyn rusqlite::ToSql>> = vec![];
        if let Some(status) = status {
            sql.push_str(" AND status = ?");
            bind.push(Box::new(status.as_str().to_string()));
        }
        if let Some(tag) = tag {
            // Tags are a JSON array; match the quoted element.
            sql.push_str(" AND tags LIKE ?");
            bind.push(Box::new(format!("%\"{}\"%", tag)));
        }
        sql.push_str(" ORDER BY id DESC LIMIT ?");
        bind.push(Box::new(limit));

        let bind_refs: Vec<&dyn rusqlite::ToSql> = bind.iter().map(|b| b.as_ref()).collect();
        let mut stmt = conn.prepare(&sql)?;
        let decisions = stmt
            .query_map(bind_refs.as_slice(), row_to_decision)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(decisions)
    }

    /// Update a decision's text, rationale, status or tags.
    pub fn update_decision(
        &self,
        id: i64,
        decision: Option<&str>,
        rationale: Option<&str>,
        status: Option<DecisionStatus>,
        tags: Option<&[String]>,
    ) -> Result<Decision> {
        let conn = self.connection();
        let n = conn.execute(
            "UPDATE decisions SET
                 decision = COALESCE(?1, decision),
                 rationale = COALESCE(?2, rationale),
                 status = COALESCE(?3, status),
                 tags = COALESCE(?4, tags)
             WHERE id = ?5",
            params![
                decision,
                rationale,
                status.map(|s| s.as_str()),
                tags.map(encode_str_array),
                id,
            ],
        )?;
        if n == 0 {
            return Err(Error::not_found("decision", id));
        }
        drop(conn);
        self.get_decision(id)?.ok_or_else(|| Error::not_found("decision", id))
    }

    /// Supersede `old_id` with `new_id` atomically: the old decision flips to
    /// superseded and records its successor; active decisions depending on
    /// the old one gain a review-required tag.
    pub fn supersede_decision(&self, old_id: i64, new_id: i64) -> Result<()> {
        if old_id == new_id {
            return Err(Error::Validation(
                "a decision cannot supersede itself".into(),
            ));
        }

        let mut conn = self.connection();
        let tx = conn.transaction()?;

        let exists: i64 = tx.query_row(
            "SELECT COUNT(*) FROM decisions WHERE id = ?1",
            [new_id],
            |r| r.get(0),
        )?;
        if exists == 0 {
            return Err(Error::not_found("decision", new_id));
        }

        let n = tx.execute(
            "UPDATE decisions SET status = 'superseded', superseded_by = ?1 WHERE id = ?2",
            params![new_id, old_id],
        )?;
        if n == 0 {
            return Err(Error::not_found("decision", old_id));
        }

        // Flag active dependents for review.
        let dependents: Vec<(i64, String)> = {
            let mut stmt = tx.prepare(
                "SELECT id, tags FROM decisions WHERE status = 'active' AND depends_on LIKE ?1",
            )?;
            let rows = stmt
                .query_map([format!("%{}%", old_id)], |row| {
                    Ok((row.get(0)?, row.get::<_, String>(1)?))
                })?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            rows
        };
        for (dep_id, raw_tags) in dependents {
            let dep: Option<Vec<i64>> = {
                let mut stmt = tx.prepare("SELECT depends_on FROM decisions WHERE id = ?1")?;
                stmt.query_row([dep_id], |r| r.get::<_, String>(0))
                    .optional()?
                    .map(|s| decode_id_array(&s))
            };
            if !dep.unwrap_or_default().contains(&old_id) {
                continue;
            }
            let mut tags = decode_str_array(&raw_tags);
            if !tags.iter().any(|t| t == REVIEW_REQUIRED_TAG) {
                tags.push(REVIEW_REQUIRED_TAG.to_string());
                tx.execute(
                    "UPDATE decisions SET tags = ?1 WHERE id = ?2",
                    params![encode_str_array(&tags), dep_id],
                )?;
            }
        }

        tx.commit()?;
        Ok(())
    }

    /// Active decisions sharing at least two significant tokens with the
    /// given text. Advisory duplicate guard, not a hard constraint.
    pub fn find_similar_decisions(&self, text: &str) -> Result<Vec<Decision>> {
        let probe = significant_tokens(text);
        if probe.len() < 2 {
            return Ok(vec![]);
        }

        let active = self.decisions_filtered(Some(DecisionStatus::Active), None, Some(100))?;
        let similar = active
            .into_iter()
            .filter(|d| {
                let theirs = significant_tokens(&d.decision);
                let shared = probe.iter().filter(|t| theirs.contains(t)).count();
                shared >= 2
            })
            .collect();
        Ok(similar)
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

    fn decision(text: &str) -> NewDecision {
        NewDecision {
            decision: text.to_string(),
            rationale: None,
            affected_files: vec![],
            tags: vec![],
            status: None,
            depends_on: vec![],
        }
    }

    #[test]
    fn test_supersede_integrity() {
        let db = db();
        let now = Utc::now();
        let old = db.create_decision(&decision("Use WAL"), None, now).unwrap();
        let new = db
            .create_decision(&decision("Use WAL mode for performance"), None, now)
            .unwrap();

        db.supersede_decision(old, new).unwrap();

        let old_row = db.get_decision(old).unwrap().unwrap();
        assert_eq!(old_row.status, DecisionStatus::Superseded);
        assert_eq!(old_row.superseded_by, Some(new));

        let active = db
            .decisions_filtered(Some(DecisionStatus::Active), None, None)
            .unwrap();
        assert!(active.iter().all(|d| d.id != old));
        assert!(active.iter().any(|d| d.id == new));
    }

    #[test]
    fn test_supersede_flags_dependents() {
        let db = db();
        let now = Utc::now();
        let base = db.create_decision(&decision("json columns"), None, now).unwrap();
        let mut dep = decision("arrays encode as json");
        dep.depends_on = vec![base];
        let dep_id = db.create_decision(&dep, None, now).unwrap();
        let new = db.create_decision(&decision("typed columns"), None, now).unwrap();

        db.supersede_decision(base, new).unwrap();

        let dep_row = db.get_decision(dep_id).unwrap().unwrap();
        assert!(dep_row.tags.iter().any(|t| t == REVIEW_REQUIRED_TAG));
    }

    #[test]
    fn test_supersede_missing_rows() {
        let db = db();
        let now = Utc::now();
        let id = db.create_decision(&decision("solo"), None, now).unwrap();
        assert!(db.supersede_decision(id, 999).is_err());
        assert!(db.supersede_decision(999, id).is_err());
        assert!(db.supersede_decision(id, id).is_err());
    }

    #[test]
    fn test_find_similar() {
        let db = db();
        let now = Utc::now();
        db.create_decision(&decision("Use write-ahead logging journal mode"), None, now)
            .unwrap();
        db.create_decision(&decision("Prefer small composable modules"), None, now)
            .unwrap();

        let similar = db
            .find_similar_decisions("enable journal logging for durability")
            .unwrap();
        assert_eq!(similar.len(), 1);
        assert!(similar[0].decision.contains("write-ahead"));

        assert!(db.find_similar_decisions("???").unwrap().is_empty());
    }

    #[test]
    fn test_batch_atomicity() {
        let db = db();
        let now = Utc::now();
        let ids = db
            .create_decisions_batch(&[decision("one"), decision("two")], None, now)
            .unwrap();
        assert_eq!(ids.len(), 2);
        assert!(db.create_decisions_batch(&[], None, now).is_err());
    }

    #[test]
    fn test_filter_by_tag() {
        let db = db();
        let now = Utc::now();
        let mut d = decision("tagged decision");
        d.tags = vec!["storage".to_string()];
        db.create_decision(&d, None, now).unwrap();
        db.create_decision(&decision("untagged"), None, now).unwrap();

        let hits = db.decisions_filtered(None, Some("storage"), None).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].decision, "tagged decision");
    }
}
