//! Change repository
//!
//! Changes are append-only while their session is current; compaction may
//! later collapse a whole session's changes into one synthetic row.

use chrono::{DateTime, Utc};
use rusqlite::{params, Row};

use crate::db::Database;
use crate::error::{Error, Result};
use crate::types::{Change, ChangeType, ImpactScope, NewChange};
use crate::util::{normalize_path, parse_ts};

/// Synthetic path used for compacted change rows.
pub const COMPACTED_PATH: &str = "(compacted)";

pub(crate) fn row_to_change(row: &Row) -> rusqlite::Result<Change> {
    let timestamp: String = row.get("timestamp")?;
    let change_type: String = row.get("change_type")?;
    let impact_scope: String = row.get("impact_scope")?;

    Ok(Change {
        id: row.get("id")?,
        session_id: row.get("session_id")?,
        timestamp: parse_ts(&timestamp),
        file_path: row.get("file_path")?,
        change_type: change_type.parse().unwrap_or(ChangeType::Modified),
        description: row.get("description")?,
        diff_summary: row.get("diff_summary")?,
        impact_scope: impact_scope.parse().unwrap_or(ImpactScope::Local),
    })
}

impl Database {
    /// Record a batch of changes in one transaction. Returns the new ids in
    /// input order.
    pub fn record_changes(
        &self,
        items: &[NewChange],
        session_id: Option<i64>,
        now: DateTime<Utc>,
    ) -> Result<Vec<i64>> {
        if items.is_empty() {
            return Err(Error::Validation("changes must not be empty".into()));
        }

        let mut conn = self.connection();
        let tx = conn.transaction()?;
        let mut ids = Vec::with_capacity(items.len());
        for item in items {
            tx.execute(
                "INSERT INTO changes
                     (session_id, timestamp, file_path, change_type, description,
                      diff_summary, impact_scope)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    session_id,
                    now.to_rfc3339(),
                    normalize_path(&item.file_path),
                    item.change_type.as_str(),
                    item.description,
                    item.diff_summary,
                    item.impact_scope.unwrap_or(ImpactScope::Local).as_str(),
                ],
            )?;
            ids.push(tx.last_insert_rowid());
        }
        tx.commit()?;
        Ok(ids)
    }

    /// Changes touching one file, newest first.
    pub fn changes_by_file(&self, path: &str, limit: Option<i64>) -> Result<Vec<Change>> {
        let limit = super::clamp_limit(limit);
        let conn = self.connection();
        let mut stmt = conn.prepare(
            "SELECT * FROM changes WHERE file_path = ?1 ORDER BY id DESC LIMIT ?2",
        )?;
        let changes = stmt
            .query_map(params![normalize_path(path), limit], row_to_change)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(changes)
    }

    /// Changes recorded at or after the given instant, newest first.
    pub fn changes_since(&self, since: DateTime<Utc>, limit: Option<i64>) -> Result<Vec<Change>> {
        let limit = super::clamp_limit(limit);
        let conn = self.connection();
        let mut stmt = conn.prepare(
            "SELECT * FROM changes WHERE timestamp >= ?1 ORDER BY timestamp DESC, id DESC LIMIT ?2",
        )?;
        let changes = stmt
            .query_map(params![since.to_rfc3339(), limit], row_to_change)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(changes)
    }

    /// All changes belonging to a session, oldest first.
    pub fn changes_for_session(&self, session_id: i64) -> Result<Vec<Change>> {
        let conn = self.connection();
        let mut stmt =
            conn.prepare("SELECT * FROM changes WHERE session_id = ?1 ORDER BY id ASC")?;
        let changes = stmt
            .query_map([session_id], row_to_change)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(changes)
    }

    /// Files with the most recorded changes. Synthetic compacted rows are
    /// excluded so churn statistics stay honest.
    pub fn most_changed_files(&self, limit: Option<i64>) -> Result<Vec<(String, i64)>> {
        let limit = super::clamp_limit(limit);
        let conn = self.connection();
        let mut stmt = conn.prepare(
            "SELECT file_path, COUNT(*) AS n FROM changes
             WHERE file_path != ?1
             GROUP BY file_path ORDER BY n DESC LIMIT ?2",
        )?;
        let rows = stmt
            .query_map(params![COMPACTED_PATH, limit], |row| {
                Ok((row.get(0)?, row.get(1)?))
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Total number of change rows.
    pub fn change_count(&self) -> Result<i64> {
        let conn = self.connection();
        let n = conn.query_row("SELECT COUNT(*) FROM changes", [], |r| r.get(0))?;
        Ok(n)
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

    fn change(path: &str, desc: &str) -> NewChange {
        NewChange {
            file_path: path.to_string(),
            change_type: ChangeType::Modified,
            description: desc.to_string(),
            diff_summary: None,
            impact_scope: None,
        }
    }

    #[test]
    fn test_record_and_fetch() {
        let db = db();
        let now = Utc::now();
        let ids = db
            .record_changes(&[change("./src/a.rs", "one"), change("src/b.rs", "two")], None, now)
            .unwrap();
        assert_eq!(ids.len(), 2);

        // Leading ./ was stripped before storage.
        let by_file = db.changes_by_file("src/a.rs", None).unwrap();
        assert_eq!(by_file.len(), 1);
        assert_eq!(by_file[0].description, "one");
        assert_eq!(by_file[0].impact_scope, ImpactScope::Local);
    }

    #[test]
    fn test_empty_batch_rejected() {
        let db = db();
        let err = db.record_changes(&[], None, Utc::now()).unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
    }

    #[test]
    fn test_most_changed_excludes_compacted() {
        let db = db();
        let now = Utc::now();
        db.record_changes(
            &[
                change("src/hot.rs", "a"),
                change("src/hot.rs", "b"),
                change("src/cold.rs", "c"),
                change(COMPACTED_PATH, "collapsed"),
            ],
            None,
            now,
        )
        .unwrap();

        let top = db.most_changed_files(Some(10)).unwrap();
        assert_eq!(top[0], ("src/hot.rs".to_string(), 2));
        assert!(top.iter().all(|(p, _)| p != COMPACTED_PATH));
    }

    #[test]
    fn test_changes_since() {
        let db = db();
        let past = Utc::now() - chrono::Duration::hours(2);
        let now = Utc::now();
        db.record_changes(&[change("a.rs", "old")], None, past).unwrap();
        db.record_changes(&[change("b.rs", "new")], None, now).unwrap();

        let recent = db
            .changes_since(now - chrono::Duration::hours(1), None)
            .unwrap();
        assert_eq!(recent.len(), 1);
        assert_eq!(recent[0].file_path, "b.rs");
    }
}
