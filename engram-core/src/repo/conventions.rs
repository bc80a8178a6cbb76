//! Convention repository

use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension, Row};

use crate::db::Database;
use crate::error::{Error, Result};
use crate::types::Convention;
use crate::util::{decode_str_array, encode_str_array, parse_ts};

pub(crate) fn row_to_convention(row: &Row) -> rusqlite::Result<Convention> {
    let timestamp: String = row.get("timestamp")?;
    let examples: String = row.get("examples")?;
    let enforced: i64 = row.get("enforced")?;

    Ok(Convention {
        id: row.get("id")?,
        session_id: row.get("session_id")?,
        timestamp: parse_ts(&timestamp),
        category: row.get("category")?,
        rule: row.get("rule")?,
        examples: decode_str_array(&examples),
        enforced: enforced != 0,
    })
}

impl Database {
    /// Record a convention.
    pub fn create_convention(
        &self,
        category: &str,
        rule: &str,
        examples: &[String],
        session_id: Option<i64>,
        now: DateTime<Utc>,
    ) -> Result<i64> {
        let conn = self.connection();
        conn.execute(
            "INSERT INTO conventions (session_id, timestamp, category, rule, examples)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                session_id,
                now.to_rfc3339(),
                category,
                rule,
                encode_str_array(examples),
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    /// Lookup by exact rule text. Import paths use this to dedupe.
    pub fn convention_by_rule(&self, rule: &str) -> Result<Option<Convention>> {
        let conn = self.connection();
        conn.query_row(
            "SELECT * FROM conventions WHERE rule = ?1 LIMIT 1",
            [rule],
            row_to_convention,
        )
        .optional()
        .map_err(Error::from)
    }

    /// Flip a convention's enforcement bit. Returns the new state.
    pub fn toggle_convention(&self, id: i64) -> Result<bool> {
        let conn = self.connection();
        let n = conn.execute(
            "UPDATE conventions SET enforced = 1 - enforced WHERE id = ?1",
            [id],
        )?;
        if n == 0 {
            return Err(Error::not_found("convention", id));
        }
        let enforced: i64 =
            conn.query_row("SELECT enforced FROM conventions WHERE id = ?1", [id], |r| {
                r.get(0)
            })?;
        Ok(enforced != 0)
    }

    /// Conventions filtered by category; disabled rules are hidden unless
    /// asked for.
    pub fn conventions_filtered(
        &self,
        category: Option<&str>,
        include_disabled: bool,
        limit: Option<i64>,
    ) -> Result<Vec<Convention>> {
        let limit = super::clamp_limit(limit);
        let conn = self.connection();

        let mut sql = String::from("SELECT * FROM conventions WHERE 1=1");
        let mut bind: Vec<Box<dyn rusqlite::ToSql>> = vec![];
        if let Some(category) = category {
            sql.push_str(" AND category = ?");
            bind.push(Box::new(category.to_string()));
        }
        if !include_disabled {
            sql.push_str(" AND enforced = 1");
        }
        sql.push_str(" ORDER BY category ASC, id ASC LIMIT ?");
        bind.push(Box::new(limit));

        let bind_refs: Vec<&dyn rusqlite::ToSql> = bind.iter().map(|b| b.as_ref()).collect();
        let mut stmt = conn.prepare(&sql)?;
        let conventions = stmt
            .query_map(bind_refs.as_slice(), row_to_convention)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(conventions)
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
    fn test_create_and_toggle() {
        let db = db();
        let id = db
            .create_convention("naming", "snake_case modules", &[], None, Utc::now())
            .unwrap();

        assert!(!db.toggle_convention(id).unwrap());
        assert!(db.toggle_convention(id).unwrap());
        assert!(db.toggle_convention(404).is_err());
    }

    #[test]
    fn test_filter_hides_disabled() {
        let db = db();
        let now = Utc::now();
        let a = db.create_convention("naming", "rule a", &[], None, now).unwrap();
        db.create_convention("errors", "rule b", &[], None, now).unwrap();
        db.toggle_convention(a).unwrap();

        let visible = db.conventions_filtered(None, false, None).unwrap();
        assert_eq!(visible.len(), 1);
        assert_eq!(visible[0].rule, "rule b");

        let all = db.conventions_filtered(None, true, None).unwrap();
        assert_eq!(all.len(), 2);

        let by_cat = db.conventions_filtered(Some("naming"), true, None).unwrap();
        assert_eq!(by_cat.len(), 1);
    }

    #[test]
    fn test_lookup_by_rule() {
        let db = db();
        db.create_convention("style", "no unwrap in handlers", &[], None, Utc::now())
            .unwrap();
        assert!(db.convention_by_rule("no unwrap in handlers").unwrap().is_some());
        assert!(db.convention_by_rule("something else").unwrap().is_none());
    }
}
