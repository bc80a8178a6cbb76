//! Config repository
//!
//! Runtime tunables stored in the database so they travel with the project.
//! Typed getters fall back to the caller's default on missing or
//! unparseable values.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension};

use crate::db::Database;
use crate::error::{Error, Result};

/// Well-known config keys.
pub mod keys {
    pub const AUTO_COMPACT: &str = "auto_compact";
    pub const COMPACT_THRESHOLD: &str = "compact_threshold";
    pub const RETENTION_DAYS: &str = "retention_days";
    pub const MAX_BACKUPS: &str = "max_backups";
    pub const PRESSURE_NOTICE_PCT: &str = "context_pressure_notice_pct";
    pub const PRESSURE_WARNING_PCT: &str = "context_pressure_warning_pct";
    pub const PRESSURE_URGENT_PCT: &str = "context_pressure_urgent_pct";
    pub const CONTEXT_WINDOW_SIZE: &str = "context_window_size";
}

impl Database {
    /// Raw config value.
    pub fn config_get(&self, key: &str) -> Result<Option<String>> {
        let conn = self.connection();
        conn.query_row("SELECT value FROM config WHERE key = ?1", [key], |r| r.get(0))
            .optional()
            .map_err(Error::from)
    }

    /// Set a config value.
    pub fn config_set(&self, key: &str, value: &str, now: DateTime<Utc>) -> Result<()> {
        let conn = self.connection();
        conn.execute(
            "INSERT INTO config (key, value, updated_at) VALUES (?1, ?2, ?3)
             ON CONFLICT(key) DO UPDATE SET
                 value = excluded.value,
                 updated_at = excluded.updated_at",
            params![key, value, now.to_rfc3339()],
        )?;
        Ok(())
    }

    /// Integer config value with default.
    pub fn config_get_int(&self, key: &str, default: i64) -> Result<i64> {
        Ok(self
            .config_get(key)?
            .and_then(|v| v.trim().parse().ok())
            .unwrap_or(default))
    }

    /// Boolean config value with default. Accepts `true/false/1/0`.
    pub fn config_get_bool(&self, key: &str, default: bool) -> Result<bool> {
        Ok(self
            .config_get(key)?
            .map(|v| matches!(v.trim(), "true" | "1"))
            .unwrap_or(default))
    }

    /// All config entries.
    pub fn config_all(&self) -> Result<BTreeMap<String, String>> {
        let conn = self.connection();
        let mut stmt = conn.prepare("SELECT key, value FROM config ORDER BY key")?;
        let rows = stmt
            .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?
            .collect::<std::result::Result<BTreeMap<String, String>, _>>()?;
        Ok(rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_typed_getters() {
        let db = Database::open_in_memory().unwrap();
        db.migrate().unwrap();

        // Seeded defaults from migrations.
        assert_eq!(db.config_get_int(keys::COMPACT_THRESHOLD, 0).unwrap(), 50);
        assert!(db.config_get_bool(keys::AUTO_COMPACT, false).unwrap());

        db.config_set(keys::MAX_BACKUPS, "3", Utc::now()).unwrap();
        assert_eq!(db.config_get_int(keys::MAX_BACKUPS, 10).unwrap(), 3);

        db.config_set("flag", "garbage", Utc::now()).unwrap();
        assert_eq!(db.config_get_int("flag", 7).unwrap(), 7);
        assert!(!db.config_get_bool("flag", false).unwrap());

        assert!(db.config_all().unwrap().contains_key(keys::CONTEXT_WINDOW_SIZE));
    }
}
