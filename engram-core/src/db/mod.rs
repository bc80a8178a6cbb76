//! Database storage engine
//!
//! A single SQLite file per project (optionally sharded per IDE) holds all
//! memory. WAL journaling keeps concurrent reader processes off the writers'
//! backs; every multi-row mutation in the repository layer runs inside one
//! transaction on the shared connection.

pub mod schema;

use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use rusqlite::Connection;

use crate::error::Result;

/// Database handle wrapping a single connection.
pub struct Database {
    conn: Mutex<Connection>,
    path: Option<PathBuf>,
}

impl Database {
    /// Open or create a database at the given path
    pub fn open(path: &Path) -> Result<Self> {
        // Ensure parent directory exists
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(path)?;

        // WAL for multi-process readers, foreign keys for referential
        // integrity, busy timeout so a second writer waits instead of failing.
        conn.execute_batch(
            "
            PRAGMA journal_mode = WAL;
            PRAGMA foreign_keys = ON;
            PRAGMA synchronous = NORMAL;
            PRAGMA busy_timeout = 5000;
            ",
        )?;

        Ok(Self {
            conn: Mutex::new(conn),
            path: Some(path.to_path_buf()),
        })
    }

    /// Open an in-memory database (for testing)
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute("PRAGMA foreign_keys = ON", [])?;
        Ok(Self {
            conn: Mutex::new(conn),
            path: None,
        })
    }

    /// Run migrations on this database
    pub fn migrate(&self) -> Result<()> {
        let mut conn = self.conn.lock().unwrap();
        schema::run_migrations(&mut conn)
    }

    /// Get the underlying connection (for advanced use)
    pub fn connection(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap()
    }

    /// Path of the backing file, if file-backed.
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Current size of the database file in KB. 0 for in-memory databases.
    pub fn size_kb(&self) -> u64 {
        self.path
            .as_ref()
            .and_then(|p| std::fs::metadata(p).ok())
            .map(|m| m.len() / 1024)
            .unwrap_or(0)
    }

    /// Flush the WAL into the main file so a plain file copy is complete.
    pub fn checkpoint_wal(&self) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute_batch("PRAGMA wal_checkpoint(TRUNCATE);")?;
        Ok(())
    }

    /// Whether the full-text index tables exist in this database.
    pub fn has_fts(&self) -> bool {
        let conn = self.conn.lock().unwrap();
        conn.query_row(
            "SELECT COUNT(*) FROM sqlite_master WHERE name = 'changes_fts'",
            [],
            |r| r.get::<_, i64>(0),
        )
        .map(|n| n > 0)
        .unwrap_or(false)
    }

    /// Run `PRAGMA integrity_check` and report the verdict.
    pub fn integrity_check(&self) -> Result<String> {
        let conn = self.conn.lock().unwrap();
        let verdict: String = conn.query_row("PRAGMA integrity_check", [], |r| r.get(0))?;
        Ok(verdict)
    }

    /// Reclaim free pages. Must run outside any transaction.
    pub fn vacuum(&self) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute_batch("VACUUM;")?;

        // VACUUM may renumber rowids of tables without an INTEGER PRIMARY
        // KEY; file_notes is keyed by path, so its external-content index
        // must be rebuilt to stay aligned.
        let has_notes_fts: i64 = conn.query_row(
            "SELECT COUNT(*) FROM sqlite_master WHERE name = 'file_notes_fts'",
            [],
            |r| r.get(0),
        )?;
        if has_notes_fts > 0 {
            conn.execute_batch(
                "INSERT INTO file_notes_fts(file_notes_fts) VALUES('rebuild');",
            )?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_open_creates_parent_dirs() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join(".engram").join("memory.db");
        let db = Database::open(&path).unwrap();
        db.migrate().unwrap();
        assert!(path.exists());
        assert!(db.size_kb() > 0 || path.metadata().unwrap().len() > 0);
    }

    #[test]
    fn test_wal_mode_enabled() {
        let dir = tempfile::TempDir::new().unwrap();
        let db = Database::open(&dir.path().join("memory.db")).unwrap();
        let mode: String = db
            .connection()
            .query_row("PRAGMA journal_mode", [], |r| r.get(0))
            .unwrap();
        assert_eq!(mode.to_lowercase(), "wal");
    }

    #[test]
    fn test_in_memory_has_no_size() {
        let db = Database::open_in_memory().unwrap();
        db.migrate().unwrap();
        assert_eq!(db.size_kb(), 0);
        assert!(db.has_fts());
    }

    #[test]
    fn test_integrity_check_ok() {
        let db = Database::open_in_memory().unwrap();
        db.migrate().unwrap();
        assert_eq!(db.integrity_check().unwrap(), "ok");
    }
}
