//! Compaction, backup, and restore
//!
//! Backups are plain file copies taken after a WAL checkpoint, written to a
//! temp name and renamed into place so a crash never leaves a half-written
//! backup. Compaction collapses the change rows of old completed sessions
//! into one synthetic record each, always behind a safety backup, and
//! reclaims space with VACUUM once the transaction has committed.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use rusqlite::params;
use serde::Serialize;

use crate::db::Database;
use crate::error::{Error, Result};
use crate::repo::changes::COMPACTED_PATH;
use crate::repo::config::keys;
use crate::util::truncate_chars;

/// Confirmation token required by [`restore`].
pub const RESTORE_CONFIRM: &str = "yes-restore";

/// Backups kept in the default directory.
pub const DEFAULT_MAX_BACKUPS: i64 = 10;

/// Sessions preserved verbatim by a default compaction.
pub const DEFAULT_KEEP_SESSIONS: i64 = 50;

/// Cap on a synthetic compacted description.
const COMPACT_DESCRIPTION_CHARS: usize = 2_000;

/// One entry in a backup listing.
#[derive(Debug, Clone, Serialize)]
pub struct BackupInfo {
    pub path: PathBuf,
    pub size_kb: u64,
    pub modified: Option<DateTime<Utc>>,
}

/// Compaction tuning knobs.
#[derive(Debug, Clone)]
pub struct CompactOptions {
    pub keep_sessions: i64,
    pub max_age_days: Option<i64>,
    pub dry_run: bool,
}

impl Default for CompactOptions {
    fn default() -> Self {
        Self {
            keep_sessions: DEFAULT_KEEP_SESSIONS,
            max_age_days: None,
            dry_run: false,
        }
    }
}

/// What a compaction run did (or would do, for a dry run).
#[derive(Debug, Clone, Serialize)]
pub struct CompactReport {
    pub dry_run: bool,
    pub sessions_compacted: usize,
    pub changes_removed: usize,
    pub size_kb_before: u64,
    pub size_kb_after: u64,
}

fn backup_file_name(now: DateTime<Utc>) -> String {
    // ISO timestamp with filesystem-hostile colons flattened.
    format!("memory-{}.db", now.format("%Y-%m-%dT%H-%M-%S"))
}

/// Copy the live database to a backup file. The copy goes to a temporary
/// name first and is renamed into place.
pub fn backup(db: &Database, backups_dir: &Path, dest: Option<&Path>, now: DateTime<Utc>) -> Result<PathBuf> {
    let source = db
        .path()
        .ok_or_else(|| Error::Validation("cannot back up an in-memory database".into()))?
        .to_path_buf();

    db.checkpoint_wal()?;

    let target = match dest {
        Some(p) => p.to_path_buf(),
        None => backups_dir.join(backup_file_name(now)),
    };
    if let Some(parent) = target.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let tmp = target.with_extension("db.partial");
    std::fs::copy(&source, &tmp)?;
    std::fs::rename(&tmp, &target)?;

    tracing::info!(target = %target.display(), "Backup written");
    Ok(target)
}

/// Backups in the default directory, newest first.
pub fn list_backups(backups_dir: &Path) -> Result<Vec<BackupInfo>> {
    let mut backups = Vec::new();
    let entries = match std::fs::read_dir(backups_dir) {
        Ok(entries) => entries,
        Err(_) => return Ok(backups),
    };

    for entry in entries.flatten() {
        let path = entry.path();
        let name = entry.file_name().to_string_lossy().to_string();
        if !name.starts_with("memory-") || !name.ends_with(".db") {
            continue;
        }
        let meta = entry.metadata().ok();
        let modified = meta
            .as_ref()
            .and_then(|m| m.modified().ok())
            .map(DateTime::<Utc>::from);
        backups.push(BackupInfo {
            path,
            size_kb: meta.map(|m| m.len() / 1024).unwrap_or(0),
            modified,
        });
    }

    backups.sort_by(|a, b| b.modified.cmp(&a.modified));
    Ok(backups)
}

/// Delete the oldest backups beyond `max`.
pub fn prune_backups(backups_dir: &Path, max: i64) -> Result<usize> {
    let backups = list_backups(backups_dir)?;
    let mut pruned = 0;
    for backup in backups.iter().skip(max.max(0) as usize) {
        if std::fs::remove_file(&backup.path).is_ok() {
            pruned += 1;
        }
    }
    if pruned > 0 {
        tracing::info!(pruned, "Pruned old backups");
    }
    Ok(pruned)
}

/// Collapse the change history of old completed sessions. Each affected
/// session keeps exactly one synthetic `(compacted)` change row summarizing
/// what was deleted.
pub fn compact(
    db: &Database,
    backups_dir: &Path,
    opts: &CompactOptions,
    now: DateTime<Utc>,
) -> Result<CompactReport> {
    let size_kb_before = db.size_kb();
    let session_ids = db.compactable_session_ids(opts.keep_sessions, opts.max_age_days, now)?;

    if session_ids.is_empty() {
        return Ok(CompactReport {
            dry_run: opts.dry_run,
            sessions_compacted: 0,
            changes_removed: 0,
            size_kb_before,
            size_kb_after: size_kb_before,
        });
    }

    if opts.dry_run {
        let mut changes_removed = 0;
        let mut sessions_compacted = 0;
        for sid in &session_ids {
            let n = db
                .changes_for_session(*sid)?
                .iter()
                .filter(|c| c.file_path != COMPACTED_PATH)
                .count();
            if n > 0 {
                sessions_compacted += 1;
                changes_removed += n;
            }
        }
        return Ok(CompactReport {
            dry_run: true,
            sessions_compacted,
            changes_removed,
            size_kb_before,
            size_kb_after: size_kb_before,
        });
    }

    // Safety first: never rewrite history without a copy to fall back on.
    if db.path().is_some() {
        backup(db, backups_dir, None, now)?;
    }

    let mut sessions_compacted = 0;
    let mut changes_removed = 0;
    {
        let mut conn = db.connection();
        let tx = conn.transaction()?;

        for sid in &session_ids {
            let rows: Vec<(i64, String, String, String)> = {
                let mut stmt = tx.prepare(
                    "SELECT id, change_type, file_path, description FROM changes
                     WHERE session_id = ?1 AND file_path != ?2 ORDER BY id ASC",
                )?;
                let result = stmt
                    .query_map(params![sid, COMPACTED_PATH], |row| {
                        Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?))
                    })?
                    .collect::<std::result::Result<Vec<_>, _>>()?;
                result
            };
            if rows.is_empty() {
                continue;
            }

            let summary = rows
                .iter()
                .map(|(_, ty, path, desc)| format!("[{}] {}: {}", ty, path, desc))
                .collect::<Vec<_>>()
                .join("; ");
            let summary = truncate_chars(&summary, COMPACT_DESCRIPTION_CHARS);

            for (id, _, _, _) in &rows {
                tx.execute("DELETE FROM changes WHERE id = ?1", [id])?;
            }
            tx.execute(
                "INSERT INTO changes
                     (session_id, timestamp, file_path, change_type, description, impact_scope)
                 VALUES (?1, ?2, ?3, 'modified', ?4, 'global')",
                params![sid, now.to_rfc3339(), COMPACTED_PATH, summary],
            )?;

            sessions_compacted += 1;
            changes_removed += rows.len();
        }

        tx.commit()?;
    }

    // Reclaim the freed pages once the transaction is durable.
    db.vacuum()?;

    tracing::info!(sessions_compacted, changes_removed, "Compaction complete");

    Ok(CompactReport {
        dry_run: false,
        sessions_compacted,
        changes_removed,
        size_kb_before,
        size_kb_after: db.size_kb(),
    })
}

/// Overwrite the live database file from a backup. Requires the literal
/// confirmation token; takes a safety backup of the current file first.
/// The server must restart to load the restored file.
pub fn restore(
    db: &Database,
    backups_dir: &Path,
    input: &Path,
    confirm: &str,
    now: DateTime<Utc>,
) -> Result<PathBuf> {
    if confirm != RESTORE_CONFIRM {
        return Err(Error::Validation(format!(
            "restore requires confirm: \"{}\"",
            RESTORE_CONFIRM
        )));
    }
    if !input.exists() {
        return Err(Error::Validation(format!(
            "backup file does not exist: {}",
            input.display()
        )));
    }

    // Refuse to restore a file SQLite cannot verify.
    {
        let check = rusqlite::Connection::open_with_flags(
            input,
            rusqlite::OpenFlags::SQLITE_OPEN_READ_ONLY,
        )
        .and_then(|conn| {
            conn.query_row("PRAGMA integrity_check", [], |r| r.get::<_, String>(0))
        });
        match check {
            Ok(verdict) if verdict == "ok" => {}
            Ok(verdict) => {
                return Err(Error::Corruption(format!(
                    "backup failed integrity check: {}",
                    verdict
                )))
            }
            Err(e) => {
                return Err(Error::Corruption(format!(
                    "backup is not a readable database: {}",
                    e
                )))
            }
        }
    }

    let live = db
        .path()
        .ok_or_else(|| Error::Validation("cannot restore into an in-memory database".into()))?
        .to_path_buf();

    let safety = backup(db, backups_dir, None, now)?;
    std::fs::copy(input, &live)?;

    tracing::warn!(
        input = %input.display(),
        safety = %safety.display(),
        "Database restored; restart the server to load it"
    );
    Ok(safety)
}

/// Best-effort auto-compaction at session start. Failures are logged and
/// swallowed.
pub fn auto_compact_if_needed(db: &Database, backups_dir: &Path, now: DateTime<Utc>) -> Option<CompactReport> {
    let run = || -> Result<Option<CompactReport>> {
        if !db.config_get_bool(keys::AUTO_COMPACT, true)? {
            return Ok(None);
        }
        let threshold = db.config_get_int(keys::COMPACT_THRESHOLD, DEFAULT_KEEP_SESSIONS)?;
        if db.session_count()? <= threshold {
            return Ok(None);
        }
        let opts = CompactOptions {
            keep_sessions: threshold,
            ..Default::default()
        };
        let report = compact(db, backups_dir, &opts, now)?;
        let max = db.config_get_int(keys::MAX_BACKUPS, DEFAULT_MAX_BACKUPS)?;
        prune_backups(backups_dir, max)?;
        Ok(Some(report))
    };

    match run() {
        Ok(report) => report,
        Err(e) => {
            tracing::warn!(error = %e, "Auto-compaction failed");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ChangeType, NewChange};
    use tempfile::TempDir;

    fn file_db(dir: &TempDir) -> Database {
        let db = Database::open(&dir.path().join("memory.db")).unwrap();
        db.migrate().unwrap();
        db
    }

    fn change(path: &str) -> NewChange {
        NewChange {
            file_path: path.to_string(),
            change_type: ChangeType::Modified,
            description: format!("touched {}", path),
            diff_summary: None,
            impact_scope: None,
        }
    }

    fn seed_sessions(db: &Database, count: usize) {
        let now = Utc::now();
        for i in 0..count {
            let sid = db.create_session("a", "/p", now).unwrap();
            db.record_changes(&[change(&format!("src/f{}.rs", i))], Some(sid), now)
                .unwrap();
            db.close_session(sid, now + chrono::Duration::seconds(i as i64), "s", &[])
                .unwrap();
        }
    }

    #[test]
    fn test_backup_and_prune() {
        let dir = TempDir::new().unwrap();
        let db = file_db(&dir);
        let backups = dir.path().join("backups");

        let mut made = Vec::new();
        for i in 0..3 {
            let ts = Utc::now() + chrono::Duration::seconds(i);
            made.push(backup(&db, &backups, None, ts).unwrap());
        }
        assert_eq!(list_backups(&backups).unwrap().len(), 3);

        let pruned = prune_backups(&backups, 2).unwrap();
        assert_eq!(pruned, 1);
        assert_eq!(list_backups(&backups).unwrap().len(), 2);
    }

    #[test]
    fn test_compact_collapses_old_sessions() {
        let dir = TempDir::new().unwrap();
        let db = file_db(&dir);
        let backups = dir.path().join("backups");
        seed_sessions(&db, 5);

        let opts = CompactOptions {
            keep_sessions: 2,
            ..Default::default()
        };
        let report = compact(&db, &backups, &opts, Utc::now()).unwrap();
        assert!(!report.dry_run);
        assert_eq!(report.sessions_compacted, 3);
        assert_eq!(report.changes_removed, 3);

        // Each collapsed session holds exactly one synthetic row.
        for sid in 1..=3 {
            let rows = db.changes_for_session(sid).unwrap();
            assert_eq!(rows.len(), 1);
            assert_eq!(rows[0].file_path, COMPACTED_PATH);
            assert!(rows[0].description.contains("[modified]"));
        }
        // Recent sessions keep their raw rows.
        for sid in 4..=5 {
            let rows = db.changes_for_session(sid).unwrap();
            assert_eq!(rows.len(), 1);
            assert_ne!(rows[0].file_path, COMPACTED_PATH);
        }

        // A safety backup exists.
        assert!(!list_backups(&backups).unwrap().is_empty());

        // Re-compacting is a no-op: synthetic rows are not re-collapsed.
        let again = compact(&db, &backups, &opts, Utc::now()).unwrap();
        assert_eq!(again.sessions_compacted, 0);
    }

    #[test]
    fn test_compact_dry_run_changes_nothing() {
        let dir = TempDir::new().unwrap();
        let db = file_db(&dir);
        seed_sessions(&db, 4);
        let before = db.change_count().unwrap();

        let opts = CompactOptions {
            keep_sessions: 1,
            dry_run: true,
            ..Default::default()
        };
        let report = compact(&db, &dir.path().join("backups"), &opts, Utc::now()).unwrap();
        assert!(report.dry_run);
        assert_eq!(report.sessions_compacted, 3);
        assert_eq!(db.change_count().unwrap(), before);
    }

    #[test]
    fn test_restore_guards() {
        let dir = TempDir::new().unwrap();
        let db = file_db(&dir);
        let backups = dir.path().join("backups");
        let snapshot = backup(&db, &backups, None, Utc::now()).unwrap();

        // Wrong token: refused, live file untouched.
        let err = restore(&db, &backups, &snapshot, "yes", Utc::now()).unwrap_err();
        assert!(matches!(err, Error::Validation(_)));

        // Garbage input: corruption error.
        let junk = dir.path().join("junk.db");
        std::fs::write(&junk, b"not a database").unwrap();
        let err = restore(&db, &backups, &junk, RESTORE_CONFIRM, Utc::now()).unwrap_err();
        assert!(matches!(err, Error::Corruption(_)));

        // Valid restore leaves a safety backup behind.
        let safety = restore(&db, &backups, &snapshot, RESTORE_CONFIRM, Utc::now()).unwrap();
        assert!(safety.exists());
    }

    #[test]
    fn test_auto_compact_threshold() {
        let dir = TempDir::new().unwrap();
        let db = file_db(&dir);
        let backups = dir.path().join("backups");
        db.config_set(keys::COMPACT_THRESHOLD, "3", Utc::now()).unwrap();

        seed_sessions(&db, 2);
        assert!(auto_compact_if_needed(&db, &backups, Utc::now()).is_none());

        seed_sessions(&db, 3);
        let report = auto_compact_if_needed(&db, &backups, Utc::now()).unwrap();
        assert!(report.sessions_compacted > 0);
    }
}
