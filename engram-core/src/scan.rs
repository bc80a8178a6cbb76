//! Project scanning and git hook management
//!
//! `scan_project` walks the source tree and seeds stub file notes (with
//! fresh mtime and content hash) for files that have none yet, so staleness
//! tracking starts working before an agent writes its first real note. The
//! git hook appends commit lines to `.engram/git-changes.log` for later
//! correlation.

use std::path::Path;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::db::Database;
use crate::error::Result;
use crate::staleness;
use crate::types::FileNotePatch;
use crate::util::normalize_path;

/// Glob patterns scanned for source files.
const SOURCE_GLOBS: &[&str] = &[
    "src/**/*.rs",
    "src/**/*.ts",
    "src/**/*.tsx",
    "src/**/*.js",
    "src/**/*.py",
    "src/**/*.go",
    "lib/**/*.rs",
    "crates/**/*.rs",
    "*.rs",
    "*.ts",
    "*.py",
];

/// Marker identifying a hook we installed.
const HOOK_MARKER: &str = "# engram post-commit hook";

/// What a scan did.
#[derive(Debug, Clone, Serialize)]
pub struct ScanReport {
    pub scanned: usize,
    pub notes_created: usize,
    pub skipped_existing: usize,
}

/// Scan the project tree and create stub notes for unknown files.
pub fn scan_project(
    db: &Database,
    project_root: &Path,
    max_files: usize,
    now: DateTime<Utc>,
) -> Result<ScanReport> {
    let mut report = ScanReport {
        scanned: 0,
        notes_created: 0,
        skipped_existing: 0,
    };

    let mut batch: Vec<(String, FileNotePatch)> = Vec::new();
    for pattern in SOURCE_GLOBS {
        let full = project_root.join(pattern);
        let Some(pattern_str) = full.to_str() else {
            continue;
        };
        let Ok(paths) = glob::glob(pattern_str) else {
            continue;
        };
        for entry in paths.flatten() {
            if report.scanned >= max_files {
                break;
            }
            let Ok(relative) = entry.strip_prefix(project_root) else {
                continue;
            };
            let rel = normalize_path(&relative.to_string_lossy());
            report.scanned += 1;

            if db.get_file_note(&rel)?.is_some() {
                report.skipped_existing += 1;
                continue;
            }

            let mtime = std::fs::metadata(&entry)
                .ok()
                .and_then(|m| m.modified().ok())
                .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
                .map(|d| d.as_millis() as i64);

            batch.push((
                rel,
                FileNotePatch {
                    file_mtime: mtime,
                    content_hash: staleness::content_hash(&entry),
                    git_branch: staleness::current_git_branch(project_root),
                    ..Default::default()
                },
            ));
        }
    }

    if !batch.is_empty() {
        report.notes_created = db.upsert_file_notes_batch(&batch, None, now)?;
    }

    tracing::info!(
        scanned = report.scanned,
        created = report.notes_created,
        "Project scan complete"
    );
    Ok(report)
}

/// Install the post-commit hook. Refuses to overwrite a foreign hook.
pub fn install_hooks(project_root: &Path) -> Result<String> {
    let hooks_dir = project_root.join(".git").join("hooks");
    if !project_root.join(".git").is_dir() {
        return Err(crate::error::Error::Validation(
            "project root is not a git repository".into(),
        ));
    }
    std::fs::create_dir_all(&hooks_dir)?;

    let hook_path = hooks_dir.join("post-commit");
    if hook_path.exists() {
        let existing = std::fs::read_to_string(&hook_path).unwrap_or_default();
        if !existing.contains(HOOK_MARKER) {
            return Err(crate::error::Error::Conflict(
                "a foreign post-commit hook already exists".into(),
            ));
        }
    }

    let script = format!(
        "#!/bin/sh\n{}\nmkdir -p .engram\n\
         printf '%s %s %s\\n' \"$(date -u +%Y-%m-%dT%H:%M:%SZ)\" \
         \"$(git rev-parse HEAD)\" \"$(git log -1 --pretty=%s)\" \
         >> .engram/git-changes.log\n",
        HOOK_MARKER
    );
    std::fs::write(&hook_path, script)?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(&hook_path, std::fs::Permissions::from_mode(0o755))?;
    }

    Ok(hook_path.to_string_lossy().to_string())
}

/// Remove the post-commit hook if it is ours.
pub fn remove_hooks(project_root: &Path) -> Result<bool> {
    let hook_path = project_root.join(".git").join("hooks").join("post-commit");
    if !hook_path.exists() {
        return Ok(false);
    }
    let existing = std::fs::read_to_string(&hook_path).unwrap_or_default();
    if !existing.contains(HOOK_MARKER) {
        return Err(crate::error::Error::Conflict(
            "post-commit hook was not installed by engram".into(),
        ));
    }
    std::fs::remove_file(&hook_path)?;
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn db() -> Database {
        let db = Database::open_in_memory().unwrap();
        db.migrate().unwrap();
        db
    }

    #[test]
    fn test_scan_creates_stub_notes() {
        let dir = TempDir::new().unwrap();
        let src = dir.path().join("src");
        std::fs::create_dir_all(&src).unwrap();
        std::fs::write(src.join("main.rs"), "fn main() {}").unwrap();
        std::fs::write(src.join("lib.rs"), "pub fn lib() {}").unwrap();

        let db = db();
        let report = scan_project(&db, dir.path(), 100, Utc::now()).unwrap();
        assert_eq!(report.scanned, 2);
        assert_eq!(report.notes_created, 2);

        let note = db.get_file_note("src/main.rs").unwrap().unwrap();
        assert!(note.file_mtime.is_some());
        assert!(note.content_hash.is_some());
        assert!(note.purpose.is_none());

        // Second scan leaves existing notes alone.
        let again = scan_project(&db, dir.path(), 100, Utc::now()).unwrap();
        assert_eq!(again.notes_created, 0);
        assert_eq!(again.skipped_existing, 2);
    }

    #[test]
    fn test_hooks_lifecycle() {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir_all(dir.path().join(".git")).unwrap();

        let path = install_hooks(dir.path()).unwrap();
        assert!(Path::new(&path).exists());
        // Reinstall over our own hook is fine.
        install_hooks(dir.path()).unwrap();

        assert!(remove_hooks(dir.path()).unwrap());
        assert!(!remove_hooks(dir.path()).unwrap());
    }

    #[test]
    fn test_foreign_hook_is_preserved() {
        let dir = TempDir::new().unwrap();
        let hooks = dir.path().join(".git").join("hooks");
        std::fs::create_dir_all(&hooks).unwrap();
        std::fs::write(hooks.join("post-commit"), "#!/bin/sh\necho mine\n").unwrap();

        assert!(install_hooks(dir.path()).is_err());
        assert!(remove_hooks(dir.path()).is_err());
    }

    #[test]
    fn test_not_a_repo() {
        let dir = TempDir::new().unwrap();
        assert!(install_hooks(dir.path()).is_err());
    }
}
