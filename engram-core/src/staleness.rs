//! Staleness enrichment
//!
//! A file note is only as good as the file it describes. On read we compare
//! the stored mtime and content hash against the file on disk, and the
//! recorded git branch against the current one. The verdict is derived
//! every time, never stored.

use std::path::Path;

use sha2::{Digest, Sha256};

use crate::types::{FileNote, Staleness, StalenessConfidence};

/// Hex SHA-256 of a file's contents. None when the file is unreadable.
pub fn content_hash(path: &Path) -> Option<String> {
    let bytes = std::fs::read(path).ok()?;
    let mut hasher = Sha256::new();
    hasher.update(&bytes);
    Some(hex::encode(hasher.finalize()))
}

/// Current branch name, read from `.git/HEAD`. Detached heads and missing
/// repos yield None.
pub fn current_git_branch(project_root: &Path) -> Option<String> {
    let head = std::fs::read_to_string(project_root.join(".git").join("HEAD")).ok()?;
    head.trim()
        .strip_prefix("ref: refs/heads/")
        .map(str::to_string)
}

/// File mtime in epoch milliseconds.
fn file_mtime_ms(path: &Path) -> Option<i64> {
    let modified = std::fs::metadata(path).ok()?.modified().ok()?;
    let since_epoch = modified.duration_since(std::time::UNIX_EPOCH).ok()?;
    Some(since_epoch.as_millis() as i64)
}

/// Compute the staleness verdict for a note against the file on disk.
pub fn enrich(note: &FileNote, project_root: &Path) -> Staleness {
    let file = project_root.join(&note.file_path);

    let branch_warning = match (&note.git_branch, current_git_branch(project_root)) {
        (Some(recorded), Some(current)) if *recorded != current => Some(format!(
            "note was recorded on branch '{}', current branch is '{}'",
            recorded, current
        )),
        _ => None,
    };

    let Some(current_mtime) = file_mtime_ms(&file) else {
        // File gone or unreadable: no basis for a verdict.
        return Staleness {
            confidence: StalenessConfidence::Unknown,
            staleness_hours: None,
            branch_warning,
        };
    };

    let Some(stored_mtime) = note.file_mtime else {
        return Staleness {
            confidence: StalenessConfidence::Unknown,
            staleness_hours: None,
            branch_warning,
        };
    };

    if current_mtime <= stored_mtime {
        // Same mtime: trust the content hash when we have one. A hash
        // mismatch at zero drift means the content changed under us.
        let confidence = match &note.content_hash {
            Some(stored_hash) => match content_hash(&file) {
                Some(ref current_hash) if current_hash == stored_hash => {
                    StalenessConfidence::High
                }
                Some(_) => StalenessConfidence::Stale,
                None => StalenessConfidence::Unknown,
            },
            None => StalenessConfidence::High,
        };
        let hours = if confidence == StalenessConfidence::Stale {
            Some(0.0)
        } else {
            None
        };
        return Staleness {
            confidence,
            staleness_hours: hours,
            branch_warning,
        };
    }

    let drift_hours = (current_mtime - stored_mtime) as f64 / 3_600_000.0;
    let confidence = if drift_hours > 24.0 {
        StalenessConfidence::Stale
    } else {
        StalenessConfidence::Medium
    };

    Staleness {
        confidence,
        staleness_hours: Some(drift_hours),
        branch_warning,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use tempfile::TempDir;

    fn note(path: &str) -> FileNote {
        FileNote {
            file_path: path.to_string(),
            purpose: None,
            dependencies: vec![],
            dependents: vec![],
            layer: None,
            last_reviewed: Utc::now(),
            last_modified_session: None,
            notes: None,
            complexity: None,
            file_mtime: None,
            content_hash: None,
            git_branch: None,
            executive_summary: None,
        }
    }

    #[test]
    fn test_missing_file_is_unknown() {
        let dir = TempDir::new().unwrap();
        let verdict = enrich(&note("gone.rs"), dir.path());
        assert_eq!(verdict.confidence, StalenessConfidence::Unknown);
    }

    #[test]
    fn test_unrecorded_mtime_is_unknown() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("f.rs"), "fn main() {}").unwrap();
        let verdict = enrich(&note("f.rs"), dir.path());
        assert_eq!(verdict.confidence, StalenessConfidence::Unknown);
    }

    #[test]
    fn test_matching_hash_is_high() {
        let dir = TempDir::new().unwrap();
        let file = dir.path().join("f.rs");
        std::fs::write(&file, "fn main() {}").unwrap();

        let mut n = note("f.rs");
        n.file_mtime = Some(i64::MAX); // stored at-or-after current mtime
        n.content_hash = content_hash(&file);

        let verdict = enrich(&n, dir.path());
        assert_eq!(verdict.confidence, StalenessConfidence::High);
        assert!(verdict.staleness_hours.is_none());
    }

    #[test]
    fn test_hash_mismatch_at_zero_drift_is_stale() {
        let dir = TempDir::new().unwrap();
        let file = dir.path().join("f.rs");
        std::fs::write(&file, "fn main() {}").unwrap();

        let mut n = note("f.rs");
        n.file_mtime = Some(i64::MAX);
        n.content_hash = Some("deadbeef".to_string());

        let verdict = enrich(&n, dir.path());
        assert_eq!(verdict.confidence, StalenessConfidence::Stale);
        assert_eq!(verdict.staleness_hours, Some(0.0));
    }

    #[test]
    fn test_drift_bands() {
        let dir = TempDir::new().unwrap();
        let file = dir.path().join("f.rs");
        std::fs::write(&file, "x").unwrap();
        let current = super::file_mtime_ms(&file).unwrap();

        // Note recorded 48 hours before the file's current mtime.
        let mut n = note("f.rs");
        n.file_mtime = Some(current - 48 * 3_600_000);
        let verdict = enrich(&n, dir.path());
        assert_eq!(verdict.confidence, StalenessConfidence::Stale);
        let hours = verdict.staleness_hours.unwrap();
        assert!((hours - 48.0).abs() < 0.1);

        // Six hours of drift is within the medium band.
        n.file_mtime = Some(current - 6 * 3_600_000);
        let verdict = enrich(&n, dir.path());
        assert_eq!(verdict.confidence, StalenessConfidence::Medium);
    }

    #[test]
    fn test_branch_warning() {
        let dir = TempDir::new().unwrap();
        let git = dir.path().join(".git");
        std::fs::create_dir_all(&git).unwrap();
        std::fs::write(git.join("HEAD"), "ref: refs/heads/main\n").unwrap();

        let mut n = note("f.rs");
        n.git_branch = Some("feature/x".to_string());
        let verdict = enrich(&n, dir.path());
        assert!(verdict.branch_warning.as_deref().unwrap().contains("main"));

        n.git_branch = Some("main".to_string());
        assert!(enrich(&n, dir.path()).branch_warning.is_none());
    }
}
