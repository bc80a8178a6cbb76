//! JSON export and import
//!
//! A full-fidelity dump of the memory to `<root>/.engram/export.json` and
//! the matching import. Imported conventions dedupe on exact rule text so
//! repeated imports stay idempotent.

use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::db::Database;
use crate::error::Result;
use crate::repo;
use crate::types::{
    Change, Convention, Decision, FileNote, FileNotePatch, KnowledgeEntry, Milestone, NewChange,
    NewDecision, Session, Task,
};

/// Export file format version.
const EXPORT_VERSION: u32 = 1;

/// The on-disk export shape.
#[derive(Debug, Serialize, Deserialize)]
pub struct Export {
    pub version: u32,
    pub exported_at: DateTime<Utc>,
    pub sessions: Vec<Session>,
    pub changes: Vec<Change>,
    pub decisions: Vec<Decision>,
    pub conventions: Vec<Convention>,
    pub tasks: Vec<Task>,
    pub file_notes: Vec<FileNote>,
    pub milestones: Vec<Milestone>,
    pub knowledge: Vec<KnowledgeEntry>,
}

/// Per-table row counts reported by export and import.
#[derive(Debug, Default, Serialize)]
pub struct TransferCounts {
    pub sessions: usize,
    pub changes: usize,
    pub decisions: usize,
    pub conventions: usize,
    pub tasks: usize,
    pub file_notes: usize,
    pub milestones: usize,
    pub knowledge: usize,
}

fn collect<T, F>(db: &Database, sql: &str, map: F) -> Result<Vec<T>>
where
    F: Fn(&rusqlite::Row) -> rusqlite::Result<T>,
{
    let conn = db.connection();
    let mut stmt = conn.prepare(sql)?;
    let rows = stmt
        .query_map([], map)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows)
}

/// Snapshot the whole database into an [`Export`].
pub fn export_all(db: &Database, now: DateTime<Utc>) -> Result<Export> {
    Ok(Export {
        version: EXPORT_VERSION,
        exported_at: now,
        sessions: collect(db, "SELECT * FROM sessions ORDER BY id", repo::sessions::row_to_session)?,
        changes: collect(db, "SELECT * FROM changes ORDER BY id", repo::changes::row_to_change)?,
        decisions: collect(
            db,
            "SELECT * FROM decisions ORDER BY id",
            repo::decisions::row_to_decision,
        )?,
        conventions: collect(
            db,
            "SELECT * FROM conventions ORDER BY id",
            repo::conventions::row_to_convention,
        )?,
        tasks: collect(db, "SELECT * FROM tasks ORDER BY id", repo::tasks::row_to_task)?,
        file_notes: collect(
            db,
            "SELECT * FROM file_notes ORDER BY file_path",
            repo::file_notes::row_to_file_note,
        )?,
        milestones: collect(
            db,
            "SELECT * FROM milestones ORDER BY id",
            repo::milestones::row_to_milestone,
        )?,
        knowledge: collect(
            db,
            "SELECT * FROM knowledge ORDER BY id",
            repo::knowledge::row_to_knowledge,
        )?,
    })
}

/// Write the export as pretty JSON.
pub fn export_to_file(db: &Database, path: &Path, now: DateTime<Utc>) -> Result<TransferCounts> {
    let export = export_all(db, now)?;
    let counts = TransferCounts {
        sessions: export.sessions.len(),
        changes: export.changes.len(),
        decisions: export.decisions.len(),
        conventions: export.conventions.len(),
        tasks: export.tasks.len(),
        file_notes: export.file_notes.len(),
        milestones: export.milestones.len(),
        knowledge: export.knowledge.len(),
    };

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, serde_json::to_string_pretty(&export)?)?;
    tracing::info!(path = %path.display(), "Export written");
    Ok(counts)
}

/// Import a previously exported file. Rows are appended with fresh ids;
/// conventions dedupe on exact rule text, file notes merge by path.
pub fn import_from_file(db: &Database, path: &Path) -> Result<TransferCounts> {
    let content = std::fs::read_to_string(path)?;
    let export: Export = serde_json::from_str(&content)?;
    let mut counts = TransferCounts::default();

    for change in &export.changes {
        db.record_changes(
            &[NewChange {
                file_path: change.file_path.clone(),
                change_type: change.change_type,
                description: change.description.clone(),
                diff_summary: change.diff_summary.clone(),
                impact_scope: Some(change.impact_scope),
            }],
            None,
            change.timestamp,
        )?;
        counts.changes += 1;
    }

    for decision in &export.decisions {
        db.create_decision(
            &NewDecision {
                decision: decision.decision.clone(),
                rationale: decision.rationale.clone(),
                affected_files: decision.affected_files.clone(),
                tags: decision.tags.clone(),
                status: Some(decision.status),
                depends_on: vec![],
            },
            None,
            decision.timestamp,
        )?;
        counts.decisions += 1;
    }

    for convention in &export.conventions {
        if db.convention_by_rule(&convention.rule)?.is_some() {
            continue;
        }
        db.create_convention(
            &convention.category,
            &convention.rule,
            &convention.examples,
            None,
            convention.timestamp,
        )?;
        counts.conventions += 1;
    }

    for task in &export.tasks {
        db.create_task(
            &task.title,
            task.description.as_deref(),
            Some(task.priority),
            &task.assigned_files,
            &task.tags,
            &[],
            None,
            task.created_at,
        )?;
        counts.tasks += 1;
    }

    for note in &export.file_notes {
        db.upsert_file_note(
            &note.file_path,
            &FileNotePatch {
                purpose: note.purpose.clone(),
                dependencies: Some(note.dependencies.clone()),
                dependents: Some(note.dependents.clone()),
                layer: note.layer.clone(),
                notes: note.notes.clone(),
                complexity: note.complexity,
                file_mtime: note.file_mtime,
                content_hash: note.content_hash.clone(),
                git_branch: note.git_branch.clone(),
                executive_summary: note.executive_summary.clone(),
            },
            None,
            note.last_reviewed,
        )?;
        counts.file_notes += 1;
    }

    for milestone in &export.milestones {
        db.record_milestone(
            &milestone.title,
            milestone.description.as_deref(),
            milestone.version.as_deref(),
            &milestone.tags,
            None,
            milestone.timestamp,
        )?;
        counts.milestones += 1;
    }

    for entry in &export.knowledge {
        db.add_knowledge(&entry.topic, &entry.content, &entry.tags, None, entry.created_at)?;
        counts.knowledge += 1;
    }

    tracing::info!(path = %path.display(), "Import complete");
    Ok(counts)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ChangeType;
    use tempfile::TempDir;

    fn seeded_db() -> Database {
        let db = Database::open_in_memory().unwrap();
        db.migrate().unwrap();
        let now = Utc::now();
        db.record_changes(
            &[NewChange {
                file_path: "src/a.rs".to_string(),
                change_type: ChangeType::Created,
                description: "init".to_string(),
                diff_summary: None,
                impact_scope: None,
            }],
            None,
            now,
        )
        .unwrap();
        db.create_convention("naming", "snake_case", &[], None, now).unwrap();
        db.add_knowledge("topic", "content", &[], None, now).unwrap();
        db
    }

    #[test]
    fn test_export_import_roundtrip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("export.json");
        let src = seeded_db();
        let now = Utc::now();

        let counts = export_to_file(&src, &path, now).unwrap();
        assert_eq!(counts.changes, 1);
        assert_eq!(counts.conventions, 1);
        assert_eq!(counts.knowledge, 1);

        let dst = Database::open_in_memory().unwrap();
        dst.migrate().unwrap();
        let imported = import_from_file(&dst, &path).unwrap();
        assert_eq!(imported.changes, 1);
        assert_eq!(imported.conventions, 1);

        // Re-import dedupes conventions by rule text.
        let again = import_from_file(&dst, &path).unwrap();
        assert_eq!(again.conventions, 0);
        assert_eq!(dst.conventions_filtered(None, true, None).unwrap().len(), 1);
    }
}
