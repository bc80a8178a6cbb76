//! File-note repository
//!
//! Notes are keyed by normalized path. Upserts use COALESCE-on-null
//! semantics in SQL: a null field in the patch keeps the stored value, an
//! explicit value replaces it.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};

use crate::db::Database;
use crate::error::{Error, Result};
use crate::types::{Complexity, FileNote, FileNotePatch};
use crate::util::{decode_str_array, encode_str_array, normalize_path, parse_ts};

pub(crate) fn row_to_file_note(row: &Row) -> rusqlite::Result<FileNote> {
    let last_reviewed: String = row.get("last_reviewed")?;
    let dependencies: String = row.get("dependencies")?;
    let dependents: String = row.get("dependents")?;
    let complexity: Option<String> = row.get("complexity")?;

    Ok(FileNote {
        file_path: row.get("file_path")?,
        purpose: row.get("purpose")?,
        dependencies: decode_str_array(&dependencies),
        dependents: decode_str_array(&dependents),
        layer: row.get("layer")?,
        last_reviewed: parse_ts(&last_reviewed),
        last_modified_session: row.get("last_modified_session")?,
        notes: row.get("notes")?,
        complexity: complexity.and_then(|c| c.parse::<Complexity>().ok()),
        file_mtime: row.get("file_mtime")?,
        content_hash: row.get("content_hash")?,
        git_branch: row.get("git_branch")?,
        executive_summary: row.get("executive_summary")?,
    })
}

fn upsert_note(
    conn: &Connection,
    path: &str,
    patch: &FileNotePatch,
    session_id: Option<i64>,
    now: DateTime<Utc>,
) -> rusqlite::Result<()> {
    let path = normalize_path(path);
    let deps = patch.dependencies.as_deref().map(encode_str_array);
    let dependents = patch.dependents.as_deref().map(encode_str_array);

    conn.execute(
        "INSERT INTO file_notes
             (file_path, purpose, dependencies, dependents, layer, last_reviewed,
              last_modified_session, notes, complexity, file_mtime, content_hash,
              git_branch, executive_summary)
         VALUES (?1, ?2, COALESCE(?3, '[]'), COALESCE(?4, '[]'), ?5, ?6, ?7, ?8, ?9,
                 ?10, ?11, ?12, ?13)
         ON CONFLICT(file_path) DO UPDATE SET
             purpose = COALESCE(excluded.purpose, file_notes.purpose),
             dependencies = COALESCE(?3, file_notes.dependencies),
             dependents = COALESCE(?4, file_notes.dependents),
             layer = COALESCE(excluded.layer, file_notes.layer),
             last_reviewed = excluded.last_reviewed,
             last_modified_session = COALESCE(excluded.last_modified_session,
                                              file_notes.last_modified_session),
             notes = COALESCE(excluded.notes, file_notes.notes),
             complexity = COALESCE(excluded.complexity, file_notes.complexity),
             file_mtime = COALESCE(excluded.file_mtime, file_notes.file_mtime),
             content_hash = COALESCE(excluded.content_hash, file_notes.content_hash),
             git_branch = COALESCE(excluded.git_branch, file_notes.git_branch),
             executive_summary = COALESCE(excluded.executive_summary,
                                          file_notes.executive_summary)",
        params![
            path,
            patch.purpose,
            deps,
            dependents,
            patch.layer,
            now.to_rfc3339(),
            session_id,
            patch.notes,
            patch.complexity.map(|c| c.as_str()),
            patch.file_mtime,
            patch.content_hash,
            patch.git_branch,
            patch.executive_summary,
        ],
    )?;
    Ok(())
}

impl Database {
    /// Upsert one file note. Null patch fields preserve stored values.
    pub fn upsert_file_note(
        &self,
        path: &str,
        patch: &FileNotePatch,
        session_id: Option<i64>,
        now: DateTime<Utc>,
    ) -> Result<FileNote> {
        {
            let conn = self.connection();
            upsert_note(&conn, path, patch, session_id, now)?;
        }
        self.get_file_note(path)?
            .ok_or_else(|| Error::not_found("file_note", path.to_string()))
    }

    /// Upsert a batch of notes in a single transaction.
    pub fn upsert_file_notes_batch(
        &self,
        items: &[(String, FileNotePatch)],
        session_id: Option<i64>,
        now: DateTime<Utc>,
    ) -> Result<usize> {
        if items.is_empty() {
            return Err(Error::Validation("notes must not be empty".into()));
        }
        let mut conn = self.connection();
        let tx = conn.transaction()?;
        for (path, patch) in items {
            upsert_note(&tx, path, patch, session_id, now)?;
        }
        tx.commit()?;
        Ok(items.len())
    }

    /// Get a note by path.
    pub fn get_file_note(&self, path: &str) -> Result<Option<FileNote>> {
        let conn = self.connection();
        conn.query_row(
            "SELECT * FROM file_notes WHERE file_path = ?1",
            [normalize_path(path)],
            row_to_file_note,
        )
        .optional()
        .map_err(Error::from)
    }

    /// All notes, most recently reviewed first.
    pub fn file_notes_all(&self, limit: Option<i64>) -> Result<Vec<FileNote>> {
        let limit = super::clamp_limit(limit);
        let conn = self.connection();
        let mut stmt = conn.prepare(
            "SELECT * FROM file_notes ORDER BY last_reviewed DESC LIMIT ?1",
        )?;
        let notes = stmt
            .query_map([limit], row_to_file_note)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(notes)
    }

    /// Dependency edges recorded across file notes. When `root` is given,
    /// only that file's outgoing and incoming edges are returned.
    pub fn dependency_map(&self, root: Option<&str>) -> Result<BTreeMap<String, Vec<String>>> {
        let conn = self.connection();
        let mut stmt =
            conn.prepare("SELECT file_path, dependencies, dependents FROM file_notes")?;
        let rows = stmt
            .query_map([], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                ))
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        let root = root.map(normalize_path);
        let mut map: BTreeMap<String, Vec<String>> = BTreeMap::new();
        for (path, deps, dependents) in rows {
            let deps = decode_str_array(&deps);
            let dependents = decode_str_array(&dependents);
            match &root {
                Some(r) => {
                    if &path == r {
                        map.insert(path.clone(), deps.clone());
                    }
                    // Files declaring the root among their dependencies are
                    // its dependents.
                    if deps.iter().any(|d| d == r) || dependents.iter().any(|d| d == r) {
                        map.entry(r.clone()).or_default();
                    }
                }
                None => {
                    map.insert(path, deps);
                }
            }
        }

        if let Some(r) = root {
            // Second pass: collect incoming edges for the root.
            let incoming: Vec<String> = {
                let mut stmt = conn
                    .prepare("SELECT file_path, dependencies FROM file_notes")?;
                let rows = stmt
                    .query_map([], |row| {
                        Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
                    })?
                    .collect::<std::result::Result<Vec<_>, _>>()?;
                rows.into_iter()
                    .filter(|(_, deps)| decode_str_array(deps).iter().any(|d| *d == r))
                    .map(|(p, _)| p)
                    .collect()
            };
            if !incoming.is_empty() {
                map.insert(format!("{} <- dependents", r), incoming);
            }
        }

        Ok(map)
    }

    /// Number of file notes.
    pub fn file_note_count(&self) -> Result<i64> {
        let conn = self.connection();
        let n = conn.query_row("SELECT COUNT(*) FROM file_notes", [], |r| r.get(0))?;
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

    #[test]
    fn test_upsert_preserves_omitted_fields() {
        let db = db();
        let t1 = Utc::now();
        db.upsert_file_note(
            "src/x.ts",
            &FileNotePatch {
                purpose: Some("p".into()),
                ..Default::default()
            },
            None,
            t1,
        )
        .unwrap();

        let t2 = Utc::now();
        let note = db
            .upsert_file_note(
                "src/x.ts",
                &FileNotePatch {
                    complexity: Some(Complexity::Moderate),
                    ..Default::default()
                },
                None,
                t2,
            )
            .unwrap();

        assert_eq!(note.purpose.as_deref(), Some("p"));
        assert_eq!(note.complexity, Some(Complexity::Moderate));
    }

    #[test]
    fn test_path_normalized_on_upsert_and_read() {
        let db = db();
        db.upsert_file_note(
            "./src/a.rs",
            &FileNotePatch {
                purpose: Some("entry".into()),
                ..Default::default()
            },
            None,
            Utc::now(),
        )
        .unwrap();

        let note = db.get_file_note("src/a.rs").unwrap().unwrap();
        assert_eq!(note.file_path, "src/a.rs");
    }

    #[test]
    fn test_batch_upsert() {
        let db = db();
        let items = vec![
            (
                "a.rs".to_string(),
                FileNotePatch {
                    purpose: Some("a".into()),
                    ..Default::default()
                },
            ),
            (
                "b.rs".to_string(),
                FileNotePatch {
                    purpose: Some("b".into()),
                    ..Default::default()
                },
            ),
        ];
        assert_eq!(db.upsert_file_notes_batch(&items, None, Utc::now()).unwrap(), 2);
        assert_eq!(db.file_note_count().unwrap(), 2);
        assert!(db.upsert_file_notes_batch(&[], None, Utc::now()).is_err());
    }

    #[test]
    fn test_dependency_map() {
        let db = db();
        let now = Utc::now();
        db.upsert_file_note(
            "src/api.rs",
            &FileNotePatch {
                dependencies: Some(vec!["src/db.rs".into()]),
                ..Default::default()
            },
            None,
            now,
        )
        .unwrap();
        db.upsert_file_note(
            "src/db.rs",
            &FileNotePatch {
                dependencies: Some(vec![]),
                ..Default::default()
            },
            None,
            now,
        )
        .unwrap();

        let full = db.dependency_map(None).unwrap();
        assert_eq!(full["src/api.rs"], vec!["src/db.rs"]);

        let scoped = db.dependency_map(Some("src/db.rs")).unwrap();
        let incoming = scoped.get("src/db.rs <- dependents").unwrap();
        assert_eq!(incoming, &vec!["src/api.rs".to_string()]);
    }
}
