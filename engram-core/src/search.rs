//! Full-text search
//!
//! Each searchable entity keeps an FTS5 index synchronized by triggers (see
//! the v2/v4 migrations). Queries are escaped by quoting every whitespace
//! token, which neutralizes the FTS query grammar. Results from all
//! requested scopes are merged into one rank-ordered pool, truncated, and
//! grouped by source table. Databases without the FTS tables fall back to
//! LIKE scans.

use std::collections::BTreeMap;
use std::path::Path;

use serde_json::Value;

use crate::db::Database;
use crate::error::{Error, Result};
use crate::repo;
use crate::staleness;
use crate::util::truncate_chars;

/// Searchable entity kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchScope {
    Sessions,
    Changes,
    Decisions,
    Conventions,
    Tasks,
    FileNotes,
    ScheduledEvents,
}

impl SearchScope {
    pub fn as_str(&self) -> &'static str {
        match self {
            SearchScope::Sessions => "sessions",
            SearchScope::Changes => "changes",
            SearchScope::Decisions => "decisions",
            SearchScope::Conventions => "conventions",
            SearchScope::Tasks => "tasks",
            SearchScope::FileNotes => "file_notes",
            SearchScope::ScheduledEvents => "scheduled_events",
        }
    }

    /// The six scopes searched when the caller names none.
    pub fn default_set() -> Vec<SearchScope> {
        vec![
            SearchScope::Sessions,
            SearchScope::Changes,
            SearchScope::Decisions,
            SearchScope::Conventions,
            SearchScope::Tasks,
            SearchScope::FileNotes,
        ]
    }

    fn fts_table(&self) -> &'static str {
        match self {
            SearchScope::Sessions => "sessions_fts",
            SearchScope::Changes => "changes_fts",
            SearchScope::Decisions => "decisions_fts",
            SearchScope::Conventions => "conventions_fts",
            SearchScope::Tasks => "tasks_fts",
            SearchScope::FileNotes => "file_notes_fts",
            SearchScope::ScheduledEvents => "scheduled_events_fts",
        }
    }

    /// Columns scanned by the LIKE fallback.
    fn like_columns(&self) -> &'static [&'static str] {
        match self {
            SearchScope::Sessions => &["summary", "tags", "agent_name"],
            SearchScope::Changes => &["file_path", "description", "diff_summary"],
            SearchScope::Decisions => &["decision", "rationale", "tags"],
            SearchScope::Conventions => &["category", "rule"],
            SearchScope::Tasks => &["title", "description", "tags"],
            SearchScope::FileNotes => &["file_path", "purpose", "notes", "executive_summary"],
            SearchScope::ScheduledEvents => &["title", "description", "tags"],
        }
    }

    /// Default ordering for the LIKE fallback, matching each table's
    /// natural recency column.
    fn fallback_order(&self) -> &'static str {
        match self {
            SearchScope::Sessions => "id DESC",
            SearchScope::Changes => "timestamp DESC",
            SearchScope::Decisions => "timestamp DESC",
            SearchScope::Conventions => "id DESC",
            SearchScope::Tasks => "updated_at DESC",
            SearchScope::FileNotes => "last_reviewed DESC",
            SearchScope::ScheduledEvents => "created_at DESC",
        }
    }
}

impl std::str::FromStr for SearchScope {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "sessions" => Ok(SearchScope::Sessions),
            "changes" => Ok(SearchScope::Changes),
            "decisions" => Ok(SearchScope::Decisions),
            "conventions" => Ok(SearchScope::Conventions),
            "tasks" => Ok(SearchScope::Tasks),
            "file_notes" => Ok(SearchScope::FileNotes),
            "scheduled_events" => Ok(SearchScope::ScheduledEvents),
            _ => Err(format!("unknown search scope: {}", s)),
        }
    }
}

/// Merged, grouped search results.
#[derive(Debug, Clone, serde::Serialize)]
pub struct SearchResults {
    pub total: usize,
    pub results: BTreeMap<String, Vec<Value>>,
}

/// Quote every whitespace token so the FTS query grammar cannot be
/// injected through user input.
pub fn escape_fts_query(query: &str) -> String {
    query
        .split_whitespace()
        .map(|token| format!("\"{}\"", token.replace('"', "\"\"")))
        .collect::<Vec<_>>()
        .join(" ")
}

struct Hit {
    scope: SearchScope,
    rank: f64,
    data: Value,
}

fn snippet_for(scope: SearchScope, data: &Value, context_chars: usize) -> Option<String> {
    let fields: &[&str] = match scope {
        SearchScope::Sessions => &["summary"],
        SearchScope::Changes => &["description", "diff_summary"],
        SearchScope::Decisions => &["decision", "rationale"],
        SearchScope::Conventions => &["rule"],
        SearchScope::Tasks => &["title", "description"],
        SearchScope::FileNotes => &["purpose", "notes", "executive_summary"],
        SearchScope::ScheduledEvents => &["title", "description"],
    };
    let joined = fields
        .iter()
        .filter_map(|f| data.get(*f).and_then(Value::as_str))
        .collect::<Vec<_>>()
        .join(" — ");
    if joined.is_empty() {
        return None;
    }
    Some(truncate_chars(&joined, context_chars))
}

impl Database {
    fn scope_row_to_value(
        &self,
        scope: SearchScope,
        row: &rusqlite::Row,
    ) -> rusqlite::Result<Value> {
        let to_value = |v: std::result::Result<Value, serde_json::Error>| {
            v.map_err(|e| {
                rusqlite::Error::ToSqlConversionFailure(Box::new(e))
            })
        };
        match scope {
            SearchScope::Sessions => {
                to_value(serde_json::to_value(repo::sessions::row_to_session(row)?))
            }
            SearchScope::Changes => {
                to_value(serde_json::to_value(repo::changes::row_to_change(row)?))
            }
            SearchScope::Decisions => {
                to_value(serde_json::to_value(repo::decisions::row_to_decision(row)?))
            }
            SearchScope::Conventions => to_value(serde_json::to_value(
                repo::conventions::row_to_convention(row)?,
            )),
            SearchScope::Tasks => to_value(serde_json::to_value(repo::tasks::row_to_task(row)?)),
            SearchScope::FileNotes => to_value(serde_json::to_value(
                repo::file_notes::row_to_file_note(row)?,
            )),
            SearchScope::ScheduledEvents => {
                to_value(serde_json::to_value(crate::scheduler::row_to_event(row)?))
            }
        }
    }

    fn fts_scope_hits(
        &self,
        scope: SearchScope,
        escaped: &str,
        per_scope_limit: i64,
    ) -> Result<Vec<Hit>> {
        let sql = format!(
            "SELECT t.*, {fts}.rank AS fts_rank
             FROM {fts}
             JOIN {table} t ON t.rowid = {fts}.rowid
             WHERE {fts} MATCH ?1
             ORDER BY {fts}.rank ASC
             LIMIT ?2",
            fts = scope.fts_table(),
            table = scope.as_str(),
        );

        let conn = self.connection();
        let mut stmt = conn.prepare(&sql)?;
        let hits = stmt
            .query_map(rusqlite::params![escaped, per_scope_limit], |row| {
                let rank: f64 = row.get("fts_rank")?;
                let data = self.scope_row_to_value(scope, row)?;
                Ok(Hit { scope, rank, data })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(hits)
    }

    fn like_scope_hits(
        &self,
        scope: SearchScope,
        query: &str,
        per_scope_limit: i64,
    ) -> Result<Vec<Hit>> {
        let clauses = scope
            .like_columns()
            .iter()
            .map(|c| format!("{} LIKE ?1", c))
            .collect::<Vec<_>>()
            .join(" OR ");
        let sql = format!(
            "SELECT * FROM {} WHERE {} ORDER BY {} LIMIT ?2",
            scope.as_str(),
            clauses,
            scope.fallback_order(),
        );

        let pattern = format!("%{}%", query);
        let conn = self.connection();
        let mut stmt = conn.prepare(&sql)?;
        let hits = stmt
            .query_map(rusqlite::params![pattern, per_scope_limit], |row| {
                let data = self.scope_row_to_value(scope, row)?;
                Ok(Hit {
                    scope,
                    rank: 0.0,
                    data,
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(hits)
    }

    /// Ranked search across the requested scopes (default: all six core
    /// scopes). `context_chars > 0` attaches a snippet to each hit;
    /// `project_root` enables staleness enrichment on file-note hits.
    pub fn search(
        &self,
        query: &str,
        scopes: Option<Vec<SearchScope>>,
        limit: Option<i64>,
        context_chars: usize,
        project_root: Option<&Path>,
    ) -> Result<SearchResults> {
        let query = query.trim();
        if query.is_empty() {
            return Err(Error::Validation("query must not be empty".into()));
        }

        let limit = repo::clamp_limit(limit);
        let per_scope_limit = (2 * limit).min(repo::MAX_LIMIT);
        let scopes = scopes.unwrap_or_else(SearchScope::default_set);
        let use_fts = self.has_fts();
        let escaped = escape_fts_query(query);

        let mut pool: Vec<Hit> = Vec::new();
        for scope in scopes {
            let hits = if use_fts {
                self.fts_scope_hits(scope, &escaped, per_scope_limit)?
            } else {
                self.like_scope_hits(scope, query, per_scope_limit)?
            };
            pool.extend(hits);
        }

        // More negative rank = better match; ties keep scope order.
        pool.sort_by(|a, b| a.rank.partial_cmp(&b.rank).unwrap_or(std::cmp::Ordering::Equal));
        pool.truncate(limit as usize);

        let mut results: BTreeMap<String, Vec<Value>> = BTreeMap::new();
        let total = pool.len();
        for hit in pool {
            let mut data = hit.data;
            let snippet = (context_chars > 0)
                .then(|| snippet_for(hit.scope, &data, context_chars))
                .flatten();
            if let Value::Object(ref mut map) = data {
                map.insert("rank".to_string(), Value::from(hit.rank));
                if let Some(snippet) = snippet {
                    map.insert("snippet".to_string(), Value::String(snippet));
                }
            }
            if hit.scope == SearchScope::FileNotes {
                if let Some(root) = project_root {
                    let note = serde_json::from_value(data.clone()).ok();
                    if let (Some(note), Value::Object(ref mut map)) = (note, &mut data) {
                        let verdict = staleness::enrich(&note, root);
                        if let Ok(v) = serde_json::to_value(&verdict) {
                            map.insert("staleness".to_string(), v);
                        }
                    }
                }
            }
            results
                .entry(hit.scope.as_str().to_string())
                .or_default()
                .push(data);
        }

        Ok(SearchResults { total, results })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ChangeType, NewChange, NewDecision};
    use chrono::Utc;

    fn db() -> Database {
        let db = Database::open_in_memory().unwrap();
        db.migrate().unwrap();
        db
    }

    #[test]
    fn test_escape_neutralizes_grammar() {
        assert_eq!(escape_fts_query("wal mode"), "\"wal\" \"mode\"");
        assert_eq!(escape_fts_query("a OR b"), "\"a\" \"OR\" \"b\"");
        assert_eq!(escape_fts_query("he said \"hi\""), "\"he\" \"said\" \"\"\"hi\"\"\"");
    }

    #[test]
    fn test_cross_scope_rank_merge() {
        let db = db();
        let now = Utc::now();
        db.create_decision(
            &NewDecision {
                decision: "adopt the batching pipeline".to_string(),
                rationale: None,
                affected_files: vec![],
                tags: vec![],
                status: None,
                depends_on: vec![],
            },
            None,
            now,
        )
        .unwrap();
        db.record_changes(
            &[NewChange {
                file_path: "src/pipeline.rs".to_string(),
                change_type: ChangeType::Created,
                description: "introduce batching pipeline skeleton".to_string(),
                diff_summary: None,
                impact_scope: None,
            }],
            None,
            now,
        )
        .unwrap();

        let results = db.search("batching pipeline", None, None, 0, None).unwrap();
        assert_eq!(results.total, 2);
        assert!(results.results.contains_key("decisions"));
        assert!(results.results.contains_key("changes"));

        // Every hit carries its rank, and groups preserve ascending rank.
        for hits in results.results.values() {
            for hit in hits {
                assert!(hit.get("rank").is_some());
            }
        }
    }

    #[test]
    fn test_grammar_injection_is_inert() {
        let db = db();
        // Would be a syntax error if passed through unescaped.
        let results = db.search("NEAR( OR )", None, None, 0, None);
        assert!(results.is_ok());
    }

    #[test]
    fn test_snippet_attachment() {
        let db = db();
        let now = Utc::now();
        db.create_decision(
            &NewDecision {
                decision: "use a long description that should be truncated for snippets"
                    .to_string(),
                rationale: Some("rationale text here".to_string()),
                affected_files: vec![],
                tags: vec![],
                status: None,
                depends_on: vec![],
            },
            None,
            now,
        )
        .unwrap();

        let results = db.search("truncated snippets", None, None, 20, None).unwrap();
        let hit = &results.results["decisions"][0];
        let snippet = hit.get("snippet").unwrap().as_str().unwrap();
        assert!(snippet.chars().count() <= 20);
    }

    #[test]
    fn test_empty_query_rejected() {
        let db = db();
        assert!(matches!(
            db.search("  ", None, None, 0, None).unwrap_err(),
            Error::Validation(_)
        ));
    }

    #[test]
    fn test_scoped_search() {
        let db = db();
        let now = Utc::now();
        db.create_convention("naming", "modules use snake_case", &[], None, now)
            .unwrap();

        let results = db
            .search(
                "snake_case",
                Some(vec![SearchScope::Conventions]),
                None,
                0,
                None,
            )
            .unwrap();
        assert_eq!(results.total, 1);
        assert_eq!(results.results.len(), 1);
    }
}
