//! Task repository
//!
//! Invariants enforced here: a terminal status (done/cancelled) always sets
//! `completed_at` and clears any claim; leaving a terminal status clears
//! `completed_at`. Claim/release themselves live in the coordination layer.

use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension, Row};

use crate::db::Database;
use crate::error::{Error, Result};
use crate::types::{Priority, Task, TaskPatch, TaskStatus};
use crate::util::{
    decode_id_array, decode_str_array, encode_id_array, encode_str_array, normalize_path,
    parse_ts, parse_ts_opt,
};

pub(crate) fn row_to_task(row: &Row) -> rusqlite::Result<Task> {
    let created_at: String = row.get("created_at")?;
    let updated_at: String = row.get("updated_at")?;
    let completed_at: Option<String> = row.get("completed_at")?;
    let status: String = row.get("status")?;
    let priority: String = row.get("priority")?;
    let assigned_files: String = row.get("assigned_files")?;
    let tags: String = row.get("tags")?;
    let blocked_by: String = row.get("blocked_by")?;

    Ok(Task {
        id: row.get("id")?,
        session_id: row.get("session_id")?,
        created_at: parse_ts(&created_at),
        updated_at: parse_ts(&updated_at),
        title: row.get("title")?,
        description: row.get("description")?,
        status: status.parse().unwrap_or(TaskStatus::Backlog),
        priority: priority.parse().unwrap_or(Priority::Medium),
        assigned_files: decode_str_array(&assigned_files),
        tags: decode_str_array(&tags),
        completed_at: parse_ts_opt(completed_at),
        blocked_by: decode_id_array(&blocked_by),
        claimed_by: row.get("claimed_by")?,
        claimed_at: row.get("claimed_at")?,
    })
}

impl Database {
    /// Create a task and return its id.
    #[allow(clippy::too_many_arguments)]
    pub fn create_task(
        &self,
        title: &str,
        description: Option<&str>,
        priority: Option<Priority>,
        assigned_files: &[String],
        tags: &[String],
        blocked_by: &[i64],
        session_id: Option<i64>,
        now: DateTime<Utc>,
    ) -> Result<i64> {
        let files: Vec<String> = assigned_files.iter().map(|f| normalize_path(f)).collect();
        let conn = self.connection();
        conn.execute(
            "INSERT INTO tasks
                 (session_id, created_at, updated_at, title, description, priority,
                  assigned_files, tags, blocked_by)
             VALUES (?1, ?2, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                session_id,
                now.to_rfc3339(),
                title,
                description,
                priority.unwrap_or(Priority::Medium).as_str(),
                encode_str_array(&files),
                encode_str_array(tags),
                encode_id_array(blocked_by),
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    /// Get a task by id.
    pub fn get_task(&self, id: i64) -> Result<Option<Task>> {
        let conn = self.connection();
        conn.query_row("SELECT * FROM tasks WHERE id = ?", [id], row_to_task)
            .optional()
            .map_err(Error::from)
    }

    /// Apply a partial update. Returns the updated task and whether this
    /// update moved the task into `done` (so callers can fire
    /// task-complete triggers).
    pub fn update_task(
        &self,
        id: i64,
        patch: &TaskPatch,
        now: DateTime<Utc>,
    ) -> Result<(Task, bool)> {
        let mut conn = self.connection();
        let tx = conn.transaction()?;

        let before = tx
            .query_row("SELECT * FROM tasks WHERE id = ?", [id], row_to_task)
            .optional()?
            .ok_or_else(|| Error::not_found("task", id))?;

        let files = patch
            .assigned_files
            .as_ref()
            .map(|fs| fs.iter().map(|f| normalize_path(f)).collect::<Vec<_>>());

        tx.execute(
            "UPDATE tasks SET
                 updated_at = ?1,
                 title = COALESCE(?2, title),
                 description = COALESCE(?3, description),
                 status = COALESCE(?4, status),
                 priority = COALESCE(?5, priority),
                 assigned_files = COALESCE(?6, assigned_files),
                 tags = COALESCE(?7, tags),
                 blocked_by = COALESCE(?8, blocked_by)
             WHERE id = ?9",
            params![
                now.to_rfc3339(),
                patch.title,
                patch.description,
                patch.status.map(|s| s.as_str()),
                patch.priority.map(|p| p.as_str()),
                files.as_deref().map(encode_str_array),
                patch.tags.as_deref().map(encode_str_array),
                patch.blocked_by.as_deref().map(encode_id_array),
                id,
            ],
        )?;

        let status = patch.status.unwrap_or(before.status);
        if status.is_terminal() {
            // Terminal status: stamp completion, clear any claim.
            tx.execute(
                "UPDATE tasks SET
                     completed_at = COALESCE(completed_at, ?1),
                     claimed_by = NULL,
                     claimed_at = NULL
                 WHERE id = ?2",
                params![now.to_rfc3339(), id],
            )?;
        } else {
            tx.execute("UPDATE tasks SET completed_at = NULL WHERE id = ?1", [id])?;
        }

        let after = tx
            .query_row("SELECT * FROM tasks WHERE id = ?", [id], row_to_task)
            .optional()?
            .ok_or_else(|| Error::not_found("task", id))?;
        tx.commit()?;

        let became_done = after.status == TaskStatus::Done && before.status != TaskStatus::Done;
        Ok((after, became_done))
    }

    /// Tasks filtered by status / priority / claimant, most recently
    /// updated first.
    pub fn tasks_filtered(
        &self,
        status: Option<TaskStatus>,
        priority: Option<Priority>,
        claimed_by: Option<&str>,
        limit: Option<i64>,
    ) -> Result<Vec<Task>> {
        let limit = super::clamp_limit(limit);
        let conn = self.connection();

        let mut sql = String::from("SELECT * FROM tasks WHERE 1=1");
        let mut bind: Vec<Box<dyn rusqlite::ToSql>> = vec![];
        if let Some(status) = status {
            sql.push_str(" AND status = ?");
            bind.push(Box::new(status.as_str().to_string()));
        }
        if let Some(priority) = priority {
            sql.push_str(" AND priority = ?");
            bind.push(Box::new(priority.as_str().to_string()));
        }
        if let Some(agent) = claimed_by {
            sql.push_str(" AND claimed_by = ?");
            bind.push(Box::new(agent.to_string()));
        }
        sql.push_str(" ORDER BY updated_at DESC, id DESC LIMIT ?");
        bind.push(Box::new(limit));

        let bind_refs: Vec<&dyn rusqlite::ToSql> = bind.iter().map(|b| b.as_ref()).collect();
        let mut stmt = conn.prepare(&sql)?;
        let tasks = stmt
            .query_map(bind_refs.as_slice(), row_to_task)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(tasks)
    }

    /// Count tasks by status, for stats.
    pub fn task_count_by_status(&self) -> Result<Vec<(String, i64)>> {
        let conn = self.connection();
        let mut stmt =
            conn.prepare("SELECT status, COUNT(*) FROM tasks GROUP BY status ORDER BY status")?;
        let rows = stmt
            .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
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

    fn simple_task(db: &Database, title: &str) -> i64 {
        db.create_task(title, None, None, &[], &[], &[], None, Utc::now())
            .unwrap()
    }

    #[test]
    fn test_create_defaults() {
        let db = db();
        let id = simple_task(&db, "first");
        let task = db.get_task(id).unwrap().unwrap();
        assert_eq!(task.status, TaskStatus::Backlog);
        assert_eq!(task.priority, Priority::Medium);
        assert!(task.completed_at.is_none());
        assert!(task.claimed_by.is_none());
    }

    #[test]
    fn test_done_sets_completed_and_clears_claim() {
        let db = db();
        let id = simple_task(&db, "t");
        // Claim directly, then finish the task.
        db.connection()
            .execute(
                "UPDATE tasks SET claimed_by = 'agent-1', claimed_at = 1 WHERE id = ?1",
                [id],
            )
            .unwrap();

        let patch = TaskPatch {
            status: Some(TaskStatus::Done),
            ..Default::default()
        };
        let (task, became_done) = db.update_task(id, &patch, Utc::now()).unwrap();
        assert!(became_done);
        assert!(task.completed_at.is_some());
        assert!(task.claimed_by.is_none());
        assert!(task.claimed_at.is_none());

        // Reopening clears completed_at.
        let patch = TaskPatch {
            status: Some(TaskStatus::InProgress),
            ..Default::default()
        };
        let (task, became_done) = db.update_task(id, &patch, Utc::now()).unwrap();
        assert!(!became_done);
        assert!(task.completed_at.is_none());
    }

    #[test]
    fn test_update_preserves_omitted_fields() {
        let db = db();
        let id = db
            .create_task(
                "titled",
                Some("desc"),
                Some(Priority::High),
                &[],
                &[],
                &[],
                None,
                Utc::now(),
            )
            .unwrap();

        let patch = TaskPatch {
            priority: Some(Priority::Low),
            ..Default::default()
        };
        let (task, _) = db.update_task(id, &patch, Utc::now()).unwrap();
        assert_eq!(task.title, "titled");
        assert_eq!(task.description.as_deref(), Some("desc"));
        assert_eq!(task.priority, Priority::Low);
    }

    #[test]
    fn test_filters() {
        let db = db();
        let a = simple_task(&db, "a");
        simple_task(&db, "b");
        let patch = TaskPatch {
            status: Some(TaskStatus::InProgress),
            ..Default::default()
        };
        db.update_task(a, &patch, Utc::now()).unwrap();

        let in_progress = db
            .tasks_filtered(Some(TaskStatus::InProgress), None, None, None)
            .unwrap();
        assert_eq!(in_progress.len(), 1);
        assert_eq!(in_progress[0].title, "a");

        let counts = db.task_count_by_status().unwrap();
        assert!(counts.contains(&("backlog".to_string(), 1)));
        assert!(counts.contains(&("in_progress".to_string(), 1)));
    }

    #[test]
    fn test_update_missing_task() {
        let db = db();
        let err = db
            .update_task(42, &TaskPatch::default(), Utc::now())
            .unwrap_err();
        assert!(matches!(err, Error::NotFound { .. }));
    }
}
