//! Database schema and migrations
//!
//! Migrations are an ordered, append-only list. The applied version lives in
//! the `schema_meta` table; each migration runs inside one transaction that
//! also bumps the recorded version, so a crash mid-upgrade leaves the file at
//! the previous version.

use rusqlite::{params, Connection, OptionalExtension};

use crate::error::Result;

/// One schema upgrade step. Versions are never reused.
pub struct Migration {
    pub version: i64,
    pub description: &'static str,
    pub up: fn(&Connection) -> rusqlite::Result<()>,
}

/// Current schema version
pub const SCHEMA_VERSION: i64 = 10;

const V1_BASELINE: &str = r#"
    CREATE TABLE IF NOT EXISTS schema_meta (
        key   TEXT PRIMARY KEY,
        value TEXT NOT NULL
    );

    CREATE TABLE IF NOT EXISTS sessions (
        id           INTEGER PRIMARY KEY AUTOINCREMENT,
        started_at   TEXT NOT NULL,
        ended_at     TEXT,
        summary      TEXT,
        agent_name   TEXT NOT NULL,
        project_root TEXT NOT NULL,
        tags         TEXT NOT NULL DEFAULT '[]'
    );

    CREATE INDEX IF NOT EXISTS idx_sessions_ended ON sessions(ended_at);

    CREATE TABLE IF NOT EXISTS changes (
        id           INTEGER PRIMARY KEY AUTOINCREMENT,
        session_id   INTEGER REFERENCES sessions(id),
        timestamp    TEXT NOT NULL,
        file_path    TEXT NOT NULL,
        change_type  TEXT NOT NULL,
        description  TEXT NOT NULL,
        diff_summary TEXT,
        impact_scope TEXT NOT NULL DEFAULT 'local'
    );

    CREATE INDEX IF NOT EXISTS idx_changes_file ON changes(file_path);
    CREATE INDEX IF NOT EXISTS idx_changes_session ON changes(session_id);
    CREATE INDEX IF NOT EXISTS idx_changes_timestamp ON changes(timestamp);

    CREATE TABLE IF NOT EXISTS decisions (
        id             INTEGER PRIMARY KEY AUTOINCREMENT,
        session_id     INTEGER REFERENCES sessions(id),
        timestamp      TEXT NOT NULL,
        decision       TEXT NOT NULL,
        rationale      TEXT,
        affected_files TEXT NOT NULL DEFAULT '[]',
        tags           TEXT NOT NULL DEFAULT '[]',
        status         TEXT NOT NULL DEFAULT 'active',
        superseded_by  INTEGER REFERENCES decisions(id)
    );

    CREATE INDEX IF NOT EXISTS idx_decisions_status ON decisions(status);

    CREATE TABLE IF NOT EXISTS conventions (
        id         INTEGER PRIMARY KEY AUTOINCREMENT,
        session_id INTEGER REFERENCES sessions(id),
        timestamp  TEXT NOT NULL,
        category   TEXT NOT NULL,
        rule       TEXT NOT NULL,
        examples   TEXT NOT NULL DEFAULT '[]',
        enforced   INTEGER NOT NULL DEFAULT 1
    );

    CREATE INDEX IF NOT EXISTS idx_conventions_category ON conventions(category);

    CREATE TABLE IF NOT EXISTS tasks (
        id             INTEGER PRIMARY KEY AUTOINCREMENT,
        session_id     INTEGER REFERENCES sessions(id),
        created_at     TEXT NOT NULL,
        updated_at     TEXT NOT NULL,
        title          TEXT NOT NULL,
        description    TEXT,
        status         TEXT NOT NULL DEFAULT 'backlog',
        priority       TEXT NOT NULL DEFAULT 'medium',
        assigned_files TEXT NOT NULL DEFAULT '[]',
        tags           TEXT NOT NULL DEFAULT '[]',
        completed_at   TEXT,
        blocked_by     TEXT NOT NULL DEFAULT '[]'
    );

    CREATE INDEX IF NOT EXISTS idx_tasks_status ON tasks(status);

    CREATE TABLE IF NOT EXISTS file_notes (
        file_path             TEXT PRIMARY KEY,
        purpose               TEXT,
        dependencies          TEXT NOT NULL DEFAULT '[]',
        dependents            TEXT NOT NULL DEFAULT '[]',
        layer                 TEXT,
        last_reviewed         TEXT NOT NULL,
        last_modified_session INTEGER,
        notes                 TEXT,
        complexity            TEXT,
        content_hash          TEXT,
        executive_summary     TEXT
    );

    CREATE TABLE IF NOT EXISTS milestones (
        id          INTEGER PRIMARY KEY AUTOINCREMENT,
        session_id  INTEGER REFERENCES sessions(id),
        timestamp   TEXT NOT NULL,
        title       TEXT NOT NULL,
        description TEXT,
        version     TEXT,
        tags        TEXT NOT NULL DEFAULT '[]'
    );

    CREATE TABLE IF NOT EXISTS checkpoints (
        id                    INTEGER PRIMARY KEY AUTOINCREMENT,
        session_id            INTEGER UNIQUE REFERENCES sessions(id),
        agent_name            TEXT,
        created_at            TEXT NOT NULL,
        current_understanding TEXT NOT NULL,
        progress              TEXT NOT NULL,
        relevant_files        TEXT NOT NULL DEFAULT '[]'
    );

    CREATE TABLE IF NOT EXISTS snapshot_cache (
        key         TEXT PRIMARY KEY,
        value       TEXT NOT NULL,
        updated_at  TEXT NOT NULL,
        ttl_minutes INTEGER NOT NULL DEFAULT 5
    );

    CREATE TABLE IF NOT EXISTS knowledge (
        id         INTEGER PRIMARY KEY AUTOINCREMENT,
        session_id INTEGER REFERENCES sessions(id),
        created_at TEXT NOT NULL,
        topic      TEXT NOT NULL,
        content    TEXT NOT NULL,
        tags       TEXT NOT NULL DEFAULT '[]'
    );
"#;

const V2_FTS: &str = r#"
    CREATE VIRTUAL TABLE IF NOT EXISTS sessions_fts USING fts5(
        summary, tags, agent_name,
        content='sessions', content_rowid='id'
    );

    CREATE TRIGGER IF NOT EXISTS sessions_ai AFTER INSERT ON sessions BEGIN
        INSERT INTO sessions_fts(rowid, summary, tags, agent_name)
        VALUES (NEW.id, NEW.summary, NEW.tags, NEW.agent_name);
    END;

    CREATE TRIGGER IF NOT EXISTS sessions_ad AFTER DELETE ON sessions BEGIN
        INSERT INTO sessions_fts(sessions_fts, rowid, summary, tags, agent_name)
        VALUES ('delete', OLD.id, OLD.summary, OLD.tags, OLD.agent_name);
    END;

    CREATE TRIGGER IF NOT EXISTS sessions_au AFTER UPDATE ON sessions BEGIN
        INSERT INTO sessions_fts(sessions_fts, rowid, summary, tags, agent_name)
        VALUES ('delete', OLD.id, OLD.summary, OLD.tags, OLD.agent_name);
        INSERT INTO sessions_fts(rowid, summary, tags, agent_name)
        VALUES (NEW.id, NEW.summary, NEW.tags, NEW.agent_name);
    END;

    CREATE VIRTUAL TABLE IF NOT EXISTS changes_fts USING fts5(
        file_path, description, diff_summary,
        content='changes', content_rowid='id'
    );

    CREATE TRIGGER IF NOT EXISTS changes_ai AFTER INSERT ON changes BEGIN
        INSERT INTO changes_fts(rowid, file_path, description, diff_summary)
        VALUES (NEW.id, NEW.file_path, NEW.description, NEW.diff_summary);
    END;

    CREATE TRIGGER IF NOT EXISTS changes_ad AFTER DELETE ON changes BEGIN
        INSERT INTO changes_fts(changes_fts, rowid, file_path, description, diff_summary)
        VALUES ('delete', OLD.id, OLD.file_path, OLD.description, OLD.diff_summary);
    END;

    CREATE TRIGGER IF NOT EXISTS changes_au AFTER UPDATE ON changes BEGIN
        INSERT INTO changes_fts(changes_fts, rowid, file_path, description, diff_summary)
        VALUES ('delete', OLD.id, OLD.file_path, OLD.description, OLD.diff_summary);
        INSERT INTO changes_fts(rowid, file_path, description, diff_summary)
        VALUES (NEW.id, NEW.file_path, NEW.description, NEW.diff_summary);
    END;

    CREATE VIRTUAL TABLE IF NOT EXISTS decisions_fts USING fts5(
        decision, rationale, tags,
        content='decisions', content_rowid='id'
    );

    CREATE TRIGGER IF NOT EXISTS decisions_ai AFTER INSERT ON decisions BEGIN
        INSERT INTO decisions_fts(rowid, decision, rationale, tags)
        VALUES (NEW.id, NEW.decision, NEW.rationale, NEW.tags);
    END;

    CREATE TRIGGER IF NOT EXISTS decisions_ad AFTER DELETE ON decisions BEGIN
        INSERT INTO decisions_fts(decisions_fts, rowid, decision, rationale, tags)
        VALUES ('delete', OLD.id, OLD.decision, OLD.rationale, OLD.tags);
    END;

    CREATE TRIGGER IF NOT EXISTS decisions_au AFTER UPDATE ON decisions BEGIN
        INSERT INTO decisions_fts(decisions_fts, rowid, decision, rationale, tags)
        VALUES ('delete', OLD.id, OLD.decision, OLD.rationale, OLD.tags);
        INSERT INTO decisions_fts(rowid, decision, rationale, tags)
        VALUES (NEW.id, NEW.decision, NEW.rationale, NEW.tags);
    END;

    CREATE VIRTUAL TABLE IF NOT EXISTS conventions_fts USING fts5(
        category, rule,
        content='conventions', content_rowid='id'
    );

    CREATE TRIGGER IF NOT EXISTS conventions_ai AFTER INSERT ON conventions BEGIN
        INSERT INTO conventions_fts(rowid, category, rule)
        VALUES (NEW.id, NEW.category, NEW.rule);
    END;

    CREATE TRIGGER IF NOT EXISTS conventions_ad AFTER DELETE ON conventions BEGIN
        INSERT INTO conventions_fts(conventions_fts, rowid, category, rule)
        VALUES ('delete', OLD.id, OLD.category, OLD.rule);
    END;

    CREATE TRIGGER IF NOT EXISTS conventions_au AFTER UPDATE ON conventions BEGIN
        INSERT INTO conventions_fts(conventions_fts, rowid, category, rule)
        VALUES ('delete', OLD.id, OLD.category, OLD.rule);
        INSERT INTO conventions_fts(rowid, category, rule)
        VALUES (NEW.id, NEW.category, NEW.rule);
    END;

    CREATE VIRTUAL TABLE IF NOT EXISTS tasks_fts USING fts5(
        title, description, tags,
        content='tasks', content_rowid='id'
    );

    CREATE TRIGGER IF NOT EXISTS tasks_ai AFTER INSERT ON tasks BEGIN
        INSERT INTO tasks_fts(rowid, title, description, tags)
        VALUES (NEW.id, NEW.title, NEW.description, NEW.tags);
    END;

    CREATE TRIGGER IF NOT EXISTS tasks_ad AFTER DELETE ON tasks BEGIN
        INSERT INTO tasks_fts(tasks_fts, rowid, title, description, tags)
        VALUES ('delete', OLD.id, OLD.title, OLD.description, OLD.tags);
    END;

    CREATE TRIGGER IF NOT EXISTS tasks_au AFTER UPDATE ON tasks BEGIN
        INSERT INTO tasks_fts(tasks_fts, rowid, title, description, tags)
        VALUES ('delete', OLD.id, OLD.title, OLD.description, OLD.tags);
        INSERT INTO tasks_fts(rowid, title, description, tags)
        VALUES (NEW.id, NEW.title, NEW.description, NEW.tags);
    END;

    CREATE VIRTUAL TABLE IF NOT EXISTS file_notes_fts USING fts5(
        file_path, purpose, notes, executive_summary,
        content='file_notes'
    );

    CREATE TRIGGER IF NOT EXISTS file_notes_ai AFTER INSERT ON file_notes BEGIN
        INSERT INTO file_notes_fts(rowid, file_path, purpose, notes, executive_summary)
        VALUES (NEW.rowid, NEW.file_path, NEW.purpose, NEW.notes, NEW.executive_summary);
    END;

    CREATE TRIGGER IF NOT EXISTS file_notes_ad AFTER DELETE ON file_notes BEGIN
        INSERT INTO file_notes_fts(file_notes_fts, rowid, file_path, purpose, notes, executive_summary)
        VALUES ('delete', OLD.rowid, OLD.file_path, OLD.purpose, OLD.notes, OLD.executive_summary);
    END;

    CREATE TRIGGER IF NOT EXISTS file_notes_au AFTER UPDATE ON file_notes BEGIN
        INSERT INTO file_notes_fts(file_notes_fts, rowid, file_path, purpose, notes, executive_summary)
        VALUES ('delete', OLD.rowid, OLD.file_path, OLD.purpose, OLD.notes, OLD.executive_summary);
        INSERT INTO file_notes_fts(rowid, file_path, purpose, notes, executive_summary)
        VALUES (NEW.rowid, NEW.file_path, NEW.purpose, NEW.notes, NEW.executive_summary);
    END;
"#;

const V3_CONFIG: &str = r#"
    CREATE TABLE IF NOT EXISTS config (
        key        TEXT PRIMARY KEY,
        value      TEXT NOT NULL,
        updated_at TEXT NOT NULL
    );

    INSERT OR IGNORE INTO config (key, value, updated_at) VALUES
        ('auto_compact', 'true', strftime('%Y-%m-%dT%H:%M:%fZ', 'now')),
        ('compact_threshold', '50', strftime('%Y-%m-%dT%H:%M:%fZ', 'now')),
        ('retention_days', '90', strftime('%Y-%m-%dT%H:%M:%fZ', 'now')),
        ('max_backups', '10', strftime('%Y-%m-%dT%H:%M:%fZ', 'now'));

    CREATE INDEX IF NOT EXISTS idx_changes_session_ts ON changes(session_id, timestamp);
    CREATE INDEX IF NOT EXISTS idx_decisions_session ON decisions(session_id);
    CREATE INDEX IF NOT EXISTS idx_tasks_status_priority ON tasks(status, priority);
"#;

const V4_SCHEDULED_EVENTS: &str = r#"
    CREATE TABLE IF NOT EXISTS scheduled_events (
        id                INTEGER PRIMARY KEY AUTOINCREMENT,
        session_id        INTEGER REFERENCES sessions(id),
        created_at        TEXT NOT NULL,
        title             TEXT NOT NULL,
        description       TEXT,
        trigger_type      TEXT NOT NULL,
        trigger_value     TEXT,
        status            TEXT NOT NULL DEFAULT 'pending',
        triggered_at      TEXT,
        acknowledged_at   TEXT,
        requires_approval INTEGER NOT NULL DEFAULT 0,
        action_summary    TEXT,
        action_data       TEXT,
        priority          TEXT NOT NULL DEFAULT 'medium',
        tags              TEXT NOT NULL DEFAULT '[]',
        recurrence        TEXT
    );

    CREATE INDEX IF NOT EXISTS idx_events_status ON scheduled_events(status);
    CREATE INDEX IF NOT EXISTS idx_events_trigger ON scheduled_events(trigger_type, status);

    CREATE VIRTUAL TABLE IF NOT EXISTS scheduled_events_fts USING fts5(
        title, description, tags,
        content='scheduled_events', content_rowid='id'
    );

    CREATE TRIGGER IF NOT EXISTS scheduled_events_ai AFTER INSERT ON scheduled_events BEGIN
        INSERT INTO scheduled_events_fts(rowid, title, description, tags)
        VALUES (NEW.id, NEW.title, NEW.description, NEW.tags);
    END;

    CREATE TRIGGER IF NOT EXISTS scheduled_events_ad AFTER DELETE ON scheduled_events BEGIN
        INSERT INTO scheduled_events_fts(scheduled_events_fts, rowid, title, description, tags)
        VALUES ('delete', OLD.id, OLD.title, OLD.description, OLD.tags);
    END;

    CREATE TRIGGER IF NOT EXISTS scheduled_events_au AFTER UPDATE ON scheduled_events BEGIN
        INSERT INTO scheduled_events_fts(scheduled_events_fts, rowid, title, description, tags)
        VALUES ('delete', OLD.id, OLD.title, OLD.description, OLD.tags);
        INSERT INTO scheduled_events_fts(rowid, title, description, tags)
        VALUES (NEW.id, NEW.title, NEW.description, NEW.tags);
    END;
"#;

const V5_FILE_MTIME: &str = r#"
    ALTER TABLE file_notes ADD COLUMN file_mtime INTEGER;

    CREATE INDEX IF NOT EXISTS idx_tasks_focused
        ON tasks(status, priority, updated_at)
        WHERE status IN ('in_progress', 'review', 'blocked');
"#;

const V6_AGENTS: &str = r#"
    CREATE TABLE IF NOT EXISTS agents (
        id              TEXT PRIMARY KEY,
        name            TEXT NOT NULL,
        last_seen       INTEGER NOT NULL,
        current_task_id INTEGER,
        status          TEXT NOT NULL DEFAULT 'idle',
        specializations TEXT NOT NULL DEFAULT '[]'
    );

    CREATE TABLE IF NOT EXISTS broadcasts (
        id           INTEGER PRIMARY KEY AUTOINCREMENT,
        from_agent   TEXT NOT NULL,
        message      TEXT NOT NULL,
        created_at   INTEGER NOT NULL,
        expires_at   INTEGER,
        read_by      TEXT NOT NULL DEFAULT '[]',
        target_agent TEXT
    );

    CREATE INDEX IF NOT EXISTS idx_broadcasts_created ON broadcasts(created_at);

    ALTER TABLE tasks ADD COLUMN claimed_by TEXT;
    ALTER TABLE tasks ADD COLUMN claimed_at INTEGER;

    CREATE INDEX IF NOT EXISTS idx_tasks_claimed ON tasks(claimed_by);
"#;

const V7_LOCKS_PENDING_WORK: &str = r#"
    CREATE TABLE IF NOT EXISTS file_locks (
        file_path  TEXT PRIMARY KEY,
        agent_id   TEXT NOT NULL,
        reason     TEXT,
        locked_at  INTEGER NOT NULL,
        expires_at INTEGER NOT NULL
    );

    CREATE TABLE IF NOT EXISTS pending_work (
        id          INTEGER PRIMARY KEY AUTOINCREMENT,
        agent_id    TEXT NOT NULL,
        session_id  INTEGER REFERENCES sessions(id),
        description TEXT NOT NULL,
        files       TEXT NOT NULL DEFAULT '[]',
        started_at  INTEGER NOT NULL,
        status      TEXT NOT NULL DEFAULT 'pending'
    );

    CREATE INDEX IF NOT EXISTS idx_pending_work_status ON pending_work(status);
"#;

const V8_SESSION_BYTES: &str = r#"
    CREATE TABLE IF NOT EXISTS session_bytes (
        session_id   INTEGER PRIMARY KEY REFERENCES sessions(id),
        input_bytes  INTEGER NOT NULL DEFAULT 0,
        output_bytes INTEGER NOT NULL DEFAULT 0,
        tool_calls   INTEGER NOT NULL DEFAULT 0,
        updated_at   TEXT NOT NULL
    );

    INSERT OR IGNORE INTO config (key, value, updated_at) VALUES
        ('context_pressure_notice_pct', '50', strftime('%Y-%m-%dT%H:%M:%fZ', 'now')),
        ('context_pressure_warning_pct', '70', strftime('%Y-%m-%dT%H:%M:%fZ', 'now')),
        ('context_pressure_urgent_pct', '85', strftime('%Y-%m-%dT%H:%M:%fZ', 'now')),
        ('context_window_size', '200000', strftime('%Y-%m-%dT%H:%M:%fZ', 'now'));
"#;

const V9_BRANCH_DEPENDS: &str = r#"
    ALTER TABLE file_notes ADD COLUMN git_branch TEXT;
    ALTER TABLE decisions ADD COLUMN depends_on TEXT NOT NULL DEFAULT '[]';
"#;

const V10_HANDOFFS: &str = r#"
    CREATE TABLE IF NOT EXISTS handoffs (
        id           INTEGER PRIMARY KEY AUTOINCREMENT,
        session_id   INTEGER REFERENCES sessions(id),
        agent_name   TEXT,
        created_at   TEXT NOT NULL,
        reason       TEXT NOT NULL,
        summary      TEXT,
        acknowledged INTEGER NOT NULL DEFAULT 0
    );

    CREATE INDEX IF NOT EXISTS idx_handoffs_ack ON handoffs(acknowledged);
"#;

fn v1(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(V1_BASELINE)
}

fn v2(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(V2_FTS)
}

fn v3(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(V3_CONFIG)
}

fn v4(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(V4_SCHEDULED_EVENTS)
}

fn v5(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(V5_FILE_MTIME)
}

fn v6(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(V6_AGENTS)
}

fn v7(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(V7_LOCKS_PENDING_WORK)
}

fn v8(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(V8_SESSION_BYTES)
}

fn v9(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(V9_BRANCH_DEPENDS)
}

fn v10(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(V10_HANDOFFS)
}

/// Ordered migration list. Append only.
pub const MIGRATIONS: &[Migration] = &[
    Migration { version: 1, description: "baseline tables", up: v1 },
    Migration { version: 2, description: "full-text indexes and sync triggers", up: v2 },
    Migration { version: 3, description: "config table and composite indexes", up: v3 },
    Migration { version: 4, description: "scheduled events", up: v4 },
    Migration { version: 5, description: "file mtime staleness and focused task index", up: v5 },
    Migration { version: 6, description: "agents, broadcasts, task claims", up: v6 },
    Migration { version: 7, description: "file locks and pending work", up: v7 },
    Migration { version: 8, description: "session byte accounting", up: v8 },
    Migration { version: 9, description: "git branch tracking and decision dependencies", up: v9 },
    Migration { version: 10, description: "handoffs", up: v10 },
];

/// Get the applied schema version, 0 for a fresh database.
pub fn schema_version(conn: &Connection) -> Result<i64> {
    let have_meta: i64 = conn.query_row(
        "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = 'schema_meta'",
        [],
        |r| r.get(0),
    )?;
    if have_meta == 0 {
        return Ok(0);
    }

    let version: Option<String> = conn
        .query_row("SELECT value FROM schema_meta WHERE key = 'version'", [], |r| r.get(0))
        .optional()?;

    Ok(version.and_then(|v| v.parse().ok()).unwrap_or(0))
}

/// Run all pending migrations
pub fn run_migrations(conn: &mut Connection) -> Result<()> {
    let current = schema_version(conn)?;

    tracing::info!(
        current_version = current,
        target_version = SCHEMA_VERSION,
        "Checking database migrations"
    );

    for migration in MIGRATIONS {
        if migration.version <= current {
            continue;
        }
        tracing::info!(
            version = migration.version,
            description = migration.description,
            "Running migration"
        );
        let tx = conn.transaction()?;
        (migration.up)(&tx)?;
        tx.execute(
            "INSERT INTO schema_meta (key, value) VALUES ('version', ?1)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value",
            params![migration.version.to_string()],
        )?;
        tx.commit()?;
    }

    if current < SCHEMA_VERSION {
        tracing::info!(from = current, to = SCHEMA_VERSION, "Migrations complete");
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn migrated() -> Connection {
        let mut conn = Connection::open_in_memory().unwrap();
        run_migrations(&mut conn).unwrap();
        conn
    }

    #[test]
    fn test_migrations_idempotent() {
        let mut conn = Connection::open_in_memory().unwrap();

        run_migrations(&mut conn).unwrap();
        run_migrations(&mut conn).unwrap();

        assert_eq!(schema_version(&conn).unwrap(), SCHEMA_VERSION);
    }

    #[test]
    fn test_versions_strictly_increasing() {
        let mut prev = 0;
        for m in MIGRATIONS {
            assert!(m.version > prev, "version {} out of order", m.version);
            prev = m.version;
        }
        assert_eq!(prev, SCHEMA_VERSION);
    }

    #[test]
    fn test_tables_created() {
        let conn = migrated();

        let tables = [
            "schema_meta",
            "sessions",
            "changes",
            "decisions",
            "conventions",
            "tasks",
            "file_notes",
            "milestones",
            "checkpoints",
            "snapshot_cache",
            "knowledge",
            "config",
            "scheduled_events",
            "agents",
            "broadcasts",
            "file_locks",
            "pending_work",
            "session_bytes",
            "handoffs",
        ];

        for table in tables {
            let exists: i64 = conn
                .query_row(
                    "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = ?",
                    [table],
                    |r| r.get(0),
                )
                .unwrap();
            assert_eq!(exists, 1, "Table {} should exist", table);
        }
    }

    #[test]
    fn test_fts_tables_created() {
        let conn = migrated();
        for table in [
            "sessions_fts",
            "changes_fts",
            "decisions_fts",
            "conventions_fts",
            "tasks_fts",
            "file_notes_fts",
            "scheduled_events_fts",
        ] {
            let exists: i64 = conn
                .query_row(
                    "SELECT COUNT(*) FROM sqlite_master WHERE name = ?",
                    [table],
                    |r| r.get(0),
                )
                .unwrap();
            assert_eq!(exists, 1, "FTS table {} should exist", table);
        }
    }

    #[test]
    fn test_config_defaults_seeded() {
        let conn = migrated();
        let threshold: String = conn
            .query_row(
                "SELECT value FROM config WHERE key = 'compact_threshold'",
                [],
                |r| r.get(0),
            )
            .unwrap();
        assert_eq!(threshold, "50");

        let urgent: String = conn
            .query_row(
                "SELECT value FROM config WHERE key = 'context_pressure_urgent_pct'",
                [],
                |r| r.get(0),
            )
            .unwrap();
        assert_eq!(urgent, "85");
    }

    #[test]
    fn test_fts_triggers_sync() {
        let conn = migrated();
        conn.execute(
            "INSERT INTO decisions (timestamp, decision) VALUES ('2026-01-01T00:00:00Z', 'use write-ahead logging')",
            [],
        )
        .unwrap();

        let hits: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM decisions_fts WHERE decisions_fts MATCH 'logging'",
                [],
                |r| r.get(0),
            )
            .unwrap();
        assert_eq!(hits, 1);

        conn.execute("DELETE FROM decisions", []).unwrap();
        let hits: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM decisions_fts WHERE decisions_fts MATCH 'logging'",
                [],
                |r| r.get(0),
            )
            .unwrap();
        assert_eq!(hits, 0);
    }
}
