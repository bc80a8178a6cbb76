//! Integration tests for the engram memory server
//!
//! These drive the full dispatcher surface against real database files in
//! temporary directories, end to end: session lifecycle, change recording,
//! supersede chains, concurrent claims, scheduled events, staleness, and
//! context pressure.

use std::sync::Arc;

use engram_core::db::schema::SCHEMA_VERSION;
use engram_core::{Database, ServerContext, ServerOptions};
use serde_json::{json, Value};
use tempfile::TempDir;

fn file_ctx(dir: &TempDir) -> ServerContext {
    let options = ServerOptions::new(dir.path());
    let db = Database::open(&options.database_path()).unwrap();
    db.migrate().unwrap();
    ServerContext::new(db, options)
}

fn call(ctx: &ServerContext, method: &str, params: Value) -> Value {
    let resp = ctx.handle(method, &params);
    assert!(
        !resp.is_error(),
        "{} failed: {}",
        method,
        resp.text_payload()
    );
    serde_json::from_str(resp.text_payload()).unwrap()
}

fn memory(ctx: &ServerContext, action: &str, mut params: Value) -> Value {
    params
        .as_object_mut()
        .unwrap()
        .insert("action".to_string(), json!(action));
    call(ctx, "memory", params)
}

// ============================================
// Session lifecycle
// ============================================

#[test]
fn test_session_context_flow() {
    let dir = TempDir::new().unwrap();
    let ctx = file_ctx(&dir);

    // Scenario: A works, ends; B starts and sees A's context.
    let a = call(&ctx, "start_session", json!({"agent_name": "A"}));
    assert_eq!(a["session_id"], 1);

    memory(
        &ctx,
        "record_change",
        json!({"changes": [
            {"file_path": "src/x.ts", "change_type": "created", "description": "init"},
        ]}),
    );
    call(&ctx, "end_session", json!({"summary": "done"}));

    let b = call(&ctx, "start_session", json!({"agent_name": "B"}));
    assert_eq!(b["previous_session"]["id"], 1);
    assert_eq!(b["previous_session"]["summary"], "done");
    assert_eq!(b["changes_since_last"]["count"], 1);
    assert_eq!(
        b["changes_since_last"]["recent"][0]["file_path"],
        "src/x.ts"
    );
}

#[test]
fn test_at_most_one_open_session() {
    let dir = TempDir::new().unwrap();
    let ctx = file_ctx(&dir);

    call(&ctx, "start_session", json!({"agent_name": "A"}));
    call(&ctx, "start_session", json!({"agent_name": "B"}));

    assert_eq!(ctx.db.open_session_ids().unwrap().len(), 1);
    let first = ctx.db.get_session(1).unwrap().unwrap();
    assert!(first.ended_at.is_some());
}

#[test]
fn test_migration_monotonic_across_reopen() {
    let dir = TempDir::new().unwrap();
    let options = ServerOptions::new(dir.path());

    {
        let db = Database::open(&options.database_path()).unwrap();
        db.migrate().unwrap();
        let version =
            engram_core::db::schema::schema_version(&db.connection()).unwrap();
        assert_eq!(version, SCHEMA_VERSION);
    }

    // Re-opening and re-migrating is a no-op.
    let db = Database::open(&options.database_path()).unwrap();
    db.migrate().unwrap();
    let version = engram_core::db::schema::schema_version(&db.connection()).unwrap();
    assert_eq!(version, SCHEMA_VERSION);
}

// ============================================
// Decisions
// ============================================

#[test]
fn test_supersede_scenario() {
    let dir = TempDir::new().unwrap();
    let ctx = file_ctx(&dir);

    let first = memory(&ctx, "record_decision", json!({"decision": "Use WAL"}));
    let second = memory(
        &ctx,
        "record_decision",
        json!({
            "decision": "Use WAL mode for performance",
            "supersedes": first["id"],
        }),
    );
    assert_eq!(second["supersedes"], first["id"]);

    let superseded = memory(&ctx, "get_decisions", json!({"status": "superseded"}));
    assert_eq!(superseded["decisions"][0]["id"], first["id"]);
    assert_eq!(superseded["decisions"][0]["superseded_by"], second["id"]);

    let active = memory(&ctx, "get_decisions", json!({"status": "active"}));
    assert_eq!(active["count"], 1);
    assert_eq!(active["decisions"][0]["id"], second["id"]);
}

// ============================================
// Concurrent claims
// ============================================

#[test]
fn test_concurrent_claims_exactly_one_winner() {
    let dir = TempDir::new().unwrap();
    let options = ServerOptions::new(dir.path());
    let db = Database::open(&options.database_path()).unwrap();
    db.migrate().unwrap();
    let db = Arc::new(db);

    let task_id = db
        .create_task("contested", None, None, &[], &[], &[], None, chrono::Utc::now())
        .unwrap();

    let mut handles = Vec::new();
    for i in 0..8 {
        let db = Arc::clone(&db);
        handles.push(std::thread::spawn(move || {
            let agent = format!("agent-{}", i);
            db.claim_task(task_id, &agent, engram_core::util::now_ms())
                .unwrap()
                .is_ok()
        }));
    }

    let wins: usize = handles
        .into_iter()
        .map(|h| h.join().unwrap() as usize)
        .sum();
    assert_eq!(wins, 1, "exactly one claimant must win");
    assert!(db.get_task(task_id).unwrap().unwrap().claimed_by.is_some());
}

// ============================================
// Scheduled events
// ============================================

#[test]
fn test_recurring_event_scenario() {
    let dir = TempDir::new().unwrap();
    let ctx = file_ctx(&dir);

    memory(
        &ctx,
        "schedule_event",
        json!({
            "title": "Review",
            "trigger_type": "next_session",
            "recurrence": "every_session",
        }),
    );

    let started = call(&ctx, "start_session", json!({"agent_name": "A"}));
    let triggered = started["triggered_events"].as_array().unwrap();
    assert_eq!(triggered.len(), 1);
    assert_eq!(triggered[0]["title"], "Review");
    let event_id = triggered[0]["id"].as_i64().unwrap();

    let acked = memory(
        &ctx,
        "acknowledge_event",
        json!({"id": event_id, "approved": true}),
    );
    assert_eq!(acked["event"]["status"], "acknowledged");

    // The clone is pending with the same shape and fires next session.
    let clone_id = acked["next_instance_id"].as_i64().unwrap();
    let events = memory(&ctx, "get_scheduled_events", json!({"status": "pending"}));
    assert_eq!(events["events"][0]["id"], clone_id);
    assert_eq!(events["events"][0]["title"], "Review");
    assert_eq!(events["events"][0]["recurrence"], "every_session");

    call(&ctx, "end_session", json!({"summary": "s"}));
    let restarted = call(&ctx, "start_session", json!({"agent_name": "B"}));
    let triggered = restarted["triggered_events"].as_array().unwrap();
    assert_eq!(triggered[0]["id"], clone_id);
}

// ============================================
// Staleness
// ============================================

#[test]
fn test_staleness_after_mtime_drift() {
    let dir = TempDir::new().unwrap();
    let src = dir.path().join("src");
    std::fs::create_dir_all(&src).unwrap();
    std::fs::write(src.join("y.ts"), "export {}").unwrap();
    let ctx = file_ctx(&dir);

    let current_mtime = std::fs::metadata(src.join("y.ts"))
        .unwrap()
        .modified()
        .unwrap()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap()
        .as_millis() as i64;

    // Note recorded as if 48 hours before the file's mtime.
    memory(
        &ctx,
        "set_file_notes",
        json!({
            "file_path": "src/y.ts",
            "purpose": "entry point",
            "file_mtime": current_mtime - 48 * 3_600_000,
        }),
    );

    let note = memory(&ctx, "get_file_notes", json!({"file_path": "src/y.ts"}));
    assert_eq!(note["staleness"]["confidence"], "stale");
    let hours = note["staleness"]["staleness_hours"].as_f64().unwrap();
    assert!((hours - 48.0).abs() < 0.5, "drift was {}", hours);
}

// ============================================
// Context pressure
// ============================================

#[test]
fn test_context_pressure_urgent_scenario() {
    let dir = TempDir::new().unwrap();
    let ctx = file_ctx(&dir);
    call(&ctx, "start_session", json!({"agent_name": "A"}));

    for _ in 0..4 {
        memory(
            &ctx,
            "track_context",
            json!({"input_bytes": 100_000, "output_bytes": 500_000}),
        );
    }

    let out = memory(&ctx, "check_events", json!({}));
    assert_eq!(out["context_pressure"]["severity"], "urgent");
    assert_eq!(out["context_pressure"]["source"], "byte_estimate");
}

// ============================================
// Pending work & coordination
// ============================================

#[test]
fn test_begin_work_auto_close() {
    let dir = TempDir::new().unwrap();
    let ctx = file_ctx(&dir);

    memory(
        &ctx,
        "begin_work",
        json!({
            "agent_id": "A",
            "description": "refactor parser",
            "files": ["src/a.rs", "src/b.rs"],
        }),
    );

    let out = memory(
        &ctx,
        "record_change",
        json!({"file_path": "src/a.rs", "change_type": "modified", "description": "split lexer"}),
    );
    assert_eq!(out["pending_work_completed"], 1);

    let rows = ctx.db.pending_work(Some("A")).unwrap();
    assert_eq!(
        rows[0].status,
        engram_core::PendingWorkStatus::Completed
    );
}

#[test]
fn test_claim_release_through_dispatcher() {
    let dir = TempDir::new().unwrap();
    let ctx = file_ctx(&dir);

    let created = memory(&ctx, "create_task", json!({"title": "t"}));
    let task_id = created["id"].as_i64().unwrap();

    let claimed = memory(
        &ctx,
        "claim_task",
        json!({"task_id": task_id, "agent_id": "A"}),
    );
    assert_eq!(claimed["task"]["claimed_by"], "A");

    // The loser sees a typed conflict.
    let resp = ctx.handle(
        "memory",
        &json!({"action": "claim_task", "task_id": task_id, "agent_id": "B"}),
    );
    assert!(resp.is_error());
    let payload: Value = serde_json::from_str(resp.text_payload()).unwrap();
    assert_eq!(payload["message"], "already claimed by A");

    memory(
        &ctx,
        "release_task",
        json!({"task_id": task_id, "agent_id": "A"}),
    );
    let claimed = memory(
        &ctx,
        "claim_task",
        json!({"task_id": task_id, "agent_id": "B"}),
    );
    assert_eq!(claimed["task"]["claimed_by"], "B");
}

// ============================================
// Compaction & backup fidelity
// ============================================

#[test]
fn test_compaction_fidelity_through_admin() {
    let dir = TempDir::new().unwrap();
    let ctx = file_ctx(&dir);

    for i in 0..5 {
        call(&ctx, "start_session", json!({"agent_name": "A"}));
        memory(
            &ctx,
            "record_change",
            json!({
                "file_path": format!("src/f{}.rs", i),
                "change_type": "modified",
                "description": format!("edit {}", i),
            }),
        );
        call(&ctx, "end_session", json!({"summary": format!("s{}", i)}));
    }
    let before = ctx.db.change_count().unwrap();

    let report = call(&ctx, "admin", json!({"action": "compact", "keep_sessions": 2}));
    assert_eq!(report["sessions_compacted"], 3);

    // Synthetic rows exist, raw rows for old sessions are gone, total shrank.
    let after = ctx.db.change_count().unwrap();
    assert!(after < before);
    for sid in 1..=3 {
        let rows = ctx.db.changes_for_session(sid).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].file_path, "(compacted)");
    }

    // A safety backup was taken before rewriting history.
    let listed = call(&ctx, "admin", json!({"action": "list_backups"}));
    assert!(listed["count"].as_i64().unwrap() >= 1);
}

// ============================================
// Search
// ============================================

#[test]
fn test_search_groups_and_ranks() {
    let dir = TempDir::new().unwrap();
    let ctx = file_ctx(&dir);

    memory(
        &ctx,
        "record_decision",
        json!({"decision": "retry queue uses exponential backoff"}),
    );
    memory(
        &ctx,
        "record_change",
        json!({
            "file_path": "src/retry.rs",
            "change_type": "created",
            "description": "add retry queue with backoff",
        }),
    );

    let out = memory(
        &ctx,
        "search",
        json!({"query": "retry backoff", "context_chars": 80}),
    );
    assert_eq!(out["total"], 2);
    let groups = out["results"].as_object().unwrap();
    assert!(groups.contains_key("decisions"));
    assert!(groups.contains_key("changes"));
    for hits in groups.values() {
        for hit in hits.as_array().unwrap() {
            assert!(hit["rank"].is_number());
            assert!(hit["snippet"].is_string());
        }
    }
}
