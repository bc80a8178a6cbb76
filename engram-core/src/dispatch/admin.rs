//! The `admin` dispatcher
//!
//! Maintenance and introspection: backups, restore, export/import,
//! compaction, stats, health, config, project scanning, git hooks, and the
//! knowledge store.

use std::path::PathBuf;

use chrono::Utc;
use serde_json::{json, Value};

use super::{opt_bool, opt_i64, opt_str, require_str, respond, ServerContext, ToolResponse};
use crate::db::schema;
use crate::error::{Error, Result};
use crate::maintenance::{self, CompactOptions};
use crate::repo::config::keys;
use crate::scan;
use crate::transfer;
use crate::util::now_ms;

/// Confirmation token required by `clear`.
const CLEAR_CONFIRM: &str = "yes-clear";

/// Snapshot-cache key and TTL for `stats`.
const STATS_CACHE_KEY: &str = "admin:stats";
const STATS_CACHE_TTL_MIN: i64 = 5;

/// Closed set of `admin` actions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdminAction {
    Backup,
    Restore,
    ListBackups,
    Export,
    Import,
    Compact,
    Clear,
    Stats,
    Health,
    Config,
    ScanProject,
    InstallHooks,
    RemoveHooks,
    GenerateReport,
    GetGlobalKnowledge,
}

impl std::str::FromStr for AdminAction {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        use AdminAction::*;
        match s {
            "backup" => Ok(Backup),
            "restore" => Ok(Restore),
            "list_backups" => Ok(ListBackups),
            "export" => Ok(Export),
            "import" => Ok(Import),
            "compact" => Ok(Compact),
            "clear" => Ok(Clear),
            "stats" => Ok(Stats),
            "health" => Ok(Health),
            "config" => Ok(Config),
            "scan_project" => Ok(ScanProject),
            "install_hooks" => Ok(InstallHooks),
            "remove_hooks" => Ok(RemoveHooks),
            "generate_report" => Ok(GenerateReport),
            "get_global_knowledge" => Ok(GetGlobalKnowledge),
            _ => Err(format!("Unknown method: {}", s)),
        }
    }
}

/// Route one `admin` call.
pub fn dispatch_admin(ctx: &ServerContext, action: &str, params: &Value) -> ToolResponse {
    let action: AdminAction = match action.parse() {
        Ok(action) => action,
        Err(message) => return ToolResponse::error(message),
    };

    use AdminAction::*;
    match action {
        Backup => respond(backup(ctx, params)),
        Restore => respond(restore(ctx, params)),
        ListBackups => respond(list_backups(ctx)),
        Export => respond(export(ctx, params)),
        Import => respond(import(ctx, params)),
        Compact => respond(compact(ctx, params)),
        Clear => respond(clear(ctx, params)),
        Stats => respond(stats(ctx)),
        Health => respond(health(ctx)),
        Config => respond(config(ctx, params)),
        ScanProject => respond(scan_project(ctx, params)),
        InstallHooks => respond(install_hooks(ctx)),
        RemoveHooks => respond(remove_hooks(ctx)),
        GenerateReport => respond(generate_report(ctx, params)),
        GetGlobalKnowledge => respond(get_global_knowledge(ctx, params)),
    }
}

// ============================================
// Backup & restore
// ============================================

fn backup(ctx: &ServerContext, params: &Value) -> Result<Value> {
    let dest = opt_str(params, "path").map(PathBuf::from);
    let now = Utc::now();
    let written = maintenance::backup(&ctx.db, &ctx.options.backups_dir(), dest.as_deref(), now)?;

    // Only the default directory is pruned; explicit destinations are the
    // caller's responsibility.
    let mut pruned = 0;
    if dest.is_none() {
        let max = ctx
            .db
            .config_get_int(keys::MAX_BACKUPS, maintenance::DEFAULT_MAX_BACKUPS)?;
        pruned = maintenance::prune_backups(&ctx.options.backups_dir(), max)?;
    }

    Ok(json!({ "path": written, "pruned": pruned }))
}

fn restore(ctx: &ServerContext, params: &Value) -> Result<Value> {
    let input = PathBuf::from(require_str(params, "path")?);
    let confirm = opt_str(params, "confirm").unwrap_or("");
    let safety = maintenance::restore(
        &ctx.db,
        &ctx.options.backups_dir(),
        &input,
        confirm,
        Utc::now(),
    )?;
    Ok(json!({
        "restored_from": input,
        "safety_backup": safety,
        "note": "restart the server to load the restored database",
    }))
}

fn list_backups(ctx: &ServerContext) -> Result<Value> {
    let backups = maintenance::list_backups(&ctx.options.backups_dir())?;
    Ok(json!({ "count": backups.len(), "backups": backups }))
}

// ============================================
// Export & import
// ============================================

fn export(ctx: &ServerContext, params: &Value) -> Result<Value> {
    let path = opt_str(params, "path")
        .map(PathBuf::from)
        .unwrap_or_else(|| ctx.options.export_path());
    let counts = transfer::export_to_file(&ctx.db, &path, Utc::now())?;
    Ok(json!({ "path": path, "counts": counts }))
}

fn import(ctx: &ServerContext, params: &Value) -> Result<Value> {
    let path = opt_str(params, "path")
        .map(PathBuf::from)
        .unwrap_or_else(|| ctx.options.export_path());
    if !path.exists() {
        return Err(Error::Validation(format!(
            "import file does not exist: {}",
            path.display()
        )));
    }
    let counts = transfer::import_from_file(&ctx.db, &path)?;
    Ok(json!({ "path": path, "counts": counts }))
}

// ============================================
// Compaction & clear
// ============================================

fn compact(ctx: &ServerContext, params: &Value) -> Result<Value> {
    let opts = CompactOptions {
        keep_sessions: opt_i64(params, "keep_sessions")
            .unwrap_or(maintenance::DEFAULT_KEEP_SESSIONS),
        max_age_days: opt_i64(params, "max_age_days"),
        dry_run: opt_bool(params, "dry_run").unwrap_or(false),
    };
    let report = maintenance::compact(&ctx.db, &ctx.options.backups_dir(), &opts, Utc::now())?;
    Ok(json!(report))
}

fn clear(ctx: &ServerContext, params: &Value) -> Result<Value> {
    let confirm = opt_str(params, "confirm").unwrap_or("");
    if confirm != CLEAR_CONFIRM {
        return Err(Error::Validation(format!(
            "clear requires confirm: \"{}\"",
            CLEAR_CONFIRM
        )));
    }

    // A safety backup, then wipe memory tables. Config and schema stay.
    if ctx.db.path().is_some() {
        maintenance::backup(&ctx.db, &ctx.options.backups_dir(), None, Utc::now())?;
    }

    let tables = [
        "changes",
        "decisions",
        "conventions",
        "tasks",
        "file_notes",
        "milestones",
        "checkpoints",
        "scheduled_events",
        "agents",
        "broadcasts",
        "file_locks",
        "pending_work",
        "session_bytes",
        "snapshot_cache",
        "knowledge",
        "handoffs",
        "sessions",
    ];
    {
        let mut conn = ctx.db.connection();
        let tx = conn.transaction()?;
        for table in tables {
            tx.execute(&format!("DELETE FROM {}", table), [])?;
        }
        tx.commit()?;
    }
    ctx.set_current_session(None);
    ctx.db.vacuum()?;

    Ok(json!({ "cleared": tables.len() }))
}

// ============================================
// Stats & health
// ============================================

fn count(ctx: &ServerContext, table: &str) -> Result<i64> {
    let conn = ctx.db.connection();
    let n = conn.query_row(&format!("SELECT COUNT(*) FROM {}", table), [], |r| r.get(0))?;
    Ok(n)
}

fn stats(ctx: &ServerContext) -> Result<Value> {
    let now = Utc::now();
    if let Some(cached) = ctx.db.cache_get(STATS_CACHE_KEY, now)? {
        return Ok(cached);
    }

    let schema_version = schema::schema_version(&ctx.db.connection())?;
    let tasks = ctx.db.task_count_by_status()?;
    let most_changed = ctx.db.most_changed_files(Some(10))?;

    let payload = json!({
        "db_size_kb": ctx.db.size_kb(),
        "schema_version": schema_version,
        "sessions": count(ctx, "sessions")?,
        "changes": count(ctx, "changes")?,
        "decisions": count(ctx, "decisions")?,
        "conventions": count(ctx, "conventions")?,
        "tasks": tasks,
        "file_notes": count(ctx, "file_notes")?,
        "milestones": count(ctx, "milestones")?,
        "scheduled_events": count(ctx, "scheduled_events")?,
        "agents": count(ctx, "agents")?,
        "knowledge": count(ctx, "knowledge")?,
        "most_changed_files": most_changed,
    });

    ctx.db
        .cache_put(STATS_CACHE_KEY, &payload, STATS_CACHE_TTL_MIN, now)?;
    Ok(payload)
}

fn health(ctx: &ServerContext) -> Result<Value> {
    let integrity = ctx.db.integrity_check()?;
    let schema_version = schema::schema_version(&ctx.db.connection())?;
    let fts_enabled = ctx.db.has_fts();
    let active_locks: i64 = {
        let conn = ctx.db.connection();
        conn.query_row(
            "SELECT COUNT(*) FROM file_locks WHERE expires_at > ?1",
            [now_ms()],
            |r| r.get(0),
        )?
    };

    Ok(json!({
        "ok": integrity == "ok",
        "integrity": integrity,
        "schema_version": schema_version,
        "fts_enabled": fts_enabled,
        "db_size_kb": ctx.db.size_kb(),
        "open_session": ctx.current_session(),
        "active_locks": active_locks,
    }))
}

// ============================================
// Config
// ============================================

fn config(ctx: &ServerContext, params: &Value) -> Result<Value> {
    match (opt_str(params, "key"), params.get("value")) {
        (Some(key), Some(value)) => {
            let value = match value {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            ctx.db.config_set(key, &value, Utc::now())?;
            Ok(json!({ "key": key, "value": value }))
        }
        (Some(key), None) => Ok(json!({ "key": key, "value": ctx.db.config_get(key)? })),
        (None, _) => Ok(json!({ "config": ctx.db.config_all()? })),
    }
}

// ============================================
// Project integration
// ============================================

fn scan_project(ctx: &ServerContext, params: &Value) -> Result<Value> {
    let max_files = opt_i64(params, "max_files").unwrap_or(500).clamp(1, 5_000) as usize;
    let report = scan::scan_project(&ctx.db, &ctx.options.project_root, max_files, Utc::now())?;
    Ok(json!(report))
}

fn install_hooks(ctx: &ServerContext) -> Result<Value> {
    let path = scan::install_hooks(&ctx.options.project_root)?;
    Ok(json!({ "installed": path }))
}

fn remove_hooks(ctx: &ServerContext) -> Result<Value> {
    let removed = scan::remove_hooks(&ctx.options.project_root)?;
    Ok(json!({ "removed": removed }))
}

// ============================================
// Reports & knowledge
// ============================================

fn generate_report(ctx: &ServerContext, params: &Value) -> Result<Value> {
    let limit = opt_i64(params, "limit");
    let sessions = ctx.db.session_history(limit, 0, None)?;
    let since = sessions
        .last()
        .map(|s| s.started_at)
        .unwrap_or_else(|| Utc::now() - chrono::Duration::days(30));

    Ok(json!({
        "generated_at": Utc::now().to_rfc3339(),
        "window_start": since.to_rfc3339(),
        "sessions": sessions,
        "changes": ctx.db.changes_since(since, Some(100))?,
        "decisions": ctx.db.decisions_filtered(None, None, Some(50))?,
        "milestones": ctx.db.milestones(Some(20))?,
        "most_changed_files": ctx.db.most_changed_files(Some(10))?,
    }))
}

fn get_global_knowledge(ctx: &ServerContext, params: &Value) -> Result<Value> {
    let entries = ctx
        .db
        .knowledge_entries(opt_str(params, "query"), opt_i64(params, "limit"))?;
    Ok(json!({ "count": entries.len(), "knowledge": entries }))
}
