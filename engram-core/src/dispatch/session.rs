//! Session lifecycle handlers
//!
//! `start_session` is the busiest entry point: it displaces any unclosed
//! session, opens the new one, sweeps the scheduler's session-start
//! triggers, surfaces pending handoffs, kicks off best-effort
//! auto-compaction, and assembles the previous-session context at the
//! requested verbosity.

use chrono::Utc;
use serde_json::{json, Value};

use super::{opt_i64, opt_str, opt_str_array, require_str, respond, ServerContext, ToolResponse};
use crate::error::{Error, Result};
use crate::maintenance;

/// How much previous-session context `start_session` returns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Verbosity {
    Full,
    Summary,
    Minimal,
}

impl Verbosity {
    fn parse(raw: Option<&str>) -> Result<Self> {
        match raw {
            None | Some("summary") => Ok(Verbosity::Summary),
            Some("full") => Ok(Verbosity::Full),
            Some("minimal") => Ok(Verbosity::Minimal),
            Some(other) => Err(Error::Validation(format!("unknown verbosity: {}", other))),
        }
    }
}

pub fn start_session(ctx: &ServerContext, params: &Value) -> ToolResponse {
    respond(start_session_inner(ctx, params))
}

fn start_session_inner(ctx: &ServerContext, params: &Value) -> Result<Value> {
    let agent_name = require_str(params, "agent_name")?;
    let verbosity = Verbosity::parse(opt_str(params, "verbosity"))?;
    let resume_task = opt_i64(params, "resume_task");
    let now = Utc::now();

    // At most one open session: displace stragglers before opening.
    let displaced = ctx.db.open_session_ids()?;
    for id in &displaced {
        ctx.db.auto_close_session(*id, now)?;
        tracing::info!(session = id, "Auto-closed unfinished session");
    }

    let project_root = ctx.options.project_root.to_string_lossy().to_string();
    let session_id = ctx.db.create_session(agent_name, &project_root, now)?;
    ctx.set_current_session(Some(session_id));

    // Fire next-session and overdue datetime events.
    let triggered = ctx.db.session_start_sweep(now)?;

    // Surface handoffs left by exhausted predecessors, then mark them read.
    let handoffs = ctx.db.unacknowledged_handoffs()?;
    if !handoffs.is_empty() {
        let ids: Vec<i64> = handoffs.iter().map(|h| h.id).collect();
        ctx.db.acknowledge_handoffs(&ids)?;
    }

    // Best-effort housekeeping; never fails the start.
    let compacted =
        maintenance::auto_compact_if_needed(&ctx.db, &ctx.options.backups_dir(), now);

    let mut out = json!({
        "session_id": session_id,
        "agent_name": agent_name,
        "started_at": now.to_rfc3339(),
    });
    let obj = out.as_object_mut().expect("literal object");

    if !displaced.is_empty() {
        obj.insert("auto_closed_sessions".to_string(), json!(displaced));
    }
    if !handoffs.is_empty() {
        obj.insert("handoff_pending".to_string(), json!(handoffs));
    }
    if !triggered.is_empty() {
        obj.insert("triggered_events".to_string(), json!(triggered));
    }
    if let Some(report) = compacted {
        obj.insert("auto_compacted".to_string(), json!(report));
    }
    if let Some(task_id) = resume_task {
        if let Some(task) = ctx.db.get_task(task_id)? {
            obj.insert("resume_task".to_string(), json!(task));
        }
    }

    if verbosity == Verbosity::Minimal {
        return Ok(out);
    }

    // Previous-session context.
    if let Some(previous) = ctx.db.last_completed_session()? {
        let changes = ctx.db.changes_since(previous.started_at, Some(100))?;
        let recent: Vec<_> = changes.iter().take(5).collect();
        obj.insert(
            "previous_session".to_string(),
            json!({
                "id": previous.id,
                "agent_name": previous.agent_name,
                "summary": previous.summary,
                "ended_at": previous.ended_at,
                "tags": previous.tags,
            }),
        );
        obj.insert(
            "changes_since_last".to_string(),
            json!({
                "count": changes.len(),
                "recent": recent,
            }),
        );
    }

    if verbosity == Verbosity::Full {
        let open_tasks = ctx.db.tasks_filtered(
            Some(crate::types::TaskStatus::InProgress),
            None,
            None,
            Some(20),
        )?;
        let decisions = ctx.db.decisions_filtered(
            Some(crate::types::DecisionStatus::Active),
            None,
            Some(10),
        )?;
        let conventions = ctx.db.conventions_filtered(None, false, Some(20))?;
        let checkpoint = ctx.db.get_checkpoint(None)?;
        obj.insert("in_progress_tasks".to_string(), json!(open_tasks));
        obj.insert("active_decisions".to_string(), json!(decisions));
        obj.insert("conventions".to_string(), json!(conventions));
        obj.insert("last_checkpoint".to_string(), json!(checkpoint));
    }

    Ok(out)
}

pub fn end_session(ctx: &ServerContext, params: &Value) -> ToolResponse {
    respond(end_session_inner(ctx, params))
}

fn end_session_inner(ctx: &ServerContext, params: &Value) -> Result<Value> {
    let summary = require_str(params, "summary")?;
    let tags = opt_str_array(params, "tags");
    let reason = opt_str(params, "reason");
    let now = Utc::now();

    let session_id = ctx
        .current_session()
        .or(ctx.db.open_session_ids()?.into_iter().last())
        .ok_or_else(|| Error::Validation("no open session to end".into()))?;

    ctx.db.close_session(session_id, now, summary, &tags)?;
    ctx.set_current_session(None);

    let mut out = json!({
        "session_id": session_id,
        "ended_at": now.to_rfc3339(),
        "summary": summary,
    });

    // A context-exhausted agent leaves a handoff for its successor.
    if reason == Some("context_exhaustion") {
        let agent = ctx
            .db
            .get_session(session_id)?
            .map(|s| s.agent_name);
        let handoff_id = ctx.db.create_handoff(
            Some(session_id),
            agent.as_deref(),
            "context_exhaustion",
            Some(summary),
            now,
        )?;
        out.as_object_mut()
            .expect("literal object")
            .insert("handoff_id".to_string(), json!(handoff_id));
    }

    Ok(out)
}

pub fn get_session_history(ctx: &ServerContext, params: &Value) -> ToolResponse {
    respond(get_session_history_inner(ctx, params))
}

fn get_session_history_inner(ctx: &ServerContext, params: &Value) -> Result<Value> {
    let limit = opt_i64(params, "limit");
    let offset = opt_i64(params, "offset").unwrap_or(0);
    let agent_name = opt_str(params, "agent_name");

    let sessions = ctx.db.session_history(limit, offset, agent_name)?;
    Ok(json!({
        "count": sessions.len(),
        "total": ctx.db.session_count()?,
        "sessions": sessions,
    }))
}
