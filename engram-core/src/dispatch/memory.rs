//! The `memory` dispatcher
//!
//! One closed action enum, one handler per action. Handlers validate
//! parameters, call the repositories and services, and return JSON
//! payloads; every failure surfaces as an error response.

use chrono::Utc;
use serde_json::{json, Value};

use super::{
    opt_bool, opt_enum, opt_i64, opt_id_array, opt_str, opt_str_array, require_enum, require_i64,
    require_str, respond, ServerContext, ToolResponse,
};
use crate::classify::{self, DumpKind};
use crate::coord::{AgentSync as AgentSyncInput, DEFAULT_LOCK_MINUTES};
use crate::error::{Error, Result};
use crate::pressure::{self, ReportedTokens};
use crate::search::SearchScope;
use crate::staleness;
use crate::types::{
    AgentStatus, FileNotePatch, NewChange, NewDecision, NewScheduledEvent, TaskPatch,
};
use crate::util::{now_ms, parse_ts, truncate_chars};

/// Closed set of `memory` actions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemoryAction {
    GetFileNotes,
    SetFileNotes,
    SetFileNotesBatch,
    RecordChange,
    GetFileHistory,
    BeginWork,
    RecordDecision,
    RecordDecisionsBatch,
    GetDecisions,
    UpdateDecision,
    AddConvention,
    GetConventions,
    ToggleConvention,
    CreateTask,
    UpdateTask,
    GetTasks,
    Checkpoint,
    GetCheckpoint,
    Search,
    WhatChanged,
    GetDependencyMap,
    RecordMilestone,
    GetMilestones,
    ScheduleEvent,
    GetScheduledEvents,
    UpdateScheduledEvent,
    AcknowledgeEvent,
    CheckEvents,
    TrackContext,
    Dump,
    ClaimTask,
    ReleaseTask,
    AgentSync,
    GetAgents,
    Broadcast,
    RouteTask,
}

impl std::str::FromStr for MemoryAction {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        use MemoryAction::*;
        match s {
            "get_file_notes" => Ok(GetFileNotes),
            "set_file_notes" => Ok(SetFileNotes),
            "set_file_notes_batch" => Ok(SetFileNotesBatch),
            "record_change" => Ok(RecordChange),
            "get_file_history" => Ok(GetFileHistory),
            "begin_work" => Ok(BeginWork),
            "record_decision" => Ok(RecordDecision),
            "record_decisions_batch" => Ok(RecordDecisionsBatch),
            "get_decisions" => Ok(GetDecisions),
            "update_decision" => Ok(UpdateDecision),
            "add_convention" => Ok(AddConvention),
            "get_conventions" => Ok(GetConventions),
            "toggle_convention" => Ok(ToggleConvention),
            "create_task" => Ok(CreateTask),
            "update_task" => Ok(UpdateTask),
            "get_tasks" => Ok(GetTasks),
            "checkpoint" => Ok(Checkpoint),
            "get_checkpoint" => Ok(GetCheckpoint),
            "search" => Ok(Search),
            "what_changed" => Ok(WhatChanged),
            "get_dependency_map" => Ok(GetDependencyMap),
            "record_milestone" => Ok(RecordMilestone),
            "get_milestones" => Ok(GetMilestones),
            "schedule_event" => Ok(ScheduleEvent),
            "get_scheduled_events" => Ok(GetScheduledEvents),
            "update_scheduled_event" => Ok(UpdateScheduledEvent),
            "acknowledge_event" => Ok(AcknowledgeEvent),
            "check_events" => Ok(CheckEvents),
            "track_context" => Ok(TrackContext),
            "dump" => Ok(Dump),
            "claim_task" => Ok(ClaimTask),
            "release_task" => Ok(ReleaseTask),
            "agent_sync" => Ok(AgentSync),
            "get_agents" => Ok(GetAgents),
            "broadcast" => Ok(Broadcast),
            "route_task" => Ok(RouteTask),
            _ => Err(format!("Unknown method: {}", s)),
        }
    }
}

/// Route one `memory` call.
pub fn dispatch_memory(ctx: &ServerContext, action: &str, params: &Value) -> ToolResponse {
    let action: MemoryAction = match action.parse() {
        Ok(action) => action,
        Err(message) => return ToolResponse::error(message),
    };

    use MemoryAction::*;
    match action {
        GetFileNotes => respond(get_file_notes(ctx, params)),
        SetFileNotes => respond(set_file_notes(ctx, params)),
        SetFileNotesBatch => respond(set_file_notes_batch(ctx, params)),
        RecordChange => respond(record_change(ctx, params)),
        GetFileHistory => respond(get_file_history(ctx, params)),
        BeginWork => respond(begin_work(ctx, params)),
        RecordDecision => respond(record_decision(ctx, params)),
        RecordDecisionsBatch => respond(record_decisions_batch(ctx, params)),
        GetDecisions => respond(get_decisions(ctx, params)),
        UpdateDecision => respond(update_decision(ctx, params)),
        AddConvention => respond(add_convention(ctx, params)),
        GetConventions => respond(get_conventions(ctx, params)),
        ToggleConvention => respond(toggle_convention(ctx, params)),
        CreateTask => respond(create_task(ctx, params)),
        UpdateTask => respond(update_task(ctx, params)),
        GetTasks => respond(get_tasks(ctx, params)),
        Checkpoint => respond(checkpoint(ctx, params)),
        GetCheckpoint => respond(get_checkpoint(ctx, params)),
        Search => respond(search(ctx, params)),
        WhatChanged => respond(what_changed(ctx, params)),
        GetDependencyMap => respond(get_dependency_map(ctx, params)),
        RecordMilestone => respond(record_milestone(ctx, params)),
        GetMilestones => respond(get_milestones(ctx, params)),
        ScheduleEvent => respond(schedule_event(ctx, params)),
        GetScheduledEvents => respond(get_scheduled_events(ctx, params)),
        UpdateScheduledEvent => respond(update_scheduled_event(ctx, params)),
        AcknowledgeEvent => respond(acknowledge_event(ctx, params)),
        CheckEvents => respond(check_events(ctx, params)),
        TrackContext => respond(track_context(ctx, params)),
        Dump => respond(dump(ctx, params)),
        ClaimTask => claim_task(ctx, params),
        ReleaseTask => respond(release_task(ctx, params)),
        AgentSync => respond(agent_sync(ctx, params)),
        GetAgents => respond(get_agents(ctx)),
        Broadcast => respond(broadcast(ctx, params)),
        RouteTask => respond(route_task(ctx, params)),
    }
}

// ============================================
// File notes
// ============================================

fn note_with_staleness(ctx: &ServerContext, note: &crate::types::FileNote) -> Value {
    let verdict = staleness::enrich(note, &ctx.options.project_root);
    let mut value = serde_json::to_value(note).unwrap_or(Value::Null);
    if let Value::Object(ref mut map) = value {
        map.insert("staleness".to_string(), json!(verdict));
    }
    value
}

fn get_file_notes(ctx: &ServerContext, params: &Value) -> Result<Value> {
    let path = require_str(params, "file_path")?;
    match ctx.db.get_file_note(path)? {
        Some(note) => Ok(note_with_staleness(ctx, &note)),
        None => Err(Error::NotFound {
            kind: "file_note",
            id: path.to_string(),
        }),
    }
}

fn note_patch_from(params: &Value) -> Result<FileNotePatch> {
    Ok(FileNotePatch {
        purpose: opt_str(params, "purpose").map(str::to_string),
        dependencies: params
            .get("dependencies")
            .and_then(Value::as_array)
            .map(|_| opt_str_array(params, "dependencies")),
        dependents: params
            .get("dependents")
            .and_then(Value::as_array)
            .map(|_| opt_str_array(params, "dependents")),
        layer: opt_str(params, "layer").map(str::to_string),
        notes: opt_str(params, "notes").map(str::to_string),
        complexity: opt_enum(params, "complexity")?,
        file_mtime: opt_i64(params, "file_mtime"),
        content_hash: opt_str(params, "content_hash").map(str::to_string),
        git_branch: opt_str(params, "git_branch").map(str::to_string),
        executive_summary: opt_str(params, "executive_summary").map(str::to_string),
    })
}

fn set_file_notes(ctx: &ServerContext, params: &Value) -> Result<Value> {
    let path = require_str(params, "file_path")?;
    let patch = note_patch_from(params)?;
    let note = ctx
        .db
        .upsert_file_note(path, &patch, ctx.current_session(), Utc::now())?;

    // Quietly reserve the file while the note is fresh. Advisory only, so a
    // conflicting holder is not an error here.
    if let Some(agent) = opt_str(params, "agent_id") {
        if let Err(e) = ctx.db.acquire_soft_lock(
            path,
            agent,
            Some(DEFAULT_LOCK_MINUTES),
            Some("soft-lock: set_file_notes"),
            now_ms(),
        ) {
            tracing::debug!(error = %e, "Soft lock on note write skipped");
        }
    }

    Ok(note_with_staleness(ctx, &note))
}

fn set_file_notes_batch(ctx: &ServerContext, params: &Value) -> Result<Value> {
    let notes = params
        .get("notes")
        .and_then(Value::as_array)
        .ok_or_else(|| Error::Validation("missing required parameter: notes".into()))?;

    let mut items = Vec::with_capacity(notes.len());
    for entry in notes {
        let path = require_str(entry, "file_path")?;
        items.push((path.to_string(), note_patch_from(entry)?));
    }
    let count = ctx
        .db
        .upsert_file_notes_batch(&items, ctx.current_session(), Utc::now())?;
    Ok(json!({ "updated": count }))
}

// ============================================
// Changes & work
// ============================================

fn new_change_from(params: &Value) -> Result<NewChange> {
    Ok(NewChange {
        file_path: require_str(params, "file_path")?.to_string(),
        change_type: require_enum(params, "change_type")?,
        description: require_str(params, "description")?.to_string(),
        diff_summary: opt_str(params, "diff_summary").map(str::to_string),
        impact_scope: opt_enum(params, "impact_scope")?,
    })
}

fn record_change(ctx: &ServerContext, params: &Value) -> Result<Value> {
    let items: Vec<NewChange> = match params.get("changes").and_then(Value::as_array) {
        Some(entries) => entries
            .iter()
            .map(new_change_from)
            .collect::<Result<Vec<_>>>()?,
        None => vec![new_change_from(params)?],
    };

    let ids = ctx
        .db
        .record_changes(&items, ctx.current_session(), Utc::now())?;

    // Best-effort: close pending work that touched these files.
    let paths: Vec<String> = items.iter().map(|c| c.file_path.clone()).collect();
    let pending_completed = match ctx.db.complete_pending_work(&paths) {
        Ok(n) => n,
        Err(e) => {
            tracing::warn!(error = %e, "Pending-work auto-close failed");
            0
        }
    };

    Ok(json!({
        "ids": ids,
        "count": ids.len(),
        "pending_work_completed": pending_completed,
    }))
}

fn get_file_history(ctx: &ServerContext, params: &Value) -> Result<Value> {
    let path = require_str(params, "file_path")?;
    let changes = ctx.db.changes_by_file(path, opt_i64(params, "limit"))?;
    Ok(json!({ "file_path": path, "count": changes.len(), "changes": changes }))
}

fn begin_work(ctx: &ServerContext, params: &Value) -> Result<Value> {
    let agent = require_str(params, "agent_id")?;
    let description = require_str(params, "description")?;
    let files = opt_str_array(params, "files");
    if files.is_empty() {
        return Err(Error::Validation("files must not be empty".into()));
    }

    let id = ctx
        .db
        .begin_work(agent, ctx.current_session(), description, &files, now_ms())?;

    // Report any live locks on the declared files so the agent can avoid
    // collisions.
    let mut conflicts = Vec::new();
    for file in &files {
        if let Some(lock) = ctx.db.get_active_lock(file, now_ms())? {
            if lock.agent_id != agent {
                conflicts.push(lock);
            }
        }
    }

    Ok(json!({ "id": id, "lock_conflicts": conflicts }))
}

fn what_changed(ctx: &ServerContext, params: &Value) -> Result<Value> {
    let since = match opt_str(params, "since") {
        Some(raw) => parse_ts(raw),
        None => match ctx.db.last_completed_session()? {
            Some(previous) => previous.started_at,
            None => Utc::now() - chrono::Duration::days(7),
        },
    };

    let changes = ctx.db.changes_since(since, opt_i64(params, "limit"))?;
    let most_changed = ctx.db.most_changed_files(Some(10))?;
    Ok(json!({
        "since": since.to_rfc3339(),
        "count": changes.len(),
        "changes": changes,
        "most_changed_files": most_changed,
    }))
}

fn get_dependency_map(ctx: &ServerContext, params: &Value) -> Result<Value> {
    let map = ctx.db.dependency_map(opt_str(params, "file_path"))?;
    Ok(json!({ "dependencies": map }))
}

// ============================================
// Decisions
// ============================================

fn new_decision_from(params: &Value) -> Result<NewDecision> {
    Ok(NewDecision {
        decision: require_str(params, "decision")?.to_string(),
        rationale: opt_str(params, "rationale").map(str::to_string),
        affected_files: opt_str_array(params, "affected_files"),
        tags: opt_str_array(params, "tags"),
        status: opt_enum(params, "status")?,
        depends_on: opt_id_array(params, "depends_on"),
    })
}

fn record_decision(ctx: &ServerContext, params: &Value) -> Result<Value> {
    let item = new_decision_from(params)?;
    let similar = ctx.db.find_similar_decisions(&item.decision)?;
    let id = ctx
        .db
        .create_decision(&item, ctx.current_session(), Utc::now())?;

    let mut out = json!({ "id": id });
    let obj = out.as_object_mut().expect("literal object");

    if let Some(old_id) = opt_i64(params, "supersedes") {
        ctx.db.supersede_decision(old_id, id)?;
        obj.insert("supersedes".to_string(), json!(old_id));
    }
    let similar: Vec<_> = similar.iter().filter(|d| d.id != id).collect();
    if !similar.is_empty() {
        obj.insert(
            "similar_decisions".to_string(),
            json!(similar
                .iter()
                .map(|d| json!({"id": d.id, "decision": d.decision}))
                .collect::<Vec<_>>()),
        );
    }
    Ok(out)
}

fn record_decisions_batch(ctx: &ServerContext, params: &Value) -> Result<Value> {
    let entries = params
        .get("decisions")
        .and_then(Value::as_array)
        .ok_or_else(|| Error::Validation("missing required parameter: decisions".into()))?;
    let items = entries
        .iter()
        .map(new_decision_from)
        .collect::<Result<Vec<_>>>()?;
    let ids = ctx
        .db
        .create_decisions_batch(&items, ctx.current_session(), Utc::now())?;
    Ok(json!({ "ids": ids, "count": ids.len() }))
}

fn get_decisions(ctx: &ServerContext, params: &Value) -> Result<Value> {
    let decisions = ctx.db.decisions_filtered(
        opt_enum(params, "status")?,
        opt_str(params, "tag"),
        opt_i64(params, "limit"),
    )?;
    Ok(json!({ "count": decisions.len(), "decisions": decisions }))
}

fn update_decision(ctx: &ServerContext, params: &Value) -> Result<Value> {
    let id = require_i64(params, "id")?;

    if let Some(new_id) = opt_i64(params, "superseded_by") {
        ctx.db.supersede_decision(id, new_id)?;
        let decision = ctx
            .db
            .get_decision(id)?
            .ok_or_else(|| Error::not_found("decision", id))?;
        return Ok(json!(decision));
    }

    let tags = params
        .get("tags")
        .and_then(Value::as_array)
        .map(|_| opt_str_array(params, "tags"));
    let decision = ctx.db.update_decision(
        id,
        opt_str(params, "decision"),
        opt_str(params, "rationale"),
        opt_enum(params, "status")?,
        tags.as_deref(),
    )?;
    Ok(json!(decision))
}

// ============================================
// Conventions
// ============================================

fn add_convention(ctx: &ServerContext, params: &Value) -> Result<Value> {
    let category = require_str(params, "category")?;
    let rule = require_str(params, "rule")?;
    let examples = opt_str_array(params, "examples");
    let id = ctx
        .db
        .create_convention(category, rule, &examples, ctx.current_session(), Utc::now())?;
    Ok(json!({ "id": id }))
}

fn get_conventions(ctx: &ServerContext, params: &Value) -> Result<Value> {
    let conventions = ctx.db.conventions_filtered(
        opt_str(params, "category"),
        opt_bool(params, "include_disabled").unwrap_or(false),
        opt_i64(params, "limit"),
    )?;
    Ok(json!({ "count": conventions.len(), "conventions": conventions }))
}

fn toggle_convention(ctx: &ServerContext, params: &Value) -> Result<Value> {
    let id = require_i64(params, "id")?;
    let enforced = ctx.db.toggle_convention(id)?;
    Ok(json!({ "id": id, "enforced": enforced }))
}

// ============================================
// Tasks
// ============================================

fn create_task(ctx: &ServerContext, params: &Value) -> Result<Value> {
    let title = require_str(params, "title")?;
    let id = ctx.db.create_task(
        title,
        opt_str(params, "description"),
        opt_enum(params, "priority")?,
        &opt_str_array(params, "assigned_files"),
        &opt_str_array(params, "tags"),
        &opt_id_array(params, "blocked_by"),
        ctx.current_session(),
        Utc::now(),
    )?;
    let task = ctx.db.get_task(id)?;
    Ok(json!({ "id": id, "task": task }))
}

fn update_task(ctx: &ServerContext, params: &Value) -> Result<Value> {
    let id = require_i64(params, "id")?;
    let patch = TaskPatch {
        title: opt_str(params, "title").map(str::to_string),
        description: opt_str(params, "description").map(str::to_string),
        status: opt_enum(params, "status")?,
        priority: opt_enum(params, "priority")?,
        assigned_files: params
            .get("assigned_files")
            .and_then(Value::as_array)
            .map(|_| opt_str_array(params, "assigned_files")),
        tags: params
            .get("tags")
            .and_then(Value::as_array)
            .map(|_| opt_str_array(params, "tags")),
        blocked_by: params
            .get("blocked_by")
            .and_then(Value::as_array)
            .map(|_| opt_id_array(params, "blocked_by")),
    };

    let now = Utc::now();
    let (task, became_done) = ctx.db.update_task(id, &patch, now)?;

    let mut out = json!({ "task": task });
    if became_done {
        // Completion may fire task-complete events.
        let fired = ctx.db.trigger_task_complete(id, now)?;
        if !fired.is_empty() {
            out.as_object_mut()
                .expect("literal object")
                .insert("triggered_events".to_string(), json!(fired));
        }
    }
    Ok(out)
}

fn get_tasks(ctx: &ServerContext, params: &Value) -> Result<Value> {
    let tasks = ctx.db.tasks_filtered(
        opt_enum(params, "status")?,
        opt_enum(params, "priority")?,
        opt_str(params, "claimed_by"),
        opt_i64(params, "limit"),
    )?;
    Ok(json!({ "count": tasks.len(), "tasks": tasks }))
}

// ============================================
// Checkpoints & context
// ============================================

fn checkpoint(ctx: &ServerContext, params: &Value) -> Result<Value> {
    let understanding = require_str(params, "current_understanding")?;
    let progress = require_str(params, "progress")?;
    let id = ctx.db.save_checkpoint(
        ctx.current_session(),
        opt_str(params, "agent_name"),
        understanding,
        progress,
        &opt_str_array(params, "relevant_files"),
        Utc::now(),
    )?;
    Ok(json!({ "id": id }))
}

fn get_checkpoint(ctx: &ServerContext, params: &Value) -> Result<Value> {
    let session_id = opt_i64(params, "session_id").or(ctx.current_session());
    let checkpoint = match ctx.db.get_checkpoint(session_id)? {
        Some(cp) => Some(cp),
        // Fall back to the latest checkpoint from any session.
        None => ctx.db.get_checkpoint(None)?,
    };
    Ok(json!({ "checkpoint": checkpoint }))
}

fn track_context(ctx: &ServerContext, params: &Value) -> Result<Value> {
    let session_id = ctx
        .current_session()
        .ok_or_else(|| Error::Validation("no open session".into()))?;
    let input = opt_i64(params, "input_bytes").unwrap_or(0);
    let output = opt_i64(params, "output_bytes").unwrap_or(0);
    let bytes = ctx.db.track_context(session_id, input, output, Utc::now())?;
    let report = pressure::check_pressure(&ctx.db, Some(session_id), None)?;
    Ok(json!({ "session_bytes": bytes, "context_pressure": report }))
}

fn check_events(ctx: &ServerContext, params: &Value) -> Result<Value> {
    let now = Utc::now();
    // Overdue datetime events may have expired since session start.
    ctx.db.trigger_expired_datetime(now)?;
    let triggered = ctx
        .db
        .get_events(Some(crate::types::EventStatus::Triggered), Some(50))?;

    let reported = opt_i64(params, "tokens_used").map(|tokens_used| ReportedTokens {
        tokens_used,
        window_total: opt_i64(params, "context_window"),
    });
    let report = pressure::check_pressure(&ctx.db, ctx.current_session(), reported)?;

    Ok(json!({
        "triggered_events": triggered,
        "context_pressure": report,
    }))
}

// ============================================
// Milestones & events
// ============================================

fn record_milestone(ctx: &ServerContext, params: &Value) -> Result<Value> {
    let title = require_str(params, "title")?;
    let id = ctx.db.record_milestone(
        title,
        opt_str(params, "description"),
        opt_str(params, "version"),
        &opt_str_array(params, "tags"),
        ctx.current_session(),
        Utc::now(),
    )?;
    Ok(json!({ "id": id }))
}

fn get_milestones(ctx: &ServerContext, params: &Value) -> Result<Value> {
    let milestones = ctx.db.milestones(opt_i64(params, "limit"))?;
    Ok(json!({ "count": milestones.len(), "milestones": milestones }))
}

fn schedule_event(ctx: &ServerContext, params: &Value) -> Result<Value> {
    let event = NewScheduledEvent {
        title: require_str(params, "title")?.to_string(),
        description: opt_str(params, "description").map(str::to_string),
        trigger_type: require_enum(params, "trigger_type")?,
        trigger_value: opt_str(params, "trigger_value").map(str::to_string),
        requires_approval: opt_bool(params, "requires_approval").unwrap_or(false),
        action_summary: opt_str(params, "action_summary").map(str::to_string),
        action_data: params.get("action_data").cloned(),
        priority: opt_enum(params, "priority")?,
        tags: opt_str_array(params, "tags"),
        recurrence: opt_enum(params, "recurrence")?,
    };
    let id = ctx
        .db
        .schedule_event(&event, ctx.current_session(), Utc::now())?;
    Ok(json!({ "id": id }))
}

fn get_scheduled_events(ctx: &ServerContext, params: &Value) -> Result<Value> {
    let events = ctx
        .db
        .get_events(opt_enum(params, "status")?, opt_i64(params, "limit"))?;
    Ok(json!({ "count": events.len(), "events": events }))
}

fn update_scheduled_event(ctx: &ServerContext, params: &Value) -> Result<Value> {
    let id = require_i64(params, "id")?;
    let event = ctx.db.update_event(
        id,
        opt_str(params, "title"),
        opt_str(params, "description"),
        opt_enum(params, "status")?,
        opt_str(params, "trigger_value"),
        opt_enum(params, "priority")?,
    )?;
    Ok(json!(event))
}

fn acknowledge_event(ctx: &ServerContext, params: &Value) -> Result<Value> {
    let id = require_i64(params, "id")?;
    let approved = opt_bool(params, "approved").unwrap_or(true);
    let (event, clone_id) = ctx.db.acknowledge_event(id, approved, Utc::now())?;
    Ok(json!({ "event": event, "next_instance_id": clone_id }))
}

// ============================================
// Dump
// ============================================

fn dump(ctx: &ServerContext, params: &Value) -> Result<Value> {
    let text = require_str(params, "text")?;
    let hint = match opt_str(params, "hint") {
        Some(raw) => Some(
            raw.parse::<DumpKind>()
                .map_err(Error::Validation)?,
        ),
        None => None,
    };
    let tags = opt_str_array(params, "tags");
    let session = ctx.current_session();
    let now = Utc::now();

    let verdict = classify::classify(text, hint);
    let title = truncate_chars(text.lines().next().unwrap_or(text).trim(), 120);

    let stored_id = match verdict.kind {
        DumpKind::Decision => ctx.db.create_decision(
            &NewDecision {
                decision: text.to_string(),
                rationale: None,
                affected_files: vec![],
                tags: tags.clone(),
                status: None,
                depends_on: vec![],
            },
            session,
            now,
        )?,
        DumpKind::Task => {
            ctx.db
                .create_task(&title, Some(text), None, &[], &tags, &[], session, now)?
        }
        DumpKind::Convention => {
            ctx.db
                .create_convention("general", text, &[], session, now)?
        }
        DumpKind::Finding => ctx.db.add_knowledge(&title, text, &tags, session, now)?,
    };

    let mut out = serde_json::to_value(&verdict)?;
    out.as_object_mut()
        .expect("classification is an object")
        .insert("stored_id".to_string(), json!(stored_id));
    Ok(out)
}

// ============================================
// Coordination
// ============================================

fn claim_task(ctx: &ServerContext, params: &Value) -> ToolResponse {
    let inner = || -> Result<ToolResponse> {
        let task_id = require_i64(params, "task_id")?;
        let agent_id = require_str(params, "agent_id")?;
        match ctx.db.claim_task(task_id, agent_id, now_ms())? {
            Ok(outcome) => Ok(ToolResponse::ok_json(&outcome)),
            Err(claim_err) => {
                let message = claim_err.message(task_id);
                let payload = json!({
                    "error": claim_err,
                    "message": message,
                });
                Ok(ToolResponse::error(payload.to_string()))
            }
        }
    };
    inner().unwrap_or_else(|e| ToolResponse::error(e.to_string()))
}

fn release_task(ctx: &ServerContext, params: &Value) -> Result<Value> {
    let task_id = require_i64(params, "task_id")?;
    let agent_id = require_str(params, "agent_id")?;
    let force = opt_bool(params, "force").unwrap_or(false);
    let task = ctx.db.release_task(task_id, agent_id, force)?;
    Ok(json!({ "task": task }))
}

fn agent_sync(ctx: &ServerContext, params: &Value) -> Result<Value> {
    let id = opt_str(params, "agent_id")
        .or(opt_str(params, "id"))
        .ok_or_else(|| Error::Validation("missing required parameter: agent_id".into()))?;
    let status: AgentStatus = opt_enum(params, "status")?.unwrap_or(AgentStatus::Working);
    let specializations = params
        .get("specializations")
        .and_then(Value::as_array)
        .map(|_| opt_str_array(params, "specializations"));

    let outcome = ctx.db.agent_sync(
        &AgentSyncInput {
            id,
            name: opt_str(params, "name").unwrap_or(id),
            status,
            current_task_id: opt_i64(params, "current_task_id"),
            specializations,
        },
        now_ms(),
    )?;
    Ok(json!(outcome))
}

fn get_agents(ctx: &ServerContext) -> Result<Value> {
    let agents = ctx.db.get_agents()?;
    Ok(json!({ "count": agents.len(), "agents": agents }))
}

fn broadcast(ctx: &ServerContext, params: &Value) -> Result<Value> {
    let from = require_str(params, "from_agent")?;
    let message = require_str(params, "message")?;
    let id = ctx.db.create_broadcast(
        from,
        message,
        opt_str(params, "target_agent"),
        opt_i64(params, "expires_in_minutes"),
        now_ms(),
    )?;
    Ok(json!({ "id": id }))
}

fn route_task(ctx: &ServerContext, params: &Value) -> Result<Value> {
    let task_id = require_i64(params, "task_id")?;
    let ranked = ctx.db.route_task(task_id)?;
    let suggestions: Vec<Value> = ranked
        .into_iter()
        .map(|(agent, score)| json!({ "agent": agent, "match_pct": score }))
        .collect();
    Ok(json!({ "task_id": task_id, "suggestions": suggestions }))
}

// ============================================
// Search
// ============================================

fn search(ctx: &ServerContext, params: &Value) -> Result<Value> {
    let query = require_str(params, "query")?;
    let scopes = match params.get("scopes").and_then(Value::as_array) {
        Some(raw) => {
            let mut scopes = Vec::with_capacity(raw.len());
            for entry in raw {
                let name = entry
                    .as_str()
                    .ok_or_else(|| Error::Validation("scopes must be strings".into()))?;
                scopes.push(name.parse::<SearchScope>().map_err(Error::Validation)?);
            }
            Some(scopes)
        }
        None => None,
    };
    let context_chars = opt_i64(params, "context_chars").unwrap_or(0).max(0) as usize;

    let results = ctx.db.search(
        query,
        scopes,
        opt_i64(params, "limit"),
        context_chars,
        Some(&ctx.options.project_root),
    )?;
    Ok(json!(results))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ServerOptions;
    use crate::db::Database;

    fn ctx() -> ServerContext {
        let db = Database::open_in_memory().unwrap();
        db.migrate().unwrap();
        ServerContext::new(db, ServerOptions::new("/tmp/proj"))
    }

    fn call(ctx: &ServerContext, action: &str, params: Value) -> Value {
        let resp = dispatch_memory(ctx, action, &params);
        assert!(
            !resp.is_error(),
            "action {} failed: {}",
            action,
            resp.text_payload()
        );
        serde_json::from_str(resp.text_payload()).unwrap()
    }

    #[test]
    fn test_unknown_action() {
        let ctx = ctx();
        let resp = dispatch_memory(&ctx, "frobnicate", &json!({}));
        assert!(resp.is_error());
        assert!(resp.text_payload().contains("Unknown method: frobnicate"));
    }

    #[test]
    fn test_record_change_and_history() {
        let ctx = ctx();
        let out = call(
            &ctx,
            "record_change",
            json!({"changes": [
                {"file_path": "src/x.ts", "change_type": "created", "description": "init"},
            ]}),
        );
        assert_eq!(out["count"], 1);

        let history = call(&ctx, "get_file_history", json!({"file_path": "src/x.ts"}));
        assert_eq!(history["count"], 1);
        assert_eq!(history["changes"][0]["change_type"], "created");
    }

    #[test]
    fn test_record_change_validation() {
        let ctx = ctx();
        let resp = dispatch_memory(
            &ctx,
            "record_change",
            &json!({"changes": [{"file_path": "a", "change_type": "overwritten", "description": "x"}]}),
        );
        assert!(resp.is_error());
        assert!(resp.text_payload().contains("unknown change type"));
    }

    #[test]
    fn test_supersede_flow() {
        let ctx = ctx();
        let first = call(&ctx, "record_decision", json!({"decision": "Use WAL"}));
        let first_id = first["id"].as_i64().unwrap();

        let second = call(
            &ctx,
            "record_decision",
            json!({"decision": "Use WAL mode for performance", "supersedes": first_id}),
        );
        assert_eq!(second["supersedes"], first_id);

        let superseded = call(&ctx, "get_decisions", json!({"status": "superseded"}));
        assert_eq!(superseded["count"], 1);
        assert_eq!(superseded["decisions"][0]["id"], first_id);

        let active = call(&ctx, "get_decisions", json!({"status": "active"}));
        assert_eq!(active["count"], 1);
        assert_eq!(active["decisions"][0]["id"], second["id"]);
    }

    #[test]
    fn test_claim_conflict_wire_shape() {
        let ctx = ctx();
        let created = call(&ctx, "create_task", json!({"title": "t"}));
        let task_id = created["id"].as_i64().unwrap();

        let ok = dispatch_memory(
            &ctx,
            "claim_task",
            &json!({"task_id": task_id, "agent_id": "A"}),
        );
        assert!(!ok.is_error());

        let conflict = dispatch_memory(
            &ctx,
            "claim_task",
            &json!({"task_id": task_id, "agent_id": "B"}),
        );
        assert!(conflict.is_error());
        let payload: Value = serde_json::from_str(conflict.text_payload()).unwrap();
        assert_eq!(payload["message"], "already claimed by A");
        assert_eq!(payload["error"]["kind"], "already_claimed_by");
    }

    #[test]
    fn test_task_completion_fires_events() {
        let ctx = ctx();
        let created = call(&ctx, "create_task", json!({"title": "ship"}));
        let task_id = created["id"].as_i64().unwrap();
        call(
            &ctx,
            "schedule_event",
            json!({
                "title": "post-ship review",
                "trigger_type": "task_complete",
                "trigger_value": task_id.to_string(),
            }),
        );

        let updated = call(
            &ctx,
            "update_task",
            json!({"id": task_id, "status": "done"}),
        );
        assert_eq!(updated["triggered_events"][0]["title"], "post-ship review");
        assert_eq!(updated["task"]["status"], "done");
    }

    #[test]
    fn test_file_note_flow_with_staleness() {
        let ctx = ctx();
        let note = call(
            &ctx,
            "set_file_notes",
            json!({"file_path": "src/gone.rs", "purpose": "mystery"}),
        );
        // The file does not exist on disk, so the verdict is unknown.
        assert_eq!(note["staleness"]["confidence"], "unknown");

        let fetched = call(&ctx, "get_file_notes", json!({"file_path": "src/gone.rs"}));
        assert_eq!(fetched["purpose"], "mystery");

        let missing = dispatch_memory(&ctx, "get_file_notes", &json!({"file_path": "nope.rs"}));
        assert!(missing.is_error());
    }

    #[test]
    fn test_dump_routes_by_kind() {
        let ctx = ctx();
        let out = call(
            &ctx,
            "dump",
            json!({"text": "We decided to use sqlite because the tradeoff favors zero ops"}),
        );
        assert_eq!(out["type"], "decision");
        assert!(out["stored_id"].is_i64());

        let finding = call(&ctx, "dump", json!({"text": "mysterious blob of text"}));
        assert_eq!(finding["type"], "finding");

        // Findings do not pollute change statistics.
        assert_eq!(ctx.db.change_count().unwrap(), 0);
        assert_eq!(ctx.db.knowledge_entries(None, None).unwrap().len(), 1);
    }

    #[test]
    fn test_dump_hint_cannot_promote_contentless_text() {
        let ctx = ctx();
        let out = call(&ctx, "dump", json!({"text": "xyzzy", "hint": "task"}));
        assert_eq!(out["type"], "finding");

        // The hinted kind gets no row; the text lands in the knowledge store.
        assert_eq!(ctx.db.tasks_filtered(None, None, None, None).unwrap().len(), 0);
        let entries = ctx.db.knowledge_entries(None, None).unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].content, "xyzzy");
    }

    #[test]
    fn test_check_events_with_reported_tokens() {
        let ctx = ctx();
        let out = call(
            &ctx,
            "check_events",
            json!({"tokens_used": 90, "context_window": 100}),
        );
        assert_eq!(out["context_pressure"]["severity"], "urgent");
    }

    #[test]
    fn test_agent_sync_and_broadcast() {
        let ctx = ctx();
        call(
            &ctx,
            "agent_sync",
            json!({"agent_id": "a", "name": "alpha", "status": "working"}),
        );
        call(
            &ctx,
            "broadcast",
            json!({"from_agent": "a", "message": "heads up"}),
        );

        let sync = call(&ctx, "agent_sync", json!({"agent_id": "b", "status": "idle"}));
        assert_eq!(sync["broadcasts"][0]["message"], "heads up");

        let agents = call(&ctx, "get_agents", json!({}));
        assert_eq!(agents["count"], 2);
    }
}
