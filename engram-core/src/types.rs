//! Core domain types for engram
//!
//! These types are the canonical data model for per-project engineering
//! memory recorded by AI coding agents.
//!
//! ## Terminology
//!
//! | Term | Definition |
//! |------|------------|
//! | **Session** | A bounded span of one agent's work on the project |
//! | **Change** | An agent-recorded note that a file was altered |
//! | **Decision** | A durable design choice, with supersede chains |
//! | **Convention** | A repo-wide rule whose enforcement can be toggled |
//! | **Task** | A unit of work that exactly one agent may claim |
//! | **File note** | Per-file metadata guarded by staleness signals |
//! | **Agent** | A registered process identity with a heartbeat |
//! | **Broadcast** | A message visible to other agents until read/expired |
//!
//! Timestamps follow the column type in the schema: RFC 3339 strings map to
//! [`DateTime<Utc>`], epoch-millisecond integers map to `i64`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ============================================
// Sessions
// ============================================

/// A bounded span of an agent's work on the project.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub id: i64,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub summary: Option<String>,
    pub agent_name: String,
    pub project_root: String,
    pub tags: Vec<String>,
}

// ============================================
// Changes
// ============================================

/// Kind of file alteration an agent recorded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeType {
    Created,
    Modified,
    Deleted,
    Refactored,
    Renamed,
    Moved,
    ConfigChanged,
}

impl ChangeType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChangeType::Created => "created",
            ChangeType::Modified => "modified",
            ChangeType::Deleted => "deleted",
            ChangeType::Refactored => "refactored",
            ChangeType::Renamed => "renamed",
            ChangeType::Moved => "moved",
            ChangeType::ConfigChanged => "config_changed",
        }
    }
}

impl std::str::FromStr for ChangeType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "created" => Ok(ChangeType::Created),
            "modified" => Ok(ChangeType::Modified),
            "deleted" => Ok(ChangeType::Deleted),
            "refactored" => Ok(ChangeType::Refactored),
            "renamed" => Ok(ChangeType::Renamed),
            "moved" => Ok(ChangeType::Moved),
            "config_changed" => Ok(ChangeType::ConfigChanged),
            _ => Err(format!("unknown change type: {}", s)),
        }
    }
}

/// How far a change's effects are expected to reach.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ImpactScope {
    Local,
    Module,
    CrossModule,
    Global,
}

impl ImpactScope {
    pub fn as_str(&self) -> &'static str {
        match self {
            ImpactScope::Local => "local",
            ImpactScope::Module => "module",
            ImpactScope::CrossModule => "cross_module",
            ImpactScope::Global => "global",
        }
    }
}

impl std::str::FromStr for ImpactScope {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "local" => Ok(ImpactScope::Local),
            "module" => Ok(ImpactScope::Module),
            "cross_module" => Ok(ImpactScope::CrossModule),
            "global" => Ok(ImpactScope::Global),
            _ => Err(format!("unknown impact scope: {}", s)),
        }
    }
}

/// A recorded file alteration, attributed to a session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Change {
    pub id: i64,
    pub session_id: Option<i64>,
    pub timestamp: DateTime<Utc>,
    pub file_path: String,
    pub change_type: ChangeType,
    pub description: String,
    pub diff_summary: Option<String>,
    pub impact_scope: ImpactScope,
}

/// Input shape for recording one change.
#[derive(Debug, Clone, Deserialize)]
pub struct NewChange {
    pub file_path: String,
    pub change_type: ChangeType,
    pub description: String,
    #[serde(default)]
    pub diff_summary: Option<String>,
    #[serde(default)]
    pub impact_scope: Option<ImpactScope>,
}

// ============================================
// Decisions
// ============================================

/// Lifecycle state of a decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionStatus {
    Active,
    Experimental,
    Superseded,
    Deprecated,
}

impl DecisionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DecisionStatus::Active => "active",
            DecisionStatus::Experimental => "experimental",
            DecisionStatus::Superseded => "superseded",
            DecisionStatus::Deprecated => "deprecated",
        }
    }
}

impl std::str::FromStr for DecisionStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(DecisionStatus::Active),
            "experimental" => Ok(DecisionStatus::Experimental),
            "superseded" => Ok(DecisionStatus::Superseded),
            "deprecated" => Ok(DecisionStatus::Deprecated),
            _ => Err(format!("unknown decision status: {}", s)),
        }
    }
}

/// A durable architectural or design choice.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Decision {
    pub id: i64,
    pub session_id: Option<i64>,
    pub timestamp: DateTime<Utc>,
    pub decision: String,
    pub rationale: Option<String>,
    pub affected_files: Vec<String>,
    pub tags: Vec<String>,
    pub status: DecisionStatus,
    pub superseded_by: Option<i64>,
    pub depends_on: Vec<i64>,
}

/// Input shape for recording one decision.
#[derive(Debug, Clone, Deserialize)]
pub struct NewDecision {
    pub decision: String,
    #[serde(default)]
    pub rationale: Option<String>,
    #[serde(default)]
    pub affected_files: Vec<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub status: Option<DecisionStatus>,
    #[serde(default)]
    pub depends_on: Vec<i64>,
}

// ============================================
// Conventions
// ============================================

/// A repo-wide rule. `enforced` can be toggled without deleting history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Convention {
    pub id: i64,
    pub session_id: Option<i64>,
    pub timestamp: DateTime<Utc>,
    pub category: String,
    pub rule: String,
    pub examples: Vec<String>,
    pub enforced: bool,
}

// ============================================
// Tasks
// ============================================

/// Task workflow state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Backlog,
    InProgress,
    Review,
    Blocked,
    Done,
    Cancelled,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Backlog => "backlog",
            TaskStatus::InProgress => "in_progress",
            TaskStatus::Review => "review",
            TaskStatus::Blocked => "blocked",
            TaskStatus::Done => "done",
            TaskStatus::Cancelled => "cancelled",
        }
    }

    /// Done and cancelled tasks accept no further claims.
    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskStatus::Done | TaskStatus::Cancelled)
    }
}

impl std::str::FromStr for TaskStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "backlog" => Ok(TaskStatus::Backlog),
            "in_progress" => Ok(TaskStatus::InProgress),
            "review" => Ok(TaskStatus::Review),
            "blocked" => Ok(TaskStatus::Blocked),
            "done" => Ok(TaskStatus::Done),
            "cancelled" => Ok(TaskStatus::Cancelled),
            _ => Err(format!("unknown task status: {}", s)),
        }
    }
}

/// Task priority, also used for scheduled events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    Critical,
    High,
    Medium,
    Low,
}

impl Priority {
    pub fn as_str(&self) -> &'static str {
        match self {
            Priority::Critical => "critical",
            Priority::High => "high",
            Priority::Medium => "medium",
            Priority::Low => "low",
        }
    }
}

impl std::str::FromStr for Priority {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "critical" => Ok(Priority::Critical),
            "high" => Ok(Priority::High),
            "medium" => Ok(Priority::Medium),
            "low" => Ok(Priority::Low),
            _ => Err(format!("unknown priority: {}", s)),
        }
    }
}

/// A unit of work; at most one agent holds the claim.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: i64,
    pub session_id: Option<i64>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub title: String,
    pub description: Option<String>,
    pub status: TaskStatus,
    pub priority: Priority,
    pub assigned_files: Vec<String>,
    pub tags: Vec<String>,
    pub completed_at: Option<DateTime<Utc>>,
    pub blocked_by: Vec<i64>,
    pub claimed_by: Option<String>,
    pub claimed_at: Option<i64>,
}

/// Partial update for a task. `None` leaves the field untouched.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TaskPatch {
    pub title: Option<String>,
    pub description: Option<String>,
    pub status: Option<TaskStatus>,
    pub priority: Option<Priority>,
    pub assigned_files: Option<Vec<String>>,
    pub tags: Option<Vec<String>>,
    pub blocked_by: Option<Vec<i64>>,
}

// ============================================
// File notes
// ============================================

/// Estimated comprehension cost of a file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Complexity {
    Simple,
    Moderate,
    Complex,
    Unknown,
}

impl Complexity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Complexity::Simple => "simple",
            Complexity::Moderate => "moderate",
            Complexity::Complex => "complex",
            Complexity::Unknown => "unknown",
        }
    }
}

impl std::str::FromStr for Complexity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "simple" => Ok(Complexity::Simple),
            "moderate" => Ok(Complexity::Moderate),
            "complex" => Ok(Complexity::Complex),
            "unknown" => Ok(Complexity::Unknown),
            _ => Err(format!("unknown complexity: {}", s)),
        }
    }
}

/// Per-file metadata cached to avoid re-reading the file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileNote {
    pub file_path: String,
    pub purpose: Option<String>,
    pub dependencies: Vec<String>,
    pub dependents: Vec<String>,
    pub layer: Option<String>,
    pub last_reviewed: DateTime<Utc>,
    pub last_modified_session: Option<i64>,
    pub notes: Option<String>,
    pub complexity: Option<Complexity>,
    pub file_mtime: Option<i64>,
    pub content_hash: Option<String>,
    pub git_branch: Option<String>,
    pub executive_summary: Option<String>,
}

/// Partial upsert for a file note. `None` preserves the stored value.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct FileNotePatch {
    pub purpose: Option<String>,
    pub dependencies: Option<Vec<String>>,
    pub dependents: Option<Vec<String>>,
    pub layer: Option<String>,
    pub notes: Option<String>,
    pub complexity: Option<Complexity>,
    pub file_mtime: Option<i64>,
    pub content_hash: Option<String>,
    pub git_branch: Option<String>,
    pub executive_summary: Option<String>,
}

// ============================================
// Milestones
// ============================================

/// A named point in project history, e.g. a release.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Milestone {
    pub id: i64,
    pub session_id: Option<i64>,
    pub timestamp: DateTime<Utc>,
    pub title: String,
    pub description: Option<String>,
    pub version: Option<String>,
    pub tags: Vec<String>,
}

// ============================================
// Scheduled events
// ============================================

/// What fires a scheduled event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerType {
    NextSession,
    Datetime,
    TaskComplete,
    Manual,
}

impl TriggerType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TriggerType::NextSession => "next_session",
            TriggerType::Datetime => "datetime",
            TriggerType::TaskComplete => "task_complete",
            TriggerType::Manual => "manual",
        }
    }
}

impl std::str::FromStr for TriggerType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "next_session" => Ok(TriggerType::NextSession),
            "datetime" => Ok(TriggerType::Datetime),
            "task_complete" => Ok(TriggerType::TaskComplete),
            "manual" => Ok(TriggerType::Manual),
            _ => Err(format!("unknown trigger type: {}", s)),
        }
    }
}

/// Scheduled-event state machine states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventStatus {
    Pending,
    Triggered,
    Acknowledged,
    Executed,
    Cancelled,
    Snoozed,
}

impl EventStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventStatus::Pending => "pending",
            EventStatus::Triggered => "triggered",
            EventStatus::Acknowledged => "acknowledged",
            EventStatus::Executed => "executed",
            EventStatus::Cancelled => "cancelled",
            EventStatus::Snoozed => "snoozed",
        }
    }
}

impl std::str::FromStr for EventStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(EventStatus::Pending),
            "triggered" => Ok(EventStatus::Triggered),
            "acknowledged" => Ok(EventStatus::Acknowledged),
            "executed" => Ok(EventStatus::Executed),
            "cancelled" => Ok(EventStatus::Cancelled),
            "snoozed" => Ok(EventStatus::Snoozed),
            _ => Err(format!("unknown event status: {}", s)),
        }
    }
}

/// Recurrence policy applied when an event is acknowledged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Recurrence {
    Once,
    EverySession,
    Daily,
    Weekly,
}

impl Recurrence {
    pub fn as_str(&self) -> &'static str {
        match self {
            Recurrence::Once => "once",
            Recurrence::EverySession => "every_session",
            Recurrence::Daily => "daily",
            Recurrence::Weekly => "weekly",
        }
    }

    /// Whether acknowledging an instance spawns a fresh pending clone.
    pub fn recurs(&self) -> bool {
        !matches!(self, Recurrence::Once)
    }
}

impl std::str::FromStr for Recurrence {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "once" => Ok(Recurrence::Once),
            "every_session" => Ok(Recurrence::EverySession),
            "daily" => Ok(Recurrence::Daily),
            "weekly" => Ok(Recurrence::Weekly),
            _ => Err(format!("unknown recurrence: {}", s)),
        }
    }
}

/// A deferred event awaiting its trigger condition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduledEvent {
    pub id: i64,
    pub session_id: Option<i64>,
    pub created_at: DateTime<Utc>,
    pub title: String,
    pub description: Option<String>,
    pub trigger_type: TriggerType,
    pub trigger_value: Option<String>,
    pub status: EventStatus,
    pub triggered_at: Option<DateTime<Utc>>,
    pub acknowledged_at: Option<DateTime<Utc>>,
    pub requires_approval: bool,
    pub action_summary: Option<String>,
    pub action_data: Option<serde_json::Value>,
    pub priority: Priority,
    pub tags: Vec<String>,
    pub recurrence: Option<Recurrence>,
}

/// Input shape for scheduling one event.
#[derive(Debug, Clone, Deserialize)]
pub struct NewScheduledEvent {
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    pub trigger_type: TriggerType,
    #[serde(default)]
    pub trigger_value: Option<String>,
    #[serde(default)]
    pub requires_approval: bool,
    #[serde(default)]
    pub action_summary: Option<String>,
    #[serde(default)]
    pub action_data: Option<serde_json::Value>,
    #[serde(default)]
    pub priority: Option<Priority>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub recurrence: Option<Recurrence>,
}

// ============================================
// Agents & coordination
// ============================================

/// Agent presence state, driven by heartbeats.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentStatus {
    Idle,
    Working,
    Done,
    Stale,
}

impl AgentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AgentStatus::Idle => "idle",
            AgentStatus::Working => "working",
            AgentStatus::Done => "done",
            AgentStatus::Stale => "stale",
        }
    }
}

impl std::str::FromStr for AgentStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "idle" => Ok(AgentStatus::Idle),
            "working" => Ok(AgentStatus::Working),
            "done" => Ok(AgentStatus::Done),
            "stale" => Ok(AgentStatus::Stale),
            _ => Err(format!("unknown agent status: {}", s)),
        }
    }
}

/// A registered agent process.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Agent {
    pub id: String,
    pub name: String,
    pub last_seen: i64,
    pub current_task_id: Option<i64>,
    pub status: AgentStatus,
    pub specializations: Vec<String>,
}

/// An inter-agent message with read receipts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Broadcast {
    pub id: i64,
    pub from_agent: String,
    pub message: String,
    pub created_at: i64,
    pub expires_at: Option<i64>,
    pub read_by: Vec<String>,
    pub target_agent: Option<String>,
}

/// An advisory, TTL-bounded file reservation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileLock {
    pub file_path: String,
    pub agent_id: String,
    pub reason: Option<String>,
    pub locked_at: i64,
    pub expires_at: i64,
}

/// Lifecycle of a declared unit of in-flight work.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PendingWorkStatus {
    Pending,
    Completed,
    Abandoned,
}

impl PendingWorkStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PendingWorkStatus::Pending => "pending",
            PendingWorkStatus::Completed => "completed",
            PendingWorkStatus::Abandoned => "abandoned",
        }
    }
}

impl std::str::FromStr for PendingWorkStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(PendingWorkStatus::Pending),
            "completed" => Ok(PendingWorkStatus::Completed),
            "abandoned" => Ok(PendingWorkStatus::Abandoned),
            _ => Err(format!("unknown pending work status: {}", s)),
        }
    }
}

/// Work an agent declared before touching files; auto-closed when a change
/// for any listed file is recorded.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PendingWork {
    pub id: i64,
    pub agent_id: String,
    pub session_id: Option<i64>,
    pub description: String,
    pub files: Vec<String>,
    pub started_at: i64,
    pub status: PendingWorkStatus,
}

// ============================================
// Checkpoints & context accounting
// ============================================

/// A mid-session understanding snapshot. Last write wins per session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionCheckpoint {
    pub id: i64,
    pub session_id: Option<i64>,
    pub agent_name: Option<String>,
    pub created_at: DateTime<Utc>,
    pub current_understanding: String,
    pub progress: String,
    pub relevant_files: Vec<String>,
}

/// Accumulated request/response byte counts for one session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionBytes {
    pub session_id: i64,
    pub input_bytes: i64,
    pub output_bytes: i64,
    pub tool_calls: i64,
    pub updated_at: DateTime<Utc>,
}

// ============================================
// Knowledge & handoffs
// ============================================

/// A free-form finding captured by the dump classifier.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KnowledgeEntry {
    pub id: i64,
    pub session_id: Option<i64>,
    pub created_at: DateTime<Utc>,
    pub topic: String,
    pub content: String,
    pub tags: Vec<String>,
}

/// A context-exhaustion handoff from one session to the next.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Handoff {
    pub id: i64,
    pub session_id: Option<i64>,
    pub agent_name: Option<String>,
    pub created_at: DateTime<Utc>,
    pub reason: String,
    pub summary: Option<String>,
    pub acknowledged: bool,
}

// ============================================
// Derived values
// ============================================

/// Confidence that a file note still describes the file on disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StalenessConfidence {
    High,
    Medium,
    Stale,
    Unknown,
}

impl StalenessConfidence {
    pub fn as_str(&self) -> &'static str {
        match self {
            StalenessConfidence::High => "high",
            StalenessConfidence::Medium => "medium",
            StalenessConfidence::Stale => "stale",
            StalenessConfidence::Unknown => "unknown",
        }
    }
}

/// Staleness verdict computed on read, never stored.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Staleness {
    pub confidence: StalenessConfidence,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub staleness_hours: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub branch_warning: Option<String>,
}

/// Severity band for context-pressure reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PressureSeverity {
    Notice,
    Warning,
    Urgent,
}

impl PressureSeverity {
    pub fn as_str(&self) -> &'static str {
        match self {
            PressureSeverity::Notice => "notice",
            PressureSeverity::Warning => "warning",
            PressureSeverity::Urgent => "urgent",
        }
    }
}

/// Context-pressure report returned by `check_events`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PressureReport {
    pub severity: PressureSeverity,
    pub pct: f64,
    pub source: String,
    pub message: String,
    pub suggestions: Vec<String>,
}
