//! Multi-agent coordination
//!
//! The primitives that let several agents share one project memory without
//! stepping on each other: atomic task claims, heartbeats with stale
//! recovery, advisory file locks with TTLs, broadcasts with read receipts,
//! and pending-work declarations that auto-close when the matching change
//! lands.
//!
//! The claim guarantee rests on the conditional
//! `UPDATE ... WHERE claimed_by IS NULL`: SQLite serializes writers, so
//! exactly one of N racing claimants observes a null claim.

use rusqlite::{params, OptionalExtension};
use serde::Serialize;

use crate::db::Database;
use crate::error::{Error, Result};
use crate::types::{Agent, AgentStatus, Broadcast, FileLock, PendingWork, PendingWorkStatus, Task};
use crate::util::{decode_str_array, encode_str_array, normalize_path};

/// Working agents silent for longer than this are considered crashed.
pub const STALE_TIMEOUT_MS: i64 = 30 * 60 * 1000;

/// Default soft-lock TTL in minutes.
pub const DEFAULT_LOCK_MINUTES: i64 = 15;

/// Why a claim attempt failed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ClaimError {
    NotFound,
    AlreadyDone,
    AlreadyClaimedBy { agent: String },
}

impl ClaimError {
    pub fn message(&self, task_id: i64) -> String {
        match self {
            ClaimError::NotFound => format!("task {} not found", task_id),
            ClaimError::AlreadyDone => format!("task {} is already done", task_id),
            ClaimError::AlreadyClaimedBy { agent } => {
                format!("already claimed by {}", agent)
            }
        }
    }
}

/// A successful claim, with an advisory fit score.
#[derive(Debug, Clone, Serialize)]
pub struct ClaimOutcome {
    pub task: Task,
    /// Overlap of the agent's specializations with the task's tags, percent.
    pub match_pct: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub warning: Option<String>,
}

/// One stale agent swept during a heartbeat.
#[derive(Debug, Clone, Serialize)]
pub struct StaleRecovery {
    pub agent_id: String,
    pub released_tasks: Vec<i64>,
}

/// Result of an `agent_sync` heartbeat.
#[derive(Debug, Clone, Serialize)]
pub struct SyncOutcome {
    pub agent: Agent,
    pub recovered: Vec<StaleRecovery>,
    pub broadcasts: Vec<Broadcast>,
}

/// Heartbeat input.
#[derive(Debug, Clone)]
pub struct AgentSync<'a> {
    pub id: &'a str,
    pub name: &'a str,
    pub status: AgentStatus,
    pub current_task_id: Option<i64>,
    pub specializations: Option<Vec<String>>,
}

fn specialization_match(specializations: &[String], tags: &[String]) -> u32 {
    if tags.is_empty() {
        return 100;
    }
    let lower: Vec<String> = specializations.iter().map(|s| s.to_lowercase()).collect();
    let hits = tags
        .iter()
        .filter(|t| lower.contains(&t.to_lowercase()))
        .count();
    ((hits * 100) / tags.len()) as u32
}

impl Database {
    // ============================================
    // Task claims
    // ============================================

    /// Atomically claim a task for an agent. Exactly one of N concurrent
    /// claimants succeeds; the rest get a typed error describing the loss.
    pub fn claim_task(
        &self,
        task_id: i64,
        agent_id: &str,
        now_ms: i64,
    ) -> Result<std::result::Result<ClaimOutcome, ClaimError>> {
        let claimed = {
            let conn = self.connection();
            conn.execute(
                "UPDATE tasks SET claimed_by = ?1, claimed_at = ?2
                 WHERE id = ?3 AND claimed_by IS NULL
                   AND status NOT IN ('done', 'cancelled')",
                params![agent_id, now_ms, task_id],
            )?
        };

        if claimed == 0 {
            // Inspect the row to report why the conditional update missed.
            let task = self.get_task(task_id)?;
            let err = match task {
                None => ClaimError::NotFound,
                Some(t) if t.status.is_terminal() => ClaimError::AlreadyDone,
                Some(t) => ClaimError::AlreadyClaimedBy {
                    agent: t.claimed_by.unwrap_or_default(),
                },
            };
            return Ok(Err(err));
        }

        let task = self
            .get_task(task_id)?
            .ok_or_else(|| Error::not_found("task", task_id))?;

        let specializations = self
            .get_agent(agent_id)?
            .map(|a| a.specializations)
            .unwrap_or_default();
        let match_pct = specialization_match(&specializations, &task.tags);
        let warning = (match_pct == 0).then(|| {
            format!(
                "agent {} has no specialization overlap with task tags {:?}",
                agent_id, task.tags
            )
        });

        Ok(Ok(ClaimOutcome {
            task,
            match_pct,
            warning,
        }))
    }

    /// Release a claim. Only the holder may release unless `force` is set.
    pub fn release_task(&self, task_id: i64, agent_id: &str, force: bool) -> Result<Task> {
        let released = {
            let conn = self.connection();
            if force {
                conn.execute(
                    "UPDATE tasks SET claimed_by = NULL, claimed_at = NULL WHERE id = ?1",
                    [task_id],
                )?
            } else {
                conn.execute(
                    "UPDATE tasks SET claimed_by = NULL, claimed_at = NULL
                     WHERE id = ?1 AND claimed_by = ?2",
                    params![task_id, agent_id],
                )?
            }
        };

        if released == 0 {
            let task = self
                .get_task(task_id)?
                .ok_or_else(|| Error::not_found("task", task_id))?;
            return Err(Error::Conflict(match task.claimed_by {
                Some(holder) => format!(
                    "task {} is claimed by {}, not {}",
                    task_id, holder, agent_id
                ),
                None => format!("task {} is not claimed", task_id),
            }));
        }

        self.get_task(task_id)?
            .ok_or_else(|| Error::not_found("task", task_id))
    }

    // ============================================
    // Agent presence
    // ============================================

    /// Get an agent row by id.
    pub fn get_agent(&self, id: &str) -> Result<Option<Agent>> {
        let conn = self.connection();
        conn.query_row("SELECT * FROM agents WHERE id = ?1", [id], |row| {
            let status: String = row.get("status")?;
            let specializations: String = row.get("specializations")?;
            Ok(Agent {
                id: row.get("id")?,
                name: row.get("name")?,
                last_seen: row.get("last_seen")?,
                current_task_id: row.get("current_task_id")?,
                status: status.parse().unwrap_or(AgentStatus::Idle),
                specializations: decode_str_array(&specializations),
            })
        })
        .optional()
        .map_err(Error::from)
    }

    /// All agents, most recently seen first.
    pub fn get_agents(&self) -> Result<Vec<Agent>> {
        let conn = self.connection();
        let mut stmt = conn.prepare("SELECT * FROM agents ORDER BY last_seen DESC")?;
        let agents = stmt
            .query_map([], |row| {
                let status: String = row.get("status")?;
                let specializations: String = row.get("specializations")?;
                Ok(Agent {
                    id: row.get("id")?,
                    name: row.get("name")?,
                    last_seen: row.get("last_seen")?,
                    current_task_id: row.get("current_task_id")?,
                    status: status.parse().unwrap_or(AgentStatus::Idle),
                    specializations: decode_str_array(&specializations),
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(agents)
    }

    /// Heartbeat: upsert the agent, sweep stale workers (recovering their
    /// claims), then deliver unread broadcasts and mark them read.
    pub fn agent_sync(&self, sync: &AgentSync, now_ms: i64) -> Result<SyncOutcome> {
        {
            let mut conn = self.connection();
            let tx = conn.transaction()?;

            tx.execute(
                "INSERT INTO agents (id, name, last_seen, current_task_id, status, specializations)
                 VALUES (?1, ?2, ?3, ?4, ?5, COALESCE(?6, '[]'))
                 ON CONFLICT(id) DO UPDATE SET
                     name = excluded.name,
                     last_seen = excluded.last_seen,
                     current_task_id = excluded.current_task_id,
                     status = excluded.status,
                     specializations = COALESCE(?6, agents.specializations)",
                params![
                    sync.id,
                    sync.name,
                    now_ms,
                    sync.current_task_id,
                    sync.status.as_str(),
                    sync.specializations.as_deref().map(encode_str_array),
                ],
            )?;
            tx.commit()?;
        }

        let recovered = self.sweep_stale_agents(now_ms)?;
        let broadcasts = self.deliver_broadcasts(sync.id, now_ms)?;
        let agent = self
            .get_agent(sync.id)?
            .ok_or_else(|| Error::not_found("agent", sync.id.to_string()))?;

        Ok(SyncOutcome {
            agent,
            recovered,
            broadcasts,
        })
    }

    /// Mark working agents silent past the timeout as stale and clear the
    /// claims they hold.
    pub fn sweep_stale_agents(&self, now_ms: i64) -> Result<Vec<StaleRecovery>> {
        let cutoff = now_ms - STALE_TIMEOUT_MS;
        let mut conn = self.connection();
        let tx = conn.transaction()?;

        let stale_ids: Vec<String> = {
            let mut stmt = tx.prepare(
                "SELECT id FROM agents WHERE status = 'working' AND last_seen < ?1",
            )?;
            let result = stmt
                .query_map([cutoff], |row| row.get(0))?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            result
        };

        let mut recovered = Vec::with_capacity(stale_ids.len());
        for agent_id in stale_ids {
            let released: Vec<i64> = {
                let mut stmt = tx.prepare("SELECT id FROM tasks WHERE claimed_by = ?1")?;
                let result = stmt
                    .query_map([&agent_id], |row| row.get(0))?
                    .collect::<std::result::Result<Vec<_>, _>>()?;
                result
            };
            tx.execute(
                "UPDATE tasks SET claimed_by = NULL, claimed_at = NULL WHERE claimed_by = ?1",
                [&agent_id],
            )?;
            tx.execute("UPDATE agents SET status = 'stale' WHERE id = ?1", [&agent_id])?;
            tracing::warn!(
                agent = %agent_id,
                released = released.len(),
                "Recovered claims from stale agent"
            );
            recovered.push(StaleRecovery {
                agent_id,
                released_tasks: released,
            });
        }

        tx.commit()?;
        Ok(recovered)
    }

    // ============================================
    // Broadcasts
    // ============================================

    /// Post a broadcast. `expires_in_minutes` of zero or None means no
    /// expiry.
    pub fn create_broadcast(
        &self,
        from_agent: &str,
        message: &str,
        target_agent: Option<&str>,
        expires_in_minutes: Option<i64>,
        now_ms: i64,
    ) -> Result<i64> {
        let expires_at = expires_in_minutes
            .filter(|m| *m > 0)
            .map(|m| now_ms + m * 60_000);
        let conn = self.connection();
        conn.execute(
            "INSERT INTO broadcasts (from_agent, message, created_at, expires_at, target_agent)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![from_agent, message, now_ms, expires_at, target_agent],
        )?;
        Ok(conn.last_insert_rowid())
    }

    /// Unread, unexpired broadcasts visible to the agent; each returned row
    /// is marked read. Mark-read is a set insertion, so redelivery never
    /// duplicates receipts.
    pub fn deliver_broadcasts(&self, agent_id: &str, now_ms: i64) -> Result<Vec<Broadcast>> {
        let mut conn = self.connection();
        let tx = conn.transaction()?;

        let rows: Vec<(i64, String, String, i64, Option<i64>, String, Option<String>)> = {
            let mut stmt = tx.prepare(
                "SELECT id, from_agent, message, created_at, expires_at, read_by, target_agent
                 FROM broadcasts
                 WHERE (expires_at IS NULL OR expires_at > ?1)
                   AND (target_agent IS NULL OR target_agent = ?2)
                 ORDER BY created_at ASC",
            )?;
            let result = stmt
                .query_map(params![now_ms, agent_id], |row| {
                    Ok((
                        row.get(0)?,
                        row.get(1)?,
                        row.get(2)?,
                        row.get(3)?,
                        row.get(4)?,
                        row.get(5)?,
                        row.get(6)?,
                    ))
                })?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            result
        };

        let mut delivered = Vec::new();
        for (id, from_agent, message, created_at, expires_at, read_by_raw, target_agent) in rows {
            let mut read_by = decode_str_array(&read_by_raw);
            if read_by.iter().any(|r| r == agent_id) {
                continue;
            }
            read_by.push(agent_id.to_string());
            tx.execute(
                "UPDATE broadcasts SET read_by = ?1 WHERE id = ?2",
                params![encode_str_array(&read_by), id],
            )?;
            delivered.push(Broadcast {
                id,
                from_agent,
                message,
                created_at,
                expires_at,
                read_by,
                target_agent,
            });
        }

        tx.commit()?;
        Ok(delivered)
    }

    // ============================================
    // File locks
    // ============================================

    /// Acquire an advisory lock on a path. Expired locks are purged first;
    /// an unexpired lock held by another agent is a conflict.
    pub fn acquire_soft_lock(
        &self,
        path: &str,
        agent_id: &str,
        timeout_minutes: Option<i64>,
        reason: Option<&str>,
        now_ms: i64,
    ) -> Result<FileLock> {
        let path = normalize_path(path);
        let timeout = timeout_minutes.unwrap_or(DEFAULT_LOCK_MINUTES).max(1);
        let expires_at = now_ms + timeout * 60_000;

        let mut conn = self.connection();
        let tx = conn.transaction()?;

        tx.execute("DELETE FROM file_locks WHERE expires_at <= ?1", [now_ms])?;

        let holder: Option<String> = tx
            .query_row(
                "SELECT agent_id FROM file_locks WHERE file_path = ?1",
                [&path],
                |r| r.get(0),
            )
            .optional()?;
        if let Some(holder) = holder {
            if holder != agent_id {
                return Err(Error::Conflict(format!(
                    "{} is locked by {}",
                    path, holder
                )));
            }
        }

        tx.execute(
            "INSERT INTO file_locks (file_path, agent_id, reason, locked_at, expires_at)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(file_path) DO UPDATE SET
                 agent_id = excluded.agent_id,
                 reason = excluded.reason,
                 locked_at = excluded.locked_at,
                 expires_at = excluded.expires_at",
            params![path, agent_id, reason, now_ms, expires_at],
        )?;
        tx.commit()?;

        Ok(FileLock {
            file_path: path,
            agent_id: agent_id.to_string(),
            reason: reason.map(str::to_string),
            locked_at: now_ms,
            expires_at,
        })
    }

    /// The active (unexpired) lock on a path, if any.
    pub fn get_active_lock(&self, path: &str, now_ms: i64) -> Result<Option<FileLock>> {
        let conn = self.connection();
        conn.query_row(
            "SELECT * FROM file_locks WHERE file_path = ?1 AND expires_at > ?2",
            params![normalize_path(path), now_ms],
            |row| {
                Ok(FileLock {
                    file_path: row.get("file_path")?,
                    agent_id: row.get("agent_id")?,
                    reason: row.get("reason")?,
                    locked_at: row.get("locked_at")?,
                    expires_at: row.get("expires_at")?,
                })
            },
        )
        .optional()
        .map_err(Error::from)
    }

    // ============================================
    // Pending work
    // ============================================

    /// Declare work an agent is about to do against a set of files.
    pub fn begin_work(
        &self,
        agent_id: &str,
        session_id: Option<i64>,
        description: &str,
        files: &[String],
        now_ms: i64,
    ) -> Result<i64> {
        let files: Vec<String> = files.iter().map(|f| normalize_path(f)).collect();
        let conn = self.connection();
        conn.execute(
            "INSERT INTO pending_work (agent_id, session_id, description, files, started_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                agent_id,
                session_id,
                description,
                encode_str_array(&files),
                now_ms,
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    /// Pending work rows, optionally for one agent.
    pub fn pending_work(&self, agent_id: Option<&str>) -> Result<Vec<PendingWork>> {
        let conn = self.connection();
        let map = |row: &rusqlite::Row| -> rusqlite::Result<PendingWork> {
            let files: String = row.get("files")?;
            let status: String = row.get("status")?;
            Ok(PendingWork {
                id: row.get("id")?,
                agent_id: row.get("agent_id")?,
                session_id: row.get("session_id")?,
                description: row.get("description")?,
                files: decode_str_array(&files),
                started_at: row.get("started_at")?,
                status: status.parse().unwrap_or(PendingWorkStatus::Pending),
            })
        };

        let rows = match agent_id {
            Some(agent) => {
                let mut stmt = conn.prepare(
                    "SELECT * FROM pending_work WHERE agent_id = ?1 ORDER BY id ASC",
                )?;
                let result = stmt
                    .query_map([agent], map)?
                    .collect::<std::result::Result<Vec<_>, _>>()?;
                result
            }
            None => {
                let mut stmt = conn.prepare("SELECT * FROM pending_work ORDER BY id ASC")?;
                let result = stmt
                    .query_map([], map)?
                    .collect::<std::result::Result<Vec<_>, _>>()?;
                result
            }
        };
        Ok(rows)
    }

    /// Complete every pending row whose file list intersects the changed
    /// paths. Returns the number of rows closed.
    pub fn complete_pending_work(&self, changed_paths: &[String]) -> Result<usize> {
        let changed: Vec<String> = changed_paths.iter().map(|p| normalize_path(p)).collect();
        let mut conn = self.connection();
        let tx = conn.transaction()?;

        let pending: Vec<(i64, String)> = {
            let mut stmt =
                tx.prepare("SELECT id, files FROM pending_work WHERE status = 'pending'")?;
            let result = stmt
                .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            result
        };

        let mut closed = 0;
        for (id, files_raw) in pending {
            let files = decode_str_array(&files_raw);
            if files.iter().any(|f| changed.contains(f)) {
                tx.execute(
                    "UPDATE pending_work SET status = 'completed' WHERE id = ?1",
                    [id],
                )?;
                closed += 1;
            }
        }

        tx.commit()?;
        Ok(closed)
    }

    // ============================================
    // Routing
    // ============================================

    /// Advisory routing: rank live agents by specialization overlap with the
    /// task's tags. Stale agents are excluded.
    pub fn route_task(&self, task_id: i64) -> Result<Vec<(Agent, u32)>> {
        let task = self
            .get_task(task_id)?
            .ok_or_else(|| Error::not_found("task", task_id))?;

        let mut ranked: Vec<(Agent, u32)> = self
            .get_agents()?
            .into_iter()
            .filter(|a| a.status != AgentStatus::Stale)
            .map(|a| {
                let score = specialization_match(&a.specializations, &task.tags);
                (a, score)
            })
            .collect();
        ranked.sort_by(|a, b| b.1.cmp(&a.1).then(b.0.last_seen.cmp(&a.0.last_seen)));
        Ok(ranked)
    }
}
