//! Scheduled-event state machine
//!
//! Events move `pending → triggered → acknowledged → executed`, with
//! lateral transitions to `cancelled` and `snoozed`. Trigger sweeps run at
//! session start (`next_session` plus expired `datetime` events) and when a
//! task completes (`task_complete` events keyed on the task id). `manual`
//! events only move by explicit update.

use chrono::{DateTime, Duration, Utc};
use rusqlite::{params, OptionalExtension, Row};

use crate::db::Database;
use crate::error::{Error, Result};
use crate::types::{
    EventStatus, NewScheduledEvent, Priority, Recurrence, ScheduledEvent, TriggerType,
};
use crate::util::{decode_str_array, encode_str_array, parse_ts, parse_ts_opt};

/// Listing order: triggered events first, then by priority, then age.
const LIST_ORDER: &str = "ORDER BY
    CASE status
        WHEN 'triggered' THEN 0
        WHEN 'pending' THEN 1
        WHEN 'snoozed' THEN 2
        WHEN 'acknowledged' THEN 3
        WHEN 'executed' THEN 4
        ELSE 5
    END,
    CASE priority
        WHEN 'critical' THEN 0
        WHEN 'high' THEN 1
        WHEN 'medium' THEN 2
        ELSE 3
    END,
    created_at ASC, id ASC";

pub(crate) fn row_to_event(row: &Row) -> rusqlite::Result<ScheduledEvent> {
    let created_at: String = row.get("created_at")?;
    let trigger_type: String = row.get("trigger_type")?;
    let status: String = row.get("status")?;
    let triggered_at: Option<String> = row.get("triggered_at")?;
    let acknowledged_at: Option<String> = row.get("acknowledged_at")?;
    let requires_approval: i64 = row.get("requires_approval")?;
    let action_data: Option<String> = row.get("action_data")?;
    let priority: String = row.get("priority")?;
    let tags: String = row.get("tags")?;
    let recurrence: Option<String> = row.get("recurrence")?;

    Ok(ScheduledEvent {
        id: row.get("id")?,
        session_id: row.get("session_id")?,
        created_at: parse_ts(&created_at),
        title: row.get("title")?,
        description: row.get("description")?,
        trigger_type: trigger_type.parse().unwrap_or(TriggerType::Manual),
        trigger_value: row.get("trigger_value")?,
        status: status.parse().unwrap_or(EventStatus::Pending),
        triggered_at: parse_ts_opt(triggered_at),
        acknowledged_at: parse_ts_opt(acknowledged_at),
        requires_approval: requires_approval != 0,
        action_summary: row.get("action_summary")?,
        action_data: action_data.and_then(|s| serde_json::from_str(&s).ok()),
        priority: priority.parse().unwrap_or(Priority::Medium),
        tags: decode_str_array(&tags),
        recurrence: recurrence.and_then(|r| r.parse().ok()),
    })
}

/// Next fire value for a recurring datetime event.
fn next_trigger_value(event: &ScheduledEvent) -> Option<String> {
    match (event.recurrence, event.trigger_type) {
        (Some(Recurrence::Daily), TriggerType::Datetime) => event
            .trigger_value
            .as_deref()
            .and_then(|v| DateTime::parse_from_rfc3339(v).ok())
            .map(|dt| (dt + Duration::days(1)).to_rfc3339()),
        (Some(Recurrence::Weekly), TriggerType::Datetime) => event
            .trigger_value
            .as_deref()
            .and_then(|v| DateTime::parse_from_rfc3339(v).ok())
            .map(|dt| (dt + Duration::days(7)).to_rfc3339()),
        _ => event.trigger_value.clone(),
    }
}

impl Database {
    /// Schedule an event.
    pub fn schedule_event(
        &self,
        event: &NewScheduledEvent,
        session_id: Option<i64>,
        now: DateTime<Utc>,
    ) -> Result<i64> {
        if event.trigger_type == TriggerType::Datetime {
            let valid = event
                .trigger_value
                .as_deref()
                .map(|v| DateTime::parse_from_rfc3339(v).is_ok())
                .unwrap_or(false);
            if !valid {
                return Err(Error::Validation(
                    "datetime trigger requires an RFC 3339 trigger_value".into(),
                ));
            }
        }

        let conn = self.connection();
        conn.execute(
            "INSERT INTO scheduled_events
                 (session_id, created_at, title, description, trigger_type, trigger_value,
                  requires_approval, action_summary, action_data, priority, tags, recurrence)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
            params![
                session_id,
                now.to_rfc3339(),
                event.title,
                event.description,
                event.trigger_type.as_str(),
                event.trigger_value,
                event.requires_approval as i64,
                event.action_summary,
                event.action_data.as_ref().map(|v| v.to_string()),
                event.priority.unwrap_or(Priority::Medium).as_str(),
                encode_str_array(&event.tags),
                event.recurrence.map(|r| r.as_str()),
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    /// Get an event by id.
    pub fn get_event(&self, id: i64) -> Result<Option<ScheduledEvent>> {
        let conn = self.connection();
        conn.query_row(
            "SELECT * FROM scheduled_events WHERE id = ?",
            [id],
            row_to_event,
        )
        .optional()
        .map_err(Error::from)
    }

    /// List events, optionally restricted to one status.
    pub fn get_events(
        &self,
        status: Option<EventStatus>,
        limit: Option<i64>,
    ) -> Result<Vec<ScheduledEvent>> {
        let limit = crate::repo::clamp_limit(limit);
        let conn = self.connection();

        let events = match status {
            Some(status) => {
                let sql = format!(
                    "SELECT * FROM scheduled_events WHERE status = ?1 {} LIMIT ?2",
                    LIST_ORDER
                );
                let mut stmt = conn.prepare(&sql)?;
                let result = stmt
                    .query_map(params![status.as_str(), limit], row_to_event)?
                    .collect::<std::result::Result<Vec<_>, _>>()?;
                result
            }
            None => {
                let sql = format!("SELECT * FROM scheduled_events {} LIMIT ?1", LIST_ORDER);
                let mut stmt = conn.prepare(&sql)?;
                let result = stmt
                    .query_map([limit], row_to_event)?
                    .collect::<std::result::Result<Vec<_>, _>>()?;
                result
            }
        };
        Ok(events)
    }

    /// Explicit update of an event's mutable fields.
    pub fn update_event(
        &self,
        id: i64,
        title: Option<&str>,
        description: Option<&str>,
        status: Option<EventStatus>,
        trigger_value: Option<&str>,
        priority: Option<Priority>,
    ) -> Result<ScheduledEvent> {
        let conn = self.connection();
        let n = conn.execute(
            "UPDATE scheduled_events SET
                 title = COALESCE(?1, title),
                 description = COALESCE(?2, description),
                 status = COALESCE(?3, status),
                 trigger_value = COALESCE(?4, trigger_value),
                 priority = COALESCE(?5, priority)
             WHERE id = ?6",
            params![
                title,
                description,
                status.map(|s| s.as_str()),
                trigger_value,
                priority.map(|p| p.as_str()),
                id,
            ],
        )?;
        if n == 0 {
            return Err(Error::not_found("scheduled_event", id));
        }
        drop(conn);
        self.get_event(id)?
            .ok_or_else(|| Error::not_found("scheduled_event", id))
    }

    /// Acknowledge a triggered event. Approval moves it to `acknowledged`
    /// and spawns the next instance for recurring events; refusal snoozes it
    /// back to `pending`.
    pub fn acknowledge_event(
        &self,
        id: i64,
        approved: bool,
        now: DateTime<Utc>,
    ) -> Result<(ScheduledEvent, Option<i64>)> {
        let event = self
            .get_event(id)?
            .ok_or_else(|| Error::not_found("scheduled_event", id))?;

        if !approved {
            let event = self.update_event(id, None, None, Some(EventStatus::Pending), None, None)?;
            return Ok((event, None));
        }

        {
            let conn = self.connection();
            conn.execute(
                "UPDATE scheduled_events SET status = 'acknowledged', acknowledged_at = ?1
                 WHERE id = ?2",
                params![now.to_rfc3339(), id],
            )?;
        }

        let clone_id = match event.recurrence {
            Some(r) if r.recurs() => {
                let next = NewScheduledEvent {
                    title: event.title.clone(),
                    description: event.description.clone(),
                    trigger_type: event.trigger_type,
                    trigger_value: next_trigger_value(&event),
                    requires_approval: event.requires_approval,
                    action_summary: event.action_summary.clone(),
                    action_data: event.action_data.clone(),
                    priority: Some(event.priority),
                    tags: event.tags.clone(),
                    recurrence: event.recurrence,
                };
                Some(self.schedule_event(&next, event.session_id, now)?)
            }
            _ => None,
        };

        let event = self
            .get_event(id)?
            .ok_or_else(|| Error::not_found("scheduled_event", id))?;
        Ok((event, clone_id))
    }

    /// Fire all pending `next_session` events.
    pub fn trigger_next_session(&self, now: DateTime<Utc>) -> Result<Vec<ScheduledEvent>> {
        self.fire_events(
            "trigger_type = 'next_session' AND status = 'pending'",
            &[],
            now,
        )
    }

    /// Fire pending `datetime` events whose fire time has passed.
    pub fn trigger_expired_datetime(&self, now: DateTime<Utc>) -> Result<Vec<ScheduledEvent>> {
        let now_str = now.to_rfc3339();
        self.fire_events(
            "trigger_type = 'datetime' AND status = 'pending' AND trigger_value <= ?1",
            &[&now_str as &dyn rusqlite::ToSql],
            now,
        )
    }

    /// Fire pending `task_complete` events bound to a finished task.
    pub fn trigger_task_complete(
        &self,
        task_id: i64,
        now: DateTime<Utc>,
    ) -> Result<Vec<ScheduledEvent>> {
        let key = task_id.to_string();
        self.fire_events(
            "trigger_type = 'task_complete' AND status = 'pending' AND trigger_value = ?1",
            &[&key as &dyn rusqlite::ToSql],
            now,
        )
    }

    /// Session-start sweep: next-session plus overdue datetime events.
    pub fn session_start_sweep(&self, now: DateTime<Utc>) -> Result<Vec<ScheduledEvent>> {
        let mut fired = self.trigger_next_session(now)?;
        fired.extend(self.trigger_expired_datetime(now)?);
        Ok(fired)
    }

    fn fire_events(
        &self,
        condition: &str,
        bind: &[&dyn rusqlite::ToSql],
        now: DateTime<Utc>,
    ) -> Result<Vec<ScheduledEvent>> {
        let mut conn = self.connection();
        let tx = conn.transaction()?;

        let ids: Vec<i64> = {
            let sql = format!("SELECT id FROM scheduled_events WHERE {}", condition);
            let mut stmt = tx.prepare(&sql)?;
            let result = stmt
                .query_map(bind, |row| row.get(0))?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            result
        };

        let now_str = now.to_rfc3339();
        for id in &ids {
            tx.execute(
                "UPDATE scheduled_events SET status = 'triggered', triggered_at = ?1
                 WHERE id = ?2",
                params![now_str, id],
            )?;
        }
        tx.commit()?;
        drop(conn);

        let mut fired = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(event) = self.get_event(id)? {
                fired.push(event);
            }
        }
        Ok(fired)
    }
}
