//! Context-pressure detection
//!
//! Estimates how full an agent's context window is from the best available
//! signal: agent-reported token counts when present, otherwise the byte
//! accumulator in `session_bytes` at roughly four bytes per token. Below the
//! notice threshold no report is produced at all.

use crate::db::Database;
use crate::error::Result;
use crate::repo::config::keys;
use crate::types::{PressureReport, PressureSeverity};

/// Agent-reported usage, the most accurate signal when available.
#[derive(Debug, Clone, Copy)]
pub struct ReportedTokens {
    pub tokens_used: i64,
    pub window_total: Option<i64>,
}

fn severity_for(pct: f64, notice: i64, warning: i64, urgent: i64) -> Option<PressureSeverity> {
    if pct >= urgent as f64 {
        Some(PressureSeverity::Urgent)
    } else if pct >= warning as f64 {
        Some(PressureSeverity::Warning)
    } else if pct >= notice as f64 {
        Some(PressureSeverity::Notice)
    } else {
        None
    }
}

fn suggestions_for(severity: PressureSeverity) -> Vec<String> {
    match severity {
        PressureSeverity::Notice => vec![
            "consider checkpointing your current understanding".to_string(),
        ],
        PressureSeverity::Warning => vec![
            "checkpoint now and summarize findings into memory".to_string(),
            "prefer targeted reads over whole-file reads".to_string(),
        ],
        PressureSeverity::Urgent => vec![
            "checkpoint immediately".to_string(),
            "end the session with a handoff summary".to_string(),
            "resume in a fresh session".to_string(),
        ],
    }
}

/// Compute the context-pressure report for a session, if any signal crosses
/// the notice threshold.
pub fn check_pressure(
    db: &Database,
    session_id: Option<i64>,
    reported: Option<ReportedTokens>,
) -> Result<Option<PressureReport>> {
    let notice = db.config_get_int(keys::PRESSURE_NOTICE_PCT, 50)?;
    let warning = db.config_get_int(keys::PRESSURE_WARNING_PCT, 70)?;
    let urgent = db.config_get_int(keys::PRESSURE_URGENT_PCT, 85)?;
    let window = db.config_get_int(keys::CONTEXT_WINDOW_SIZE, 200_000)?.max(1);

    // Level 3: the agent told us its real token count.
    if let Some(reported) = reported {
        let total = reported.window_total.unwrap_or(window).max(1);
        let pct = reported.tokens_used as f64 * 100.0 / total as f64;
        return Ok(severity_for(pct, notice, warning, urgent).map(|severity| PressureReport {
            severity,
            pct,
            source: "agent_reported".to_string(),
            message: format!(
                "context window {:.0}% used ({} of {} tokens)",
                pct, reported.tokens_used, total
            ),
            suggestions: suggestions_for(severity),
        }));
    }

    // Level 2: estimate from accumulated request/response bytes.
    let Some(session_id) = session_id else {
        return Ok(None);
    };
    let Some(bytes) = db.session_bytes(session_id)? else {
        return Ok(None);
    };

    let estimated_tokens = (bytes.input_bytes + bytes.output_bytes) / 4;
    let pct = estimated_tokens as f64 * 100.0 / window as f64;
    Ok(severity_for(pct, notice, warning, urgent).map(|severity| PressureReport {
        severity,
        pct,
        source: "byte_estimate".to_string(),
        message: format!(
            "context window ~{:.0}% used (est. {} of {} tokens over {} tool calls)",
            pct, estimated_tokens, window, bytes.tool_calls
        ),
        suggestions: suggestions_for(severity),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn db() -> Database {
        let db = Database::open_in_memory().unwrap();
        db.migrate().unwrap();
        db
    }

    #[test]
    fn test_reported_tokens_bands() {
        let db = db();

        let at = |used: i64| {
            check_pressure(
                &db,
                None,
                Some(ReportedTokens {
                    tokens_used: used,
                    window_total: Some(100),
                }),
            )
            .unwrap()
        };

        assert!(at(49).is_none());
        assert_eq!(at(50).unwrap().severity, PressureSeverity::Notice);
        assert_eq!(at(70).unwrap().severity, PressureSeverity::Warning);
        assert_eq!(at(85).unwrap().severity, PressureSeverity::Urgent);
        assert_eq!(at(100).unwrap().severity, PressureSeverity::Urgent);
    }

    #[test]
    fn test_byte_estimate() {
        let db = db();
        let now = Utc::now();
        let sid = db.create_session("a", "/p", now).unwrap();

        // 4 calls x 600,000 bytes = 600,000 estimated tokens over a 200,000
        // token window: deep into urgent.
        for _ in 0..4 {
            db.track_context(sid, 100_000, 500_000, now).unwrap();
        }

        let report = check_pressure(&db, Some(sid), None).unwrap().unwrap();
        assert_eq!(report.severity, PressureSeverity::Urgent);
        assert_eq!(report.source, "byte_estimate");
        assert!(!report.suggestions.is_empty());
    }

    #[test]
    fn test_no_signal_no_report() {
        let db = db();
        assert!(check_pressure(&db, None, None).unwrap().is_none());
        let sid = db.create_session("a", "/p", Utc::now()).unwrap();
        assert!(check_pressure(&db, Some(sid), None).unwrap().is_none());
    }
}
