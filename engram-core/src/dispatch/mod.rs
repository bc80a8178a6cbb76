//! Dispatcher surface
//!
//! Two request routers, `memory` and `admin`, plus the session lifecycle
//! handlers. Each validates its action against a closed enum, pulls typed
//! parameters out of the JSON payload, calls into the repositories and
//! services, and translates every failure into an error response. Handlers
//! never panic on bad input.

mod admin;
mod memory;
mod response;
mod session;

pub use admin::{dispatch_admin, AdminAction};
pub use memory::{dispatch_memory, MemoryAction};
pub use response::{ContentBlock, ToolResponse};
pub use session::{end_session, get_session_history, start_session};

use std::sync::Mutex;

use serde_json::Value;

use crate::config::ServerOptions;
use crate::db::Database;
use crate::error::{Error, Result};

/// Process-wide server state, owned by the top-level context and threaded
/// explicitly into handlers.
pub struct ServerContext {
    pub db: Database,
    pub options: ServerOptions,
    current_session: Mutex<Option<i64>>,
}

impl ServerContext {
    pub fn new(db: Database, options: ServerOptions) -> Self {
        Self {
            db,
            options,
            current_session: Mutex::new(None),
        }
    }

    /// The current session id, if a session is open in this process.
    pub fn current_session(&self) -> Option<i64> {
        *self.current_session.lock().unwrap()
    }

    pub(crate) fn set_current_session(&self, id: Option<i64>) {
        *self.current_session.lock().unwrap() = id;
    }

    /// Route a tool call by method name. Unknown methods produce an error
    /// response, never a panic.
    pub fn handle(&self, method: &str, params: &Value) -> ToolResponse {
        match method {
            "memory" => {
                let action = params.get("action").and_then(Value::as_str).unwrap_or("");
                dispatch_memory(self, action, params)
            }
            "admin" => {
                let action = params.get("action").and_then(Value::as_str).unwrap_or("");
                dispatch_admin(self, action, params)
            }
            "start_session" => start_session(self, params),
            "end_session" => end_session(self, params),
            "get_session_history" => get_session_history(self, params),
            other => ToolResponse::error(format!("Unknown method: {}", other)),
        }
    }
}

// ============================================
// Parameter extraction
// ============================================

pub(crate) fn require_str<'a>(params: &'a Value, key: &str) -> Result<&'a str> {
    params
        .get(key)
        .and_then(Value::as_str)
        .filter(|s| !s.trim().is_empty())
        .ok_or_else(|| Error::Validation(format!("missing required parameter: {}", key)))
}

pub(crate) fn opt_str<'a>(params: &'a Value, key: &str) -> Option<&'a str> {
    params.get(key).and_then(Value::as_str)
}

pub(crate) fn require_i64(params: &Value, key: &str) -> Result<i64> {
    params
        .get(key)
        .and_then(Value::as_i64)
        .ok_or_else(|| Error::Validation(format!("missing required parameter: {}", key)))
}

pub(crate) fn opt_i64(params: &Value, key: &str) -> Option<i64> {
    params.get(key).and_then(Value::as_i64)
}

pub(crate) fn opt_bool(params: &Value, key: &str) -> Option<bool> {
    params.get(key).and_then(Value::as_bool)
}

pub(crate) fn opt_str_array(params: &Value, key: &str) -> Vec<String> {
    params
        .get(key)
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

pub(crate) fn opt_id_array(params: &Value, key: &str) -> Vec<i64> {
    params
        .get(key)
        .and_then(Value::as_array)
        .map(|items| items.iter().filter_map(Value::as_i64).collect())
        .unwrap_or_default()
}

/// Parse an enum-valued parameter via `FromStr`, mapping parse failures to
/// validation errors.
pub(crate) fn opt_enum<T>(params: &Value, key: &str) -> Result<Option<T>>
where
    T: std::str::FromStr<Err = String>,
{
    match params.get(key).and_then(Value::as_str) {
        Some(raw) => raw
            .parse()
            .map(Some)
            .map_err(|e: String| Error::Validation(e)),
        None => Ok(None),
    }
}

pub(crate) fn require_enum<T>(params: &Value, key: &str) -> Result<T>
where
    T: std::str::FromStr<Err = String>,
{
    opt_enum(params, key)?
        .ok_or_else(|| Error::Validation(format!("missing required parameter: {}", key)))
}

/// Convert a handler result into a wire response.
pub(crate) fn respond(result: Result<Value>) -> ToolResponse {
    match result {
        Ok(value) => ToolResponse::ok_json(&value),
        Err(e) => ToolResponse::error(e.to_string()),
    }
}
