//! # engram-core
//!
//! Core library for engram - a per-project persistent memory server for AI
//! coding agents.
//!
//! This library provides:
//! - Domain types for sessions, changes, decisions, tasks, and file notes
//! - SQLite storage with versioned migrations and trigger-synced FTS
//! - Multi-agent coordination: atomic task claims, heartbeats, soft locks,
//!   broadcasts
//! - A scheduled-event state machine and context-pressure detection
//! - Compaction, backup, and restore
//! - The `memory` and `admin` tool dispatchers
//!
//! ## Architecture
//!
//! All state lives in one database file under `<project_root>/.engram/`.
//! The engine is request-per-call and synchronous: a dispatcher validates a
//! tool call, runs it against the repositories (inside one transaction when
//! it mutates), and returns a structured response. WAL journaling makes
//! concurrent reader processes safe; the conditional claim update makes
//! task ownership race-free.
//!
//! ## Example
//!
//! ```rust,no_run
//! use engram_core::{Database, ServerContext, ServerOptions};
//!
//! let options = ServerOptions::new("/path/to/project");
//! let db = Database::open(&options.database_path()).expect("failed to open database");
//! db.migrate().expect("failed to run migrations");
//!
//! let ctx = ServerContext::new(db, options);
//! let response = ctx.handle(
//!     "start_session",
//!     &serde_json::json!({"agent_name": "claude"}),
//! );
//! assert!(!response.is_error());
//! ```

// Re-export commonly used items at the crate root
pub use config::{FileConfig, LoggingConfig, ServerOptions};
pub use db::Database;
pub use dispatch::{ServerContext, ToolResponse};
pub use error::{Error, Result};
pub use types::*;

// Public modules
pub mod classify;
pub mod config;
pub mod coord;
pub mod db;
pub mod dispatch;
pub mod error;
pub mod logging;
pub mod maintenance;
pub mod pressure;
pub mod repo;
pub mod scan;
pub mod scheduler;
pub mod search;
pub mod staleness;
pub mod transfer;
pub mod types;
pub mod util;
