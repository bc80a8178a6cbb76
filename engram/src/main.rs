//! engram - per-project persistent memory server for AI coding agents
//!
//! Speaks line-delimited JSON-RPC over stdio: one request per line in, one
//! response per line out. All logging goes to files under
//! `<project_root>/.engram/logs/` so stdout stays a clean transport.

use std::io::{BufRead, Write};
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use serde::Deserialize;
use serde_json::{json, Value};

use engram_core::{Database, FileConfig, ServerContext, ServerOptions};

#[derive(Debug, Parser)]
#[command(name = "engram", version, about = "Persistent memory server for AI coding agents")]
struct Cli {
    /// Project root the memory belongs to
    #[arg(long)]
    project_root: PathBuf,

    /// Optional IDE key; shards the database to memory-<key>.db
    #[arg(long)]
    ide: Option<String>,

    /// Compatibility marker, accepted and ignored
    #[arg(long)]
    mode: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RpcRequest {
    #[serde(default)]
    id: Value,
    method: String,
    #[serde(default)]
    params: Value,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let options = ServerOptions {
        project_root: cli.project_root,
        ide: cli.ide,
        mode: cli.mode,
    };

    let file_config = FileConfig::load(&options.config_file_path())
        .context("failed to load configuration")?;
    let _log_guard = engram_core::logging::init(&options.logs_dir(), &file_config.logging)
        .context("failed to initialize logging")?;

    tracing::info!(
        project_root = %options.project_root.display(),
        ide = options.ide.as_deref().unwrap_or("-"),
        "engram starting up"
    );

    let db_path = options.database_path();
    let db = Database::open(&db_path).context("failed to open database")?;
    db.migrate().context("failed to run database migrations")?;

    // Seed config-table defaults from config.toml; existing keys win.
    for (key, value) in &file_config.defaults {
        if db.config_get(key).context("failed to read config")?.is_none() {
            db.config_set(key, value, chrono::Utc::now())
                .context("failed to seed config")?;
        }
    }

    let ctx = ServerContext::new(db, options);
    serve(&ctx)
}

/// Read one JSON-RPC request per line, write one response per line.
fn serve(ctx: &ServerContext) -> Result<()> {
    let stdin = std::io::stdin();
    let stdout = std::io::stdout();

    for line in stdin.lock().lines() {
        let line = line.context("failed to read request line")?;
        if line.trim().is_empty() {
            continue;
        }

        let response = handle_line(ctx, &line);
        let mut out = stdout.lock();
        serde_json::to_writer(&mut out, &response).context("failed to write response")?;
        out.write_all(b"\n").context("failed to write response")?;
        out.flush().context("failed to flush response")?;
    }

    tracing::info!("stdin closed, shutting down");
    Ok(())
}

fn handle_line(ctx: &ServerContext, line: &str) -> Value {
    let request: RpcRequest = match serde_json::from_str(line) {
        Ok(request) => request,
        Err(e) => {
            tracing::warn!(error = %e, "Malformed request line");
            return json!({
                "jsonrpc": "2.0",
                "id": Value::Null,
                "error": { "code": -32700, "message": format!("parse error: {}", e) },
            });
        }
    };

    let result = ctx.handle(&request.method, &request.params);
    json!({
        "jsonrpc": "2.0",
        "id": request.id,
        "result": result,
    })
}
