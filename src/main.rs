mod backup;
mod config;
mod db;
mod exchange;
mod ipc;
mod ledger;
mod model;
mod roster;
mod storage;

use dotenvy::dotenv;
use std::io::{self, BufRead, Write};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use crate::config::Config;

fn main() {
    dotenv().ok();
    init_tracing();

    let config = match Config::from_env() {
        Ok(c) => c,
        Err(err) => {
            error!(?err, "invalid configuration");
            std::process::exit(1);
        }
    };

    let mut state = ipc::AppState::new(config);
    if let Some(path) = state.config.workspace.clone() {
        if let Err(err) = ipc::open_workspace(&mut state, &path) {
            warn!(?err, "configured workspace could not be opened; waiting for workspace.select");
        }
    }
    info!(version = env!("CARGO_PKG_VERSION"), "sidecar ready");

    let stdin = io::stdin();
    let mut stdout = io::stdout();

    for line in stdin.lock().lines() {
        let line = match line {
            Ok(v) => v,
            Err(_) => break,
        };
        if line.trim().is_empty() {
            continue;
        }

        let req: ipc::Request = match serde_json::from_str(&line) {
            Ok(v) => v,
            Err(e) => {
                // No id to answer to; reply with a bare error line.
                warn!(error = %e, "unparseable request line");
                let resp = serde_json::json!({
                    "ok": false,
                    "error": { "code": "bad_json", "message": e.to_string() },
                });
                let _ = writeln!(stdout, "{}", resp);
                let _ = stdout.flush();
                continue;
            }
        };

        let resp = ipc::handle_request(&mut state, req);
        let _ = writeln!(
            stdout,
            "{}",
            serde_json::to_string(&resp).unwrap_or_else(|_| "{\"ok\":false}".to_string())
        );
        let _ = stdout.flush();
    }
}

/// Logs go to stderr; stdout carries only responses.
fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .with_writer(io::stderr)
        .compact()
        .init();
}
