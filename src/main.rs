mod db;
mod grading;
mod ipc;
mod logging;

use std::io::{self, BufRead, Write};
use std::path::PathBuf;

const WORKSPACE_ENV: &str = "GRADEBOOKD_WORKSPACE";

fn main() {
    logging::init_tracing();
    tracing::info!(version = env!("CARGO_PKG_VERSION"), "gradebookd starting");

    let mut state = ipc::AppState::default();

    // Best-effort: a bad preset workspace must not keep the sidecar from starting.
    if let Some(path) = std::env::var_os(WORKSPACE_ENV).map(PathBuf::from) {
        if let Err(e) = ipc::open_workspace(&mut state, &path) {
            tracing::error!(workspace = %path.display(), error = %e, "preset workspace failed to open");
        }
    }

    let stdin = io::stdin();
    let mut stdout = io::stdout();

    for line in stdin.lock().lines() {
        let line = match line {
            Ok(v) => v,
            Err(e) => {
                tracing::error!(error = %e, "stdin read failed");
                break;
            }
        };
        if line.trim().is_empty() {
            continue;
        }

        let req: ipc::Request = match serde_json::from_str(&line) {
            Ok(v) => v,
            Err(e) => {
                // Can't reply without id.
                tracing::warn!(error = %e, "bad request json");
                let resp = serde_json::json!({
                    "ok": false,
                    "error": { "code": "bad_json", "message": e.to_string() }
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

    tracing::info!("stdin closed, shutting down");
}
