//! Tracing setup for the sidecar.
//!
//! stdout carries the IPC protocol, so every log line goes to stderr.
//! `RUST_LOG` filters as usual (default `info`); `GRADEBOOKD_LOG_FORMAT=json`
//! switches to newline-delimited JSON.

use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

pub const LOG_FORMAT_ENV: &str = "GRADEBOOKD_LOG_FORMAT";

pub fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let json = std::env::var(LOG_FORMAT_ENV)
        .map(|v| v.trim().eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    // try_init: a second call is a no-op.
    if json {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt::layer().with_target(false).with_writer(std::io::stderr).json())
            .try_init()
            .ok();
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(
                fmt::layer()
                    .with_target(false)
                    .with_ansi(false)
                    .with_writer(std::io::stderr),
            )
            .try_init()
            .ok();
    }
}
