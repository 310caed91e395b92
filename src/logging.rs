//! Optional tracing setup for embedders.
//!
//! The engine only emits `tracing` events; embedders that do not have their
//! own subscriber can call `init` to get a sensible default: stderr output
//! plus an optional daily-rotated file.

use std::path::Path;

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Initialize a default tracing subscriber.
///
/// `log_dir` of `Some` adds a daily-rotating file layer next to the stderr
/// layer. The filter honors `RUST_LOG`, defaulting to `info` with noisy
/// transport crates suppressed.
///
/// # Panics
///
/// Panics if a global subscriber is already set; use `try_init` for the
/// fallible variant.
pub fn init(log_dir: Option<&Path>) {
    try_init(log_dir).expect("tracing subscriber already initialized");
}

/// Fallible variant of [`init`].
pub fn try_init(log_dir: Option<&Path>) -> Result<(), String> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,reqwest=warn,mio=warn,hyper=warn,tungstenite=warn"));

    let console_layer = fmt::layer().compact().with_writer(std::io::stderr);

    let registry = tracing_subscriber::registry()
        .with(filter)
        .with(console_layer);

    match log_dir {
        Some(dir) => {
            std::fs::create_dir_all(dir).map_err(|e| format!("create log dir: {e}"))?;
            let appender = tracing_appender::rolling::daily(dir, "meeting-core.log");
            let file_layer = fmt::layer()
                .with_writer(appender)
                .with_ansi(false)
                .with_target(true);
            registry
                .with(file_layer)
                .try_init()
                .map_err(|e| e.to_string())
        }
        None => registry.try_init().map_err(|e| e.to_string()),
    }
}
