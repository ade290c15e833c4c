//! Structured logging setup.
//!
//! Log levels:
//! - ERROR: Failures that abort a whole call or the server
//! - WARN: Per-item failures inside bulk operations, rejected worker reports
//! - INFO: Committed mutations (version published, run seeded, task cancelled/replayed)
//! - DEBUG: CAS conflicts, retries, filter resolution
//! - TRACE: Per-row store traffic
//!
//! Debug mode can be enabled with `--debug` flag or `CONDUCTOR_DEBUG=1` env var.
//! An explicit `RUST_LOG` always wins.

use std::sync::atomic::{AtomicBool, Ordering};
use tracing_subscriber::EnvFilter;

static DEBUG_ENABLED: AtomicBool = AtomicBool::new(false);

/// Initialize logging at INFO unless the environment asks for more.
pub fn init() {
    init_with_debug(false);
}

/// Initialize logging with explicit debug mode setting.
pub fn init_with_debug(debug: bool) {
    let debug_enabled = debug || debug_from_env();
    DEBUG_ENABLED.store(debug_enabled, Ordering::SeqCst);

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directive(debug_enabled)));

    // A second init (tests, embedding) keeps the first subscriber.
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .try_init();
}

/// Check if debug mode is enabled.
pub fn is_debug() -> bool {
    DEBUG_ENABLED.load(Ordering::Relaxed)
}

fn debug_from_env() -> bool {
    std::env::var("CONDUCTOR_DEBUG")
        .map(|v| v == "1" || v.to_lowercase() == "true")
        .unwrap_or(false)
}

fn default_directive(debug: bool) -> &'static str {
    if debug {
        "conductor=debug,info"
    } else {
        "info"
    }
}
