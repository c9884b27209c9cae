//! Logging initialization.
//!
//! One `init` for the whole process, guarded by `Once` so libraries and
//! tests can call it blindly. Verbosity comes from `RUST_LOG` when set; the
//! per-line engine traffic is on the `engine_stdin` / `engine_stdout`
//! targets, so `RUST_LOG=engine_stdout=trace` shows the raw protocol.

use std::io::stderr;
use std::sync::Once;

use tracing_subscriber::{EnvFilter, fmt::layer, prelude::*};

static INIT: Once = Once::new();

/// Initialize the global tracing subscriber, writing to stderr.
///
/// `default_level` applies when `RUST_LOG` is unset.
pub fn init(default_level: &str) {
    INIT.call_once(|| {
        let env_filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(format!("{default_level},uci_bridge=debug")));
        tracing_subscriber::registry()
            .with(env_filter)
            .with(layer().with_writer(stderr).with_ansi(true))
            .init();
    });
}

/// Verbose logging for tests.
pub fn init_test_logging() {
    init("trace");
}
