//! Engine subprocess configuration.

use std::path::PathBuf;
use std::time::Duration;

/// Configuration for the engine subprocess and the broker built around it.
///
/// Binary resolution is deliberately the caller's problem: the config holds
/// whatever path the deployment decided on, and nothing here probes the
/// filesystem or the platform.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Path to the UCI engine executable.
    pub engine_path: PathBuf,
    /// Extra command-line arguments passed to the engine binary.
    pub engine_args: Vec<String>,
    /// Upper bound on the full `uci` / `isready` startup handshake.
    pub handshake_timeout: Duration,
    /// How long `shutdown` waits between `quit` and a forceful kill.
    pub shutdown_grace: Duration,
    /// How long a timed-out request may wait for its terminal line after
    /// sending `stop`. Releasing earlier would let a late `bestmove` be
    /// attributed to the next queued request.
    pub stop_grace: Duration,
    /// Margin added to `movetime` when computing a best-move deadline.
    pub best_move_margin: Duration,
    /// Number of ranked candidate lines requested from the engine.
    pub multipv: u32,
    /// Bound on queued requests; `None` keeps the wait queue unbounded.
    pub max_pending: Option<usize>,
}

impl EngineConfig {
    /// Configuration for the engine binary at `engine_path`, with default
    /// timings.
    pub fn new(engine_path: impl Into<PathBuf>) -> Self {
        Self {
            engine_path: engine_path.into(),
            ..Self::default()
        }
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            engine_path: PathBuf::from("stockfish"),
            engine_args: Vec::new(),
            handshake_timeout: Duration::from_secs(15),
            shutdown_grace: Duration::from_secs(2),
            stop_grace: Duration::from_secs(1),
            best_move_margin: Duration::from_secs(7),
            multipv: 3,
            max_pending: None,
        }
    }
}
