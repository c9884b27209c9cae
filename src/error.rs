//! Error taxonomy for the engine broker.

use std::time::Duration;

/// Everything that can go wrong between a caller and the engine process.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// The engine binary could not be spawned at all.
    #[error("failed to spawn engine process: {0}")]
    Spawn(#[source] std::io::Error),

    /// The process started but never completed the `uci`/`isready` handshake.
    #[error("engine handshake failed: {0}")]
    Handshake(String),

    /// The engine process exited while requests were in flight or queued.
    #[error("engine process crashed")]
    Crashed,

    /// No terminal protocol line arrived within the request deadline.
    #[error("engine timed out after {timeout:?}")]
    Timeout { timeout: Duration },

    /// The input position was rejected by the rules engine.
    #[error("invalid position: {0}")]
    InvalidPosition(String),

    /// The request was cancelled by an in-progress shutdown.
    #[error("engine is shutting down")]
    ShuttingDown,

    /// The pending-request queue is at its configured capacity.
    #[error("engine busy: request queue is full")]
    Busy,

    /// No engine is running: `initialize` was never called, or the previous
    /// process crashed and has not been re-initialized.
    #[error("engine not running")]
    NotRunning,

    /// Writing to the engine's stdin pipe failed.
    #[error("engine I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl EngineError {
    /// Whether the failure is scoped to one request, leaving the engine
    /// usable for the next ticket.
    pub fn is_request_scoped(&self) -> bool {
        matches!(
            self,
            EngineError::Timeout { .. } | EngineError::InvalidPosition(_) | EngineError::Busy
        )
    }
}
