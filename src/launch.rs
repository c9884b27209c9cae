//! Spawning the engine subprocess.
//!
//! The session layer only ever sees [`EngineIo`]: a writable stdin, a
//! readable stdout, and a [`ProcessHandle`] to reap or kill the process.
//! Production uses [`CommandLauncher`] over `tokio::process`; tests plug in
//! scripted engines over in-memory pipes through the same seam.

use std::path::PathBuf;
use std::process::Stdio;

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::process::{Child, Command};
use tokio_util::sync::CancellationToken;

/// Pipes plus control handle for one spawned engine process.
pub struct EngineIo {
    /// The engine's stdin, written one command line at a time.
    pub stdin: Box<dyn AsyncWrite + Send + Unpin>,
    /// The engine's stdout, read in raw chunks.
    pub stdout: Box<dyn AsyncRead + Send + Unpin>,
    /// Handle used to await exit and to escalate to a kill.
    pub process: Box<dyn ProcessHandle>,
}

/// Control surface of a spawned engine, separable from its pipes so tests
/// can substitute a scripted engine.
#[async_trait]
pub trait ProcessHandle: Send {
    /// Wait for the process to exit. When `kill` fires first, terminate the
    /// process forcefully and reap it. Returns the exit code when the
    /// platform reports one.
    async fn wait(&mut self, kill: CancellationToken) -> std::io::Result<Option<i32>>;
}

/// Launches engine processes.
#[async_trait]
pub trait EngineLauncher: Send + Sync {
    async fn launch(&self) -> std::io::Result<EngineIo>;
}

/// Spawns the configured engine binary with piped stdin/stdout.
#[derive(Debug, Clone)]
pub struct CommandLauncher {
    path: PathBuf,
    args: Vec<String>,
}

impl CommandLauncher {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            args: Vec::new(),
        }
    }

    pub fn with_args(mut self, args: impl IntoIterator<Item = String>) -> Self {
        self.args = args.into_iter().collect();
        self
    }
}

#[async_trait]
impl EngineLauncher for CommandLauncher {
    async fn launch(&self) -> std::io::Result<EngineIo> {
        tracing::info!(path = %self.path.display(), "spawning engine process");
        let mut child = Command::new(&self.path)
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()?;
        let stdin = child.stdin.take().ok_or_else(|| {
            std::io::Error::new(std::io::ErrorKind::BrokenPipe, "engine stdin not captured")
        })?;
        let stdout = child.stdout.take().ok_or_else(|| {
            std::io::Error::new(std::io::ErrorKind::BrokenPipe, "engine stdout not captured")
        })?;
        Ok(EngineIo {
            stdin: Box::new(stdin),
            stdout: Box::new(stdout),
            process: Box::new(ChildProcess { child }),
        })
    }
}

struct ChildProcess {
    child: Child,
}

#[async_trait]
impl ProcessHandle for ChildProcess {
    async fn wait(&mut self, kill: CancellationToken) -> std::io::Result<Option<i32>> {
        let status = {
            let wait = self.child.wait();
            tokio::pin!(wait);
            tokio::select! {
                status = &mut wait => Some(status?),
                _ = kill.cancelled() => None,
            }
        };
        match status {
            Some(status) => Ok(status.code()),
            None => {
                self.child.start_kill()?;
                Ok(self.child.wait().await?.code())
            }
        }
    }
}
