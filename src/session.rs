//! One spawned engine process: handshake, state machine, line dispatch,
//! shutdown escalation.
//!
//! An [`EngineSession`] exists from spawn until process exit. Exactly one
//! task reads the stdout pipe; each complete line is dispatched to the
//! single active conversation, or discarded when no conversation is
//! installed. That single-reader rule, together with the broker, is what
//! keeps concurrent callers from corrupting each other's protocol exchange.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde::Serialize;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;

use crate::broker::{SessionBroker, Ticket};
use crate::config::EngineConfig;
use crate::error::EngineError;
use crate::launch::{EngineLauncher, ProcessHandle};
use crate::protocol::LineBuffer;

/// Lifecycle state of the managed engine process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum EngineState {
    NotStarted,
    Handshaking,
    Ready,
    Busy,
    Terminating,
    Crashed,
}

type ActiveSlot = Arc<Mutex<Option<mpsc::UnboundedSender<String>>>>;

/// A live engine subprocess and the plumbing around it.
pub(crate) struct EngineSession {
    writer: tokio::sync::Mutex<Box<dyn AsyncWrite + Send + Unpin>>,
    active: ActiveSlot,
    state: Arc<watch::Sender<EngineState>>,
    broker: Arc<SessionBroker>,
    engine_name: Mutex<Option<String>>,
    /// A shutdown has been requested; aborts an in-flight handshake.
    terminate: CancellationToken,
    /// Escalate to a forceful kill.
    kill: CancellationToken,
    /// The process has exited and `on_exit` has run.
    exited: CancellationToken,
}

impl EngineSession {
    /// Spawn the engine process and its reader / exit-watcher tasks.
    ///
    /// The returned session is still in `Handshaking`; the caller drives
    /// [`EngineSession::handshake`] next. A failed spawn rolls the state
    /// back to `NotStarted`.
    pub(crate) async fn spawn(
        launcher: &dyn EngineLauncher,
        config: &EngineConfig,
        state: Arc<watch::Sender<EngineState>>,
    ) -> Result<Arc<Self>, EngineError> {
        state.send_replace(EngineState::Handshaking);
        let io = match launcher.launch().await {
            Ok(io) => io,
            Err(e) => {
                state.send_replace(EngineState::NotStarted);
                return Err(EngineError::Spawn(e));
            }
        };

        let broker = SessionBroker::new(Arc::clone(&state), config.max_pending);
        let session = Arc::new(Self {
            writer: tokio::sync::Mutex::new(io.stdin),
            active: Arc::new(Mutex::new(None)),
            state,
            broker,
            engine_name: Mutex::new(None),
            terminate: CancellationToken::new(),
            kill: CancellationToken::new(),
            exited: CancellationToken::new(),
        });
        session.spawn_reader(io.stdout);
        session.spawn_exit_watcher(io.process);
        Ok(session)
    }

    /// Drive the `uci` / `isready` startup exchange.
    pub(crate) async fn handshake(&self, window: Duration) -> Result<(), EngineError> {
        let mut conversation = self.begin_conversation();
        let outcome = tokio::time::timeout(window, self.drive_handshake(&mut conversation)).await;
        // Free the conversation slot before anyone can observe `Ready`.
        drop(conversation);
        match outcome {
            Ok(Ok(())) => {
                self.state.send_replace(EngineState::Ready);
                Ok(())
            }
            Ok(Err(e)) => Err(e),
            Err(_) => Err(EngineError::Handshake(format!(
                "no readyok within {window:?}"
            ))),
        }
    }

    async fn drive_handshake(&self, conversation: &mut Conversation) -> Result<(), EngineError> {
        self.write_line("uci").await?;
        self.read_until(conversation, "uciok").await?;
        self.write_line("isready").await?;
        self.read_until(conversation, "readyok").await?;
        Ok(())
    }

    async fn read_until(
        &self,
        conversation: &mut Conversation,
        wanted: &str,
    ) -> Result<(), EngineError> {
        loop {
            let line = tokio::select! {
                line = conversation.next_line() => line,
                _ = self.terminate.cancelled() => return Err(EngineError::ShuttingDown),
            };
            let Some(line) = line else {
                return Err(EngineError::Handshake(format!(
                    "engine exited before {wanted}"
                )));
            };
            if let Some(name) = line.strip_prefix("id name ") {
                tracing::info!(engine = name, "engine identified itself");
                *self.engine_name.lock().unwrap() = Some(name.to_string());
            }
            if line.trim() == wanted {
                return Ok(());
            }
        }
    }

    /// Name the engine reported in its `id name` line, if it did.
    pub(crate) fn engine_name(&self) -> Option<String> {
        self.engine_name.lock().unwrap().clone()
    }

    /// Wait for exclusive use of the engine, strictly FIFO.
    pub(crate) async fn acquire(self: &Arc<Self>) -> Result<Ticket, EngineError> {
        self.broker.acquire().await
    }

    /// Install the active conversation; every stdout line is delivered to it
    /// until it is dropped. The broker guarantees only one exists at a time.
    pub(crate) fn begin_conversation(&self) -> Conversation {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut slot = self.active.lock().unwrap();
        debug_assert!(slot.is_none(), "conversation already active");
        *slot = Some(tx);
        Conversation {
            rx,
            slot: Arc::clone(&self.active),
        }
    }

    /// Write one command line to the engine's stdin.
    pub(crate) async fn write_line(&self, line: &str) -> Result<(), EngineError> {
        tracing::trace!(target: "engine_stdin", %line);
        let mut writer = self.writer.lock().await;
        writer.write_all(line.as_bytes()).await?;
        writer.write_all(b"\n").await?;
        writer.flush().await?;
        Ok(())
    }

    /// Error to report when the conversation channel closes under a request.
    pub(crate) fn disconnect_error(&self) -> EngineError {
        match *self.state.borrow() {
            EngineState::Terminating | EngineState::NotStarted => EngineError::ShuttingDown,
            _ => EngineError::Crashed,
        }
    }

    /// Kill the process and wait until its exit has been fully processed.
    pub(crate) async fn teardown(&self) {
        self.kill.cancel();
        self.exited.cancelled().await;
    }

    /// Orderly termination: cancel all pending work, ask the engine to
    /// `quit`, and escalate to a kill when the grace period elapses.
    pub(crate) async fn shutdown(&self, grace: Duration) {
        self.state.send_replace(EngineState::Terminating);
        self.terminate.cancel();
        // Reject the queue and forcibly resolve the active conversation
        // before touching the process.
        self.broker.close_for_shutdown();
        self.active.lock().unwrap().take();

        if let Err(e) = self.write_line("quit").await {
            tracing::debug!(error = %e, "quit not deliverable, engine pipe already closed");
        }
        if tokio::time::timeout(grace, self.exited.cancelled())
            .await
            .is_err()
        {
            tracing::warn!(?grace, "engine ignored quit, escalating to kill");
            self.kill.cancel();
            self.exited.cancelled().await;
        }
        tracing::info!("engine shut down");
    }

    fn spawn_reader(self: &Arc<Self>, mut stdout: Box<dyn AsyncRead + Send + Unpin>) {
        let session = Arc::clone(self);
        tokio::spawn(async move {
            let mut chunk = [0u8; 4096];
            let mut buffer = LineBuffer::new();
            loop {
                match stdout.read(&mut chunk).await {
                    Ok(0) => break,
                    Ok(n) => {
                        for line in buffer.extend(&chunk[..n]) {
                            session.dispatch_line(line);
                        }
                    }
                    Err(e) => {
                        tracing::debug!(error = %e, "engine stdout read failed");
                        break;
                    }
                }
            }
            tracing::debug!("engine stdout closed");
        });
    }

    fn dispatch_line(&self, line: String) {
        tracing::trace!(target: "engine_stdout", %line);
        let slot = self.active.lock().unwrap();
        match slot.as_ref() {
            Some(tx) => {
                // A send error means the conversation finished between the
                // read and the dispatch; the line belongs to nobody.
                let _ = tx.send(line);
            }
            None => {
                tracing::debug!(target: "engine_stdout", %line, "no active request, discarding line");
            }
        }
    }

    fn spawn_exit_watcher(self: &Arc<Self>, mut process: Box<dyn ProcessHandle>) {
        let session = Arc::clone(self);
        tokio::spawn(async move {
            let status = process.wait(session.kill.clone()).await.ok().flatten();
            session.on_exit(status);
        });
    }

    /// Single authority for the exit transition, whatever caused it.
    fn on_exit(&self, status: Option<i32>) {
        let terminating = matches!(*self.state.borrow(), EngineState::Terminating);
        if terminating {
            tracing::info!(?status, "engine process exited");
            self.state.send_replace(EngineState::NotStarted);
            self.broker.close_for_shutdown();
        } else {
            tracing::error!(?status, "engine process exited unexpectedly");
            self.state.send_replace(EngineState::Crashed);
            self.broker.close_after_crash();
        }
        // Dropping the sender fails the active conversation, which maps the
        // closure to `Crashed` or `ShuttingDown` via `disconnect_error`.
        self.active.lock().unwrap().take();
        self.exited.cancel();
    }
}

/// Receives the stdout lines addressed to the current exclusive occupant of
/// the engine, in emission order.
pub(crate) struct Conversation {
    rx: mpsc::UnboundedReceiver<String>,
    slot: ActiveSlot,
}

impl Conversation {
    /// Next line of this conversation; `None` once the session tore the
    /// conversation down (crash or shutdown).
    pub(crate) async fn next_line(&mut self) -> Option<String> {
        self.rx.recv().await
    }
}

impl Drop for Conversation {
    fn drop(&mut self) {
        // The request is done listening; subsequent lines are stray output
        // and must be discarded rather than handed to a future ticket.
        self.slot.lock().unwrap().take();
    }
}
