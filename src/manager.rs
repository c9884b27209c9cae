//! The public facade: one explicitly owned manager per engine process.
//!
//! There is no ambient global here. Whoever needs the engine holds (a
//! reference to) an [`EngineManager`] and every piece of state lives inside
//! it, so two managers over two binaries coexist without interference.

use std::sync::{Arc, Mutex};

use tokio::sync::watch;
use tokio::time::Instant;

use crate::broker::Ticket;
use crate::config::EngineConfig;
use crate::error::EngineError;
use crate::launch::{CommandLauncher, EngineLauncher};
use crate::protocol::Score;
use crate::requests::{
    AnalysisOptions, BestMove, RankedMove, move_time, run_analysis, run_best_move,
};
use crate::rules::RulesEngine;
use crate::session::{EngineSession, EngineState};

/// Mediates all access to one UCI engine subprocess.
///
/// Any number of tasks may call [`request_analysis`](Self::request_analysis)
/// and [`request_best_move`](Self::request_best_move) concurrently; the
/// manager serializes them into one engine conversation at a time, strictly
/// in arrival order.
pub struct EngineManager {
    config: EngineConfig,
    launcher: Box<dyn EngineLauncher>,
    rules: Arc<dyn RulesEngine>,
    state: Arc<watch::Sender<EngineState>>,
    session: Mutex<Option<Arc<EngineSession>>>,
    /// Serializes spawn attempts; handshake outcomes are shared through the
    /// state watch instead.
    init_lock: tokio::sync::Mutex<()>,
}

impl EngineManager {
    /// Manager that spawns the engine binary named in `config`.
    pub fn new(config: EngineConfig, rules: Arc<dyn RulesEngine>) -> Self {
        let launcher =
            CommandLauncher::new(&config.engine_path).with_args(config.engine_args.clone());
        Self::with_launcher(config, rules, Box::new(launcher))
    }

    /// Manager around a custom launcher, for embedded or scripted engines.
    pub fn with_launcher(
        config: EngineConfig,
        rules: Arc<dyn RulesEngine>,
        launcher: Box<dyn EngineLauncher>,
    ) -> Self {
        let (state, _) = watch::channel(EngineState::NotStarted);
        Self {
            config,
            launcher,
            rules,
            state: Arc::new(state),
            session: Mutex::new(None),
            init_lock: tokio::sync::Mutex::new(()),
        }
    }

    /// Current lifecycle state.
    pub fn state(&self) -> EngineState {
        *self.state.borrow()
    }

    /// True while the engine is handshaken and accepting requests.
    pub fn is_ready(&self) -> bool {
        matches!(self.state(), EngineState::Ready | EngineState::Busy)
    }

    /// Name the engine reported during the handshake.
    pub fn engine_name(&self) -> Option<String> {
        self.session
            .lock()
            .unwrap()
            .as_ref()
            .and_then(|session| session.engine_name())
    }

    /// Spawn the engine and complete the `uci` / `isready` handshake.
    ///
    /// Idempotent while running. Callers arriving during an in-flight
    /// handshake share its outcome. After a crash an explicit call here is
    /// the only way back to a working engine; nothing respawns implicitly.
    pub async fn initialize(&self) -> Result<(), EngineError> {
        loop {
            match self.state() {
                EngineState::Ready | EngineState::Busy => return Ok(()),
                EngineState::Handshaking => return self.await_handshake().await,
                EngineState::Terminating => return Err(EngineError::ShuttingDown),
                EngineState::NotStarted | EngineState::Crashed => {
                    let _guard = self.init_lock.lock().await;
                    // Someone may have spawned while we waited for the lock.
                    if matches!(self.state(), EngineState::NotStarted | EngineState::Crashed) {
                        return self.spawn_session().await;
                    }
                }
            }
        }
    }

    async fn spawn_session(&self) -> Result<(), EngineError> {
        let session =
            EngineSession::spawn(self.launcher.as_ref(), &self.config, Arc::clone(&self.state))
                .await?;
        // Register before the handshake so a concurrent shutdown can reach it.
        *self.session.lock().unwrap() = Some(Arc::clone(&session));

        // The handshake runs detached: a caller abandoning its `initialize`
        // future must not leave the session stuck in `Handshaking`.
        let window = self.config.handshake_timeout;
        tokio::spawn(async move {
            match session.handshake(window).await {
                Ok(()) => {
                    tracing::info!(
                        engine = session.engine_name().as_deref().unwrap_or("unknown"),
                        "engine ready"
                    );
                }
                Err(e) => {
                    tracing::error!(error = %e, "engine handshake failed");
                    session.teardown().await;
                }
            }
        });
        self.await_handshake().await
    }

    /// Wait for an in-flight handshake to settle, sharing its outcome.
    async fn await_handshake(&self) -> Result<(), EngineError> {
        let mut rx = self.state.subscribe();
        while matches!(*rx.borrow_and_update(), EngineState::Handshaking) {
            if rx.changed().await.is_err() {
                break;
            }
        }
        if self.is_ready() {
            return Ok(());
        }
        Err(EngineError::Handshake("engine failed to start".to_string()))
    }

    /// Ranked multi-line analysis of `fen`.
    ///
    /// Fails fast with [`EngineError::InvalidPosition`] before touching the
    /// engine. Each resolved candidate is tagged with whether it mates, as
    /// judged by the rules engine; a candidate the rules engine cannot apply
    /// is tagged `false` rather than failing the request.
    pub async fn request_analysis(
        &self,
        fen: &str,
        options: AnalysisOptions,
    ) -> Result<Vec<RankedMove>, EngineError> {
        self.rules
            .validate_position(fen)
            .map_err(EngineError::InvalidPosition)?;
        let session = self.ready_session()?;
        let deadline = Instant::now() + options.timeout;

        let _ticket = acquire_until(&session, deadline, options.timeout).await?;
        let ranked = run_analysis(&session, &self.config, fen, &options, deadline).await?;
        Ok(self.tag_checkmates(fen, ranked))
    }

    /// Single best move for `fen` at `skill_level` (0..=20; higher values
    /// are clamped). The engine thinks for `100ms + 50ms * skill_level`.
    pub async fn request_best_move(
        &self,
        fen: &str,
        skill_level: u8,
    ) -> Result<BestMove, EngineError> {
        self.rules
            .validate_position(fen)
            .map_err(EngineError::InvalidPosition)?;
        let skill_level = if skill_level > 20 {
            tracing::warn!(skill_level, "clamping skill level to 20");
            20
        } else {
            skill_level
        };
        let movetime = move_time(skill_level);
        let total = movetime + self.config.best_move_margin;
        let session = self.ready_session()?;
        let deadline = Instant::now() + total;

        let _ticket = acquire_until(&session, deadline, total).await?;
        let mv = run_best_move(
            &session,
            &self.config,
            fen,
            skill_level,
            movetime,
            total,
            deadline,
        )
        .await?;
        Ok(BestMove { mv, skill_level })
    }

    /// Orderly termination: rejects all pending work, asks the engine to
    /// `quit`, kills it when the grace period elapses. Idempotent; a no-op
    /// when nothing is running.
    pub async fn shutdown(&self) -> Result<(), EngineError> {
        let session = self.session.lock().unwrap().clone();
        let Some(session) = session else {
            return Ok(());
        };
        match self.state() {
            // Already dead; just drop the stale session handle.
            EngineState::NotStarted | EngineState::Crashed => {}
            _ => session.shutdown(self.config.shutdown_grace).await,
        }
        self.session.lock().unwrap().take();
        Ok(())
    }

    fn ready_session(&self) -> Result<Arc<EngineSession>, EngineError> {
        match self.state() {
            EngineState::Ready | EngineState::Busy => self
                .session
                .lock()
                .unwrap()
                .clone()
                .ok_or(EngineError::NotRunning),
            EngineState::Terminating => Err(EngineError::ShuttingDown),
            _ => Err(EngineError::NotRunning),
        }
    }

    fn tag_checkmates(&self, fen: &str, ranked: Vec<(String, Option<Score>)>) -> Vec<RankedMove> {
        ranked
            .into_iter()
            .map(|(mv, score)| {
                let is_checkmate = match self.rules.apply_move(fen, &mv) {
                    Some(next) => self.rules.is_checkmate(&next),
                    None => {
                        tracing::warn!(%mv, "engine suggested a move the rules engine rejects");
                        false
                    }
                };
                RankedMove {
                    mv,
                    is_checkmate,
                    score,
                }
            })
            .collect()
    }
}

/// Acquire a ticket before `deadline`. A caller that is still queued when
/// the deadline passes is simply removed; no engine interaction is needed.
async fn acquire_until(
    session: &Arc<EngineSession>,
    deadline: Instant,
    total: std::time::Duration,
) -> Result<Ticket, EngineError> {
    match tokio::time::timeout_at(deadline, session.acquire()).await {
        Ok(result) => result,
        Err(_) => Err(EngineError::Timeout { timeout: total }),
    }
}
