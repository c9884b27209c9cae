//! Scripted in-process engine for driving the broker end to end.
//!
//! The scripted engine lives on in-memory duplex pipes behind the same
//! [`EngineLauncher`] seam production uses, records every command line it
//! receives, and can be told to stall, crash, or ignore `quit` — everything
//! needed to observe timeouts, misattribution guards, and kill escalation
//! without a real engine binary.

#![allow(dead_code)]

use std::collections::{HashSet, VecDeque};
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, DuplexStream};
use tokio_util::sync::CancellationToken;
use uci_bridge::{
    EngineConfig, EngineIo, EngineLauncher, EngineManager, ProcessHandle, RulesEngine,
};

/// Behavior of the scripted engine for one `go` command.
#[derive(Debug, Clone)]
pub enum GoScript {
    /// Emit the given raw lines (the last one normally a `bestmove`).
    Respond(Vec<String>),
    /// Say nothing until `stop` arrives, then emit the given terminal line.
    AfterStop(String),
    /// Never answer.
    Silent,
    /// Exit the process mid-search.
    Crash,
}

/// How the scripted engine performs the startup handshake.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakeScript {
    Normal,
    /// Never emit `uciok`.
    Mute,
    /// Exit before answering `uci`.
    ExitEarly,
}

/// Full behavior of one scripted engine process.
#[derive(Debug, Clone)]
pub struct EngineScript {
    pub handshake: HandshakeScript,
    /// Consumed in order, one entry per `go`; further `go`s get [`GoScript::Silent`].
    pub on_go: Vec<GoScript>,
    /// Whether `quit` makes the process exit within the grace period.
    pub honor_quit: bool,
}

impl Default for EngineScript {
    fn default() -> Self {
        Self {
            handshake: HandshakeScript::Normal,
            on_go: Vec::new(),
            honor_quit: true,
        }
    }
}

impl EngineScript {
    pub fn with_go(on_go: Vec<GoScript>) -> Self {
        Self {
            on_go,
            ..Self::default()
        }
    }
}

/// Shared observation log: every command line the engine received, plus
/// whether it was forcefully killed.
#[derive(Debug, Clone, Default)]
pub struct EngineLog {
    commands: Arc<Mutex<Vec<String>>>,
    killed: Arc<AtomicBool>,
}

impl EngineLog {
    fn push(&self, line: String) {
        self.commands.lock().unwrap().push(line);
    }

    pub fn commands(&self) -> Vec<String> {
        self.commands.lock().unwrap().clone()
    }

    /// Whether a command with the given first token was received.
    pub fn saw(&self, command: &str) -> bool {
        self.count(command) > 0
    }

    /// Number of received commands whose first token is `command`.
    pub fn count(&self, command: &str) -> usize {
        self.commands()
            .iter()
            .filter(|line| line.split_whitespace().next() == Some(command))
            .count()
    }

    fn mark_killed(&self) {
        self.killed.store(true, Ordering::SeqCst);
    }

    pub fn was_killed(&self) -> bool {
        self.killed.load(Ordering::SeqCst)
    }
}

/// Launches one scripted engine per queued [`EngineScript`].
pub struct ScriptedLauncher {
    scripts: Mutex<VecDeque<EngineScript>>,
    log: EngineLog,
}

impl ScriptedLauncher {
    pub fn new(scripts: Vec<EngineScript>) -> Self {
        Self {
            scripts: Mutex::new(scripts.into()),
            log: EngineLog::default(),
        }
    }

    pub fn log(&self) -> EngineLog {
        self.log.clone()
    }
}

#[async_trait]
impl EngineLauncher for ScriptedLauncher {
    async fn launch(&self) -> io::Result<EngineIo> {
        let script = self
            .scripts
            .lock()
            .unwrap()
            .pop_front()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, "no scripted engine left"))?;
        Ok(spawn_scripted(script, self.log.clone()))
    }
}

fn spawn_scripted(script: EngineScript, log: EngineLog) -> EngineIo {
    let (stdin_writer, stdin_reader) = tokio::io::duplex(4096);
    let (stdout_writer, stdout_reader) = tokio::io::duplex(4096);
    let exited = CancellationToken::new();
    tokio::spawn(engine_task(
        script,
        log.clone(),
        stdin_reader,
        stdout_writer,
        exited.clone(),
    ));
    EngineIo {
        stdin: Box::new(stdin_writer),
        stdout: Box::new(stdout_reader),
        process: Box::new(ScriptedProcess { exited, log }),
    }
}

struct ScriptedProcess {
    exited: CancellationToken,
    log: EngineLog,
}

#[async_trait]
impl ProcessHandle for ScriptedProcess {
    async fn wait(&mut self, kill: CancellationToken) -> io::Result<Option<i32>> {
        tokio::select! {
            _ = self.exited.cancelled() => Ok(Some(0)),
            _ = kill.cancelled() => {
                self.log.mark_killed();
                self.exited.cancel();
                Ok(None)
            }
        }
    }
}

async fn send(stdout: &mut DuplexStream, text: &str) {
    let _ = stdout.write_all(text.as_bytes()).await;
    let _ = stdout.flush().await;
}

async fn engine_task(
    script: EngineScript,
    log: EngineLog,
    stdin: DuplexStream,
    mut stdout: DuplexStream,
    exited: CancellationToken,
) {
    let EngineScript {
        handshake,
        on_go,
        honor_quit,
    } = script;
    let mut lines = BufReader::new(stdin).lines();
    let mut gos = on_go.into_iter();

    loop {
        let line = tokio::select! {
            _ = exited.cancelled() => break,
            line = lines.next_line() => match line {
                Ok(Some(line)) => line,
                _ => break,
            },
        };
        let line = line.trim().to_string();
        if line.is_empty() {
            continue;
        }
        log.push(line.clone());

        match line.split_whitespace().next() {
            Some("uci") => match handshake {
                HandshakeScript::Normal => {
                    send(
                        &mut stdout,
                        "id name Scripted 1.0\nid author uci-bridge tests\nuciok\n",
                    )
                    .await;
                }
                HandshakeScript::Mute => {}
                HandshakeScript::ExitEarly => {
                    exited.cancel();
                    break;
                }
            },
            Some("isready") => send(&mut stdout, "readyok\n").await,
            Some("go") => match gos.next().unwrap_or(GoScript::Silent) {
                GoScript::Respond(response) => {
                    for output in response {
                        send(&mut stdout, &format!("{output}\n")).await;
                    }
                }
                GoScript::AfterStop(terminal) => loop {
                    let line = tokio::select! {
                        _ = exited.cancelled() => return,
                        line = lines.next_line() => match line {
                            Ok(Some(line)) => line,
                            _ => return,
                        },
                    };
                    let line = line.trim().to_string();
                    if line.is_empty() {
                        continue;
                    }
                    log.push(line.clone());
                    match line.split_whitespace().next() {
                        Some("stop") => {
                            send(&mut stdout, &format!("{terminal}\n")).await;
                            break;
                        }
                        Some("quit") if honor_quit => {
                            exited.cancel();
                            return;
                        }
                        _ => {}
                    }
                },
                GoScript::Silent => {}
                GoScript::Crash => {
                    exited.cancel();
                    break;
                }
            },
            Some("quit") => {
                if honor_quit {
                    exited.cancel();
                    break;
                }
                // Simulate a wedged engine: acknowledge nothing, keep running.
            }
            _ => {}
        }
    }
    // Dropping stdout closes the manager's reader.
}

/// Rules engine with scripted answers, so tests control legality and mate
/// verdicts independently of any real chess logic.
#[derive(Debug, Clone, Default)]
pub struct StubRules {
    mates: HashSet<String>,
    illegal: HashSet<String>,
}

impl StubRules {
    pub fn new() -> Self {
        Self::default()
    }

    /// Applying `mv` is reported as delivering checkmate.
    pub fn mate_on(mut self, mv: &str) -> Self {
        self.mates.insert(mv.to_string());
        self
    }

    /// `mv` is reported as illegal in every position.
    pub fn illegal(mut self, mv: &str) -> Self {
        self.illegal.insert(mv.to_string());
        self
    }
}

impl RulesEngine for StubRules {
    fn validate_position(&self, fen: &str) -> Result<(), String> {
        if fen == "bogus" {
            Err("unparseable FEN".to_string())
        } else {
            Ok(())
        }
    }

    fn apply_move(&self, fen: &str, mv: &str) -> Option<String> {
        if self.illegal.contains(mv) {
            None
        } else {
            Some(format!("{fen} after {mv}"))
        }
    }

    fn is_checkmate(&self, fen: &str) -> bool {
        self.mates
            .iter()
            .any(|mv| fen.ends_with(&format!("after {mv}")))
    }
}

/// Config with test-sized timings.
pub fn test_config() -> EngineConfig {
    EngineConfig {
        handshake_timeout: Duration::from_secs(2),
        shutdown_grace: Duration::from_millis(300),
        stop_grace: Duration::from_millis(200),
        ..EngineConfig::default()
    }
}

/// Manager over scripted engines, plus the shared observation log.
pub fn scripted_manager(
    scripts: Vec<EngineScript>,
    rules: StubRules,
) -> (EngineManager, EngineLog) {
    scripted_manager_with_config(test_config(), scripts, rules)
}

pub fn scripted_manager_with_config(
    config: EngineConfig,
    scripts: Vec<EngineScript>,
    rules: StubRules,
) -> (EngineManager, EngineLog) {
    let launcher = ScriptedLauncher::new(scripts);
    let log = launcher.log();
    let manager = EngineManager::with_launcher(config, Arc::new(rules), Box::new(launcher));
    (manager, log)
}
