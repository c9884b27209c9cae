//! The two request kinds and the engine conversations that serve them.
//!
//! Both adapters run strictly inside one broker ticket: commands are written
//! only after the grant, and the ticket is held until the conversation is
//! over — including the post-timeout drain, so a late `bestmove` can never
//! be attributed to the next caller.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::time::Instant;

use crate::config::EngineConfig;
use crate::error::EngineError;
use crate::protocol::{AnalysisCollector, Score, parse_best_move};
use crate::session::{Conversation, EngineSession};

/// Tunables for one analysis request.
#[derive(Debug, Clone, Copy)]
pub struct AnalysisOptions {
    /// Search depth handed to `go depth`.
    pub depth: u32,
    /// Deadline covering queue wait plus the engine conversation.
    pub timeout: Duration,
}

impl Default for AnalysisOptions {
    fn default() -> Self {
        Self {
            depth: 5,
            timeout: Duration::from_secs(30),
        }
    }
}

/// One ranked candidate move from an analysis request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RankedMove {
    /// Coordinate-notation move, exactly as the engine printed it.
    #[serde(rename = "move")]
    pub mv: String,
    /// Whether applying the move to the analyzed position delivers mate.
    pub is_checkmate: bool,
    /// Engine score for the line, when one was reported.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub score: Option<Score>,
}

/// Outcome of a best-move request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BestMove {
    /// The chosen move, or `None` when the engine has no legal move.
    #[serde(rename = "move")]
    pub mv: Option<String>,
    /// Skill level the move was computed at.
    pub skill_level: u8,
}

/// Think-time budget for one best-move request: 100ms base plus 50ms per
/// skill step.
pub(crate) fn move_time(skill_level: u8) -> Duration {
    Duration::from_millis(100 + u64::from(skill_level) * 50)
}

/// Run the multi-line analysis conversation. Returns ranked `(move, score)`
/// pairs; checkmate tagging happens in the manager, after release.
pub(crate) async fn run_analysis(
    session: &EngineSession,
    config: &EngineConfig,
    fen: &str,
    options: &AnalysisOptions,
    deadline: Instant,
) -> Result<Vec<(String, Option<Score>)>, EngineError> {
    let mut conversation = session.begin_conversation();
    session.write_line("ucinewgame").await?;
    session.write_line(&format!("position fen {fen}")).await?;
    session
        .write_line(&format!("setoption name MultiPV value {}", config.multipv))
        .await?;
    session
        .write_line(&format!("go depth {}", options.depth))
        .await?;

    let mut collector = AnalysisCollector::new(config.multipv as usize);
    loop {
        match tokio::time::timeout_at(deadline, conversation.next_line()).await {
            Ok(Some(line)) => {
                if let Some(ranked) = collector.on_line(&line) {
                    return Ok(ranked);
                }
            }
            Ok(None) => return Err(session.disconnect_error()),
            Err(_) => {
                abort_search(session, &mut conversation, config.stop_grace).await;
                return Err(EngineError::Timeout {
                    timeout: options.timeout,
                });
            }
        }
    }
}

/// Run the single best-move conversation.
pub(crate) async fn run_best_move(
    session: &EngineSession,
    config: &EngineConfig,
    fen: &str,
    skill_level: u8,
    movetime: Duration,
    total: Duration,
    deadline: Instant,
) -> Result<Option<String>, EngineError> {
    let mut conversation = session.begin_conversation();
    session.write_line(&format!("position fen {fen}")).await?;
    session
        .write_line(&format!("setoption name Skill Level value {skill_level}"))
        .await?;
    session
        .write_line(&format!("go movetime {}", movetime.as_millis()))
        .await?;

    loop {
        match tokio::time::timeout_at(deadline, conversation.next_line()).await {
            Ok(Some(line)) => {
                if let Some(best) = parse_best_move(&line) {
                    return Ok(best);
                }
            }
            Ok(None) => return Err(session.disconnect_error()),
            Err(_) => {
                abort_search(session, &mut conversation, config.stop_grace).await;
                return Err(EngineError::Timeout { timeout: total });
            }
        }
    }
}

/// Stop a search that overran its deadline and drain the conversation until
/// its terminal line or the grace period elapses. The engine keeps emitting
/// into this conversation until then; the next ticket starts clean.
async fn abort_search(session: &EngineSession, conversation: &mut Conversation, grace: Duration) {
    if session.write_line("stop").await.is_err() {
        // Pipe already gone; the exit watcher is failing everything anyway.
        return;
    }
    let drained = tokio::time::timeout(grace, async {
        while let Some(line) = conversation.next_line().await {
            if parse_best_move(&line).is_some() {
                return true;
            }
        }
        false
    })
    .await;
    match drained {
        Ok(true) => tracing::debug!("aborted search reached its terminal line"),
        Ok(false) => {}
        Err(_) => tracing::warn!(?grace, "engine did not answer stop within the grace period"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn move_time_scales_linearly_with_skill() {
        assert_eq!(move_time(0), Duration::from_millis(100));
        assert_eq!(move_time(10), Duration::from_millis(600));
        assert_eq!(move_time(20), Duration::from_millis(1100));
    }
}
