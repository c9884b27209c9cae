//! # uci-bridge
//!
//! Serialized access to a single long-lived UCI chess engine subprocess, on
//! behalf of any number of concurrent callers.
//!
//! A UCI engine is one shared, stateful, line-buffered resource: commands go
//! down stdin, answers come back interleaved on stdout, and nothing on the
//! wire says which request an answer belongs to. Two callers talking to the
//! engine at once silently corrupt each other's results. This crate wraps
//! the process in an [`EngineManager`] that owns the lifecycle (spawn,
//! `uci`/`isready` handshake, crash detection, `quit`-then-kill shutdown)
//! and brokers every request through an exclusive, strictly-FIFO ticket, so
//! exactly one protocol conversation is ever in flight.
//!
//! Two request kinds are served:
//!
//! - [`EngineManager::request_analysis`] — a ranked `MultiPV` analysis of a
//!   position, each candidate tagged with whether it delivers checkmate
//!   (judged by a pluggable [`RulesEngine`], not by this crate).
//! - [`EngineManager::request_best_move`] — one best move under a time
//!   budget derived from a 0–20 skill level.
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use uci_bridge::{AnalysisOptions, EngineConfig, EngineManager, ShakmatyRules};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), uci_bridge::EngineError> {
//!     let config = EngineConfig::new("/usr/bin/stockfish");
//!     let manager = EngineManager::new(config, Arc::new(ShakmatyRules));
//!     manager.initialize().await?;
//!
//!     let fen = "rnbqkbnr/pppppppp/8/8/8/8/PPPPPPPP/RNBQKBNR w KQkq - 0 1";
//!     let ranked = manager
//!         .request_analysis(fen, AnalysisOptions::default())
//!         .await?;
//!     for candidate in &ranked {
//!         println!("{} (mate: {})", candidate.mv, candidate.is_checkmate);
//!     }
//!
//!     manager.shutdown().await
//! }
//! ```
//!
//! The manager is an explicitly owned value — share it behind an `Arc` if
//! several tasks need it. There is no global engine handle, and a crashed
//! engine stays down until someone calls [`EngineManager::initialize`]
//! again.

mod broker;
pub mod config;
pub mod error;
pub mod launch;
pub mod logging;
pub mod manager;
pub mod protocol;
pub mod requests;
pub mod rules;
mod session;

pub use config::EngineConfig;
pub use error::EngineError;
pub use launch::{CommandLauncher, EngineIo, EngineLauncher, ProcessHandle};
pub use manager::EngineManager;
pub use protocol::Score;
pub use requests::{AnalysisOptions, BestMove, RankedMove};
pub use rules::RulesEngine;
#[cfg(feature = "shakmaty-rules")]
pub use rules::ShakmatyRules;
pub use session::EngineState;
