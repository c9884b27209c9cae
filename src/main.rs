//! Drive analyze / best-move requests against a real engine from a terminal.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand};
use uci_bridge::{AnalysisOptions, EngineConfig, EngineManager, ShakmatyRules, logging};

#[derive(Parser)]
#[command(name = "uci-bridge", version, about = "Broker requests to a UCI chess engine")]
struct Cli {
    /// Path to the UCI engine binary.
    #[arg(long, default_value = "stockfish")]
    engine: PathBuf,

    /// Extra argument passed to the engine binary (repeatable).
    #[arg(long = "engine-arg")]
    engine_args: Vec<String>,

    /// Log level when RUST_LOG is unset.
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Print results as JSON.
    #[arg(long)]
    json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Ranked multi-line analysis of a position.
    Analyze {
        /// Position to analyze, as a FEN string.
        #[arg(long)]
        fen: String,

        /// Search depth.
        #[arg(long, default_value_t = 5)]
        depth: u32,

        /// Deadline in seconds, covering queueing and the search.
        #[arg(long, default_value_t = 30)]
        timeout: u64,
    },
    /// Single best move under a skill-scaled time budget.
    BestMove {
        /// Position to move in, as a FEN string.
        #[arg(long)]
        fen: String,

        /// Engine strength, 0..=20.
        #[arg(long, default_value_t = 20)]
        skill: u8,
    },
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    logging::init(&cli.log_level);

    let mut config = EngineConfig::new(&cli.engine);
    config.engine_args = cli.engine_args.clone();
    let manager = EngineManager::new(config, Arc::new(ShakmatyRules));
    manager
        .initialize()
        .await
        .with_context(|| format!("engine at {} failed to start", cli.engine.display()))?;

    let outcome = run(&cli, &manager).await;
    // Best-effort: the process is about to exit either way.
    let _ = manager.shutdown().await;
    outcome
}

async fn run(cli: &Cli, manager: &EngineManager) -> anyhow::Result<()> {
    match &cli.command {
        Command::Analyze { fen, depth, timeout } => {
            let options = AnalysisOptions {
                depth: *depth,
                timeout: Duration::from_secs(*timeout),
            };
            let ranked = manager
                .request_analysis(fen, options)
                .await
                .context("analysis failed")?;
            if cli.json {
                println!("{}", serde_json::to_string_pretty(&ranked)?);
            } else if ranked.is_empty() {
                println!("no candidate moves");
            } else {
                for (rank, candidate) in ranked.iter().enumerate() {
                    let mate = if candidate.is_checkmate { "  (checkmate)" } else { "" };
                    println!("{}. {}{}", rank + 1, candidate.mv, mate);
                }
            }
        }
        Command::BestMove { fen, skill } => {
            let best = manager
                .request_best_move(fen, *skill)
                .await
                .context("best-move request failed")?;
            if cli.json {
                println!("{}", serde_json::to_string_pretty(&best)?);
            } else {
                match &best.mv {
                    Some(mv) => println!("{mv}"),
                    None => println!("(none)"),
                }
            }
        }
    }
    Ok(())
}
