//! Incremental framing and grammars for the engine's line protocol.
//!
//! The engine writes to its stdout pipe in whatever chunks the OS hands us;
//! line boundaries fall anywhere. [`LineBuffer`] re-frames the byte stream
//! into complete lines, and the parse functions below recognize the two
//! line shapes a conversation cares about: `info ... multipv N ... pv <move>`
//! candidates and the terminal `bestmove` line. Everything else on the wire
//! (telemetry, `currmove` reports, option listings) is skipped without
//! failing the conversation.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Accumulates raw stdout bytes and yields complete lines.
///
/// Invariant: after every call the buffer holds exactly the trailing
/// incomplete fragment, so the extracted lines are identical no matter how
/// the byte stream was chunked.
#[derive(Debug, Default)]
pub(crate) struct LineBuffer {
    pending: Vec<u8>,
}

impl LineBuffer {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Append a chunk and return every line it completed.
    ///
    /// Lines are split on `\n`; a trailing `\r` is stripped so `\r\n`
    /// engines parse the same as `\n` ones.
    pub(crate) fn extend(&mut self, chunk: &[u8]) -> Vec<String> {
        self.pending.extend_from_slice(chunk);
        let mut lines = Vec::new();
        let mut start = 0;
        while let Some(offset) = self.pending[start..].iter().position(|&b| b == b'\n') {
            let end = start + offset;
            let mut line = &self.pending[start..end];
            if line.last() == Some(&b'\r') {
                line = &line[..line.len() - 1];
            }
            lines.push(String::from_utf8_lossy(line).into_owned());
            start = end + 1;
        }
        self.pending.drain(..start);
        lines
    }
}

/// Engine score for one candidate line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase", tag = "kind", content = "value")]
pub enum Score {
    /// Centipawns from the side to move's point of view.
    Cp(i32),
    /// Moves until forced mate; negative when the engine itself is mated.
    Mate(i32),
}

/// One parsed `info ... multipv N ... pv <move>` candidate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct InfoLine {
    pub multipv: u32,
    pub mv: String,
    pub score: Option<Score>,
}

/// Parse a candidate line. Info lines without a principal variation
/// (`currmove` reports, hash-full telemetry and the like) return `None`.
pub(crate) fn parse_info_line(line: &str) -> Option<InfoLine> {
    let mut tokens = line.split_whitespace();
    if tokens.next() != Some("info") {
        return None;
    }
    // Engines omit the multipv token when only one line is searched.
    let mut multipv = 1u32;
    let mut score = None;
    while let Some(token) = tokens.next() {
        match token {
            "multipv" => multipv = tokens.next()?.parse().ok()?,
            "score" => match tokens.next() {
                Some("cp") => score = tokens.next().and_then(|v| v.parse().ok()).map(Score::Cp),
                Some("mate") => score = tokens.next().and_then(|v| v.parse().ok()).map(Score::Mate),
                _ => return None,
            },
            "pv" => {
                // The first token of the variation is the candidate move;
                // the rest is the continuation and does not matter here.
                let mv = tokens.next()?.to_string();
                return Some(InfoLine { multipv, mv, score });
            }
            _ => {}
        }
    }
    None
}

/// Parse a terminal `bestmove <move> [ponder ...]` line.
///
/// Returns `None` for non-terminal lines. `Some(None)` means the engine
/// reported that no move exists; Stockfish prints the literal `(none)`,
/// other engines print `none`.
pub(crate) fn parse_best_move(line: &str) -> Option<Option<String>> {
    let mut tokens = line.split_whitespace();
    if tokens.next() != Some("bestmove") {
        return None;
    }
    match tokens.next() {
        None | Some("none") | Some("(none)") => Some(None),
        Some(mv) => Some(Some(mv.to_string())),
    }
}

/// Accumulates candidates for one analysis conversation and shapes the final
/// ranking when the terminal line arrives.
#[derive(Debug)]
pub(crate) struct AnalysisCollector {
    /// Latest candidate per principal-variation index; iteration order is
    /// the ranking order.
    candidates: BTreeMap<u32, (String, Option<Score>)>,
    limit: usize,
}

impl AnalysisCollector {
    pub(crate) fn new(limit: usize) -> Self {
        Self {
            candidates: BTreeMap::new(),
            limit,
        }
    }

    /// Feed one line; returns the final ranking once the line was terminal.
    pub(crate) fn on_line(&mut self, line: &str) -> Option<Vec<(String, Option<Score>)>> {
        if let Some(info) = parse_info_line(line) {
            self.candidates.insert(info.multipv, (info.mv, info.score));
            None
        } else if let Some(best) = parse_best_move(line) {
            Some(self.finish(best))
        } else {
            tracing::trace!(target: "engine_stdout", %line, "skipping unrecognized line");
            None
        }
    }

    /// Rank by multipv index ascending, de-duplicate by move keeping the
    /// first-seen rank, cap at the multipv limit, then append the engine's
    /// own best move when it is novel and the cap allows.
    fn finish(&mut self, best: Option<String>) -> Vec<(String, Option<Score>)> {
        let mut ranked: Vec<(String, Option<Score>)> = Vec::with_capacity(self.limit);
        for (_, (mv, score)) in std::mem::take(&mut self.candidates) {
            if ranked.len() == self.limit {
                break;
            }
            if ranked.iter().any(|(seen, _)| *seen == mv) {
                continue;
            }
            ranked.push((mv, score));
        }
        if let Some(best) = best
            && ranked.len() < self.limit
            && !ranked.iter().any(|(seen, _)| *seen == best)
        {
            ranked.push((best, None));
        }
        ranked
    }
}
