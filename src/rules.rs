//! The rules-engine collaborator boundary.
//!
//! Position and move legality are not this crate's business; they are
//! consumed through this narrow seam. The broker only needs three answers:
//! is this FEN playable, what position does a move lead to, and is a
//! position checkmate.

/// Chess rules as seen by the engine broker.
pub trait RulesEngine: Send + Sync {
    /// Check that `fen` encodes a playable position. The error string is
    /// surfaced verbatim in [`EngineError::InvalidPosition`].
    ///
    /// [`EngineError::InvalidPosition`]: crate::error::EngineError::InvalidPosition
    fn validate_position(&self, fen: &str) -> Result<(), String>;

    /// Apply `mv` (coordinate notation, as engines print it) to `fen`.
    /// Returns the resulting position, or `None` when the move is illegal.
    fn apply_move(&self, fen: &str, mv: &str) -> Option<String>;

    /// Whether the side to move in `fen` is checkmated.
    fn is_checkmate(&self, fen: &str) -> bool;
}

#[cfg(feature = "shakmaty-rules")]
mod shakmaty_rules {
    use shakmaty::fen::Fen;
    use shakmaty::uci::Uci;
    use shakmaty::{CastlingMode, Chess, EnPassantMode, Position};

    use super::RulesEngine;

    /// [`RulesEngine`] backed by the `shakmaty` move-generation crate.
    #[derive(Debug, Clone, Copy, Default)]
    pub struct ShakmatyRules;

    impl ShakmatyRules {
        fn position(fen: &str) -> Result<Chess, String> {
            let parsed: Fen = fen
                .parse()
                .map_err(|e| format!("unparseable FEN: {e}"))?;
            parsed
                .into_position(CastlingMode::Standard)
                .map_err(|e| format!("illegal position: {e}"))
        }
    }

    impl RulesEngine for ShakmatyRules {
        fn validate_position(&self, fen: &str) -> Result<(), String> {
            Self::position(fen).map(|_| ())
        }

        fn apply_move(&self, fen: &str, mv: &str) -> Option<String> {
            let position = Self::position(fen).ok()?;
            let uci: Uci = mv.parse().ok()?;
            let m = uci.to_move(&position).ok()?;
            let next = position.play(&m).ok()?;
            Some(Fen::from_position(next, EnPassantMode::Legal).to_string())
        }

        fn is_checkmate(&self, fen: &str) -> bool {
            Self::position(fen)
                .map(|position| position.is_checkmate())
                .unwrap_or(false)
        }
    }

}

#[cfg(feature = "shakmaty-rules")]
pub use shakmaty_rules::ShakmatyRules;
