//! Chess rules collaborator
//!
//! The sweep never implements chess rules itself. It asks a [`Rules`]
//! implementation for legal moves, move application and game-over detection,
//! and feeds back only positions that implementation produced.

mod standard;

pub use standard::{STARTING_FEN, StandardRules};

use serde::Serialize;

use crate::types::Move;

/// Rules collaborator errors
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum RulesError {
    #[error("invalid position {text:?}: {reason}")]
    InvalidPosition { text: String, reason: String },

    #[error("illegal move {mv}: {reason}")]
    IllegalMove { mv: String, reason: String },
}

/// Why a game has ended.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum GameOverReason {
    Checkmate,
    Stalemate,
    InsufficientMaterial,
    Other,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum GameStatus {
    Ongoing,
    Over(GameOverReason),
}

impl GameStatus {
    pub fn is_over(self) -> bool {
        matches!(self, GameStatus::Over(_))
    }
}

/// Black-box chess rules.
pub trait Rules {
    /// Opaque, immutable position token.
    type Position: Clone;

    fn parse_position(&self, text: &str) -> Result<Self::Position, RulesError>;

    /// FEN text handed to the engine.
    fn serialize_position(&self, position: &Self::Position) -> String;

    fn legal_moves(&self, position: &Self::Position) -> Vec<Move>;

    fn apply_move(&self, position: &Self::Position, mv: &Move)
    -> Result<Self::Position, RulesError>;

    fn game_status(&self, position: &Self::Position) -> GameStatus;
}
