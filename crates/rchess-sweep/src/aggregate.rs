//! Read-only views over an [`EvaluationTable`] for presentation.

use serde::Serialize;

use crate::sweep::{EvaluationTable, MoveScore};
use crate::types::Square;

const SCORE_TOLERANCE: f64 = 1e-9;

/// Presentation tier of one entry.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ScoreTier {
    /// Best entry of the whole table
    GlobalBest,
    /// Best entry among the moves of its origin square
    SquareBest,
    Other,
}

/// Best score among the moves from `origin`; `None` if the square has none.
pub fn square_best(table: &EvaluationTable, origin: Square) -> Option<f64> {
    table.moves_from(origin)?.iter().map(|m| m.score).reduce(f64::max)
}

pub fn global_best(table: &EvaluationTable) -> Option<f64> {
    table.iter().map(|m| m.score).reduce(f64::max)
}

/// The entry with the strictly greatest score; the earliest one on exact ties.
pub fn best_entry(table: &EvaluationTable) -> Option<&MoveScore> {
    table.iter().fold(None, |best: Option<&MoveScore>, m| match best {
        Some(b) if b.score >= m.score => Some(b),
        _ => Some(m),
    })
}

pub fn is_global_best(table: &EvaluationTable, entry: &MoveScore) -> bool {
    global_best(table).is_some_and(|best| (best - entry.score).abs() < SCORE_TOLERANCE)
}

pub fn tier(table: &EvaluationTable, entry: &MoveScore) -> ScoreTier {
    if is_global_best(table, entry) {
        ScoreTier::GlobalBest
    } else if square_best(table, entry.origin)
        .is_some_and(|best| (best - entry.score).abs() < SCORE_TOLERANCE)
    {
        ScoreTier::SquareBest
    } else {
        ScoreTier::Other
    }
}
