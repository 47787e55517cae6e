//! Move sweep
//!
//! Evaluates the position after every legal move, one search at a time on the
//! single engine channel, and reconciles the result with the engine's own choice
//! of best move.

use std::collections::BTreeMap;
use std::time::Duration;

use log::{debug, info, warn};
use serde::{Deserialize, Serialize};

use crate::cancel::CancelToken;
use crate::error::{EvalError, EvalResult};
use crate::evaluator::{DEFAULT_DEADLINE, Perspective, PositionEvaluator, SearchOutcome};
use crate::protocol::SearchLimit;
use crate::rules::{GameOverReason, GameStatus, Rules};
use crate::types::{Move, PieceKind, Square};

/// Margin by which the engine's chosen move is lifted above every other entry.
pub const BEST_MOVE_EPSILON: f64 = 0.10;

pub const DEFAULT_DEPTH: u32 = 12;

/// How a move's score relates to the engine's evaluation of the resulting position.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScoreMode {
    /// Raw evaluation of the resulting position
    Absolute,
    /// Evaluation of the resulting position minus the baseline evaluation
    #[default]
    Differential,
}

/// Sweep knobs.
#[derive(Clone, Copy, Debug)]
pub struct SweepSettings {
    pub limit: SearchLimit,
    /// Limit for the separate best-move request; `None` reuses `limit`
    pub best_move_limit: Option<SearchLimit>,
    pub deadline: Duration,
    pub score_mode: ScoreMode,
}

impl Default for SweepSettings {
    fn default() -> Self {
        Self {
            limit: SearchLimit::Depth(DEFAULT_DEPTH),
            best_move_limit: None,
            deadline: DEFAULT_DEADLINE,
            score_mode: ScoreMode::default(),
        }
    }
}

/// One evaluated move. Higher is better for the side that moved.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct MoveScore {
    pub origin: Square,
    pub destination: Square,
    pub score: f64,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    IllegalMoveApplication,
    TimedOut,
    /// An earlier search still held the engine when the deadline fired
    ChannelBusy,
    EngineError,
}

/// A legal move that has no entry in the table.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct SkippedMove {
    #[serde(rename = "move")]
    pub mv: Move,
    pub reason: SkipReason,
}

/// Per-origin move scores of one sweep. Missing moves are unknown, not bad.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct EvaluationTable {
    entries: BTreeMap<Square, Vec<MoveScore>>,
    pub baseline: Option<f64>,
    pub engine_best: Option<Move>,
    pub skipped: Vec<SkippedMove>,
    pub cancelled: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub game_over: Option<GameOverReason>,
}

impl EvaluationTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends in enumeration order under the move's origin square.
    pub fn push(&mut self, entry: MoveScore) {
        self.entries.entry(entry.origin).or_default().push(entry);
    }

    /// Moves from `origin`; `None` when the square has no entries.
    pub fn moves_from(&self, origin: Square) -> Option<&[MoveScore]> {
        self.entries.get(&origin).map(Vec::as_slice).filter(|moves| !moves.is_empty())
    }

    pub fn origins(&self) -> impl Iterator<Item = Square> + '_ {
        self.entries.iter().filter(|(_, moves)| !moves.is_empty()).map(|(sq, _)| *sq)
    }

    pub fn iter(&self) -> impl Iterator<Item = &MoveScore> + '_ {
        self.entries.values().flatten()
    }

    pub fn get(&self, origin: Square, destination: Square) -> Option<&MoveScore> {
        self.entries.get(&origin)?.iter().find(|m| m.destination == destination)
    }

    pub fn len(&self) -> usize {
        self.entries.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Lift the engine-chosen move to `max + BEST_MOVE_EPSILON`.
    ///
    /// Returns `false` (and leaves the table untouched) when the move has no entry.
    pub fn promote_engine_best(&mut self, origin: Square, destination: Square) -> bool {
        let Some(max) = self.iter().map(|m| m.score).reduce(f64::max) else {
            return false;
        };
        let Some(entry) = self
            .entries
            .get_mut(&origin)
            .and_then(|moves| moves.iter_mut().find(|m| m.destination == destination))
        else {
            return false;
        };
        entry.score = max + BEST_MOVE_EPSILON;
        true
    }
}

/// Keep one move per origin/destination pair; promotions collapse to the queen.
fn collapse_promotions(moves: Vec<Move>) -> Vec<Move> {
    moves
        .into_iter()
        .filter(|m| matches!(m.promotion, None | Some(PieceKind::Queen)))
        .collect()
}

/// Runs sweeps for one rules collaborator.
pub struct MoveSweep<R: Rules> {
    rules: R,
    settings: SweepSettings,
}

impl<R: Rules> MoveSweep<R> {
    pub fn new(rules: R, settings: SweepSettings) -> Self {
        Self { rules, settings }
    }

    pub fn rules(&self) -> &R {
        &self.rules
    }

    pub fn settings(&self) -> &SweepSettings {
        &self.settings
    }

    /// Parse `text` with the rules collaborator and sweep it.
    pub async fn sweep_text(
        &self,
        evaluator: &mut PositionEvaluator,
        text: &str,
        cancel: &CancelToken,
    ) -> EvalResult<EvaluationTable> {
        let position = self
            .rules
            .parse_position(text)
            .map_err(|e| EvalError::InvalidPosition(e.to_string()))?;
        self.sweep(evaluator, &position, cancel).await
    }

    /// Evaluate every legal move of `position`.
    ///
    /// Only `EngineUnavailable` is returned as an error; everything else leaves a
    /// (possibly partial) table.
    pub async fn sweep(
        &self,
        evaluator: &mut PositionEvaluator,
        position: &R::Position,
        cancel: &CancelToken,
    ) -> EvalResult<EvaluationTable> {
        let mut table = EvaluationTable::new();
        if let GameStatus::Over(reason) = self.rules.game_status(position) {
            debug!("sweep skipped, game over: {reason:?}");
            table.game_over = Some(reason);
            return Ok(table);
        }

        let settings = &self.settings;
        let fen = self.rules.serialize_position(position);
        let moves = collapse_promotions(self.rules.legal_moves(position));

        let baseline = evaluator
            .evaluate(&fen, settings.limit, settings.deadline, Perspective::SideToMove, cancel)
            .await?;
        table.baseline = baseline.value();
        let reference = match (settings.score_mode, table.baseline) {
            (ScoreMode::Absolute, _) => 0.0,
            (ScoreMode::Differential, Some(value)) => value,
            (ScoreMode::Differential, None) => {
                warn!("baseline evaluation unavailable ({baseline:?}); using 0");
                0.0
            }
        };

        for mv in moves {
            if cancel.is_cancelled() {
                table.cancelled = true;
                break;
            }
            let next = match self.rules.apply_move(position, &mv) {
                Ok(next) => next,
                Err(e) => {
                    let err = EvalError::IllegalMoveApplication {
                        mv: mv.to_string(),
                        reason: e.to_string(),
                    };
                    warn!("{err}; skipped");
                    let reason = SkipReason::IllegalMoveApplication;
                    table.skipped.push(SkippedMove { mv, reason });
                    continue;
                }
            };
            let next_fen = self.rules.serialize_position(&next);
            let outcome = evaluator
                .evaluate(
                    &next_fen,
                    settings.limit,
                    settings.deadline,
                    Perspective::PreviousMover,
                    cancel,
                )
                .await?;
            let reason = match outcome {
                SearchOutcome::Cancelled => {
                    table.cancelled = true;
                    break;
                }
                SearchOutcome::TimedOut => {
                    warn!("{mv} skipped: {}", EvalError::EvaluationTimeout(settings.deadline));
                    SkipReason::TimedOut
                }
                SearchOutcome::ChannelBusy => {
                    warn!("{mv} skipped: engine still busy with an earlier search");
                    SkipReason::ChannelBusy
                }
                SearchOutcome::EngineError(reason) => {
                    warn!("{mv} skipped: engine error: {reason}");
                    SkipReason::EngineError
                }
                resolved => {
                    let value = resolved.value().unwrap_or_default();
                    table.push(MoveScore {
                        origin: mv.from,
                        destination: mv.to,
                        score: value - reference,
                    });
                    continue;
                }
            };
            table.skipped.push(SkippedMove { mv, reason });
        }

        if table.cancelled {
            info!("sweep cancelled after {} entries", table.len());
            return Ok(table);
        }

        let best_limit = settings.best_move_limit.unwrap_or(settings.limit);
        let best = evaluator.best_move(&fen, best_limit, settings.deadline, cancel).await?;
        if cancel.is_cancelled() {
            // 最善手の問い合わせ中に中断された
            table.cancelled = true;
            info!("sweep cancelled before the engine best move; {} entries", table.len());
            return Ok(table);
        }
        if let Some(best) = best {
            match Move::squares_of_uci(&best) {
                Some((from, to)) => {
                    table.engine_best = Some(Move::new(from, to));
                    if !table.promote_engine_best(from, to) {
                        debug!("engine best move {best} has no table entry");
                    }
                }
                None => debug!("engine best move {best:?} not in from/to form"),
            }
        }

        info!(
            "sweep finished: {} entries, {} skipped, engine best {:?}",
            table.len(),
            table.skipped.len(),
            table.engine_best.map(|m| m.to_string())
        );
        Ok(table)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sq(s: &str) -> Square {
        s.parse().unwrap()
    }

    fn entry(from: &str, to: &str, score: f64) -> MoveScore {
        MoveScore { origin: sq(from), destination: sq(to), score }
    }

    #[test]
    fn entries_keep_enumeration_order_per_origin() {
        let mut table = EvaluationTable::new();
        table.push(entry("g1", "h3", -0.2));
        table.push(entry("b1", "c3", 0.1));
        table.push(entry("g1", "f3", 0.3));

        let g1: Vec<_> =
            table.moves_from(sq("g1")).unwrap().iter().map(|m| m.destination).collect();
        assert_eq!(g1, vec![sq("h3"), sq("f3")]);
        assert_eq!(table.len(), 3);
        assert!(table.moves_from(sq("e2")).is_none());
    }

    #[test]
    fn engine_best_is_lifted_above_max() {
        let mut table = EvaluationTable::new();
        table.push(entry("e2", "e4", 0.5));
        table.push(entry("d2", "d4", 0.9));
        table.push(entry("g1", "f3", 0.2));

        assert!(table.promote_engine_best(sq("g1"), sq("f3")));
        let lifted = table.get(sq("g1"), sq("f3")).unwrap().score;
        assert!((lifted - (0.9 + 0.10)).abs() < 1e-9);
        // 他のエントリは変わらない
        assert_eq!(table.get(sq("d2"), sq("d4")).unwrap().score, 0.9);
    }

    #[test]
    fn engine_best_missing_from_table_changes_nothing() {
        let mut table = EvaluationTable::new();
        table.push(entry("e2", "e4", 0.5));
        let before = table.clone();
        assert!(!table.promote_engine_best(sq("a2"), sq("a3")));
        assert_eq!(table, before);
        assert!(!EvaluationTable::new().promote_engine_best(sq("a2"), sq("a3")));
    }

    #[test]
    fn promotions_collapse_to_queen() {
        let from = sq("a7");
        let to = sq("a8");
        let moves = vec![
            Move::new(from, to).with_promotion(PieceKind::Queen),
            Move::new(from, to).with_promotion(PieceKind::Rook),
            Move::new(from, to).with_promotion(PieceKind::Bishop),
            Move::new(from, to).with_promotion(PieceKind::Knight),
            Move::new(sq("h1"), sq("h2")),
        ];
        let kept = collapse_promotions(moves);
        assert_eq!(kept.len(), 2);
        assert_eq!(kept[0].promotion, Some(PieceKind::Queen));
    }

    #[test]
    fn table_serializes_for_the_ui() {
        let mut table = EvaluationTable::new();
        table.push(entry("e2", "e4", 0.5));
        let json = serde_json::to_value(&table).unwrap();
        assert_eq!(json["entries"]["e2"][0]["destination"], "e4");
        assert_eq!(json["cancelled"], false);
    }
}
