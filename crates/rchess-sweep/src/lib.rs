//! UCI エンジンで全合法手を評価し、UI 向けの評価表を作る。
//!
//! 1 本のエンジンに対して `ucinewgame` / `position fen` / `go` を 1 局面ずつ送り、
//! 応答の `info ... score` と `bestmove` を位置だけで相関させる。

pub mod aggregate;
pub mod cancel;
pub mod channel;
pub mod config;
pub mod error;
pub mod evaluator;
pub mod protocol;
pub mod rules;
pub mod sweep;
pub mod synthetic;
pub mod tracker;
pub mod types;

pub use cancel::CancelToken;
pub use channel::{ChannelSettings, EngineChannel, EngineLauncher, ProcessLauncher, SessionState};
pub use config::{ConfigError, SweepConfig};
pub use error::{EvalError, EvalResult};
pub use evaluator::{
    EvaluatorSettings, MATE_SCORE, MateSign, Perspective, PositionEvaluator, SearchOutcome,
    normalize_score,
};
pub use protocol::{RawScore, SearchLimit, UciCommand};
pub use rules::{GameOverReason, GameStatus, Rules, RulesError, STARTING_FEN, StandardRules};
pub use sweep::{
    BEST_MOVE_EPSILON, EvaluationTable, MoveScore, MoveSweep, ScoreMode, SkipReason, SkippedMove,
    SweepSettings,
};
pub use synthetic::{SyntheticEngine, SyntheticReply};
pub use tracker::ScoreLine;
pub use types::{Move, PieceKind, Square};
