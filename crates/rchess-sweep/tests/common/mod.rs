//! Common test utilities for engine bridge tests

#![allow(dead_code)] // These utilities may be used by various test files

use std::time::Duration;

use rchess_sweep::{
    ChannelSettings, EngineChannel, EvaluatorSettings, Move, PositionEvaluator, Rules,
    StandardRules, SyntheticEngine,
};

pub const DEADLINE: Duration = Duration::from_secs(10);

/// Italian game after 3...Nc6 4.Nf3 (white to move).
pub const ITALIAN_FEN: &str =
    "r1bqkbnr/pppp1ppp/2n5/4p3/2B1P3/5N2/PPPP1PPP/RNBQK2R w KQkq - 4 4";

/// White king on a1 with a single legal move (a1a2).
pub const ONE_MOVE_FEN: &str = "1r5k/8/8/8/8/8/8/K7 w - - 0 1";

pub fn evaluator(engine: SyntheticEngine) -> PositionEvaluator {
    evaluator_with(engine, ChannelSettings::default(), EvaluatorSettings::default())
}

pub fn evaluator_with(
    engine: SyntheticEngine,
    channel: ChannelSettings,
    settings: EvaluatorSettings,
) -> PositionEvaluator {
    PositionEvaluator::new(EngineChannel::new(engine, channel), settings)
}

/// FEN as the sweep would send it to the engine.
pub fn normalized_fen(fen: &str) -> String {
    let rules = StandardRules;
    let position = rules.parse_position(fen).expect("valid fen");
    rules.serialize_position(&position)
}

/// FEN after playing `uci` from `fen`.
pub fn fen_after(fen: &str, uci: &str) -> String {
    let rules = StandardRules;
    let position = rules.parse_position(fen).expect("valid fen");
    let mv = Move::parse_uci(uci).expect("valid uci move");
    let next = rules.apply_move(&position, &mv).expect("legal move");
    rules.serialize_position(&next)
}

pub fn count(received: &[String], command: &str) -> usize {
    received.iter().filter(|c| c.as_str() == command).count()
}

pub fn count_prefix(received: &[String], prefix: &str) -> usize {
    received.iter().filter(|c| c.starts_with(prefix)).count()
}

pub fn assert_close(actual: f64, expected: f64) {
    assert!((actual - expected).abs() < 1e-9, "expected {expected}, got {actual}");
}
