//! Position evaluator against the in-process synthetic engine
//!
//! These tests verify that:
//! 1. Every evaluation sends `ucinewgame` / `position fen` / `go` in order, after one handshake
//! 2. Scores are normalised to pawns, mates saturate and perspective negates
//! 3. Deadlines are honoured and `stop` is only sent when configured

mod common;

use std::time::Duration;

use common::{DEADLINE, ITALIAN_FEN, count, count_prefix, evaluator, evaluator_with, fen_after};
use rchess_sweep::{
    CancelToken, ChannelSettings, EvalError, EvaluatorSettings, MATE_SCORE, MateSign, Perspective,
    STARTING_FEN, ScoreLine, SearchLimit, SearchOutcome, SessionState, SyntheticEngine,
    SyntheticReply,
};
use tokio::time::Instant;

const DEPTH: SearchLimit = SearchLimit::Depth(3);

#[tokio::test(start_paused = true)]
async fn each_evaluation_sends_the_command_triple_after_one_handshake() {
    let engine = SyntheticEngine::new(|_| SyntheticReply::score_cp(35, "e2e4"));
    let mut ev = evaluator(engine.clone());
    let cancel = CancelToken::new();

    for fen in [STARTING_FEN, ITALIAN_FEN] {
        let outcome = ev.evaluate(fen, DEPTH, DEADLINE, Perspective::SideToMove, &cancel).await;
        assert_eq!(outcome, Ok(SearchOutcome::Score(0.35)));
    }

    let expected: Vec<String> = [
        "uci".to_string(),
        "isready".to_string(),
        "ucinewgame".to_string(),
        format!("position fen {STARTING_FEN}"),
        "go depth 3".to_string(),
        "ucinewgame".to_string(),
        format!("position fen {ITALIAN_FEN}"),
        "go depth 3".to_string(),
    ]
    .into();
    assert_eq!(engine.received(), expected);
}

#[tokio::test(start_paused = true)]
async fn movetime_limit_is_forwarded() {
    let engine = SyntheticEngine::new(|_| SyntheticReply::score_cp(0, "e2e4"));
    let mut ev = evaluator(engine.clone());
    ev.evaluate(
        STARTING_FEN,
        SearchLimit::MoveTime(250),
        DEADLINE,
        Perspective::SideToMove,
        &CancelToken::new(),
    )
    .await
    .unwrap();
    assert_eq!(count(&engine.received(), "go movetime 250"), 1);
}

#[tokio::test(start_paused = true)]
async fn score_after_move_is_negated_for_the_mover() {
    let after = fen_after(ITALIAN_FEN, "f3e5");
    let engine = SyntheticEngine::new(|_| {
        SyntheticReply::lines(["info depth 12 score cp 120 nodes 4000 pv e5f7", "bestmove e5f7"])
    });
    let mut ev = evaluator(engine);
    let outcome = ev
        .evaluate(&after, DEPTH, DEADLINE, Perspective::PreviousMover, &CancelToken::new())
        .await
        .unwrap();
    assert_eq!(outcome, SearchOutcome::Score(-1.2));
}

#[tokio::test(start_paused = true)]
async fn mate_scores_saturate() {
    let engine = SyntheticEngine::new(|_| SyntheticReply::mate(-3, "h7h6"));
    let mut ev = evaluator(engine);
    let cancel = CancelToken::new();

    let outcome =
        ev.evaluate(STARTING_FEN, DEPTH, DEADLINE, Perspective::SideToMove, &cancel).await.unwrap();
    assert_eq!(outcome, SearchOutcome::MateScore(MateSign::Losing));
    assert_eq!(outcome.value(), Some(-MATE_SCORE));

    let outcome = ev
        .evaluate(STARTING_FEN, DEPTH, DEADLINE, Perspective::PreviousMover, &cancel)
        .await
        .unwrap();
    assert_eq!(outcome.value(), Some(MATE_SCORE));
}

#[tokio::test(start_paused = true)]
async fn bestmove_without_score_is_no_score() {
    let engine = SyntheticEngine::new(|_| SyntheticReply::bestmove_only("(none)"));
    let mut ev = evaluator(engine);
    let cancel = CancelToken::new();
    let outcome =
        ev.evaluate(STARTING_FEN, DEPTH, DEADLINE, Perspective::SideToMove, &cancel).await.unwrap();
    assert_eq!(outcome, SearchOutcome::NoScore);
    assert_eq!(outcome.value(), Some(0.0));

    let best = ev.best_move(STARTING_FEN, DEPTH, DEADLINE, &cancel).await.unwrap();
    assert_eq!(best, None);
}

#[tokio::test(start_paused = true)]
async fn score_line_policy() {
    let reply = || {
        SyntheticReply::lines([
            "info depth 1 score cp 10 pv e2e4",
            "info depth 2 score cp 50 pv d2d4",
            "bestmove d2d4",
        ])
    };
    let cancel = CancelToken::new();

    let mut first = evaluator(SyntheticEngine::new(move |_| reply()));
    let outcome =
        first.evaluate(STARTING_FEN, DEPTH, DEADLINE, Perspective::SideToMove, &cancel).await;
    assert_eq!(outcome, Ok(SearchOutcome::Score(0.1)));

    let settings =
        EvaluatorSettings { score_line: ScoreLine::Last, ..EvaluatorSettings::default() };
    let engine = SyntheticEngine::new(move |_| reply());
    let mut last = evaluator_with(engine, ChannelSettings::default(), settings);
    let outcome =
        last.evaluate(STARTING_FEN, DEPTH, DEADLINE, Perspective::SideToMove, &cancel).await;
    assert_eq!(outcome, Ok(SearchOutcome::Score(0.5)));
}

#[tokio::test(start_paused = true)]
async fn silent_engine_times_out_at_the_deadline() {
    let engine = SyntheticEngine::new(|_| SyntheticReply::silent());
    let mut ev = evaluator(engine.clone());
    let deadline = Duration::from_millis(200);

    let started = Instant::now();
    let outcome = ev
        .evaluate(STARTING_FEN, DEPTH, deadline, Perspective::SideToMove, &CancelToken::new())
        .await
        .unwrap();
    let elapsed = started.elapsed();

    assert_eq!(outcome, SearchOutcome::TimedOut);
    assert!(elapsed >= deadline, "returned early: {elapsed:?}");
    assert!(elapsed < deadline + Duration::from_millis(50), "returned late: {elapsed:?}");
    // 既定では停止させない
    assert_eq!(count(&engine.received(), "stop"), 0);
    assert_eq!(ev.channel().owed_bestmoves(), 1);
}

#[tokio::test(start_paused = true)]
async fn score_seen_before_the_deadline_is_kept() {
    let engine = SyntheticEngine::new(|_| {
        SyntheticReply::lines(["info depth 1 score cp -40 pv e7e5"])
            .after(Duration::from_millis(50))
    });
    let mut ev = evaluator(engine);
    let outcome = ev
        .evaluate(
            STARTING_FEN,
            DEPTH,
            Duration::from_millis(200),
            Perspective::SideToMove,
            &CancelToken::new(),
        )
        .await
        .unwrap();
    assert_eq!(outcome, SearchOutcome::Score(-0.4));
}

#[tokio::test(start_paused = true)]
async fn timed_out_search_is_stopped_when_configured() {
    let engine = SyntheticEngine::new(|fen| {
        if fen == STARTING_FEN {
            SyntheticReply::silent()
        } else {
            SyntheticReply::score_cp(-15, "e7e5")
        }
    });
    let settings = EvaluatorSettings { stop_on_timeout: true, ..EvaluatorSettings::default() };
    let mut ev = evaluator_with(engine.clone(), ChannelSettings::default(), settings);
    let cancel = CancelToken::new();

    let outcome = ev
        .evaluate(
            STARTING_FEN,
            DEPTH,
            Duration::from_millis(100),
            Perspective::SideToMove,
            &cancel,
        )
        .await
        .unwrap();
    assert_eq!(outcome, SearchOutcome::TimedOut);

    // stop への bestmove 0000 を読み捨ててから次の探索に入る
    let after = fen_after(STARTING_FEN, "e2e4");
    let outcome =
        ev.evaluate(&after, DEPTH, DEADLINE, Perspective::SideToMove, &cancel).await.unwrap();
    assert_eq!(outcome, SearchOutcome::Score(-0.15));
    assert_eq!(ev.channel().owed_bestmoves(), 0);

    let received = engine.received();
    assert_eq!(count(&received, "stop"), 1);
    assert_eq!(count_prefix(&received, "go "), 2);
}

#[tokio::test(start_paused = true)]
async fn late_output_is_not_attributed_to_the_next_search() {
    let slow = fen_after(STARTING_FEN, "e2e4");
    let script_slow = slow.clone();
    let engine = SyntheticEngine::new(move |fen| {
        if fen == script_slow {
            SyntheticReply::score_cp(900, "a7a6").after(Duration::from_millis(300))
        } else {
            SyntheticReply::score_cp(25, "e7e5").after(Duration::from_millis(10))
        }
    });
    let mut ev = evaluator(engine);
    let cancel = CancelToken::new();
    let deadline = Duration::from_millis(200);

    let first =
        ev.evaluate(&slow, DEPTH, deadline, Perspective::SideToMove, &cancel).await.unwrap();
    assert_eq!(first, SearchOutcome::TimedOut);

    let other = fen_after(STARTING_FEN, "d2d4");
    let second =
        ev.evaluate(&other, DEPTH, deadline, Perspective::SideToMove, &cancel).await.unwrap();
    assert_eq!(second, SearchOutcome::Score(0.25));
}

#[tokio::test(start_paused = true)]
async fn owed_bestmove_past_the_deadline_reports_channel_busy() {
    let slow = fen_after(STARTING_FEN, "e2e4");
    let script_slow = slow.clone();
    let engine = SyntheticEngine::new(move |fen| {
        if fen == script_slow {
            SyntheticReply::score_cp(900, "a7a6").after(Duration::from_millis(450))
        } else {
            SyntheticReply::score_cp(25, "e7e5").after(Duration::from_millis(10))
        }
    });
    let mut ev = evaluator(engine.clone());
    let cancel = CancelToken::new();
    let deadline = Duration::from_millis(200);
    let other = fen_after(STARTING_FEN, "d2d4");

    // 1 回目: 200ms で締め切り、bestmove は 450ms に届く
    let first =
        ev.evaluate(&slow, DEPTH, deadline, Perspective::SideToMove, &cancel).await.unwrap();
    assert_eq!(first, SearchOutcome::TimedOut);

    // 2 回目: 前の bestmove を待つうちに締め切り (200-400ms)、go は送らない
    let second =
        ev.evaluate(&other, DEPTH, deadline, Perspective::SideToMove, &cancel).await.unwrap();
    assert_eq!(second, SearchOutcome::ChannelBusy);
    assert_eq!(count_prefix(&engine.received(), "go "), 1);

    // 3 回目: 450ms に bestmove が届いて解放される
    let third =
        ev.evaluate(&other, DEPTH, deadline, Perspective::SideToMove, &cancel).await.unwrap();
    assert_eq!(third, SearchOutcome::Score(0.25));
    assert_eq!(count_prefix(&engine.received(), "go "), 2);
}

#[tokio::test(start_paused = true)]
async fn engine_exit_mid_search_is_an_engine_error_then_unavailable() {
    let crash = fen_after(STARTING_FEN, "g2g4");
    let script_crash = crash.clone();
    let engine = SyntheticEngine::new(move |fen| {
        if fen == script_crash {
            SyntheticReply::exit()
        } else {
            SyntheticReply::score_cp(15, "e7e5")
        }
    });
    let mut ev = evaluator(engine);
    let cancel = CancelToken::new();

    let before =
        ev.evaluate(STARTING_FEN, DEPTH, DEADLINE, Perspective::SideToMove, &cancel).await;
    assert_eq!(before, Ok(SearchOutcome::Score(0.15)));

    let outcome =
        ev.evaluate(&crash, DEPTH, DEADLINE, Perspective::SideToMove, &cancel).await.unwrap();
    assert!(matches!(outcome, SearchOutcome::EngineError(_)), "{outcome:?}");
    assert!(matches!(ev.channel().state(), SessionState::Unavailable(_)));

    let err = ev
        .evaluate(STARTING_FEN, DEPTH, DEADLINE, Perspective::SideToMove, &cancel)
        .await
        .unwrap_err();
    assert!(matches!(err, EvalError::EngineUnavailable(_)), "{err:?}");
}

#[tokio::test(start_paused = true)]
async fn cancellation_sends_stop_and_reports_cancelled() {
    let engine = SyntheticEngine::new(|_| SyntheticReply::silent());
    let mut ev = evaluator(engine.clone());
    let cancel = CancelToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(30)).await;
            cancel.cancel();
        });
    }

    let outcome =
        ev.evaluate(STARTING_FEN, DEPTH, DEADLINE, Perspective::SideToMove, &cancel).await.unwrap();
    assert_eq!(outcome, SearchOutcome::Cancelled);

    tokio::time::sleep(Duration::from_millis(1)).await;
    assert_eq!(count(&engine.received(), "stop"), 1);
}

#[tokio::test(start_paused = true)]
async fn observer_sees_the_raw_line_stream() {
    let engine = SyntheticEngine::new(|_| SyntheticReply::score_cp(12, "g1f3"));
    let mut ev = evaluator(engine);
    let mut lines = ev.channel_mut().start().lines().unwrap();

    ev.evaluate(STARTING_FEN, DEPTH, DEADLINE, Perspective::SideToMove, &CancelToken::new())
        .await
        .unwrap();

    let mut seen = Vec::new();
    while let Ok(line) = lines.try_recv() {
        seen.push(line);
    }
    assert!(seen.contains(&"uciok".to_string()));
    assert!(seen.contains(&"readyok".to_string()));
    assert_eq!(seen.last().map(String::as_str), Some("bestmove g1f3"));
}
