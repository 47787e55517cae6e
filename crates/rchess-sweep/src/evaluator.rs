//! 1 局面の評価 (`ucinewgame` / `position fen` / `go` の 1 往復)。

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::time::Instant;

use crate::cancel::CancelToken;
use crate::channel::EngineChannel;
use crate::error::EvalResult;
use crate::protocol::{RawScore, SearchLimit, UciCommand};
use crate::tracker::{RequestPolicy, ScoreLine, SearchReport, Termination, run_request};

/// 詰みスコアの飽和値 (ポーン単位)。詰み手数は下流で使わない。
pub const MATE_SCORE: f64 = 100_000.0;

/// 推奨される 1 局面あたりの締め切り。
pub const DEFAULT_DEADLINE: Duration = Duration::from_secs(10);

/// スコアを誰の視点で返すか。
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Perspective {
    /// 評価局面の手番側 (エンジンの生の向き)
    SideToMove,
    /// 評価局面の 1 手前に指した側 (符号を反転する)
    PreviousMover,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MateSign {
    Winning,
    Losing,
}

impl MateSign {
    fn flipped(self) -> Self {
        match self {
            MateSign::Winning => MateSign::Losing,
            MateSign::Losing => MateSign::Winning,
        }
    }
}

/// 1 回の評価の結果。
#[derive(Clone, Debug, PartialEq)]
pub enum SearchOutcome {
    /// ポーン単位
    Score(f64),
    MateScore(MateSign),
    /// `bestmove` だけが返った (即詰み・ステイルメイトなど)
    NoScore,
    TimedOut,
    /// 前の探索の `bestmove` が締め切りまでに届かず、`go` を送れなかった
    ChannelBusy,
    EngineError(String),
    Cancelled,
}

impl SearchOutcome {
    /// 表に載せる数値。`NoScore` は 0、失敗系は `None`。
    pub fn value(&self) -> Option<f64> {
        match self {
            SearchOutcome::Score(v) => Some(*v),
            SearchOutcome::MateScore(MateSign::Winning) => Some(MATE_SCORE),
            SearchOutcome::MateScore(MateSign::Losing) => Some(-MATE_SCORE),
            SearchOutcome::NoScore => Some(0.0),
            SearchOutcome::TimedOut
            | SearchOutcome::ChannelBusy
            | SearchOutcome::EngineError(_)
            | SearchOutcome::Cancelled => None,
        }
    }

    fn from_raw(raw: RawScore, perspective: Perspective) -> Self {
        let negate = perspective == Perspective::PreviousMover;
        match raw {
            // 整数のまま反転する (cp 0 が -0.0 にならないように)
            RawScore::Cp(cp) => {
                let cp = if negate { cp.saturating_neg() } else { cp };
                SearchOutcome::Score(f64::from(cp) / 100.0)
            }
            RawScore::Mate(n) => {
                let sign = if n > 0 { MateSign::Winning } else { MateSign::Losing };
                SearchOutcome::MateScore(if negate { sign.flipped() } else { sign })
            }
        }
    }

    fn from_report(report: &SearchReport, perspective: Perspective) -> Self {
        match (report.termination, report.score) {
            (Termination::Closed, _) => {
                SearchOutcome::EngineError("engine output closed".to_string())
            }
            (Termination::Cancelled, _) => SearchOutcome::Cancelled,
            (Termination::Busy, _) => SearchOutcome::ChannelBusy,
            (_, Some(raw)) => SearchOutcome::from_raw(raw, perspective),
            (Termination::BestMove, None) => SearchOutcome::NoScore,
            (Termination::Deadline, None) => SearchOutcome::TimedOut,
        }
    }
}

/// 生スコアをポーン単位に正規化する (手番側視点のまま)。
///
/// `mate 0` は手番側が詰まされている局面なので負の飽和値になる。
pub fn normalize_score(raw: RawScore) -> f64 {
    SearchOutcome::from_raw(raw, Perspective::SideToMove).value().unwrap_or_default()
}

/// 評価器の設定。
#[derive(Clone, Copy, Debug, Default)]
pub struct EvaluatorSettings {
    pub score_line: ScoreLine,
    pub stop_on_timeout: bool,
}

/// エンジンチャネルを占有して 1 局面ずつ評価する。
///
/// `&mut self` を取るので、前の 3 コマンドが解決する前に次を送ることはない。
pub struct PositionEvaluator {
    channel: EngineChannel,
    settings: EvaluatorSettings,
}

impl PositionEvaluator {
    /// `channel` は未起動でもよい (最初の評価で起動する)。
    pub fn new(channel: EngineChannel, settings: EvaluatorSettings) -> Self {
        Self { channel, settings }
    }

    pub fn channel(&self) -> &EngineChannel {
        &self.channel
    }

    pub fn channel_mut(&mut self) -> &mut EngineChannel {
        &mut self.channel
    }

    /// エンジンを解放する。
    pub fn shutdown(&mut self) {
        self.channel.stop();
    }

    async fn search(
        &mut self,
        fen: &str,
        limit: SearchLimit,
        deadline: Duration,
        cancel: &CancelToken,
    ) -> EvalResult<SearchReport> {
        self.channel.start();
        self.channel.ensure_ready().await?;

        let deadline = Instant::now() + deadline;
        let commands = [
            UciCommand::UciNewGame,
            UciCommand::PositionFen(fen.to_string()),
            UciCommand::Go(limit),
        ];
        let policy = RequestPolicy {
            score_line: self.settings.score_line,
            stop_on_timeout: self.settings.stop_on_timeout,
        };
        let mut listener = self.channel.listen()?;
        run_request(&mut listener, &commands, deadline, policy, cancel).await
    }

    /// 局面を評価する。`EngineUnavailable` 以外の失敗は結果の variant で返す。
    pub async fn evaluate(
        &mut self,
        fen: &str,
        limit: SearchLimit,
        deadline: Duration,
        perspective: Perspective,
        cancel: &CancelToken,
    ) -> EvalResult<SearchOutcome> {
        let report = self.search(fen, limit, deadline, cancel).await?;
        Ok(SearchOutcome::from_report(&report, perspective))
    }

    /// エンジンが選ぶ最善手 (`bestmove` の指し手文字列)。
    pub async fn best_move(
        &mut self,
        fen: &str,
        limit: SearchLimit,
        deadline: Duration,
        cancel: &CancelToken,
    ) -> EvalResult<Option<String>> {
        let report = self.search(fen, limit, deadline, cancel).await?;
        Ok(report.bestmove.filter(|mv| mv != "(none)" && mv != "0000"))
    }
}
