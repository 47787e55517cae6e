//! インプロセスで動く台本付き UCI エンジン。
//!
//! `go` を受け取るたびに、直前の `position fen` の FEN を台本関数に渡し、
//! 返ってきた行を (必要なら遅延させて) 流す。テストとオフラインのデモで使う。

use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::{broadcast, mpsc};
use tokio::time::Instant;

use crate::channel::{EngineLauncher, EngineLink};
use crate::error::EvalResult;

/// 1 回の `go` に対する応答。
#[derive(Clone, Debug, Default)]
pub struct SyntheticReply {
    lines: Vec<String>,
    delay: Duration,
    silent: bool,
    exits: bool,
}

impl SyntheticReply {
    pub fn lines<I, S>(lines: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self { lines: lines.into_iter().map(Into::into).collect(), ..Self::default() }
    }

    pub fn score_cp(cp: i32, bestmove: &str) -> Self {
        Self::lines([
            format!("info depth 1 seldepth 1 score cp {cp} nodes 20 pv {bestmove}"),
            format!("bestmove {bestmove}"),
        ])
    }

    pub fn mate(moves: i32, bestmove: &str) -> Self {
        Self::lines([
            format!("info depth 1 score mate {moves} pv {bestmove}"),
            format!("bestmove {bestmove}"),
        ])
    }

    pub fn bestmove_only(bestmove: &str) -> Self {
        Self::lines([format!("bestmove {bestmove}")])
    }

    /// `stop` を受けるまで何も返さない。
    pub fn silent() -> Self {
        Self { silent: true, ..Self::default() }
    }

    /// 探索中にプロセスが落ちたように出力を閉じる。
    pub fn exit() -> Self {
        Self { exits: true, ..Self::default() }
    }

    pub fn after(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }
}

type Script = dyn Fn(&str) -> SyntheticReply + Send + Sync;

/// 台本付きエンジン。clone は受信ログを共有する。
#[derive(Clone)]
pub struct SyntheticEngine {
    script: Arc<Script>,
    received: Arc<Mutex<Vec<String>>>,
    answers_handshake: bool,
    options: Vec<String>,
}

impl SyntheticEngine {
    pub fn new(script: impl Fn(&str) -> SyntheticReply + Send + Sync + 'static) -> Self {
        Self {
            script: Arc::new(script),
            received: Arc::new(Mutex::new(Vec::new())),
            answers_handshake: true,
            options: Vec::new(),
        }
    }

    /// `uci` に応答しない (ハンドシェイク失敗の再現用)。
    pub fn mute_handshake(mut self) -> Self {
        self.answers_handshake = false;
        self
    }

    pub fn with_option(mut self, name: &str) -> Self {
        self.options.push(name.to_string());
        self
    }

    /// 受け取ったコマンド行 (受信順)。
    pub fn received(&self) -> Vec<String> {
        self.received.lock().map(|log| log.clone()).unwrap_or_default()
    }
}

impl EngineLauncher for SyntheticEngine {
    fn launch(&self, line_capacity: usize) -> EvalResult<EngineLink> {
        let (command_tx, command_rx) = mpsc::unbounded_channel::<String>();
        let (line_tx, line_rx) = broadcast::channel::<String>(line_capacity.max(1));
        tokio::spawn(run(self.clone(), command_rx, line_tx));
        Ok(EngineLink::new(command_tx, line_rx))
    }

    fn describe(&self) -> String {
        "synthetic".to_string()
    }
}

async fn run(
    engine: SyntheticEngine,
    mut commands: mpsc::UnboundedReceiver<String>,
    lines: broadcast::Sender<String>,
) {
    let emit = |line: String| {
        let _ = lines.send(line);
    };
    let mut fen = String::from("startpos");
    let mut pending: Option<(Instant, Vec<String>)> = None;
    let mut silent_search = false;

    loop {
        let wake = pending.as_ref().map(|(at, _)| *at);
        tokio::select! {
            command = commands.recv() => {
                let Some(command) = command else { break };
                if let Ok(mut log) = engine.received.lock() {
                    log.push(command.clone());
                }
                match command.split_whitespace().next().unwrap_or_default() {
                    "uci" => {
                        if engine.answers_handshake {
                            emit("id name Synthetic".to_string());
                            for name in &engine.options {
                                emit(format!(
                                    "option name {name} type spin default 1 min 1 max 1024"
                                ));
                            }
                            emit("uciok".to_string());
                        }
                    }
                    "isready" => emit("readyok".to_string()),
                    "position" => {
                        fen = command
                            .strip_prefix("position fen ")
                            .unwrap_or("startpos")
                            .to_string();
                    }
                    "go" => {
                        // 前の探索の出力が残っていれば先に出し切る
                        if let Some((_, previous)) = pending.take() {
                            previous.into_iter().for_each(emit);
                        }
                        let reply = (engine.script)(&fen);
                        if reply.exits {
                            break;
                        }
                        silent_search = reply.silent;
                        if !reply.silent {
                            pending = Some((Instant::now() + reply.delay, reply.lines));
                        }
                    }
                    "stop" => {
                        if let Some((_, previous)) = pending.take() {
                            previous.into_iter().for_each(emit);
                        } else if silent_search {
                            silent_search = false;
                            emit("bestmove 0000".to_string());
                        }
                    }
                    "quit" => break,
                    _ => {}
                }
            }
            _ = tokio::time::sleep_until(wake.unwrap_or_else(Instant::now)), if wake.is_some() => {
                if let Some((_, reply)) = pending.take() {
                    reply.into_iter().for_each(emit);
                }
            }
        }
    }
}
