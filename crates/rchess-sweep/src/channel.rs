//! エンジン 1 本との入出力をカプセル化する (Engine Channel Adapter)。
//!
//! セッションは `Uninitialized → Handshaking → Ready ⇄ Searching → Terminated`
//! の順に遷移する。起動失敗は構築時ではなく、最初に探索しようとした呼び出し側へ
//! [`EvalError::EngineUnavailable`] として返す。
//!
//! 受信行は broadcast で配る。[`EngineChannel::lines`] は観測用の独立した購読者を
//! 返し、相関用の受信口は [`Listener`] として同時に 1 つだけ貸し出す。

use std::collections::HashSet;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use log::{debug, info, warn};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, BufWriter};
use tokio::process::{Child, Command};
use tokio::sync::broadcast::error::{RecvError, TryRecvError};
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::error::{EvalError, EvalResult};
use crate::protocol::{EngineLine, UciCommand, parse_line};

pub const DEFAULT_LINE_CAPACITY: usize = 4096;
pub const DEFAULT_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);
pub const ENGINE_QUIT_TIMEOUT: Duration = Duration::from_millis(300);

/// 起動済みエンジンへの配線一式。
pub struct EngineLink {
    commands: mpsc::UnboundedSender<String>,
    lines: broadcast::Receiver<String>,
    readers: Vec<JoinHandle<()>>,
    child: Option<Child>,
}

impl EngineLink {
    /// `lines` は最初の行が流れる前に subscribe したものを渡すこと。
    pub fn new(
        commands: mpsc::UnboundedSender<String>,
        lines: broadcast::Receiver<String>,
    ) -> Self {
        Self { commands, lines, readers: Vec::new(), child: None }
    }

    /// `stop()` で abort する読み取りタスク。
    pub fn with_reader(mut self, handle: JoinHandle<()>) -> Self {
        self.readers.push(handle);
        self
    }

    pub fn with_child(mut self, child: Child) -> Self {
        self.child = Some(child);
        self
    }
}

/// エンジンの起動方法。プロセス版と、テスト用のインプロセス版がある。
pub trait EngineLauncher: Send {
    /// tokio ランタイム上で呼ばれる。
    fn launch(&self, line_capacity: usize) -> EvalResult<EngineLink>;

    fn describe(&self) -> String;
}

/// 子プロセスとして UCI エンジンを起動する。
#[derive(Clone, Debug)]
pub struct ProcessLauncher {
    pub path: PathBuf,
    pub args: Vec<String>,
}

impl ProcessLauncher {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into(), args: Vec::new() }
    }

    pub fn with_args(mut self, args: Vec<String>) -> Self {
        self.args = args;
        self
    }
}

impl EngineLauncher for ProcessLauncher {
    fn launch(&self, line_capacity: usize) -> EvalResult<EngineLink> {
        let mut child = Command::new(&self.path)
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                EvalError::EngineUnavailable(format!(
                    "failed to spawn engine at {}: {e}",
                    self.path.display()
                ))
            })?;
        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| EvalError::EngineUnavailable("no stdin".to_string()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| EvalError::EngineUnavailable("no stdout".to_string()))?;

        let (command_tx, mut command_rx) = mpsc::unbounded_channel::<String>();
        let (line_tx, line_rx) = broadcast::channel::<String>(line_capacity.max(1));

        // 送信側が閉じるまで書き続ける (quit を書いてから終わる)
        tokio::spawn(async move {
            let mut stdin = BufWriter::new(stdin);
            while let Some(line) = command_rx.recv().await {
                let written = async {
                    stdin.write_all(line.as_bytes()).await?;
                    stdin.write_all(b"\n").await?;
                    stdin.flush().await
                }
                .await;
                if written.is_err() {
                    break;
                }
            }
        });
        let reader = tokio::spawn(async move {
            let mut lines = BufReader::new(stdout).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                // 購読者がいなくても読み捨てる
                let _ = line_tx.send(line);
            }
        });

        Ok(EngineLink::new(command_tx, line_rx).with_reader(reader).with_child(child))
    }

    fn describe(&self) -> String {
        self.path.display().to_string()
    }
}

/// セッション状態。
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SessionState {
    Uninitialized,
    Handshaking,
    Ready,
    Searching,
    Terminated,
    Unavailable(String),
}

/// チャネル設定。
#[derive(Clone, Debug)]
pub struct ChannelSettings {
    pub line_capacity: usize,
    pub handshake_timeout: Duration,
    /// 初期化後に `setoption` で送る (Name, Value)
    pub options: Vec<(String, String)>,
}

impl Default for ChannelSettings {
    fn default() -> Self {
        Self {
            line_capacity: DEFAULT_LINE_CAPACITY,
            handshake_timeout: DEFAULT_HANDSHAKE_TIMEOUT,
            options: Vec::new(),
        }
    }
}

/// 受信待ちの結果。
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LineEvent {
    Line(String),
    Closed,
}

/// エンジン 1 本のセッション。下位のチャネルに触れるのはこの型だけ。
pub struct EngineChannel {
    launcher: Box<dyn EngineLauncher>,
    settings: ChannelSettings,
    state: SessionState,
    link: Option<EngineLink>,
    advertised: HashSet<String>,
    owed_bestmoves: u32,
}

impl EngineChannel {
    /// 起動はしない。失敗もしない。
    pub fn new(launcher: impl EngineLauncher + 'static, settings: ChannelSettings) -> Self {
        Self {
            launcher: Box::new(launcher),
            settings,
            state: SessionState::Uninitialized,
            link: None,
            advertised: HashSet::new(),
            owed_bestmoves: 0,
        }
    }

    /// エンジンを起動して `uci` を 1 回だけ送る。2 回目以降は何もしない。
    pub fn start(&mut self) -> &mut Self {
        if self.state != SessionState::Uninitialized {
            return self;
        }
        match self.launcher.launch(self.settings.line_capacity) {
            Ok(link) => {
                info!("engine started: {}", self.launcher.describe());
                self.link = Some(link);
                self.state = SessionState::Handshaking;
                if let Err(e) = self.write(&UciCommand::Uci) {
                    warn!("engine handshake could not be sent: {e}");
                }
            }
            Err(e) => {
                warn!("engine {} failed to start: {e}", self.launcher.describe());
                self.state = SessionState::Unavailable(e.to_string());
            }
        }
        self
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    /// 前回の探索から、まだ届いていない `bestmove` の数。
    pub fn owed_bestmoves(&self) -> u32 {
        self.owed_bestmoves
    }

    fn availability(&self) -> EvalResult<()> {
        match &self.state {
            SessionState::Uninitialized => {
                Err(EvalError::EngineUnavailable("engine not started".to_string()))
            }
            SessionState::Terminated => {
                Err(EvalError::EngineUnavailable("engine stopped".to_string()))
            }
            SessionState::Unavailable(reason) => Err(EvalError::EngineUnavailable(reason.clone())),
            _ => Ok(()),
        }
    }

    fn mark_unavailable(&mut self, reason: &str) {
        if !matches!(self.state, SessionState::Terminated | SessionState::Unavailable(_)) {
            warn!("engine unavailable: {reason}");
            self.state = SessionState::Unavailable(reason.to_string());
        }
    }

    /// コマンドを 1 行書く。背圧なし・応答は待たない。
    pub fn send(&mut self, command: &UciCommand) -> EvalResult<()> {
        self.availability()?;
        self.write(command)
    }

    fn write(&mut self, command: &UciCommand) -> EvalResult<()> {
        let Some(link) = self.link.as_ref() else {
            return Err(EvalError::EngineUnavailable("engine not started".to_string()));
        };
        debug!("> {command}");
        if link.commands.send(command.to_string()).is_err() {
            self.mark_unavailable("engine input closed");
            return self.availability();
        }
        Ok(())
    }

    /// 観測用の購読者。購読した時点以降の行だけが届く。
    pub fn lines(&self) -> Option<broadcast::Receiver<String>> {
        self.link.as_ref().map(|link| link.lines.resubscribe())
    }

    async fn recv(&mut self) -> LineEvent {
        let Some(link) = self.link.as_mut() else {
            return LineEvent::Closed;
        };
        loop {
            match link.lines.recv().await {
                Ok(line) => {
                    debug!("< {line}");
                    return LineEvent::Line(line);
                }
                Err(RecvError::Lagged(n)) => warn!("engine output lagged, {n} lines dropped"),
                Err(RecvError::Closed) => {
                    self.mark_unavailable("engine output closed");
                    return LineEvent::Closed;
                }
            }
        }
    }

    fn try_recv(&mut self) -> Option<LineEvent> {
        let link = self.link.as_mut()?;
        loop {
            match link.lines.try_recv() {
                Ok(line) => {
                    debug!("< {line}");
                    return Some(LineEvent::Line(line));
                }
                Err(TryRecvError::Empty) => return None,
                Err(TryRecvError::Lagged(n)) => warn!("engine output lagged, {n} lines dropped"),
                Err(TryRecvError::Closed) => {
                    self.mark_unavailable("engine output closed");
                    return Some(LineEvent::Closed);
                }
            }
        }
    }

    async fn recv_until(&mut self, deadline: Instant) -> Option<LineEvent> {
        tokio::time::timeout_at(deadline, self.recv()).await.ok()
    }

    /// ハンドシェイクを完了させる。`uciok` を待ち、設定済みオプションを送り、
    /// `isready` / `readyok` で同期する。
    pub async fn ensure_ready(&mut self) -> EvalResult<()> {
        match self.state {
            SessionState::Ready => return Ok(()),
            SessionState::Handshaking => {}
            _ => return self.availability(),
        }

        let deadline = Instant::now() + self.settings.handshake_timeout;
        loop {
            match self.recv_until(deadline).await {
                Some(LineEvent::Line(line)) => match parse_line(&line) {
                    EngineLine::OptionName(name) => {
                        self.advertised.insert(name);
                    }
                    EngineLine::UciOk => break,
                    _ => {}
                },
                Some(LineEvent::Closed) => {
                    self.mark_unavailable("engine exited during handshake");
                    return self.availability();
                }
                None => {
                    self.mark_unavailable("timed out waiting for uciok");
                    return self.availability();
                }
            }
        }

        for (name, value) in self.settings.options.clone() {
            if self.advertised.is_empty() || self.advertised.contains(&name) {
                self.write(&UciCommand::SetOption { name, value })?;
            } else {
                warn!("engine does not advertise option {name:?}; skipped");
            }
        }
        self.write(&UciCommand::IsReady)?;
        loop {
            match self.recv_until(deadline).await {
                Some(LineEvent::Line(line)) => {
                    if parse_line(&line) == EngineLine::ReadyOk {
                        break;
                    }
                }
                Some(LineEvent::Closed) => return self.availability(),
                None => {
                    self.mark_unavailable("timed out waiting for readyok");
                    return self.availability();
                }
            }
        }
        self.state = SessionState::Ready;
        Ok(())
    }

    /// 相関用の受信口を借りる。探索中は `Searching` になり、返却で `Ready` に戻る。
    pub fn listen(&mut self) -> EvalResult<Listener<'_>> {
        self.availability()?;
        match self.state {
            SessionState::Ready => {}
            SessionState::Searching => {
                return Err(EvalError::EngineUnavailable("search already in flight".to_string()));
            }
            _ => return Err(EvalError::EngineUnavailable("handshake not completed".to_string())),
        }
        self.state = SessionState::Searching;
        Ok(Listener { channel: self })
    }

    /// エンジンを解放する。何度呼んでも、`start()` 前に呼んでもよい。
    pub fn stop(&mut self) {
        if let Some(mut link) = self.link.take() {
            let _ = link.commands.send(UciCommand::Quit.to_string());
            for reader in link.readers.drain(..) {
                reader.abort();
            }
            if let Some(child) = link.child.take() {
                reap(child);
            }
            info!("engine stopped: {}", self.launcher.describe());
        }
        self.state = SessionState::Terminated;
    }
}

impl Drop for EngineChannel {
    fn drop(&mut self) {
        self.stop();
    }
}

/// quit 後しばらく待ち、終了しなければ kill する。
fn reap(mut child: Child) {
    match tokio::runtime::Handle::try_current() {
        Ok(handle) => {
            handle.spawn(async move {
                if tokio::time::timeout(ENGINE_QUIT_TIMEOUT, child.wait()).await.is_err() {
                    let _ = child.kill().await;
                }
            });
        }
        Err(_) => {
            let _ = child.start_kill();
        }
    }
}

/// 1 リクエストの間だけ貸し出される受信口。どの終了経路でも drop で返却される。
pub struct Listener<'a> {
    channel: &'a mut EngineChannel,
}

impl Listener<'_> {
    pub async fn recv(&mut self) -> LineEvent {
        self.channel.recv().await
    }

    /// 溜まっている行を 1 つ取り出す。空なら `None`。
    pub fn try_recv(&mut self) -> Option<LineEvent> {
        self.channel.try_recv()
    }

    pub fn send(&mut self, command: &UciCommand) -> EvalResult<()> {
        self.channel.send(command)
    }

    pub fn owed_bestmoves(&self) -> u32 {
        self.channel.owed_bestmoves
    }

    /// この探索の `bestmove` を見ずに手放す。
    pub fn owe_bestmove(&mut self) {
        self.channel.owed_bestmoves += 1;
    }

    /// 前の探索の `bestmove` を読み捨てた。
    pub fn settle_bestmove(&mut self) {
        self.channel.owed_bestmoves = self.channel.owed_bestmoves.saturating_sub(1);
    }
}

impl Drop for Listener<'_> {
    fn drop(&mut self) {
        if self.channel.state == SessionState::Searching {
            self.channel.state = SessionState::Ready;
        }
    }
}
