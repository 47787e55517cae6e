use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use clap::{Parser, ValueEnum};
use log::{info, warn};
use serde::Serialize;

use rchess_sweep::aggregate::{ScoreTier, best_entry, tier};
use rchess_sweep::{
    CancelToken, EngineChannel, EvaluationTable, MoveScore, MoveSweep, PositionEvaluator,
    STARTING_FEN, ScoreMode, SearchLimit, StandardRules, SweepConfig,
};

#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about = "Evaluate every legal move of a chess position with a UCI engine"
)]
struct Cli {
    /// UCI エンジンのパス (設定ファイルより優先)
    #[arg(long)]
    engine: Option<PathBuf>,

    /// TOML 設定ファイル
    #[arg(long)]
    config: Option<PathBuf>,

    /// 評価する局面 (FEN)。未指定時は初期局面
    #[arg(long, default_value = STARTING_FEN)]
    fen: String,

    /// 探索深さ
    #[arg(long)]
    depth: Option<u32>,

    /// 1 局面あたりの思考時間 (ms)。指定すると depth より優先
    #[arg(long)]
    movetime: Option<u64>,

    /// 1 局面あたりの締め切り (ms)
    #[arg(long)]
    deadline_ms: Option<u64>,

    #[arg(long, value_enum)]
    mode: Option<ModeArg>,

    /// JSON で出力する
    #[arg(long, default_value_t = false)]
    json: bool,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum ModeArg {
    Absolute,
    Differential,
}

impl From<ModeArg> for ScoreMode {
    fn from(mode: ModeArg) -> Self {
        match mode {
            ModeArg::Absolute => ScoreMode::Absolute,
            ModeArg::Differential => ScoreMode::Differential,
        }
    }
}

#[derive(Serialize)]
struct JsonReport<'a> {
    fen: &'a str,
    best: Option<&'a MoveScore>,
    table: &'a EvaluationTable,
}

fn resolve_config(cli: &Cli) -> Result<SweepConfig> {
    let mut config = match &cli.config {
        Some(path) => SweepConfig::load(path)
            .with_context(|| format!("failed to load config {}", path.display()))?,
        None => SweepConfig::default(),
    };
    if let Some(engine) = &cli.engine {
        config.engine.path = Some(engine.clone());
    }
    if let Some(depth) = cli.depth {
        config.search.depth = depth;
    }
    if cli.movetime.is_some() {
        config.search.movetime_ms = cli.movetime;
    }
    if let Some(ms) = cli.deadline_ms {
        config.search.deadline_ms = ms;
    }
    if let Some(mode) = cli.mode {
        config.search.score_mode = mode.into();
    }
    Ok(config)
}

fn print_table(table: &EvaluationTable) {
    if let Some(reason) = table.game_over {
        println!("game over: {reason:?}");
        return;
    }
    if let Some(baseline) = table.baseline {
        println!("baseline: {baseline:+.2}");
    }
    for entry in table.iter() {
        let mark = match tier(table, entry) {
            ScoreTier::GlobalBest => "**",
            ScoreTier::SquareBest => "*",
            ScoreTier::Other => "",
        };
        println!("{}{}  {:+10.2} {mark}", entry.origin, entry.destination, entry.score);
    }
    for skipped in &table.skipped {
        println!("{}  skipped ({:?})", skipped.mv, skipped.reason);
    }
    match table.engine_best {
        Some(mv) => println!("engine best: {mv}"),
        None => println!("engine best: -"),
    }
    if table.cancelled {
        println!("(cancelled; table is partial)");
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .target(env_logger::Target::Stderr)
        .init();

    let cli = Cli::parse();
    let config = resolve_config(&cli)?;
    if config.search.deadline_ms == 0 {
        bail!("--deadline-ms must be at least 1");
    }
    if let SearchLimit::Depth(0) = config.search_limit() {
        bail!("--depth must be at least 1");
    }
    let launcher = config.launcher().context("no engine given (use --engine or [engine].path)")?;

    let cancel = CancelToken::new();
    {
        let cancel = cancel.clone();
        let installed = ctrlc::set_handler(move || {
            eprintln!("\nCancelling sweep...");
            cancel.cancel();
        });
        if let Err(e) = installed {
            warn!("failed to install Ctrl-C handler: {e}");
        }
    }

    let channel = EngineChannel::new(launcher, config.channel_settings());
    let mut evaluator = PositionEvaluator::new(channel, config.evaluator_settings());
    let sweep = MoveSweep::new(StandardRules, config.sweep_settings());

    info!(
        "sweeping {} ({:?}, deadline {:?})",
        cli.fen,
        config.search_limit(),
        Duration::from_millis(config.search.deadline_ms)
    );
    let result = sweep.sweep_text(&mut evaluator, &cli.fen, &cancel).await;
    evaluator.shutdown();
    let table = result.context("sweep failed")?;

    if cli.json {
        let report = JsonReport { fen: &cli.fen, best: best_entry(&table), table: &table };
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print_table(&table);
    }
    Ok(())
}
