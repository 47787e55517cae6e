//! TOML 設定。
//!
//! ```toml
//! [engine]
//! path = "/usr/local/bin/stockfish"
//! args = []
//! handshake_timeout_ms = 10000
//!
//! [engine.options]
//! Threads = 1
//! Hash = 64
//!
//! [search]
//! depth = 12
//! # movetime_ms = 500      # 指定すると depth より優先
//! deadline_ms = 10000
//! score_mode = "differential"  # or "absolute"
//! score_line = "first"         # or "last"
//! stop_on_timeout = false
//! ```

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::channel::{
    ChannelSettings, DEFAULT_HANDSHAKE_TIMEOUT, DEFAULT_LINE_CAPACITY, ProcessLauncher,
};
use crate::evaluator::{DEFAULT_DEADLINE, EvaluatorSettings};
use crate::protocol::SearchLimit;
use crate::sweep::{DEFAULT_DEPTH, ScoreMode, SweepSettings};
use crate::tracker::ScoreLine;

#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Parse(#[from] toml::de::Error),

    #[error("engine path is not configured")]
    MissingEnginePath,
}

#[derive(Clone, Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SweepConfig {
    pub engine: EngineSection,
    pub search: SearchSection,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EngineSection {
    pub path: Option<PathBuf>,
    pub args: Vec<String>,
    /// `setoption` で送る USI/UCI オプション。値は文字列化して送る。
    pub options: BTreeMap<String, toml::Value>,
    pub handshake_timeout_ms: u64,
    pub line_capacity: usize,
}

impl Default for EngineSection {
    fn default() -> Self {
        Self {
            path: None,
            args: Vec::new(),
            options: BTreeMap::new(),
            handshake_timeout_ms: DEFAULT_HANDSHAKE_TIMEOUT.as_millis() as u64,
            line_capacity: DEFAULT_LINE_CAPACITY,
        }
    }
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SearchSection {
    pub depth: u32,
    pub movetime_ms: Option<u64>,
    pub best_move_depth: Option<u32>,
    pub deadline_ms: u64,
    pub score_mode: ScoreMode,
    pub score_line: ScoreLine,
    pub stop_on_timeout: bool,
}

impl Default for SearchSection {
    fn default() -> Self {
        Self {
            depth: DEFAULT_DEPTH,
            movetime_ms: None,
            best_move_depth: None,
            deadline_ms: DEFAULT_DEADLINE.as_millis() as u64,
            score_mode: ScoreMode::default(),
            score_line: ScoreLine::default(),
            stop_on_timeout: false,
        }
    }
}

fn option_value(value: &toml::Value) -> String {
    match value {
        toml::Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

impl SweepConfig {
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(text)?)
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)
            .map_err(|source| ConfigError::Io { path: path.to_path_buf(), source })?;
        Self::from_toml_str(&text)
    }

    pub fn launcher(&self) -> Result<ProcessLauncher, ConfigError> {
        let path = self.engine.path.clone().ok_or(ConfigError::MissingEnginePath)?;
        Ok(ProcessLauncher::new(path).with_args(self.engine.args.clone()))
    }

    pub fn channel_settings(&self) -> ChannelSettings {
        ChannelSettings {
            line_capacity: self.engine.line_capacity,
            handshake_timeout: Duration::from_millis(self.engine.handshake_timeout_ms),
            options: self
                .engine
                .options
                .iter()
                .map(|(name, value)| (name.clone(), option_value(value)))
                .collect(),
        }
    }

    pub fn evaluator_settings(&self) -> EvaluatorSettings {
        EvaluatorSettings {
            score_line: self.search.score_line,
            stop_on_timeout: self.search.stop_on_timeout,
        }
    }

    pub fn search_limit(&self) -> SearchLimit {
        match self.search.movetime_ms {
            Some(ms) => SearchLimit::MoveTime(ms),
            None => SearchLimit::Depth(self.search.depth),
        }
    }

    pub fn sweep_settings(&self) -> SweepSettings {
        SweepSettings {
            limit: self.search_limit(),
            best_move_limit: self.search.best_move_depth.map(SearchLimit::Depth),
            deadline: Duration::from_millis(self.search.deadline_ms),
            score_mode: self.search.score_mode,
        }
    }
}
