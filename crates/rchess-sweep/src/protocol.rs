//! UCI の送受信行。
//!
//! 送信側は [`UciCommand`] の `Display` で 1 行に整形し、受信側は
//! [`parse_line`] で相関に必要な 4 種類 (score / bestmove / uciok / readyok)
//! とオプション名だけを取り出す。それ以外の行はすべて [`EngineLine::Ignored`]。

use std::fmt;

use serde::{Deserialize, Serialize};

/// `go` の探索制限。
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SearchLimit {
    Depth(u32),
    MoveTime(u64),
}

impl fmt::Display for SearchLimit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SearchLimit::Depth(d) => write!(f, "depth {d}"),
            SearchLimit::MoveTime(ms) => write!(f, "movetime {ms}"),
        }
    }
}

/// エンジンへ送るコマンド。
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum UciCommand {
    Uci,
    IsReady,
    UciNewGame,
    SetOption { name: String, value: String },
    PositionFen(String),
    Go(SearchLimit),
    Stop,
    Quit,
}

impl fmt::Display for UciCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UciCommand::Uci => f.write_str("uci"),
            UciCommand::IsReady => f.write_str("isready"),
            UciCommand::UciNewGame => f.write_str("ucinewgame"),
            UciCommand::SetOption { name, value } => {
                write!(f, "setoption name {name} value {value}")
            }
            UciCommand::PositionFen(fen) => write!(f, "position fen {fen}"),
            UciCommand::Go(limit) => write!(f, "go {limit}"),
            UciCommand::Stop => f.write_str("stop"),
            UciCommand::Quit => f.write_str("quit"),
        }
    }
}

/// `info ... score` の生の値 (探索局面の手番側から見た値)。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RawScore {
    Cp(i32),
    Mate(i32),
}

/// 受信行の分類結果。
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum EngineLine {
    Score(RawScore),
    BestMove { mv: String, ponder: Option<String> },
    UciOk,
    ReadyOk,
    OptionName(String),
    Ignored,
}

/// 受信行を分類する。解釈できない行はエラーにせず `Ignored` にする。
pub fn parse_line(line: &str) -> EngineLine {
    let line = line.trim();
    if line == "uciok" {
        return EngineLine::UciOk;
    }
    if line == "readyok" {
        return EngineLine::ReadyOk;
    }
    if let Some(rest) = line.strip_prefix("bestmove") {
        let mut parts = rest.split_whitespace();
        let Some(mv) = parts.next() else {
            return EngineLine::Ignored;
        };
        let ponder = match (parts.next(), parts.next()) {
            (Some("ponder"), Some(p)) => Some(p.to_string()),
            _ => None,
        };
        return EngineLine::BestMove { mv: mv.to_string(), ponder };
    }
    if let Some(rest) = line.strip_prefix("option ") {
        return parse_option_name(rest).map_or(EngineLine::Ignored, EngineLine::OptionName);
    }
    if line.starts_with("info") {
        return parse_info_score(line).map_or(EngineLine::Ignored, EngineLine::Score);
    }
    EngineLine::Ignored
}

/// info 行から multipv=1 の score を取り出す。
fn parse_info_score(line: &str) -> Option<RawScore> {
    let tokens: Vec<&str> = line.split_whitespace().collect();
    if tokens.first().copied() != Some("info") {
        return None;
    }
    let mut score = None;
    let mut i = 1;
    while i < tokens.len() {
        match tokens[i] {
            "multipv" => {
                if tokens.get(i + 1).and_then(|t| t.parse::<u32>().ok()).unwrap_or(1) != 1 {
                    return None;
                }
                i += 1;
            }
            "score" => {
                if i + 2 < tokens.len() {
                    let value = tokens[i + 2].parse::<i32>().ok();
                    score = match (tokens[i + 1], value) {
                        ("cp", Some(v)) => Some(RawScore::Cp(v)),
                        ("mate", Some(v)) => Some(RawScore::Mate(v)),
                        _ => None,
                    };
                    i += 2;
                }
            }
            // pv 以降はすべて指し手なので読む必要がない
            "pv" | "string" => break,
            _ => {}
        }
        i += 1;
    }
    score
}

/// `option name <NAME...> type ...` からオプション名を取り出す。
pub fn parse_option_name(line: &str) -> Option<String> {
    let mut tokens = line.split_whitespace().peekable();
    while let Some(tok) = tokens.next() {
        if tok == "name" {
            let mut parts = Vec::new();
            while let Some(next) = tokens.next_if(|t| *t != "type") {
                parts.push(next);
            }
            if !parts.is_empty() {
                return Some(parts.join(" "));
            }
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn commands_format_as_single_lines() {
        assert_eq!(UciCommand::Uci.to_string(), "uci");
        assert_eq!(UciCommand::UciNewGame.to_string(), "ucinewgame");
        assert_eq!(
            UciCommand::PositionFen("8/8/8/8/8/8/8/K6k w - - 0 1".into()).to_string(),
            "position fen 8/8/8/8/8/8/8/K6k w - - 0 1"
        );
        assert_eq!(UciCommand::Go(SearchLimit::Depth(12)).to_string(), "go depth 12");
        assert_eq!(UciCommand::Go(SearchLimit::MoveTime(500)).to_string(), "go movetime 500");
        assert_eq!(
            UciCommand::SetOption { name: "Hash".into(), value: "64".into() }.to_string(),
            "setoption name Hash value 64"
        );
    }

    #[test]
    fn info_lines_yield_scores() {
        assert_eq!(
            parse_line("info depth 10 seldepth 14 score cp 120 nodes 4567 pv e5f7 e8f7"),
            EngineLine::Score(RawScore::Cp(120))
        );
        assert_eq!(
            parse_line("info depth 20 score mate -3 pv a1a2"),
            EngineLine::Score(RawScore::Mate(-3))
        );
        assert_eq!(
            parse_line("info depth 9 score cp -35 lowerbound nodes 100"),
            EngineLine::Score(RawScore::Cp(-35))
        );
        // multipv 2 以降は相関対象外
        assert_eq!(parse_line("info multipv 2 depth 9 score cp 50"), EngineLine::Ignored);
        assert_eq!(
            parse_line("info multipv 1 depth 9 score cp 50"),
            EngineLine::Score(RawScore::Cp(50))
        );
    }

    #[test]
    fn malformed_and_noise_lines_are_ignored() {
        assert_eq!(parse_line("info depth 3 score cp abc"), EngineLine::Ignored);
        assert_eq!(parse_line("info string score cp 10"), EngineLine::Ignored);
        assert_eq!(parse_line("info depth 3 currmove e2e4"), EngineLine::Ignored);
        assert_eq!(parse_line("id name Stockfish 16"), EngineLine::Ignored);
        assert_eq!(parse_line("bestmove"), EngineLine::Ignored);
        assert_eq!(parse_line(""), EngineLine::Ignored);
    }

    #[test]
    fn bestmove_with_and_without_ponder() {
        assert_eq!(
            parse_line("bestmove e5f7 ponder e8f7"),
            EngineLine::BestMove { mv: "e5f7".into(), ponder: Some("e8f7".into()) }
        );
        assert_eq!(
            parse_line("bestmove (none)"),
            EngineLine::BestMove { mv: "(none)".into(), ponder: None }
        );
    }

    #[test]
    fn handshake_lines() {
        assert_eq!(parse_line("uciok"), EngineLine::UciOk);
        assert_eq!(parse_line("readyok"), EngineLine::ReadyOk);
        assert_eq!(
            parse_line("option name Clear Hash type button"),
            EngineLine::OptionName("Clear Hash".into())
        );
    }
}
