use shakmaty::fen::Fen;
use shakmaty::uci::UciMove;
use shakmaty::{CastlingMode, Chess, EnPassantMode, Position, Role};

use super::{GameOverReason, GameStatus, Rules, RulesError};
use crate::types::{Move, PieceKind, Square};

pub const STARTING_FEN: &str = "rnbqkbnr/pppppppp/8/8/8/8/PPPPPPPP/RNBQKBNR w KQkq - 0 1";

/// Standard chess via `shakmaty`.
#[derive(Clone, Copy, Debug, Default)]
pub struct StandardRules;

fn to_square(sq: shakmaty::Square) -> Option<Square> {
    Square::from_index(sq as u32)
}

fn from_square(sq: Square) -> shakmaty::Square {
    shakmaty::Square::new(sq.index())
}

fn to_piece_kind(role: Role) -> Option<PieceKind> {
    match role {
        Role::Queen => Some(PieceKind::Queen),
        Role::Rook => Some(PieceKind::Rook),
        Role::Bishop => Some(PieceKind::Bishop),
        Role::Knight => Some(PieceKind::Knight),
        Role::Pawn | Role::King => None,
    }
}

fn from_piece_kind(kind: PieceKind) -> Role {
    match kind {
        PieceKind::Queen => Role::Queen,
        PieceKind::Rook => Role::Rook,
        PieceKind::Bishop => Role::Bishop,
        PieceKind::Knight => Role::Knight,
    }
}

fn to_shakmaty_move(position: &Chess, mv: &Move) -> Option<shakmaty::Move> {
    let uci = |promotion: Option<Role>| UciMove::Normal {
        from: from_square(mv.from),
        to: from_square(mv.to),
        promotion,
    };
    match uci(mv.promotion.map(from_piece_kind)).to_move(position) {
        Ok(m) => Some(m),
        // 成りの駒種が省略されていればクイーンとみなす
        Err(_) if mv.promotion.is_none() => uci(Some(Role::Queen)).to_move(position).ok(),
        Err(_) => None,
    }
}

impl Rules for StandardRules {
    type Position = Chess;

    fn parse_position(&self, text: &str) -> Result<Chess, RulesError> {
        let invalid =
            |reason: String| RulesError::InvalidPosition { text: text.to_string(), reason };
        let fen: Fen = text
            .trim()
            .parse()
            .map_err(|e: shakmaty::fen::ParseFenError| invalid(e.to_string()))?;
        fen.into_position(CastlingMode::Standard).map_err(|e| invalid(e.to_string()))
    }

    fn serialize_position(&self, position: &Chess) -> String {
        Fen(position.clone().into_setup(EnPassantMode::Legal)).to_string()
    }

    fn legal_moves(&self, position: &Chess) -> Vec<Move> {
        position
            .legal_moves()
            .iter()
            .filter_map(|m| match m.to_uci(CastlingMode::Standard) {
                UciMove::Normal { from, to, promotion } => Some(Move {
                    from: to_square(from)?,
                    to: to_square(to)?,
                    promotion: promotion.and_then(to_piece_kind),
                }),
                _ => None,
            })
            .collect()
    }

    fn apply_move(&self, position: &Chess, mv: &Move) -> Result<Chess, RulesError> {
        let m = to_shakmaty_move(position, mv).ok_or_else(|| RulesError::IllegalMove {
            mv: mv.to_string(),
            reason: "not legal in this position".to_string(),
        })?;
        let mut next = position.clone();
        next.play_unchecked(&m);
        Ok(next)
    }

    fn game_status(&self, position: &Chess) -> GameStatus {
        if position.is_checkmate() {
            GameStatus::Over(GameOverReason::Checkmate)
        } else if position.is_stalemate() {
            GameStatus::Over(GameOverReason::Stalemate)
        } else if position.is_insufficient_material() {
            GameStatus::Over(GameOverReason::InsufficientMaterial)
        } else if position.is_game_over() {
            GameStatus::Over(GameOverReason::Other)
        } else {
            GameStatus::Ongoing
        }
    }
}
