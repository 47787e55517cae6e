//! Board coordinates and moves as they travel between the rules collaborator,
//! the engine wire and the evaluation table.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// One of the 64 board squares (file a–h, rank 1–8).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Square(u8);

impl Square {
    /// `file` / `rank` are 0-based (`a1` = (0, 0)).
    pub fn new(file: u8, rank: u8) -> Option<Self> {
        if file < 8 && rank < 8 { Some(Self(rank * 8 + file)) } else { None }
    }

    /// Index in a1 = 0, b1 = 1, ..., h8 = 63 order.
    pub fn from_index(index: u32) -> Option<Self> {
        if index < 64 { Some(Self(index as u8)) } else { None }
    }

    pub fn index(self) -> u32 {
        u32::from(self.0)
    }

    pub fn file(self) -> u8 {
        self.0 % 8
    }

    pub fn rank(self) -> u8 {
        self.0 / 8
    }
}

impl fmt::Display for Square {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", (b'a' + self.file()) as char, (b'1' + self.rank()) as char)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid square: {0:?}")]
pub struct ParseSquareError(pub String);

impl FromStr for Square {
    type Err = ParseSquareError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bytes = s.as_bytes();
        if bytes.len() != 2 {
            return Err(ParseSquareError(s.to_string()));
        }
        let file = bytes[0].wrapping_sub(b'a');
        let rank = bytes[1].wrapping_sub(b'1');
        Square::new(file, rank).ok_or_else(|| ParseSquareError(s.to_string()))
    }
}

impl Serialize for Square {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Square {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Promotion target.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PieceKind {
    Queen,
    Rook,
    Bishop,
    Knight,
}

impl PieceKind {
    pub fn uci_char(self) -> char {
        match self {
            PieceKind::Queen => 'q',
            PieceKind::Rook => 'r',
            PieceKind::Bishop => 'b',
            PieceKind::Knight => 'n',
        }
    }

    pub fn from_uci_char(c: char) -> Option<Self> {
        match c.to_ascii_lowercase() {
            'q' => Some(PieceKind::Queen),
            'r' => Some(PieceKind::Rook),
            'b' => Some(PieceKind::Bishop),
            'n' => Some(PieceKind::Knight),
            _ => None,
        }
    }
}

/// A move in from/to form. `promotion: None` on a promoting move means queen.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Move {
    pub from: Square,
    pub to: Square,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub promotion: Option<PieceKind>,
}

impl Move {
    pub fn new(from: Square, to: Square) -> Self {
        Self { from, to, promotion: None }
    }

    pub fn with_promotion(mut self, promotion: PieceKind) -> Self {
        self.promotion = Some(promotion);
        self
    }

    /// Parse the wire form (`e2e4`, `e7e8q`).
    pub fn parse_uci(s: &str) -> Option<Self> {
        if !s.is_ascii() || !(4..=5).contains(&s.len()) {
            return None;
        }
        let from = s[0..2].parse().ok()?;
        let to = s[2..4].parse().ok()?;
        let promotion = match s[4..].chars().next() {
            Some(c) => Some(PieceKind::from_uci_char(c)?),
            None => None,
        };
        Some(Self { from, to, promotion })
    }

    /// Only the first two coordinate pairs of an engine move, which is all the
    /// correlation with the legal-move list needs.
    pub fn squares_of_uci(s: &str) -> Option<(Square, Square)> {
        if !s.is_ascii() || s.len() < 4 {
            return None;
        }
        Some((s[0..2].parse().ok()?, s[2..4].parse().ok()?))
    }
}

impl fmt::Display for Move {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.from, self.to)?;
        if let Some(p) = self.promotion {
            write!(f, "{}", p.uci_char())?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn square_roundtrips_through_text() {
        let sq: Square = "e2".parse().unwrap();
        assert_eq!(sq.file(), 4);
        assert_eq!(sq.rank(), 1);
        assert_eq!(sq.index(), 12);
        assert_eq!(sq.to_string(), "e2");
        assert!("i1".parse::<Square>().is_err());
        assert!("a9".parse::<Square>().is_err());
        assert!("a".parse::<Square>().is_err());
    }

    #[test]
    fn move_parses_wire_encoding() {
        let mv = Move::parse_uci("e7e8q").unwrap();
        assert_eq!(mv.from.to_string(), "e7");
        assert_eq!(mv.to.to_string(), "e8");
        assert_eq!(mv.promotion, Some(PieceKind::Queen));
        assert_eq!(mv.to_string(), "e7e8q");

        assert_eq!(Move::parse_uci("g1f3").unwrap().promotion, None);
        assert!(Move::parse_uci("(none)").is_none());
        assert!(Move::parse_uci("e7e8x").is_none());
    }

    #[test]
    fn squares_of_uci_ignores_promotion_suffix() {
        let (from, to) = Move::squares_of_uci("b7b8n").unwrap();
        assert_eq!((from.to_string(), to.to_string()), ("b7".into(), "b8".into()));
        assert!(Move::squares_of_uci("0000").is_none());
    }
}
