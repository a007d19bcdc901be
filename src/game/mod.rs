//! Match engine and the pieces it is built from

pub mod board;
pub mod clock;
pub mod engine;
pub mod r#match;
pub mod modes;
pub mod reporter;
pub mod state;

pub use board::{Board, Symbol};
pub use engine::{Dispatch, EngineSettings, MatchParams};
pub use modes::MatchTypeRegistry;
pub use r#match::{spawn_match, GameMatch, MatchCommand, MatchHandle, MatchRegistry, MatchSummary};
pub use reporter::OutcomeReporter;
pub use state::{GameMode, Player};

use bytes::Bytes;
use uuid::Uuid;

/// Raw match data received from a player, queued until the next tick
#[derive(Debug, Clone)]
pub struct MatchMessage {
    pub sender: Uuid,
    pub data: Bytes,
    pub received_at: u64,
}

/// Why a move was refused. Always recovered locally with a private rejection.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MoveError {
    #[error("Invalid action data: {0}")]
    MalformedMessage(String),

    #[error("Out of bounds move (row {row}, col {col})")]
    OutOfBounds { row: i64, col: i64 },

    #[error("Cell already occupied")]
    CellOccupied { cell: usize },

    #[error("Not your turn")]
    NotYourTurn,

    #[error("Not a player in this match")]
    NotInMatch,

    #[error("Match has ended")]
    MatchEnded,
}

impl MoveError {
    /// Stable machine readable code sent alongside the message
    pub fn code(&self) -> &'static str {
        match self {
            MoveError::MalformedMessage(_) => "malformed_message",
            MoveError::OutOfBounds { .. } => "out_of_bounds",
            MoveError::CellOccupied { .. } => "cell_occupied",
            MoveError::NotYourTurn => "not_your_turn",
            MoveError::NotInMatch => "not_in_match",
            MoveError::MatchEnded => "match_ended",
        }
    }
}

/// Match creation problems that are logged and recovered from with defaults
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MatchConfigError {
    #[error("unrecognized game mode {0:?}")]
    UnknownMode(String),

    #[error("unknown match type {0:?}")]
    UnknownMatchType(String),
}
