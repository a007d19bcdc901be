//! Match state owned by a single engine

use std::collections::HashMap;
use std::time::Duration;

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::board::{Board, Symbol};
use super::clock::TurnClock;

/// Game mode, fixed for the lifetime of a match
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GameMode {
    /// No turn limit, 1 point per win
    #[default]
    #[serde(alias = "classic")]
    Standard,
    /// 30 second turns, 2 points per win
    Timed,
}

impl GameMode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Standard => "standard",
            Self::Timed => "timed",
        }
    }

    /// Parse a mode name. `classic` is accepted as an alias for standard.
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "standard" | "classic" => Some(Self::Standard),
            "timed" => Some(Self::Timed),
            _ => None,
        }
    }

    /// Match label advertised to the host
    pub fn label(self) -> String {
        format!("lobby_{}", self.as_str())
    }

    pub fn is_timed(self) -> bool {
        self == Self::Timed
    }
}

impl std::fmt::Display for GameMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Coarse match lifecycle. Only ever moves forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchPhase {
    /// Players may be present, no move accepted yet
    Lobby,
    /// At least one move accepted
    InProgress,
    /// Outcome decided
    Ended,
}

/// Player identity as handed to the engine by the transport
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Player {
    pub user_id: Uuid,
    pub display_name: String,
}

impl Player {
    pub fn new(user_id: Uuid, display_name: impl Into<String>) -> Self {
        Self {
            user_id,
            display_name: display_name.into(),
        }
    }
}

/// Why a match ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OutcomeCause {
    Line,
    Draw,
    Timeout,
}

/// Final result of an ended match
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Outcome {
    /// `None` for a draw
    pub winner_id: Option<Uuid>,
    pub symbol: Option<Symbol>,
    pub cause: OutcomeCause,
}

/// Authoritative state of one match
#[derive(Debug, Clone)]
pub struct MatchState {
    pub id: Uuid,
    pub mode: GameMode,
    pub phase: MatchPhase,
    pub tick: u64,
    pub roster: Vec<Player>,
    pub symbols: HashMap<Uuid, Symbol>,
    pub board: Board,
    pub turn: Option<Uuid>,
    pub clock: TurnClock,
    pub outcome: Option<Outcome>,
    /// Raw payloads seen this tick, cleared at the end of every tick
    pub pending_actions: HashMap<Uuid, Bytes>,
}

impl MatchState {
    pub fn new(id: Uuid, mode: GameMode, turn_limit: Duration) -> Self {
        Self {
            id,
            mode,
            phase: MatchPhase::Lobby,
            tick: 0,
            roster: Vec::new(),
            symbols: HashMap::new(),
            board: Board::new(),
            turn: None,
            clock: TurnClock::new(turn_limit),
            outcome: None,
            pending_actions: HashMap::new(),
        }
    }

    pub fn is_present(&self, user_id: &Uuid) -> bool {
        self.roster.iter().any(|p| &p.user_id == user_id)
    }

    pub fn player(&self, user_id: &Uuid) -> Option<&Player> {
        self.roster.iter().find(|p| &p.user_id == user_id)
    }

    pub fn symbol_of(&self, user_id: &Uuid) -> Option<Symbol> {
        self.symbols.get(user_id).copied()
    }

    /// Ids of everyone currently in the match, in join order
    pub fn roster_ids(&self) -> Vec<Uuid> {
        self.roster.iter().map(|p| p.user_id).collect()
    }

    /// First present player other than `user_id`
    pub fn opponent_of(&self, user_id: &Uuid) -> Option<&Player> {
        self.roster.iter().find(|p| &p.user_id != user_id)
    }

    pub fn is_ended(&self) -> bool {
        self.phase == MatchPhase::Ended
    }

    /// Time left on the current turn in whole seconds; `None` outside timed mode
    pub fn time_remaining(&self, now_ms: u64) -> Option<u64> {
        self.mode
            .is_timed()
            .then(|| self.clock.remaining_secs(now_ms))
    }

    /// Turn limit in seconds; `None` outside timed mode
    pub fn turn_time_limit(&self) -> Option<u64> {
        self.mode.is_timed().then(|| self.clock.limit().as_secs())
    }
}
