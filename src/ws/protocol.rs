//! WebSocket protocol message definitions
//! These are the wire types for client-server communication

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::game::{Board, GameMode, Symbol};

/// Messages sent from client to server
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMsg {
    /// Enter the matchmaking queue for a mode
    JoinQueue {
        #[serde(default)]
        mode: GameMode,
    },

    /// Leave the matchmaking queue
    LeaveQueue,

    /// Move request, forwarded untouched to the match which decodes `{row, col}`
    Move {
        #[serde(flatten)]
        payload: serde_json::Map<String, serde_json::Value>,
    },

    /// Ping for latency measurement
    Ping {
        /// Client timestamp
        t: u64,
    },

    /// Leave current match
    LeaveMatch,
}

/// Messages sent from server to client
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMsg {
    /// Welcome message after connection
    Welcome { user_id: Uuid, server_time: u64 },

    /// Queued for a match
    Queued { mode: GameMode, queue_size: usize },

    /// Matchmaking placed the player in a match
    MatchFound {
        match_id: Uuid,
        label: String,
        mode: GameMode,
    },

    /// Private welcome to a player entering a match
    MatchWelcome {
        message: String,
        player_count: usize,
        mode: GameMode,
        #[serde(skip_serializing_if = "Option::is_none")]
        turn_time_limit: Option<u64>,
    },

    /// A player joined the match
    PlayerJoined {
        user_id: Uuid,
        username: String,
        total_players: usize,
        current_turn: Option<Uuid>,
        board: Board,
        symbol: Option<Symbol>,
        mode: GameMode,
        #[serde(skip_serializing_if = "Option::is_none")]
        turn_time_limit: Option<u64>,
        #[serde(skip_serializing_if = "Option::is_none")]
        time_remaining: Option<u64>,
    },

    /// A player left the match
    PlayerLeft { user_id: Uuid, message: String },

    /// Board after an accepted move
    BoardUpdate {
        board: Board,
        current_turn: Option<Uuid>,
        mode: GameMode,
        #[serde(skip_serializing_if = "Option::is_none")]
        time_remaining: Option<u64>,
    },

    /// Three in a row
    GameWon {
        message: String,
        winner_id: Uuid,
        board: Board,
        mode: GameMode,
    },

    /// Move refused; sent only to the offending player
    MoveRejected { code: String, error: String },

    /// Board full, nobody won
    GameDraw {
        message: String,
        board: Board,
        mode: GameMode,
    },

    /// Turn holder ran out of time
    GameTimeout {
        message: String,
        winner_id: Uuid,
        board: Board,
        mode: GameMode,
        timeout: bool,
    },

    /// Periodic clock update in timed matches
    TimeRemaining {
        time_remaining: u64,
        current_turn: Option<Uuid>,
    },

    /// Session level error
    Error { code: String, message: String },

    /// Pong response
    Pong {
        /// Echo back client timestamp
        t: u64,
    },
}

impl ServerMsg {
    /// Numeric op code clients switch on. Session messages use 0.
    pub fn op_code(&self) -> u8 {
        match self {
            ServerMsg::MatchWelcome { .. } => 1,
            ServerMsg::PlayerJoined { .. } => 2,
            ServerMsg::PlayerLeft { .. } => 3,
            ServerMsg::BoardUpdate { .. } => 4,
            ServerMsg::GameWon { .. } => 5,
            ServerMsg::MoveRejected { .. } => 6,
            ServerMsg::GameDraw { .. } => 7,
            ServerMsg::GameTimeout { .. } => 8,
            ServerMsg::TimeRemaining { .. } => 9,
            ServerMsg::Welcome { .. }
            | ServerMsg::Queued { .. }
            | ServerMsg::MatchFound { .. }
            | ServerMsg::Error { .. }
            | ServerMsg::Pong { .. } => 0,
        }
    }

    pub fn error(code: &str, message: impl Into<String>) -> Self {
        ServerMsg::Error {
            code: code.to_string(),
            message: message.into(),
        }
    }
}

/// Envelope actually written to the socket
#[derive(Debug, Serialize)]
pub struct Envelope<'a> {
    pub op_code: u8,
    pub data: &'a ServerMsg,
}

impl<'a> From<&'a ServerMsg> for Envelope<'a> {
    fn from(msg: &'a ServerMsg) -> Self {
        Self {
            op_code: msg.op_code(),
            data: msg,
        }
    }
}
