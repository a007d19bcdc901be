//! Authoritative match state machine
//!
//! [`MatchEngine`] owns one [`MatchState`] and is driven by a single task: lifecycle
//! calls (`join`, `leave`, ...) are applied immediately, queued player messages
//! once per tick. Every call returns the [`Dispatch`]es to deliver; the engine
//! itself never does I/O.
//!
//! Tick order:
//! 1. timed mode: a turn past its deadline is forfeited and the tick stops there
//! 2. timed mode: periodic time-remaining broadcast
//! 3. messages in arrival order; the first terminal move ends processing
//! 4. per-tick buffers are cleared

use std::time::Duration;

use serde::Deserialize;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::ws::protocol::ServerMsg;

use super::board::{self, Symbol};
use super::reporter::OutcomeReporter;
use super::state::{GameMode, MatchPhase, MatchState, Outcome, OutcomeCause, Player};
use super::{MatchConfigError, MatchMessage, MoveError};

/// A message and the players it goes to
#[derive(Debug, Clone, PartialEq)]
pub struct Dispatch {
    pub recipients: Vec<Uuid>,
    pub msg: ServerMsg,
}

/// Engine knobs shared by every match on this server
#[derive(Debug, Clone)]
pub struct EngineSettings {
    /// Ticks per second
    pub tick_rate: u32,
    /// Turn length in timed mode
    pub turn_limit: Duration,
    /// Optional roster cap enforced on join attempts
    pub max_players: Option<usize>,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            tick_rate: 10,
            turn_limit: Duration::from_secs(30),
            max_players: None,
        }
    }
}

/// Parameters supplied when a match is created
#[derive(Debug, Clone, Default, Deserialize)]
pub struct MatchParams {
    pub mode: Option<String>,
}

impl MatchParams {
    #[cfg(test)]
    pub fn with_mode(mode: GameMode) -> Self {
        Self {
            mode: Some(mode.as_str().to_string()),
        }
    }
}

/// Admission decision for a join attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JoinDecision {
    Accept,
    Reject { reason: String },
}

/// Inbound move payload
#[derive(Debug, Deserialize)]
struct MoveRequest {
    row: i64,
    col: i64,
}

pub struct MatchEngine {
    state: MatchState,
    settings: EngineSettings,
    reporter: OutcomeReporter,
}

impl MatchEngine {
    /// Create a match. Returns the engine, its tick interval and its label.
    pub fn init(
        id: Uuid,
        default_mode: GameMode,
        params: &MatchParams,
        settings: EngineSettings,
        reporter: OutcomeReporter,
    ) -> (Self, Duration, String) {
        let mode = resolve_mode(default_mode, params);
        let tick_interval = Duration::from_micros(1_000_000 / u64::from(settings.tick_rate.max(1)));
        let label = mode.label();

        info!(
            match_id = %id,
            mode = %mode,
            tick_rate = settings.tick_rate,
            label = %label,
            "Match initialized"
        );

        let engine = Self {
            state: MatchState::new(id, mode, settings.turn_limit),
            settings,
            reporter,
        };
        (engine, tick_interval, label)
    }

    pub fn state(&self) -> &MatchState {
        &self.state
    }

    /// Admission policy. Returning players are always let back in.
    pub fn join_attempt(&self, player: &Player) -> JoinDecision {
        if self.state.is_ended() {
            return JoinDecision::Reject {
                reason: "match has ended".to_string(),
            };
        }

        let returning = self.state.symbols.contains_key(&player.user_id);
        if let Some(max) = self.settings.max_players {
            if !returning && self.state.roster.len() >= max {
                return JoinDecision::Reject {
                    reason: "match is full".to_string(),
                };
            }
        }

        debug!(match_id = %self.state.id, user_id = %player.user_id, "Join attempt accepted");
        JoinDecision::Accept
    }

    pub fn join(&mut self, players: &[Player], now_ms: u64) -> Vec<Dispatch> {
        let mut out = Vec::new();

        for player in players {
            if self.state.is_present(&player.user_id) {
                info!(match_id = %self.state.id, user_id = %player.user_id, "Player already in match, skipping");
            } else {
                self.state.roster.push(player.clone());

                if !self.state.symbols.contains_key(&player.user_id) {
                    let symbol = self.next_symbol();
                    self.state.symbols.insert(player.user_id, symbol);
                    info!(match_id = %self.state.id, user_id = %player.user_id, symbol = %symbol, "Assigned symbol");
                }

                if self.state.turn.is_none() {
                    self.give_turn(Some(player.user_id), now_ms);
                }

                info!(
                    match_id = %self.state.id,
                    user_id = %player.user_id,
                    player_count = self.state.roster.len(),
                    "Player joined match"
                );
            }

            out.push(self.private(
                player.user_id,
                ServerMsg::MatchWelcome {
                    message: format!("Welcome to {} mode!", self.state.mode),
                    player_count: self.state.roster.len(),
                    mode: self.state.mode,
                    turn_time_limit: self.state.turn_time_limit(),
                },
            ));

            out.push(self.broadcast(ServerMsg::PlayerJoined {
                user_id: player.user_id,
                username: player.display_name.clone(),
                total_players: self.state.roster.len(),
                current_turn: self.state.turn,
                board: self.state.board,
                symbol: self.state.symbol_of(&player.user_id),
                mode: self.state.mode,
                turn_time_limit: self.state.turn_time_limit(),
                time_remaining: self.state.time_remaining(now_ms),
            }));
        }

        out
    }

    pub fn leave(&mut self, user_ids: &[Uuid], now_ms: u64) -> Vec<Dispatch> {
        let mut out = Vec::new();

        for user_id in user_ids {
            let Some(pos) = self.state.roster.iter().position(|p| &p.user_id == user_id) else {
                debug!(match_id = %self.state.id, user_id = %user_id, "Leave for player not in match");
                continue;
            };
            self.state.roster.remove(pos);

            // Keep `turn` pointing at someone who is actually here
            if self.state.turn == Some(*user_id) {
                let next = self.state.roster.first().map(|p| p.user_id);
                if self.state.is_ended() {
                    self.state.turn = next;
                } else {
                    self.give_turn(next, now_ms);
                }
            }

            info!(
                match_id = %self.state.id,
                user_id = %user_id,
                player_count = self.state.roster.len(),
                "Player left match"
            );

            out.push(self.broadcast(ServerMsg::PlayerLeft {
                user_id: *user_id,
                message: "Player left the match".to_string(),
            }));
        }

        out
    }

    /// Process one tick's worth of queued messages
    pub fn tick(&mut self, messages: Vec<MatchMessage>, now_ms: u64) -> Vec<Dispatch> {
        let mut out = Vec::new();
        self.state.tick += 1;

        if self.state.mode.is_timed() && !self.state.is_ended() && self.state.clock.is_running() {
            if self.state.clock.expired(now_ms) {
                if self.resolve_timeout(now_ms, &mut out) {
                    self.state.pending_actions.clear();
                    return out;
                }
            } else if self.state.tick % u64::from(self.settings.tick_rate.max(1)) == 0 {
                out.push(self.broadcast(ServerMsg::TimeRemaining {
                    time_remaining: self.state.clock.remaining_secs(now_ms),
                    current_turn: self.state.turn,
                }));
            }
        }

        for message in messages {
            self.state
                .pending_actions
                .insert(message.sender, message.data.clone());

            match self.handle_move(&message, now_ms, &mut out) {
                Ok(true) => break,
                Ok(false) => {}
                Err(e) => {
                    warn!(
                        match_id = %self.state.id,
                        user_id = %message.sender,
                        error = %e,
                        "Move rejected"
                    );
                    out.push(self.private(
                        message.sender,
                        ServerMsg::MoveRejected {
                            code: e.code().to_string(),
                            error: e.to_string(),
                        },
                    ));
                }
            }
        }

        self.state.pending_actions.clear();
        out
    }

    /// Host is tearing the match down; nothing changes
    pub fn terminate(&self, grace_secs: u64) -> &MatchState {
        info!(
            match_id = %self.state.id,
            grace_secs,
            phase = ?self.state.phase,
            "Match terminated"
        );
        &self.state
    }

    /// Out-of-band control hook. Echoes its input.
    pub fn signal(&mut self, data: String) -> String {
        info!(match_id = %self.state.id, data = %data, "Match signal received");
        data
    }

    /// Validate and apply one move. `Ok(true)` means the match just ended.
    fn handle_move(
        &mut self,
        message: &MatchMessage,
        now_ms: u64,
        out: &mut Vec<Dispatch>,
    ) -> Result<bool, MoveError> {
        if self.state.is_ended() {
            return Err(MoveError::MatchEnded);
        }

        let request: MoveRequest = serde_json::from_slice(&message.data)
            .map_err(|e| MoveError::MalformedMessage(e.to_string()))?;

        let cell = board::cell_index(request.row, request.col)?;
        board::is_legal_move(&self.state.board, cell)?;

        if matches!(self.state.turn, Some(turn) if turn != message.sender) {
            return Err(MoveError::NotYourTurn);
        }

        let sender = message.sender;
        let symbol = self
            .state
            .symbol_of(&sender)
            .filter(|_| self.state.is_present(&sender))
            .ok_or(MoveError::NotInMatch)?;

        self.state.board = board::apply_move(&self.state.board, cell, symbol);
        if self.state.phase == MatchPhase::Lobby {
            self.state.phase = MatchPhase::InProgress;
        }
        debug!(
            match_id = %self.state.id,
            user_id = %sender,
            cell,
            symbol = %symbol,
            queued_ms = now_ms.saturating_sub(message.received_at),
            "Move applied"
        );

        if board::check_win(&self.state.board, symbol) {
            self.finish(Some(sender), Some(symbol), OutcomeCause::Line, now_ms);
            out.push(self.broadcast(ServerMsg::GameWon {
                message: format!("We have a winner! {} wins in {} mode!", symbol, self.state.mode),
                winner_id: sender,
                board: self.state.board,
                mode: self.state.mode,
            }));
            return Ok(true);
        }

        if board::is_draw(&self.state.board) {
            self.finish(None, None, OutcomeCause::Draw, now_ms);
            out.push(self.broadcast(ServerMsg::GameDraw {
                message: format!("It's a draw in {} mode!", self.state.mode),
                board: self.state.board,
                mode: self.state.mode,
            }));
            return Ok(true);
        }

        // Turn rotation is defined for exactly two players only
        if self.state.roster.len() == 2 {
            let next = self.state.opponent_of(&sender).map(|p| p.user_id);
            self.give_turn(next, now_ms);
        }

        out.push(self.broadcast(ServerMsg::BoardUpdate {
            board: self.state.board,
            current_turn: self.state.turn,
            mode: self.state.mode,
            time_remaining: self.state.time_remaining(now_ms),
        }));
        Ok(false)
    }

    /// Turn holder ran out of time. `true` if the match ended.
    fn resolve_timeout(&mut self, now_ms: u64, out: &mut Vec<Dispatch>) -> bool {
        let Some(loser) = self.state.turn else {
            self.state.clock.stop();
            return false;
        };

        let Some(winner) = self.state.opponent_of(&loser).map(|p| p.user_id) else {
            info!(match_id = %self.state.id, user_id = %loser, "Turn expired with no opponent present, restarting clock");
            self.state.clock.start_turn(now_ms);
            return false;
        };

        info!(match_id = %self.state.id, user_id = %loser, "Time's up");
        let symbol = self.state.symbol_of(&winner);
        self.finish(Some(winner), symbol, OutcomeCause::Timeout, now_ms);

        let shown = symbol.map(Symbol::as_str).unwrap_or("?");
        out.push(self.broadcast(ServerMsg::GameTimeout {
            message: format!("Time's up! {} wins by timeout!", shown),
            winner_id: winner,
            board: self.state.board,
            mode: self.state.mode,
            timeout: true,
        }));
        true
    }

    /// Record the outcome and report it. Only reachable once per match.
    fn finish(&mut self, winner_id: Option<Uuid>, symbol: Option<Symbol>, cause: OutcomeCause, now_ms: u64) {
        debug_assert!(self.state.outcome.is_none());
        self.state.phase = MatchPhase::Ended;
        self.state.outcome = Some(Outcome {
            winner_id,
            symbol,
            cause,
        });

        info!(
            match_id = %self.state.id,
            winner = ?winner_id,
            cause = ?cause,
            mode = %self.state.mode,
            "Match ended"
        );

        self.reporter.report(&self.state, now_ms);
    }

    /// Move the turn, restarting or stopping the clock in timed mode
    fn give_turn(&mut self, next: Option<Uuid>, now_ms: u64) {
        self.state.turn = next;
        if self.state.mode.is_timed() {
            match next {
                Some(_) => self.state.clock.start_turn(now_ms),
                None => self.state.clock.stop(),
            }
        }
        if let Some(user_id) = next {
            debug!(match_id = %self.state.id, user_id = %user_id, "Turn changed");
        }
    }

    /// Symbols cycle X, O, X, ... in order of first join. Departed players keep
    /// theirs, so a newcomer never takes a symbol someone may come back with.
    fn next_symbol(&self) -> Symbol {
        if self.state.symbols.len() % 2 == 0 {
            Symbol::X
        } else {
            Symbol::O
        }
    }

    fn broadcast(&self, msg: ServerMsg) -> Dispatch {
        Dispatch {
            recipients: self.state.roster_ids(),
            msg,
        }
    }

    fn private(&self, user_id: Uuid, msg: ServerMsg) -> Dispatch {
        Dispatch {
            recipients: vec![user_id],
            msg,
        }
    }
}

/// Pick the mode from creation params, falling back to the match type default
fn resolve_mode(default_mode: GameMode, params: &MatchParams) -> GameMode {
    match params.mode.as_deref() {
        None => default_mode,
        Some(raw) => GameMode::parse(raw).unwrap_or_else(|| {
            let err = MatchConfigError::UnknownMode(raw.to_string());
            warn!(error = %err, fallback = %default_mode, "Falling back to default mode");
            default_mode
        }),
    }
}
