//! Match runner and the registry of live matches
//!
//! Each match is one tokio task owning its [`MatchEngine`]. Lifecycle commands
//! arrive over an mpsc channel and are applied immediately; move data is
//! buffered and handed to the engine on the next tick.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use serde::Serialize;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{interval, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::util::time::unix_millis;
use crate::ws::protocol::ServerMsg;
use crate::ws::sessions::SessionRegistry;

use super::engine::{Dispatch, JoinDecision, MatchEngine};
use super::modes::CreatedMatch;
use super::state::{GameMode, MatchPhase, Player};
use super::MatchMessage;

/// Capacity of a match's command channel
const COMMAND_BUFFER: usize = 256;

/// Commands accepted by a running match
#[derive(Debug)]
pub enum MatchCommand {
    Join(Player),
    Leave(Uuid),
    Data(MatchMessage),
    Signal {
        data: String,
        reply: oneshot::Sender<String>,
    },
    Terminate {
        grace_secs: u64,
    },
}

/// Handle to a running match
#[derive(Clone)]
pub struct MatchHandle {
    pub id: Uuid,
    pub label: String,
    pub mode: GameMode,
    pub command_tx: mpsc::Sender<MatchCommand>,
    pub player_count: Arc<AtomicUsize>,
}

impl MatchHandle {
    pub fn player_count(&self) -> usize {
        self.player_count.load(Ordering::Relaxed)
    }

    /// Send a command, returning false if the match is gone
    pub async fn send(&self, command: MatchCommand) -> bool {
        self.command_tx.send(command).await.is_ok()
    }

    /// Round-trip a signal through the match
    pub async fn signal(&self, data: String) -> Option<String> {
        let (reply, rx) = oneshot::channel();
        if !self.send(MatchCommand::Signal { data, reply }).await {
            return None;
        }
        rx.await.ok()
    }
}

/// Listing entry for a live match
#[derive(Debug, Clone, Serialize)]
pub struct MatchSummary {
    pub match_id: Uuid,
    pub label: String,
    pub mode: GameMode,
    pub player_count: usize,
}

/// Registry of all active matches
#[derive(Default)]
pub struct MatchRegistry {
    matches: DashMap<Uuid, MatchHandle>,
}

impl MatchRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, id: &Uuid) -> Option<MatchHandle> {
        self.matches.get(id).map(|m| m.value().clone())
    }

    pub fn insert(&self, handle: MatchHandle) {
        self.matches.insert(handle.id, handle);
    }

    pub fn remove(&self, id: &Uuid) -> Option<MatchHandle> {
        self.matches.remove(id).map(|(_, h)| h)
    }

    pub fn active_matches(&self) -> usize {
        self.matches.len()
    }

    pub fn total_players(&self) -> usize {
        self.matches
            .iter()
            .map(|m| m.value().player_count())
            .sum()
    }

    /// Ask every live match to stop. Returns how many were reached.
    pub async fn terminate_all(&self, grace_secs: u64) -> usize {
        let handles: Vec<MatchHandle> = self.matches.iter().map(|m| m.value().clone()).collect();

        let mut reached = 0;
        for handle in handles {
            if handle.send(MatchCommand::Terminate { grace_secs }).await {
                reached += 1;
            } else {
                debug!(match_id = %handle.id, "Match already stopped");
            }
        }
        reached
    }

    pub fn list(&self) -> Vec<MatchSummary> {
        self.matches
            .iter()
            .map(|m| MatchSummary {
                match_id: m.id,
                label: m.label.clone(),
                mode: m.mode,
                player_count: m.player_count(),
            })
            .collect()
    }
}

/// Why the runner stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    GraceElapsed,
    Abandoned,
    Terminated,
    HandlesDropped,
}

/// The task that drives one engine
pub struct GameMatch {
    engine: MatchEngine,
    tick_interval: Duration,
    end_grace: Duration,
    command_rx: mpsc::Receiver<MatchCommand>,
    sessions: Arc<SessionRegistry>,
    player_count: Arc<AtomicUsize>,
    inbox: Vec<MatchMessage>,
    ended_at: Option<Instant>,
    terminate_grace: Option<u64>,
}

impl GameMatch {
    pub fn new(
        created: CreatedMatch,
        sessions: Arc<SessionRegistry>,
        end_grace: Duration,
    ) -> (Self, MatchHandle) {
        let (command_tx, command_rx) = mpsc::channel(COMMAND_BUFFER);
        let player_count = Arc::new(AtomicUsize::new(0));
        let state = created.engine.state();

        let handle = MatchHandle {
            id: state.id,
            label: created.label,
            mode: state.mode,
            command_tx,
            player_count: player_count.clone(),
        };

        let game_match = Self {
            engine: created.engine,
            tick_interval: created.tick_interval,
            end_grace,
            command_rx,
            sessions,
            player_count,
            inbox: Vec::new(),
            ended_at: None,
            terminate_grace: None,
        };

        (game_match, handle)
    }

    pub fn id(&self) -> Uuid {
        self.engine.state().id
    }

    /// Run until the match ends and its grace period runs out
    pub async fn run(mut self) -> StopReason {
        let match_id = self.id();
        info!(match_id = %match_id, mode = %self.engine.state().mode, "Match loop started");

        let mut ticker = interval(self.tick_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        let reason = loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Some(reason) = self.on_tick() {
                        break reason;
                    }
                }
                command = self.command_rx.recv() => {
                    let Some(command) = command else {
                        break StopReason::HandlesDropped;
                    };
                    if let Some(reason) = self.on_command(command) {
                        break reason;
                    }
                }
            }
        };

        let grace_secs = self.terminate_grace.unwrap_or(self.end_grace.as_secs());
        let state = self.engine.terminate(grace_secs);
        for user_id in state.symbols.keys() {
            self.sessions.clear_match(user_id, &match_id);
        }

        info!(match_id = %match_id, reason = ?reason, tick = state.tick, "Match loop stopped");
        reason
    }

    fn on_tick(&mut self) -> Option<StopReason> {
        let batch = std::mem::take(&mut self.inbox);
        let out = self.engine.tick(batch, unix_millis());
        self.deliver(out);

        if self.engine.state().is_ended() {
            let ended_at = *self.ended_at.get_or_insert_with(Instant::now);
            if ended_at.elapsed() >= self.end_grace {
                return Some(StopReason::GraceElapsed);
            }
        }
        None
    }

    fn on_command(&mut self, command: MatchCommand) -> Option<StopReason> {
        match command {
            MatchCommand::Join(player) => {
                match self.engine.join_attempt(&player) {
                    JoinDecision::Accept => {
                        let out = self.engine.join(&[player], unix_millis());
                        self.sync_player_count();
                        self.deliver(out);
                    }
                    JoinDecision::Reject { reason } => {
                        warn!(match_id = %self.id(), user_id = %player.user_id, reason = %reason, "Join rejected");
                        self.sessions
                            .send(&player.user_id, ServerMsg::error("join_rejected", reason));
                    }
                }
            }
            MatchCommand::Leave(user_id) => {
                let out = self.engine.leave(&[user_id], unix_millis());
                self.sync_player_count();
                self.deliver(out);
                self.sessions.clear_match(&user_id, &self.id());

                if self.is_abandoned() {
                    info!(match_id = %self.id(), "All players left, ending match");
                    return Some(StopReason::Abandoned);
                }
            }
            MatchCommand::Data(message) => {
                if self.engine.state().is_present(&message.sender) {
                    self.inbox.push(message);
                } else {
                    debug!(match_id = %self.id(), user_id = %message.sender, "Dropping data from non-member");
                }
            }
            MatchCommand::Signal { data, reply } => {
                let _ = reply.send(self.engine.signal(data));
            }
            MatchCommand::Terminate { grace_secs } => {
                info!(match_id = %self.id(), grace_secs, "Terminate requested");
                self.terminate_grace = Some(grace_secs);
                return Some(StopReason::Terminated);
            }
        }
        None
    }

    /// Nobody left in a match that has seen players or moves
    fn is_abandoned(&self) -> bool {
        let state = self.engine.state();
        state.roster.is_empty() && (state.phase != MatchPhase::Lobby || !state.symbols.is_empty())
    }

    fn sync_player_count(&self) {
        self.player_count
            .store(self.engine.state().roster.len(), Ordering::Relaxed);
    }

    fn deliver(&self, dispatches: Vec<Dispatch>) {
        for dispatch in &dispatches {
            self.sessions.deliver(dispatch);
        }
    }
}

/// Register a match, run it on its own task and unregister it when it stops
pub fn spawn_match(
    game_match: GameMatch,
    handle: MatchHandle,
    registry: Arc<MatchRegistry>,
) -> JoinHandle<StopReason> {
    let match_id = handle.id;
    registry.insert(handle);

    tokio::spawn(async move {
        let reason = game_match.run().await;
        registry.remove(&match_id);
        info!(match_id = %match_id, "Match removed from registry");
        reason
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::{EngineSettings, MatchParams, MatchTypeRegistry, OutcomeReporter};
    use bytes::Bytes;

    struct Fixture {
        registry: Arc<MatchRegistry>,
        sessions: Arc<SessionRegistry>,
        handle: MatchHandle,
        task: JoinHandle<StopReason>,
    }

    fn start(mode: GameMode, end_grace: Duration) -> Fixture {
        let (reporter, _records) = OutcomeReporter::channel("TicTacToeLeaderboard");
        let types = MatchTypeRegistry::with_defaults(EngineSettings::default(), reporter);
        let created = types.create(&mode.label(), &MatchParams::default()).unwrap();

        let registry = Arc::new(MatchRegistry::new());
        let sessions = Arc::new(SessionRegistry::new());
        let (game_match, handle) = GameMatch::new(created, sessions.clone(), end_grace);
        let task = spawn_match(game_match, handle.clone(), registry.clone());

        Fixture {
            registry,
            sessions,
            handle,
            task,
        }
    }

    async fn next_op(rx: &mut mpsc::Receiver<ServerMsg>, op_code: u8) -> ServerMsg {
        loop {
            let msg = tokio::time::timeout(Duration::from_secs(2), rx.recv())
                .await
                .expect("timed out waiting for message")
                .expect("channel closed");
            if msg.op_code() == op_code {
                return msg;
            }
        }
    }

    fn move_data(sender: Uuid, row: u8, col: u8) -> MatchCommand {
        MatchCommand::Data(MatchMessage {
            sender,
            data: Bytes::from(format!(r#"{{"row":{row},"col":{col}}}"#)),
            received_at: unix_millis(),
        })
    }

    #[tokio::test]
    async fn plays_a_match_to_completion() {
        let f = start(GameMode::Standard, Duration::ZERO);
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
        let (_, mut rx_a) = f.sessions.register(a, "alice");
        let (_, mut rx_b) = f.sessions.register(b, "bob");
        assert_eq!(f.registry.active_matches(), 1);

        f.handle.send(MatchCommand::Join(Player::new(a, "alice"))).await;
        f.handle.send(MatchCommand::Join(Player::new(b, "bob"))).await;
        next_op(&mut rx_b, 1).await;
        assert_eq!(f.handle.player_count(), 2);

        for (sender, row, col) in [(a, 0, 0), (b, 1, 0), (a, 0, 1), (b, 1, 1), (a, 0, 2)] {
            f.handle.send(move_data(sender, row, col)).await;
            // One move per tick so turn order holds
            tokio::time::sleep(Duration::from_millis(150)).await;
        }

        match next_op(&mut rx_b, 5).await {
            ServerMsg::GameWon { winner_id, .. } => assert_eq!(winner_id, a),
            other => panic!("unexpected {other:?}"),
        }
        next_op(&mut rx_a, 5).await;

        assert_eq!(f.task.await.unwrap(), StopReason::GraceElapsed);
        assert_eq!(f.registry.active_matches(), 0);
    }

    #[tokio::test]
    async fn signal_round_trips_and_terminate_stops() {
        let f = start(GameMode::Timed, Duration::from_secs(10));

        assert_eq!(f.handle.signal("hello".into()).await.as_deref(), Some("hello"));
        assert_eq!(f.registry.list()[0].label, "lobby_timed");

        f.handle
            .send(MatchCommand::Terminate { grace_secs: 0 })
            .await;
        assert_eq!(f.task.await.unwrap(), StopReason::Terminated);
        assert!(f.registry.get(&f.handle.id).is_none());
    }

    #[tokio::test]
    async fn terminate_all_stops_every_live_match() {
        let (reporter, _records) = OutcomeReporter::channel("TicTacToeLeaderboard");
        let types = MatchTypeRegistry::with_defaults(EngineSettings::default(), reporter);
        let registry = Arc::new(MatchRegistry::new());
        let sessions = Arc::new(SessionRegistry::new());

        let mut tasks = Vec::new();
        for name in ["lobby_standard", "lobby_timed"] {
            let created = types.create(name, &MatchParams::default()).unwrap();
            let (game_match, handle) =
                GameMatch::new(created, sessions.clone(), Duration::from_secs(60));
            tasks.push(spawn_match(game_match, handle, registry.clone()));
        }
        assert_eq!(registry.active_matches(), 2);

        assert_eq!(registry.terminate_all(0).await, 2);
        for task in tasks {
            assert_eq!(task.await.unwrap(), StopReason::Terminated);
        }
        assert_eq!(registry.active_matches(), 0);
        assert_eq!(registry.terminate_all(0).await, 0);
    }

    #[tokio::test]
    async fn everyone_leaving_stops_the_match() {
        let f = start(GameMode::Standard, Duration::from_secs(10));
        let a = Uuid::new_v4();
        let (_, mut rx_a) = f.sessions.register(a, "alice");
        f.sessions.assign_match(a, f.handle.id);

        f.handle.send(MatchCommand::Join(Player::new(a, "alice"))).await;
        next_op(&mut rx_a, 1).await;
        f.handle.send(MatchCommand::Leave(a)).await;

        assert_eq!(f.task.await.unwrap(), StopReason::Abandoned);
        assert_eq!(f.sessions.current_match(&a), None);
    }

    #[tokio::test]
    async fn capped_match_rejects_extra_player() {
        let (reporter, _records) = OutcomeReporter::channel("b");
        let settings = EngineSettings {
            max_players: Some(1),
            ..EngineSettings::default()
        };
        let types = MatchTypeRegistry::with_defaults(settings, reporter);
        let created = types.create("lobby", &MatchParams::default()).unwrap();
        let sessions = Arc::new(SessionRegistry::new());
        let (game_match, handle) = GameMatch::new(created, sessions.clone(), Duration::ZERO);
        let task = tokio::spawn(game_match.run());

        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
        let (_, _rx_a) = sessions.register(a, "a");
        let (_, mut rx_b) = sessions.register(b, "b");
        handle.send(MatchCommand::Join(Player::new(a, "a"))).await;
        handle.send(MatchCommand::Join(Player::new(b, "b"))).await;

        match next_op(&mut rx_b, 0).await {
            ServerMsg::Error { code, .. } => assert_eq!(code, "join_rejected"),
            other => panic!("unexpected {other:?}"),
        }
        drop(handle);
        assert_eq!(task.await.unwrap(), StopReason::HandlesDropped);
    }
}
