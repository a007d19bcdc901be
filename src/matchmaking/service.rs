//! Matchmaking service - manages the queue, match creation and routing players
//! to their current match

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::game::{
    spawn_match, GameMatch, GameMode, MatchCommand, MatchHandle, MatchMessage, MatchParams,
    MatchRegistry, MatchTypeRegistry, Player,
};
use crate::util::time::unix_millis;
use crate::ws::protocol::ServerMsg;
use crate::ws::sessions::SessionRegistry;

use super::queue::{validate_entries, MatchmakingError, MatchmakingQueue, QueuedPlayer};

/// How often the queue is scanned for pairs
pub const MATCHMAKING_INTERVAL: Duration = Duration::from_millis(500);

const MODES: [GameMode; 2] = [GameMode::Standard, GameMode::Timed];

/// Matchmaking service
#[derive(Clone)]
pub struct MatchmakingService {
    queue: Arc<Mutex<MatchmakingQueue>>,
    matches: Arc<MatchRegistry>,
    sessions: Arc<SessionRegistry>,
    types: Arc<MatchTypeRegistry>,
    end_grace: Duration,
}

impl MatchmakingService {
    pub fn new(
        matches: Arc<MatchRegistry>,
        sessions: Arc<SessionRegistry>,
        types: Arc<MatchTypeRegistry>,
        end_grace: Duration,
    ) -> Self {
        Self {
            queue: Arc::new(Mutex::new(MatchmakingQueue::default())),
            matches,
            sessions,
            types,
            end_grace,
        }
    }

    /// Join the queue for a mode. Returns the size of that mode's queue.
    pub async fn join_queue(&self, player: QueuedPlayer) -> Result<usize, MatchmakingError> {
        if self.active_match(&player.user_id).is_some() {
            return Err(MatchmakingError::AlreadyInMatch);
        }

        let user_id = player.user_id;
        let mode = player.mode;
        let mut queue = self.queue.lock().await;
        queue.enqueue(player);
        let queue_size = queue.len_of(mode);

        info!(user_id = %user_id, mode = %mode, queue_size, "Player joined matchmaking queue");

        // Pairing waits for the run loop so only connected players are matched
        Ok(queue_size)
    }

    /// Leave matchmaking queue
    pub async fn leave_queue(&self, user_id: Uuid) -> bool {
        let removed = self.queue.lock().await.dequeue(user_id).is_some();
        if removed {
            info!(user_id = %user_id, "Player left matchmaking queue");
        }
        removed
    }

    /// Run the matchmaking service (periodic queue processing)
    pub async fn run(&self) {
        let mut interval = tokio::time::interval(MATCHMAKING_INTERVAL);

        loop {
            interval.tick().await;
            self.process_queue().await;
        }
    }

    /// Pair up connected players in every mode. Returns the number of matches created.
    pub async fn process_queue(&self) -> usize {
        let connected = self.sessions.connected_ids();
        let mut groups = Vec::new();
        {
            let mut queue = self.queue.lock().await;
            for mode in MODES {
                while let Some(players) = queue.drain_connected(mode, &connected) {
                    groups.push(players);
                }
                if let Some(wait) = queue.oldest_wait(mode) {
                    debug!(mode = %mode, waiting = queue.len_of(mode), oldest_wait_ms = wait.as_millis() as u64, "Queue status");
                }
            }
        }

        let mut created = 0;
        for players in groups {
            match self.create_match(players).await {
                Ok(match_id) => {
                    created += 1;
                    debug!(match_id = %match_id, "Match created from queue");
                }
                Err(e) => error!(error = %e, "Failed to create match"),
            }
        }
        created
    }

    /// Create a match for a validated group and move its players in
    async fn create_match(&self, players: Vec<QueuedPlayer>) -> Result<Uuid, MatchmakingError> {
        let mode = validate_entries(&players)?;
        let created = self
            .types
            .create(&mode.label(), &MatchParams::default())
            .map_err(|e| MatchmakingError::MatchCreation(e.to_string()))?;

        let (game_match, handle) = GameMatch::new(created, self.sessions.clone(), self.end_grace);
        let match_id = handle.id;

        for player in &players {
            self.sessions.assign_match(player.user_id, match_id);
        }
        spawn_match(game_match, handle.clone(), self.matches.clone());

        info!(
            match_id = %match_id,
            mode = %mode,
            label = %handle.label,
            player_count = players.len(),
            "Created new match"
        );

        for player in players {
            self.sessions.send(
                &player.user_id,
                ServerMsg::MatchFound {
                    match_id,
                    label: handle.label.clone(),
                    mode,
                },
            );

            let join = MatchCommand::Join(Player::new(player.user_id, player.display_name));
            if !handle.send(join).await {
                error!(user_id = %player.user_id, match_id = %match_id, "Failed to send join to match");
            }
        }

        Ok(match_id)
    }

    /// Forward a raw move payload to the player's match
    pub async fn forward_move(&self, user_id: Uuid, data: Bytes) -> Result<(), MatchmakingError> {
        let handle = self
            .active_match(&user_id)
            .ok_or(MatchmakingError::NotInMatch)?;

        let message = MatchMessage {
            sender: user_id,
            data,
            received_at: unix_millis(),
        };
        if !handle.send(MatchCommand::Data(message)).await {
            warn!(user_id = %user_id, match_id = %handle.id, "Failed to send move to match");
        }
        Ok(())
    }

    /// Take the player out of their current match, if any
    pub async fn leave_match(&self, user_id: Uuid) -> bool {
        let Some(handle) = self.active_match(&user_id) else {
            return false;
        };
        self.sessions.clear_match(&user_id, &handle.id);
        handle.send(MatchCommand::Leave(user_id)).await
    }

    /// Connection closed: leave the queue and the current match
    pub async fn disconnect(&self, user_id: Uuid) {
        self.leave_queue(user_id).await;
        self.leave_match(user_id).await;
    }

    /// Get current queue size
    pub async fn queue_size(&self) -> usize {
        self.queue.lock().await.len()
    }

    #[cfg(test)]
    pub async fn is_in_queue(&self, user_id: &Uuid) -> bool {
        self.queue.lock().await.contains(user_id)
    }

    fn active_match(&self, user_id: &Uuid) -> Option<MatchHandle> {
        let match_id = self.sessions.current_match(user_id)?;
        self.matches.get(&match_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::{EngineSettings, OutcomeReporter};
    use tokio::sync::mpsc;

    fn service() -> MatchmakingService {
        let (reporter, _) = OutcomeReporter::channel("TicTacToeLeaderboard");
        let types = MatchTypeRegistry::with_defaults(EngineSettings::default(), reporter);
        MatchmakingService::new(
            Arc::new(MatchRegistry::new()),
            Arc::new(SessionRegistry::new()),
            Arc::new(types),
            Duration::from_secs(10),
        )
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

    #[tokio::test]
    async fn pairs_connected_players_of_the_same_mode() {
        let mm = service();
        let (a, b, c) = (Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());
        let (_, mut rx_a) = mm.sessions.register(a, "alice");
        let (_, mut rx_b) = mm.sessions.register(b, "bob");
        let (_, _rx_c) = mm.sessions.register(c, "carol");

        mm.join_queue(QueuedPlayer::new(a, "alice".into(), GameMode::Timed)).await.unwrap();
        mm.join_queue(QueuedPlayer::new(c, "carol".into(), GameMode::Standard)).await.unwrap();
        mm.join_queue(QueuedPlayer::new(b, "bob".into(), GameMode::Timed)).await.unwrap();

        assert_eq!(mm.process_queue().await, 1);
        assert_eq!(mm.queue_size().await, 1);
        assert!(mm.is_in_queue(&c).await);

        let match_id = match next_op(&mut rx_a, 0).await {
            ServerMsg::MatchFound { match_id, label, mode } => {
                assert_eq!(label, "lobby_timed");
                assert_eq!(mode, GameMode::Timed);
                match_id
            }
            other => panic!("unexpected {other:?}"),
        };
        assert_eq!(mm.sessions.current_match(&b), Some(match_id));

        match next_op(&mut rx_b, 1).await {
            ServerMsg::MatchWelcome { turn_time_limit, .. } => assert_eq!(turn_time_limit, Some(30)),
            other => panic!("unexpected {other:?}"),
        }

        let err = mm
            .join_queue(QueuedPlayer::new(a, "alice".into(), GameMode::Standard))
            .await
            .unwrap_err();
        assert_eq!(err, MatchmakingError::AlreadyInMatch);
    }

    #[tokio::test]
    async fn offline_players_wait_in_queue() {
        let mm = service();
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
        let (_, _rx_a) = mm.sessions.register(a, "alice");

        mm.join_queue(QueuedPlayer::new(a, "alice".into(), GameMode::Standard)).await.unwrap();
        mm.join_queue(QueuedPlayer::new(b, "bob".into(), GameMode::Standard)).await.unwrap();

        assert_eq!(mm.process_queue().await, 0);
        assert_eq!(mm.queue_size().await, 2);
    }

    #[tokio::test]
    async fn moves_are_routed_and_disconnect_leaves() {
        let mm = service();
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
        let (_, mut rx_a) = mm.sessions.register(a, "alice");
        let (_, mut rx_b) = mm.sessions.register(b, "bob");
        mm.join_queue(QueuedPlayer::new(a, "alice".into(), GameMode::Standard)).await.unwrap();
        mm.join_queue(QueuedPlayer::new(b, "bob".into(), GameMode::Standard)).await.unwrap();
        mm.process_queue().await;
        next_op(&mut rx_b, 1).await;

        mm.forward_move(a, Bytes::from_static(br#"{"row":1,"col":1}"#))
            .await
            .unwrap();
        match next_op(&mut rx_b, 4).await {
            ServerMsg::BoardUpdate { current_turn, .. } => assert_eq!(current_turn, Some(b)),
            other => panic!("unexpected {other:?}"),
        }

        mm.disconnect(b).await;
        match next_op(&mut rx_a, 3).await {
            ServerMsg::PlayerLeft { user_id, .. } => assert_eq!(user_id, b),
            other => panic!("unexpected {other:?}"),
        }
        assert!(mm.forward_move(b, Bytes::new()).await.is_err());
    }
}
