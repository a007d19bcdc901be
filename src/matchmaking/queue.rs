//! Matchmaking queue implementation

use std::collections::{HashMap, HashSet, VecDeque};
use std::time::{Duration, Instant};

use uuid::Uuid;

use crate::game::GameMode;

/// Players per tic-tac-toe match
pub const MATCH_SIZE: usize = 2;

/// Player in the matchmaking queue
#[derive(Debug, Clone)]
pub struct QueuedPlayer {
    pub user_id: Uuid,
    pub display_name: String,
    pub mode: GameMode,
    pub queued_at: Instant,
}

impl QueuedPlayer {
    pub fn new(user_id: Uuid, display_name: String, mode: GameMode) -> Self {
        Self {
            user_id,
            display_name,
            mode,
            queued_at: Instant::now(),
        }
    }

    /// How long this player has been waiting
    pub fn wait_time(&self) -> Duration {
        self.queued_at.elapsed()
    }
}

/// Matchmaking errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MatchmakingError {
    #[error("no entries to match")]
    NoEntries,

    #[error("players queued for different modes ({first} vs {other})")]
    MismatchedModes { first: GameMode, other: GameMode },

    #[error("already in a match")]
    AlreadyInMatch,

    #[error("not in a match")]
    NotInMatch,

    #[error("failed to create match: {0}")]
    MatchCreation(String),
}

/// Mode shared by a group of entries, or why they cannot play together
pub fn validate_entries(entries: &[QueuedPlayer]) -> Result<GameMode, MatchmakingError> {
    let first = entries.first().ok_or(MatchmakingError::NoEntries)?.mode;

    match entries.iter().find(|e| e.mode != first) {
        Some(other) => Err(MatchmakingError::MismatchedModes {
            first,
            other: other.mode,
        }),
        None => Ok(first),
    }
}

/// FIFO queues, one per mode
pub struct MatchmakingQueue {
    queues: HashMap<GameMode, VecDeque<QueuedPlayer>>,
    match_size: usize,
}

impl MatchmakingQueue {
    pub fn new(match_size: usize) -> Self {
        Self {
            queues: HashMap::new(),
            match_size: match_size.max(1),
        }
    }

    /// Add a player, replacing any entry they already have in any mode
    pub fn enqueue(&mut self, player: QueuedPlayer) {
        self.dequeue(player.user_id);
        self.queues.entry(player.mode).or_default().push_back(player);
    }

    /// Remove a player from whichever queue holds them
    pub fn dequeue(&mut self, user_id: Uuid) -> Option<QueuedPlayer> {
        self.queues.values_mut().find_map(|queue| {
            let pos = queue.iter().position(|p| p.user_id == user_id)?;
            queue.remove(pos)
        })
    }

    pub fn contains(&self, user_id: &Uuid) -> bool {
        self.queues
            .values()
            .any(|queue| queue.iter().any(|p| &p.user_id == user_id))
    }

    /// Total players waiting across all modes
    pub fn len(&self) -> usize {
        self.queues.values().map(VecDeque::len).sum()
    }

    pub fn len_of(&self, mode: GameMode) -> usize {
        self.queues.get(&mode).map_or(0, VecDeque::len)
    }

    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Take the longest-waiting connected players of a mode if there are
    /// enough. Disconnected entries keep their place.
    pub fn drain_connected(
        &mut self,
        mode: GameMode,
        connected: &HashSet<Uuid>,
    ) -> Option<Vec<QueuedPlayer>> {
        let queue = self.queues.get_mut(&mode)?;
        let picked: Vec<usize> = queue
            .iter()
            .enumerate()
            .filter(|(_, p)| connected.contains(&p.user_id))
            .map(|(i, _)| i)
            .take(self.match_size)
            .collect();

        if picked.len() < self.match_size {
            return None;
        }

        // Remove back to front so earlier indices stay valid
        let mut players: Vec<QueuedPlayer> = picked
            .into_iter()
            .rev()
            .filter_map(|i| queue.remove(i))
            .collect();
        players.reverse();
        Some(players)
    }

    /// Longest current wait in a mode's queue
    pub fn oldest_wait(&self, mode: GameMode) -> Option<Duration> {
        self.queues
            .get(&mode)
            .and_then(|q| q.front())
            .map(QueuedPlayer::wait_time)
    }
}

impl Default for MatchmakingQueue {
    fn default() -> Self {
        Self::new(MATCH_SIZE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn player(mode: GameMode) -> QueuedPlayer {
        let id = Uuid::new_v4();
        QueuedPlayer::new(id, format!("Player_{}", &id.to_string()[..8]), mode)
    }

    #[test]
    fn forms_pairs_in_fifo_order_per_mode() {
        let mut queue = MatchmakingQueue::default();
        let (a, b, c) = (
            player(GameMode::Standard),
            player(GameMode::Timed),
            player(GameMode::Standard),
        );
        let connected: HashSet<Uuid> = [a.user_id, b.user_id, c.user_id].into_iter().collect();
        queue.enqueue(a.clone());
        queue.enqueue(b.clone());
        assert!(queue.drain_connected(GameMode::Standard, &connected).is_none());

        queue.enqueue(c.clone());
        let pair = queue.drain_connected(GameMode::Standard, &connected).unwrap();
        let ids: Vec<Uuid> = pair.iter().map(|p| p.user_id).collect();
        assert_eq!(ids, vec![a.user_id, c.user_id]);
        assert_eq!(queue.len(), 1);
        assert_eq!(queue.len_of(GameMode::Timed), 1);
    }

    #[test]
    fn requeue_moves_player_between_modes() {
        let mut queue = MatchmakingQueue::default();
        let mut p = player(GameMode::Standard);
        queue.enqueue(p.clone());
        p.mode = GameMode::Timed;
        queue.enqueue(p.clone());

        assert_eq!(queue.len(), 1);
        assert_eq!(queue.len_of(GameMode::Standard), 0);
        assert!(queue.contains(&p.user_id));
        assert!(queue.dequeue(p.user_id).is_some());
        assert!(queue.is_empty());
    }

    #[test]
    fn drain_connected_skips_offline_players() {
        let mut queue = MatchmakingQueue::default();
        let (a, b, c) = (
            player(GameMode::Timed),
            player(GameMode::Timed),
            player(GameMode::Timed),
        );
        for p in [&a, &b, &c] {
            queue.enqueue(p.clone());
        }
        let connected: HashSet<Uuid> = [a.user_id, c.user_id].into_iter().collect();

        let pair = queue.drain_connected(GameMode::Timed, &connected).unwrap();
        let ids: Vec<Uuid> = pair.iter().map(|p| p.user_id).collect();
        assert_eq!(ids, vec![a.user_id, c.user_id]);
        assert!(queue.contains(&b.user_id));
        assert!(queue.drain_connected(GameMode::Timed, &connected).is_none());
    }

    #[test]
    fn validate_rejects_empty_and_mixed_groups() {
        assert_eq!(validate_entries(&[]), Err(MatchmakingError::NoEntries));

        let mixed = [player(GameMode::Standard), player(GameMode::Timed)];
        assert_eq!(
            validate_entries(&mixed),
            Err(MatchmakingError::MismatchedModes {
                first: GameMode::Standard,
                other: GameMode::Timed
            })
        );

        let same = [player(GameMode::Timed), player(GameMode::Timed)];
        assert_eq!(validate_entries(&same), Ok(GameMode::Timed));
    }
}
