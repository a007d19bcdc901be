//! Connected players and their outbound channels

use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::game::Dispatch;
use crate::ws::protocol::ServerMsg;

/// Outbound buffer per connection. A client this far behind loses messages.
pub const OUTBOUND_BUFFER: usize = 64;

/// One live WebSocket connection
#[derive(Clone)]
pub struct PlayerConnection {
    pub conn_id: u64,
    pub tx: mpsc::Sender<ServerMsg>,
}

/// Every connected player plus the match each one is in
#[derive(Default)]
pub struct SessionRegistry {
    sessions: DashMap<Uuid, PlayerConnection>,
    player_matches: DashMap<Uuid, Uuid>,
    next_conn_id: AtomicU64,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a connection, replacing any older one for the same user.
    /// Returns the connection id and the receiving end of its outbound channel.
    pub fn register(&self, user_id: Uuid, display_name: &str) -> (u64, mpsc::Receiver<ServerMsg>) {
        let (tx, rx) = mpsc::channel(OUTBOUND_BUFFER);
        let conn_id = self.next_conn_id.fetch_add(1, Ordering::Relaxed);

        let previous = self.sessions.insert(user_id, PlayerConnection { conn_id, tx });
        if previous.is_some() {
            debug!(user_id = %user_id, "Replaced existing connection");
        }
        info!(user_id = %user_id, username = %display_name, conn_id, "Session registered");

        (conn_id, rx)
    }

    /// Drop a connection. Ignored if the user has since reconnected.
    pub fn unregister(&self, user_id: &Uuid, conn_id: u64) -> bool {
        self.sessions
            .remove_if(user_id, |_, conn| conn.conn_id == conn_id)
            .is_some()
    }

    #[cfg(test)]
    pub fn is_connected(&self, user_id: &Uuid) -> bool {
        self.sessions.contains_key(user_id)
    }

    /// Whether `conn_id` is still the live connection for `user_id`
    #[cfg(test)]
    pub fn is_current(&self, user_id: &Uuid, conn_id: u64) -> bool {
        self.sessions
            .get(user_id)
            .is_some_and(|conn| conn.conn_id == conn_id)
    }

    pub fn connected_ids(&self) -> HashSet<Uuid> {
        self.sessions.iter().map(|entry| *entry.key()).collect()
    }

    pub fn connection_count(&self) -> usize {
        self.sessions.len()
    }

    /// Queue a message for one player. Returns false if it could not be queued.
    pub fn send(&self, user_id: &Uuid, msg: ServerMsg) -> bool {
        let Some(conn) = self.sessions.get(user_id) else {
            debug!(user_id = %user_id, "No connection for outbound message");
            return false;
        };

        match conn.tx.try_send(msg) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                warn!(user_id = %user_id, "Outbound buffer full, dropping message");
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                debug!(user_id = %user_id, "Outbound channel closed");
                false
            }
        }
    }

    /// Deliver a match dispatch to each of its recipients
    pub fn deliver(&self, dispatch: &Dispatch) {
        for user_id in &dispatch.recipients {
            self.send(user_id, dispatch.msg.clone());
        }
    }

    pub fn assign_match(&self, user_id: Uuid, match_id: Uuid) {
        self.player_matches.insert(user_id, match_id);
    }

    pub fn current_match(&self, user_id: &Uuid) -> Option<Uuid> {
        self.player_matches.get(user_id).map(|m| *m)
    }

    /// Forget a player's match, but only if it is still `match_id`
    pub fn clear_match(&self, user_id: &Uuid, match_id: &Uuid) {
        self.player_matches.remove_if(user_id, |_, current| current == match_id);
    }
}
