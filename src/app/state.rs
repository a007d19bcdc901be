//! Application state shared across routes

use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::info;

use crate::config::Config;
use crate::game::{MatchRegistry, MatchTypeRegistry, OutcomeReporter};
use crate::matchmaking::MatchmakingService;
use crate::store::{
    MemoryLeaderboard, RankingStore, ScoreRecord, SupabaseClient, SupabaseLeaderboard,
};
use crate::ws::sessions::SessionRegistry;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub rankings: Arc<dyn RankingStore>,
    pub sessions: Arc<SessionRegistry>,
    pub match_registry: Arc<MatchRegistry>,
    pub match_types: Arc<MatchTypeRegistry>,
    pub matchmaking: Arc<MatchmakingService>,
}

impl AppState {
    /// Build the state. The returned receiver feeds the ranking writer task.
    pub fn new(config: Config) -> (Self, mpsc::UnboundedReceiver<ScoreRecord>) {
        let config = Arc::new(config);

        // Pick the ranking backend
        let rankings: Arc<dyn RankingStore> = match &config.supabase {
            Some(supabase) => {
                info!(url = %supabase.url, "Using Supabase ranking store");
                let client = SupabaseClient::new(&supabase.url, &supabase.service_role_key);
                Arc::new(SupabaseLeaderboard::new(client))
            }
            None => {
                info!("Using in-memory ranking store");
                Arc::new(MemoryLeaderboard::new())
            }
        };

        let (reporter, records_rx) = OutcomeReporter::channel(&config.leaderboard_id);
        let match_types = Arc::new(MatchTypeRegistry::with_defaults(
            config.engine_settings(),
            reporter,
        ));

        let sessions = Arc::new(SessionRegistry::new());
        let match_registry = Arc::new(MatchRegistry::new());

        // Arc for sharing across cloned AppState
        let matchmaking = Arc::new(MatchmakingService::new(
            match_registry.clone(),
            sessions.clone(),
            match_types.clone(),
            config.match_end_grace(),
        ));

        let state = Self {
            config,
            rankings,
            sessions,
            match_registry,
            match_types,
            matchmaking,
        };
        (state, records_rx)
    }
}
