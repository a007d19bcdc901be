//! Data store modules for rankings

pub mod leaderboard;
pub mod supabase;

pub use leaderboard::{
    LeaderboardEntry, MemoryLeaderboard, RankingStore, ScoreMetadata, ScoreRecord, StoreError,
    SupabaseLeaderboard,
};
pub use supabase::SupabaseClient;
