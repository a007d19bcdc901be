//! Ranking store: where match winners' scores end up
//!
//! Two backends share the [`RankingStore`] trait. The in-memory board keeps the
//! best score per player and resets every Monday 00:00 UTC; the Supabase board
//! stores rows in a PostgREST `leaderboard_records` table.

use std::collections::HashMap;

use chrono::{DateTime, Datelike, Duration, NaiveTime, Utc};
use futures::future::BoxFuture;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::debug;
use uuid::Uuid;

use crate::game::{GameMode, Symbol};

use super::supabase::{SupabaseClient, SupabaseError};

/// Largest page the top-N query will return
pub const MAX_TOP_PLAYERS: usize = 100;

/// Score written for a match winner
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScoreRecord {
    pub board_id: String,
    pub player_id: Uuid,
    pub display_name: String,
    pub score: i64,
    pub metadata: ScoreMetadata,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoreMetadata {
    pub symbol: Symbol,
    pub mode: GameMode,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub time_remaining: Option<u64>,
}

/// One row of a top-N listing
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LeaderboardEntry {
    pub username: String,
    pub owner_id: Uuid,
    pub score: i64,
}

/// Ranking store errors
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error(transparent)]
    Supabase(#[from] SupabaseError),
}

/// Persistent score store consumed by the outcome reporter and the leaderboard route
pub trait RankingStore: Send + Sync {
    fn record_result<'a>(&'a self, record: &'a ScoreRecord) -> BoxFuture<'a, Result<(), StoreError>>;

    fn top_players<'a>(
        &'a self,
        board_id: &'a str,
        limit: usize,
    ) -> BoxFuture<'a, Result<Vec<LeaderboardEntry>, StoreError>>;
}

/// Start of the weekly leaderboard period containing `now` (Monday 00:00 UTC)
pub fn period_start(now: DateTime<Utc>) -> DateTime<Utc> {
    let days_back = i64::from(now.weekday().num_days_from_monday());
    (now.date_naive() - Duration::days(days_back))
        .and_time(NaiveTime::MIN)
        .and_utc()
}

#[derive(Debug, Clone)]
struct StoredScore {
    username: String,
    score: i64,
    metadata: ScoreMetadata,
    period: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

/// Process-local leaderboard, used when no Supabase project is configured
#[derive(Default)]
pub struct MemoryLeaderboard {
    records: RwLock<HashMap<(String, Uuid), StoredScore>>,
}

impl MemoryLeaderboard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Keep the better of the stored and the new score within the current period
    fn record_at(&self, record: &ScoreRecord, now: DateTime<Utc>) {
        let period = period_start(now);
        let key = (record.board_id.clone(), record.player_id);
        let mut records = self.records.write();

        if let Some(existing) = records.get(&key) {
            if existing.period == period && existing.score >= record.score {
                debug!(
                    player_id = %record.player_id,
                    best = existing.score,
                    score = record.score,
                    "Existing score is better, keeping it"
                );
                return;
            }
        }

        records.insert(
            key,
            StoredScore {
                username: record.display_name.clone(),
                score: record.score,
                metadata: record.metadata.clone(),
                period,
                updated_at: now,
            },
        );
    }

    fn top_at(&self, board_id: &str, limit: usize, now: DateTime<Utc>) -> Vec<LeaderboardEntry> {
        let period = period_start(now);
        let records = self.records.read();

        let mut rows: Vec<(&Uuid, &StoredScore)> = records
            .iter()
            .filter(|((board, _), stored)| board.as_str() == board_id && stored.period == period)
            .map(|((_, owner), stored)| (owner, stored))
            .collect();

        // Highest score first, earlier achievers win ties
        rows.sort_by(|a, b| {
            b.1.score
                .cmp(&a.1.score)
                .then_with(|| a.1.updated_at.cmp(&b.1.updated_at))
        });

        rows.into_iter()
            .take(limit.min(MAX_TOP_PLAYERS))
            .map(|(owner, stored)| LeaderboardEntry {
                username: stored.username.clone(),
                owner_id: *owner,
                score: stored.score,
            })
            .collect()
    }

    /// Metadata stored with a player's current best, if any
    #[cfg(test)]
    pub fn metadata_of(&self, board_id: &str, player_id: Uuid) -> Option<ScoreMetadata> {
        self.records
            .read()
            .get(&(board_id.to_string(), player_id))
            .map(|s| s.metadata.clone())
    }
}

impl RankingStore for MemoryLeaderboard {
    fn record_result<'a>(&'a self, record: &'a ScoreRecord) -> BoxFuture<'a, Result<(), StoreError>> {
        Box::pin(async move {
            self.record_at(record, Utc::now());
            Ok(())
        })
    }

    fn top_players<'a>(
        &'a self,
        board_id: &'a str,
        limit: usize,
    ) -> BoxFuture<'a, Result<Vec<LeaderboardEntry>, StoreError>> {
        Box::pin(async move { Ok(self.top_at(board_id, limit, Utc::now())) })
    }
}

/// Row shape of the `leaderboard_records` table
#[derive(Debug, Serialize, Deserialize)]
struct LeaderboardRow {
    board_id: String,
    owner_id: Uuid,
    username: String,
    score: i64,
    metadata: ScoreMetadata,
    updated_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
struct ScoreOnly {
    score: i64,
}

/// Leaderboard backed by Supabase. Period resets are left to the database.
#[derive(Clone)]
pub struct SupabaseLeaderboard {
    client: SupabaseClient,
}

impl SupabaseLeaderboard {
    const TABLE: &'static str = "leaderboard_records";

    pub fn new(client: SupabaseClient) -> Self {
        Self { client }
    }

    async fn best_score(&self, board_id: &str, owner_id: Uuid) -> Result<Option<i64>, SupabaseError> {
        let query = format!("board_id=eq.{}&owner_id=eq.{}&select=score", board_id, owner_id);
        let rows: Vec<ScoreOnly> = self.client.get(Self::TABLE, &query).await?;
        Ok(rows.into_iter().map(|r| r.score).max())
    }
}

impl RankingStore for SupabaseLeaderboard {
    fn record_result<'a>(&'a self, record: &'a ScoreRecord) -> BoxFuture<'a, Result<(), StoreError>> {
        Box::pin(async move {
            if let Some(best) = self.best_score(&record.board_id, record.player_id).await? {
                if best >= record.score {
                    debug!(player_id = %record.player_id, best, "Existing score is better, keeping it");
                    return Ok(());
                }
            }

            let row = LeaderboardRow {
                board_id: record.board_id.clone(),
                owner_id: record.player_id,
                username: record.display_name.clone(),
                score: record.score,
                metadata: record.metadata.clone(),
                updated_at: Utc::now(),
            };
            self.client
                .upsert(Self::TABLE, &row, "board_id,owner_id")
                .await?;
            Ok(())
        })
    }

    fn top_players<'a>(
        &'a self,
        board_id: &'a str,
        limit: usize,
    ) -> BoxFuture<'a, Result<Vec<LeaderboardEntry>, StoreError>> {
        Box::pin(async move {
            let query = format!(
                "board_id=eq.{}&select=owner_id,username,score&order=score.desc,updated_at.asc&limit={}",
                board_id,
                limit.min(MAX_TOP_PLAYERS)
            );
            let rows: Vec<LeaderboardEntry> = self.client.get(Self::TABLE, &query).await?;
            Ok(rows)
        })
    }
}
