//! Outcome reporting: turns an ended match into a leaderboard score
//!
//! The engine hands records to an unbounded channel so reporting never blocks a
//! tick. A separate writer task drains the channel into the ranking store and
//! only logs failures; the in-memory outcome stays authoritative.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::store::{RankingStore, ScoreMetadata, ScoreRecord};

use super::state::{GameMode, MatchState};

/// Points awarded to a winner by mode
pub fn score_for(mode: GameMode) -> i64 {
    match mode {
        GameMode::Standard => 1,
        GameMode::Timed => 2,
    }
}

/// Hands finished matches to the ranking writer
#[derive(Clone)]
pub struct OutcomeReporter {
    board_id: Arc<str>,
    records_tx: mpsc::UnboundedSender<ScoreRecord>,
}

impl OutcomeReporter {
    pub fn new(board_id: &str, records_tx: mpsc::UnboundedSender<ScoreRecord>) -> Self {
        Self {
            board_id: Arc::from(board_id),
            records_tx,
        }
    }

    /// Reporter plus the receiving end for a writer task
    pub fn channel(board_id: &str) -> (Self, mpsc::UnboundedReceiver<ScoreRecord>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self::new(board_id, tx), rx)
    }

    /// Score record for the winner of an ended match. `None` for draws or
    /// matches that have not ended.
    pub fn build_record(&self, state: &MatchState, now_ms: u64) -> Option<ScoreRecord> {
        let outcome = state.outcome.as_ref()?;
        let winner_id = outcome.winner_id?;
        let symbol = outcome.symbol.or_else(|| state.symbol_of(&winner_id))?;

        let display_name = state
            .player(&winner_id)
            .map(|p| p.display_name.clone())
            .unwrap_or_default();

        Some(ScoreRecord {
            board_id: self.board_id.to_string(),
            player_id: winner_id,
            display_name,
            score: score_for(state.mode),
            metadata: ScoreMetadata {
                symbol,
                mode: state.mode,
                time_remaining: state.time_remaining(now_ms),
            },
        })
    }

    /// Queue the result of an ended match for the ranking store
    pub fn report(&self, state: &MatchState, now_ms: u64) {
        let Some(record) = self.build_record(state, now_ms) else {
            info!(match_id = %state.id, mode = %state.mode, "Match ended without a winner, nothing to record");
            return;
        };

        info!(
            match_id = %state.id,
            player_id = %record.player_id,
            score = record.score,
            mode = %state.mode,
            "Reporting match winner"
        );

        if self.records_tx.send(record).is_err() {
            error!(match_id = %state.id, "Ranking writer is gone, score dropped");
        }
    }
}

/// Drain score records into the store until every reporter is dropped
pub async fn run_ranking_writer(
    store: Arc<dyn RankingStore>,
    mut records_rx: mpsc::UnboundedReceiver<ScoreRecord>,
) {
    while let Some(record) = records_rx.recv().await {
        match store.record_result(&record).await {
            Ok(()) => info!(
                player_id = %record.player_id,
                username = %record.display_name,
                score = record.score,
                mode = %record.metadata.mode,
                "Wrote leaderboard record"
            ),
            Err(e) => warn!(
                player_id = %record.player_id,
                error = %e,
                "Failed to write leaderboard record"
            ),
        }
    }
    info!("Ranking writer stopped");
}

pub fn spawn_ranking_writer(
    store: Arc<dyn RankingStore>,
    records_rx: mpsc::UnboundedReceiver<ScoreRecord>,
) -> JoinHandle<()> {
    tokio::spawn(run_ranking_writer(store, records_rx))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::board::Symbol;
    use crate::game::state::{MatchPhase, Outcome, OutcomeCause, Player};
    use crate::store::MemoryLeaderboard;
    use std::time::Duration;
    use uuid::Uuid;

    fn ended(mode: GameMode, cause: OutcomeCause) -> (MatchState, Uuid) {
        let winner = Uuid::new_v4();
        let mut state = MatchState::new(Uuid::new_v4(), mode, Duration::from_secs(30));
        state.roster.push(Player::new(winner, "alice"));
        state.symbols.insert(winner, Symbol::O);
        state.phase = MatchPhase::Ended;
        state.outcome = Some(Outcome {
            winner_id: (cause != OutcomeCause::Draw).then_some(winner),
            symbol: (cause != OutcomeCause::Draw).then_some(Symbol::O),
            cause,
        });
        (state, winner)
    }

    #[test]
    fn standard_win_scores_one() {
        let (reporter, _rx) = OutcomeReporter::channel("board");
        let (state, winner) = ended(GameMode::Standard, OutcomeCause::Line);

        let record = reporter.build_record(&state, 0).unwrap();
        assert_eq!(record.player_id, winner);
        assert_eq!(record.display_name, "alice");
        assert_eq!(record.score, 1);
        assert_eq!(record.metadata.symbol, Symbol::O);
        assert_eq!(record.metadata.time_remaining, None);
    }

    #[test]
    fn timed_win_scores_two_with_clock() {
        let (reporter, _rx) = OutcomeReporter::channel("board");
        let (mut state, _) = ended(GameMode::Timed, OutcomeCause::Timeout);
        state.clock.start_turn(0);

        let record = reporter.build_record(&state, 12_000).unwrap();
        assert_eq!(record.score, 2);
        assert_eq!(record.metadata.mode, GameMode::Timed);
        assert_eq!(record.metadata.time_remaining, Some(18));
    }

    #[test]
    fn draw_reports_nothing() {
        let (reporter, mut rx) = OutcomeReporter::channel("board");
        let (state, _) = ended(GameMode::Standard, OutcomeCause::Draw);

        reporter.report(&state, 0);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn report_without_writer_does_not_panic() {
        let (reporter, rx) = OutcomeReporter::channel("board");
        drop(rx);
        let (state, _) = ended(GameMode::Standard, OutcomeCause::Line);
        reporter.report(&state, 0);
    }

    #[tokio::test]
    async fn writer_persists_records() {
        let store = Arc::new(MemoryLeaderboard::new());
        let (reporter, rx) = OutcomeReporter::channel("board");
        let writer = spawn_ranking_writer(store.clone(), rx);

        let (state, winner) = ended(GameMode::Timed, OutcomeCause::Line);
        reporter.report(&state, 0);
        drop(reporter);
        writer.await.unwrap();

        let top = store.top_players("board", 10).await.unwrap();
        assert_eq!(top.len(), 1);
        assert_eq!(top[0].owner_id, winner);
        assert_eq!(top[0].score, 2);
    }
}
