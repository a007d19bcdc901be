//! HTTP route definitions

use axum::{
    extract::{Extension, Path, Query, State},
    http::{header, HeaderValue, Method, StatusCode},
    middleware,
    response::{IntoResponse, Json},
    routing::{get, post},
    Router,
};
use serde::{Deserialize, Serialize};
use tower::ServiceBuilder;
use tower_http::{
    compression::CompressionLayer,
    cors::{AllowOrigin, CorsLayer},
    trace::TraceLayer,
};
use tracing::{error, info};
use uuid::Uuid;

use crate::app::AppState;
use crate::game::{GameMode, MatchSummary};
use crate::http::middleware::{require_auth, AuthenticatedUser};
use crate::matchmaking::{MatchmakingError, QueuedPlayer};
use crate::store::{leaderboard::MAX_TOP_PLAYERS, LeaderboardEntry, StoreError};
use crate::util::time::uptime_secs;
use crate::ws::handler::ws_handler;

/// Default page size for the leaderboard
pub const DEFAULT_TOP_PLAYERS: usize = 10;

/// Build the application router
pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(allowed_origins(&state.config.client_origin))
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([header::AUTHORIZATION, header::CONTENT_TYPE]);

    // Public routes (no auth required)
    let public_routes = Router::new()
        .route("/health", get(health_handler))
        .route("/ws", get(ws_handler))
        .route("/leaderboard/top", get(leaderboard_top_handler))
        .route("/matches", get(matches_handler));

    // Protected routes (auth required)
    let protected_routes = Router::new()
        .route("/matchmaking/join", post(matchmaking_join_handler))
        .route("/matches/:match_id/signal", post(match_signal_handler))
        .layer(middleware::from_fn_with_state(state.clone(), require_auth));

    Router::new()
        .merge(public_routes)
        .merge(protected_routes)
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(cors)
                .layer(CompressionLayer::new()),
        )
        .with_state(state)
}

/// CORS origins from a comma separated list; `*` allows any
fn allowed_origins(client_origin: &str) -> AllowOrigin {
    if client_origin.split(',').any(|s| s.trim() == "*") {
        return AllowOrigin::any();
    }

    let origins: Vec<HeaderValue> = client_origin
        .split(',')
        .filter_map(|s| s.trim().parse::<HeaderValue>().ok())
        .collect();
    AllowOrigin::list(origins)
}

// ============================================================================
// Health endpoint
// ============================================================================

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    uptime_secs: u64,
    active_matches: usize,
    active_players: usize,
    queue_size: usize,
    connections: usize,
}

async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    let queue_size = state.matchmaking.queue_size().await;

    Json(HealthResponse {
        status: "ok",
        uptime_secs: uptime_secs(),
        active_matches: state.match_registry.active_matches(),
        active_players: state.match_registry.total_players(),
        queue_size,
        connections: state.sessions.connection_count(),
    })
}

// ============================================================================
// Match listing
// ============================================================================

#[derive(Serialize)]
struct MatchesResponse {
    match_types: Vec<String>,
    matches: Vec<MatchSummary>,
}

async fn matches_handler(State(state): State<AppState>) -> Json<MatchesResponse> {
    Json(MatchesResponse {
        match_types: state
            .match_types
            .names()
            .into_iter()
            .map(str::to_string)
            .collect(),
        matches: state.match_registry.list(),
    })
}

#[derive(Deserialize)]
struct SignalRequest {
    #[serde(default)]
    data: String,
}

#[derive(Serialize)]
struct SignalResponse {
    match_id: Uuid,
    data: String,
}

/// Forward an out-of-band signal to a live match and return its reply
async fn match_signal_handler(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthenticatedUser>,
    Path(match_id): Path<Uuid>,
    Json(req): Json<SignalRequest>,
) -> Result<Json<SignalResponse>, AppError> {
    let handle = state
        .match_registry
        .get(&match_id)
        .ok_or_else(|| AppError::NotFound(format!("match {match_id} not found")))?;

    info!(match_id = %match_id, user_id = %auth.user_id, "Signalling match");
    let data = handle
        .signal(req.data)
        .await
        .ok_or_else(|| AppError::NotFound(format!("match {match_id} has stopped")))?;

    Ok(Json(SignalResponse { match_id, data }))
}

// ============================================================================
// Leaderboard endpoint
// ============================================================================

#[derive(Deserialize)]
struct TopQuery {
    n: Option<i64>,
}

#[derive(Serialize)]
struct TopResponse {
    leaderboard_id: String,
    records: Vec<LeaderboardEntry>,
}

async fn leaderboard_top_handler(
    State(state): State<AppState>,
    Query(query): Query<TopQuery>,
) -> Result<Json<TopResponse>, AppError> {
    let n = resolve_top_n(query.n)?;
    let records = state
        .rankings
        .top_players(&state.config.leaderboard_id, n)
        .await?;

    Ok(Json(TopResponse {
        leaderboard_id: state.config.leaderboard_id.clone(),
        records,
    }))
}

/// Validate the requested page size
fn resolve_top_n(n: Option<i64>) -> Result<usize, AppError> {
    match n {
        None => Ok(DEFAULT_TOP_PLAYERS),
        Some(n) if n <= 0 => Err(AppError::BadRequest("n must be greater than 0".to_string())),
        Some(n) => Ok(usize::try_from(n).map_or(MAX_TOP_PLAYERS, |n| n.min(MAX_TOP_PLAYERS))),
    }
}

// ============================================================================
// Matchmaking endpoints
// ============================================================================

#[derive(Deserialize)]
struct JoinMatchRequest {
    #[serde(default)]
    mode: Option<String>,
}

#[derive(Serialize)]
struct JoinMatchResponse {
    status: &'static str,
    mode: GameMode,
    queue_size: usize,
    message: String,
}

async fn matchmaking_join_handler(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthenticatedUser>,
    Json(req): Json<JoinMatchRequest>,
) -> Result<Json<JoinMatchResponse>, AppError> {
    let mode = match req.mode.as_deref() {
        None => GameMode::default(),
        Some(raw) => GameMode::parse(raw)
            .ok_or_else(|| AppError::BadRequest(format!("unknown mode {raw:?}")))?,
    };

    let player = QueuedPlayer::new(auth.user_id, auth.display_name, mode);
    let queue_size = state.matchmaking.join_queue(player).await?;

    Ok(Json(JoinMatchResponse {
        status: "queued",
        mode,
        queue_size,
        message: "Added to matchmaking queue, connect to /ws to be matched".to_string(),
    }))
}

// ============================================================================
// Error handling
// ============================================================================

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<MatchmakingError> for AppError {
    fn from(e: MatchmakingError) -> Self {
        match e {
            MatchmakingError::AlreadyInMatch => AppError::Conflict(e.to_string()),
            MatchmakingError::MatchCreation(_) => AppError::Internal(e.to_string()),
            _ => AppError::BadRequest(e.to_string()),
        }
    }
}

impl From<StoreError> for AppError {
    fn from(e: StoreError) -> Self {
        error!(error = %e, "Ranking store request failed");
        AppError::Internal("leaderboard unavailable".to_string())
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> axum::response::Response {
        let (status, message) = match &self {
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg.clone()),
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, msg.clone()),
            AppError::Conflict(msg) => (StatusCode::CONFLICT, msg.clone()),
            AppError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg.clone()),
        };

        let body = serde_json::json!({
            "error": message
        });

        (status, Json(body)).into_response()
    }
}
