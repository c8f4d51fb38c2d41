// HTTP API routes (game control, controller listing, metrics).

pub mod ws;

use axum::{
    extract::{Json, State},
    http::{header, StatusCode},
    response::IntoResponse,
    routing::{get, post},
    Router,
};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;

use crate::bot::{BotSpec, ControllerRegistry};
use crate::config::Config;
use crate::engine::server::{build_bots, GameResult, GameServer};
use crate::metrics;
use crate::worker_pool::WorkerPool;

// ── Request types ─────────────────────────────────────────────────────

#[derive(Deserialize)]
pub struct StartGameRequest {
    pub bots: Vec<BotSpec>,
    pub seed: Option<u64>,
    pub max_ticks: Option<u64>,
    /// Run on the headless worker pool instead of the live server.
    #[serde(default)]
    pub headless: bool,
}

// ── Shared application state ─────────────────────────────────────────

#[derive(Clone)]
pub struct AppState {
    pub game_server: Arc<GameServer>,
    pub registry: Arc<ControllerRegistry>,
    pub worker_pool: Arc<WorkerPool>,
    pub config: Config,
}

impl AppState {
    pub fn new(config: Config) -> Self {
        Self {
            game_server: Arc::new(GameServer::new(config.codec())),
            registry: Arc::new(ControllerRegistry::with_defaults()),
            worker_pool: Arc::new(WorkerPool::new(config.headless_workers)),
            config,
        }
    }
}

// ── Error helper ──────────────────────────────────────────────────────

fn json_error(status: StatusCode, msg: &str) -> impl IntoResponse {
    (status, Json(json!({ "error": msg })))
}

// ── Router ────────────────────────────────────────────────────────────

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/metrics", get(metrics_handler))
        .route("/api/controllers", get(list_controllers))
        .route("/api/game/start", post(start_game))
        .route("/api/game/status", get(game_status))
        .route("/api/game/stop", post(stop_game))
        .route("/ws/game", get(ws::ws_game))
        .with_state(state)
}

// ── Handlers ──────────────────────────────────────────────────────────

async fn health_check() -> impl IntoResponse {
    Json(json!({ "status": "ok", "service": "skirmish-backend" }))
}

async fn metrics_handler() -> impl IntoResponse {
    (
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        metrics::gather_metrics(),
    )
}

async fn list_controllers(State(state): State<AppState>) -> impl IntoResponse {
    Json(json!({ "profiles": state.registry.profiles() }))
}

async fn start_game(
    State(state): State<AppState>,
    Json(req): Json<StartGameRequest>,
) -> impl IntoResponse {
    if req.bots.is_empty() {
        return json_error(StatusCode::BAD_REQUEST, "At least one bot is required").into_response();
    }
    if !req.headless && state.game_server.is_running() {
        return json_error(StatusCode::CONFLICT, "A game is already running").into_response();
    }

    let bots = match build_bots(&state.registry, &req.bots) {
        Ok(bots) => bots,
        Err(e) => return json_error(StatusCode::BAD_REQUEST, &e).into_response(),
    };
    let settings = state.config.game_settings(req.seed);
    let seed = settings.seed;
    let max_ticks = req.max_ticks.unwrap_or(state.config.max_ticks);

    if req.headless {
        let spawned = state
            .worker_pool
            .spawn_game(settings, bots, max_ticks, move |result: GameResult| {
                tracing::info!(
                    seed,
                    ticks = result.ticks,
                    winner_team = ?result.winner_team,
                    replay_bytes = result.replay_data.len(),
                    "Headless game finished"
                );
            });
        return match spawned {
            Ok(()) => (
                StatusCode::ACCEPTED,
                Json(json!({ "status": "queued", "seed": seed, "max_ticks": max_ticks })),
            )
                .into_response(),
            Err(e) => json_error(StatusCode::SERVICE_UNAVAILABLE, &e).into_response(),
        };
    }

    match state.game_server.start_game(settings, bots, max_ticks) {
        Ok(()) => (
            StatusCode::OK,
            Json(json!({
                "status": "running",
                "seed": seed,
                "max_ticks": max_ticks,
                "message": "Game started. Connect to /ws/game for live updates."
            })),
        )
            .into_response(),
        Err(e) => json_error(StatusCode::CONFLICT, &e).into_response(),
    }
}

async fn game_status(State(state): State<AppState>) -> impl IntoResponse {
    (
        StatusCode::OK,
        Json(json!({
            "running": state.game_server.is_running(),
            "game": state.game_server.active_game_info(),
            "headless_active": state.worker_pool.active_count(),
        })),
    )
        .into_response()
}

async fn stop_game(State(state): State<AppState>) -> impl IntoResponse {
    if !state.game_server.is_running() {
        return json_error(StatusCode::BAD_REQUEST, "No game is running").into_response();
    }
    state.game_server.stop_game();
    (StatusCode::OK, Json(json!({ "status": "stopping" }))).into_response()
}
