// Game server: runs a game instance and broadcasts encoded state to WebSocket clients.

use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{mpsc, Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use serde::Serialize;
use tokio::sync::{broadcast, oneshot};

use crate::bot::{panic_message, BotController, BotSpec, CommandInbox, ControllerRegistry, RemoteBot};
use crate::metrics;
use crate::protocol::{
    Codec, Payload, ProtocolError, ScoreLine, ServerMessage, StateSnapshot, PROTOCOL_VERSION,
};
use crate::replay::ReplayRecorder;

use super::config::*;
use super::game::{Game, GameSettings};

/// Result of a completed game, passed to the on_complete callback.
#[derive(Debug, Clone)]
pub struct GameResult {
    pub winner_team: Option<u8>,
    pub final_scores: Vec<ScoreLine>,
    pub ticks: u64,
    /// Gzipped JSON array of every message the game produced.
    pub replay_data: Vec<u8>,
    /// Set when the game thread panicked.
    pub error: Option<String>,
}

/// A participant ready to enter a game.
pub struct BotEntry {
    pub name: String,
    pub team: u8,
    pub controller: Box<dyn BotController>,
}

impl BotEntry {
    pub fn new(name: &str, team: u8, controller: Box<dyn BotController>) -> Self {
        Self {
            name: name.to_string(),
            team,
            controller,
        }
    }
}

/// Build controllers for every spec, failing on the first one that cannot be created.
pub fn build_bots(registry: &ControllerRegistry, specs: &[BotSpec]) -> Result<Vec<BotEntry>, String> {
    specs
        .iter()
        .map(|spec| {
            let controller = registry
                .create(spec)
                .map_err(|e| format!("Failed to create bot '{}': {}", spec.name, e))?;
            Ok(BotEntry {
                name: spec.name.clone(),
                team: spec.team,
                controller,
            })
        })
        .collect()
}

/// Handed to a connection that joined a live game.
///
/// Participant ids restart with every game, so a ticket is only meaningful
/// together with the generation of the game that issued it.
pub struct JoinTicket {
    pub participant_id: u32,
    pub generation: u64,
    pub inbox: CommandInbox,
}

/// Requests from connection tasks, applied by the game thread between ticks.
enum ControlRequest {
    Join {
        name: String,
        team: Option<u8>,
        reply: oneshot::Sender<Result<JoinTicket, String>>,
    },
    Leave {
        participant_id: u32,
        generation: u64,
    },
}

/// Metadata about a currently running game.
#[derive(Debug, Clone, Serialize)]
pub struct ActiveGameInfo {
    pub participant_names: Vec<String>,
    pub start_time: String,
    pub tick: u64,
    pub max_ticks: u64,
    pub spectator_count: usize,
    pub game_time_seconds: f64,
    pub wire_format: String,
}

#[derive(Debug, Clone)]
struct GameMeta {
    participant_names: Vec<String>,
    start_time: String,
    max_ticks: u64,
}

/// Shared handles the live game thread publishes through.
struct LiveLink {
    tx: broadcast::Sender<Payload>,
    latest_state: Arc<Mutex<Option<Payload>>>,
    running: Arc<AtomicBool>,
    current_tick: Arc<AtomicU64>,
    control_rx: mpsc::Receiver<ControlRequest>,
    generation: u64,
}

/// Drives one game to completion, encoding and publishing what happens.
struct MatchRunner {
    game: Game,
    codec: Codec,
    recorder: ReplayRecorder,
    live: Option<LiveLink>,
    prev_snapshot: Option<StateSnapshot>,
}

impl MatchRunner {
    fn new(game: Game, codec: Codec, live: Option<LiveLink>) -> Self {
        Self {
            game,
            codec,
            recorder: ReplayRecorder::new(),
            live,
            prev_snapshot: None,
        }
    }

    fn is_running(&self) -> bool {
        self.live
            .as_ref()
            .map_or(true, |live| live.running.load(Ordering::Relaxed))
    }

    fn run(mut self, max_ticks: u64) -> GameResult {
        self.publish_state();
        self.publish_events();

        let interval = Duration::from_millis(self.game.settings.tick_ms);
        let mut winner: Option<u8> = None;

        while self.is_running() && self.game.tick < max_ticks {
            let tick_start = Instant::now();
            self.handle_control_requests();
            self.game.tick();
            self.publish_state();
            self.publish_events();

            if let Some(team) = self.game.check_winner() {
                tracing::info!(team, tick = self.game.tick, "Team won, last one standing");
                winner = Some(team);
                break;
            }

            if let Some(live) = &self.live {
                live.current_tick.store(self.game.tick, Ordering::Relaxed);
                std::thread::sleep(interval.saturating_sub(tick_start.elapsed()));
            }
        }

        // Time-limit tiebreak: highest team score wins, ties are draws
        let winner_team = winner.or_else(|| self.game.leading_team());
        let final_scores = self.game.final_scores();
        let ticks = self.game.tick;

        self.publish(&ServerMessage::GameEnd {
            winner_team,
            final_scores: final_scores.clone(),
            ticks,
        });

        let replay_data = self.recorder.finish().unwrap_or_else(|e| {
            tracing::error!("Failed to compress replay: {e}");
            Vec::new()
        });

        GameResult {
            winner_team,
            final_scores,
            ticks,
            replay_data,
            error: None,
        }
    }

    /// Apply pending join/leave requests from connection tasks.
    fn handle_control_requests(&mut self) {
        let Some(live) = &self.live else {
            return;
        };
        while let Ok(request) = live.control_rx.try_recv() {
            match request {
                ControlRequest::Join { name, team, reply } => {
                    let outcome = admit_remote(&mut self.game, &name, team, live.generation);
                    if let Err(reason) = &outcome {
                        tracing::info!("Rejected join from '{name}': {reason}");
                    }
                    // The connection may have gone away while waiting
                    let _ = reply.send(outcome);
                }
                ControlRequest::Leave {
                    participant_id,
                    generation,
                } if generation == live.generation => {
                    self.game.remove_participant(participant_id);
                }
                ControlRequest::Leave {
                    participant_id,
                    generation,
                } => {
                    tracing::debug!(participant_id, generation, "Ignoring leave from an earlier game");
                }
            }
        }
    }

    /// Send a full state every FULL_SNAPSHOT_INTERVAL ticks and otherwise the
    /// smaller of delta and full state.
    fn publish_state(&mut self) {
        let snapshot = self.game.snapshot();
        let full_msg = ServerMessage::State(snapshot.clone());
        let Some(full) = self.encode(&full_msg) else {
            return;
        };

        if let Some(live) = &self.live {
            *live
                .latest_state
                .lock()
                .unwrap_or_else(PoisonError::into_inner) = Some(full.clone());
        }

        let delta = match &self.prev_snapshot {
            Some(prev) if snapshot.tick % FULL_SNAPSHOT_INTERVAL != 0 => {
                let delta_msg = ServerMessage::Delta(Game::compute_delta(&snapshot, prev));
                self.encode(&delta_msg)
                    .filter(|delta| delta.len() < full.len())
                    .map(|delta| (delta_msg, delta))
            }
            _ => None,
        };

        match delta {
            Some((delta_msg, payload)) => self.send(&delta_msg, payload),
            None => self.send(&full_msg, full),
        }
        self.prev_snapshot = Some(snapshot);
    }

    fn publish_events(&mut self) {
        let events = self.game.drain_events();
        if events.is_empty() {
            return;
        }
        self.publish(&ServerMessage::Events {
            tick: self.game.tick,
            events,
        });
    }

    fn publish(&mut self, message: &ServerMessage) {
        if let Some(payload) = self.encode(message) {
            self.send(message, payload);
        }
    }

    fn encode(&self, message: &ServerMessage) -> Option<Payload> {
        match self.codec.encode_server_message(message) {
            Ok(payload) => Some(payload),
            Err(e) => {
                tracing::error!(kind = message.kind(), "Failed to encode server message: {e}");
                None
            }
        }
    }

    fn send(&mut self, message: &ServerMessage, payload: Payload) {
        self.recorder.record(message);
        if let Some(live) = &self.live {
            // No subscribers is not an error
            let _ = live.tx.send(payload);
        }
    }
}

/// Add a remote participant for a client, or explain why not.
fn admit_remote(
    game: &mut Game,
    name: &str,
    team: Option<u8>,
    generation: u64,
) -> Result<JoinTicket, String> {
    let name = name.trim();
    if name.is_empty() {
        return Err("Name must not be empty".into());
    }
    if name.chars().count() > MAX_NAME_LEN {
        return Err(format!("Name longer than {MAX_NAME_LEN} characters"));
    }
    if game.participant_count() >= MAX_PARTICIPANTS {
        return Err("Arena is full".into());
    }

    // Balance teams 0 and 1 when the client has no preference
    let team = team.unwrap_or_else(|| u8::from(game.team_size(1) < game.team_size(0)));
    let (bot, inbox) = RemoteBot::new();
    let participant_id = game.add_participant(name, team, Box::new(bot));
    Ok(JoinTicket {
        participant_id,
        generation,
        inbox,
    })
}

fn new_game(settings: GameSettings, bots: Vec<BotEntry>) -> Game {
    let mut game = Game::new(settings);
    for bot in bots {
        game.add_participant(&bot.name, bot.team, bot.controller);
    }
    game
}

/// Run a game headless (no WebSocket broadcast, no per-tick sleep).
/// Runs synchronously on the calling thread and returns a GameResult.
/// Used by the worker pool for parallel headless game execution.
pub fn run_game_headless(settings: GameSettings, bots: Vec<BotEntry>, max_ticks: u64) -> GameResult {
    metrics::GAMES_STARTED_TOTAL.with_label_values(&["headless"]).inc();

    let result = std::panic::catch_unwind(AssertUnwindSafe(|| {
        let game = new_game(settings, bots);
        MatchRunner::new(game, Codec::json(), None).run(max_ticks)
    }));

    match result {
        Ok(game_result) => {
            metrics::GAMES_COMPLETED_TOTAL.with_label_values(&["headless"]).inc();
            game_result
        }
        Err(panic_info) => {
            let msg = panic_message(&*panic_info);
            tracing::error!("Headless game panicked: {}", msg);
            metrics::GAMES_ERRORED_TOTAL.with_label_values(&["headless"]).inc();
            GameResult {
                winner_team: None,
                final_scores: vec![],
                ticks: 0,
                replay_data: vec![],
                error: Some(msg),
            }
        }
    }
}

/// Manages a single live game, running the game loop on a dedicated thread
/// and broadcasting encoded messages to WebSocket subscribers.
pub struct GameServer {
    codec: Codec,
    broadcast_tx: broadcast::Sender<Payload>,
    running: Arc<AtomicBool>,
    /// Latest full state so late-joining clients can render immediately.
    latest_state: Arc<Mutex<Option<Payload>>>,
    control_tx: Arc<Mutex<Option<mpsc::Sender<ControlRequest>>>>,
    game_meta: Arc<Mutex<Option<GameMeta>>>,
    current_tick: Arc<AtomicU64>,
    tick_ms: Arc<AtomicU64>,
    /// Bumped for every live game started.
    generation: Arc<AtomicU64>,
}

impl GameServer {
    pub fn new(codec: Codec) -> Self {
        let (tx, _) = broadcast::channel(256);
        Self {
            codec,
            broadcast_tx: tx,
            running: Arc::new(AtomicBool::new(false)),
            latest_state: Arc::new(Mutex::new(None)),
            control_tx: Arc::new(Mutex::new(None)),
            game_meta: Arc::new(Mutex::new(None)),
            current_tick: Arc::new(AtomicU64::new(0)),
            tick_ms: Arc::new(AtomicU64::new(DEFAULT_TICK_MS)),
            generation: Arc::new(AtomicU64::new(0)),
        }
    }

    /// The codec every connection to this server speaks.
    pub fn codec(&self) -> &Codec {
        &self.codec
    }

    /// Subscribe to encoded game messages.
    pub fn subscribe(&self) -> broadcast::Receiver<Payload> {
        self.broadcast_tx.subscribe()
    }

    /// The greeting sent first on every connection.
    pub fn welcome(&self) -> Result<Payload, ProtocolError> {
        self.codec.encode_server_message(&ServerMessage::Welcome {
            protocol_version: PROTOCOL_VERSION,
            tick_ms: self.tick_ms.load(Ordering::Relaxed),
        })
    }

    /// Latest full state of the running game, if any.
    pub fn latest_state(&self) -> Option<Payload> {
        self.latest_state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Whether a game is currently running.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Relaxed)
    }

    /// Whether `ticket` belongs to the game that is running right now.
    pub fn holds_current(&self, ticket: &JoinTicket) -> bool {
        self.is_running() && ticket.generation == self.generation.load(Ordering::SeqCst)
    }

    /// Stop the currently running game (if any).
    pub fn stop_game(&self) {
        self.running.store(false, Ordering::Relaxed);
    }

    /// Number of current broadcast subscribers (spectators and players).
    pub fn spectator_count(&self) -> usize {
        self.broadcast_tx.receiver_count()
    }

    /// Get information about the currently active game, if any.
    pub fn active_game_info(&self) -> Option<ActiveGameInfo> {
        if !self.is_running() {
            return None;
        }
        let meta = self
            .game_meta
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()?;
        let tick = self.current_tick.load(Ordering::Relaxed);
        Some(ActiveGameInfo {
            participant_names: meta.participant_names,
            start_time: meta.start_time,
            tick,
            max_ticks: meta.max_ticks,
            spectator_count: self.spectator_count(),
            game_time_seconds: tick as f64 * self.tick_ms.load(Ordering::Relaxed) as f64 / 1000.0,
            wire_format: self.codec.format_name().to_string(),
        })
    }

    /// Start a live game with the given bots.
    /// The game loop runs on a dedicated OS thread and publishes every tick.
    pub fn start_game(
        &self,
        settings: GameSettings,
        bots: Vec<BotEntry>,
        max_ticks: u64,
    ) -> Result<(), String> {
        self.start_game_with_callback(settings, bots, max_ticks, None)
    }

    /// Start a live game; `on_complete` runs on the game thread when it ends.
    pub fn start_game_with_callback(
        &self,
        settings: GameSettings,
        bots: Vec<BotEntry>,
        max_ticks: u64,
        on_complete: Option<Box<dyn FnOnce(GameResult) + Send + 'static>>,
    ) -> Result<(), String> {
        if self
            .running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err("A game is already running".into());
        }

        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let (control_tx, control_rx) = mpsc::channel();
        *self.control_tx.lock().unwrap_or_else(PoisonError::into_inner) = Some(control_tx);
        *self.game_meta.lock().unwrap_or_else(PoisonError::into_inner) = Some(GameMeta {
            participant_names: bots.iter().map(|b| b.name.clone()).collect(),
            start_time: chrono::Utc::now().to_rfc3339(),
            max_ticks,
        });
        self.current_tick.store(0, Ordering::Relaxed);
        self.tick_ms.store(settings.tick_ms, Ordering::Relaxed);

        let live = LiveLink {
            tx: self.broadcast_tx.clone(),
            latest_state: self.latest_state.clone(),
            running: self.running.clone(),
            current_tick: self.current_tick.clone(),
            control_rx,
            generation,
        };
        let codec = self.codec.clone();
        let running = self.running.clone();
        let latest_state = self.latest_state.clone();
        let control_tx = self.control_tx.clone();
        let game_meta = self.game_meta.clone();

        metrics::ACTIVE_GAMES.set(1);
        metrics::GAMES_STARTED_TOTAL.with_label_values(&["live"]).inc();
        tracing::info!(
            participants = bots.len(),
            max_ticks,
            seed = settings.seed,
            generation,
            "Starting live game"
        );

        let spawned = std::thread::Builder::new()
            .name("live-game".into())
            .spawn(move || {
                let result = std::panic::catch_unwind(AssertUnwindSafe(|| {
                    let game = new_game(settings, bots);
                    MatchRunner::new(game, codec, Some(live)).run(max_ticks)
                }));

                match result {
                    Ok(game_result) => {
                        tracing::info!(
                            ticks = game_result.ticks,
                            winner_team = ?game_result.winner_team,
                            "Live game finished"
                        );
                        metrics::GAMES_COMPLETED_TOTAL.with_label_values(&["live"]).inc();
                        if let Some(callback) = on_complete {
                            callback(game_result);
                        }
                    }
                    Err(panic_info) => {
                        tracing::error!("Game thread panicked: {}", panic_message(&*panic_info));
                        metrics::GAMES_ERRORED_TOTAL.with_label_values(&["live"]).inc();
                    }
                }

                metrics::ACTIVE_GAMES.set(0);
                *control_tx.lock().unwrap_or_else(PoisonError::into_inner) = None;
                *latest_state.lock().unwrap_or_else(PoisonError::into_inner) = None;
                *game_meta.lock().unwrap_or_else(PoisonError::into_inner) = None;
                running.store(false, Ordering::Relaxed);
            });

        if let Err(e) = spawned {
            metrics::ACTIVE_GAMES.set(0);
            self.running.store(false, Ordering::Relaxed);
            return Err(format!("Failed to spawn game thread: {e}"));
        }
        Ok(())
    }

    /// Ask the running game to admit a remote participant.
    pub async fn join(&self, name: &str, team: Option<u8>) -> Result<JoinTicket, String> {
        let (reply, response) = oneshot::channel();
        self.send_control(ControlRequest::Join {
            name: name.to_string(),
            team,
            reply,
        })?;
        response
            .await
            .map_err(|_| "Game ended before the join was processed".to_string())?
    }

    /// Remove the ticket's participant from the game that issued it.
    /// No-op when that game is no longer running.
    pub fn leave(&self, ticket: &JoinTicket) {
        let request = ControlRequest::Leave {
            participant_id: ticket.participant_id,
            generation: ticket.generation,
        };
        if let Err(e) = self.send_control(request) {
            tracing::debug!(participant_id = ticket.participant_id, "Leave ignored: {e}");
        }
    }

    fn send_control(&self, request: ControlRequest) -> Result<(), String> {
        let guard = self.control_tx.lock().unwrap_or_else(PoisonError::into_inner);
        let tx = guard.as_ref().ok_or_else(|| "No game is running".to_string())?;
        tx.send(request).map_err(|_| "No game is running".to_string())
    }
}

impl Default for GameServer {
    fn default() -> Self {
        Self::new(Codec::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bot::{ChaserBot, IdleBot};
    use crate::engine::command::BotCommand;
    use crate::protocol::{GzipJson, UnknownFieldPolicy};

    fn idle_pair() -> Vec<BotEntry> {
        vec![
            BotEntry::new("a", 0, Box::new(IdleBot::new())),
            BotEntry::new("b", 1, Box::new(IdleBot::new())),
        ]
    }

    fn fast_settings() -> GameSettings {
        GameSettings {
            tick_ms: 2,
            think_budget: Duration::from_secs(5),
            ..GameSettings::default()
        }
    }

    fn wait_until_stopped(server: &GameServer) {
        for _ in 0..200 {
            if !server.is_running() {
                return;
            }
            std::thread::sleep(Duration::from_millis(10));
        }
        panic!("game did not stop");
    }

    #[test]
    fn test_game_server_new() {
        let server = GameServer::default();
        assert!(!server.is_running());
        assert!(server.latest_state().is_none());
        assert!(server.active_game_info().is_none());
    }

    #[test]
    fn test_welcome_payload() {
        let server = GameServer::default();
        let payload = server.welcome().unwrap();
        let msg = server.codec().decode_server_message(payload.as_bytes()).unwrap();
        assert_eq!(
            msg,
            ServerMessage::Welcome {
                protocol_version: PROTOCOL_VERSION,
                tick_ms: DEFAULT_TICK_MS
            }
        );
    }

    #[test]
    fn test_start_game_while_running() {
        let server = GameServer::default();
        let settings = GameSettings {
            tick_ms: 20,
            ..GameSettings::default()
        };
        assert!(server.start_game(settings.clone(), idle_pair(), 1000).is_ok());
        assert!(server.start_game(settings, idle_pair(), 1000).is_err());

        let info = server.active_game_info().unwrap();
        assert_eq!(info.participant_names, vec!["a", "b"]);
        assert_eq!(info.wire_format, "json");

        server.stop_game();
        wait_until_stopped(&server);
        assert!(server.latest_state().is_none());
    }

    #[test]
    fn test_live_game_broadcasts_until_game_end() {
        let server = GameServer::default();
        let mut rx = server.subscribe();
        server.start_game(fast_settings(), idle_pair(), 15).unwrap();

        let mut messages = Vec::new();
        loop {
            let payload = rx.blocking_recv().unwrap();
            let msg = server.codec().decode_server_message(payload.as_bytes()).unwrap();
            let done = matches!(msg, ServerMessage::GameEnd { .. });
            messages.push(msg);
            if done {
                break;
            }
        }

        match &messages[0] {
            ServerMessage::State(snapshot) => {
                assert_eq!(snapshot.tick, 0);
                assert_eq!(snapshot.participants.len(), 2);
            }
            other => panic!("expected initial state, got {other:?}"),
        }
        assert!(matches!(messages[1], ServerMessage::Events { tick: 0, .. }));
        // Idle bots never score: draw at the time limit
        assert!(matches!(
            messages.last(),
            Some(ServerMessage::GameEnd { winner_team: None, ticks: 15, .. })
        ));
        wait_until_stopped(&server);
    }

    #[test]
    fn test_binary_codec_broadcasts_binary_frames() {
        let server = GameServer::new(Codec::new(Arc::new(GzipJson), UnknownFieldPolicy::Drop));
        let mut rx = server.subscribe();
        server.start_game(fast_settings(), idle_pair(), 3).unwrap();
        let payload = rx.blocking_recv().unwrap();
        assert!(!payload.is_text());
        assert!(server.codec().decode_server_message(payload.as_bytes()).is_ok());
        wait_until_stopped(&server);
    }

    #[tokio::test]
    async fn test_join_without_game_fails() {
        let server = GameServer::default();
        assert!(server.join("late", None).await.is_err());
        let (_, inbox) = RemoteBot::new();
        server.leave(&JoinTicket {
            participant_id: 1,
            generation: 0,
            inbox,
        });
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_remote_join_and_leave() {
        let server = GameServer::default();
        server
            .start_game(fast_settings(), vec![BotEntry::new("bot", 0, Box::new(IdleBot::new()))], 10_000)
            .unwrap();

        let ticket = server.join("human", None).await.unwrap();
        assert_eq!(ticket.participant_id, 2);
        assert!(ticket.inbox.submit(BotCommand::neutral()));

        assert!(server.join("   ", None).await.is_err());

        assert!(server.holds_current(&ticket));
        server.leave(&ticket);
        server.stop_game();
        for _ in 0..200 {
            if !server.is_running() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(!server.is_running());
    }

    fn idle_bots(count: u8) -> Vec<BotEntry> {
        (0..count)
            .map(|i| BotEntry::new(&format!("idle{i}"), i % 2, Box::new(IdleBot::new())))
            .collect()
    }

    fn latest_participant_ids(server: &GameServer) -> Vec<u32> {
        let Some(payload) = server.latest_state() else {
            return Vec::new();
        };
        match server.codec().decode_server_message(payload.as_bytes()).unwrap() {
            ServerMessage::State(snapshot) => snapshot.participants.iter().map(|p| p.id).collect(),
            other => panic!("expected state, got {other:?}"),
        }
    }

    async fn wait_until_stopped_async(server: &GameServer) {
        for _ in 0..200 {
            if !server.is_running() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("game did not stop");
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_leave_from_earlier_game_is_ignored() {
        let server = GameServer::default();
        server.start_game(fast_settings(), idle_bots(2), 100_000).unwrap();
        let stale = server.join("carol", None).await.unwrap();
        assert_eq!(stale.participant_id, 3);
        server.stop_game();
        wait_until_stopped_async(&server).await;
        assert!(!server.holds_current(&stale));

        server.start_game(fast_settings(), idle_bots(4), 100_000).unwrap();
        assert!(!server.holds_current(&stale));
        server.leave(&stale);

        // Requests are handled in order: once this join is admitted the
        // stale leave has been processed too.
        let fresh = server.join("dave", None).await.unwrap();
        assert_eq!(fresh.participant_id, 5);
        assert!(server.holds_current(&fresh));

        let mut ids = Vec::new();
        for _ in 0..200 {
            ids = latest_participant_ids(&server);
            if ids.contains(&5) {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(ids, vec![1, 2, 3, 4, 5]);

        server.leave(&fresh);
        server.stop_game();
        wait_until_stopped_async(&server).await;
    }

    #[test]
    fn test_admit_remote_balances_teams() {
        let mut game = Game::new(GameSettings::default());
        let first = admit_remote(&mut game, "p1", None, 1).unwrap();
        let second = admit_remote(&mut game, "p2", None, 1).unwrap();
        assert_eq!(game.participant(first.participant_id).unwrap().team, 0);
        assert_eq!(game.participant(second.participant_id).unwrap().team, 1);
        assert_eq!(first.generation, 1);
        assert!(admit_remote(&mut game, &"x".repeat(MAX_NAME_LEN + 1), None, 1).is_err());
    }

    #[test]
    fn test_admit_remote_rejects_when_full() {
        let mut game = Game::new(GameSettings::default());
        for i in 0..MAX_PARTICIPANTS {
            admit_remote(&mut game, &format!("p{i}"), None, 1).unwrap();
        }
        assert_eq!(admit_remote(&mut game, "late", None, 1).err().unwrap(), "Arena is full");
    }

    #[test]
    fn test_headless_game_is_reproducible() {
        let run = || {
            let bots = vec![
                BotEntry::new("red", 0, Box::new(ChaserBot::new())),
                BotEntry::new("blue", 1, Box::new(ChaserBot::new())),
            ];
            run_game_headless(
                GameSettings {
                    seed: 11,
                    ..fast_settings()
                },
                bots,
                300,
            )
        };
        let first = run();
        let second = run();
        assert!(first.error.is_none());
        assert!(first.ticks <= 300);
        assert_eq!(first.final_scores, second.final_scores);
        assert_eq!(first.ticks, second.ticks);
        assert_eq!(first.winner_team, second.winner_team);
        assert!(!first.replay_data.is_empty());
    }

    #[test]
    fn test_build_bots_reports_bad_spec() {
        let registry = ControllerRegistry::with_defaults();
        let specs = vec![BotSpec::new("ok", "idle", 0), BotSpec::new("bad", "nope", 1)];
        let err = build_bots(&registry, &specs).err().unwrap();
        assert!(err.contains("bad"));

        let bots = build_bots(&registry, &specs[..1]).unwrap();
        assert_eq!(bots[0].name, "ok");
    }
}
