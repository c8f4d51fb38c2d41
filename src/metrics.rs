// Prometheus metrics definitions for the Skirmish backend.

use lazy_static::lazy_static;
use prometheus::{
    Encoder, Histogram, HistogramOpts, HistogramVec, IntCounter, IntCounterVec, IntGauge, Opts,
    Registry, TextEncoder,
};

lazy_static! {
    pub static ref REGISTRY: Registry = Registry::new();

    // ── Gauges ───────────────────────────────────────────────────────

    /// Currently running live games (0 or 1).
    pub static ref ACTIVE_GAMES: IntGauge =
        IntGauge::new("skirmish_active_games", "Currently running games").unwrap();

    /// Live WebSocket connections.
    pub static ref CONNECTED_WEBSOCKETS: IntGauge =
        IntGauge::new("skirmish_connected_websockets", "Live WebSocket connections").unwrap();

    /// Headless game worker threads currently active.
    pub static ref HEADLESS_WORKERS_ACTIVE: IntGauge =
        IntGauge::new("skirmish_headless_workers_active", "Headless game workers currently active").unwrap();

    // ── Counters ─────────────────────────────────────────────────────

    /// Total games started, by mode (live, headless).
    pub static ref GAMES_STARTED_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("skirmish_games_started_total", "Total games started"),
        &["mode"],
    )
    .unwrap();

    /// Total games completed, by mode.
    pub static ref GAMES_COMPLETED_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("skirmish_games_completed_total", "Total games completed"),
        &["mode"],
    )
    .unwrap();

    /// Total games whose thread panicked, by mode.
    pub static ref GAMES_ERRORED_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("skirmish_games_errored_total", "Total games that errored"),
        &["mode"],
    )
    .unwrap();

    /// Total WebSocket messages sent to clients.
    pub static ref WEBSOCKET_MESSAGES_SENT_TOTAL: IntCounter = IntCounter::new(
        "skirmish_websocket_messages_sent_total",
        "Total WebSocket messages sent",
    )
    .unwrap();

    /// Successfully decoded messages, by direction (client, server).
    pub static ref MESSAGES_DECODED_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("skirmish_messages_decoded_total", "Messages decoded"),
        &["direction"],
    )
    .unwrap();

    /// Rejected payloads, by direction and reason.
    pub static ref DECODE_FAILURES_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("skirmish_decode_failures_total", "Payloads rejected by the codec"),
        &["direction", "reason"],
    )
    .unwrap();

    /// Controller faults absorbed into neutral commands, by profile and kind.
    pub static ref CONTROLLER_FAULTS_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("skirmish_controller_faults_total", "Controller faults"),
        &["profile", "kind"],
    )
    .unwrap();

    /// Commands replaced by the neutral command by the tick loop, by reason.
    pub static ref NEUTRAL_SUBSTITUTIONS_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("skirmish_neutral_substitutions_total", "Neutral command substitutions"),
        &["reason"],
    )
    .unwrap();

    // ── Histograms ───────────────────────────────────────────────────

    /// Per-tick processing time in milliseconds.
    pub static ref GAME_TICK_DURATION_MS: Histogram = Histogram::with_opts(
        HistogramOpts::new("skirmish_game_tick_duration_ms", "Per-tick processing time in ms")
            .buckets(vec![0.1, 0.5, 1.0, 2.0, 5.0, 10.0, 25.0, 50.0, 100.0]),
    )
    .unwrap();

    /// Time spent in one controller decision, by profile.
    pub static ref CONTROLLER_THINK_DURATION_MS: HistogramVec = HistogramVec::new(
        HistogramOpts::new("skirmish_controller_think_duration_ms", "Controller think time in ms")
            .buckets(vec![0.01, 0.05, 0.1, 0.5, 1.0, 5.0, 10.0, 20.0, 50.0]),
        &["profile"],
    )
    .unwrap();
}

/// Register all metrics with the custom registry. Call once at startup.
pub fn register_metrics() {
    let collectors: Vec<Box<dyn prometheus::core::Collector>> = vec![
        Box::new(ACTIVE_GAMES.clone()),
        Box::new(CONNECTED_WEBSOCKETS.clone()),
        Box::new(HEADLESS_WORKERS_ACTIVE.clone()),
        Box::new(GAMES_STARTED_TOTAL.clone()),
        Box::new(GAMES_COMPLETED_TOTAL.clone()),
        Box::new(GAMES_ERRORED_TOTAL.clone()),
        Box::new(WEBSOCKET_MESSAGES_SENT_TOTAL.clone()),
        Box::new(MESSAGES_DECODED_TOTAL.clone()),
        Box::new(DECODE_FAILURES_TOTAL.clone()),
        Box::new(CONTROLLER_FAULTS_TOTAL.clone()),
        Box::new(NEUTRAL_SUBSTITUTIONS_TOTAL.clone()),
        Box::new(GAME_TICK_DURATION_MS.clone()),
        Box::new(CONTROLLER_THINK_DURATION_MS.clone()),
    ];

    for c in collectors {
        if let Err(e) = REGISTRY.register(c) {
            tracing::warn!("Failed to register metric: {e}");
        }
    }
}

/// Serialize all registered metrics to the Prometheus text exposition format.
pub fn gather_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();
    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        tracing::error!("Failed to encode metrics: {e}");
        return String::new();
    }
    String::from_utf8(buffer).unwrap_or_default()
}
