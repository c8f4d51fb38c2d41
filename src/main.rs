use tower_http::cors::CorsLayer;

use skirmish_backend::api::{self, AppState};
use skirmish_backend::config::Config;
use skirmish_backend::metrics;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt::init();
    metrics::register_metrics();

    let config = Config::load();
    let port = config.port;
    tracing::info!(
        wire_format = %config.wire_format,
        tick_ms = config.tick_ms,
        think_budget_ms = config.think_budget_ms,
        think_workers = config.think_workers,
        headless_workers = config.headless_workers,
        "Loaded configuration"
    );

    let app = api::router(AppState::new(config)).layer(CorsLayer::permissive());

    let listener = tokio::net::TcpListener::bind(("0.0.0.0", port))
        .await
        .unwrap_or_else(|e| panic!("Failed to bind to port {port}: {e}"));

    tracing::info!("Skirmish backend listening on port {port}");
    axum::serve(listener, app)
        .await
        .expect("Failed to start server");
}
