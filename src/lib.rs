pub mod api;
pub mod bot;
pub mod config;
pub mod engine;
pub mod metrics;
pub mod protocol;
pub mod replay;
pub mod worker_pool;
