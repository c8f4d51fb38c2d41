// Application configuration, loaded from environment variables and CLI flags.

use std::str::FromStr;
use std::time::Duration;

use crate::engine::config::{DEFAULT_MAX_TICKS, DEFAULT_THINK_BUDGET_MS, DEFAULT_TICK_MS};
use crate::engine::game::GameSettings;
use crate::protocol::{wire_format_by_name, Codec, UnknownFieldPolicy};

/// Parse an environment value, treating unparsable values as unset.
fn parse_env<T: FromStr>(env: &impl Fn(&str) -> Option<String>, key: &str) -> Option<T> {
    let raw = env(key)?;
    match raw.trim().parse() {
        Ok(v) => Some(v),
        Err(_) => {
            tracing::warn!("Ignoring invalid {key}={raw:?}, using the default");
            None
        }
    }
}

/// Application configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Port to bind the HTTP server to.
    pub port: u16,
    /// Live game tick interval in milliseconds.
    pub tick_ms: u64,
    /// Default game length for started games.
    pub max_ticks: u64,
    /// Per-controller decision budget in milliseconds.
    pub think_budget_ms: u64,
    /// Threads used to evaluate controllers each tick.
    pub think_workers: usize,
    /// Wire format name, see [`wire_format_by_name`].
    pub wire_format: String,
    /// Default seed for games started without one.
    pub game_seed: u64,
    /// Capacity of the headless worker pool.
    pub headless_workers: usize,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            port: 3000,
            tick_ms: DEFAULT_TICK_MS,
            max_ticks: DEFAULT_MAX_TICKS,
            think_budget_ms: DEFAULT_THINK_BUDGET_MS,
            think_workers: 1,
            wire_format: "json".to_string(),
            game_seed: 0,
            headless_workers: 2,
        }
    }
}

impl Config {
    /// Load configuration from environment variables and CLI arguments.
    ///
    /// Environment variables:
    /// - `PORT` - HTTP server port (default: 3000)
    /// - `TICK_MS` - live tick interval (default: 100)
    /// - `MAX_TICKS` - default game length (default: 6000)
    /// - `THINK_BUDGET_MS` - per-controller decision budget (default: 20)
    /// - `THINK_WORKERS` - controller evaluation threads (default: 1)
    /// - `WIRE_FORMAT` - `json` or `gzip-json` (default: `json`)
    /// - `GAME_SEED` - default spawn seed (default: 0)
    /// - `HEADLESS_WORKERS` - headless pool capacity (default: 2)
    ///
    /// CLI flags:
    /// - `--port <PORT>` - Override the port
    /// - `--headless-workers <N>` - Override the pool capacity
    pub fn load() -> Self {
        let args: Vec<String> = std::env::args().collect();
        Self::from_sources(&args, |key| std::env::var(key).ok())
    }

    /// Build a config from CLI args and an environment lookup.
    /// CLI flags take precedence, then the environment, then defaults.
    fn from_sources(args: &[String], env: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Config::default();

        let port = Self::parse_cli_value(args, "--port")
            .and_then(|v| v.parse().ok())
            .or_else(|| parse_env(&env, "PORT"))
            .unwrap_or(defaults.port);

        let headless_workers = Self::parse_cli_value(args, "--headless-workers")
            .and_then(|v| v.parse().ok())
            .or_else(|| parse_env(&env, "HEADLESS_WORKERS"))
            .unwrap_or(defaults.headless_workers);

        let wire_format = match env("WIRE_FORMAT") {
            Some(name) if wire_format_by_name(&name).is_some() => name,
            Some(name) => {
                tracing::warn!("Unknown WIRE_FORMAT '{name}', falling back to json");
                defaults.wire_format
            }
            None => defaults.wire_format,
        };

        Config {
            port,
            tick_ms: parse_env::<u64>(&env, "TICK_MS").filter(|&v| v > 0).unwrap_or(defaults.tick_ms),
            max_ticks: parse_env(&env, "MAX_TICKS").unwrap_or(defaults.max_ticks),
            think_budget_ms: parse_env(&env, "THINK_BUDGET_MS").unwrap_or(defaults.think_budget_ms),
            think_workers: parse_env::<usize>(&env, "THINK_WORKERS")
                .filter(|&v| v > 0)
                .unwrap_or(defaults.think_workers),
            wire_format,
            game_seed: parse_env(&env, "GAME_SEED").unwrap_or(defaults.game_seed),
            headless_workers,
        }
    }

    /// Parse a CLI flag value like `--port 8080`.
    fn parse_cli_value(args: &[String], flag: &str) -> Option<String> {
        args.windows(2).find_map(|pair| {
            if pair[0] == flag {
                Some(pair[1].clone())
            } else {
                None
            }
        })
    }

    /// The codec all connections use.
    pub fn codec(&self) -> Codec {
        match wire_format_by_name(&self.wire_format) {
            Some(format) => Codec::new(format, UnknownFieldPolicy::Drop),
            None => Codec::json(),
        }
    }

    /// Game settings for a game started with an optional explicit seed.
    pub fn game_settings(&self, seed: Option<u64>) -> GameSettings {
        GameSettings {
            seed: seed.unwrap_or(self.game_seed),
            tick_ms: self.tick_ms,
            think_budget: Duration::from_millis(self.think_budget_ms),
            think_workers: self.think_workers,
            ..GameSettings::default()
        }
    }
}
