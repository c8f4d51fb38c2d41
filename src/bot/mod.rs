// Bot controllers: pluggable decision units that turn an observation into a command.

pub mod chaser;
pub mod idle;
pub mod lua;
pub mod remote;

use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::time::Instant;

use serde::Deserialize;

use crate::engine::command::{create_neutral_bot_command, BotCommand};
use crate::engine::observation::BotObservation;
use crate::metrics;

pub use chaser::ChaserBot;
pub use idle::IdleBot;
pub use lua::LuaBot;
pub use remote::{CommandInbox, RemoteBot};

/// Internal failure of a controller's decision logic.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ControllerFault {
    #[error("script error: {0}")]
    Script(String),
    #[error("controller panicked: {0}")]
    Panicked(String),
    #[error("controller unavailable: {0}")]
    Unavailable(String),
}

impl ControllerFault {
    /// Short label used for metrics and fault events.
    pub fn kind(&self) -> &'static str {
        match self {
            ControllerFault::Script(_) => "script",
            ControllerFault::Panicked(_) => "panic",
            ControllerFault::Unavailable(_) => "unavailable",
        }
    }
}

/// A decision unit driving one participant.
///
/// Implementations provide `try_think`; the simulation calls `think`, which
/// never fails: faults and panics degrade to the neutral command.
pub trait BotController: Send {
    /// Stable identifier of the controller variant, e.g. `"idle"`.
    fn profile(&self) -> &str;

    /// Whether identical observations always produce identical commands.
    fn is_deterministic(&self) -> bool {
        false
    }

    fn try_think(&mut self, observation: &BotObservation) -> Result<BotCommand, ControllerFault>;

    fn think(&mut self, observation: &BotObservation) -> BotCommand {
        let start = Instant::now();
        let outcome = std::panic::catch_unwind(AssertUnwindSafe(|| self.try_think(observation)))
            .unwrap_or_else(|panic_info| Err(ControllerFault::Panicked(panic_message(&*panic_info))));
        let profile = self.profile().to_string();

        metrics::CONTROLLER_THINK_DURATION_MS
            .with_label_values(&[&profile])
            .observe(start.elapsed().as_secs_f64() * 1000.0);

        match outcome {
            Ok(command) => command,
            Err(fault) => {
                tracing::warn!(
                    profile = %profile,
                    participant_id = observation.self_id(),
                    tick = observation.tick(),
                    "Controller fault, substituting neutral command: {fault}"
                );
                metrics::CONTROLLER_FAULTS_TOTAL
                    .with_label_values(&[&profile, fault.kind()])
                    .inc();
                create_neutral_bot_command()
            }
        }
    }
}

/// Extract a readable message from a panic payload.
pub fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Description of a bot-driven participant, as submitted to start a game.
#[derive(Debug, Clone, Deserialize)]
pub struct BotSpec {
    pub name: String,
    pub profile: String,
    #[serde(default)]
    pub team: u8,
    /// Source code for scripted profiles.
    #[serde(default)]
    pub script: Option<String>,
}

impl BotSpec {
    pub fn new(name: &str, profile: &str, team: u8) -> Self {
        Self {
            name: name.to_string(),
            profile: profile.to_string(),
            team,
            script: None,
        }
    }

    pub fn with_script(mut self, script: &str) -> Self {
        self.script = Some(script.to_string());
        self
    }
}

type ControllerFactory =
    Box<dyn Fn(&BotSpec) -> Result<Box<dyn BotController>, String> + Send + Sync>;

/// Lookup table from profile name to controller factory.
pub struct ControllerRegistry {
    factories: HashMap<String, ControllerFactory>,
}

impl ControllerRegistry {
    pub fn new() -> Self {
        Self {
            factories: HashMap::new(),
        }
    }

    /// Registry with the built-in `idle`, `chaser` and `lua` profiles.
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register(idle::PROFILE, |_| Ok(Box::new(IdleBot::new())));
        registry.register(chaser::PROFILE, |_| Ok(Box::new(ChaserBot::new())));
        registry.register(lua::PROFILE, |spec| {
            let script = spec
                .script
                .as_deref()
                .ok_or_else(|| format!("Bot '{}' uses the lua profile but has no script", spec.name))?;
            Ok(Box::new(LuaBot::new(&spec.name, script)?))
        });
        registry
    }

    /// Register (or replace) the factory for `profile`.
    pub fn register<F>(&mut self, profile: &str, factory: F)
    where
        F: Fn(&BotSpec) -> Result<Box<dyn BotController>, String> + Send + Sync + 'static,
    {
        self.factories.insert(profile.to_string(), Box::new(factory));
    }

    /// Build a controller for `spec`.
    pub fn create(&self, spec: &BotSpec) -> Result<Box<dyn BotController>, String> {
        let factory = self
            .factories
            .get(&spec.profile)
            .ok_or_else(|| format!("Unknown controller profile: {}", spec.profile))?;
        factory(spec)
    }

    /// Registered profile names, sorted.
    pub fn profiles(&self) -> Vec<String> {
        let mut names: Vec<String> = self.factories.keys().cloned().collect();
        names.sort();
        names
    }
}

impl Default for ControllerRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::command::Vec2;
    use crate::engine::observation::{ArenaBounds, ParticipantView};

    struct FaultyBot {
        panic: bool,
    }

    impl BotController for FaultyBot {
        fn profile(&self) -> &str {
            "faulty"
        }

        fn try_think(&mut self, _observation: &BotObservation) -> Result<BotCommand, ControllerFault> {
            if self.panic {
                panic!("boom");
            }
            Err(ControllerFault::Script("bad return".into()))
        }
    }

    fn observation() -> BotObservation {
        BotObservation::new(
            1,
            1,
            ArenaBounds {
                width: 10.0,
                height: 10.0,
            },
            vec![ParticipantView {
                id: 1,
                name: "solo".into(),
                team: 0,
                position: Vec2::new(5.0, 5.0),
                health: 100,
                alive: true,
            }],
        )
    }

    #[test]
    fn test_fault_degrades_to_neutral() {
        let mut bot = FaultyBot { panic: false };
        assert!(bot.try_think(&observation()).is_err());
        assert_eq!(bot.think(&observation()), BotCommand::neutral());
    }

    #[test]
    fn test_panic_degrades_to_neutral() {
        let mut bot = FaultyBot { panic: true };
        assert_eq!(bot.think(&observation()), BotCommand::neutral());
    }

    #[test]
    fn test_registry_defaults() {
        let registry = ControllerRegistry::with_defaults();
        assert_eq!(registry.profiles(), vec!["chaser", "idle", "lua"]);

        let bot = registry.create(&BotSpec::new("a", "idle", 0)).unwrap();
        assert_eq!(bot.profile(), "idle");
        assert!(bot.is_deterministic());
    }

    #[test]
    fn test_registry_unknown_profile() {
        let registry = ControllerRegistry::with_defaults();
        let err = registry
            .create(&BotSpec::new("a", "telepathic", 0))
            .err()
            .unwrap();
        assert!(err.contains("telepathic"));
    }

    #[test]
    fn test_registry_lua_requires_script() {
        let registry = ControllerRegistry::with_defaults();
        assert!(registry.create(&BotSpec::new("a", "lua", 0)).is_err());
        let bot = registry
            .create(&BotSpec::new("a", "lua", 0).with_script("function think(obs) return {} end"))
            .unwrap();
        assert_eq!(bot.profile(), "lua");
    }

    #[test]
    fn test_registry_custom_profile() {
        let mut registry = ControllerRegistry::new();
        registry.register("faulty", |_| Ok(Box::new(FaultyBot { panic: false })));
        let mut bot = registry.create(&BotSpec::new("f", "faulty", 0)).unwrap();
        assert!(bot.think(&observation()).is_neutral());
    }

    #[test]
    fn test_panic_message() {
        let payload: Box<dyn std::any::Any + Send> = Box::new("static");
        assert_eq!(panic_message(&*payload), "static");
        let payload: Box<dyn std::any::Any + Send> = Box::new(String::from("owned"));
        assert_eq!(panic_message(&*payload), "owned");
        let payload: Box<dyn std::any::Any + Send> = Box::new(3u8);
        assert_eq!(panic_message(&*payload), "unknown panic");
    }
}
